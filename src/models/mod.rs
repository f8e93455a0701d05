//! Domain model module declarations.

pub mod file_tree;
pub mod process;
pub mod readiness;
pub mod session;

pub use file_tree::{FileContents, FileTree, FileTreeEntry, FileTreeNode};
pub use process::{ChunkDecoder, CommandSpec, ExitFuture, ManagedProcess, OutputStream};
pub use readiness::ReadinessEvent;
pub use session::{BootstrapSession, LogEntry, LogSource, SessionPhase};
