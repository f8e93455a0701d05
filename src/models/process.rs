//! Process descriptors and handles for commands run inside the runtime.

use std::fmt::{Display, Formatter};

use bytes::Bytes;
use futures_util::future::BoxFuture;
use futures_util::stream::BoxStream;
use serde::Deserialize;

use crate::Result;

/// Ordered, finite sequence of raw output chunks from one process.
///
/// Chunk boundaries carry no meaning; a single line may be split across
/// several chunks.
pub type OutputStream = BoxStream<'static, Bytes>;

/// Future resolving to the process exit code.
pub type ExitFuture = BoxFuture<'static, Result<i32>>;

/// A command and its argument list.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct CommandSpec {
    /// Program name resolved inside the runtime.
    pub command: String,
    /// Arguments passed verbatim.
    #[serde(default)]
    pub args: Vec<String>,
}

impl CommandSpec {
    /// Build a command spec from a program and its arguments.
    #[must_use]
    pub fn new<I, S>(command: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            command: command.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }
}

impl Display for CommandSpec {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.command)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

/// A subprocess running inside the runtime.
///
/// Owned by whoever spawned it. The output stream ends once the process has
/// closed its output; `exit` resolves once the process has terminated.
pub struct ManagedProcess {
    /// Command that was started.
    pub spec: CommandSpec,
    /// Live output chunks in arrival order.
    pub output: OutputStream,
    /// Pending exit code.
    pub exit: ExitFuture,
}

impl ManagedProcess {
    /// Assemble a handle from its parts.
    #[must_use]
    pub fn new(spec: CommandSpec, output: OutputStream, exit: ExitFuture) -> Self {
        Self { spec, output, exit }
    }
}

/// Incremental UTF-8 decoding of one process's output.
///
/// A multi-byte character split across chunks is held back until its
/// remaining bytes arrive. Invalid bytes decode to U+FFFD.
#[derive(Debug, Default)]
pub struct ChunkDecoder {
    carry: Vec<u8>,
}

impl ChunkDecoder {
    /// Create a decoder with nothing held back.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode `chunk`, keeping an incomplete trailing sequence for the next
    /// call.
    pub fn decode(&mut self, chunk: &[u8]) -> String {
        let mut bytes = std::mem::take(&mut self.carry);
        bytes.extend_from_slice(chunk);

        let mut text = String::with_capacity(bytes.len());
        let mut rest = bytes.as_slice();
        loop {
            match std::str::from_utf8(rest) {
                Ok(valid) => {
                    text.push_str(valid);
                    break;
                }
                Err(err) => {
                    let (valid, after) = rest.split_at(err.valid_up_to());
                    text.push_str(&String::from_utf8_lossy(valid));
                    match err.error_len() {
                        Some(len) => {
                            text.push(char::REPLACEMENT_CHARACTER);
                            rest = &after[len..];
                        }
                        None => {
                            self.carry = after.to_vec();
                            break;
                        }
                    }
                }
            }
        }
        text
    }

    /// Flush whatever is held back once the stream has ended.
    pub fn finish(&mut self) -> String {
        let carry = std::mem::take(&mut self.carry);
        String::from_utf8_lossy(&carry).into_owned()
    }
}

impl std::fmt::Debug for ManagedProcess {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManagedProcess")
            .field("spec", &self.spec)
            .finish_non_exhaustive()
    }
}
