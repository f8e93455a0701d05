//! Readiness detection from dev-server output.
//!
//! Dev servers announce their listening address on stdout, e.g. Vite's
//! `Local:   http://localhost:5173/`. The scanner reassembles lines across
//! arbitrary chunk boundaries, strips terminal color codes, and reports the
//! first address seen for each port.

use std::collections::HashSet;
use std::sync::OnceLock;

use regex::Regex;

use crate::models::{ChunkDecoder, ReadinessEvent};

/// Longest partial line kept while waiting for a newline.
pub const MAX_PENDING_BYTES: usize = 64 * 1024;

#[allow(clippy::expect_used)]
fn address_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(
            r"(https?)://(localhost|127\.0\.0\.1|0\.0\.0\.0|\[::1?\]|[A-Za-z0-9-]+\.local):(\d{1,5})",
        )
        .expect("address pattern is a valid literal")
    })
}

#[allow(clippy::expect_used)]
fn ansi_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"\x1b\[[0-9;?]*[A-Za-z]").expect("ansi pattern is a valid literal")
    })
}

/// Incremental scanner over one process's output.
#[derive(Debug, Default)]
pub struct ReadinessScanner {
    decoder: ChunkDecoder,
    pending: String,
    seen_ports: HashSet<u16>,
}

impl ReadinessScanner {
    /// Create an empty scanner.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one output chunk; returns addresses completed by this chunk.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<ReadinessEvent> {
        let text = self.decoder.decode(chunk);
        self.pending.push_str(&text);

        let mut events = Vec::new();
        while let Some(newline) = self.pending.find('\n') {
            let line: String = self.pending.drain(..=newline).collect();
            self.scan_line(&line, &mut events);
        }

        if self.pending.len() > MAX_PENDING_BYTES {
            let line = std::mem::take(&mut self.pending);
            self.scan_line(&line, &mut events);
        }
        events
    }

    /// Scan whatever is left once the stream has ended.
    pub fn finish(&mut self) -> Vec<ReadinessEvent> {
        let tail = self.decoder.finish();
        self.pending.push_str(&tail);
        let mut events = Vec::new();
        let line = std::mem::take(&mut self.pending);
        self.scan_line(&line, &mut events);
        events
    }

    fn scan_line(&mut self, line: &str, events: &mut Vec<ReadinessEvent>) {
        let clean = ansi_pattern().replace_all(line, "");
        for caps in address_pattern().captures_iter(&clean) {
            let Ok(port) = caps[3].parse::<u16>() else {
                continue;
            };
            if port == 0 || !self.seen_ports.insert(port) {
                continue;
            }
            let host = match &caps[2] {
                "0.0.0.0" | "[::]" => "localhost",
                other => other,
            };
            events.push(ReadinessEvent::new(
                port,
                format!("{}://{host}:{port}", &caps[1]),
            ));
        }
    }
}
