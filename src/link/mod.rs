/// `link/` - outbound side of the host link
///
/// Three kinds of traffic leave the module: text lines (script output,
/// status), raw byte payloads (script read-back, `send_usb`) and diagnostics
/// tied to a failing stage. Transport framing is the implementor's business.
pub mod control;

use std::{
    io::Write,
    sync::{Arc, Mutex, PoisonError},
};

pub use control::HostCommand;

pub trait HostLink: Send + Sync {
    fn send_chunk(&self, text: &str);
    fn send_raw(&self, bytes: &[u8]);
    fn send_error(&self, text: &str);
}

pub type SharedLink = Arc<dyn HostLink>;

// ── Stdout link ──────────────────────────────────────────────────────────────

/// Host link over the process's stdout, used by the host binary.
#[derive(Debug, Default)]
pub struct StdoutLink;

impl HostLink for StdoutLink {
    fn send_chunk(&self, text: &str) {
        let mut out = std::io::stdout().lock();
        let _ = writeln!(out, "{text}");
        let _ = out.flush();
    }

    fn send_raw(&self, bytes: &[u8]) {
        let mut out = std::io::stdout().lock();
        let _ = out.write_all(bytes);
        let _ = out.flush();
    }

    fn send_error(&self, text: &str) {
        let mut out = std::io::stdout().lock();
        let _ = writeln!(out, "{text}");
        let _ = out.flush();
    }
}

// ── Recording link ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    Chunk(String),
    Raw(Vec<u8>),
    Error(String),
}

/// Captures everything sent so it can be inspected later. Clones share the
/// same log.
#[derive(Debug, Clone, Default)]
pub struct RecordingLink {
    sent: Arc<Mutex<Vec<Outbound>>>,
}

impl RecordingLink {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&self, msg: Outbound) {
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(msg);
    }

    pub fn sent(&self) -> Vec<Outbound> {
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Drain and return everything recorded so far.
    pub fn take(&self) -> Vec<Outbound> {
        std::mem::take(&mut *self.sent.lock().unwrap_or_else(PoisonError::into_inner))
    }

    pub fn errors(&self) -> Vec<String> {
        self.sent()
            .into_iter()
            .filter_map(|m| match m {
                Outbound::Error(e) => Some(e),
                _ => None,
            })
            .collect()
    }

    pub fn chunks(&self) -> Vec<String> {
        self.sent()
            .into_iter()
            .filter_map(|m| match m {
                Outbound::Chunk(c) => Some(c),
                _ => None,
            })
            .collect()
    }

    pub fn raw(&self) -> Vec<Vec<u8>> {
        self.sent()
            .into_iter()
            .filter_map(|m| match m {
                Outbound::Raw(r) => Some(r),
                _ => None,
            })
            .collect()
    }
}

impl HostLink for RecordingLink {
    fn send_chunk(&self, text: &str) {
        self.push(Outbound::Chunk(text.to_string()));
    }

    fn send_raw(&self, bytes: &[u8]) {
        self.push(Outbound::Raw(bytes.to_vec()));
    }

    fn send_error(&self, text: &str) {
        self.push(Outbound::Error(text.to_string()));
    }
}
