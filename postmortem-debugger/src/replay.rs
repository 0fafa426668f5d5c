//! A transport backed by a recorded command transcript.
//!
//! Replays a `command → output` map captured from a live debugger
//! session, so transcripts can be analyzed offline and parsers can be
//! exercised without a debugger on the machine.

use std::collections::HashMap;
use std::path::Path;

use postmortem_common::Dialect;

use crate::error::{DebuggerError, DebuggerErrorKind};
use crate::facade::DebuggerTransport;

/// A [`DebuggerTransport`] that replays recorded output.
///
/// Unknown commands return an empty string, matching the behavior of a
/// debugger printing nothing for a command it has no data for.
pub struct ReplayTransport {
    dialect: Dialect,
    outputs: HashMap<String, String>,
    open: bool,
}

impl ReplayTransport {
    /// Creates a transport from a recorded map.
    pub fn new(dialect: Dialect, outputs: HashMap<String, String>) -> Self {
        ReplayTransport {
            dialect,
            outputs,
            open: false,
        }
    }

    /// Creates a transport from `(command, output)` pairs.
    pub fn from_pairs(dialect: Dialect, pairs: &[(&str, &str)]) -> Self {
        let outputs = pairs
            .iter()
            .map(|(command, output)| (command.to_string(), output.to_string()))
            .collect();
        Self::new(dialect, outputs)
    }

    /// Loads a transcript from a JSON object file of the form
    /// `{"command": "output", …}`.
    pub fn from_json_file(dialect: Dialect, path: &Path) -> Result<Self, DebuggerError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| DebuggerError::new(DebuggerErrorKind::OpenFailed, e))?;
        let outputs: HashMap<String, String> = serde_json::from_str(&text)
            .map_err(|e| DebuggerError::new(DebuggerErrorKind::OpenFailed, e))?;
        Ok(Self::new(dialect, outputs))
    }
}

impl DebuggerTransport for ReplayTransport {
    fn dialect(&self) -> Dialect {
        self.dialect
    }

    fn open(&mut self, _dump_path: &Path) -> Result<(), DebuggerError> {
        self.open = true;
        Ok(())
    }

    fn close(&mut self) {
        self.open = false;
    }

    fn is_open(&self) -> bool {
        self.open
    }

    fn execute(&mut self, command: &str) -> Result<String, DebuggerError> {
        Ok(self.outputs.get(command).cloned().unwrap_or_default())
    }
}
