//! The synchronous debugger facade.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;

use postmortem_common::Dialect;

use crate::error::{DebuggerError, DebuggerErrorKind};

/// Command prefixes that would escape into a host shell or a scripting
/// engine. Matched at the start of every `;`/`|`/`&`-separated segment.
static BLOCKED_PREFIXES: &[&str] = &[".shell", "platform shell", "command script", "script"];

/// The transport underneath the facade, typically a live LLDB or WinDbg
/// process. Implementations may block on I/O; the facade models every
/// call as synchronous.
pub trait DebuggerTransport: Send {
    /// The dialect this transport speaks.
    fn dialect(&self) -> Dialect;

    /// Opens the dump at the given path.
    fn open(&mut self, dump_path: &Path) -> Result<(), DebuggerError>;

    /// Closes the dump and releases transport resources.
    fn close(&mut self);

    /// Whether a dump is currently open.
    fn is_open(&self) -> bool;

    /// Executes a single command and returns its raw output.
    fn execute(&mut self, command: &str) -> Result<String, DebuggerError>;
}

struct DebuggerInner {
    transport: Box<dyn DebuggerTransport>,
    cache: HashMap<String, String>,
}

/// Synchronous request/response facade over an opened dump.
///
/// Output is cached by command string for the lifetime of one opened
/// dump; `execute` is therefore deterministic for a given dump.
/// Concurrent callers are serialized internally, the facade holds
/// exclusive ownership of the dump.
pub struct Debugger {
    inner: Mutex<DebuggerInner>,
    dialect: Dialect,
    initialized: AtomicBool,
}

impl Debugger {
    /// Creates a facade over the given transport.
    pub fn new(transport: Box<dyn DebuggerTransport>) -> Self {
        let dialect = transport.dialect();
        Debugger {
            inner: Mutex::new(DebuggerInner {
                transport,
                cache: HashMap::new(),
            }),
            dialect,
            initialized: AtomicBool::new(false),
        }
    }

    /// The command dialect spoken by the underlying debugger.
    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    /// Whether a dump is currently open.
    pub fn is_open(&self) -> bool {
        self.inner.lock().transport.is_open()
    }

    /// Whether the underlying debugger has been initialized by at least
    /// one successful open. Stays `true` after `close`.
    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Relaxed)
    }

    /// Opens the dump at the given path, clearing any cached output.
    pub fn open(&self, dump_path: &Path) -> Result<(), DebuggerError> {
        let mut inner = self.inner.lock();
        inner.cache.clear();
        inner.transport.open(dump_path)?;
        self.initialized.store(true, Ordering::Relaxed);
        Ok(())
    }

    /// Closes the dump.
    pub fn close(&self) {
        let mut inner = self.inner.lock();
        inner.cache.clear();
        inner.transport.close();
    }

    /// Executes a command and returns its output.
    ///
    /// Commands pass the unsafe-command filter first; output is returned
    /// from the cache when the same command was already issued against
    /// the currently open dump.
    pub fn execute(&self, command: &str) -> Result<String, DebuggerError> {
        check_command_safety(command)?;

        let mut inner = self.inner.lock();
        if !inner.transport.is_open() {
            return Err(DebuggerErrorKind::NotOpen.into());
        }

        if let Some(cached) = inner.cache.get(command) {
            return Ok(cached.clone());
        }

        let output = inner.transport.execute(command)?;
        inner.cache.insert(command.to_owned(), output.clone());
        Ok(output)
    }
}

/// Rejects multi-line commands and commands that would reach a host
/// shell or scripting engine.
///
/// A command is blocked when any segment, after splitting on `;`, `|`
/// or `&`, starts with one of the blocked prefixes. The check is
/// case-insensitive; embedded CR or LF is always rejected.
pub fn check_command_safety(command: &str) -> Result<(), DebuggerError> {
    if command.contains('\n') || command.contains('\r') {
        return Err(DebuggerError::new(
            DebuggerErrorKind::UnsafeCommand,
            "multi-line commands are not allowed",
        ));
    }

    for segment in command.split(|c| matches!(c, ';' | '|' | '&')) {
        let segment = segment.trim_start().to_ascii_lowercase();
        for prefix in BLOCKED_PREFIXES {
            if segment.starts_with(prefix) {
                return Err(DebuggerError::new(
                    DebuggerErrorKind::UnsafeCommand,
                    format!("command contains blocked prefix `{prefix}`"),
                ));
            }
        }
    }

    Ok(())
}
