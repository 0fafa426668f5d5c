use std::error::Error;
use std::fmt;

use thiserror::Error;

/// Errors related to driving the debugger facade.
#[non_exhaustive]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DebuggerErrorKind {
    /// No dump is currently open.
    NotOpen,

    /// The dump file could not be opened by the transport.
    OpenFailed,

    /// The command was rejected by the unsafe-command filter.
    UnsafeCommand,

    /// The transport failed to execute a command.
    Transport,
}

impl fmt::Display for DebuggerErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotOpen => write!(f, "no dump is open"),
            Self::OpenFailed => write!(f, "failed to open dump"),
            Self::UnsafeCommand => write!(f, "blocked unsafe command"),
            Self::Transport => write!(f, "debugger transport error"),
        }
    }
}

/// An error returned by the [`Debugger`](crate::Debugger) facade.
#[derive(Debug, Error)]
#[error("{kind}")]
pub struct DebuggerError {
    kind: DebuggerErrorKind,
    #[source]
    source: Option<Box<dyn Error + Send + Sync + 'static>>,
}

impl DebuggerError {
    /// Creates a new debugger error from a known kind of error as well
    /// as an arbitrary error payload.
    pub fn new<E>(kind: DebuggerErrorKind, source: E) -> Self
    where
        E: Into<Box<dyn Error + Send + Sync>>,
    {
        let source = Some(source.into());
        Self { kind, source }
    }

    /// Returns the corresponding [`DebuggerErrorKind`] for this error.
    pub fn kind(&self) -> DebuggerErrorKind {
        self.kind
    }

    /// Returns the full message including the source chain, used when
    /// surfacing the error as a tool result.
    pub fn full_message(&self) -> String {
        let mut message = self.to_string();
        let mut source = self.source();
        while let Some(err) = source {
            message.push_str(": ");
            message.push_str(&err.to_string());
            source = err.source();
        }
        message
    }
}

impl From<DebuggerErrorKind> for DebuggerError {
    fn from(kind: DebuggerErrorKind) -> Self {
        Self { kind, source: None }
    }
}
