//! Debugger facade and output parsers for `postmortem`.
//!
//! The root type is [`Debugger`], a synchronous request/response facade
//! over an opened crash dump. It wraps a [`DebuggerTransport`] (the
//! actual LLDB or WinDbg process is an external collaborator), caches
//! command output per dump lifetime, and rejects commands that would
//! spawn a host shell.
//!
//! The [`lldb`] and [`windbg`] modules turn raw command output into
//! typed report data. Parsers are resilient by construction: a line that
//! does not match is skipped, a field that cannot be extracted stays
//! empty, and no parser ever fails the report.
//!
//! This module is part of the `postmortem` crate.

#![warn(missing_docs)]

mod error;
mod facade;
pub mod lldb;
pub mod procinfo;
mod replay;
pub mod windbg;

pub use crate::error::{DebuggerError, DebuggerErrorKind};
pub use crate::facade::{Debugger, DebuggerTransport};
pub use crate::replay::ReplayTransport;
