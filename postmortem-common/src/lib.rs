//! Common functionality for `postmortem`.
//!
//! This crate exposes a set of key types shared by all analysis crates:
//!
//!  - [`Dialect`]: The command dialect spoken by the underlying native debugger.
//!  - [`Arch`]: Processor architectures recognized in dump metadata.
//!  - Utilities to parse and format hexadecimal addresses.
//!  - [`truncate_middle`]: Head-and-tail truncation for large free-form
//!    command transcripts.
//!
//! This module is part of the `postmortem` crate.

#![warn(missing_docs)]

mod text;
mod types;

pub use crate::text::*;
pub use crate::types::*;
