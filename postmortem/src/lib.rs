//! `postmortem` is a library to analyze post-mortem crash dumps through
//! an interactive native debugger (LLDB or WinDbg) and a direct reader
//! of managed-runtime metadata. It consists of multiple largely
//! independent crates bundled under this umbrella.
//!
//! # What's in the package
//!
//! - Structured crash reports with environment-variable redaction and
//!   stable deduplication signatures (`report`, always available)
//! - A debugger facade with an unsafe-command filter plus LLDB and
//!   WinDbg output parsers (**`debugger`**, default)
//! - ECMA-335 metadata parsing, assembly attribute decoding and managed
//!   heap statistics (**`runtime`**)
//! - The crash analysis pipeline and finalizer (**`pipeline`**, default)
//! - A bounded AI investigation loop over a tool-using chat transport
//!   (**`ai`**)
//!
//! # Usage
//!
//! Add `postmortem` as a dependency to your `Cargo.toml` and enable the
//! features you need:
//!
//! ```toml
//! [dependencies]
//! postmortem = { version = "1.4.0", features = ["ai"] }
//! ```

#![warn(missing_docs)]

#[doc(inline)]
#[cfg(feature = "ai")]
pub use postmortem_ai as ai;
#[doc(inline)]
pub use postmortem_common as common;
#[doc(inline)]
#[cfg(feature = "debugger")]
pub use postmortem_debugger as debugger;
#[doc(inline)]
#[cfg(feature = "pipeline")]
pub use postmortem_pipeline as pipeline;
#[doc(inline)]
pub use postmortem_report as report;
#[doc(inline)]
#[cfg(feature = "runtime")]
pub use postmortem_runtime as runtime;
