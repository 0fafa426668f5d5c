//! Managed-runtime reader for `postmortem`.
//!
//! This crate reads the managed side of a crash dump: runtime modules,
//! ECMA-335 metadata (assembly versions and custom attributes), and the
//! garbage-collected heap (type statistics, string duplicates, task and
//! state-machine data, fragmentation).
//!
//! The dump itself is opened by an external collaborator; access to it
//! is modeled by the [`RuntimeReader`] and [`HeapReader`] traits, the
//! same externalization applied to the debugger transport. Everything
//! above those traits (metadata parsing, attribute decoding, heap
//! statistics, object inspection) is implemented here.
//!
//! # Structure of an ECMA-335 metadata image
//!
//! A metadata image is divided into sections called _streams_:
//! * `#~` ("metadata"), a list of metadata tables.
//! * `#Strings`, null-terminated UTF-8 strings.
//! * `#GUID`, a list of GUIDs.
//! * `#US` ("user strings"), UTF-16 encoded strings.
//! * `#Blob`, blobs of data that don't fit in any of the other streams.
//!
//! The tables of interest here are `Assembly` (version and name),
//! `CustomAttribute` (assembly-level attributes), and the `MemberRef` /
//! `TypeRef` / `TypeDef` tables needed to resolve an attribute's
//! constructor to a fully qualified type name.
//!
//! This module is part of the `postmortem` crate.

#![warn(missing_docs)]

mod enrich;
pub mod heap;
mod inspect;
mod metadata;
mod reader;
#[cfg(test)]
pub(crate) mod testutil;

pub use crate::enrich::{enrich_report, MAX_METADATA_BYTES};
pub use crate::heap::{analyze_heap, summarize_heap, HeapAnalysisOptions};
pub use crate::inspect::inspect_object;
pub use crate::metadata::{MetadataError, MetadataErrorKind, MetadataImage};
pub use crate::reader::*;
