//! PE/CLI module images (ECMA-335 Partition II).
//!
//! [`pe`] locates the CLI header, metadata, resources and debug directory inside a PE file and
//! lays out new images. [`metadata`] handles the metadata root and the `#~` table stream,
//! [`tables`] describes the table schema and coded indexes and [`heaps`] the `#Strings`,
//! `#Blob`, `#GUID` and `#US` heaps. Signature blobs and method bodies are in [`signature`] and
//! [`code`].
//!
//! [`reader`] turns an image into a [`crate::Module`] and [`writer`] does the reverse. Writing is
//! deterministic: heaps and tables are filled in model order, so reading an image produced by
//! the writer and writing it again yields the same bytes.

pub(crate) mod code;
pub(crate) mod heaps;
pub(crate) mod metadata;
pub(crate) mod pe;
pub(crate) mod reader;
pub(crate) mod signature;
pub(crate) mod tables;
pub(crate) mod writer;

/// Name of the pseudo type holding global fields and methods.
pub(crate) const MODULE_TYPE: &str = "<Module>";
