//! Closed error taxonomies for the public API surface.
//!
//! Internal helpers are free to use `anyhow::Result` where the caller does
//! not need to match on a specific failure mode, but anything that crosses
//! the `Context`, `Patcher`, or `RedirectDatabase` boundary returns one of
//! the enums below so callers can branch on `PatchError::code()` without
//! string-matching a `Display` message.

use std::io;
use std::path::PathBuf;

/// The closed set of ways a single file's header patch can fail.
///
/// Variants map 1:1 onto the phases of [`crate::header::patch_file`]:
/// loading, deserializing, planning/applying rewrites, and serializing.
#[derive(thiserror::Error, Debug)]
pub enum PatchError {
    #[error("failed to load source asset {path}: {source}")]
    FailedToLoadSourceAsset { path: PathBuf, source: io::Error },

    #[error("failed to deserialize source asset {path} at offset {offset}: {reason}")]
    FailedToDeserializeSourceAsset {
        path: PathBuf,
        offset: u64,
        reason: String,
    },

    #[error("unexpected section order in {path}: expected {expected} before {found}")]
    UnexpectedSectionOrder {
        path: PathBuf,
        expected: &'static str,
        found: &'static str,
    },

    #[error("bad offset {offset} for section {section} in {path} (header size {header_size})")]
    BadOffset {
        path: PathBuf,
        section: &'static str,
        offset: i64,
        header_size: i64,
    },

    #[error("unknown section tag {tag} in {path}")]
    UnknownSection { path: PathBuf, tag: u32 },

    #[error("required section {section} is empty in {path}")]
    EmptyRequiredSection {
        path: PathBuf,
        section: &'static str,
    },

    #[error("failed to open destination file {path}: {source}")]
    FailedToOpenDestinationFile { path: PathBuf, source: io::Error },

    #[error("failed to write to destination file {path}: {source}")]
    FailedToWriteToDestinationFile { path: PathBuf, source: io::Error },
}

impl Clone for PatchError {
    fn clone(&self) -> Self {
        fn clone_io_error(source: &io::Error) -> io::Error {
            io::Error::new(source.kind(), source.to_string())
        }

        match self {
            PatchError::FailedToLoadSourceAsset { path, source } => {
                PatchError::FailedToLoadSourceAsset {
                    path: path.clone(),
                    source: clone_io_error(source),
                }
            }
            PatchError::FailedToDeserializeSourceAsset {
                path,
                offset,
                reason,
            } => PatchError::FailedToDeserializeSourceAsset {
                path: path.clone(),
                offset: *offset,
                reason: reason.clone(),
            },
            PatchError::UnexpectedSectionOrder {
                path,
                expected,
                found,
            } => PatchError::UnexpectedSectionOrder {
                path: path.clone(),
                expected,
                found,
            },
            PatchError::BadOffset {
                path,
                section,
                offset,
                header_size,
            } => PatchError::BadOffset {
                path: path.clone(),
                section,
                offset: *offset,
                header_size: *header_size,
            },
            PatchError::UnknownSection { path, tag } => PatchError::UnknownSection {
                path: path.clone(),
                tag: *tag,
            },
            PatchError::EmptyRequiredSection { path, section } => {
                PatchError::EmptyRequiredSection {
                    path: path.clone(),
                    section,
                }
            }
            PatchError::FailedToOpenDestinationFile { path, source } => {
                PatchError::FailedToOpenDestinationFile {
                    path: path.clone(),
                    source: clone_io_error(source),
                }
            }
            PatchError::FailedToWriteToDestinationFile { path, source } => {
                PatchError::FailedToWriteToDestinationFile {
                    path: path.clone(),
                    source: clone_io_error(source),
                }
            }
        }
    }
}

impl PatchError {
    /// A short, stable discriminant suitable for display in a summary report
    /// without the full contextual message.
    pub fn code(&self) -> &'static str {
        match self {
            PatchError::FailedToLoadSourceAsset { .. } => "failed_to_load_source_asset",
            PatchError::FailedToDeserializeSourceAsset { .. } => {
                "failed_to_deserialize_source_asset"
            }
            PatchError::UnexpectedSectionOrder { .. } => "unexpected_section_order",
            PatchError::BadOffset { .. } => "bad_offset",
            PatchError::UnknownSection { .. } => "unknown_section",
            PatchError::EmptyRequiredSection { .. } => "empty_required_section",
            PatchError::FailedToOpenDestinationFile { .. } => "failed_to_open_destination_file",
            PatchError::FailedToWriteToDestinationFile { .. } => {
                "failed_to_write_to_destination_file"
            }
        }
    }

    pub fn path(&self) -> &PathBuf {
        match self {
            PatchError::FailedToLoadSourceAsset { path, .. }
            | PatchError::FailedToDeserializeSourceAsset { path, .. }
            | PatchError::UnexpectedSectionOrder { path, .. }
            | PatchError::BadOffset { path, .. }
            | PatchError::UnknownSection { path, .. }
            | PatchError::EmptyRequiredSection { path, .. }
            | PatchError::FailedToOpenDestinationFile { path, .. }
            | PatchError::FailedToWriteToDestinationFile { path, .. } => path,
        }
    }
}

/// Failures that can occur while building or querying a [`crate::redirect::RedirectDatabase`].
#[derive(thiserror::Error, Debug)]
pub enum RedirectError {
    #[error("invalid qualified name {raw:?}: {reason}")]
    InvalidName { raw: String, reason: &'static str },

    #[error("malformed redirect rule on line {line}: {reason}")]
    MalformedRule { line: usize, reason: String },

    #[error("redirect chain starting at {start} cycles back through {repeated}")]
    CyclicRedirect { start: String, repeated: String },

    #[error("failed to read redirect config {path}: {source}")]
    ConfigIo { path: PathBuf, source: io::Error },
}
