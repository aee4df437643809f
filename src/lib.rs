//! Batch rewriter for package header references: names, object/class paths,
//! and string tags, driven by a redirect database built from a user-supplied
//! rename mapping.

pub use crate::batch::{PatchResult, Patcher};
pub use crate::context::{Context, PackageMove};
pub use crate::error::{PatchError, RedirectError};
pub use crate::header::{do_patch, Endianness, PatchOutcome, Summary};
pub use crate::name::{MatchOptions, QualifiedName};
pub use crate::redirect::{RedirectDatabase, RedirectFlags, RedirectRule};

pub mod batch;
pub mod context;
pub mod error;
pub mod header;
pub mod name;
pub mod redirect;
mod util;
