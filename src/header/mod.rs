//! The on-disk package header: summary, tables, and the three-phase patcher
//! that rewrites references inside them.

pub mod patch;
pub mod summary;
pub mod tables;

pub use patch::{do_patch, PatchOutcome};
pub use summary::{Endianness, Summary};
