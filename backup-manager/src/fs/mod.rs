//! Filesystem helpers: tree walking, archive naming and archive metadata.

pub mod metadata;
pub mod naming;
pub mod walker;
