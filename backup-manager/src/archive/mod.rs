//! Zip container handling: streaming writer, extraction and sidecar metadata.

pub mod codec;
pub mod extract;
pub mod sidecar;

pub use codec::{ArchiveWriter, EntryOutcome};
pub use extract::{extract_into, open_archive, ExtractStats};
pub use sidecar::ArchiveSidecar;
