//! Archive container, manifest, and the merge/unmerge streaming format.

pub mod archiver;
pub mod manifest;
pub mod merge;

pub use archiver::{build, extract, MANIFEST_NAME};
pub use manifest::{Manifest, ManifestEntry, ManifestMergeType};
pub use merge::{merge as merge_records, unmerge, MergeRecord};
