//! Partitions one catalog against a reference catalog.

use std::collections::BTreeSet;

use crate::catalog::{profile_for, Catalog};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Diff {
    /// In the reference, absent from the other side.
    pub missing: BTreeSet<String>,
    /// In both, content differs.
    pub shared: BTreeSet<String>,
    /// In the other side only, and not meaningful to keep.
    pub extra: BTreeSet<String>,
    /// In the other side only, but meaningful (e.g. agent-groups) — should
    /// propagate back to the reference rather than be discarded.
    pub extra_valid: BTreeSet<String>,
}

impl Diff {
    pub fn is_empty(&self) -> bool {
        self.missing.is_empty()
            && self.shared.is_empty()
            && self.extra.is_empty()
            && self.extra_valid.is_empty()
    }

    pub fn total_files(&self) -> TotalFiles {
        TotalFiles {
            shared: self.shared.len(),
            missing: self.missing.len(),
            extra: self.extra.len(),
            extra_valid: self.extra_valid.len(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, serde::Serialize)]
pub struct TotalFiles {
    pub shared: usize,
    pub missing: usize,
    pub extra: usize,
    pub extra_valid: usize,
}

/// Computes the diff of `other` relative to `reference`.
pub fn diff(reference: &Catalog, other: &Catalog) -> Diff {
    let mut result = Diff::default();

    for (path, ref_entry) in &reference.files {
        match other.get(path) {
            None => {
                result.missing.insert(path.clone());
            }
            Some(other_entry) => {
                if other_entry.md5 != ref_entry.md5 {
                    result.shared.insert(path.clone());
                }
            }
        }
    }

    for path in other.files.keys() {
        if reference.get(path).is_some() {
            continue;
        }
        let meaningful = profile_for(path).is_some_and(|p| p.extras_are_valid);
        if meaningful {
            result.extra_valid.insert(path.clone());
        } else {
            result.extra.insert(path.clone());
        }
    }

    result
}
