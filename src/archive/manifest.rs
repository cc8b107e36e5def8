//! The `cluster_control.json` manifest shipped inside every archive.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::catalog::{Catalog, MergeType};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ManifestMergeType {
    AgentInfo,
    AgentGroups,
}

impl From<MergeType> for Option<ManifestMergeType> {
    fn from(m: MergeType) -> Self {
        match m {
            MergeType::None => None,
            MergeType::AgentInfo => Some(ManifestMergeType::AgentInfo),
            MergeType::AgentGroups => Some(ManifestMergeType::AgentGroups),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub cluster_item_key: String,
    pub merged: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub merge_type: Option<ManifestMergeType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub merge_name: Option<String>,
    /// Populated only on `master_files` entries: the client's view of this
    /// master-owned path's content hash and timestamp, used for diffing.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub md5: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mtime: Option<i64>,
}

impl ManifestEntry {
    pub fn plain(cluster_item_key: impl Into<String>) -> Self {
        Self {
            cluster_item_key: cluster_item_key.into(),
            merged: false,
            merge_type: None,
            merge_name: None,
            md5: None,
            mtime: None,
        }
    }

    pub fn merged(cluster_item_key: impl Into<String>, merge_type: ManifestMergeType, merge_name: impl Into<String>) -> Self {
        Self {
            cluster_item_key: cluster_item_key.into(),
            merged: true,
            merge_type: Some(merge_type),
            merge_name: Some(merge_name.into()),
            md5: None,
            mtime: None,
        }
    }

    pub fn catalog_entry(cluster_item_key: impl Into<String>, md5: impl Into<String>, mtime: i64) -> Self {
        Self {
            cluster_item_key: cluster_item_key.into(),
            merged: false,
            merge_type: None,
            merge_name: None,
            md5: Some(md5.into()),
            mtime: Some(mtime),
        }
    }
}

/// Which direction this archive's manifest describes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Manifest {
    /// A client→master integrity request: the snapshot of master-owned files
    /// the client currently holds.
    MasterFiles {
        master_files: BTreeMap<String, ManifestEntry>,
    },
    /// A client→master agent-info/extra-valid push: the files packed in this archive.
    ClientFiles {
        client_files: BTreeMap<String, ManifestEntry>,
    },
}

impl Manifest {
    pub fn entries(&self) -> &BTreeMap<String, ManifestEntry> {
        match self {
            Manifest::MasterFiles { master_files } => master_files,
            Manifest::ClientFiles { client_files } => client_files,
        }
    }

    pub fn to_json_bytes(&self) -> crate::errors::ClusterResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_json_bytes(bytes: &[u8]) -> crate::errors::ClusterResult<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }

    /// Builds the `master_files` manifest a client sends to start an
    /// integrity sync: its current view of every master-owned path.
    pub fn from_catalog(catalog: &Catalog) -> Self {
        let master_files = catalog
            .files
            .iter()
            .map(|(path, entry)| {
                (
                    path.clone(),
                    ManifestEntry::catalog_entry(&entry.cluster_item_key, &entry.md5, entry.mtime),
                )
            })
            .collect();
        Manifest::MasterFiles { master_files }
    }

    /// Reconstructs a [`Catalog`] from a `master_files` manifest. Entries
    /// without `md5`/`mtime` are skipped — they cannot occur on a manifest
    /// built by [`Manifest::from_catalog`], only on a malformed one.
    pub fn to_catalog(&self) -> Catalog {
        let mut catalog = Catalog::default();
        for (path, entry) in self.entries() {
            if let (Some(md5), Some(mtime)) = (&entry.md5, entry.mtime) {
                catalog.files.insert(
                    path.clone(),
                    crate::catalog::FileEntry {
                        md5: md5.clone(),
                        mtime,
                        cluster_item_key: entry.cluster_item_key.clone(),
                    },
                );
            }
        }
        catalog
    }
}
