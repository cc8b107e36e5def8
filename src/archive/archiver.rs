//! Builds and extracts the zip-like archive container carrying the manifest
//! plus either plain file members or merged-stream members.

use std::collections::BTreeMap;
use std::io::{Cursor, Read, Write};

use zip::write::FileOptions;
use zip::{ZipArchive, ZipWriter};

use crate::errors::{ClusterError, ClusterResult};

use super::manifest::Manifest;

pub const MANIFEST_NAME: &str = "cluster_control.json";

/// A built archive, ready to ship over the wire as a `sync_*` frame payload.
pub fn build(manifest: &Manifest, members: &[(String, Vec<u8>)]) -> ClusterResult<Vec<u8>> {
    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = ZipWriter::new(&mut cursor);
        let options: FileOptions<()> =
            FileOptions::default().compression_method(zip::CompressionMethod::Deflated);

        writer
            .start_file(MANIFEST_NAME, options)
            .map_err(ClusterError::from)?;
        writer
            .write_all(&manifest.to_json_bytes()?)
            .map_err(|e| ClusterError::Archive(e.to_string()))?;

        for (name, content) in members {
            writer.start_file(name, options).map_err(ClusterError::from)?;
            writer
                .write_all(content)
                .map_err(|e| ClusterError::Archive(e.to_string()))?;
        }

        writer.finish().map_err(ClusterError::from)?;
    }
    Ok(cursor.into_inner())
}

/// Extracts an archive into its manifest and a name→bytes map of every other member.
pub fn extract(data: &[u8]) -> ClusterResult<(Manifest, BTreeMap<String, Vec<u8>>)> {
    let mut archive = ZipArchive::new(Cursor::new(data)).map_err(ClusterError::from)?;
    let mut manifest: Option<Manifest> = None;
    let mut members = BTreeMap::new();

    for i in 0..archive.len() {
        let mut entry = archive.by_index(i).map_err(ClusterError::from)?;
        let name = entry.name().to_string();
        let mut buf = Vec::with_capacity(entry.size() as usize);
        entry
            .read_to_end(&mut buf)
            .map_err(|e| ClusterError::Archive(e.to_string()))?;
        if name == MANIFEST_NAME {
            manifest = Some(Manifest::from_json_bytes(&buf)?);
        } else {
            members.insert(name, buf);
        }
    }

    let manifest = manifest.ok_or_else(|| ClusterError::Manifest("archive has no manifest".into()))?;
    Ok((manifest, members))
}
