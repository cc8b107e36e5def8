//! Integrity worker (master side): `Idle -> Receiving -> Diffing ->
//! (AllOK | Sending) -> Awaiting-Ack -> Done|Error`.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use chrono::Utc;
use tracing::{info, warn};

use crate::archive::{self, Manifest, ManifestEntry, ManifestMergeType, MergeRecord};
use crate::atomic_update::AtomicUpdater;
use crate::catalog::profile::QUEUE_AGENT_GROUPS;
use crate::differ::{self, Diff};
use crate::metrics;
use crate::protocol::Frame;
use crate::state::{IntegritySummary, ServerState, SyncPhase};

use super::{SyncAck, WorkerContext};

const AWAITING_ACK_TIMEOUT: Duration = Duration::from_secs(30);

pub async fn run(mut ctx: WorkerContext, state: Arc<ServerState>, client_archive: Bytes) {
    let started = Utc::now();
    metrics::SYNCS_STARTED_TOTAL.with_label_values(&[ctx.kind.label()]).inc();
    {
        let mut status = ctx.status.lock();
        status.last_sync_integrity = SyncPhase::InProgress;
    }

    let outcome = run_inner(&mut ctx, &state, client_archive).await;

    let mut status = ctx.status.lock();
    match outcome {
        Ok(total_files) => {
            status.last_sync_integrity = SyncPhase::Done(IntegritySummary {
                date_start_master: Some(started),
                date_end_master: Some(Utc::now()),
                total_files,
            });
            metrics::SYNCS_COMPLETED_TOTAL.with_label_values(&[ctx.kind.label(), "ok"]).inc();
            info!(component = "integrity_worker", client = %ctx.client_name, worker_id = ctx.worker_id, "sync complete");
        }
        Err(e) => {
            status.last_sync_integrity = SyncPhase::Error(e.to_string());
            metrics::SYNCS_COMPLETED_TOTAL.with_label_values(&[ctx.kind.label(), "error"]).inc();
            // The client has no other signal that its push failed: a sync_m_c
            // push may already be in flight, so this is the only notification
            // it will get for a fatal (decompression/manifest) failure.
            let _ = ctx.frame_tx.send(Frame::new(0, Bytes::from(format!("sync_m_c_err {e}"))));
            warn!(component = "integrity_worker", client = %ctx.client_name, worker_id = ctx.worker_id, error = %e, "sync failed");
        }
    }
}

async fn run_inner(
    ctx: &mut WorkerContext,
    state: &Arc<ServerState>,
    client_archive: Bytes,
) -> crate::errors::ClusterResult<crate::differ::TotalFiles> {
    let (manifest, _members) = archive::extract(&client_archive)?;
    let client_catalog = manifest.to_catalog();

    let reference = state.read_catalog()?;
    let diff = differ::diff(&reference, &client_catalog);
    let total_files = diff.total_files();

    if ctx.should_stop() {
        return Err(crate::errors::ClusterError::Internal("cancelled".into()));
    }

    if diff.is_empty() {
        let _ = ctx
            .frame_tx
            .send(Frame::new(0, Bytes::from_static(b"sync_m_c_ok")));
        return Ok(total_files);
    }

    let (response_manifest, members) = build_response(&reference, &diff, &state.config.root_dir)?;
    let archive_bytes = archive::build(&response_manifest, &members)?;
    let mut payload = Vec::with_capacity(7 + archive_bytes.len());
    payload.extend_from_slice(b"sync_m_c ");
    payload.extend_from_slice(&archive_bytes);
    let _ = ctx.frame_tx.send(Frame::new(0, Bytes::from(payload)));

    await_ack(ctx).await?;
    Ok(total_files)
}

/// Builds the manifest and member list for the response archive. The agent-groups
/// substitution applies only to `missing` and `shared` — `extra` and
/// `extra_valid` are never folded into the merged stream.
fn build_response(
    reference: &crate::catalog::Catalog,
    diff: &Diff,
    root_dir: &std::path::Path,
) -> crate::errors::ClusterResult<(Manifest, Vec<(String, Vec<u8>)>)> {
    let mut master_files = std::collections::BTreeMap::new();
    let mut members = Vec::new();

    let mut agent_groups_paths: BTreeSet<String> = BTreeSet::new();
    let mut other_paths: Vec<&String> = Vec::new();

    for path in diff.missing.iter().chain(diff.shared.iter()) {
        if path.starts_with(QUEUE_AGENT_GROUPS.key) {
            agent_groups_paths.insert(path.clone());
        } else {
            other_paths.push(path);
        }
    }

    for path in other_paths {
        let entry = reference
            .get(path)
            .ok_or_else(|| crate::errors::ClusterError::Internal(format!("{path} missing from reference catalog")))?;
        let content = std::fs::read(root_dir.join(path.trim_start_matches('/')))?;
        master_files.insert(path.clone(), ManifestEntry::plain(&entry.cluster_item_key));
        members.push((path.clone(), content));
    }

    if !agent_groups_paths.is_empty() {
        let mut records = Vec::new();
        for path in &agent_groups_paths {
            let entry = reference
                .get(path)
                .ok_or_else(|| crate::errors::ClusterError::Internal(format!("{path} missing from reference catalog")))?;
            let content = std::fs::read(root_dir.join(path.trim_start_matches('/')))?;
            let filename = path
                .strip_prefix(QUEUE_AGENT_GROUPS.key)
                .unwrap_or(path)
                .to_string();
            records.push(MergeRecord {
                filename,
                mtime: entry.mtime,
                body: Bytes::from(content),
            });
        }
        let merged = archive::merge_records(&records, Utc::now().timestamp(), 0);
        master_files.insert(
            "agent-groups.merged".to_string(),
            ManifestEntry::merged(QUEUE_AGENT_GROUPS.key, ManifestMergeType::AgentGroups, "agent-groups.merged"),
        );
        members.push(("agent-groups.merged".to_string(), merged.to_vec()));
    }

    Ok((Manifest::MasterFiles { master_files }, members))
}

async fn await_ack(ctx: &mut WorkerContext) -> crate::errors::ClusterResult<()> {
    let Some(ack_rx) = ctx.ack_rx.as_mut() else {
        return Ok(());
    };
    tokio::select! {
        biased;
        _ = ctx.stopper.recv() => Err(crate::errors::ClusterError::Internal("cancelled".into())),
        ack = tokio::time::timeout(AWAITING_ACK_TIMEOUT, ack_rx.recv()) => {
            match ack {
                Ok(Some(SyncAck::Applied)) => Ok(()),
                Ok(Some(SyncAck::Failed(msg))) => Err(crate::errors::ClusterError::Protocol(msg)),
                Ok(None) => Err(crate::errors::ClusterError::Internal("client disconnected before ack".into())),
                Err(_) => Err(crate::errors::ClusterError::Internal("timed out awaiting client ack".into())),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{Catalog, FileEntry};

    #[test]
    fn agent_groups_substitution_skips_extra_and_extra_valid() {
        let mut reference = Catalog::default();
        reference.files.insert(
            "/queue/agent-groups/001".into(),
            FileEntry { md5: "a".into(), mtime: 10, cluster_item_key: "/queue/agent-groups/".into() },
        );
        let mut diff = Diff::default();
        diff.missing.insert("/queue/agent-groups/001".to_string());
        diff.extra.insert("/queue/agent-groups/999".to_string());
        diff.extra_valid.insert("/queue/agent-groups/888".to_string());

        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("queue/agent-groups")).unwrap();
        std::fs::write(dir.path().join("queue/agent-groups/001"), b"hi").unwrap();

        let (manifest, members) = build_response(&reference, &diff, dir.path()).unwrap();
        assert_eq!(manifest.entries().len(), 1);
        assert!(manifest.entries().contains_key("agent-groups.merged"));
        assert_eq!(members.len(), 1);
        assert_eq!(members[0].0, "agent-groups.merged");
    }
}
