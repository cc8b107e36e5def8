//! Agent-info worker (master side): unmerges and applies client-owned
//! agent-info files pushed from a client.

use std::collections::BTreeMap;
use std::sync::Arc;

use bytes::Bytes;
use chrono::Utc;
use tracing::{info, warn};

use crate::archive::{self, unmerge};
use crate::atomic_update::AtomicUpdater;
use crate::catalog::profile::QUEUE_AGENT_INFO;
use crate::metrics;
use crate::state::{AgentInfoSummary, SyncPhase};

use super::WorkerContext;

/// Tally of applied records plus per-`cluster_item_key` error counts, built up
/// over one run and folded into the client's status tree at the end.
#[derive(Default)]
struct RunTally {
    applied: usize,
    errors: BTreeMap<String, usize>,
}

impl RunTally {
    fn record_error(&mut self, cluster_item_key: &str) {
        *self.errors.entry(cluster_item_key.to_string()).or_insert(0) += 1;
        metrics::FILE_ERRORS_TOTAL.with_label_values(&[cluster_item_key]).inc();
    }
}

pub async fn run(mut ctx: WorkerContext, updater: Arc<AtomicUpdater>, client_archive: Bytes) {
    let started = Utc::now();
    metrics::SYNCS_STARTED_TOTAL.with_label_values(&[ctx.kind.label()]).inc();
    {
        let mut status = ctx.status.lock();
        status.last_sync_agentinfo = SyncPhase::InProgress;
    }

    let outcome = run_inner(&mut ctx, &updater, client_archive);

    let mut status = ctx.status.lock();
    match outcome {
        Ok(tally) => {
            status.last_sync_agentinfo = SyncPhase::Done(AgentInfoSummary {
                date_start_master: Some(started),
                date_end_master: Some(Utc::now()),
                total_agentinfo: tally.applied,
                errors: tally.errors,
                warnings: BTreeMap::new(),
            });
            metrics::SYNCS_COMPLETED_TOTAL.with_label_values(&[ctx.kind.label(), "ok"]).inc();
            info!(component = "agent_info_worker", client = %ctx.client_name, worker_id = ctx.worker_id, applied = tally.applied, "push applied");
        }
        Err(e) => {
            status.last_sync_agentinfo = SyncPhase::Error(e.to_string());
            metrics::SYNCS_COMPLETED_TOTAL.with_label_values(&[ctx.kind.label(), "error"]).inc();
            warn!(component = "agent_info_worker", client = %ctx.client_name, worker_id = ctx.worker_id, error = %e, "push failed");
        }
    }
}

fn run_inner(
    ctx: &mut WorkerContext,
    updater: &AtomicUpdater,
    client_archive: Bytes,
) -> crate::errors::ClusterResult<RunTally> {
    let (manifest, members) = archive::extract(&client_archive)?;
    let mut tally = RunTally::default();

    for (path, entry) in manifest.entries() {
        if ctx.should_stop() {
            return Err(crate::errors::ClusterError::Internal("cancelled".into()));
        }
        if entry.merged {
            let Some(merge_name) = &entry.merge_name else {
                continue;
            };
            let Some(body) = members.get(merge_name) else {
                warn!(component = "agent_info_worker", merge_name, "merged member missing from archive, skipping");
                tally.record_error(&entry.cluster_item_key);
                continue;
            };
            let records = match unmerge(body) {
                Ok(r) => r,
                Err(e) => {
                    warn!(component = "agent_info_worker", error = %e, "failed to unmerge agent-info stream");
                    tally.record_error(&entry.cluster_item_key);
                    continue;
                }
            };
            for record in records {
                let rel_path = format!("{}{}", QUEUE_AGENT_INFO.key, record.filename);
                match updater.apply(&rel_path, &record.body, Some(record.mtime), &QUEUE_AGENT_INFO) {
                    Ok(()) => tally.applied += 1,
                    Err(e) => {
                        warn!(component = "agent_info_worker", path = %rel_path, error = %e, "failed to apply agent-info record");
                        tally.record_error(&entry.cluster_item_key);
                    }
                }
            }
        } else {
            let Some(body) = members.get(path) else {
                warn!(component = "agent_info_worker", path, "plain member missing from archive, skipping");
                tally.record_error(&entry.cluster_item_key);
                continue;
            };
            match updater.apply(path, body, None, &QUEUE_AGENT_INFO) {
                Ok(()) => tally.applied += 1,
                Err(e) => {
                    warn!(component = "agent_info_worker", path, error = %e, "failed to apply agent-info file");
                    tally.record_error(&entry.cluster_item_key);
                }
            }
        }
    }

    Ok(tally)
}
