//! Extra-valid worker (master side): applies client-owned agent-groups
//! files, dropping any record referencing an agent ID the master doesn't know.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use bytes::Bytes;
use chrono::Utc;
use tracing::{info, warn};

use crate::agents::AgentDirectory;
use crate::archive::{self, unmerge};
use crate::atomic_update::AtomicUpdater;
use crate::catalog::profile::QUEUE_AGENT_GROUPS;
use crate::metrics;
use crate::state::{AgentGroupsSummary, ServerState, SyncPhase};

use super::WorkerContext;

/// Result of one run: records applied, and how many were dropped this run for
/// referencing an unknown agent (a slice of `state.agentgroups_warnings`,
/// which is cumulative across all clients and runs).
struct RunOutcome {
    applied: usize,
    warnings_this_run: u64,
}

pub async fn run(
    mut ctx: WorkerContext,
    state: Arc<ServerState>,
    updater: Arc<AtomicUpdater>,
    client_archive: Bytes,
) {
    let started = Utc::now();
    metrics::SYNCS_STARTED_TOTAL.with_label_values(&[ctx.kind.label()]).inc();
    {
        let mut status = ctx.status.lock();
        status.last_sync_agentgroups = SyncPhase::InProgress;
    }

    let outcome = run_inner(&mut ctx, &state, &updater, client_archive);

    let mut status = ctx.status.lock();
    match outcome {
        Ok(result) => {
            status.last_sync_agentgroups = SyncPhase::Done(AgentGroupsSummary {
                date_start_master: Some(started),
                date_end_master: Some(Utc::now()),
                total_agentgroups: result.applied,
                warnings: result.warnings_this_run,
            });
            metrics::SYNCS_COMPLETED_TOTAL.with_label_values(&[ctx.kind.label(), "ok"]).inc();
            info!(component = "extra_valid_worker", client = %ctx.client_name, worker_id = ctx.worker_id, applied = result.applied, "push applied");
        }
        Err(e) => {
            status.last_sync_agentgroups = SyncPhase::Error(e.to_string());
            metrics::SYNCS_COMPLETED_TOTAL.with_label_values(&[ctx.kind.label(), "error"]).inc();
            warn!(component = "extra_valid_worker", client = %ctx.client_name, worker_id = ctx.worker_id, error = %e, "push failed");
        }
    }
}

fn run_inner(
    ctx: &mut WorkerContext,
    state: &Arc<ServerState>,
    updater: &AtomicUpdater,
    client_archive: Bytes,
) -> crate::errors::ClusterResult<RunOutcome> {
    let (manifest, members) = archive::extract(&client_archive)?;
    let known_ids = state.agent_directory.known_ids();
    let mut applied = 0usize;
    let warnings_before = state.agentgroups_warnings.load(Ordering::Relaxed);

    for (_, entry) in manifest.entries() {
        if ctx.should_stop() {
            return Err(crate::errors::ClusterError::Internal("cancelled".into()));
        }
        if !entry.merged {
            continue;
        }
        let Some(merge_name) = &entry.merge_name else {
            continue;
        };
        let Some(body) = members.get(merge_name) else {
            warn!(component = "extra_valid_worker", merge_name, "merged member missing from archive, skipping");
            metrics::FILE_ERRORS_TOTAL.with_label_values(&[QUEUE_AGENT_GROUPS.key]).inc();
            continue;
        };
        let records = match unmerge(body) {
            Ok(r) => r,
            Err(e) => {
                warn!(component = "extra_valid_worker", error = %e, "failed to unmerge agent-groups stream");
                metrics::FILE_ERRORS_TOTAL.with_label_values(&[QUEUE_AGENT_GROUPS.key]).inc();
                continue;
            }
        };
        for record in records {
            match updater.apply_agent_groups_record(
                &record,
                &known_ids,
                &state.agentgroups_warnings,
                &QUEUE_AGENT_GROUPS,
            ) {
                Ok(true) => applied += 1,
                Ok(false) => {}
                Err(e) => {
                    warn!(component = "extra_valid_worker", agent = %record.filename, error = %e, "failed to apply agent-groups record");
                    metrics::FILE_ERRORS_TOTAL.with_label_values(&[QUEUE_AGENT_GROUPS.key]).inc();
                }
            }
        }
    }

    let warnings_this_run = state.agentgroups_warnings.load(Ordering::Relaxed) - warnings_before;
    Ok(RunOutcome { applied, warnings_this_run })
}
