//! Typed per-client status tree, replacing a nested dict-of-dicts with an
//! explicit "in progress" sentinel.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::differ::TotalFiles;

/// A field that is either still being computed, holds a finished value, or
/// failed on its last attempt.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncPhase<T> {
    #[default]
    Never,
    InProgress,
    Done(T),
    Error(String),
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct IntegritySummary {
    pub date_start_master: Option<DateTime<Utc>>,
    pub date_end_master: Option<DateTime<Utc>>,
    pub total_files: TotalFiles,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct AgentInfoSummary {
    pub date_start_master: Option<DateTime<Utc>>,
    pub date_end_master: Option<DateTime<Utc>>,
    pub total_agentinfo: usize,
    /// Per-`cluster_item_key` counts of records that failed to apply.
    pub errors: BTreeMap<String, usize>,
    /// Per-`cluster_item_key` counts of records applied with a warning.
    pub warnings: BTreeMap<String, usize>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct AgentGroupsSummary {
    pub date_start_master: Option<DateTime<Utc>>,
    pub date_end_master: Option<DateTime<Utc>>,
    pub total_agentgroups: usize,
    /// Records dropped this run for referencing an unknown agent.
    pub warnings: u64,
}

/// The full status tree for one client.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ClientStatus {
    pub last_sync_integrity: SyncPhase<IntegritySummary>,
    pub last_sync_agentinfo: SyncPhase<AgentInfoSummary>,
    pub last_sync_agentgroups: SyncPhase<AgentGroupsSummary>,
    pub sync_integrity_free: bool,
    pub sync_agentinfo_free: bool,
    pub sync_extravalid_free: bool,
}

impl ClientStatus {
    pub fn new() -> Self {
        Self {
            sync_integrity_free: true,
            sync_agentinfo_free: true,
            sync_extravalid_free: true,
            ..Default::default()
        }
    }

    /// Grants the permit for `kind` if free, flipping it to held. This is the
    /// sole write path for permits, so workers only ever need a handle to the
    /// status tree itself, never a back-pointer to the connection handler.
    pub fn try_acquire(&mut self, kind: super::client::SyncKind) -> bool {
        let flag = self.permit_flag_mut(kind);
        if *flag {
            *flag = false;
            true
        } else {
            false
        }
    }

    pub fn release(&mut self, kind: super::client::SyncKind) {
        *self.permit_flag_mut(kind) = true;
    }

    fn permit_flag_mut(&mut self, kind: super::client::SyncKind) -> &mut bool {
        use super::client::SyncKind;
        match kind {
            SyncKind::Integrity => &mut self.sync_integrity_free,
            SyncKind::AgentInfo => &mut self.sync_agentinfo_free,
            SyncKind::ExtraValid => &mut self.sync_extravalid_free,
        }
    }
}
