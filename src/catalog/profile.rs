//! Policy profiles keyed by directory prefix (`cluster_item_key`).

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    Atomic,
    NonAtomic,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeType {
    None,
    AgentInfo,
    AgentGroups,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ownership {
    /// Authoritative copy lives on the master, pushed to clients.
    Master,
    /// Produced on the client, pushed to the master.
    Client,
}

/// Policy for everything under one directory prefix.
#[derive(Debug, Clone)]
pub struct ClusterItemProfile {
    pub key: &'static str,
    pub write_mode: WriteMode,
    pub umask: u32,
    pub merge_type: MergeType,
    pub ownership: Ownership,
    /// `extra` entries under this profile are meaningful and should be
    /// reported as `extra_valid` instead of being discarded.
    pub extras_are_valid: bool,
}

pub const ETC_SHARED: ClusterItemProfile = ClusterItemProfile {
    key: "/etc/shared/",
    write_mode: WriteMode::Atomic,
    umask: 0o133,
    merge_type: MergeType::None,
    ownership: Ownership::Master,
    extras_are_valid: false,
};

pub const QUEUE_AGENT_INFO: ClusterItemProfile = ClusterItemProfile {
    key: "/queue/agent-info/",
    write_mode: WriteMode::Atomic,
    umask: 0o133,
    merge_type: MergeType::AgentInfo,
    ownership: Ownership::Client,
    extras_are_valid: false,
};

pub const QUEUE_AGENT_GROUPS: ClusterItemProfile = ClusterItemProfile {
    key: "/queue/agent-groups/",
    write_mode: WriteMode::Atomic,
    umask: 0o133,
    merge_type: MergeType::AgentGroups,
    ownership: Ownership::Client,
    extras_are_valid: true,
};

/// All known profiles, most-specific prefix first.
pub const PROFILES: &[ClusterItemProfile] =
    &[QUEUE_AGENT_GROUPS, QUEUE_AGENT_INFO, ETC_SHARED];

pub fn profile_for(path: &str) -> Option<&'static ClusterItemProfile> {
    PROFILES.iter().find(|p| path.starts_with(p.key))
}
