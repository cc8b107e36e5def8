//! Shared process state: client records, the status tree, and the server-wide state.

pub mod client;
pub mod server_state;
pub mod status;

pub use client::{ClientRecord, SyncKind};
pub use server_state::{LogReloadHandle, ServerInit, ServerState};
pub use status::{AgentGroupsSummary, AgentInfoSummary, ClientStatus, IntegritySummary, SyncPhase};
