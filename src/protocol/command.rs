//! Tagged-variant command dispatch, replacing string-based matching at every call site.

use bytes::Bytes;

use crate::errors::ClusterError;

use super::frame::Frame;

/// A parsed request. Each variant owns the raw body bytes; deeper parsing
/// (manifest JSON, admin filters) happens in the component that handles it.
#[derive(Debug, Clone)]
pub enum Command {
    /// `hello <name> <version>` — handshake, sent once at connection start.
    Hello { name: String, version: String },
    /// `echo-c <token>` — liveness probe.
    EchoC { token: Bytes },
    /// `sync_i_c_m <archive>` — client pushes its view of master-owned files.
    SyncIntegrityClientToMaster { archive: Bytes },
    /// `sync_ai_c_m <archive>` — client pushes agent-info.
    SyncAgentInfoClientToMaster { archive: Bytes },
    /// `sync_ev_c_m <archive>` — client pushes agent-groups (extra-valid).
    SyncExtraValidClientToMaster { archive: Bytes },
    /// `sync_m_c <archive>` — master pushes missing/shared files to the client.
    SyncMasterToClient { archive: Bytes },
    /// `sync_m_c_ok` — master reports nothing to send.
    SyncMasterToClientOk,
    /// `sync_m_c_err <message>` — master reports a run-ending failure.
    SyncMasterToClientErr { message: String },
    /// `sync_i_c_m_p` — integrity permit query.
    IntegrityPermitQuery,
    /// `sync_ai_c_mp` — agent-info permit query.
    AgentInfoPermitQuery,
    /// `sync_ev_c_mp` — extra-valid permit query.
    ExtraValidPermitQuery,
    /// `get_nodes` — admin: list connected nodes.
    GetNodes,
    /// `get_health <filter?>` — admin: healthcheck snapshot.
    GetHealth { filter: Option<String> },
    /// `get_agents <args>` — admin: filtered agent listing.
    GetAgents { args: String },
    /// `sync <nodes?>` — admin: force a sync of the named nodes (or all).
    Sync { nodes: Option<String> },
    /// `get_files <args>` — admin: per-node file listing.
    GetFiles { args: String },
    /// `file_status <path>` — query a single path's catalog entry.
    FileStatus { path: String },
    /// `set_log_level <level>` — admin: reload the tracing filter without a restart.
    SetLogLevel { level: String },
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::Hello { .. } => "hello",
            Command::EchoC { .. } => "echo-c",
            Command::SyncIntegrityClientToMaster { .. } => "sync_i_c_m",
            Command::SyncAgentInfoClientToMaster { .. } => "sync_ai_c_m",
            Command::SyncExtraValidClientToMaster { .. } => "sync_ev_c_m",
            Command::SyncMasterToClient { .. } => "sync_m_c",
            Command::SyncMasterToClientOk => "sync_m_c_ok",
            Command::SyncMasterToClientErr { .. } => "sync_m_c_err",
            Command::IntegrityPermitQuery => "sync_i_c_m_p",
            Command::AgentInfoPermitQuery => "sync_ai_c_mp",
            Command::ExtraValidPermitQuery => "sync_ev_c_mp",
            Command::GetNodes => "get_nodes",
            Command::GetHealth { .. } => "get_health",
            Command::GetAgents { .. } => "get_agents",
            Command::Sync { .. } => "sync",
            Command::GetFiles { .. } => "get_files",
            Command::FileStatus { .. } => "file_status",
            Command::SetLogLevel { .. } => "set_log_level",
        }
    }
}

impl TryFrom<&Frame> for Command {
    type Error = ClusterError;

    fn try_from(frame: &Frame) -> Result<Self, Self::Error> {
        let (cmd, body) = frame.split_command();
        let body_str = || String::from_utf8_lossy(body).trim().to_string();
        Ok(match cmd {
            "hello" => {
                let s = body_str();
                let mut parts = s.splitn(2, ' ');
                let name = parts
                    .next()
                    .ok_or_else(|| ClusterError::Protocol("hello requires a name".into()))?
                    .to_string();
                let version = parts.next().unwrap_or("unknown").to_string();
                Command::Hello { name, version }
            }
            "echo-c" => Command::EchoC {
                token: Bytes::copy_from_slice(body),
            },
            "sync_i_c_m" => Command::SyncIntegrityClientToMaster {
                archive: Bytes::copy_from_slice(body),
            },
            "sync_ai_c_m" => Command::SyncAgentInfoClientToMaster {
                archive: Bytes::copy_from_slice(body),
            },
            "sync_ev_c_m" => Command::SyncExtraValidClientToMaster {
                archive: Bytes::copy_from_slice(body),
            },
            "sync_m_c" => Command::SyncMasterToClient {
                archive: Bytes::copy_from_slice(body),
            },
            "sync_m_c_ok" => Command::SyncMasterToClientOk,
            "sync_m_c_err" => Command::SyncMasterToClientErr {
                message: body_str(),
            },
            "sync_i_c_m_p" => Command::IntegrityPermitQuery,
            "sync_ai_c_mp" => Command::AgentInfoPermitQuery,
            "sync_ev_c_mp" => Command::ExtraValidPermitQuery,
            "get_nodes" => Command::GetNodes,
            "get_health" => {
                let f = body_str();
                Command::GetHealth {
                    filter: if f.is_empty() { None } else { Some(f) },
                }
            }
            "get_agents" => Command::GetAgents { args: body_str() },
            "sync" => {
                let f = body_str();
                Command::Sync {
                    nodes: if f.is_empty() { None } else { Some(f) },
                }
            }
            "get_files" => Command::GetFiles { args: body_str() },
            "file_status" => Command::FileStatus { path: body_str() },
            "set_log_level" => Command::SetLogLevel { level: body_str() },
            other => return Err(ClusterError::UnknownCommand(other.to_string())),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_command() {
        let frame = Frame::new(1, Bytes::from_static(b"echo-c ping"));
        let cmd = Command::try_from(&frame).unwrap();
        assert_eq!(cmd.name(), "echo-c");
    }

    #[test]
    fn unknown_command_is_an_error_not_a_panic() {
        let frame = Frame::new(1, Bytes::from_static(b"frobnicate abc"));
        assert!(Command::try_from(&frame).is_err());
    }

    #[test]
    fn get_health_with_no_filter_is_none() {
        let frame = Frame::new(1, Bytes::from_static(b"get_health"));
        match Command::try_from(&frame).unwrap() {
            Command::GetHealth { filter } => assert_eq!(filter, None),
            _ => panic!("wrong variant"),
        }
    }
}
