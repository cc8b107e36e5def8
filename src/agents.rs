//! The minimal known-agents collaborator consulted by the agent-info and
//! extra-valid workers to validate incoming records.
//!
//! Production wiring to the real agent registry is out of scope here; this
//! trait is the seam where it would plug in.

use std::collections::{HashMap, HashSet};

use parking_lot::RwLock;

/// Read-only view of which agent IDs are currently known.
pub trait AgentDirectory: Send + Sync {
    fn is_known(&self, agent_id: &str) -> bool;
    fn known_ids(&self) -> HashSet<String>;
}

#[derive(Default)]
pub struct InMemoryAgentDirectory {
    agents: RwLock<HashMap<String, String>>,
}

impl InMemoryAgentDirectory {
    pub fn new(agents: HashMap<String, String>) -> Self {
        Self {
            agents: RwLock::new(agents),
        }
    }

    pub fn insert(&self, id: impl Into<String>, name: impl Into<String>) {
        self.agents.write().insert(id.into(), name.into());
    }
}

impl AgentDirectory for InMemoryAgentDirectory {
    fn is_known(&self, agent_id: &str) -> bool {
        self.agents.read().contains_key(agent_id)
    }

    fn known_ids(&self) -> HashSet<String> {
        self.agents.read().keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tracks_known_agents() {
        let dir = InMemoryAgentDirectory::default();
        dir.insert("001", "agent-alpha");
        assert!(dir.is_known("001"));
        assert!(!dir.is_known("999"));
    }
}
