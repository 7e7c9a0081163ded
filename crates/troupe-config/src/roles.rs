// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use serde::{Deserialize, Serialize};

/// The closed set of team roles.
///
/// Adding a role is a code change by design: the orchestrator's "available
/// roles" list must be known to the planner, and every dispatch site matches
/// exhaustively on this enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentRole {
    Planner,
    Product,
    Architect,
    Engineer,
    Researcher,
    Analyst,
}

impl AgentRole {
    pub const ALL: [AgentRole; 6] = [
        AgentRole::Planner,
        AgentRole::Product,
        AgentRole::Architect,
        AgentRole::Engineer,
        AgentRole::Researcher,
        AgentRole::Analyst,
    ];

    /// The order in which workers are offered to the planner.  The planner
    /// itself never appears here — it is the coordinator, not a worker.
    pub const DISPATCH_ORDER: [AgentRole; 5] = [
        AgentRole::Product,
        AgentRole::Architect,
        AgentRole::Engineer,
        AgentRole::Researcher,
        AgentRole::Analyst,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AgentRole::Planner => "planner",
            AgentRole::Product => "product",
            AgentRole::Architect => "architect",
            AgentRole::Engineer => "engineer",
            AgentRole::Researcher => "researcher",
            AgentRole::Analyst => "analyst",
        }
    }

    /// Case-insensitive lookup, used when matching planner output against
    /// the known role set.
    pub fn parse(value: &str) -> Option<AgentRole> {
        let lowered = value.trim().to_lowercase();
        Self::ALL.iter().copied().find(|r| r.as_str() == lowered)
    }

    pub fn title(&self) -> &'static str {
        match self {
            AgentRole::Planner => "Team Lead",
            AgentRole::Product => "Product Manager",
            AgentRole::Architect => "Architect",
            AgentRole::Engineer => "Engineer",
            AgentRole::Researcher => "Researcher",
            AgentRole::Analyst => "Data Analyst",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            AgentRole::Planner => {
                "analyses the request, plans the work, reviews every result and reports back to the user"
            }
            AgentRole::Product => {
                "clarifies requirements and produces feature lists with priorities; does not write code"
            }
            AgentRole::Architect => {
                "designs the system architecture and technology choices, and assesses technical risk"
            }
            AgentRole::Engineer => {
                "the only role that implements, tests and deploys code; may use file and shell tools"
            }
            AgentRole::Researcher => {
                "performs web research and collects citable external references; does not modify code"
            }
            AgentRole::Analyst => "provides data analysis, visualisation and basic ML support",
        }
    }
}

impl std::fmt::Display for AgentRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Who a message or event is attributed to on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SenderKind {
    User,
    Planner,
    Agent,
    Status,
}

impl SenderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SenderKind::User => "user",
            SenderKind::Planner => "planner",
            SenderKind::Agent => "agent",
            SenderKind::Status => "status",
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_is_case_insensitive() {
        assert_eq!(AgentRole::parse("Engineer"), Some(AgentRole::Engineer));
        assert_eq!(AgentRole::parse("ARCHITECT"), Some(AgentRole::Architect));
        assert_eq!(AgentRole::parse("  planner "), Some(AgentRole::Planner));
    }

    #[test]
    fn parse_rejects_unknown_names() {
        assert_eq!(AgentRole::parse("intern"), None);
        assert_eq!(AgentRole::parse(""), None);
    }

    #[test]
    fn dispatch_order_excludes_planner() {
        assert!(!AgentRole::DISPATCH_ORDER.contains(&AgentRole::Planner));
        assert_eq!(AgentRole::DISPATCH_ORDER.len(), 5);
    }

    #[test]
    fn roles_serialize_lowercase() {
        assert_eq!(
            serde_json::to_string(&AgentRole::Engineer).unwrap(),
            "\"engineer\""
        );
        assert_eq!(
            serde_json::to_string(&SenderKind::Status).unwrap(),
            "\"status\""
        );
    }
}
