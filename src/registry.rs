//! Agent registry
//!
//! Explicit per-agent context: one exchange client, one decision provider
//! and one serialization lock per roster entry, owned by a single registry
//! value that is passed where it is needed. There are no process-wide
//! client maps.

use chrono::Duration;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::config::AgentConfig;
use crate::domain::AgentState;
use crate::providers::{DecisionProvider, ExchangeClient};
use crate::risk::{RiskParams, RiskPolicy};

/// Everything the orchestrator holds for one agent.
pub struct AgentHandle {
    pub spec: AgentConfig,
    pub exchange: Arc<dyn ExchangeClient>,
    pub provider: Arc<dyn DecisionProvider>,
    /// Serializes every read-modify-write of this agent's balances and
    /// ledger entries, whichever loop triggers it.
    pub state: Mutex<AgentState>,
    /// Non-reentrancy guard for the decision cycle: a new cycle is skipped
    /// while the previous one is still in flight.
    pub cycle_gate: Mutex<()>,
    policy: RiskPolicy,
}

impl AgentHandle {
    pub fn new(
        spec: AgentConfig,
        default_risk: &RiskParams,
        history_len: usize,
        exchange: Arc<dyn ExchangeClient>,
        provider: Arc<dyn DecisionProvider>,
    ) -> Self {
        let state = AgentState::new(
            spec.id.clone(),
            spec.name.clone(),
            spec.persona.clone(),
            spec.initial_balance,
            history_len,
        );
        let policy = RiskPolicy::new(spec.risk.clone().unwrap_or_else(|| default_risk.clone()));

        Self {
            spec,
            exchange,
            provider,
            state: Mutex::new(state),
            cycle_gate: Mutex::new(()),
            policy,
        }
    }

    pub fn id(&self) -> &str {
        &self.spec.id
    }

    pub fn policy(&self) -> &RiskPolicy {
        &self.policy
    }

    pub fn max_holding(&self) -> Duration {
        Duration::minutes(self.spec.max_holding_mins)
    }

    /// Replace the in-memory state with a persisted one (startup restore).
    pub async fn restore_state(&self, state: AgentState) {
        *self.state.lock().await = state;
    }
}

/// Fixed, ordered roster of agent handles.
pub struct AgentRegistry {
    agents: Vec<Arc<AgentHandle>>,
    by_id: HashMap<String, Arc<AgentHandle>>,
}

impl AgentRegistry {
    pub fn new(agents: Vec<Arc<AgentHandle>>) -> Self {
        let by_id = agents
            .iter()
            .map(|a| (a.id().to_string(), a.clone()))
            .collect();
        Self { agents, by_id }
    }

    pub fn get(&self, agent_id: &str) -> Option<&Arc<AgentHandle>> {
        self.by_id.get(agent_id)
    }

    /// Roster in configured order — the decision pass walks this sequence.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<AgentHandle>> {
        self.agents.iter()
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }

    /// Current state snapshots for the read-only API.
    pub async fn state_snapshots(&self) -> Vec<AgentState> {
        let mut snapshots = Vec::with_capacity(self.agents.len());
        for handle in &self.agents {
            snapshots.push(handle.state.lock().await.clone());
        }
        snapshots
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::{PaperExchange, ScriptedProvider};
    use rust_decimal_macros::dec;

    fn handle(id: &str) -> Arc<AgentHandle> {
        Arc::new(AgentHandle::new(
            AgentConfig {
                id: id.to_string(),
                name: id.to_uppercase(),
                persona: "test".to_string(),
                initial_balance: dec!(500),
                max_holding_mins: 45,
                risk: None,
            },
            &RiskParams::default(),
            24,
            Arc::new(PaperExchange::new("paper", dec!(500))),
            Arc::new(ScriptedProvider::idle(id)),
        ))
    }

    #[tokio::test]
    async fn test_registry_preserves_roster_order() {
        let registry = AgentRegistry::new(vec![handle("gpt"), handle("claude"), handle("grok")]);

        let order: Vec<&str> = registry.iter().map(|h| h.id()).collect();
        assert_eq!(order, vec!["gpt", "claude", "grok"]);
        assert!(registry.get("claude").is_some());
        assert!(registry.get("nope").is_none());
    }

    #[tokio::test]
    async fn test_per_agent_risk_override() {
        let mut spec = AgentConfig {
            id: "x".to_string(),
            name: "X".to_string(),
            persona: "test".to_string(),
            initial_balance: dec!(500),
            max_holding_mins: 45,
            risk: None,
        };
        spec.risk = Some(RiskParams {
            max_open_positions: 2,
            ..RiskParams::default()
        });

        let handle = AgentHandle::new(
            spec,
            &RiskParams::default(),
            24,
            Arc::new(PaperExchange::new("paper", dec!(500))),
            Arc::new(ScriptedProvider::idle("x")),
        );
        assert_eq!(handle.policy().params.max_open_positions, 2);
    }
}
