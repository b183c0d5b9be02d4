//! Scripted decision provider
//!
//! Deterministic provider for tests and dry runs: pops decisions from a
//! pre-loaded queue, then answers HOLD once the script runs out.

use std::collections::VecDeque;
use std::sync::Mutex;

use super::traits::{DecisionContext, DecisionProvider};
use crate::domain::{AgentState, RawDecision};
use crate::error::Result;

pub struct ScriptedProvider {
    name: String,
    script: Mutex<VecDeque<RawDecision>>,
}

impl ScriptedProvider {
    pub fn new(name: impl Into<String>, script: Vec<RawDecision>) -> Self {
        Self {
            name: name.into(),
            script: Mutex::new(script.into()),
        }
    }

    /// Provider that always holds.
    pub fn idle(name: impl Into<String>) -> Self {
        Self::new(name, Vec::new())
    }

    pub fn remaining(&self) -> usize {
        self.script.lock().expect("script lock poisoned").len()
    }
}

#[async_trait::async_trait]
impl DecisionProvider for ScriptedProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn get_decision(
        &self,
        _agent: &AgentState,
        _ctx: &DecisionContext,
    ) -> Result<RawDecision> {
        let next = self.script.lock().expect("script lock poisoned").pop_front();
        Ok(next.unwrap_or_else(|| RawDecision::hold("script exhausted, holding")))
    }
}
