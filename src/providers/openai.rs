//! OpenAI-compatible chat-completions decision provider
//!
//! Each agent gets its own provider handle carrying the persona system
//! prompt; the completion is forced into JSON mode and parsed into the
//! untrusted `RawDecision` wire shape. Bounded retries on transport
//! errors; the overall call is still timeout-bounded by the executor.

use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;
use tracing::{debug, warn};

use super::traits::{DecisionContext, DecisionProvider};
use crate::domain::{AgentState, RawDecision};
use crate::error::{ArenaError, Result};

/// Configuration for the chat-completions provider.
#[derive(Debug, Clone)]
pub struct OpenAiProviderConfig {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    pub timeout: Duration,
    pub max_retries: u8,
    pub temperature: f64,
}

impl Default for OpenAiProviderConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            api_key: String::new(),
            model: "gpt-4o".to_string(),
            timeout: Duration::from_secs(60),
            max_retries: 2,
            temperature: 0.8,
        }
    }
}

pub struct OpenAiProvider {
    client: Client,
    config: OpenAiProviderConfig,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f64,
    response_format: serde_json::Value,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    content: String,
}

impl OpenAiProvider {
    pub fn new(config: OpenAiProviderConfig) -> Result<Self> {
        let client = Client::builder().timeout(config.timeout).build()?;
        Ok(Self { client, config })
    }

    async fn request_decision(&self, agent: &AgentState, ctx: &DecisionContext) -> Result<RawDecision> {
        let user_prompt = build_user_prompt(ctx);
        let request = ChatRequest {
            model: &self.config.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: &agent.persona,
                },
                ChatMessage {
                    role: "user",
                    content: &user_prompt,
                },
            ],
            temperature: self.config.temperature,
            response_format: json!({"type": "json_object"}),
        };

        let response = self
            .client
            .post(format!("{}/chat/completions", self.config.base_url))
            .bearer_auth(&self.config.api_key)
            .json(&request)
            .send()
            .await?
            .error_for_status()?;

        let body: ChatResponse = response.json().await?;
        let content = body
            .choices
            .first()
            .map(|c| c.message.content.as_str())
            .ok_or_else(|| ArenaError::Provider("completion returned no choices".to_string()))?;

        debug!("Raw provider decision for {}: {}", agent.id, content);

        let raw: RawDecision = serde_json::from_str(extract_json(content))
            .map_err(|e| ArenaError::Provider(format!("unparseable decision payload: {e}")))?;
        Ok(raw)
    }
}

#[async_trait::async_trait]
impl DecisionProvider for OpenAiProvider {
    fn name(&self) -> &str {
        &self.config.model
    }

    async fn get_decision(
        &self,
        agent: &AgentState,
        ctx: &DecisionContext,
    ) -> Result<RawDecision> {
        let mut last_error = None;

        for attempt in 1..=self.config.max_retries.max(1) {
            match self.request_decision(agent, ctx).await {
                Ok(raw) => return Ok(raw),
                Err(e) => {
                    warn!(
                        "Decision request for {} failed (attempt {}): {}",
                        agent.id, attempt, e
                    );
                    last_error = Some(e);
                    if attempt < self.config.max_retries {
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        }

        Err(last_error
            .unwrap_or_else(|| ArenaError::Provider("decision request failed".to_string())))
    }
}

/// Compact decision prompt: account, book, market, and the response schema.
fn build_user_prompt(ctx: &DecisionContext) -> String {
    let positions = if ctx.open_positions.is_empty() {
        "None".to_string()
    } else {
        ctx.open_positions
            .iter()
            .map(|p| {
                format!(
                    "{}: {} {} @ ${} | mark ${} | unrealized ${} ({}%)",
                    p.instrument,
                    p.direction,
                    p.quantity,
                    p.entry_price,
                    p.mark_price,
                    p.unrealized_pnl.round_dp(2),
                    p.unrealized_pnl_pct.round_dp(2)
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    };

    let market = ctx
        .market
        .iter()
        .map(|q| {
            format!(
                "{} [{}]: ${} ({}% 24h, vol {})",
                q.instrument, q.kind, q.price, q.change_24h_pct, q.volume
            )
        })
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        r#"ACCOUNT:
- Available cash: ${cash}
- Account value: ${value}
- Total return: {ret}%

OPEN POSITIONS:
{positions}

MARKET:
{market}

RULES:
- You may OPEN at most a handful of concurrent positions; sizing and leverage are capped by the platform.
- Perpetual instruments REQUIRE stopLoss and takeProfit prices.
- Respond with a single JSON object:
{{"action":"LONG|SHORT|CLOSE|HOLD","symbol":"...","size":60,"leverage":10,"stopLoss":48500,"takeProfit":52500,"reasoning":"...","message":"one conversational sentence"}}
- For CLOSE, set "symbol" to the position's instrument.
- For HOLD, omit symbol, size, leverage, stopLoss and takeProfit."#,
        cash = ctx.cash_balance.round_dp(2),
        value = ctx.account_value.round_dp(2),
        ret = ctx.total_return_pct.round_dp(2),
        positions = positions,
        market = market,
    )
}

/// Extract JSON from a response that may wrap it in markdown code fences.
fn extract_json(text: &str) -> &str {
    if let Some(start) = text.find("```json") {
        if let Some(end) = text[start + 7..].find("```") {
            return text[start + 7..start + 7 + end].trim();
        }
    }

    if let Some(start) = text.find('{') {
        if let Some(end) = text.rfind('}') {
            return &text[start..=end];
        }
    }

    text.trim()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_extract_json_from_fenced_block() {
        let text = "Here you go:\n```json\n{\"action\":\"HOLD\"}\n```\nDone.";
        assert_eq!(extract_json(text), r#"{"action":"HOLD"}"#);
    }

    #[test]
    fn test_extract_json_raw_object() {
        let text = r#"{"action":"LONG","symbol":"BTCUSDT"}"#;
        assert_eq!(extract_json(text), text);
    }

    #[test]
    fn test_prompt_mentions_positions_and_market() {
        let agent = AgentState::new("claude", "Claude", "balanced", dec!(500), 24);
        let ctx = DecisionContext::new(
            &agent,
            vec![],
            vec![crate::market::MarketQuote::new(
                "BTCUSDT",
                crate::market::InstrumentKind::Perpetual,
                dec!(50000),
            )],
        );
        let prompt = build_user_prompt(&ctx);
        assert!(prompt.contains("BTCUSDT"));
        assert!(prompt.contains("Available cash: $500"));
        assert!(prompt.contains("None"));
    }
}
