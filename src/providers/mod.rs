pub mod openai;
pub mod paper;
pub mod scripted;
pub mod traits;

pub use openai::{OpenAiProvider, OpenAiProviderConfig};
pub use paper::PaperExchange;
pub use scripted::ScriptedProvider;
pub use traits::{
    AccountState, DecisionContext, DecisionProvider, ExchangeClient, FillReceipt, OrderReceipt,
    OrderTicket, ProtectiveReceipt,
};

#[cfg(test)]
pub use traits::{MockDecisionProvider, MockExchangeClient};
