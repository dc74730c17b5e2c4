//! The "learning assistant" surface: a thin HTTP client for the remote
//! chat-completion endpoint, and the parser that digs structured JSON out of
//! its free-text replies.

mod client;
pub mod parse;

pub use client::AssistantClient;
pub use parse::{
    AssistantAnswer, CarbonBreakdownEntry, CarbonEstimate, GreenEvent, extract_json, parse_carbon,
    parse_green_events, parse_or_raw,
};
