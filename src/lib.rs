//! greenloop: client core of a community/events platform. View-model
//! assemblers over a hosted backend's query + change-feed surface, a
//! session/profile context, and the parser for the learning assistant's
//! JSON-in-text replies.

pub mod backend;
pub mod chat;
pub mod config;
pub mod error;
pub mod events;
pub mod feed;
pub mod learn;
pub mod models;
pub mod session;
pub mod storage;

pub use config::Config;
pub use error::{AppError, AppResult};
