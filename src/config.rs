use crate::{AppError, AppResult};

#[derive(Debug, Clone)]
pub struct Config {
    /// Base URL of the remote assistant API (`/chat/new`, `/chat/message`).
    pub assistant_url: String,
    /// Storage bucket holding post and story images.
    pub image_bucket: String,
}

impl Config {
    pub fn from_env() -> AppResult<Self> {
        let _ = dotenv::dotenv();

        Ok(Self {
            assistant_url: var("ASSISTANT_URL")?,
            image_bucket: dotenv::var("IMAGE_BUCKET").unwrap_or_else(|_| "images".to_owned()),
        })
    }
}

fn var(name: &str) -> AppResult<String> {
    dotenv::var(name).map_err(|_| AppError::Config(format!("missing {name}")))
}
