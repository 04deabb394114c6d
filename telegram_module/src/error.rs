#[derive(Debug, thiserror::Error)]
pub enum TelegramError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("json error: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("telegram {method} returned HTTP {status}: {body}")]
    Status {
        method: &'static str,
        status: u16,
        body: String,
    },
    #[error("telegram {method} failed ({code:?}): {description}")]
    Api {
        method: &'static str,
        code: Option<i64>,
        description: String,
    },
    #[error("telegram {0} returned no result")]
    MissingResult(&'static str),
}
