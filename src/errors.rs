use thiserror::Error;
use tokio_tungstenite::tungstenite;

const SUBMIT_FALLBACK_MESSAGE: &str = "Failed to submit code.";

/// Failure of the submit request. This is the only error shown to the user
/// as the submission error.
#[derive(Debug, Error)]
pub enum SubmitError {
    #[error("Submit request failed: {0}")]
    Transport(#[from] reqwest::Error),

    /// The backend refused the submission and said why (missing case,
    /// unknown language, ...).
    #[error("Submission rejected: {0}")]
    Rejected(String),

    #[error("Submit response is invalid: {0}")]
    InvalidResponse(String),
}

impl SubmitError {
    pub fn user_message(&self) -> String {
        match self {
            SubmitError::Rejected(message) => message.clone(),
            _ => SUBMIT_FALLBACK_MESSAGE.to_string(),
        }
    }
}

/// Transport-level failure of a submission channel.
#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("Failed to connect to {url}: {source}")]
    Connect {
        url: String,
        #[source]
        source: tungstenite::Error,
    },

    #[error("Channel transport failed: {0}")]
    Transport(#[from] tungstenite::Error),
}

/// A channel message that could not be turned into a submission update.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("Message is not a valid submission update: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Message is for submission {got}, but the channel watches {expected}")]
    SubmissionMismatch { expected: String, got: String },

    #[error("Test case numbers are 1-based, got 0")]
    TestcaseNumber,

    #[error("Test case {0} is reported twice")]
    DuplicateTestcase(u32),
}

#[derive(Debug, Error)]
pub enum HistoryError {
    #[error("History request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("History request failed with status {0}")]
    Status(reqwest::StatusCode),
}

impl HistoryError {
    pub fn user_message(&self) -> &'static str {
        "Could not load submission history."
    }
}
