use crate::{
    errors::{HistoryError, SubmitError},
    history::SubmissionHistoryItem,
    message::submit::{ErrorResponse, SubmitPayload, SubmitResponse},
};
use async_trait::async_trait;
use tracing::{debug, error};

/// REST endpoints of the judge backend used by the judging core.
#[async_trait]
pub trait JudgeApi: Send + Sync {
    async fn submit(&self, payload: SubmitPayload) -> Result<SubmitResponse, SubmitError>;

    async fn fetch_history(
        &self,
        contest_id: &str,
        class_transaction_id: Option<&str>,
    ) -> Result<Vec<SubmissionHistoryItem>, HistoryError>;
}

pub struct HttpJudgeApi {
    client: reqwest::Client,
    base_url: String,
}

impl HttpJudgeApi {
    pub fn new(base_url: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn history_url(&self, contest_id: &str, class_transaction_id: Option<&str>) -> String {
        match class_transaction_id {
            Some(class_id) => format!(
                "{}/api/submission/all/{contest_id}?class_transaction_id={class_id}",
                self.base_url
            ),
            None => format!("{}/api/submission/{contest_id}", self.base_url),
        }
    }
}

#[async_trait]
impl JudgeApi for HttpJudgeApi {
    async fn submit(&self, payload: SubmitPayload) -> Result<SubmitResponse, SubmitError> {
        debug!(case_id = %payload.case_id, language_id = payload.language_id, "Submitting");

        let response = self
            .client
            .post(format!("{}/api/submissions", self.base_url))
            .multipart(payload.into_form())
            .send()
            .await?;

        let status = response.status();
        let body = response.bytes().await?;

        if !status.is_success() {
            let message = serde_json::from_slice::<ErrorResponse>(&body)
                .map(|e| e.error)
                .ok();
            error!(%status, ?message, "Submit endpoint refused the submission");
            return Err(match message {
                Some(message) => SubmitError::Rejected(message),
                None => SubmitError::InvalidResponse(format!("HTTP {status}")),
            });
        }

        serde_json::from_slice(&body).map_err(|e| SubmitError::InvalidResponse(e.to_string()))
    }

    async fn fetch_history(
        &self,
        contest_id: &str,
        class_transaction_id: Option<&str>,
    ) -> Result<Vec<SubmissionHistoryItem>, HistoryError> {
        let response = self
            .client
            .get(self.history_url(contest_id, class_transaction_id))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(HistoryError::Status(response.status()));
        }

        // The backend answers `null` for a contest without submissions.
        let items: Option<Vec<SubmissionHistoryItem>> = response.json().await?;
        Ok(items.unwrap_or_default())
    }
}
