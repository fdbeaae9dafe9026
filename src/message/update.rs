use crate::{
    errors::DecodeError,
    verdict::{SubmissionStatus, TestCaseResult},
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Judging progress pushed over a submission channel.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SubmissionUpdate {
    pub submission_id: String,
    pub case_id: String,
    pub score: f64,
    pub status: SubmissionStatus,
    #[serde(default)]
    pub testcases: Vec<TestCaseResult>,
}

impl SubmissionUpdate {
    /// Parses and validates a raw channel payload for the channel watching
    /// `expected_submission_id`.
    pub fn decode(expected_submission_id: &str, payload: &[u8]) -> Result<Self, DecodeError> {
        let update: SubmissionUpdate = serde_json::from_slice(payload)?;

        if update.submission_id != expected_submission_id {
            return Err(DecodeError::SubmissionMismatch {
                expected: expected_submission_id.to_string(),
                got: update.submission_id,
            });
        }

        let mut seen = HashSet::with_capacity(update.testcases.len());
        for testcase in &update.testcases {
            if testcase.number == 0 {
                return Err(DecodeError::TestcaseNumber);
            }
            if !seen.insert(testcase.number) {
                return Err(DecodeError::DuplicateTestcase(testcase.number));
            }
        }

        Ok(update)
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}
