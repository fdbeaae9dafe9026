use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Overall status of a submission as reported by the judge.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SubmissionStatus {
    Judging,

    Accepted,
    #[serde(rename = "Wrong Answer")]
    WrongAnswer,
    #[serde(rename = "Time Limit Exceeded")]
    TimeLimitExceeded,
    #[serde(rename = "Memory Limit Exceeded")]
    MemoryLimitExceeded,
    #[serde(rename = "Compile Error")]
    CompileError,
    #[serde(rename = "Runtime Error")]
    RuntimeError,
    #[serde(rename = "Internal Error")]
    InternalError,
}

impl SubmissionStatus {
    pub const ALL: &'static [SubmissionStatus] = &[
        Self::Judging,
        Self::Accepted,
        Self::WrongAnswer,
        Self::TimeLimitExceeded,
        Self::MemoryLimitExceeded,
        Self::CompileError,
        Self::RuntimeError,
        Self::InternalError,
    ];

    /// Everything except `Judging` ends the observation of a submission.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Judging)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Judging => "Judging",
            Self::Accepted => "Accepted",
            Self::WrongAnswer => "Wrong Answer",
            Self::TimeLimitExceeded => "Time Limit Exceeded",
            Self::MemoryLimitExceeded => "Memory Limit Exceeded",
            Self::CompileError => "Compile Error",
            Self::RuntimeError => "Runtime Error",
            Self::InternalError => "Internal Error",
        }
    }
}

impl fmt::Display for SubmissionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for SubmissionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| format!("Unknown submission status {s:?}"))
    }
}

/// Result of running the submission against one test case.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TestCaseResult {
    pub number: u32,
    pub verdict: String,
    pub input: String,
    pub expected_output: String,
    pub actual_output: String,
    #[serde(default)]
    pub stderr: Option<String>,
    pub time_ms: f64,
    pub memory_kb: u64,
}
