use crate::{
    api::JudgeApi, errors::HistoryError, message::update::SubmissionUpdate,
    verdict::SubmissionStatus,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, warn};

const UNKNOWN_CASE_CODE: &str = "N/A";

/// One row of a contest's submission history.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SubmissionHistoryItem {
    pub user_id: Option<String>,
    pub username: Option<String>,
    pub name: Option<String>,
    pub submission_id: String,
    pub contest_id: String,
    pub case_id: String,
    pub case_code: String,
    pub status: SubmissionStatus,
    pub score: f64,
    pub submit_time: DateTime<Utc>,
    pub language_id: i64,
}

/// The part of a problem case needed to label history rows.
#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct Case {
    pub case_id: String,
    #[serde(default)]
    pub name: String,
    pub problem_code: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MergeKind {
    Inserted,
    Updated,
    Unchanged,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MergeOutcome {
    pub kind: MergeKind,
    /// Whether this merge bumped the leaderboard refresh counter.
    pub refreshed: bool,
}

/// Per-contest submission history, newest first, plus the leaderboard
/// refresh counter. All writes go through [`HistoryCache::merge`] and
/// [`HistoryCache::seed`].
pub struct HistoryCache {
    contests: Mutex<HashMap<String, Vec<SubmissionHistoryItem>>>,
    refresh: watch::Sender<u64>,
}

impl HistoryCache {
    pub fn new() -> Self {
        let (refresh, _) = watch::channel(0);
        Self {
            contests: Mutex::new(HashMap::new()),
            refresh,
        }
    }

    /// `None` until the contest has been fetched or merged into.
    pub async fn get(&self, contest_id: &str) -> Option<Vec<SubmissionHistoryItem>> {
        self.contests.lock().await.get(contest_id).cloned()
    }

    pub async fn seed(&self, contest_id: &str, items: Vec<SubmissionHistoryItem>) {
        debug!(contest_id, count = items.len(), "Seeding submission history");
        self.contests
            .lock()
            .await
            .insert(contest_id.to_string(), items);
    }

    pub fn subscribe_refresh(&self) -> watch::Receiver<u64> {
        self.refresh.subscribe()
    }

    pub fn refresh_count(&self) -> u64 {
        *self.refresh.borrow()
    }

    pub async fn merge(
        &self,
        contest_id: &str,
        update: &SubmissionUpdate,
        cases: &[Case],
        language_id: i64,
    ) -> MergeOutcome {
        let mut contests = self.contests.lock().await;
        let history = contests.entry(contest_id.to_string()).or_default();

        let outcome = match history
            .iter()
            .position(|item| item.submission_id == update.submission_id)
        {
            Some(index) => Self::apply(&mut history[index], update),
            None => {
                let case_code = cases
                    .iter()
                    .find(|case| case.case_id == update.case_id)
                    .map(|case| case.problem_code.clone())
                    .unwrap_or_else(|| UNKNOWN_CASE_CODE.to_string());

                history.insert(
                    0,
                    SubmissionHistoryItem {
                        user_id: None,
                        username: None,
                        name: None,
                        submission_id: update.submission_id.clone(),
                        contest_id: contest_id.to_string(),
                        case_id: update.case_id.clone(),
                        case_code,
                        status: update.status,
                        score: update.score,
                        submit_time: Utc::now(),
                        language_id,
                    },
                );
                MergeOutcome {
                    kind: MergeKind::Inserted,
                    refreshed: update.is_terminal(),
                }
            }
        };
        drop(contests);

        if outcome.refreshed {
            self.refresh.send_modify(|counter| *counter += 1);
            info!(
                contest_id,
                submission_id = %update.submission_id,
                status = %update.status,
                "Final verdict, leaderboard refresh requested"
            );
        }

        outcome
    }

    fn apply(item: &mut SubmissionHistoryItem, update: &SubmissionUpdate) -> MergeOutcome {
        let unchanged = MergeOutcome {
            kind: MergeKind::Unchanged,
            refreshed: false,
        };

        if item.status.is_terminal() && !update.is_terminal() {
            warn!(
                submission_id = %update.submission_id,
                status = %item.status,
                "Ignoring judging update for a submission that already has a final verdict"
            );
            return unchanged;
        }
        if item.status == update.status && item.score == update.score {
            return unchanged;
        }

        let refreshed = update.is_terminal() && !item.status.is_terminal();
        item.status = update.status;
        item.score = update.score;
        MergeOutcome {
            kind: MergeKind::Updated,
            refreshed,
        }
    }
}

impl Default for HistoryCache {
    fn default() -> Self {
        Self::new()
    }
}

/// Fetches each contest's history from the backend at most once per
/// process and seeds it into the cache.
pub struct HistoryLoader {
    api: Arc<dyn JudgeApi>,
    cache: Arc<HistoryCache>,
    fetched: Mutex<HashSet<String>>,
}

impl HistoryLoader {
    pub fn new(api: Arc<dyn JudgeApi>, cache: Arc<HistoryCache>) -> Self {
        Self {
            api,
            cache,
            fetched: Mutex::new(HashSet::new()),
        }
    }

    /// Returns `Ok(false)` when the contest was already fetched or is being
    /// fetched. A failed fetch can be retried.
    pub async fn ensure_loaded(
        &self,
        contest_id: &str,
        class_transaction_id: Option<&str>,
    ) -> Result<bool, HistoryError> {
        if !self.fetched.lock().await.insert(contest_id.to_string()) {
            return Ok(false);
        }

        match self.api.fetch_history(contest_id, class_transaction_id).await {
            Ok(items) => {
                self.cache.seed(contest_id, items).await;
                Ok(true)
            }
            Err(e) => {
                warn!(contest_id, "Failed to fetch submission history: {e}");
                self.fetched.lock().await.remove(contest_id);
                Err(e)
            }
        }
    }
}
