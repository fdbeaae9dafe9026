use crate::{
    api::JudgeApi,
    channel::{ChannelListener, ChannelManager},
    errors::ChannelError,
    history::{Case, HistoryCache},
    message::{submit::SubmitPayload, update::SubmissionUpdate},
};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use tracing::{debug, error, info, warn};

/// What the UI layer sees of a judging session.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SessionState {
    /// A submit request is outstanding.
    pub is_submitting: bool,
    /// The channel for `submission_id` is open.
    pub is_connected: bool,
    pub submission_id: Option<String>,
    pub latest_update: Option<SubmissionUpdate>,
    pub submission_error: Option<String>,
    pub judging_error: Option<String>,
}

impl SessionState {
    pub fn is_judging(&self) -> bool {
        self.is_connected
            && !self.is_submitting
            && !self
                .latest_update
                .as_ref()
                .map_or(false, |update| update.is_terminal())
    }
}

/// Drives submit-then-watch cycles for one consumer.
pub struct JudgingSession {
    api: Arc<dyn JudgeApi>,
    channels: Mutex<ChannelManager>,
    shared: Arc<Shared>,
    attempt: AtomicU64,
}

struct Shared {
    state: watch::Sender<SessionState>,
    cache: Arc<HistoryCache>,
    contest_id: Option<String>,
    cases: Vec<Case>,
    /// Channel events carry the generation they were opened under; only
    /// the current one may touch the state.
    generation: AtomicU64,
    disposed: AtomicBool,
}

impl Shared {
    fn publish_for(&self, generation: u64, modify: impl FnOnce(&mut SessionState)) {
        self.state.send_if_modified(|state| {
            if self.disposed.load(Ordering::SeqCst)
                || self.generation.load(Ordering::SeqCst) != generation
            {
                return false;
            }
            modify(state);
            true
        });
    }

    fn publish(&self, modify: impl FnOnce(&mut SessionState)) {
        if !self.disposed.load(Ordering::SeqCst) {
            self.state.send_modify(modify);
        }
    }
}

impl JudgingSession {
    pub fn new(
        api: Arc<dyn JudgeApi>,
        channels: ChannelManager,
        cache: Arc<HistoryCache>,
        contest_id: Option<String>,
        cases: Vec<Case>,
    ) -> Self {
        let (state, _) = watch::channel(SessionState::default());
        Self {
            api,
            channels: Mutex::new(channels),
            shared: Arc::new(Shared {
                state,
                cache,
                contest_id,
                cases,
                generation: AtomicU64::new(0),
                disposed: AtomicBool::new(false),
            }),
            attempt: AtomicU64::new(0),
        }
    }

    pub fn state(&self) -> SessionState {
        self.shared.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.shared.state.subscribe()
    }

    /// Sends a submission and starts watching it.
    ///
    /// Calling this again before the previous call finished abandons the
    /// previous submission: its response is ignored and no channel is opened
    /// for it.
    pub async fn submit(&self, payload: SubmitPayload) {
        if self.is_disposed() {
            debug!("Ignoring submit on a disposed judging session");
            return;
        }
        let attempt = self.attempt.fetch_add(1, Ordering::SeqCst) + 1;
        let language_id = payload.language_id;

        self.stop_tracking().await;
        self.shared.publish(|state| {
            state.is_submitting = true;
            state.submission_error = None;
        });

        let result = self.api.submit(payload).await;

        if self.attempt.load(Ordering::SeqCst) != attempt {
            debug!(attempt, "Submission superseded before its response arrived");
            return;
        }

        match result {
            Ok(response) => {
                info!(submission_id = %response.submission_id, status = %response.status, "Submission accepted");
                self.track(attempt, response.submission_id, language_id)
                    .await;
            }
            Err(e) => {
                error!("Submission failed: {e}");
                let message = e.user_message();
                self.shared
                    .publish(|state| state.submission_error = Some(message));
            }
        }

        if self.attempt.load(Ordering::SeqCst) == attempt {
            self.shared.publish(|state| state.is_submitting = false);
        }
    }

    /// Watches an existing submission without submitting anything. Rows it
    /// adds to the history carry language id 0.
    pub async fn watch(&self, submission_id: &str) {
        if self.is_disposed() {
            debug!(submission_id, "Ignoring watch on a disposed judging session");
            return;
        }
        let attempt = self.attempt.fetch_add(1, Ordering::SeqCst) + 1;
        self.shared.publish(|state| {
            state.is_submitting = false;
            state.submission_error = None;
        });
        self.track(attempt, submission_id.to_string(), 0).await;
    }

    /// Stops watching and forgets the current submission, including a
    /// submit request still in flight.
    pub async fn reset(&self) {
        self.attempt.fetch_add(1, Ordering::SeqCst);
        self.stop_tracking().await;
        self.shared.publish(|state| state.is_submitting = false);
    }

    /// Closes the channel for good. The state is frozen afterwards.
    pub async fn dispose(&self) {
        self.shared.disposed.store(true, Ordering::SeqCst);
        self.attempt.fetch_add(1, Ordering::SeqCst);
        self.shared.generation.fetch_add(1, Ordering::SeqCst);
        self.channels.lock().await.reset().await;
        debug!("Judging session disposed");
    }

    fn is_disposed(&self) -> bool {
        self.shared.disposed.load(Ordering::SeqCst)
    }

    async fn track(&self, attempt: u64, submission_id: String, language_id: i64) {
        let mut channels = self.channels.lock().await;
        if self.is_disposed() || self.attempt.load(Ordering::SeqCst) != attempt {
            return;
        }

        let generation = self.shared.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.shared.publish(|state| {
            state.submission_id = Some(submission_id.clone());
            state.latest_update = None;
            state.is_connected = false;
            state.judging_error = None;
        });

        let listener = Arc::new(SessionListener {
            generation,
            language_id,
            shared: self.shared.clone(),
        });
        channels.open(&submission_id, listener).await;
    }

    async fn stop_tracking(&self) {
        let mut channels = self.channels.lock().await;
        self.shared.generation.fetch_add(1, Ordering::SeqCst);
        channels.reset().await;
        self.shared.publish(|state| {
            state.submission_id = None;
            state.latest_update = None;
            state.is_connected = false;
        });
    }
}

struct SessionListener {
    generation: u64,
    language_id: i64,
    shared: Arc<Shared>,
}

impl SessionListener {
    fn is_current(&self) -> bool {
        !self.shared.disposed.load(Ordering::SeqCst)
            && self.shared.generation.load(Ordering::SeqCst) == self.generation
    }
}

#[async_trait]
impl ChannelListener for SessionListener {
    async fn on_update(&self, update: SubmissionUpdate) {
        if !self.is_current() {
            debug!(submission_id = %update.submission_id, "Dropping update of an abandoned channel");
            return;
        }

        if let Some(contest_id) = &self.shared.contest_id {
            self.shared
                .cache
                .merge(contest_id, &update, &self.shared.cases, self.language_id)
                .await;
        }

        self.shared
            .publish_for(self.generation, |state| state.latest_update = Some(update));
    }

    async fn on_open(&self) {
        self.shared.publish_for(self.generation, |state| {
            state.is_connected = true;
            state.judging_error = None;
        });
    }

    async fn on_close(&self) {
        self.shared
            .publish_for(self.generation, |state| state.is_connected = false);
    }

    async fn on_error(&self, error: ChannelError) {
        warn!("Submission channel error: {error}");
        let message = error.to_string();
        self.shared
            .publish_for(self.generation, |state| state.judging_error = Some(message));
    }
}
