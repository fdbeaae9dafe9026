use crate::{errors::ChannelError, message::update::SubmissionUpdate};
use async_trait::async_trait;
use futures_util::stream::StreamExt;
use std::sync::Arc;
use tokio::sync::{oneshot, watch, Mutex};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite;
use tracing::{debug, error, info, warn};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    Connecting,
    Open,
    /// The connection failed. Always followed by `Closed`.
    Error,
    Closed,
}

/// Receives the events of one submission channel.
///
/// Callbacks run on the connection's reader task, so a listener must not
/// close its own connection from inside a callback.
#[async_trait]
pub trait ChannelListener: Send + Sync + 'static {
    async fn on_update(&self, update: SubmissionUpdate);

    async fn on_open(&self) {}

    /// The server ended the connection. Not called when the connection is
    /// closed locally.
    async fn on_close(&self) {}

    async fn on_error(&self, _error: ChannelError) {}
}

/// Keeps at most one submission channel open at a time.
pub struct ChannelManager {
    ws_url: String,
    next_serial: u64,
    current: Option<ConnectionHandle>,
}

impl ChannelManager {
    pub fn new(ws_url: &str) -> Self {
        Self {
            ws_url: ws_url.trim_end_matches('/').to_string(),
            next_serial: 0,
            current: None,
        }
    }

    pub fn channel_url(&self, submission_id: &str) -> String {
        format!("{}/api/ws/submissions/{submission_id}", self.ws_url)
    }

    /// Opens a channel for `submission_id`. Whatever connection was open
    /// before is fully closed by the time the new one starts connecting.
    pub async fn open(
        &mut self,
        submission_id: &str,
        listener: Arc<dyn ChannelListener>,
    ) -> ConnectionHandle {
        self.reset().await;

        self.next_serial += 1;
        let handle = ConnectionHandle::spawn(
            self.next_serial,
            self.channel_url(submission_id),
            submission_id.to_string(),
            listener,
        );
        self.current = Some(handle.clone());
        handle
    }

    pub async fn close(&mut self, handle: &ConnectionHandle) {
        handle.close().await;
        if self
            .current
            .as_ref()
            .map_or(false, |current| current.serial() == handle.serial())
        {
            self.current = None;
        }
    }

    /// Closes the current connection, if any.
    pub async fn reset(&mut self) {
        if let Some(handle) = self.current.clone() {
            debug!(
                submission_id = %handle.submission_id(),
                serial = handle.serial(),
                state = ?handle.state(),
                "Closing submission channel"
            );
            self.close(&handle).await;
        }
    }

    pub fn current(&self) -> Option<&ConnectionHandle> {
        self.current.as_ref()
    }
}

/// Shared reference to one channel connection. The connection's reader
/// task is aborted once the last handle is dropped.
#[derive(Clone)]
pub struct ConnectionHandle {
    inner: Arc<Connection>,
}

struct Connection {
    serial: u64,
    submission_id: String,
    state: watch::Receiver<ConnectionState>,
    control: Mutex<Control>,
}

struct Control {
    shutdown: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl ConnectionHandle {
    fn spawn(
        serial: u64,
        url: String,
        submission_id: String,
        listener: Arc<dyn ChannelListener>,
    ) -> Self {
        let (state_tx, state_rx) = watch::channel(ConnectionState::Idle);
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let task = tokio::spawn(run_connection(
            url,
            submission_id.clone(),
            listener,
            StateGuard(state_tx),
            shutdown_rx,
        ));

        Self {
            inner: Arc::new(Connection {
                serial,
                submission_id,
                state: state_rx,
                control: Mutex::new(Control {
                    shutdown: Some(shutdown_tx),
                    task: Some(task),
                }),
            }),
        }
    }

    pub fn serial(&self) -> u64 {
        self.inner.serial
    }

    pub fn submission_id(&self) -> &str {
        &self.inner.submission_id
    }

    pub fn state(&self) -> ConnectionState {
        *self.inner.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.clone()
    }

    /// Idempotent. Once this returns the listener is never called again.
    pub async fn close(&self) {
        let mut control = self.inner.control.lock().await;
        if let Some(shutdown) = control.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Some(task) = control.task.take() {
            if let Err(e) = task.await {
                if e.is_panic() {
                    error!(submission_id = %self.inner.submission_id, "Channel task panicked: {e}");
                }
            }
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        if let Some(task) = self.control.get_mut().task.take() {
            task.abort();
        }
    }
}

/// Publishes `Closed` however the reader task ends, abort included.
struct StateGuard(watch::Sender<ConnectionState>);

impl StateGuard {
    fn set(&self, state: ConnectionState) {
        self.0.send_replace(state);
    }
}

impl Drop for StateGuard {
    fn drop(&mut self) {
        self.0.send_replace(ConnectionState::Closed);
    }
}

async fn run_connection(
    url: String,
    submission_id: String,
    listener: Arc<dyn ChannelListener>,
    state: StateGuard,
    mut shutdown: oneshot::Receiver<()>,
) {
    state.set(ConnectionState::Connecting);

    let mut stream = tokio::select! {
        biased;
        _ = &mut shutdown => return,
        result = tokio_tungstenite::connect_async(url.as_str()) => match result {
            Ok((stream, _)) => stream,
            Err(source) => {
                error!(%submission_id, "Submission channel failed to connect: {source}");
                state.set(ConnectionState::Error);
                listener.on_error(ChannelError::Connect { url, source }).await;
                return;
            }
        },
    };

    state.set(ConnectionState::Open);
    info!(%submission_id, "Submission channel connected");
    listener.on_open().await;

    loop {
        let message = tokio::select! {
            biased;
            _ = &mut shutdown => {
                if let Err(e) = stream.close(None).await {
                    debug!(%submission_id, "Close handshake failed: {e}");
                }
                return;
            }
            message = stream.next() => message,
        };

        let payload = match message {
            None => {
                info!(%submission_id, "Submission channel disconnected");
                listener.on_close().await;
                return;
            }
            Some(Err(e)) => {
                error!(%submission_id, "Failed to read from the submission channel: {e}");
                state.set(ConnectionState::Error);
                listener.on_error(ChannelError::Transport(e)).await;
                listener.on_close().await;
                return;
            }
            Some(Ok(tungstenite::Message::Text(text))) => text.into_bytes(),
            Some(Ok(tungstenite::Message::Binary(buf))) => buf,
            Some(Ok(tungstenite::Message::Close(frame))) => {
                info!(%submission_id, ?frame, "Submission channel closed by the server");
                listener.on_close().await;
                return;
            }
            Some(Ok(tungstenite::Message::Ping(_) | tungstenite::Message::Pong(_))) => continue,
            Some(Ok(message)) => {
                warn!(%submission_id, "Message of unknown type on the submission channel: {message:?}");
                continue;
            }
        };

        let update = match SubmissionUpdate::decode(&submission_id, &payload) {
            Ok(update) => update,
            Err(e) => {
                warn!(
                    %submission_id,
                    payload = %String::from_utf8_lossy(&payload),
                    "Dropping malformed channel message: {e}"
                );
                continue;
            }
        };

        let terminal = update.is_terminal();
        debug!(%submission_id, status = %update.status, score = update.score, "Submission update");
        listener.on_update(update).await;

        if terminal {
            if let Err(e) = stream.close(None).await {
                debug!(%submission_id, "Close handshake failed: {e}");
            }
            info!(%submission_id, "Final verdict received, submission channel closed");
            listener.on_close().await;
            return;
        }
    }
}
