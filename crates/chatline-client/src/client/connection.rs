//! Persistent connection lifecycle.
//!
//! ```text
//! Idle --connect--> Connecting --open--> Open
//!                       |                 |
//!                       +---close/fail----+--> ClosedPendingRetry --timer--> Connecting
//! any --teardown / auth rejected--> Idle
//! ```
//!
//! Every connection attempt carries an epoch. A close reported by an older
//! epoch (a reader that outlived teardown, a connect that finished after the
//! identity was dropped) is ignored.

use crate::client::config::ClientConfig;
use crate::client::notice::{Notice, NoticeKind, NoticeSink};
use crate::client::retry::{Failure, RetryConfig, RetryDecision, RetryState};
use crate::client::utils::socket_url;
use crate::error::{ChatError, Result};
use crate::protocol::{FrameParser, InboundEvent, OutboundFrame};
use crate::scheduler::{Scheduler, TaskSlot};
use crate::traits::Connector;
use crate::types::{Identity, UserId};
use futures::future::BoxFuture;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::AbortHandle;
use tokio::time::Instant;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    Connecting,
    Open,
    ClosedPendingRetry { retry_at: Instant },
}

impl ConnectionState {
    pub fn is_open(&self) -> bool {
        matches!(self, ConnectionState::Open)
    }
}

struct Session {
    identity: Option<Identity>,
    outbound: Option<mpsc::Sender<String>>,
    epoch: u64,
    retry: RetryState,
}

struct Inner {
    connector: Arc<dyn Connector>,
    config: ClientConfig,
    scheduler: Scheduler,
    state: watch::Sender<ConnectionState>,
    session: Mutex<Session>,
    reconnect: TaskSlot,
    reader: Mutex<Option<AbortHandle>>,
    events: async_channel::Sender<InboundEvent>,
    notices: Mutex<Option<NoticeSink>>,
}

/// Owns the socket for one authenticated identity and keeps it alive.
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<Inner>,
    events: async_channel::Receiver<InboundEvent>,
}

/// Typed inbound events, in arrival order, across reconnects.
#[derive(Clone)]
pub struct EventStream {
    rx: async_channel::Receiver<InboundEvent>,
}

impl EventStream {
    pub async fn next(&self) -> Option<InboundEvent> {
        self.rx.recv().await.ok()
    }

    pub fn try_next(&self) -> Option<InboundEvent> {
        self.rx.try_recv().ok()
    }
}

fn reconnect_policy(config: &ClientConfig) -> RetryConfig {
    RetryConfig::reconnect(config.reconnect_delay(), config.max_reconnect_attempts)
}

impl ConnectionManager {
    pub fn new(connector: Arc<dyn Connector>, config: ClientConfig) -> Self {
        let (events_tx, events_rx) = async_channel::bounded(1024);
        let (state, _) = watch::channel(ConnectionState::Idle);
        let retry = RetryState::new(reconnect_policy(&config));
        Self {
            inner: Arc::new(Inner {
                connector,
                config,
                scheduler: Scheduler::new(),
                state,
                session: Mutex::new(Session {
                    identity: None,
                    outbound: None,
                    epoch: 0,
                    retry,
                }),
                reconnect: TaskSlot::new(),
                reader: Mutex::new(None),
                events: events_tx,
                notices: Mutex::new(None),
            }),
            events: events_rx,
        }
    }

    /// Where auth rejections and exhausted reconnects are reported.
    pub fn set_notice_sink(&self, sink: NoticeSink) {
        *self.inner.notices.lock() = Some(sink);
    }

    pub fn state(&self) -> ConnectionState {
        *self.inner.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.subscribe()
    }

    pub fn is_open(&self) -> bool {
        self.state().is_open()
    }

    pub fn viewer(&self) -> Option<UserId> {
        self.inner
            .session
            .lock()
            .identity
            .as_ref()
            .map(Identity::user_id)
    }

    /// When the pending reconnect attempt fires, if one is scheduled.
    pub fn retry_at(&self) -> Option<Instant> {
        self.inner.reconnect.deadline()
    }

    pub fn events(&self) -> EventStream {
        EventStream {
            rx: self.events.clone(),
        }
    }

    /// Open a connection for `identity`.
    ///
    /// A transient failure is not an error here: the manager moves to
    /// `ClosedPendingRetry` and keeps trying. Only a rejected credential
    /// (or an unusable URL) is returned.
    pub async fn connect(&self, identity: Identity) -> Result<()> {
        if identity.token.trim().is_empty() {
            let err = ChatError::Auth("no credential".to_string());
            self.inner.reject(&err);
            return Err(err);
        }

        self.inner.reconnect.cancel();
        {
            let mut session = self.inner.session.lock();
            session.identity = Some(identity);
            session.retry.reset();
        }
        match Inner::attempt(self.inner.clone()).await {
            Err(e) if e.is_auth() || matches!(e, ChatError::Config(_)) => Err(e),
            _ => Ok(()),
        }
    }

    /// Serialize and enqueue `frame`. Fails without side effects unless Open.
    pub fn send(&self, frame: &OutboundFrame) -> Result<()> {
        if !self.is_open() {
            return Err(ChatError::NotConnected);
        }
        let outbound = self.inner.session.lock().outbound.clone();
        let Some(outbound) = outbound else {
            return Err(ChatError::NotConnected);
        };

        let text = frame.to_text()?;
        tracing::debug!("[Connection] Sending {} frame", frame_kind(frame));
        outbound.try_send(text).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => {
                ChatError::TransientConnection("outbound queue is full".to_string())
            }
            mpsc::error::TrySendError::Closed(_) => ChatError::NotConnected,
        })
    }

    /// Drop the identity, cancel the pending reconnect and close the socket.
    /// No further attempts are made until the next `connect`.
    pub fn teardown(&self) {
        self.inner.reconnect.cancel();
        let reader = {
            let mut session = self.inner.session.lock();
            session.identity = None;
            session.outbound = None;
            session.epoch += 1;
            session.retry.reset();
            self.inner.reader.lock().take()
        };
        if let Some(reader) = reader {
            reader.abort();
        }
        self.inner.set_state(ConnectionState::Idle);
        tracing::info!("[Connection] Torn down");
    }
}

fn frame_kind(frame: &OutboundFrame) -> &'static str {
    match frame {
        OutboundFrame::SendMessage { .. } => "send_message",
        OutboundFrame::Typing { .. } => "typing",
        OutboundFrame::StopTyping { .. } => "stop_typing",
    }
}

fn reconnect_task(inner: Arc<Inner>) -> BoxFuture<'static, ()> {
    Box::pin(async move {
        tracing::info!("[Connection] Reconnecting");
        if let Err(e) = Inner::attempt(inner).await {
            tracing::debug!("[Connection] Reconnect attempt failed: {}", e);
        }
    })
}

impl Inner {
    fn set_state(&self, state: ConnectionState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            tracing::debug!("[Connection] {:?} -> {:?}", previous, state);
        }
    }

    fn notify(&self, notice: Notice) {
        if let Some(sink) = self.notices.lock().clone() {
            sink.raise(notice);
        }
    }

    async fn attempt(inner: Arc<Inner>) -> Result<()> {
        let (url, epoch) = {
            let mut session = inner.session.lock();
            let Some(identity) = session.identity.as_ref() else {
                return Err(ChatError::NotConnected);
            };
            let url = socket_url(&inner.config.ws_url, &identity.token)?;
            session.epoch += 1;
            (url, session.epoch)
        };
        inner.set_state(ConnectionState::Connecting);

        let result = inner.connector.open(&url).await;

        let link = match result {
            Ok(link) => link,
            Err(e) => {
                if !inner.is_current(epoch) {
                    return Err(e);
                }
                if e.is_auth() {
                    inner.reject(&e);
                } else {
                    tracing::warn!("[Connection] Connect failed: {}", e);
                    inner.on_closed(epoch, &e.to_string());
                }
                return Err(e);
            }
        };

        {
            let mut session = inner.session.lock();
            if session.epoch != epoch || session.identity.is_none() {
                tracing::debug!("[Connection] Discarding link opened after teardown");
                return Ok(());
            }
            session.outbound = Some(link.outbound);
            session.retry.reset();
        }
        inner.set_state(ConnectionState::Open);
        tracing::info!("[Connection] Open");
        inner.spawn_reader(epoch, link.inbound);
        Ok(())
    }

    fn is_current(&self, epoch: u64) -> bool {
        let session = self.session.lock();
        session.epoch == epoch && session.identity.is_some()
    }

    fn spawn_reader(self: &Arc<Self>, epoch: u64, inbound: async_channel::Receiver<Result<String>>) {
        let inner = self.clone();
        let handle = tokio::spawn(async move {
            let mut parser = FrameParser::new();
            let reason = loop {
                match inbound.recv().await {
                    Ok(Ok(text)) => {
                        for event in parser.feed(&text) {
                            tracing::trace!("[Connection] Event {}", event.kind());
                            let _ = inner.events.send(event).await;
                        }
                    }
                    Ok(Err(e)) => break e.to_string(),
                    Err(_) => break "socket closed".to_string(),
                }
            };
            if parser.malformed > 0 {
                tracing::debug!(
                    "[Connection] Link dropped {} malformed payload(s)",
                    parser.malformed
                );
            }
            inner.on_closed(epoch, &reason);
        });
        if let Some(previous) = self.reader.lock().replace(handle.abort_handle()) {
            previous.abort();
        }
    }

    /// Move to `ClosedPendingRetry` and schedule exactly one reconnect.
    fn on_closed(self: &Arc<Self>, epoch: u64, reason: &str) {
        let decision = {
            let mut session = self.session.lock();
            if session.epoch != epoch {
                return;
            }
            session.outbound = None;
            if session.identity.is_none() {
                None
            } else {
                Some(session.retry.after(Failure::Network))
            }
        };

        let delay = match decision {
            None => {
                self.set_state(ConnectionState::Idle);
                return;
            }
            Some(RetryDecision::GiveUp) => {
                tracing::error!("[Connection] Giving up after: {}", reason);
                self.session.lock().identity = None;
                self.set_state(ConnectionState::Idle);
                self.notify(Notice::new(
                    NoticeKind::Disconnected,
                    format!("connection lost: {}", reason),
                ));
                return;
            }
            Some(RetryDecision::Wait(delay)) => delay,
        };

        tracing::warn!(
            "[Connection] Closed ({}); retrying in {:?}",
            reason,
            delay
        );
        let handle = self.scheduler.schedule(delay, reconnect_task(self.clone()));
        let retry_at = handle.deadline();
        self.reconnect.replace(handle);
        self.set_state(ConnectionState::ClosedPendingRetry { retry_at });
    }

    /// Fatal credential failure: no retry, identity dropped, back to Idle.
    fn reject(&self, err: &ChatError) {
        tracing::error!("[Connection] {}", err);
        self.reconnect.cancel();
        let reader = {
            let mut session = self.session.lock();
            session.identity = None;
            session.outbound = None;
            session.epoch += 1;
            self.reader.lock().take()
        };
        if let Some(reader) = reader {
            reader.abort();
        }
        self.set_state(ConnectionState::Idle);
        self.notify(Notice::new(NoticeKind::AuthRejected, err.to_string()));
    }
}
