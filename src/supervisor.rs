//! Supervisor (§4.7): owns the connect/login/rejoin/backoff state machine.
//!
//! There is no reference-repo ancestor for this — `connect_and_listen` in
//! the teacher's `client.rs` connected exactly once and let the process
//! die on EOF. The backoff formula and give-up path are grounded on
//! `rust-srec`'s `calculate_reconnect_delay`/`attempt_reconnect` in
//! `danmu/providers/twitch.rs`, generalized from its fixed `* 2` growth to
//! the spec's configurable `reconnect_decay`.

use std::sync::{Arc, RwLock as StdRwLock};
use std::time::Duration;

use tokio::sync::{mpsc, Mutex};

use crate::config::ClientConfig;
use crate::connection::{ConnectionIO, ReaderEvent};
use crate::dispatcher::Dispatcher;
use crate::error::Result;
use crate::event::{EventEmitter, EventPayload};
use crate::queue::MessageQueue;
use crate::state::{ClientState, ReadyState};

/// Next backoff delay given the previous one (§4.7): grows by
/// `reconnect_decay` each attempt, clamped at `max_reconnect_interval`.
fn next_backoff(previous: Duration, config: &ClientConfig) -> Duration {
    let scaled = previous.mul_f64(config.connection.reconnect_decay);
    scaled.min(config.max_reconnect_interval())
}

/// Drives one connection's full lifetime: connect, run until it drops,
/// back off, retry — until told to stop or `max_reconnect_attempts` is hit.
pub struct Supervisor {
    config: Arc<ClientConfig>,
    state: ClientState,
    events: EventEmitter,
    dispatcher: Dispatcher,
    join_queue: Arc<MessageQueue>,
    privmsg_queue: Arc<MessageQueue>,
    command_queue: Arc<MessageQueue>,
    connection: Arc<Mutex<Option<ConnectionIO>>>,
    current_backoff: Mutex<Option<Duration>>,
    /// Mirrors the live connection's writer behind a synchronous lock, so
    /// [`crate::commands`]'s queue jobs (plain `FnOnce`, not `async`) can
    /// fetch it without a runtime handle.
    writer_slot: Arc<StdRwLock<Option<Arc<crate::connection::Writer>>>>,
}

impl Supervisor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: Arc<ClientConfig>,
        state: ClientState,
        events: EventEmitter,
        dispatcher: Dispatcher,
        join_queue: Arc<MessageQueue>,
        privmsg_queue: Arc<MessageQueue>,
        command_queue: Arc<MessageQueue>,
    ) -> Self {
        Supervisor {
            config,
            state,
            events,
            dispatcher,
            join_queue,
            privmsg_queue,
            command_queue,
            connection: Arc::new(Mutex::new(None)),
            current_backoff: Mutex::new(None),
            writer_slot: Arc::new(StdRwLock::new(None)),
        }
    }

    /// A cloneable accessor usable from a synchronous context, handed to
    /// [`crate::commands::Commands`] at construction time.
    pub fn writer_slot(&self) -> Arc<StdRwLock<Option<Arc<crate::connection::Writer>>>> {
        self.writer_slot.clone()
    }

    /// Connect once and spawn the background task that reads lines,
    /// dispatches them, and reconnects on drop (§4.7's loop). Returns once
    /// the first connection attempt and handshake have started.
    pub async fn start(self: Arc<Self>) -> Result<()> {
        self.connect_once().await?;

        // A server-sent RECONNECT is, per §4.7's state diagram, the same
        // OPEN->CLOSING transition trigger as a dropped socket; listen for
        // the Dispatcher's internal signal and drive the same teardown
        // `ReaderEvent::Closed` does, so `run()`'s loop picks it up.
        let reconnect_supervisor = self.clone();
        self.events
            .on_async("reconnect_requested", move |_payload| {
                let supervisor = reconnect_supervisor.clone();
                async move { supervisor.handle_reconnect_requested().await }
            })
            .await;

        // §7's Authentication category: a login-failure NOTICE must disable
        // reconnect rather than let `run()`'s loop back off and retry with
        // the same bad credentials forever.
        let auth_supervisor = self.clone();
        self.events
            .on_async("auth_failed", move |_payload| {
                let supervisor = auth_supervisor.clone();
                async move { supervisor.handle_auth_failed().await }
            })
            .await;

        let supervisor = self.clone();
        tokio::spawn(async move { supervisor.run().await });
        Ok(())
    }

    async fn handle_reconnect_requested(&self) {
        tracing::info!("server requested reconnect");
        *self.writer_slot.write().unwrap() = None;
        if let Some(mut conn) = self.connection.lock().await.take() {
            conn.shutdown().await;
        }
        self.state.set_ready_state(ReadyState::Closed).await;
    }

    async fn handle_auth_failed(&self) {
        self.state.set_close_called(true).await;
        *self.writer_slot.write().unwrap() = None;
        if let Some(mut conn) = self.connection.lock().await.take() {
            conn.shutdown().await;
        }
        self.state.set_ready_state(ReadyState::Closed).await;
        self.events
            .emit(
                "disconnected",
                EventPayload::from_text(["Login authentication failed"]),
            )
            .await;
    }

    async fn connect_once(&self) -> Result<()> {
        self.state.set_ready_state(ReadyState::Connecting).await;
        let (tx, rx) = mpsc::unbounded_channel();
        let conn = ConnectionIO::connect(&self.config, tx).await?;
        *self.writer_slot.write().unwrap() = Some(conn.writer.clone());
        *self.connection.lock().await = Some(conn);
        self.spawn_reader(rx);

        for channel in &self.config.channels {
            let channel = channel.clone();
            let writer_slot = self.writer_slot.clone();
            self.join_queue.add(move || {
                let writer = writer_slot.read().unwrap().clone();
                if let Some(writer) = writer {
                    let line = format!("JOIN {channel}");
                    tokio::spawn(async move {
                        if let Err(err) = writer.write_line(&line).await {
                            tracing::warn!(error = %err, channel, "failed to send JOIN");
                        }
                    });
                }
                Ok(())
            })?;
        }
        Ok(())
    }

    fn spawn_reader(&self, mut rx: mpsc::UnboundedReceiver<ReaderEvent>) {
        let dispatcher = self.dispatcher.clone();
        let state = self.state.clone();
        let writer_slot = self.writer_slot.clone();
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                match event {
                    ReaderEvent::Message(msg) => {
                        dispatcher.dispatch(msg).await;
                    }
                    ReaderEvent::Closed => {
                        *writer_slot.write().unwrap() = None;
                        state.set_ready_state(ReadyState::Closed).await;
                        break;
                    }
                }
            }
        });
    }

    /// The reconnect loop (§4.7). Runs until `disconnect()` was called, the
    /// supervisor is dropped, or `max_reconnect_attempts` is exhausted.
    async fn run(self: Arc<Self>) {
        loop {
            self.wait_until_closed().await;

            if self.state.was_close_called().await {
                return;
            }
            if !self.config.connection.reconnect {
                self.events
                    .emit(
                        "disconnected",
                        EventPayload::from_text(["connection closed"]),
                    )
                    .await;
                return;
            }

            let attempt = self.state.increment_reconnect_attempts().await;
            if let Some(max) = self.config.connection.max_reconnect_attempts {
                if attempt > max {
                    self.events
                        .emit(
                            "disconnected",
                            EventPayload::from_text(["Maximum reconnection attempts reached"]),
                        )
                        .await;
                    return;
                }
            }

            let delay = {
                let mut backoff = self.current_backoff.lock().await;
                let next = match *backoff {
                    None => self.config.reconnect_interval().mul_f64(self.config.connection.reconnect_decay),
                    Some(previous) => next_backoff(previous, &self.config),
                };
                *backoff = Some(next);
                next
            };
            tracing::info!(attempt, delay_ms = delay.as_millis() as u64, "reconnecting after backoff");
            tokio::time::sleep(delay).await;

            self.state.reset_for_reconnect().await;
            match self.connect_once().await {
                Ok(()) => {
                    *self.current_backoff.lock().await = None;
                }
                Err(err) => {
                    tracing::warn!(error = %err, "reconnect attempt failed");
                }
            }
        }
    }

    async fn wait_until_closed(&self) {
        loop {
            if self.state.ready_state().await == ReadyState::Closed {
                return;
            }
            tokio::time::sleep(Duration::from_millis(200)).await;
        }
    }

    /// User-initiated disconnect (§5's cancellation section): marks
    /// `wasCloseCalled`, cancels the reader and all three queue workers, and
    /// emits `disconnected`.
    pub async fn disconnect(&self, reason: &str) -> Result<()> {
        self.state.set_close_called(true).await;
        *self.writer_slot.write().unwrap() = None;
        if let Some(mut conn) = self.connection.lock().await.take() {
            conn.shutdown().await;
        }
        self.state.set_ready_state(ReadyState::Closing).await;
        self.join_queue.stop().await;
        self.privmsg_queue.stop().await;
        self.command_queue.stop().await;
        self.state.set_ready_state(ReadyState::Closed).await;
        self.events
            .emit("disconnected", EventPayload::from_text([reason]))
            .await;
        Ok(())
    }
}

