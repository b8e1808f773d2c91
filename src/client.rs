//! Top-level client (§2's component diagram): wires ConnectionIO,
//! Dispatcher, EventEmitter, the three MessageQueues, CommandAPI, and the
//! Supervisor into one handle.
//!
//! The reference repo's `TwitchClient`/`connect_and_listen` played this
//! same role for its much smaller sync design (one struct owning the
//! socket and a config); `ClientHandle` keeps that "one struct is the
//! library's front door" shape while delegating each concern to its own
//! module instead of inlining everything in one 469-line file.

use std::sync::Arc;
use std::time::Duration;

use crate::commands::Commands;
use crate::config::ClientConfig;
use crate::dispatcher::Dispatcher;
use crate::error::Result;
use crate::event::{EventEmitter, EventPayload, ListenerId};
use crate::message::IRCMessage;
use crate::queue::MessageQueue;
use crate::state::{ChannelState, ClientState, ReadyState};
use crate::supervisor::Supervisor;

/// The library's public entry point. Cheaply cloneable: every field is an
/// `Arc`/`Clone`-friendly handle, so multiple owners (e.g. a demo's
/// read-loop task and its command-issuing task) can share one client.
#[derive(Clone)]
pub struct ClientHandle {
    config: Arc<ClientConfig>,
    state: ClientState,
    events: EventEmitter,
    commands: Arc<Commands>,
    supervisor: Arc<Supervisor>,
}

impl ClientHandle {
    /// Build every component (§2) and start the first connection attempt.
    pub async fn connect(config: ClientConfig) -> Result<Self> {
        let config = Arc::new(config);
        let state = ClientState::new();
        let events = EventEmitter::new();

        let join_queue = Arc::new(MessageQueue::spawn(config.rate_limits.join_interval()));
        let privmsg_queue = Arc::new(MessageQueue::spawn(config.rate_limits.message_interval()));
        let command_queue = Arc::new(MessageQueue::spawn(config.rate_limits.command_interval()));

        let dispatcher = Dispatcher::new(events.clone(), state.clone(), config.identity.nick());
        let supervisor = Arc::new(Supervisor::new(
            config.clone(),
            state.clone(),
            events.clone(),
            dispatcher,
            join_queue.clone(),
            privmsg_queue.clone(),
            command_queue.clone(),
        ));

        let commands = Arc::new(Commands::new(
            config.clone(),
            state.clone(),
            events.clone(),
            join_queue,
            privmsg_queue,
            command_queue,
            supervisor.writer_slot(),
        ));

        supervisor.clone().start().await?;

        Ok(ClientHandle {
            config,
            state,
            events,
            commands,
            supervisor,
        })
    }

    /// Register a synchronous listener for `event` (§4.4).
    pub async fn on<F>(&self, event: impl Into<String>, listener: F) -> ListenerId
    where
        F: Fn(&EventPayload) + Send + Sync + 'static,
    {
        self.events.on(event, listener).await
    }

    /// Register an async listener for `event`, scheduled via `tokio::spawn`.
    pub async fn on_async<F, Fut>(&self, event: impl Into<String>, listener: F) -> ListenerId
    where
        F: Fn(EventPayload) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        self.events.on_async(event, listener).await
    }

    pub async fn off(&self, event: &str, id: ListenerId) {
        self.events.off(event, id).await
    }

    /// Block until `event` fires, or until `timeout` elapses.
    pub async fn wait_for(&self, event: &str, timeout: Duration) -> Option<EventPayload> {
        self.events.wait_for(event, timeout).await
    }

    pub fn commands(&self) -> &Commands {
        &self.commands
    }

    pub async fn say(&self, channel: &str, message: &str) -> Result<()> {
        self.commands.say(channel, message).await
    }

    pub async fn action(&self, channel: &str, message: &str) -> Result<()> {
        self.commands.action(channel, message).await
    }

    pub async fn reply(&self, channel: &str, parent_msg_id: &str, message: &str) -> Result<()> {
        self.commands.reply(channel, parent_msg_id, message).await
    }

    pub async fn join(&self, channel: &str) -> Result<()> {
        self.commands.join(channel).await
    }

    pub async fn part(&self, channel: &str) -> Result<()> {
        self.commands.part(channel).await
    }

    pub async fn ready_state(&self) -> ReadyState {
        self.state.ready_state().await
    }

    pub async fn is_open(&self) -> bool {
        self.state.is_open().await
    }

    pub async fn channels(&self) -> Vec<String> {
        self.state.channels().await
    }

    pub async fn channel_state(&self, channel: &str) -> Option<ChannelState> {
        let normalized = crate::config::normalize_channel(channel);
        self.state.channel(&normalized).await
    }

    /// Round-trip latency measured by the most recent `ping()` call (§10.5).
    pub async fn latency(&self) -> Option<Duration> {
        self.state.latency().await
    }

    /// Send a PING and wait for the matching PONG, updating [`Self::latency`].
    pub async fn ping(&self) -> Result<Duration> {
        self.commands.ping().await
    }

    /// Gracefully close the connection (§5): suppresses reconnect.
    pub async fn disconnect(&self) -> Result<()> {
        self.supervisor.disconnect("disconnect() called").await
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Re-parse a standalone line outside the connection, useful for tests
    /// and for consumers replaying captured transcripts.
    pub fn parse(line: &str) -> Option<IRCMessage> {
        crate::message::parse_line(line)
    }
}
