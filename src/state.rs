//! Connection and per-channel state (§3 "Data Model").
//!
//! The reference client kept no state at all beyond the open socket; every
//! incoming line was printed and forgotten. This module is the shared,
//! lock-guarded state the Dispatcher updates and the CommandAPI and demo
//! consumers read: ready state, per-channel roomstate/userstate, the
//! client's own global identity tags, and reconnect bookkeeping.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;

use crate::message::Tags;

/// Connection lifecycle, mirroring the states named in §4.7's diagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadyState {
    Connecting,
    Open,
    Closing,
    Closed,
}

impl Default for ReadyState {
    fn default() -> Self {
        ReadyState::Closed
    }
}

/// Per-channel state accumulated from ROOMSTATE/USERSTATE (§4.3).
#[derive(Debug, Clone, Default)]
pub struct ChannelState {
    pub joined: bool,
    pub roomstate: Tags,
    pub userstate: Tags,
}

/// All mutable state shared between the connection, dispatcher, and
/// command API, guarded behind one `RwLock` per field group so readers
/// (e.g. `ClientHandle::channels()`) never block the dispatcher's writes
/// to unrelated fields.
#[derive(Clone)]
pub struct ClientState {
    inner: Arc<Inner>,
}

struct Inner {
    ready_state: RwLock<ReadyState>,
    global_userstate: RwLock<Tags>,
    channels: RwLock<HashMap<String, ChannelState>>,
    reconnect_attempts: RwLock<u32>,
    latency: RwLock<Option<Duration>>,
    was_close_called: RwLock<bool>,
}

impl Default for ClientState {
    fn default() -> Self {
        Self::new()
    }
}

impl ClientState {
    pub fn new() -> Self {
        ClientState {
            inner: Arc::new(Inner {
                ready_state: RwLock::new(ReadyState::Closed),
                global_userstate: RwLock::new(Tags::new()),
                channels: RwLock::new(HashMap::new()),
                reconnect_attempts: RwLock::new(0),
                latency: RwLock::new(None),
                was_close_called: RwLock::new(false),
            }),
        }
    }

    pub async fn ready_state(&self) -> ReadyState {
        *self.inner.ready_state.read().await
    }

    pub async fn set_ready_state(&self, state: ReadyState) {
        *self.inner.ready_state.write().await = state;
    }

    pub async fn is_open(&self) -> bool {
        self.ready_state().await == ReadyState::Open
    }

    pub async fn global_userstate(&self) -> Tags {
        self.inner.global_userstate.read().await.clone()
    }

    pub async fn set_global_userstate(&self, tags: Tags) {
        *self.inner.global_userstate.write().await = tags;
    }

    pub async fn channel(&self, name: &str) -> Option<ChannelState> {
        self.inner.channels.read().await.get(name).cloned()
    }

    pub async fn channels(&self) -> Vec<String> {
        self.inner
            .channels
            .read()
            .await
            .iter()
            .filter(|(_, state)| state.joined)
            .map(|(name, _)| name.clone())
            .collect()
    }

    pub async fn mark_joined(&self, channel: &str) {
        self.inner
            .channels
            .write()
            .await
            .entry(channel.to_string())
            .or_default()
            .joined = true;
    }

    pub async fn mark_parted(&self, channel: &str) {
        if let Some(state) = self.inner.channels.write().await.get_mut(channel) {
            state.joined = false;
        }
    }

    pub async fn set_roomstate(&self, channel: &str, tags: Tags) {
        self.inner
            .channels
            .write()
            .await
            .entry(channel.to_string())
            .or_default()
            .roomstate = tags;
    }

    pub async fn set_userstate(&self, channel: &str, tags: Tags) {
        self.inner
            .channels
            .write()
            .await
            .entry(channel.to_string())
            .or_default()
            .userstate = tags;
    }

    pub async fn reconnect_attempts(&self) -> u32 {
        *self.inner.reconnect_attempts.read().await
    }

    pub async fn increment_reconnect_attempts(&self) -> u32 {
        let mut guard = self.inner.reconnect_attempts.write().await;
        *guard += 1;
        *guard
    }

    pub async fn reset_reconnect_attempts(&self) {
        *self.inner.reconnect_attempts.write().await = 0;
    }

    pub async fn latency(&self) -> Option<Duration> {
        *self.inner.latency.read().await
    }

    pub async fn set_latency(&self, latency: Duration) {
        *self.inner.latency.write().await = Some(latency);
    }

    pub async fn was_close_called(&self) -> bool {
        *self.inner.was_close_called.read().await
    }

    pub async fn set_close_called(&self, value: bool) {
        *self.inner.was_close_called.write().await = value;
    }

    /// Reset per-connection state that does not survive a reconnect, while
    /// preserving `reconnect_attempts` (the supervisor owns that count).
    pub async fn reset_for_reconnect(&self) {
        self.inner.channels.write().await.clear();
        *self.inner.global_userstate.write().await = Tags::new();
        *self.inner.latency.write().await = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn tracks_ready_state_transitions() {
        let state = ClientState::new();
        assert_eq!(state.ready_state().await, ReadyState::Closed);
        state.set_ready_state(ReadyState::Open).await;
        assert!(state.is_open().await);
    }

    #[tokio::test]
    async fn tracks_joined_channels() {
        let state = ClientState::new();
        state.mark_joined("#forsen").await;
        state.mark_joined("#xqc").await;
        let mut channels = state.channels().await;
        channels.sort();
        assert_eq!(channels, vec!["#forsen", "#xqc"]);

        state.mark_parted("#forsen").await;
        assert_eq!(state.channels().await, vec!["#xqc"]);
    }

    #[tokio::test]
    async fn reconnect_attempts_increment_and_reset() {
        let state = ClientState::new();
        assert_eq!(state.increment_reconnect_attempts().await, 1);
        assert_eq!(state.increment_reconnect_attempts().await, 2);
        state.reset_reconnect_attempts().await;
        assert_eq!(state.reconnect_attempts().await, 0);
    }

    #[tokio::test]
    async fn reset_for_reconnect_clears_channels_and_latency() {
        let state = ClientState::new();
        state.mark_joined("#forsen").await;
        state.set_latency(Duration::from_millis(120)).await;
        state.reset_for_reconnect().await;
        assert!(state.channels().await.is_empty());
        assert_eq!(state.latency().await, None);
    }
}
