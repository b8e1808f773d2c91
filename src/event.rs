//! Event emitter (§4.2): `on`/`once`/`off`/`emit`, with snapshot-before-dispatch
//! semantics so a listener may unregister itself or others mid-emit.
//!
//! The reference repo never had a pub/sub layer of its own — `handle_message`
//! matched directly on a parsed command and wrote to the terminal inline.
//! This is the generalization the spec's event-driven surface (§4.2, §4.6's
//! `_promise*` correlation) needs in its place, built the way the rest of
//! this crate is built: a `Mutex`-guarded registry plus `tokio::spawn` for
//! the async half of dispatch, matching how [`crate::queue`] and
//! [`crate::connection`] hand work to the runtime.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{oneshot, Mutex};

use crate::message::IRCMessage;

/// The payload carried by every emitted event. Most events carry the
/// [`IRCMessage`] that triggered them (§4.2); a handful of synthetic events
/// (e.g. `"connected"`, `"disconnected"`) carry only the structured extras.
#[derive(Debug, Clone, Default)]
pub struct EventPayload {
    pub message: Option<IRCMessage>,
    pub text: Vec<String>,
    /// True when the message's sender is the client's own identity (§4.3.1,
    /// §4.3's JOIN/PART rows). `false` for synthetic events with no sender.
    pub is_self: bool,
}

impl EventPayload {
    pub fn from_message(message: IRCMessage) -> Self {
        EventPayload {
            message: Some(message),
            text: Vec::new(),
            is_self: false,
        }
    }

    pub fn from_text(text: impl IntoIterator<Item = impl Into<String>>) -> Self {
        EventPayload {
            message: None,
            text: text.into_iter().map(Into::into).collect(),
            is_self: false,
        }
    }

    /// Attach the `self` flag (§4.3.1) to a payload built via
    /// [`EventPayload::from_message`].
    pub fn with_self(mut self, is_self: bool) -> Self {
        self.is_self = is_self;
        self
    }
}

type SyncListener = Box<dyn Fn(&EventPayload) + Send + Sync>;
type AsyncListener =
    Box<dyn Fn(EventPayload) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

enum Listener {
    Sync(SyncListener),
    Async(AsyncListener),
}

struct Registration {
    id: u64,
    once: bool,
    listener: Listener,
}

/// Synchronous and async pub/sub, keyed by event name.
///
/// Dispatch takes a snapshot of the registrations for an event before
/// invoking any of them, so a listener that calls [`EventEmitter::off`] (on
/// itself or another listener) during `emit` never invalidates the
/// in-progress dispatch — the snapshot, not the live registry, drives it.
#[derive(Clone)]
pub struct EventEmitter {
    listeners: Arc<Mutex<HashMap<String, Vec<Registration>>>>,
    next_id: Arc<AtomicU64>,
}

/// A handle returned by `on`/`once`, usable with [`EventEmitter::off`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListenerId(u64);

impl Default for EventEmitter {
    fn default() -> Self {
        Self::new()
    }
}

impl EventEmitter {
    pub fn new() -> Self {
        EventEmitter {
            listeners: Arc::new(Mutex::new(HashMap::new())),
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    fn alloc_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Register a synchronous listener, invoked inline during `emit`.
    pub async fn on<F>(&self, event: impl Into<String>, listener: F) -> ListenerId
    where
        F: Fn(&EventPayload) + Send + Sync + 'static,
    {
        self.register(event, false, Listener::Sync(Box::new(listener)))
            .await
    }

    /// Register an async listener, scheduled via `tokio::spawn` during `emit`.
    pub async fn on_async<F, Fut>(&self, event: impl Into<String>, listener: F) -> ListenerId
    where
        F: Fn(EventPayload) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.register(
            event,
            false,
            Listener::Async(Box::new(move |payload| Box::pin(listener(payload)))),
        )
        .await
    }

    /// Register a synchronous listener that fires at most once, then
    /// unregisters itself.
    pub async fn once<F>(&self, event: impl Into<String>, listener: F) -> ListenerId
    where
        F: Fn(&EventPayload) + Send + Sync + 'static,
    {
        self.register(event, true, Listener::Sync(Box::new(listener)))
            .await
    }

    async fn register(&self, event: impl Into<String>, once: bool, listener: Listener) -> ListenerId {
        let id = self.alloc_id();
        let mut guard = self.listeners.lock().await;
        guard
            .entry(event.into())
            .or_default()
            .push(Registration { id, once, listener });
        ListenerId(id)
    }

    /// Remove a single listener by its [`ListenerId`].
    pub async fn off(&self, event: &str, id: ListenerId) {
        let mut guard = self.listeners.lock().await;
        if let Some(regs) = guard.get_mut(event) {
            regs.retain(|r| r.id != id.0);
        }
    }

    /// Remove every listener registered for `event`.
    pub async fn off_all(&self, event: &str) {
        self.listeners.lock().await.remove(event);
    }

    /// Emit `event` with `payload` to every currently-registered listener.
    ///
    /// Drains the event's registrations into a local snapshot under the
    /// lock, releases the lock, then invokes each listener in registration
    /// order — so a listener calling back into `on`/`off`/`emit` (e.g. a
    /// `once` listener unregistering a sibling) can't deadlock on the
    /// registry mutex, and can't see its own emit's listeners added or
    /// removed mid-dispatch. Non-`once` listeners are reinserted afterward.
    pub async fn emit(&self, event: &str, payload: EventPayload) {
        let snapshot = {
            let mut guard = self.listeners.lock().await;
            match guard.get_mut(event) {
                Some(regs) => std::mem::take(regs),
                None => return,
            }
        };

        let mut persistent = Vec::with_capacity(snapshot.len());
        for reg in snapshot {
            run_listener(&reg.listener, &payload).await;
            if !reg.once {
                persistent.push(reg);
            }
        }

        if !persistent.is_empty() {
            let mut guard = self.listeners.lock().await;
            guard.entry(event.to_string()).or_default().extend(persistent);
        }
    }

    /// Emit the same payload under several event names (§4.2, used by the
    /// Dispatcher to fire both a specific command event and a catch-all).
    pub async fn emit_many(&self, events: &[&str], payload: EventPayload) {
        for event in events {
            self.emit(event, payload.clone()).await;
        }
    }

    /// Await the next occurrence of `event`, or `None` if `timeout` elapses
    /// first. Used by [`crate::commands`] to correlate outgoing commands
    /// with their NOTICE/PONG/JOIN replies.
    pub async fn wait_for(
        &self,
        event: &str,
        timeout: std::time::Duration,
    ) -> Option<EventPayload> {
        let (tx, rx) = oneshot::channel();
        let tx = std::sync::Mutex::new(Some(tx));
        let id = self
            .once(event.to_string(), move |payload| {
                if let Ok(mut slot) = tx.lock() {
                    if let Some(tx) = slot.take() {
                        let _ = tx.send(payload.clone());
                    }
                }
            })
            .await;

        let result = tokio::time::timeout(timeout, rx).await;
        self.off(event, id).await;
        match result {
            Ok(Ok(payload)) => Some(payload),
            _ => None,
        }
    }

    /// Like [`EventEmitter::wait_for`], but only resolves on the first
    /// occurrence matching `predicate` — other emissions of `event` are
    /// ignored rather than consumed. Used by [`crate::commands`] to
    /// correlate a self JOIN/PART among JOINs/PARTs from other users on the
    /// same channel.
    pub async fn wait_for_match<F>(
        &self,
        event: &str,
        timeout: std::time::Duration,
        predicate: F,
    ) -> Option<EventPayload>
    where
        F: Fn(&EventPayload) -> bool + Send + Sync + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let tx = std::sync::Mutex::new(Some(tx));
        let id = self
            .on(event.to_string(), move |payload| {
                if !predicate(payload) {
                    return;
                }
                if let Ok(mut slot) = tx.lock() {
                    if let Some(tx) = slot.take() {
                        let _ = tx.send(payload.clone());
                    }
                }
            })
            .await;

        let result = tokio::time::timeout(timeout, rx).await;
        self.off(event, id).await;
        match result {
            Ok(Ok(payload)) => Some(payload),
            _ => None,
        }
    }
}

async fn run_listener(listener: &Listener, payload: &EventPayload) {
    match listener {
        Listener::Sync(f) => f(payload),
        Listener::Async(f) => {
            let fut = f(payload.clone());
            tokio::spawn(fut);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    #[tokio::test]
    async fn on_listener_receives_emitted_payload() {
        let emitter = EventEmitter::new();
        let seen = Arc::new(AtomicUsize::new(0));
        let seen2 = seen.clone();
        emitter
            .on("chat", move |_payload| {
                seen2.fetch_add(1, Ordering::SeqCst);
            })
            .await;

        emitter.emit("chat", EventPayload::default()).await;
        emitter.emit("chat", EventPayload::default()).await;
        assert_eq!(seen.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn once_listener_fires_a_single_time() {
        let emitter = EventEmitter::new();
        let seen = Arc::new(AtomicUsize::new(0));
        let seen2 = seen.clone();
        emitter
            .once("join", move |_payload| {
                seen2.fetch_add(1, Ordering::SeqCst);
            })
            .await;

        emitter.emit("join", EventPayload::default()).await;
        emitter.emit("join", EventPayload::default()).await;
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn off_removes_a_specific_listener() {
        let emitter = EventEmitter::new();
        let seen = Arc::new(AtomicUsize::new(0));
        let seen2 = seen.clone();
        let id = emitter
            .on("part", move |_payload| {
                seen2.fetch_add(1, Ordering::SeqCst);
            })
            .await;

        emitter.off("part", id).await;
        emitter.emit("part", EventPayload::default()).await;
        assert_eq!(seen.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn events_are_isolated_by_name() {
        let emitter = EventEmitter::new();
        let seen = Arc::new(AtomicUsize::new(0));
        let seen2 = seen.clone();
        emitter
            .on("a", move |_payload| {
                seen2.fetch_add(1, Ordering::SeqCst);
            })
            .await;

        emitter.emit("b", EventPayload::default()).await;
        assert_eq!(seen.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn wait_for_resolves_on_matching_emit() {
        let emitter = EventEmitter::new();
        let emitter2 = emitter.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            emitter2
                .emit("_promiseBan", EventPayload::from_text(["ok"]))
                .await;
        });

        let result = emitter
            .wait_for("_promiseBan", Duration::from_millis(500))
            .await;
        assert!(result.is_some());
    }

    #[tokio::test]
    async fn wait_for_times_out_without_emit() {
        let emitter = EventEmitter::new();
        let result = emitter
            .wait_for("_promiseBan", Duration::from_millis(20))
            .await;
        assert!(result.is_none());
    }
}
