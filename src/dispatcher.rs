//! Dispatcher (§4.3): routes one parsed [`IRCMessage`] into public events
//! and internal `_promise*` correlation signals.
//!
//! The reference repo's `handle_message` was the direct ancestor of this
//! module — a big `match` on `TwitchIrcCommand` that either replied to PING
//! or printed a `TerminalAction`. This keeps that shape (one function, one
//! match, one arm per command) and replaces "print to the terminal" with
//! "emit a named event", adding the NOTICE-to-promise correlation table the
//! reference never needed because it had no CommandAPI.

use crate::event::{EventEmitter, EventPayload};
use crate::message::{postprocess_tags, IRCMessage};
use crate::state::ClientState;

/// A single NOTICE `msg-id` -> internal promise mapping (§4.3.2).
///
/// The exact `msg-id` catalog is not published by Twitch; this list is
/// assembled from observed chat command replies, per §9's open question
/// ("the set of failure msg-ids is enumerated from observation"). Unmapped
/// ids only ever produce the public `notice` event.
struct NoticeMapping {
    msg_id: &'static str,
    promise_event: &'static str,
    success: bool,
}

macro_rules! notice_table {
    ($(($id:literal, $event:literal, $ok:literal)),* $(,)?) => {
        &[$(NoticeMapping { msg_id: $id, promise_event: $event, success: $ok }),*]
    };
}

#[rustfmt::skip]
const NOTICE_TABLE: &[NoticeMapping] = notice_table![
    ("ban_success", "_promiseBan", true),
    ("already_banned", "_promiseBan", false),
    ("bad_ban_admin", "_promiseBan", false),
    ("bad_ban_anon", "_promiseBan", false),
    ("bad_ban_broadcaster", "_promiseBan", false),
    ("bad_ban_global_mod", "_promiseBan", false),
    ("bad_ban_mod", "_promiseBan", false),
    ("bad_ban_self", "_promiseBan", false),
    ("bad_ban_staff", "_promiseBan", false),
    ("usage_ban", "_promiseBan", false),

    ("unban_success", "_promiseUnban", true),
    ("bad_unban_no_ban", "_promiseUnban", false),
    ("usage_unban", "_promiseUnban", false),

    ("timeout_success", "_promiseTimeout", true),
    ("bad_timeout_admin", "_promiseTimeout", false),
    ("bad_timeout_anon", "_promiseTimeout", false),
    ("bad_timeout_broadcaster", "_promiseTimeout", false),
    ("bad_timeout_duration", "_promiseTimeout", false),
    ("bad_timeout_global_mod", "_promiseTimeout", false),
    ("bad_timeout_mod", "_promiseTimeout", false),
    ("bad_timeout_self", "_promiseTimeout", false),
    ("bad_timeout_staff", "_promiseTimeout", false),
    ("usage_timeout", "_promiseTimeout", false),

    ("untimeout_success", "_promiseUnban", true),
    ("bad_untimeout_admin", "_promiseUnban", false),
    ("bad_untimeout_global_mod", "_promiseUnban", false),
    ("bad_untimeout_self", "_promiseUnban", false),
    ("bad_untimeout_staff", "_promiseUnban", false),

    ("slow_on", "_promiseSlow", true),
    ("usage_slow_on", "_promiseSlow", false),
    ("slow_off", "_promiseSlowoff", true),
    ("usage_slow_off", "_promiseSlowoff", false),

    ("followers_on", "_promiseFollowers", true),
    ("followers_on_zero", "_promiseFollowers", true),
    ("usage_followers_on", "_promiseFollowers", false),
    ("followers_off", "_promiseFollowersoff", true),
    ("usage_followers_off", "_promiseFollowersoff", false),

    ("clear_success", "_promiseClear", true),
    ("usage_clear", "_promiseClear", false),

    ("delete_message_success", "_promiseDeletemessage", true),
    ("bad_delete_message_error", "_promiseDeletemessage", false),
    ("bad_delete_message_broadcaster", "_promiseDeletemessage", false),
    ("bad_delete_message_mod", "_promiseDeletemessage", false),
    ("usage_delete", "_promiseDeletemessage", false),

    ("mod_success", "_promiseMod", true),
    ("usage_mod", "_promiseMod", false),
    ("bad_mod_banned", "_promiseMod", false),
    ("bad_mod_mod", "_promiseMod", false),

    ("unmod_success", "_promiseUnmod", true),
    ("usage_unmod", "_promiseUnmod", false),
    ("bad_unmod_mod", "_promiseUnmod", false),

    ("vip_success", "_promiseVip", true),
    ("usage_vip", "_promiseVip", false),
    ("bad_vip_grantee_banned", "_promiseVip", false),
    ("bad_vip_grantee_already_vip", "_promiseVip", false),
    ("bad_vip_max_vips_reached", "_promiseVip", false),

    ("unvip_success", "_promiseUnvip", true),
    ("usage_unvip", "_promiseUnvip", false),
    ("bad_unvip_grantee_not_vip", "_promiseUnvip", false),

    ("room_mods", "_promiseMods", true),
    ("no_mods", "_promiseMods", true),

    ("room_vips", "_promiseVips", true),
    ("no_vips", "_promiseVips", true),

    ("host_on", "_promiseHost", true),
    ("bad_host_hosting", "_promiseHost", false),
    ("bad_host_rate_exceeded", "_promiseHost", false),
    ("usage_host", "_promiseHost", false),
    ("host_off", "_promiseHostoff", true),
    ("bad_unhost_error", "_promiseHostoff", false),
    ("usage_unhost", "_promiseHostoff", false),

    ("commercial_success", "_promiseCommercial", true),
    ("usage_commercial", "_promiseCommercial", false),
    ("bad_commercial_error", "_promiseCommercial", false),

    ("whisper_banned", "_promiseWhisper", false),
    ("whisper_banned_recipient", "_promiseWhisper", false),
    ("whisper_invalid_login", "_promiseWhisper", false),
    ("whisper_invalid_self", "_promiseWhisper", false),
    ("whisper_limit_per_min", "_promiseWhisper", false),
    ("whisper_limit_per_sec", "_promiseWhisper", false),
    ("whisper_rate_limit", "_promiseWhisper", false),
    ("whisper_restricted_recipient", "_promiseWhisper", false),
];

fn lookup_notice(msg_id: &str) -> Option<&'static NoticeMapping> {
    NOTICE_TABLE.iter().find(|entry| entry.msg_id == msg_id)
}

/// Per-`msg-id` USERNOTICE sub-events (§4.3, `USERNOTICE` row).
fn usernotice_event(msg_id: &str) -> Option<&'static str> {
    match msg_id {
        "sub" => Some("sub"),
        "resub" => Some("resub"),
        "subgift" => Some("subgift"),
        "anonsubgift" => Some("anonsubgift"),
        "submysterygift" => Some("submysterygift"),
        "giftpaidupgrade" => Some("giftpaidupgrade"),
        "rewardgift" => Some("rewardgift"),
        "anongiftpaidupgrade" => Some("anongiftpaidupgrade"),
        "raid" => Some("raid"),
        "unraid" => Some("unraid"),
        "ritual" => Some("ritual"),
        "bitsbadgetier" => Some("bitsbadgetier"),
        _ => None,
    }
}

/// Routes parsed messages to [`EventEmitter`] and keeps [`ClientState`] in
/// sync, per §4.3's table.
#[derive(Clone)]
pub struct Dispatcher {
    events: EventEmitter,
    state: ClientState,
    /// Lowercased nick of the authenticated (or anonymous) identity, used
    /// to compute the `self` flag on JOIN/PART/PRIVMSG events.
    own_nick: String,
}

impl Dispatcher {
    pub fn new(events: EventEmitter, state: ClientState, own_nick: String) -> Self {
        Dispatcher {
            events,
            state,
            own_nick: own_nick.to_lowercase(),
        }
    }

    fn is_self(&self, nick: &str) -> bool {
        nick.eq_ignore_ascii_case(&self.own_nick)
    }

    /// Dispatch one parsed message (§4.3). Tag post-processing happens
    /// first, happens-before every event carrying this message's tags
    /// (§5's ordering guarantee).
    pub async fn dispatch(&self, mut msg: IRCMessage) {
        postprocess_tags(&mut msg.tags);
        tracing::debug!(command = %msg.command, "dispatch");

        match msg.command.as_str() {
            "001" => self.handle_welcome(&msg).await,
            "PONG" => self.handle_pong(&msg).await,
            "JOIN" => self.handle_join_part("join", &msg).await,
            "PART" => self.handle_join_part("part", &msg).await,
            "PRIVMSG" => self.handle_privmsg(&msg).await,
            "WHISPER" => self.handle_whisper(&msg).await,
            "NOTICE" => self.handle_notice(&msg).await,
            "USERNOTICE" => self.handle_usernotice(&msg).await,
            "ROOMSTATE" => self.handle_roomstate(&msg).await,
            "USERSTATE" => self.handle_userstate(&msg).await,
            "GLOBALUSERSTATE" => self.handle_globaluserstate(&msg).await,
            "CLEARCHAT" => self.handle_clearchat(&msg).await,
            "CLEARMSG" => self.handle_clearmsg(&msg).await,
            "HOSTTARGET" => self.handle_hosttarget(&msg).await,
            "RECONNECT" => {
                self.events
                    .emit("reconnect_requested", EventPayload::from_message(msg))
                    .await;
            }
            "421" => self.handle_unknown_command(&msg).await,
            _ => {
                self.events
                    .emit("raw_message", EventPayload::from_message(msg))
                    .await;
            }
        }
    }

    async fn handle_welcome(&self, msg: &IRCMessage) {
        self.state.set_ready_state(crate::state::ReadyState::Open).await;
        let was_reconnect = self.state.reconnect_attempts().await > 0;
        self.state.reset_reconnect_attempts().await;
        self.events
            .emit("connected", EventPayload::from_message(msg.clone()))
            .await;
        if was_reconnect {
            self.events
                .emit("reconnected", EventPayload::from_message(msg.clone()))
                .await;
        }
    }

    async fn handle_pong(&self, msg: &IRCMessage) {
        self.events
            .emit("pong", EventPayload::from_message(msg.clone()))
            .await;
    }

    async fn handle_join_part(&self, event: &str, msg: &IRCMessage) {
        let Some(nick) = msg.prefix_nick() else {
            return;
        };
        let is_self = self.is_self(nick);
        if let Some(channel) = msg.channel() {
            if event == "join" && is_self {
                self.state.mark_joined(channel).await;
            } else if event == "part" && is_self {
                self.state.mark_parted(channel).await;
            }
        }
        self.events
            .emit(event, EventPayload::from_message(msg.clone()).with_self(is_self))
            .await;
    }

    async fn handle_privmsg(&self, msg: &IRCMessage) {
        let is_self = msg.prefix_nick().map(|n| self.is_self(n)).unwrap_or(false);
        let text = msg.trailing().unwrap_or_default();

        if let Some(action_text) = strip_ctcp_action(text) {
            let mut action_msg = msg.clone();
            if let Some(last) = action_msg.params.last_mut() {
                *last = action_text.to_string();
            }
            self.events
                .emit("action", EventPayload::from_message(action_msg).with_self(is_self))
                .await;
        } else if msg.tag("bits").is_some() {
            self.events
                .emit("cheer", EventPayload::from_message(msg.clone()).with_self(is_self))
                .await;
        } else if msg.tag("custom-reward-id").is_some() {
            self.events
                .emit("redeem", EventPayload::from_message(msg.clone()).with_self(is_self))
                .await;
        } else {
            self.events
                .emit("chat", EventPayload::from_message(msg.clone()).with_self(is_self))
                .await;
        }

        self.events
            .emit("message", EventPayload::from_message(msg.clone()).with_self(is_self))
            .await;
    }

    async fn handle_whisper(&self, msg: &IRCMessage) {
        let is_self = msg.prefix_nick().map(|n| self.is_self(n)).unwrap_or(false);
        self.events
            .emit("whisper", EventPayload::from_message(msg.clone()).with_self(is_self))
            .await;
    }

    async fn handle_notice(&self, msg: &IRCMessage) {
        self.events
            .emit("notice", EventPayload::from_message(msg.clone()))
            .await;

        // Twitch's login-failure NOTICE carries no `msg-id` — target `*`
        // plus this exact text is the only signal it gives (§7). Caught
        // before the `msg-id` branch below, which would otherwise return
        // early and let a bad OAuth token masquerade as an ordinary drop.
        if msg.params.first().map(String::as_str) == Some("*")
            && msg.trailing() == Some("Login authentication failed")
        {
            let err = crate::error::Error::Authentication;
            tracing::warn!(error = %err, "login NOTICE reported authentication failure");
            self.events
                .emit("auth_failed", EventPayload::from_message(msg.clone()))
                .await;
            return;
        }

        let Some(msg_id) = msg.tag_str("msg-id") else {
            return;
        };
        let Some(mapping) = lookup_notice(msg_id) else {
            return;
        };
        let text = if mapping.success {
            EventPayload::from_text([""])
        } else {
            EventPayload::from_text([msg_id])
        };
        let mut payload = text;
        payload.message = Some(msg.clone());
        self.events.emit(mapping.promise_event, payload).await;
    }

    async fn handle_usernotice(&self, msg: &IRCMessage) {
        self.events
            .emit("usernotice", EventPayload::from_message(msg.clone()))
            .await;
        if let Some(msg_id) = msg.tag_str("msg-id") {
            if let Some(event) = usernotice_event(msg_id) {
                self.events
                    .emit(event, EventPayload::from_message(msg.clone()))
                    .await;
            }
        }
    }

    async fn handle_roomstate(&self, msg: &IRCMessage) {
        let Some(channel) = msg.channel() else { return };
        self.state.set_roomstate(channel, msg.tags.clone()).await;
        self.events
            .emit("roomstate", EventPayload::from_message(msg.clone()))
            .await;
        for (tag, event) in [
            ("slow", "slow"),
            ("followers-only", "followersonly"),
            ("subs-only", "subscribers"),
            ("emote-only", "emoteonly"),
            ("r9k", "r9kbeta"),
        ] {
            if msg.tag(tag).is_some() {
                self.events
                    .emit(event, EventPayload::from_message(msg.clone()))
                    .await;
            }
        }
    }

    async fn handle_userstate(&self, msg: &IRCMessage) {
        if let Some(channel) = msg.channel() {
            self.state.set_userstate(channel, msg.tags.clone()).await;
        }
        self.events
            .emit("userstate", EventPayload::from_message(msg.clone()))
            .await;
    }

    async fn handle_globaluserstate(&self, msg: &IRCMessage) {
        self.state.set_global_userstate(msg.tags.clone()).await;
        self.events
            .emit("globaluserstate", EventPayload::from_message(msg.clone()))
            .await;
    }

    async fn handle_clearchat(&self, msg: &IRCMessage) {
        if msg.tag("target-user-id").is_some() {
            let event = if msg.tag("ban-duration").is_some() {
                "timeout"
            } else {
                "ban"
            };
            self.events
                .emit(event, EventPayload::from_message(msg.clone()))
                .await;
        } else {
            self.events
                .emit("clearchat", EventPayload::from_message(msg.clone()))
                .await;
        }
    }

    async fn handle_clearmsg(&self, msg: &IRCMessage) {
        self.events
            .emit("messagedeleted", EventPayload::from_message(msg.clone()))
            .await;
    }

    async fn handle_hosttarget(&self, msg: &IRCMessage) {
        let target = msg.trailing().unwrap_or_default();
        let event = if target.starts_with('-') || target == "- 0" {
            "unhost"
        } else {
            "hosting"
        };
        self.events
            .emit(event, EventPayload::from_message(msg.clone()))
            .await;
    }

    async fn handle_unknown_command(&self, msg: &IRCMessage) {
        tracing::warn!(params = ?msg.params, "server reported unknown command");
        self.events
            .emit("raw_message", EventPayload::from_message(msg.clone()))
            .await;
    }
}

/// Strip a `\x01ACTION ... \x01` CTCP wrapper (§4.3.1), returning the inner
/// text if `text` is wrapped, `None` otherwise.
fn strip_ctcp_action(text: &str) -> Option<&str> {
    let inner = text.strip_prefix('\u{1}')?.strip_suffix('\u{1}')?;
    inner.strip_prefix("ACTION ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::parse_line;

    async fn dispatcher_for(nick: &str) -> (Dispatcher, EventEmitter) {
        let events = EventEmitter::new();
        let state = ClientState::new();
        (Dispatcher::new(events.clone(), state, nick.to_string()), events)
    }

    #[tokio::test]
    async fn chat_dispatch_scenario() {
        let (dispatcher, events) = dispatcher_for("bot").await;
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        events
            .on("chat", move |payload| {
                let _ = tx.send(payload.clone());
            })
            .await;

        let msg = parse_line(
            "@badges=broadcaster/1;color=#FF0000;display-name=Alice;user-id=42 :alice!alice@alice.tmi.twitch.tv PRIVMSG #room :hi",
        )
        .unwrap();
        dispatcher.dispatch(msg).await;

        let payload = rx.recv().await.unwrap();
        assert!(!payload.is_self);
        let received = payload.message.unwrap();
        assert_eq!(received.channel(), Some("#room"));
        assert_eq!(received.trailing(), Some("hi"));
        let badges = received.tag("badges").unwrap().as_badges().unwrap();
        assert_eq!(badges, &[("broadcaster".to_string(), "1".to_string())]);
    }

    #[tokio::test]
    async fn action_strips_ctcp_wrapper() {
        let (dispatcher, events) = dispatcher_for("bot").await;
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        events
            .on("action", move |payload| {
                let _ = tx.send(payload.clone());
            })
            .await;

        let msg = parse_line(":b!b@b PRIVMSG #r :\u{1}ACTION waves\u{1}").unwrap();
        dispatcher.dispatch(msg).await;

        let payload = rx.recv().await.unwrap();
        let received = payload.message.unwrap();
        assert_eq!(received.trailing(), Some("waves"));
        assert!(!received.trailing().unwrap().contains('\u{1}'));
    }

    #[tokio::test]
    async fn ban_success_notice_resolves_promise() {
        let (dispatcher, events) = dispatcher_for("bot").await;
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        events
            .on("_promiseBan", move |payload| {
                let _ = tx.send(payload.clone());
            })
            .await;

        let msg = parse_line("@msg-id=ban_success :tmi.twitch.tv NOTICE #r :victim is banned.").unwrap();
        dispatcher.dispatch(msg).await;

        let payload = rx.recv().await.unwrap();
        assert_eq!(payload.text, vec![""]);
    }

    #[tokio::test]
    async fn ban_failure_notice_carries_msg_id() {
        let (dispatcher, events) = dispatcher_for("bot").await;
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        events
            .on("_promiseBan", move |payload| {
                let _ = tx.send(payload.clone());
            })
            .await;

        let msg = parse_line("@msg-id=bad_ban_self :tmi.twitch.tv NOTICE #r :You cannot ban yourself.").unwrap();
        dispatcher.dispatch(msg).await;

        let payload = rx.recv().await.unwrap();
        assert_eq!(payload.text, vec!["bad_ban_self"]);
    }

    #[tokio::test]
    async fn unmapped_msg_id_only_emits_public_notice() {
        let (dispatcher, events) = dispatcher_for("bot").await;
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        events
            .on("notice", move |payload| {
                let _ = tx.send(payload.clone());
            })
            .await;

        let msg = parse_line("@msg-id=totally_unknown_id :tmi.twitch.tv NOTICE #r :huh").unwrap();
        dispatcher.dispatch(msg).await;
        assert!(rx.recv().await.is_some());
    }

    #[tokio::test]
    async fn own_privmsg_sets_is_self_flag() {
        let (dispatcher, events) = dispatcher_for("bot").await;
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        events
            .on("chat", move |payload| {
                let _ = tx.send(payload.clone());
            })
            .await;

        let msg = parse_line(":Bot!bot@bot.tmi.twitch.tv PRIVMSG #room :hello").unwrap();
        dispatcher.dispatch(msg).await;

        let payload = rx.recv().await.unwrap();
        assert!(payload.is_self);
    }

    #[tokio::test]
    async fn login_failure_notice_emits_auth_failed() {
        let (dispatcher, events) = dispatcher_for("bot").await;
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        events
            .on("auth_failed", move |payload| {
                let _ = tx.send(payload.clone());
            })
            .await;

        let msg = parse_line(":tmi.twitch.tv NOTICE * :Login authentication failed").unwrap();
        dispatcher.dispatch(msg).await;

        assert!(rx.recv().await.is_some());
    }
}
