//! CommandAPI (§4.6): primitive operations that format an IRC line, push it
//! through the right queue, and (when the wire protocol provides one)
//! await the correlated NOTICE/PONG/JOIN before resolving.
//!
//! The five-step template in §4.6 is centralized in [`Commands::transact`]
//! and [`Commands::fire_and_forget`] so each primitive below reads as just
//! "format this line, wait for that event" — mirroring how the reference
//! repo's `stringify_message` kept wire formatting in one place rather than
//! inlining `format!` calls at every call site.

use std::sync::{Arc, RwLock as StdRwLock};
use std::time::{Duration, Instant};

use crate::config::{normalize_channel, ClientConfig};
use crate::error::{Error, Result};
use crate::event::EventEmitter;
use crate::queue::MessageQueue;
use crate::state::ClientState;

/// Maximum PRIVMSG body size in bytes before pagination kicks in (§4.6).
const MAX_MESSAGE_BYTES: usize = 500;

pub struct Commands {
    config: Arc<ClientConfig>,
    state: ClientState,
    events: EventEmitter,
    join_queue: Arc<MessageQueue>,
    privmsg_queue: Arc<MessageQueue>,
    command_queue: Arc<MessageQueue>,
    writer_slot: Arc<StdRwLock<Option<Arc<crate::connection::Writer>>>>,
}

impl Commands {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: Arc<ClientConfig>,
        state: ClientState,
        events: EventEmitter,
        join_queue: Arc<MessageQueue>,
        privmsg_queue: Arc<MessageQueue>,
        command_queue: Arc<MessageQueue>,
        writer_slot: Arc<StdRwLock<Option<Arc<crate::connection::Writer>>>>,
    ) -> Self {
        Commands {
            config,
            state,
            events,
            join_queue,
            privmsg_queue,
            command_queue,
            writer_slot,
        }
    }

    async fn require_open(&self) -> Result<()> {
        if !self.state.is_open().await {
            return Err(Error::NotConnected);
        }
        Ok(())
    }

    fn require_authenticated(&self) -> Result<()> {
        if self.config.identity.is_anonymous() {
            return Err(Error::Anonymous);
        }
        Ok(())
    }

    fn enqueue_line(&self, queue: &Arc<MessageQueue>, line: String) -> Result<()> {
        let writer_slot = self.writer_slot.clone();
        queue.add(move || {
            let Some(writer) = writer_slot.read().unwrap().clone() else {
                return Err(Error::NotConnected);
            };
            tokio::spawn(async move {
                if let Err(err) = writer.write_line(&line).await {
                    tracing::warn!(error = %err, "failed to send queued line");
                }
            });
            Ok(())
        })
    }

    /// Steps 1-4 of §4.6's template, plus step 5 when `promise_event` is
    /// `Some`: await the correlated internal event with `command_timeout`,
    /// translating its payload into success or [`Error::CommandFailed`].
    async fn transact(
        &self,
        channel: &str,
        queue: &Arc<MessageQueue>,
        line: String,
        restricted: bool,
        promise_event: Option<&'static str>,
    ) -> Result<()> {
        let channel = normalize_channel(channel);
        self.require_open().await?;
        if restricted {
            self.require_authenticated()?;
        }

        let wait = promise_event.map(|event| {
            let events = self.events.clone();
            let timeout = self.config.command_timeout();
            (event, events, timeout)
        });

        self.enqueue_line(queue, line)?;

        if let Some((event, events, timeout)) = wait {
            match events.wait_for(event, timeout).await {
                None => Err(Error::CommandTimeout),
                Some(payload) => match payload.text.first().map(|s| s.as_str()) {
                    Some("") | None => Ok(()),
                    Some(msg_id) => Err(Error::CommandFailed {
                        msg_id: msg_id.to_string(),
                        channel,
                    }),
                },
            }
        } else {
            Ok(())
        }
    }

    /// Commands with no server reply to await: format, check, enqueue, done.
    async fn fire_and_forget(
        &self,
        channel: &str,
        queue: &Arc<MessageQueue>,
        line: String,
        restricted: bool,
    ) -> Result<()> {
        self.require_open().await?;
        if restricted {
            self.require_authenticated()?;
        }
        self.enqueue_line(queue, line)
    }

    /// Split `text` into chunks no longer than [`MAX_MESSAGE_BYTES`] bytes,
    /// on a UTF-8 char boundary (§4.6's pagination rule).
    fn paginate(text: &str) -> Vec<String> {
        if text.len() <= MAX_MESSAGE_BYTES {
            return vec![text.to_string()];
        }
        let mut chunks = Vec::new();
        let mut start = 0;
        while start < text.len() {
            let mut end = (start + MAX_MESSAGE_BYTES).min(text.len());
            while end > start && !text.is_char_boundary(end) {
                end -= 1;
            }
            chunks.push(text[start..end].to_string());
            start = end;
        }
        chunks
    }

    async fn send_privmsg(&self, channel: &str, prefix: &str, body: &str) -> Result<()> {
        let channel = normalize_channel(channel);
        self.require_open().await?;
        self.require_authenticated()?;
        for chunk in Self::paginate(body) {
            let line = format!("{prefix}PRIVMSG {channel} :{chunk}");
            self.enqueue_line(&self.privmsg_queue, line)?;
        }
        Ok(())
    }

    /// `say` (§4.6): plain chat message.
    pub async fn say(&self, channel: &str, message: &str) -> Result<()> {
        self.send_privmsg(channel, "", message).await
    }

    /// `action`/`me` (§4.6, §10.5 dedup note): wraps the body in the
    /// `\x01ACTION ... \x01` CTCP envelope; shares `send_privmsg`'s
    /// pagination with `say` rather than duplicating it.
    pub async fn action(&self, channel: &str, message: &str) -> Result<()> {
        let wrapped = format!("\u{1}ACTION {message}\u{1}");
        self.send_privmsg(channel, "", &wrapped).await
    }

    /// `reply` (§4.6, §10.5): attaches `reply-parent-msg-id`.
    pub async fn reply(&self, channel: &str, parent_msg_id: &str, message: &str) -> Result<()> {
        let prefix = format!("@reply-parent-msg-id={parent_msg_id} ");
        self.send_privmsg(channel, &prefix, message).await
    }

    /// `whisper` (§4.6): sent as a `/w` PRIVMSG to one's own channel.
    ///
    /// Twitch only NOTICEs whisper *failures*; there is no success NOTICE.
    /// A clean `command_timeout` elapse with no failure NOTICE is therefore
    /// treated as success here, not as [`Error::CommandTimeout`] — the only
    /// signal that ever arrives for this command is a negative one.
    pub async fn whisper(&self, user: &str, message: &str) -> Result<()> {
        self.require_open().await?;
        self.require_authenticated()?;
        let own_channel = format!("#{}", self.config.identity.nick());
        let line = format!("PRIVMSG {own_channel} :/w {user} {message}");
        self.enqueue_line(&self.privmsg_queue, line)?;

        match self
            .events
            .wait_for("_promiseWhisper", self.config.command_timeout())
            .await
        {
            None => Ok(()),
            Some(payload) => match payload.text.first().map(|s| s.as_str()) {
                Some("") | None => Ok(()),
                Some(msg_id) => Err(Error::CommandFailed {
                    msg_id: msg_id.to_string(),
                    channel: own_channel,
                }),
            },
        }
    }

    pub async fn ban(&self, channel: &str, user: &str, reason: Option<&str>) -> Result<()> {
        let reason = reason.unwrap_or_default();
        let line = format!("PRIVMSG {} :/ban {user} {reason}", normalize_channel(channel));
        self.transact(channel, &self.command_queue, line, true, Some("_promiseBan"))
            .await
    }

    pub async fn unban(&self, channel: &str, user: &str) -> Result<()> {
        let line = format!("PRIVMSG {} :/unban {user}", normalize_channel(channel));
        self.transact(channel, &self.command_queue, line, true, Some("_promiseUnban"))
            .await
    }

    pub async fn timeout(
        &self,
        channel: &str,
        user: &str,
        seconds: u64,
        reason: Option<&str>,
    ) -> Result<()> {
        let reason = reason.unwrap_or_default();
        let line = format!(
            "PRIVMSG {} :/timeout {user} {seconds} {reason}",
            normalize_channel(channel)
        );
        self.transact(channel, &self.command_queue, line, true, Some("_promiseTimeout"))
            .await
    }

    pub async fn untimeout(&self, channel: &str, user: &str) -> Result<()> {
        let line = format!("PRIVMSG {} :/untimeout {user}", normalize_channel(channel));
        self.transact(channel, &self.command_queue, line, true, Some("_promiseUnban"))
            .await
    }

    pub async fn slow(&self, channel: &str, seconds: u64) -> Result<()> {
        let line = format!("PRIVMSG {} :/slow {seconds}", normalize_channel(channel));
        self.transact(channel, &self.command_queue, line, true, Some("_promiseSlow"))
            .await
    }

    pub async fn slowoff(&self, channel: &str) -> Result<()> {
        let line = format!("PRIVMSG {} :/slowoff", normalize_channel(channel));
        self.transact(channel, &self.command_queue, line, true, Some("_promiseSlowoff"))
            .await
    }

    pub async fn followersonly(&self, channel: &str, minutes: u64) -> Result<()> {
        let line = format!("PRIVMSG {} :/followers {minutes}", normalize_channel(channel));
        self.transact(channel, &self.command_queue, line, true, Some("_promiseFollowers"))
            .await
    }

    pub async fn followersonlyoff(&self, channel: &str) -> Result<()> {
        let line = format!("PRIVMSG {} :/followersoff", normalize_channel(channel));
        self.transact(channel, &self.command_queue, line, true, Some("_promiseFollowersoff"))
            .await
    }

    pub async fn emoteonly(&self, channel: &str) -> Result<()> {
        let line = format!("PRIVMSG {} :/emoteonly", normalize_channel(channel));
        self.fire_and_forget(channel, &self.command_queue, line, true).await
    }

    pub async fn emoteonlyoff(&self, channel: &str) -> Result<()> {
        let line = format!("PRIVMSG {} :/emoteonlyoff", normalize_channel(channel));
        self.fire_and_forget(channel, &self.command_queue, line, true).await
    }

    pub async fn subscribers(&self, channel: &str) -> Result<()> {
        let line = format!("PRIVMSG {} :/subscribers", normalize_channel(channel));
        self.fire_and_forget(channel, &self.command_queue, line, true).await
    }

    pub async fn subscribersoff(&self, channel: &str) -> Result<()> {
        let line = format!("PRIVMSG {} :/subscribersoff", normalize_channel(channel));
        self.fire_and_forget(channel, &self.command_queue, line, true).await
    }

    pub async fn r9kbeta(&self, channel: &str) -> Result<()> {
        let line = format!("PRIVMSG {} :/r9kbeta", normalize_channel(channel));
        self.fire_and_forget(channel, &self.command_queue, line, true).await
    }

    pub async fn r9kbetaoff(&self, channel: &str) -> Result<()> {
        let line = format!("PRIVMSG {} :/r9kbetaoff", normalize_channel(channel));
        self.fire_and_forget(channel, &self.command_queue, line, true).await
    }

    pub async fn clear(&self, channel: &str) -> Result<()> {
        let line = format!("PRIVMSG {} :/clear", normalize_channel(channel));
        self.transact(channel, &self.command_queue, line, true, Some("_promiseClear"))
            .await
    }

    pub async fn delete_message(&self, channel: &str, message_uuid: &str) -> Result<()> {
        let line = format!("PRIVMSG {} :/delete {message_uuid}", normalize_channel(channel));
        self.transact(channel, &self.command_queue, line, true, Some("_promiseDeletemessage"))
            .await
    }

    pub async fn mod_user(&self, channel: &str, user: &str) -> Result<()> {
        let line = format!("PRIVMSG {} :/mod {user}", normalize_channel(channel));
        self.transact(channel, &self.command_queue, line, true, Some("_promiseMod"))
            .await
    }

    pub async fn unmod_user(&self, channel: &str, user: &str) -> Result<()> {
        let line = format!("PRIVMSG {} :/unmod {user}", normalize_channel(channel));
        self.transact(channel, &self.command_queue, line, true, Some("_promiseUnmod"))
            .await
    }

    pub async fn vip(&self, channel: &str, user: &str) -> Result<()> {
        let line = format!("PRIVMSG {} :/vip {user}", normalize_channel(channel));
        self.transact(channel, &self.command_queue, line, true, Some("_promiseVip"))
            .await
    }

    pub async fn unvip(&self, channel: &str, user: &str) -> Result<()> {
        let line = format!("PRIVMSG {} :/unvip {user}", normalize_channel(channel));
        self.transact(channel, &self.command_queue, line, true, Some("_promiseUnvip"))
            .await
    }

    /// `mods` (§4.6, §9 open question): the reply is free-form English
    /// ("The moderators of this channel are: a, b, c" or "There are no
    /// moderators of this channel."). Parsed best-effort; an unrecognized
    /// reply yields an empty list rather than an error.
    pub async fn mods(&self, channel: &str) -> Result<Vec<String>> {
        self.list_command(channel, "/mods", "_promiseMods").await
    }

    pub async fn vips(&self, channel: &str) -> Result<Vec<String>> {
        self.list_command(channel, "/vips", "_promiseVips").await
    }

    async fn list_command(
        &self,
        channel: &str,
        command: &str,
        promise_event: &'static str,
    ) -> Result<Vec<String>> {
        let channel_norm = normalize_channel(channel);
        self.require_open().await?;
        self.require_authenticated()?;
        let line = format!("PRIVMSG {channel_norm} :{command}");
        self.enqueue_line(&self.command_queue, line)?;

        let timeout = self.config.command_timeout();
        match self.events.wait_for(promise_event, timeout).await {
            None => Err(Error::CommandTimeout),
            Some(payload) => {
                let text = payload
                    .message
                    .as_ref()
                    .and_then(|m| m.trailing())
                    .unwrap_or_default();
                Ok(parse_user_list(text))
            }
        }
    }

    /// `host` (§4.6): returns `(channel, target, remaining)`. `remaining` is
    /// the viewer count Twitch's success NOTICE sometimes reports ("Now
    /// hosting <target> for up to <remaining> viewers.") — `None` when the
    /// reply omits it, which it usually does.
    pub async fn host(&self, channel: &str, target: &str) -> Result<(String, String, Option<u32>)> {
        let channel_norm = normalize_channel(channel);
        self.require_open().await?;
        self.require_authenticated()?;
        let line = format!("PRIVMSG {channel_norm} :/host {target}");
        self.enqueue_line(&self.command_queue, line)?;

        let timeout = self.config.command_timeout();
        match self.events.wait_for("_promiseHost", timeout).await {
            None => Err(Error::CommandTimeout),
            Some(payload) => match payload.text.first().map(|s| s.as_str()) {
                Some("") | None => {
                    let remaining = payload
                        .message
                        .as_ref()
                        .and_then(|m| m.trailing())
                        .and_then(parse_remaining_viewers);
                    Ok((channel_norm, target.to_string(), remaining))
                }
                Some(msg_id) => Err(Error::CommandFailed {
                    msg_id: msg_id.to_string(),
                    channel: channel_norm,
                }),
            },
        }
    }

    pub async fn unhost(&self, channel: &str) -> Result<()> {
        let line = format!("PRIVMSG {} :/unhost", normalize_channel(channel));
        self.transact(channel, &self.command_queue, line, true, Some("_promiseHostoff"))
            .await
    }

    pub async fn commercial(&self, channel: &str, seconds: u64) -> Result<()> {
        let line = format!("PRIVMSG {} :/commercial {seconds}", normalize_channel(channel));
        self.transact(channel, &self.command_queue, line, true, Some("_promiseCommercial"))
            .await
    }

    /// `join`/`part` (§4.6): awaits a self JOIN/PART, not a NOTICE.
    pub async fn join(&self, channel: &str) -> Result<()> {
        let channel = normalize_channel(channel);
        let line = format!("JOIN {channel}");
        self.enqueue_line(&self.join_queue, line)?;
        self.await_self_membership_event("join", &channel).await
    }

    pub async fn part(&self, channel: &str) -> Result<()> {
        let channel = normalize_channel(channel);
        self.require_open().await?;
        let line = format!("PART {channel}");
        self.enqueue_line(&self.join_queue, line)?;
        self.await_self_membership_event("part", &channel).await
    }

    async fn await_self_membership_event(&self, event: &'static str, channel: &str) -> Result<()> {
        let own_nick = self.config.identity.nick();
        let channel = channel.to_string();
        let timeout = self.config.command_timeout();
        let matched = self
            .events
            .wait_for_match(event, timeout, move |payload| {
                let Some(msg) = &payload.message else { return false };
                msg.channel() == Some(channel.as_str())
                    && msg.prefix_nick().map(|n| n.eq_ignore_ascii_case(&own_nick)).unwrap_or(false)
            })
            .await;
        match matched {
            Some(_) => Ok(()),
            None => Err(Error::CommandTimeout),
        }
    }

    /// `ping` (§4.6, §10.5): round-trips a PING/PONG pair and records the
    /// measured latency on [`ClientState`].
    pub async fn ping(&self) -> Result<Duration> {
        self.require_open().await?;
        let sent_at = Instant::now();
        self.enqueue_line(&self.command_queue, "PING :tmi.twitch.tv".to_string())?;
        match self.events.wait_for("pong", self.config.command_timeout()).await {
            None => Err(Error::CommandTimeout),
            Some(_) => {
                let latency = sent_at.elapsed();
                self.state.set_latency(latency).await;
                Ok(latency)
            }
        }
    }

    /// `raw` (§4.6): send a literal line unmodified.
    pub async fn raw(&self, line: &str) -> Result<()> {
        self.require_open().await?;
        self.enqueue_line(&self.command_queue, line.to_string())
    }
}

/// Pull the optional "for up to N viewers" count out of a `host_on` NOTICE
/// body. Best-effort like [`parse_user_list`]: any shape without a
/// `"viewer"` word yields `None` rather than a guess.
fn parse_remaining_viewers(text: &str) -> Option<u32> {
    if !text.contains("viewer") {
        return None;
    }
    text.split_whitespace()
        .find_map(|word| word.trim_matches(|c: char| !c.is_ascii_digit()).parse().ok())
}

/// Parse a `/mods` or `/vips` NOTICE body into a lowercase user list.
/// Returns an empty list for any shape that doesn't match (§9).
fn parse_user_list(text: &str) -> Vec<String> {
    let Some((_, list)) = text.split_once(": ") else {
        return Vec::new();
    };
    list.trim_end_matches('.')
        .split(',')
        .map(|s| s.trim().to_lowercase())
        .filter(|s| !s.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paginate_splits_on_byte_boundary() {
        let long = "a".repeat(1200);
        let chunks = Commands::paginate(&long);
        assert_eq!(chunks.len(), 3);
        assert!(chunks.iter().all(|c| c.len() <= MAX_MESSAGE_BYTES));
        assert_eq!(chunks.concat(), long);
    }

    #[test]
    fn paginate_respects_utf8_boundaries() {
        let text = "é".repeat(300); // 2 bytes each, 600 bytes total
        let chunks = Commands::paginate(&text);
        for chunk in &chunks {
            assert!(std::str::from_utf8(chunk.as_bytes()).is_ok());
        }
        assert_eq!(chunks.concat(), text);
    }

    #[test]
    fn parses_mod_list() {
        let text = "The moderators of this channel are: alice, bob, charlie.";
        assert_eq!(
            parse_user_list(text),
            vec!["alice".to_string(), "bob".to_string(), "charlie".to_string()]
        );
    }

    #[test]
    fn unrecognized_list_reply_is_empty() {
        assert!(parse_user_list("something unexpected").is_empty());
    }

    #[test]
    fn parses_remaining_viewers_when_present() {
        let text = "Now hosting Forsen for up to 5 viewers.";
        assert_eq!(parse_remaining_viewers(text), Some(5));
    }

    #[test]
    fn remaining_viewers_absent_without_viewer_word() {
        assert_eq!(parse_remaining_viewers("Now hosting Forsen."), None);
    }
}
