//! IRCv3 message parsing and tag post-processing.
//!
//! Grounded on the reference repo's `irc.rs`, which split parsing into a
//! `RawIrcMessage` pass (tags/prefix/command/params as strings) followed by
//! a `TwitchIrcMessage` pass (command-specific validation) — left a `TODO:
//! parse tags into hashmap from raw_tags` unimplemented. This module is
//! that TODO done in full, generalized from one raw-tag string into the
//! typed tag values the Dispatcher needs (§4.1), plus the inverse escape
//! used to format outgoing tagged lines (e.g. `reply-parent-msg-id`).

use std::collections::HashMap;
use std::fmt;

/// A single decoded IRCv3 tag value.
///
/// Parsing (§4.1) always produces [`TagValue::Str`]. The Dispatcher's tag
/// post-processors (§4.1 "Tag post-processors") replace specific keys with
/// [`TagValue::Bool`], [`TagValue::Int`], [`TagValue::Badges`], or
/// [`TagValue::Emotes`] in place, while preserving the original string under
/// a parallel `<key>-raw` entry.
#[derive(Debug, Clone, PartialEq)]
pub enum TagValue {
    Str(String),
    Bool(bool),
    Int(i64),
    /// badges / badge-info, decoded into an ordered list of (name, version).
    Badges(Vec<(String, String)>),
    /// emote id -> list of (start, end) byte ranges into the message text.
    Emotes(HashMap<String, Vec<(u32, u32)>>),
}

impl TagValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            TagValue::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            TagValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            TagValue::Int(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_badges(&self) -> Option<&[(String, String)]> {
        match self {
            TagValue::Badges(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_emotes(&self) -> Option<&HashMap<String, Vec<(u32, u32)>>> {
        match self {
            TagValue::Emotes(e) => Some(e),
            _ => None,
        }
    }
}

impl fmt::Display for TagValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TagValue::Str(s) => f.write_str(s),
            TagValue::Bool(b) => write!(f, "{}", if *b { 1 } else { 0 }),
            TagValue::Int(n) => write!(f, "{n}"),
            TagValue::Badges(pairs) => {
                let parts: Vec<String> = pairs.iter().map(|(k, v)| format!("{k}/{v}")).collect();
                f.write_str(&parts.join(","))
            }
            TagValue::Emotes(map) => {
                let parts: Vec<String> = map
                    .iter()
                    .map(|(id, ranges)| {
                        let ranges: Vec<String> = ranges
                            .iter()
                            .map(|(s, e)| format!("{s}-{e}"))
                            .collect();
                        format!("{id}:{}", ranges.join(","))
                    })
                    .collect();
                f.write_str(&parts.join("/"))
            }
        }
    }
}

pub type Tags = HashMap<String, TagValue>;

/// A fully parsed IRCv3 line (§3 "IRCMessage").
///
/// Produced only by [`parse_line`]. Immutable by contract, except that the
/// Dispatcher enriches `tags` in place with derived structured fields
/// before emitting any event carrying this message (§3 invariants).
#[derive(Debug, Clone, PartialEq)]
pub struct IRCMessage {
    pub raw: String,
    pub tags: Tags,
    pub prefix: Option<String>,
    pub command: String,
    pub params: Vec<String>,
}

impl IRCMessage {
    /// The nickname portion of `prefix` (`nick!user@host` or `nick.tmi.twitch.tv`).
    pub fn prefix_nick(&self) -> Option<&str> {
        let prefix = self.prefix.as_deref()?;
        let nick = prefix.split(['!', '@']).next().unwrap_or(prefix);
        let nick = nick.strip_suffix(".tmi.twitch.tv").unwrap_or(nick);
        Some(nick)
    }

    /// The trailing (last) parameter, if any.
    pub fn trailing(&self) -> Option<&str> {
        self.params.last().map(|s| s.as_str())
    }

    /// The first parameter, typically the target channel.
    pub fn channel(&self) -> Option<&str> {
        self.params.first().map(|s| s.as_str())
    }

    pub fn tag(&self, key: &str) -> Option<&TagValue> {
        self.tags.get(key)
    }

    pub fn tag_str(&self, key: &str) -> Option<&str> {
        self.tag(key).and_then(TagValue::as_str)
    }
}

/// Parse one line (without trailing CRLF) into an [`IRCMessage`].
///
/// Returns `None` for an empty line. Malformed lines that still contain a
/// command token parse permissively (unknown commands are kept verbatim;
/// §7 has the reader loop log-and-skip lines that fail even this).
pub fn parse_line(line: &str) -> Option<IRCMessage> {
    let raw = line.to_string();
    let mut rest = line;

    let mut tags = Tags::new();
    if let Some(stripped) = rest.strip_prefix('@') {
        let (tag_str, remainder) = split_first_token(stripped);
        for entry in tag_str.split(';') {
            if entry.is_empty() {
                continue;
            }
            match entry.split_once('=') {
                Some((key, value)) => {
                    tags.insert(key.to_string(), TagValue::Str(unescape_tag_value(value)));
                }
                None => {
                    tags.insert(entry.to_string(), TagValue::Str(String::new()));
                }
            }
        }
        rest = remainder;
    }

    let prefix = if let Some(stripped) = rest.strip_prefix(':') {
        let (prefix_str, remainder) = split_first_token(stripped);
        rest = remainder;
        Some(prefix_str.to_string())
    } else {
        None
    };

    let (command, remainder) = split_first_token(rest);
    if command.is_empty() {
        return None;
    }
    let command = command.to_ascii_uppercase();
    rest = remainder;

    let mut params = Vec::new();
    loop {
        rest = rest.trim_start_matches(' ');
        if rest.is_empty() {
            break;
        }
        if let Some(trailing) = rest.strip_prefix(':') {
            params.push(trailing.to_string());
            break;
        }
        let (token, remainder) = split_first_token(rest);
        params.push(token.to_string());
        rest = remainder;
    }

    Some(IRCMessage {
        raw,
        tags,
        prefix,
        command,
        params,
    })
}

/// Split `s` on the first space, trimming leading spaces from the remainder.
fn split_first_token(s: &str) -> (&str, &str) {
    match s.find(' ') {
        Some(idx) => (&s[..idx], s[idx + 1..].trim_start_matches(' ')),
        None => (s, ""),
    }
}

/// Decode one IRCv3 escaped tag value (§4.1, grammar step 1).
fn unescape_tag_value(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some(':') => out.push(';'),
            Some('s') => out.push(' '),
            Some('\\') => out.push('\\'),
            Some('r') => out.push('\r'),
            Some('n') => out.push('\n'),
            Some(other) => out.push(other),
            None => {}
        }
    }
    out
}

/// Encode a tag value for transmission (the inverse of [`unescape_tag_value`]).
pub fn escape_tag_value(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            ';' => out.push_str("\\:"),
            ' ' => out.push_str("\\s"),
            '\\' => out.push_str("\\\\"),
            '\r' => out.push_str("\\r"),
            '\n' => out.push_str("\\n"),
            other => out.push(other),
        }
    }
    out
}

/// Render a tag map back into an `@k=v;k2=v2` prefix (without trailing space).
///
/// Only [`TagValue::Str`] and [`TagValue::Bool`]/[`TagValue::Int`] tags are
/// round-tripped this way; structured `badges`/`emotes` tags are rendered
/// using their raw counterparts if present, otherwise via [`TagValue`]'s
/// `Display` impl, which reconstructs an equivalent (if not necessarily
/// byte-identical) wire form.
pub fn format_tags(tags: &Tags) -> String {
    let mut parts: Vec<String> = Vec::with_capacity(tags.len());
    for (key, value) in tags {
        if let Some(raw_key) = key.strip_suffix("-raw") {
            if tags.contains_key(raw_key) {
                // the structured field will render its own value; skip the raw shadow
                continue;
            }
        }
        let rendered = value.to_string();
        if rendered.is_empty() {
            parts.push(key.clone());
        } else {
            parts.push(format!("{key}={}", escape_tag_value(&rendered)));
        }
    }
    parts.sort();
    format!("@{}", parts.join(";"))
}

/// Tags whose raw string value is coerced to an integer (§4.1).
const NUMERIC_TAGS: &[&str] = &[
    "bits",
    "ban-duration",
    "msg-param-cumulative-months",
    "msg-param-months",
    "msg-param-multimonth-duration",
    "msg-param-multimonth-tenure",
    "msg-param-promo-gift-total",
    "msg-param-sender-count",
    "msg-param-streak-months",
    "msg-param-threshold",
    "msg-param-viewerCount",
    "msg-param-value",
    "msg-param-gift-months",
    "msg-param-trigger-amount",
];

/// Tags whose `"0"`/`"1"` raw value is coerced to a boolean (§4.1).
const BOOLEAN_TAGS: &[&str] = &[
    "mod",
    "subscriber",
    "turbo",
    "first-msg",
    "returning-chatter",
    "emote-only",
    "r9k",
    "rituals",
];

/// Apply the Dispatcher's tag post-processors in place (§4.1).
///
/// Mutates `badges`, `badge-info`, and `emotes` into their structured
/// representations (preserving the original string under `<key>-raw`), and
/// coerces known numeric/boolean tags. Idempotent: already-structured tags
/// are left untouched.
pub fn postprocess_tags(tags: &mut Tags) {
    for key in ["badges", "badge-info"] {
        if let Some(TagValue::Str(raw)) = tags.get(key).cloned() {
            tags.insert(format!("{key}-raw"), TagValue::Str(raw.clone()));
            tags.insert(key.to_string(), TagValue::Badges(parse_badges(&raw)));
        }
    }

    if let Some(TagValue::Str(raw)) = tags.get("emotes").cloned() {
        tags.insert("emotes-raw".to_string(), TagValue::Str(raw.clone()));
        tags.insert("emotes".to_string(), TagValue::Emotes(parse_emotes(&raw)));
    }

    for key in NUMERIC_TAGS {
        if let Some(TagValue::Str(raw)) = tags.get(*key).cloned() {
            if let Ok(n) = raw.parse::<i64>() {
                tags.insert((*key).to_string(), TagValue::Int(n));
            }
        }
    }

    for key in BOOLEAN_TAGS {
        if let Some(TagValue::Str(raw)) = tags.get(*key).cloned() {
            match raw.as_str() {
                "0" => {
                    tags.insert((*key).to_string(), TagValue::Bool(false));
                }
                "1" => {
                    tags.insert((*key).to_string(), TagValue::Bool(true));
                }
                _ => {}
            }
        }
    }
}

fn parse_badges(raw: &str) -> Vec<(String, String)> {
    raw.split(',')
        .filter(|entry| !entry.is_empty())
        .filter_map(|entry| entry.split_once('/'))
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

fn parse_emotes(raw: &str) -> HashMap<String, Vec<(u32, u32)>> {
    let mut out = HashMap::new();
    if raw.is_empty() {
        return out;
    }
    for entry in raw.split('/') {
        let Some((id, ranges)) = entry.split_once(':') else {
            continue;
        };
        let parsed: Vec<(u32, u32)> = ranges
            .split(',')
            .filter_map(|range| range.split_once('-'))
            .filter_map(|(start, end)| Some((start.parse().ok()?, end.parse().ok()?)))
            .collect();
        out.insert(id.to_string(), parsed);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_privmsg_with_tags() {
        let line = "@badges=broadcaster/1;color=#FF0000;display-name=Alice;user-id=42 :alice!alice@alice.tmi.twitch.tv PRIVMSG #room :hi";
        let msg = parse_line(line).unwrap();
        assert_eq!(msg.command, "PRIVMSG");
        assert_eq!(msg.channel(), Some("#room"));
        assert_eq!(msg.trailing(), Some("hi"));
        assert_eq!(msg.prefix_nick(), Some("alice"));
        assert_eq!(
            msg.tag_str("display-name"),
            Some("Alice")
        );
    }

    #[test]
    fn parses_ping() {
        let msg = parse_line("PING :tmi.twitch.tv").unwrap();
        assert_eq!(msg.command, "PING");
        assert_eq!(msg.trailing(), Some("tmi.twitch.tv"));
        assert!(msg.tags.is_empty());
        assert!(msg.prefix.is_none());
    }

    #[test]
    fn parses_numeric_command() {
        let msg = parse_line(":tmi.twitch.tv 001 bot :Welcome, GLHF!").unwrap();
        assert_eq!(msg.command, "001");
        assert_eq!(msg.params, vec!["bot", "Welcome, GLHF!"]);
    }

    #[test]
    fn empty_line_is_none() {
        assert!(parse_line("").is_none());
    }

    #[test]
    fn escape_round_trip() {
        for s in ["a;b c\\d\re\nf", "", "plain", ";;;"] {
            let escaped = escape_tag_value(s);
            assert_eq!(unescape_tag_value(&escaped), s);
        }
    }

    #[test]
    fn postprocess_decodes_badges_and_emotes() {
        let mut tags = Tags::new();
        tags.insert(
            "badges".to_string(),
            TagValue::Str("broadcaster/1,subscriber/12".to_string()),
        );
        tags.insert(
            "emotes".to_string(),
            TagValue::Str("25:0-4,6-10/1902:12-16".to_string()),
        );
        tags.insert("bits".to_string(), TagValue::Str("100".to_string()));
        tags.insert("mod".to_string(), TagValue::Str("1".to_string()));

        postprocess_tags(&mut tags);

        let badges = tags.get("badges").unwrap().as_badges().unwrap();
        assert_eq!(
            badges,
            &[
                ("broadcaster".to_string(), "1".to_string()),
                ("subscriber".to_string(), "12".to_string())
            ]
        );
        assert_eq!(
            tags.get("badges-raw").unwrap().as_str(),
            Some("broadcaster/1,subscriber/12")
        );

        let emotes = tags.get("emotes").unwrap().as_emotes().unwrap();
        assert_eq!(emotes.get("25").unwrap(), &vec![(0, 4), (6, 10)]);
        assert_eq!(emotes.get("1902").unwrap(), &vec![(12, 16)]);

        assert_eq!(tags.get("bits").unwrap().as_int(), Some(100));
        assert_eq!(tags.get("mod").unwrap().as_bool(), Some(true));
    }

    #[test]
    fn postprocess_is_idempotent() {
        let mut tags = Tags::new();
        tags.insert(
            "badges".to_string(),
            TagValue::Str("broadcaster/1".to_string()),
        );
        postprocess_tags(&mut tags);
        let first = tags.clone();
        postprocess_tags(&mut tags);
        assert_eq!(tags, first);
    }

    #[test]
    fn parse_round_trip_reparses_equivalently() {
        let line = "@badges=broadcaster/1;color=#FF0000 :alice!alice@alice.tmi.twitch.tv PRIVMSG #room :hi there";
        let msg = parse_line(line).unwrap();
        let reconstructed = format!(
            "{} :{} {} {}",
            format_tags(&msg.tags),
            msg.prefix.as_deref().unwrap(),
            msg.command,
            msg.params
                .iter()
                .enumerate()
                .map(|(i, p)| if i + 1 == msg.params.len() {
                    format!(":{p}")
                } else {
                    p.clone()
                })
                .collect::<Vec<_>>()
                .join(" ")
        );
        let reparsed = parse_line(&reconstructed).unwrap();
        assert_eq!(reparsed.command, msg.command);
        assert_eq!(reparsed.prefix, msg.prefix);
        assert_eq!(reparsed.params, msg.params);
        assert_eq!(reparsed.tags, msg.tags);
    }
}
