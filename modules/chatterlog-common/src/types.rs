use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// Composite de-duplication key for a chat message. The upstream feed has no
/// stable numeric id, so this triple is the only identity available. Two
/// genuinely distinct messages from the same author in the same second on the
/// same channel collapse to one row; see DESIGN.md.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NaturalKey {
    /// Civil-local timestamp (see [`crate::civil`]).
    pub posted_at: NaiveDateTime,
    pub author: String,
    pub channel: String,
}

/// A chat line parsed out of the upstream feed, not yet persisted.
#[derive(Debug, Clone)]
pub struct ParsedMessage {
    pub posted_at: NaiveDateTime,
    pub author: String,
    /// Message content only; timestamp/author markup is stripped and link and
    /// image references are absolutized.
    pub body_html: String,
    /// `@name` tokens found in the pre-strip plain text. Not validated
    /// against any known-user list.
    pub mentions: Vec<String>,
}

impl ParsedMessage {
    pub fn natural_key(&self, channel: &str) -> NaturalKey {
        NaturalKey {
            posted_at: self.posted_at,
            author: self.author.clone(),
            channel: channel.to_string(),
        }
    }
}

/// A persisted chat message from the live or archive table.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ChatMessage {
    pub id: i64,
    pub posted_at: NaiveDateTime,
    pub author: String,
    pub body_html: String,
    pub channel: String,
}

/// A derived `@mention` record. Never independently created; always derived
/// from a message at admission time. Soft-deleted via `hidden`, never
/// hard-deleted by normal flows.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Mention {
    pub id: i64,
    pub message_id: i64,
    pub mentioned_user: String,
    pub body_html: String,
    pub posted_at: NaiveDateTime,
    pub read: bool,
    pub hidden: bool,
    pub channel: String,
}

/// Tri-state mailbox health signal, plus an error state for failed polls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MailboxColor {
    Green,
    Yellow,
    Red,
    Error,
}

impl MailboxColor {
    pub fn as_str(&self) -> &'static str {
        match self {
            MailboxColor::Green => "GREEN",
            MailboxColor::Yellow => "YELLOW",
            MailboxColor::Red => "RED",
            MailboxColor::Error => "ERROR",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "GREEN" => Some(MailboxColor::Green),
            "YELLOW" => Some(MailboxColor::Yellow),
            "RED" => Some(MailboxColor::Red),
            "ERROR" => Some(MailboxColor::Error),
            _ => None,
        }
    }
}

impl std::fmt::Display for MailboxColor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Latest known mailbox state for one monitored username. Upserted in place,
/// never historized. On `Error` the numeric fields are zeroed rather than
/// left at a stale prior value, and the failure reason is kept in
/// `last_error`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MailboxStatus {
    pub username: String,
    pub status: MailboxColor,
    pub current_items: i64,
    pub max_items: i64,
    pub fill_ratio: f64,
    pub last_error: Option<String>,
    pub last_updated: NaiveDateTime,
}

impl MailboxStatus {
    /// Build an error-state status with zeroed numeric fields.
    pub fn errored(username: &str, reason: String, now: NaiveDateTime) -> Self {
        Self {
            username: username.to_string(),
            status: MailboxColor::Error,
            current_items: 0,
            max_items: 0,
            fill_ratio: 0.0,
            last_error: Some(reason),
            last_updated: now,
        }
    }
}

/// One (owner, username) monitoring preference row. Owners are opaque
/// identities from the excluded auth layer; each owner may monitor at most
/// [`MAX_MONITORED_USERNAMES`] usernames.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct MonitoringPreference {
    pub owner_id: String,
    pub username: String,
}

/// Cap on active monitored usernames per owner.
pub const MAX_MONITORED_USERNAMES: usize = 5;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mailbox_color_round_trips() {
        for color in [
            MailboxColor::Green,
            MailboxColor::Yellow,
            MailboxColor::Red,
            MailboxColor::Error,
        ] {
            assert_eq!(MailboxColor::parse(color.as_str()), Some(color));
        }
        assert_eq!(MailboxColor::parse("purple"), None);
    }
}
