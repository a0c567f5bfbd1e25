//! Shared fixtures for store tests.

use chrono::{NaiveDate, NaiveDateTime};

use chatterlog_common::ParsedMessage;

/// A civil timestamp on a fixed test date.
pub fn ts(hour: u32, min: u32, sec: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2026, 1, 5)
        .unwrap()
        .and_hms_opt(hour, min, sec)
        .unwrap()
}

/// A parsed message with no mentions.
pub fn message_at(posted_at: NaiveDateTime, author: &str, body: &str) -> ParsedMessage {
    ParsedMessage {
        posted_at,
        author: author.to_string(),
        body_html: body.to_string(),
        mentions: Vec::new(),
    }
}
