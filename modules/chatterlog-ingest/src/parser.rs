//! Chat log markup parsing.
//!
//! Every assumption about the upstream's markup shape lives here, behind one
//! narrow contract: raw markup in, candidate records out. The upstream is
//! not versioned and drifts; a malformed entry is skipped, never fatal.

use std::sync::LazyLock;

use regex::{Captures, Regex};
use scraper::{Html, Selector};
use url::Url;

use chatterlog_common::{civil_year, parse_feed_timestamp, ParsedMessage};

static MENTION_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"@(\w+)").unwrap());
static TIMESTAMP_MARKUP_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<strong[^>]*>.*?</strong>").unwrap());
static LINE_BREAK_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)<br\s*/?>").unwrap());
static LINK_ATTR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?i)\b(href|src)\s*=\s*"([^"]*)""#).unwrap());

/// Author attributed to entries that carry a timestamp but no profile link
/// (upstream announcements).
const SYSTEM_AUTHOR: &str = "System";

/// Parse one channel's chat log markup into candidate records, in the order
/// delivered by the upstream (newest first).
pub fn parse_chat_log(html: &str, base_url: &Url) -> Vec<ParsedMessage> {
    parse_chat_log_in_year(html, base_url, civil_year())
}

/// Year-injected variant. The upstream omits the year from its timestamps;
/// production passes the current civil year, tests pin one.
pub fn parse_chat_log_in_year(html: &str, base_url: &Url, year: i32) -> Vec<ParsedMessage> {
    let entry_selector = Selector::parse("li.item-content").unwrap();
    let title_selector = Selector::parse("div.item-title").unwrap();
    let timestamp_selector = Selector::parse("strong").unwrap();
    let author_selector = Selector::parse(r#"a[href*="profile.php?user_name="]"#).unwrap();

    let document = Html::parse_document(html);
    let mut messages = Vec::new();

    for entry in document.select(&entry_selector) {
        let title = match entry.select(&title_selector).next() {
            Some(t) => t,
            None => continue,
        };

        // No timestamp fragment means a non-message row (system separator).
        let fragment = match title.select(&timestamp_selector).next() {
            Some(strong) => strong.text().collect::<String>(),
            None => continue,
        };
        let posted_at = match parse_feed_timestamp(&fragment, year) {
            Some(ts) => ts,
            None => continue,
        };

        let author = title
            .select(&author_selector)
            .next()
            .map(|a| a.text().collect::<String>().trim().to_string())
            .filter(|a| !a.is_empty())
            .unwrap_or_else(|| SYSTEM_AUTHOR.to_string());

        // Mention scanning runs on the pre-strip plain text so stripping the
        // timestamp/author markup cannot affect it.
        let plain_text = title.text().collect::<String>();
        let mentions = extract_mentions(&plain_text);

        let body_html = strip_entry_chrome(&title.inner_html(), base_url);

        messages.push(ParsedMessage {
            posted_at,
            author,
            body_html,
            mentions,
        });
    }

    messages
}

/// Every `@word` token in the plain text, in order. No validation against a
/// known-user list.
pub fn extract_mentions(plain_text: &str) -> Vec<String> {
    MENTION_RE
        .captures_iter(plain_text)
        .map(|caps| caps[1].to_string())
        .collect()
}

/// Reduce an entry's inner markup to message content only: drop the
/// timestamp element and the line break that follows it, and absolutize
/// link/image references against the upstream base URL.
fn strip_entry_chrome(inner_html: &str, base_url: &Url) -> String {
    let stripped = TIMESTAMP_MARKUP_RE.replace(inner_html, "");
    let stripped = LINE_BREAK_RE.replace(&stripped, "");

    let rewritten = LINK_ATTR_RE.replace_all(&stripped, |caps: &Captures| {
        match base_url.join(&caps[2]) {
            Ok(absolute) => format!(r#"{}="{absolute}""#, &caps[1]),
            // Unresolvable reference: leave it as delivered.
            Err(_) => caps[0].to_string(),
        }
    });

    rewritten.trim().to_string()
}
