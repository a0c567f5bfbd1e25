//! Mailbox status polling: handle resolution, capacity parsing, tri-state
//! classification, and the per-tick fan-out over monitored usernames.

use std::collections::HashMap;
use std::sync::{Arc, LazyLock, Mutex};

use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use tracing::{debug, warn};

use chatterlog_common::{civil_now, ChatterlogError, MailboxColor, MailboxStatus, Result};
use chatterlog_store::MailboxStore;

use crate::fetch::FeedClient;

static HANDLE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"mailbox\.php\?id=(\d+)").unwrap());

/// In-memory tier of the mailbox handle cache. Explicitly owned: constructed
/// at service start and passed by reference to the poller, never ambient.
/// Only successful resolutions are ever inserted.
#[derive(Default)]
pub struct HandleCache {
    inner: Mutex<HashMap<String, String>>,
}

impl HandleCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, username: &str) -> Option<String> {
        self.inner.lock().expect("handle cache poisoned").get(username).cloned()
    }

    pub fn put(&self, username: &str, handle: &str) {
        self.inner
            .lock()
            .expect("handle cache poisoned")
            .insert(username.to_string(), handle.to_string());
    }
}

/// Classify a current/max capacity pair into a health color.
///
/// A mailbox is "open" when it has more than 100 free slots or is at most
/// half full. Closed is RED regardless of fill; open splits GREEN/YELLOW at
/// a 10% fill ratio.
pub fn classify(current_items: i64, max_items: i64) -> MailboxColor {
    let ratio = fill_ratio(current_items, max_items);
    let open = (max_items - current_items > 100)
        || (max_items > 0 && ratio <= 0.5);

    if !open {
        MailboxColor::Red
    } else if ratio <= 0.1 {
        MailboxColor::Green
    } else {
        MailboxColor::Yellow
    }
}

fn fill_ratio(current_items: i64, max_items: i64) -> f64 {
    if max_items > 0 {
        current_items as f64 / max_items as f64
    } else {
        0.0
    }
}

/// Extract the mailbox handle from a profile page.
pub fn parse_mailbox_handle(html: &str, username: &str) -> Result<String> {
    let document = Html::parse_document(html);
    let anchor_selector = Selector::parse(r#"a[href*="mailbox.php?id="]"#).unwrap();

    document
        .select(&anchor_selector)
        .find_map(|a| a.value().attr("href"))
        .and_then(|href| HANDLE_RE.captures(href))
        .map(|caps| caps[1].to_string())
        .ok_or_else(|| {
            ChatterlogError::Parse(format!("Mailbox handle not found for user '{username}'"))
        })
}

/// Extract the "current/max" capacity pair from a mailbox page.
pub fn parse_mailbox_counts(html: &str, username: &str) -> Result<(i64, i64)> {
    let document = Html::parse_document(html);
    let counter_selector = Selector::parse(r#"span[id$="-inmailbox"]"#).unwrap();

    let span = document.select(&counter_selector).next().ok_or_else(|| {
        ChatterlogError::Parse(format!("Item count not found for user '{username}'"))
    })?;

    // The pair lives in the counter's enclosing element, e.g. "1,234 / 2,000".
    let container = span
        .parent()
        .and_then(ElementRef::wrap)
        .ok_or_else(|| {
            ChatterlogError::Parse(format!("Item count has no container for user '{username}'"))
        })?;
    let text = container.text().collect::<String>();

    let parts: Vec<&str> = text.split('/').collect();
    if parts.len() != 2 {
        return Err(ChatterlogError::Parse(format!(
            "Could not parse item count for user '{username}': '{}'",
            text.trim()
        )));
    }

    let current = parse_count(parts[0], username)?;
    let max = parse_count(parts[1], username)?;
    Ok((current, max))
}

fn parse_count(raw: &str, username: &str) -> Result<i64> {
    raw.trim().replace(',', "").parse().map_err(|_| {
        ChatterlogError::Parse(format!(
            "Non-numeric item count for user '{username}': '{}'",
            raw.trim()
        ))
    })
}

/// Per-tick counters for the mailbox job.
#[derive(Debug, Clone, Copy, Default)]
pub struct MailboxPollStats {
    pub polled: u32,
    pub errored: u32,
}

#[derive(Clone)]
pub struct MailboxPoller {
    feed: Arc<FeedClient>,
    store: MailboxStore,
    handles: Arc<HandleCache>,
}

impl MailboxPoller {
    pub fn new(feed: Arc<FeedClient>, store: MailboxStore, handles: Arc<HandleCache>) -> Self {
        Self {
            feed,
            store,
            handles,
        }
    }

    /// Poll every monitored username concurrently and upsert the results.
    /// One username's failure lands as an ERROR row and does not affect the
    /// others.
    pub async fn poll_all(&self) -> Result<MailboxPollStats> {
        let usernames = self.store.monitored_usernames().await?;
        if usernames.is_empty() {
            return Ok(MailboxPollStats::default());
        }

        let polls = usernames.iter().map(|u| self.poll_username(u));
        let statuses = futures::future::join_all(polls).await;

        let mut stats = MailboxPollStats::default();
        for status in &statuses {
            stats.polled += 1;
            if status.status == MailboxColor::Error {
                stats.errored += 1;
            }
            if let Err(e) = self.store.upsert_status(status).await {
                warn!(username = status.username.as_str(), error = %e, "Failed to store mailbox status");
            }
        }

        debug!(polled = stats.polled, errored = stats.errored, "Mailbox poll complete");
        Ok(stats)
    }

    /// Poll one username. Never fails outward: any fetch/parse error becomes
    /// an ERROR status carrying the reason, with numeric fields zeroed.
    pub async fn poll_username(&self, username: &str) -> MailboxStatus {
        match self.try_poll(username).await {
            Ok(status) => status,
            Err(e) => {
                warn!(username, error = %e, "Mailbox poll failed");
                MailboxStatus::errored(username, e.to_string(), civil_now())
            }
        }
    }

    async fn try_poll(&self, username: &str) -> Result<MailboxStatus> {
        let handle = self.resolve_handle(username).await?;
        let html = self.feed.mailbox_page(&handle).await?;
        let (current_items, max_items) = parse_mailbox_counts(&html, username)?;

        let ratio = fill_ratio(current_items, max_items);
        Ok(MailboxStatus {
            username: username.to_string(),
            status: classify(current_items, max_items),
            current_items,
            max_items,
            fill_ratio: (ratio * 1000.0).round() / 1000.0,
            last_error: None,
            last_updated: civil_now(),
        })
    }

    /// Resolve a username to its opaque mailbox handle: in-memory cache,
    /// then the persistent table, then an upstream profile fetch. A failed
    /// resolution caches nothing at either tier.
    async fn resolve_handle(&self, username: &str) -> Result<String> {
        if let Some(handle) = self.handles.get(username) {
            return Ok(handle);
        }

        if let Some(handle) = self.store.get_handle(username).await? {
            self.handles.put(username, &handle);
            return Ok(handle);
        }

        let html = self.feed.profile_page(username).await?;
        let handle = parse_mailbox_handle(&html, username)?;

        self.handles.put(username, &handle);
        self.store.save_handle(username, &handle).await?;
        Ok(handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chatterlog_store::Database;

    #[test]
    fn classification_boundaries() {
        // 50 free slots and 95% full: closed.
        assert_eq!(classify(950, 1000), MailboxColor::Red);
        // Open and 5% full.
        assert_eq!(classify(50, 1000), MailboxColor::Green);
        // Open (500 free) but 50% full.
        assert_eq!(classify(500, 1000), MailboxColor::Yellow);
        // Exactly 10% is still green.
        assert_eq!(classify(100, 1000), MailboxColor::Green);
        // Zero-capacity mailbox is closed.
        assert_eq!(classify(0, 0), MailboxColor::Red);
        // Huge mailbox: 101 free slots is open even at high fill.
        assert_eq!(classify(899, 1000), MailboxColor::Yellow);
    }

    #[test]
    fn handle_parses_from_profile_markup() {
        let html = r#"
            <div class="card">
              <a href="friends.php?id=2">friends</a>
              <a href="mailbox.php?id=48213">mailbox</a>
            </div>
        "#;
        assert_eq!(parse_mailbox_handle(html, "alice").unwrap(), "48213");

        assert!(parse_mailbox_handle("<p>no links</p>", "alice").is_err());
    }

    #[test]
    fn counts_parse_with_thousands_separators() {
        let html = r#"
            <div class="stat">
              <span id="48213-inmailbox"></span>1,234 / 2,000
            </div>
        "#;
        assert_eq!(parse_mailbox_counts(html, "alice").unwrap(), (1234, 2000));
    }

    #[test]
    fn malformed_counts_are_errors() {
        let no_span = r#"<div>1 / 2</div>"#;
        assert!(parse_mailbox_counts(no_span, "alice").is_err());

        let no_pair = r#"<div><span id="1-inmailbox"></span>everything</div>"#;
        assert!(parse_mailbox_counts(no_pair, "alice").is_err());

        let bad_number = r#"<div><span id="1-inmailbox"></span>lots / 2,000</div>"#;
        assert!(parse_mailbox_counts(bad_number, "alice").is_err());
    }

    #[tokio::test]
    async fn memory_cache_hit_skips_everything_else() {
        let db = Database::open_in_memory().await.unwrap();
        let handles = Arc::new(HandleCache::new());
        handles.put("alice", "111");

        let poller = MailboxPoller::new(
            Arc::new(FeedClient::new("https://farmrpg.com/", "session=test").unwrap()),
            MailboxStore::new(db),
            handles,
        );

        assert_eq!(poller.resolve_handle("alice").await.unwrap(), "111");
    }

    #[tokio::test]
    async fn store_hit_backfills_memory_cache() {
        let db = Database::open_in_memory().await.unwrap();
        let store = MailboxStore::new(db);
        store.save_handle("bob", "222").await.unwrap();

        let handles = Arc::new(HandleCache::new());
        let poller = MailboxPoller::new(
            Arc::new(FeedClient::new("https://farmrpg.com/", "session=test").unwrap()),
            store,
            handles.clone(),
        );

        assert_eq!(poller.resolve_handle("bob").await.unwrap(), "222");
        assert_eq!(handles.get("bob").as_deref(), Some("222"));
    }

    #[tokio::test]
    async fn failed_resolution_caches_nothing() {
        let db = Database::open_in_memory().await.unwrap();
        let handles = Arc::new(HandleCache::new());

        // Unroutable base URL: the profile fetch fails fast.
        let poller = MailboxPoller::new(
            Arc::new(FeedClient::new("http://127.0.0.1:9/", "session=test").unwrap()),
            MailboxStore::new(db),
            handles.clone(),
        );

        let status = poller.poll_username("carol").await;
        assert_eq!(status.status, MailboxColor::Error);
        assert_eq!((status.current_items, status.max_items), (0, 0));
        assert_eq!(status.fill_ratio, 0.0);
        assert!(status.last_error.is_some());

        assert_eq!(handles.get("carol"), None);
        assert_eq!(poller.store.get_handle("carol").await.unwrap(), None);
    }
}
