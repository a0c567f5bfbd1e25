//! Authenticated HTTP fetches against the upstream site. Pure I/O, no state.

use std::time::Duration;

use url::Url;

use chatterlog_common::{ChatterlogError, Result};

/// Per-request timeout. Nothing in this system may block indefinitely.
const FETCH_TIMEOUT: Duration = Duration::from_secs(10);

pub struct FeedClient {
    client: reqwest::Client,
    base_url: Url,
    session_cookie: String,
}

impl FeedClient {
    pub fn new(base_url: &str, session_cookie: &str) -> Result<Self> {
        let base_url = Url::parse(base_url)
            .map_err(|e| ChatterlogError::Config(format!("Invalid upstream base URL: {e}")))?;

        let client = reqwest::Client::builder()
            .timeout(FETCH_TIMEOUT)
            .build()
            .map_err(|e| ChatterlogError::Config(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url,
            session_cookie: session_cookie.to_string(),
        })
    }

    /// Base URL relative link/image references resolve against.
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Raw markup for one channel's chat log page.
    pub async fn chat_log(&self, channel: &str) -> Result<String> {
        self.get("chatlog.php", &[("channel", channel)]).await
    }

    /// A user's profile page, used to resolve their mailbox handle.
    pub async fn profile_page(&self, username: &str) -> Result<String> {
        self.get("profile.php", &[("user_name", username)]).await
    }

    /// A user's mailbox status page, by resolved handle.
    pub async fn mailbox_page(&self, handle: &str) -> Result<String> {
        self.get("mailbox.php", &[("id", handle)]).await
    }

    async fn get(&self, path: &str, params: &[(&str, &str)]) -> Result<String> {
        let mut url = self
            .base_url
            .join(path)
            .map_err(|e| ChatterlogError::Fetch(format!("Bad request path '{path}': {e}")))?;
        for (key, value) in params {
            url.query_pairs_mut().append_pair(key, value);
        }

        let response = self
            .client
            .get(url.clone())
            .header("Cookie", &self.session_cookie)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(ChatterlogError::Fetch(format!(
                "GET {url} returned {status}"
            )));
        }

        Ok(response.text().await?)
    }
}
