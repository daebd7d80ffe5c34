//! Forum scraper: session handling, pagination, and entity extraction.
//!
//! [`ForumScraper`] is the only surface pipeline tasks talk to. It never logs
//! in again on its own: a [`ScrapeError::SessionExpired`] is returned so the
//! caller can regenerate the persisted session and restart the step.

mod dates;
mod error;
mod extract;
mod fetcher;
mod models;
mod session;

pub use dates::DateRange;
pub use error::{ScrapeError, ScrapeResult};
pub use extract::{
    parse_listing_page, parse_member, parse_member_page, parse_post, ListingItem, ListingPage,
    RawPayload,
};
pub use fetcher::{build_client, Fetcher};
pub use models::{Flag, Gender, Member, Post, PostId, Sentiment};
pub use session::{
    load_from_file, login, save_to_file, FileSessionStore, Session, SessionStore,
    SESSION_FILE_VERSION,
};

use std::time::Duration;

use futures_util::{Stream, TryStreamExt};
use tracing::{info, warn};

use crate::config::Config;

/// One entity that could not be fetched or parsed during a batch.
#[derive(Debug)]
pub struct BatchFailure {
    /// Post id or username the failure belongs to.
    pub key: String,
    pub error: ScrapeError,
}

/// Result of a batch detail fetch: every requested key ends up in exactly one list.
#[derive(Debug)]
pub struct BatchOutcome<T> {
    pub fetched: Vec<T>,
    pub failures: Vec<BatchFailure>,
}

impl<T> Default for BatchOutcome<T> {
    fn default() -> Self {
        Self {
            fetched: Vec::new(),
            failures: Vec::new(),
        }
    }
}

impl<T> BatchOutcome<T> {
    #[must_use]
    pub fn attempted(&self) -> usize {
        self.fetched.len() + self.failures.len()
    }
}

/// Credentials plus the fetch machinery for one forum.
#[derive(Clone)]
pub struct ForumScraper {
    email: String,
    password: String,
    fetcher: Fetcher,
}

impl std::fmt::Debug for ForumScraper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ForumScraper")
            .field("email", &self.email)
            .field("password", &"<redacted>")
            .field("base_url", &self.base_url())
            .finish()
    }
}

impl ForumScraper {
    /// Create a scraper. No network traffic happens until [`Self::login`].
    pub fn new(
        email: impl Into<String>,
        password: impl Into<String>,
        base_url: &str,
        timeout: Duration,
    ) -> ScrapeResult<Self> {
        Ok(Self {
            email: email.into(),
            password: password.into(),
            fetcher: Fetcher::new(build_client(timeout)?, base_url),
        })
    }

    pub fn from_config(config: &Config) -> ScrapeResult<Self> {
        Self::new(
            config.email.clone(),
            config.password.clone(),
            &config.base_url,
            config.http_timeout,
        )
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        self.fetcher.base_url()
    }

    /// Log in with the configured credentials.
    pub async fn login(&self) -> ScrapeResult<Session> {
        login(
            self.fetcher.client(),
            &self.email,
            &self.password,
            self.fetcher.base_url(),
        )
        .await
    }

    /// Load a previously persisted session. Performs no network call.
    pub async fn load_session(&self, store: &dyn SessionStore) -> ScrapeResult<Session> {
        store.load().await
    }

    /// Log in and persist the new session, replacing any stored one.
    pub async fn refresh_session(&self, store: &dyn SessionStore) -> ScrapeResult<Session> {
        store.delete().await?;
        let session = self.login().await?;
        store.save(&session).await?;
        store.load().await
    }

    /// Lazily paginated post ids in `community` between `start` and `end`.
    pub fn post_ids_stream<'a>(
        &'a self,
        session: &'a Session,
        community: &'a str,
        start: &str,
        end: Option<&str>,
    ) -> ScrapeResult<impl Stream<Item = ScrapeResult<PostId>> + 'a> {
        let range = DateRange::parse(start, end)?;
        Ok(self.fetcher.list_post_ids(session, community, range))
    }

    /// Collect every post id in the window. An empty window is not an error.
    pub async fn post_ids(
        &self,
        session: &Session,
        community: &str,
        start: &str,
        end: Option<&str>,
    ) -> ScrapeResult<Vec<PostId>> {
        let ids: Vec<PostId> = self
            .post_ids_stream(session, community, start, end)?
            .try_collect()
            .await?;
        info!(community, count = ids.len(), "Collected post ids");
        Ok(ids)
    }

    pub async fn members_for_page(
        &self,
        session: &Session,
        community: &str,
        page_number: u32,
    ) -> ScrapeResult<Vec<String>> {
        self.fetcher
            .list_members_for_page(session, community, page_number)
            .await
    }

    /// Every member username in `community`. May contain duplicates.
    pub async fn all_members(&self, session: &Session, community: &str) -> ScrapeResult<Vec<String>> {
        let usernames: Vec<String> = self
            .fetcher
            .list_all_members(session, community)
            .try_collect()
            .await?;
        info!(community, count = usernames.len(), "Collected member usernames");
        Ok(usernames)
    }

    pub async fn post_detail(&self, session: &Session, post_id: PostId) -> ScrapeResult<Post> {
        let raw = self.fetcher.fetch_post_detail(session, post_id).await?;
        parse_post(&raw)
    }

    pub async fn user_detail(&self, session: &Session, username: &str) -> ScrapeResult<Member> {
        let raw = self.fetcher.fetch_user_detail(session, username).await?;
        parse_member(&raw)
    }

    /// Fetch and parse each post independently.
    ///
    /// A missing or unparseable post is logged and recorded in
    /// [`BatchOutcome::failures`]; the rest of the batch continues. Throttling,
    /// network and session errors abort the batch (see
    /// [`ScrapeError::is_skippable`]).
    pub async fn post_details(
        &self,
        session: &Session,
        post_ids: &[PostId],
    ) -> ScrapeResult<BatchOutcome<Post>> {
        let mut outcome = BatchOutcome::default();
        for &post_id in post_ids {
            match self.post_detail(session, post_id).await {
                Ok(post) => outcome.fetched.push(post),
                Err(e) if e.is_skippable() => {
                    warn!(post_id, error = %e, "Skipping post");
                    outcome.failures.push(BatchFailure {
                        key: post_id.to_string(),
                        error: e,
                    });
                }
                Err(e) => return Err(e),
            }
        }
        info!(
            requested = post_ids.len(),
            fetched = outcome.fetched.len(),
            failed = outcome.failures.len(),
            "Post detail batch complete"
        );
        Ok(outcome)
    }

    /// Fetch and parse each member independently, with the same partial-failure
    /// policy as [`Self::post_details`].
    pub async fn user_details(
        &self,
        session: &Session,
        usernames: &[String],
    ) -> ScrapeResult<BatchOutcome<Member>> {
        let mut outcome = BatchOutcome::default();
        for username in usernames {
            match self.user_detail(session, username).await {
                Ok(member) => outcome.fetched.push(member),
                Err(e) if e.is_skippable() => {
                    warn!(username = %username, error = %e, "Skipping member");
                    outcome.failures.push(BatchFailure {
                        key: username.clone(),
                        error: e,
                    });
                }
                Err(e) => return Err(e),
            }
        }
        info!(
            requested = usernames.len(),
            fetched = outcome.fetched.len(),
            failed = outcome.failures.len(),
            "Member detail batch complete"
        );
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_hides_password() {
        let scraper = ForumScraper::new(
            "tester@example.com",
            "hunter2",
            "http://forum.test",
            Duration::from_secs(5),
        )
        .unwrap();

        let rendered = format!("{scraper:?}");
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("<redacted>"));
        assert!(rendered.contains("tester@example.com"));
    }
}
