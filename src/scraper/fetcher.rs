//! HTTP fetching and pagination against the forum's private endpoints.
//!
//! Requests are issued one at a time. The forum's listing cursor is server-side
//! state tied to the session, so pages are never fetched in parallel. Nothing
//! here retries: every failure is mapped to a [`ScrapeError`] and returned.

use std::collections::HashSet;
use std::time::Duration;

use async_stream::try_stream;
use chrono::{DateTime, Utc};
use futures_util::Stream;
use reqwest::header::{HeaderMap, CONTENT_TYPE, COOKIE, LOCATION, RETRY_AFTER};
use reqwest::{Client, StatusCode};
use tracing::{debug, warn};

use super::dates::DateRange;
use super::error::{ScrapeError, ScrapeResult};
use super::extract::{parse_listing_page, parse_member_page, RawPayload};
use super::models::PostId;
use super::session::{normalize_base_url, Session};
use crate::constants::SCRAPER_USER_AGENT;

/// Build the HTTP client used for all forum traffic.
///
/// Redirects are not followed so that a bounce to the login page is visible
/// as a 3xx response.
pub fn build_client(timeout: Duration) -> ScrapeResult<Client> {
    Client::builder()
        .timeout(timeout)
        .user_agent(SCRAPER_USER_AGENT)
        .redirect(reqwest::redirect::Policy::none())
        .build()
        .map_err(|e| ScrapeError::TransientNetwork(format!("failed to build HTTP client: {e}")))
}

/// Map a non-success status to the matching error.
pub(crate) fn status_error(status: StatusCode, url: &str, headers: &HeaderMap) -> ScrapeError {
    match status.as_u16() {
        401 => ScrapeError::SessionExpired,
        404 | 410 => ScrapeError::NotFound(url.to_string()),
        429 => ScrapeError::RateLimited {
            retry_after: headers
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse().ok()),
        },
        502..=504 => ScrapeError::TransientNetwork(format!("HTTP {status} from {url}")),
        300..=399 if redirects_to_login(headers) => ScrapeError::SessionExpired,
        code => ScrapeError::UnexpectedStatus {
            status: code,
            url: url.to_string(),
        },
    }
}

fn redirects_to_login(headers: &HeaderMap) -> bool {
    headers
        .get(LOCATION)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|loc| {
            let loc = loc.to_ascii_lowercase();
            loc.contains("login") || loc.contains("sign-in") || loc.contains("signin")
        })
}

/// Page-level access to the forum.
#[derive(Debug, Clone)]
pub struct Fetcher {
    client: Client,
    base_url: String,
}

impl Fetcher {
    #[must_use]
    pub fn new(client: Client, base_url: &str) -> Self {
        Self {
            client,
            base_url: normalize_base_url(base_url),
        }
    }

    #[must_use]
    pub fn client(&self) -> &Client {
        &self.client
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Base URL for requests made with `session`; the session's own wins.
    fn base_for<'a>(&'a self, session: &'a Session) -> &'a str {
        session.base_url().unwrap_or(&self.base_url)
    }

    /// GET `url` with the session cookies attached.
    async fn get(
        &self,
        session: &Session,
        url: &str,
        query: &[(&str, String)],
    ) -> ScrapeResult<RawPayload> {
        debug!(url = %url, ?query, "Fetching");

        let response = self
            .client
            .get(url)
            .query(query)
            .header(COOKIE, session.cookie_header())
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(status_error(status, url, response.headers()));
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_ascii_lowercase);
        let body = response.text().await?;
        RawPayload::from_body(content_type.as_deref(), body)
    }

    /// Post ids in `community` within `range`, newest first.
    ///
    /// The stream fetches pages lazily and ends once a page's oldest post
    /// precedes the range start, or the forum stops returning a cursor. The
    /// first error ends the stream.
    pub fn list_post_ids<'a>(
        &'a self,
        session: &'a Session,
        community: &'a str,
        range: DateRange,
    ) -> impl Stream<Item = ScrapeResult<PostId>> + 'a {
        try_stream! {
            let url = format!(
                "{}/private/posts/{}/latest",
                self.base_for(session),
                urlencoding::encode(community)
            );
            let mut cursor: Option<String> = None;
            let mut seen_cursors = HashSet::new();
            let mut page_number = 1u32;

            loop {
                let query: Vec<(&str, String)> = cursor
                    .iter()
                    .map(|c| ("cursor", c.clone()))
                    .collect();
                let raw = self.get(session, &url, &query).await?;
                let page = parse_listing_page(&raw)?;

                if page.items.is_empty() {
                    debug!(community, page_number, "Listing page empty, stopping");
                    break;
                }

                let mut oldest: Option<DateTime<Utc>> = None;
                let mut yielded = 0usize;
                for item in page.items {
                    match item.posted_at {
                        Some(ts) => {
                            oldest = Some(oldest.map_or(ts, |o| o.min(ts)));
                            if !range.contains(ts) {
                                continue;
                            }
                        }
                        None => {
                            debug!(post_id = item.post_id, "Listing row has no timestamp, keeping it");
                        }
                    }
                    yielded += 1;
                    yield item.post_id;
                }

                debug!(community, page_number, yielded, "Listing page processed");

                if oldest.is_some_and(|o| range.precedes(o)) {
                    debug!(community, page_number, "Crossed start of date range, stopping");
                    break;
                }

                match page.next_cursor {
                    Some(next) if seen_cursors.insert(next.clone()) => cursor = Some(next),
                    Some(next) => {
                        warn!(community, cursor = %next, "Listing cursor repeated, stopping");
                        break;
                    }
                    None => break,
                }
                page_number += 1;
            }
        }
    }

    /// Usernames on one page of the community member listing.
    ///
    /// An empty result marks the end of the listing.
    pub async fn list_members_for_page(
        &self,
        session: &Session,
        community: &str,
        page_number: u32,
    ) -> ScrapeResult<Vec<String>> {
        let url = format!(
            "{}/private/community/{}/members",
            self.base_for(session),
            urlencoding::encode(community)
        );
        let raw = self
            .get(session, &url, &[("page", page_number.to_string())])
            .await?;
        parse_member_page(&raw)
    }

    /// Every member username in `community`, page by page until an empty page.
    ///
    /// Usernames may repeat across pages; the ingestion store's unique index
    /// absorbs duplicates.
    pub fn list_all_members<'a>(
        &'a self,
        session: &'a Session,
        community: &'a str,
    ) -> impl Stream<Item = ScrapeResult<String>> + 'a {
        try_stream! {
            let mut page_number = 1u32;
            let mut previous: Vec<String> = Vec::new();

            loop {
                let usernames = self.list_members_for_page(session, community, page_number).await?;
                if usernames.is_empty() {
                    debug!(community, page_number, "Member page empty, stopping");
                    break;
                }
                // A forum that ignores the page parameter returns page 1 forever.
                if usernames == previous {
                    warn!(community, page_number, "Member page repeated, stopping");
                    break;
                }

                debug!(community, page_number, count = usernames.len(), "Member page fetched");
                for username in &usernames {
                    yield username.clone();
                }
                previous = usernames;
                page_number += 1;
            }
        }
    }

    /// Raw detail payload for one post.
    pub async fn fetch_post_detail(
        &self,
        session: &Session,
        post_id: PostId,
    ) -> ScrapeResult<RawPayload> {
        let url = format!("{}/private/posts/{post_id}", self.base_for(session));
        self.get(session, &url, &[]).await
    }

    /// Raw profile payload for one member.
    pub async fn fetch_user_detail(
        &self,
        session: &Session,
        username: &str,
    ) -> ScrapeResult<RawPayload> {
        let url = format!(
            "{}/private/user/{}",
            self.base_for(session),
            urlencoding::encode(username)
        );
        self.get(session, &url, &[]).await
    }
}
