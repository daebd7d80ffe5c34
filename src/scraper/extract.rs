//! Raw payload → typed entity extraction.
//!
//! The forum's private API and its HTML pages both drift: keys get renamed,
//! objects get wrapped in envelopes, fields disappear. Every assumption about
//! raw shape lives in this module. Each field is looked up under a list of
//! known aliases and falls back to an empty/sentinel value when absent. Only a
//! missing identifier is an error.

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use ::scraper::{ElementRef, Html, Selector};
use serde_json::Value;

use super::error::{ScrapeError, ScrapeResult};
use super::models::{Member, Post, PostId};

/// An undecoded response body.
#[derive(Debug, Clone, PartialEq)]
pub enum RawPayload {
    Json(Value),
    Html(String),
}

impl RawPayload {
    /// Classify a response body by content type, sniffing when the header is missing.
    pub fn from_body(content_type: Option<&str>, body: String) -> ScrapeResult<Self> {
        let declared_json = content_type.is_some_and(|ct| ct.contains("json"));
        let trimmed = body.trim_start();
        let looks_json = trimmed.starts_with('{') || trimmed.starts_with('[');

        if declared_json || (content_type.is_none() && looks_json) {
            return serde_json::from_str(&body)
                .map(Self::Json)
                .map_err(|e| ScrapeError::MalformedPayload(format!("invalid JSON body: {e}")));
        }
        if looks_json {
            if let Ok(value) = serde_json::from_str(&body) {
                return Ok(Self::Json(value));
            }
        }
        Ok(Self::Html(body))
    }
}

const POST_ENVELOPES: &[&str] = &["post", "data", "result"];
const POST_ID_KEYS: &[&str] = &["postId", "post_id", "id"];
const POST_TITLE_KEYS: &[&str] = &["title", "subject"];
const POST_BODY_KEYS: &[&str] = &["body", "content", "text", "bodyHtml"];
const TIMESTAMP_KEYS: &[&str] = &["dateCreated", "createdAt", "created_at", "date", "timestamp"];
const AUTHOR_KEYS: &[&str] = &["author", "user", "createdBy"];
const AUTHOR_NAME_KEYS: &[&str] = &["username", "userName", "authorUsername"];
const COMMUNITY_KEYS: &[&str] = &["community", "communitySlug", "community_slug"];

const MEMBER_ENVELOPES: &[&str] = &["user", "member", "profile", "data"];
const USERNAME_KEYS: &[&str] = &["username", "userName", "name"];
const BIO_KEYS: &[&str] = &["bio", "about", "description", "aboutMe"];
const DISPLAY_NAME_KEYS: &[&str] = &["displayName", "fullName", "display_name"];
const LOCATION_KEYS: &[&str] = &["location", "country"];
const JOINED_KEYS: &[&str] = &["joinedAt", "dateJoined", "memberSince", "dateCreated", "createdAt"];
const POST_COUNT_KEYS: &[&str] = &["postCount", "numPosts", "post_count", "postsCount"];

const LIST_KEYS: &[&str] = &["posts", "items", "results", "data"];
const MEMBER_LIST_KEYS: &[&str] = &["members", "users", "items", "results", "data"];
const CURSOR_KEYS: &[&str] = &["nextCursor", "next_cursor", "cursor", "next"];

// ========== Posts ==========

/// Parse a post detail payload.
///
/// Fails with [`ScrapeError::MalformedPayload`] only when no post identifier
/// can be found.
pub fn parse_post(raw: &RawPayload) -> ScrapeResult<Post> {
    match raw {
        RawPayload::Json(value) => parse_post_json(value),
        RawPayload::Html(html) => parse_post_html(html),
    }
}

fn parse_post_json(value: &Value) -> ScrapeResult<Post> {
    let obj = unwrap_envelope(value, POST_ENVELOPES, POST_ID_KEYS);

    let post_id = int_field(obj, POST_ID_KEYS)
        .ok_or_else(|| ScrapeError::MalformedPayload("post payload has no identifier".into()))?;

    let mut post = Post::with_id(post_id);
    post.author = author_name(obj).unwrap_or_default();
    post.title = str_field(obj, POST_TITLE_KEYS).unwrap_or_default();
    post.body = str_field(obj, POST_BODY_KEYS)
        .map(|b| html_to_text(&b))
        .unwrap_or_default();
    post.posted_at = field(obj, TIMESTAMP_KEYS).and_then(parse_timestamp);
    post.community = community_slug(obj).unwrap_or_default();
    Ok(post)
}

/// Author may be a bare string, an object, or a flat `username` key.
fn author_name(obj: &Value) -> Option<String> {
    if let Some(author) = field(obj, AUTHOR_KEYS) {
        if let Some(name) = scalar_string(author) {
            return Some(name);
        }
        if let Some(name) = str_field(author, AUTHOR_NAME_KEYS) {
            return Some(name);
        }
    }
    str_field(obj, AUTHOR_NAME_KEYS)
}

fn community_slug(obj: &Value) -> Option<String> {
    let community = field(obj, COMMUNITY_KEYS)?;
    scalar_string(community).or_else(|| str_field(community, &["slug", "name"]))
}

static POST_ID_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse("[data-post-id]").expect("Invalid selector"));
static POST_AUTHOR_SELECTOR: Lazy<Selector> = Lazy::new(|| {
    Selector::parse("[data-author], .post-author a, a[rel=author]").expect("Invalid selector")
});
static POST_BODY_SELECTOR: Lazy<Selector> = Lazy::new(|| {
    Selector::parse(".post-body, [itemprop=text], [data-post-body]").expect("Invalid selector")
});
static POST_TITLE_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse("h1").expect("Invalid selector"));
static TIME_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse("time[datetime]").expect("Invalid selector"));
static COMMUNITY_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse("[data-community]").expect("Invalid selector"));

fn parse_post_html(html: &str) -> ScrapeResult<Post> {
    let document = Html::parse_document(html);

    let post_id = document
        .select(&POST_ID_SELECTOR)
        .find_map(|el| el.value().attr("data-post-id")?.trim().parse::<PostId>().ok())
        .ok_or_else(|| ScrapeError::MalformedPayload("post page has no data-post-id".into()))?;

    let mut post = Post::with_id(post_id);
    post.author = document
        .select(&POST_AUTHOR_SELECTOR)
        .find_map(|el| {
            el.value()
                .attr("data-author")
                .map(str::to_string)
                .or_else(|| non_empty(element_text(&el)))
        })
        .unwrap_or_default();
    post.title = first_text(&document, &POST_TITLE_SELECTOR).unwrap_or_default();
    post.body = first_text(&document, &POST_BODY_SELECTOR).unwrap_or_default();
    post.posted_at = document
        .select(&TIME_SELECTOR)
        .find_map(|el| parse_timestamp_str(el.value().attr("datetime")?));
    post.community = document
        .select(&COMMUNITY_SELECTOR)
        .find_map(|el| non_empty(el.value().attr("data-community")?.trim().to_string()))
        .unwrap_or_default();
    Ok(post)
}

// ========== Members ==========

/// Parse a member profile payload.
///
/// A missing bio yields an empty string. Fails only when no username is present.
pub fn parse_member(raw: &RawPayload) -> ScrapeResult<Member> {
    match raw {
        RawPayload::Json(value) => parse_member_json(value),
        RawPayload::Html(html) => parse_member_html(html),
    }
}

fn parse_member_json(value: &Value) -> ScrapeResult<Member> {
    let obj = unwrap_envelope(value, MEMBER_ENVELOPES, USERNAME_KEYS);

    let username = str_field(obj, USERNAME_KEYS)
        .ok_or_else(|| ScrapeError::MalformedPayload("member payload has no username".into()))?;

    let mut member = Member::with_username(username);
    member.bio = str_field(obj, BIO_KEYS)
        .map(|b| html_to_text(&b))
        .unwrap_or_default();
    member.display_name = str_field(obj, DISPLAY_NAME_KEYS);
    member.location = field(obj, LOCATION_KEYS).and_then(|loc| {
        scalar_string(loc).or_else(|| str_field(loc, &["name", "country", "label"]))
    });
    member.joined_at = field(obj, JOINED_KEYS).and_then(parse_timestamp);
    member.post_count = int_field(obj, POST_COUNT_KEYS);
    Ok(member)
}

static USERNAME_SELECTOR: Lazy<Selector> = Lazy::new(|| {
    Selector::parse("[data-username], .profile-username").expect("Invalid selector")
});
static BIO_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse(".profile-bio, [data-bio], .bio").expect("Invalid selector"));
static LOCATION_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse(".profile-location").expect("Invalid selector"));

fn parse_member_html(html: &str) -> ScrapeResult<Member> {
    let document = Html::parse_document(html);

    let username = document
        .select(&USERNAME_SELECTOR)
        .find_map(|el| {
            el.value()
                .attr("data-username")
                .and_then(|u| non_empty(u.trim().to_string()))
                .or_else(|| non_empty(element_text(&el)))
        })
        .ok_or_else(|| ScrapeError::MalformedPayload("profile page has no username".into()))?;

    let mut member = Member::with_username(username);
    member.bio = first_text(&document, &BIO_SELECTOR).unwrap_or_default();
    member.location = first_text(&document, &LOCATION_SELECTOR);
    Ok(member)
}

// ========== Listings ==========

/// One row of a post listing page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListingItem {
    pub post_id: PostId,
    pub posted_at: Option<DateTime<Utc>>,
}

/// A decoded post listing page.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListingPage {
    pub items: Vec<ListingItem>,
    /// Cursor for the next page; `None` once the forum reports no more pages.
    pub next_cursor: Option<String>,
}

/// Parse a post listing page. Rows without an identifier are dropped.
pub fn parse_listing_page(raw: &RawPayload) -> ScrapeResult<ListingPage> {
    let RawPayload::Json(value) = raw else {
        return Err(ScrapeError::MalformedPayload(
            "post listing was not JSON".to_string(),
        ));
    };

    let rows = list_field(value, LIST_KEYS).ok_or_else(|| {
        ScrapeError::MalformedPayload("post listing is not a list of posts".to_string())
    })?;

    let items = rows
        .iter()
        .filter_map(|row| {
            let post_id = int_field(row, POST_ID_KEYS)?;
            let posted_at = field(row, TIMESTAMP_KEYS).and_then(parse_timestamp);
            Some(ListingItem { post_id, posted_at })
        })
        .collect();

    let has_more = value
        .get("hasMore")
        .or_else(|| value.get("has_more"))
        .and_then(Value::as_bool);
    let next_cursor = if has_more == Some(false) {
        None
    } else {
        str_field(value, CURSOR_KEYS).or_else(|| {
            value
                .get("pagination")
                .and_then(|p| str_field(p, CURSOR_KEYS))
        })
    };

    Ok(ListingPage { items, next_cursor })
}

static MEMBER_LINK_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse("a[href*=\"/user/\"]").expect("Invalid selector"));

/// Parse one page of a community member listing into usernames, in page order.
pub fn parse_member_page(raw: &RawPayload) -> ScrapeResult<Vec<String>> {
    match raw {
        RawPayload::Json(value) => {
            let rows = list_field(value, MEMBER_LIST_KEYS).ok_or_else(|| {
                ScrapeError::MalformedPayload("member listing is not a list of members".into())
            })?;
            Ok(rows
                .iter()
                .filter_map(|row| scalar_string(row).or_else(|| str_field(row, USERNAME_KEYS)))
                .collect())
        }
        RawPayload::Html(html) => {
            let document = Html::parse_document(html);
            let mut seen = std::collections::HashSet::new();
            Ok(document
                .select(&MEMBER_LINK_SELECTOR)
                .filter_map(|el| username_from_href(el.value().attr("href")?))
                .filter(|u| seen.insert(u.clone()))
                .collect())
        }
    }
}

fn username_from_href(href: &str) -> Option<String> {
    let rest = href.split("/user/").nth(1)?;
    let name = rest.split(['/', '?', '#']).next()?;
    let decoded = urlencoding::decode(name).ok()?;
    non_empty(decoded.trim().to_string())
}

// ========== Field helpers ==========

/// Descend into a known envelope key unless the object already carries an id key.
fn unwrap_envelope<'a>(value: &'a Value, envelopes: &[&str], id_keys: &[&str]) -> &'a Value {
    if id_keys.iter().any(|k| value.get(k).is_some_and(|v| !v.is_null())) {
        return value;
    }
    envelopes
        .iter()
        .find_map(|k| value.get(k).filter(|v| v.is_object()))
        .unwrap_or(value)
}

/// First non-null value under any of `keys`.
fn field<'a>(obj: &'a Value, keys: &[&str]) -> Option<&'a Value> {
    keys.iter()
        .find_map(|k| obj.get(k).filter(|v| !v.is_null()))
}

/// Rows of a listing: a bare array, or the first array under `keys`.
///
/// An object with no list key, or with the key set to null, is an empty
/// listing. `None` means the payload has a shape no listing can take.
fn list_field<'a>(value: &'a Value, keys: &[&str]) -> Option<&'a [Value]> {
    match value {
        Value::Array(rows) => Some(rows),
        Value::Object(_) => match field(value, keys) {
            Some(Value::Array(rows)) => Some(rows),
            Some(_) => None,
            None => Some(&[]),
        },
        _ => None,
    }
}

fn scalar_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => non_empty(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn str_field(obj: &Value, keys: &[&str]) -> Option<String> {
    keys.iter()
        .find_map(|k| obj.get(k).and_then(scalar_string))
}

fn int_field(obj: &Value, keys: &[&str]) -> Option<i64> {
    keys.iter().find_map(|k| match obj.get(k)? {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    })
}

fn non_empty(s: String) -> Option<String> {
    if s.is_empty() {
        None
    } else {
        Some(s)
    }
}

/// Parse a timestamp given as RFC 3339 text, a naive date/time, or epoch seconds/millis.
#[must_use]
pub fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => parse_timestamp_str(s),
        Value::Number(n) => n.as_i64().and_then(from_epoch),
        _ => None,
    }
}

fn parse_timestamp_str(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%d %H:%M:%S"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(Utc.from_utc_datetime(&naive));
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return date.and_hms_opt(0, 0, 0).map(|n| Utc.from_utc_datetime(&n));
    }
    s.parse::<i64>().ok().and_then(from_epoch)
}

fn from_epoch(n: i64) -> Option<DateTime<Utc>> {
    // Anything past year 2286 in seconds is really milliseconds.
    if n.abs() >= 10_000_000_000 {
        DateTime::from_timestamp_millis(n)
    } else {
        DateTime::from_timestamp(n, 0)
    }
}

static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("Invalid regex"));

/// Flatten an HTML fragment to plain text with collapsed whitespace.
fn html_to_text(s: &str) -> String {
    if !s.contains('<') {
        return s.trim().to_string();
    }
    let fragment = Html::parse_fragment(s);
    let text = fragment.root_element().text().collect::<Vec<_>>().join(" ");
    WHITESPACE.replace_all(&text, " ").trim().to_string()
}

fn element_text(el: &ElementRef) -> String {
    let text = el.text().collect::<Vec<_>>().join(" ");
    WHITESPACE.replace_all(&text, " ").trim().to_string()
}

fn first_text(document: &Html, selector: &Selector) -> Option<String> {
    document
        .select(selector)
        .find_map(|el| non_empty(element_text(&el)))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn json(value: Value) -> RawPayload {
        RawPayload::Json(value)
    }

    #[test]
    fn test_parse_post_full() {
        let raw = json(json!({
            "postId": 151_579_120,
            "title": "Struggling with focus",
            "body": "<p>Hello   <b>all</b></p>",
            "dateCreated": "2020-01-15T10:00:00Z",
            "author": {"username": "Reformschooldropout"},
            "community": {"slug": "adult-adhd"}
        }));
        let post = parse_post(&raw).unwrap();
        assert_eq!(post.post_id, 151_579_120);
        assert_eq!(post.author, "Reformschooldropout");
        assert_eq!(post.body, "Hello all");
        assert_eq!(post.community, "adult-adhd");
        assert_eq!(
            post.posted_at.unwrap().to_rfc3339(),
            "2020-01-15T10:00:00+00:00"
        );
    }

    #[test]
    fn test_parse_post_missing_id_fails() {
        let raw = json(json!({"title": "no id", "body": "text"}));
        assert!(matches!(
            parse_post(&raw),
            Err(ScrapeError::MalformedPayload(_))
        ));
    }

    #[test]
    fn test_parse_post_missing_body_defaults() {
        let raw = json(json!({"id": "42", "author": "someone"}));
        let post = parse_post(&raw).unwrap();
        assert_eq!(post.post_id, 42);
        assert_eq!(post.body, "");
        assert_eq!(post.author, "someone");
        assert!(post.posted_at.is_none());
    }

    #[test]
    fn test_parse_post_envelope() {
        let raw = json(json!({"post": {"id": 9, "content": "wrapped", "username": "u1"}}));
        let post = parse_post(&raw).unwrap();
        assert_eq!(post.post_id, 9);
        assert_eq!(post.body, "wrapped");
        assert_eq!(post.author, "u1");
    }

    #[test]
    fn test_parse_post_html() {
        let html = r#"
            <html><body>
              <article data-post-id="77" data-community="adult-adhd">
                <h1>Title here</h1>
                <span class="post-author"><a href="/user/jane">jane</a></span>
                <time datetime="2020-02-01T08:30:00Z">1 Feb</time>
                <div class="post-body"><p>First line</p>
                   <p>second</p></div>
              </article>
            </body></html>
        "#;
        let post = parse_post(&RawPayload::Html(html.to_string())).unwrap();
        assert_eq!(post.post_id, 77);
        assert_eq!(post.title, "Title here");
        assert_eq!(post.author, "jane");
        assert_eq!(post.body, "First line second");
        assert_eq!(post.community, "adult-adhd");
        assert!(post.posted_at.is_some());
    }

    #[test]
    fn test_parse_member_tolerates_missing_bio() {
        let raw = json(json!({"user": {"username": "bob", "postCount": "12"}}));
        let member = parse_member(&raw).unwrap();
        assert_eq!(member.username, "bob");
        assert_eq!(member.bio, "");
        assert_eq!(member.post_count, Some(12));
        assert!(member.location.is_none());
    }

    #[test]
    fn test_parse_member_nested_location() {
        let raw = json(json!({
            "username": "amy",
            "bio": "Mum of two, diagnosed at 40.",
            "location": {"name": "Leeds"},
            "joinedAt": 1_577_836_800
        }));
        let member = parse_member(&raw).unwrap();
        assert_eq!(member.bio, "Mum of two, diagnosed at 40.");
        assert_eq!(member.location.as_deref(), Some("Leeds"));
        assert_eq!(member.joined_at.unwrap().to_rfc3339(), "2020-01-01T00:00:00+00:00");
    }

    #[test]
    fn test_parse_member_without_username_fails() {
        let raw = json(json!({"bio": "anonymous"}));
        assert!(matches!(
            parse_member(&raw),
            Err(ScrapeError::MalformedPayload(_))
        ));
    }

    #[test]
    fn test_parse_member_html() {
        let html = r#"<div class="profile"><h2 class="profile-username">carol</h2>
            <p class="profile-bio">Hi, I'm a dad.</p></div>"#;
        let member = parse_member(&RawPayload::Html(html.to_string())).unwrap();
        assert_eq!(member.username, "carol");
        assert_eq!(member.bio, "Hi, I'm a dad.");
    }

    #[test]
    fn test_parse_listing_page() {
        let raw = json(json!({
            "posts": [
                {"postId": 1, "dateCreated": "2020-01-10T00:00:00Z"},
                {"title": "row without id"},
                {"postId": "2", "createdAt": 1_578_000_000_000_i64}
            ],
            "nextCursor": 2
        }));
        let page = parse_listing_page(&raw).unwrap();
        assert_eq!(page.items.len(), 2);
        assert_eq!(page.items[1].post_id, 2);
        assert!(page.items[1].posted_at.is_some());
        assert_eq!(page.next_cursor.as_deref(), Some("2"));
    }

    #[test]
    fn test_parse_listing_page_end() {
        let raw = json(json!({"items": [], "nextCursor": "x", "hasMore": false}));
        let page = parse_listing_page(&raw).unwrap();
        assert!(page.items.is_empty());
        assert!(page.next_cursor.is_none());

        let raw = json(json!([{"id": 5}]));
        let page = parse_listing_page(&raw).unwrap();
        assert_eq!(page.items.len(), 1);
        assert!(page.next_cursor.is_none());
    }

    #[test]
    fn test_listing_without_rows_is_empty() {
        for body in [
            json!({}),
            json!({"posts": null}),
            json!({"posts": null, "nextCursor": null}),
        ] {
            let page = parse_listing_page(&json(body)).unwrap();
            assert!(page.items.is_empty());
            assert!(page.next_cursor.is_none());
        }
        assert!(parse_member_page(&json(json!({"members": null}))).unwrap().is_empty());
        assert!(parse_member_page(&json(json!({}))).unwrap().is_empty());

        assert!(matches!(
            parse_listing_page(&json(json!({"posts": "oops"}))),
            Err(ScrapeError::MalformedPayload(_))
        ));
        assert!(matches!(
            parse_listing_page(&json(json!(42))),
            Err(ScrapeError::MalformedPayload(_))
        ));
    }

    #[test]
    fn test_parse_member_page_json_and_html() {
        let raw = json(json!({"members": [{"username": "a"}, "b", {"id": 3}]}));
        assert_eq!(parse_member_page(&raw).unwrap(), vec!["a", "b"]);

        let html = r#"<ul>
            <li><a href="/user/alice">alice</a></li>
            <li><a href="https://forum.example/user/bob%20smith?tab=posts">bob</a></li>
            <li><a href="/user/alice/posts">again</a></li>
        </ul>"#;
        let names = parse_member_page(&RawPayload::Html(html.to_string())).unwrap();
        assert_eq!(names, vec!["alice", "bob smith"]);
    }

    #[test]
    fn test_raw_payload_from_body() {
        let raw = RawPayload::from_body(Some("application/json"), r#"{"a":1}"#.into()).unwrap();
        assert!(matches!(raw, RawPayload::Json(_)));

        let raw = RawPayload::from_body(Some("text/html"), "<p>x</p>".into()).unwrap();
        assert!(matches!(raw, RawPayload::Html(_)));

        let err = RawPayload::from_body(Some("application/json"), "{oops".into());
        assert!(matches!(err, Err(ScrapeError::MalformedPayload(_))));
    }

    #[test]
    fn test_parse_timestamp_formats() {
        assert!(parse_timestamp(&json!("2020-01-31 23:59:59")).is_some());
        assert!(parse_timestamp(&json!("2020-01-31")).is_some());
        assert!(parse_timestamp(&json!("1577836800")).is_some());
        assert!(parse_timestamp(&json!("yesterday")).is_none());
        assert_eq!(
            parse_timestamp(&json!(1_577_836_800_000_i64)),
            parse_timestamp(&json!(1_577_836_800))
        );
    }
}
