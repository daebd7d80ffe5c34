use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::scraper::{Flag, Gender, Member, Post, Sentiment};

/// A staged post row.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct StagedPost {
    pub post_id: i64,
    pub author: String,
    pub title: String,
    pub body: String,
    pub community: String,
    pub posted_at: Option<String>,
    pub sentiment: String,
    pub self_diagnosed: String,
    pub self_medicated: String,
    pub fetched_at: String,
}

impl StagedPost {
    /// Convert to the typed entity. Unrecognised enrichment values read as sentinels.
    #[must_use]
    pub fn into_post(self) -> Post {
        Post {
            post_id: self.post_id,
            author: self.author,
            title: self.title,
            body: self.body,
            posted_at: self.posted_at.as_deref().and_then(parse_stored_time),
            community: self.community,
            sentiment: Sentiment::from_str(&self.sentiment).unwrap_or_default(),
            self_diagnosed: Flag::from_str(&self.self_diagnosed).unwrap_or_default(),
            self_medicated: Flag::from_str(&self.self_medicated).unwrap_or_default(),
        }
    }
}

/// A staged member row.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct StagedMember {
    pub username: String,
    pub bio: String,
    pub display_name: Option<String>,
    pub location: Option<String>,
    pub joined_at: Option<String>,
    pub post_count: Option<i64>,
    pub gender: String,
    pub fetched_at: String,
}

impl StagedMember {
    #[must_use]
    pub fn into_member(self) -> Member {
        Member {
            username: self.username,
            bio: self.bio,
            display_name: self.display_name,
            location: self.location,
            joined_at: self.joined_at.as_deref().and_then(parse_stored_time),
            post_count: self.post_count,
            gender: Gender::from_str(&self.gender).unwrap_or_default(),
        }
    }
}

/// Text to classify for one staged post.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct PostText {
    pub post_id: i64,
    pub body: String,
}

/// Text to classify for one staged member.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct MemberBio {
    pub username: String,
    pub bio: String,
}

/// Rows touched by each step of gender homogenization.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GenderHomogenization {
    pub woman_to_female: u64,
    pub man_to_male: u64,
    pub to_other: u64,
}

/// Timestamps are stored as RFC 3339 text.
#[must_use]
pub fn format_stored_time(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339()
}

fn parse_stored_time(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}
