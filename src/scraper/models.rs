use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Forum-assigned post identifier.
pub type PostId = i64;

/// A forum post with its enrichment fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Post {
    pub post_id: PostId,
    /// Author username; empty when the payload did not name one.
    pub author: String,
    pub title: String,
    pub body: String,
    pub posted_at: Option<DateTime<Utc>>,
    pub community: String,
    pub sentiment: Sentiment,
    pub self_diagnosed: Flag,
    pub self_medicated: Flag,
}

impl Post {
    /// A post with the given id and every other field at its default.
    #[must_use]
    pub fn with_id(post_id: PostId) -> Self {
        Self {
            post_id,
            author: String::new(),
            title: String::new(),
            body: String::new(),
            posted_at: None,
            community: String::new(),
            sentiment: Sentiment::Neutral,
            self_diagnosed: Flag::No,
            self_medicated: Flag::No,
        }
    }
}

/// A forum member profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Member {
    pub username: String,
    /// Free-text bio; empty means "no signal" for enrichment.
    pub bio: String,
    pub display_name: Option<String>,
    pub location: Option<String>,
    pub joined_at: Option<DateTime<Utc>>,
    pub post_count: Option<i64>,
    pub gender: Gender,
}

impl Member {
    #[must_use]
    pub fn with_username(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            bio: String::new(),
            display_name: None,
            location: None,
            joined_at: None,
            post_count: None,
            gender: Gender::Unknown,
        }
    }
}

/// Inferred member gender.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Gender {
    Male,
    Female,
    Other,
    #[default]
    Unknown,
}

impl Gender {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Male => "male",
            Self::Female => "female",
            Self::Other => "other",
            Self::Unknown => "unknown",
        }
    }

    #[must_use]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "male" => Some(Self::Male),
            "female" => Some(Self::Female),
            "other" => Some(Self::Other),
            "unknown" => Some(Self::Unknown),
            _ => None,
        }
    }
}

/// Inferred post sentiment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Sentiment {
    Positive,
    Negative,
    #[default]
    Neutral,
}

impl Sentiment {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Positive => "positive",
            Self::Negative => "negative",
            Self::Neutral => "neutral",
        }
    }

    #[must_use]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "positive" => Some(Self::Positive),
            "negative" => Some(Self::Negative),
            "neutral" => Some(Self::Neutral),
            _ => None,
        }
    }
}

/// Yes/No flag as stored by the self-report classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum Flag {
    Yes,
    #[default]
    No,
}

impl Flag {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Yes => "Yes",
            Self::No => "No",
        }
    }

    #[must_use]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "Yes" => Some(Self::Yes),
            "No" => Some(Self::No),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_sentinels() {
        let post = Post::with_id(7);
        assert_eq!(post.sentiment, Sentiment::Neutral);
        assert_eq!(post.self_diagnosed, Flag::No);
        assert_eq!(post.self_medicated, Flag::No);
        assert_eq!(Member::with_username("a").gender, Gender::Unknown);
    }

    #[test]
    fn test_vocabulary_strings() {
        for g in [Gender::Male, Gender::Female, Gender::Other, Gender::Unknown] {
            assert_eq!(Gender::from_str(g.as_str()), Some(g));
        }
        assert_eq!(Gender::from_str("woman"), None);
        assert_eq!(Sentiment::from_str("mixed"), None);
        assert_eq!(Flag::from_str("yes"), None);
    }
}
