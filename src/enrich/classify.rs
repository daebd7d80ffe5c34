//! Validation of free-text model output against each task's fixed vocabulary.
//!
//! Model output is never stored as-is. Anything outside the vocabulary, and
//! any failed call, resolves to the task's sentinel.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use tracing::{debug, warn};

use super::client::ChatClient;
use crate::scraper::{Flag, Gender, Sentiment};

/// How a classification was reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    /// Valid model output.
    Model,
    /// Input was empty; the model was not called.
    EmptyInput,
    /// Call failed or output was out of vocabulary.
    Fallback,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classified<T> {
    pub value: T,
    pub source: Source,
}

impl<T> Classified<T> {
    const fn new(value: T, source: Source) -> Self {
        Self { value, source }
    }
}

/// Self-diagnosis and self-medication flags for one post.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SelfReport {
    pub self_diagnosed: Flag,
    pub self_medicated: Flag,
}

/// Lowercase, trim, and drop surrounding quotes and trailing punctuation.
fn normalize_label(output: &str) -> String {
    output
        .trim()
        .trim_matches(|c: char| c == '"' || c == '\'' || c == '`')
        .trim_end_matches(['.', '!'])
        .trim()
        .to_lowercase()
}

#[must_use]
pub fn gender_from_output(output: &str) -> Option<Gender> {
    match normalize_label(output).as_str() {
        "male" | "man" => Some(Gender::Male),
        "female" | "woman" => Some(Gender::Female),
        "unknown" => Some(Gender::Unknown),
        _ => None,
    }
}

#[must_use]
pub fn sentiment_from_output(output: &str) -> Option<Sentiment> {
    Sentiment::from_str(&normalize_label(output))
}

static JSON_OBJECT: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)\{.*\}").expect("Invalid regex"));

/// Parse the self-report classifier's JSON answer.
///
/// Returns `None` when no JSON object can be found. Missing keys and
/// unrecognised values read as [`Flag::No`].
#[must_use]
pub fn self_report_from_output(output: &str) -> Option<SelfReport> {
    let candidate = JSON_OBJECT.find(output)?.as_str();
    let Value::Object(map) = serde_json::from_str::<Value>(candidate).ok()? else {
        return None;
    };
    let flag = |key: &str| match map.get(key) {
        Some(Value::Bool(true)) => Flag::Yes,
        Some(Value::String(s)) if s.trim().eq_ignore_ascii_case("yes") => Flag::Yes,
        _ => Flag::No,
    };
    Some(SelfReport {
        self_diagnosed: flag("self-diagnosed"),
        self_medicated: flag("self-medicated"),
    })
}

/// Infer a member's gender from their bio.
pub async fn classify_gender(chat: &dyn ChatClient, model: &str, bio: &str) -> Classified<Gender> {
    let bio = bio.trim();
    if bio.is_empty() {
        return Classified::new(Gender::Unknown, Source::EmptyInput);
    }
    match chat.chat(model, bio).await {
        Ok(output) => match gender_from_output(&output) {
            Some(gender) => Classified::new(gender, Source::Model),
            None => {
                warn!(output = %output.trim(), "Unexpected gender label, using unknown");
                Classified::new(Gender::Unknown, Source::Fallback)
            }
        },
        Err(e) => {
            warn!(error = %e, "Gender classification failed, using unknown");
            Classified::new(Gender::Unknown, Source::Fallback)
        }
    }
}

/// Classify a post body's sentiment.
pub async fn classify_sentiment(
    chat: &dyn ChatClient,
    model: &str,
    body: &str,
) -> Classified<Sentiment> {
    let body = body.trim();
    if body.is_empty() {
        return Classified::new(Sentiment::Neutral, Source::EmptyInput);
    }
    match chat.chat(model, body).await {
        Ok(output) => match sentiment_from_output(&output) {
            Some(sentiment) => Classified::new(sentiment, Source::Model),
            None => {
                warn!(output = %output.trim(), "Unexpected sentiment label, using neutral");
                Classified::new(Sentiment::Neutral, Source::Fallback)
            }
        },
        Err(e) => {
            warn!(error = %e, "Sentiment classification failed, using neutral");
            Classified::new(Sentiment::Neutral, Source::Fallback)
        }
    }
}

/// Detect self-diagnosis and self-medication in a post body.
pub async fn classify_self_report(
    chat: &dyn ChatClient,
    model: &str,
    body: &str,
) -> Classified<SelfReport> {
    let body = body.trim();
    if body.is_empty() {
        return Classified::new(SelfReport::default(), Source::EmptyInput);
    }
    match chat.chat(model, body).await {
        Ok(output) => match self_report_from_output(&output) {
            Some(report) => {
                debug!(?report, "Self-report classified");
                Classified::new(report, Source::Model)
            }
            None => {
                warn!(output = %output.trim(), "Unparseable self-report output, using No/No");
                Classified::new(SelfReport::default(), Source::Fallback)
            }
        },
        Err(e) => {
            warn!(error = %e, "Self-report classification failed, using No/No");
            Classified::new(SelfReport::default(), Source::Fallback)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gender_labels() {
        assert_eq!(gender_from_output("male"), Some(Gender::Male));
        assert_eq!(gender_from_output("  Female.\n"), Some(Gender::Female));
        assert_eq!(gender_from_output("woman"), Some(Gender::Female));
        assert_eq!(gender_from_output("\"unknown\""), Some(Gender::Unknown));
        assert_eq!(gender_from_output("I think male"), None);
        assert_eq!(gender_from_output("other"), None);
        assert_eq!(gender_from_output(""), None);
    }

    #[test]
    fn test_sentiment_labels() {
        assert_eq!(sentiment_from_output("Positive"), Some(Sentiment::Positive));
        assert_eq!(sentiment_from_output("negative!"), Some(Sentiment::Negative));
        assert_eq!(sentiment_from_output("mixed"), None);
    }

    #[test]
    fn test_self_report_parsing() {
        let report =
            self_report_from_output(r#"{"self-diagnosed": "Yes", "self-medicated": "No"}"#).unwrap();
        assert_eq!(report.self_diagnosed, Flag::Yes);
        assert_eq!(report.self_medicated, Flag::No);

        let report = self_report_from_output(
            "Here you go:\n```json\n{\"self-medicated\": true}\n```",
        )
        .unwrap();
        assert_eq!(report.self_diagnosed, Flag::No);
        assert_eq!(report.self_medicated, Flag::Yes);

        let report = self_report_from_output(r#"{"self-diagnosed": "maybe"}"#).unwrap();
        assert_eq!(report.self_diagnosed, Flag::No);

        assert!(self_report_from_output("Yes and yes").is_none());
        assert!(self_report_from_output("{not json}").is_none());
    }
}
