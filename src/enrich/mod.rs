//! Model-backed enrichment of staged posts and members.
//!
//! Each task reads its inputs from staging, classifies them one at a time,
//! and writes the results back in a single transaction. Classification
//! failures never abort a task: they are counted in
//! [`EnrichmentSummary::fallbacks`] and leave the stored value untouched.

mod classify;
mod client;

pub use classify::{
    classify_gender, classify_self_report, classify_sentiment, gender_from_output,
    self_report_from_output, sentiment_from_output, Classified, SelfReport, Source,
};
pub use client::{ChatClient, EnrichmentError, OllamaClient};

use anyhow::Result;
use tracing::info;

use crate::db::{self, Database};

/// Counts reported by an enrichment task.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EnrichmentSummary {
    /// Rows read from staging.
    pub examined: usize,
    /// Rows written back.
    pub updated: u64,
    /// Rows skipped because the model call failed or answered outside the
    /// vocabulary. Empty inputs are not counted.
    pub fallbacks: usize,
}

impl EnrichmentSummary {
    /// Count one classification. Returns whether its value should be stored.
    fn record(&mut self, source: Source) -> bool {
        self.examined += 1;
        if source == Source::Fallback {
            self.fallbacks += 1;
            return false;
        }
        true
    }
}

/// Infer gender for every staged member that does not have one yet.
pub async fn infer_member_genders(
    db: &Database,
    chat: &dyn ChatClient,
    model: &str,
) -> Result<EnrichmentSummary> {
    let members = db::get_members_needing_gender(db.pool()).await?;
    let mut summary = EnrichmentSummary::default();
    let mut updates = Vec::with_capacity(members.len());

    for member in members {
        let result = classify_gender(chat, model, &member.bio).await;
        if summary.record(result.source) {
            updates.push((member.username, result.value));
        }
    }

    summary.updated = db::set_member_genders(db.pool(), &updates).await?;
    info!(
        examined = summary.examined,
        updated = summary.updated,
        fallbacks = summary.fallbacks,
        "Gender inference complete"
    );
    Ok(summary)
}

/// Classify the sentiment of every staged post body.
pub async fn analyze_post_sentiment(
    db: &Database,
    chat: &dyn ChatClient,
    model: &str,
) -> Result<EnrichmentSummary> {
    let posts = db::get_post_texts(db.pool()).await?;
    let mut summary = EnrichmentSummary::default();
    let mut updates = Vec::with_capacity(posts.len());

    for post in posts {
        let result = classify_sentiment(chat, model, &post.body).await;
        if summary.record(result.source) {
            updates.push((post.post_id, result.value));
        }
    }

    summary.updated = db::set_post_sentiments(db.pool(), &updates).await?;
    info!(
        examined = summary.examined,
        updated = summary.updated,
        fallbacks = summary.fallbacks,
        "Sentiment analysis complete"
    );
    Ok(summary)
}

/// Flag self-diagnosis and self-medication in every staged post body.
pub async fn classify_post_self_reports(
    db: &Database,
    chat: &dyn ChatClient,
    model: &str,
) -> Result<EnrichmentSummary> {
    let posts = db::get_post_texts(db.pool()).await?;
    let mut summary = EnrichmentSummary::default();
    let mut updates = Vec::with_capacity(posts.len());

    for post in posts {
        let result = classify_self_report(chat, model, &post.body).await;
        if summary.record(result.source) {
            updates.push((
                post.post_id,
                result.value.self_diagnosed,
                result.value.self_medicated,
            ));
        }
    }

    summary.updated = db::set_post_self_reports(db.pool(), &updates).await?;
    info!(
        examined = summary.examined,
        updated = summary.updated,
        fallbacks = summary.fallbacks,
        "Self-report classification complete"
    );
    Ok(summary)
}
