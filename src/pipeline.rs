//! Idempotent pipeline tasks, one per orchestrator step.
//!
//! Every task opens nothing itself: the [`Pipeline`] owns the database
//! handle, the scraper, the session store and the chat client, and each task
//! runs to completion before returning.

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use anyhow::{bail, Context, Result};
use tracing::{info, warn};

use crate::config::Config;
use crate::constants::HIDDEN_USERNAME;
use crate::db::{self, Database, GenderHomogenization};
use crate::enrich::{self, ChatClient, EnrichmentSummary, OllamaClient};
use crate::scraper::{
    BatchFailure, FileSessionStore, ForumScraper, PostId, ScrapeError, Session, SessionStore,
};

/// A task the orchestrator can trigger by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Task {
    InitSession,
    CheckSession,
    CleanIngestion,
    CleanStaging,
    FetchPostIds,
    FetchMembers,
    FetchMembersForPosts,
    FetchPostDetails,
    FetchMemberDetails,
    InferGender,
    HomogenizeGender,
    AnalyzeSentiment,
    ClassifySelfReports,
    RemoveHiddenMembers,
}

impl Task {
    pub const ALL: [Self; 14] = [
        Self::InitSession,
        Self::CheckSession,
        Self::CleanIngestion,
        Self::CleanStaging,
        Self::FetchPostIds,
        Self::FetchMembers,
        Self::FetchMembersForPosts,
        Self::FetchPostDetails,
        Self::FetchMemberDetails,
        Self::InferGender,
        Self::HomogenizeGender,
        Self::AnalyzeSentiment,
        Self::ClassifySelfReports,
        Self::RemoveHiddenMembers,
    ];

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::InitSession => "init-session",
            Self::CheckSession => "check-session",
            Self::CleanIngestion => "clean-ingestion",
            Self::CleanStaging => "clean-staging",
            Self::FetchPostIds => "fetch-post-ids",
            Self::FetchMembers => "fetch-members",
            Self::FetchMembersForPosts => "fetch-members-for-posts",
            Self::FetchPostDetails => "fetch-post-details",
            Self::FetchMemberDetails => "fetch-member-details",
            Self::InferGender => "infer-gender",
            Self::HomogenizeGender => "homogenize-gender",
            Self::AnalyzeSentiment => "analyze-sentiment",
            Self::ClassifySelfReports => "classify-self-reports",
            Self::RemoveHiddenMembers => "remove-hidden-members",
        }
    }
}

impl fmt::Display for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Returned for a task name that is not in [`Task::ALL`].
#[derive(Debug, thiserror::Error)]
#[error("unknown task '{0}'")]
pub struct UnknownTask(pub String);

impl FromStr for Task {
    type Err = UnknownTask;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|task| task.name() == s)
            .ok_or_else(|| UnknownTask(s.to_string()))
    }
}

/// Counts reported by a detail-fetch task.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DetailSummary {
    pub requested: usize,
    pub stored: u64,
    pub failed: usize,
    /// Keys marked processed, including those the forum reports as gone.
    pub processed: u64,
}

pub struct Pipeline {
    config: Config,
    db: Database,
    scraper: ForumScraper,
    sessions: Box<dyn SessionStore>,
    chat: Box<dyn ChatClient>,
}

impl Pipeline {
    #[must_use]
    pub fn new(
        config: Config,
        db: Database,
        scraper: ForumScraper,
        sessions: Box<dyn SessionStore>,
        chat: Box<dyn ChatClient>,
    ) -> Self {
        Self {
            config,
            db,
            scraper,
            sessions,
            chat,
        }
    }

    /// Open the database and build the production collaborators.
    pub async fn from_config(config: Config) -> Result<Self> {
        let db = Database::new(&config.database_path)
            .await
            .context("Failed to initialize database")?;
        let scraper = ForumScraper::from_config(&config).context("Failed to build scraper")?;
        let sessions = Box::new(FileSessionStore::new(config.session_file.clone()));
        let chat = Box::new(
            OllamaClient::new(&config.ollama_url, config.enrichment_timeout)
                .context("Failed to build chat client")?,
        );
        Ok(Self::new(config, db, scraper, sessions, chat))
    }

    #[must_use]
    pub const fn database(&self) -> &Database {
        &self.db
    }

    /// Run one task by its [`Task`] value, logging its outcome.
    pub async fn run(&self, task: Task) -> Result<()> {
        info!(%task, "Running task");
        match task {
            Task::InitSession => {
                self.init_session().await?;
            }
            Task::CheckSession => {
                self.check_session().await?;
            }
            Task::CleanIngestion => self.clean_ingestion().await?,
            Task::CleanStaging => self.clean_staging().await?,
            Task::FetchPostIds => {
                self.fetch_post_ids().await?;
            }
            Task::FetchMembers => {
                self.fetch_members().await?;
            }
            Task::FetchMembersForPosts => {
                self.fetch_members_for_posts().await?;
            }
            Task::FetchPostDetails => {
                self.fetch_post_details().await?;
            }
            Task::FetchMemberDetails => {
                self.fetch_member_details().await?;
            }
            Task::InferGender => {
                self.infer_gender().await?;
            }
            Task::HomogenizeGender => {
                self.homogenize_gender().await?;
            }
            Task::AnalyzeSentiment => {
                self.analyze_sentiment().await?;
            }
            Task::ClassifySelfReports => {
                self.classify_self_reports().await?;
            }
            Task::RemoveHiddenMembers => {
                self.remove_hidden_members().await?;
            }
        }
        info!(%task, "Task complete");
        Ok(())
    }

    /// Log in and persist a fresh session.
    pub async fn init_session(&self) -> Result<Session> {
        self.scraper
            .refresh_session(self.sessions.as_ref())
            .await
            .context("Failed to initialize forum session")
    }

    /// Confirm the persisted session file loads. No network traffic.
    pub async fn check_session(&self) -> Result<Session> {
        let session = self
            .scraper
            .load_session(self.sessions.as_ref())
            .await
            .context("Stored session is unusable")?;
        info!(session = ?session, "Stored session loaded");
        Ok(session)
    }

    pub async fn clean_ingestion(&self) -> Result<()> {
        db::clear_ingestion(self.db.pool()).await?;
        info!("Ingestion store cleared");
        Ok(())
    }

    pub async fn clean_staging(&self) -> Result<()> {
        db::clear_staging(self.db.pool()).await?;
        info!("Staging store cleared");
        Ok(())
    }

    /// Collect post ids for the configured window and queue them.
    ///
    /// Returns the number of newly queued ids.
    pub async fn fetch_post_ids(&self) -> Result<u64> {
        let Some(start) = self.config.start_date.as_deref() else {
            bail!("START_DATE must be set to fetch post ids");
        };
        let session = self.check_session().await?;
        let ids = self
            .scraper
            .post_ids(
                &session,
                &self.config.community,
                start,
                self.config.end_date.as_deref(),
            )
            .await
            .context("Failed to list post ids")?;
        let queued = db::insert_pending_post_ids(self.db.pool(), &ids).await?;
        info!(found = ids.len(), queued, "Post ids queued");
        Ok(queued)
    }

    /// Queue every community member's username.
    pub async fn fetch_members(&self) -> Result<u64> {
        let session = self.check_session().await?;
        let usernames = self
            .scraper
            .all_members(&session, &self.config.community)
            .await
            .context("Failed to list community members")?;
        let queued = db::insert_pending_usernames(self.db.pool(), &usernames).await?;
        info!(found = usernames.len(), queued, "Member usernames queued");
        Ok(queued)
    }

    /// Queue the author of every staged post. No network traffic.
    pub async fn fetch_members_for_posts(&self) -> Result<u64> {
        let authors = db::get_staged_post_authors(self.db.pool()).await?;
        let queued = db::insert_pending_usernames(self.db.pool(), &authors).await?;
        info!(authors = authors.len(), queued, "Post authors queued");
        Ok(queued)
    }

    /// Fetch details for every pending post id with a freshly generated session.
    pub async fn fetch_post_details(&self) -> Result<DetailSummary> {
        let session = self.init_session().await?;
        let post_ids = db::get_pending_post_ids(self.db.pool()).await?;
        let outcome = self
            .scraper
            .post_details(&session, &post_ids)
            .await
            .context("Post detail batch aborted")?;

        let stored = db::upsert_posts(self.db.pool(), &outcome.fetched).await?;
        let retry = retryable_keys(&outcome.failures);
        let done: Vec<PostId> = post_ids
            .iter()
            .copied()
            .filter(|id| !retry.contains(id.to_string().as_str()))
            .collect();
        let processed = db::mark_post_ids_processed(self.db.pool(), &done).await?;

        let summary = DetailSummary {
            requested: post_ids.len(),
            stored,
            failed: outcome.failures.len(),
            processed,
        };
        log_detail_summary("posts", &summary);
        Ok(summary)
    }

    /// Fetch profiles for every pending username with a freshly generated session.
    pub async fn fetch_member_details(&self) -> Result<DetailSummary> {
        let session = self.init_session().await?;
        let usernames = db::get_pending_usernames(self.db.pool()).await?;
        let outcome = self
            .scraper
            .user_details(&session, &usernames)
            .await
            .context("Member detail batch aborted")?;

        let stored = db::upsert_members(self.db.pool(), &outcome.fetched).await?;
        // Marked by requested key: the profile may spell the username differently.
        let retry = retryable_keys(&outcome.failures);
        let done: Vec<String> = usernames
            .iter()
            .filter(|u| !retry.contains(u.as_str()))
            .cloned()
            .collect();
        let processed = db::mark_usernames_processed(self.db.pool(), &done).await?;

        let summary = DetailSummary {
            requested: usernames.len(),
            stored,
            failed: outcome.failures.len(),
            processed,
        };
        log_detail_summary("members", &summary);
        Ok(summary)
    }

    pub async fn infer_gender(&self) -> Result<EnrichmentSummary> {
        self.log_chat_health().await;
        enrich::infer_member_genders(&self.db, self.chat.as_ref(), &self.config.gender_model).await
    }

    /// Fold legacy gender labels into the fixed vocabulary.
    pub async fn homogenize_gender(&self) -> Result<GenderHomogenization> {
        let result = db::homogenize_genders(self.db.pool()).await?;
        info!(
            woman_to_female = result.woman_to_female,
            man_to_male = result.man_to_male,
            to_other = result.to_other,
            "Genders homogenized"
        );
        Ok(result)
    }

    pub async fn analyze_sentiment(&self) -> Result<EnrichmentSummary> {
        self.log_chat_health().await;
        enrich::analyze_post_sentiment(&self.db, self.chat.as_ref(), &self.config.sentiment_model)
            .await
    }

    pub async fn classify_self_reports(&self) -> Result<EnrichmentSummary> {
        self.log_chat_health().await;
        enrich::classify_post_self_reports(
            &self.db,
            self.chat.as_ref(),
            &self.config.self_report_model,
        )
        .await
    }

    /// Delete the placeholder member the forum uses for hidden accounts.
    pub async fn remove_hidden_members(&self) -> Result<u64> {
        let removed = db::delete_member(self.db.pool(), HIDDEN_USERNAME).await?;
        info!(removed, "Hidden members removed");
        Ok(removed)
    }

    async fn log_chat_health(&self) {
        if !self.chat.is_reachable().await {
            warn!(url = %self.config.ollama_url, "Chat endpoint not reachable, classifications will fall back");
        }
    }
}

/// Keys that stay pending for the next run. Entities the forum reports as
/// gone are not retried.
fn retryable_keys(failures: &[BatchFailure]) -> HashSet<&str> {
    failures
        .iter()
        .filter(|f| !matches!(f.error, ScrapeError::NotFound(_)))
        .map(|f| f.key.as_str())
        .collect()
}

fn log_detail_summary(kind: &str, summary: &DetailSummary) {
    info!(
        kind,
        requested = summary.requested,
        stored = summary.stored,
        failed = summary.failed,
        processed = summary.processed,
        "Detail fetch complete"
    );
}
