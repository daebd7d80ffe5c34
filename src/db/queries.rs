use anyhow::{Context, Result};
use sqlx::SqlitePool;

use super::models::{
    format_stored_time, GenderHomogenization, MemberBio, PostText, StagedMember, StagedPost,
};
use crate::scraper::{Flag, Gender, Member, Post, PostId, Sentiment};

// ========== Ingestion: pending post ids ==========

/// Queue post ids for detail fetching. Ids already queued are ignored.
///
/// Returns the number of newly queued ids.
pub async fn insert_pending_post_ids(pool: &SqlitePool, post_ids: &[PostId]) -> Result<u64> {
    let mut tx = pool.begin().await?;
    let mut inserted = 0;
    for post_id in post_ids {
        inserted += sqlx::query("INSERT OR IGNORE INTO pending_posts (post_id) VALUES (?)")
            .bind(post_id)
            .execute(&mut *tx)
            .await
            .context("Failed to queue post id")?
            .rows_affected();
    }
    tx.commit().await.context("Failed to commit post ids")?;
    Ok(inserted)
}

/// Post ids not yet detail-fetched, in ascending order.
pub async fn get_pending_post_ids(pool: &SqlitePool) -> Result<Vec<PostId>> {
    let rows: Vec<(i64,)> =
        sqlx::query_as("SELECT post_id FROM pending_posts WHERE processed_at IS NULL ORDER BY post_id")
            .fetch_all(pool)
            .await
            .context("Failed to fetch pending post ids")?;
    Ok(rows.into_iter().map(|(id,)| id).collect())
}

pub async fn mark_post_ids_processed(pool: &SqlitePool, post_ids: &[PostId]) -> Result<u64> {
    let mut tx = pool.begin().await?;
    let mut updated = 0;
    for post_id in post_ids {
        updated += sqlx::query(
            "UPDATE pending_posts SET processed_at = datetime('now') WHERE post_id = ?",
        )
        .bind(post_id)
        .execute(&mut *tx)
        .await
        .context("Failed to mark post id processed")?
        .rows_affected();
    }
    tx.commit().await?;
    Ok(updated)
}

// ========== Ingestion: pending usernames ==========

/// Queue usernames for profile fetching. Duplicates and blanks are ignored.
pub async fn insert_pending_usernames(pool: &SqlitePool, usernames: &[String]) -> Result<u64> {
    let mut tx = pool.begin().await?;
    let mut inserted = 0;
    for username in usernames.iter().map(|u| u.trim()).filter(|u| !u.is_empty()) {
        inserted += sqlx::query("INSERT OR IGNORE INTO pending_members (username) VALUES (?)")
            .bind(username)
            .execute(&mut *tx)
            .await
            .context("Failed to queue username")?
            .rows_affected();
    }
    tx.commit().await.context("Failed to commit usernames")?;
    Ok(inserted)
}

pub async fn get_pending_usernames(pool: &SqlitePool) -> Result<Vec<String>> {
    let rows: Vec<(String,)> = sqlx::query_as(
        "SELECT username FROM pending_members WHERE processed_at IS NULL ORDER BY username",
    )
    .fetch_all(pool)
    .await
    .context("Failed to fetch pending usernames")?;
    Ok(rows.into_iter().map(|(u,)| u).collect())
}

pub async fn mark_usernames_processed(pool: &SqlitePool, usernames: &[String]) -> Result<u64> {
    let mut tx = pool.begin().await?;
    let mut updated = 0;
    for username in usernames {
        updated += sqlx::query(
            "UPDATE pending_members SET processed_at = datetime('now') WHERE username = ?",
        )
        .bind(username)
        .execute(&mut *tx)
        .await
        .context("Failed to mark username processed")?
        .rows_affected();
    }
    tx.commit().await?;
    Ok(updated)
}

/// Empty both ingestion tables.
pub async fn clear_ingestion(pool: &SqlitePool) -> Result<()> {
    sqlx::query("DELETE FROM pending_posts")
        .execute(pool)
        .await
        .context("Failed to clear pending posts")?;
    sqlx::query("DELETE FROM pending_members")
        .execute(pool)
        .await
        .context("Failed to clear pending members")?;
    Ok(())
}

// ========== Staging: posts ==========

/// Insert or refresh staged posts keyed by post id.
///
/// Scraped fields are overwritten on conflict; enrichment fields are left alone
/// so a re-fetch never discards earlier classifications.
pub async fn upsert_posts(pool: &SqlitePool, posts: &[Post]) -> Result<u64> {
    let mut tx = pool.begin().await?;
    let mut written = 0;
    for post in posts {
        written += sqlx::query(
            r"
            INSERT INTO posts (post_id, author, title, body, community, posted_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(post_id) DO UPDATE SET
                author = excluded.author,
                title = excluded.title,
                body = excluded.body,
                community = excluded.community,
                posted_at = excluded.posted_at,
                fetched_at = datetime('now')
            ",
        )
        .bind(post.post_id)
        .bind(&post.author)
        .bind(&post.title)
        .bind(&post.body)
        .bind(&post.community)
        .bind(post.posted_at.as_ref().map(format_stored_time))
        .execute(&mut *tx)
        .await
        .context("Failed to upsert post")?
        .rows_affected();
    }
    tx.commit().await.context("Failed to commit posts")?;
    Ok(written)
}

pub async fn get_staged_post(pool: &SqlitePool, post_id: PostId) -> Result<Option<StagedPost>> {
    sqlx::query_as("SELECT * FROM posts WHERE post_id = ?")
        .bind(post_id)
        .fetch_optional(pool)
        .await
        .context("Failed to fetch staged post")
}

pub async fn count_staged_posts(pool: &SqlitePool) -> Result<i64> {
    let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM posts")
        .fetch_one(pool)
        .await
        .context("Failed to count staged posts")?;
    Ok(count)
}

/// Body text of every staged post, for classification.
pub async fn get_post_texts(pool: &SqlitePool) -> Result<Vec<PostText>> {
    sqlx::query_as("SELECT post_id, body FROM posts ORDER BY post_id")
        .fetch_all(pool)
        .await
        .context("Failed to fetch post texts")
}

/// Distinct non-empty author usernames across staged posts.
pub async fn get_staged_post_authors(pool: &SqlitePool) -> Result<Vec<String>> {
    let rows: Vec<(String,)> = sqlx::query_as(
        "SELECT DISTINCT author FROM posts WHERE author <> '' ORDER BY author",
    )
    .fetch_all(pool)
    .await
    .context("Failed to fetch post authors")?;
    Ok(rows.into_iter().map(|(a,)| a).collect())
}

pub async fn set_post_sentiments(
    pool: &SqlitePool,
    updates: &[(PostId, Sentiment)],
) -> Result<u64> {
    let mut tx = pool.begin().await?;
    let mut updated = 0;
    for (post_id, sentiment) in updates {
        updated += sqlx::query("UPDATE posts SET sentiment = ? WHERE post_id = ?")
            .bind(sentiment.as_str())
            .bind(post_id)
            .execute(&mut *tx)
            .await
            .context("Failed to set sentiment")?
            .rows_affected();
    }
    tx.commit().await?;
    Ok(updated)
}

pub async fn set_post_self_reports(
    pool: &SqlitePool,
    updates: &[(PostId, Flag, Flag)],
) -> Result<u64> {
    let mut tx = pool.begin().await?;
    let mut updated = 0;
    for (post_id, diagnosed, medicated) in updates {
        updated += sqlx::query(
            "UPDATE posts SET self_diagnosed = ?, self_medicated = ? WHERE post_id = ?",
        )
        .bind(diagnosed.as_str())
        .bind(medicated.as_str())
        .bind(post_id)
        .execute(&mut *tx)
        .await
        .context("Failed to set self-report flags")?
        .rows_affected();
    }
    tx.commit().await?;
    Ok(updated)
}

// ========== Staging: members ==========

/// Insert or refresh staged members keyed by username, preserving `gender`.
pub async fn upsert_members(pool: &SqlitePool, members: &[Member]) -> Result<u64> {
    let mut tx = pool.begin().await?;
    let mut written = 0;
    for member in members {
        written += sqlx::query(
            r"
            INSERT INTO members (username, bio, display_name, location, joined_at, post_count)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(username) DO UPDATE SET
                bio = excluded.bio,
                display_name = excluded.display_name,
                location = excluded.location,
                joined_at = excluded.joined_at,
                post_count = excluded.post_count,
                fetched_at = datetime('now')
            ",
        )
        .bind(&member.username)
        .bind(&member.bio)
        .bind(&member.display_name)
        .bind(&member.location)
        .bind(member.joined_at.as_ref().map(format_stored_time))
        .bind(member.post_count)
        .execute(&mut *tx)
        .await
        .context("Failed to upsert member")?
        .rows_affected();
    }
    tx.commit().await.context("Failed to commit members")?;
    Ok(written)
}

pub async fn get_staged_member(pool: &SqlitePool, username: &str) -> Result<Option<StagedMember>> {
    sqlx::query_as("SELECT * FROM members WHERE username = ?")
        .bind(username)
        .fetch_optional(pool)
        .await
        .context("Failed to fetch staged member")
}

pub async fn count_staged_members(pool: &SqlitePool) -> Result<i64> {
    let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM members")
        .fetch_one(pool)
        .await
        .context("Failed to count staged members")?;
    Ok(count)
}

/// Members whose gender has not been inferred yet.
pub async fn get_members_needing_gender(pool: &SqlitePool) -> Result<Vec<MemberBio>> {
    sqlx::query_as(
        r"
        SELECT username, bio FROM members
        WHERE gender IS NULL OR gender IN ('', 'unknown')
        ORDER BY username
        ",
    )
    .fetch_all(pool)
    .await
    .context("Failed to fetch members needing gender")
}

pub async fn set_member_genders(pool: &SqlitePool, updates: &[(String, Gender)]) -> Result<u64> {
    let mut tx = pool.begin().await?;
    let mut updated = 0;
    for (username, gender) in updates {
        updated += sqlx::query("UPDATE members SET gender = ? WHERE username = ?")
            .bind(gender.as_str())
            .bind(username)
            .execute(&mut *tx)
            .await
            .context("Failed to set gender")?
            .rows_affected();
    }
    tx.commit().await?;
    Ok(updated)
}

/// Fold legacy gender labels into the fixed vocabulary.
///
/// `woman` becomes `female`, `man` becomes `male`, and anything else outside
/// {male, female, unknown} becomes `other`.
pub async fn homogenize_genders(pool: &SqlitePool) -> Result<GenderHomogenization> {
    let mut tx = pool.begin().await?;

    let woman_to_female = sqlx::query("UPDATE members SET gender = 'female' WHERE gender = 'woman'")
        .execute(&mut *tx)
        .await
        .context("Failed to map woman to female")?
        .rows_affected();
    let man_to_male = sqlx::query("UPDATE members SET gender = 'male' WHERE gender = 'man'")
        .execute(&mut *tx)
        .await
        .context("Failed to map man to male")?
        .rows_affected();
    let to_other = sqlx::query(
        "UPDATE members SET gender = 'other' WHERE gender NOT IN ('unknown', 'male', 'female', 'other')",
    )
    .execute(&mut *tx)
    .await
    .context("Failed to map remaining genders to other")?
    .rows_affected();

    tx.commit().await?;
    Ok(GenderHomogenization {
        woman_to_female,
        man_to_male,
        to_other,
    })
}

pub async fn delete_member(pool: &SqlitePool, username: &str) -> Result<u64> {
    let result = sqlx::query("DELETE FROM members WHERE username = ?")
        .bind(username)
        .execute(pool)
        .await
        .context("Failed to delete member")?;
    Ok(result.rows_affected())
}

/// Empty both staging tables.
pub async fn clear_staging(pool: &SqlitePool) -> Result<()> {
    sqlx::query("DELETE FROM posts")
        .execute(pool)
        .await
        .context("Failed to clear staged posts")?;
    sqlx::query("DELETE FROM members")
        .execute(pool)
        .await
        .context("Failed to clear staged members")?;
    Ok(())
}
