use crate::db::connection::DbPool;
use crate::db::models::{OptionChanges, Poll, PollOption};
use sqlx::Error;
use sqlx::Row;
use sqlx::types::chrono::{DateTime, Utc};
use std::collections::HashMap;
use uuid::Uuid;

const POLL_COLUMNS: &str = "id, author_id, title, description, created_at, closed_at";

/// Inserts the poll and its options (positions follow slice order) atomically.
pub async fn create_poll(
    pool: &DbPool,
    author_id: Uuid,
    title: &str,
    description: Option<&str>,
    options: &[String],
) -> Result<Poll, Error> {
    let mut tx = pool.begin().await?;

    let poll = sqlx::query_as::<_, Poll>(&format!(
        "INSERT INTO polls (id, author_id, title, description) VALUES ($1, $2, $3, $4) RETURNING {POLL_COLUMNS}"
    ))
    .bind(Uuid::new_v4())
    .bind(author_id)
    .bind(title)
    .bind(description)
    .fetch_one(&mut *tx)
    .await?;

    for (position, text) in options.iter().enumerate() {
        sqlx::query("INSERT INTO poll_options (id, poll_id, text, position) VALUES ($1, $2, $3, $4)")
            .bind(Uuid::new_v4())
            .bind(poll.id)
            .bind(text)
            .bind(position as i32)
            .execute(&mut *tx)
            .await?;
    }

    tx.commit().await?;
    Ok(poll)
}

/// Sample poll written by `--seed`. The author is the nil user id.
pub const SAMPLE_POLL_TITLE: &str = "Your favorite frontend framework?";
pub const SAMPLE_POLL_DESCRIPTION: &str = "Vote now!";
pub const SAMPLE_POLL_OPTIONS: [&str; 3] = ["Vue", "React", "Svelte"];

pub async fn seed_sample_poll(pool: &DbPool) -> Result<Poll, Error> {
    let options: Vec<String> = SAMPLE_POLL_OPTIONS.iter().map(|o| o.to_string()).collect();
    create_poll(
        pool,
        Uuid::nil(),
        SAMPLE_POLL_TITLE,
        Some(SAMPLE_POLL_DESCRIPTION),
        &options,
    )
    .await
}

pub async fn get_poll(pool: &DbPool, poll_id: Uuid) -> Result<Option<Poll>, Error> {
    let row = sqlx::query_as::<_, Poll>(&format!("SELECT {POLL_COLUMNS} FROM polls WHERE id = $1"))
        .bind(poll_id)
        .fetch_optional(pool)
        .await?;

    Ok(row)
}

pub async fn get_all_polls(pool: &DbPool) -> Result<Vec<Poll>, Error> {
    let rows = sqlx::query_as::<_, Poll>(&format!(
        "SELECT {POLL_COLUMNS} FROM polls ORDER BY created_at DESC"
    ))
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

pub async fn get_poll_options(pool: &DbPool, poll_id: Uuid) -> Result<Vec<PollOption>, Error> {
    let rows = sqlx::query_as::<_, PollOption>(
        "SELECT id, text, position FROM poll_options WHERE poll_id = $1 ORDER BY position",
    )
    .bind(poll_id)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

/// Options of every listed poll, grouped by poll id and ordered by position.
pub async fn get_options_for_polls(
    pool: &DbPool,
    poll_ids: &[Uuid],
) -> Result<HashMap<Uuid, Vec<PollOption>>, Error> {
    let mut grouped: HashMap<Uuid, Vec<PollOption>> = HashMap::new();
    if poll_ids.is_empty() {
        return Ok(grouped);
    }

    let rows = sqlx::query(
        "SELECT id, poll_id, text, position FROM poll_options WHERE poll_id = ANY($1) ORDER BY poll_id, position",
    )
    .bind(poll_ids)
    .fetch_all(pool)
    .await?;

    for r in rows {
        grouped
            .entry(r.get("poll_id"))
            .or_default()
            .push(PollOption {
                id: r.get("id"),
                text: r.get("text"),
                position: r.get("position"),
            });
    }

    Ok(grouped)
}

pub async fn get_option_vote_counts(
    pool: &DbPool,
    poll_id: Uuid,
) -> Result<HashMap<Uuid, i64>, Error> {
    let rows = sqlx::query(
        "SELECT option_id, COUNT(*) AS votes FROM poll_votes WHERE poll_id = $1 GROUP BY option_id",
    )
    .bind(poll_id)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(|r| (r.get("option_id"), r.get("votes")))
        .collect())
}

pub async fn option_belongs_to_poll(
    pool: &DbPool,
    poll_id: Uuid,
    option_id: Uuid,
) -> Result<bool, Error> {
    let row = sqlx::query("SELECT id FROM poll_options WHERE id = $1 AND poll_id = $2")
        .bind(option_id)
        .bind(poll_id)
        .fetch_optional(pool)
        .await?;

    Ok(row.is_some())
}

/// `description` is `None` to keep the current value, `Some(None)` to clear it.
pub async fn update_poll(
    pool: &DbPool,
    poll_id: Uuid,
    title: Option<&str>,
    description: Option<Option<&str>>,
) -> Result<Poll, Error> {
    let row = sqlx::query_as::<_, Poll>(&format!(
        "UPDATE polls SET title = COALESCE($2, title), \
         description = CASE WHEN $3 THEN $4 ELSE description END \
         WHERE id = $1 RETURNING {POLL_COLUMNS}"
    ))
    .bind(poll_id)
    .bind(title)
    .bind(description.is_some())
    .bind(description.flatten())
    .fetch_one(pool)
    .await?;

    Ok(row)
}

pub async fn delete_poll(pool: &DbPool, poll_id: Uuid) -> Result<bool, Error> {
    let result = sqlx::query("DELETE FROM polls WHERE id = $1")
        .bind(poll_id)
        .execute(pool)
        .await?;

    Ok(result.rows_affected() > 0)
}

pub async fn close_poll(pool: &DbPool, poll_id: Uuid) -> Result<DateTime<Utc>, Error> {
    let row = sqlx::query("UPDATE polls SET closed_at = now() WHERE id = $1 RETURNING closed_at")
        .bind(poll_id)
        .fetch_one(pool)
        .await?;

    Ok(row.get("closed_at"))
}

/// Applies `changes` and returns the resulting option list.
pub async fn replace_poll_options(
    pool: &DbPool,
    poll_id: Uuid,
    changes: &OptionChanges,
) -> Result<Vec<PollOption>, Error> {
    let mut tx = pool.begin().await?;

    if !changes.delete.is_empty() {
        sqlx::query("DELETE FROM poll_options WHERE poll_id = $1 AND id = ANY($2)")
            .bind(poll_id)
            .bind(&changes.delete[..])
            .execute(&mut *tx)
            .await?;
    }

    for option in &changes.update {
        sqlx::query("UPDATE poll_options SET text = $1, position = $2 WHERE id = $3 AND poll_id = $4")
            .bind(&option.text)
            .bind(option.position)
            .bind(option.id)
            .bind(poll_id)
            .execute(&mut *tx)
            .await?;
    }

    for option in &changes.insert {
        sqlx::query("INSERT INTO poll_options (id, poll_id, text, position) VALUES ($1, $2, $3, $4)")
            .bind(Uuid::new_v4())
            .bind(poll_id)
            .bind(&option.text)
            .bind(option.position)
            .execute(&mut *tx)
            .await?;
    }

    let options = sqlx::query_as::<_, PollOption>(
        "SELECT id, text, position FROM poll_options WHERE poll_id = $1 ORDER BY position",
    )
    .bind(poll_id)
    .fetch_all(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(options)
}
