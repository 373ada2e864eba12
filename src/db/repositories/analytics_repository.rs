use crate::db::connection::DbPool;
use crate::sse::{AnalyticsStore, PollVoteCount};
use sqlx::{Error, Row};
use std::time::Duration;
use uuid::Uuid;

/// Postgres `COUNT(*)` is a BIGINT; it is never negative.
fn to_count(value: i64) -> u64 {
    u64::try_from(value).unwrap_or(0)
}

#[derive(Clone)]
pub struct PgAnalyticsStore {
    pool: DbPool,
}

impl PgAnalyticsStore {
    pub fn new(pool: DbPool) -> Self {
        PgAnalyticsStore { pool }
    }

    async fn scalar_count(&self, sql: &str) -> Result<u64, Error> {
        let value: i64 = sqlx::query_scalar(sql).fetch_one(&self.pool).await?;
        Ok(to_count(value))
    }
}

impl AnalyticsStore for PgAnalyticsStore {
    async fn count_polls(&self) -> Result<u64, Error> {
        self.scalar_count("SELECT COUNT(*) FROM polls").await
    }

    async fn count_votes(&self) -> Result<u64, Error> {
        self.scalar_count("SELECT COUNT(*) FROM poll_votes").await
    }

    async fn count_votes_within(&self, window: Duration) -> Result<u64, Error> {
        // The cutoff is evaluated by the database clock, not ours.
        let value: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM poll_votes WHERE created_at > now() - make_interval(secs => $1)",
        )
        .bind(window.as_secs_f64())
        .fetch_one(&self.pool)
        .await?;

        Ok(to_count(value))
    }

    async fn vote_counts_by_poll(&self) -> Result<Vec<PollVoteCount>, Error> {
        let rows = sqlx::query(
            "SELECT poll_id, COUNT(*) AS votes FROM poll_votes GROUP BY poll_id ORDER BY poll_id",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|r| PollVoteCount {
                poll_id: r.get("poll_id"),
                votes: to_count(r.get("votes")),
            })
            .collect())
    }

    async fn poll_title(&self, poll_id: Uuid) -> Result<Option<String>, Error> {
        sqlx::query_scalar("SELECT title FROM polls WHERE id = $1 LIMIT 1")
            .bind(poll_id)
            .fetch_optional(&self.pool)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_convert_to_unsigned() {
        assert_eq!(to_count(0), 0);
        assert_eq!(to_count(42), 42);
        assert_eq!(to_count(-1), 0);
    }
}
