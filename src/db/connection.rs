use sqlx::postgres::PgPoolOptions;
use sqlx::{Pool, Postgres};
use std::time::Duration;

pub type DbPool = Pool<Postgres>;

pub async fn init_db(database_url: &str, max_connections: u32) -> Result<DbPool, sqlx::Error> {
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .max_lifetime(Duration::from_secs(30 * 60))
        .idle_timeout(Duration::from_secs(10 * 60))
        .connect(database_url)
        .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS polls (
            id UUID PRIMARY KEY,
            author_id UUID NOT NULL,
            title TEXT NOT NULL,
            description TEXT,
            created_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT CURRENT_TIMESTAMP,
            closed_at TIMESTAMP WITH TIME ZONE
        )
        "#,
    )
    .execute(&pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS poll_options (
            id UUID PRIMARY KEY,
            poll_id UUID NOT NULL REFERENCES polls(id) ON DELETE CASCADE,
            text TEXT NOT NULL,
            position INT NOT NULL DEFAULT 0
        )
        "#,
    )
    .execute(&pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS poll_votes (
            id UUID PRIMARY KEY,
            poll_id UUID NOT NULL REFERENCES polls(id) ON DELETE CASCADE,
            option_id UUID NOT NULL REFERENCES poll_options(id) ON DELETE CASCADE,
            user_id UUID,
            voter_token TEXT NOT NULL,
            created_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT CURRENT_TIMESTAMP,
            CONSTRAINT uniq_vote_per_user_per_poll UNIQUE (user_id, poll_id),
            CONSTRAINT uniq_vote_per_token_per_poll UNIQUE (voter_token, poll_id)
        )
        "#,
    )
    .execute(&pool)
    .await?;

    let indexes = [
        "CREATE INDEX IF NOT EXISTS idx_polls_author ON polls(author_id)",
        "CREATE INDEX IF NOT EXISTS idx_polls_created_at ON polls(created_at)",
        "CREATE INDEX IF NOT EXISTS idx_poll_options_poll_id ON poll_options(poll_id)",
        "CREATE INDEX IF NOT EXISTS idx_poll_options_position ON poll_options(poll_id, position)",
        "CREATE INDEX IF NOT EXISTS idx_poll_votes_poll_id ON poll_votes(poll_id)",
        "CREATE INDEX IF NOT EXISTS idx_poll_votes_option_id ON poll_votes(option_id)",
        "CREATE INDEX IF NOT EXISTS idx_poll_votes_created_at ON poll_votes(created_at)",
    ];
    for statement in indexes {
        sqlx::query(statement).execute(&pool).await?;
    }

    Ok(pool)
}

pub fn get_pool_stats(pool: &DbPool) -> String {
    let size = pool.size() as usize;
    let num_idle = pool.num_idle();
    format!(
        "Pool stats: size={}, idle={}, in_use={}",
        size,
        num_idle,
        size.saturating_sub(num_idle)
    )
}
