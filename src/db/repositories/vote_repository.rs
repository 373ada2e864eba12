use crate::db::connection::DbPool;
use crate::db::models::Vote;
use sqlx::Error;
use uuid::Uuid;

#[derive(Debug)]
pub enum CastVote {
    Recorded(Vote),
    AlreadyVoted,
}

/// Records one vote per voter token (and per signed-in user) per poll.
pub async fn cast_vote(
    pool: &DbPool,
    poll_id: Uuid,
    option_id: Uuid,
    user_id: Option<Uuid>,
    voter_token: &str,
) -> Result<CastVote, Error> {
    let mut tx = pool.begin().await?;

    let existing_vote = sqlx::query(
        "SELECT id FROM poll_votes WHERE poll_id = $1 AND (voter_token = $2 OR user_id = $3)",
    )
    .bind(poll_id)
    .bind(voter_token)
    .bind(user_id)
    .fetch_optional(&mut *tx)
    .await?;

    if existing_vote.is_some() {
        tx.rollback().await?;
        return Ok(CastVote::AlreadyVoted);
    }

    let inserted = sqlx::query_as::<_, Vote>(
        "INSERT INTO poll_votes (id, poll_id, option_id, user_id, voter_token) \
         VALUES ($1, $2, $3, $4, $5) RETURNING id, poll_id, option_id, created_at",
    )
    .bind(Uuid::new_v4())
    .bind(poll_id)
    .bind(option_id)
    .bind(user_id)
    .bind(voter_token)
    .fetch_one(&mut *tx)
    .await;

    match inserted {
        Ok(vote) => {
            tx.commit().await?;
            Ok(CastVote::Recorded(vote))
        }
        // A concurrent request from the same voter won the race.
        Err(Error::Database(e)) if e.is_unique_violation() => Ok(CastVote::AlreadyVoted),
        Err(e) => Err(e),
    }
}
