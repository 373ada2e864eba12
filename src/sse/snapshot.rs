use crate::sse::models::{AnalyticsSnapshot, TopPoll};
use std::future::Future;
use std::time::Duration;
use tracing::warn;
use uuid::Uuid;

/// Trailing window used for `votes_last_5m`.
pub const RECENT_VOTES_WINDOW: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollVoteCount {
    pub poll_id: Uuid,
    pub votes: u64,
}

/// Read-only aggregate queries the snapshot is built from.
///
/// Implementations convert whatever numeric type the store returns into
/// `u64` before handing it back.
pub trait AnalyticsStore: Send + Sync {
    fn count_polls(&self) -> impl Future<Output = Result<u64, sqlx::Error>> + Send;

    fn count_votes(&self) -> impl Future<Output = Result<u64, sqlx::Error>> + Send;

    /// Votes created within `window` of the store's own clock.
    fn count_votes_within(
        &self,
        window: Duration,
    ) -> impl Future<Output = Result<u64, sqlx::Error>> + Send;

    fn vote_counts_by_poll(
        &self,
    ) -> impl Future<Output = Result<Vec<PollVoteCount>, sqlx::Error>> + Send;

    fn poll_title(
        &self,
        poll_id: Uuid,
    ) -> impl Future<Output = Result<Option<String>, sqlx::Error>> + Send;
}

/// First entry with the highest vote count.
fn leading_poll(groups: &[PollVoteCount]) -> Option<PollVoteCount> {
    groups.iter().copied().fold(None, |best, candidate| match best {
        Some(best) if best.votes >= candidate.votes => Some(best),
        _ => Some(candidate),
    })
}

pub async fn compute_snapshot<S: AnalyticsStore>(
    store: &S,
) -> Result<AnalyticsSnapshot, sqlx::Error> {
    let (total_polls, total_votes, votes_last_5m, groups) = tokio::try_join!(
        store.count_polls(),
        store.count_votes(),
        store.count_votes_within(RECENT_VOTES_WINDOW),
        store.vote_counts_by_poll(),
    )?;

    let top_poll = match leading_poll(&groups) {
        Some(leader) => match store.poll_title(leader.poll_id).await? {
            Some(title) => Some(TopPoll {
                id: leader.poll_id,
                title,
                votes: leader.votes,
            }),
            None => {
                warn!(poll_id = %leader.poll_id, "Top poll disappeared before its title was read");
                None
            }
        },
        None => None,
    };

    Ok(AnalyticsSnapshot {
        total_polls,
        total_votes,
        votes_last_5m,
        top_poll,
    })
}
