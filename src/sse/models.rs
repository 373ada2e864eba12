use axum::body::Bytes;
use serde::{Deserialize, Serialize};
use sqlx::types::chrono::{DateTime, Utc};
use uuid::Uuid;

/// Comment written to a subscriber as soon as it registers, so proxies flush.
pub const CONNECTED_FRAME: &[u8] = b": connected\n\n";
/// Comment written on every heartbeat tick.
pub const PING_FRAME: &[u8] = b": ping\n\n";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopPoll {
    pub id: Uuid,
    pub title: String,
    pub votes: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyticsSnapshot {
    pub total_polls: u64,
    pub total_votes: u64,
    #[serde(rename = "votesLast5m")]
    pub votes_last_5m: u64,
    pub top_poll: Option<TopPoll>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum AnalyticsEvent {
    PollCreated {
        poll_id: Uuid,
        title: String,
        created_at: DateTime<Utc>,
    },
    PollDeleted {
        poll_id: Uuid,
    },
    PollUpdated {
        poll_id: Uuid,
    },
    PollClosed {
        poll_id: Uuid,
        closed_at: DateTime<Utc>,
    },
    PollOptionsUpdated {
        poll_id: Uuid,
    },
    VoteCast {
        poll_id: Uuid,
        option_id: Uuid,
        created_at: DateTime<Utc>,
    },
    Snapshot {
        payload: AnalyticsSnapshot,
    },
}

impl AnalyticsEvent {
    /// Encodes the event as a single `data: <json>\n\n` event-stream frame.
    pub fn to_frame(&self) -> Result<Bytes, serde_json::Error> {
        let json = serde_json::to_string(self)?;
        Ok(Bytes::from(format!("data: {json}\n\n")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn vote_cast_serializes_with_kebab_tag_and_camel_fields() {
        let poll_id = Uuid::new_v4();
        let option_id = Uuid::new_v4();
        let created_at = DateTime::parse_from_rfc3339("2026-10-19T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc);

        let value = serde_json::to_value(AnalyticsEvent::VoteCast {
            poll_id,
            option_id,
            created_at,
        })
        .unwrap();

        assert_eq!(
            value,
            json!({
                "type": "vote-cast",
                "pollId": poll_id,
                "optionId": option_id,
                "createdAt": "2026-10-19T12:00:00Z",
            })
        );
    }

    #[test]
    fn empty_snapshot_has_null_top_poll() {
        let event = AnalyticsEvent::Snapshot {
            payload: AnalyticsSnapshot {
                total_polls: 0,
                total_votes: 0,
                votes_last_5m: 0,
                top_poll: None,
            },
        };

        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            json!({
                "type": "snapshot",
                "payload": {
                    "totalPolls": 0,
                    "totalVotes": 0,
                    "votesLast5m": 0,
                    "topPoll": null,
                }
            })
        );
    }

    #[test]
    fn frame_wraps_json_in_data_line() {
        let poll_id = Uuid::nil();
        let frame = AnalyticsEvent::PollDeleted { poll_id }.to_frame().unwrap();

        assert_eq!(
            frame,
            Bytes::from(format!(
                "data: {{\"type\":\"poll-deleted\",\"pollId\":\"{poll_id}\"}}\n\n"
            ))
        );
    }
}
