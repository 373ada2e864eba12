use serde::{Deserialize, Serialize};
use sqlx::types::chrono::{DateTime, Utc};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Poll {
    pub id: Uuid,
    pub author_id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
}

impl Poll {
    pub fn is_closed(&self) -> bool {
        self.closed_at.is_some()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct PollOption {
    pub id: Uuid,
    pub text: String,
    pub position: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Vote {
    pub id: Uuid,
    pub poll_id: Uuid,
    pub option_id: Uuid,
    pub created_at: DateTime<Utc>,
}

/// Edits applied to a poll's option list in one transaction.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OptionChanges {
    pub delete: Vec<Uuid>,
    pub update: Vec<OptionUpdate>,
    pub insert: Vec<NewOption>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OptionUpdate {
    pub id: Uuid,
    pub text: String,
    pub position: i32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewOption {
    pub text: String,
    pub position: i32,
}
