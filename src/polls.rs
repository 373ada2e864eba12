use crate::db::{self, CastVote, NewOption, OptionChanges, OptionUpdate, Poll, PollOption};
use crate::error::PollError;
use crate::extract::{JsonBody, PollPath};
use crate::sse::AnalyticsEvent;
use crate::startup::AppState;
use axum::{
    Json,
    extract::Extension,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::json;
use sqlx::types::chrono::{DateTime, Utc};
use std::collections::HashSet;
use tower_cookies::{Cookie, Cookies, cookie::SameSite};
use uuid::Uuid;

pub const VOTER_COOKIE: &str = "qp_voter";
const VOTER_COOKIE_DAYS: i64 = 180;

// Request/Response DTOs
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct CreatePollRequest {
    pub title: Option<String>,
    pub description: Option<String>,
    pub options: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdatePollRequest {
    #[serde(default)]
    pub title: Option<String>,
    /// Absent leaves the description alone; `null` clears it.
    #[serde(default, deserialize_with = "explicit_null")]
    pub description: Option<Option<String>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct UpdateOptionsRequest {
    pub options: Vec<IncomingOption>,
}

#[derive(Debug, Default, Clone, Deserialize)]
pub struct IncomingOption {
    pub id: Option<Uuid>,
    pub text: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CastVoteRequest {
    pub option_id: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PollResponse {
    pub id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub author_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
    pub options: Vec<PollOptionResponse>,
}

#[derive(Debug, Serialize)]
pub struct PollOptionResponse {
    pub id: Uuid,
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub votes: Option<i64>,
}

impl PollResponse {
    fn new(poll: Poll, options: Vec<PollOptionResponse>) -> Self {
        PollResponse {
            id: poll.id,
            title: poll.title,
            description: poll.description,
            author_id: poll.author_id,
            created_at: poll.created_at,
            closed_at: poll.closed_at,
            options,
        }
    }
}

fn explicit_null<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

fn clean_title(raw: Option<&str>) -> Result<String, PollError> {
    let title = raw.unwrap_or_default().trim();
    if title.is_empty() {
        return Err(PollError::invalid("Title is required"));
    }
    Ok(title.to_string())
}

/// Blank descriptions are stored as NULL.
fn clean_description(raw: Option<&str>) -> Option<String> {
    raw.map(str::trim)
        .filter(|d| !d.is_empty())
        .map(str::to_string)
}

/// Trims every option, drops blanks and requires at least two left.
fn clean_options(raw: Vec<String>) -> Result<Vec<String>, PollError> {
    let options: Vec<String> = raw
        .into_iter()
        .map(|o| o.trim().to_string())
        .filter(|o| !o.is_empty())
        .collect();
    if options.len() < 2 {
        return Err(PollError::invalid("Provide at least two options"));
    }
    Ok(options)
}

/// Works out which options to delete, rewrite and insert so the poll ends up
/// with exactly `incoming`, in that order.
fn plan_option_changes(
    existing: &[Uuid],
    incoming: Vec<IncomingOption>,
) -> Result<OptionChanges, PollError> {
    let cleaned: Vec<(Option<Uuid>, String)> = incoming
        .into_iter()
        .map(|o| (o.id, o.text.unwrap_or_default().trim().to_string()))
        .filter(|(_, text)| !text.is_empty())
        .collect();
    if cleaned.len() < 2 {
        return Err(PollError::invalid("Provide at least two options"));
    }

    let existing_ids: HashSet<Uuid> = existing.iter().copied().collect();
    let mut kept = HashSet::new();
    let mut changes = OptionChanges::default();

    for (position, (id, text)) in cleaned.into_iter().enumerate() {
        let position = position as i32;
        match id {
            Some(id) => {
                if !existing_ids.contains(&id) {
                    return Err(PollError::invalid("Invalid option id for this poll"));
                }
                kept.insert(id);
                changes.update.push(OptionUpdate { id, text, position });
            }
            None => changes.insert.push(NewOption { text, position }),
        }
    }

    changes.delete = existing
        .iter()
        .copied()
        .filter(|id| !kept.contains(id))
        .collect();
    Ok(changes)
}

async fn load_poll(app_state: &AppState, poll_id: Uuid) -> Result<Poll, PollError> {
    db::get_poll(&app_state.db, poll_id)
        .await?
        .ok_or(PollError::PollNotFound)
}

/// Loads the poll and checks the caller wrote it.
async fn load_own_poll(
    app_state: &AppState,
    headers: &HeaderMap,
    poll_id: Uuid,
) -> Result<Poll, PollError> {
    let user_id = app_state.auth.require_user(headers)?;
    let poll = load_poll(app_state, poll_id).await?;
    if poll.author_id != user_id {
        return Err(PollError::Forbidden);
    }
    Ok(poll)
}

/// Reads the anonymous voter token, issuing a fresh one when absent.
fn voter_token(cookies: &Cookies) -> String {
    if let Some(existing) = cookies.get(VOTER_COOKIE).filter(|c| !c.value().is_empty()) {
        return existing.value().to_string();
    }

    let token = Uuid::new_v4().to_string();
    cookies.add(
        Cookie::build((VOTER_COOKIE, token.clone()))
            .http_only(true)
            .same_site(SameSite::Lax)
            .max_age(time::Duration::days(VOTER_COOKIE_DAYS))
            .path("/")
            .build(),
    );
    token
}

/// List every poll, newest first
pub async fn list_polls(
    Extension(app_state): Extension<AppState>,
) -> Result<impl IntoResponse, PollError> {
    let polls = db::get_all_polls(&app_state.db).await?;
    let poll_ids: Vec<Uuid> = polls.iter().map(|p| p.id).collect();
    let mut options_by_poll = db::get_options_for_polls(&app_state.db, &poll_ids).await?;

    let response: Vec<PollResponse> = polls
        .into_iter()
        .map(|poll| {
            let options = options_by_poll
                .remove(&poll.id)
                .unwrap_or_default()
                .into_iter()
                .map(|o| PollOptionResponse {
                    id: o.id,
                    text: o.text,
                    votes: None,
                })
                .collect();
            PollResponse::new(poll, options)
        })
        .collect();

    Ok((StatusCode::OK, Json(response)))
}

/// Create a new poll (authenticated users only)
pub async fn create_poll(
    Extension(app_state): Extension<AppState>,
    headers: HeaderMap,
    JsonBody(payload): JsonBody<CreatePollRequest>,
) -> Result<impl IntoResponse, PollError> {
    let user_id = app_state.auth.require_user(&headers)?;

    let title = clean_title(payload.title.as_deref())?;
    let description = clean_description(payload.description.as_deref());
    let options = clean_options(payload.options)?;

    let poll = db::create_poll(
        &app_state.db,
        user_id,
        &title,
        description.as_deref(),
        &options,
    )
    .await?;

    info!(poll_id = %poll.id, "Poll created");
    app_state.hub.broadcast(&AnalyticsEvent::PollCreated {
        poll_id: poll.id,
        title: poll.title.clone(),
        created_at: poll.created_at,
    });

    Ok((StatusCode::CREATED, Json(json!({ "id": poll.id }))))
}

/// Get a specific poll with per-option vote counts
pub async fn get_poll(
    Extension(app_state): Extension<AppState>,
    PollPath(poll_id): PollPath<Uuid>,
) -> Result<impl IntoResponse, PollError> {
    let poll = load_poll(&app_state, poll_id).await?;
    let options = db::get_poll_options(&app_state.db, poll_id).await?;
    let votes = db::get_option_vote_counts(&app_state.db, poll_id).await?;

    let options = options
        .into_iter()
        .map(|o: PollOption| PollOptionResponse {
            votes: Some(votes.get(&o.id).copied().unwrap_or(0)),
            id: o.id,
            text: o.text,
        })
        .collect();

    Ok((StatusCode::OK, Json(PollResponse::new(poll, options))))
}

/// Edit title and/or description (author only)
pub async fn update_poll(
    Extension(app_state): Extension<AppState>,
    headers: HeaderMap,
    PollPath(poll_id): PollPath<Uuid>,
    JsonBody(payload): JsonBody<UpdatePollRequest>,
) -> Result<impl IntoResponse, PollError> {
    let poll = load_own_poll(&app_state, &headers, poll_id).await?;

    let title = match payload.title.as_deref() {
        Some(raw) => Some(
            clean_title(Some(raw)).map_err(|_| PollError::invalid("Title cannot be empty"))?,
        ),
        None => None,
    };
    let description = payload
        .description
        .map(|d| clean_description(d.as_deref()));

    if title.is_none() && description.is_none() {
        return Ok((
            StatusCode::OK,
            Json(json!({ "id": poll.id, "title": poll.title, "description": poll.description })),
        ));
    }

    let updated = db::update_poll(
        &app_state.db,
        poll_id,
        title.as_deref(),
        description.as_ref().map(|d| d.as_deref()),
    )
    .await?;

    app_state
        .hub
        .broadcast(&AnalyticsEvent::PollUpdated { poll_id });

    Ok((
        StatusCode::OK,
        Json(json!({ "id": updated.id, "title": updated.title, "description": updated.description })),
    ))
}

/// Delete a poll together with its options and votes (author only)
pub async fn delete_poll(
    Extension(app_state): Extension<AppState>,
    headers: HeaderMap,
    PollPath(poll_id): PollPath<Uuid>,
) -> Result<impl IntoResponse, PollError> {
    load_own_poll(&app_state, &headers, poll_id).await?;

    if !db::delete_poll(&app_state.db, poll_id).await? {
        return Err(PollError::PollNotFound);
    }

    info!(%poll_id, "Poll deleted");
    app_state
        .hub
        .broadcast(&AnalyticsEvent::PollDeleted { poll_id });

    Ok(StatusCode::NO_CONTENT)
}

/// Close a poll (only the author can close it)
pub async fn close_poll(
    Extension(app_state): Extension<AppState>,
    headers: HeaderMap,
    PollPath(poll_id): PollPath<Uuid>,
) -> Result<impl IntoResponse, PollError> {
    let poll = load_own_poll(&app_state, &headers, poll_id).await?;

    if let Some(closed_at) = poll.closed_at {
        return Ok((
            StatusCode::OK,
            Json(json!({ "id": poll.id, "closedAt": closed_at })),
        ));
    }

    let closed_at = db::close_poll(&app_state.db, poll_id).await?;

    info!(%poll_id, "Poll closed");
    app_state
        .hub
        .broadcast(&AnalyticsEvent::PollClosed { poll_id, closed_at });

    Ok((
        StatusCode::OK,
        Json(json!({ "id": poll_id, "closedAt": closed_at })),
    ))
}

/// Replace the option list of an open poll (author only)
pub async fn update_poll_options(
    Extension(app_state): Extension<AppState>,
    headers: HeaderMap,
    PollPath(poll_id): PollPath<Uuid>,
    JsonBody(payload): JsonBody<UpdateOptionsRequest>,
) -> Result<impl IntoResponse, PollError> {
    let poll = load_own_poll(&app_state, &headers, poll_id).await?;
    if poll.is_closed() {
        return Err(PollError::PollClosed);
    }

    let existing: Vec<Uuid> = db::get_poll_options(&app_state.db, poll_id)
        .await?
        .into_iter()
        .map(|o| o.id)
        .collect();
    let changes = plan_option_changes(&existing, payload.options)?;

    let options = db::replace_poll_options(&app_state.db, poll_id, &changes).await?;

    app_state
        .hub
        .broadcast(&AnalyticsEvent::PollOptionsUpdated { poll_id });

    Ok((StatusCode::OK, Json(json!({ "options": options }))))
}

/// Cast a vote; anonymous voters are tracked with a cookie
pub async fn vote_on_poll(
    Extension(app_state): Extension<AppState>,
    cookies: Cookies,
    headers: HeaderMap,
    PollPath(poll_id): PollPath<Uuid>,
    JsonBody(payload): JsonBody<CastVoteRequest>,
) -> Result<impl IntoResponse, PollError> {
    let user_id = app_state.auth.optional_user(&headers)?;

    let poll = load_poll(&app_state, poll_id).await?;
    if poll.is_closed() {
        return Err(PollError::PollClosed);
    }

    let option_id = payload
        .option_id
        .as_deref()
        .map(str::trim)
        .and_then(|raw| Uuid::parse_str(raw).ok())
        .ok_or_else(|| PollError::invalid("Missing or invalid option id"))?;

    if !db::option_belongs_to_poll(&app_state.db, poll_id, option_id).await? {
        return Err(PollError::OptionNotFound);
    }

    let token = voter_token(&cookies);

    match db::cast_vote(&app_state.db, poll_id, option_id, user_id, &token).await? {
        CastVote::Recorded(vote) => {
            app_state.hub.broadcast(&AnalyticsEvent::VoteCast {
                poll_id: vote.poll_id,
                option_id: vote.option_id,
                created_at: vote.created_at,
            });
            Ok((StatusCode::OK, Json(json!({ "ok": true }))))
        }
        CastVote::AlreadyVoted => Err(PollError::AlreadyVoted),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn incoming(id: Option<Uuid>, text: &str) -> IncomingOption {
        IncomingOption {
            id,
            text: Some(text.to_string()),
        }
    }

    #[test]
    fn options_are_trimmed_and_blank_ones_dropped() {
        let options = clean_options(vec![
            "  Vue ".to_string(),
            "".to_string(),
            "React".to_string(),
            "   ".to_string(),
        ])
        .unwrap();

        assert_eq!(options, vec!["Vue".to_string(), "React".to_string()]);
    }

    #[test]
    fn fewer_than_two_options_is_invalid() {
        let result = clean_options(vec!["Only".to_string(), " ".to_string()]);

        assert!(matches!(result, Err(PollError::InvalidRequest(_))));
    }

    #[test]
    fn blank_title_is_invalid_and_description_blank_becomes_none() {
        assert!(clean_title(Some("   ")).is_err());
        assert!(clean_title(None).is_err());
        assert_eq!(clean_title(Some(" Lunch ")).unwrap(), "Lunch");
        assert_eq!(clean_description(Some("  ")), None);
        assert_eq!(clean_description(Some(" soon ")), Some("soon".to_string()));
    }

    #[test]
    fn option_plan_updates_inserts_and_deletes_by_position() {
        let keep = Uuid::new_v4();
        let dropped = Uuid::new_v4();

        let changes = plan_option_changes(
            &[dropped, keep],
            vec![
                incoming(None, "Svelte"),
                incoming(Some(keep), " React "),
                incoming(None, "  "),
            ],
        )
        .unwrap();

        assert_eq!(
            changes,
            OptionChanges {
                delete: vec![dropped],
                update: vec![OptionUpdate {
                    id: keep,
                    text: "React".to_string(),
                    position: 1,
                }],
                insert: vec![NewOption {
                    text: "Svelte".to_string(),
                    position: 0,
                }],
            }
        );
    }

    #[test]
    fn option_plan_rejects_ids_from_other_polls() {
        let result = plan_option_changes(
            &[Uuid::new_v4()],
            vec![incoming(Some(Uuid::new_v4()), "A"), incoming(None, "B")],
        );

        assert!(matches!(result, Err(PollError::InvalidRequest(_))));
    }

    #[test]
    fn update_request_distinguishes_absent_and_null_description() {
        let absent: UpdatePollRequest = serde_json::from_str(r#"{"title":"New"}"#).unwrap();
        let cleared: UpdatePollRequest = serde_json::from_str(r#"{"description":null}"#).unwrap();
        let set: UpdatePollRequest = serde_json::from_str(r#"{"description":"Hi"}"#).unwrap();

        assert_eq!(absent.description, None);
        assert_eq!(cleared.description, Some(None));
        assert_eq!(set.description, Some(Some("Hi".to_string())));
    }

    #[test]
    fn seeded_sample_poll_is_valid_input() {
        let options = db::SAMPLE_POLL_OPTIONS.iter().map(|o| o.to_string()).collect();

        assert_eq!(clean_title(Some(db::SAMPLE_POLL_TITLE)).unwrap(), db::SAMPLE_POLL_TITLE);
        assert_eq!(clean_options(options).unwrap().len(), 3);
    }

    #[test]
    fn vote_request_reads_camel_case_option_id() {
        let id = Uuid::new_v4();
        let request: CastVoteRequest =
            serde_json::from_str(&format!(r#"{{"optionId":"{id}"}}"#)).unwrap();

        assert_eq!(request.option_id, Some(id.to_string()));
    }
}
