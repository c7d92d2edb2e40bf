//! GraphQL surface over the same poll and vote operations as the REST API.
//!
//! The transport accepts anonymous requests; each mutation checks for a
//! caller itself, so reads stay public while writes need a bearer token.

use async_graphql::{
    Context, EmptySubscription, ErrorExtensions, InputObject, MaybeUndefined, Object, Schema,
    SimpleObject,
};
use axum::{Extension, Json, extract::State, http::HeaderMap};
use chrono::{DateTime, Utc};
use tracing::error;
use uuid::Uuid;

use tally_types::api::{
    ChoiceInput, ChoiceResponse, Claims, CreateChoice, CreatePollRequest, CreateQuestion,
    PollResponse, QuestionResponse, UpdatePollRequest, VoteRequest,
};
use tally_types::jobs::{JobResponse, JobStatus};
use tally_types::stats::{ChoiceStats, PollStats, QuestionStats};

use crate::error::ApiError;
use crate::middleware::bearer_claims;
use crate::state::AppState;
use crate::{jobs, polls, stats, votes};

pub type TallySchema = Schema<QueryRoot, MutationRoot, EmptySubscription>;

pub fn build_schema(state: AppState) -> TallySchema {
    Schema::build(QueryRoot, MutationRoot, EmptySubscription)
        .data(state)
        .finish()
}

/// POST /graphql
pub async fn graphql_handler(
    State(state): State<AppState>,
    Extension(schema): Extension<TallySchema>,
    headers: HeaderMap,
    Json(request): Json<async_graphql::Request>,
) -> Result<Json<async_graphql::Response>, ApiError> {
    let mut request = request;
    if let Some(claims) = bearer_claims(&headers, &state.jwt_secret)? {
        request = request.data(claims);
    }
    Ok(Json(schema.execute(request).await))
}

impl ErrorExtensions for ApiError {
    fn extend(&self) -> async_graphql::Error {
        let code = match self {
            Self::NotFound(_) => "NOT_FOUND",
            Self::ConstraintViolation(_) => "CONFLICT",
            Self::Validation(_) => "BAD_REQUEST",
            Self::PermissionDenied(_) => "FORBIDDEN",
            Self::AuthenticationRequired(_) => "UNAUTHENTICATED",
            Self::Unavailable(_) => "UNAVAILABLE",
            Self::Internal(_) => "INTERNAL",
        };
        async_graphql::Error::new(self.to_string()).extend_with(|_, e| e.set("code", code))
    }
}

fn gql(err: ApiError) -> async_graphql::Error {
    if let ApiError::Internal(detail) = &err {
        error!("Internal error in GraphQL resolver: {}", detail);
    }
    err.extend()
}

fn app_state<'a>(ctx: &Context<'a>) -> async_graphql::Result<&'a AppState> {
    ctx.data::<AppState>()
}

fn caller<'a>(ctx: &Context<'a>) -> async_graphql::Result<&'a Claims> {
    ctx.data_opt::<Claims>()
        .ok_or_else(|| gql(ApiError::unauthenticated()))
}

// -- Output types --

#[derive(SimpleObject)]
#[graphql(name = "Poll")]
pub struct GqlPoll {
    id: Uuid,
    title: String,
    description: Option<String>,
    created_by: Uuid,
    is_active: bool,
    end_date: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    questions: Vec<GqlQuestion>,
}

#[derive(SimpleObject)]
#[graphql(name = "Question")]
pub struct GqlQuestion {
    id: Uuid,
    text: String,
    choices: Vec<GqlChoice>,
}

#[derive(SimpleObject)]
#[graphql(name = "Choice")]
pub struct GqlChoice {
    id: Uuid,
    text: String,
    vote_count: i64,
}

#[derive(SimpleObject)]
#[graphql(name = "PollStats")]
pub struct GqlPollStats {
    poll_id: Uuid,
    title: String,
    total_votes: i64,
    questions: Vec<GqlQuestionStats>,
}

#[derive(SimpleObject)]
#[graphql(name = "QuestionStats")]
pub struct GqlQuestionStats {
    question_id: Uuid,
    text: String,
    total_votes: i64,
    choices: Vec<GqlChoiceStats>,
}

#[derive(SimpleObject)]
#[graphql(name = "ChoiceStats")]
pub struct GqlChoiceStats {
    choice_id: Uuid,
    text: String,
    votes: i64,
    percentage: f64,
}

/// Queued vote; `status` is `pending` until a worker picks it up, then
/// `recorded` (with `voteId`) or `failed` (with `reason`).
#[derive(SimpleObject)]
#[graphql(name = "VoteJob")]
pub struct GqlVoteJob {
    job_id: Uuid,
    poll_id: Uuid,
    status: String,
    vote_id: Option<Uuid>,
    reason: Option<String>,
}

impl From<PollResponse> for GqlPoll {
    fn from(p: PollResponse) -> Self {
        Self {
            id: p.id,
            title: p.title,
            description: p.description,
            created_by: p.created_by,
            is_active: p.is_active,
            end_date: p.end_date,
            created_at: p.created_at,
            updated_at: p.updated_at,
            questions: p.questions.into_iter().map(GqlQuestion::from).collect(),
        }
    }
}

impl From<QuestionResponse> for GqlQuestion {
    fn from(q: QuestionResponse) -> Self {
        Self {
            id: q.id,
            text: q.text,
            choices: q.choices.into_iter().map(GqlChoice::from).collect(),
        }
    }
}

impl From<ChoiceResponse> for GqlChoice {
    fn from(c: ChoiceResponse) -> Self {
        Self {
            id: c.id,
            text: c.text,
            vote_count: c.vote_count,
        }
    }
}

impl From<PollStats> for GqlPollStats {
    fn from(s: PollStats) -> Self {
        Self {
            poll_id: s.poll_id,
            title: s.title,
            total_votes: s.total_votes,
            questions: s.questions.into_iter().map(GqlQuestionStats::from).collect(),
        }
    }
}

impl From<QuestionStats> for GqlQuestionStats {
    fn from(q: QuestionStats) -> Self {
        Self {
            question_id: q.question_id,
            text: q.text,
            total_votes: q.total_votes,
            choices: q.choices.into_iter().map(GqlChoiceStats::from).collect(),
        }
    }
}

impl From<ChoiceStats> for GqlChoiceStats {
    fn from(c: ChoiceStats) -> Self {
        Self {
            choice_id: c.choice_id,
            text: c.text,
            votes: c.votes,
            percentage: c.percentage,
        }
    }
}

impl From<JobResponse> for GqlVoteJob {
    fn from(job: JobResponse) -> Self {
        let (status, vote_id, reason) = match job.status {
            JobStatus::Pending => ("pending", None, None),
            JobStatus::Recorded { vote_id } => ("recorded", Some(vote_id), None),
            JobStatus::Failed { reason } => ("failed", None, Some(reason)),
        };
        Self {
            job_id: job.job_id,
            poll_id: job.poll_id,
            status: status.to_string(),
            vote_id,
            reason,
        }
    }
}

// -- Input types --

#[derive(InputObject)]
pub struct PollInput {
    title: String,
    description: Option<String>,
    end_date: Option<DateTime<Utc>>,
    #[graphql(default)]
    questions: Vec<QuestionInput>,
}

#[derive(InputObject)]
pub struct QuestionInput {
    text: String,
    #[graphql(default)]
    choices: Vec<String>,
}

impl From<PollInput> for CreatePollRequest {
    fn from(input: PollInput) -> Self {
        Self {
            title: input.title,
            description: input.description,
            end_date: input.end_date,
            questions: input
                .questions
                .into_iter()
                .map(|q| CreateQuestion {
                    text: q.text,
                    choices: q.choices.into_iter().map(|text| CreateChoice { text }).collect(),
                })
                .collect(),
        }
    }
}

/// Absent fields are left untouched. `questions`, when given, replaces the
/// poll's structure: entries with an `id` are kept and edited, the rest are
/// created, and anything not listed is deleted.
#[derive(InputObject)]
pub struct PollUpdateInput {
    title: Option<String>,
    description: Option<String>,
    /// `null` clears the end date.
    end_date: MaybeUndefined<DateTime<Utc>>,
    is_active: Option<bool>,
    questions: Option<Vec<QuestionEditInput>>,
}

#[derive(InputObject)]
pub struct QuestionEditInput {
    id: Option<Uuid>,
    text: String,
    #[graphql(default)]
    choices: Vec<ChoiceEditInput>,
}

#[derive(InputObject)]
pub struct ChoiceEditInput {
    id: Option<Uuid>,
    text: String,
}

impl PollUpdateInput {
    fn into_request(self, confirm_reset: bool) -> UpdatePollRequest {
        let end_date = match self.end_date {
            MaybeUndefined::Undefined => None,
            MaybeUndefined::Null => Some(None),
            MaybeUndefined::Value(end) => Some(Some(end)),
        };
        UpdatePollRequest {
            title: self.title,
            description: self.description,
            end_date,
            is_active: self.is_active,
            questions: self.questions.map(|questions| {
                questions
                    .into_iter()
                    .map(|q| tally_types::api::QuestionInput {
                        id: q.id,
                        text: q.text,
                        choices: q
                            .choices
                            .into_iter()
                            .map(|c| ChoiceInput {
                                id: c.id,
                                text: c.text,
                            })
                            .collect(),
                    })
                    .collect()
            }),
            confirm_reset,
        }
    }
}

// -- Roots --

pub struct QueryRoot;

#[Object]
impl QueryRoot {
    /// Active polls, newest first.
    async fn all_polls(&self, ctx: &Context<'_>) -> async_graphql::Result<Vec<GqlPoll>> {
        let state = app_state(ctx)?;
        let polls = polls::list_active(state).await.map_err(gql)?;
        Ok(polls.into_iter().map(GqlPoll::from).collect())
    }

    async fn poll(&self, ctx: &Context<'_>, id: Uuid) -> async_graphql::Result<Option<GqlPoll>> {
        let state = app_state(ctx)?;
        let poll = polls::fetch(state, id).await.map_err(gql)?;
        Ok(poll.map(GqlPoll::from))
    }

    async fn poll_stats(&self, ctx: &Context<'_>, id: Uuid) -> async_graphql::Result<GqlPollStats> {
        let state = app_state(ctx)?;
        let stats = stats::compute(state, id).await.map_err(gql)?;
        Ok(stats.into())
    }

    /// Status of a vote job submitted by the caller.
    async fn vote_job(&self, ctx: &Context<'_>, id: Uuid) -> async_graphql::Result<Option<GqlVoteJob>> {
        let claims = caller(ctx)?;
        let state = app_state(ctx)?;
        Ok(jobs::lookup(state, claims, id).map(GqlVoteJob::from))
    }
}

pub struct MutationRoot;

#[Object]
impl MutationRoot {
    async fn create_poll(&self, ctx: &Context<'_>, input: PollInput) -> async_graphql::Result<GqlPoll> {
        let claims = caller(ctx)?;
        let state = app_state(ctx)?;
        let poll = polls::create(state, claims, input.into()).await.map_err(gql)?;
        Ok(poll.into())
    }

    /// Edit a poll. Rewriting the questions of a poll that already has votes
    /// fails unless `confirmReset` is true, which deletes those votes.
    async fn update_poll(
        &self,
        ctx: &Context<'_>,
        id: Uuid,
        input: PollUpdateInput,
        #[graphql(default)] confirm_reset: bool,
    ) -> async_graphql::Result<GqlPoll> {
        let claims = caller(ctx)?;
        let state = app_state(ctx)?;
        let req = input.into_request(confirm_reset);
        let poll = polls::update(state, claims, id, req).await.map_err(gql)?;
        Ok(poll.into())
    }

    /// Queue a vote. Returns as soon as the job is accepted.
    async fn vote(
        &self,
        ctx: &Context<'_>,
        poll_id: Uuid,
        choice_id: Uuid,
        question_id: Option<Uuid>,
    ) -> async_graphql::Result<GqlVoteJob> {
        let claims = caller(ctx)?;
        let state = app_state(ctx)?;
        let req = VoteRequest {
            choice_id,
            question_id,
        };
        let job = votes::submit(state, claims, poll_id, req).await.map_err(gql)?;
        Ok(job.into())
    }

    async fn delete_poll(&self, ctx: &Context<'_>, id: Uuid) -> async_graphql::Result<bool> {
        let claims = caller(ctx)?;
        let state = app_state(ctx)?;
        polls::delete(state, claims, id).await.map_err(gql)?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{test_cache, test_parts, test_state};

    fn claims_for(state: &AppState, username: &str) -> Claims {
        let id = Uuid::new_v4();
        state.db.create_user(&id.to_string(), username, "hash").unwrap();
        Claims {
            sub: id,
            username: username.to_string(),
            exp: usize::MAX,
        }
    }

    const CREATE: &str = r#"mutation {
        createPoll(input: {
            title: "Lunch",
            questions: [{ text: "Where?", choices: ["Tacos", "Pho"] }]
        }) { id title questions { text choices { text voteCount } } }
    }"#;

    #[tokio::test]
    async fn anonymous_mutation_is_rejected() {
        let state = test_state();
        let schema = build_schema(state.clone());

        let resp = schema.execute(CREATE).await;
        assert_eq!(resp.errors.len(), 1);
        assert_eq!(
            resp.errors[0].message,
            "Authentication credentials were not provided"
        );
        assert!(state.db.list_active_polls().unwrap().is_empty());
    }

    #[tokio::test]
    async fn authenticated_create_then_query() {
        let state = test_state();
        let schema = build_schema(state.clone());
        let claims = claims_for(&state, "alice");

        let resp = schema
            .execute(async_graphql::Request::new(CREATE).data(claims))
            .await;
        assert!(resp.errors.is_empty(), "{:?}", resp.errors);

        let resp = schema.execute("{ allPolls { title questions { choices { text } } } }").await;
        assert!(resp.errors.is_empty(), "{:?}", resp.errors);
        let data = resp.data.into_json().unwrap();
        assert_eq!(data["allPolls"][0]["title"], "Lunch");
        assert_eq!(data["allPolls"][0]["questions"][0]["choices"][1]["text"], "Pho");
    }

    #[tokio::test]
    async fn delete_by_non_owner_is_forbidden() {
        let state = test_state();
        let schema = build_schema(state.clone());
        let owner = claims_for(&state, "owner");
        let other = claims_for(&state, "mallory");

        let poll = polls::create(
            &state,
            &owner,
            CreatePollRequest {
                title: "Mine".into(),
                description: None,
                end_date: None,
                questions: vec![],
            },
        )
        .await
        .unwrap();

        let query = format!(r#"mutation {{ deletePoll(id: "{}") }}"#, poll.id);
        let resp = schema
            .execute(async_graphql::Request::new(query).data(other))
            .await;

        assert_eq!(resp.errors.len(), 1);
        assert_eq!(resp.errors[0].message, "You can only delete your own polls.");
        assert!(state.db.get_poll(&poll.id.to_string()).unwrap().is_some());
    }

    /// A poll owned by `owner` with one question and one recorded vote.
    async fn voted_poll(state: &AppState, owner: &Claims, voter: &Claims) -> PollResponse {
        let poll = polls::create(
            state,
            owner,
            CreatePollRequest {
                title: "Lunch".into(),
                description: None,
                end_date: None,
                questions: vec![CreateQuestion {
                    text: "Where?".into(),
                    choices: vec![
                        CreateChoice { text: "Tacos".into() },
                        CreateChoice { text: "Pho".into() },
                    ],
                }],
            },
        )
        .await
        .unwrap();
        let question = &poll.questions[0];
        state
            .db
            .record_vote(
                &question.id.to_string(),
                &question.choices[0].id.to_string(),
                &voter.sub.to_string(),
            )
            .unwrap();
        poll
    }

    fn rewrite_questions(poll_id: Uuid, confirm: Option<bool>) -> String {
        let confirm = confirm
            .map(|c| format!(", confirmReset: {}", c))
            .unwrap_or_default();
        format!(
            r#"mutation {{
                updatePoll(id: "{}", input: {{
                    questions: [{{ text: "Where instead?", choices: [{{ text: "Ramen" }}] }}]
                }}{}) {{ questions {{ text choices {{ text voteCount }} }} }}
            }}"#,
            poll_id, confirm
        )
    }

    #[tokio::test]
    async fn update_poll_with_votes_needs_confirm_reset() {
        let state = test_state();
        let schema = build_schema(state.clone());
        let owner = claims_for(&state, "owner");
        let voter = claims_for(&state, "voter");
        let poll = voted_poll(&state, &owner, &voter).await;

        let resp = schema
            .execute(async_graphql::Request::new(rewrite_questions(poll.id, None)).data(owner.clone()))
            .await;
        assert_eq!(resp.errors.len(), 1);
        assert!(resp.errors[0].message.contains("confirm_reset"));
        let code = resp.errors[0]
            .extensions
            .as_ref()
            .and_then(|ext| ext.get("code"))
            .cloned();
        assert_eq!(code, Some(async_graphql::Value::from("BAD_REQUEST")));

        let unchanged = state.db.get_poll(&poll.id.to_string()).unwrap().unwrap();
        assert_eq!(unchanged.questions[0].question.text, "Where?");
        assert_eq!(unchanged.questions[0].choices[0].vote_count, 1);

        let resp = schema
            .execute(async_graphql::Request::new(rewrite_questions(poll.id, Some(true))).data(owner))
            .await;
        assert!(resp.errors.is_empty(), "{:?}", resp.errors);
        let data = resp.data.into_json().unwrap();
        assert_eq!(data["updatePoll"]["questions"][0]["text"], "Where instead?");
        assert_eq!(data["updatePoll"]["questions"][0]["choices"][0]["voteCount"], 0);
        assert_eq!(state.db.count_poll_votes(&poll.id.to_string()).unwrap(), 0);
    }

    #[tokio::test]
    async fn update_poll_metadata_keeps_votes() {
        let state = test_state();
        let schema = build_schema(state.clone());
        let owner = claims_for(&state, "owner");
        let voter = claims_for(&state, "voter");
        let poll = voted_poll(&state, &owner, &voter).await;

        let query = format!(
            r#"mutation {{ updatePoll(id: "{}", input: {{ title: "Dinner" }}) {{ title }} }}"#,
            poll.id
        );
        let resp = schema.execute(async_graphql::Request::new(query).data(owner)).await;
        assert!(resp.errors.is_empty(), "{:?}", resp.errors);
        assert_eq!(resp.data.into_json().unwrap()["updatePoll"]["title"], "Dinner");
        assert_eq!(state.db.count_poll_votes(&poll.id.to_string()).unwrap(), 1);
    }

    #[tokio::test]
    async fn vote_job_is_visible_only_to_its_submitter() {
        let (state, _rx) = test_parts(test_cache());
        let schema = build_schema(state.clone());
        let owner = claims_for(&state, "owner");
        let voter = claims_for(&state, "voter");
        let poll = polls::create(
            &state,
            &owner,
            CreatePollRequest {
                title: "Lunch".into(),
                description: None,
                end_date: None,
                questions: vec![CreateQuestion {
                    text: "Where?".into(),
                    choices: vec![CreateChoice { text: "Tacos".into() }],
                }],
            },
        )
        .await
        .unwrap();

        let vote = format!(
            r#"mutation {{ vote(pollId: "{}", choiceId: "{}") {{ jobId status }} }}"#,
            poll.id, poll.questions[0].choices[0].id
        );
        let resp = schema
            .execute(async_graphql::Request::new(vote).data(voter.clone()))
            .await;
        assert!(resp.errors.is_empty(), "{:?}", resp.errors);
        let job_id = resp.data.into_json().unwrap()["vote"]["jobId"]
            .as_str()
            .unwrap()
            .to_string();

        let query = format!(r#"{{ voteJob(id: "{}") {{ status pollId }} }}"#, job_id);
        let resp = schema
            .execute(async_graphql::Request::new(query.clone()).data(voter))
            .await;
        let data = resp.data.into_json().unwrap();
        assert_eq!(data["voteJob"]["status"], "pending");
        assert_eq!(data["voteJob"]["pollId"], poll.id.to_string());

        let resp = schema
            .execute(async_graphql::Request::new(query).data(owner))
            .await;
        assert!(resp.data.into_json().unwrap()["voteJob"].is_null());
    }
}
