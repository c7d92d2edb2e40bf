pub mod auth;
pub mod catalog;
pub(crate) mod convert;
pub mod error;
pub mod graphql;
pub mod jobs;
pub mod middleware;
pub mod polls;
pub mod state;
pub mod stats;
pub mod votes;

use axum::{
    Extension, Router,
    routing::{get, post},
};

pub use error::ApiError;
pub use state::{AppState, AppStateInner};

/// Every REST and GraphQL route. Transport layers (CORS, tracing) are left
/// to the binary.
pub fn router(state: AppState) -> Router {
    let schema = graphql::build_schema(state.clone());

    let api_routes = Router::new()
        .route("/auth/register", post(auth::register))
        .route("/auth/login", post(auth::login))
        .route("/polls", get(polls::list_polls).post(polls::create_poll))
        .route(
            "/polls/{poll_id}",
            get(polls::get_poll)
                .put(polls::update_poll)
                .patch(polls::update_poll)
                .delete(polls::delete_poll),
        )
        .route("/polls/{poll_id}/vote", post(votes::submit_vote))
        .route("/polls/{poll_id}/stats", get(stats::get_stats))
        .route("/questions", get(catalog::list_questions))
        .route("/questions/{question_id}", get(catalog::get_question))
        .route("/choices", get(catalog::list_choices))
        .route("/choices/{choice_id}", get(catalog::get_choice))
        .route("/graphql", post(graphql::graphql_handler))
        .route("/health", get(health))
        .layer(Extension(schema))
        .with_state(state.clone());

    let protected_routes = Router::new()
        .route("/auth/refresh", post(auth::refresh))
        .route("/auth/password", post(auth::change_password))
        .route("/jobs/{job_id}", get(jobs::get_job))
        .route_layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::require_auth,
        ))
        .with_state(state);

    Router::new().merge(api_routes).merge(protected_routes)
}

async fn health() -> &'static str {
    "ok"
}
