use axum::{
    Router, middleware,
    http::StatusCode,
    response::{IntoResponse, Redirect},
    routing::{get, post},
};

use crate::web::{AppState, admin, auth, shorts};

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(home))
        .route("/login", get(auth::login_page).post(auth::process_login))
        .route("/logout", post(auth::logout))
        .route("/healthz", get(healthz))
        .merge(shorts::router())
        .merge(admin::router())
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth::authenticate,
        ))
        .with_state(state)
}

async fn home() -> Redirect {
    Redirect::to("/shorts/new")
}

async fn healthz() -> impl IntoResponse {
    StatusCode::OK
}
