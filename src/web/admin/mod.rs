mod dashboard;
mod users;

use axum::{
    Router, middleware,
    routing::{get, put},
};

use crate::web::{AppState, RoleGate, gate::require_roles};

pub use dashboard::dashboard;
pub use users::{delete_user, update_user, update_user_role};

/// Account management routes. Every route here sits behind the admin gate.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/dashboard", get(dashboard))
        .route("/users/:id", put(update_user).delete(delete_user))
        .route("/update-admin-role", put(update_user_role))
        .route_layer(middleware::from_fn_with_state(
            RoleGate::admin(),
            require_roles,
        ))
}
