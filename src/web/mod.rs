pub mod admin;
pub mod auth;
pub mod gate;
pub mod models;
pub mod responses;
pub mod router;
pub mod shorts;
pub mod state;
pub mod templates;
pub mod uploads;

#[cfg(test)]
pub(crate) mod test_support;

pub use auth::{AuthUser, CurrentUser};
pub use gate::{Role, RoleGate};
pub use responses::{ApiMessage, json_error};
pub use state::AppState;
pub use templates::{PageLayout, escape_html, render_login_page, render_page};
