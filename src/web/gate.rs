use std::{fmt, str::FromStr, sync::Arc};

use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Redirect, Response},
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::web::auth::{AuthUser, CurrentUser};

pub const LOGIN_PATH: &str = "/login";
pub const ACCESS_DENIED_MESSAGE: &str =
    "Accès refusé. Vous n'avez pas les permissions nécessaires.";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Editor,
    Admin,
}

impl Role {
    pub const ALL: [Role; 3] = [Role::User, Role::Editor, Role::Admin];

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Editor => "editor",
            Role::Admin => "admin",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Role::User => "Utilisateur",
            Role::Editor => "Éditeur",
            Role::Admin => "Administrateur",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownRole(pub String);

impl fmt::Display for UnknownRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown role `{}`", self.0)
    }
}

impl std::error::Error for UnknownRole {}

impl FromStr for Role {
    type Err = UnknownRole;

    // Exact match only; "Admin" or "super-admin" are not roles.
    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Role::ALL
            .into_iter()
            .find(|role| role.as_str() == value)
            .ok_or_else(|| UnknownRole(value.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Unauthenticated,
    Forbidden,
    Granted,
}

/// Decides access for `user` against the allow-list. Membership is exact, with no hierarchy.
pub fn evaluate(user: Option<&AuthUser>, allowed: &[Role]) -> Access {
    match user {
        None => Access::Unauthenticated,
        Some(user) if allowed.contains(&user.role) => Access::Granted,
        Some(_) => Access::Forbidden,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessDenied {
    Unauthenticated,
    Forbidden,
}

impl IntoResponse for AccessDenied {
    fn into_response(self) -> Response {
        match self {
            AccessDenied::Unauthenticated => Redirect::to(LOGIN_PATH).into_response(),
            AccessDenied::Forbidden => {
                (StatusCode::FORBIDDEN, ACCESS_DENIED_MESSAGE).into_response()
            }
        }
    }
}

/// Allow-list of roles guarding a group of routes.
#[derive(Clone, Debug)]
pub struct RoleGate {
    allowed: Arc<[Role]>,
}

impl RoleGate {
    pub fn new(allowed: &[Role]) -> Self {
        Self {
            allowed: Arc::from(allowed),
        }
    }

    pub fn admin() -> Self {
        Self::new(&[Role::Admin])
    }

    pub fn members() -> Self {
        Self::new(&Role::ALL)
    }

    pub fn allowed(&self) -> &[Role] {
        &self.allowed
    }

    pub fn check(&self, user: Option<&AuthUser>) -> Result<(), AccessDenied> {
        match evaluate(user, &self.allowed) {
            Access::Granted => Ok(()),
            Access::Unauthenticated => Err(AccessDenied::Unauthenticated),
            Access::Forbidden => Err(AccessDenied::Forbidden),
        }
    }
}

/// Middleware for [`RoleGate`]; on success the [`AuthUser`] becomes a request extension.
pub async fn require_roles(
    State(gate): State<RoleGate>,
    mut request: Request,
    next: Next,
) -> Result<Response, AccessDenied> {
    let user = request
        .extensions()
        .get::<CurrentUser>()
        .and_then(|current| current.0.clone());
    let path = request.uri().path().to_string();

    if let Err(denied) = gate.check(user.as_ref()) {
        match (denied, &user) {
            (AccessDenied::Forbidden, Some(user)) => warn!(
                user_id = %user.id,
                role = %user.role,
                required = ?gate.allowed(),
                %path,
                "access denied"
            ),
            _ => info!(%path, "unauthenticated request redirected to login"),
        }
        return Err(denied);
    }

    if let Some(user) = user {
        debug!(user_id = %user.id, role = %user.role, %path, "access granted");
        request.extensions_mut().insert(user);
    }

    Ok(next.run(request).await)
}
