use axum::{
    Extension, Json,
    extract::{
        Path, State,
        rejection::{JsonRejection, PathRejection},
    },
    http::StatusCode,
};
use serde::Deserialize;
use sqlx::{Postgres, Transaction};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::web::{ApiMessage, AppState, AuthUser, Role, auth, json_error, uploads};

type ApiResult = Result<Json<ApiMessage>, (StatusCode, Json<ApiMessage>)>;

#[derive(Debug, Default, Deserialize)]
pub(crate) struct UpdateUserRequest {
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    password: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct UpdateRoleRequest {
    user_id: Uuid,
    role: Role,
}

#[derive(Debug, PartialEq, Eq)]
struct UserChanges<'a> {
    username: Option<&'a str>,
    password: Option<&'a str>,
}

fn validate_update(request: &UpdateUserRequest) -> Result<UserChanges<'_>, &'static str> {
    let username = request.username.as_deref().map(str::trim);
    let password = request.password.as_deref();

    if username.is_none() && password.is_none() {
        return Err("Aucune modification fournie.");
    }
    if username.is_some_and(str::is_empty) {
        return Err("Le nom d'utilisateur ne peut pas être vide.");
    }
    if password.is_some_and(|password| password.trim().is_empty()) {
        return Err("Le mot de passe ne peut pas être vide.");
    }

    Ok(UserChanges { username, password })
}

/// True when `target` is the only admin and the change takes that role away.
fn leaves_no_admin(admins: &[Uuid], target: Uuid, target_stays_admin: bool) -> bool {
    !target_stays_admin && admins.contains(&target) && admins.iter().all(|id| *id == target)
}

/// Locks every admin row until the transaction ends and returns their ids.
async fn lock_admins(tx: &mut Transaction<'_, Postgres>) -> sqlx::Result<Vec<Uuid>> {
    sqlx::query_scalar("SELECT id FROM users WHERE role = $1 FOR UPDATE")
        .bind(Role::Admin.as_str())
        .fetch_all(&mut **tx)
        .await
}

fn last_admin() -> (StatusCode, Json<ApiMessage>) {
    json_error(
        StatusCode::CONFLICT,
        "Au moins un administrateur doit rester.",
    )
}

fn bad_request(message: impl Into<String>) -> (StatusCode, Json<ApiMessage>) {
    json_error(StatusCode::BAD_REQUEST, message)
}

fn user_missing() -> (StatusCode, Json<ApiMessage>) {
    json_error(StatusCode::NOT_FOUND, "Utilisateur introuvable.")
}

fn internal_error() -> (StatusCode, Json<ApiMessage>) {
    json_error(StatusCode::INTERNAL_SERVER_ERROR, "Erreur interne du serveur.")
}

pub async fn update_user(
    State(state): State<AppState>,
    Extension(admin): Extension<AuthUser>,
    user_id: Result<Path<Uuid>, PathRejection>,
    payload: Result<Json<UpdateUserRequest>, JsonRejection>,
) -> ApiResult {
    let Path(user_id) = user_id.map_err(|rejection| bad_request(rejection.body_text()))?;
    let Json(payload) = payload.map_err(|rejection| bad_request(rejection.body_text()))?;
    let changes = validate_update(&payload).map_err(bad_request)?;

    let password_hash = match changes.password {
        Some(password) => match auth::hash_password(password) {
            Ok(hash) => Some(hash),
            Err(err) => {
                error!(?err, "failed to hash password while updating user");
                return Err(internal_error());
            }
        },
        None => None,
    };

    let result = sqlx::query(
        "UPDATE users
         SET username = COALESCE($2, username),
             password_hash = COALESCE($3, password_hash)
         WHERE id = $1",
    )
    .bind(user_id)
    .bind(changes.username)
    .bind(password_hash)
    .execute(state.pool_ref())
    .await;

    match result {
        Ok(res) if res.rows_affected() > 0 => {
            info!(admin_id = %admin.id, %user_id, "user updated");
            Ok(Json(ApiMessage::ok("Utilisateur mis à jour.")))
        }
        Ok(_) => Err(user_missing()),
        Err(sqlx::Error::Database(db_err)) if db_err.code().as_deref() == Some("23505") => Err(
            json_error(StatusCode::CONFLICT, "Ce nom d'utilisateur est déjà pris."),
        ),
        Err(err) => {
            error!(?err, "failed to update user");
            Err(internal_error())
        }
    }
}

pub async fn delete_user(
    State(state): State<AppState>,
    Extension(admin): Extension<AuthUser>,
    user_id: Result<Path<Uuid>, PathRejection>,
) -> ApiResult {
    let Path(user_id) = user_id.map_err(|rejection| bad_request(rejection.body_text()))?;

    if user_id == admin.id {
        return Err(bad_request(
            "Vous ne pouvez pas supprimer votre propre compte.",
        ));
    }

    let mut tx = match state.pool_ref().begin().await {
        Ok(tx) => tx,
        Err(err) => {
            error!(?err, "failed to begin transaction for user deletion");
            return Err(internal_error());
        }
    };

    let admins = match lock_admins(&mut tx).await {
        Ok(admins) => admins,
        Err(err) => {
            error!(?err, "failed to lock admin accounts");
            return Err(internal_error());
        }
    };
    if leaves_no_admin(&admins, user_id, false) {
        let _ = tx.rollback().await;
        warn!(admin_id = %admin.id, %user_id, "refused to delete the last admin");
        return Err(last_admin());
    }

    // Sessions and short rows cascade; the files are removed here.
    let stored_names: Vec<String> =
        match sqlx::query_scalar("SELECT stored_name FROM shorts WHERE user_id = $1")
            .bind(user_id)
            .fetch_all(&mut *tx)
            .await
        {
            Ok(names) => names,
            Err(err) => {
                error!(?err, "failed to list shorts before deleting user");
                return Err(internal_error());
            }
        };

    let result = sqlx::query("DELETE FROM users WHERE id = $1")
        .bind(user_id)
        .execute(&mut *tx)
        .await;

    match result {
        Ok(res) if res.rows_affected() > 0 => {
            if let Err(err) = tx.commit().await {
                error!(?err, "failed to commit user deletion");
                return Err(internal_error());
            }
            let destination = &state.upload_policy().destination;
            for name in &stored_names {
                uploads::discard(&destination.join(name)).await;
            }
            info!(
                admin_id = %admin.id,
                %user_id,
                removed_shorts = stored_names.len(),
                "user deleted"
            );
            Ok(Json(ApiMessage::ok("Utilisateur supprimé.")))
        }
        Ok(_) => {
            let _ = tx.rollback().await;
            Err(user_missing())
        }
        Err(err) => {
            error!(?err, "failed to delete user");
            let _ = tx.rollback().await;
            Err(internal_error())
        }
    }
}

pub async fn update_user_role(
    State(state): State<AppState>,
    Extension(admin): Extension<AuthUser>,
    payload: Result<Json<UpdateRoleRequest>, JsonRejection>,
) -> ApiResult {
    let Json(payload) = payload.map_err(|rejection| bad_request(rejection.body_text()))?;

    if payload.user_id == admin.id {
        return Err(bad_request("Vous ne pouvez pas modifier votre propre rôle."));
    }

    let mut tx = match state.pool_ref().begin().await {
        Ok(tx) => tx,
        Err(err) => {
            error!(?err, "failed to begin transaction for role update");
            return Err(internal_error());
        }
    };

    let admins = match lock_admins(&mut tx).await {
        Ok(admins) => admins,
        Err(err) => {
            error!(?err, "failed to lock admin accounts");
            return Err(internal_error());
        }
    };
    if leaves_no_admin(&admins, payload.user_id, payload.role == Role::Admin) {
        let _ = tx.rollback().await;
        warn!(
            admin_id = %admin.id,
            user_id = %payload.user_id,
            "refused to demote the last admin"
        );
        return Err(last_admin());
    }

    let result = sqlx::query("UPDATE users SET role = $2 WHERE id = $1")
        .bind(payload.user_id)
        .bind(payload.role.as_str())
        .execute(&mut *tx)
        .await;

    match result {
        Ok(res) if res.rows_affected() > 0 => {
            if let Err(err) = tx.commit().await {
                error!(?err, "failed to commit role update");
                return Err(internal_error());
            }
            info!(
                admin_id = %admin.id,
                user_id = %payload.user_id,
                role = %payload.role,
                "user role updated"
            );
            Ok(Json(ApiMessage::ok(format!(
                "Rôle mis à jour : {}.",
                payload.role.label()
            ))))
        }
        Ok(_) => {
            let _ = tx.rollback().await;
            Err(user_missing())
        }
        Err(err) => {
            error!(?err, "failed to update user role");
            let _ = tx.rollback().await;
            Err(internal_error())
        }
    }
}
