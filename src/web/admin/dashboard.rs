use axum::{
    Extension,
    extract::State,
    http::StatusCode,
    response::Html,
};
use sqlx::PgPool;
use tracing::{error, warn};

use crate::web::{
    AppState, AuthUser, PageLayout, Role, escape_html, models::UserRow, render_page,
};

const DASHBOARD_SCRIPT: &str = r#"
const statusBox = document.getElementById('admin-status');

async function send(method, url, body) {
    statusBox.className = 'status-box';
    const options = { method, credentials: 'same-origin', headers: {} };
    if (body !== undefined) {
        options.headers['Content-Type'] = 'application/json';
        options.body = JSON.stringify(body);
    }
    try {
        const response = await fetch(url, options);
        const payload = await response.json();
        statusBox.classList.add(payload.success ? 'success' : 'error');
        statusBox.textContent = payload.message;
        if (payload.success) { setTimeout(() => window.location.reload(), 600); }
    } catch (err) {
        statusBox.classList.add('error');
        statusBox.textContent = 'Requête impossible.';
    }
}

document.querySelectorAll('[data-role-select]').forEach((select) => {
    select.addEventListener('change', () => {
        send('PUT', '/update-admin-role', { user_id: select.dataset.userId, role: select.value });
    });
});

document.querySelectorAll('[data-rename]').forEach((button) => {
    button.addEventListener('click', () => {
        const username = window.prompt('Nouveau nom d\'utilisateur');
        if (username) { send('PUT', `/users/${button.dataset.userId}`, { username }); }
    });
});

document.querySelectorAll('[data-password]').forEach((button) => {
    button.addEventListener('click', () => {
        const password = window.prompt('Nouveau mot de passe');
        if (password) { send('PUT', `/users/${button.dataset.userId}`, { password }); }
    });
});

document.querySelectorAll('[data-delete]').forEach((button) => {
    button.addEventListener('click', () => {
        if (window.confirm('Supprimer ce compte et ses shorts ?')) {
            send('DELETE', `/users/${button.dataset.userId}`);
        }
    });
});
"#;

pub async fn dashboard(
    State(state): State<AppState>,
    Extension(admin): Extension<AuthUser>,
) -> Result<Html<String>, (StatusCode, Html<String>)> {
    let users = fetch_dashboard_users(state.pool_ref()).await.map_err(|err| {
        error!(?err, "failed to load dashboard users");
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Html("Erreur interne du serveur.".to_string()),
        )
    })?;

    let body_html = format!(
        r#"<section class="panel">
            <h2>Comptes</h2>
            <table>
                <thead><tr><th>Utilisateur</th><th>Rôle</th><th>Créé le</th><th>Actions</th></tr></thead>
                <tbody>{rows}</tbody>
            </table>
            <div id="admin-status" class="status-box"></div>
        </section>"#,
        rows = render_user_rows(&users, &admin),
    );

    Ok(Html(render_page(PageLayout {
        title: "Administration",
        user: &admin,
        body_html,
        script: Some(DASHBOARD_SCRIPT),
    })))
}

async fn fetch_dashboard_users(pool: &PgPool) -> sqlx::Result<Vec<UserRow>> {
    sqlx::query_as::<_, UserRow>(
        "SELECT id, username, role, created_at FROM users ORDER BY created_at ASC",
    )
    .fetch_all(pool)
    .await
}

fn render_user_rows(users: &[UserRow], admin: &AuthUser) -> String {
    if users.is_empty() {
        return r#"<tr><td colspan="4">Aucun compte pour le moment.</td></tr>"#.to_string();
    }

    let mut rows = String::new();
    for user in users {
        let is_self = user.id == admin.id;
        let role = match user.role.parse::<Role>() {
            Ok(role) => Some(role),
            Err(err) => {
                warn!(user_id = %user.id, %err, "dashboard user carries an unknown role");
                None
            }
        };

        let role_cell = if is_self {
            escape_html(role.map(|role| role.label()).unwrap_or(user.role.as_str()))
        } else {
            let options: String = Role::ALL
                .iter()
                .map(|candidate| {
                    format!(
                        r#"<option value="{value}"{selected}>{label}</option>"#,
                        value = candidate.as_str(),
                        label = candidate.label(),
                        selected = if Some(*candidate) == role { " selected" } else { "" },
                    )
                })
                .collect();
            format!(
                r#"<select data-role-select data-user-id="{id}">{options}</select>"#,
                id = user.id,
            )
        };

        let delete_button = if is_self {
            String::new()
        } else {
            format!(
                r#"<button type="button" class="danger" data-delete data-user-id="{id}">Supprimer</button>"#,
                id = user.id,
            )
        };

        rows.push_str(&format!(
            r#"<tr class="{class}"><td>{username}</td><td>{role_cell}</td><td>{created}</td><td>
                <button type="button" data-rename data-user-id="{id}">Renommer</button>
                <button type="button" data-password data-user-id="{id}">Mot de passe</button>
                {delete_button}
            </td></tr>"#,
            class = if is_self { "current-user" } else { "" },
            username = escape_html(&user.username),
            role_cell = role_cell,
            created = user.created_at.format("%Y-%m-%d %H:%M"),
            id = user.id,
            delete_button = delete_button,
        ));
    }
    rows
}
