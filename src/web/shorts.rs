use axum::{
    Extension, Json, Router,
    extract::{DefaultBodyLimit, Multipart, State, multipart::MultipartRejection},
    http::StatusCode,
    middleware,
    response::Html,
    routing::{get, post},
};
use serde::Serialize;
use tracing::error;
use uuid::Uuid;

use crate::{
    config::{SHORTS_MAX_BODY_BYTES, SHORTS_TITLE_FIELD},
    web::{
        ApiMessage, AppState, AuthUser, PageLayout, RoleGate, escape_html, json_error,
        gate::require_roles,
        models::ShortRow,
        render_page,
        uploads::{self, UploadedFile},
    },
};

const MAX_TITLE_CHARS: usize = 200;

const UPLOAD_PAGE_SCRIPT: &str = r#"
const form = document.getElementById('short-form');
const statusBox = document.getElementById('short-status');
form.addEventListener('submit', async (event) => {
    event.preventDefault();
    statusBox.className = 'status-box';
    statusBox.textContent = 'Envoi en cours…';
    try {
        const response = await fetch('/shorts', { method: 'POST', body: new FormData(form), credentials: 'same-origin' });
        const payload = await response.json();
        statusBox.classList.add(payload.success ? 'success' : 'error');
        statusBox.textContent = payload.message;
        if (payload.success) { form.reset(); }
    } catch (err) {
        statusBox.classList.add('error');
        statusBox.textContent = 'Échec de l’envoi.';
    }
});
"#;

/// Upload routes, open to every signed-in role.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/shorts/new", get(upload_page))
        .route(
            "/shorts",
            post(create_short).layer(DefaultBodyLimit::max(SHORTS_MAX_BODY_BYTES)),
        )
        .route_layer(middleware::from_fn_with_state(
            RoleGate::members(),
            require_roles,
        ))
}

#[derive(Debug, Serialize)]
pub struct ShortCreated {
    pub success: bool,
    pub message: String,
    pub short: ShortRow,
}

async fn upload_page(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
) -> Html<String> {
    let policy = state.upload_policy();
    let accept = policy.allowed_mime_types.join(",");
    let max_mb = policy.max_file_bytes / (1024 * 1024);

    let body_html = format!(
        r#"<section class="panel">
            <h2>Publier un short</h2>
            <p class="note">Une seule vidéo par envoi, {max_mb} Mo maximum. Formats acceptés : MP4, WebM, MOV, AVI, MKV.</p>
            <form id="short-form" enctype="multipart/form-data">
                <label for="short-title">Titre</label>
                <input id="short-title" name="{title_field}" maxlength="{max_title}">
                <label for="short-file">Vidéo</label>
                <input id="short-file" type="file" name="{field}" accept="{accept}" required>
                <button type="submit">Envoyer</button>
            </form>
            <div id="short-status" class="status-box"></div>
        </section>"#,
        max_mb = max_mb,
        title_field = SHORTS_TITLE_FIELD,
        max_title = MAX_TITLE_CHARS,
        field = escape_html(policy.field_name),
        accept = escape_html(&accept),
    );

    Html(render_page(PageLayout {
        title: "Shorts",
        user: &user,
        body_html,
        script: Some(UPLOAD_PAGE_SCRIPT),
    }))
}

async fn create_short(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<(StatusCode, Json<ShortCreated>), (StatusCode, Json<ApiMessage>)> {
    let multipart =
        multipart.map_err(|rejection| json_error(StatusCode::BAD_REQUEST, rejection.body_text()))?;

    let outcome = uploads::receive_short(multipart, state.upload_policy(), Some(user.id))
        .await
        .map_err(|err| json_error(StatusCode::BAD_REQUEST, err.to_string()))?;

    let title = outcome
        .text(SHORTS_TITLE_FIELD)
        .map(|title| title.chars().take(MAX_TITLE_CHARS).collect::<String>());

    let short = match record_short(&state, user.id, title.as_deref(), &outcome.file).await {
        Ok(short) => short,
        Err(err) => {
            error!(?err, stored_name = %outcome.file.stored_name, "failed to record short");
            uploads::discard(&outcome.file.stored_path).await;
            return Err(json_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Erreur interne du serveur.",
            ));
        }
    };

    Ok((
        StatusCode::CREATED,
        Json(ShortCreated {
            success: true,
            message: "Short publié.".to_string(),
            short,
        }),
    ))
}

async fn record_short(
    state: &AppState,
    user_id: Uuid,
    title: Option<&str>,
    file: &UploadedFile,
) -> sqlx::Result<ShortRow> {
    sqlx::query_as::<_, ShortRow>(
        "INSERT INTO shorts (id, user_id, title, original_name, stored_name, mime_type, size_bytes)
         VALUES ($1, $2, $3, $4, $5, $6, $7)
         RETURNING id, user_id, title, original_name, stored_name, mime_type, size_bytes, created_at",
    )
    .bind(Uuid::new_v4())
    .bind(user_id)
    .bind(title)
    .bind(&file.original_name)
    .bind(&file.stored_name)
    .bind(&file.mime_type)
    .bind(file.size_bytes as i64)
    .fetch_one(state.pool_ref())
    .await
}

#[cfg(test)]
mod tests {
    use axum::{
        body::{Body, to_bytes},
        http::{Request, header},
        response::Response,
    };
    use tempfile::tempdir;
    use tower::ServiceExt;

    use super::*;
    use crate::{
        config::UploadPolicy,
        web::{
            CurrentUser, Role,
            test_support::{
                Part, files_in, lazy_state, multipart_body, multipart_content_type, text, video,
            },
        },
    };

    fn member(role: Role) -> AuthUser {
        AuthUser {
            id: Uuid::new_v4(),
            username: format!("{role}-member"),
            role,
        }
    }

    async fn post_short(policy: UploadPolicy, user: Option<AuthUser>, parts: &[Part]) -> Response {
        router()
            .layer(Extension(CurrentUser(user)))
            .with_state(lazy_state(policy))
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/shorts")
                    .header(header::CONTENT_TYPE, multipart_content_type())
                    .body(Body::from(multipart_body(parts)))
                    .unwrap(),
            )
            .await
            .unwrap()
    }

    async fn json_body(response: Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn anonymous_upload_redirects_and_writes_nothing() {
        let root = tempdir().expect("temp dir");
        let policy = UploadPolicy::shorts(root.path());
        let destination = policy.destination.clone();

        let response = post_short(policy, None, &[video("a.mp4", "video/mp4", 64)]).await;

        assert!(response.status().is_redirection());
        assert_eq!(response.headers()[header::LOCATION], "/login");
        assert!(!destination.exists());
    }

    #[tokio::test]
    async fn png_upload_gets_a_json_rejection() {
        let root = tempdir().expect("temp dir");
        let policy = UploadPolicy::shorts(root.path());
        let destination = policy.destination.clone();

        let response = post_short(
            policy,
            Some(member(Role::User)),
            &[video("photo.png", "image/png", 64)],
        )
        .await;

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = json_body(response).await;
        assert_eq!(body["success"], false);
        assert!(body["message"].as_str().unwrap().contains("video/mp4"));
        assert!(files_in(&destination).is_empty());
    }

    #[tokio::test]
    async fn oversized_upload_reports_the_limit() {
        let root = tempdir().expect("temp dir");
        let policy = UploadPolicy::shorts(root.path()).with_max_file_bytes(1024 * 1024);
        let destination = policy.destination.clone();

        let response = post_short(
            policy,
            Some(member(Role::Editor)),
            &[video("long.mp4", "video/mp4", 1024 * 1024 + 1)],
        )
        .await;

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            json_body(response).await,
            serde_json::json!({ "success": false, "message": "file too large, max 1MB" })
        );
        assert!(files_in(&destination).is_empty());
    }

    #[tokio::test]
    async fn second_file_is_refused() {
        let root = tempdir().expect("temp dir");
        let policy = UploadPolicy::shorts(root.path());
        let destination = policy.destination.clone();

        let response = post_short(
            policy,
            Some(member(Role::Admin)),
            &[
                video("one.mp4", "video/mp4", 16),
                text("title", "double"),
                video("two.mp4", "video/mp4", 16),
            ],
        )
        .await;

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            json_body(response).await["message"],
            "only one file allowed per upload"
        );
        assert!(files_in(&destination).is_empty());
    }

    #[tokio::test]
    async fn extra_text_fields_are_refused_before_buffering() {
        let root = tempdir().expect("temp dir");
        let policy = UploadPolicy::shorts(root.path());
        let destination = policy.destination.clone();
        let filler = "x".repeat(60 * 1024);

        let mut parts: Vec<Part> = (0..400)
            .map(|index| text(&format!("note{index}"), &filler))
            .collect();
        parts.push(video("clip.mp4", "video/mp4", 16));

        let response = post_short(policy, Some(member(Role::User)), &parts).await;

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = json_body(response).await;
        assert_eq!(body["success"], false);
        assert_eq!(body["message"], "unexpected field `note0`");
        assert!(files_in(&destination).is_empty());
    }

    #[tokio::test]
    async fn repeated_title_is_refused() {
        let root = tempdir().expect("temp dir");
        let policy = UploadPolicy::shorts(root.path());
        let destination = policy.destination.clone();

        let response = post_short(
            policy,
            Some(member(Role::Editor)),
            &[
                video("clip.mp4", "video/mp4", 16),
                text("title", "first"),
                text("title", "second"),
            ],
        )
        .await;

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json_body(response).await["message"], "duplicate field `title`");
        assert!(files_in(&destination).is_empty());
    }

    #[tokio::test]
    async fn non_multipart_body_gets_the_same_json_shape() {
        let root = tempdir().expect("temp dir");
        let response = router()
            .layer(Extension(CurrentUser(Some(member(Role::User)))))
            .with_state(lazy_state(UploadPolicy::shorts(root.path())))
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/shorts")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from("{}"))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json_body(response).await["success"], false);
    }

    #[tokio::test]
    async fn stored_file_is_discarded_when_recording_fails() {
        let root = tempdir().expect("temp dir");
        let policy = UploadPolicy::shorts(root.path());
        let destination = policy.destination.clone();

        let response = post_short(
            policy,
            Some(member(Role::Editor)),
            &[video("clip.mp4", "video/mp4", 256)],
        )
        .await;

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(json_body(response).await["success"], false);
        assert!(files_in(&destination).is_empty());
    }

    #[tokio::test]
    async fn upload_page_is_open_to_every_role() {
        for role in Role::ALL {
            let root = tempdir().expect("temp dir");
            let user = member(role);
            let response = router()
                .layer(Extension(CurrentUser(Some(user.clone()))))
                .with_state(lazy_state(UploadPolicy::shorts(root.path())))
                .oneshot(
                    Request::builder()
                        .uri("/shorts/new")
                        .body(Body::empty())
                        .unwrap(),
                )
                .await
                .unwrap();

            assert_eq!(response.status(), StatusCode::OK);
            let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
            let html = String::from_utf8_lossy(&body);
            assert!(html.contains(&user.username));
            assert!(html.contains(r#"name="videoFile""#));
        }
    }
}
