use chrono::{Datelike, Utc};

use crate::web::{AuthUser, Role};

const PAGE_BASE_STYLES: &str = r#"
        :root { color-scheme: light; }
        body { font-family: "Helvetica Neue", Arial, sans-serif; margin: 0; background: #f8fafc; color: #0f172a; }
        header { background: #ffffff; padding: 1.5rem; border-bottom: 1px solid #e2e8f0; }
        .header-bar { display: flex; justify-content: space-between; align-items: center; flex-wrap: wrap; gap: 1rem; }
        .header-bar h1 { margin: 0; font-size: 1.5rem; }
        .nav-link { display: inline-flex; align-items: center; color: #1d4ed8; text-decoration: none; font-weight: 600; background: #e0f2fe; padding: 0.45rem 0.9rem; border-radius: 999px; border: 1px solid #bfdbfe; }
        .nav-link.admin { color: #0f172a; background: #fee2e2; border-color: #fecaca; }
        .nav-form { display: inline; margin: 0; }
        .nav-form button { padding: 0.45rem 0.9rem; border-radius: 999px; }
        main { padding: 2rem 1.5rem; max-width: 960px; margin: 0 auto; box-sizing: border-box; }
        .panel { background: #ffffff; border-radius: 12px; border: 1px solid #e2e8f0; padding: 1.5rem; box-shadow: 0 18px 40px rgba(15, 23, 42, 0.08); }
        label { display: block; margin: 1rem 0 0.5rem; font-weight: 600; }
        input, select { width: 100%; padding: 0.75rem; border-radius: 8px; border: 1px solid #cbd5f5; background: #f8fafc; box-sizing: border-box; }
        button { margin-top: 1rem; padding: 0.75rem 1.1rem; border: none; border-radius: 8px; background: #2563eb; color: #ffffff; font-weight: 600; cursor: pointer; }
        button:hover { background: #1d4ed8; }
        button.danger { background: #dc2626; }
        table { width: 100%; border-collapse: collapse; margin-top: 1rem; }
        th, td { padding: 0.65rem 0.85rem; border-bottom: 1px solid #e2e8f0; text-align: left; }
        th { background: #f1f5f9; }
        tr.current-user td { background: #eff6ff; }
        .note { color: #475569; font-size: 0.95rem; line-height: 1.6; }
        .status-box { margin-top: 1rem; padding: 1rem; border-radius: 12px; background: #f1f5f9; min-height: 1.5rem; }
        .status-box.error { color: #b91c1c; }
        .status-box.success { color: #166534; }
        .app-footer { margin-top: 3rem; text-align: center; font-size: 0.85rem; color: #94a3b8; }
"#;

pub struct PageLayout<'a> {
    pub title: &'a str,
    pub user: &'a AuthUser,
    pub body_html: String,
    pub script: Option<&'a str>,
}

pub fn render_page(layout: PageLayout<'_>) -> String {
    let PageLayout {
        title,
        user,
        body_html,
        script,
    } = layout;

    let admin_link = if user.role == Role::Admin {
        r#"<a class="nav-link admin" href="/dashboard">Administration</a>"#
    } else {
        ""
    };
    let script_html = script
        .map(|script| format!("<script>{script}</script>"))
        .unwrap_or_default();

    format!(
        r#"<!DOCTYPE html>
<html lang="fr">
<head>
    <meta charset="UTF-8">
    <title>{title}</title>
    <meta name="viewport" content="width=device-width, initial-scale=1">
    <meta name="robots" content="noindex,nofollow">
    <style>
{styles}
    </style>
</head>
<body>
    <header>
        <div class="header-bar">
            <h1>{title}</h1>
            <div style="display:flex; gap:0.75rem; align-items:center; flex-wrap:wrap;">
                <span class="note">{username} · {role}</span>
                <a class="nav-link" href="/shorts/new">Publier un short</a>
                {admin_link}
                <form class="nav-form" method="post" action="/logout"><button type="submit">Déconnexion</button></form>
            </div>
        </div>
    </header>
    <main>
{body_html}
        {footer}
    </main>
{script_html}
</body>
</html>"#,
        title = escape_html(title),
        styles = PAGE_BASE_STYLES,
        username = escape_html(&user.username),
        role = user.role.label(),
        admin_link = admin_link,
        body_html = body_html,
        footer = render_footer(),
        script_html = script_html,
    )
}

pub fn render_login_page(error: Option<&str>) -> String {
    let error_html = error
        .map(|message| format!(r#"<p class="error">{}</p>"#, escape_html(message)))
        .unwrap_or_default();

    format!(
        r#"<!DOCTYPE html>
<html lang="fr">
<head>
    <meta charset="UTF-8">
    <title>Connexion</title>
    <meta name="viewport" content="width=device-width, initial-scale=1">
    <meta name="robots" content="noindex,nofollow">
    <style>
        :root {{ color-scheme: light; }}
        body {{ font-family: "Helvetica Neue", Arial, sans-serif; display: flex; flex-direction: column; align-items: center; justify-content: center; min-height: 100vh; margin: 0; background: #f1f5f9; color: #0f172a; padding: 1.5rem; box-sizing: border-box; }}
        main {{ width: 100%; max-width: 420px; }}
        .panel {{ background: #ffffff; padding: 2.25rem; border-radius: 18px; box-shadow: 0 20px 60px rgba(15, 23, 42, 0.08); border: 1px solid #e2e8f0; }}
        h1 {{ margin: 0 0 1rem; font-size: 1.6rem; text-align: center; }}
        label {{ display: block; margin-top: 1.2rem; font-weight: 600; }}
        input {{ width: 100%; padding: 0.85rem; margin-top: 0.65rem; border-radius: 10px; border: 1px solid #cbd5f5; background: #f8fafc; font-size: 1rem; box-sizing: border-box; }}
        button {{ margin-top: 2rem; width: 100%; padding: 0.95rem; border: none; border-radius: 10px; background: #2563eb; color: #ffffff; font-weight: 600; font-size: 1.05rem; cursor: pointer; }}
        .error {{ color: #b91c1c; text-align: center; }}
        .app-footer {{ margin-top: 2.5rem; text-align: center; font-size: 0.85rem; color: #64748b; }}
    </style>
</head>
<body>
    <main>
        <section class="panel">
            <h1>Connexion</h1>
            {error_html}
            <form method="post" action="/login">
                <label for="username">Nom d'utilisateur</label>
                <input id="username" name="username" required>
                <label for="password">Mot de passe</label>
                <input id="password" type="password" name="password" required>
                <button type="submit">Se connecter</button>
            </form>
        </section>
        {footer}
    </main>
</body>
</html>"#,
        error_html = error_html,
        footer = render_footer(),
    )
}

pub fn render_footer() -> String {
    let current_year = Utc::now().year();
    format!(r#"<footer class="app-footer">© {current_year} Shorts, usage interne</footer>"#)
}

pub fn escape_html(input: &str) -> String {
    input
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use super::*;

    fn user(role: Role) -> AuthUser {
        AuthUser {
            id: Uuid::new_v4(),
            username: "<b>camille</b>".to_string(),
            role,
        }
    }

    #[test]
    fn escape_html_covers_markup_characters() {
        assert_eq!(
            escape_html(r#"<a href="x">'&'</a>"#),
            "&lt;a href=&quot;x&quot;&gt;&#39;&amp;&#39;&lt;/a&gt;"
        );
    }

    #[test]
    fn page_escapes_username_and_hides_admin_link_for_members() {
        let page = render_page(PageLayout {
            title: "Test",
            user: &user(Role::Editor),
            body_html: String::new(),
            script: None,
        });
        assert!(page.contains("&lt;b&gt;camille&lt;/b&gt;"));
        assert!(!page.contains("/dashboard"));
    }

    #[test]
    fn page_links_dashboard_for_admins() {
        let page = render_page(PageLayout {
            title: "Test",
            user: &user(Role::Admin),
            body_html: String::new(),
            script: None,
        });
        assert!(page.contains(r#"href="/dashboard""#));
    }

    #[test]
    fn login_page_shows_escaped_error() {
        let page = render_login_page(Some("<oops>"));
        assert!(page.contains("&lt;oops&gt;"));
        assert!(render_login_page(None).contains(r#"action="/login""#));
    }
}
