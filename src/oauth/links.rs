//! Per-service authorization links for the landing page.

use crate::session::Session;

/// The code-hosting service needs repository access.
const GITHUB_SERVICE: &str = "github";
const GITHUB_SCOPE: &str = "repo";

/// Everything about the current request a link needs besides the session.
pub struct LinkContext<'a> {
    pub api_base_url: &'a str,
    pub client_id: &'a str,
    /// Absolute URL of our `/callback`.
    pub redirect_uri: &'a str,
}

/// Render the landing-page entry for `service`: a checkmark when the
/// session already has it linked, an authorization link otherwise.
pub fn authorization_link(
    session: Option<&Session>,
    ctx: &LinkContext<'_>,
    service: &str,
    display_name: &str,
) -> String {
    let profile = session.and_then(|s| s.profile.as_ref());

    if profile.is_some_and(|p| p.has_service(service)) {
        return format!(
            r#"<span class="check">&#10003;</span> {}"#,
            escape_html(display_name)
        );
    }

    let mut params: Vec<(&str, &str)> = vec![
        ("client_id", ctx.client_id),
        ("redirect_uri", ctx.redirect_uri),
        ("service", service),
    ];

    // Merge into the existing identity when there is one.
    let merge_token = session
        .and_then(|s| s.access_token.as_deref())
        .filter(|_| profile.is_some_and(|p| p.id().is_some()));
    match merge_token {
        Some(token) => params.push(("access_token", token)),
        None => params.push(("account", "false")),
    }

    if service == GITHUB_SERVICE {
        params.push(("scope", GITHUB_SCOPE));
    }

    // Values are percent-encoded; only the separators need HTML escaping.
    let query = params
        .iter()
        .map(|(k, v)| format!("{k}={}", urlencoding::encode(v)))
        .collect::<Vec<_>>()
        .join("&amp;");

    format!(
        r#"<a href="{}/oauth/authenticate?{query}">{}</a>"#,
        escape_html(ctx.api_base_url),
        escape_html(display_name)
    )
}

fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}
