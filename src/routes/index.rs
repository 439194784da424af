use askama::Template;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::Html;
use axum_extra::extract::CookieJar;

use crate::app::AppState;
use crate::error::AppError;
use crate::oauth::links::{authorization_link, LinkContext};

#[derive(Template)]
#[template(path = "index.html")]
struct IndexPage {
    profile_id: Option<String>,
    links: Vec<String>,
    has_token: bool,
}

/// GET / — landing page with one authorization link per service
pub async fn index(
    State(state): State<AppState>,
    headers: HeaderMap,
    jar: CookieJar,
) -> Result<Html<String>, AppError> {
    if !state.aggregator.has_credentials() {
        return Err(AppError::Configuration(
            "missing aggregator client_id and client_secret settings".to_string(),
        ));
    }

    let session = state.sessions.load(&jar).session;
    let redirect_uri = format!("{}/callback", super::request_origin(&state, &headers));
    let ctx = LinkContext {
        api_base_url: state.aggregator.api_base_url(),
        client_id: state.aggregator.client_id(),
        redirect_uri: &redirect_uri,
    };

    let links = state
        .services
        .iter()
        .map(|svc| authorization_link(Some(&session), &ctx, &svc.name, &svc.display_name))
        .collect();

    let page = IndexPage {
        profile_id: session.profile.as_ref().and_then(|p| p.id()),
        links,
        has_token: session.access_token.is_some(),
    };
    Ok(Html(page.render()?))
}
