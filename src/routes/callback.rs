use axum::extract::{Query, State};
use axum::http::header::LOCATION;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum_extra::extract::CookieJar;
use serde::Deserialize;

use crate::app::AppState;
use crate::error::AppError;

#[derive(Debug, Deserialize)]
pub struct CallbackParams {
    pub code: Option<String>,
}

/// GET /callback — OAuth redirect target.
///
/// The access token is saved as soon as the exchange succeeds, so a failed
/// profile fetch still leaves it in the session. The profile is only written
/// once it has been fetched in full.
pub async fn callback(
    State(state): State<AppState>,
    Query(params): Query<CallbackParams>,
    jar: CookieJar,
) -> Response {
    if !state.aggregator.has_credentials() {
        return AppError::Configuration(
            "missing aggregator client_id and client_secret settings".to_string(),
        )
        .into_response();
    }

    let Some(code) = params.code.filter(|c| !c.is_empty()) else {
        return AppError::MissingCode.into_response();
    };

    let token = match state.aggregator.exchange_code(&code).await {
        Ok(token) => token,
        Err(e) => {
            tracing::warn!(error = %e, "Authorization code exchange failed");
            return AppError::Callback(e).into_response();
        }
    };

    let mut loaded = state.sessions.load(&jar);
    loaded.session.access_token = Some(token.clone());
    let jar = state.sessions.save(jar, &mut loaded);

    match state.aggregator.profile(&token).await {
        Ok(profile) => {
            tracing::info!(
                profile_id = %profile.id().unwrap_or_default(),
                services = profile.services.len(),
                "Profile linked"
            );
            loaded.session.profile = Some(profile);
            let jar = state.sessions.save(jar, &mut loaded);
            (jar, (StatusCode::FOUND, [(LOCATION, "/")])).into_response()
        }
        Err(e) => {
            tracing::warn!(error = %e, "Profile fetch failed");
            (jar, AppError::Callback(e)).into_response()
        }
    }
}
