//! HTTP-01 challenge responder.
//!
//! A minimal HTTP listener answering ACME validation requests from the
//! shared [`ChallengeManager`], plus a liveness probe. The CA fetches
//! `/.well-known/acme-challenge/<token>` over plain HTTP while an order is
//! being validated, so the daemon has to hold the challenge port itself.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use tracing::{debug, info};

use crate::acme::{ChallengeManager, CHALLENGE_PATH_PREFIX};

/// Build the responder router.
pub fn router(challenges: ChallengeManager) -> Router {
    Router::new()
        .route(
            &format!("{CHALLENGE_PATH_PREFIX}:token"),
            get(challenge_response),
        )
        .route("/health", get(|| async { "OK" }))
        .with_state(challenges)
}

/// Bind the responder on `0.0.0.0:<port>` and serve until the process
/// exits.
pub async fn serve(port: &str, challenges: ChallengeManager) -> std::io::Result<()> {
    let addr = format!("0.0.0.0:{port}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    info!(addr = %addr, "HTTP-01 challenge responder listening");

    axum::serve(listener, router(challenges)).await
}

async fn challenge_response(
    State(challenges): State<ChallengeManager>,
    Path(token): Path<String>,
) -> impl IntoResponse {
    match challenges.response(&token) {
        Some(key_authorization) => (StatusCode::OK, key_authorization).into_response(),
        None => {
            debug!(token = %token, "unknown challenge token");
            StatusCode::NOT_FOUND.into_response()
        }
    }
}
