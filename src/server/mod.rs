// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! HTTP surface
//!
//! | Method | Path | |
//! |---|---|---|
//! | POST | `/api/chat` | one turn, `text/plain` marker stream |
//! | GET | `/api/conversations` | caller's conversations |
//! | GET | `/api/conversations/:id/messages` | turns of one conversation |
//! | DELETE | `/api/conversations/:id` | delete, cancelling any in-flight turn |
//! | POST | `/api/files` | attach an uploaded file to the caller's index |
//! | GET | `/health` | `OK` |

pub mod error;
pub mod identity;
pub mod routes;

use axum::http::HeaderName;
use axum::routing::{delete, get, post};
use axum::Router;
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::chat::request::{CONVERSATION_ID_HEADER, MODEL_HEADER};
use crate::chat::ConversationController;
use crate::error::Result;

pub use error::ErrorBody;
pub use identity::{BearerTokenIdentity, CurrentUser, IdentityProvider};

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    pub controller: Arc<ConversationController>,
    pub identity: Arc<dyn IdentityProvider>,
}

impl AppState {
    pub fn new(
        controller: Arc<ConversationController>,
        identity: Arc<dyn IdentityProvider>,
    ) -> Self {
        Self {
            controller,
            identity,
        }
    }
}

/// Build the application router
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any)
        .expose_headers([
            HeaderName::from_static(CONVERSATION_ID_HEADER),
            HeaderName::from_static(MODEL_HEADER),
        ]);

    Router::new()
        .route("/api/chat", post(routes::chat))
        .route("/api/conversations", get(routes::list_conversations))
        .route(
            "/api/conversations/:id/messages",
            get(routes::conversation_messages),
        )
        .route("/api/conversations/:id", delete(routes::delete_conversation))
        .route("/api/files", post(routes::attach_file))
        .route("/health", get(routes::health))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Serve until `shutdown` resolves
pub async fn serve<F>(listener: TcpListener, state: AppState, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    if let Ok(addr) = listener.local_addr() {
        tracing::info!(%addr, "listening");
    }
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}
