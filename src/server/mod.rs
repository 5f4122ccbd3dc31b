// HTTP surface
// Widget turn API, uploads, vector and keyword admin, chat viewer and the WhatsApp webhook

pub mod auth;
pub mod errors;
pub mod handlers;

#[cfg(test)]
mod tests;

use anyhow::{Context, Result};
use axum::Router;
use axum::routing::{get, post, put};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::config::Config;
use crate::database::Database;
use crate::database::lancedb::VectorStore;
use crate::embeddings::OllamaClient;
use crate::ingest::Ingestor;
use crate::pipeline::{
    ChatPipeline, ChatStore, Completer, Embedder, PipelineSettings, VectorIndex,
};
use crate::whatsapp::TwilioClient;

pub use auth::{API_KEY_HEADER, AuthenticatedTenant};
pub use errors::ApiError;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(180);

/// Twilio client plus the tenant that answers WhatsApp traffic
#[derive(Debug, Clone)]
pub struct WhatsAppRoute {
    pub client: TwilioClient,
    pub tenant_id: String,
}

#[derive(Clone)]
pub struct AppState {
    pub database: Database,
    pub vectors: Arc<dyn VectorIndex>,
    pub embedder: Arc<dyn Embedder>,
    pub pipeline: ChatPipeline,
    pub free_upload_limit: i64,
    pub text_chunk_chars: usize,
    pub whatsapp: Option<WhatsAppRoute>,
}

impl AppState {
    #[inline]
    pub fn new(
        database: Database,
        vectors: Arc<dyn VectorIndex>,
        embedder: Arc<dyn Embedder>,
        completer: Arc<dyn Completer>,
        config: &Config,
    ) -> Result<Self> {
        let whatsapp = config
            .whatsapp
            .as_ref()
            .map(|wa| {
                TwilioClient::new(wa).map(|client| WhatsAppRoute {
                    client,
                    tenant_id: wa.tenant_id.clone(),
                })
            })
            .transpose()
            .context("Failed to set up the WhatsApp client")?;

        let pipeline = ChatPipeline::new(
            Arc::new(database.clone()) as Arc<dyn ChatStore>,
            Arc::clone(&vectors),
            Arc::clone(&embedder),
            completer,
            PipelineSettings::from_config(config),
        );

        Ok(Self {
            database,
            vectors,
            embedder,
            pipeline,
            free_upload_limit: config.limits.free_upload_limit,
            text_chunk_chars: config.retrieval.text_chunk_chars,
            whatsapp,
        })
    }

    #[inline]
    pub fn call_timeout(&self) -> Duration {
        self.pipeline.settings().call_timeout
    }

    #[inline]
    pub fn ingestor(&self) -> Ingestor<'_> {
        Ingestor::new(
            &self.database,
            self.vectors.as_ref(),
            self.embedder.as_ref(),
            self.free_upload_limit,
            self.text_chunk_chars,
            self.call_timeout(),
        )
    }
}

#[inline]
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/chat", post(handlers::chat))
        .route("/chat/reset-session", post(handlers::reset_session))
        .route("/reset-session", post(handlers::reset_session))
        .route("/user/plan", get(handlers::plan))
        .route("/chats", get(handlers::chats))
        .route("/upload", post(handlers::upload))
        .route("/uploads", get(handlers::uploads))
        .route("/vectors", get(handlers::search_vectors))
        .route(
            "/vectors/:id",
            put(handlers::update_vector).delete(handlers::delete_vector),
        )
        .route(
            "/admin/keywords",
            get(handlers::list_keywords).post(handlers::create_keyword),
        )
        .route(
            "/admin/keywords/:id",
            put(handlers::update_keyword).delete(handlers::delete_keyword),
        )
        .route("/admin/chats", get(handlers::chat_summaries))
        .route("/admin/chats/:visitor_id", get(handlers::visitor_chats))
        .route("/whatsapp", post(handlers::whatsapp))
        .layer(TimeoutLayer::new(REQUEST_TIMEOUT))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Open both stores, connect Ollama and serve until Ctrl-C
#[inline]
pub async fn serve(config: Config) -> Result<()> {
    let database = Database::new(config.database_path())
        .await
        .context("Failed to open the metadata database")?;
    let vectors = VectorStore::new(&config.vector_database_path())
        .await
        .context("Failed to open the vector store")?;

    let ollama = OllamaClient::new(&config.ollama)?;
    let probe = ollama.clone();
    tokio::task::spawn_blocking(move || probe.health_check())
        .await
        .context("Ollama health check panicked")?
        .context("Ollama is not ready")?;

    let ollama = Arc::new(ollama);
    let state = AppState::new(
        database,
        Arc::new(vectors),
        Arc::clone(&ollama) as Arc<dyn Embedder>,
        ollama as Arc<dyn Completer>,
        &config,
    )?;

    let address = config.server_address();
    let listener = TcpListener::bind(&address)
        .await
        .with_context(|| format!("Failed to bind {address}"))?;
    info!("Listening on http://{}", address);

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server failed")?;

    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_err() {
        // no signal handler available; run until the process is killed
        std::future::pending::<()>().await;
    }
    info!("Shutdown requested");
}
