use axum::{
    Json, Router,
    extract::{
        DefaultBodyLimit, Multipart, State, multipart::MultipartError, rejection::JsonRejection,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;

use crate::analyst::{Analyst, GeminiAnalyst, LocalAnalyst, answer_with_timeout};
use crate::cache::{
    CacheState, DatasetCache, EntryStore, MemoryStore, RefreshStrategy, spawn_refresher,
};
use crate::config::{CacheMode, Config};
use crate::fetcher::SourceFetcher;
use crate::google::GoogleSheetsClient;
use crate::loader;
use crate::saving::FileStore;
use crate::source::SheetSource;

pub const EMPTY_QUESTION_REPLY: &str = "Please send a question in the \"message\" field.";
pub const NO_DATA_REPLY: &str =
    "No data is loaded yet. The spreadsheets may still be loading or unavailable; try again shortly.";

const MODEL_TRANSPORT_FACTOR: u32 = 3;

pub struct AppState {
    pub cache: Arc<DatasetCache>,
    pub analyst: Arc<dyn Analyst>,
    pub model_timeout: Duration,
    pub upload_max_bytes: usize,
}

#[derive(Deserialize)]
struct ChatRequest {
    #[serde(default, alias = "question")]
    message: String,
}

#[derive(Serialize)]
struct ChatReply {
    reply: String,
}

#[derive(Serialize)]
struct UploadReply {
    reply: String,
    rows: usize,
}

#[derive(Serialize)]
struct ErrorReply {
    error: String,
}

#[derive(Serialize)]
struct Health {
    status: &'static str,
    data_status: &'static str,
    total_rows: usize,
    stale: bool,
    updated_at: Option<DateTime<Utc>>,
    last_refresh: Option<DateTime<Utc>>,
    mode: &'static str,
}

pub fn router(state: Arc<AppState>) -> Router {
    let upload_limit = DefaultBodyLimit::max(state.upload_max_bytes);
    Router::new()
        .route("/", get(health))
        .route("/api/chat", post(chat))
        .route("/api/upload", post(upload).layer(upload_limit))
        .route("/api/reset", post(reset))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

pub async fn run(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    // Sheets source and fetcher
    let source: Arc<dyn SheetSource> =
        Arc::new(GoogleSheetsClient::new(config.sheets_auth.clone()));
    let fetcher = SourceFetcher::new(source, config.sources.clone(), config.fetch.clone());

    // Cache store follows the cache mode
    let (store, strategy): (Box<dyn EntryStore>, RefreshStrategy) = match config.cache_mode {
        CacheMode::Memory => (Box::new(MemoryStore::new()), RefreshStrategy::Push),
        CacheMode::File => (
            Box::new(FileStore::open(&config.cache_file)?),
            RefreshStrategy::Pull,
        ),
    };
    let cache = Arc::new(DatasetCache::new(fetcher, store, config.ttl, strategy));

    let refresher = match strategy {
        RefreshStrategy::Push => Some(spawn_refresher(cache.clone(), config.refresh_interval)),
        RefreshStrategy::Pull => {
            // warm the cache without holding up the listener
            let cache = cache.clone();
            tokio::spawn(async move {
                cache.refresh_if_stale().await;
            });
            None
        }
    };

    let analyst: Arc<dyn Analyst> = match &config.gemini_api_key {
        Some(key) => {
            // abandoned calls still release their connection eventually
            let transport_timeout = config.model_timeout.saturating_mul(MODEL_TRANSPORT_FACTOR);
            Arc::new(
                GeminiAnalyst::new(key.clone(), config.gemini_model.clone(), config.sample_rows)
                    .with_request_timeout(transport_timeout),
            )
        }
        None => {
            log::warn!(
                "no GOOGLE_GENAI_API_KEY or GEMINI_API_KEY configured, answering with the local analyst"
            );
            Arc::new(LocalAnalyst)
        }
    };

    let app_state = Arc::new(AppState {
        cache,
        analyst,
        model_timeout: config.model_timeout,
        upload_max_bytes: config.upload_max_bytes,
    });

    // Start server
    let addr = format!("{}:{}", config.bind_addr, config.port);
    let listener = TcpListener::bind(&addr).await?;
    log::info!(
        "listening on http://{} ({} sheet(s), {} cache)",
        addr,
        config.sources.len(),
        strategy.as_str()
    );
    axum::serve(listener, router(app_state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if let Some(handle) = refresher {
        handle.abort();
    }
    log::info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        log::error!("cannot listen for ctrl-c: {}", e);
        std::future::pending::<()>().await;
    }
    log::info!("shutdown requested");
}

async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let entry = state.cache.snapshot();
    let total_rows = entry.as_ref().map_or(0, |e| e.dataset.len());

    Json(Health {
        status: "ok",
        data_status: if total_rows > 0 { "loaded" } else { "empty" },
        total_rows,
        stale: state.cache.state() == CacheState::Stale,
        updated_at: entry.map(|e| e.created_at),
        last_refresh: state.cache.last_refresh().map(|r| r.finished_at),
        mode: state.cache.strategy().as_str(),
    })
}

async fn chat(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> Response {
    let question = match payload {
        Ok(Json(request)) => request.message.trim().to_string(),
        Err(rejection) => {
            log::debug!("rejected chat body: {}", rejection);
            String::new()
        }
    };

    if question.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(ChatReply {
                reply: EMPTY_QUESTION_REPLY.to_string(),
            }),
        )
            .into_response();
    }

    let dataset = state.cache.get().await;
    if dataset.is_empty() {
        return Json(ChatReply {
            reply: NO_DATA_REPLY.to_string(),
        })
        .into_response();
    }

    let reply = answer_with_timeout(
        state.analyst.clone(),
        question,
        dataset,
        state.model_timeout,
    )
    .await;
    Json(ChatReply { reply }).into_response()
}

async fn upload(State(state): State<Arc<AppState>>, mut multipart: Multipart) -> Response {
    // Process the multipart form data
    let mut file: Option<(String, Vec<u8>)> = None;

    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(e) => return multipart_error(e),
        };
        if field.name() != Some("file") {
            continue;
        }
        let filename = field.file_name().unwrap_or_default().to_string();
        match field.bytes().await {
            Ok(data) => file = Some((filename, data.to_vec())),
            Err(e) => return multipart_error(e),
        }
    }

    let Some((filename, data)) = file.filter(|(_, data)| !data.is_empty()) else {
        return upload_error(StatusCode::BAD_REQUEST, "No file data received".to_string());
    };

    let dataset = match loader::load_upload(&filename, &data) {
        Ok(dataset) if !dataset.is_empty() => dataset,
        Ok(_) => {
            return upload_error(
                StatusCode::BAD_REQUEST,
                format!("{} contains no data rows", filename),
            );
        }
        Err(e) => {
            return upload_error(
                StatusCode::BAD_REQUEST,
                format!("Failed to read {}: {}", filename, e),
            );
        }
    };

    match state.cache.install(dataset).await {
        Ok(entry) => {
            let rows = entry.dataset.len();
            Json(UploadReply {
                reply: format!("Loaded {} rows from {}.", rows, filename),
                rows,
            })
            .into_response()
        }
        Err(e) => {
            log::error!("failed to install uploaded dataset: {}", e);
            upload_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Could not store the uploaded data".to_string(),
            )
        }
    }
}

// 413 when the body limit was hit, 400 for a malformed form
fn multipart_error(err: MultipartError) -> Response {
    let status = err.status();
    let detail = err.body_text();
    log::warn!("rejected upload ({}): {}", status, detail);
    upload_error(status, format!("Invalid upload: {}", detail))
}

fn upload_error(status: StatusCode, error: String) -> Response {
    (status, Json(ErrorReply { error })).into_response()
}

async fn reset(State(state): State<Arc<AppState>>) -> Response {
    match state.cache.invalidate().await {
        Ok(()) => Json(ChatReply {
            reply: "Cache cleared. Data will be reloaded from the spreadsheets.".to_string(),
        })
        .into_response(),
        Err(e) => {
            log::error!("failed to clear cache: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorReply {
                    error: "Could not clear the cache".to_string(),
                }),
            )
                .into_response()
        }
    }
}
