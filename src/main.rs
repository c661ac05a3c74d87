//! Procurement Ingest - normalizes supplier quote workbooks into one canonical table.

mod config;
mod fx;
mod geo;
mod inference;
mod joiner;
mod locator;
mod mapper;
mod normalizer;
mod openrouter;
mod oracle;
mod pipeline;
mod prompts;
mod schema;
mod sheet_parser;
mod sideband;

use axum::{
    extract::{DefaultBodyLimit, Multipart, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use config::PipelineConfig;
use fx::FrankfurterClient;
use geo::GeoReference;
use openrouter::OpenRouterClient;
use oracle::{FxRateOracle, SemanticOracle};
use pipeline::{Layout, Pipeline};
use schema::records_to_csv;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Application state shared across handlers.
#[derive(Clone)]
struct AppState {
    config: Arc<PipelineConfig>,
    geo: Arc<GeoReference>,
    oracle: Arc<dyn SemanticOracle>,
    fx: Arc<dyn FxRateOracle>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| "procurement_ingest=debug,tower_http=debug".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = PipelineConfig::from_env()?;
    let geo = GeoReference::load(&config.gazetteer_path)?;

    let openrouter = OpenRouterClient::from_env(&config.oracle)?;
    info!("OpenRouter client initialized (model: {})", openrouter.model());
    let frankfurter = FrankfurterClient::new(&config.fx)?;

    let listen_addr = config.listen_addr.clone();
    let state = AppState {
        config: Arc::new(config),
        geo: Arc::new(geo),
        oracle: Arc::new(openrouter),
        fx: Arc::new(frankfurter),
    };

    let app = Router::new()
        .route("/health", get(health))
        .route("/layouts", get(list_layouts))
        .route("/ingest", post(ingest_workbook))
        .layer(DefaultBodyLimit::max(50 * 1024 * 1024)) // 50MB
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(&listen_addr).await?;
    info!("Server listening on http://{}", listen_addr);
    axum::serve(listener, app).await?;

    Ok(())
}

// ============================================================================
// Handlers
// ============================================================================

async fn health() -> &'static str {
    "ok"
}

async fn list_layouts() -> Json<Vec<Layout>> {
    Json(Layout::all().to_vec())
}

#[derive(serde::Deserialize)]
struct IngestQuery {
    layout: String,
    #[serde(default)]
    format: OutputFormat,
}

#[derive(Debug, Clone, Copy, Default, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
enum OutputFormat {
    #[default]
    Json,
    Csv,
}

/// Upload a workbook and run one layout pipeline over it.
async fn ingest_workbook(
    State(state): State<AppState>,
    Query(query): Query<IngestQuery>,
    mut multipart: Multipart,
) -> Result<Response, (StatusCode, String)> {
    let layout: Layout = query
        .layout
        .parse()
        .map_err(|e: pipeline::UnknownLayout| (StatusCode::BAD_REQUEST, e.to_string()))?;

    let mut filename = String::new();
    let mut file_data = Vec::new();

    while let Some(field) = multipart.next_field().await.map_err(|e| {
        (StatusCode::BAD_REQUEST, format!("Multipart error: {}", e))
    })? {
        if field.name() == Some("file") {
            filename = field.file_name().unwrap_or("workbook.xlsx").to_string();
            file_data = field.bytes().await.map_err(|e| {
                (StatusCode::BAD_REQUEST, format!("Failed to read file: {}", e))
            })?.to_vec();
            break;
        }
    }

    if file_data.is_empty() {
        return Err((StatusCode::BAD_REQUEST, "No file uploaded".to_string()));
    }

    info!("Received file: {} ({} bytes) as layout {}", filename, file_data.len(), layout);

    let workbook = sheet_parser::parse_workbook(&filename, &file_data).map_err(|e| {
        error!("Workbook parsing failed: {:#}", e);
        (StatusCode::UNPROCESSABLE_ENTITY, format!("Could not read workbook: {:#}", e))
    })?;

    let pipeline = Pipeline::new(
        state.geo.as_ref(),
        state.oracle.as_ref(),
        state.fx.as_ref(),
        state.config.as_ref(),
    );
    let report = pipeline.run(layout, &workbook).await;

    match query.format {
        OutputFormat::Json => Ok(Json(report).into_response()),
        OutputFormat::Csv => {
            let csv = records_to_csv(&report.records).map_err(|e| {
                error!("CSV rendering failed: {:#}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, format!("CSV rendering failed: {:#}", e))
            })?;
            Ok(([(header::CONTENT_TYPE, "text/csv; charset=utf-8")], csv).into_response())
        }
    }
}
