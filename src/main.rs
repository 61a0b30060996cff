mod config;
mod db;
mod error;
mod ocr;
mod processor;
mod routes;
mod schemas;

use std::{sync::Arc, time::Instant};

use actix_cors::Cors;
use actix_web::{web, App, HttpServer};
use anyhow::Context;
use tracing::info;
use tracing_actix_web::TracingLogger;

use config::Config;
use processor::create_dispatcher;
use routes::AppState;

fn build_cors(config: &Config) -> Cors {
    if config.allows_any_origin() {
        return Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);
    }

    config
        .cors_allow_origins
        .iter()
        .fold(Cors::default(), |cors, origin| cors.allowed_origin(origin))
        .allow_any_method()
        .allow_any_header()
        .supports_credentials()
        .max_age(3600)
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,actix_web=info,sqlx=warn".into()),
        )
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .pretty()
        .init();

    let start_time = Instant::now();
    let config = Arc::new(Config::from_env()?);

    info!(database_url = %config.database_url, "🔧 Opening database...");
    let pool = db::create_pool(&config.database_url, config.db_max_connections)
        .await
        .with_context(|| format!("failed to open database {}", config.database_url))?;
    info!("✅ Database ready");

    let dispatcher = Arc::new(create_dispatcher(&config));
    let state = web::Data::new(AppState {
        pool,
        dispatcher,
        config: Arc::clone(&config),
    });

    info!(
        version = env!("CARGO_PKG_VERSION"),
        "🚀 OCR Extraction API Started"
    );
    info!("🌐 Web API listening on http://{}", config.bind_addr);
    info!("📋 Available endpoints:");
    info!("  GET  /         - Upload page");
    info!("  GET  /health   - Health check");
    info!("  POST /upload   - Upload a PDF or TIFF for OCR (?engine=tesseract|paddleocr)");
    info!("  GET  /files    - List uploaded files");
    info!("  GET  /results  - Paginated OCR rows (?file_name=&page_number=&limit=&offset=)");
    info!("  GET  /static/* - Frontend assets from {}", config.static_dir.display());
    info!("---");

    let server_config = Arc::clone(&config);
    HttpServer::new(move || {
        App::new()
            .app_data(state.clone())
            .app_data(web::Data::new(start_time))
            .wrap(build_cors(&server_config))
            .wrap(TracingLogger::default())
            .configure(routes::configure)
            .service(actix_files::Files::new("/static", server_config.static_dir.clone()))
    })
    .bind(config.bind_addr.as_str())
    .with_context(|| format!("failed to bind {}", config.bind_addr))?
    .run()
    .await?;

    Ok(())
}
