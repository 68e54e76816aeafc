use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use diesel_async::AsyncPgConnection;
use diesel_async::pooled_connection::AsyncDieselConnectionManager;
use diesel_async::pooled_connection::deadpool::Pool;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::ServerConfig;
use crate::llm::analyzer::NewsAnalyzer;

mod api;
mod config;
mod error;
mod export;
mod llm;
mod models;
mod pipeline;
mod schema;
mod store;
mod telegram;

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

pub type DbPool = Pool<AsyncPgConnection>;

/// Everything the actors share: the pool, and the config. The vector index
/// deliberately lives inside the pipeline actor, not here.
#[derive(Clone)]
pub struct App {
    pub diesel: DbPool,
    pub config: Arc<ServerConfig>,
}

#[tokio::main]
async fn main() {
    dotenv::dotenv().ok();

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Arc::new(ServerConfig::new_from_env());

    let manager = AsyncDieselConnectionManager::<AsyncPgConnection>::new(&config.database_url);
    let pool = Pool::builder(manager)
        .max_size(10)
        .build()
        .expect("failed to build database pool");

    let ctx = App {
        diesel: pool,
        config,
    };

    let mut actors = vec![tokio::spawn(pipeline::run(ctx.clone()))];

    match (
        ctx.config.telegram_bot_token.clone(),
        ctx.config.openrouter_api_key.clone(),
    ) {
        (Some(token), Some(api_key)) => {
            match NewsAnalyzer::new(api_key, &ctx.config.llm_analysis_model) {
                Ok(analyzer) => {
                    let analyzer = Arc::new(analyzer);
                    let bot = teloxide::Bot::new(token);
                    actors.push(tokio::spawn(telegram::monitor::run(
                        ctx.clone(),
                        bot.clone(),
                        analyzer.clone(),
                    )));
                    actors.push(tokio::spawn(telegram::run_bot(ctx.clone(), bot, analyzer)));
                }
                Err(err) => tracing::error!(?err, "Failed to build news analyzer, bot disabled"),
            }
        }
        (Some(_), None) => {
            tracing::warn!("TELEGRAM_BOT_TOKEN is set but OPENROUTER_API_KEY is not, bot disabled")
        }
        (None, _) => tracing::info!("No bot token configured, running pipeline and API only"),
    }

    let app = Router::new()
        .nest("/api", api::route())
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(ctx.clone());

    let addr = SocketAddr::from(([0, 0, 0, 0], ctx.config.api_port));
    tracing::info!(%addr, "API server listening");
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("failed to bind API port");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("API server failed");

    // Actors finish their current cycle before the process exits.
    for actor in actors {
        let _ = actor.await;
    }
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("Shutdown signal received");
}
