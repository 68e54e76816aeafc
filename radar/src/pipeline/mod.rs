//! The pipeline actor: a single loop driving normalization, clustering and
//! LLM enrichment against the shared store. The vector index lives here and
//! nowhere else.

use std::time::Instant;

use crate::{App, store};

pub mod dedup;
pub mod embedder;
pub mod enricher;
pub mod hotness;
pub mod index;
pub mod normalizer;

use dedup::Deduplicator;
use enricher::Enricher;
use normalizer::Normalizer;

pub async fn run(ctx: App) {
    let normalizer = Normalizer::new();
    let mut dedup = Deduplicator::new();
    let mut warmed = false;

    let mut enricher = match &ctx.config.openrouter_api_key {
        Some(key) => match Enricher::new(key, &ctx.config.llm_model, ctx.config.llm_delay) {
            Ok(enricher) => Some(enricher),
            Err(err) => {
                tracing::error!(?err, "Failed to build LLM enricher, stage disabled");
                None
            }
        },
        None => {
            tracing::warn!("OPENROUTER_API_KEY not set, LLM enrichment disabled");
            None
        }
    };

    tracing::info!(
        check_interval_s = ctx.config.check_interval.as_secs(),
        batch_size = ctx.config.batch_size,
        llm_limit = ctx.config.llm_limit,
        llm_model = %ctx.config.llm_model,
        "Pipeline worker started"
    );
    log_resume_position(&ctx).await;

    // Created once so a signal arriving mid-cycle still lands; the current
    // cycle finishes before the loop exits.
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    let mut ticker = tokio::time::interval(ctx.config.check_interval);
    loop {
        tokio::select! {
            _ = &mut shutdown => {
                tracing::info!("Pipeline worker shutting down");
                break;
            }
            _ = ticker.tick() => {
                run_cycle(&ctx, &normalizer, &mut dedup, &mut warmed, enricher.as_mut()).await;
            }
        }
    }
}

async fn log_resume_position(ctx: &App) {
    let status = async {
        let mut conn = ctx.diesel.get().await?;
        let state = store::state::get(&mut conn).await?;
        let max_original = store::articles::max_normalized_original_id(&mut conn).await?;
        Ok::<_, eyre::Error>((state, max_original))
    }
    .await;

    match status {
        Ok((state, max_original)) => tracing::info!(
            last_normalized_id = state.last_normalized_id,
            last_vectorized_id = state.last_vectorized_id,
            max_normalized_original_id = max_original,
            "Pipeline resume position"
        ),
        Err(err) => tracing::warn!(?err, "Could not read pipeline state"),
    }
}

/// One cycle: normalize, then cluster, then enrich, skipping downstream
/// stages when upstream produced nothing new.
async fn run_cycle(
    ctx: &App,
    normalizer: &Normalizer,
    dedup: &mut Deduplicator,
    warmed: &mut bool,
    enricher: Option<&mut Enricher>,
) {
    let started = Instant::now();

    if !*warmed {
        match dedup.warm(ctx).await {
            Ok(count) => {
                tracing::info!(vectors = count, "Vector index warmed from store");
                *warmed = true;
            }
            Err(err) => {
                tracing::error!(?err, "Failed to warm vector index, skipping cycle");
                return;
            }
        }
    }

    let normalized = match normalizer::run_batch(ctx, normalizer).await {
        Ok(stats) => {
            if stats.total > 0 {
                tracing::info!(
                    total = stats.total,
                    processed = stats.processed,
                    filtered = stats.filtered,
                    errors = stats.errors,
                    "Normalization done"
                );
            }
            stats.processed
        }
        Err(err) => {
            tracing::error!(?err, "Normalization failed");
            0
        }
    };

    if normalized == 0 {
        tracing::debug!("No new articles, skipping dedup and enrichment");
        return;
    }

    let clustered = match dedup.process_new(ctx).await {
        Ok(count) => count,
        Err(err) => {
            tracing::error!(?err, "Deduplication failed");
            0
        }
    };

    if clustered == 0 {
        tracing::debug!("No documents clustered, skipping enrichment");
        return;
    }

    let mut enriched = 0usize;
    if let Some(enricher) = enricher {
        match enricher.process_batch(ctx, ctx.config.llm_limit).await {
            Ok(stats) => {
                enriched = stats.processed;
                if stats.processed + stats.skipped + stats.errors > 0 {
                    tracing::info!(
                        processed = stats.processed,
                        skipped = stats.skipped,
                        errors = stats.errors,
                        "Enrichment done"
                    );
                }
            }
            Err(err) => tracing::error!(?err, "Enrichment failed"),
        }
    }

    tracing::info!(
        normalized,
        clustered,
        enriched,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "Pipeline cycle complete"
    );
}
