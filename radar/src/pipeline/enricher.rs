use diesel_async::AsyncPgConnection;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use std::collections::HashMap;
use std::time::Duration;

use crate::llm::{LlmError, OpenRouterClient, ScoringInput};
use crate::models::analyzed::NewAnalyzedNews;
use crate::models::cluster::StoryCluster;
use crate::{App, store};

/// After this many unparseable replies a cluster stops being retried until
/// the process restarts. Inserting a stub instead would permanently block a
/// later good retry behind the unique constraint.
const MAX_PARSE_FAILURES: u32 = 3;

/// Produces exactly one analytical row per story cluster. The unique index
/// on `cluster_id` is the only coordination with other enricher instances.
pub struct Enricher {
    client: OpenRouterClient,
    throttle: DefaultDirectRateLimiter,
    parse_failures: HashMap<i32, u32>,
}

#[derive(Debug, Default)]
pub struct EnrichStats {
    pub processed: usize,
    pub skipped: usize,
    pub errors: usize,
}

enum Outcome {
    Inserted(i32),
    Skipped,
}

impl Enricher {
    pub fn new(api_key: &str, model: &str, delay_seconds: f64) -> Result<Self, eyre::Error> {
        let period = Duration::from_secs_f64(delay_seconds.max(0.05));
        let quota = Quota::with_period(period)
            .ok_or_else(|| eyre::eyre!("invalid LLM delay: {delay_seconds}"))?;

        Ok(Self {
            client: OpenRouterClient::new(api_key, model)?,
            throttle: RateLimiter::direct(quota),
            parse_failures: HashMap::new(),
        })
    }

    /// Works through the freshest unprocessed clusters. One bad cluster
    /// never stops the batch.
    pub async fn process_batch(&mut self, ctx: &App, limit: i64) -> Result<EnrichStats, eyre::Error> {
        let mut conn = ctx.diesel.get().await?;
        let clusters = store::clusters::unprocessed_clusters(&mut conn, limit).await?;

        let mut stats = EnrichStats::default();
        for cluster in clusters {
            if self
                .parse_failures
                .get(&cluster.id)
                .is_some_and(|n| *n >= MAX_PARSE_FAILURES)
            {
                stats.skipped += 1;
                continue;
            }

            match self.process_cluster(&mut conn, &cluster).await {
                Ok(Outcome::Inserted(id)) => {
                    tracing::info!(
                        cluster_id = cluster.id,
                        analyzed_id = id,
                        "Cluster analyzed"
                    );
                    stats.processed += 1;
                }
                Ok(Outcome::Skipped) => stats.skipped += 1,
                Err(err) => {
                    let transient = err
                        .downcast_ref::<LlmError>()
                        .is_some_and(LlmError::is_transient);
                    if transient {
                        tracing::warn!(
                            cluster_id = cluster.id,
                            ?err,
                            "Transient LLM failure, cluster will be retried"
                        );
                    } else {
                        tracing::error!(cluster_id = cluster.id, ?err, "Failed to enrich cluster");
                    }
                    stats.errors += 1;
                }
            }
        }

        Ok(stats)
    }

    async fn process_cluster(
        &mut self,
        conn: &mut AsyncPgConnection,
        cluster: &StoryCluster,
    ) -> Result<Outcome, eyre::Error> {
        // Re-check under the database; another worker may have won since the
        // batch was fetched.
        if store::analyzed::exists_for_cluster(conn, cluster.id).await? {
            return Ok(Outcome::Skipped);
        }

        let Some(article) = store::clusters::representative_article(conn, cluster.id).await? else {
            tracing::warn!(cluster_id = cluster.id, "Cluster has no members, skipping");
            return Ok(Outcome::Skipped);
        };
        let urls = store::clusters::member_urls(conn, cluster.id).await?;

        self.throttle.until_ready().await;

        let tickers = article.entity_list();
        let score = self
            .client
            .score_news(&ScoringInput {
                headline: &article.title,
                content: &article.content,
                tickers: &tickers,
                source: article.source.as_deref().unwrap_or("unknown"),
                published_at: article.published_at,
                url: urls.first().map(String::as_str),
                rule_hotness: cluster.hotness,
            })
            .await
            .inspect_err(|err| {
                if let LlmError::Parse(_) = err {
                    let failures = self.parse_failures.entry(cluster.id).or_insert(0);
                    *failures += 1;
                    if *failures >= MAX_PARSE_FAILURES {
                        tracing::error!(
                            cluster_id = cluster.id,
                            failures,
                            "Giving up on cluster after repeated parse failures"
                        );
                    }
                }
            })?;

        let row = NewAnalyzedNews {
            normalized_id: article.id,
            cluster_id: cluster.id,
            headline: article.title.clone(),
            content: article.content.clone(),
            headline_en: Some(score.headline_en.unwrap_or_else(|| article.title.clone())),
            content_en: Some(score.content_en.unwrap_or_else(|| article.content.clone())),
            urls: serde_json::json!(urls),
            published_time: article.published_at,
            ai_hotness: score.hotness,
            tickers: serde_json::json!(score.tickers),
            reasoning: Some(score.reasoning).filter(|r| !r.trim().is_empty()),
        };

        match store::analyzed::insert_analyzed(conn, &row).await? {
            Some(id) => Ok(Outcome::Inserted(id)),
            // Lost the uniqueness race; the other worker's row stands.
            None => Ok(Outcome::Skipped),
        }
    }
}
