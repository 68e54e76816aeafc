use chrono::{NaiveDateTime, Utc};
use diesel_async::{AsyncConnection, AsyncPgConnection};
use pgvector::Vector;

use crate::models::article::{NewEmbedding, NormalizedArticle};
use crate::models::cluster::NewClusterMember;
use crate::pipeline::index::VectorIndex;
use crate::pipeline::{embedder, hotness};
use crate::{App, store};

/// Above this similarity a neighbor is the same document.
pub const TAU_DUP: f32 = 0.95;
/// Between this and TAU_DUP a neighbor may be the same story, subject to the
/// language and time-window guards.
pub const TAU_STORY: f32 = 0.89;
pub const WINDOW_HOURS: i64 = 48;
pub const K_NEIGHBORS: usize = 30;

const MAX_HEADLINE_CHARS: usize = 180;

/// Incremental story clustering over the embedding index. Owned by the
/// pipeline actor; the index is a private cache rebuilt from the store.
pub struct Deduplicator {
    index: VectorIndex,
}

#[derive(Debug, Clone)]
struct NeighborCandidate {
    normalized_id: i32,
    similarity: f32,
    cluster_id: Option<i32>,
    language_code: String,
    published_at: Option<NaiveDateTime>,
}

#[derive(Debug, PartialEq)]
enum Assignment {
    Duplicate { cluster_id: i32, similarity: f32 },
    SameStory { cluster_id: i32, similarity: f32 },
    NewCluster,
}

impl Assignment {
    fn reason(&self) -> String {
        match self {
            Assignment::Duplicate { similarity, .. } => format!("dup@{similarity:.2}"),
            Assignment::SameStory { similarity, .. } => format!("story@{similarity:.2}"),
            Assignment::NewCluster => "new".to_string(),
        }
    }
}

/// Pure classification over the neighbor list (already sorted most similar
/// first): explicit duplicates first, then the story band gated on language
/// and the 48 h window, otherwise a fresh cluster.
fn classify(candidates: &[NeighborCandidate], lang: &str, t_doc: NaiveDateTime) -> Assignment {
    for candidate in candidates {
        if candidate.similarity >= TAU_DUP
            && let Some(cluster_id) = candidate.cluster_id
        {
            return Assignment::Duplicate {
                cluster_id,
                similarity: candidate.similarity,
            };
        }
    }

    let window_seconds = WINDOW_HOURS * 3600;
    for candidate in candidates {
        if candidate.similarity < TAU_STORY || candidate.similarity >= TAU_DUP {
            continue;
        }
        if candidate.language_code != lang {
            continue;
        }
        let Some(t_neighbor) = candidate.published_at else {
            continue;
        };
        if (t_doc - t_neighbor).num_seconds().abs() > window_seconds {
            continue;
        }
        if let Some(cluster_id) = candidate.cluster_id {
            return Assignment::SameStory {
                cluster_id,
                similarity: candidate.similarity,
            };
        }
    }

    Assignment::NewCluster
}

impl Deduplicator {
    pub fn new() -> Self {
        Self {
            index: VectorIndex::new(embedder::EMBEDDING_DIM),
        }
    }

    /// Rebuilds the index from persisted vectors in ascending id order. A
    /// model switch invalidates every stored row: the table is wiped and the
    /// clustering marks reset so everything re-embeds.
    pub async fn warm(&mut self, ctx: &App) -> Result<usize, eyre::Error> {
        let mut conn = ctx.diesel.get().await?;

        let models = store::articles::embedding_models(&mut conn).await?;
        if models.iter().any(|m| m != embedder::MODEL_NAME) {
            tracing::warn!(
                stored = ?models,
                current = embedder::MODEL_NAME,
                "Embedding model changed, dropping stored vectors for a full rebuild"
            );
            conn.transaction::<_, diesel::result::Error, _>(|conn| {
                Box::pin(async move {
                    store::articles::delete_all_embeddings(conn).await?;
                    store::state::reset_vector_clock(conn).await?;
                    Ok(())
                })
            })
            .await?;
            self.index = VectorIndex::new(embedder::EMBEDDING_DIM);
            return Ok(0);
        }

        let rows = store::articles::load_all_embeddings(&mut conn).await?;
        self.index = VectorIndex::new(embedder::EMBEDDING_DIM);
        self.index
            .add_batch(rows.iter().map(|(id, vector)| (*id, vector.as_slice())));
        Ok(self.index.size())
    }

    /// Embeds and clusters every normalized article past the vector clock,
    /// in id order so the same input history always yields the same
    /// clustering. A failed document stops the batch without advancing the
    /// mark; it is retried on the next cycle.
    pub async fn process_new(&mut self, ctx: &App) -> Result<usize, eyre::Error> {
        let mut conn = ctx.diesel.get().await?;
        let state = store::state::get(&mut conn).await?;
        let docs = store::articles::next_unvectorized(
            &mut conn,
            state.last_vectorized_id,
            ctx.config.batch_size,
        )
        .await?;

        let mut processed = 0usize;
        for doc in docs {
            match self.process_document(&mut conn, &doc).await {
                Ok(reason) => {
                    tracing::debug!(normalized_id = doc.id, reason = %reason, "Clustered document");
                    processed += 1;
                }
                Err(err) => {
                    tracing::error!(
                        normalized_id = doc.id,
                        ?err,
                        "Failed to cluster document, will retry next cycle"
                    );
                    break;
                }
            }
        }

        Ok(processed)
    }

    async fn process_document(
        &mut self,
        conn: &mut AsyncPgConnection,
        doc: &NormalizedArticle,
    ) -> Result<String, eyre::Error> {
        let t_doc = doc
            .published_at
            .unwrap_or_else(|| Utc::now().naive_utc());
        let url = doc.link.clone().unwrap_or_default();
        let site_source = doc
            .source
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or(&url);
        let site = hotness::registrable_domain(site_source);

        let vector = embedder::embed(&doc.title, &doc.content).await?;

        // The new vector is not in the index yet, so the neighbor list is
        // exactly "everything but self".
        let neighbors = self.index.search(&vector, K_NEIGHBORS);
        let candidates = load_candidates(conn, &neighbors, doc.id).await?;
        let assignment = classify(&candidates, &doc.language_code, t_doc);
        let reason = assignment.reason();

        let tx_doc = doc.clone();
        let stored_vector = Vector::from(vector.clone());
        let tx_site = site.clone();
        conn.transaction::<_, eyre::Error, _>(|conn| {
            Box::pin(async move {
                store::articles::save_embedding(
                    conn,
                    &NewEmbedding {
                        normalized_id: tx_doc.id,
                        embedding: stored_vector,
                        model: embedder::MODEL_NAME.to_string(),
                        dim: embedder::EMBEDDING_DIM as i32,
                    },
                )
                .await?;

                let cluster_id = match assignment {
                    Assignment::Duplicate { cluster_id, .. }
                    | Assignment::SameStory { cluster_id, .. } => cluster_id,
                    Assignment::NewCluster => {
                        let headline: String =
                            tx_doc.title.chars().take(MAX_HEADLINE_CHARS).collect();
                        store::clusters::create_cluster(
                            conn,
                            &headline,
                            &tx_doc.language_code,
                            t_doc,
                        )
                        .await?
                    }
                };

                store::clusters::add_member(
                    conn,
                    &NewClusterMember {
                        cluster_id,
                        normalized_id: tx_doc.id,
                        url: tx_doc.link.clone(),
                        site: tx_site.clone(),
                        time_utc: t_doc,
                    },
                )
                .await?;

                update_cluster(conn, cluster_id, &tx_doc, &tx_site, t_doc).await?;

                store::state::set_last_vectorized_id(conn, tx_doc.id).await?;
                Ok(())
            })
        })
        .await?;

        // Only after the commit, so a rollback never leaves a stray entry.
        self.index.add(doc.id, &vector);
        Ok(reason)
    }
}

impl Default for Deduplicator {
    fn default() -> Self {
        Self::new()
    }
}

/// Aggregates, summary links and hotness for the cluster that just gained a
/// member. Runs inside the per-document transaction.
async fn update_cluster(
    conn: &mut AsyncPgConnection,
    cluster_id: i32,
    doc: &NormalizedArticle,
    site: &str,
    t_doc: NaiveDateTime,
) -> Result<(), eyre::Error> {
    let cluster = store::clusters::get_cluster(conn, cluster_id)
        .await?
        .ok_or_else(|| eyre::eyre!("cluster {cluster_id} vanished mid-update"))?;

    let mut domains = cluster.domain_counts();
    *domains.entry(site.to_string()).or_insert(0) += 1;

    let mut urls = cluster.url_list();
    if let Some(url) = &doc.link
        && !url.is_empty()
        && !urls.contains(url)
    {
        urls.push(url.clone());
    }

    let first_time = cluster.first_time.min(t_doc);
    let last_time = cluster.last_time.max(t_doc);

    store::clusters::update_aggregates(conn, cluster_id, &domains, &urls, first_time, last_time)
        .await?;

    // Summary links over the members as they exist inside this transaction.
    let members = store::clusters::members_of(conn, cluster_id).await?;
    if let (Some(earliest), Some(latest)) = (members.first(), members.last()) {
        let strongest = members
            .iter()
            .max_by(|a, b| {
                hotness::source_weight(&a.site)
                    .partial_cmp(&hotness::source_weight(&b.site))
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then(a.time_utc.cmp(&b.time_utc))
            })
            .unwrap_or(earliest);
        store::clusters::update_summary(
            conn,
            cluster_id,
            earliest.url.as_deref(),
            latest.url.as_deref(),
            &strongest.site,
        )
        .await?;
    }

    let (factors, score) = hotness::compute(first_time, &domains, Utc::now().naive_utc());
    store::clusters::update_score(conn, cluster_id, serde_json::to_value(&factors)?, score)
        .await?;

    Ok(())
}

/// Fetches the cluster membership and language/time metadata the classifier
/// needs, preserving the similarity ordering of the index results. Only
/// neighbors inside the story band matter; the rest can never match.
async fn load_candidates(
    conn: &mut AsyncPgConnection,
    neighbors: &[(i32, f32)],
    self_id: i32,
) -> Result<Vec<NeighborCandidate>, eyre::Error> {
    let in_band: Vec<(i32, f32)> = neighbors
        .iter()
        .filter(|(id, similarity)| *id != self_id && *similarity >= TAU_STORY)
        .copied()
        .collect();
    if in_band.is_empty() {
        return Ok(Vec::new());
    }

    let ids: Vec<i32> = in_band.iter().map(|(id, _)| *id).collect();
    let articles = store::articles::get_normalized_many(conn, &ids).await?;
    let by_id: std::collections::HashMap<i32, &NormalizedArticle> =
        articles.iter().map(|a| (a.id, a)).collect();

    let mut candidates = Vec::with_capacity(in_band.len());
    // FIXME: N+1 query
    for (id, similarity) in in_band {
        let Some(article) = by_id.get(&id) else {
            continue;
        };
        let cluster_id = store::clusters::cluster_of(conn, id).await?;
        candidates.push(NeighborCandidate {
            normalized_id: id,
            similarity,
            cluster_id,
            language_code: article.language_code.clone(),
            published_at: article.published_at,
        });
    }
    Ok(candidates)
}

#[cfg(test)]
mod test {
    use super::*;
    use chrono::{Duration, NaiveDate};

    fn t0() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 6, 1)
            .unwrap()
            .and_hms_opt(9, 0, 0)
            .unwrap()
    }

    fn candidate(
        id: i32,
        similarity: f32,
        cluster_id: Option<i32>,
        lang: &str,
        published_at: NaiveDateTime,
    ) -> NeighborCandidate {
        NeighborCandidate {
            normalized_id: id,
            similarity,
            cluster_id,
            language_code: lang.to_string(),
            published_at: Some(published_at),
        }
    }

    #[test]
    fn high_similarity_joins_as_duplicate() {
        let neighbors = vec![candidate(1, 0.97, Some(5), "eng", t0())];
        let assignment = classify(&neighbors, "eng", t0() + Duration::hours(1));
        assert_eq!(
            assignment,
            Assignment::Duplicate {
                cluster_id: 5,
                similarity: 0.97
            }
        );
        assert_eq!(assignment.reason(), "dup@0.97");
    }

    #[test]
    fn duplicate_without_cluster_falls_through() {
        let neighbors = vec![
            candidate(1, 0.98, None, "eng", t0()),
            candidate(2, 0.96, Some(7), "eng", t0()),
        ];
        assert_eq!(
            classify(&neighbors, "eng", t0()),
            Assignment::Duplicate {
                cluster_id: 7,
                similarity: 0.96
            }
        );
    }

    #[test]
    fn story_band_joins_same_language_within_window() {
        let neighbors = vec![candidate(1, 0.92, Some(3), "eng", t0())];
        let assignment = classify(&neighbors, "eng", t0() + Duration::minutes(10));
        assert_eq!(
            assignment,
            Assignment::SameStory {
                cluster_id: 3,
                similarity: 0.92
            }
        );
    }

    #[test]
    fn cross_language_story_is_kept_apart() {
        let neighbors = vec![candidate(1, 0.92, Some(3), "rus", t0())];
        assert_eq!(
            classify(&neighbors, "eng", t0() + Duration::minutes(10)),
            Assignment::NewCluster
        );
    }

    #[test]
    fn outside_window_is_kept_apart() {
        let neighbors = vec![candidate(1, 0.90, Some(3), "eng", t0())];
        assert_eq!(
            classify(&neighbors, "eng", t0() + Duration::hours(72)),
            Assignment::NewCluster
        );
    }

    #[test]
    fn window_boundary_is_inclusive() {
        let neighbors = vec![candidate(1, 0.90, Some(3), "eng", t0())];
        assert_eq!(
            classify(&neighbors, "eng", t0() + Duration::hours(48)),
            Assignment::SameStory {
                cluster_id: 3,
                similarity: 0.90
            }
        );
    }

    #[test]
    fn below_story_threshold_starts_new_cluster() {
        let neighbors = vec![candidate(1, 0.88, Some(3), "eng", t0())];
        assert_eq!(classify(&neighbors, "eng", t0()), Assignment::NewCluster);
    }

    #[test]
    fn best_story_candidate_wins() {
        let neighbors = vec![
            candidate(1, 0.94, Some(10), "eng", t0()),
            candidate(2, 0.91, Some(20), "eng", t0()),
        ];
        assert_eq!(
            classify(&neighbors, "eng", t0()),
            Assignment::SameStory {
                cluster_id: 10,
                similarity: 0.94
            }
        );
    }
}
