use chrono::NaiveDateTime;
use diesel::prelude::*;
use diesel::sql_types::{BigInt, Text};
use diesel_async::{AsyncPgConnection, RunQueryDsl};
use serde::Serialize;

use crate::models::analyzed::{AnalyzedNews, NewAnalyzedNews};

/// An analytical card together with the aggregates of the story cluster it
/// belongs to, the shape every query surface renders from.
#[derive(Debug, Serialize, Clone)]
pub struct NewsWithCluster {
    pub news: AnalyzedNews,
    pub doc_count: i32,
    pub first_time: NaiveDateTime,
    pub last_time: NaiveDateTime,
}

type JoinedRow = (AnalyzedNews, i32, NaiveDateTime, NaiveDateTime);

impl From<JoinedRow> for NewsWithCluster {
    fn from((news, doc_count, first_time, last_time): JoinedRow) -> Self {
        Self {
            news,
            doc_count,
            first_time,
            last_time,
        }
    }
}

#[derive(QueryableByName)]
struct SearchRow {
    #[diesel(embed)]
    news: AnalyzedNews,
    #[diesel(sql_type = diesel::sql_types::Integer)]
    doc_count: i32,
    #[diesel(sql_type = diesel::sql_types::Timestamp)]
    first_time: NaiveDateTime,
    #[diesel(sql_type = diesel::sql_types::Timestamp)]
    last_time: NaiveDateTime,
}

/// Inserts the card for a cluster, or returns `None` when another worker
/// already analyzed it. The unique index on `cluster_id` is the only
/// cross-worker coordination.
pub async fn insert_analyzed(
    conn: &mut AsyncPgConnection,
    row: &NewAnalyzedNews,
) -> Result<Option<i32>, diesel::result::Error> {
    use crate::schema::llm_analyzed_news::dsl as analyzed_dsl;

    diesel::insert_into(analyzed_dsl::llm_analyzed_news)
        .values(row)
        .on_conflict(analyzed_dsl::cluster_id)
        .do_nothing()
        .returning(analyzed_dsl::id)
        .get_result(conn)
        .await
        .optional()
}

pub async fn exists_for_cluster(
    conn: &mut AsyncPgConnection,
    cluster_id: i32,
) -> Result<bool, diesel::result::Error> {
    use crate::schema::llm_analyzed_news::dsl as analyzed_dsl;
    use diesel::dsl::exists;
    use diesel::select;

    select(exists(
        analyzed_dsl::llm_analyzed_news.filter(analyzed_dsl::cluster_id.eq(cluster_id)),
    ))
    .get_result(conn)
    .await
}

/// Hottest cards published inside the window.
pub async fn top(
    conn: &mut AsyncPgConnection,
    limit: i64,
    published_since: NaiveDateTime,
) -> Result<Vec<NewsWithCluster>, diesel::result::Error> {
    use crate::schema::llm_analyzed_news::dsl as analyzed_dsl;
    use crate::schema::story_clusters::dsl as clusters_dsl;

    let rows: Vec<JoinedRow> = analyzed_dsl::llm_analyzed_news
        .inner_join(clusters_dsl::story_clusters)
        .filter(analyzed_dsl::published_time.ge(published_since))
        .order((
            analyzed_dsl::ai_hotness.desc(),
            analyzed_dsl::published_time.desc(),
        ))
        .limit(limit)
        .select((
            AnalyzedNews::as_select(),
            clusters_dsl::doc_count,
            clusters_dsl::first_time,
            clusters_dsl::last_time,
        ))
        .load(conn)
        .await?;
    Ok(rows.into_iter().map(Into::into).collect())
}

pub async fn latest(
    conn: &mut AsyncPgConnection,
    limit: i64,
) -> Result<Vec<NewsWithCluster>, diesel::result::Error> {
    use crate::schema::llm_analyzed_news::dsl as analyzed_dsl;
    use crate::schema::story_clusters::dsl as clusters_dsl;

    let rows: Vec<JoinedRow> = analyzed_dsl::llm_analyzed_news
        .inner_join(clusters_dsl::story_clusters)
        .order(analyzed_dsl::created_at.desc())
        .limit(limit)
        .select((
            AnalyzedNews::as_select(),
            clusters_dsl::doc_count,
            clusters_dsl::first_time,
            clusters_dsl::last_time,
        ))
        .load(conn)
        .await?;
    Ok(rows.into_iter().map(Into::into).collect())
}

pub async fn by_id(
    conn: &mut AsyncPgConnection,
    id: i32,
) -> Result<Option<NewsWithCluster>, diesel::result::Error> {
    use crate::schema::llm_analyzed_news::dsl as analyzed_dsl;
    use crate::schema::story_clusters::dsl as clusters_dsl;

    let row: Option<JoinedRow> = analyzed_dsl::llm_analyzed_news
        .inner_join(clusters_dsl::story_clusters)
        .filter(analyzed_dsl::id.eq(id))
        .select((
            AnalyzedNews::as_select(),
            clusters_dsl::doc_count,
            clusters_dsl::first_time,
            clusters_dsl::last_time,
        ))
        .first(conn)
        .await
        .optional()?;
    Ok(row.map(Into::into))
}

/// Case-insensitive keyword search over the headline/content pairs and their
/// English renderings. Keywords are regex-escaped and OR-joined into a single
/// pattern for Postgres `~*`.
pub async fn search(
    conn: &mut AsyncPgConnection,
    keywords: &[String],
    limit: i64,
) -> Result<Vec<NewsWithCluster>, diesel::result::Error> {
    let pattern = keywords
        .iter()
        .filter(|kw| !kw.trim().is_empty())
        .map(|kw| regex::escape(kw.trim()))
        .collect::<Vec<_>>()
        .join("|");
    if pattern.is_empty() {
        return Ok(Vec::new());
    }

    let sql = r#"
        SELECT
            lan.*,
            sc.doc_count,
            sc.first_time,
            sc.last_time
        FROM llm_analyzed_news lan
        JOIN story_clusters sc ON sc.id = lan.cluster_id
        WHERE lan.headline ~* $1
           OR lan.content ~* $1
           OR COALESCE(lan.headline_en, '') ~* $1
           OR COALESCE(lan.content_en, '') ~* $1
        ORDER BY lan.published_time DESC NULLS LAST
        LIMIT $2
    "#;

    let rows: Vec<SearchRow> = diesel::sql_query(sql)
        .bind::<Text, _>(pattern)
        .bind::<BigInt, _>(limit)
        .load(conn)
        .await?;

    Ok(rows
        .into_iter()
        .map(|row| NewsWithCluster {
            news: row.news,
            doc_count: row.doc_count,
            first_time: row.first_time,
            last_time: row.last_time,
        })
        .collect())
}

/// Fresh hot cards for the push monitor: above the hotness threshold and
/// created inside the lookback window.
pub async fn hot_new_since(
    conn: &mut AsyncPgConnection,
    threshold: f64,
    created_since: NaiveDateTime,
    limit: i64,
) -> Result<Vec<NewsWithCluster>, diesel::result::Error> {
    use crate::schema::llm_analyzed_news::dsl as analyzed_dsl;
    use crate::schema::story_clusters::dsl as clusters_dsl;

    let rows: Vec<JoinedRow> = analyzed_dsl::llm_analyzed_news
        .inner_join(clusters_dsl::story_clusters)
        .filter(analyzed_dsl::ai_hotness.ge(threshold))
        .filter(analyzed_dsl::created_at.ge(created_since))
        .order(analyzed_dsl::created_at.desc())
        .limit(limit)
        .select((
            AnalyzedNews::as_select(),
            clusters_dsl::doc_count,
            clusters_dsl::first_time,
            clusters_dsl::last_time,
        ))
        .load(conn)
        .await?;
    Ok(rows.into_iter().map(Into::into).collect())
}
