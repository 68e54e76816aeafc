use chrono::NaiveDateTime;
use diesel::prelude::*;
use diesel_async::{AsyncPgConnection, RunQueryDsl};
use std::collections::BTreeMap;

use crate::models::article::NormalizedArticle;
use crate::models::cluster::{ClusterMember, NewClusterMember, NewStoryCluster, StoryCluster};

/// The cluster a document belongs to, if any. A document is a member of at
/// most one cluster.
pub async fn cluster_of(
    conn: &mut AsyncPgConnection,
    normalized_id: i32,
) -> Result<Option<i32>, diesel::result::Error> {
    use crate::schema::cluster_members::dsl as members_dsl;

    members_dsl::cluster_members
        .filter(members_dsl::normalized_id.eq(normalized_id))
        .select(members_dsl::cluster_id)
        .first(conn)
        .await
        .optional()
}

/// A fresh cluster seeded with the first article's headline, language and
/// publication time. Aggregates start empty; `add_member` and
/// `update_aggregates` account for the seeding document like any other.
pub async fn create_cluster(
    conn: &mut AsyncPgConnection,
    headline: &str,
    lang: &str,
    first_time: NaiveDateTime,
) -> Result<i32, diesel::result::Error> {
    use crate::schema::story_clusters::dsl as clusters_dsl;

    let new_cluster = NewStoryCluster {
        headline: headline.to_string(),
        lang: lang.to_string(),
        first_time,
        last_time: first_time,
        domains: serde_json::json!({}),
        urls: serde_json::json!([]),
        doc_count: 0,
    };

    diesel::insert_into(clusters_dsl::story_clusters)
        .values(&new_cluster)
        .returning(clusters_dsl::id)
        .get_result(conn)
        .await
}

pub async fn get_cluster(
    conn: &mut AsyncPgConnection,
    id: i32,
) -> Result<Option<StoryCluster>, diesel::result::Error> {
    use crate::schema::story_clusters::dsl as clusters_dsl;

    clusters_dsl::story_clusters
        .find(id)
        .select(StoryCluster::as_select())
        .first(conn)
        .await
        .optional()
}

pub async fn add_member(
    conn: &mut AsyncPgConnection,
    member: &NewClusterMember,
) -> Result<usize, diesel::result::Error> {
    use crate::schema::cluster_members::dsl as members_dsl;
    use diesel::upsert::excluded;

    diesel::insert_into(members_dsl::cluster_members)
        .values(member)
        .on_conflict((members_dsl::cluster_id, members_dsl::normalized_id))
        .do_update()
        .set((
            members_dsl::url.eq(excluded(members_dsl::url)),
            members_dsl::site.eq(excluded(members_dsl::site)),
            members_dsl::time_utc.eq(excluded(members_dsl::time_utc)),
        ))
        .execute(conn)
        .await
}

pub async fn members_of(
    conn: &mut AsyncPgConnection,
    cluster_id: i32,
) -> Result<Vec<ClusterMember>, diesel::result::Error> {
    use crate::schema::cluster_members::dsl as members_dsl;

    members_dsl::cluster_members
        .filter(members_dsl::cluster_id.eq(cluster_id))
        .order(members_dsl::time_utc.asc())
        .select(ClusterMember::as_select())
        .load(conn)
        .await
}

pub async fn update_aggregates(
    conn: &mut AsyncPgConnection,
    cluster_id: i32,
    domains: &BTreeMap<String, i64>,
    urls: &[String],
    first_time: NaiveDateTime,
    last_time: NaiveDateTime,
) -> Result<usize, diesel::result::Error> {
    use crate::schema::story_clusters::dsl as clusters_dsl;

    diesel::update(clusters_dsl::story_clusters.find(cluster_id))
        .set((
            clusters_dsl::domains.eq(serde_json::json!(domains)),
            clusters_dsl::urls.eq(serde_json::json!(urls)),
            clusters_dsl::first_time.eq(first_time),
            clusters_dsl::last_time.eq(last_time),
            clusters_dsl::doc_count.eq(clusters_dsl::doc_count + 1),
            clusters_dsl::updated_at.eq(diesel::dsl::now),
        ))
        .execute(conn)
        .await
}

pub async fn update_summary(
    conn: &mut AsyncPgConnection,
    cluster_id: i32,
    earliest_url: Option<&str>,
    latest_url: Option<&str>,
    strongest_domain: &str,
) -> Result<usize, diesel::result::Error> {
    use crate::schema::story_clusters::dsl as clusters_dsl;

    diesel::update(clusters_dsl::story_clusters.find(cluster_id))
        .set((
            clusters_dsl::earliest_url.eq(earliest_url),
            clusters_dsl::latest_url.eq(latest_url),
            clusters_dsl::strongest_domain.eq(strongest_domain),
        ))
        .execute(conn)
        .await
}

pub async fn update_score(
    conn: &mut AsyncPgConnection,
    cluster_id: i32,
    factors: serde_json::Value,
    hotness: f64,
) -> Result<usize, diesel::result::Error> {
    use crate::schema::story_clusters::dsl as clusters_dsl;

    diesel::update(clusters_dsl::story_clusters.find(cluster_id))
        .set((
            clusters_dsl::factors.eq(factors),
            clusters_dsl::hotness.eq(hotness),
            clusters_dsl::updated_at.eq(diesel::dsl::now),
        ))
        .execute(conn)
        .await
}

/// Clusters with no analytical card yet, most recent stories first. NOT
/// EXISTS rather than a LEFT JOIN so rows inserted by a concurrent enricher
/// are excluded the moment they commit.
pub async fn unprocessed_clusters(
    conn: &mut AsyncPgConnection,
    limit: i64,
) -> Result<Vec<StoryCluster>, diesel::result::Error> {
    use crate::schema::llm_analyzed_news::dsl as analyzed_dsl;
    use crate::schema::story_clusters::dsl as clusters_dsl;
    use diesel::dsl::{exists, not};

    clusters_dsl::story_clusters
        .filter(not(exists(
            analyzed_dsl::llm_analyzed_news
                .filter(analyzed_dsl::cluster_id.eq(clusters_dsl::id)),
        )))
        .order(clusters_dsl::first_time.desc())
        .limit(limit)
        .select(StoryCluster::as_select())
        .load(conn)
        .await
}

/// The earliest member by publication time, used as the LLM input for the
/// whole story.
pub async fn representative_article(
    conn: &mut AsyncPgConnection,
    cluster_id: i32,
) -> Result<Option<NormalizedArticle>, diesel::result::Error> {
    use crate::schema::cluster_members::dsl as members_dsl;
    use crate::schema::normalized_articles::dsl as normalized_dsl;

    members_dsl::cluster_members
        .inner_join(normalized_dsl::normalized_articles)
        .filter(members_dsl::cluster_id.eq(cluster_id))
        .order(members_dsl::time_utc.asc())
        .select(NormalizedArticle::as_select())
        .first(conn)
        .await
        .optional()
}

pub async fn member_urls(
    conn: &mut AsyncPgConnection,
    cluster_id: i32,
) -> Result<Vec<String>, diesel::result::Error> {
    use crate::schema::cluster_members::dsl as members_dsl;

    let urls: Vec<Option<String>> = members_dsl::cluster_members
        .filter(members_dsl::cluster_id.eq(cluster_id))
        .order(members_dsl::time_utc.asc())
        .select(members_dsl::url)
        .load(conn)
        .await?;
    Ok(urls.into_iter().flatten().collect())
}

/// Hottest clusters whose story is still moving inside the window.
pub async fn top_clusters_since(
    conn: &mut AsyncPgConnection,
    since: NaiveDateTime,
    limit: i64,
) -> Result<Vec<StoryCluster>, diesel::result::Error> {
    use crate::schema::story_clusters::dsl as clusters_dsl;

    clusters_dsl::story_clusters
        .filter(clusters_dsl::last_time.ge(since))
        .order(clusters_dsl::hotness.desc())
        .limit(limit)
        .select(StoryCluster::as_select())
        .load(conn)
        .await
}

/// Most recent member url published from the given site, for snapshot links.
pub async fn latest_url_for_site(
    conn: &mut AsyncPgConnection,
    cluster_id: i32,
    site: &str,
) -> Result<Option<String>, diesel::result::Error> {
    use crate::schema::cluster_members::dsl as members_dsl;

    let url: Option<Option<String>> = members_dsl::cluster_members
        .filter(members_dsl::cluster_id.eq(cluster_id))
        .filter(members_dsl::site.eq(site))
        .order(members_dsl::time_utc.desc())
        .select(members_dsl::url)
        .first(conn)
        .await
        .optional()?;
    Ok(url.flatten())
}
