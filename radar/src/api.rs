//! Read-only HTTP surface over the analyzed news and cluster snapshot. The
//! bot is the primary consumer-facing surface; this mirrors its queries for
//! dashboards and scripts.

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    routing::get,
};
use chrono::Utc;
use serde::Deserialize;

use crate::error::AppError;
use crate::store::analyzed::NewsWithCluster;
use crate::{App, export, store};

pub fn route() -> Router<App> {
    Router::<App>::new()
        .route("/news/top", get(get_top))
        .route("/news/latest", get(get_latest))
        .route("/news/search", get(get_search))
        .route("/news/{id}", get(get_by_id))
        .route("/clusters/snapshot", get(get_snapshot))
}

#[derive(Deserialize)]
struct TopQuery {
    limit: Option<i64>,
    hours: Option<i64>,
}

async fn get_top(
    State(ctx): State<App>,
    Query(query): Query<TopQuery>,
) -> Result<Json<Vec<NewsWithCluster>>, AppError> {
    let limit = query.limit.unwrap_or(10).clamp(1, 20);
    let hours = query.hours.unwrap_or(24).clamp(1, 168);
    Ok(Json(top_items(&ctx, limit, hours).await?))
}

async fn top_items(ctx: &App, limit: i64, hours: i64) -> Result<Vec<NewsWithCluster>, eyre::Error> {
    let mut conn = ctx.diesel.get().await?;
    let since = Utc::now().naive_utc() - chrono::Duration::hours(hours);
    Ok(store::analyzed::top(&mut conn, limit, since).await?)
}

#[derive(Deserialize)]
struct LatestQuery {
    limit: Option<i64>,
}

async fn get_latest(
    State(ctx): State<App>,
    Query(query): Query<LatestQuery>,
) -> Result<Json<Vec<NewsWithCluster>>, AppError> {
    let limit = query.limit.unwrap_or(10).clamp(1, 50);
    Ok(Json(latest_items(&ctx, limit).await?))
}

async fn latest_items(ctx: &App, limit: i64) -> Result<Vec<NewsWithCluster>, eyre::Error> {
    let mut conn = ctx.diesel.get().await?;
    Ok(store::analyzed::latest(&mut conn, limit).await?)
}

#[derive(Deserialize)]
struct SearchQuery {
    q: String,
    limit: Option<i64>,
}

async fn get_search(
    State(ctx): State<App>,
    Query(query): Query<SearchQuery>,
) -> Result<Json<Vec<NewsWithCluster>>, AppError> {
    let limit = query.limit.unwrap_or(10).clamp(1, 50);
    let keywords: Vec<String> = query.q.split_whitespace().map(str::to_string).collect();
    Ok(Json(search_items(&ctx, &keywords, limit).await?))
}

async fn search_items(
    ctx: &App,
    keywords: &[String],
    limit: i64,
) -> Result<Vec<NewsWithCluster>, eyre::Error> {
    let mut conn = ctx.diesel.get().await?;
    Ok(store::analyzed::search(&mut conn, keywords, limit).await?)
}

async fn get_by_id(
    State(ctx): State<App>,
    Path(id): Path<i32>,
) -> Result<Json<Option<NewsWithCluster>>, AppError> {
    Ok(Json(item_by_id(&ctx, id).await?))
}

async fn item_by_id(ctx: &App, id: i32) -> Result<Option<NewsWithCluster>, eyre::Error> {
    let mut conn = ctx.diesel.get().await?;
    Ok(store::analyzed::by_id(&mut conn, id).await?)
}

#[derive(Deserialize)]
struct SnapshotQuery {
    top_k: Option<i64>,
    window_hours: Option<i64>,
}

async fn get_snapshot(
    State(ctx): State<App>,
    Query(query): Query<SnapshotQuery>,
) -> Result<Json<export::Snapshot>, AppError> {
    let top_k = query.top_k.unwrap_or(10).clamp(1, 50);
    let window_hours = query.window_hours.unwrap_or(48).clamp(1, 168);
    Ok(Json(snapshot(&ctx, top_k, window_hours).await?))
}

async fn snapshot(
    ctx: &App,
    top_k: i64,
    window_hours: i64,
) -> Result<export::Snapshot, eyre::Error> {
    let mut conn = ctx.diesel.get().await?;
    export::build_snapshot(&mut conn, top_k, window_hours).await
}
