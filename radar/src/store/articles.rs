use diesel::prelude::*;
use diesel::upsert::excluded;
use diesel_async::{AsyncPgConnection, RunQueryDsl};
use pgvector::Vector;

use crate::models::article::{
    NewEmbedding, NewNormalizedArticle, NewProcessingLog, NormalizedArticle, RawArticle,
};

/// Raw articles newer than the normalizer's high-water mark, in id order.
pub async fn next_unnormalized(
    conn: &mut AsyncPgConnection,
    max_original_id: i32,
    limit: i64,
) -> Result<Vec<RawArticle>, diesel::result::Error> {
    use crate::schema::articles::dsl as articles_dsl;

    articles_dsl::articles
        .filter(articles_dsl::id.gt(max_original_id))
        .order(articles_dsl::id.asc())
        .limit(limit)
        .select(RawArticle::as_select())
        .load(conn)
        .await
}

pub async fn mark_processed(
    conn: &mut AsyncPgConnection,
    ids: &[i32],
) -> Result<usize, diesel::result::Error> {
    use crate::schema::articles::dsl as articles_dsl;

    diesel::update(articles_dsl::articles.filter(articles_dsl::id.eq_any(ids)))
        .set(articles_dsl::is_processed.eq(true))
        .execute(conn)
        .await
}

pub async fn insert_normalized(
    conn: &mut AsyncPgConnection,
    article: &NewNormalizedArticle,
) -> Result<i32, diesel::result::Error> {
    use crate::schema::normalized_articles::dsl as normalized_dsl;

    diesel::insert_into(normalized_dsl::normalized_articles)
        .values(article)
        .returning(normalized_dsl::id)
        .get_result(conn)
        .await
}

pub async fn max_normalized_original_id(
    conn: &mut AsyncPgConnection,
) -> Result<i32, diesel::result::Error> {
    use crate::schema::normalized_articles::dsl as normalized_dsl;
    use diesel::dsl::max;

    let id: Option<i32> = normalized_dsl::normalized_articles
        .select(max(normalized_dsl::original_id))
        .first(conn)
        .await?;
    Ok(id.unwrap_or(0))
}

/// Normalized articles that have not been embedded/clustered yet, ascending
/// so the clustering order is deterministic.
pub async fn next_unvectorized(
    conn: &mut AsyncPgConnection,
    last_vectorized_id: i32,
    limit: i64,
) -> Result<Vec<NormalizedArticle>, diesel::result::Error> {
    use crate::schema::normalized_articles::dsl as normalized_dsl;

    normalized_dsl::normalized_articles
        .filter(normalized_dsl::id.gt(last_vectorized_id))
        .order(normalized_dsl::id.asc())
        .limit(limit)
        .select(NormalizedArticle::as_select())
        .load(conn)
        .await
}

pub async fn get_normalized_many(
    conn: &mut AsyncPgConnection,
    ids: &[i32],
) -> Result<Vec<NormalizedArticle>, diesel::result::Error> {
    use crate::schema::normalized_articles::dsl as normalized_dsl;

    normalized_dsl::normalized_articles
        .filter(normalized_dsl::id.eq_any(ids))
        .select(NormalizedArticle::as_select())
        .load(conn)
        .await
}

pub async fn save_embedding(
    conn: &mut AsyncPgConnection,
    embedding: &NewEmbedding,
) -> Result<usize, diesel::result::Error> {
    use crate::schema::embeddings::dsl as embeddings_dsl;

    diesel::insert_into(embeddings_dsl::embeddings)
        .values(embedding)
        .on_conflict(embeddings_dsl::normalized_id)
        .do_update()
        .set((
            embeddings_dsl::embedding.eq(excluded(embeddings_dsl::embedding)),
            embeddings_dsl::model.eq(excluded(embeddings_dsl::model)),
            embeddings_dsl::dim.eq(excluded(embeddings_dsl::dim)),
        ))
        .execute(conn)
        .await
}

/// All stored vectors in ascending id order, for index warm-up.
pub async fn load_all_embeddings(
    conn: &mut AsyncPgConnection,
) -> Result<Vec<(i32, Vector)>, diesel::result::Error> {
    use crate::schema::embeddings::dsl as embeddings_dsl;

    embeddings_dsl::embeddings
        .order(embeddings_dsl::normalized_id.asc())
        .select((embeddings_dsl::normalized_id, embeddings_dsl::embedding))
        .load(conn)
        .await
}

pub async fn embedding_models(
    conn: &mut AsyncPgConnection,
) -> Result<Vec<String>, diesel::result::Error> {
    use crate::schema::embeddings::dsl as embeddings_dsl;

    embeddings_dsl::embeddings
        .select(embeddings_dsl::model)
        .distinct()
        .load(conn)
        .await
}

/// Wipes every stored vector. Used when the configured embedding model no
/// longer matches the persisted rows, which invalidates all of them.
pub async fn delete_all_embeddings(
    conn: &mut AsyncPgConnection,
) -> Result<usize, diesel::result::Error> {
    use crate::schema::embeddings::dsl as embeddings_dsl;

    diesel::delete(embeddings_dsl::embeddings).execute(conn).await
}

pub async fn record_batch(
    conn: &mut AsyncPgConnection,
    log: &NewProcessingLog,
) -> Result<usize, diesel::result::Error> {
    use crate::schema::processing_log::dsl as log_dsl;

    diesel::insert_into(log_dsl::processing_log)
        .values(log)
        .execute(conn)
        .await
}
