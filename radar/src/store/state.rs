use diesel::prelude::*;
use diesel_async::{AsyncPgConnection, RunQueryDsl};

/// The singleton progress row. Each id is a monotonic high-water mark; they
/// only move forward after the unit of work that produced them committed.
#[derive(Queryable, Selectable, Debug, Clone, Copy)]
#[diesel(table_name = crate::schema::pipeline_state)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct PipelineState {
    pub id: i32,
    pub last_normalized_id: i32,
    pub last_vectorized_id: i32,
    pub last_clustered_id: i32,
}

pub async fn get(conn: &mut AsyncPgConnection) -> Result<PipelineState, diesel::result::Error> {
    use crate::schema::pipeline_state::dsl as state_dsl;

    match state_dsl::pipeline_state
        .find(1)
        .select(PipelineState::as_select())
        .first(conn)
        .await
        .optional()?
    {
        Some(state) => Ok(state),
        // The migration seeds the row; recreate it if someone deleted it.
        None => {
            diesel::insert_into(state_dsl::pipeline_state)
                .values(state_dsl::id.eq(1))
                .on_conflict_do_nothing()
                .execute(conn)
                .await?;
            state_dsl::pipeline_state
                .find(1)
                .select(PipelineState::as_select())
                .first(conn)
                .await
        }
    }
}

pub async fn set_last_normalized_id(
    conn: &mut AsyncPgConnection,
    id: i32,
) -> Result<usize, diesel::result::Error> {
    use crate::schema::pipeline_state::dsl as state_dsl;

    diesel::update(state_dsl::pipeline_state.find(1))
        .set((
            state_dsl::last_normalized_id.eq(id),
            state_dsl::updated_at.eq(diesel::dsl::now),
        ))
        .execute(conn)
        .await
}

/// Advances both clustering marks together; embedding and cluster assignment
/// commit as one unit.
pub async fn set_last_vectorized_id(
    conn: &mut AsyncPgConnection,
    id: i32,
) -> Result<usize, diesel::result::Error> {
    use crate::schema::pipeline_state::dsl as state_dsl;

    diesel::update(state_dsl::pipeline_state.find(1))
        .set((
            state_dsl::last_vectorized_id.eq(id),
            state_dsl::last_clustered_id.eq(id),
            state_dsl::updated_at.eq(diesel::dsl::now),
        ))
        .execute(conn)
        .await
}

/// Resets the clustering marks, used together with an embedding wipe when
/// the configured model changed.
pub async fn reset_vector_clock(
    conn: &mut AsyncPgConnection,
) -> Result<usize, diesel::result::Error> {
    use crate::schema::pipeline_state::dsl as state_dsl;

    diesel::update(state_dsl::pipeline_state.find(1))
        .set((
            state_dsl::last_vectorized_id.eq(0),
            state_dsl::last_clustered_id.eq(0),
            state_dsl::updated_at.eq(diesel::dsl::now),
        ))
        .execute(conn)
        .await
}
