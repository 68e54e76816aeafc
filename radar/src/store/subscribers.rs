use diesel::prelude::*;
use diesel_async::{AsyncPgConnection, RunQueryDsl};

use crate::models::subscriber::{NewSubscriber, Subscriber};

pub async fn get(
    conn: &mut AsyncPgConnection,
    chat_id: i64,
) -> Result<Option<Subscriber>, diesel::result::Error> {
    use crate::schema::telegram_subscribers::dsl as subscribers_dsl;

    subscribers_dsl::telegram_subscribers
        .find(chat_id)
        .select(Subscriber::as_select())
        .first(conn)
        .await
        .optional()
}

pub async fn is_subscribed(
    conn: &mut AsyncPgConnection,
    chat_id: i64,
) -> Result<bool, diesel::result::Error> {
    Ok(get(conn, chat_id).await?.is_some_and(|s| s.is_active))
}

/// Subscribes a chat, reactivating it if it unsubscribed earlier.
pub async fn subscribe(
    conn: &mut AsyncPgConnection,
    subscriber: &NewSubscriber,
) -> Result<usize, diesel::result::Error> {
    use crate::schema::telegram_subscribers::dsl as subscribers_dsl;
    use diesel::upsert::excluded;

    diesel::insert_into(subscribers_dsl::telegram_subscribers)
        .values(subscriber)
        .on_conflict(subscribers_dsl::chat_id)
        .do_update()
        .set((
            subscribers_dsl::username.eq(excluded(subscribers_dsl::username)),
            subscribers_dsl::first_name.eq(excluded(subscribers_dsl::first_name)),
            subscribers_dsl::last_name.eq(excluded(subscribers_dsl::last_name)),
            subscribers_dsl::is_active.eq(true),
        ))
        .execute(conn)
        .await
}

/// Soft delete: the row stays, notifications stop.
pub async fn unsubscribe(
    conn: &mut AsyncPgConnection,
    chat_id: i64,
) -> Result<bool, diesel::result::Error> {
    use crate::schema::telegram_subscribers::dsl as subscribers_dsl;

    let updated = diesel::update(subscribers_dsl::telegram_subscribers.find(chat_id))
        .set(subscribers_dsl::is_active.eq(false))
        .execute(conn)
        .await?;
    Ok(updated > 0)
}

pub async fn active_subscribers(
    conn: &mut AsyncPgConnection,
) -> Result<Vec<Subscriber>, diesel::result::Error> {
    use crate::schema::telegram_subscribers::dsl as subscribers_dsl;

    subscribers_dsl::telegram_subscribers
        .filter(subscribers_dsl::is_active.eq(true))
        .order(subscribers_dsl::subscribed_at.asc())
        .select(Subscriber::as_select())
        .load(conn)
        .await
}

pub async fn touch_notification(
    conn: &mut AsyncPgConnection,
    chat_id: i64,
) -> Result<usize, diesel::result::Error> {
    use crate::schema::telegram_subscribers::dsl as subscribers_dsl;

    diesel::update(subscribers_dsl::telegram_subscribers.find(chat_id))
        .set(subscribers_dsl::last_notification_at.eq(diesel::dsl::now))
        .execute(conn)
        .await
}
