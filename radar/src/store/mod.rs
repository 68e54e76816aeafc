//! Typed access layer over Postgres. All SQL lives here; callers get row
//! types and plain values. Functions take a pooled `AsyncPgConnection` so
//! multi-statement units can run inside one `conn.transaction(..)`.

pub mod analyzed;
pub mod articles;
pub mod clusters;
pub mod state;
pub mod subscribers;
