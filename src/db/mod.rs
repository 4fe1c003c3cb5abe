mod from_row;
mod schema;
pub mod queries;

pub use schema::init_db;

use std::sync::Arc;
use std::time::Duration;

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::Connection;

use crate::completion::CompletionRegistry;
use crate::payments::{Gateways, TokenCache};

pub type DbPool = Pool<SqliteConnectionManager>;

/// Application state shared by every handler
#[derive(Clone)]
pub struct AppState {
    pub db: DbPool,
    /// Base URL for provider return links (e.g., https://pay.example.com)
    pub base_url: String,
    /// Bearer key for internal routes. `None` rejects every internal request.
    pub internal_api_key: Option<String>,
    pub gateways: Gateways,
    /// OAuth tokens shared by all provider clients in the process
    pub token_cache: Arc<TokenCache>,
    pub completions: Arc<CompletionRegistry>,
}

/// Connection-scoped settings, applied to every connection the pool opens.
///
/// WAL lets the verify route read while a webhook holds the write lock;
/// the busy timeout makes concurrent reconciliations queue instead of failing.
pub fn configure_connection(conn: &mut Connection) -> rusqlite::Result<()> {
    conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get::<_, String>(0))?;
    conn.busy_timeout(Duration::from_secs(5))?;
    conn.pragma_update(None, "foreign_keys", true)
}

pub fn create_pool(database_path: &str) -> Result<DbPool, r2d2::Error> {
    let manager = SqliteConnectionManager::file(database_path).with_init(configure_connection);
    Pool::builder().max_size(10).build(manager)
}
