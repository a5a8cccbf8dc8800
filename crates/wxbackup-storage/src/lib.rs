//! wxbackup Storage - SQLite persistence layer.
//!
//! Stores what the interception proxy captures:
//!
//! - Articles, keyed by `(biz, mid, idx)` and merged on every observation
//! - Publisher profiles, keyed by `biz`
//!
//! Upserts never regress data: a field that already holds content is not
//! replaced by an empty observation, so list summaries, full pages and
//! failure markers can arrive in any order.
//!
//! # Example
//!
//! ```no_run
//! use wxbackup_storage::{ArticleKey, Database, NewArticle};
//!
//! let db = Database::in_memory().unwrap();
//!
//! let mut article = NewArticle::new(ArticleKey::new("MzA5", "2650", "1"));
//! article.title = "Hello".to_string();
//! db.upsert_article(&article).unwrap();
//! ```

mod database;
pub mod error;
pub mod models;
mod pool;
pub mod repository;
mod schema;

pub use database::Database;
pub use error::{Result, StorageError};
pub use models::{Article, ArticleKey, NewArticle, NewProfile, Profile, UpsertOutcome};
pub use pool::ConnectionPool;
pub use repository::{ArticlesRepo, ProfilesRepo};
