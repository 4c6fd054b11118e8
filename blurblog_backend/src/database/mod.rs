pub mod models;
pub mod repositories;

use crate::config::{BlurblogPaths, StoreConfig};
use anyhow::{anyhow, Context, Result};
use rusqlite::Connection;
use std::sync::{Arc, Mutex};

pub(crate) const MIGRATIONS: &str = r#"
    PRAGMA journal_mode = WAL;
    PRAGMA foreign_keys = ON;

    CREATE TABLE IF NOT EXISTS social_profiles (
        user_id INTEGER PRIMARY KEY,
        username TEXT,
        email TEXT,
        bio TEXT,
        photo_url TEXT,
        photo_service TEXT,
        location TEXT,
        website TEXT,
        subscription_count INTEGER NOT NULL DEFAULT 0,
        shared_stories_count INTEGER NOT NULL DEFAULT 0,
        following_count INTEGER NOT NULL DEFAULT 0,
        follower_count INTEGER NOT NULL DEFAULT 0,
        stories_last_month INTEGER NOT NULL DEFAULT 0,
        average_stories_per_month INTEGER NOT NULL DEFAULT 0,
        favicon_color TEXT
    );

    -- Set-valued profile fields. kind is 'following', 'follower' or 'unfollowed'.
    CREATE TABLE IF NOT EXISTS profile_links (
        user_id INTEGER NOT NULL,
        kind TEXT NOT NULL,
        other_id INTEGER NOT NULL,
        PRIMARY KEY (user_id, kind, other_id),
        FOREIGN KEY (user_id) REFERENCES social_profiles(user_id)
    );

    CREATE INDEX IF NOT EXISTS idx_profile_links_other ON profile_links(kind, other_id);

    CREATE TABLE IF NOT EXISTS shared_stories (
        user_id INTEGER NOT NULL,
        story_guid TEXT NOT NULL,
        guid_hash TEXT NOT NULL,
        story_feed_id INTEGER NOT NULL,
        shared_date TEXT NOT NULL,
        comments TEXT NOT NULL DEFAULT '',
        has_comments INTEGER NOT NULL DEFAULT 0,
        story_date TEXT,
        story_title TEXT,
        story_content_z BLOB,
        story_original_content_z BLOB,
        story_content_type TEXT,
        story_author_name TEXT,
        story_permalink TEXT,
        story_tags TEXT NOT NULL DEFAULT '[]',
        PRIMARY KEY (user_id, story_guid)
    );

    CREATE INDEX IF NOT EXISTS idx_shared_stories_story ON shared_stories(story_feed_id, guid_hash);
    CREATE INDEX IF NOT EXISTS idx_shared_stories_user_date ON shared_stories(user_id, shared_date);

    CREATE TABLE IF NOT EXISTS social_subscriptions (
        user_id INTEGER NOT NULL,
        subscription_user_id INTEGER NOT NULL,
        last_read_date TEXT NOT NULL,
        mark_read_date TEXT NOT NULL,
        unread_count_neutral INTEGER NOT NULL DEFAULT 0,
        unread_count_positive INTEGER NOT NULL DEFAULT 0,
        unread_count_negative INTEGER NOT NULL DEFAULT 0,
        unread_count_updated TEXT,
        oldest_unread_story_date TEXT,
        needs_unread_recalc INTEGER NOT NULL DEFAULT 0,
        feed_opens INTEGER NOT NULL DEFAULT 0,
        is_trained INTEGER NOT NULL DEFAULT 0,
        PRIMARY KEY (user_id, subscription_user_id)
    );

    CREATE TABLE IF NOT EXISTS social_services (
        user_id INTEGER PRIMARY KEY,
        autofollow INTEGER NOT NULL DEFAULT 1,
        twitter_uid TEXT,
        twitter_picture_url TEXT,
        twitter_username TEXT,
        twitter_refresh_date TEXT,
        facebook_uid TEXT,
        facebook_picture_url TEXT,
        facebook_refresh_date TEXT,
        upload_picture_url TEXT
    );

    CREATE INDEX IF NOT EXISTS idx_social_services_twitter ON social_services(twitter_uid);
    CREATE INDEX IF NOT EXISTS idx_social_services_facebook ON social_services(facebook_uid);

    -- Imported friend ids per network, in the order the network returned them.
    CREATE TABLE IF NOT EXISTS social_service_friends (
        user_id INTEGER NOT NULL,
        network TEXT NOT NULL,
        position INTEGER NOT NULL,
        foreign_id TEXT NOT NULL,
        PRIMARY KEY (user_id, network, foreign_id)
    );

    CREATE INDEX IF NOT EXISTS idx_social_service_friends_foreign ON social_service_friends(network, foreign_id);
"#;

/// Handle to the authoritative store. Cloning shares the connection.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
    newly_created: bool,
}

impl Database {
    pub fn connect(paths: &BlurblogPaths, store: &StoreConfig) -> Result<Self> {
        let newly_created = !paths.db_path.exists();
        let conn = Connection::open(&paths.db_path)
            .with_context(|| format!("failed to open {}", paths.db_path.display()))?;
        conn.busy_timeout(store.busy_timeout)?;
        Ok(Self::from_connection(conn, newly_created))
    }

    pub fn from_connection(conn: Connection, newly_created: bool) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
            newly_created,
        }
    }

    /// Convenience for tests and tools: a migrated in-memory store.
    pub fn open_in_memory() -> Result<Self> {
        let db = Self::from_connection(Connection::open_in_memory()?, true);
        db.ensure_migrations()?;
        Ok(db)
    }

    pub fn ensure_migrations(&self) -> Result<bool> {
        self.with_conn(|conn| {
            conn.execute_batch(MIGRATIONS)?;
            Ok(())
        })?;
        Ok(self.newly_created)
    }

    pub fn with_repositories<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(repositories::SqliteRepositories<'_>) -> Result<T>,
    {
        self.with_conn(|conn| {
            let repos = repositories::SqliteRepositories::new(conn);
            f(repos)
        })
    }

    /// Like [`Database::with_repositories`], but commits every write made by
    /// `f` atomically. Nothing is written if `f` returns an error.
    pub fn with_transaction<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(repositories::SqliteRepositories<'_>) -> Result<T>,
    {
        self.with_conn(|conn| {
            let tx = conn.unchecked_transaction()?;
            let value = f(repositories::SqliteRepositories::new(&tx))?;
            tx.commit()?;
            Ok(value)
        })
    }

    fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let guard = self
            .conn
            .lock()
            .map_err(|_| anyhow!("database connection mutex poisoned"))?;
        f(&guard)
    }
}
