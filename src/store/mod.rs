use chrono::{DateTime, Duration, SecondsFormat, Utc};
use rusqlite::{params, params_from_iter, Connection, ErrorCode, OptionalExtension};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;

use crate::models::*;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(rusqlite::Error),
    #[error("Store unavailable: {0}")]
    Unavailable(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Conflict: {0}")]
    Conflict(String),
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        match e.sqlite_error_code() {
            Some(ErrorCode::DatabaseBusy) | Some(ErrorCode::DatabaseLocked) => {
                StoreError::Unavailable(e.to_string())
            }
            Some(ErrorCode::ConstraintViolation) => StoreError::Conflict(e.to_string()),
            _ => StoreError::Database(e),
        }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Upper bound on ids bound into a single `IN (...)` list.
const MAX_IN_PARAMS: usize = 500;

/// Optional bounds on `created_at`, both exclusive.
#[derive(Debug, Clone, Copy, Default)]
pub struct TimeWindow {
    pub after: Option<DateTime<Utc>>,
    pub before: Option<DateTime<Utc>>,
}

impl TimeWindow {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn after(ts: Option<DateTime<Utc>>) -> Self {
        Self { after: ts, before: None }
    }

    pub fn before(ts: Option<DateTime<Utc>>) -> Self {
        Self { after: None, before: ts }
    }

    /// Exactly `ts`, which must already be at stored (microsecond) precision.
    pub fn at(ts: DateTime<Utc>) -> Self {
        let tick = Duration::microseconds(1);
        Self {
            after: Some(ts - tick),
            before: Some(ts + tick),
        }
    }

    fn sql(&self, column: &str, values: &mut Vec<String>) -> String {
        let mut clause = String::new();
        if let Some(after) = self.after {
            clause.push_str(&format!(" AND {} > ?", column));
            values.push(format_datetime(after));
        }
        if let Some(before) = self.before {
            clause.push_str(&format!(" AND {} < ?", column));
            values.push(format_datetime(before));
        }
        clause
    }
}

/// Thread-safe SQLite store
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

impl Store {
    /// Create a new store with the given database path
    pub fn new(db_path: &str) -> StoreResult<Self> {
        let conn = Connection::open(db_path)?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init_schema()?;
        Ok(store)
    }

    /// Create an in-memory store for testing
    pub fn in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn conn(&self) -> StoreResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| StoreError::Unavailable("connection lock poisoned".to_string()))
    }

    fn init_schema(&self) -> StoreResult<()> {
        let conn = self.conn()?;
        conn.execute_batch(
            r#"
            PRAGMA foreign_keys = ON;

            CREATE TABLE IF NOT EXISTS users (
                id TEXT PRIMARY KEY,
                username TEXT UNIQUE NOT NULL COLLATE NOCASE,
                name TEXT NOT NULL,
                name_lower TEXT NOT NULL DEFAULT '',
                bio TEXT DEFAULT '',
                image TEXT DEFAULT '',
                onboarded INTEGER DEFAULT 0,
                last_viewed TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS user_following (
                user_id TEXT NOT NULL,
                target_id TEXT NOT NULL,
                created_at TEXT NOT NULL,
                PRIMARY KEY (user_id, target_id),
                FOREIGN KEY (user_id) REFERENCES users(id),
                FOREIGN KEY (target_id) REFERENCES users(id)
            );

            CREATE TABLE IF NOT EXISTS user_followers (
                user_id TEXT NOT NULL,
                follower_id TEXT NOT NULL,
                created_at TEXT NOT NULL,
                PRIMARY KEY (user_id, follower_id),
                FOREIGN KEY (user_id) REFERENCES users(id),
                FOREIGN KEY (follower_id) REFERENCES users(id)
            );

            CREATE TABLE IF NOT EXISTS communities (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                image TEXT DEFAULT '',
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS community_members (
                community_id TEXT NOT NULL,
                user_id TEXT NOT NULL,
                joined_at TEXT NOT NULL,
                PRIMARY KEY (community_id, user_id),
                FOREIGN KEY (community_id) REFERENCES communities(id),
                FOREIGN KEY (user_id) REFERENCES users(id)
            );

            CREATE TABLE IF NOT EXISTS threads (
                id TEXT PRIMARY KEY,
                text TEXT NOT NULL,
                author_id TEXT,
                image TEXT,
                parent_id TEXT,
                community_id TEXT,
                created_at TEXT NOT NULL,
                FOREIGN KEY (author_id) REFERENCES users(id) ON DELETE SET NULL,
                FOREIGN KEY (parent_id) REFERENCES threads(id),
                FOREIGN KEY (community_id) REFERENCES communities(id)
            );

            CREATE TABLE IF NOT EXISTS likes (
                id TEXT PRIMARY KEY,
                thread_id TEXT NOT NULL,
                user_id TEXT NOT NULL,
                liked_user_id TEXT,
                created_at TEXT NOT NULL,
                FOREIGN KEY (thread_id) REFERENCES threads(id),
                FOREIGN KEY (user_id) REFERENCES users(id),
                UNIQUE(thread_id, user_id)
            );

            CREATE INDEX IF NOT EXISTS idx_users_created_at ON users(created_at);
            CREATE INDEX IF NOT EXISTS idx_user_followers_follower ON user_followers(follower_id);
            CREATE INDEX IF NOT EXISTS idx_threads_author_id ON threads(author_id);
            CREATE INDEX IF NOT EXISTS idx_threads_parent_id ON threads(parent_id);
            CREATE INDEX IF NOT EXISTS idx_threads_created_at ON threads(created_at);
            CREATE INDEX IF NOT EXISTS idx_likes_thread_id ON likes(thread_id);
            CREATE INDEX IF NOT EXISTS idx_likes_user_id ON likes(user_id);
            "#,
        )?;
        Ok(())
    }

    // ==================== User Operations ====================

    /// Insert the user, or update the profile fields of an existing one.
    /// `created_at`, `last_viewed` and the derived lists are left alone on
    /// update.
    pub fn upsert_user(&self, user: &User) -> StoreResult<()> {
        let conn = self.conn()?;
        conn.execute(
            r#"INSERT INTO users (id, username, name, name_lower, bio, image, onboarded, created_at, updated_at)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
               ON CONFLICT(id) DO UPDATE SET
                   username = excluded.username,
                   name = excluded.name,
                   name_lower = excluded.name_lower,
                   bio = excluded.bio,
                   image = excluded.image,
                   onboarded = excluded.onboarded,
                   updated_at = excluded.updated_at"#,
            params![
                &user.id,
                &user.username,
                &user.name,
                user.name.to_lowercase(),
                &user.bio,
                &user.image,
                user.onboarded,
                format_datetime(user.created_at),
                format_datetime(user.updated_at),
            ],
        )?;
        Ok(())
    }

    /// Fetch a user with thread, like and community references resolved.
    pub fn get_user(&self, id: &str) -> StoreResult<User> {
        let conn = self.conn()?;
        let mut user = conn
            .query_row("SELECT * FROM users WHERE id = ?1", params![id], row_to_user)
            .optional()?
            .ok_or_else(|| StoreError::NotFound(format!("User {}", id)))?;

        user.threads = query_ids(
            &conn,
            "SELECT id FROM threads WHERE author_id = ?1 ORDER BY created_at ASC",
            id,
        )?;
        user.liked_threads = query_ids(
            &conn,
            "SELECT thread_id FROM likes WHERE user_id = ?1 ORDER BY created_at ASC",
            id,
        )?;
        user.communities = query_ids(
            &conn,
            "SELECT community_id FROM community_members WHERE user_id = ?1 ORDER BY joined_at ASC",
            id,
        )?;
        Ok(user)
    }

    pub fn get_user_by_username(&self, username: &str) -> StoreResult<User> {
        let conn = self.conn()?;
        conn.query_row(
            "SELECT * FROM users WHERE username = ?1",
            params![username],
            row_to_user,
        )
        .optional()?
        .ok_or_else(|| StoreError::NotFound(format!("User {}", username)))
    }

    pub fn user_exists(&self, id: &str) -> StoreResult<bool> {
        let conn = self.conn()?;
        let found: Option<i64> = conn
            .query_row("SELECT 1 FROM users WHERE id = ?1", params![id], |row| row.get(0))
            .optional()?;
        Ok(found.is_some())
    }

    /// Resolve public profiles for a set of ids. Unknown ids are skipped.
    pub fn get_user_summaries(&self, ids: &[String]) -> StoreResult<HashMap<String, UserSummary>> {
        let conn = self.conn()?;
        let mut summaries = HashMap::new();
        for chunk in ids.chunks(MAX_IN_PARAMS) {
            let sql = format!(
                "SELECT id, username, name, image FROM users WHERE id IN ({})",
                placeholders(chunk.len())
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params_from_iter(chunk.iter()), row_to_summary)?;
            for row in rows {
                let summary = row?;
                summaries.insert(summary.id.clone(), summary);
            }
        }
        Ok(summaries)
    }

    pub fn set_last_viewed(&self, user_id: &str, at: DateTime<Utc>) -> StoreResult<()> {
        let conn = self.conn()?;
        let rows = conn.execute(
            "UPDATE users SET last_viewed = ?1 WHERE id = ?2",
            params![format_datetime(at), user_id],
        )?;
        if rows == 0 {
            return Err(StoreError::NotFound(format!("User {}", user_id)));
        }
        Ok(())
    }

    pub fn get_last_viewed(&self, user_id: &str) -> StoreResult<Option<DateTime<Utc>>> {
        let conn = self.conn()?;
        let value: Option<Option<String>> = conn
            .query_row(
                "SELECT last_viewed FROM users WHERE id = ?1",
                params![user_id],
                |row| row.get(0),
            )
            .optional()?;
        match value {
            Some(ts) => Ok(ts.map(parse_datetime)),
            None => Err(StoreError::NotFound(format!("User {}", user_id))),
        }
    }

    /// Page through users other than `exclude_id`. `pattern` is a lower-cased
    /// LIKE pattern matched against username or the lower-cased name.
    /// SQLite's own `lower()` only folds ASCII, so folding happens in Rust.
    pub fn search_users(
        &self,
        exclude_id: &str,
        pattern: Option<&str>,
        sort: SortOrder,
        limit: i64,
        offset: i64,
    ) -> StoreResult<Vec<UserSummary>> {
        let conn = self.conn()?;
        let order = sort.as_sql();
        let mut users = Vec::new();

        if let Some(p) = pattern {
            let sql = format!(
                r#"SELECT id, username, name, image FROM users
                   WHERE id != ?1
                     AND (username LIKE ?2 ESCAPE '\' OR name_lower LIKE ?2 ESCAPE '\')
                   ORDER BY created_at {order}, id {order} LIMIT ?3 OFFSET ?4"#
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params![exclude_id, p, limit, offset], row_to_summary)?;
            for row in rows {
                users.push(row?);
            }
        } else {
            let sql = format!(
                r#"SELECT id, username, name, image FROM users WHERE id != ?1
                   ORDER BY created_at {order}, id {order} LIMIT ?2 OFFSET ?3"#
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params![exclude_id, limit, offset], row_to_summary)?;
            for row in rows {
                users.push(row?);
            }
        }

        Ok(users)
    }

    pub fn count_search_users(&self, exclude_id: &str, pattern: Option<&str>) -> StoreResult<i64> {
        let conn = self.conn()?;
        let count: i64 = match pattern {
            Some(p) => conn.query_row(
                r#"SELECT COUNT(*) FROM users
                   WHERE id != ?1
                     AND (username LIKE ?2 ESCAPE '\' OR name_lower LIKE ?2 ESCAPE '\')"#,
                params![exclude_id, p],
                |row| row.get(0),
            )?,
            None => conn.query_row(
                "SELECT COUNT(*) FROM users WHERE id != ?1",
                params![exclude_id],
                |row| row.get(0),
            )?,
        };
        Ok(count)
    }

    // ==================== Follow Graph Operations ====================

    /// Add `follower_id -> target_id` to both edge sets in one transaction.
    /// Returns false when the edge was already recorded on the following
    /// side.
    pub fn add_follow(&self, follower_id: &str, target_id: &str, at: DateTime<Utc>) -> StoreResult<bool> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let ts = format_datetime(at);

        let added = tx.execute(
            "INSERT OR IGNORE INTO user_following (user_id, target_id, created_at) VALUES (?1, ?2, ?3)",
            params![follower_id, target_id, &ts],
        )?;
        tx.execute(
            "INSERT OR IGNORE INTO user_followers (user_id, follower_id, created_at) VALUES (?1, ?2, ?3)",
            params![target_id, follower_id, &ts],
        )?;

        tx.commit()?;
        Ok(added > 0)
    }

    /// Remove `follower_id -> target_id` from both edge sets in one
    /// transaction. Returns false when nothing was recorded.
    pub fn remove_follow(&self, follower_id: &str, target_id: &str) -> StoreResult<bool> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        let removed = tx.execute(
            "DELETE FROM user_following WHERE user_id = ?1 AND target_id = ?2",
            params![follower_id, target_id],
        )?;
        let mirrored = tx.execute(
            "DELETE FROM user_followers WHERE user_id = ?1 AND follower_id = ?2",
            params![target_id, follower_id],
        )?;

        tx.commit()?;
        Ok(removed + mirrored > 0)
    }

    pub fn follower_ids(&self, user_id: &str) -> StoreResult<Vec<String>> {
        let conn = self.conn()?;
        query_ids(
            &conn,
            "SELECT follower_id FROM user_followers WHERE user_id = ?1 ORDER BY created_at ASC",
            user_id,
        )
    }

    pub fn following_ids(&self, user_id: &str) -> StoreResult<Vec<String>> {
        let conn = self.conn()?;
        query_ids(
            &conn,
            "SELECT target_id FROM user_following WHERE user_id = ?1 ORDER BY created_at ASC",
            user_id,
        )
    }

    pub fn followers(&self, user_id: &str) -> StoreResult<Vec<UserSummary>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            r#"SELECT u.id, u.username, u.name, u.image FROM user_followers f
               JOIN users u ON u.id = f.follower_id
               WHERE f.user_id = ?1 ORDER BY f.created_at ASC"#,
        )?;
        let users = stmt
            .query_map(params![user_id], row_to_summary)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(users)
    }

    pub fn following(&self, user_id: &str) -> StoreResult<Vec<UserSummary>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            r#"SELECT u.id, u.username, u.name, u.image FROM user_following f
               JOIN users u ON u.id = f.target_id
               WHERE f.user_id = ?1 ORDER BY f.created_at ASC"#,
        )?;
        let users = stmt
            .query_map(params![user_id], row_to_summary)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(users)
    }

    /// Re-derive `user_followers` from `user_following`, which is always
    /// written first and therefore reflects the latest intent.
    pub fn repair_follow_mirrors(&self) -> StoreResult<RepairReport> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        let followers_added = tx.execute(
            r#"INSERT OR IGNORE INTO user_followers (user_id, follower_id, created_at)
               SELECT target_id, user_id, created_at FROM user_following"#,
            [],
        )?;
        let followers_removed = tx.execute(
            r#"DELETE FROM user_followers WHERE NOT EXISTS (
                   SELECT 1 FROM user_following f
                   WHERE f.user_id = user_followers.follower_id
                     AND f.target_id = user_followers.user_id
               )"#,
            [],
        )?;

        tx.commit()?;
        Ok(RepairReport {
            followers_added,
            followers_removed,
        })
    }

    // ==================== Thread Operations ====================

    pub fn create_thread(&self, thread: &Thread) -> StoreResult<()> {
        let conn = self.conn()?;
        conn.execute(
            r#"INSERT INTO threads (id, text, author_id, image, parent_id, community_id, created_at)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)"#,
            params![
                &thread.id,
                &thread.text,
                &thread.author_id,
                &thread.image,
                &thread.parent_id,
                &thread.community_id,
                format_datetime(thread.created_at),
            ],
        )?;
        Ok(())
    }

    pub fn get_thread(&self, id: &str) -> StoreResult<Thread> {
        let conn = self.conn()?;
        let mut thread = conn
            .query_row("SELECT * FROM threads WHERE id = ?1", params![id], row_to_thread)
            .optional()?
            .ok_or_else(|| StoreError::NotFound(format!("Thread {}", id)))?;
        hydrate_thread(&conn, &mut thread)?;
        Ok(thread)
    }

    pub fn thread_exists(&self, id: &str) -> StoreResult<bool> {
        let conn = self.conn()?;
        let found: Option<i64> = conn
            .query_row("SELECT 1 FROM threads WHERE id = ?1", params![id], |row| row.get(0))
            .optional()?;
        Ok(found.is_some())
    }

    /// Threads authored by the user, oldest first.
    pub fn threads_by_author(&self, author_id: &str) -> StoreResult<Vec<Thread>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT * FROM threads WHERE author_id = ?1 ORDER BY created_at ASC",
        )?;
        let mut threads = stmt
            .query_map(params![author_id], row_to_thread)?
            .collect::<Result<Vec<_>, _>>()?;
        for thread in &mut threads {
            hydrate_thread(&conn, thread)?;
        }
        Ok(threads)
    }

    /// Direct replies to a thread, oldest first.
    pub fn children_of(&self, parent_id: &str) -> StoreResult<Vec<Thread>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT * FROM threads WHERE parent_id = ?1 ORDER BY created_at ASC",
        )?;
        let mut threads = stmt
            .query_map(params![parent_id], row_to_thread)?
            .collect::<Result<Vec<_>, _>>()?;
        for thread in &mut threads {
            hydrate_thread(&conn, thread)?;
        }
        Ok(threads)
    }

    /// Top-level threads, newest first.
    pub fn list_top_level_threads(&self, limit: i64, offset: i64) -> StoreResult<Vec<Thread>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            r#"SELECT * FROM threads WHERE parent_id IS NULL
               ORDER BY created_at DESC, rowid DESC LIMIT ?1 OFFSET ?2"#,
        )?;
        let mut threads = stmt
            .query_map(params![limit, offset], row_to_thread)?
            .collect::<Result<Vec<_>, _>>()?;
        for thread in &mut threads {
            hydrate_thread(&conn, thread)?;
        }
        Ok(threads)
    }

    pub fn count_top_level_threads(&self) -> StoreResult<i64> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM threads WHERE parent_id IS NULL",
            [],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// Replies whose parent is in `parent_ids` and whose author is known
    /// and differs from `exclude_author`, newest first. Equal timestamps
    /// keep insertion order. `limit` bounds each chunk of `parent_ids`.
    pub fn replies_to(
        &self,
        parent_ids: &[String],
        exclude_author: &str,
        window: TimeWindow,
        limit: Option<usize>,
    ) -> StoreResult<Vec<Thread>> {
        let conn = self.conn()?;
        let mut replies = Vec::new();
        for chunk in parent_ids.chunks(MAX_IN_PARAMS) {
            let mut values: Vec<String> = chunk.to_vec();
            values.push(exclude_author.to_string());
            let sql = format!(
                r#"SELECT * FROM threads
                   WHERE parent_id IN ({}) AND author_id IS NOT NULL AND author_id != ?{}
                   ORDER BY created_at DESC, rowid ASC{}"#,
                placeholders(chunk.len()),
                window.sql("created_at", &mut values),
                limit_sql(limit)
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params_from_iter(values.iter()), row_to_thread)?;
            for row in rows {
                replies.push(row?);
            }
        }
        Ok(replies)
    }

    pub fn count_replies_to(
        &self,
        parent_ids: &[String],
        exclude_author: &str,
        window: TimeWindow,
    ) -> StoreResult<i64> {
        let conn = self.conn()?;
        let mut total = 0;
        for chunk in parent_ids.chunks(MAX_IN_PARAMS) {
            let mut values: Vec<String> = chunk.to_vec();
            values.push(exclude_author.to_string());
            let sql = format!(
                r#"SELECT COUNT(*) FROM threads
                   WHERE parent_id IN ({}) AND author_id IS NOT NULL AND author_id != ?{}"#,
                placeholders(chunk.len()),
                window.sql("created_at", &mut values)
            );
            let count: i64 =
                conn.query_row(&sql, params_from_iter(values.iter()), |row| row.get(0))?;
            total += count;
        }
        Ok(total)
    }

    // ==================== Like Operations ====================

    /// Record a like. Returns false if the user already liked the thread.
    pub fn create_like(&self, like: &Like) -> StoreResult<bool> {
        let conn = self.conn()?;
        let rows = conn.execute(
            r#"INSERT OR IGNORE INTO likes (id, thread_id, user_id, liked_user_id, created_at)
               VALUES (?1, ?2, ?3, ?4, ?5)"#,
            params![
                &like.id,
                &like.thread_id,
                &like.user_id,
                &like.liked_user_id,
                format_datetime(like.created_at),
            ],
        )?;
        Ok(rows > 0)
    }

    pub fn delete_like(&self, thread_id: &str, user_id: &str) -> StoreResult<bool> {
        let conn = self.conn()?;
        let rows = conn.execute(
            "DELETE FROM likes WHERE thread_id = ?1 AND user_id = ?2",
            params![thread_id, user_id],
        )?;
        Ok(rows > 0)
    }

    /// Likes on any of `thread_ids` placed by someone other than
    /// `exclude_liker`, ordered like [`Store::replies_to`].
    pub fn likes_on(
        &self,
        thread_ids: &[String],
        exclude_liker: &str,
        window: TimeWindow,
        limit: Option<usize>,
    ) -> StoreResult<Vec<Like>> {
        let conn = self.conn()?;
        let mut likes = Vec::new();
        for chunk in thread_ids.chunks(MAX_IN_PARAMS) {
            let mut values: Vec<String> = chunk.to_vec();
            values.push(exclude_liker.to_string());
            let sql = format!(
                r#"SELECT * FROM likes WHERE thread_id IN ({}) AND user_id != ?{}
                   ORDER BY created_at DESC, rowid ASC{}"#,
                placeholders(chunk.len()),
                window.sql("created_at", &mut values),
                limit_sql(limit)
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params_from_iter(values.iter()), row_to_like)?;
            for row in rows {
                likes.push(row?);
            }
        }
        Ok(likes)
    }

    pub fn count_likes_on(
        &self,
        thread_ids: &[String],
        exclude_liker: &str,
        window: TimeWindow,
    ) -> StoreResult<i64> {
        let conn = self.conn()?;
        let mut total = 0;
        for chunk in thread_ids.chunks(MAX_IN_PARAMS) {
            let mut values: Vec<String> = chunk.to_vec();
            values.push(exclude_liker.to_string());
            let sql = format!(
                "SELECT COUNT(*) FROM likes WHERE thread_id IN ({}) AND user_id != ?{}",
                placeholders(chunk.len()),
                window.sql("created_at", &mut values)
            );
            let count: i64 =
                conn.query_row(&sql, params_from_iter(values.iter()), |row| row.get(0))?;
            total += count;
        }
        Ok(total)
    }

    // ==================== Community Operations ====================

    pub fn create_community(&self, community: &Community) -> StoreResult<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO communities (id, name, image, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![
                &community.id,
                &community.name,
                &community.image,
                format_datetime(community.created_at),
            ],
        )?;
        Ok(())
    }

    pub fn get_community(&self, id: &str) -> StoreResult<Community> {
        let conn = self.conn()?;
        conn.query_row(
            "SELECT * FROM communities WHERE id = ?1",
            params![id],
            |row| {
                Ok(Community {
                    id: row.get("id")?,
                    name: row.get("name")?,
                    image: row.get("image")?,
                    created_at: parse_datetime(row.get::<_, String>("created_at")?),
                })
            },
        )
        .optional()?
        .ok_or_else(|| StoreError::NotFound(format!("Community {}", id)))
    }

    /// Returns false if the user was already a member.
    pub fn add_community_member(
        &self,
        community_id: &str,
        user_id: &str,
        at: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let conn = self.conn()?;
        let rows = conn.execute(
            r#"INSERT OR IGNORE INTO community_members (community_id, user_id, joined_at)
               VALUES (?1, ?2, ?3)"#,
            params![community_id, user_id, format_datetime(at)],
        )?;
        Ok(rows > 0)
    }

    #[cfg(test)]
    pub(crate) fn execute_raw(&self, sql: &str) -> StoreResult<usize> {
        let conn = self.conn()?;
        Ok(conn.execute(sql, [])?)
    }
}

fn hydrate_thread(conn: &Connection, thread: &mut Thread) -> StoreResult<()> {
    thread.children = query_ids(
        conn,
        "SELECT id FROM threads WHERE parent_id = ?1 ORDER BY created_at ASC",
        &thread.id,
    )?;
    thread.likes = query_ids(
        conn,
        "SELECT id FROM likes WHERE thread_id = ?1 ORDER BY created_at ASC",
        &thread.id,
    )?;
    Ok(())
}

fn query_ids(conn: &Connection, sql: &str, key: &str) -> StoreResult<Vec<String>> {
    let mut stmt = conn.prepare(sql)?;
    let ids = stmt
        .query_map(params![key], |row| row.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(ids)
}

fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

fn limit_sql(limit: Option<usize>) -> String {
    limit.map(|n| format!(" LIMIT {}", n)).unwrap_or_default()
}

fn row_to_user(row: &rusqlite::Row) -> rusqlite::Result<User> {
    let last_viewed: Option<String> = row.get("last_viewed")?;
    Ok(User {
        id: row.get("id")?,
        username: row.get("username")?,
        name: row.get("name")?,
        bio: row.get("bio")?,
        image: row.get("image")?,
        onboarded: row.get("onboarded")?,
        last_viewed: last_viewed.map(parse_datetime),
        created_at: parse_datetime(row.get::<_, String>("created_at")?),
        updated_at: parse_datetime(row.get::<_, String>("updated_at")?),
        threads: Vec::new(),
        liked_threads: Vec::new(),
        communities: Vec::new(),
    })
}

fn row_to_summary(row: &rusqlite::Row) -> rusqlite::Result<UserSummary> {
    Ok(UserSummary {
        id: row.get("id")?,
        username: row.get("username")?,
        name: row.get("name")?,
        image: row.get("image")?,
    })
}

fn row_to_thread(row: &rusqlite::Row) -> rusqlite::Result<Thread> {
    Ok(Thread {
        id: row.get("id")?,
        text: row.get("text")?,
        author_id: row.get("author_id")?,
        image: row.get("image")?,
        parent_id: row.get("parent_id")?,
        community_id: row.get("community_id")?,
        created_at: parse_datetime(row.get::<_, String>("created_at")?),
        children: Vec::new(),
        likes: Vec::new(),
    })
}

fn row_to_like(row: &rusqlite::Row) -> rusqlite::Result<Like> {
    Ok(Like {
        id: row.get("id")?,
        thread_id: row.get("thread_id")?,
        user_id: row.get("user_id")?,
        liked_user_id: row.get("liked_user_id")?,
        created_at: parse_datetime(row.get::<_, String>("created_at")?),
    })
}

/// Fixed-width RFC 3339 so that text comparison in SQL matches time order.
pub fn format_datetime(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_datetime(s: String) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(&s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}
