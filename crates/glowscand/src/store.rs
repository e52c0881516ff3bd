//! SQLite persistence for accounts and scan history.

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};
use serde::Serialize;
use std::path::Path;
use thiserror::Error;
use tokio_rusqlite::Connection;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] tokio_rusqlite::Error),
    #[error("failed to create database directory: {0}")]
    Io(#[from] std::io::Error),
    #[error("username already taken: {0}")]
    DuplicateUser(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Admin,
}

impl Role {
    fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Admin => "admin",
        }
    }

    fn parse(s: &str) -> Self {
        if s == "admin" {
            Self::Admin
        } else {
            Self::User
        }
    }
}

/// A stored account, including its password hash.
#[derive(Debug, Clone)]
pub struct UserRecord {
    pub id: i64,
    pub username: String,
    pub password_hash: String,
    pub role: Role,
}

/// Account listing without credentials.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UserSummary {
    pub id: i64,
    pub username: String,
    pub role: Role,
}

/// One captured analysis.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SnapshotRecord {
    pub id: i64,
    pub username: String,
    pub result: String,
    pub created_at: DateTime<Utc>,
}

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS users (
    id            INTEGER PRIMARY KEY AUTOINCREMENT,
    username      TEXT NOT NULL UNIQUE,
    password_hash TEXT NOT NULL,
    role          TEXT NOT NULL DEFAULT 'user'
);
CREATE TABLE IF NOT EXISTS history (
    id         INTEGER PRIMARY KEY AUTOINCREMENT,
    username   TEXT NOT NULL,
    result     TEXT NOT NULL,
    created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_history_username ON history(username);
";

/// Async handle to the database; cheap to clone.
#[derive(Clone)]
pub struct Store {
    conn: Connection,
}

impl Store {
    /// Open (creating if needed) the database file and apply the schema.
    pub async fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path).await?;
        let store = Self { conn };
        store.migrate().await?;
        tracing::info!(path = %path.display(), "database opened");
        Ok(store)
    }

    #[cfg(test)]
    pub async fn open_in_memory() -> Result<Self, StoreError> {
        let store = Self {
            conn: Connection::open_in_memory().await?,
        };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> Result<(), StoreError> {
        self.conn
            .call(|conn| {
                conn.execute_batch(SCHEMA)?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    /// Insert a new account. Fails with [`StoreError::DuplicateUser`] if the name exists.
    pub async fn create_user(
        &self,
        username: &str,
        password_hash: &str,
        role: Role,
    ) -> Result<i64, StoreError> {
        let name = username.to_string();
        let hash = password_hash.to_string();
        let inserted = self
            .conn
            .call(move |conn| {
                match conn.execute(
                    "INSERT INTO users (username, password_hash, role) VALUES (?1, ?2, ?3)",
                    params![name, hash, role.as_str()],
                ) {
                    Ok(_) => Ok(Some(conn.last_insert_rowid())),
                    Err(rusqlite::Error::SqliteFailure(e, _))
                        if e.code == rusqlite::ErrorCode::ConstraintViolation =>
                    {
                        Ok(None)
                    }
                    Err(e) => Err(e.into()),
                }
            })
            .await?;
        inserted.ok_or_else(|| StoreError::DuplicateUser(username.to_string()))
    }

    /// Replace any existing account with this name by a fresh admin account.
    pub async fn reset_admin(&self, username: &str, password_hash: &str) -> Result<i64, StoreError> {
        let name = username.to_string();
        let hash = password_hash.to_string();
        let id = self
            .conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                tx.execute("DELETE FROM users WHERE username = ?1", params![name])?;
                tx.execute(
                    "INSERT INTO users (username, password_hash, role) VALUES (?1, ?2, 'admin')",
                    params![name, hash],
                )?;
                let id = tx.last_insert_rowid();
                tx.commit()?;
                Ok(id)
            })
            .await?;
        Ok(id)
    }

    pub async fn find_user(&self, username: &str) -> Result<Option<UserRecord>, StoreError> {
        let name = username.to_string();
        let user = self
            .conn
            .call(move |conn| {
                let user = conn
                    .query_row(
                        "SELECT id, username, password_hash, role FROM users WHERE username = ?1",
                        params![name],
                        |row| {
                            Ok(UserRecord {
                                id: row.get(0)?,
                                username: row.get(1)?,
                                password_hash: row.get(2)?,
                                role: Role::parse(&row.get::<_, String>(3)?),
                            })
                        },
                    )
                    .optional()?;
                Ok(user)
            })
            .await?;
        Ok(user)
    }

    pub async fn list_users(&self) -> Result<Vec<UserSummary>, StoreError> {
        let users = self
            .conn
            .call(|conn| {
                let mut stmt = conn.prepare("SELECT id, username, role FROM users ORDER BY id")?;
                let rows = stmt.query_map([], |row| {
                    Ok(UserSummary {
                        id: row.get(0)?,
                        username: row.get(1)?,
                        role: Role::parse(&row.get::<_, String>(2)?),
                    })
                })?;
                let collected = rows.collect::<Result<Vec<_>, _>>()?;
                Ok(collected)
            })
            .await?;
        Ok(users)
    }

    /// Delete a non-admin account, returning its username if a row was removed.
    pub async fn delete_user(&self, id: i64) -> Result<Option<String>, StoreError> {
        let removed = self
            .conn
            .call(move |conn| {
                Ok(conn
                    .query_row(
                        "DELETE FROM users WHERE id = ?1 AND role != 'admin' RETURNING username",
                        params![id],
                        |row| row.get::<_, String>(0),
                    )
                    .optional()?)
            })
            .await?;
        Ok(removed)
    }

    /// Record a captured result for `username`, timestamped now.
    pub async fn append_history(&self, username: &str, result: &str) -> Result<SnapshotRecord, StoreError> {
        let record = SnapshotRecord {
            id: 0,
            username: username.to_string(),
            result: result.to_string(),
            created_at: Utc::now(),
        };
        let id = {
            let record = record.clone();
            self.conn
                .call(move |conn| {
                    conn.execute(
                        "INSERT INTO history (username, result, created_at) VALUES (?1, ?2, ?3)",
                        params![record.username, record.result, record.created_at],
                    )?;
                    Ok(conn.last_insert_rowid())
                })
                .await?
        };
        Ok(SnapshotRecord { id, ..record })
    }

    /// History for one user, newest first.
    pub async fn history_for(&self, username: &str) -> Result<Vec<SnapshotRecord>, StoreError> {
        self.query_history(Some(username.to_string())).await
    }

    /// History for all users, newest first.
    pub async fn all_history(&self) -> Result<Vec<SnapshotRecord>, StoreError> {
        self.query_history(None).await
    }

    async fn query_history(&self, username: Option<String>) -> Result<Vec<SnapshotRecord>, StoreError> {
        let records = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, username, result, created_at FROM history
                     WHERE ?1 IS NULL OR username = ?1
                     ORDER BY created_at DESC, id DESC",
                )?;
                let rows = stmt.query_map(params![username], |row| {
                    Ok(SnapshotRecord {
                        id: row.get(0)?,
                        username: row.get(1)?,
                        result: row.get(2)?,
                        created_at: row.get(3)?,
                    })
                })?;
                let collected = rows.collect::<Result<Vec<_>, _>>()?;
                Ok(collected)
            })
            .await?;
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_create_and_find_user() {
        let store = Store::open_in_memory().await.unwrap();
        let id = store.create_user("ana", "hash", Role::User).await.unwrap();

        let user = store.find_user("ana").await.unwrap().unwrap();
        assert_eq!(user.id, id);
        assert_eq!(user.password_hash, "hash");
        assert_eq!(user.role, Role::User);
        assert!(store.find_user("bob").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_duplicate_username_rejected() {
        let store = Store::open_in_memory().await.unwrap();
        store.create_user("ana", "h1", Role::User).await.unwrap();
        let err = store.create_user("ana", "h2", Role::User).await.unwrap_err();
        assert!(matches!(err, StoreError::DuplicateUser(ref name) if name == "ana"));
    }

    #[tokio::test]
    async fn test_reset_admin_replaces_account() {
        let store = Store::open_in_memory().await.unwrap();
        store.create_user("admin", "old", Role::User).await.unwrap();
        store.reset_admin("admin", "new").await.unwrap();

        let admin = store.find_user("admin").await.unwrap().unwrap();
        assert_eq!(admin.role, Role::Admin);
        assert_eq!(admin.password_hash, "new");
        assert_eq!(store.list_users().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_delete_user_spares_admins() {
        let store = Store::open_in_memory().await.unwrap();
        let admin = store.reset_admin("admin", "h").await.unwrap();
        let user = store.create_user("ana", "h", Role::User).await.unwrap();

        assert_eq!(store.delete_user(admin).await.unwrap(), None);
        assert_eq!(store.delete_user(user).await.unwrap().as_deref(), Some("ana"));
        assert_eq!(store.delete_user(user).await.unwrap(), None, "already gone");

        let names: Vec<_> = store.list_users().await.unwrap().into_iter().map(|u| u.username).collect();
        assert_eq!(names, vec!["admin"]);
    }

    #[tokio::test]
    async fn test_history_newest_first_per_user() {
        let store = Store::open_in_memory().await.unwrap();
        store.append_history("ana", "first").await.unwrap();
        store.append_history("bob", "other").await.unwrap();
        let last = store.append_history("ana", "second").await.unwrap();
        assert!(last.id > 0);

        let mine: Vec<_> = store.history_for("ana").await.unwrap().into_iter().map(|r| r.result).collect();
        assert_eq!(mine, vec!["second", "first"]);

        let all = store.all_history().await.unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all[0].id, last.id);
        assert_eq!(all[0].username, "ana");
    }

    #[tokio::test]
    async fn test_open_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/data/glowscan.db");
        let store = Store::open(&path).await.unwrap();
        store.create_user("ana", "h", Role::User).await.unwrap();
        drop(store);

        let reopened = Store::open(&path).await.unwrap();
        assert!(reopened.find_user("ana").await.unwrap().is_some());
    }
}
