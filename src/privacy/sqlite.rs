//! `SQLite` storage for privacy profiles.
//!
//! Two tables back the store:
//!
//! - `privacy_profiles`: one row per registered owner with their mode.
//! - `pair_records`: one row per `(owner, target)` with the three flags,
//!   indexed by target for "who added me" scans.
//!
//! Write batches run inside a single transaction. Foreign keys are
//! enforced, so a pair record cannot outlive its owner's profile.
//!
//! All owners share one connection, so calls for different owners
//! serialize here. Use [`MemoryStore`](super::MemoryStore) when owners must
//! not wait on each other.

// SQLite operations need to hold the lock for the duration of the operation.
// Dropping the guard earlier would require restructuring all methods.
#![allow(clippy::significant_drop_tightening)]

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use rusqlite::{params, Connection, OptionalExtension, Row, Transaction};

use super::error::{PrivacyError, Result};
use super::store::{PairView, PrivacyStore, ProfileSnapshot, ProfileWrite};
use super::types::{PairFlags, PairRecord, PrivacyMode, PrivacyProfile};
use crate::identity::IdentityKey;

/// `SQLite`-based privacy store.
///
/// Thread-safe wrapper around a single `SQLite` connection.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Creates a new storage instance at the given path.
    ///
    /// Creates the database file and tables if they don't exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be created or initialized.
    pub fn new(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        let storage = Self {
            conn: Mutex::new(conn),
        };
        storage.initialize_schema()?;
        Ok(storage)
    }

    /// Creates an in-memory storage instance for testing.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be initialized.
    #[cfg(any(test, feature = "test-utils"))]
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let storage = Self {
            conn: Mutex::new(conn),
        };
        storage.initialize_schema()?;
        Ok(storage)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| PrivacyError::lock_poisoned("database", e))
    }

    /// Initializes the database schema.
    fn initialize_schema(&self) -> Result<()> {
        let conn = self.lock()?;

        conn.execute_batch(
            r"
            PRAGMA foreign_keys = ON;

            -- One row per registered owner
            CREATE TABLE IF NOT EXISTS privacy_profiles (
                owner TEXT PRIMARY KEY,
                mode TEXT NOT NULL DEFAULT 'permit_all',
                registered_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            );

            -- Buddy / permit / deny flags per (owner, target)
            CREATE TABLE IF NOT EXISTS pair_records (
                owner TEXT NOT NULL,
                target TEXT NOT NULL,
                is_buddy INTEGER NOT NULL DEFAULT 0,
                is_permitted INTEGER NOT NULL DEFAULT 0,
                is_denied INTEGER NOT NULL DEFAULT 0,
                PRIMARY KEY (owner, target),
                FOREIGN KEY (owner) REFERENCES privacy_profiles(owner)
            );

            CREATE INDEX IF NOT EXISTS idx_pair_records_target ON pair_records(target);
            ",
        )?;

        Ok(())
    }

    fn read_mode(conn: &Connection, owner: &IdentityKey) -> Result<Option<PrivacyMode>> {
        let mode: Option<String> = conn
            .query_row(
                "SELECT mode FROM privacy_profiles WHERE owner = ?1",
                params![owner.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        mode.map(|s| parse_mode(&s)).transpose()
    }

    fn read_pair(
        conn: &Connection,
        owner: &IdentityKey,
        target: &IdentityKey,
    ) -> Result<Option<PairFlags>> {
        let flags = conn
            .query_row(
                r"
                SELECT is_buddy, is_permitted, is_denied
                FROM pair_records
                WHERE owner = ?1 AND target = ?2
                ",
                params![owner.as_str(), target.as_str()],
                flags_from_row,
            )
            .optional()?;
        Ok(flags)
    }

    fn apply_write(tx: &Transaction<'_>, owner: &IdentityKey, write: &ProfileWrite) -> Result<()> {
        match write {
            ProfileWrite::SetFlag {
                target,
                flag,
                value: true,
            } => {
                // Column names come from a closed enum, never from input.
                let column = flag.as_str();
                tx.execute(
                    &format!(
                        r"
                        INSERT INTO pair_records (owner, target, {column})
                        VALUES (?1, ?2, 1)
                        ON CONFLICT(owner, target) DO UPDATE SET {column} = 1
                        "
                    ),
                    params![owner.as_str(), target.as_str()],
                )?;
            }
            ProfileWrite::SetFlag {
                target,
                flag,
                value: false,
            } => {
                let column = flag.as_str();
                let rows = tx.execute(
                    &format!("UPDATE pair_records SET {column} = 0 WHERE owner = ?1 AND target = ?2"),
                    params![owner.as_str(), target.as_str()],
                )?;
                if rows == 0 {
                    return Err(PrivacyError::PairNotFound {
                        owner: owner.clone(),
                        target: target.clone(),
                    });
                }
            }
            ProfileWrite::SetMode(mode) => {
                tx.execute(
                    "UPDATE privacy_profiles SET mode = ?1 WHERE owner = ?2",
                    params![mode.as_str(), owner.as_str()],
                )?;
            }
            ProfileWrite::ClearOverrides => {
                tx.execute(
                    "UPDATE pair_records SET is_permitted = 0, is_denied = 0 WHERE owner = ?1",
                    params![owner.as_str()],
                )?;
            }
            ProfileWrite::PruneEmpty => {
                tx.execute(
                    r"
                    DELETE FROM pair_records
                    WHERE owner = ?1 AND is_buddy = 0 AND is_permitted = 0 AND is_denied = 0
                    ",
                    params![owner.as_str()],
                )?;
            }
        }
        Ok(())
    }
}

fn parse_mode(s: &str) -> Result<PrivacyMode> {
    PrivacyMode::parse(s).ok_or_else(|| PrivacyError::InvalidData(format!("Invalid mode: {s}")))
}

fn flags_from_row(row: &Row<'_>) -> rusqlite::Result<PairFlags> {
    Ok(PairFlags {
        is_buddy: row.get(0)?,
        is_permitted: row.get(1)?,
        is_denied: row.get(2)?,
    })
}

impl PrivacyStore for SqliteStore {
    fn registration_exists(&self, owner: &IdentityKey) -> Result<bool> {
        let conn = self.lock()?;
        Ok(Self::read_mode(&conn, owner)?.is_some())
    }

    fn register(&self, owner: &IdentityKey, at: i64) -> Result<()> {
        let conn = self.lock()?;

        let rows = conn.execute(
            r"
            INSERT INTO privacy_profiles (owner, mode, registered_at, updated_at)
            VALUES (?1, ?2, ?3, ?3)
            ON CONFLICT(owner) DO NOTHING
            ",
            params![owner.as_str(), PrivacyMode::PermitAll.as_str(), at],
        )?;

        if rows == 0 {
            return Err(PrivacyError::AlreadyExists(owner.clone()));
        }

        Ok(())
    }

    fn unregister(&self, owner: &IdentityKey) -> Result<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        // Delete in order respecting foreign key constraints
        tx.execute(
            "DELETE FROM pair_records WHERE owner = ?1",
            params![owner.as_str()],
        )?;
        let rows = tx.execute(
            "DELETE FROM privacy_profiles WHERE owner = ?1",
            params![owner.as_str()],
        )?;

        if rows == 0 {
            return Err(PrivacyError::UserNotFound(owner.clone()));
        }

        tx.commit()?;
        Ok(())
    }

    fn clear_all(&self) -> Result<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM pair_records", [])?;
        tx.execute("DELETE FROM privacy_profiles", [])?;
        tx.commit()?;
        Ok(())
    }

    fn profile(&self, owner: &IdentityKey) -> Result<Option<PrivacyProfile>> {
        let conn = self.lock()?;

        let result = conn
            .query_row(
                r"
                SELECT mode, registered_at, updated_at
                FROM privacy_profiles
                WHERE owner = ?1
                ",
                params![owner.as_str()],
                |row| {
                    let mode: String = row.get(0)?;
                    let registered_at: i64 = row.get(1)?;
                    let updated_at: i64 = row.get(2)?;
                    Ok((mode, registered_at, updated_at))
                },
            )
            .optional()?;

        match result {
            Some((mode, registered_at, updated_at)) => Ok(Some(PrivacyProfile {
                owner: owner.clone(),
                mode: parse_mode(&mode)?,
                registered_at,
                updated_at,
            })),
            None => Ok(None),
        }
    }

    fn pair(&self, owner: &IdentityKey, target: &IdentityKey) -> Result<Option<PairFlags>> {
        let conn = self.lock()?;
        Self::read_pair(&conn, owner, target)
    }

    fn pair_view(&self, owner: &IdentityKey, target: &IdentityKey) -> Result<PairView> {
        let conn = self.lock()?;
        let Some(mode) = Self::read_mode(&conn, owner)? else {
            return Ok(PairView::default());
        };
        let flags = Self::read_pair(&conn, owner, target)?.unwrap_or_default();
        Ok(PairView { mode, flags })
    }

    fn snapshot(&self, owner: &IdentityKey) -> Result<ProfileSnapshot> {
        let conn = self.lock()?;
        let Some(mode) = Self::read_mode(&conn, owner)? else {
            return Ok(ProfileSnapshot::unregistered(owner.clone()));
        };

        let mut stmt = conn.prepare(
            r"
            SELECT target, is_buddy, is_permitted, is_denied
            FROM pair_records
            WHERE owner = ?1
            ",
        )?;

        let records = stmt
            .query_map(params![owner.as_str()], |row| {
                let target: String = row.get(0)?;
                let flags = PairFlags {
                    is_buddy: row.get(1)?,
                    is_permitted: row.get(2)?,
                    is_denied: row.get(3)?,
                };
                Ok((IdentityKey::from(target), flags))
            })?
            .collect::<std::result::Result<BTreeMap<_, _>, _>>()?;

        Ok(ProfileSnapshot {
            owner: owner.clone(),
            registered: true,
            mode,
            records,
        })
    }

    fn pairs_owned_by(&self, owner: &IdentityKey) -> Result<Vec<PairRecord>> {
        let conn = self.lock()?;

        let mut stmt = conn.prepare(
            r"
            SELECT target, is_buddy, is_permitted, is_denied
            FROM pair_records
            WHERE owner = ?1
            ORDER BY target
            ",
        )?;

        let records = stmt
            .query_map(params![owner.as_str()], |row| {
                let target: String = row.get(0)?;
                Ok(PairRecord {
                    owner: owner.clone(),
                    target: IdentityKey::from(target),
                    flags: PairFlags {
                        is_buddy: row.get(1)?,
                        is_permitted: row.get(2)?,
                        is_denied: row.get(3)?,
                    },
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(records)
    }

    fn pairs_targeting(&self, target: &IdentityKey) -> Result<Vec<PairRecord>> {
        let conn = self.lock()?;

        let mut stmt = conn.prepare(
            r"
            SELECT owner, is_buddy, is_permitted, is_denied
            FROM pair_records
            WHERE target = ?1
            ORDER BY owner
            ",
        )?;

        let records = stmt
            .query_map(params![target.as_str()], |row| {
                let owner: String = row.get(0)?;
                Ok(PairRecord {
                    owner: IdentityKey::from(owner),
                    target: target.clone(),
                    flags: PairFlags {
                        is_buddy: row.get(1)?,
                        is_permitted: row.get(2)?,
                        is_denied: row.get(3)?,
                    },
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(records)
    }

    fn apply(&self, owner: &IdentityKey, writes: &[ProfileWrite], at: i64) -> Result<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        let rows = tx.execute(
            "UPDATE privacy_profiles SET updated_at = ?1 WHERE owner = ?2",
            params![at, owner.as_str()],
        )?;
        if rows == 0 {
            return Err(PrivacyError::UserNotFound(owner.clone()));
        }

        for write in writes {
            Self::apply_write(&tx, owner, write)?;
        }

        tx.commit()?;
        Ok(())
    }
}
