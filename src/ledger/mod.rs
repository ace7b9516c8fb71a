//! Durable per-file ownership ledger (SQLite).

mod schema;

pub use schema::{DeployedFile, FileChecksum, InstalledMod, LinkMethodCode};

use crate::error::Result;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::Mutex;

pub struct Ledger {
    conn: Mutex<Connection>,
}

impl Ledger {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        let ledger = Self {
            conn: Mutex::new(conn),
        };
        ledger.init_schema()?;
        Ok(ledger)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let ledger = Self {
            conn: Mutex::new(conn),
        };
        ledger.init_schema()?;
        Ok(ledger)
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS deployed_files (
                game TEXT NOT NULL,
                profile TEXT NOT NULL,
                relative_path TEXT NOT NULL,
                source TEXT NOT NULL,
                mod_id TEXT NOT NULL,
                link_method TEXT NOT NULL,
                PRIMARY KEY (game, profile, relative_path)
            );
            CREATE INDEX IF NOT EXISTS idx_deployed_files_owner
                ON deployed_files (game, profile, source, mod_id);

            CREATE TABLE IF NOT EXISTS installed_mods (
                game TEXT NOT NULL,
                profile TEXT NOT NULL,
                source TEXT NOT NULL,
                mod_id TEXT NOT NULL,
                version TEXT NOT NULL,
                enabled INTEGER NOT NULL DEFAULT 0,
                deployed INTEGER NOT NULL DEFAULT 0,
                link_method TEXT NOT NULL DEFAULT 'symlink',
                file_ids TEXT NOT NULL DEFAULT '',
                previous_version TEXT,
                PRIMARY KEY (game, profile, source, mod_id)
            );

            CREATE TABLE IF NOT EXISTS file_checksums (
                game TEXT NOT NULL,
                profile TEXT NOT NULL,
                source TEXT NOT NULL,
                mod_id TEXT NOT NULL,
                file_id TEXT NOT NULL,
                checksum TEXT NOT NULL,
                PRIMARY KEY (game, profile, source, mod_id, file_id)
            );

            CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL);
            "#,
        )?;

        let version: i64 = conn
            .query_row("SELECT version FROM schema_version LIMIT 1", [], |r| r.get(0))
            .optional()?
            .unwrap_or(0);
        if version == 0 {
            conn.execute("INSERT INTO schema_version (version) VALUES (1)", [])?;
        }
        Ok(())
    }

    // ---------- ownership ----------

    pub fn get_owner(&self, game: &str, profile: &str, relative_path: &str) -> Result<Option<(String, String)>> {
        let conn = self.conn.lock().unwrap();
        get_owner_conn(&conn, game, profile, relative_path)
    }

    pub fn set_owner(
        &self,
        game: &str,
        profile: &str,
        relative_path: &str,
        source: &str,
        mod_id: &str,
        link_method: LinkMethodCode,
    ) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        set_owner_conn(&conn, game, profile, relative_path, source, mod_id, link_method)
    }

    pub fn delete_owner(&self, game: &str, profile: &str, relative_path: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "DELETE FROM deployed_files WHERE game = ?1 AND profile = ?2 AND relative_path = ?3",
            params![game, profile, relative_path],
        )?;
        Ok(())
    }

    pub fn get_files_for_mod(&self, game: &str, profile: &str, source: &str, mod_id: &str) -> Result<Vec<String>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT relative_path FROM deployed_files
             WHERE game = ?1 AND profile = ?2 AND source = ?3 AND mod_id = ?4
             ORDER BY relative_path",
        )?;
        let rows = stmt
            .query_map(params![game, profile, source, mod_id], |r| r.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    pub fn get_files_for_profile(&self, game: &str, profile: &str) -> Result<Vec<DeployedFile>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT game, profile, relative_path, source, mod_id, link_method FROM deployed_files
             WHERE game = ?1 AND profile = ?2 ORDER BY relative_path",
        )?;
        let rows = stmt
            .query_map(params![game, profile], DeployedFile::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    pub fn delete_files_for_mod(&self, game: &str, profile: &str, source: &str, mod_id: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "DELETE FROM deployed_files WHERE game = ?1 AND profile = ?2 AND source = ?3 AND mod_id = ?4",
            params![game, profile, source, mod_id],
        )?;
        Ok(())
    }

    // ---------- installed mods ----------

    pub fn get_installed_mod(&self, game: &str, profile: &str, source: &str, mod_id: &str) -> Result<Option<InstalledMod>> {
        let conn = self.conn.lock().unwrap();
        get_installed_mod_conn(&conn, game, profile, source, mod_id)
    }

    pub fn list_installed_mods(&self, game: &str, profile: &str) -> Result<Vec<InstalledMod>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT game, profile, source, mod_id, version, enabled, deployed, link_method, file_ids, previous_version
             FROM installed_mods WHERE game = ?1 AND profile = ?2 ORDER BY source, mod_id",
        )?;
        let rows = stmt
            .query_map(params![game, profile], InstalledMod::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    pub fn list_enabled_mods(&self, game: &str, profile: &str) -> Result<Vec<InstalledMod>> {
        Ok(self
            .list_installed_mods(game, profile)?
            .into_iter()
            .filter(|m| m.enabled)
            .collect())
    }

    pub fn upsert_installed_mod(&self, m: &InstalledMod) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        upsert_installed_mod_conn(&conn, m)
    }

    pub fn delete_installed_mod(&self, game: &str, profile: &str, source: &str, mod_id: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "DELETE FROM installed_mods WHERE game = ?1 AND profile = ?2 AND source = ?3 AND mod_id = ?4",
            params![game, profile, source, mod_id],
        )?;
        Ok(())
    }

    // ---------- checksums ----------

    pub fn get_checksum(&self, game: &str, profile: &str, source: &str, mod_id: &str, file_id: &str) -> Result<Option<String>> {
        let conn = self.conn.lock().unwrap();
        let row = conn
            .query_row(
                "SELECT checksum FROM file_checksums WHERE game=?1 AND profile=?2 AND source=?3 AND mod_id=?4 AND file_id=?5",
                params![game, profile, source, mod_id, file_id],
                |r| r.get::<_, String>(0),
            )
            .optional()?;
        Ok(row)
    }

    pub fn save_checksum(&self, c: &FileChecksum) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO file_checksums (game, profile, source, mod_id, file_id, checksum)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(game, profile, source, mod_id, file_id) DO UPDATE SET checksum = excluded.checksum",
            params![c.game, c.profile, c.source, c.mod_id, c.file_id, c.checksum],
        )?;
        Ok(())
    }

    /// Runs `f` inside a SQLite transaction; the transaction commits only if
    /// `f` returns `Ok`. Holds the connection mutex for the duration, so
    /// `f` must use the `*_tx` free functions below (or the `tx` it is
    /// given directly) rather than calling back into `Ledger`'s own
    /// locking methods, which would deadlock against this same mutex.
    pub fn with_transaction<T>(&self, f: impl FnOnce(&rusqlite::Transaction) -> Result<T>) -> Result<T> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        let result = f(&tx)?;
        tx.commit()?;
        Ok(result)
    }
}

/// Transaction-scoped ownership/installed-mod operations, for use inside a
/// `with_transaction` closure where `Ledger`'s own locking methods would
/// deadlock.
pub fn get_owner_tx(tx: &rusqlite::Transaction, game: &str, profile: &str, relative_path: &str) -> Result<Option<(String, String)>> {
    get_owner_conn(tx, game, profile, relative_path)
}

pub fn set_owner_tx(
    tx: &rusqlite::Transaction,
    game: &str,
    profile: &str,
    relative_path: &str,
    source: &str,
    mod_id: &str,
    link_method: LinkMethodCode,
) -> Result<()> {
    set_owner_conn(tx, game, profile, relative_path, source, mod_id, link_method)
}

pub fn get_installed_mod_tx(tx: &rusqlite::Transaction, game: &str, profile: &str, source: &str, mod_id: &str) -> Result<Option<InstalledMod>> {
    get_installed_mod_conn(tx, game, profile, source, mod_id)
}

pub fn upsert_installed_mod_tx(tx: &rusqlite::Transaction, m: &InstalledMod) -> Result<()> {
    upsert_installed_mod_conn(tx, m)
}

fn get_owner_conn(conn: &Connection, game: &str, profile: &str, relative_path: &str) -> Result<Option<(String, String)>> {
    let row = conn
        .query_row(
            "SELECT source, mod_id FROM deployed_files WHERE game = ?1 AND profile = ?2 AND relative_path = ?3",
            params![game, profile, relative_path],
            |r| Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?)),
        )
        .optional()?;
    Ok(row)
}

fn set_owner_conn(
    conn: &Connection,
    game: &str,
    profile: &str,
    relative_path: &str,
    source: &str,
    mod_id: &str,
    link_method: LinkMethodCode,
) -> Result<()> {
    conn.execute(
        "INSERT INTO deployed_files (game, profile, relative_path, source, mod_id, link_method)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)
         ON CONFLICT(game, profile, relative_path) DO UPDATE SET
            source = excluded.source, mod_id = excluded.mod_id, link_method = excluded.link_method",
        params![game, profile, relative_path, source, mod_id, link_method.as_str()],
    )?;
    Ok(())
}

fn get_installed_mod_conn(conn: &Connection, game: &str, profile: &str, source: &str, mod_id: &str) -> Result<Option<InstalledMod>> {
    let row = conn
        .query_row(
            "SELECT game, profile, source, mod_id, version, enabled, deployed, link_method, file_ids, previous_version
             FROM installed_mods WHERE game = ?1 AND profile = ?2 AND source = ?3 AND mod_id = ?4",
            params![game, profile, source, mod_id],
            InstalledMod::from_row,
        )
        .optional()?;
    Ok(row)
}

fn upsert_installed_mod_conn(conn: &Connection, m: &InstalledMod) -> Result<()> {
    conn.execute(
        "INSERT INTO installed_mods (game, profile, source, mod_id, version, enabled, deployed, link_method, file_ids, previous_version)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
         ON CONFLICT(game, profile, source, mod_id) DO UPDATE SET
            version = excluded.version, enabled = excluded.enabled, deployed = excluded.deployed,
            link_method = excluded.link_method, file_ids = excluded.file_ids,
            previous_version = excluded.previous_version",
        params![
            m.game,
            m.profile,
            m.source,
            m.mod_id,
            m.version,
            m.enabled as i64,
            m.deployed as i64,
            m.link_method.as_str(),
            m.file_ids.join(","),
            m.previous_version,
        ],
    )?;
    Ok(())
}
