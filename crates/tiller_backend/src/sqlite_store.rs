use anyhow::{Context as _, anyhow};
use rusqlite::{Connection, OptionalExtension as _, params};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tiller_domain::{ImportableSession, PersistedState, PersistedWorkspace, engine_of_id};

const SELECTED_ENGINE_KEY: &str = "selected_engine";
const WORKSPACE_SPEC_ROOT_PREFIX: &str = "workspace_spec_root_";

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS settings (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS workspaces (
    id INTEGER PRIMARY KEY,
    name TEXT NOT NULL,
    root_path TEXT NOT NULL UNIQUE
);
CREATE TABLE IF NOT EXISTS threads (
    workspace_id INTEGER NOT NULL,
    thread_id TEXT NOT NULL,
    custom_name TEXT,
    pinned_at_ms INTEGER,
    last_activity_ms INTEGER,
    title TEXT,
    PRIMARY KEY (workspace_id, thread_id)
);
CREATE TABLE IF NOT EXISTS approval_prefixes (
    workspace_id INTEGER NOT NULL,
    prefix_json TEXT NOT NULL,
    UNIQUE (workspace_id, prefix_json)
);
";

/// The persistence collaborator: thread decorations, approval allow-lists,
/// and workspace registration. Everything is keyed by
/// `(workspace_id, thread_id)` and renames rewrite keys, never re-derive.
pub struct SqliteStore {
    connection: Mutex<Connection>,
}

impl SqliteStore {
    pub fn open(path: PathBuf) -> anyhow::Result<Self> {
        let connection = Connection::open(&path)
            .with_context(|| format!("failed to open {}", path.display()))?;
        connection
            .execute_batch(SCHEMA)
            .context("failed to apply schema")?;
        Ok(Self {
            connection: Mutex::new(connection),
        })
    }

    pub fn open_in_memory() -> anyhow::Result<Self> {
        let connection = Connection::open_in_memory().context("failed to open in-memory db")?;
        connection
            .execute_batch(SCHEMA)
            .context("failed to apply schema")?;
        Ok(Self {
            connection: Mutex::new(connection),
        })
    }

    fn lock(&self) -> anyhow::Result<std::sync::MutexGuard<'_, Connection>> {
        self.connection
            .lock()
            .map_err(|_| anyhow!("sqlite connection poisoned"))
    }

    pub fn load_persisted_state(&self) -> anyhow::Result<PersistedState> {
        let connection = self.lock()?;
        let mut state = PersistedState::default();

        {
            let mut statement =
                connection.prepare("SELECT id, name, root_path FROM workspaces ORDER BY id")?;
            let rows = statement.query_map([], |row| {
                Ok(PersistedWorkspace {
                    id: row.get::<_, i64>(0)? as u64,
                    name: row.get(1)?,
                    root_path: PathBuf::from(row.get::<_, String>(2)?),
                })
            })?;
            for row in rows {
                state.workspaces.push(row?);
            }
        }

        state.selected_engine = connection
            .query_row(
                "SELECT value FROM settings WHERE key = ?1",
                params![SELECTED_ENGINE_KEY],
                |row| row.get(0),
            )
            .optional()?;

        {
            let mut statement = connection
                .prepare("SELECT key, value FROM settings WHERE key LIKE ?1")?;
            let rows = statement.query_map(
                params![format!("{WORKSPACE_SPEC_ROOT_PREFIX}%")],
                |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)),
            )?;
            for row in rows {
                let (key, value) = row?;
                if let Some(workspace_id) = key
                    .strip_prefix(WORKSPACE_SPEC_ROOT_PREFIX)
                    .and_then(|raw| raw.parse::<u64>().ok())
                {
                    state.spec_roots.insert(workspace_id, value);
                }
            }
        }

        {
            let mut statement = connection.prepare(
                "SELECT workspace_id, thread_id, custom_name, pinned_at_ms, last_activity_ms FROM threads",
            )?;
            let rows = statement.query_map([], |row| {
                Ok((
                    row.get::<_, i64>(0)? as u64,
                    row.get::<_, String>(1)?,
                    row.get::<_, Option<String>>(2)?,
                    row.get::<_, Option<i64>>(3)?,
                    row.get::<_, Option<i64>>(4)?,
                ))
            })?;
            for row in rows {
                let (workspace_id, thread_id, custom_name, pinned_at_ms, last_activity_ms) = row?;
                if let Some(name) = custom_name {
                    state
                        .custom_names
                        .insert((workspace_id, thread_id.clone()), name);
                }
                if let Some(at) = pinned_at_ms {
                    state
                        .pinned_at
                        .insert((workspace_id, thread_id.clone()), at as u64);
                }
                if let Some(at) = last_activity_ms {
                    state
                        .last_activity
                        .insert((workspace_id, thread_id.clone()), at as u64);
                }
            }
        }

        {
            let mut statement = connection
                .prepare("SELECT workspace_id, prefix_json FROM approval_prefixes")?;
            let rows = statement.query_map([], |row| {
                Ok((row.get::<_, i64>(0)? as u64, row.get::<_, String>(1)?))
            })?;
            for row in rows {
                let (workspace_id, prefix_json) = row?;
                let Ok(prefix) = serde_json::from_str::<Vec<String>>(&prefix_json) else {
                    continue;
                };
                state
                    .allowlists
                    .entry(workspace_id)
                    .or_default()
                    .push(prefix);
            }
        }

        Ok(state)
    }

    pub fn persist_workspace(
        &self,
        workspace_id: u64,
        name: &str,
        root_path: &Path,
    ) -> anyhow::Result<()> {
        let connection = self.lock()?;
        connection.execute(
            "INSERT INTO workspaces (id, name, root_path) VALUES (?1, ?2, ?3)
             ON CONFLICT (id) DO UPDATE SET name = ?2, root_path = ?3",
            params![
                workspace_id as i64,
                name,
                root_path.to_string_lossy().as_ref()
            ],
        )?;
        Ok(())
    }

    pub fn persist_selected_engine(&self, engine: &str) -> anyhow::Result<()> {
        let connection = self.lock()?;
        connection.execute(
            "INSERT INTO settings (key, value) VALUES (?1, ?2)
             ON CONFLICT (key) DO UPDATE SET value = ?2",
            params![SELECTED_ENGINE_KEY, engine],
        )?;
        Ok(())
    }

    fn ensure_thread_row(
        connection: &Connection,
        workspace_id: u64,
        thread_id: &str,
    ) -> anyhow::Result<()> {
        connection.execute(
            "INSERT OR IGNORE INTO threads (workspace_id, thread_id) VALUES (?1, ?2)",
            params![workspace_id as i64, thread_id],
        )?;
        Ok(())
    }

    pub fn record_thread_seen(&self, workspace_id: u64, thread_id: &str) -> anyhow::Result<()> {
        let connection = self.lock()?;
        Self::ensure_thread_row(&connection, workspace_id, thread_id)
    }

    pub fn persist_thread_name(
        &self,
        workspace_id: u64,
        thread_id: &str,
        name: Option<&str>,
    ) -> anyhow::Result<()> {
        let connection = self.lock()?;
        Self::ensure_thread_row(&connection, workspace_id, thread_id)?;
        connection.execute(
            "UPDATE threads SET custom_name = ?3 WHERE workspace_id = ?1 AND thread_id = ?2",
            params![workspace_id as i64, thread_id, name],
        )?;
        Ok(())
    }

    pub fn persist_thread_pinned(
        &self,
        workspace_id: u64,
        thread_id: &str,
        pinned_at_ms: Option<u64>,
    ) -> anyhow::Result<()> {
        let connection = self.lock()?;
        Self::ensure_thread_row(&connection, workspace_id, thread_id)?;
        connection.execute(
            "UPDATE threads SET pinned_at_ms = ?3 WHERE workspace_id = ?1 AND thread_id = ?2",
            params![workspace_id as i64, thread_id, pinned_at_ms.map(|v| v as i64)],
        )?;
        Ok(())
    }

    pub fn persist_thread_activity(
        &self,
        workspace_id: u64,
        thread_id: &str,
        at_unix_ms: u64,
    ) -> anyhow::Result<()> {
        let connection = self.lock()?;
        Self::ensure_thread_row(&connection, workspace_id, thread_id)?;
        connection.execute(
            "UPDATE threads SET last_activity_ms = ?3 WHERE workspace_id = ?1 AND thread_id = ?2",
            params![workspace_id as i64, thread_id, at_unix_ms as i64],
        )?;
        Ok(())
    }

    pub fn update_thread_title(
        &self,
        workspace_id: u64,
        thread_id: &str,
        title: &str,
    ) -> anyhow::Result<()> {
        let connection = self.lock()?;
        Self::ensure_thread_row(&connection, workspace_id, thread_id)?;
        connection.execute(
            "UPDATE threads SET title = ?3 WHERE workspace_id = ?1 AND thread_id = ?2",
            params![workspace_id as i64, thread_id, title],
        )?;
        Ok(())
    }

    pub fn persist_allowlist(
        &self,
        workspace_id: u64,
        allowlist: &[Vec<String>],
    ) -> anyhow::Result<()> {
        let mut connection = self.lock()?;
        let tx = connection.transaction()?;
        tx.execute(
            "DELETE FROM approval_prefixes WHERE workspace_id = ?1",
            params![workspace_id as i64],
        )?;
        for prefix in allowlist {
            let prefix_json = serde_json::to_string(prefix)?;
            tx.execute(
                "INSERT OR IGNORE INTO approval_prefixes (workspace_id, prefix_json) VALUES (?1, ?2)",
                params![workspace_id as i64, prefix_json],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    pub fn persist_spec_root(
        &self,
        workspace_id: u64,
        spec_root: Option<&str>,
    ) -> anyhow::Result<()> {
        let connection = self.lock()?;
        let key = format!("{WORKSPACE_SPEC_ROOT_PREFIX}{workspace_id}");
        match spec_root {
            Some(value) => {
                connection.execute(
                    "INSERT INTO settings (key, value) VALUES (?1, ?2)
                     ON CONFLICT (key) DO UPDATE SET value = ?2",
                    params![key, value],
                )?;
            }
            None => {
                connection.execute("DELETE FROM settings WHERE key = ?1", params![key])?;
            }
        }
        Ok(())
    }

    /// Move every row keyed by `old_id` to `new_id` in one transaction. A
    /// pre-existing row under the new id is replaced.
    pub fn rename_thread(
        &self,
        workspace_id: u64,
        old_id: &str,
        new_id: &str,
    ) -> anyhow::Result<()> {
        let mut connection = self.lock()?;
        let tx = connection.transaction()?;
        tx.execute(
            "DELETE FROM threads WHERE workspace_id = ?1 AND thread_id = ?2",
            params![workspace_id as i64, new_id],
        )?;
        tx.execute(
            "UPDATE threads SET thread_id = ?3 WHERE workspace_id = ?1 AND thread_id = ?2",
            params![workspace_id as i64, old_id, new_id],
        )?;
        tx.commit()?;
        Ok(())
    }

    /// Known durable threads for a workspace, most recent first. Provisional
    /// and bare rows without an engine prefix are not importable sessions.
    pub fn list_sessions(&self, workspace_id: u64) -> anyhow::Result<Vec<ImportableSession>> {
        let connection = self.lock()?;
        let mut statement = connection.prepare(
            "SELECT thread_id, custom_name, title, last_activity_ms FROM threads
             WHERE workspace_id = ?1
             ORDER BY last_activity_ms DESC",
        )?;
        let rows = statement.query_map(params![workspace_id as i64], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, Option<String>>(1)?,
                row.get::<_, Option<String>>(2)?,
                row.get::<_, Option<i64>>(3)?,
            ))
        })?;

        let mut sessions = Vec::new();
        for row in rows {
            let (thread_id, custom_name, title, last_activity_ms) = row?;
            let Some(engine) = engine_of_id(&thread_id) else {
                continue;
            };
            let Some(session_id) = tiller_domain::session_id_of(&thread_id) else {
                continue;
            };
            sessions.push(ImportableSession {
                engine,
                session_id,
                title: custom_name.or(title).unwrap_or_default(),
                updated_at_unix_seconds: last_activity_ms.unwrap_or(0).max(0) as u64 / 1000,
            });
        }
        Ok(sessions)
    }
}
