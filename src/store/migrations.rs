//! Versioned schema migrations.
//!
//! Migrations are `(version, up, down)` triples ordered by *semantic*
//! version: `1.10.0` sorts after `1.2.0`, which lexicographic ordering
//! gets wrong. On open, every declared migration newer than the stored
//! current version runs inside its own transaction; the version record is
//! inserted in the same transaction so a failure aborts before recording.
//!
//! ## Adding a new migration
//!
//! 1. Append a `Migration` to [`SCHEMA_MIGRATIONS`] with the next version.
//! 2. Bump [`CURRENT_SCHEMA_VERSION`].
//! 3. Statements must not assume a fresh database; re-running against an
//!    already-migrated file is skipped by version, not by `IF NOT EXISTS`.

use semver::Version;
use sqlx::SqlitePool;

use super::types::StoreError;

/// The schema version a fully migrated database reports. Project rows
/// record this as their `index_version` at creation.
pub const CURRENT_SCHEMA_VERSION: &str = "1.1.0";

/// One schema migration step. `up` and `down` are ordered statement lists
/// (statement-per-element; triggers contain semicolons, so the runner never
/// splits on them).
#[derive(Debug, Clone, Copy)]
pub struct Migration {
    pub version: &'static str,
    pub up: &'static [&'static str],
    pub down: &'static [&'static str],
}

/// Migrations shipped with this crate, in declaration order.
pub const SCHEMA_MIGRATIONS: &[Migration] = &[
    Migration {
        version: "1.0.0",
        up: &[
            "CREATE TABLE projects (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                root_path TEXT NOT NULL UNIQUE,
                module_name TEXT NOT NULL DEFAULT '',
                language_version TEXT NOT NULL DEFAULT '',
                total_files INTEGER NOT NULL DEFAULT 0,
                total_chunks INTEGER NOT NULL DEFAULT 0,
                index_version TEXT NOT NULL,
                last_indexed_at TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )",
            "CREATE TABLE files (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                project_id INTEGER NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
                rel_path TEXT NOT NULL,
                package_name TEXT NOT NULL DEFAULT '',
                content_hash BLOB NOT NULL,
                mod_time TEXT,
                size_bytes INTEGER NOT NULL DEFAULT 0,
                parse_error TEXT,
                last_indexed_at TEXT,
                UNIQUE(project_id, rel_path)
            )",
            "CREATE TABLE symbols (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                file_id INTEGER NOT NULL REFERENCES files(id) ON DELETE CASCADE,
                name TEXT NOT NULL,
                kind TEXT NOT NULL,
                package_name TEXT NOT NULL DEFAULT '',
                signature TEXT NOT NULL DEFAULT '',
                doc TEXT NOT NULL DEFAULT '',
                scope TEXT NOT NULL DEFAULT '',
                receiver TEXT NOT NULL DEFAULT '',
                start_line INTEGER NOT NULL,
                start_col INTEGER NOT NULL,
                end_line INTEGER NOT NULL,
                end_col INTEGER NOT NULL,
                is_aggregate INTEGER NOT NULL DEFAULT 0,
                is_entity INTEGER NOT NULL DEFAULT 0,
                is_value_object INTEGER NOT NULL DEFAULT 0,
                is_repository INTEGER NOT NULL DEFAULT 0,
                is_service INTEGER NOT NULL DEFAULT 0,
                is_command INTEGER NOT NULL DEFAULT 0,
                is_query INTEGER NOT NULL DEFAULT 0,
                is_handler INTEGER NOT NULL DEFAULT 0,
                UNIQUE(file_id, name, start_line, start_col)
            )",
            "CREATE TABLE chunks (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                file_id INTEGER NOT NULL REFERENCES files(id) ON DELETE CASCADE,
                symbol_id INTEGER REFERENCES symbols(id) ON DELETE CASCADE,
                content TEXT NOT NULL,
                content_hash TEXT NOT NULL DEFAULT '',
                token_count INTEGER NOT NULL DEFAULT 0,
                start_line INTEGER NOT NULL,
                end_line INTEGER NOT NULL,
                context_before TEXT NOT NULL DEFAULT '',
                context_after TEXT NOT NULL DEFAULT '',
                chunk_type TEXT NOT NULL DEFAULT '',
                UNIQUE(file_id, start_line, end_line)
            )",
            "CREATE TABLE embeddings (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                chunk_id INTEGER NOT NULL UNIQUE REFERENCES chunks(id) ON DELETE CASCADE,
                vector BLOB NOT NULL,
                dimension INTEGER NOT NULL,
                provider TEXT NOT NULL DEFAULT '',
                model TEXT NOT NULL DEFAULT '',
                CHECK (length(vector) = dimension * 4)
            )",
            "CREATE TABLE imports (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                file_id INTEGER NOT NULL REFERENCES files(id) ON DELETE CASCADE,
                import_path TEXT NOT NULL,
                alias TEXT NOT NULL DEFAULT '',
                UNIQUE(file_id, import_path, alias)
            )",
            "CREATE INDEX idx_files_project ON files(project_id)",
            "CREATE INDEX idx_symbols_file ON symbols(file_id)",
            "CREATE INDEX idx_chunks_file ON chunks(file_id)",
            "CREATE INDEX idx_chunks_symbol ON chunks(symbol_id)",
            "CREATE INDEX idx_imports_file ON imports(file_id)",
            "CREATE INDEX idx_embeddings_chunk ON embeddings(chunk_id)",
        ],
        down: &[
            "DROP TABLE imports",
            "DROP TABLE embeddings",
            "DROP TABLE chunks",
            "DROP TABLE symbols",
            "DROP TABLE files",
            "DROP TABLE projects",
        ],
    },
    Migration {
        version: "1.1.0",
        up: &[
            "CREATE VIRTUAL TABLE symbols_fts USING fts5(
                name, signature, doc,
                content='symbols', content_rowid='id'
            )",
            "CREATE TRIGGER symbols_fts_ai AFTER INSERT ON symbols BEGIN
                INSERT INTO symbols_fts(rowid, name, signature, doc)
                VALUES (new.id, new.name, new.signature, new.doc);
            END",
            "CREATE TRIGGER symbols_fts_ad AFTER DELETE ON symbols BEGIN
                INSERT INTO symbols_fts(symbols_fts, rowid, name, signature, doc)
                VALUES ('delete', old.id, old.name, old.signature, old.doc);
            END",
            "CREATE TRIGGER symbols_fts_au AFTER UPDATE ON symbols BEGIN
                INSERT INTO symbols_fts(symbols_fts, rowid, name, signature, doc)
                VALUES ('delete', old.id, old.name, old.signature, old.doc);
                INSERT INTO symbols_fts(rowid, name, signature, doc)
                VALUES (new.id, new.name, new.signature, new.doc);
            END",
            "CREATE VIRTUAL TABLE chunks_fts USING fts5(
                content, context_before, context_after,
                content='chunks', content_rowid='id'
            )",
            "CREATE TRIGGER chunks_fts_ai AFTER INSERT ON chunks BEGIN
                INSERT INTO chunks_fts(rowid, content, context_before, context_after)
                VALUES (new.id, new.content, new.context_before, new.context_after);
            END",
            "CREATE TRIGGER chunks_fts_ad AFTER DELETE ON chunks BEGIN
                INSERT INTO chunks_fts(chunks_fts, rowid, content, context_before, context_after)
                VALUES ('delete', old.id, old.content, old.context_before, old.context_after);
            END",
            "CREATE TRIGGER chunks_fts_au AFTER UPDATE ON chunks BEGIN
                INSERT INTO chunks_fts(chunks_fts, rowid, content, context_before, context_after)
                VALUES ('delete', old.id, old.content, old.context_before, old.context_after);
                INSERT INTO chunks_fts(rowid, content, context_before, context_after)
                VALUES (new.id, new.content, new.context_before, new.context_after);
            END",
        ],
        down: &[
            "DROP TRIGGER chunks_fts_au",
            "DROP TRIGGER chunks_fts_ad",
            "DROP TRIGGER chunks_fts_ai",
            "DROP TABLE chunks_fts",
            "DROP TRIGGER symbols_fts_au",
            "DROP TRIGGER symbols_fts_ad",
            "DROP TRIGGER symbols_fts_ai",
            "DROP TABLE symbols_fts",
        ],
    },
];

/// Parse a version string, mapping failures to a descriptive error.
///
/// This error is deliberately distinct from the absent-table case: a fresh
/// database has *no* version rows (normal, current becomes 0.0.0); a
/// malformed version row means the file is damaged or foreign (fatal).
fn parse_version(s: &str) -> Result<Version, StoreError> {
    Version::parse(s).map_err(|_| StoreError::InvalidVersion(s.to_string()))
}

/// Highest applied version, or `0.0.0` for a fresh database.
pub async fn current_version(pool: &SqlitePool) -> Result<Version, StoreError> {
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version TEXT PRIMARY KEY,
            applied_at TEXT NOT NULL
        )",
    )
    .execute(pool)
    .await?;

    let rows: Vec<(String,)> = sqlx::query_as("SELECT version FROM schema_migrations")
        .fetch_all(pool)
        .await?;

    let mut current = Version::new(0, 0, 0);
    for (stored,) in rows {
        let v = parse_version(&stored)?;
        if v > current {
            current = v;
        }
    }
    Ok(current)
}

/// Apply every declared migration newer than the stored version.
///
/// Returns the number of migrations applied. Re-running with the same list
/// is a no-op; already-applied versions are skipped.
pub async fn apply(pool: &SqlitePool, migrations: &[Migration]) -> Result<usize, StoreError> {
    let mut current = current_version(pool).await?;
    let mut applied = 0usize;

    for migration in migrations {
        let version = parse_version(migration.version)?;
        if version <= current {
            tracing::debug!(version = %version, "Migration already applied, skipping");
            continue;
        }

        tracing::info!(version = %version, "Applying schema migration");
        let mut tx = pool.begin().await.map_err(|e| migration_error(&version, e))?;
        for statement in migration.up {
            sqlx::query(statement)
                .execute(&mut *tx)
                .await
                .map_err(|e| migration_error(&version, e))?;
        }
        sqlx::query("INSERT INTO schema_migrations (version, applied_at) VALUES (?1, ?2)")
            .bind(migration.version)
            .bind(chrono::Utc::now().to_rfc3339())
            .execute(&mut *tx)
            .await
            .map_err(|e| migration_error(&version, e))?;
        tx.commit().await.map_err(|e| migration_error(&version, e))?;

        current = version;
        applied += 1;
    }

    if applied > 0 {
        tracing::info!(current = %current, applied, "Schema migrations complete");
    }
    Ok(applied)
}

/// Revert applied migrations newer than `target`, newest first.
///
/// Each `down` runs in its own transaction together with the removal of its
/// version record.
pub async fn revert_to(
    pool: &SqlitePool,
    migrations: &[Migration],
    target: &str,
) -> Result<usize, StoreError> {
    let target = parse_version(target)?;
    let current = current_version(pool).await?;

    // Newest first so dependent objects unwind in reverse order
    let mut to_revert: Vec<(Version, &Migration)> = Vec::new();
    for migration in migrations {
        let version = parse_version(migration.version)?;
        if version > target && version <= current {
            to_revert.push((version, migration));
        }
    }
    to_revert.sort_by(|a, b| b.0.cmp(&a.0));

    let mut reverted = 0usize;
    for (version, migration) in to_revert {
        tracing::info!(version = %version, "Reverting schema migration");
        let mut tx = pool.begin().await.map_err(|e| migration_error(&version, e))?;
        for statement in migration.down {
            sqlx::query(statement)
                .execute(&mut *tx)
                .await
                .map_err(|e| migration_error(&version, e))?;
        }
        sqlx::query("DELETE FROM schema_migrations WHERE version = ?1")
            .bind(migration.version)
            .execute(&mut *tx)
            .await
            .map_err(|e| migration_error(&version, e))?;
        tx.commit().await.map_err(|e| migration_error(&version, e))?;
        reverted += 1;
    }
    Ok(reverted)
}

fn migration_error(version: &Version, e: sqlx::Error) -> StoreError {
    StoreError::MigrationFailed {
        version: version.to_string(),
        message: e.to_string(),
    }
}
