//! Inventory schema and migrations
//!
//! Uses SQLite with embedded migrations managed via PRAGMA user_version.

use rusqlite::Connection;

/// Current schema version
pub const SCHEMA_VERSION: i32 = 1;

/// SQL migrations, indexed by version number
const MIGRATIONS: &[&str] = &[
    // Version 1: sites, assets, waybills, quick checkouts
    r#"
    CREATE TABLE IF NOT EXISTS sites (
        id               INTEGER PRIMARY KEY AUTOINCREMENT,
        name             TEXT NOT NULL UNIQUE,
        location         TEXT,
        created_at       TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS assets (
        id               INTEGER PRIMARY KEY AUTOINCREMENT,
        name             TEXT NOT NULL,
        category         TEXT,
        quantity         INTEGER NOT NULL DEFAULT 0 CHECK (quantity >= 0),
        site_id          INTEGER REFERENCES sites(id),
        updated_at       TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS waybills (
        id               INTEGER PRIMARY KEY AUTOINCREMENT,
        site_id          INTEGER NOT NULL REFERENCES sites(id),
        driver           TEXT,
        status           TEXT NOT NULL DEFAULT 'outstanding',
        created_at       TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS waybill_items (
        waybill_id       INTEGER NOT NULL REFERENCES waybills(id) ON DELETE CASCADE,
        asset_id         INTEGER NOT NULL REFERENCES assets(id),
        quantity         INTEGER NOT NULL CHECK (quantity > 0),
        PRIMARY KEY (waybill_id, asset_id)
    );

    CREATE TABLE IF NOT EXISTS quick_checkouts (
        id               INTEGER PRIMARY KEY AUTOINCREMENT,
        asset_id         INTEGER NOT NULL REFERENCES assets(id),
        employee         TEXT NOT NULL,
        quantity         INTEGER NOT NULL CHECK (quantity > 0),
        status           TEXT NOT NULL DEFAULT 'outstanding',
        checked_out_at   TEXT NOT NULL,
        returned_at      TEXT
    );

    CREATE INDEX IF NOT EXISTS idx_assets_site ON assets(site_id);
    CREATE INDEX IF NOT EXISTS idx_checkouts_asset ON quick_checkouts(asset_id);
    "#,
];

/// Run pending migrations. Returns `true` if any were applied.
pub fn run_migrations(conn: &Connection) -> crate::error::Result<bool> {
    let current_version: i32 = conn
        .query_row("PRAGMA user_version", [], |r| r.get(0))
        .unwrap_or(0);

    tracing::debug!(
        current_version,
        target_version = SCHEMA_VERSION,
        "Checking database migrations"
    );

    for (i, migration) in MIGRATIONS.iter().enumerate() {
        let version = (i + 1) as i32;
        if version > current_version {
            tracing::info!(version, "Running migration");
            conn.execute_batch(migration)?;
            conn.execute_batch(&format!("PRAGMA user_version = {}", version))?;
        }
    }

    if current_version < SCHEMA_VERSION {
        tracing::info!(
            from = current_version,
            to = SCHEMA_VERSION,
            "Migrations complete"
        );
        return Ok(true);
    }

    Ok(false)
}

/// Get the current schema version from the database
pub fn get_schema_version(conn: &Connection) -> crate::error::Result<i32> {
    let version: i32 = conn.query_row("PRAGMA user_version", [], |r| r.get(0))?;
    Ok(version)
}
