//! SQLite inventory store
//!
//! Operations take and return JSON so they can be routed by name from the UI
//! layer. The store knows nothing about syncing; wrap calls in a
//! [`crate::dispatch::MutationDispatcher`] to get copy-up behaviour.

use crate::error::{Error, Result};
use crate::ops::Operation;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

/// How long a write waits for a concurrent snapshot to finish
pub const BUSY_TIMEOUT: Duration = Duration::from_secs(10);

/// Inventory database handle
pub struct Store {
    conn: Mutex<Connection>,
    path: PathBuf,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ById {
    id: i64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NewSite {
    name: String,
    location: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NewAsset {
    name: String,
    category: Option<String>,
    #[serde(default)]
    quantity: i64,
    site_id: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AssetUpdate {
    id: i64,
    name: Option<String>,
    category: Option<String>,
    quantity: Option<i64>,
    site_id: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NewWaybill {
    site_id: i64,
    driver: Option<String>,
    items: Vec<WaybillItem>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WaybillItem {
    asset_id: i64,
    quantity: i64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NewCheckout {
    asset_id: i64,
    employee: String,
    quantity: i64,
}

impl Store {
    /// Open or create a database at the given path
    ///
    /// Uses a rollback journal rather than WAL so the whole database is a single
    /// file. Writers wait up to [`BUSY_TIMEOUT`] while a copy-up snapshot holds
    /// the read lock.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.execute_batch(
            "
            PRAGMA foreign_keys = ON;
            PRAGMA journal_mode = DELETE;
            PRAGMA synchronous = FULL;
            ",
        )?;

        Ok(Self {
            conn: Mutex::new(conn),
            path: path.to_path_buf(),
        })
    }

    /// Create an empty, migrated database file at `path`.
    pub fn initialize(path: &Path) -> Result<()> {
        let store = Self::open(path)?;
        store.migrate()?;
        Ok(())
    }

    /// Run migrations. Returns `true` if the schema changed.
    pub fn migrate(&self) -> Result<bool> {
        super::schema::run_migrations(&self.conn())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Execute a registered operation with JSON parameters.
    pub fn execute(&self, op: Operation, params: &Value) -> Result<Value> {
        tracing::debug!(operation = %op, "Executing store operation");
        match op {
            Operation::CreateSite => self.create_site(parse(op, params)?),
            Operation::GetSites => self.get_sites(),
            Operation::CreateAsset => self.create_asset(parse(op, params)?),
            Operation::UpdateAsset => self.update_asset(parse(op, params)?),
            Operation::DeleteAsset => self.delete_asset(parse(op, params)?),
            Operation::GetAssets => self.get_assets(),
            Operation::CreateWaybill => self.create_waybill(parse(op, params)?),
            Operation::GetWaybills => self.get_waybills(),
            Operation::CreateQuickCheckout => self.create_quick_checkout(parse(op, params)?),
            Operation::ProcessReturn => self.process_return(parse(op, params)?),
            Operation::GetDatabaseInfo => self.database_info(),
            other => Err(Error::UnsupportedOperation(other.name().to_string())),
        }
    }

    // ============================================
    // Sites
    // ============================================

    fn create_site(&self, site: NewSite) -> Result<Value> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO sites (name, location, created_at) VALUES (?1, ?2, ?3)",
            params![site.name, site.location, Utc::now().to_rfc3339()],
        )?;
        Ok(json!({ "id": conn.last_insert_rowid() }))
    }

    fn get_sites(&self) -> Result<Value> {
        let conn = self.conn();
        let mut stmt = conn.prepare("SELECT id, name, location FROM sites ORDER BY id")?;
        let sites = stmt
            .query_map([], |row| {
                Ok(json!({
                    "id": row.get::<_, i64>(0)?,
                    "name": row.get::<_, String>(1)?,
                    "location": row.get::<_, Option<String>>(2)?,
                }))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(Value::Array(sites))
    }

    // ============================================
    // Assets
    // ============================================

    fn create_asset(&self, asset: NewAsset) -> Result<Value> {
        let conn = self.conn();
        conn.execute(
            r#"
            INSERT INTO assets (name, category, quantity, site_id, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
            params![
                asset.name,
                asset.category,
                asset.quantity,
                asset.site_id,
                Utc::now().to_rfc3339()
            ],
        )?;
        Ok(json!({ "id": conn.last_insert_rowid() }))
    }

    fn update_asset(&self, update: AssetUpdate) -> Result<Value> {
        let conn = self.conn();
        let changed = conn.execute(
            r#"
            UPDATE assets SET
                name = COALESCE(?2, name),
                category = COALESCE(?3, category),
                quantity = COALESCE(?4, quantity),
                site_id = COALESCE(?5, site_id),
                updated_at = ?6
            WHERE id = ?1
            "#,
            params![
                update.id,
                update.name,
                update.category,
                update.quantity,
                update.site_id,
                Utc::now().to_rfc3339()
            ],
        )?;
        if changed == 0 {
            return Err(not_found(Operation::UpdateAsset, "asset", update.id));
        }
        Ok(json!({ "id": update.id }))
    }

    fn delete_asset(&self, target: ById) -> Result<Value> {
        let conn = self.conn();
        let changed = conn.execute("DELETE FROM assets WHERE id = ?1", [target.id])?;
        if changed == 0 {
            return Err(not_found(Operation::DeleteAsset, "asset", target.id));
        }
        Ok(json!({ "id": target.id }))
    }

    fn get_assets(&self) -> Result<Value> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, name, category, quantity, site_id, updated_at FROM assets ORDER BY id",
        )?;
        let assets = stmt
            .query_map([], |row| {
                Ok(json!({
                    "id": row.get::<_, i64>(0)?,
                    "name": row.get::<_, String>(1)?,
                    "category": row.get::<_, Option<String>>(2)?,
                    "quantity": row.get::<_, i64>(3)?,
                    "siteId": row.get::<_, Option<i64>>(4)?,
                    "updatedAt": row.get::<_, String>(5)?,
                }))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(Value::Array(assets))
    }

    // ============================================
    // Waybills
    // ============================================

    fn create_waybill(&self, waybill: NewWaybill) -> Result<Value> {
        if waybill.items.is_empty() {
            return Err(invalid(Operation::CreateWaybill, "waybill has no items"));
        }

        let mut conn = self.conn();
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO waybills (site_id, driver, created_at) VALUES (?1, ?2, ?3)",
            params![waybill.site_id, waybill.driver, Utc::now().to_rfc3339()],
        )?;
        let waybill_id = tx.last_insert_rowid();

        for item in &waybill.items {
            take_stock(&tx, Operation::CreateWaybill, item.asset_id, item.quantity)?;
            tx.execute(
                "INSERT INTO waybill_items (waybill_id, asset_id, quantity) VALUES (?1, ?2, ?3)",
                params![waybill_id, item.asset_id, item.quantity],
            )?;
        }

        tx.commit()?;
        Ok(json!({ "id": waybill_id }))
    }

    fn get_waybills(&self) -> Result<Value> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            r#"
            SELECT w.id, w.site_id, s.name, w.driver, w.status, w.created_at,
                   COALESCE(SUM(i.quantity), 0)
            FROM waybills w
            JOIN sites s ON s.id = w.site_id
            LEFT JOIN waybill_items i ON i.waybill_id = w.id
            GROUP BY w.id
            ORDER BY w.id
            "#,
        )?;
        let waybills = stmt
            .query_map([], |row| {
                Ok(json!({
                    "id": row.get::<_, i64>(0)?,
                    "siteId": row.get::<_, i64>(1)?,
                    "siteName": row.get::<_, String>(2)?,
                    "driver": row.get::<_, Option<String>>(3)?,
                    "status": row.get::<_, String>(4)?,
                    "createdAt": row.get::<_, String>(5)?,
                    "totalQuantity": row.get::<_, i64>(6)?,
                }))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(Value::Array(waybills))
    }

    // ============================================
    // Quick checkouts and returns
    // ============================================

    fn create_quick_checkout(&self, checkout: NewCheckout) -> Result<Value> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        take_stock(
            &tx,
            Operation::CreateQuickCheckout,
            checkout.asset_id,
            checkout.quantity,
        )?;
        tx.execute(
            r#"
            INSERT INTO quick_checkouts (asset_id, employee, quantity, checked_out_at)
            VALUES (?1, ?2, ?3, ?4)
            "#,
            params![
                checkout.asset_id,
                checkout.employee,
                checkout.quantity,
                Utc::now().to_rfc3339()
            ],
        )?;
        let id = tx.last_insert_rowid();
        tx.commit()?;
        Ok(json!({ "id": id }))
    }

    fn process_return(&self, target: ById) -> Result<Value> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;

        let checkout: Option<(i64, i64, String)> = tx
            .query_row(
                "SELECT asset_id, quantity, status FROM quick_checkouts WHERE id = ?1",
                [target.id],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()?;

        let Some((asset_id, quantity, status)) = checkout else {
            return Err(not_found(Operation::ProcessReturn, "checkout", target.id));
        };
        if status == "returned" {
            return Err(invalid(
                Operation::ProcessReturn,
                &format!("checkout {} was already returned", target.id),
            ));
        }

        tx.execute(
            "UPDATE quick_checkouts SET status = 'returned', returned_at = ?2 WHERE id = ?1",
            params![target.id, Utc::now().to_rfc3339()],
        )?;
        tx.execute(
            "UPDATE assets SET quantity = quantity + ?2, updated_at = ?3 WHERE id = ?1",
            params![asset_id, quantity, Utc::now().to_rfc3339()],
        )?;
        tx.commit()?;

        Ok(json!({ "id": target.id, "assetId": asset_id, "returned": quantity }))
    }

    // ============================================
    // Database info
    // ============================================

    fn database_info(&self) -> Result<Value> {
        let conn = self.conn();
        let schema_version = super::schema::get_schema_version(&conn)?;
        let journal_mode: String = conn.query_row("PRAGMA journal_mode", [], |r| r.get(0))?;
        let size_bytes = std::fs::metadata(&self.path).map(|m| m.len()).unwrap_or(0);

        Ok(json!({
            "path": self.path.display().to_string(),
            "sizeBytes": size_bytes,
            "schemaVersion": schema_version,
            "journalMode": journal_mode,
        }))
    }
}

/// Decrement stock for `asset_id`, failing if there is not enough.
fn take_stock(conn: &Connection, op: Operation, asset_id: i64, quantity: i64) -> Result<()> {
    if quantity <= 0 {
        return Err(invalid(op, "quantity must be positive"));
    }
    let changed = conn.execute(
        r#"
        UPDATE assets SET quantity = quantity - ?2, updated_at = ?3
        WHERE id = ?1 AND quantity >= ?2
        "#,
        params![asset_id, quantity, Utc::now().to_rfc3339()],
    )?;
    if changed == 0 {
        return Err(invalid(
            op,
            &format!("asset {} does not exist or has fewer than {} in stock", asset_id, quantity),
        ));
    }
    Ok(())
}

fn parse<T: DeserializeOwned>(op: Operation, params: &Value) -> Result<T> {
    T::deserialize(params).map_err(|e| invalid(op, &e.to_string()))
}

fn invalid(op: Operation, message: &str) -> Error {
    Error::InvalidParams {
        operation: op.name().to_string(),
        message: message.to_string(),
    }
}

fn not_found(op: Operation, entity: &str, id: i64) -> Error {
    invalid(op, &format!("{} {} not found", entity, id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store(dir: &TempDir) -> Store {
        let store = Store::open(&dir.path().join("inventory.db")).unwrap();
        store.migrate().unwrap();
        store
    }

    fn seed_asset(store: &Store, quantity: i64) -> (i64, i64) {
        let site = store
            .execute(Operation::CreateSite, &json!({ "name": "North Yard" }))
            .unwrap();
        let site_id = site["id"].as_i64().unwrap();
        let asset = store
            .execute(
                Operation::CreateAsset,
                &json!({ "name": "Scaffold pole", "quantity": quantity, "siteId": site_id }),
            )
            .unwrap();
        (site_id, asset["id"].as_i64().unwrap())
    }

    #[test]
    fn test_asset_crud() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let (_, asset_id) = seed_asset(&store, 10);

        store
            .execute(
                Operation::UpdateAsset,
                &json!({ "id": asset_id, "quantity": 12, "category": "access" }),
            )
            .unwrap();
        let assets = store.execute(Operation::GetAssets, &Value::Null).unwrap();
        assert_eq!(assets[0]["quantity"], 12);
        assert_eq!(assets[0]["category"], "access");
        assert_eq!(assets[0]["name"], "Scaffold pole");

        store
            .execute(Operation::DeleteAsset, &json!({ "id": asset_id }))
            .unwrap();
        let err = store
            .execute(Operation::DeleteAsset, &json!({ "id": asset_id }))
            .unwrap_err();
        assert!(err.to_string().contains("not found"));
    }

    #[test]
    fn test_waybill_takes_stock_atomically() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let (site_id, asset_id) = seed_asset(&store, 5);

        let err = store
            .execute(
                Operation::CreateWaybill,
                &json!({ "siteId": site_id, "items": [{ "assetId": asset_id, "quantity": 6 }] }),
            )
            .unwrap_err();
        assert!(matches!(err, Error::InvalidParams { .. }));
        assert_eq!(
            store.execute(Operation::GetWaybills, &Value::Null).unwrap(),
            json!([])
        );

        store
            .execute(
                Operation::CreateWaybill,
                &json!({ "siteId": site_id, "driver": "Kofi", "items": [{ "assetId": asset_id, "quantity": 3 }] }),
            )
            .unwrap();
        let waybills = store.execute(Operation::GetWaybills, &Value::Null).unwrap();
        assert_eq!(waybills[0]["totalQuantity"], 3);
        assert_eq!(waybills[0]["siteName"], "North Yard");
        let assets = store.execute(Operation::GetAssets, &Value::Null).unwrap();
        assert_eq!(assets[0]["quantity"], 2);
    }

    #[test]
    fn test_checkout_and_return() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let (_, asset_id) = seed_asset(&store, 4);

        let checkout = store
            .execute(
                Operation::CreateQuickCheckout,
                &json!({ "assetId": asset_id, "employee": "Ama", "quantity": 3 }),
            )
            .unwrap();
        let checkout_id = checkout["id"].as_i64().unwrap();
        assert_eq!(
            store.execute(Operation::GetAssets, &Value::Null).unwrap()[0]["quantity"],
            1
        );

        let returned = store
            .execute(Operation::ProcessReturn, &json!({ "id": checkout_id }))
            .unwrap();
        assert_eq!(returned["returned"], 3);
        assert_eq!(
            store.execute(Operation::GetAssets, &Value::Null).unwrap()[0]["quantity"],
            4
        );

        let err = store
            .execute(Operation::ProcessReturn, &json!({ "id": checkout_id }))
            .unwrap_err();
        assert!(err.to_string().contains("already returned"));
    }

    #[test]
    fn test_bad_params_and_unsupported_ops() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);

        let err = store
            .execute(Operation::CreateAsset, &json!({ "quantity": 1 }))
            .unwrap_err();
        assert!(matches!(err, Error::InvalidParams { .. }));

        let err = store
            .execute(Operation::CreateVehicle, &json!({}))
            .unwrap_err();
        assert!(matches!(err, Error::UnsupportedOperation(name) if name == "createVehicle"));
    }

    #[test]
    fn test_database_info_uses_rollback_journal() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let info = store
            .execute(Operation::GetDatabaseInfo, &Value::Null)
            .unwrap();
        assert_eq!(info["journalMode"], "delete");
        assert_eq!(info["schemaVersion"], 1);
        assert!(info["sizeBytes"].as_u64().unwrap() > 0);
    }

    #[test]
    fn test_initialize_creates_migrated_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("share/inventory.db");
        Store::initialize(&path).unwrap();
        assert!(path.exists());

        let store = Store::open(&path).unwrap();
        assert!(!store.migrate().unwrap());
    }
}
