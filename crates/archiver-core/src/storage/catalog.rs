use super::models::{Asset, NewAsset};
use super::sqlite::Database;
use crate::hasher::Fingerprint;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Result, Row};
use std::collections::HashMap;

const ASSET_COLUMNS: &str = "id, fingerprint, location_id, archive_path, original_path, \
     original_name, extension, kind, role, file_size, primary_fingerprint, session_id, imported_at";

fn read_asset(row: &Row<'_>) -> Result<Asset> {
    Ok(Asset {
        id: row.get(0)?,
        fingerprint: row.get(1)?,
        location_id: row.get(2)?,
        archive_path: row.get(3)?,
        original_path: row.get(4)?,
        original_name: row.get(5)?,
        extension: row.get(6)?,
        kind: row.get(7)?,
        role: row.get(8)?,
        file_size: row.get(9)?,
        primary_fingerprint: row.get(10)?,
        session_id: row.get(11)?,
        imported_at: row.get(12)?,
    })
}

/// Insert a catalog row. Returns false when the fingerprint is already
/// cataloged, which happens when another session committed the same content
/// first.
pub fn insert_asset(conn: &Connection, asset: &NewAsset<'_>) -> Result<bool> {
    let now = chrono::Utc::now().to_rfc3339();
    let inserted = conn.execute(
        "INSERT INTO asset (fingerprint, location_id, archive_path, original_path, \
         original_name, extension, kind, role, file_size, primary_fingerprint, \
         session_id, imported_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12) \
         ON CONFLICT (fingerprint) DO NOTHING",
        params![
            asset.fingerprint,
            asset.location_id,
            asset.archive_path,
            asset.original_path,
            asset.original_name,
            asset.extension,
            asset.kind,
            asset.role,
            asset.file_size,
            asset.primary_fingerprint,
            asset.session_id,
            now,
        ],
    )?;
    Ok(inserted == 1)
}

/// Whether a catalog row exists for `fingerprint`. Sees uncommitted rows
/// when called inside the writing transaction.
pub fn is_cataloged(conn: &Connection, fingerprint: &str) -> Result<bool> {
    conn.query_row(
        "SELECT EXISTS (SELECT 1 FROM asset WHERE fingerprint = ?1)",
        params![fingerprint],
        |row| row.get(0),
    )
}

impl Database {
    // ── Catalog ──────────────────────────────────────────────────

    /// Look fingerprints up in one `IN (...)` query. Only cataloged
    /// fingerprints appear in the result, mapped to their archive path.
    pub fn find_by_fingerprints(
        &self,
        fingerprints: &[Fingerprint],
    ) -> Result<HashMap<Fingerprint, String>> {
        if fingerprints.is_empty() {
            return Ok(HashMap::new());
        }
        let placeholders = vec!["?"; fingerprints.len()].join(", ");
        let sql = format!(
            "SELECT fingerprint, archive_path FROM asset WHERE fingerprint IN ({})",
            placeholders
        );
        let mut stmt = self.connection().prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(fingerprints.iter().map(|f| f.as_str())), |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;

        let mut found = HashMap::new();
        for row in rows {
            let (fingerprint, archive_path) = row?;
            if let Some(fingerprint) = Fingerprint::parse(&fingerprint) {
                found.insert(fingerprint, archive_path);
            }
        }
        Ok(found)
    }

    pub fn get_asset(&self, fingerprint: &str) -> Result<Option<Asset>> {
        self.connection()
            .query_row(
                &format!("SELECT {} FROM asset WHERE fingerprint = ?1", ASSET_COLUMNS),
                params![fingerprint],
                read_asset,
            )
            .optional()
    }

    pub fn list_assets(&self, location_id: &str) -> Result<Vec<Asset>> {
        let mut stmt = self.connection().prepare(&format!(
            "SELECT {} FROM asset WHERE location_id = ?1 ORDER BY id",
            ASSET_COLUMNS
        ))?;
        let assets = stmt
            .query_map(params![location_id], read_asset)?
            .collect::<Result<Vec<_>>>()?;
        Ok(assets)
    }

    pub fn asset_count(&self) -> Result<i64> {
        self.connection()
            .query_row("SELECT COUNT(*) FROM asset", [], |row| row.get(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_asset<'a>(fingerprint: &'a str, path: &'a str) -> NewAsset<'a> {
        NewAsset {
            fingerprint,
            location_id: "loc",
            archive_path: path,
            original_path: "/src/a.jpg",
            original_name: "a.jpg",
            extension: "jpg",
            kind: "image",
            role: "primary",
            file_size: 3,
            primary_fingerprint: None,
            session_id: "s1",
        }
    }

    #[test]
    fn test_batch_lookup_returns_only_known() {
        let db = Database::open_in_memory().unwrap();
        let known = Fingerprint::parse("00112233aabbccdd").unwrap();
        let unknown = Fingerprint::parse("ffffffffffffffff").unwrap();
        assert!(insert_asset(db.connection(), &new_asset(known.as_str(), "/archive/a.jpg")).unwrap());

        let found = db.find_by_fingerprints(&[known.clone(), unknown.clone()]).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[&known], "/archive/a.jpg");
        assert!(!found.contains_key(&unknown));
        assert!(db.find_by_fingerprints(&[]).unwrap().is_empty());
    }

    #[test]
    fn test_duplicate_insert_is_ignored() {
        let db = Database::open_in_memory().unwrap();
        let conn = db.connection();
        assert!(insert_asset(conn, &new_asset("00112233aabbccdd", "/a")).unwrap());
        assert!(!insert_asset(conn, &new_asset("00112233aabbccdd", "/b")).unwrap());
        assert_eq!(db.asset_count().unwrap(), 1);
        assert_eq!(db.get_asset("00112233aabbccdd").unwrap().unwrap().archive_path, "/a");
    }
}
