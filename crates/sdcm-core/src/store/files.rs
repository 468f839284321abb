//! File record queries.

use super::records::{FileRecord, FileSummary};
use super::{json_list, now_str, opt_path, parse_ts, path_str, ts_str, CacheStore};
use crate::error::{Result, SdcmError};
use chrono::Utc;
use rusqlite::{params, params_from_iter, OptionalExtension, Row};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::debug;

const FILE_COLUMNS: &str = "id, path, hash, crc32, name, thumbnail_path, thumbnail_fingerprint, \
     descriptor_path, size, memo, prompts, base_model, related_version_id, created_at, updated_at";

fn row_to_file_record(row: &Row<'_>) -> rusqlite::Result<FileRecord> {
    let prompts: String = row.get(10)?;
    Ok(FileRecord {
        id: row.get(0)?,
        path: PathBuf::from(row.get::<_, String>(1)?),
        hash: row.get(2)?,
        crc32: row.get(3)?,
        name: row.get(4)?,
        thumbnail_path: opt_path(row.get(5)?),
        thumbnail_fingerprint: row.get(6)?,
        descriptor_path: opt_path(row.get(7)?),
        size: row.get::<_, i64>(8)? as u64,
        memo: row.get(9)?,
        prompts: json_list(&prompts),
        base_model: row.get(11)?,
        related_version_id: row.get(12)?,
        created_at: parse_ts(row.get(13)?).unwrap_or_else(Utc::now),
        updated_at: parse_ts(row.get(14)?).unwrap_or_else(Utc::now),
    })
}

fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

impl CacheStore {
    /// The subset of `paths` with no live file record, in input order.
    pub fn uncached_paths(&self, paths: &[PathBuf]) -> Result<Vec<PathBuf>> {
        let conn = self.lock()?;
        let mut cached = HashSet::new();

        for chunk in paths.chunks(self.path_batch_size) {
            let sql = format!(
                "SELECT path FROM file_records WHERE deleted_at IS NULL AND path IN ({})",
                placeholders(chunk.len())
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params_from_iter(chunk.iter().map(|p| path_str(p))), |row| {
                row.get::<_, String>(0)
            })?;
            for row in rows {
                cached.insert(row?);
            }
        }

        Ok(paths
            .iter()
            .filter(|p| !cached.contains(&path_str(p)))
            .cloned()
            .collect())
    }

    /// Insert `record` unless a live record with the same hash and path
    /// exists. Returns whether a row was written.
    pub fn insert_file_record(&self, record: &FileRecord) -> Result<bool> {
        self.insert_file_guarded(
            record,
            "SELECT 1 FROM file_records WHERE hash = ?3 AND path = ?2 AND deleted_at IS NULL",
        )
    }

    /// Insert `record` unless any live record already has its hash.
    /// Returns whether a row was written.
    pub fn insert_file_record_if_hash_absent(&self, record: &FileRecord) -> Result<bool> {
        self.insert_file_guarded(
            record,
            "SELECT 1 FROM file_records WHERE hash = ?3 AND deleted_at IS NULL",
        )
    }

    fn insert_file_guarded(&self, record: &FileRecord, guard: &str) -> Result<bool> {
        let conn = self.lock()?;
        let prompts = serde_json::to_string(&record.prompts)?;
        let sql = format!(
            "INSERT INTO file_records ({FILE_COLUMNS})
             SELECT ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15
             WHERE NOT EXISTS ({guard})"
        );
        let changed = conn.execute(
            &sql,
            params![
                record.id,
                path_str(&record.path),
                record.hash,
                record.crc32,
                record.name,
                record.thumbnail_path.as_deref().map(path_str),
                record.thumbnail_fingerprint,
                record.descriptor_path.as_deref().map(path_str),
                record.size as i64,
                record.memo,
                prompts,
                record.base_model,
                record.related_version_id,
                ts_str(&record.created_at),
                ts_str(&record.updated_at),
            ],
        )?;
        if changed == 0 {
            debug!("Skipped file record for {}", record.path.display());
        }
        Ok(changed > 0)
    }

    /// Whether any live file record has `hash`.
    pub fn hash_exists(&self, hash: &str) -> Result<bool> {
        let conn = self.lock()?;
        let found: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM file_records WHERE hash = ?1 AND deleted_at IS NULL LIMIT 1",
                params![hash],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    pub fn file_record(&self, id: &str) -> Result<Option<FileRecord>> {
        let conn = self.lock()?;
        let sql = format!(
            "SELECT {FILE_COLUMNS} FROM file_records WHERE id = ?1 AND deleted_at IS NULL"
        );
        Ok(conn
            .query_row(&sql, params![id], row_to_file_record)
            .optional()?)
    }

    /// The live record at exactly `path`, if any.
    pub fn file_record_by_path(&self, path: &Path) -> Result<Option<FileRecord>> {
        let conn = self.lock()?;
        let sql = format!(
            "SELECT {FILE_COLUMNS} FROM file_records
             WHERE path = ?1 AND deleted_at IS NULL
             ORDER BY created_at LIMIT 1"
        );
        Ok(conn
            .query_row(&sql, params![path_str(path)], row_to_file_record)
            .optional()?)
    }

    pub fn file_records_by_hash(&self, hash: &str) -> Result<Vec<FileRecord>> {
        let conn = self.lock()?;
        let sql = format!(
            "SELECT {FILE_COLUMNS} FROM file_records
             WHERE hash = ?1 AND deleted_at IS NULL
             ORDER BY path"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![hash], row_to_file_record)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Live records related to `version_id`, either through an ingested
    /// descriptor or by matching one of the version's file hashes.
    pub fn version_file_records(&self, version_id: i64) -> Result<Vec<FileRecord>> {
        let conn = self.lock()?;
        let sql = format!(
            "SELECT {FILE_COLUMNS} FROM file_records
             WHERE deleted_at IS NULL
               AND (related_version_id = ?1
                    OR hash IN (SELECT identity_hash FROM model_files
                                WHERE version_id = ?1 AND identity_hash IS NOT NULL
                                  AND deleted_at IS NULL))
             ORDER BY path"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![version_id], row_to_file_record)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Number of live file records.
    pub fn file_record_count(&self) -> Result<usize> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM file_records WHERE deleted_at IS NULL",
            [],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    /// Summaries for every live record whose path is in `paths`, sorted by
    /// path.
    pub fn file_summaries(&self, paths: &[PathBuf]) -> Result<Vec<FileSummary>> {
        let conn = self.lock()?;
        let mut summaries = Vec::with_capacity(paths.len());

        for chunk in paths.chunks(self.path_batch_size) {
            let sql = format!(
                r#"
                SELECT fr.id, fr.name, fr.path, fr.hash, fr.thumbnail_path, fr.prompts,
                       fr.memo, fr.base_model,
                       mv.id, mv.name, mv.prompts, mv.base_model,
                       m.id, m.name, m.nsfw, m.kind
                FROM file_records fr
                LEFT JOIN model_files mf
                    ON mf.identity_hash = fr.hash AND mf.deleted_at IS NULL
                LEFT JOIN model_versions mv
                    ON mv.id = COALESCE(mf.version_id, fr.related_version_id)
                   AND mv.deleted_at IS NULL
                LEFT JOIN models m
                    ON m.id = mv.model_id AND m.deleted_at IS NULL
                WHERE fr.deleted_at IS NULL AND fr.path IN ({})
                "#,
                placeholders(chunk.len())
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params_from_iter(chunk.iter().map(|p| path_str(p))), |row| {
                let file_name: String = row.get(1)?;
                let user_prompts: String = row.get(5)?;
                let version_prompts: Option<String> = row.get(10)?;
                let model_name: Option<String> = row.get(13)?;
                let version_id: Option<i64> = row.get(8)?;
                let model_id: Option<i64> = row.get(12)?;

                let mut prompts = version_prompts.as_deref().map(json_list).unwrap_or_default();
                for prompt in json_list(&user_prompts) {
                    if !prompts.contains(&prompt) {
                        prompts.push(prompt);
                    }
                }
                let user_base: Option<String> = row.get(7)?;
                let version_base: Option<String> = row.get(11)?;

                Ok(FileSummary {
                    id: row.get(0)?,
                    name: model_name.unwrap_or(file_name),
                    version_name: row.get(9)?,
                    nsfw: row.get::<_, Option<bool>>(14)?.unwrap_or(false),
                    file_path: PathBuf::from(row.get::<_, String>(2)?),
                    kind: row.get(15)?,
                    thumbnail_path: opt_path(row.get(4)?),
                    file_hash: row.get(3)?,
                    prompts,
                    memo: row.get(6)?,
                    base_model: user_base.or(version_base),
                    related: version_id.is_some(),
                    related_model: model_id,
                    related_version: version_id,
                })
            })?;
            for row in rows {
                summaries.push(row?);
            }
        }

        summaries.sort_by(|a, b| a.file_path.cmp(&b.file_path));
        Ok(summaries)
    }

    /// Point a record at its renamed files in one statement.
    pub fn update_file_location(
        &self,
        id: &str,
        path: &Path,
        thumbnail_path: Option<&Path>,
        descriptor_path: Option<&Path>,
    ) -> Result<()> {
        let conn = self.lock()?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let changed = conn.execute(
            "UPDATE file_records
             SET path = ?2, name = ?3, thumbnail_path = ?4, descriptor_path = ?5, updated_at = ?6
             WHERE id = ?1 AND deleted_at IS NULL",
            params![
                id,
                path_str(path),
                name,
                thumbnail_path.map(path_str),
                descriptor_path.map(path_str),
                now_str(),
            ],
        )?;
        expect_one(changed, id)
    }

    pub fn set_file_memo(&self, id: &str, memo: Option<&str>) -> Result<()> {
        self.update_file_column(id, "memo", memo.map(str::to_string))
    }

    pub fn set_file_base_model(&self, id: &str, base_model: Option<&str>) -> Result<()> {
        self.update_file_column(id, "base_model", base_model.map(str::to_string))
    }

    pub fn set_file_prompts(&self, id: &str, prompts: &[String]) -> Result<()> {
        let encoded = serde_json::to_string(prompts)?;
        self.update_file_column(id, "prompts", Some(encoded))
    }

    fn update_file_column(&self, id: &str, column: &'static str, value: Option<String>) -> Result<()> {
        let conn = self.lock()?;
        let sql = format!(
            "UPDATE file_records SET {column} = ?2, updated_at = ?3
             WHERE id = ?1 AND deleted_at IS NULL"
        );
        let changed = conn.execute(&sql, params![id, value, now_str()])?;
        expect_one(changed, id)
    }

    pub fn set_file_thumbnail(&self, id: &str, thumbnail: &Path, fingerprint: Option<&str>) -> Result<()> {
        let conn = self.lock()?;
        let changed = conn.execute(
            "UPDATE file_records
             SET thumbnail_path = ?2, thumbnail_fingerprint = ?3, updated_at = ?4
             WHERE id = ?1 AND deleted_at IS NULL",
            params![id, path_str(thumbnail), fingerprint, now_str()],
        )?;
        expect_one(changed, id)
    }

    pub fn soft_delete_file_record(&self, id: &str) -> Result<()> {
        let conn = self.lock()?;
        let now = now_str();
        let changed = conn.execute(
            "UPDATE file_records SET deleted_at = ?2, updated_at = ?2
             WHERE id = ?1 AND deleted_at IS NULL",
            params![id, now],
        )?;
        expect_one(changed, id)
    }

    /// Record `version_id` as the related version of every live file with
    /// `hash`. Returns the number of records touched.
    pub fn link_files_to_version(&self, hash: &str, version_id: i64) -> Result<usize> {
        let conn = self.lock()?;
        let changed = conn.execute(
            "UPDATE file_records SET related_version_id = ?2, updated_at = ?3
             WHERE hash = ?1 AND deleted_at IS NULL",
            params![hash, version_id, now_str()],
        )?;
        Ok(changed)
    }
}

fn expect_one(changed: usize, id: &str) -> Result<()> {
    if changed == 0 {
        Err(SdcmError::not_found("file record", id))
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::ContentIdentity;

    fn record(path: &str, hash: &str) -> FileRecord {
        FileRecord::new(
            Path::new(path),
            &ContentIdentity {
                sha256: hash.to_string(),
                crc32: "00000000".to_string(),
                size: 10,
            },
        )
    }

    #[test]
    fn test_insert_guard_same_hash_same_path() {
        let store = CacheStore::in_memory().unwrap();
        assert!(store.insert_file_record(&record("/m/a.pt", "AA")).unwrap());
        assert!(!store.insert_file_record(&record("/m/a.pt", "AA")).unwrap());
        // Same content elsewhere is a legitimate duplicate.
        assert!(store.insert_file_record(&record("/m/b.pt", "AA")).unwrap());
        assert_eq!(store.file_record_count().unwrap(), 2);
    }

    #[test]
    fn test_insert_if_hash_absent() {
        let store = CacheStore::in_memory().unwrap();
        assert!(store
            .insert_file_record_if_hash_absent(&record("/m/a.pt", "AA"))
            .unwrap());
        assert!(!store
            .insert_file_record_if_hash_absent(&record("/m/b.pt", "AA"))
            .unwrap());
        assert!(store.hash_exists("AA").unwrap());
        assert!(!store.hash_exists("BB").unwrap());
    }

    #[test]
    fn test_uncached_paths_batches() {
        let store = CacheStore::in_memory().unwrap().with_path_batch_size(2);
        store.insert_file_record(&record("/m/1.pt", "H1")).unwrap();
        store.insert_file_record(&record("/m/4.pt", "H4")).unwrap();

        let paths: Vec<PathBuf> = (1..=5).map(|i| PathBuf::from(format!("/m/{i}.pt"))).collect();
        let uncached = store.uncached_paths(&paths).unwrap();
        assert_eq!(
            uncached,
            vec![
                PathBuf::from("/m/2.pt"),
                PathBuf::from("/m/3.pt"),
                PathBuf::from("/m/5.pt")
            ]
        );
    }

    #[test]
    fn test_soft_deleted_record_is_uncached() {
        let store = CacheStore::in_memory().unwrap();
        let rec = record("/m/a.pt", "AA");
        store.insert_file_record(&rec).unwrap();
        store.soft_delete_file_record(&rec.id).unwrap();

        assert!(store.file_record(&rec.id).unwrap().is_none());
        assert_eq!(
            store.uncached_paths(&[PathBuf::from("/m/a.pt")]).unwrap().len(),
            1
        );
        assert!(matches!(
            store.soft_delete_file_record(&rec.id),
            Err(SdcmError::NotFound { .. })
        ));
    }

    #[test]
    fn test_summary_without_metadata_uses_file_name() {
        let store = CacheStore::in_memory().unwrap();
        let mut rec = record("/m/detail-tweaker.safetensors", "AA");
        rec.prompts = vec!["detailed".into()];
        store.insert_file_record(&rec).unwrap();

        let summaries = store
            .file_summaries(&[PathBuf::from("/m/detail-tweaker.safetensors")])
            .unwrap();
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].name, "detail-tweaker.safetensors");
        assert!(!summaries[0].related);
        assert_eq!(summaries[0].prompts, vec!["detailed".to_string()]);
    }

    #[test]
    fn test_update_location_and_fields() {
        let store = CacheStore::in_memory().unwrap();
        let rec = record("/m/a.pt", "AA");
        store.insert_file_record(&rec).unwrap();

        store
            .update_file_location(&rec.id, Path::new("/m/b.pt"), Some(Path::new("/m/b.preview.png")), None)
            .unwrap();
        store.set_file_memo(&rec.id, Some("good at faces")).unwrap();
        store
            .set_file_prompts(&rec.id, &["a".to_string(), "b".to_string()])
            .unwrap();

        let updated = store.file_record(&rec.id).unwrap().unwrap();
        assert_eq!(updated.path, PathBuf::from("/m/b.pt"));
        assert_eq!(updated.name, "b.pt");
        assert_eq!(updated.hash, "AA");
        assert_eq!(updated.thumbnail_path, Some(PathBuf::from("/m/b.preview.png")));
        assert_eq!(updated.memo.as_deref(), Some("good at faces"));
        assert_eq!(updated.prompts, vec!["a".to_string(), "b".to_string()]);
    }
}
