//! Registry metadata tables: models, tags, versions, files and images.

use super::records::{
    Creator, ImageRecord, ModelFileRecord, ModelRecord, ModelVersionRecord, ResolvedModel,
    VersionWithModel,
};
use super::{json_list, json_value, now_str, opt_path, parse_ts, path_str, ts_str, CacheStore};
use crate::error::{Result, SdcmError};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use tracing::debug;

const MODEL_COLUMNS: &str =
    "id, name, description, creator, nsfw, poi, kind, mode, original, last_synced_at, withdrawn";

const VERSION_COLUMNS: &str = "id, model_id, name, prompts, base_model, page_url, download_url, \
     primary_file_id, cover_image_id, original, registry_created_at, registry_updated_at, last_synced_at";

const MODEL_FILE_COLUMNS: &str =
    "id, version_id, name, size, kind, identity_hash, metadata, hashes, is_primary, download_url";

const IMAGE_COLUMNS: &str = "id, version_id, blur_hash, local_path, fingerprint, download_url, \
     width, height, nsfw, meta, raw_meta";

fn row_to_model(row: &Row<'_>) -> rusqlite::Result<ModelRecord> {
    let creator: Option<String> = row.get(3)?;
    Ok(ModelRecord {
        id: row.get(0)?,
        name: row.get(1)?,
        description: row.get(2)?,
        creator: creator.and_then(|c| serde_json::from_str::<Creator>(&c).ok()),
        nsfw: row.get(4)?,
        poi: row.get(5)?,
        kind: row.get(6)?,
        mode: row.get(7)?,
        original: row.get(8)?,
        last_synced_at: parse_ts(row.get(9)?),
        withdrawn: row.get(10)?,
    })
}

fn row_to_version(row: &Row<'_>) -> rusqlite::Result<ModelVersionRecord> {
    let prompts: String = row.get(3)?;
    Ok(ModelVersionRecord {
        id: row.get(0)?,
        model_id: row.get(1)?,
        name: row.get(2)?,
        prompts: json_list(&prompts),
        base_model: row.get(4)?,
        page_url: row.get(5)?,
        download_url: row.get(6)?,
        primary_file_id: row.get(7)?,
        cover_image_id: row.get(8)?,
        original: row.get(9)?,
        registry_created_at: parse_ts(row.get(10)?),
        registry_updated_at: parse_ts(row.get(11)?),
        last_synced_at: parse_ts(row.get(12)?),
    })
}

fn row_to_model_file(row: &Row<'_>) -> rusqlite::Result<ModelFileRecord> {
    Ok(ModelFileRecord {
        id: row.get(0)?,
        version_id: row.get(1)?,
        name: row.get(2)?,
        size: row.get::<_, i64>(3)? as u64,
        kind: row.get(4)?,
        identity_hash: row.get(5)?,
        metadata: json_value(row.get(6)?),
        hashes: json_value(row.get(7)?),
        primary: row.get(8)?,
        download_url: row.get(9)?,
    })
}

fn row_to_image(row: &Row<'_>) -> rusqlite::Result<ImageRecord> {
    Ok(ImageRecord {
        id: row.get(0)?,
        version_id: row.get(1)?,
        blur_hash: row.get(2)?,
        local_path: opt_path(row.get(3)?),
        fingerprint: row.get(4)?,
        download_url: row.get(5)?,
        width: row.get(6)?,
        height: row.get(7)?,
        nsfw: row.get(8)?,
        meta: json_value(row.get(9)?),
        raw_meta: row.get(10)?,
    })
}

fn query_model(conn: &Connection, id: i64) -> Result<Option<ModelRecord>> {
    let sql = format!("SELECT {MODEL_COLUMNS} FROM models WHERE id = ?1 AND deleted_at IS NULL");
    Ok(conn.query_row(&sql, params![id], row_to_model).optional()?)
}

fn query_version(conn: &Connection, id: i64) -> Result<Option<ModelVersionRecord>> {
    let sql = format!(
        "SELECT {VERSION_COLUMNS} FROM model_versions WHERE id = ?1 AND deleted_at IS NULL"
    );
    Ok(conn.query_row(&sql, params![id], row_to_version).optional()?)
}

fn opt_json<T: serde::Serialize>(value: &Option<T>) -> Result<Option<String>> {
    value
        .as_ref()
        .map(serde_json::to_string)
        .transpose()
        .map_err(SdcmError::from)
}

impl CacheStore {
    // ---- models ----

    pub fn model(&self, id: i64) -> Result<Option<ModelRecord>> {
        let conn = self.lock()?;
        query_model(&conn, id)
    }

    /// Insert an inferred model only if no record for its id exists.
    ///
    /// Returns whether the stub was written; an existing, possibly richer
    /// record is never overwritten.
    pub fn insert_model_stub(&self, model: &ModelRecord) -> Result<bool> {
        let conn = self.lock()?;
        let now = now_str();
        let changed = conn.execute(
            "INSERT OR IGNORE INTO models
                (id, name, description, creator, nsfw, poi, kind, mode, original,
                 last_synced_at, withdrawn, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?12)",
            params![
                model.id,
                model.name,
                model.description,
                opt_json(&model.creator)?,
                model.nsfw,
                model.poi,
                model.kind,
                model.mode,
                model.original,
                model.last_synced_at.as_ref().map(ts_str),
                model.withdrawn,
                now,
            ],
        )?;
        Ok(changed > 0)
    }

    /// Insert or fully refresh a model from a registry fetch.
    pub fn upsert_model(&self, model: &ModelRecord) -> Result<()> {
        let conn = self.lock()?;
        let now = now_str();
        conn.execute(
            "INSERT INTO models
                (id, name, description, creator, nsfw, poi, kind, mode, original,
                 last_synced_at, withdrawn, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?12)
             ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                description = excluded.description,
                creator = excluded.creator,
                nsfw = excluded.nsfw,
                poi = excluded.poi,
                kind = excluded.kind,
                mode = excluded.mode,
                original = excluded.original,
                last_synced_at = excluded.last_synced_at,
                withdrawn = excluded.withdrawn,
                updated_at = excluded.updated_at,
                deleted_at = NULL",
            params![
                model.id,
                model.name,
                model.description,
                opt_json(&model.creator)?,
                model.nsfw,
                model.poi,
                model.kind,
                model.mode,
                model.original,
                model.last_synced_at.as_ref().map(ts_str),
                model.withdrawn,
                now,
            ],
        )?;
        Ok(())
    }

    /// Replace a model's tag set.
    pub fn replace_model_tags(&self, model_id: i64, tags: &[String]) -> Result<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM model_tags WHERE model_id = ?1", params![model_id])?;
        {
            let mut stmt =
                tx.prepare("INSERT OR IGNORE INTO model_tags (model_id, tag) VALUES (?1, ?2)")?;
            for tag in tags {
                stmt.execute(params![model_id, tag])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    pub fn model_tags(&self, model_id: i64) -> Result<Vec<String>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT tag FROM model_tags WHERE model_id = ?1 ORDER BY tag")?;
        let rows = stmt.query_map(params![model_id], |row| row.get(0))?;
        Ok(rows.collect::<rusqlite::Result<Vec<String>>>()?)
    }

    /// Live, non-withdrawn models never synced or last synced before
    /// `cutoff`.
    pub fn models_due_for_sync(&self, cutoff: DateTime<Utc>) -> Result<Vec<ModelRecord>> {
        let conn = self.lock()?;
        let sql = format!(
            "SELECT {MODEL_COLUMNS} FROM models
             WHERE deleted_at IS NULL AND withdrawn = 0
               AND (last_synced_at IS NULL OR last_synced_at < ?1)
             ORDER BY id"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![ts_str(&cutoff)], row_to_model)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Flag a model the registry no longer serves.
    pub fn mark_model_withdrawn(&self, id: i64) -> Result<()> {
        let conn = self.lock()?;
        let now = now_str();
        let changed = conn.execute(
            "UPDATE models SET withdrawn = 1, last_synced_at = ?2, updated_at = ?2
             WHERE id = ?1 AND deleted_at IS NULL",
            params![id, now],
        )?;
        if changed == 0 {
            return Err(SdcmError::not_found("model", id));
        }
        debug!("Marked model {} withdrawn", id);
        Ok(())
    }

    // ---- versions ----

    pub fn upsert_model_version(&self, version: &ModelVersionRecord) -> Result<()> {
        let conn = self.lock()?;
        let now = now_str();
        conn.execute(
            "INSERT INTO model_versions
                (id, model_id, name, prompts, base_model, page_url, download_url,
                 primary_file_id, cover_image_id, original, registry_created_at,
                 registry_updated_at, last_synced_at, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?14)
             ON CONFLICT(id) DO UPDATE SET
                model_id = excluded.model_id,
                name = excluded.name,
                prompts = excluded.prompts,
                base_model = excluded.base_model,
                page_url = excluded.page_url,
                download_url = excluded.download_url,
                primary_file_id = excluded.primary_file_id,
                cover_image_id = excluded.cover_image_id,
                original = excluded.original,
                registry_created_at = excluded.registry_created_at,
                registry_updated_at = excluded.registry_updated_at,
                last_synced_at = excluded.last_synced_at,
                updated_at = excluded.updated_at,
                deleted_at = NULL",
            params![
                version.id,
                version.model_id,
                version.name,
                serde_json::to_string(&version.prompts)?,
                version.base_model,
                version.page_url,
                version.download_url,
                version.primary_file_id,
                version.cover_image_id,
                version.original,
                version.registry_created_at.as_ref().map(ts_str),
                version.registry_updated_at.as_ref().map(ts_str),
                version.last_synced_at.as_ref().map(ts_str),
                now,
            ],
        )?;
        Ok(())
    }

    pub fn model_version(&self, id: i64) -> Result<Option<ModelVersionRecord>> {
        let conn = self.lock()?;
        query_version(&conn, id)
    }

    pub fn version_with_model(&self, id: i64) -> Result<Option<VersionWithModel>> {
        let conn = self.lock()?;
        let Some(version) = query_version(&conn, id)? else {
            return Ok(None);
        };
        let model = query_model(&conn, version.model_id)?;
        Ok(Some(VersionWithModel { version, model }))
    }

    /// Every live version of a model, newest registry id first.
    pub fn model_versions(&self, model_id: i64) -> Result<Vec<ModelVersionRecord>> {
        let conn = self.lock()?;
        let sql = format!(
            "SELECT {VERSION_COLUMNS} FROM model_versions
             WHERE model_id = ?1 AND deleted_at IS NULL
             ORDER BY id DESC"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![model_id], row_to_version)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// The other versions of the model that owns `version_id`.
    pub fn sibling_versions(&self, version_id: i64) -> Result<Vec<ModelVersionRecord>> {
        let Some(version) = self.model_version(version_id)? else {
            return Err(SdcmError::not_found("model version", version_id));
        };
        Ok(self
            .model_versions(version.model_id)?
            .into_iter()
            .filter(|v| v.id != version_id)
            .collect())
    }

    pub fn set_version_cover(&self, version_id: i64, image_id: &str) -> Result<()> {
        let conn = self.lock()?;
        let changed = conn.execute(
            "UPDATE model_versions SET cover_image_id = ?2, updated_at = ?3
             WHERE id = ?1 AND deleted_at IS NULL",
            params![version_id, image_id, now_str()],
        )?;
        if changed == 0 {
            return Err(SdcmError::not_found("model version", version_id));
        }
        Ok(())
    }

    // ---- model files ----

    /// Upsert a version's files in registry order.
    ///
    /// Conflicts on the identity hash refresh the mutable fields and move the
    /// row to the version being written, so content re-uploaded under a new
    /// version belongs to the newest listing. Files the registry lists
    /// without a hash are keyed by their id.
    pub fn upsert_model_files(&self, files: &[ModelFileRecord]) -> Result<()> {
        let mut conn = self.lock()?;
        let now = now_str();
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO model_files
                    (id, version_id, name, size, kind, identity_hash, metadata, hashes,
                     is_primary, download_url, seq, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?12)
                 ON CONFLICT(identity_hash) DO UPDATE SET
                    version_id = excluded.version_id,
                    name = excluded.name,
                    size = excluded.size,
                    kind = excluded.kind,
                    metadata = excluded.metadata,
                    hashes = excluded.hashes,
                    is_primary = excluded.is_primary,
                    download_url = excluded.download_url,
                    seq = excluded.seq,
                    updated_at = excluded.updated_at,
                    deleted_at = NULL
                 ON CONFLICT(id) DO UPDATE SET
                    version_id = excluded.version_id,
                    name = excluded.name,
                    size = excluded.size,
                    kind = excluded.kind,
                    identity_hash = COALESCE(model_files.identity_hash, excluded.identity_hash),
                    metadata = excluded.metadata,
                    hashes = excluded.hashes,
                    is_primary = excluded.is_primary,
                    download_url = excluded.download_url,
                    seq = excluded.seq,
                    updated_at = excluded.updated_at,
                    deleted_at = NULL",
            )?;
            for (seq, file) in files.iter().enumerate() {
                stmt.execute(params![
                    file.id,
                    file.version_id,
                    file.name,
                    file.size as i64,
                    file.kind,
                    file.identity_hash,
                    opt_json(&file.metadata)?,
                    opt_json(&file.hashes)?,
                    file.primary,
                    file.download_url,
                    seq as i64,
                    now,
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// A version's files in registry order.
    pub fn version_files(&self, version_id: i64) -> Result<Vec<ModelFileRecord>> {
        let conn = self.lock()?;
        let sql = format!(
            "SELECT {MODEL_FILE_COLUMNS} FROM model_files
             WHERE version_id = ?1 AND deleted_at IS NULL
             ORDER BY seq, id"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![version_id], row_to_model_file)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub fn model_file(&self, id: i64) -> Result<Option<ModelFileRecord>> {
        let conn = self.lock()?;
        let sql = format!(
            "SELECT {MODEL_FILE_COLUMNS} FROM model_files WHERE id = ?1 AND deleted_at IS NULL"
        );
        Ok(conn.query_row(&sql, params![id], row_to_model_file).optional()?)
    }

    pub fn model_file_by_hash(&self, hash: &str) -> Result<Option<ModelFileRecord>> {
        let conn = self.lock()?;
        let sql = format!(
            "SELECT {MODEL_FILE_COLUMNS} FROM model_files
             WHERE identity_hash = ?1 AND deleted_at IS NULL"
        );
        Ok(conn.query_row(&sql, params![hash], row_to_model_file).optional()?)
    }

    /// Resolve a content hash to the model and version that declare it.
    pub fn resolve_model_by_hash(&self, hash: &str) -> Result<Option<ResolvedModel>> {
        let conn = self.lock()?;
        Ok(conn
            .query_row(
                "SELECT m.id, m.name, mv.id, mv.name
                 FROM model_files mf
                 JOIN model_versions mv ON mv.id = mf.version_id AND mv.deleted_at IS NULL
                 JOIN models m ON m.id = mv.model_id AND m.deleted_at IS NULL
                 WHERE mf.identity_hash = ?1 AND mf.deleted_at IS NULL",
                params![hash],
                |row| {
                    Ok(ResolvedModel {
                        model_id: row.get(0)?,
                        model_name: row.get(1)?,
                        version_id: row.get(2)?,
                        version_name: row.get(3)?,
                    })
                },
            )
            .optional()?)
    }

    // ---- images ----

    /// Upsert a version's gallery in registry order, keyed by
    /// (version, blur hash). Existing rows keep their id.
    pub fn upsert_images(&self, images: &[ImageRecord]) -> Result<()> {
        let mut conn = self.lock()?;
        let now = now_str();
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO images
                    (id, version_id, blur_hash, local_path, fingerprint, download_url,
                     width, height, nsfw, meta, raw_meta, seq, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?13)
                 ON CONFLICT(version_id, blur_hash) DO UPDATE SET
                    download_url = excluded.download_url,
                    width = excluded.width,
                    height = excluded.height,
                    nsfw = excluded.nsfw,
                    meta = excluded.meta,
                    raw_meta = excluded.raw_meta,
                    seq = excluded.seq,
                    updated_at = excluded.updated_at,
                    deleted_at = NULL",
            )?;
            for (seq, image) in images.iter().enumerate() {
                stmt.execute(params![
                    image.id,
                    image.version_id,
                    image.blur_hash,
                    image.local_path.as_deref().map(path_str),
                    image.fingerprint,
                    image.download_url,
                    image.width,
                    image.height,
                    image.nsfw,
                    opt_json(&image.meta)?,
                    image.raw_meta,
                    seq as i64,
                    now,
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// A version's gallery in registry order.
    pub fn version_images(&self, version_id: i64) -> Result<Vec<ImageRecord>> {
        let conn = self.lock()?;
        let sql = format!(
            "SELECT {IMAGE_COLUMNS} FROM images
             WHERE version_id = ?1 AND deleted_at IS NULL
             ORDER BY seq, id"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![version_id], row_to_image)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub fn image(&self, id: &str) -> Result<Option<ImageRecord>> {
        let conn = self.lock()?;
        let sql = format!("SELECT {IMAGE_COLUMNS} FROM images WHERE id = ?1 AND deleted_at IS NULL");
        Ok(conn.query_row(&sql, params![id], row_to_image).optional()?)
    }

    /// Record where a gallery image was cached locally.
    pub fn set_image_local(&self, id: &str, path: &Path, fingerprint: Option<&str>) -> Result<()> {
        let conn = self.lock()?;
        let changed = conn.execute(
            "UPDATE images SET local_path = ?2, fingerprint = ?3, updated_at = ?4
             WHERE id = ?1 AND deleted_at IS NULL",
            params![id, path_str(path), fingerprint, now_str()],
        )?;
        if changed == 0 {
            return Err(SdcmError::not_found("image", id));
        }
        Ok(())
    }
}
