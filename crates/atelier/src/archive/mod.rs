//! Local archive of finished media and in-flight video operations.
//!
//! Two independent collections keyed by id. Every call is a single upsert,
//! list or delete; there is no cross-collection transaction.

use chrono::{DateTime, TimeZone, Utc};

use crate::db::gallery_repo::{self, GalleryRow};
use crate::db::pending_repo::{self, PendingRow};
use crate::db::{Database, DatabaseError};
use crate::model::{GalleryItem, MediaKind, OperationKind, PendingOperation};

/// Durable persistence contract for gallery items and pending operations.
///
/// Implementations must be safe to call from many jobs at once. Writes are
/// last-writer-wins per id.
pub trait ArchiveStore: Send + Sync {
    /// Inserts or replaces an item by id.
    fn put_gallery_item(&self, item: &GalleryItem) -> Result<(), DatabaseError>;

    /// All items, newest first.
    fn list_gallery_items(&self) -> Result<Vec<GalleryItem>, DatabaseError>;

    /// Removes an item. Absent ids are not an error.
    fn delete_gallery_item(&self, id: &str) -> Result<(), DatabaseError>;

    fn put_pending_operation(&self, op: &PendingOperation) -> Result<(), DatabaseError>;

    /// All pending operations.
    ///
    /// A row whose parameters or timestamp cannot be decoded is still
    /// returned, with null parameters, so recovery can fail and discard it
    /// without holding up the others.
    fn list_pending_operations(&self) -> Result<Vec<PendingOperation>, DatabaseError>;

    fn delete_pending_operation(&self, id: &str) -> Result<(), DatabaseError>;
}

/// [`ArchiveStore`] backed by the SQLite [`Database`].
#[derive(Clone)]
pub struct SqliteArchive {
    db: Database,
}

impl SqliteArchive {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }
}

impl ArchiveStore for SqliteArchive {
    fn put_gallery_item(&self, item: &GalleryItem) -> Result<(), DatabaseError> {
        gallery_repo::upsert(&self.db, &item_to_row(item)?)
    }

    fn list_gallery_items(&self) -> Result<Vec<GalleryItem>, DatabaseError> {
        gallery_repo::list(&self.db)?
            .iter()
            .map(row_to_item)
            .collect()
    }

    fn delete_gallery_item(&self, id: &str) -> Result<(), DatabaseError> {
        gallery_repo::delete(&self.db, id)
    }

    fn put_pending_operation(&self, op: &PendingOperation) -> Result<(), DatabaseError> {
        let row = PendingRow {
            id: op.id.clone(),
            operation_name: op.operation_name.clone(),
            kind: op.kind.as_str().to_string(),
            params: serde_json::to_string(&op.params).map_err(|e| DatabaseError::Json {
                column: "params",
                source: e,
            })?,
            timestamp: op.timestamp.timestamp_millis(),
        };
        pending_repo::upsert(&self.db, &row)
    }

    fn list_pending_operations(&self) -> Result<Vec<PendingOperation>, DatabaseError> {
        Ok(pending_repo::list(&self.db)?
            .into_iter()
            .map(row_to_pending)
            .collect())
    }

    fn delete_pending_operation(&self, id: &str) -> Result<(), DatabaseError> {
        pending_repo::delete(&self.db, id)
    }
}

fn item_to_row(item: &GalleryItem) -> Result<GalleryRow, DatabaseError> {
    Ok(GalleryRow {
        id: item.id.clone(),
        kind: item.kind.as_str().to_string(),
        media: serde_json::to_string(&item.media).map_err(|e| DatabaseError::Json {
            column: "media",
            source: e,
        })?,
        timestamp: item.timestamp.timestamp_millis(),
        prompt: item.prompt.clone(),
        aspect_ratio: item.aspect_ratio.as_str().to_string(),
        metadata: serde_json::to_string(&item.metadata).map_err(|e| DatabaseError::Json {
            column: "metadata",
            source: e,
        })?,
        is_hidden: item.is_hidden,
    })
}

fn row_to_item(row: &GalleryRow) -> Result<GalleryItem, DatabaseError> {
    let kind = MediaKind::parse(&row.kind).ok_or_else(|| DatabaseError::CorruptRow {
        id: row.id.clone(),
        reason: format!("unknown media kind '{}'", row.kind),
    })?;
    let aspect_ratio = row
        .aspect_ratio
        .parse()
        .map_err(|reason| DatabaseError::CorruptRow {
            id: row.id.clone(),
            reason,
        })?;

    Ok(GalleryItem {
        id: row.id.clone(),
        kind,
        media: serde_json::from_str(&row.media).map_err(|e| DatabaseError::Json {
            column: "media",
            source: e,
        })?,
        timestamp: from_millis(row.timestamp, &row.id)?,
        prompt: row.prompt.clone(),
        aspect_ratio,
        metadata: serde_json::from_str(&row.metadata).map_err(|e| DatabaseError::Json {
            column: "metadata",
            source: e,
        })?,
        is_hidden: row.is_hidden,
    })
}

fn row_to_pending(row: PendingRow) -> PendingOperation {
    let params = serde_json::from_str(&row.params).unwrap_or_else(|e| {
        log::warn!("Pending operation {} has unreadable params: {}", row.id, e);
        serde_json::Value::Null
    });
    let timestamp = from_millis(row.timestamp, &row.id).unwrap_or_else(|e| {
        log::warn!("{}", e);
        DateTime::<Utc>::UNIX_EPOCH
    });
    PendingOperation {
        timestamp,
        kind: OperationKind::parse(&row.kind),
        id: row.id,
        operation_name: row.operation_name,
        params,
    }
}

fn from_millis(ms: i64, id: &str) -> Result<DateTime<Utc>, DatabaseError> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .ok_or_else(|| DatabaseError::CorruptRow {
            id: id.to_string(),
            reason: format!("timestamp {} out of range", ms),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{
        AspectRatio, GenerationMetadata, ImageMetadata, ImageModel, ImageQuality, InlineImage,
        MediaSource, VideoModel, VideoQuality,
    };
    use crate::request::{ScenePrompt, VideoRequest};

    fn archive() -> SqliteArchive {
        SqliteArchive::new(Database::open_in_memory().unwrap())
    }

    fn image_item(prompt: &str, ms: i64) -> GalleryItem {
        let mut item = GalleryItem::new(
            MediaKind::Image,
            MediaSource::Inline {
                mime_type: "image/png".into(),
                data: "AAAA".into(),
            },
            prompt,
            AspectRatio::Square,
            GenerationMetadata::Image(ImageMetadata {
                aspect_ratio: AspectRatio::Square,
                model: ImageModel::Pro,
                quality: ImageQuality::TwoK,
                style: Some("Noir".into()),
                scene: ScenePrompt::new(prompt),
                identity_refs: vec![InlineImage::new("ID", "image/jpeg")],
                background_ref: None,
                base_image: None,
            }),
        );
        item.timestamp = Utc.timestamp_millis_opt(ms).unwrap();
        item
    }

    #[test]
    fn test_gallery_item_survives_round_trip() {
        let store = archive();
        let item = image_item("a red bicycle", 1_700_000_000_123);
        store.put_gallery_item(&item).unwrap();

        let listed = store.list_gallery_items().unwrap();
        assert_eq!(listed, vec![item]);
    }

    #[test]
    fn test_put_twice_keeps_latest_hidden_flag() {
        let store = archive();
        let mut item = image_item("a", 1);
        store.put_gallery_item(&item).unwrap();
        item.is_hidden = true;
        store.put_gallery_item(&item).unwrap();

        let listed = store.list_gallery_items().unwrap();
        assert_eq!(listed.len(), 1);
        assert!(listed[0].is_hidden);
    }

    #[test]
    fn test_list_is_newest_first_regardless_of_insert_order() {
        let store = archive();
        let t1 = image_item("t1", 1_000);
        let t2 = image_item("t2", 2_000);
        let t3 = image_item("t3", 3_000);
        for item in [&t2, &t3, &t1] {
            store.put_gallery_item(item).unwrap();
        }

        let prompts: Vec<_> = store
            .list_gallery_items()
            .unwrap()
            .into_iter()
            .map(|i| i.prompt)
            .collect();
        assert_eq!(prompts, vec!["t3", "t2", "t1"]);
    }

    #[test]
    fn test_delete_gallery_item_is_idempotent() {
        let store = archive();
        let item = image_item("a", 1);
        store.put_gallery_item(&item).unwrap();
        store.delete_gallery_item(&item.id).unwrap();
        store.delete_gallery_item(&item.id).unwrap();
        assert!(store.list_gallery_items().unwrap().is_empty());
    }

    #[test]
    fn test_pending_operation_round_trip() {
        let store = archive();
        let request = VideoRequest {
            prompt: "drone shot".into(),
            start_frame: InlineImage::new("AAAA", "image/png"),
            end_frame: None,
            reference_images: vec![],
            aspect_ratio: AspectRatio::Landscape,
            model: VideoModel::Fast,
            resolution: VideoQuality::FullHd,
        };
        let mut op = PendingOperation::for_video("job-1", "operations/abc", &request);
        op.timestamp = Utc.timestamp_millis_opt(42).unwrap();
        store.put_pending_operation(&op).unwrap();

        let listed = store.list_pending_operations().unwrap();
        assert_eq!(listed, vec![op.clone()]);
        assert_eq!(listed[0].video_request(), Some(request));

        store.delete_pending_operation("job-1").unwrap();
        store.delete_pending_operation("job-1").unwrap();
        assert!(store.list_pending_operations().unwrap().is_empty());
    }

    #[test]
    fn test_unknown_operation_kind_is_preserved() {
        let store = archive();
        let op = PendingOperation {
            id: "job-2".into(),
            operation_name: "operations/x".into(),
            kind: OperationKind::Other("AUDIO".into()),
            params: serde_json::json!({"voice": "alto"}),
            timestamp: Utc.timestamp_millis_opt(5).unwrap(),
        };
        store.put_pending_operation(&op).unwrap();
        assert_eq!(store.list_pending_operations().unwrap(), vec![op]);
    }

    #[test]
    fn test_corrupt_kind_is_reported() {
        let store = archive();
        let mut row = item_to_row(&image_item("a", 1)).unwrap();
        row.kind = "HOLOGRAM".into();
        gallery_repo::upsert(store.database(), &row).unwrap();

        let result = store.list_gallery_items();
        assert!(matches!(result, Err(DatabaseError::CorruptRow { .. })));
    }

    #[test]
    fn test_corrupt_pending_row_does_not_hide_siblings() {
        let store = archive();
        let request = VideoRequest {
            prompt: "pan".into(),
            start_frame: InlineImage::new("AAAA", "image/png"),
            end_frame: None,
            reference_images: vec![],
            aspect_ratio: AspectRatio::Landscape,
            model: VideoModel::Fast,
            resolution: VideoQuality::Hd,
        };
        store
            .put_pending_operation(&PendingOperation::for_video("good", "operations/good", &request))
            .unwrap();
        pending_repo::upsert(
            store.database(),
            &PendingRow {
                id: "bad".into(),
                operation_name: "operations/bad".into(),
                kind: "VIDEO".into(),
                params: "{truncated".into(),
                timestamp: i64::MAX,
            },
        )
        .unwrap();

        let listed = store.list_pending_operations().unwrap();
        assert_eq!(listed.len(), 2);

        let good = listed.iter().find(|op| op.id == "good").unwrap();
        assert_eq!(good.video_request(), Some(request));

        let bad = listed.iter().find(|op| op.id == "bad").unwrap();
        assert_eq!(bad.kind, OperationKind::Video);
        assert_eq!(bad.params, serde_json::Value::Null);
        assert_eq!(bad.timestamp, DateTime::<Utc>::UNIX_EPOCH);
        assert_eq!(bad.video_request(), None);
    }
}
