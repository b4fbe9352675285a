//! Attachment handling.
//!
//! Uploads are streamed chunk by chunk under `<upload_root>/request_<id>/`
//! with a minted stored filename, then a file record is committed. The size
//! cap is enforced while writing, so an oversized upload is cut off without
//! ever being held in memory. A failed record insert removes the file again
//! so disk and database stay in step.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use cmsvs_common::config::UploadConfig;
use cmsvs_common::{AppError, AppResult, Clock, FilenameMinter};
use cmsvs_db::entities::file;
use cmsvs_db::repositories::{FileRepository, RequestRepository};
use futures::{Stream, TryStreamExt};
use sea_orm::{NotSet, Set};
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};

/// Stores uploaded attachments and their database records.
#[derive(Clone)]
pub struct AttachmentService {
    upload_root: PathBuf,
    max_file_size: u64,
    allowed_extensions: Vec<String>,
    minter: Arc<FilenameMinter>,
    file_repo: FileRepository,
    request_repo: RequestRepository,
    clock: Clock,
}

impl AttachmentService {
    #[must_use]
    pub fn new(
        uploads: &UploadConfig,
        minter: Arc<FilenameMinter>,
        file_repo: FileRepository,
        request_repo: RequestRepository,
        clock: Clock,
    ) -> Self {
        Self {
            upload_root: PathBuf::from(&uploads.root),
            max_file_size: uploads.max_file_size,
            allowed_extensions: uploads.allowed_extension_list(),
            minter,
            file_repo,
            request_repo,
            clock,
        }
    }

    /// Check size and extension before any disk or database work.
    pub fn validate_upload(&self, original_filename: &str, size: u64) -> AppResult<()> {
        self.minter.validate_original(original_filename)?;

        if size == 0 {
            return Err(AppError::validation("file", "uploaded file is empty"));
        }
        if size > self.max_file_size {
            return Err(AppError::validation(
                "file",
                &format!(
                    "file exceeds the maximum size of {} bytes",
                    self.max_file_size
                ),
            ));
        }

        self.check_extension(original_filename)
    }

    fn check_extension(&self, original_filename: &str) -> AppResult<()> {
        let ext = extension_of(original_filename);
        if !self.allowed_extensions.iter().any(|a| a == &ext) {
            return Err(AppError::validation(
                "file",
                &format!("file type .{ext} is not allowed"),
            ));
        }
        Ok(())
    }

    /// Store one uploaded attachment for a request.
    ///
    /// `data` is consumed chunk by chunk; the size cap is checked as bytes
    /// arrive and a partial file is removed when the copy fails.
    pub async fn attach<S>(
        &self,
        request_id: i32,
        category: &str,
        field_id: Option<&str>,
        original_filename: &str,
        mime_type: Option<&str>,
        data: S,
    ) -> AppResult<file::Model>
    where
        S: Stream<Item = AppResult<Bytes>> + Send + Unpin,
    {
        self.minter.validate_original(original_filename)?;
        self.check_extension(original_filename)?;

        let request = self
            .request_repo
            .find_by_id(request_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("request {request_id}")))?;

        let stored_filename = self
            .minter
            .mint(original_filename, category, &request.request_number, field_id)
            .await?;

        let dir = self.request_dir(request_id);
        let path = dir.join(&stored_filename);
        tokio::fs::create_dir_all(&dir).await?;
        let file_size = match write_stream(&path, data, self.max_file_size).await {
            Ok(written) => written,
            Err(e) => {
                if let Err(rm) = tokio::fs::remove_file(&path).await {
                    warn!(
                        path = %path.display(),
                        error = %rm,
                        "Failed to remove partial upload"
                    );
                }
                return Err(e);
            }
        };

        let model = file::ActiveModel {
            id: NotSet,
            request_id: Set(request_id),
            original_filename: Set(original_filename.to_string()),
            stored_filename: Set(stored_filename.clone()),
            file_path: Set(path.to_string_lossy().into_owned()),
            file_size: Set(file_size as i64),
            mime_type: Set(mime_type
                .unwrap_or("application/octet-stream")
                .to_string()),
            file_type: Set(extension_of(original_filename)),
            file_category: Set(category.to_string()),
            uploaded_at: Set(self.clock.now().into()),
        };

        match self.file_repo.create(model).await {
            Ok(record) => {
                info!(
                    request_id,
                    stored_filename = %record.stored_filename,
                    size = record.file_size,
                    "Stored attachment"
                );
                Ok(record)
            }
            Err(e) => {
                // Keep disk and database consistent on a failed insert.
                if let Err(rm) = tokio::fs::remove_file(&path).await {
                    warn!(
                        path = %path.display(),
                        error = %rm,
                        "Failed to remove orphaned upload"
                    );
                }
                Err(e)
            }
        }
    }

    /// All attachments of a request, in upload order.
    pub async fn list(&self, request_id: i32) -> AppResult<Vec<file::Model>> {
        self.file_repo.find_by_request(request_id).await
    }

    /// Best-effort removal of stored files after their records are gone.
    ///
    /// Used after a request deletion commits; failures are logged, not
    /// surfaced, because the records no longer exist.
    pub async fn remove_stored_files(&self, paths: &[String]) {
        for path in paths {
            if let Err(e) = tokio::fs::remove_file(Path::new(path)).await {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!(path = %path, error = %e, "Failed to remove stored attachment");
                }
            }
        }
        // Drop the per-request directory when it emptied out.
        if let Some(dir) = paths.first().and_then(|p| Path::new(p).parent()) {
            let _ = tokio::fs::remove_dir(dir).await;
        }
    }

    fn request_dir(&self, request_id: i32) -> PathBuf {
        self.upload_root.join(format!("request_{request_id}"))
    }
}

/// Copy an upload to disk chunk by chunk, enforcing the size cap as bytes
/// arrive. Returns the number of bytes written; empty uploads are rejected.
async fn write_stream<S>(path: &Path, mut data: S, max_file_size: u64) -> AppResult<u64>
where
    S: Stream<Item = AppResult<Bytes>> + Send + Unpin,
{
    let mut out = tokio::fs::File::create(path).await?;
    let mut written: u64 = 0;
    while let Some(chunk) = data.try_next().await? {
        written += chunk.len() as u64;
        if written > max_file_size {
            return Err(AppError::validation(
                "file",
                &format!("file exceeds the maximum size of {max_file_size} bytes"),
            ));
        }
        out.write_all(&chunk).await?;
    }
    if written == 0 {
        return Err(AppError::validation("file", "uploaded file is empty"));
    }
    out.flush().await?;
    Ok(written)
}

/// Lower-cased extension without the dot, empty when absent.
fn extension_of(filename: &str) -> String {
    filename
        .rsplit_once('.')
        .filter(|(stem, ext)| !stem.is_empty() && !ext.is_empty())
        .map(|(_, ext)| ext.to_lowercase())
        .unwrap_or_default()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use cmsvs_db::repositories::RequestRepository;
    use sea_orm::DatabaseConnection;

    fn service(root: &Path) -> AttachmentService {
        let db = Arc::new(DatabaseConnection::Disconnected);
        let uploads = UploadConfig {
            root: root.to_string_lossy().into_owned(),
            max_file_size: 1024,
            allowed_extensions: "pdf,jpg,png".into(),
        };
        let clock = Clock::new(3);
        AttachmentService::new(
            &uploads,
            Arc::new(FilenameMinter::new(clock)),
            FileRepository::new(db.clone()),
            RequestRepository::new(db),
            clock,
        )
    }

    #[test]
    fn test_validate_upload_gates() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(dir.path());

        assert!(svc.validate_upload("scan.pdf", 512).is_ok());
        assert!(svc.validate_upload("scan.PDF", 512).is_ok());

        assert!(matches!(
            svc.validate_upload("scan.pdf", 0),
            Err(AppError::Validation(_))
        ));
        assert!(matches!(
            svc.validate_upload("scan.pdf", 2048),
            Err(AppError::Validation(_))
        ));
        assert!(matches!(
            svc.validate_upload("payload.exe", 512),
            Err(AppError::Validation(_))
        ));
        assert!(matches!(
            svc.validate_upload("no_extension", 512),
            Err(AppError::Validation(_))
        ));
    }

    fn chunks(parts: Vec<&'static [u8]>) -> impl Stream<Item = AppResult<Bytes>> + Send + Unpin {
        futures::stream::iter(parts.into_iter().map(|p| Ok(Bytes::from_static(p))))
    }

    #[tokio::test]
    async fn test_write_stream_counts_and_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scan.pdf");

        let written = write_stream(&path, chunks(vec![b"hel", b"lo"]), 1024)
            .await
            .unwrap();

        assert_eq!(written, 5);
        assert_eq!(tokio::fs::read(&path).await.unwrap(), b"hello");
    }

    #[tokio::test]
    async fn test_write_stream_cuts_off_oversized_upload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("big.pdf");

        // Second chunk pushes the running total past the cap before the
        // upload finishes.
        static CHUNK: [u8; 600] = [0u8; 600];
        let err = write_stream(&path, chunks(vec![&CHUNK, &CHUNK]), 1024)
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::Validation(_)));
        // Only the within-cap prefix ever reached disk.
        assert_eq!(tokio::fs::read(&path).await.unwrap().len(), 600);
    }

    #[tokio::test]
    async fn test_write_stream_rejects_empty_upload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.pdf");

        let err = write_stream(&path, chunks(vec![]), 1024).await.unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[test]
    fn test_extension_without_dot() {
        assert_eq!(extension_of("scan.PDF"), "pdf");
        assert_eq!(extension_of("archive.tar.gz"), "gz");
        assert_eq!(extension_of("none"), "");
    }

    #[tokio::test]
    async fn test_remove_stored_files_is_best_effort() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(dir.path());

        let request_dir = dir.path().join("request_5");
        tokio::fs::create_dir_all(&request_dir).await.unwrap();
        let kept = request_dir.join("licenses_1_a.pdf");
        tokio::fs::write(&kept, b"data").await.unwrap();

        let paths = vec![
            kept.to_string_lossy().into_owned(),
            request_dir
                .join("licenses_1_missing.pdf")
                .to_string_lossy()
                .into_owned(),
        ];
        svc.remove_stored_files(&paths).await;

        assert!(!kept.exists());
        assert!(!request_dir.exists());
    }
}
