use crate::error::{AppError, Result};
use crate::models::{UploadRecord, UploadStatus, UploadSummary};
use crate::repository::write_atomic;
use chrono::Utc;
use std::fs;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Upload provider hooks invoked by the compose lifecycle.
pub trait UploadStore: Send + Sync {
    /// Summaries for the given ids. Ids without a record are skipped.
    fn get_uploads(&self, ids: &[Uuid]) -> Result<Vec<UploadSummary>>;

    fn create_upload(
        &self,
        provider_name: &str,
        image_name: &str,
        settings: toml::Table,
    ) -> Result<Uuid>;

    /// Marks an upload as ready to send the finished image.
    fn ready_upload(&self, id: Uuid, image_path: &Path) -> Result<()>;

    fn delete_upload(&self, id: Uuid) -> Result<()>;
}

/// Upload jobs kept as `<uuid>.toml` files under the upload queue directory.
#[derive(Debug, Clone)]
pub struct LocalUploads {
    root: PathBuf,
}

impl LocalUploads {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    fn record_path(&self, id: Uuid) -> PathBuf {
        self.root.join(format!("{}.toml", id))
    }

    fn read(&self, id: Uuid) -> Result<Option<UploadRecord>> {
        let path = self.record_path(id);
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        Ok(Some(toml::from_str(&content)?))
    }

    fn write(&self, record: &UploadRecord) -> Result<()> {
        fs::create_dir_all(&self.root)?;
        let content = toml::to_string(record)?;
        write_atomic(&self.record_path(record.uuid), content.as_bytes())
    }
}

impl UploadStore for LocalUploads {
    fn get_uploads(&self, ids: &[Uuid]) -> Result<Vec<UploadSummary>> {
        let mut summaries = Vec::with_capacity(ids.len());
        for id in ids {
            match self.read(*id)? {
                Some(record) => summaries.push(UploadSummary::from(&record)),
                None => tracing::debug!("Upload {} has no record, skipping", id),
            }
        }
        Ok(summaries)
    }

    fn create_upload(
        &self,
        provider_name: &str,
        image_name: &str,
        settings: toml::Table,
    ) -> Result<Uuid> {
        if provider_name.trim().is_empty() {
            return Err(AppError::Upload("Provider name cannot be empty".to_string()));
        }
        if image_name.trim().is_empty() {
            return Err(AppError::Upload("Image name cannot be empty".to_string()));
        }

        let record = UploadRecord {
            uuid: Uuid::new_v4(),
            provider_name: provider_name.to_string(),
            image_name: image_name.to_string(),
            image_path: None,
            settings,
            status: UploadStatus::Waiting,
            creation_time: Utc::now().timestamp_millis() as f64 / 1000.0,
        };
        self.write(&record)?;
        tracing::info!("Created upload {} for provider {}", record.uuid, provider_name);
        Ok(record.uuid)
    }

    fn ready_upload(&self, id: Uuid, image_path: &Path) -> Result<()> {
        let mut record = self
            .read(id)?
            .ok_or_else(|| AppError::Upload(format!("Unknown upload: {}", id)))?;
        if record.status != UploadStatus::Waiting {
            return Err(AppError::Upload(format!(
                "Upload {} is not waiting (status {:?})",
                id, record.status
            )));
        }
        record.image_path = Some(image_path.to_path_buf());
        record.status = UploadStatus::Ready;
        self.write(&record)
    }

    fn delete_upload(&self, id: Uuid) -> Result<()> {
        match fs::remove_file(self.record_path(id)) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ready_records_image_path_once() {
        let dir = tempfile::tempdir().unwrap();
        let uploads = LocalUploads::new(dir.path().join("upload/queue"));

        let id = uploads
            .create_upload("aws", "demo-image", toml::Table::new())
            .unwrap();
        uploads.ready_upload(id, Path::new("/results/x/disk.ami")).unwrap();

        let summaries = uploads.get_uploads(&[id, Uuid::new_v4()]).unwrap();
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].status, UploadStatus::Ready);
        assert_eq!(
            summaries[0].image_path.as_deref(),
            Some(Path::new("/results/x/disk.ami"))
        );

        assert!(uploads.ready_upload(id, Path::new("/other")).is_err());
    }

    #[test]
    fn delete_is_quiet_for_unknown_uploads() {
        let dir = tempfile::tempdir().unwrap();
        let uploads = LocalUploads::new(dir.path().to_path_buf());
        let id = uploads.create_upload("azure", "img", toml::Table::new()).unwrap();

        uploads.delete_upload(id).unwrap();
        uploads.delete_upload(id).unwrap();
        assert!(uploads.get_uploads(&[id]).unwrap().is_empty());
    }

    #[test]
    fn blank_provider_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let uploads = LocalUploads::new(dir.path().to_path_buf());
        assert!(uploads.create_upload(" ", "img", toml::Table::new()).is_err());
    }
}
