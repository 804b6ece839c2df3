use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use restyle_contracts::runs::receipts::{write_receipt, ImageReceipt, ImageRecordDraft};
use restyle_contracts::runs::report::extension_for_mime;
use sha2::{Digest, Sha256};
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

use crate::error::StorageError;

/// Durable location of a stored object, relative to the store's root.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StorageRef(pub String);

impl StorageRef {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[async_trait]
pub trait PersistenceGateway: Send + Sync {
    async fn store(
        &self,
        bytes: &[u8],
        mime_type: &str,
        owner_id: &str,
    ) -> Result<StorageRef, StorageError>;

    /// Insert the metadata row for an object that was already stored.
    async fn record(&self, draft: ImageRecordDraft) -> Result<ImageReceipt, StorageError>;

    async fn signed_url(&self, reference: &StorageRef, ttl: Duration)
        -> Result<String, StorageError>;
}

/// Filesystem-backed store.
///
/// Objects land at `<root>/<owner>/<millis>-<uuid>.<ext>` and metadata rows
/// at `<root>/receipts/<id>.json`. Signed URLs are `file://` URLs carrying an
/// expiry and a SHA-256 digest of the secret, path and expiry.
#[derive(Debug, Clone)]
pub struct LocalImageStore {
    root: PathBuf,
    signing_secret: String,
}

impl LocalImageStore {
    pub fn new(root: impl Into<PathBuf>, signing_secret: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            signing_secret: signing_secret.into(),
        }
    }

    pub fn receipt_path(&self, id: &Uuid) -> PathBuf {
        self.root.join("receipts").join(format!("{id}.json"))
    }

    /// True when `signature` was issued for `reference` with this expiry and
    /// the expiry has not passed.
    pub fn verify(&self, reference: &StorageRef, expires_at: i64, signature: &str) -> bool {
        expires_at > Utc::now().timestamp() && self.signature(reference, expires_at) == signature
    }

    fn signature(&self, reference: &StorageRef, expires_at: i64) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.signing_secret.as_bytes());
        hasher.update(b"\n");
        hasher.update(reference.as_str().as_bytes());
        hasher.update(b"\n");
        hasher.update(expires_at.to_string().as_bytes());
        hex::encode(hasher.finalize())
    }
}

#[async_trait]
impl PersistenceGateway for LocalImageStore {
    async fn store(
        &self,
        bytes: &[u8],
        mime_type: &str,
        owner_id: &str,
    ) -> Result<StorageRef, StorageError> {
        let owner = owner_id.trim();
        if !is_safe_segment(owner) {
            return Err(StorageError::InvalidPath(owner_id.to_string()));
        }
        let reference = StorageRef(format!(
            "{owner}/{}-{}.{}",
            Utc::now().timestamp_millis(),
            Uuid::new_v4(),
            extension_for_mime(mime_type)
        ));

        let path = self.root.join(reference.as_str());
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await?;
        file.write_all(bytes).await?;
        file.flush().await?;
        Ok(reference)
    }

    async fn record(&self, draft: ImageRecordDraft) -> Result<ImageReceipt, StorageError> {
        let receipt = ImageReceipt::from_draft(draft);
        let path = self.receipt_path(&receipt.id);
        let row = receipt.clone();
        tokio::task::spawn_blocking(move || write_receipt(&path, &row))
            .await
            .map_err(|err| StorageError::Worker(err.to_string()))??;
        Ok(receipt)
    }

    async fn signed_url(
        &self,
        reference: &StorageRef,
        ttl: Duration,
    ) -> Result<String, StorageError> {
        let path = self.root.join(reference.as_str());
        if !tokio::fs::try_exists(&path).await? {
            return Err(StorageError::NotFound(reference.as_str().to_string()));
        }
        let ttl_secs = i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX);
        let expires_at = Utc::now().timestamp().saturating_add(ttl_secs);
        Ok(format!(
            "file://{}?expires={expires_at}&sig={}",
            path.display(),
            self.signature(reference, expires_at)
        ))
    }
}

fn is_safe_segment(value: &str) -> bool {
    !value.is_empty()
        && value != "."
        && value != ".."
        && !value.contains(['/', '\\'])
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use restyle_contracts::request::Mode;
    use restyle_contracts::runs::receipts::{read_receipt, ImageRecordDraft};

    use super::{LocalImageStore, PersistenceGateway, StorageRef};
    use crate::error::StorageError;

    fn signed_parts(url: &str) -> Option<(i64, String)> {
        let (_, query) = url.split_once('?')?;
        let mut expires = None;
        let mut sig = None;
        for pair in query.split('&') {
            match pair.split_once('=')? {
                ("expires", value) => expires = value.parse().ok(),
                ("sig", value) => sig = Some(value.to_string()),
                _ => {}
            }
        }
        Some((expires?, sig?))
    }

    #[tokio::test]
    async fn store_writes_bytes_under_owner_directory() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let store = LocalImageStore::new(temp.path(), "secret");

        let reference = store.store(b"jpeg-bytes", "image/jpeg", "user-1").await?;
        assert!(reference.as_str().starts_with("user-1/"));
        assert!(reference.as_str().ends_with(".jpg"));
        assert_eq!(std::fs::read(temp.path().join(reference.as_str()))?, b"jpeg-bytes");

        let other = store.store(b"jpeg-bytes", "image/jpeg", "user-1").await?;
        assert_ne!(reference, other);
        Ok(())
    }

    #[tokio::test]
    async fn owner_ids_cannot_escape_the_root() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let store = LocalImageStore::new(temp.path(), "secret");
        for owner in ["", "..", "a/b", "a\\b"] {
            let err = store.store(b"x", "image/png", owner).await.unwrap_err();
            assert!(matches!(err, StorageError::InvalidPath(_)), "{owner:?}");
        }
        Ok(())
    }

    #[tokio::test]
    async fn record_persists_a_receipt() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let store = LocalImageStore::new(temp.path(), "secret");
        let receipt = store
            .record(ImageRecordDraft {
                storage_path: "user-1/1-a.png".to_string(),
                mime_type: "image/png".to_string(),
                created_by: "user-1".to_string(),
                mode: Mode::Initial,
                prompt: Some("warm palette".to_string()),
                project_id: None,
                sha256: "ab".to_string(),
                byte_size: 1,
            })
            .await?;
        assert_eq!(read_receipt(&store.receipt_path(&receipt.id))?, receipt);
        Ok(())
    }

    #[tokio::test]
    async fn signed_url_verifies_and_rejects_tampering() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let store = LocalImageStore::new(temp.path(), "secret");
        let reference = store.store(b"png", "image/png", "user-1").await?;

        let url = store.signed_url(&reference, Duration::from_secs(3600)).await?;
        assert!(url.starts_with("file://"));
        let (expires, sig) = signed_parts(&url).ok_or_else(|| anyhow::anyhow!("bad url {url}"))?;
        assert!(store.verify(&reference, expires, &sig));
        assert!(!store.verify(&reference, expires + 1, &sig));
        assert!(!LocalImageStore::new(temp.path(), "other").verify(&reference, expires, &sig));
        Ok(())
    }

    #[tokio::test]
    async fn signing_a_missing_object_fails() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let store = LocalImageStore::new(temp.path(), "secret");
        let err = store
            .signed_url(&StorageRef("user-1/missing.png".to_string()), Duration::from_secs(60))
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::NotFound(_)));
        Ok(())
    }
}
