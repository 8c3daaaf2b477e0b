// Local working directory shared by all commands:
//
// - `bucket`: current bucket key, plain text
// - `access_token`: last bearer token, plain text (`Bearer xxx`)
// - `{bucket}.{objectKey}.json`: last object descriptor for a file
// - `{bucket}.{objectKey}.session.json`: checkpoint of an unfinished upload

use crate::error::{Result, UploadError};
use crate::session::SessionCheckpoint;
use crate::upload::ObjectDescriptor;
use crate::urn;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::debug;

#[derive(Clone, Debug)]
pub struct StateDir {
    root: PathBuf,
}

impl StateDir {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        StateDir { root: root.into() }
    }

    fn ensure_root(&self) -> Result<()> {
        fs::create_dir_all(&self.root)?;
        Ok(())
    }

    fn descriptor_path(&self, bucket_key: &str, file_key: &str) -> PathBuf {
        self.root.join(format!("{}.{}.json", bucket_key, file_key))
    }

    fn checkpoint_path(&self, bucket_key: &str, file_key: &str) -> PathBuf {
        self.root.join(format!("{}.{}.session.json", bucket_key, file_key))
    }

    /// `explicit` wins; otherwise the bucket last selected with `set_bucket`.
    pub fn current_bucket(&self, explicit: Option<&str>) -> Result<String> {
        let bucket = match explicit {
            Some(name) if !name.is_empty() => name.to_string(),
            _ => match fs::read_to_string(self.root.join("bucket")) {
                Ok(name) => name.trim().to_string(),
                Err(e) if e.kind() == ErrorKind::NotFound => {
                    return Err(UploadError::InvalidArgument(
                        "no current bucket: pass --bucket or create one first".into(),
                    ))
                }
                Err(e) => return Err(e.into()),
            },
        };
        check_bucket_key(&bucket)?;
        Ok(bucket)
    }

    pub fn set_bucket(&self, bucket_key: &str) -> Result<()> {
        check_bucket_key(bucket_key)?;
        self.ensure_root()?;
        fs::write(self.root.join("bucket"), bucket_key)?;
        Ok(())
    }

    /// Stored as `"{token_type} {access_token}"`.
    pub fn save_access_token(&self, token_type: &str, token: &str) -> Result<()> {
        self.ensure_root()?;
        fs::write(self.root.join("access_token"), format!("{} {}", token_type, token))?;
        Ok(())
    }

    pub fn clear_access_token(&self) -> Result<()> {
        match fs::remove_file(self.root.join("access_token")) {
            Err(e) if e.kind() != ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        }
    }

    /// The stored token without its type prefix.
    pub fn access_token(&self) -> Result<String> {
        let stored = fs::read_to_string(self.root.join("access_token"))
            .map_err(|e| UploadError::CredentialError(format!("no stored access token: {}", e)))?;
        let stored = stored.trim();
        Ok(stored.split_once(' ').map_or(stored, |(_, token)| token).to_string())
    }

    pub fn save_descriptor(&self, bucket_key: &str, file_key: &str, descriptor: &ObjectDescriptor) -> Result<PathBuf> {
        self.ensure_root()?;
        let path = self.descriptor_path(bucket_key, file_key);
        fs::write(&path, serde_json::to_string_pretty(descriptor)?)?;
        debug!(path = %path.display(), "object descriptor saved");
        Ok(path)
    }

    pub fn load_descriptor(&self, bucket_key: &str, file_key: &str) -> Result<Option<ObjectDescriptor>> {
        read_json(&self.descriptor_path(bucket_key, file_key))
    }

    /// URN of a previously uploaded file. Without a saved descriptor this
    /// falls back to the un-encoded object id the service would assign.
    pub fn urn(&self, bucket_key: &str, file_key: &str, safe: bool) -> Result<String> {
        Ok(match self.load_descriptor(bucket_key, file_key)? {
            Some(descriptor) if safe => urn::safe_encode(&descriptor.object_id),
            Some(descriptor) => urn::encode(&descriptor.object_id),
            None => format!("urn:adsk.objects:os.object:{}/{}", bucket_key, file_key),
        })
    }

    pub fn save_checkpoint(&self, checkpoint: &SessionCheckpoint) -> Result<()> {
        self.ensure_root()?;
        let target = &checkpoint.session.target;
        let path = self.checkpoint_path(&target.bucket_key, &target.object_key);
        fs::write(&path, serde_json::to_string(checkpoint)?)?;
        Ok(())
    }

    pub fn load_checkpoint(&self, bucket_key: &str, file_key: &str) -> Result<Option<SessionCheckpoint>> {
        read_json(&self.checkpoint_path(bucket_key, file_key))
    }

    pub fn clear_checkpoint(&self, bucket_key: &str, file_key: &str) -> Result<()> {
        match fs::remove_file(self.checkpoint_path(bucket_key, file_key)) {
            Err(e) if e.kind() != ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        }
    }
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    match fs::read_to_string(path) {
        Ok(text) => Ok(Some(serde_json::from_str(&text)?)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Bucket keys are 3 to 128 characters of `[-_.a-z0-9]`.
pub fn check_bucket_key(name: &str) -> Result<()> {
    let valid = (3..=128).contains(&name.len())
        && name
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || matches!(b, b'-' | b'_' | b'.'));
    if valid {
        Ok(())
    } else {
        Err(UploadError::InvalidArgument(format!("Invalid bucket name: {:?}", name)))
    }
}
