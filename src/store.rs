//! Keyed storage for fitted model artifacts.

use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::Mutex;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use crate::error::{EngineError, Result};

pub const RISK_CLASSIFIER_KEY: &str = "risk_classifier";
pub const MOOD_FORECASTER_KEY: &str = "mood_forecaster";
pub const FEATURE_SCALER_KEY: &str = "feature_scaler";
pub const CATEGORY_ENCODER_KEY: &str = "category_encoder";

/// Opaque blob storage. Loading a key that was never saved is `NotFound`.
pub trait ArtifactStore: Send + Sync {
    fn save_blob(&self, key: &str, bytes: &[u8]) -> Result<()>;
    fn load_blob(&self, key: &str) -> Result<Vec<u8>>;
}

pub fn save<T: Serialize>(store: &dyn ArtifactStore, key: &str, artifact: &T) -> Result<()> {
    let bytes = serde_json::to_vec_pretty(artifact)?;
    store.save_blob(key, &bytes)
}

pub fn load<T: DeserializeOwned>(store: &dyn ArtifactStore, key: &str) -> Result<T> {
    let bytes = store.load_blob(key)?;
    Ok(serde_json::from_slice(&bytes)?)
}

/// One `<key>.json` file per artifact.
#[derive(Debug, Clone)]
pub struct DirectoryStore {
    root: PathBuf,
}

impl DirectoryStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.root.join(format!("{key}.json"))
    }
}

impl ArtifactStore for DirectoryStore {
    fn save_blob(&self, key: &str, bytes: &[u8]) -> Result<()> {
        fs::create_dir_all(&self.root)?;
        let path = self.path_for(key);
        fs::write(&path, bytes)?;
        debug!(path = %path.display(), bytes = bytes.len(), "artifact saved");
        Ok(())
    }

    fn load_blob(&self, key: &str) -> Result<Vec<u8>> {
        let path = self.path_for(key);
        match fs::read(&path) {
            Ok(bytes) => Ok(bytes),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!(path = %path.display(), "artifact missing");
                Err(EngineError::NotFound(key.to_string()))
            }
            Err(err) => Err(err.into()),
        }
    }
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    blobs: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ArtifactStore for MemoryStore {
    fn save_blob(&self, key: &str, bytes: &[u8]) -> Result<()> {
        let mut blobs = self.blobs.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        blobs.insert(key.to_string(), bytes.to_vec());
        Ok(())
    }

    fn load_blob(&self, key: &str) -> Result<Vec<u8>> {
        let blobs = self.blobs.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        blobs
            .get(key)
            .cloned()
            .ok_or_else(|| EngineError::NotFound(key.to_string()))
    }
}
