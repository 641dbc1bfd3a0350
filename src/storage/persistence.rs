use std::collections::HashMap;
use std::path::PathBuf;

use anyhow::{Context, Result};

use super::types::StorageSlot;

/// One JSON object per storage slot inside the node's data directory.
#[derive(Debug, Clone)]
pub struct Persistence {
    dir: PathBuf,
}

impl Persistence {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path(&self, slot: StorageSlot) -> PathBuf {
        self.dir.join(slot.file_name())
    }

    /// Missing file means an empty map; a corrupt one is logged and ignored.
    pub async fn load(&self, slot: StorageSlot) -> HashMap<String, String> {
        let path = self.path(slot);
        match tokio::fs::read(&path).await {
            Ok(bytes) => match serde_json::from_slice(&bytes) {
                Ok(map) => map,
                Err(e) => {
                    tracing::error!("Ignoring unreadable {}: {}", path.display(), e);
                    HashMap::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => {
                tracing::error!("Failed to read {}: {}", path.display(), e);
                HashMap::new()
            }
        }
    }

    pub async fn try_save(&self, slot: StorageSlot, map: &HashMap<String, String>) -> Result<()> {
        let path = self.path(slot);
        let tmp = path.with_extension("json.tmp");
        let bytes = serde_json::to_vec(map)?;

        tokio::fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("creating {}", self.dir.display()))?;
        tokio::fs::write(&tmp, bytes)
            .await
            .with_context(|| format!("writing {}", tmp.display()))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .with_context(|| format!("replacing {}", path.display()))?;
        Ok(())
    }

    pub async fn save(&self, slot: StorageSlot, map: &HashMap<String, String>) {
        if let Err(e) = self.try_save(slot, map).await {
            tracing::error!("Failed to persist {:?}: {:#}", slot, e);
        }
    }
}
