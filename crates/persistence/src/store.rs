//! File-based snapshot store: one JSON file per bot under a configured data
//! directory, written atomically (write to a temp file, then rename) so a
//! crash mid-write never leaves a half-written snapshot on disk.

use crate::error::StoreError;
use core_types::{BotId, BotSnapshot};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

#[derive(Clone)]
pub struct SnapshotStore {
    data_dir: PathBuf,
}

impl SnapshotStore {
    pub async fn open(data_dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let data_dir = data_dir.into();
        tokio::fs::create_dir_all(&data_dir)
            .await
            .map_err(|e| StoreError::DirCreate(data_dir.display().to_string(), e))?;
        Ok(Self { data_dir })
    }

    fn path_for(&self, id: &BotId) -> PathBuf {
        self.data_dir.join(format!("{id}.json"))
    }

    /// Writes `snapshot` to `<dataDir>/<botId>.json`, replacing any prior
    /// snapshot for the same bot. Writes to a `.tmp` sibling first and
    /// renames it into place so readers never observe a partial file.
    pub async fn save(&self, id: &BotId, snapshot: &BotSnapshot) -> Result<(), StoreError> {
        let final_path = self.path_for(id);
        let tmp_path = final_path.with_extension("json.tmp");

        let body = serde_json::to_vec_pretty(snapshot)?;
        tokio::fs::write(&tmp_path, &body)
            .await
            .map_err(|e| StoreError::Write(tmp_path.display().to_string(), e))?;
        tokio::fs::rename(&tmp_path, &final_path)
            .await
            .map_err(|e| StoreError::Rename(final_path.display().to_string(), e))?;
        debug!(bot_id = %id, path = %final_path.display(), "snapshot saved");
        Ok(())
    }

    /// Loads the snapshot for `id`. A missing file is treated as "no prior
    /// state" (`Ok(None)`), not an error, since that's the normal case for a
    /// brand-new bot. A present-but-corrupt file is logged and also treated
    /// as absent rather than failing startup for the whole process.
    pub async fn load(&self, id: &BotId) -> Result<Option<BotSnapshot>, StoreError> {
        let path = self.path_for(id);
        let body = match tokio::fs::read(&path).await {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StoreError::Read(path.display().to_string(), e)),
        };
        match serde_json::from_slice::<BotSnapshot>(&body) {
            Ok(snapshot) => Ok(Some(snapshot)),
            Err(e) => {
                warn!(bot_id = %id, path = %path.display(), error = %e, "snapshot file is corrupt, treating as absent");
                Ok(None)
            }
        }
    }

    pub async fn delete(&self, id: &BotId) -> Result<(), StoreError> {
        let path = self.path_for(id);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::Write(path.display().to_string(), e)),
        }
    }

    /// Lists every bot id with a snapshot on disk, used to repopulate the
    /// manager's bot table on startup.
    pub async fn list_ids(&self) -> Result<Vec<BotId>, StoreError> {
        self.list_ids_in(&self.data_dir).await
    }

    async fn list_ids_in(&self, dir: &Path) -> Result<Vec<BotId>, StoreError> {
        let mut entries = tokio::fs::read_dir(dir)
            .await
            .map_err(|e| StoreError::Read(dir.display().to_string(), e))?;
        let mut ids = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| StoreError::Read(dir.display().to_string(), e))?
        {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            match stem.parse::<uuid::Uuid>() {
                Ok(uuid) => ids.push(BotId(uuid)),
                Err(_) => warn!(file = %path.display(), "skipping non-uuid snapshot file name"),
            }
        }
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_types::{Bot, BotConfig, StrategyId};
    use rust_decimal_macros::dec;

    fn sample_bot() -> Bot {
        Bot::new(
            "test-bot".to_string(),
            StrategyId::Grid,
            "BTCUSDT".to_string(),
            BotConfig {
                grid_levels: 5,
                grid_spread: dec!(10),
                order_size: dec!(0.001),
                take_profit: None,
                duration_minutes: 0,
                initial_start_price: None,
                options: Default::default(),
            },
        )
    }

    #[tokio::test]
    async fn save_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::open(dir.path()).await.unwrap();
        let bot = sample_bot();
        let snapshot = BotSnapshot::new(&bot);

        store.save(&bot.id, &snapshot).await.unwrap();
        let loaded = store.load(&bot.id).await.unwrap().unwrap();
        assert_eq!(loaded.state.id, bot.id);
        assert_eq!(loaded.state.symbol, "BTCUSDT");
    }

    #[tokio::test]
    async fn load_missing_bot_returns_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::open(dir.path()).await.unwrap();
        assert!(store.load(&BotId::new()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn corrupt_snapshot_file_is_treated_as_absent() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::open(dir.path()).await.unwrap();
        let id = BotId::new();
        tokio::fs::write(dir.path().join(format!("{id}.json")), b"not json")
            .await
            .unwrap();
        assert!(store.load(&id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::open(dir.path()).await.unwrap();
        let bot = sample_bot();
        store.save(&bot.id, &BotSnapshot::new(&bot)).await.unwrap();
        store.delete(&bot.id).await.unwrap();
        store.delete(&bot.id).await.unwrap();
        assert!(store.load(&bot.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn list_ids_finds_saved_bots() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::open(dir.path()).await.unwrap();
        let bot_a = sample_bot();
        let bot_b = sample_bot();
        store.save(&bot_a.id, &BotSnapshot::new(&bot_a)).await.unwrap();
        store.save(&bot_b.id, &BotSnapshot::new(&bot_b)).await.unwrap();

        let mut ids = store.list_ids().await.unwrap();
        ids.sort_by_key(|id| id.0);
        let mut expected = vec![bot_a.id, bot_b.id];
        expected.sort_by_key(|id| id.0);
        assert_eq!(ids, expected);
    }
}
