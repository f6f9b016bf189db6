//! Persistence boundary for guilds, guild storage and friend lists.
//!
//! Parties are session-scoped and never reach the store.

use crate::error::{StoreError, StoreResult};
use crate::friends::FriendList;
use crate::guild::Guild;
use crate::storage::GuildStorage;
use crate::types::{GroupId, MemberId};
use async_trait::async_trait;
use dashmap::DashMap;
use serde::{de::DeserializeOwned, Serialize};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::fs as tokio_fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, error, info, instrument};

/// Storage engine used by the registry. Each call is atomic on its own.
#[async_trait]
pub trait GroupStore: Send + Sync + std::fmt::Debug {
    /// Persists a new guild; fails with `Duplicate` if the id is taken.
    async fn create_group(&self, guild: &Guild) -> StoreResult<()>;

    async fn load_group(&self, id: &GroupId) -> StoreResult<Option<Guild>>;

    async fn load_all_groups(&self) -> StoreResult<Vec<Guild>>;

    async fn save_group(&self, guild: &Guild) -> StoreResult<()>;

    /// Removes a guild together with its storage.
    async fn delete_group(&self, id: &GroupId) -> StoreResult<()>;

    async fn create_storage(&self, storage: &GuildStorage) -> StoreResult<()>;

    async fn load_storage(&self, guild_id: &GroupId) -> StoreResult<Option<GuildStorage>>;

    async fn save_storage(&self, storage: &GuildStorage) -> StoreResult<()>;

    async fn load_friends(&self, member: &MemberId) -> StoreResult<Option<FriendList>>;

    async fn save_friends(&self, list: &FriendList) -> StoreResult<()>;
}

// ============================================================================
// In-memory store
// ============================================================================

/// Store kept entirely in memory, for tests and ephemeral nodes.
///
/// [`MemoryStore::set_failing`] makes every write fail, which lets callers
/// exercise their rollback paths.
#[derive(Debug, Default)]
pub struct MemoryStore {
    guilds: DashMap<GroupId, Guild>,
    storages: DashMap<GroupId, GuildStorage>,
    friends: DashMap<MemberId, FriendList>,
    failing: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn check_writable(&self) -> StoreResult<()> {
        if self.failing.load(Ordering::SeqCst) {
            Err(StoreError::Unavailable("memory store is failing writes".to_string()))
        } else {
            Ok(())
        }
    }

    pub fn guild_count(&self) -> usize {
        self.guilds.len()
    }

    pub fn stored_guild(&self, id: &GroupId) -> Option<Guild> {
        self.guilds.get(id).map(|g| g.clone())
    }

    pub fn stored_storage(&self, id: &GroupId) -> Option<GuildStorage> {
        self.storages.get(id).map(|s| s.clone())
    }
}

#[async_trait]
impl GroupStore for MemoryStore {
    async fn create_group(&self, guild: &Guild) -> StoreResult<()> {
        self.check_writable()?;
        if self.guilds.contains_key(&guild.id) {
            return Err(StoreError::Duplicate(guild.id.to_string()));
        }
        self.guilds.insert(guild.id, guild.clone());
        Ok(())
    }

    async fn load_group(&self, id: &GroupId) -> StoreResult<Option<Guild>> {
        Ok(self.stored_guild(id))
    }

    async fn load_all_groups(&self) -> StoreResult<Vec<Guild>> {
        Ok(self.guilds.iter().map(|g| g.value().clone()).collect())
    }

    async fn save_group(&self, guild: &Guild) -> StoreResult<()> {
        self.check_writable()?;
        self.guilds.insert(guild.id, guild.clone());
        Ok(())
    }

    async fn delete_group(&self, id: &GroupId) -> StoreResult<()> {
        self.check_writable()?;
        self.guilds.remove(id);
        self.storages.remove(id);
        Ok(())
    }

    async fn create_storage(&self, storage: &GuildStorage) -> StoreResult<()> {
        self.check_writable()?;
        if self.storages.contains_key(&storage.guild_id) {
            return Err(StoreError::Duplicate(format!("storage {}", storage.guild_id)));
        }
        self.storages.insert(storage.guild_id, storage.clone());
        Ok(())
    }

    async fn load_storage(&self, guild_id: &GroupId) -> StoreResult<Option<GuildStorage>> {
        Ok(self.stored_storage(guild_id))
    }

    async fn save_storage(&self, storage: &GuildStorage) -> StoreResult<()> {
        self.check_writable()?;
        self.storages.insert(storage.guild_id, storage.clone());
        Ok(())
    }

    async fn load_friends(&self, member: &MemberId) -> StoreResult<Option<FriendList>> {
        Ok(self.friends.get(member).map(|l| l.clone()))
    }

    async fn save_friends(&self, list: &FriendList) -> StoreResult<()> {
        self.check_writable()?;
        self.friends.insert(list.member, list.clone());
        Ok(())
    }
}

// ============================================================================
// JSON file store
// ============================================================================

/// One JSON file per record under `guilds/`, `storage/` and `friends/`.
///
/// Writes go to a temporary file which is synced and renamed over the target.
#[derive(Debug)]
pub struct JsonFileStore {
    root: PathBuf,
}

impl JsonFileStore {
    const GUILDS: &'static str = "guilds";
    const STORAGE: &'static str = "storage";
    const FRIENDS: &'static str = "friends";

    /// Opens (and creates if needed) a store rooted at `root`.
    pub async fn open(root: impl Into<PathBuf>) -> StoreResult<Self> {
        let root = root.into();
        for dir in [Self::GUILDS, Self::STORAGE, Self::FRIENDS] {
            let path = root.join(dir);
            tokio_fs::create_dir_all(&path)
                .await
                .map_err(|e| StoreError::DirectoryCreate(path.clone(), e))?;
        }
        info!("💾 Opened JSON store at {}", root.display());
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn record_path(&self, dir: &str, id: &impl std::fmt::Display) -> PathBuf {
        self.root.join(dir).join(format!("{}.json", id))
    }

    async fn read_record<T: DeserializeOwned + Send>(&self, path: &Path) -> StoreResult<Option<T>> {
        match tokio_fs::read(path).await {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(|e| StoreError::Deserialization(path.to_path_buf(), e)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StoreError::FileRead(path.to_path_buf(), e)),
        }
    }

    #[instrument(skip(self, record))]
    async fn write_record<T: Serialize + Sync>(&self, path: &Path, key: &str, record: &T) -> StoreResult<()> {
        let json = serde_json::to_vec_pretty(record)
            .map_err(|e| StoreError::Serialization(key.to_string(), e))?;
        let temp_path = path.with_extension("tmp");

        let mut file = tokio_fs::File::create(&temp_path)
            .await
            .map_err(|e| StoreError::FileWrite(temp_path.clone(), e))?;
        file.write_all(&json)
            .await
            .map_err(|e| StoreError::FileWrite(temp_path.clone(), e))?;
        file.sync_all()
            .await
            .map_err(|e| StoreError::FileWrite(temp_path.clone(), e))?;

        tokio_fs::rename(&temp_path, path)
            .await
            .map_err(|e| StoreError::FileRename(temp_path, path.to_path_buf(), e))?;

        debug!("Saved record {}", key);
        Ok(())
    }

    async fn remove_record(&self, path: &Path) -> StoreResult<()> {
        match tokio_fs::remove_file(path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::FileDelete(path.to_path_buf(), e)),
        }
    }
}

#[async_trait]
impl GroupStore for JsonFileStore {
    async fn create_group(&self, guild: &Guild) -> StoreResult<()> {
        let path = self.record_path(Self::GUILDS, &guild.id);
        if tokio_fs::try_exists(&path).await.unwrap_or(false) {
            return Err(StoreError::Duplicate(guild.id.to_string()));
        }
        self.write_record(&path, &guild.id.to_string(), guild).await
    }

    async fn load_group(&self, id: &GroupId) -> StoreResult<Option<Guild>> {
        self.read_record(&self.record_path(Self::GUILDS, id)).await
    }

    #[instrument(skip(self))]
    async fn load_all_groups(&self) -> StoreResult<Vec<Guild>> {
        let dir = self.root.join(Self::GUILDS);
        let mut entries = tokio_fs::read_dir(&dir)
            .await
            .map_err(|e| StoreError::DirectoryRead(dir.clone(), e))?;

        let mut guilds = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| StoreError::DirectoryRead(dir.clone(), e))?
        {
            let path = entry.path();
            if path.extension().and_then(|s| s.to_str()) != Some("json") {
                continue;
            }
            match self.read_record::<Guild>(&path).await {
                Ok(Some(guild)) => guilds.push(guild),
                Ok(None) => {}
                Err(e) => {
                    error!("Failed to load guild from {}: {}", path.display(), e);
                    return Err(e);
                }
            }
        }
        Ok(guilds)
    }

    async fn save_group(&self, guild: &Guild) -> StoreResult<()> {
        let path = self.record_path(Self::GUILDS, &guild.id);
        self.write_record(&path, &guild.id.to_string(), guild).await
    }

    async fn delete_group(&self, id: &GroupId) -> StoreResult<()> {
        self.remove_record(&self.record_path(Self::STORAGE, id)).await?;
        self.remove_record(&self.record_path(Self::GUILDS, id)).await?;
        info!("Deleted guild record {}", id);
        Ok(())
    }

    async fn create_storage(&self, storage: &GuildStorage) -> StoreResult<()> {
        let path = self.record_path(Self::STORAGE, &storage.guild_id);
        if tokio_fs::try_exists(&path).await.unwrap_or(false) {
            return Err(StoreError::Duplicate(format!("storage {}", storage.guild_id)));
        }
        self.write_record(&path, &storage.guild_id.to_string(), storage).await
    }

    async fn load_storage(&self, guild_id: &GroupId) -> StoreResult<Option<GuildStorage>> {
        self.read_record(&self.record_path(Self::STORAGE, guild_id)).await
    }

    async fn save_storage(&self, storage: &GuildStorage) -> StoreResult<()> {
        let path = self.record_path(Self::STORAGE, &storage.guild_id);
        self.write_record(&path, &storage.guild_id.to_string(), storage).await
    }

    async fn load_friends(&self, member: &MemberId) -> StoreResult<Option<FriendList>> {
        self.read_record(&self.record_path(Self::FRIENDS, member)).await
    }

    async fn save_friends(&self, list: &FriendList) -> StoreResult<()> {
        let path = self.record_path(Self::FRIENDS, &list.member);
        self.write_record(&path, &list.member.to_string(), list).await
    }
}
