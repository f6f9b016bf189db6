//! The group registry: the single owner of live guild, party and friend state.
//!
//! # Locking
//!
//! Each group lives behind its own `tokio::sync::Mutex`, reached through a
//! `DashMap` of `Arc` handles. A mutation clones the handle out of the map
//! (dropping the map guard), locks the group, applies the operation to a
//! cloned draft, persists the draft and only then commits it. A failed
//! operation or a failed write leaves the live state untouched.
//!
//! Member indices (member → guild, member → party) are reserved through the
//! `DashMap` entry API before the locked phase and released again if the
//! operation fails, so a member can never end up in two groups of one kind.
//!
//! Notifications are published after the group lock has been released.

mod friends;
mod guilds;
mod parties;

pub use guilds::InterestReport;

use crate::config::RulesConfig;
use crate::error::{GroupError, GroupResult};
use crate::events::{EventBus, Notification, NotificationKind};
use crate::friends::FriendList;
use crate::guild::Guild;
use crate::party::Party;
use crate::persistence::GroupStore;
use crate::storage::GuildStorage;
use crate::types::{GroupId, GroupKind, MemberId};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

/// Live state of one guild.
#[derive(Debug, Clone)]
pub(crate) struct GuildEntry {
    pub(crate) guild: Guild,
    pub(crate) storage: GuildStorage,
    /// Set when the guild was deleted while others waited on its lock
    pub(crate) removed: bool,
}

#[derive(Debug, Clone)]
pub(crate) struct PartyEntry {
    pub(crate) party: Party,
    pub(crate) removed: bool,
}

/// Counts of live state, reported by the server's monitor.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryStats {
    pub guilds: usize,
    pub parties: usize,
    pub guild_members: usize,
    pub party_members: usize,
    pub friend_lists: usize,
}

/// Owns every live group and serializes mutations per group.
///
/// Built once at startup and shared behind an `Arc`. Call
/// [`GroupRegistry::load`] before serving and [`GroupRegistry::shutdown`] when
/// stopping.
pub struct GroupRegistry {
    rules: RulesConfig,
    store: Arc<dyn GroupStore>,
    events: Arc<EventBus>,
    guilds: DashMap<GroupId, Arc<Mutex<GuildEntry>>>,
    parties: DashMap<GroupId, Arc<Mutex<PartyEntry>>>,
    guild_index: DashMap<MemberId, GroupId>,
    party_index: DashMap<MemberId, GroupId>,
    /// Lowercased guild names and tags
    guild_names: DashMap<String, GroupId>,
    guild_tags: DashMap<String, GroupId>,
    /// Friend lists loaded so far; missing lists are read from the store
    friends: Mutex<HashMap<MemberId, FriendList>>,
}

impl GroupRegistry {
    pub fn new(rules: RulesConfig, store: Arc<dyn GroupStore>, events: Arc<EventBus>) -> Self {
        Self {
            rules,
            store,
            events,
            guilds: DashMap::new(),
            parties: DashMap::new(),
            guild_index: DashMap::new(),
            party_index: DashMap::new(),
            guild_names: DashMap::new(),
            guild_tags: DashMap::new(),
            friends: Mutex::new(HashMap::new()),
        }
    }

    pub fn rules(&self) -> &RulesConfig {
        &self.rules
    }

    /// Rebuilds the in-memory guild state and member indices from the store.
    ///
    /// A guild without a storage record gets a fresh one. Returns the number
    /// of guilds loaded.
    pub async fn load(&self) -> GroupResult<usize> {
        let guilds = self.store.load_all_groups().await?;
        let mut loaded = 0;

        for guild in guilds {
            if let Err(e) = guild.roster.check_invariants() {
                warn!("⚠️ Skipping guild {} ({}): {}", guild.name, guild.id, e);
                continue;
            }
            let storage = match self.store.load_storage(&guild.id).await? {
                Some(storage) => storage,
                None => {
                    warn!("⚠️ Guild {} had no storage record, creating one", guild.name);
                    let storage = GuildStorage::new(guild.id, self.rules.storage.initial_slots);
                    self.store.save_storage(&storage).await?;
                    storage
                }
            };

            for member in guild.roster.member_ids() {
                if let Some(previous) = self.guild_index.insert(member, guild.id) {
                    warn!(
                        "⚠️ Member {} is recorded in guilds {} and {}; keeping {}",
                        member, previous, guild.id, guild.id
                    );
                }
            }
            self.guild_names.insert(guild.name.to_lowercase(), guild.id);
            self.guild_tags.insert(guild.tag.to_lowercase(), guild.id);
            self.guilds.insert(
                guild.id,
                Arc::new(Mutex::new(GuildEntry {
                    guild,
                    storage,
                    removed: false,
                })),
            );
            loaded += 1;
        }

        info!("📚 Loaded {} guilds from the store", loaded);
        Ok(loaded)
    }

    /// Drops session state and reports what was live.
    ///
    /// Guild and friend state is already persisted by every commit; parties
    /// are session-scoped and simply disbanded.
    pub async fn shutdown(&self) -> RegistryStats {
        let stats = self.stats().await;
        let party_handles: Vec<_> = self.parties.iter().map(|p| p.value().clone()).collect();
        for handle in party_handles {
            handle.lock().await.removed = true;
        }
        self.parties.clear();
        self.party_index.clear();
        info!(
            "🛑 Registry shut down: {} guilds, {} parties disbanded",
            stats.guilds, stats.parties
        );
        stats
    }

    pub async fn stats(&self) -> RegistryStats {
        RegistryStats {
            guilds: self.guilds.len(),
            parties: self.parties.len(),
            guild_members: self.guild_index.len(),
            party_members: self.party_index.len(),
            friend_lists: self.friends.lock().await.len(),
        }
    }

    // ========================================================================
    // Lookups
    // ========================================================================

    pub fn member_guild(&self, member: &MemberId) -> Option<GroupId> {
        self.guild_index.get(member).map(|g| *g)
    }

    pub fn member_party(&self, member: &MemberId) -> Option<GroupId> {
        self.party_index.get(member).map(|p| *p)
    }

    pub fn guild_by_name(&self, name: &str) -> Option<GroupId> {
        self.guild_names.get(&name.to_lowercase()).map(|g| *g)
    }

    pub fn guild_by_tag(&self, tag: &str) -> Option<GroupId> {
        self.guild_tags.get(&tag.to_lowercase()).map(|g| *g)
    }

    pub fn guild_ids(&self) -> Vec<GroupId> {
        self.guilds.iter().map(|g| *g.key()).collect()
    }

    /// Snapshot of a guild, taken under its lock.
    pub async fn guild(&self, id: &GroupId) -> GroupResult<Guild> {
        let handle = self.guild_handle(id)?;
        let entry = handle.lock().await;
        if entry.removed {
            return Err(GroupError::not_found(format!("guild {}", id)));
        }
        Ok(entry.guild.clone())
    }

    /// Snapshot of a guild's storage, taken under the guild lock.
    pub async fn guild_storage(&self, id: &GroupId) -> GroupResult<GuildStorage> {
        let handle = self.guild_handle(id)?;
        let entry = handle.lock().await;
        if entry.removed {
            return Err(GroupError::not_found(format!("guild {}", id)));
        }
        Ok(entry.storage.clone())
    }

    pub async fn party(&self, id: &GroupId) -> GroupResult<Party> {
        let handle = self.party_handle(id)?;
        let entry = handle.lock().await;
        if entry.removed {
            return Err(GroupError::not_found(format!("party {}", id)));
        }
        Ok(entry.party.clone())
    }

    // ========================================================================
    // Internals shared by the operation modules
    // ========================================================================

    fn guild_handle(&self, id: &GroupId) -> GroupResult<Arc<Mutex<GuildEntry>>> {
        self.guilds
            .get(id)
            .map(|h| h.value().clone())
            .ok_or_else(|| GroupError::not_found(format!("guild {}", id)))
    }

    fn party_handle(&self, id: &GroupId) -> GroupResult<Arc<Mutex<PartyEntry>>> {
        self.parties
            .get(id)
            .map(|h| h.value().clone())
            .ok_or_else(|| GroupError::not_found(format!("party {}", id)))
    }

    fn guild_of(&self, member: &MemberId) -> GroupResult<GroupId> {
        self.member_guild(member)
            .ok_or_else(|| GroupError::not_found(format!("guild of member {}", member)))
    }

    fn party_of(&self, member: &MemberId) -> GroupResult<GroupId> {
        self.member_party(member)
            .ok_or_else(|| GroupError::not_found(format!("party of member {}", member)))
    }

    /// Applies `op` to a draft of the guild, persists what changed, commits.
    ///
    /// Returns the operation's output and a snapshot of the committed guild.
    async fn mutate_guild<T, F>(&self, id: GroupId, op_name: &str, op: F) -> GroupResult<(T, Guild)>
    where
        F: FnOnce(&mut GuildEntry) -> GroupResult<T>,
    {
        let handle = self.guild_handle(&id)?;
        let mut entry = handle.lock().await;
        if entry.removed {
            return Err(GroupError::not_found(format!("guild {}", id)));
        }

        let mut draft = entry.clone();
        let output = op(&mut draft).map_err(|e| {
            warn!("🚫 {} rejected for guild {}: {}", op_name, entry.guild.name, e);
            e
        })?;
        draft.guild.roster.check_invariants()?;

        self.persist_guild(&entry, &draft).await.map_err(|e| {
            error!("💥 {} could not be persisted for guild {}: {}", op_name, entry.guild.name, e);
            e
        })?;

        *entry = draft;
        Ok((output, entry.guild.clone()))
    }

    /// Writes the records that differ between `live` and `draft`.
    ///
    /// If the storage write fails after the guild write succeeded, the guild
    /// record is written back to its live value.
    async fn persist_guild(&self, live: &GuildEntry, draft: &GuildEntry) -> GroupResult<()> {
        let guild_changed = live.guild != draft.guild;
        if guild_changed {
            self.store.save_group(&draft.guild).await?;
        }
        if live.storage != draft.storage {
            if let Err(e) = self.store.save_storage(&draft.storage).await {
                if guild_changed {
                    if let Err(restore) = self.store.save_group(&live.guild).await {
                        error!(
                            "💥 Could not restore guild record {} after failed storage write: {}",
                            live.guild.id, restore
                        );
                    }
                }
                return Err(e.into());
            }
        }
        Ok(())
    }

    /// Applies `op` to a draft of the party and commits it. Parties are not
    /// persisted.
    async fn mutate_party<T, F>(&self, id: GroupId, op_name: &str, op: F) -> GroupResult<(T, Party)>
    where
        F: FnOnce(&mut Party) -> GroupResult<T>,
    {
        let handle = self.party_handle(&id)?;
        let mut entry = handle.lock().await;
        if entry.removed {
            return Err(GroupError::not_found(format!("party {}", id)));
        }

        let mut draft = entry.party.clone();
        let output = op(&mut draft).map_err(|e| {
            warn!("🚫 {} rejected for party {}: {}", op_name, id, e);
            e
        })?;
        draft.roster.check_invariants()?;

        entry.party = draft;
        Ok((output, entry.party.clone()))
    }

    /// Reserves `member` in `index` for `group`.
    fn reserve(
        index: &DashMap<MemberId, GroupId>,
        member: MemberId,
        group: GroupId,
        kind: GroupKind,
    ) -> GroupResult<()> {
        match index.entry(member) {
            Entry::Occupied(existing) => Err(GroupError::AlreadyExists(format!(
                "{} is already in {} {}",
                member,
                kind,
                existing.get()
            ))),
            Entry::Vacant(slot) => {
                slot.insert(group);
                Ok(())
            }
        }
    }

    /// Releases `member` from `index` if it still points at `group`.
    fn release(index: &DashMap<MemberId, GroupId>, member: &MemberId, group: &GroupId) {
        index.remove_if(member, |_, current| current == group);
    }

    async fn notify(&self, group_id: Option<GroupId>, recipients: Vec<MemberId>, kind: NotificationKind) {
        self.events
            .publish(Notification::new(group_id, recipients, kind))
            .await;
    }
}

impl std::fmt::Debug for GroupRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GroupRegistry")
            .field("guilds", &self.guilds.len())
            .field("parties", &self.parties.len())
            .field("store", &self.store)
            .finish()
    }
}
