//! Guild lifecycle, membership, progression and storage operations.

use super::{GroupRegistry, GuildEntry};
use crate::error::{GroupError, GroupResult};
use crate::events::NotificationKind;
use crate::guild::{validate_name, validate_tag, Guild};
use crate::leadership::{Departure, LeadershipChange};
use crate::progression::{add_experience, ProgressionOutcome};
use crate::storage::{GuildStorage, UpgradeReceipt};
use crate::types::{GroupId, GroupKind, GuildRole, MemberId};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

/// Result of one interest accrual pass over every guild.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InterestReport {
    pub guilds_credited: usize,
    pub total_credited: f64,
    pub failures: usize,
}

impl GroupRegistry {
    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Founds a guild led by `leader`, together with its storage.
    pub async fn create_guild(&self, leader: MemberId, name: &str, tag: &str) -> GroupResult<Guild> {
        validate_name(name, &self.rules.guilds)?;
        validate_tag(tag, &self.rules.guilds)?;

        let id = GroupId::new();
        let name_key = name.to_lowercase();
        let tag_key = tag.to_lowercase();

        let result = self.found_guild(id, leader, name, tag, &name_key, &tag_key).await;
        match result {
            Ok(guild) => {
                info!("🏰 Guild {} [{}] founded by {}", guild.name, guild.tag, leader);
                self.notify(
                    Some(id),
                    vec![leader],
                    NotificationKind::GroupCreated {
                        group: GroupKind::Guild,
                        name: Some(guild.name.clone()),
                    },
                )
                .await;
                Ok(guild)
            }
            Err(e) => {
                warn!("🚫 Guild {} could not be founded: {}", name, e);
                Self::release(&self.guild_index, &leader, &id);
                self.guild_names.remove_if(&name_key, |_, owner| *owner == id);
                self.guild_tags.remove_if(&tag_key, |_, owner| *owner == id);
                Err(e)
            }
        }
    }

    async fn found_guild(
        &self,
        id: GroupId,
        leader: MemberId,
        name: &str,
        tag: &str,
        name_key: &str,
        tag_key: &str,
    ) -> GroupResult<Guild> {
        Self::reserve(&self.guild_index, leader, id, GroupKind::Guild)?;
        Self::reserve_label(&self.guild_names, name_key, id, "name")?;
        Self::reserve_label(&self.guild_tags, tag_key, id, "tag")?;

        let guild = Guild::new(id, leader, name, tag, self.rules.guilds.default_max_members);
        let storage = GuildStorage::new(id, self.rules.storage.initial_slots);

        self.store.create_group(&guild).await?;
        if let Err(e) = self.store.create_storage(&storage).await {
            if let Err(cleanup) = self.store.delete_group(&id).await {
                error!("💥 Could not remove half-created guild {}: {}", id, cleanup);
            }
            return Err(e.into());
        }

        self.guilds.insert(
            id,
            Arc::new(Mutex::new(GuildEntry {
                guild: guild.clone(),
                storage,
                removed: false,
            })),
        );
        Ok(guild)
    }

    fn reserve_label(
        labels: &DashMap<String, GroupId>,
        key: &str,
        id: GroupId,
        field: &str,
    ) -> GroupResult<()> {
        match labels.entry(key.to_string()) {
            Entry::Occupied(_) => Err(GroupError::AlreadyExists(format!(
                "guild {} '{}' is taken",
                field, key
            ))),
            Entry::Vacant(slot) => {
                slot.insert(id);
                Ok(())
            }
        }
    }

    /// Deletes the actor's guild and its storage. Leader only.
    pub async fn delete_guild(&self, actor: MemberId) -> GroupResult<()> {
        let id = self.guild_of(&actor)?;
        let handle = self.guild_handle(&id)?;
        let mut entry = handle.lock().await;
        if entry.removed {
            return Err(GroupError::not_found(format!("guild {}", id)));
        }
        if let Err(e) = entry.guild.require_at_least(&actor, GuildRole::Leader) {
            warn!("🚫 Guild deletion rejected for {}: {}", entry.guild.name, e);
            return Err(e);
        }

        self.store.delete_group(&id).await.map_err(|e| {
            error!("💥 Could not delete guild {}: {}", entry.guild.name, e);
            GroupError::from(e)
        })?;
        entry.removed = true;
        let guild = entry.guild.clone();
        drop(entry);

        self.forget_guild(&guild);
        info!("🗑️ Guild {} deleted by {}", guild.name, actor);
        self.notify(
            Some(id),
            guild.roster.member_ids(),
            NotificationKind::GroupDisbanded {
                group: GroupKind::Guild,
            },
        )
        .await;
        Ok(())
    }

    /// Drops every index entry pointing at `guild`.
    fn forget_guild(&self, guild: &Guild) {
        self.guilds.remove(&guild.id);
        for member in guild.roster.member_ids() {
            Self::release(&self.guild_index, &member, &guild.id);
        }
        self.guild_names
            .remove_if(&guild.name.to_lowercase(), |_, owner| *owner == guild.id);
        self.guild_tags
            .remove_if(&guild.tag.to_lowercase(), |_, owner| *owner == guild.id);
    }

    // ========================================================================
    // Membership
    // ========================================================================

    pub async fn invite_to_guild(&self, actor: MemberId, target: MemberId) -> GroupResult<()> {
        let id = self.guild_of(&actor)?;
        if let Some(other) = self.member_guild(&target) {
            return Err(GroupError::AlreadyExists(format!(
                "{} is already in guild {}",
                target, other
            )));
        }
        self.mutate_guild(id, "Guild invite", |e| e.guild.invite(actor, target))
            .await?;

        debug!("✉️ {} invited {} to guild {}", actor, target, id);
        self.notify(
            Some(id),
            vec![target, actor],
            NotificationKind::InviteSent {
                group: GroupKind::Guild,
                inviter: actor,
                invitee: target,
            },
        )
        .await;
        Ok(())
    }

    pub async fn accept_guild_invite(&self, member: MemberId, guild_id: GroupId) -> GroupResult<Guild> {
        Self::reserve(&self.guild_index, member, guild_id, GroupKind::Guild)?;
        let guild = match self
            .mutate_guild(guild_id, "Guild invite acceptance", |e| e.guild.accept_invite(member))
            .await
        {
            Ok(((), guild)) => guild,
            Err(e) => {
                Self::release(&self.guild_index, &member, &guild_id);
                return Err(e);
            }
        };

        info!("👋 {} joined guild {}", member, guild.name);
        self.notify(
            Some(guild_id),
            guild.roster.member_ids(),
            NotificationKind::MemberJoined {
                group: GroupKind::Guild,
                member,
            },
        )
        .await;
        Ok(guild)
    }

    pub async fn decline_guild_invite(&self, member: MemberId, guild_id: GroupId) -> GroupResult<()> {
        let ((), guild) = self
            .mutate_guild(guild_id, "Guild invite decline", |e| e.guild.decline_invite(member))
            .await?;
        self.notify(
            Some(guild_id),
            vec![member, guild.leader()],
            NotificationKind::InviteDeclined {
                group: GroupKind::Guild,
                invitee: member,
            },
        )
        .await;
        Ok(())
    }

    pub async fn kick_from_guild(&self, actor: MemberId, target: MemberId) -> GroupResult<()> {
        let id = self.guild_of(&actor)?;
        let (_, guild) = self
            .mutate_guild(id, "Guild kick", |e| e.guild.kick(actor, target))
            .await?;
        Self::release(&self.guild_index, &target, &id);

        info!("👢 {} kicked {} from guild {}", actor, target, guild.name);
        let mut recipients = guild.roster.member_ids();
        recipients.push(target);
        self.notify(
            Some(id),
            recipients,
            NotificationKind::MemberKicked {
                group: GroupKind::Guild,
                member: target,
                by: actor,
            },
        )
        .await;
        Ok(())
    }

    pub async fn promote(&self, actor: MemberId, target: MemberId) -> GroupResult<GuildRole> {
        let id = self.guild_of(&actor)?;
        let (role, guild) = self
            .mutate_guild(id, "Promotion", |e| e.guild.promote(actor, target))
            .await?;
        self.announce_role(&guild, target, role).await;
        Ok(role)
    }

    pub async fn demote(&self, actor: MemberId, target: MemberId) -> GroupResult<GuildRole> {
        let id = self.guild_of(&actor)?;
        let (role, guild) = self
            .mutate_guild(id, "Demotion", |e| e.guild.demote(actor, target))
            .await?;
        self.announce_role(&guild, target, role).await;
        Ok(role)
    }

    pub async fn set_guild_description(&self, actor: MemberId, description: &str) -> GroupResult<Guild> {
        let id = self.guild_of(&actor)?;
        let max_length = self.rules.guilds.max_description_length;
        let ((), guild) = self
            .mutate_guild(id, "Description change", |e| {
                e.guild.set_description(actor, description, max_length)
            })
            .await?;

        debug!("📝 Guild {} has a new description", guild.name);
        self.notify(
            Some(guild.id),
            guild.roster.member_ids(),
            NotificationKind::DescriptionChanged {
                description: guild.description.clone(),
            },
        )
        .await;
        Ok(guild)
    }

    async fn announce_role(&self, guild: &Guild, member: MemberId, role: GuildRole) {
        info!("🎖️ {} is now {:?} of guild {}", member, role, guild.name);
        self.notify(
            Some(guild.id),
            guild.roster.member_ids(),
            NotificationKind::RoleChanged { member, role },
        )
        .await;
    }

    /// Removes `member` from its guild.
    ///
    /// A departing leader hands over to the first officer, else the first
    /// member. The last member leaving deletes the guild and its storage.
    pub async fn leave_guild(&self, member: MemberId) -> GroupResult<Departure> {
        let id = self.guild_of(&member)?;
        let handle = self.guild_handle(&id)?;
        let mut entry = handle.lock().await;
        if entry.removed {
            return Err(GroupError::not_found(format!("guild {}", id)));
        }

        let mut draft = entry.clone();
        let departure = draft.guild.leave(member).map_err(|e| {
            warn!("🚫 Leave rejected for guild {}: {}", entry.guild.name, e);
            e
        })?;

        if let Departure::Disbanded { .. } = departure {
            self.store.delete_group(&id).await?;
            entry.removed = true;
            let guild = entry.guild.clone();
            drop(entry);

            self.forget_guild(&guild);
            info!("🗑️ Guild {} disbanded: its last member left", guild.name);
            self.notify(
                Some(id),
                vec![member],
                NotificationKind::GroupDisbanded {
                    group: GroupKind::Guild,
                },
            )
            .await;
            return Ok(departure);
        }

        draft.guild.roster.check_invariants()?;
        self.persist_guild(&entry, &draft).await?;
        *entry = draft;
        let guild = entry.guild.clone();
        drop(entry);
        Self::release(&self.guild_index, &member, &id);

        info!("🚪 {} left guild {}", member, guild.name);
        let mut recipients = guild.roster.member_ids();
        recipients.push(member);
        self.notify(
            Some(id),
            recipients,
            NotificationKind::MemberLeft {
                group: GroupKind::Guild,
                member,
            },
        )
        .await;
        if let Departure::Succeeded { departed, successor } = departure {
            self.notify(
                Some(id),
                guild.roster.member_ids(),
                NotificationKind::LeaderChanged {
                    group: GroupKind::Guild,
                    previous: departed,
                    current: successor,
                },
            )
            .await;
        }
        Ok(departure)
    }

    pub async fn transfer_guild_leadership(
        &self,
        current: MemberId,
        new_leader: MemberId,
    ) -> GroupResult<LeadershipChange> {
        let id = self.guild_of(&current)?;
        let (change, guild) = self
            .mutate_guild(id, "Leadership transfer", |e| {
                e.guild.transfer_leadership(current, new_leader)
            })
            .await?;

        info!("👑 Guild {} leadership: {} -> {}", guild.name, change.previous, change.current);
        self.notify(
            Some(id),
            guild.roster.member_ids(),
            NotificationKind::LeaderChanged {
                group: GroupKind::Guild,
                previous: change.previous,
                current: change.current,
            },
        )
        .await;
        Ok(change)
    }

    // ========================================================================
    // Progression
    // ========================================================================

    /// Credits experience to a guild and applies any level-up rewards.
    pub async fn add_guild_experience(
        &self,
        guild_id: GroupId,
        amount: u64,
        source: &str,
    ) -> GroupResult<ProgressionOutcome> {
        let progression = &self.rules.guilds.progression;
        let ((outcome, slots), guild) = self
            .mutate_guild(guild_id, "Guild experience", |e| {
                let outcome = add_experience(&mut e.guild, &mut e.storage, amount, source, progression)?;
                Ok((outcome, e.storage.max_slots))
            })
            .await?;

        debug!(
            "📈 Guild {} gained {} experience from {} (level {})",
            guild.name, amount, source, outcome.new_level
        );
        for level_up in &outcome.level_ups {
            self.notify(
                Some(guild_id),
                guild.roster.member_ids(),
                NotificationKind::GuildLevelUp {
                    level: level_up.level,
                    max_members: level_up.max_members.unwrap_or(guild.max_members),
                    storage_slots: slots,
                },
            )
            .await;
        }
        Ok(outcome)
    }

    // ========================================================================
    // Storage
    // ========================================================================

    /// Deposits items into the member's guild storage. Any member may deposit.
    ///
    /// Returns the quantity now held of `item_type`.
    pub async fn deposit_item(&self, member: MemberId, item_type: &str, quantity: u64) -> GroupResult<u64> {
        let id = self.guild_of(&member)?;
        let (held, _) = self
            .mutate_guild(id, "Item deposit", |e| {
                e.guild.roster.require_role(&member)?;
                e.storage.deposit_item(item_type, quantity)
            })
            .await?;
        debug!("📦 {} deposited {} x{} in guild {}", member, item_type, quantity, id);
        Ok(held)
    }

    /// Withdraws items. Officers and the leader only.
    pub async fn withdraw_item(&self, member: MemberId, item_type: &str, quantity: u64) -> GroupResult<u64> {
        let id = self.guild_of(&member)?;
        let (held, _) = self
            .mutate_guild(id, "Item withdrawal", |e| {
                e.guild.require_at_least(&member, GuildRole::Officer)?;
                e.storage.withdraw_item(item_type, quantity)
            })
            .await?;
        debug!("📦 {} withdrew {} x{} from guild {}", member, item_type, quantity, id);
        Ok(held)
    }

    /// Returns the new balance.
    pub async fn deposit_money(&self, member: MemberId, amount: f64) -> GroupResult<f64> {
        let id = self.guild_of(&member)?;
        let (balance, _) = self
            .mutate_guild(id, "Money deposit", |e| {
                e.guild.roster.require_role(&member)?;
                e.storage.deposit_money(amount)
            })
            .await?;
        debug!("💰 {} deposited {:.2} in guild {}", member, amount, id);
        Ok(balance)
    }

    /// All or nothing; officers and the leader only. Returns the new balance.
    pub async fn withdraw_money(&self, member: MemberId, amount: f64) -> GroupResult<f64> {
        let id = self.guild_of(&member)?;
        let (balance, _) = self
            .mutate_guild(id, "Money withdrawal", |e| {
                e.guild.require_at_least(&member, GuildRole::Officer)?;
                e.storage.withdraw_money(amount)
            })
            .await?;
        debug!("💰 {} withdrew {:.2} from guild {}", member, amount, id);
        Ok(balance)
    }

    /// Buys one capacity upgrade with guild money. Leader only.
    ///
    /// If the capacity cannot grow the cost is refunded and nothing changes.
    pub async fn purchase_storage_upgrade(&self, actor: MemberId) -> GroupResult<UpgradeReceipt> {
        let id = self.guild_of(&actor)?;
        let rules = &self.rules.storage;
        let (receipt, guild) = self
            .mutate_guild(id, "Storage upgrade", |e| {
                e.guild.require_at_least(&actor, GuildRole::Leader)?;
                e.storage.purchase_upgrade(rules.upgrade_cost, |storage| {
                    storage.expand_capacity(rules.upgrade_slots, rules.max_slots_limit)
                })
            })
            .await?;

        info!(
            "🧰 Guild {} storage upgraded to {} slots for {:.2}",
            guild.name, receipt.max_slots, receipt.cost
        );
        self.notify(
            Some(id),
            guild.roster.member_ids(),
            NotificationKind::StorageUpgraded {
                max_slots: receipt.max_slots,
                balance: receipt.balance,
            },
        )
        .await;
        Ok(receipt)
    }

    /// Applies one interest tick to every guild's storage concurrently.
    pub async fn accrue_interest(&self) -> InterestReport {
        let rate = self.rules.storage.interest_rate;
        let ids = self.guild_ids();
        let results = join_all(ids.into_iter().map(|id| self.accrue_guild_interest(id, rate))).await;

        let mut report = InterestReport::default();
        for result in results {
            match result {
                Ok(Some(credited)) => {
                    report.guilds_credited += 1;
                    report.total_credited += credited;
                }
                Ok(None) | Err(GroupError::NotFound(_)) => {}
                Err(_) => report.failures += 1,
            }
        }

        if report.guilds_credited > 0 || report.failures > 0 {
            info!(
                "🏦 Interest credited to {} guilds ({:.2} total, {} failures)",
                report.guilds_credited, report.total_credited, report.failures
            );
        }
        report
    }

    async fn accrue_guild_interest(&self, id: GroupId, rate: f64) -> GroupResult<Option<f64>> {
        let (credit, guild) = self
            .mutate_guild(id, "Interest accrual", |e| {
                let credited = e.storage.accrue_interest(rate)?;
                Ok(credited.map(|c| (c, e.storage.money())))
            })
            .await?;

        let Some((credited, balance)) = credit else {
            return Ok(None);
        };
        self.notify(
            Some(id),
            guild.roster.member_ids(),
            NotificationKind::InterestAccrued { credited, balance },
        )
        .await;
        Ok(Some(credited))
    }
}
