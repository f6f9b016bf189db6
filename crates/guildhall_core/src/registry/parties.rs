//! Party operations. Parties live only in memory.

use super::{GroupRegistry, PartyEntry};
use crate::distribution::{Allocation, ExperienceStrategy, LootStrategy};
use crate::error::{GroupError, GroupResult};
use crate::events::{NotificationKind, RewardShare};
use crate::leadership::{Departure, LeadershipChange};
use crate::party::Party;
use crate::types::{GroupId, GroupKind, MemberId};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

impl GroupRegistry {
    /// Forms a party led by `leader` with the configured default strategies.
    pub async fn create_party(&self, leader: MemberId) -> GroupResult<Party> {
        let id = GroupId::new();
        Self::reserve(&self.party_index, leader, id, GroupKind::Party)?;

        let rules = &self.rules.parties;
        let party = Party::new(
            id,
            leader,
            rules.default_experience_strategy,
            rules.default_loot_strategy,
        );
        self.parties.insert(
            id,
            Arc::new(Mutex::new(PartyEntry {
                party: party.clone(),
                removed: false,
            })),
        );

        info!("🎉 Party {} formed by {}", id, leader);
        self.notify(
            Some(id),
            vec![leader],
            NotificationKind::GroupCreated {
                group: GroupKind::Party,
                name: None,
            },
        )
        .await;
        Ok(party)
    }

    /// Invites `target` to the actor's party. Leader only.
    pub async fn invite_to_party(&self, actor: MemberId, target: MemberId) -> GroupResult<()> {
        let id = self.party_of(&actor)?;
        if let Some(other) = self.member_party(&target) {
            return Err(GroupError::AlreadyExists(format!(
                "{} is already in party {}",
                target, other
            )));
        }
        let max_size = self.rules.parties.max_size;
        self.mutate_party(id, "Party invite", |p| p.invite(actor, target, max_size))
            .await?;

        debug!("✉️ {} invited {} to party {}", actor, target, id);
        self.notify(
            Some(id),
            vec![target, actor],
            NotificationKind::InviteSent {
                group: GroupKind::Party,
                inviter: actor,
                invitee: target,
            },
        )
        .await;
        Ok(())
    }

    pub async fn accept_party_invite(&self, member: MemberId, party_id: GroupId) -> GroupResult<Party> {
        Self::reserve(&self.party_index, member, party_id, GroupKind::Party)?;
        let max_size = self.rules.parties.max_size;
        let party = match self
            .mutate_party(party_id, "Party invite acceptance", |p| p.accept_invite(member, max_size))
            .await
        {
            Ok(((), party)) => party,
            Err(e) => {
                Self::release(&self.party_index, &member, &party_id);
                return Err(e);
            }
        };

        info!("👋 {} joined party {}", member, party_id);
        self.notify(
            Some(party_id),
            party.roster.member_ids(),
            NotificationKind::MemberJoined {
                group: GroupKind::Party,
                member,
            },
        )
        .await;
        Ok(party)
    }

    pub async fn decline_party_invite(&self, member: MemberId, party_id: GroupId) -> GroupResult<()> {
        let ((), party) = self
            .mutate_party(party_id, "Party invite decline", |p| p.decline_invite(member))
            .await?;
        self.notify(
            Some(party_id),
            vec![member, party.leader()],
            NotificationKind::InviteDeclined {
                group: GroupKind::Party,
                invitee: member,
            },
        )
        .await;
        Ok(())
    }

    pub async fn kick_from_party(&self, actor: MemberId, target: MemberId) -> GroupResult<()> {
        let id = self.party_of(&actor)?;
        let ((), party) = self
            .mutate_party(id, "Party kick", |p| p.kick(actor, target))
            .await?;
        Self::release(&self.party_index, &target, &id);

        info!("👢 {} kicked {} from party {}", actor, target, id);
        let mut recipients = party.roster.member_ids();
        recipients.push(target);
        self.notify(
            Some(id),
            recipients,
            NotificationKind::MemberKicked {
                group: GroupKind::Party,
                member: target,
                by: actor,
            },
        )
        .await;
        Ok(())
    }

    /// Removes `member` from its party; the last member leaving disbands it.
    pub async fn leave_party(&self, member: MemberId) -> GroupResult<Departure> {
        let id = self.party_of(&member)?;
        let handle = self.party_handle(&id)?;
        let mut entry = handle.lock().await;
        if entry.removed {
            return Err(GroupError::not_found(format!("party {}", id)));
        }

        let mut draft = entry.party.clone();
        let departure = draft.leave(member).map_err(|e| {
            warn!("🚫 Leave rejected for party {}: {}", id, e);
            e
        })?;

        if let Departure::Disbanded { .. } = departure {
            entry.removed = true;
            drop(entry);
            self.parties.remove(&id);
            Self::release(&self.party_index, &member, &id);

            info!("🗑️ Party {} disbanded", id);
            self.notify(
                Some(id),
                vec![member],
                NotificationKind::GroupDisbanded {
                    group: GroupKind::Party,
                },
            )
            .await;
            return Ok(departure);
        }

        draft.roster.check_invariants()?;
        entry.party = draft;
        let party = entry.party.clone();
        drop(entry);
        Self::release(&self.party_index, &member, &id);

        debug!("🚪 {} left party {}", member, id);
        let mut recipients = party.roster.member_ids();
        recipients.push(member);
        self.notify(
            Some(id),
            recipients,
            NotificationKind::MemberLeft {
                group: GroupKind::Party,
                member,
            },
        )
        .await;
        if let Departure::Succeeded { departed, successor } = departure {
            self.notify(
                Some(id),
                party.roster.member_ids(),
                NotificationKind::LeaderChanged {
                    group: GroupKind::Party,
                    previous: departed,
                    current: successor,
                },
            )
            .await;
        }
        Ok(departure)
    }

    pub async fn transfer_party_leadership(
        &self,
        current: MemberId,
        new_leader: MemberId,
    ) -> GroupResult<LeadershipChange> {
        let id = self.party_of(&current)?;
        let (change, party) = self
            .mutate_party(id, "Party leadership transfer", |p| {
                p.transfer_leadership(current, new_leader)
            })
            .await?;

        info!("👑 Party {} leadership: {} -> {}", id, change.previous, change.current);
        self.notify(
            Some(id),
            party.roster.member_ids(),
            NotificationKind::LeaderChanged {
                group: GroupKind::Party,
                previous: change.previous,
                current: change.current,
            },
        )
        .await;
        Ok(change)
    }

    /// Changes the actor's party reward strategies. Leader only.
    pub async fn set_party_strategies(
        &self,
        actor: MemberId,
        experience: ExperienceStrategy,
        loot: LootStrategy,
    ) -> GroupResult<()> {
        let id = self.party_of(&actor)?;
        let ((), party) = self
            .mutate_party(id, "Strategy change", |p| p.set_strategies(actor, experience, loot))
            .await?;

        self.notify(
            Some(id),
            party.roster.member_ids(),
            NotificationKind::StrategiesChanged { experience, loot },
        )
        .await;
        Ok(())
    }

    // ========================================================================
    // Rewards
    // ========================================================================

    /// Splits `total` experience across the party with its configured strategy.
    pub async fn distribute_party_experience(
        &self,
        party_id: GroupId,
        total: u64,
        contributor: MemberId,
        level_hints: Option<HashMap<MemberId, u32>>,
    ) -> GroupResult<Allocation> {
        let party = self.party(&party_id).await?;
        let allocation = party
            .distribute_experience(total, contributor, level_hints.as_ref())
            .map_err(|e| {
                warn!("🚫 Experience distribution rejected for party {}: {}", party_id, e);
                e
            })?;

        let mut shares: Vec<RewardShare> = allocation
            .iter()
            .map(|(member, amount)| RewardShare {
                member: *member,
                amount: *amount,
            })
            .collect();
        shares.sort_by_key(|s| s.member);

        debug!(
            "✨ Party {} shared {} experience ({:?})",
            party_id, total, party.experience_strategy
        );
        self.notify(
            Some(party_id),
            party.roster.member_ids(),
            NotificationKind::ExperienceDistributed { contributor, shares },
        )
        .await;
        Ok(allocation)
    }

    /// Picks who receives the next drop, advancing the round-robin cursor.
    pub async fn assign_party_loot(&self, party_id: GroupId) -> GroupResult<MemberId> {
        let (receiver, party) = self
            .mutate_party(party_id, "Loot assignment", |p| {
                p.next_loot_receiver(&mut rand::thread_rng())
            })
            .await?;

        debug!("🎁 Party {} loot goes to {}", party_id, receiver);
        self.notify(
            Some(party_id),
            party.roster.member_ids(),
            NotificationKind::LootAssigned {
                receiver,
                strategy: party.loot_strategy,
            },
        )
        .await;
        Ok(receiver)
    }
}
