//! Party entity: a session-scoped group with reward distribution settings.

use crate::distribution::{
    determine_loot_receiver, distribute_experience, Allocation, ExperienceStrategy, LootCursor,
    LootStrategy,
};
use crate::error::{GroupError, GroupResult};
use crate::leadership::{Departure, LeadershipChange};
use crate::roster::Roster;
use crate::types::{current_timestamp, GroupId, MemberId, PartyRole};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Party {
    pub id: GroupId,
    pub roster: Roster<PartyRole>,
    pub experience_strategy: ExperienceStrategy,
    pub loot_strategy: LootStrategy,
    pub loot_cursor: LootCursor,
    pub created_at: i64,
}

impl Party {
    pub fn new(
        id: GroupId,
        leader: MemberId,
        experience_strategy: ExperienceStrategy,
        loot_strategy: LootStrategy,
    ) -> Self {
        Self {
            id,
            roster: Roster::new(leader),
            experience_strategy,
            loot_strategy,
            loot_cursor: LootCursor::default(),
            created_at: current_timestamp(),
        }
    }

    pub fn leader(&self) -> MemberId {
        self.roster.leader()
    }

    fn require_leader(&self, actor: &MemberId) -> GroupResult<()> {
        self.roster.require_role(actor)?;
        if self.roster.leader() != *actor {
            return Err(GroupError::unauthorized(format!(
                "{} is not the party leader",
                actor
            )));
        }
        Ok(())
    }

    pub fn invite(&mut self, actor: MemberId, target: MemberId, max_size: usize) -> GroupResult<()> {
        self.require_leader(&actor)?;
        if self.roster.len() >= max_size {
            return Err(GroupError::invariant(format!("party is full ({} members)", max_size)));
        }
        self.roster.invite(target)
    }

    pub fn accept_invite(&mut self, member: MemberId, max_size: usize) -> GroupResult<()> {
        if !self.roster.is_invited(&member) {
            return Err(GroupError::not_found(format!("invite for {}", member)));
        }
        if self.roster.len() >= max_size {
            return Err(GroupError::invariant(format!("party is full ({} members)", max_size)));
        }
        self.roster.admit(member)
    }

    pub fn decline_invite(&mut self, member: MemberId) -> GroupResult<()> {
        self.roster.revoke_invite(&member)
    }

    pub fn kick(&mut self, actor: MemberId, target: MemberId) -> GroupResult<()> {
        self.require_leader(&actor)?;
        if actor == target {
            return Err(GroupError::invariant("the leader cannot kick themselves; leave instead"));
        }
        self.roster.remove(&target).map(|_| ())
    }

    pub fn leave(&mut self, member: MemberId) -> GroupResult<Departure> {
        self.roster.depart(member)
    }

    pub fn transfer_leadership(
        &mut self,
        current: MemberId,
        new_leader: MemberId,
    ) -> GroupResult<LeadershipChange> {
        self.roster.transfer_leadership(current, new_leader)
    }

    pub fn set_strategies(
        &mut self,
        actor: MemberId,
        experience: ExperienceStrategy,
        loot: LootStrategy,
    ) -> GroupResult<()> {
        self.require_leader(&actor)?;
        self.experience_strategy = experience;
        self.loot_strategy = loot;
        Ok(())
    }

    /// Splits `total` experience using the party's configured strategy.
    pub fn distribute_experience(
        &self,
        total: u64,
        contributor: MemberId,
        level_hints: Option<&HashMap<MemberId, u32>>,
    ) -> GroupResult<Allocation> {
        distribute_experience(
            &self.roster.member_ids(),
            total,
            contributor,
            self.experience_strategy,
            level_hints,
        )
    }

    /// Picks the next loot receiver, advancing the round-robin cursor if used.
    pub fn next_loot_receiver<G: Rng + ?Sized>(&mut self, rng: &mut G) -> GroupResult<MemberId> {
        let members = self.roster.member_ids();
        let leader = self.roster.leader();
        determine_loot_receiver(&members, leader, self.loot_strategy, &mut self.loot_cursor, rng)
    }
}
