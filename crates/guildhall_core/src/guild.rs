//! Guild entity and its role-checked membership operations.

use crate::config::GuildRules;
use crate::error::{GroupError, GroupResult};
use crate::leadership::{Departure, LeadershipChange};
use crate::roster::Roster;
use crate::types::{current_timestamp, GroupId, GuildRole, MemberId, Role};
use serde::{Deserialize, Serialize};

/// A persistent player group with leader, officers, members and progression.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Guild {
    pub id: GroupId,
    pub name: String,
    pub tag: String,
    #[serde(default)]
    pub description: String,
    pub roster: Roster<GuildRole>,
    pub level: u32,
    /// Experience accumulated toward the next level
    pub experience: u64,
    pub max_members: usize,
    pub created_at: i64,
}

impl Guild {
    pub fn new(id: GroupId, leader: MemberId, name: &str, tag: &str, max_members: usize) -> Self {
        Self {
            id,
            name: name.to_string(),
            tag: tag.to_string(),
            description: String::new(),
            roster: Roster::new(leader),
            level: 1,
            experience: 0,
            max_members,
            created_at: current_timestamp(),
        }
    }

    pub fn leader(&self) -> MemberId {
        self.roster.leader()
    }

    pub fn is_full(&self) -> bool {
        self.roster.len() >= self.max_members
    }

    /// Fails with `Unauthorized` unless `actor` holds at least `required`.
    pub fn require_at_least(&self, actor: &MemberId, required: GuildRole) -> GroupResult<GuildRole> {
        let role = self.roster.require_role(actor)?;
        if role.rank() < required.rank() {
            return Err(GroupError::unauthorized(format!(
                "{} is {:?}, {:?} required",
                actor, role, required
            )));
        }
        Ok(role)
    }

    pub fn invite(&mut self, actor: MemberId, target: MemberId) -> GroupResult<()> {
        self.require_at_least(&actor, GuildRole::Officer)?;
        if self.is_full() {
            return Err(GroupError::invariant(format!(
                "guild {} is full ({} members)",
                self.name, self.max_members
            )));
        }
        self.roster.invite(target)
    }

    pub fn accept_invite(&mut self, member: MemberId) -> GroupResult<()> {
        if !self.roster.is_invited(&member) {
            return Err(GroupError::not_found(format!("invite for {}", member)));
        }
        if self.is_full() {
            return Err(GroupError::invariant(format!(
                "guild {} is full ({} members)",
                self.name, self.max_members
            )));
        }
        self.roster.admit(member)
    }

    pub fn decline_invite(&mut self, member: MemberId) -> GroupResult<()> {
        self.roster.revoke_invite(&member)
    }

    /// Removes `target`; the actor must strictly outrank it.
    pub fn kick(&mut self, actor: MemberId, target: MemberId) -> GroupResult<GuildRole> {
        let actor_role = self.require_at_least(&actor, GuildRole::Officer)?;
        let target_role = self.roster.require_role(&target)?;
        if !actor_role.outranks(target_role) {
            return Err(GroupError::unauthorized(format!(
                "{:?} cannot kick {:?}",
                actor_role, target_role
            )));
        }
        self.roster.remove(&target)
    }

    /// Raises a member to officer. Only the leader may promote.
    pub fn promote(&mut self, actor: MemberId, target: MemberId) -> GroupResult<GuildRole> {
        self.require_at_least(&actor, GuildRole::Leader)?;
        match self.roster.require_role(&target)? {
            GuildRole::Member => {
                self.roster.set_role(&target, GuildRole::Officer)?;
                Ok(GuildRole::Officer)
            }
            role => Err(GroupError::invariant(format!(
                "{:?} cannot be promoted further; use a leadership transfer",
                role
            ))),
        }
    }

    /// Lowers an officer to member. Only the leader may demote.
    pub fn demote(&mut self, actor: MemberId, target: MemberId) -> GroupResult<GuildRole> {
        self.require_at_least(&actor, GuildRole::Leader)?;
        match self.roster.require_role(&target)? {
            GuildRole::Officer => {
                self.roster.set_role(&target, GuildRole::Member)?;
                Ok(GuildRole::Member)
            }
            role => Err(GroupError::invariant(format!("{:?} cannot be demoted", role))),
        }
    }

    /// Replaces the description. Only the leader may change it.
    pub fn set_description(&mut self, actor: MemberId, description: &str, max_length: usize) -> GroupResult<()> {
        self.require_at_least(&actor, GuildRole::Leader)?;
        let length = description.chars().count();
        if length > max_length {
            return Err(GroupError::invariant(format!(
                "guild description may be at most {} characters, got {}",
                max_length, length
            )));
        }
        self.description = description.to_string();
        Ok(())
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
}

/// Checks a guild name against the configured length and character rules.
pub fn validate_name(name: &str, rules: &GuildRules) -> GroupResult<()> {
    validate_label("name", name, rules.min_name_length, rules.max_name_length)
}

/// Checks a guild tag against the configured length and character rules.
pub fn validate_tag(tag: &str, rules: &GuildRules) -> GroupResult<()> {
    validate_label("tag", tag, rules.min_tag_length, rules.max_tag_length)
}

fn validate_label(field: &str, value: &str, min: usize, max: usize) -> GroupResult<()> {
    let length = value.chars().count();
    if length < min || length > max {
        return Err(GroupError::invariant(format!(
            "guild {} must be {}-{} characters, got {}",
            field, min, max, length
        )));
    }
    if !value.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(GroupError::invariant(format!(
            "guild {} may only contain letters, digits and underscores",
            field
        )));
    }
    Ok(())
}
