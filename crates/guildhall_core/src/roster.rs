//! Membership store shared by guilds and parties.
//!
//! A [`Roster`] keeps the ordered member-role map, the recorded leader and the
//! set of pending invites of one group. Insertion order of the member list is
//! the stable iteration order used by leader succession and round-robin loot.

use crate::error::{GroupError, GroupResult};
use crate::types::{current_timestamp, MemberId, Role};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// One member of a group together with its role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Membership<R> {
    pub member: MemberId,
    pub role: R,
    /// UNIX millis when the member joined
    pub joined_at: i64,
}

/// Ordered member-role map with a single recorded leader.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Roster<R> {
    pub(crate) leader: MemberId,
    pub(crate) members: Vec<Membership<R>>,
    pub(crate) invites: BTreeSet<MemberId>,
}

impl<R: Role> Roster<R> {
    /// Creates a roster whose only member is `leader`.
    pub fn new(leader: MemberId) -> Self {
        Self {
            leader,
            members: vec![Membership {
                member: leader,
                role: R::LEADER,
                joined_at: current_timestamp(),
            }],
            invites: BTreeSet::new(),
        }
    }

    pub fn leader(&self) -> MemberId {
        self.leader
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn contains(&self, member: &MemberId) -> bool {
        self.position(member).is_some()
    }

    /// Role held by `member`, if it belongs to the group.
    pub fn role_of(&self, member: &MemberId) -> Option<R> {
        self.members
            .iter()
            .find(|m| &m.member == member)
            .map(|m| m.role)
    }

    /// Role held by `member`, failing with `NotFound` when absent.
    pub fn require_role(&self, member: &MemberId) -> GroupResult<R> {
        self.role_of(member)
            .ok_or_else(|| GroupError::not_found(format!("member {}", member)))
    }

    pub fn members(&self) -> impl Iterator<Item = &Membership<R>> {
        self.members.iter()
    }

    /// Member ids in stable iteration order.
    pub fn member_ids(&self) -> Vec<MemberId> {
        self.members.iter().map(|m| m.member).collect()
    }

    pub fn invites(&self) -> impl Iterator<Item = &MemberId> {
        self.invites.iter()
    }

    pub fn is_invited(&self, member: &MemberId) -> bool {
        self.invites.contains(member)
    }

    pub(crate) fn position(&self, member: &MemberId) -> Option<usize> {
        self.members.iter().position(|m| &m.member == member)
    }

    /// Records a pending invite for `target`.
    pub fn invite(&mut self, target: MemberId) -> GroupResult<()> {
        if self.contains(&target) {
            return Err(GroupError::AlreadyExists(format!(
                "{} is already a member",
                target
            )));
        }
        if !self.invites.insert(target) {
            return Err(GroupError::AlreadyExists(format!(
                "{} already has a pending invite",
                target
            )));
        }
        Ok(())
    }

    /// Drops the pending invite for `target`.
    pub fn revoke_invite(&mut self, target: &MemberId) -> GroupResult<()> {
        if self.invites.remove(target) {
            Ok(())
        } else {
            Err(GroupError::not_found(format!("invite for {}", target)))
        }
    }

    /// Turns a pending invite into membership with the default role.
    pub fn admit(&mut self, member: MemberId) -> GroupResult<()> {
        if self.contains(&member) {
            return Err(GroupError::AlreadyExists(format!(
                "{} is already a member",
                member
            )));
        }
        if !self.invites.remove(&member) {
            return Err(GroupError::not_found(format!("invite for {}", member)));
        }
        self.members.push(Membership {
            member,
            role: R::default_member(),
            joined_at: current_timestamp(),
        });
        Ok(())
    }

    /// Removes a non-leader member and returns the role it held.
    ///
    /// The leader can only leave through [`Roster::depart`].
    pub fn remove(&mut self, member: &MemberId) -> GroupResult<R> {
        let index = self
            .position(member)
            .ok_or_else(|| GroupError::not_found(format!("member {}", member)))?;
        if self.members[index].role.is_leader() {
            return Err(GroupError::invariant(
                "the leader cannot be removed without a leadership transition",
            ));
        }
        Ok(self.members.remove(index).role)
    }

    /// Changes the role of a non-leader member to another non-leader role.
    pub fn set_role(&mut self, member: &MemberId, role: R) -> GroupResult<R> {
        if role.is_leader() {
            return Err(GroupError::invariant(
                "leadership can only be granted by a transfer",
            ));
        }
        let index = self
            .position(member)
            .ok_or_else(|| GroupError::not_found(format!("member {}", member)))?;
        let entry = &mut self.members[index];
        if entry.role.is_leader() {
            return Err(GroupError::invariant(
                "the leader's role can only change through a transfer",
            ));
        }
        let previous = entry.role;
        entry.role = role;
        Ok(previous)
    }

    /// Verifies that exactly one member is leader and that it is the
    /// recorded leader.
    pub fn check_invariants(&self) -> GroupResult<()> {
        let leaders: Vec<_> = self
            .members
            .iter()
            .filter(|m| m.role.is_leader())
            .collect();
        match leaders.as_slice() {
            [only] if only.member == self.leader => Ok(()),
            [only] => Err(GroupError::invariant(format!(
                "leader field {} does not match leader role holder {}",
                self.leader, only.member
            ))),
            [] => Err(GroupError::invariant("group has no leader")),
            _ => Err(GroupError::invariant(format!(
                "group has {} leaders",
                leaders.len()
            ))),
        }
    }
}
