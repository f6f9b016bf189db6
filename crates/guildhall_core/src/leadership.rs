//! Leadership transfer protocol.
//!
//! Every transition here rewrites the prior leader's role, the new leader's
//! role and the recorded leader field in one `&mut` call, so a roster is never
//! observable with zero or two leaders. Callers apply these on a draft copy
//! held under the group lock and commit it whole.

use crate::error::{GroupError, GroupResult};
use crate::roster::Roster;
use crate::types::{MemberId, Role};
use serde::{Deserialize, Serialize};

/// A completed change of leader.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeadershipChange {
    pub previous: MemberId,
    pub current: MemberId,
}

/// Outcome of a member voluntarily leaving a group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Departure {
    /// A non-leader left.
    Left { member: MemberId },
    /// The leader left and `successor` took over.
    Succeeded { departed: MemberId, successor: MemberId },
    /// The leader was the last member; the group must be destroyed.
    Disbanded { departed: MemberId },
}

impl<R: Role> Roster<R> {
    /// Hands leadership from `current_leader` to `new_leader`.
    ///
    /// Fails with `Unauthorized` when `current_leader` is not the recorded
    /// leader (stale request) and `NotFound` when `new_leader` is not a member.
    pub fn transfer_leadership(
        &mut self,
        current_leader: MemberId,
        new_leader: MemberId,
    ) -> GroupResult<LeadershipChange> {
        if self.leader != current_leader {
            return Err(GroupError::unauthorized(format!(
                "{} is not the leader",
                current_leader
            )));
        }
        if current_leader == new_leader {
            return Err(GroupError::invariant(format!(
                "{} is already the leader",
                new_leader
            )));
        }
        let new_index = self
            .position(&new_leader)
            .ok_or_else(|| GroupError::not_found(format!("member {}", new_leader)))?;
        let old_index = self
            .position(&current_leader)
            .ok_or_else(|| GroupError::invariant("recorded leader is not a member"))?;

        self.members[old_index].role = R::default_member();
        self.members[new_index].role = R::LEADER;
        self.leader = new_leader;

        Ok(LeadershipChange {
            previous: current_leader,
            current: new_leader,
        })
    }

    /// First eligible successor in iteration order, by succession priority.
    pub fn select_successor(&self, departing: &MemberId) -> Option<MemberId> {
        self.members
            .iter()
            .filter(|m| &m.member != departing && !m.role.is_leader())
            .min_by_key(|m| m.role.succession_priority())
            .map(|m| m.member)
    }

    /// Removes `member` from the roster, electing a successor if it led.
    ///
    /// For [`Departure::Disbanded`] the roster is left untouched; the caller
    /// destroys the group instead.
    pub fn depart(&mut self, member: MemberId) -> GroupResult<Departure> {
        let role = self.require_role(&member)?;
        if !role.is_leader() {
            self.remove(&member)?;
            return Ok(Departure::Left { member });
        }

        match self.select_successor(&member) {
            Some(successor) => {
                self.transfer_leadership(member, successor)?;
                self.remove(&member)?;
                Ok(Departure::Succeeded {
                    departed: member,
                    successor,
                })
            }
            None => Ok(Departure::Disbanded { departed: member }),
        }
    }
}
