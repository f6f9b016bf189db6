//! Friend lists and friend requests.

use crate::error::{GroupError, GroupResult};
use crate::types::MemberId;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

/// One member's friends and the requests waiting for its answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FriendList {
    pub member: MemberId,
    pub friends: BTreeSet<MemberId>,
    /// Members who asked to befriend `member`
    pub incoming: BTreeSet<MemberId>,
}

impl FriendList {
    pub fn new(member: MemberId) -> Self {
        Self {
            member,
            friends: BTreeSet::new(),
            incoming: BTreeSet::new(),
        }
    }
}

/// What a friend request resulted in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FriendRequestOutcome {
    Requested,
    /// The target had already asked; both are now friends.
    BecameFriends,
}

/// A working set of friend lists that the friend operations mutate.
///
/// # Examples
///
/// ```rust
/// use guildhall_core::{FriendGraph, FriendRequestOutcome, MemberId};
///
/// let mut graph = FriendGraph::new();
/// let (a, b) = (MemberId::new(), MemberId::new());
///
/// graph.send_request(a, b, 50).unwrap();
/// // A request in the other direction completes the friendship
/// assert_eq!(graph.send_request(b, a, 50).unwrap(), FriendRequestOutcome::BecameFriends);
/// assert!(graph.are_friends(&a, &b));
/// ```
#[derive(Debug, Clone, Default)]
pub struct FriendGraph {
    lists: HashMap<MemberId, FriendList>,
}

impl FriendGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_lists(lists: impl IntoIterator<Item = FriendList>) -> Self {
        Self {
            lists: lists.into_iter().map(|l| (l.member, l)).collect(),
        }
    }

    pub fn into_lists(self) -> Vec<FriendList> {
        self.lists.into_values().collect()
    }

    pub fn list(&self, member: &MemberId) -> Option<&FriendList> {
        self.lists.get(member)
    }

    fn list_mut(&mut self, member: MemberId) -> &mut FriendList {
        self.lists
            .entry(member)
            .or_insert_with(|| FriendList::new(member))
    }

    pub fn are_friends(&self, a: &MemberId, b: &MemberId) -> bool {
        self.lists
            .get(a)
            .map(|l| l.friends.contains(b))
            .unwrap_or(false)
    }

    fn friend_count(&self, member: &MemberId) -> usize {
        self.lists.get(member).map(|l| l.friends.len()).unwrap_or(0)
    }

    fn ensure_capacity(&self, member: &MemberId, max_friends: usize) -> GroupResult<()> {
        if self.friend_count(member) >= max_friends {
            return Err(GroupError::invariant(format!(
                "{} already has the maximum of {} friends",
                member, max_friends
            )));
        }
        Ok(())
    }

    fn befriend(&mut self, a: MemberId, b: MemberId) {
        let list_a = self.list_mut(a);
        list_a.incoming.remove(&b);
        list_a.friends.insert(b);
        let list_b = self.list_mut(b);
        list_b.incoming.remove(&a);
        list_b.friends.insert(a);
    }

    pub fn send_request(
        &mut self,
        from: MemberId,
        to: MemberId,
        max_friends: usize,
    ) -> GroupResult<FriendRequestOutcome> {
        if from == to {
            return Err(GroupError::invariant("cannot befriend yourself"));
        }
        if self.are_friends(&from, &to) {
            return Err(GroupError::AlreadyExists(format!("{} and {} are already friends", from, to)));
        }
        if self.list(&to).map(|l| l.incoming.contains(&from)).unwrap_or(false) {
            return Err(GroupError::AlreadyExists(format!("request from {} to {} is pending", from, to)));
        }
        self.ensure_capacity(&from, max_friends)?;
        self.ensure_capacity(&to, max_friends)?;

        let reverse_pending = self
            .list(&from)
            .map(|l| l.incoming.contains(&to))
            .unwrap_or(false);
        if reverse_pending {
            self.befriend(from, to);
            return Ok(FriendRequestOutcome::BecameFriends);
        }

        self.list_mut(to).incoming.insert(from);
        Ok(FriendRequestOutcome::Requested)
    }

    pub fn accept_request(
        &mut self,
        member: MemberId,
        from: MemberId,
        max_friends: usize,
    ) -> GroupResult<()> {
        if !self.list(&member).map(|l| l.incoming.contains(&from)).unwrap_or(false) {
            return Err(GroupError::not_found(format!("friend request from {}", from)));
        }
        self.ensure_capacity(&member, max_friends)?;
        self.ensure_capacity(&from, max_friends)?;
        self.befriend(member, from);
        Ok(())
    }

    pub fn decline_request(&mut self, member: MemberId, from: MemberId) -> GroupResult<()> {
        if self.list_mut(member).incoming.remove(&from) {
            Ok(())
        } else {
            Err(GroupError::not_found(format!("friend request from {}", from)))
        }
    }

    pub fn remove_friend(&mut self, member: MemberId, friend: MemberId) -> GroupResult<()> {
        if !self.are_friends(&member, &friend) {
            return Err(GroupError::not_found(format!("friend {}", friend)));
        }
        self.list_mut(member).friends.remove(&friend);
        self.list_mut(friend).friends.remove(&member);
        Ok(())
    }

    pub fn friends_of(&self, member: &MemberId) -> Vec<MemberId> {
        self.lists
            .get(member)
            .map(|l| l.friends.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn pending_requests(&self, member: &MemberId) -> Vec<MemberId> {
        self.lists
            .get(member)
            .map(|l| l.incoming.iter().copied().collect())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_accept_remove() {
        let mut graph = FriendGraph::new();
        let (a, b) = (MemberId::new(), MemberId::new());

        assert_eq!(graph.send_request(a, b, 10).unwrap(), FriendRequestOutcome::Requested);
        assert!(matches!(graph.send_request(a, b, 10), Err(GroupError::AlreadyExists(_))));
        assert_eq!(graph.pending_requests(&b), vec![a]);

        graph.accept_request(b, a, 10).unwrap();
        assert!(graph.are_friends(&a, &b));
        assert!(graph.are_friends(&b, &a));
        assert!(graph.pending_requests(&b).is_empty());

        graph.remove_friend(a, b).unwrap();
        assert!(graph.friends_of(&b).is_empty());
        assert!(graph.remove_friend(a, b).is_err());
    }

    #[test]
    fn test_crossed_requests_become_friends() {
        let mut graph = FriendGraph::new();
        let (a, b) = (MemberId::new(), MemberId::new());
        graph.send_request(a, b, 10).unwrap();
        assert_eq!(graph.send_request(b, a, 10).unwrap(), FriendRequestOutcome::BecameFriends);
        assert!(graph.are_friends(&a, &b));
    }

    #[test]
    fn test_limits_and_self_requests() {
        let mut graph = FriendGraph::new();
        let (a, b, c) = (MemberId::new(), MemberId::new(), MemberId::new());
        assert!(graph.send_request(a, a, 10).is_err());
        graph.send_request(a, b, 1).unwrap();
        graph.accept_request(b, a, 1).unwrap();
        assert!(matches!(
            graph.send_request(a, c, 1),
            Err(GroupError::InvariantViolation(_))
        ));
        assert!(graph.decline_request(c, a).is_err());
    }

    #[test]
    fn test_request_to_full_target_is_refused() {
        let mut graph = FriendGraph::new();
        let (a, b, c) = (MemberId::new(), MemberId::new(), MemberId::new());
        graph.send_request(b, c, 1).unwrap();
        graph.accept_request(c, b, 1).unwrap();

        assert!(matches!(
            graph.send_request(a, b, 1),
            Err(GroupError::InvariantViolation(_))
        ));
        assert!(graph.pending_requests(&b).is_empty());
    }
}
