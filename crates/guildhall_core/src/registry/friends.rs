//! Friend operations, serialized through one lock over the loaded lists.

use super::GroupRegistry;
use crate::error::GroupResult;
use crate::events::NotificationKind;
use crate::friends::{FriendGraph, FriendList, FriendRequestOutcome};
use crate::types::MemberId;
use std::collections::HashMap;
use tracing::{debug, error, warn};

impl GroupRegistry {
    /// Runs `op` over the friend lists of `members`, persisting what changed.
    ///
    /// Lists missing from memory are read from the store. Members with no
    /// record work on an empty list that is only cached once a change to it
    /// commits. If a write fails, lists already written are restored and
    /// nothing is committed.
    async fn with_friends<T, F>(&self, members: &[MemberId], op_name: &str, op: F) -> GroupResult<T>
    where
        F: FnOnce(&mut FriendGraph) -> GroupResult<T>,
    {
        let mut lists = self.friends.lock().await;
        let mut before: HashMap<MemberId, FriendList> = HashMap::with_capacity(members.len());
        for member in members {
            if before.contains_key(member) {
                continue;
            }
            let list = match lists.get(member) {
                Some(list) => list.clone(),
                None => match self.store.load_friends(member).await? {
                    Some(stored) => {
                        lists.insert(*member, stored.clone());
                        stored
                    }
                    None => FriendList::new(*member),
                },
            };
            before.insert(*member, list);
        }

        let mut graph = FriendGraph::from_lists(before.values().cloned());
        let output = op(&mut graph).map_err(|e| {
            warn!("🚫 {} rejected: {}", op_name, e);
            e
        })?;

        let changed: Vec<FriendList> = graph
            .into_lists()
            .into_iter()
            .filter(|list| before.get(&list.member) != Some(list))
            .collect();

        for (written, list) in changed.iter().enumerate() {
            if let Err(e) = self.store.save_friends(list).await {
                error!("💥 {} could not be persisted: {}", op_name, e);
                for previous in changed[..written].iter().filter_map(|l| before.get(&l.member)) {
                    if let Err(restore) = self.store.save_friends(previous).await {
                        error!("💥 Could not restore friend list of {}: {}", previous.member, restore);
                    }
                }
                return Err(e.into());
            }
        }

        for list in changed {
            lists.insert(list.member, list);
        }
        Ok(output)
    }

    pub async fn send_friend_request(&self, from: MemberId, to: MemberId) -> GroupResult<FriendRequestOutcome> {
        let max = self.rules.friends.max_friends;
        let outcome = self
            .with_friends(&[from, to], "Friend request", |g| g.send_request(from, to, max))
            .await?;

        let kind = match outcome {
            FriendRequestOutcome::Requested => NotificationKind::FriendRequestSent { from, to },
            FriendRequestOutcome::BecameFriends => NotificationKind::FriendAdded {
                first: from,
                second: to,
            },
        };
        debug!("🤝 Friend request {} -> {}: {:?}", from, to, outcome);
        self.notify(None, vec![to, from], kind).await;
        Ok(outcome)
    }

    pub async fn accept_friend_request(&self, member: MemberId, from: MemberId) -> GroupResult<()> {
        let max = self.rules.friends.max_friends;
        self.with_friends(&[member, from], "Friend acceptance", |g| {
            g.accept_request(member, from, max)
        })
        .await?;

        debug!("🤝 {} and {} are now friends", member, from);
        self.notify(
            None,
            vec![member, from],
            NotificationKind::FriendAdded {
                first: member,
                second: from,
            },
        )
        .await;
        Ok(())
    }

    pub async fn decline_friend_request(&self, member: MemberId, from: MemberId) -> GroupResult<()> {
        self.with_friends(&[member, from], "Friend decline", |g| g.decline_request(member, from))
            .await
    }

    pub async fn remove_friend(&self, member: MemberId, friend: MemberId) -> GroupResult<()> {
        self.with_friends(&[member, friend], "Friend removal", |g| g.remove_friend(member, friend))
            .await?;

        self.notify(
            None,
            vec![member, friend],
            NotificationKind::FriendRemoved {
                first: member,
                second: friend,
            },
        )
        .await;
        Ok(())
    }

    pub async fn friends_of(&self, member: MemberId) -> GroupResult<Vec<MemberId>> {
        self.with_friends(&[member], "Friend lookup", |g| Ok(g.friends_of(&member)))
            .await
    }

    pub async fn pending_friend_requests(&self, member: MemberId) -> GroupResult<Vec<MemberId>> {
        self.with_friends(&[member], "Request lookup", |g| Ok(g.pending_requests(&member)))
            .await
    }
}
