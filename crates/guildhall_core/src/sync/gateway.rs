//! Executes sync envelopes against the registry.
//!
//! Delivery is at least once: a sender that saw no reply resends the same
//! envelope. The gateway keeps the replies to the most recent mutating message
//! ids and answers a resend from that cache instead of executing it twice.
//! Queries are always answered fresh, and persistence failures are not
//! remembered so a resend after the store recovers runs again.

use super::frame::{read_payload, write_frame};
use super::protocol::{MemberGroups, SyncCommand, SyncEnvelope, SyncReply, PROTOCOL_VERSION};
use crate::error::{FrameError, GroupResult, SyncError};
use crate::registry::GroupRegistry;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Default number of remembered replies.
pub const DEFAULT_DEDUP_CAPACITY: usize = 1024;

/// Bounded memory of recent replies, evicted oldest first.
#[derive(Debug)]
struct ReplyCache {
    capacity: usize,
    order: VecDeque<Uuid>,
    replies: HashMap<Uuid, SyncReply>,
}

impl ReplyCache {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            order: VecDeque::with_capacity(capacity),
            replies: HashMap::with_capacity(capacity),
        }
    }

    fn get(&self, id: &Uuid) -> Option<SyncReply> {
        self.replies.get(id).cloned()
    }

    fn insert(&mut self, reply: SyncReply) {
        if self.capacity == 0 || self.replies.contains_key(&reply.message_id) {
            return;
        }
        while self.order.len() >= self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.replies.remove(&oldest);
            }
        }
        self.order.push_back(reply.message_id);
        self.replies.insert(reply.message_id, reply);
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GatewayStats {
    pub executed: u64,
    pub duplicates: u64,
    pub rejected: u64,
}

/// Entry point for other nodes.
pub struct SyncGateway {
    registry: Arc<GroupRegistry>,
    recent: Mutex<ReplyCache>,
    executed: AtomicU64,
    duplicates: AtomicU64,
    rejected: AtomicU64,
}

impl SyncGateway {
    pub fn new(registry: Arc<GroupRegistry>, dedup_capacity: usize) -> Self {
        Self {
            registry,
            recent: Mutex::new(ReplyCache::new(dedup_capacity)),
            executed: AtomicU64::new(0),
            duplicates: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
        }
    }

    pub fn registry(&self) -> &Arc<GroupRegistry> {
        &self.registry
    }

    pub fn get_stats(&self) -> GatewayStats {
        GatewayStats {
            executed: self.executed.load(Ordering::Relaxed),
            duplicates: self.duplicates.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
        }
    }

    /// Answers one envelope, executing it at most once per message id.
    pub async fn handle(&self, envelope: SyncEnvelope) -> SyncReply {
        if envelope.version != PROTOCOL_VERSION {
            self.rejected.fetch_add(1, Ordering::Relaxed);
            warn!(
                "🚫 Refusing message {} from {}: protocol version {}",
                envelope.message_id, envelope.origin, envelope.version
            );
            return SyncReply::error(
                envelope.message_id,
                &SyncError::UnsupportedVersion(envelope.version, PROTOCOL_VERSION),
            );
        }

        if let Some(cached) = self.recent.lock().await.get(&envelope.message_id) {
            self.duplicates.fetch_add(1, Ordering::Relaxed);
            debug!("🔁 Replaying reply to duplicate message {}", envelope.message_id);
            return cached;
        }

        let message_id = envelope.message_id;
        let mutation = envelope.command.is_mutation();
        let reply = match self.execute(envelope.command).await {
            Ok(value) => SyncReply::ok(message_id, value),
            Err(e) => SyncReply::error(message_id, &e),
        };
        self.executed.fetch_add(1, Ordering::Relaxed);
        if mutation && !is_transient(&reply) {
            self.recent.lock().await.insert(reply.clone());
        }
        reply
    }

    /// Answers a raw frame payload. Undecodable payloads get a `malformed`
    /// reply addressed to the nil message id.
    pub async fn handle_payload(&self, payload: &[u8]) -> SyncReply {
        match serde_json::from_slice::<SyncEnvelope>(payload) {
            Ok(envelope) => self.handle(envelope).await,
            Err(e) => {
                self.rejected.fetch_add(1, Ordering::Relaxed);
                warn!("🚫 Malformed sync payload: {}", e);
                SyncReply::error(Uuid::nil(), &SyncError::Malformed(e.to_string()))
            }
        }
    }

    /// Serves one connection until the peer closes it or framing fails.
    pub async fn serve<S>(&self, stream: &mut S, peer: &str) -> Result<u64, FrameError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let mut answered = 0;
        while let Some(payload) = read_payload(stream).await? {
            let reply = self.handle_payload(&payload).await;
            write_frame(stream, &reply).await?;
            answered += 1;
        }
        info!("🔌 Sync peer {} closed after {} requests", peer, answered);
        Ok(answered)
    }

    async fn execute(&self, command: SyncCommand) -> Result<Value, SyncError> {
        let registry = &self.registry;
        match command {
            SyncCommand::CreateGuild { leader, name, tag } => {
                to_value(registry.create_guild(leader, &name, &tag).await?)
            }
            SyncCommand::DeleteGuild { actor } => acknowledge(registry.delete_guild(actor).await),
            SyncCommand::InviteToGuild { actor, target } => {
                acknowledge(registry.invite_to_guild(actor, target).await)
            }
            SyncCommand::AcceptGuildInvite { member, guild } => {
                to_value(registry.accept_guild_invite(member, guild).await?)
            }
            SyncCommand::DeclineGuildInvite { member, guild } => {
                acknowledge(registry.decline_guild_invite(member, guild).await)
            }
            SyncCommand::KickFromGuild { actor, target } => {
                acknowledge(registry.kick_from_guild(actor, target).await)
            }
            SyncCommand::Promote { actor, target } => to_value(registry.promote(actor, target).await?),
            SyncCommand::Demote { actor, target } => to_value(registry.demote(actor, target).await?),
            SyncCommand::LeaveGuild { member } => to_value(registry.leave_guild(member).await?),
            SyncCommand::TransferGuildLeadership { current, new_leader } => {
                to_value(registry.transfer_guild_leadership(current, new_leader).await?)
            }
            SyncCommand::SetGuildDescription { actor, description } => {
                to_value(registry.set_guild_description(actor, &description).await?)
            }
            SyncCommand::AddGuildExperience { guild, amount, source } => {
                to_value(registry.add_guild_experience(guild, amount, &source).await?)
            }
            SyncCommand::DepositItem { member, item_type, quantity } => {
                to_value(registry.deposit_item(member, &item_type, quantity).await?)
            }
            SyncCommand::WithdrawItem { member, item_type, quantity } => {
                to_value(registry.withdraw_item(member, &item_type, quantity).await?)
            }
            SyncCommand::DepositMoney { member, amount } => {
                to_value(registry.deposit_money(member, amount).await?)
            }
            SyncCommand::WithdrawMoney { member, amount } => {
                to_value(registry.withdraw_money(member, amount).await?)
            }
            SyncCommand::PurchaseStorageUpgrade { actor } => {
                to_value(registry.purchase_storage_upgrade(actor).await?)
            }

            SyncCommand::CreateParty { leader } => to_value(registry.create_party(leader).await?),
            SyncCommand::InviteToParty { actor, target } => {
                acknowledge(registry.invite_to_party(actor, target).await)
            }
            SyncCommand::AcceptPartyInvite { member, party } => {
                to_value(registry.accept_party_invite(member, party).await?)
            }
            SyncCommand::DeclinePartyInvite { member, party } => {
                acknowledge(registry.decline_party_invite(member, party).await)
            }
            SyncCommand::KickFromParty { actor, target } => {
                acknowledge(registry.kick_from_party(actor, target).await)
            }
            SyncCommand::LeaveParty { member } => to_value(registry.leave_party(member).await?),
            SyncCommand::TransferPartyLeadership { current, new_leader } => {
                to_value(registry.transfer_party_leadership(current, new_leader).await?)
            }
            SyncCommand::SetPartyStrategies { actor, experience, loot } => {
                acknowledge(registry.set_party_strategies(actor, experience, loot).await)
            }
            SyncCommand::DistributePartyExperience {
                party,
                total,
                contributor,
                level_hints,
            } => {
                let hints: Option<HashMap<_, _>> = level_hints
                    .map(|hints| hints.into_iter().map(|h| (h.member, h.level)).collect());
                let allocation = registry
                    .distribute_party_experience(party, total, contributor, hints)
                    .await?;
                // Keyed by the member's id string
                let shares: HashMap<String, u64> = allocation
                    .into_iter()
                    .map(|(member, amount)| (member.to_string(), amount))
                    .collect();
                to_value(shares)
            }
            SyncCommand::AssignPartyLoot { party } => to_value(registry.assign_party_loot(party).await?),

            SyncCommand::SendFriendRequest { from, to } => {
                to_value(registry.send_friend_request(from, to).await?)
            }
            SyncCommand::AcceptFriendRequest { member, from } => {
                acknowledge(registry.accept_friend_request(member, from).await)
            }
            SyncCommand::DeclineFriendRequest { member, from } => {
                acknowledge(registry.decline_friend_request(member, from).await)
            }
            SyncCommand::RemoveFriend { member, friend } => {
                acknowledge(registry.remove_friend(member, friend).await)
            }

            SyncCommand::GetGuild { guild } => to_value(registry.guild(&guild).await?),
            SyncCommand::GetGuildStorage { guild } => to_value(registry.guild_storage(&guild).await?),
            SyncCommand::GetParty { party } => to_value(registry.party(&party).await?),
            SyncCommand::MemberGroups { member } => to_value(MemberGroups {
                guild: registry.member_guild(&member),
                party: registry.member_party(&member),
            }),
            SyncCommand::FriendsOf { member } => to_value(registry.friends_of(member).await?),
            SyncCommand::PendingFriendRequests { member } => {
                to_value(registry.pending_friend_requests(member).await?)
            }
            SyncCommand::Stats => to_value(registry.stats().await),
        }
    }
}

/// Failures a resend may get past once the store recovers; never cached.
fn is_transient(reply: &SyncReply) -> bool {
    reply.error_kind() == Some("persistence")
}

/// Unit results travel as `null`.
fn acknowledge(result: GroupResult<()>) -> Result<Value, SyncError> {
    result?;
    Ok(Value::Null)
}

fn to_value<T: Serialize>(value: T) -> Result<Value, SyncError> {
    Ok(serde_json::to_value(value)?)
}
