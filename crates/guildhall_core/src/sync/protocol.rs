//! Messages exchanged with routing and compute nodes.

use crate::distribution::{ExperienceStrategy, LootStrategy};
use crate::error::SyncError;
use crate::types::{GroupId, MemberId};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Version carried by every envelope; other versions are refused.
pub const PROTOCOL_VERSION: u16 = 1;

/// A request from another node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncEnvelope {
    pub version: u16,
    /// Chosen by the sender; retries reuse it
    pub message_id: Uuid,
    /// Name of the sending node
    pub origin: String,
    pub command: SyncCommand,
}

impl SyncEnvelope {
    pub fn new(origin: impl Into<String>, command: SyncCommand) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            message_id: Uuid::new_v4(),
            origin: origin.into(),
            command,
        }
    }
}

/// Level reported for one member, used by level-based experience sharing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LevelHint {
    pub member: MemberId,
    pub level: u32,
}

/// Every registry operation reachable over the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum SyncCommand {
    // Guilds
    CreateGuild { leader: MemberId, name: String, tag: String },
    DeleteGuild { actor: MemberId },
    InviteToGuild { actor: MemberId, target: MemberId },
    AcceptGuildInvite { member: MemberId, guild: GroupId },
    DeclineGuildInvite { member: MemberId, guild: GroupId },
    KickFromGuild { actor: MemberId, target: MemberId },
    Promote { actor: MemberId, target: MemberId },
    Demote { actor: MemberId, target: MemberId },
    LeaveGuild { member: MemberId },
    TransferGuildLeadership { current: MemberId, new_leader: MemberId },
    SetGuildDescription { actor: MemberId, description: String },
    AddGuildExperience { guild: GroupId, amount: u64, source: String },
    DepositItem { member: MemberId, item_type: String, quantity: u64 },
    WithdrawItem { member: MemberId, item_type: String, quantity: u64 },
    DepositMoney { member: MemberId, amount: f64 },
    WithdrawMoney { member: MemberId, amount: f64 },
    PurchaseStorageUpgrade { actor: MemberId },

    // Parties
    CreateParty { leader: MemberId },
    InviteToParty { actor: MemberId, target: MemberId },
    AcceptPartyInvite { member: MemberId, party: GroupId },
    DeclinePartyInvite { member: MemberId, party: GroupId },
    KickFromParty { actor: MemberId, target: MemberId },
    LeaveParty { member: MemberId },
    TransferPartyLeadership { current: MemberId, new_leader: MemberId },
    SetPartyStrategies { actor: MemberId, experience: ExperienceStrategy, loot: LootStrategy },
    DistributePartyExperience {
        party: GroupId,
        total: u64,
        contributor: MemberId,
        #[serde(default)]
        level_hints: Option<Vec<LevelHint>>,
    },
    AssignPartyLoot { party: GroupId },

    // Friends
    SendFriendRequest { from: MemberId, to: MemberId },
    AcceptFriendRequest { member: MemberId, from: MemberId },
    DeclineFriendRequest { member: MemberId, from: MemberId },
    RemoveFriend { member: MemberId, friend: MemberId },

    // Queries
    GetGuild { guild: GroupId },
    GetGuildStorage { guild: GroupId },
    GetParty { party: GroupId },
    MemberGroups { member: MemberId },
    FriendsOf { member: MemberId },
    PendingFriendRequests { member: MemberId },
    Stats,
}

impl SyncCommand {
    /// True for commands that change state.
    pub fn is_mutation(&self) -> bool {
        !matches!(
            self,
            SyncCommand::GetGuild { .. }
                | SyncCommand::GetGuildStorage { .. }
                | SyncCommand::GetParty { .. }
                | SyncCommand::MemberGroups { .. }
                | SyncCommand::FriendsOf { .. }
                | SyncCommand::PendingFriendRequests { .. }
                | SyncCommand::Stats
        )
    }
}

/// Answer to a [`SyncEnvelope`], matched by `message_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncReply {
    pub message_id: Uuid,
    pub outcome: SyncOutcome,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SyncOutcome {
    Ok { value: Value },
    Err { kind: String, message: String },
}

impl SyncReply {
    pub fn ok(message_id: Uuid, value: Value) -> Self {
        Self {
            message_id,
            outcome: SyncOutcome::Ok { value },
        }
    }

    pub fn error(message_id: Uuid, error: &SyncError) -> Self {
        Self {
            message_id,
            outcome: SyncOutcome::Err {
                kind: error.kind().to_string(),
                message: error.to_string(),
            },
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self.outcome, SyncOutcome::Ok { .. })
    }

    /// Error kind, if the request failed.
    pub fn error_kind(&self) -> Option<&str> {
        match &self.outcome {
            SyncOutcome::Err { kind, .. } => Some(kind),
            SyncOutcome::Ok { .. } => None,
        }
    }
}

/// Guild and party a member currently belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberGroups {
    pub guild: Option<GroupId>,
    pub party: Option<GroupId>,
}
