//! # Guildhall Core
//!
//! Social state for a game network: guilds, parties, guild storage and friend
//! lists, kept independent of any game host and reached by other nodes through
//! a framed, versioned sync protocol.
//!
//! ## Core Features
//!
//! - **Leadership**: every guild and party has exactly one leader at all
//!   times; transfers and successions happen in a single committed step
//! - **Reward Distribution**: party experience split by `EQUAL`,
//!   `LEVEL_BASED` or `CONTRIBUTION`, loot assigned by round robin, free for
//!   all or leader first
//! - **Progression**: guild levels with configurable slot and member-cap rewards
//! - **Storage Economy**: slot-bounded item storage, money, interest and
//!   refundable capacity upgrades
//! - **Fail-Closed Mutations**: every operation works on a draft under a
//!   per-group lock and commits only after persistence succeeded
//! - **Notifications**: every committed change is published on the [`EventBus`]
//!
//! ## Quick Start Example
//!
//! ```rust
//! use guildhall_core::*;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), GroupError> {
//!     let registry = GroupRegistry::new(
//!         RulesConfig::default(),
//!         Arc::new(MemoryStore::new()),
//!         Arc::new(EventBus::new()),
//!     );
//!
//!     let leader = MemberId::new();
//!     let recruit = MemberId::new();
//!     let guild = registry.create_guild(leader, "Ironclad", "IRON").await?;
//!
//!     registry.invite_to_guild(leader, recruit).await?;
//!     registry.accept_guild_invite(recruit, guild.id).await?;
//!     registry.transfer_guild_leadership(leader, recruit).await?;
//!
//!     assert_eq!(registry.guild(&guild.id).await?.leader(), recruit);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod distribution;
pub mod error;
pub mod events;
pub mod friends;
pub mod guild;
pub mod leadership;
pub mod party;
pub mod persistence;
pub mod progression;
pub mod registry;
pub mod roster;
pub mod storage;
pub mod sync;
pub mod types;

pub use config::{
    FriendRules, GuildRules, MemberCapReward, PartyRules, ProgressionConfig, RulesConfig,
    SlotReward, StorageRules,
};
pub use distribution::{
    determine_loot_receiver, distribute_experience, Allocation, ExperienceStrategy, LootCursor,
    LootStrategy,
};
pub use error::{EventError, FrameError, GroupError, GroupResult, StoreError, StoreResult, SyncError};
pub use events::{
    EventBus, EventBusStats, Notification, NotificationHandler, NotificationKind, RewardShare,
    TypedNotificationHandler, ANY_NOTIFICATION,
};
pub use friends::{FriendGraph, FriendList, FriendRequestOutcome};
pub use guild::Guild;
pub use leadership::{Departure, LeadershipChange};
pub use party::Party;
pub use persistence::{GroupStore, JsonFileStore, MemoryStore};
pub use progression::{add_experience, LevelUp, ProgressionOutcome};
pub use registry::{GroupRegistry, InterestReport, RegistryStats};
pub use roster::{Membership, Roster};
pub use storage::{GuildStorage, UpgradeReceipt};
pub use sync::{SyncCommand, SyncEnvelope, SyncGateway, SyncOutcome, SyncReply, PROTOCOL_VERSION};
pub use types::{current_timestamp, GroupId, GroupKind, GuildRole, MemberId, PartyRole, Role};
