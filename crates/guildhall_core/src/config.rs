//! Rule configuration for guilds, parties, storage and friends.
//!
//! Every threshold the rules depend on lives here as data so it can be loaded
//! from the server's TOML file and overridden in tests.

use crate::distribution::{ExperienceStrategy, LootStrategy};
use serde::{Deserialize, Serialize};

/// All rule sections consumed by the registry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RulesConfig {
    #[serde(default)]
    pub guilds: GuildRules,
    #[serde(default)]
    pub parties: PartyRules,
    #[serde(default)]
    pub storage: StorageRules,
    #[serde(default)]
    pub friends: FriendRules,
}

/// Guild naming, sizing and progression settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GuildRules {
    pub min_name_length: usize,
    pub max_name_length: usize,
    pub min_tag_length: usize,
    pub max_tag_length: usize,
    /// Longest description a leader may set, in characters
    pub max_description_length: usize,
    /// Member cap of a freshly created guild
    pub default_max_members: usize,
    pub progression: ProgressionConfig,
}

impl Default for GuildRules {
    fn default() -> Self {
        Self {
            min_name_length: 3,
            max_name_length: 16,
            min_tag_length: 2,
            max_tag_length: 5,
            max_description_length: 256,
            default_max_members: 10,
            progression: ProgressionConfig::default(),
        }
    }
}

/// Level curve and level-up reward table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProgressionConfig {
    pub max_level: u32,
    /// Experience needed to advance from level L is `base_experience * L`
    pub base_experience: u64,
    pub slot_rewards: Vec<SlotReward>,
    pub member_cap_rewards: Vec<MemberCapReward>,
}

/// Extra storage slots granted on reaching `level`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotReward {
    pub level: u32,
    pub slots: u32,
}

/// Member cap set (not added) on reaching `level`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberCapReward {
    pub level: u32,
    pub max_members: usize,
}

impl Default for ProgressionConfig {
    fn default() -> Self {
        Self {
            max_level: 25,
            base_experience: 1000,
            slot_rewards: [5, 10, 15, 20, 25]
                .into_iter()
                .map(|level| SlotReward { level, slots: 10 })
                .collect(),
            member_cap_rewards: [(3, 15), (7, 20), (12, 25), (18, 30), (25, 40)]
                .into_iter()
                .map(|(level, max_members)| MemberCapReward { level, max_members })
                .collect(),
        }
    }
}

/// Party size and default strategies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PartyRules {
    pub max_size: usize,
    pub default_experience_strategy: ExperienceStrategy,
    pub default_loot_strategy: LootStrategy,
}

impl Default for PartyRules {
    fn default() -> Self {
        Self {
            max_size: 5,
            default_experience_strategy: ExperienceStrategy::Equal,
            default_loot_strategy: LootStrategy::RoundRobin,
        }
    }
}

/// Guild storage capacity and economy settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageRules {
    pub initial_slots: u32,
    pub upgrade_cost: f64,
    pub upgrade_slots: u32,
    /// Purchased upgrades cannot raise capacity above this
    pub max_slots_limit: u32,
    /// Fraction applied per accrual tick
    pub interest_rate: f64,
    pub interest_interval_secs: u64,
}

impl Default for StorageRules {
    fn default() -> Self {
        Self {
            initial_slots: 27,
            upgrade_cost: 10_000.0,
            upgrade_slots: 9,
            max_slots_limit: 108,
            interest_rate: 0.01,
            interest_interval_secs: 3600,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FriendRules {
    pub max_friends: usize,
}

impl Default for FriendRules {
    fn default() -> Self {
        Self { max_friends: 50 }
    }
}

impl RulesConfig {
    /// Checks the rule set for values the operations cannot work with.
    pub fn validate(&self) -> Result<(), String> {
        let guilds = &self.guilds;
        if guilds.min_name_length == 0 || guilds.min_name_length > guilds.max_name_length {
            return Err("Guild name length bounds are invalid".to_string());
        }
        if guilds.min_tag_length == 0 || guilds.min_tag_length > guilds.max_tag_length {
            return Err("Guild tag length bounds are invalid".to_string());
        }
        if guilds.default_max_members == 0 {
            return Err("Guild default_max_members must be at least 1".to_string());
        }
        if guilds.progression.max_level == 0 || guilds.progression.base_experience == 0 {
            return Err("Guild progression needs a positive max level and base experience".to_string());
        }
        if self.parties.max_size < 2 {
            return Err("Party max_size must be at least 2".to_string());
        }
        let storage = &self.storage;
        if !(storage.interest_rate.is_finite() && storage.interest_rate >= 0.0) {
            return Err(format!(
                "Storage interest_rate must be a non-negative number, got {}",
                storage.interest_rate
            ));
        }
        if !(storage.upgrade_cost.is_finite() && storage.upgrade_cost >= 0.0) {
            return Err("Storage upgrade_cost must be a non-negative number".to_string());
        }
        if storage.initial_slots > storage.max_slots_limit {
            return Err("Storage initial_slots exceeds max_slots_limit".to_string());
        }
        Ok(())
    }
}
