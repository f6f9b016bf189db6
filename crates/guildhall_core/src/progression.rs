//! Guild leveling and level-up rewards.

use crate::config::ProgressionConfig;
use crate::error::{GroupError, GroupResult};
use crate::guild::Guild;
use crate::storage::GuildStorage;
use serde::{Deserialize, Serialize};
use tracing::info;

/// Rewards applied when a guild reached `level`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LevelUp {
    pub level: u32,
    /// Storage slots added at this level
    pub slots_granted: u32,
    /// Member cap set at this level
    pub max_members: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressionOutcome {
    pub previous_level: u32,
    pub new_level: u32,
    pub experience: u64,
    pub level_ups: Vec<LevelUp>,
}

impl ProgressionConfig {
    /// Experience needed to advance from `level` to the next one.
    pub fn experience_for_next(&self, level: u32) -> u64 {
        self.base_experience.saturating_mul(u64::from(level))
    }

    /// Rewards configured for `level`.
    pub fn rewards_at(&self, level: u32) -> LevelUp {
        let slots_granted = self
            .slot_rewards
            .iter()
            .filter(|r| r.level == level)
            .map(|r| r.slots)
            .sum();
        let max_members = self
            .member_cap_rewards
            .iter()
            .find(|r| r.level == level)
            .map(|r| r.max_members);
        LevelUp {
            level,
            slots_granted,
            max_members,
        }
    }
}

/// Credits `amount` experience to `guild`, applying every level reached.
///
/// Fails with `InvalidAmount` for zero and `MaxLevelReached` when the guild
/// cannot level further; neither failure changes state.
pub fn add_experience(
    guild: &mut Guild,
    storage: &mut GuildStorage,
    amount: u64,
    source: &str,
    config: &ProgressionConfig,
) -> GroupResult<ProgressionOutcome> {
    if amount == 0 {
        return Err(GroupError::InvalidAmount(
            "guild experience must be positive".to_string(),
        ));
    }
    if guild.level >= config.max_level {
        return Err(GroupError::MaxLevelReached(config.max_level));
    }

    let previous_level = guild.level;
    let mut level_ups = Vec::new();
    guild.experience = guild.experience.saturating_add(amount);

    while guild.level < config.max_level {
        let needed = config.experience_for_next(guild.level);
        if guild.experience < needed {
            break;
        }
        guild.experience -= needed;
        guild.level += 1;

        let reward = config.rewards_at(guild.level);
        storage.max_slots = storage.max_slots.saturating_add(reward.slots_granted);
        if let Some(cap) = reward.max_members {
            guild.max_members = cap;
        }
        info!(
            "🏰 Guild {} reached level {} ({}): +{} slots, member cap {}",
            guild.name, guild.level, source, reward.slots_granted, guild.max_members
        );
        level_ups.push(reward);
    }

    if guild.level >= config.max_level {
        guild.experience = 0;
    }

    Ok(ProgressionOutcome {
        previous_level,
        new_level: guild.level,
        experience: guild.experience,
        level_ups,
    })
}
