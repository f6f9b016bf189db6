//! Reward distribution engine.
//!
//! Splits party experience according to an [`ExperienceStrategy`] and picks
//! loot receivers according to a [`LootStrategy`]. The party bonus is
//! `1 + 0.1 × memberCount`, evaluated exactly in integer tenths so that the
//! documented truncation is the only rounding that ever happens.

use crate::error::{GroupError, GroupResult};
use crate::types::MemberId;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Experience split rule configured on a party.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExperienceStrategy {
    #[default]
    Equal,
    LevelBased,
    Contribution,
}

/// Loot receiver rule configured on a party.
///
/// Deserializing or parsing an unknown name yields [`LootStrategy::RoundRobin`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE", from = "String")]
pub enum LootStrategy {
    #[default]
    RoundRobin,
    FreeForAll,
    LeaderFirst,
}

impl LootStrategy {
    /// Parses a strategy name, coercing anything unrecognised to round robin.
    pub fn parse_lenient(name: &str) -> Self {
        match normalize(name).as_str() {
            "FREE_FOR_ALL" | "FREEFORALL" => LootStrategy::FreeForAll,
            "LEADER_FIRST" | "LEADERFIRST" => LootStrategy::LeaderFirst,
            _ => LootStrategy::RoundRobin,
        }
    }
}

impl From<String> for LootStrategy {
    fn from(name: String) -> Self {
        LootStrategy::parse_lenient(&name)
    }
}

impl fmt::Display for LootStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LootStrategy::RoundRobin => write!(f, "ROUND_ROBIN"),
            LootStrategy::FreeForAll => write!(f, "FREE_FOR_ALL"),
            LootStrategy::LeaderFirst => write!(f, "LEADER_FIRST"),
        }
    }
}

impl ExperienceStrategy {
    /// Parses a strategy name; unknown names yield `None`.
    pub fn parse(name: &str) -> Option<Self> {
        match normalize(name).as_str() {
            "EQUAL" => Some(ExperienceStrategy::Equal),
            "LEVEL_BASED" | "LEVELBASED" => Some(ExperienceStrategy::LevelBased),
            "CONTRIBUTION" => Some(ExperienceStrategy::Contribution),
            _ => None,
        }
    }
}

fn normalize(name: &str) -> String {
    name.trim().to_ascii_uppercase().replace(['-', ' '], "_")
}

/// Experience owed to each member after a distribution.
pub type Allocation = HashMap<MemberId, u64>;

/// Party bonus applied to `total`, as an exact numerator over 10.
fn bonus_tenths(total: u64, member_count: usize) -> u128 {
    total as u128 * (10 + member_count as u128)
}

fn clamp(value: u128) -> u64 {
    u64::try_from(value).unwrap_or(u64::MAX)
}

/// Splits `total` experience across `members`.
///
/// Every member receives an entry (zero allowed). `contributor` must be one
/// of `members`. `level_hints` is only consulted by
/// [`ExperienceStrategy::LevelBased`]; missing levels count as 1.
///
/// # Examples
///
/// ```rust
/// use guildhall_core::{distribute_experience, ExperienceStrategy, MemberId};
///
/// let members: Vec<MemberId> = (0..4).map(|_| MemberId::new()).collect();
/// let shares = distribute_experience(&members, 100, members[0], ExperienceStrategy::Equal, None)
///     .unwrap();
///
/// // Four members earn a 40% bonus, split evenly
/// assert!(shares.values().all(|share| *share == 35));
/// ```
pub fn distribute_experience(
    members: &[MemberId],
    total: u64,
    contributor: MemberId,
    strategy: ExperienceStrategy,
    level_hints: Option<&HashMap<MemberId, u32>>,
) -> GroupResult<Allocation> {
    if members.is_empty() {
        return Err(GroupError::invariant("cannot distribute to an empty group"));
    }
    if !members.contains(&contributor) {
        return Err(GroupError::not_found(format!(
            "contributor {} is not a member",
            contributor
        )));
    }

    let allocation = match strategy {
        ExperienceStrategy::Equal => equal_split(members, total),
        ExperienceStrategy::LevelBased => match level_hints {
            Some(hints) if !hints.is_empty() => level_weighted_split(members, total, hints),
            _ => equal_split(members, total),
        },
        ExperienceStrategy::Contribution => contribution_split(members, total, contributor),
    };
    Ok(allocation)
}

fn equal_split(members: &[MemberId], total: u64) -> Allocation {
    let count = members.len();
    let per_member = clamp(bonus_tenths(total, count) / (10 * count as u128));
    members.iter().map(|m| (*m, per_member)).collect()
}

fn level_weighted_split(
    members: &[MemberId],
    total: u64,
    hints: &HashMap<MemberId, u32>,
) -> Allocation {
    let with_bonus = bonus_tenths(total, members.len()) as f64 / 10.0;
    let weights: Vec<f64> = members
        .iter()
        .map(|m| 1.0 / f64::from(hints.get(m).copied().unwrap_or(1).max(1)))
        .collect();
    let weight_sum: f64 = weights.iter().sum();

    members
        .iter()
        .zip(weights)
        .map(|(member, weight)| {
            // Nudge past float noise so exact shares are not truncated down.
            let share = (with_bonus * weight / weight_sum + 1e-9).floor();
            (*member, share.max(0.0) as u64)
        })
        .collect()
}

fn contribution_split(members: &[MemberId], total: u64, contributor: MemberId) -> Allocation {
    if members.len() == 1 {
        return HashMap::from([(contributor, total)]);
    }

    let tenths = bonus_tenths(total, members.len());
    let with_bonus = tenths / 10;
    let contributor_share = tenths / 20;
    let others = (members.len() - 1) as u128;
    let per_other = (with_bonus - contributor_share) / others;

    members
        .iter()
        .map(|m| {
            let amount = if *m == contributor {
                contributor_share
            } else {
                per_other
            };
            (*m, clamp(amount))
        })
        .collect()
}

/// Round-robin position of a party, persisted for the party's lifetime.
///
/// Starts unset (equivalent to -1) so the first pick is the first member.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LootCursor(Option<usize>);

impl LootCursor {
    /// Advances the cursor over `member_count` members and returns the new index.
    pub fn advance(&mut self, member_count: usize) -> usize {
        let next = match self.0 {
            Some(current) => (current + 1) % member_count,
            None => 0,
        };
        self.0 = Some(next);
        next
    }

    pub fn position(&self) -> Option<usize> {
        self.0
    }
}

/// Picks the member who receives a loot drop.
///
/// # Examples
///
/// ```rust
/// use guildhall_core::{determine_loot_receiver, LootCursor, LootStrategy, MemberId};
///
/// let members = vec![MemberId::new(), MemberId::new()];
/// let mut cursor = LootCursor::default();
/// let mut rng = rand::thread_rng();
///
/// let first = determine_loot_receiver(&members, members[0], LootStrategy::RoundRobin, &mut cursor, &mut rng);
/// let second = determine_loot_receiver(&members, members[0], LootStrategy::RoundRobin, &mut cursor, &mut rng);
/// assert_eq!(first.unwrap(), members[0]);
/// assert_eq!(second.unwrap(), members[1]);
/// ```
pub fn determine_loot_receiver<G: Rng + ?Sized>(
    members: &[MemberId],
    leader: MemberId,
    strategy: LootStrategy,
    cursor: &mut LootCursor,
    rng: &mut G,
) -> GroupResult<MemberId> {
    if members.is_empty() {
        return Err(GroupError::invariant("cannot assign loot in an empty group"));
    }
    let receiver = match strategy {
        LootStrategy::RoundRobin => members[cursor.advance(members.len())],
        LootStrategy::FreeForAll => members[rng.gen_range(0..members.len())],
        LootStrategy::LeaderFirst => leader,
    };
    Ok(receiver)
}
