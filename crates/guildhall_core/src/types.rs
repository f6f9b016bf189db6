//! Identifier newtypes and role definitions shared by guilds and parties.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

// ============================================================================
// Identifiers
// ============================================================================

/// Unique identifier for a player known to the service.
///
/// Wraps a UUID so member ids cannot be confused with group ids.
///
/// # Examples
///
/// ```rust
/// use guildhall_core::MemberId;
///
/// let member = MemberId::new();
/// let parsed = MemberId::from_str(&member.to_string()).unwrap();
/// assert_eq!(member, parsed);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MemberId(pub Uuid);

impl MemberId {
    /// Creates a new random member ID using UUID v4.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parses a member ID from its hyphenated UUID form.
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Result<Self, uuid::Error> {
        Uuid::parse_str(s).map(Self)
    }
}

impl Default for MemberId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for MemberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for a guild or a party.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GroupId(pub Uuid);

impl GroupId {
    /// Creates a new random group ID using UUID v4.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parses a group ID from its hyphenated UUID form.
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Result<Self, uuid::Error> {
        Uuid::parse_str(s).map(Self)
    }
}

impl Default for GroupId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The two kinds of group the service manages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupKind {
    Guild,
    Party,
}

impl fmt::Display for GroupKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GroupKind::Guild => write!(f, "guild"),
            GroupKind::Party => write!(f, "party"),
        }
    }
}

// ============================================================================
// Roles
// ============================================================================

/// Behaviour every group role enum provides to the shared roster.
///
/// Roles are ordered by privilege through [`Role::rank`]; a higher rank means
/// more privilege. [`Role::succession_priority`] orders candidates when a
/// leader leaves: lower values are picked first.
pub trait Role: Copy + Eq + fmt::Debug + Send + Sync + 'static {
    /// The single leadership role.
    const LEADER: Self;

    /// Role assigned to new members and to a leader who hands over leadership.
    fn default_member() -> Self;

    /// Privilege rank; the leader has the highest rank.
    fn rank(self) -> u8;

    /// Ordering used when picking a successor for a departing leader.
    fn succession_priority(self) -> u8;

    fn is_leader(self) -> bool {
        self == Self::LEADER
    }

    /// Whether this role strictly outranks `other`.
    fn outranks(self, other: Self) -> bool {
        self.rank() > other.rank()
    }
}

/// Guild roles, ordered Leader > Officer > Member.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GuildRole {
    Leader,
    Officer,
    Member,
}

impl Role for GuildRole {
    const LEADER: Self = GuildRole::Leader;

    fn default_member() -> Self {
        GuildRole::Member
    }

    fn rank(self) -> u8 {
        match self {
            GuildRole::Leader => 2,
            GuildRole::Officer => 1,
            GuildRole::Member => 0,
        }
    }

    fn succession_priority(self) -> u8 {
        match self {
            GuildRole::Officer => 0,
            GuildRole::Member => 1,
            GuildRole::Leader => u8::MAX,
        }
    }
}

/// Party roles, ordered Leader > Member.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PartyRole {
    Leader,
    Member,
}

impl Role for PartyRole {
    const LEADER: Self = PartyRole::Leader;

    fn default_member() -> Self {
        PartyRole::Member
    }

    fn rank(self) -> u8 {
        match self {
            PartyRole::Leader => 1,
            PartyRole::Member => 0,
        }
    }

    fn succession_priority(self) -> u8 {
        match self {
            PartyRole::Member => 0,
            PartyRole::Leader => u8::MAX,
        }
    }
}

/// Current UNIX timestamp in milliseconds.
pub fn current_timestamp() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
