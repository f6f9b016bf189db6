//! State-change notifications and the bus that delivers them.
//!
//! Every committed mutation produces a [`Notification`] addressed to the
//! affected members. The [`EventBus`] serializes it once and hands the bytes
//! to every handler registered for its kind (and to catch-all handlers).
//! Delivery is best effort: a failing handler is logged and counted, and never
//! affects the operation that produced the notification.

use crate::distribution::{ExperienceStrategy, LootStrategy};
use crate::error::EventError;
use crate::types::{current_timestamp, GroupId, GroupKind, GuildRole, MemberId};
use async_trait::async_trait;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Key under which catch-all handlers are registered.
pub const ANY_NOTIFICATION: &str = "*";

/// One member's share of a distributed reward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RewardShare {
    pub member: MemberId,
    pub amount: u64,
}

/// What happened.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NotificationKind {
    GroupCreated { group: GroupKind, name: Option<String> },
    GroupDisbanded { group: GroupKind },
    InviteSent { group: GroupKind, inviter: MemberId, invitee: MemberId },
    InviteDeclined { group: GroupKind, invitee: MemberId },
    MemberJoined { group: GroupKind, member: MemberId },
    MemberLeft { group: GroupKind, member: MemberId },
    MemberKicked { group: GroupKind, member: MemberId, by: MemberId },
    RoleChanged { member: MemberId, role: GuildRole },
    LeaderChanged { group: GroupKind, previous: MemberId, current: MemberId },
    StrategiesChanged { experience: ExperienceStrategy, loot: LootStrategy },
    ExperienceDistributed { contributor: MemberId, shares: Vec<RewardShare> },
    LootAssigned { receiver: MemberId, strategy: LootStrategy },
    DescriptionChanged { description: String },
    GuildLevelUp { level: u32, max_members: usize, storage_slots: u32 },
    StorageUpgraded { max_slots: u32, balance: f64 },
    InterestAccrued { credited: f64, balance: f64 },
    FriendRequestSent { from: MemberId, to: MemberId },
    FriendAdded { first: MemberId, second: MemberId },
    FriendRemoved { first: MemberId, second: MemberId },
}

impl NotificationKind {
    /// Stable name used as the handler registration key.
    pub fn name(&self) -> &'static str {
        match self {
            NotificationKind::GroupCreated { .. } => "group_created",
            NotificationKind::GroupDisbanded { .. } => "group_disbanded",
            NotificationKind::InviteSent { .. } => "invite_sent",
            NotificationKind::InviteDeclined { .. } => "invite_declined",
            NotificationKind::MemberJoined { .. } => "member_joined",
            NotificationKind::MemberLeft { .. } => "member_left",
            NotificationKind::MemberKicked { .. } => "member_kicked",
            NotificationKind::RoleChanged { .. } => "role_changed",
            NotificationKind::LeaderChanged { .. } => "leader_changed",
            NotificationKind::StrategiesChanged { .. } => "strategies_changed",
            NotificationKind::ExperienceDistributed { .. } => "experience_distributed",
            NotificationKind::LootAssigned { .. } => "loot_assigned",
            NotificationKind::DescriptionChanged { .. } => "description_changed",
            NotificationKind::GuildLevelUp { .. } => "guild_level_up",
            NotificationKind::StorageUpgraded { .. } => "storage_upgraded",
            NotificationKind::InterestAccrued { .. } => "interest_accrued",
            NotificationKind::FriendRequestSent { .. } => "friend_request_sent",
            NotificationKind::FriendAdded { .. } => "friend_added",
            NotificationKind::FriendRemoved { .. } => "friend_removed",
        }
    }
}

/// A state change addressed to the members it affects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub id: Uuid,
    pub group_id: Option<GroupId>,
    pub recipients: Vec<MemberId>,
    pub kind: NotificationKind,
    pub timestamp: i64,
}

impl Notification {
    pub fn new(group_id: Option<GroupId>, recipients: Vec<MemberId>, kind: NotificationKind) -> Self {
        Self {
            id: Uuid::new_v4(),
            group_id,
            recipients,
            kind,
            timestamp: current_timestamp(),
        }
    }
}

// ============================================================================
// Handlers
// ============================================================================

/// Receives serialized notifications.
#[async_trait]
pub trait NotificationHandler: Send + Sync {
    async fn handle(&self, data: &[u8]) -> Result<(), EventError>;

    fn handler_name(&self) -> &str;
}

/// Adapts a closure over a deserialized payload into a handler.
///
/// `T` is usually [`Notification`] or `serde_json::Value`.
pub struct TypedNotificationHandler<T, F>
where
    T: DeserializeOwned + Send + Sync,
    F: Fn(T) -> Result<(), EventError> + Send + Sync,
{
    handler: F,
    name: String,
    _phantom: std::marker::PhantomData<fn() -> T>,
}

impl<T, F> TypedNotificationHandler<T, F>
where
    T: DeserializeOwned + Send + Sync,
    F: Fn(T) -> Result<(), EventError> + Send + Sync,
{
    pub fn new(name: String, handler: F) -> Self {
        Self {
            handler,
            name,
            _phantom: std::marker::PhantomData,
        }
    }
}

#[async_trait]
impl<T, F> NotificationHandler for TypedNotificationHandler<T, F>
where
    T: DeserializeOwned + Send + Sync,
    F: Fn(T) -> Result<(), EventError> + Send + Sync,
{
    async fn handle(&self, data: &[u8]) -> Result<(), EventError> {
        let payload: T = serde_json::from_slice(data)?;
        (self.handler)(payload)
    }

    fn handler_name(&self) -> &str {
        &self.name
    }
}

// ============================================================================
// Event Bus
// ============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventBusStats {
    pub total_handlers: usize,
    pub notifications_published: u64,
    pub handler_failures: u64,
}

/// Routes notifications to handlers registered by kind name.
///
/// # Examples
///
/// ```rust
/// use guildhall_core::{EventBus, GroupKind, MemberId, Notification, NotificationKind};
///
/// #[tokio::main]
/// async fn main() {
///     let bus = EventBus::new();
///     bus.on("member_left", |n: Notification| {
///         println!("{} left", n.recipients.len());
///         Ok(())
///     })
///     .await;
///
///     let member = MemberId::new();
///     let kind = NotificationKind::MemberLeft { group: GroupKind::Party, member };
///     bus.publish(Notification::new(None, vec![member], kind)).await;
///     assert_eq!(bus.get_stats().await.notifications_published, 1);
/// }
/// ```
pub struct EventBus {
    handlers: RwLock<HashMap<String, Vec<Arc<dyn NotificationHandler>>>>,
    stats: RwLock<EventBusStats>,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            handlers: RwLock::new(HashMap::new()),
            stats: RwLock::new(EventBusStats::default()),
        }
    }

    /// Registers a handler for one notification kind (see
    /// [`NotificationKind::name`]) or for [`ANY_NOTIFICATION`].
    pub async fn on<T, F>(&self, kind: &str, handler: F)
    where
        T: DeserializeOwned + Send + Sync + 'static,
        F: Fn(T) -> Result<(), EventError> + Send + Sync + 'static,
    {
        let name = format!("{}::{}", kind, std::any::type_name::<T>());
        self.subscribe(kind, Arc::new(TypedNotificationHandler::new(name, handler)))
            .await;
    }

    /// Registers a handler for every notification.
    pub async fn on_any<F>(&self, handler: F)
    where
        F: Fn(Notification) -> Result<(), EventError> + Send + Sync + 'static,
    {
        self.on(ANY_NOTIFICATION, handler).await;
    }

    pub async fn subscribe(&self, kind: &str, handler: Arc<dyn NotificationHandler>) {
        let mut handlers = self.handlers.write().await;
        handlers.entry(kind.to_string()).or_default().push(handler);

        let mut stats = self.stats.write().await;
        stats.total_handlers += 1;

        info!("📝 Registered notification handler for {}", kind);
    }

    /// Delivers `notification` to its handlers. Never fails.
    pub async fn publish(&self, notification: Notification) {
        let kind = notification.kind.name();
        let data = match serde_json::to_vec(&notification) {
            Ok(data) => data,
            Err(e) => {
                warn!("⚠️ Could not serialize {} notification: {}", kind, e);
                return;
            }
        };

        let handlers = self.handlers.read().await;
        let targets: Vec<Arc<dyn NotificationHandler>> = handlers
            .get(kind)
            .into_iter()
            .chain(handlers.get(ANY_NOTIFICATION))
            .flatten()
            .cloned()
            .collect();
        drop(handlers);

        debug!("📤 Publishing {} to {} handlers", kind, targets.len());

        let mut failures = 0;
        for handler in &targets {
            if let Err(e) = handler.handle(&data).await {
                warn!("❌ Notification handler {} failed: {}", handler.handler_name(), e);
                failures += 1;
            }
        }

        let mut stats = self.stats.write().await;
        stats.notifications_published += 1;
        stats.handler_failures += failures;
    }

    pub async fn get_stats(&self) -> EventBusStats {
        self.stats.read().await.clone()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn joined(member: MemberId) -> Notification {
        Notification::new(
            Some(GroupId::new()),
            vec![member],
            NotificationKind::MemberJoined {
                group: GroupKind::Party,
                member,
            },
        )
    }

    #[tokio::test]
    async fn test_publish_reaches_kind_and_catch_all_handlers() {
        let bus = EventBus::new();
        let by_kind = Arc::new(AtomicUsize::new(0));
        let any = Arc::new(AtomicUsize::new(0));

        let counter = by_kind.clone();
        bus.on("member_joined", move |n: Notification| {
            assert_eq!(n.kind.name(), "member_joined");
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .await;
        let counter = any.clone();
        bus.on_any(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .await;

        bus.publish(joined(MemberId::new())).await;
        bus.publish(Notification::new(
            None,
            vec![],
            NotificationKind::FriendRemoved {
                first: MemberId::new(),
                second: MemberId::new(),
            },
        ))
        .await;

        assert_eq!(by_kind.load(Ordering::SeqCst), 1);
        assert_eq!(any.load(Ordering::SeqCst), 2);
        let stats = bus.get_stats().await;
        assert_eq!(stats.total_handlers, 2);
        assert_eq!(stats.notifications_published, 2);
    }

    #[tokio::test]
    async fn test_failing_handler_is_counted_not_propagated() {
        let bus = EventBus::new();
        bus.on_any(|_| Err(EventError::HandlerExecution("client offline".into())))
            .await;
        let delivered = Arc::new(AtomicUsize::new(0));
        let counter = delivered.clone();
        bus.on("member_joined", move |_: serde_json::Value| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .await;

        bus.publish(joined(MemberId::new())).await;

        assert_eq!(delivered.load(Ordering::SeqCst), 1);
        assert_eq!(bus.get_stats().await.handler_failures, 1);
    }
}
