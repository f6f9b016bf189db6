//! Integration tests for the group registry
//!
//! These drive the registry the way the sync gateway does and check the
//! invariants that must hold after every committed operation.

use guildhall_core::*;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Helper to build a registry over an in-memory store
fn registry_with(rules: RulesConfig) -> (Arc<GroupRegistry>, Arc<MemoryStore>, Arc<EventBus>) {
    let store = Arc::new(MemoryStore::new());
    let events = Arc::new(EventBus::new());
    let registry = Arc::new(GroupRegistry::new(rules, store.clone(), events.clone()));
    (registry, store, events)
}

fn registry() -> (Arc<GroupRegistry>, Arc<MemoryStore>, Arc<EventBus>) {
    registry_with(RulesConfig::default())
}

async fn counter(events: &EventBus, kind: &str) -> Arc<AtomicUsize> {
    let count = Arc::new(AtomicUsize::new(0));
    let handle = count.clone();
    events
        .on(kind, move |_: Notification| {
            handle.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .await;
    count
}

fn assert_single_leader(guild: &Guild) {
    let leaders: Vec<MemberId> = guild
        .roster
        .members()
        .filter(|m| m.role == GuildRole::Leader)
        .map(|m| m.member)
        .collect();
    assert_eq!(leaders, vec![guild.leader()], "exactly one leader expected");
}

/// Founds a guild and brings `others` in as plain members
async fn guild_with(registry: &GroupRegistry, name: &str, others: usize) -> (Guild, MemberId, Vec<MemberId>) {
    let leader = MemberId::new();
    let tag = &name[..3];
    let guild = registry.create_guild(leader, name, tag).await.unwrap();
    let mut members = Vec::new();
    for _ in 0..others {
        let member = MemberId::new();
        registry.invite_to_guild(leader, member).await.unwrap();
        registry.accept_guild_invite(member, guild.id).await.unwrap();
        members.push(member);
    }
    (guild, leader, members)
}

async fn party_with(registry: &GroupRegistry, size: usize) -> (Party, Vec<MemberId>) {
    let ids: Vec<MemberId> = (0..size).map(|_| MemberId::new()).collect();
    let party = registry.create_party(ids[0]).await.unwrap();
    for id in &ids[1..] {
        registry.invite_to_party(ids[0], *id).await.unwrap();
        registry.accept_party_invite(*id, party.id).await.unwrap();
    }
    (party, ids)
}

// ============================================================================
// Leadership
// ============================================================================

#[tokio::test]
async fn test_leader_uniqueness_through_membership_changes() {
    let (registry, store, _) = registry();
    let (guild, founder, members) = guild_with(&registry, "Lionheart", 2).await;
    let (a, b) = (members[0], members[1]);

    assert_eq!(registry.promote(founder, a).await.unwrap(), GuildRole::Officer);
    assert_single_leader(&registry.guild(&guild.id).await.unwrap());

    registry.transfer_guild_leadership(founder, b).await.unwrap();
    let snapshot = registry.guild(&guild.id).await.unwrap();
    assert_single_leader(&snapshot);
    assert_eq!(snapshot.leader(), b);
    assert_eq!(snapshot.roster.role_of(&founder), Some(GuildRole::Member));

    // A stale transfer from the old leader is refused
    assert!(matches!(
        registry.transfer_guild_leadership(founder, a).await,
        Err(GroupError::Unauthorized(_))
    ));

    registry.demote(b, a).await.unwrap();
    registry.leave_guild(founder).await.unwrap();
    assert_single_leader(&registry.guild(&guild.id).await.unwrap());

    // The leader leaves; the remaining member takes over
    let departure = registry.leave_guild(b).await.unwrap();
    assert_eq!(departure, Departure::Succeeded { departed: b, successor: a });
    let snapshot = registry.guild(&guild.id).await.unwrap();
    assert_single_leader(&snapshot);
    assert_eq!(snapshot.leader(), a);
    assert_eq!(store.stored_guild(&guild.id).unwrap().leader(), a);

    // The sole member leaves; the guild and its storage are gone
    let departure = registry.leave_guild(a).await.unwrap();
    assert_eq!(departure, Departure::Disbanded { departed: a });
    assert!(matches!(registry.guild(&guild.id).await, Err(GroupError::NotFound(_))));
    assert_eq!(registry.member_guild(&a), None);
    assert_eq!(store.guild_count(), 0);
    assert!(store.stored_storage(&guild.id).is_none());
}

#[tokio::test]
async fn test_officer_is_preferred_successor() {
    let (registry, _, events) = registry();
    let changes = counter(&events, "leader_changed").await;
    let (guild, leader, members) = guild_with(&registry, "Vanguard", 3).await;
    registry.promote(leader, members[2]).await.unwrap();

    registry.leave_guild(leader).await.unwrap();

    assert_eq!(registry.guild(&guild.id).await.unwrap().leader(), members[2]);
    assert_eq!(changes.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_party_of_one_is_deleted_when_leader_leaves() {
    let (registry, _, events) = registry();
    let disbanded = counter(&events, "group_disbanded").await;
    let leader = MemberId::new();
    let party = registry.create_party(leader).await.unwrap();

    let departure = registry.leave_party(leader).await.unwrap();

    assert_eq!(departure, Departure::Disbanded { departed: leader });
    assert!(matches!(registry.party(&party.id).await, Err(GroupError::NotFound(_))));
    assert_eq!(registry.member_party(&leader), None);
    assert_eq!(disbanded.load(Ordering::SeqCst), 1);
    // Free to form a new one
    registry.create_party(leader).await.unwrap();
}

// ============================================================================
// Membership rules
// ============================================================================

#[tokio::test]
async fn test_guild_names_and_tags_are_unique_case_insensitively() {
    let (registry, _, _) = registry();
    let first = MemberId::new();
    registry.create_guild(first, "Knights", "KN").await.unwrap();

    assert!(matches!(
        registry.create_guild(MemberId::new(), "knights", "KX").await,
        Err(GroupError::AlreadyExists(_))
    ));
    assert!(matches!(
        registry.create_guild(MemberId::new(), "Templars", "kn").await,
        Err(GroupError::AlreadyExists(_))
    ));
    // The founder cannot found a second guild
    assert!(matches!(
        registry.create_guild(first, "Templars", "TMP").await,
        Err(GroupError::AlreadyExists(_))
    ));
    assert!(matches!(
        registry.create_guild(MemberId::new(), "No spaces", "NS").await,
        Err(GroupError::InvariantViolation(_))
    ));

    registry.delete_guild(first).await.unwrap();
    assert_eq!(registry.guild_by_name("Knights"), None);
    registry.create_guild(MemberId::new(), "KNIGHTS", "KN").await.unwrap();
}

#[tokio::test]
async fn test_only_leader_deletes_guild() {
    let (registry, store, _) = registry();
    let (guild, leader, members) = guild_with(&registry, "Harbor", 1).await;

    assert!(matches!(
        registry.delete_guild(members[0]).await,
        Err(GroupError::Unauthorized(_))
    ));
    registry.delete_guild(leader).await.unwrap();

    assert_eq!(store.guild_count(), 0);
    assert_eq!(registry.member_guild(&members[0]), None);
    assert!(registry.guild_storage(&guild.id).await.is_err());
}

#[tokio::test]
async fn test_member_cannot_join_two_guilds_concurrently() {
    let (registry, _, _) = registry();
    let (first, first_leader, _) = guild_with(&registry, "Northwind", 0).await;
    let (second, second_leader, _) = guild_with(&registry, "Southwind", 0).await;
    let recruit = MemberId::new();
    registry.invite_to_guild(first_leader, recruit).await.unwrap();
    registry.invite_to_guild(second_leader, recruit).await.unwrap();

    let (a, b) = tokio::join!(
        registry.accept_guild_invite(recruit, first.id),
        registry.accept_guild_invite(recruit, second.id)
    );

    assert!(a.is_ok() ^ b.is_ok(), "exactly one acceptance must win");
    let joined = registry.member_guild(&recruit).unwrap();
    let other = if joined == first.id { second.id } else { first.id };
    assert!(!registry.guild(&other).await.unwrap().roster.contains(&recruit));
}

#[tokio::test]
async fn test_kick_requires_outranking() {
    let (registry, _, events) = registry();
    let kicks = counter(&events, "member_kicked").await;
    let (guild, leader, members) = guild_with(&registry, "Ashen", 2).await;
    let (officer, member) = (members[0], members[1]);
    registry.promote(leader, officer).await.unwrap();

    assert!(matches!(
        registry.kick_from_guild(member, officer).await,
        Err(GroupError::Unauthorized(_))
    ));
    assert!(registry.kick_from_guild(officer, leader).await.is_err());
    registry.kick_from_guild(officer, member).await.unwrap();

    assert_eq!(registry.member_guild(&member), None);
    assert_eq!(registry.guild(&guild.id).await.unwrap().roster.len(), 2);
    assert_eq!(kicks.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_full_guild_refuses_invites() {
    let mut rules = RulesConfig::default();
    rules.guilds.default_max_members = 2;
    let (registry, _, _) = registry_with(rules);
    let (_, leader, _) = guild_with(&registry, "Tiny", 1).await;

    assert!(matches!(
        registry.invite_to_guild(leader, MemberId::new()).await,
        Err(GroupError::InvariantViolation(_))
    ));
}

// ============================================================================
// Distribution
// ============================================================================

#[tokio::test]
async fn test_equal_split_for_four_members() {
    let (registry, _, events) = registry();
    let shared = counter(&events, "experience_distributed").await;
    let (party, ids) = party_with(&registry, 4).await;

    let allocation = registry
        .distribute_party_experience(party.id, 100, ids[1], None)
        .await
        .unwrap();

    assert_eq!(allocation.len(), 4);
    assert!(ids.iter().all(|id| allocation[id] == 35));
    assert_eq!(shared.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_single_member_contribution_gets_raw_total() {
    let (registry, _, _) = registry();
    let (party, ids) = party_with(&registry, 1).await;
    registry
        .set_party_strategies(ids[0], ExperienceStrategy::Contribution, LootStrategy::RoundRobin)
        .await
        .unwrap();

    let allocation = registry
        .distribute_party_experience(party.id, 100, ids[0], None)
        .await
        .unwrap();
    assert_eq!(allocation[&ids[0]], 100);
}

#[tokio::test]
async fn test_level_based_split_through_registry() {
    let (registry, _, _) = registry();
    let (party, ids) = party_with(&registry, 2).await;
    registry
        .set_party_strategies(ids[0], ExperienceStrategy::LevelBased, LootStrategy::LeaderFirst)
        .await
        .unwrap();

    // 100 * 1.2 = 120; weights 1/1 and 1/2 → 80 and 40
    let hints = HashMap::from([(ids[0], 1), (ids[1], 2)]);
    let allocation = registry
        .distribute_party_experience(party.id, 100, ids[0], Some(hints))
        .await
        .unwrap();
    assert_eq!(allocation[&ids[0]], 80);
    assert_eq!(allocation[&ids[1]], 40);
}

#[tokio::test]
async fn test_distribution_requires_member_contributor() {
    let (registry, _, _) = registry();
    let (party, _) = party_with(&registry, 2).await;
    assert!(matches!(
        registry
            .distribute_party_experience(party.id, 100, MemberId::new(), None)
            .await,
        Err(GroupError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_round_robin_loot_cycles_through_members() {
    let (registry, _, events) = registry();
    let assigned = counter(&events, "loot_assigned").await;
    let (party, ids) = party_with(&registry, 3).await;

    let mut receivers = Vec::new();
    for _ in 0..4 {
        receivers.push(registry.assign_party_loot(party.id).await.unwrap());
    }

    assert_eq!(receivers, vec![ids[0], ids[1], ids[2], ids[0]]);
    assert_eq!(assigned.load(Ordering::SeqCst), 4);
}

#[tokio::test]
async fn test_party_size_limit_and_leader_only_strategies() {
    let (registry, _, _) = registry();
    let (_, ids) = party_with(&registry, 5).await;

    assert!(matches!(
        registry.invite_to_party(ids[0], MemberId::new()).await,
        Err(GroupError::InvariantViolation(_))
    ));
    assert!(matches!(
        registry
            .set_party_strategies(ids[1], ExperienceStrategy::Equal, LootStrategy::FreeForAll)
            .await,
        Err(GroupError::Unauthorized(_))
    ));
}

// ============================================================================
// Progression and storage
// ============================================================================

#[tokio::test]
async fn test_guild_experience_levels_and_rewards() {
    let (registry, _, events) = registry();
    let level_ups = counter(&events, "guild_level_up").await;
    let (guild, _, _) = guild_with(&registry, "Ember", 0).await;

    let outcome = registry.add_guild_experience(guild.id, 3_500, "raid").await.unwrap();

    assert_eq!(outcome.new_level, 3);
    assert_eq!(outcome.experience, 500);
    assert_eq!(registry.guild(&guild.id).await.unwrap().max_members, 15);
    assert_eq!(level_ups.load(Ordering::SeqCst), 2);
    assert!(matches!(
        registry.add_guild_experience(guild.id, 0, "raid").await,
        Err(GroupError::InvalidAmount(_))
    ));
}

#[tokio::test]
async fn test_storage_capacity_limits_distinct_types() {
    let mut rules = RulesConfig::default();
    rules.storage.initial_slots = 10;
    let (registry, _, _) = registry_with(rules);
    let (guild, leader, _) = guild_with(&registry, "Hoard", 0).await;

    for i in 0..10 {
        registry.deposit_item(leader, &format!("ore_{}", i), 1).await.unwrap();
    }
    assert!(matches!(
        registry.deposit_item(leader, "gem", 1).await,
        Err(GroupError::InvariantViolation(_))
    ));
    assert_eq!(registry.deposit_item(leader, "ore_3", 4).await.unwrap(), 5);

    let storage = registry.guild_storage(&guild.id).await.unwrap();
    assert_eq!(storage.used_slots(), 10);
    assert_eq!(storage.quantity("ore_3"), 5);
}

#[tokio::test]
async fn test_withdrawals_need_officer_rank() {
    let (registry, _, _) = registry();
    let (guild, leader, members) = guild_with(&registry, "Coffer", 1).await;
    let member = members[0];

    registry.deposit_money(member, 500.0).await.unwrap();
    registry.deposit_item(member, "herb", 3).await.unwrap();
    assert!(matches!(
        registry.withdraw_money(member, 100.0).await,
        Err(GroupError::Unauthorized(_))
    ));
    assert!(matches!(
        registry.withdraw_item(member, "herb", 1).await,
        Err(GroupError::Unauthorized(_))
    ));

    registry.promote(leader, member).await.unwrap();
    assert_eq!(registry.withdraw_money(member, 100.0).await.unwrap(), 400.0);
    assert!(matches!(
        registry.withdraw_money(member, 1_000.0).await,
        Err(GroupError::InsufficientFunds { .. })
    ));
    assert_eq!(registry.guild_storage(&guild.id).await.unwrap().money(), 400.0);
}

#[tokio::test]
async fn test_storage_upgrade_purchase() {
    let (registry, _, events) = registry();
    let upgrades = counter(&events, "storage_upgraded").await;
    let (_, leader, members) = guild_with(&registry, "Vault", 1).await;
    registry.deposit_money(leader, 10_000.0).await.unwrap();

    assert!(matches!(
        registry.purchase_storage_upgrade(members[0]).await,
        Err(GroupError::Unauthorized(_))
    ));
    let receipt = registry.purchase_storage_upgrade(leader).await.unwrap();

    assert_eq!(receipt.max_slots, 36);
    assert_eq!(receipt.balance, 0.0);
    assert_eq!(upgrades.load(Ordering::SeqCst), 1);
    assert!(matches!(
        registry.purchase_storage_upgrade(leader).await,
        Err(GroupError::InsufficientFunds { .. })
    ));
}

#[tokio::test]
async fn test_failed_capacity_step_refunds_upgrade() {
    let mut rules = RulesConfig::default();
    rules.storage.max_slots_limit = rules.storage.initial_slots;
    let (registry, store, _) = registry_with(rules);
    let (guild, leader, _) = guild_with(&registry, "Refund", 0).await;
    registry.deposit_money(leader, 10_000.0).await.unwrap();

    assert!(matches!(
        registry.purchase_storage_upgrade(leader).await,
        Err(GroupError::InvariantViolation(_))
    ));

    let storage = registry.guild_storage(&guild.id).await.unwrap();
    assert_eq!(storage.money(), 10_000.0);
    assert_eq!(storage.max_slots, 27);
    assert_eq!(store.stored_storage(&guild.id).unwrap().money(), 10_000.0);
}

#[tokio::test]
async fn test_interest_accrues_on_positive_balances_only() {
    let (registry, _, events) = registry();
    let accrued = counter(&events, "interest_accrued").await;
    let (rich, leader, _) = guild_with(&registry, "Rich", 0).await;
    let (poor, _, _) = guild_with(&registry, "Poor", 0).await;
    registry.deposit_money(leader, 1_000.0).await.unwrap();

    let report = registry.accrue_interest().await;

    assert_eq!(report.guilds_credited, 1);
    assert_eq!(report.failures, 0);
    let balance = registry.guild_storage(&rich.id).await.unwrap().money();
    assert!((balance - 1_010.0).abs() < 1e-9);
    assert_eq!(registry.guild_storage(&poor.id).await.unwrap().money(), 0.0);
    assert_eq!(accrued.load(Ordering::SeqCst), 1);
}

// ============================================================================
// Persistence failures
// ============================================================================

#[tokio::test]
async fn test_failed_write_leaves_state_untouched() {
    let (registry, store, events) = registry();
    let joined = counter(&events, "member_joined").await;
    let (guild, leader, _) = guild_with(&registry, "Brittle", 0).await;
    registry.deposit_money(leader, 50.0).await.unwrap();
    let recruit = MemberId::new();
    registry.invite_to_guild(leader, recruit).await.unwrap();

    store.set_failing(true);
    assert!(matches!(
        registry.deposit_money(leader, 25.0).await,
        Err(GroupError::Persistence(_))
    ));
    assert!(matches!(
        registry.accept_guild_invite(recruit, guild.id).await,
        Err(GroupError::Persistence(_))
    ));

    assert_eq!(registry.guild_storage(&guild.id).await.unwrap().money(), 50.0);
    assert!(!registry.guild(&guild.id).await.unwrap().roster.contains(&recruit));
    assert_eq!(registry.member_guild(&recruit), None);
    assert_eq!(joined.load(Ordering::SeqCst), 0);

    store.set_failing(false);
    registry.accept_guild_invite(recruit, guild.id).await.unwrap();
    assert_eq!(registry.member_guild(&recruit), Some(guild.id));
}

#[tokio::test]
async fn test_failed_create_releases_reservations() {
    let (registry, store, _) = registry();
    let leader = MemberId::new();

    store.set_failing(true);
    assert!(registry.create_guild(leader, "Phoenix", "PHX").await.is_err());
    assert_eq!(registry.member_guild(&leader), None);
    assert_eq!(registry.guild_by_name("Phoenix"), None);

    store.set_failing(false);
    registry.create_guild(leader, "Phoenix", "PHX").await.unwrap();
}

// ============================================================================
// Friends and reload
// ============================================================================

#[tokio::test]
async fn test_friend_lifecycle() {
    let (registry, _, events) = registry();
    let added = counter(&events, "friend_added").await;
    let (a, b, c) = (MemberId::new(), MemberId::new(), MemberId::new());

    assert_eq!(
        registry.send_friend_request(a, b).await.unwrap(),
        FriendRequestOutcome::Requested
    );
    assert_eq!(registry.pending_friend_requests(b).await.unwrap(), vec![a]);
    registry.accept_friend_request(b, a).await.unwrap();
    assert_eq!(registry.friends_of(a).await.unwrap(), vec![b]);

    registry.send_friend_request(c, a).await.unwrap();
    assert_eq!(
        registry.send_friend_request(a, c).await.unwrap(),
        FriendRequestOutcome::BecameFriends
    );
    assert_eq!(added.load(Ordering::SeqCst), 2);

    registry.remove_friend(b, a).await.unwrap();
    assert_eq!(registry.friends_of(a).await.unwrap(), vec![c]);
    assert!(matches!(
        registry.decline_friend_request(a, b).await,
        Err(GroupError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_friend_request_to_full_member_is_refused() {
    let mut rules = RulesConfig::default();
    rules.friends.max_friends = 1;
    let (registry, _, _) = registry_with(rules);
    let (a, b, c) = (MemberId::new(), MemberId::new(), MemberId::new());

    registry.send_friend_request(b, c).await.unwrap();
    registry.accept_friend_request(c, b).await.unwrap();

    assert!(matches!(
        registry.send_friend_request(a, b).await,
        Err(GroupError::InvariantViolation(_))
    ));
    assert!(registry.pending_friend_requests(b).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_friend_lookups_do_not_retain_unknown_members() {
    let (registry, store, _) = registry();
    for _ in 0..100 {
        assert!(registry.friends_of(MemberId::new()).await.unwrap().is_empty());
        assert!(registry.pending_friend_requests(MemberId::new()).await.unwrap().is_empty());
    }
    assert_eq!(registry.stats().await.friend_lists, 0);

    // Rejected operations leave nothing behind either
    let (a, b) = (MemberId::new(), MemberId::new());
    assert!(registry.decline_friend_request(a, b).await.is_err());
    assert_eq!(registry.stats().await.friend_lists, 0);

    registry.send_friend_request(a, b).await.unwrap();
    assert_eq!(registry.stats().await.friend_lists, 1);
    assert!(store.load_friends(&b).await.unwrap().is_some());
}

#[tokio::test]
async fn test_state_survives_restart_with_file_store() {
    let dir = tempfile::tempdir().unwrap();
    let (a, b) = (MemberId::new(), MemberId::new());

    let guild_id = {
        let store = Arc::new(JsonFileStore::open(dir.path()).await.unwrap());
        let registry = GroupRegistry::new(RulesConfig::default(), store, Arc::new(EventBus::new()));
        let guild = registry.create_guild(a, "Lasting", "LST").await.unwrap();
        registry.invite_to_guild(a, b).await.unwrap();
        registry.accept_guild_invite(b, guild.id).await.unwrap();
        registry.deposit_item(b, "scroll", 2).await.unwrap();
        registry.send_friend_request(a, b).await.unwrap();
        registry.accept_friend_request(b, a).await.unwrap();
        registry.shutdown().await;
        guild.id
    };

    let store = Arc::new(JsonFileStore::open(dir.path()).await.unwrap());
    let registry = GroupRegistry::new(RulesConfig::default(), store, Arc::new(EventBus::new()));
    assert_eq!(registry.load().await.unwrap(), 1);

    assert_eq!(registry.member_guild(&b), Some(guild_id));
    assert_eq!(registry.guild(&guild_id).await.unwrap().leader(), a);
    assert_eq!(registry.guild_storage(&guild_id).await.unwrap().quantity("scroll"), 2);
    assert_eq!(registry.friends_of(b).await.unwrap(), vec![a]);
}
