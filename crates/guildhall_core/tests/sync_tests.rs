//! Integration tests for the sync gateway and its wire framing

use guildhall_core::sync::{read_frame, write_frame, LevelHint};
use guildhall_core::*;
use serde_json::{json, Value};
use std::sync::Arc;

fn gateway_over(store: Arc<MemoryStore>) -> Arc<SyncGateway> {
    let registry = Arc::new(GroupRegistry::new(
        RulesConfig::default(),
        store,
        Arc::new(EventBus::new()),
    ));
    Arc::new(SyncGateway::new(registry, 16))
}

fn gateway() -> Arc<SyncGateway> {
    gateway_over(Arc::new(MemoryStore::new()))
}

fn value_of(reply: &SyncReply) -> &Value {
    match &reply.outcome {
        SyncOutcome::Ok { value } => value,
        SyncOutcome::Err { kind, message } => panic!("unexpected {}: {}", kind, message),
    }
}

#[tokio::test]
async fn test_envelopes_drive_the_registry() {
    let gateway = gateway();
    let (leader, recruit) = (MemberId::new(), MemberId::new());

    let created = gateway
        .handle(SyncEnvelope::new(
            "proxy-1",
            SyncCommand::CreateGuild {
                leader,
                name: "Gatekeepers".into(),
                tag: "GATE".into(),
            },
        ))
        .await;
    let guild: Guild = serde_json::from_value(value_of(&created).clone()).unwrap();

    let invited = gateway
        .handle(SyncEnvelope::new(
            "proxy-1",
            SyncCommand::InviteToGuild { actor: leader, target: recruit },
        ))
        .await;
    assert_eq!(value_of(&invited), &Value::Null);

    gateway
        .handle(SyncEnvelope::new(
            "game-7",
            SyncCommand::AcceptGuildInvite { member: recruit, guild: guild.id },
        ))
        .await;

    let groups = gateway
        .handle(SyncEnvelope::new("game-7", SyncCommand::MemberGroups { member: recruit }))
        .await;
    assert_eq!(
        value_of(&groups),
        &json!({ "guild": guild.id.0.to_string(), "party": null })
    );
}

#[tokio::test]
async fn test_errors_carry_their_kind() {
    let gateway = gateway();
    let reply = gateway
        .handle(SyncEnvelope::new(
            "proxy-1",
            SyncCommand::LeaveGuild { member: MemberId::new() },
        ))
        .await;
    assert_eq!(reply.error_kind(), Some("not_found"));

    let leader = MemberId::new();
    gateway
        .handle(SyncEnvelope::new("proxy-1", SyncCommand::CreateParty { leader }))
        .await;
    let reply = gateway
        .handle(SyncEnvelope::new(
            "proxy-1",
            SyncCommand::TransferPartyLeadership { current: leader, new_leader: leader },
        ))
        .await;
    assert_eq!(reply.error_kind(), Some("invariant_violation"));
}

#[tokio::test]
async fn test_unsupported_version_is_not_executed() {
    let gateway = gateway();
    let leader = MemberId::new();
    let mut envelope = SyncEnvelope::new("proxy-1", SyncCommand::CreateParty { leader });
    envelope.version = PROTOCOL_VERSION + 1;

    let reply = gateway.handle(envelope).await;

    assert_eq!(reply.error_kind(), Some("unsupported_version"));
    assert_eq!(gateway.registry().member_party(&leader), None);
    assert_eq!(gateway.get_stats().rejected, 1);
}

#[tokio::test]
async fn test_duplicate_message_is_answered_from_cache() {
    let gateway = gateway();
    let leader = MemberId::new();
    let envelope = SyncEnvelope::new("proxy-1", SyncCommand::CreateParty { leader });

    let first = gateway.handle(envelope.clone()).await;
    let second = gateway.handle(envelope).await;

    // Executing twice would have failed: the leader is already in a party
    assert!(first.is_ok());
    assert_eq!(first, second);
    assert_eq!(gateway.registry().stats().await.parties, 1);
    let stats = gateway.get_stats();
    assert_eq!(stats.executed, 1);
    assert_eq!(stats.duplicates, 1);
}

#[tokio::test]
async fn test_resend_after_store_recovers_executes_again() {
    let store = Arc::new(MemoryStore::new());
    let gateway = gateway_over(store.clone());
    let leader = MemberId::new();
    let envelope = SyncEnvelope::new(
        "proxy-1",
        SyncCommand::CreateGuild {
            leader,
            name: "Stubborn".into(),
            tag: "STB".into(),
        },
    );

    store.set_failing(true);
    let first = gateway.handle(envelope.clone()).await;
    assert_eq!(first.error_kind(), Some("persistence"));

    store.set_failing(false);
    let second = gateway.handle(envelope).await;
    assert!(second.is_ok());
    assert!(gateway.registry().member_guild(&leader).is_some());
    let stats = gateway.get_stats();
    assert_eq!(stats.executed, 2);
    assert_eq!(stats.duplicates, 0);
}

#[tokio::test]
async fn test_queries_are_answered_fresh() {
    let gateway = gateway();
    let (a, b) = (MemberId::new(), MemberId::new());
    let query = SyncEnvelope::new("game-3", SyncCommand::FriendsOf { member: a });

    assert_eq!(value_of(&gateway.handle(query.clone()).await), &json!([]));
    gateway.registry().send_friend_request(b, a).await.unwrap();
    gateway.registry().accept_friend_request(a, b).await.unwrap();

    let reply = gateway.handle(query).await;
    assert_eq!(value_of(&reply), &json!([b.0.to_string()]));
    assert_eq!(gateway.get_stats().duplicates, 0);
}

#[tokio::test]
async fn test_guild_description_over_the_wire() {
    let gateway = gateway();
    let (leader, member) = (MemberId::new(), MemberId::new());
    let registry = gateway.registry().clone();
    let guild = registry.create_guild(leader, "Scribes", "SCR").await.unwrap();
    registry.invite_to_guild(leader, member).await.unwrap();
    registry.accept_guild_invite(member, guild.id).await.unwrap();

    let reply = gateway
        .handle(SyncEnvelope::new(
            "proxy-1",
            SyncCommand::SetGuildDescription {
                actor: leader,
                description: "We keep the records".into(),
            },
        ))
        .await;
    assert_eq!(value_of(&reply)["description"], json!("We keep the records"));

    let reply = gateway
        .handle(SyncEnvelope::new(
            "proxy-1",
            SyncCommand::SetGuildDescription {
                actor: member,
                description: "Mine now".into(),
            },
        ))
        .await;
    assert_eq!(reply.error_kind(), Some("unauthorized"));
    assert_eq!(
        registry.guild(&guild.id).await.unwrap().description,
        "We keep the records"
    );
}

#[tokio::test]
async fn test_level_hints_travel_as_a_list() {
    let gateway = gateway();
    let (leader, member) = (MemberId::new(), MemberId::new());
    let registry = gateway.registry().clone();
    let party = registry.create_party(leader).await.unwrap();
    registry.invite_to_party(leader, member).await.unwrap();
    registry.accept_party_invite(member, party.id).await.unwrap();
    registry
        .set_party_strategies(leader, ExperienceStrategy::LevelBased, LootStrategy::RoundRobin)
        .await
        .unwrap();

    let reply = gateway
        .handle(SyncEnvelope::new(
            "game-2",
            SyncCommand::DistributePartyExperience {
                party: party.id,
                total: 100,
                contributor: member,
                level_hints: Some(vec![
                    LevelHint { member: leader, level: 1 },
                    LevelHint { member, level: 2 },
                ]),
            },
        ))
        .await;

    let shares = value_of(&reply);
    assert_eq!(shares[leader.to_string()], json!(80));
    assert_eq!(shares[member.to_string()], json!(40));
}

#[tokio::test]
async fn test_serving_a_connection() {
    let gateway = gateway();
    let (mut client, mut server) = tokio::io::duplex(4096);
    let serving = {
        let gateway = gateway.clone();
        tokio::spawn(async move { gateway.serve(&mut server, "test-peer").await })
    };

    let leader = MemberId::new();
    let envelope = SyncEnvelope::new("proxy-1", SyncCommand::CreateParty { leader });
    write_frame(&mut client, &envelope).await.unwrap();
    let reply: SyncReply = read_frame(&mut client).await.unwrap().unwrap();
    assert_eq!(reply.message_id, envelope.message_id);
    assert!(reply.is_ok());

    // Garbage inside a valid frame gets a malformed reply, not a hangup
    write_frame(&mut client, &json!({ "not": "an envelope" })).await.unwrap();
    let reply: SyncReply = read_frame(&mut client).await.unwrap().unwrap();
    assert_eq!(reply.error_kind(), Some("malformed"));

    drop(client);
    assert_eq!(serving.await.unwrap().unwrap(), 2);
}
