use std::{
    sync::{Arc, Mutex, PoisonError},
    time::{Duration, Instant},
};

use async_trait::async_trait;
use chrono::Utc;
use gatecheck::{
    AdmissionEnforcer, AdmissionState, DisconnectReason, EnforcementOptions, IdentityResolver,
    JoinNotice, mock::MockSessionHost,
};
use gatecheck_ban_system::{
    BanCache, BanDecider, BanError, BanEvaluator, BanQuery, BanRecord, BanSource, BanStatus,
    BanStorage, BanVerdict, EvaluationOptions, FailurePolicy, MemoryBanStorage, NewBan,
};
use gatecheck_event::{ClientAdmitted, ClientBlocked, EventBus};

const BANNED: &str = "76561198000000001";
const CLEAN: &str = "76561198000000002";
const ADDRESS: &str = "203.0.113.7";

fn evaluator(storage: &Arc<MemoryBanStorage>) -> BanEvaluator {
    BanEvaluator::new(
        BanStorage::from_backend(storage.clone()),
        EvaluationOptions::default(),
    )
}

fn decider_for(storage: &Arc<MemoryBanStorage>) -> Arc<BanDecider> {
    Arc::new(BanDecider::new(FailurePolicy::FailOpen).with_authority(Arc::new(evaluator(storage))))
}

fn enforcer_with(
    host: &MockSessionHost,
    decider: Arc<BanDecider>,
    bus: Arc<EventBus>,
) -> AdmissionEnforcer<MockSessionHost> {
    AdmissionEnforcer::new(
        host.clone(),
        decider,
        IdentityResolver::new(5, Duration::from_millis(100)),
        EnforcementOptions::default(),
    )
    .with_event_bus(bus)
}

/// Drives the enforcer until nothing is left to do.
async fn settle(enforcer: &mut AdmissionEnforcer<MockSessionHost>) -> usize {
    let mut processed = 0;
    while let Ok(count) = tokio::time::timeout(Duration::from_secs(10), enforcer.step()).await {
        processed += count;
    }
    processed
}

fn record<E: Clone + Send + Sync + 'static>(bus: &EventBus) -> Arc<Mutex<Vec<E>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    bus.on::<E, _>(move |event| {
        sink.lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event.clone());
    });
    seen
}

fn elapsed_ban(identity: &str) -> BanRecord {
    let now = Utc::now();
    BanRecord {
        id: 0,
        identity: Some(identity.to_string()),
        address: None,
        status: BanStatus::Active,
        created_at: now - chrono::Duration::hours(2),
        duration_seconds: 3600,
        ends_at: Some(now - chrono::Duration::hours(1)),
        reason: Some("spam".to_string()),
        scope: None,
    }
}

#[derive(Debug)]
struct UnreachableStore;

#[async_trait]
impl BanSource for UnreachableStore {
    fn name(&self) -> &'static str {
        "unreachable"
    }

    async fn check(&self, _query: &BanQuery) -> Result<BanVerdict, BanError> {
        Err(BanError::Storage("connection refused".to_string()))
    }
}

#[tokio::test(start_paused = true)]
async fn test_permanently_banned_client_is_disconnected() {
    let storage = Arc::new(MemoryBanStorage::new());
    let ban = storage
        .add_ban(NewBan::identity(BANNED).with_reason("cheating"))
        .await
        .unwrap();

    let bus = Arc::new(EventBus::new());
    let blocked = record::<ClientBlocked>(&bus);
    let host = MockSessionHost::new();
    let mut enforcer = enforcer_with(&host, decider_for(&storage), bus);

    host.join(3, BANNED, Some(ADDRESS));
    enforcer.on_client_connect(3, "203.0.113.7:27005");
    settle(&mut enforcer).await;

    assert_eq!(host.disconnects(), vec![(3, DisconnectReason::Banned)]);
    // On resolution, on the block path, then on the follow-up.
    assert_eq!(host.cleared(), vec![BANNED.to_string(); 3]);
    assert!(host.notices().is_empty());
    assert_eq!(
        enforcer.state(3),
        Some(&AdmissionState::Blocked {
            identity: BANNED.to_string()
        })
    );

    let blocked = blocked.lock().unwrap();
    assert_eq!(blocked.len(), 1);
    assert_eq!(blocked[0].ban_id, Some(ban.id));
    assert_eq!(blocked[0].reason.as_deref(), Some("cheating"));
    assert_eq!(blocked[0].address.as_deref(), Some(ADDRESS));
}

#[tokio::test(start_paused = true)]
async fn test_elapsed_ban_is_expired_and_client_admitted() {
    let storage = Arc::new(MemoryBanStorage::new());
    let ban = storage.insert(elapsed_ban(BANNED)).await.unwrap();

    let bus = Arc::new(EventBus::new());
    let admitted = record::<ClientAdmitted>(&bus);
    let host = MockSessionHost::new();
    let mut enforcer = enforcer_with(&host, decider_for(&storage), bus);

    host.join(1, BANNED, Some(ADDRESS));
    enforcer.on_client_connect(1, ADDRESS);
    settle(&mut enforcer).await;

    assert!(host.disconnects().is_empty());
    assert_eq!(host.notices(), vec![(1, JoinNotice::ExpiryProcessed)]);
    assert_eq!(storage.get(ban.id).await.unwrap().status, BanStatus::Expired);

    let admitted = admitted.lock().unwrap();
    assert_eq!(admitted.len(), 1);
    assert!(admitted[0].expired_ban_processed);
    assert!(!admitted[0].bypassed_by_unban);
}

#[tokio::test(start_paused = true)]
async fn test_later_unban_bypasses_address_ban() {
    let storage = Arc::new(MemoryBanStorage::new());
    storage.add_ban(NewBan::address(ADDRESS)).await.unwrap();
    let own = storage.add_ban(NewBan::identity(CLEAN)).await.unwrap();
    storage.unban(own.id).await.unwrap();

    let bus = Arc::new(EventBus::new());
    let admitted = record::<ClientAdmitted>(&bus);
    let host = MockSessionHost::new();
    let mut enforcer = enforcer_with(&host, decider_for(&storage), bus);

    host.join(2, CLEAN, Some(ADDRESS));
    enforcer.on_client_connect(2, "203.0.113.7:27005");
    settle(&mut enforcer).await;

    assert!(host.disconnects().is_empty());
    assert_eq!(host.notices(), vec![(2, JoinNotice::CheckEnabled)]);
    let admitted = admitted.lock().unwrap();
    assert!(admitted[0].bypassed_by_unban);
}

#[tokio::test(start_paused = true)]
async fn test_shared_address_ban_blocks_other_identity() {
    let storage = Arc::new(MemoryBanStorage::new());
    storage.add_ban(NewBan::address(ADDRESS)).await.unwrap();

    let host = MockSessionHost::new();
    let mut enforcer = enforcer_with(&host, decider_for(&storage), Arc::new(EventBus::new()));

    host.join(4, CLEAN, Some(ADDRESS));
    enforcer.on_client_connect(4, "203.0.113.7:27005");
    settle(&mut enforcer).await;

    assert_eq!(host.disconnects(), vec![(4, DisconnectReason::Banned)]);
}

#[tokio::test(start_paused = true)]
async fn test_address_tier_skipped_when_disabled() {
    let storage = Arc::new(MemoryBanStorage::new());
    storage.add_ban(NewBan::address(ADDRESS)).await.unwrap();

    let host = MockSessionHost::new();
    let mut enforcer = AdmissionEnforcer::new(
        host.clone(),
        decider_for(&storage),
        IdentityResolver::new(5, Duration::from_millis(100)),
        EnforcementOptions {
            check_ip_bans: false,
            send_join_message: false,
            ..Default::default()
        },
    )
    .with_event_bus(Arc::new(EventBus::new()));

    host.join(4, CLEAN, Some(ADDRESS));
    enforcer.on_client_connect(4, ADDRESS);
    settle(&mut enforcer).await;

    assert!(host.disconnects().is_empty());
    assert!(host.notices().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_verdict_for_reused_slot_is_discarded() {
    let storage = Arc::new(MemoryBanStorage::new());
    storage.add_ban(NewBan::identity(BANNED)).await.unwrap();

    let host = MockSessionHost::new();
    let mut enforcer = enforcer_with(&host, decider_for(&storage), Arc::new(EventBus::new()));

    host.join(5, BANNED, Some(ADDRESS));
    enforcer.on_client_connect(5, ADDRESS);
    assert_eq!(enforcer.process_pending(), 1);

    // The banned client leaves before its verdict lands and someone else takes the slot.
    host.leave(5);
    enforcer.on_client_disconnect(5);
    host.join(5, CLEAN, Some("198.51.100.1"));
    enforcer.on_client_connect(5, "198.51.100.1:27005");
    settle(&mut enforcer).await;

    assert!(host.disconnects().is_empty());
    // Only the connect-time cleanup ran; the stale verdict never reached the block path.
    assert_eq!(host.cleared(), vec![BANNED.to_string(), CLEAN.to_string()]);
    assert_eq!(
        enforcer.state(5),
        Some(&AdmissionState::Admitted {
            identity: CLEAN.to_string()
        })
    );
}

#[tokio::test(start_paused = true)]
async fn test_identity_change_without_release_is_discarded() {
    let storage = Arc::new(MemoryBanStorage::new());
    storage.add_ban(NewBan::identity(BANNED)).await.unwrap();

    let host = MockSessionHost::new();
    let mut enforcer = enforcer_with(&host, decider_for(&storage), Arc::new(EventBus::new()));

    host.join(6, BANNED, Some(ADDRESS));
    enforcer.on_client_connect(6, ADDRESS);
    enforcer.process_pending();

    host.join(6, CLEAN, Some(ADDRESS));
    settle(&mut enforcer).await;

    assert!(host.disconnects().is_empty());
    assert_eq!(enforcer.state(6), Some(&AdmissionState::Discarded));
}

#[tokio::test(start_paused = true)]
async fn test_unresolved_identity_gives_up_after_bounded_retries() {
    let storage = Arc::new(MemoryBanStorage::new());
    let host = MockSessionHost::new();
    let mut enforcer = enforcer_with(&host, decider_for(&storage), Arc::new(EventBus::new()));

    let started = tokio::time::Instant::now();
    enforcer.on_client_connect(7, ADDRESS);

    let mut processed = 0;
    while !matches!(enforcer.state(7), Some(AdmissionState::Unresolved)) {
        processed += enforcer.step().await;
    }

    // The first poll plus exactly five retries.
    assert_eq!(processed, 6);
    assert!(started.elapsed() >= Duration::from_millis(500));
    assert!(started.elapsed() < Duration::from_millis(600));
    assert_eq!(enforcer.pending(), 0);
    assert!(host.disconnects().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_identity_appearing_late_is_still_checked() {
    let storage = Arc::new(MemoryBanStorage::new());
    storage.add_ban(NewBan::identity(BANNED)).await.unwrap();

    let host = MockSessionHost::new();
    let mut enforcer = enforcer_with(&host, decider_for(&storage), Arc::new(EventBus::new()));

    enforcer.on_client_connect(8, ADDRESS);
    enforcer.step().await;
    enforcer.step().await;
    assert_eq!(
        enforcer.state(8),
        Some(&AdmissionState::Resolving { attempt: 2 })
    );

    host.join(8, BANNED, Some(ADDRESS));
    settle(&mut enforcer).await;

    assert_eq!(host.disconnects(), vec![(8, DisconnectReason::Banned)]);
}

#[tokio::test(start_paused = true)]
async fn test_connected_hook_only_starts_one_admission() {
    let storage = Arc::new(MemoryBanStorage::new());
    let host = MockSessionHost::new();
    let mut enforcer = enforcer_with(&host, decider_for(&storage), Arc::new(EventBus::new()));

    host.join(9, CLEAN, Some("198.51.100.1:27005"));
    assert!(enforcer.on_client_connected(9).is_some());
    assert!(enforcer.on_client_connected(9).is_none());
    settle(&mut enforcer).await;

    assert_eq!(host.notices(), vec![(9, JoinNotice::CheckEnabled)]);
    assert!(enforcer.on_client_connected(9).is_none());
}

#[tokio::test(start_paused = true)]
async fn test_failed_disconnect_is_retried_once() {
    let storage = Arc::new(MemoryBanStorage::new());
    storage.add_ban(NewBan::identity(BANNED)).await.unwrap();

    let host = MockSessionHost::new();
    host.fail_disconnects(1);
    let mut enforcer = enforcer_with(&host, decider_for(&storage), Arc::new(EventBus::new()));

    host.join(10, BANNED, Some(ADDRESS));
    enforcer.on_client_connect(10, ADDRESS);
    settle(&mut enforcer).await;

    assert_eq!(host.disconnects(), vec![(10, DisconnectReason::Banned)]);
}

#[tokio::test(start_paused = true)]
async fn test_unreachable_store_fails_open() {
    let host = MockSessionHost::new();
    let decider = Arc::new(
        BanDecider::new(FailurePolicy::FailOpen).with_authority(Arc::new(UnreachableStore)),
    );
    let mut enforcer = enforcer_with(&host, decider, Arc::new(EventBus::new()));

    host.join(11, BANNED, Some(ADDRESS));
    enforcer.on_client_connect(11, ADDRESS);
    settle(&mut enforcer).await;

    assert!(host.disconnects().is_empty());
    assert_eq!(host.notices(), vec![(11, JoinNotice::CheckEnabled)]);
}

#[tokio::test(start_paused = true)]
async fn test_unreachable_store_fails_closed() {
    let host = MockSessionHost::new();
    let decider = Arc::new(
        BanDecider::new(FailurePolicy::FailClosed).with_authority(Arc::new(UnreachableStore)),
    );
    let mut enforcer = enforcer_with(&host, decider, Arc::new(EventBus::new()));

    host.join(12, CLEAN, Some(ADDRESS));
    enforcer.on_client_connect(12, ADDRESS);
    settle(&mut enforcer).await;

    assert_eq!(host.disconnects(), vec![(12, DisconnectReason::Banned)]);
}

#[tokio::test(start_paused = true)]
async fn test_cache_answers_when_store_is_unreachable() {
    let storage = Arc::new(MemoryBanStorage::new());
    storage.add_ban(NewBan::identity(BANNED)).await.unwrap();

    let cache = BanCache::new(BanStorage::from_backend(storage.clone()), None);
    assert_eq!(cache.refresh().await.unwrap(), 1);

    let decider = Arc::new(
        BanDecider::new(FailurePolicy::FailOpen)
            .with_authority(Arc::new(UnreachableStore))
            .with_cache(Arc::new(cache)),
    );
    let host = MockSessionHost::new();
    let mut enforcer = enforcer_with(&host, decider, Arc::new(EventBus::new()));

    host.join(13, BANNED, None);
    enforcer.on_client_connect(13, "");
    settle(&mut enforcer).await;

    assert_eq!(host.disconnects(), vec![(13, DisconnectReason::Banned)]);
}

#[tokio::test(start_paused = true)]
async fn test_no_store_admits_everyone() {
    let host = MockSessionHost::new();
    let mut enforcer = enforcer_with(
        &host,
        Arc::new(BanDecider::new(FailurePolicy::FailClosed)),
        Arc::new(EventBus::new()),
    );

    host.join(14, BANNED, Some(ADDRESS));
    enforcer.on_client_connect(14, ADDRESS);
    settle(&mut enforcer).await;

    assert!(host.disconnects().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_admissions_are_independent() {
    let storage = Arc::new(MemoryBanStorage::new());
    storage.add_ban(NewBan::identity(BANNED)).await.unwrap();

    let host = MockSessionHost::new();
    let mut enforcer = enforcer_with(&host, decider_for(&storage), Arc::new(EventBus::new()));

    host.join(1, BANNED, Some(ADDRESS));
    host.join(2, CLEAN, Some("198.51.100.1"));
    enforcer.on_client_connect(1, ADDRESS);
    enforcer.on_client_connect(2, "198.51.100.1");
    settle(&mut enforcer).await;

    assert_eq!(host.disconnects(), vec![(1, DisconnectReason::Banned)]);
    assert_eq!(
        enforcer.state(2),
        Some(&AdmissionState::Admitted {
            identity: CLEAN.to_string()
        })
    );
}

#[tokio::test(start_paused = true)]
async fn test_admitted_client_has_host_ban_list_cleared() {
    let storage = Arc::new(MemoryBanStorage::new());
    let host = MockSessionHost::new();
    let mut enforcer = enforcer_with(&host, decider_for(&storage), Arc::new(EventBus::new()));

    host.join(15, CLEAN, Some(ADDRESS));
    enforcer.on_client_connect(15, ADDRESS);

    // Cleared on the main path before the store is consulted.
    assert_eq!(enforcer.process_pending(), 1);
    assert_eq!(host.cleared(), vec![CLEAN.to_string()]);

    settle(&mut enforcer).await;
    assert!(host.disconnects().is_empty());
    assert_eq!(host.cleared(), vec![CLEAN.to_string()]);
    assert_eq!(
        enforcer.state(15),
        Some(&AdmissionState::Admitted {
            identity: CLEAN.to_string()
        })
    );
}

#[test]
fn test_host_thread_outside_runtime_drives_admissions() {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(1)
        .enable_all()
        .build()
        .unwrap();

    let storage = Arc::new(MemoryBanStorage::new());
    runtime
        .block_on(storage.add_ban(NewBan::identity(BANNED)))
        .unwrap();

    let host = MockSessionHost::new();
    host.join(16, BANNED, Some(ADDRESS));

    let mut enforcer = AdmissionEnforcer::new(
        host.clone(),
        decider_for(&storage),
        IdentityResolver::new(5, Duration::from_millis(100)),
        EnforcementOptions::default(),
    )
    .with_event_bus(Arc::new(EventBus::new()))
    .with_runtime(runtime.handle().clone());

    let driver = std::thread::spawn(move || {
        enforcer.on_client_connect(16, ADDRESS);
        let deadline = Instant::now() + Duration::from_secs(5);
        while !matches!(enforcer.state(16), Some(AdmissionState::Blocked { .. }))
            && Instant::now() < deadline
        {
            enforcer.process_pending();
            std::thread::sleep(Duration::from_millis(5));
        }
        enforcer
    });
    let enforcer = driver.join().unwrap();

    assert_eq!(
        enforcer.state(16),
        Some(&AdmissionState::Blocked {
            identity: BANNED.to_string()
        })
    );
    assert_eq!(host.disconnects(), vec![(16, DisconnectReason::Banned)]);
}

#[test]
fn test_without_any_runtime_client_is_left_unchecked() {
    let host = MockSessionHost::new();
    let mut enforcer = AdmissionEnforcer::new(
        host.clone(),
        Arc::new(BanDecider::new(FailurePolicy::FailClosed)),
        IdentityResolver::new(5, Duration::from_millis(100)),
        EnforcementOptions::default(),
    )
    .with_event_bus(Arc::new(EventBus::new()));

    host.join(17, BANNED, Some(ADDRESS));
    enforcer.on_client_connect(17, ADDRESS);
    assert_eq!(enforcer.process_pending(), 1);

    assert_eq!(enforcer.state(17), Some(&AdmissionState::Unresolved));
    assert!(host.disconnects().is_empty());
}
