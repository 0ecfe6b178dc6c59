use std::sync::Arc;

use gatecheck_ban_system::{
    BanCache, BanDecider, BanEvaluator, BanStatus, BanStorage, DbPool, EvaluationOptions,
    FailurePolicy, NewBan, SqlBanStorage, SqlPoolSettings, VerdictSource,
    storage::{BanConfig, BanStorageType},
};
use tempfile::TempDir;

const X: &str = "76561198000000010";
const Y: &str = "76561198000000020";
const Z: &str = "76561198000000030";
const SHARED_ADDRESS: &str = "1.2.3.4";

struct Fixture {
    store: Arc<SqlBanStorage>,
    _dir: TempDir,
}

impl Fixture {
    async fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bans.sqlite");
        let store = SqlBanStorage::connect(
            &format!("Data Source={}", path.display()),
            SqlPoolSettings::default(),
        )
        .unwrap();
        store.ensure_schema().await.unwrap();

        Self {
            store: Arc::new(store),
            _dir: dir,
        }
    }

    async fn insert(&self, values: &str) -> i64 {
        let DbPool::Sqlite(pool) = self.store.pool() else {
            panic!("expected a sqlite pool");
        };
        sqlx::query(&format!(
            "INSERT INTO sa_bans (player_steamid, player_ip, reason, duration, ends, server_id, status) VALUES {values}"
        ))
        .execute(pool)
        .await
        .unwrap()
        .last_insert_rowid()
    }

    fn evaluator(&self) -> BanEvaluator {
        BanEvaluator::new(
            BanStorage::from_backend(self.store.clone()),
            EvaluationOptions::default(),
        )
    }
}

#[tokio::test]
async fn test_permanent_identity_ban_blocks() {
    let fixture = Fixture::new().await;
    let id = fixture
        .insert(&format!("('{X}', NULL, 'cheating', 0, NULL, NULL, 'ACTIVE')"))
        .await;

    let verdict = fixture.evaluator().evaluate(X, Some("9.9.9.9")).await.unwrap();

    assert!(verdict.blocked);
    assert!(verdict.identity_banned);
    assert!(!verdict.address_banned);
    let active = verdict.active_ban.unwrap();
    assert_eq!(active.id, id);
    assert_eq!(active.reason.as_deref(), Some("cheating"));
}

#[tokio::test]
async fn test_elapsed_ban_expires_and_admits() {
    let fixture = Fixture::new().await;
    let id = fixture
        .insert(&format!(
            "('{Y}', NULL, 'spam', 3600, datetime('now', '-1 hour'), NULL, 'ACTIVE')"
        ))
        .await;
    let evaluator = fixture.evaluator();

    let first = evaluator.evaluate(Y, None).await.unwrap();
    assert!(!first.blocked);
    assert!(!first.identity_banned);
    assert!(first.expired_updated);
    assert_eq!(fixture.store.status_of(id).await.unwrap(), BanStatus::Expired);

    let second = evaluator.evaluate(Y, None).await.unwrap();
    assert!(!second.expired_updated);
    assert_eq!(second.blocked, first.blocked);
}

#[tokio::test]
async fn test_running_temporary_ban_blocks() {
    let fixture = Fixture::new().await;
    fixture
        .store
        .add_ban(&NewBan::identity(Y).with_duration(std::time::Duration::from_secs(3600)))
        .await
        .unwrap();

    let verdict = fixture.evaluator().evaluate(Y, None).await.unwrap();
    assert!(verdict.blocked);
    assert!(!verdict.expired_updated);
}

#[tokio::test]
async fn test_later_unban_bypasses_shared_address_ban() {
    let fixture = Fixture::new().await;
    let address_ban = fixture
        .insert(&format!(
            "(NULL, '{SHARED_ADDRESS}', 'ban evasion', 0, NULL, NULL, 'ACTIVE')"
        ))
        .await;
    let unban = fixture
        .insert(&format!("('{Z}', NULL, 'mistake', 0, NULL, NULL, 'UNBANNED')"))
        .await;
    assert!(unban > address_ban);

    let verdict = fixture
        .evaluator()
        .evaluate(Z, Some(SHARED_ADDRESS))
        .await
        .unwrap();

    assert!(!verdict.blocked);
    assert!(verdict.address_banned);
    assert!(verdict.bypassed_by_unban);
    assert_eq!(verdict.latest_unban_id, Some(unban));
}

#[tokio::test]
async fn test_shared_address_ban_blocks_without_unban() {
    let fixture = Fixture::new().await;
    fixture
        .insert(&format!(
            "(NULL, '{SHARED_ADDRESS}', 'ban evasion', 0, NULL, NULL, 'ACTIVE')"
        ))
        .await;

    let verdict = fixture
        .evaluator()
        .evaluate(Z, Some(SHARED_ADDRESS))
        .await
        .unwrap();

    assert!(verdict.blocked);
    assert!(!verdict.bypassed_by_unban);
}

#[tokio::test]
async fn test_storage_from_config() {
    let dir = TempDir::new().unwrap();
    let config = BanConfig {
        storage_type: BanStorageType::Sql,
        connection_string: Some(format!(
            "Data Source={}",
            dir.path().join("config.sqlite").display()
        )),
        ensure_schema: true,
        ..Default::default()
    };
    let storage = BanStorage::new(&config).await.unwrap();

    let verdict = BanEvaluator::new(storage, EvaluationOptions::default())
        .evaluate(X, Some(SHARED_ADDRESS))
        .await
        .unwrap();
    assert!(!verdict.blocked);

    let missing = BanConfig {
        connection_string: None,
        ..Default::default()
    };
    assert!(BanStorage::new(&missing).await.is_err());
}

#[tokio::test]
async fn test_decider_records_authoritative_verdicts() {
    let fixture = Fixture::new().await;
    fixture
        .insert(&format!("('{X}', NULL, 'cheating', 0, NULL, NULL, 'ACTIVE')"))
        .await;

    let storage = BanStorage::from_backend(fixture.store.clone());
    let cache = Arc::new(BanCache::new(storage.clone(), None));
    let decider = BanDecider::new(FailurePolicy::FailOpen)
        .with_authority(Arc::new(BanEvaluator::new(
            storage,
            EvaluationOptions::default(),
        )))
        .with_cache(cache.clone());

    let evaluator = fixture.evaluator();
    let decision = decider.decide(&evaluator.query(X, None)).await;

    assert_eq!(decision.source, VerdictSource::Authority);
    assert!(decision.verdict.blocked);
    assert!(cache.identity_banned(X));
}
