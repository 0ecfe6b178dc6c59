use std::sync::LazyLock;

use super::DatabaseKind;

/// Row predicate of a ban that is in effect right now.
const IN_EFFECT: &str =
    "status = 'ACTIVE' AND (duration = 0 OR ends IS NULL OR ends > CURRENT_TIMESTAMP)";

const ELAPSED: &str =
    "status = 'ACTIVE' AND duration > 0 AND ends IS NOT NULL AND ends <= CURRENT_TIMESTAMP";

/// Parameterized statement texts. Placeholders are bound in the order
/// identity, address, scope; the scope placeholder only exists in the
/// scoped set.
#[derive(Debug)]
pub(crate) struct Statements {
    pub expire_identity: String,
    pub expire_any: String,
    pub count_identity: String,
    pub count_address: String,
    pub latest_identity: String,
    pub latest_address: String,
    pub latest_any: String,
    pub latest_unban: String,
    pub active_keys: String,
}

static UNSCOPED: LazyLock<Statements> = LazyLock::new(|| Statements::build(false));
static SCOPED: LazyLock<Statements> = LazyLock::new(|| Statements::build(true));

impl Statements {
    fn build(scoped: bool) -> Self {
        let scope = if scoped { " AND server_id = ?" } else { "" };

        Self {
            expire_identity: format!(
                "UPDATE sa_bans SET status = 'EXPIRED' WHERE {ELAPSED} AND player_steamid = ?{scope}"
            ),
            expire_any: format!(
                "UPDATE sa_bans SET status = 'EXPIRED' WHERE {ELAPSED} \
                 AND (player_steamid = ? OR player_ip = ?){scope}"
            ),
            count_identity: format!(
                "SELECT COUNT(*) FROM sa_bans WHERE player_steamid = ? AND {IN_EFFECT}{scope}"
            ),
            count_address: format!(
                "SELECT COUNT(*) FROM sa_bans WHERE player_ip = ? AND {IN_EFFECT}{scope}"
            ),
            latest_identity: format!(
                "SELECT id, reason FROM sa_bans WHERE player_steamid = ? AND {IN_EFFECT}{scope} \
                 ORDER BY id DESC LIMIT 1"
            ),
            latest_address: format!(
                "SELECT id, reason FROM sa_bans WHERE player_ip = ? AND {IN_EFFECT}{scope} \
                 ORDER BY id DESC LIMIT 1"
            ),
            latest_any: format!(
                "SELECT id, reason FROM sa_bans WHERE (player_steamid = ? OR player_ip = ?) \
                 AND {IN_EFFECT}{scope} ORDER BY id DESC LIMIT 1"
            ),
            latest_unban: format!(
                "SELECT MAX(id) FROM sa_bans WHERE player_steamid = ? AND status = 'UNBANNED'{scope}"
            ),
            active_keys: format!(
                "SELECT id, player_steamid, player_ip FROM sa_bans WHERE {IN_EFFECT}{scope}"
            ),
        }
    }

    pub fn for_scope(scope: Option<i64>) -> &'static Statements {
        if scope.is_some() { &*SCOPED } else { &*UNSCOPED }
    }
}

pub(crate) const UNBAN: &str = "UPDATE sa_bans SET status = 'UNBANNED' WHERE id = ?";

pub(crate) const STATUS_OF: &str = "SELECT status FROM sa_bans WHERE id = ?";

const MYSQL_SCHEMA: &[&str] = &["CREATE TABLE IF NOT EXISTS `sa_bans` (
    `id` BIGINT NOT NULL AUTO_INCREMENT,
    `player_name` VARCHAR(128) NULL,
    `player_steamid` VARCHAR(64) NULL,
    `player_ip` VARCHAR(128) NULL,
    `reason` VARCHAR(255) NULL,
    `duration` INT NOT NULL DEFAULT 0,
    `ends` TIMESTAMP NULL,
    `created` TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
    `server_id` INT NULL,
    `status` VARCHAR(16) NOT NULL DEFAULT 'ACTIVE',
    PRIMARY KEY (`id`),
    KEY `idx_sa_bans_steamid` (`player_steamid`),
    KEY `idx_sa_bans_ip` (`player_ip`)
)"];

const SQLITE_SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS sa_bans (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    player_name TEXT NULL,
    player_steamid TEXT NULL,
    player_ip TEXT NULL,
    reason TEXT NULL,
    duration INTEGER NOT NULL DEFAULT 0,
    ends TIMESTAMP NULL,
    created TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
    server_id INTEGER NULL,
    status TEXT NOT NULL DEFAULT 'ACTIVE'
)",
    "CREATE INDEX IF NOT EXISTS idx_sa_bans_steamid ON sa_bans (player_steamid)",
    "CREATE INDEX IF NOT EXISTS idx_sa_bans_ip ON sa_bans (player_ip)",
];

pub(crate) fn schema(kind: DatabaseKind) -> &'static [&'static str] {
    match kind {
        DatabaseKind::MySql => MYSQL_SCHEMA,
        DatabaseKind::Sqlite => SQLITE_SCHEMA,
    }
}

/// Insert statement; a positive duration binds the seconds once more to compute `ends`.
pub(crate) fn insert_ban(kind: DatabaseKind, permanent: bool) -> &'static str {
    match (kind, permanent) {
        (_, true) => {
            "INSERT INTO sa_bans (player_steamid, player_ip, reason, duration, server_id, ends, status) \
             VALUES (?, ?, ?, ?, ?, NULL, 'ACTIVE')"
        }
        (DatabaseKind::MySql, false) => {
            "INSERT INTO sa_bans (player_steamid, player_ip, reason, duration, server_id, ends, status) \
             VALUES (?, ?, ?, ?, ?, DATE_ADD(CURRENT_TIMESTAMP, INTERVAL ? SECOND), 'ACTIVE')"
        }
        (DatabaseKind::Sqlite, false) => {
            "INSERT INTO sa_bans (player_steamid, player_ip, reason, duration, server_id, ends, status) \
             VALUES (?, ?, ?, ?, ?, datetime('now', '+' || ? || ' seconds'), 'ACTIVE')"
        }
    }
}
