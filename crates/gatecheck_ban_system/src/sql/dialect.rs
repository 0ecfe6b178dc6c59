//! Connection-string shape detection and normalisation into sqlx options.

use std::{fmt, str::FromStr};

use gatecheck_config::LogType;
use sqlx::{mysql::MySqlConnectOptions, sqlite::SqliteConnectOptions};
use tracing::debug;

use crate::BanError;

const MYSQL_MARKERS: [&str; 4] = ["server=", "uid=", "user id=", "port="];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatabaseKind {
    MySql,
    Sqlite,
}

impl DatabaseKind {
    /// Networked MySQL when the string carries server or credential keys
    /// (or a `mysql://` scheme), embedded SQLite otherwise.
    pub fn detect(connection_string: &str) -> Self {
        let lower = connection_string.trim().to_ascii_lowercase();

        if lower.starts_with("mysql://") || lower.starts_with("mariadb://") {
            return DatabaseKind::MySql;
        }
        if lower.starts_with("sqlite:") {
            return DatabaseKind::Sqlite;
        }

        if MYSQL_MARKERS.iter().any(|marker| lower.contains(marker)) {
            DatabaseKind::MySql
        } else {
            DatabaseKind::Sqlite
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DatabaseKind::MySql => "mysql",
            DatabaseKind::Sqlite => "sqlite",
        }
    }
}

impl fmt::Display for DatabaseKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `key=value` pairs of an ADO-style string, keys lowercased.
fn pairs(connection_string: &str) -> impl Iterator<Item = (String, &str)> {
    connection_string.split(';').filter_map(|part| {
        let (key, value) = part.split_once('=')?;
        let key = key.trim();
        if key.is_empty() {
            return None;
        }
        Some((key.to_ascii_lowercase(), value.trim()))
    })
}

fn invalid(message: impl Into<String>) -> BanError {
    BanError::Connection(message.into())
}

pub(crate) fn mysql_options(connection_string: &str) -> Result<MySqlConnectOptions, BanError> {
    let trimmed = connection_string.trim();
    let lower = trimmed.to_ascii_lowercase();

    if lower.starts_with("mysql://") || lower.starts_with("mariadb://") {
        let url = if lower.starts_with("mariadb://") {
            format!("mysql://{}", &trimmed["mariadb://".len()..])
        } else {
            trimmed.to_string()
        };
        return MySqlConnectOptions::from_str(&url).map_err(|e| invalid(e.to_string()));
    }

    let mut options = MySqlConnectOptions::new();
    let mut has_host = false;

    for (key, value) in pairs(trimmed) {
        match key.as_str() {
            "server" | "host" | "data source" | "address" | "addr" => {
                options = options.host(value);
                has_host = true;
            }
            "port" => {
                let port = value
                    .parse::<u16>()
                    .map_err(|_| invalid(format!("invalid port '{value}'")))?;
                options = options.port(port);
            }
            "database" | "initial catalog" => options = options.database(value),
            "uid" | "user id" | "user" | "username" => options = options.username(value),
            "pwd" | "password" => options = options.password(value),
            other => {
                debug!(
                    log_type = LogType::BanSystem.as_str(),
                    "Ignoring connection string option '{}'", other
                );
            }
        }
    }

    if !has_host {
        return Err(invalid("MySQL connection string has no server"));
    }

    Ok(options)
}

/// SQLite options plus whether the database lives only in memory.
pub(crate) fn sqlite_options(
    connection_string: &str,
) -> Result<(SqliteConnectOptions, bool), BanError> {
    let trimmed = connection_string.trim();
    let lower = trimmed.to_ascii_lowercase();
    let in_memory = lower.contains(":memory:") || lower.contains("mode=memory");

    if lower.starts_with("sqlite:") {
        let options = SqliteConnectOptions::from_str(trimmed).map_err(|e| invalid(e.to_string()))?;
        return Ok((options.create_if_missing(true), in_memory));
    }

    let path = if trimmed.contains('=') {
        pairs(trimmed)
            .find(|(key, _)| matches!(key.as_str(), "data source" | "datasource" | "filename"))
            .map(|(_, value)| value)
            .ok_or_else(|| invalid("SQLite connection string has no data source"))?
    } else {
        trimmed
    };

    if path.is_empty() {
        return Err(invalid("SQLite connection string has an empty data source"));
    }

    if in_memory {
        let options =
            SqliteConnectOptions::from_str("sqlite::memory:").map_err(|e| invalid(e.to_string()))?;
        return Ok((options, true));
    }

    Ok((
        SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true),
        false,
    ))
}
