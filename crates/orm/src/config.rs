//! Connection configuration
//!
//! Settings are read through [`ConfigProvider`], a dotted-path lookup. A logical
//! connection name resolves into one [`FullConfig`] per write target and per read
//! replica, layering the read/write entry over the connection block, the global
//! `database.defaults` block and finally the dialect's own defaults.

use std::path::Path;
use std::time::Duration;

use serde_json::{Map, Value as JsonValue};

use crate::backends::Dialect;
use crate::error::{OrmError, OrmResult};

/// Dotted-path configuration lookup
pub trait ConfigProvider: Send + Sync {
    fn get(&self, path: &str) -> Option<JsonValue>;

    fn get_string(&self, path: &str, default: &str) -> String {
        match self.get(path) {
            Some(JsonValue::String(s)) => s,
            Some(JsonValue::Number(n)) => n.to_string(),
            Some(JsonValue::Bool(b)) => b.to_string(),
            _ => default.to_string(),
        }
    }

    fn get_int(&self, path: &str, default: i64) -> i64 {
        match self.get(path) {
            Some(JsonValue::Number(n)) => n.as_i64().unwrap_or(default),
            Some(JsonValue::String(s)) => s.trim().parse().unwrap_or(default),
            _ => default,
        }
    }

    fn get_bool(&self, path: &str, default: bool) -> bool {
        self.get(path).and_then(|v| as_bool(&v)).unwrap_or(default)
    }
}

/// In-memory configuration tree
#[derive(Debug, Clone)]
pub struct MemoryConfig {
    root: JsonValue,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryConfig {
    pub fn new() -> Self {
        Self {
            root: JsonValue::Object(Map::new()),
        }
    }

    pub fn from_value(root: JsonValue) -> Self {
        Self { root }
    }

    pub fn from_json(text: &str) -> OrmResult<Self> {
        let root: JsonValue = serde_json::from_str(text)
            .map_err(|e| OrmError::Configuration(format!("invalid JSON config: {}", e)))?;
        Ok(Self { root })
    }

    pub fn from_yaml(text: &str) -> OrmResult<Self> {
        let root: JsonValue = serde_yaml::from_str(text)?;
        Ok(Self { root })
    }

    /// Load a `.json`, `.yaml` or `.yml` file
    pub fn from_file(path: impl AsRef<Path>) -> OrmResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            OrmError::Configuration(format!("cannot read {}: {}", path.display(), e))
        })?;

        match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => Self::from_json(&content),
            _ => Self::from_yaml(&content),
        }
    }

    /// Set a value, creating intermediate objects along the path
    pub fn set(&mut self, path: &str, value: impl Into<JsonValue>) -> &mut Self {
        let mut node = &mut self.root;
        for segment in path.split('.') {
            if !node.is_object() {
                *node = JsonValue::Object(Map::new());
            }
            node = &mut node[segment];
        }
        *node = value.into();
        self
    }
}

impl ConfigProvider for MemoryConfig {
    fn get(&self, path: &str) -> Option<JsonValue> {
        let mut node = &self.root;
        for segment in path.split('.') {
            node = match node {
                JsonValue::Object(map) => map.get(segment)?,
                JsonValue::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
                _ => return None,
            };
        }
        Some(node.clone())
    }
}

/// Pool limits handed to the driver when a connection is built
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolSettings {
    pub max_open_conns: u32,
    pub max_idle_conns: u32,
    pub conn_max_lifetime: Option<Duration>,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_open_conns: 100,
            max_idle_conns: 10,
            conn_max_lifetime: Some(Duration::from_secs(3600)),
        }
    }
}

/// Resolved configuration of one physical database target
#[derive(Debug, Clone, PartialEq)]
pub struct FullConfig {
    /// Logical connection name this target belongs to
    pub connection: String,
    pub driver: Dialect,
    pub host: String,
    pub port: Option<u16>,
    pub database: String,
    pub username: String,
    pub password: String,
    pub schema: String,
    pub prefix: String,
    pub singular: bool,
    pub charset: String,
    pub loc: String,
    pub sslmode: String,
    pub timezone: String,
    pub pool: PoolSettings,
}

impl Default for FullConfig {
    fn default() -> Self {
        Self {
            connection: String::new(),
            driver: Dialect::Mysql,
            host: String::new(),
            port: None,
            database: String::new(),
            username: String::new(),
            password: String::new(),
            schema: String::new(),
            prefix: String::new(),
            singular: false,
            charset: String::new(),
            loc: String::new(),
            sslmode: String::new(),
            timezone: String::new(),
            pool: PoolSettings::default(),
        }
    }
}

/// Every target of one logical connection
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionConfigs {
    pub name: String,
    pub dialect: Dialect,
    pub writes: Vec<FullConfig>,
    pub reads: Vec<FullConfig>,
}

impl ConnectionConfigs {
    /// The first write target; carries the table prefix and naming settings
    pub fn primary(&self) -> &FullConfig {
        &self.writes[0]
    }
}

/// Name used when a caller asks for the empty connection name
pub fn default_connection_name(config: &dyn ConfigProvider) -> String {
    config.get_string("database.default", "")
}

/// Resolve a logical connection name into its read and write targets.
///
/// An empty name means `database.default`; any other unknown name is an error.
pub fn resolve(config: &dyn ConfigProvider, name: &str) -> OrmResult<ConnectionConfigs> {
    let name = if name.is_empty() {
        default_connection_name(config)
    } else {
        name.to_string()
    };
    if name.is_empty() {
        return Err(OrmError::Configuration(
            "database.default is not set".to_string(),
        ));
    }

    let connection = match config.get(&format!("database.connections.{}", name)) {
        Some(JsonValue::Object(map)) => map,
        _ => return Err(OrmError::ConnectionNotFound(name)),
    };
    let defaults = match config.get("database.defaults") {
        Some(JsonValue::Object(map)) => map,
        _ => Map::new(),
    };

    let driver_name = layered(&[&connection, &defaults], "driver")
        .and_then(JsonValue::as_str)
        .ok_or_else(|| OrmError::Configuration(format!("connection '{}' has no driver", name)))?
        .to_string();
    let dialect: Dialect = driver_name.parse()?;

    let entries = |key: &str| -> Vec<Map<String, JsonValue>> {
        match connection.get(key) {
            Some(JsonValue::Array(items)) => items
                .iter()
                .filter_map(|item| item.as_object().cloned())
                .collect(),
            Some(JsonValue::Object(single)) => vec![single.clone()],
            _ => Vec::new(),
        }
    };

    let mut writes = entries("write");
    if writes.is_empty() {
        writes.push(Map::new());
    }

    let build = |entry: &Map<String, JsonValue>| {
        build_full_config(&name, dialect, &[entry, &connection, &defaults])
    };

    Ok(ConnectionConfigs {
        writes: writes.iter().map(build).collect::<OrmResult<Vec<_>>>()?,
        reads: entries("read")
            .iter()
            .map(build)
            .collect::<OrmResult<Vec<_>>>()?,
        name,
        dialect,
    })
}

fn build_full_config(
    name: &str,
    dialect: Dialect,
    layers: &[&Map<String, JsonValue>],
) -> OrmResult<FullConfig> {
    let text = |key: &str, default: &str| -> String {
        layered(layers, key)
            .and_then(as_string)
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| default.to_string())
    };

    let port = match layered(layers, "port") {
        None | Some(JsonValue::Null) => None,
        Some(value) => Some(
            as_string(value)
                .and_then(|s| s.parse::<u16>().ok())
                .ok_or_else(|| {
                    OrmError::Configuration(format!("connection '{}' has an invalid port", name))
                })?,
        ),
    };

    let defaults = PoolSettings::default();
    let pool_value = |key: &str| -> Option<i64> {
        let pool = layered(layers, "pool")?.as_object()?;
        as_string(pool.get(key)?)?.parse().ok()
    };
    let pool = PoolSettings {
        max_open_conns: pool_value("max_open_conns")
            .map(|v| v.max(0) as u32)
            .unwrap_or(defaults.max_open_conns),
        max_idle_conns: pool_value("max_idle_conns")
            .map(|v| v.max(0) as u32)
            .unwrap_or(defaults.max_idle_conns),
        conn_max_lifetime: match pool_value("conn_max_lifetime") {
            Some(secs) if secs <= 0 => None,
            Some(secs) => Some(Duration::from_secs(secs as u64)),
            None => defaults.conn_max_lifetime,
        },
    };

    Ok(FullConfig {
        connection: name.to_string(),
        driver: dialect,
        host: text("host", ""),
        port,
        database: text("database", ""),
        username: text("username", ""),
        password: text("password", ""),
        schema: text("schema", ""),
        prefix: text("prefix", ""),
        singular: layered(layers, "singular")
            .and_then(as_bool)
            .unwrap_or(false),
        charset: text("charset", dialect.default_charset()),
        loc: text("loc", ""),
        sslmode: text("sslmode", dialect.default_sslmode()),
        timezone: text("timezone", ""),
        pool,
    })
}

fn layered<'a>(layers: &[&'a Map<String, JsonValue>], key: &str) -> Option<&'a JsonValue> {
    layers
        .iter()
        .find_map(|layer| layer.get(key).filter(|value| !value.is_null()))
}

fn as_string(value: &JsonValue) -> Option<String> {
    match value {
        JsonValue::String(s) => Some(s.clone()),
        JsonValue::Number(n) => Some(n.to_string()),
        JsonValue::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn as_bool(value: &JsonValue) -> Option<bool> {
    match value {
        JsonValue::Bool(b) => Some(*b),
        JsonValue::Number(n) => n.as_i64().map(|i| i != 0),
        JsonValue::String(s) => match s.to_lowercase().as_str() {
            "true" | "1" | "yes" => Some(true),
            "false" | "0" | "no" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn split_config() -> MemoryConfig {
        MemoryConfig::from_yaml(
            r#"
database:
  default: mysql
  defaults:
    prefix: app_
  connections:
    mysql:
      driver: mysql
      host: localhost
      port: 3306
      database: app
      username: root
      write:
        - host: primary.db
      read:
        - host: replica-1.db
        - host: replica-2.db
          port: "3307"
    sqlite:
      driver: sqlite
      database: ":memory:"
"#,
        )
        .unwrap()
    }

    #[test]
    fn test_dotted_lookup_and_set() {
        let mut config = MemoryConfig::new();
        config.set("database.slow_threshold", 50);
        config.set("database.connections.main.driver", "sqlite");

        assert_eq!(config.get_int("database.slow_threshold", 200), 50);
        assert_eq!(config.get_string("database.connections.main.driver", ""), "sqlite");
        assert_eq!(config.get_string("database.missing", "fallback"), "fallback");
        assert!(!config.get_bool("database.missing", false));
    }

    #[test]
    fn test_read_write_entries_override_connection_block() {
        let configs = resolve(&split_config(), "mysql").unwrap();

        assert_eq!(configs.dialect, Dialect::Mysql);
        assert_eq!(configs.writes.len(), 1);
        assert_eq!(configs.writes[0].host, "primary.db");
        assert_eq!(configs.reads.len(), 2);
        assert_eq!(configs.reads[0].host, "replica-1.db");
        assert_eq!(configs.reads[0].port, Some(3306));
        assert_eq!(configs.reads[1].port, Some(3307));
        // inherited from the connection block and global defaults
        assert_eq!(configs.reads[1].database, "app");
        assert_eq!(configs.reads[1].prefix, "app_");
        // dialect default
        assert_eq!(configs.primary().charset, "utf8mb4");
    }

    #[test]
    fn test_empty_name_uses_default_connection() {
        let configs = resolve(&split_config(), "").unwrap();
        assert_eq!(configs.name, "mysql");
    }

    #[test]
    fn test_unknown_name_does_not_fall_back() {
        let err = resolve(&split_config(), "postgres").unwrap_err();
        assert!(matches!(err, OrmError::ConnectionNotFound(name) if name == "postgres"));
    }

    #[test]
    fn test_connection_without_write_list_is_its_own_target() {
        let configs = resolve(&split_config(), "sqlite").unwrap();
        assert_eq!(configs.writes.len(), 1);
        assert!(configs.reads.is_empty());
        assert_eq!(configs.primary().database, ":memory:");
    }

    #[test]
    fn test_unsupported_driver_is_reported() {
        let config = MemoryConfig::from_value(json!({
            "database": {"connections": {"legacy": {"driver": "oracle"}}}
        }));
        assert!(matches!(
            resolve(&config, "legacy"),
            Err(OrmError::UnsupportedDriver(_))
        ));
    }

    #[test]
    fn test_pool_settings() {
        let mut config = split_config();
        config.set("database.connections.sqlite.pool.max_open_conns", 5);
        config.set("database.connections.sqlite.pool.conn_max_lifetime", 0);

        let configs = resolve(&config, "sqlite").unwrap();
        assert_eq!(configs.primary().pool.max_open_conns, 5);
        assert_eq!(configs.primary().pool.max_idle_conns, 10);
        assert_eq!(configs.primary().pool.conn_max_lifetime, None);
    }

    #[test]
    fn test_config_file_loading() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("database.json");
        std::fs::write(&path, r#"{"database": {"default": "sqlite"}}"#).unwrap();

        let config = MemoryConfig::from_file(&path).unwrap();
        assert_eq!(default_connection_name(&config), "sqlite");
    }
}
