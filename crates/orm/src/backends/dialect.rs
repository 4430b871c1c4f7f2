//! SQL dialect translation
//!
//! A closed set of dialects resolved once when a connection is built. Call sites
//! never compare driver strings; they ask the dialect for its quirks.

use std::fmt;
use std::str::FromStr;

use url::Url;

use crate::config::FullConfig;
use crate::error::{OrmError, OrmResult};
use crate::query::types::LockMode;

/// SQL dialect enumeration for generating database-specific SQL
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dialect {
    Mysql,
    Postgres,
    Sqlite,
    Sqlserver,
}

/// How an INSERT reports the generated primary key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReturningStyle {
    /// Driver reports `last_insert_id`
    LastInsertId,
    /// `INSERT ... RETURNING col`
    Returning,
    /// `INSERT ... OUTPUT INSERTED.col VALUES ...`
    Output,
}

impl Dialect {
    /// Quote an identifier, honouring `table.column` and `*`
    pub fn quote_ident(&self, ident: &str) -> String {
        ident
            .split('.')
            .map(|part| {
                if part == "*" {
                    return part.to_string();
                }
                match self {
                    Dialect::Mysql => format!("`{}`", part.replace('`', "``")),
                    Dialect::Sqlserver => format!("[{}]", part.replace(']', "]]")),
                    Dialect::Postgres | Dialect::Sqlite => {
                        format!("\"{}\"", part.replace('"', "\"\""))
                    }
                }
            })
            .collect::<Vec<_>>()
            .join(".")
    }

    /// Get the parameter placeholder for a 1-based position
    pub fn placeholder(&self, position: usize) -> String {
        match self {
            Dialect::Postgres => format!("${}", position),
            Dialect::Sqlserver => format!("@p{}", position),
            Dialect::Mysql | Dialect::Sqlite => "?".to_string(),
        }
    }

    /// Rewrite `?` placeholders into the dialect's native form
    pub fn rebind(&self, sql: &str) -> String {
        match self {
            Dialect::Mysql | Dialect::Sqlite => sql.to_string(),
            Dialect::Postgres | Dialect::Sqlserver => {
                self.replace_placeholders(sql, |position| self.placeholder(position))
            }
        }
    }

    /// Replace every `?` outside string literals, quoted identifiers and comments
    /// with `render(position)`, positions starting at 1.
    pub fn replace_placeholders(&self, sql: &str, mut render: impl FnMut(usize) -> String) -> String {
        let mut out = String::with_capacity(sql.len() + 8);
        let mut state = ScanState::Normal;
        let mut position = 0;
        let mut chars = sql.chars().peekable();

        while let Some(c) = chars.next() {
            match state {
                ScanState::Normal => match c {
                    '?' => {
                        position += 1;
                        out.push_str(&render(position));
                        continue;
                    }
                    '\'' => state = ScanState::SingleQuoted,
                    '"' => state = ScanState::DoubleQuoted,
                    '`' if *self == Dialect::Mysql => state = ScanState::Backticked,
                    '[' if *self == Dialect::Sqlserver => state = ScanState::Bracketed,
                    '-' if chars.peek() == Some(&'-') => state = ScanState::LineComment,
                    '/' if chars.peek() == Some(&'*') => state = ScanState::BlockComment,
                    _ => {}
                },
                ScanState::SingleQuoted if c == '\'' => state = ScanState::Normal,
                ScanState::DoubleQuoted if c == '"' => state = ScanState::Normal,
                ScanState::Backticked if c == '`' => state = ScanState::Normal,
                ScanState::Bracketed if c == ']' => state = ScanState::Normal,
                ScanState::LineComment if c == '\n' => state = ScanState::Normal,
                ScanState::BlockComment if c == '*' && chars.peek() == Some(&'/') => {
                    out.push(c);
                    if let Some(slash) = chars.next() {
                        out.push(slash);
                    }
                    state = ScanState::Normal;
                    continue;
                }
                _ => {}
            }
            out.push(c);
        }

        out
    }

    /// Trailing row-lock clause; SQL Server and SQLite have none
    pub fn lock_clause(&self, mode: LockMode) -> Option<&'static str> {
        match (self, mode) {
            (_, LockMode::None) => None,
            (Dialect::Mysql | Dialect::Postgres, LockMode::ForUpdate) => Some("FOR UPDATE"),
            (Dialect::Mysql | Dialect::Postgres, LockMode::Shared) => Some("FOR SHARE"),
            (Dialect::Sqlite | Dialect::Sqlserver, _) => None,
        }
    }

    /// Table hint placed after the table name; only SQL Server locks this way
    pub fn table_hint(&self, mode: LockMode) -> Option<&'static str> {
        match (self, mode) {
            (Dialect::Sqlserver, LockMode::ForUpdate) => Some("WITH (UPDLOCK, ROWLOCK)"),
            (Dialect::Sqlserver, LockMode::Shared) => Some("WITH (HOLDLOCK, ROWLOCK)"),
            _ => None,
        }
    }

    pub fn returning_style(&self) -> ReturningStyle {
        match self {
            // sqlite has RETURNING since 3.35; `Any` drops its last_insert_rowid
            Dialect::Postgres | Dialect::Sqlite => ReturningStyle::Returning,
            Dialect::Sqlserver => ReturningStyle::Output,
            Dialect::Mysql => ReturningStyle::LastInsertId,
        }
    }

    /// Render LIMIT/OFFSET. `has_order` matters for SQL Server, which needs an ORDER BY.
    pub fn limit_offset(&self, limit: Option<i64>, offset: Option<i64>, has_order: bool) -> String {
        match self {
            Dialect::Sqlserver => {
                if limit.is_none() && offset.is_none() {
                    return String::new();
                }
                let mut sql = String::new();
                if !has_order {
                    sql.push_str(" ORDER BY (SELECT NULL)");
                }
                sql.push_str(&format!(" OFFSET {} ROWS", offset.unwrap_or(0)));
                if let Some(limit) = limit {
                    sql.push_str(&format!(" FETCH NEXT {} ROWS ONLY", limit));
                }
                sql
            }
            Dialect::Mysql | Dialect::Sqlite => {
                // both engines reject a bare OFFSET
                let mut sql = match (limit, offset) {
                    (Some(limit), _) => format!(" LIMIT {}", limit),
                    (None, Some(_)) if *self == Dialect::Mysql => {
                        " LIMIT 18446744073709551615".to_string()
                    }
                    (None, Some(_)) => " LIMIT -1".to_string(),
                    (None, None) => String::new(),
                };
                if let Some(offset) = offset {
                    sql.push_str(&format!(" OFFSET {}", offset));
                }
                sql
            }
            Dialect::Postgres => {
                let mut sql = String::new();
                if let Some(limit) = limit {
                    sql.push_str(&format!(" LIMIT {}", limit));
                }
                if let Some(offset) = offset {
                    sql.push_str(&format!(" OFFSET {}", offset));
                }
                sql
            }
        }
    }

    pub fn random_function(&self) -> &'static str {
        match self {
            Dialect::Mysql => "RAND()",
            Dialect::Postgres | Dialect::Sqlite => "RANDOM()",
            Dialect::Sqlserver => "NEWID()",
        }
    }

    pub fn default_port(&self) -> Option<u16> {
        match self {
            Dialect::Mysql => Some(3306),
            Dialect::Postgres => Some(5432),
            Dialect::Sqlserver => Some(1433),
            Dialect::Sqlite => None,
        }
    }

    pub fn default_charset(&self) -> &'static str {
        match self {
            Dialect::Mysql => "utf8mb4",
            Dialect::Postgres | Dialect::Sqlite | Dialect::Sqlserver => "",
        }
    }

    pub fn default_sslmode(&self) -> &'static str {
        match self {
            Dialect::Postgres => "disable",
            Dialect::Mysql | Dialect::Sqlite | Dialect::Sqlserver => "",
        }
    }

    /// Server-based dialects cannot build a DSN without a host
    pub fn requires_host(&self) -> bool {
        !matches!(self, Dialect::Sqlite)
    }

    /// Build the driver connection string for a resolved configuration
    pub fn build_dsn(&self, config: &FullConfig) -> OrmResult<String> {
        if self.requires_host() && config.host.trim().is_empty() {
            return Err(OrmError::DsnGeneration(config.connection.clone()));
        }

        match self {
            Dialect::Sqlite => {
                if config.database.is_empty() {
                    return Err(OrmError::DsnGeneration(config.connection.clone()));
                }
                if config.database == ":memory:" {
                    Ok("sqlite::memory:".to_string())
                } else {
                    Ok(format!("sqlite://{}?mode=rwc", config.database))
                }
            }
            Dialect::Mysql => {
                let mut url = self.server_url("mysql", config)?;
                url.set_path(&format!("/{}", config.database));
                {
                    let mut pairs = url.query_pairs_mut();
                    if !config.charset.is_empty() {
                        pairs.append_pair("charset", &config.charset);
                    }
                    if !config.timezone.is_empty() {
                        pairs.append_pair("timezone", &config.timezone);
                    }
                }
                Ok(strip_empty_query(url))
            }
            Dialect::Postgres => {
                let mut url = self.server_url("postgres", config)?;
                url.set_path(&format!("/{}", config.database));
                {
                    let mut pairs = url.query_pairs_mut();
                    if !config.sslmode.is_empty() {
                        pairs.append_pair("sslmode", &config.sslmode);
                    }
                    let mut options = Vec::new();
                    if !config.schema.is_empty() {
                        options.push(format!("-c search_path={}", config.schema));
                    }
                    if !config.timezone.is_empty() {
                        options.push(format!("-c TimeZone={}", config.timezone));
                    }
                    if !options.is_empty() {
                        pairs.append_pair("options", &options.join(" "));
                    }
                }
                Ok(strip_empty_query(url))
            }
            Dialect::Sqlserver => {
                let mut url = self.server_url("sqlserver", config)?;
                {
                    let mut pairs = url.query_pairs_mut();
                    pairs.append_pair("database", &config.database);
                    pairs.append_pair("encrypt", "disable");
                }
                Ok(url.to_string())
            }
        }
    }

    fn server_url(&self, scheme: &str, config: &FullConfig) -> OrmResult<Url> {
        let dsn_error = || OrmError::DsnGeneration(config.connection.clone());

        let mut url = Url::parse(&format!("{}://localhost", scheme))?;
        url.set_host(Some(config.host.trim()))?;
        if let Some(port) = config.port.or(self.default_port()) {
            url.set_port(Some(port)).map_err(|_| dsn_error())?;
        }
        if !config.username.is_empty() {
            url.set_username(&config.username).map_err(|_| dsn_error())?;
        }
        if !config.password.is_empty() {
            url.set_password(Some(&config.password))
                .map_err(|_| dsn_error())?;
        }
        Ok(url)
    }
}

fn strip_empty_query(url: Url) -> String {
    let rendered = url.to_string();
    rendered
        .strip_suffix('?')
        .map(str::to_string)
        .unwrap_or(rendered)
}

#[derive(Clone, Copy)]
enum ScanState {
    Normal,
    SingleQuoted,
    DoubleQuoted,
    Backticked,
    Bracketed,
    LineComment,
    BlockComment,
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dialect::Mysql => write!(f, "mysql"),
            Dialect::Postgres => write!(f, "postgres"),
            Dialect::Sqlite => write!(f, "sqlite"),
            Dialect::Sqlserver => write!(f, "sqlserver"),
        }
    }
}

impl FromStr for Dialect {
    type Err = OrmError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "mysql" | "mariadb" => Ok(Dialect::Mysql),
            "postgres" | "postgresql" | "pgsql" => Ok(Dialect::Postgres),
            "sqlite" | "sqlite3" => Ok(Dialect::Sqlite),
            "sqlserver" | "mssql" => Ok(Dialect::Sqlserver),
            other => Err(OrmError::UnsupportedDriver(other.to_string())),
        }
    }
}
