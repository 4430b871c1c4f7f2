//! Transaction Usage Examples
//!
//! Runs against an in-memory sqlite database:
//!
//! ```text
//! RUST_LOG=keel_orm=debug cargo run --example transaction_usage
//! ```

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use keel_orm::{
    args, Event, EventError, MemoryConfig, Model, ModelObserver, Orm, OrmError, OrmResult,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Account {
    id: i64,
    owner: String,
    balance: i64,
    created_at: Option<DateTime<Utc>>,
    updated_at: Option<DateTime<Utc>>,
}

impl Model for Account {}

/// Rejects writes that would overdraw an account
struct NoOverdraft;

#[async_trait]
impl ModelObserver<Account> for NoOverdraft {
    async fn saving(&self, event: &mut Event<Account>) -> Result<(), EventError> {
        let balance = event.model().map(|account| account.balance).unwrap_or_default();
        if balance < 0 {
            return Err(EventError::validation_with_hint(
                "balance cannot go negative",
                "transfer a smaller amount",
            ));
        }
        Ok(())
    }
}

const CONFIG: &str = r#"
database:
  default: sqlite
  slow_threshold: 100
  connections:
    sqlite:
      driver: sqlite
      database: ":memory:"
"#;

async fn transfer(orm: &Orm, from: i64, to: i64, amount: i64) -> OrmResult<()> {
    orm.transaction(|q| async move {
        let mut source = q.lock_for_update().find_or_fail::<Account>(from).await?;
        let mut target = q.lock_for_update().find_or_fail::<Account>(to).await?;
        source.balance -= amount;
        target.balance += amount;
        q.save(&mut source).await?;
        q.save(&mut target).await?;
        Ok(())
    })
    .await
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let orm = Orm::new(MemoryConfig::from_yaml(CONFIG)?);
    orm.observe::<Account>(NoOverdraft);

    orm.query()
        .exec(
            "CREATE TABLE accounts (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                owner TEXT NOT NULL,
                balance INTEGER NOT NULL,
                created_at TEXT,
                updated_at TEXT
            )",
            (),
        )
        .await?;

    let mut accounts = vec![
        Account {
            owner: "alice".to_string(),
            balance: 100,
            ..Default::default()
        },
        Account {
            owner: "bob".to_string(),
            balance: 20,
            ..Default::default()
        },
    ];
    orm.query().create_many(&mut accounts).await?;
    let (alice, bob) = (accounts[0].id, accounts[1].id);

    // Committed
    transfer(&orm, alice, bob, 30).await?;

    // The observer vetoes the overdraft and the transaction rolls back
    match transfer(&orm, bob, alice, 500).await {
        Err(OrmError::Event(err)) => println!("transfer refused: {}", err),
        other => println!("unexpected outcome: {:?}", other),
    }

    // Manual control over the transaction handle
    let tx = orm.begin().await?;
    tx.where_("owner", args!["bob"])
        .update_column::<Account>("balance", 0)
        .await?;
    tx.rollback().await?;

    for account in orm.query().order_by("owner").get::<Account>().await? {
        println!("{:<6} {:>4}", account.owner, account.balance);
    }

    orm.close().await;
    Ok(())
}
