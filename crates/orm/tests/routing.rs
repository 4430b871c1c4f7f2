mod common;

use std::collections::HashSet;
use std::time::Duration;

use chrono::{DateTime, Utc};
use keel_orm::{args, attrs, DatabaseValue, MemoryConfig, Model, Orm, OrmError};
use serde::{Deserialize, Serialize};

use common::{postgres_config, row, split_config, FakeConnector};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct User {
    id: i64,
    name: String,
    age: i64,
}

impl Model for User {
    fn created_at_column() -> Option<&'static str> {
        None
    }

    fn updated_at_column() -> Option<&'static str> {
        None
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct Report {
    id: i64,
    title: String,
}

impl Model for Report {
    fn connection() -> Option<&'static str> {
        Some("analytics")
    }

    fn created_at_column() -> Option<&'static str> {
        None
    }

    fn updated_at_column() -> Option<&'static str> {
        None
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct Member {
    id: i64,
    name: String,
    deleted_at: Option<DateTime<Utc>>,
}

impl Model for Member {
    fn soft_delete_column() -> Option<&'static str> {
        Some("deleted_at")
    }

    fn created_at_column() -> Option<&'static str> {
        None
    }

    fn updated_at_column() -> Option<&'static str> {
        None
    }
}

fn split() -> (Orm, FakeConnector) {
    let connector = FakeConnector::new();
    (Orm::with_connector(split_config(), connector.clone()), connector)
}

fn targets(connector: &FakeConnector) -> Vec<String> {
    connector
        .recorder
        .statements()
        .into_iter()
        .map(|s| s.target)
        .collect()
}

#[tokio::test]
async fn test_reads_are_spread_over_replicas() {
    let (orm, connector) = split();

    for id in 1..=100 {
        orm.query().find::<User>(args![id]).await.unwrap();
    }

    let used: HashSet<String> = targets(&connector).into_iter().collect();
    assert_eq!(connector.recorder.statements().len(), 100);
    assert!(!used.contains("w1"));
    assert!(used.contains("r1"));
    assert!(used.contains("r2"));
}

#[tokio::test]
async fn test_writes_go_to_the_primary() {
    let (orm, connector) = split();

    let mut user = User {
        name: "ada".to_string(),
        ..Default::default()
    };
    orm.query().create(&mut user).await.unwrap();
    orm.query()
        .where_eq("id", user.id)
        .update::<User>(attrs! { "age" => 37 })
        .await
        .unwrap();
    orm.query().exec("DELETE FROM sessions", ()).await.unwrap();

    assert_eq!(targets(&connector), vec!["w1", "w1", "w1"]);
}

#[tokio::test]
async fn test_locking_reads_go_to_the_primary() {
    let (orm, connector) = split();

    orm.query()
        .where_eq("id", 1)
        .lock_for_update()
        .get::<User>()
        .await
        .unwrap();

    let statements = connector.recorder.statements();
    assert_eq!(statements[0].target, "w1");
    assert_eq!(
        statements[0].sql,
        "SELECT * FROM `users` WHERE `id` = ? FOR UPDATE"
    );
}

#[tokio::test]
async fn test_transaction_pins_statements_and_commits() {
    let (orm, connector) = split();

    let created = orm
        .transaction(|q| async move {
            let mut user = User {
                name: "ada".to_string(),
                ..Default::default()
            };
            q.create(&mut user).await?;
            q.get::<User>().await?;
            Ok(user)
        })
        .await
        .unwrap();

    assert_eq!(created.id, 1);
    let statements = connector.recorder.statements();
    let summary: Vec<(String, String)> = statements
        .iter()
        .map(|s| (s.target.clone(), s.sql.split(' ').next().unwrap_or("").to_string()))
        .collect();
    assert_eq!(
        summary,
        vec![
            ("w1".to_string(), "BEGIN".to_string()),
            ("tx:w1".to_string(), "INSERT".to_string()),
            ("tx:w1".to_string(), "SELECT".to_string()),
            ("tx:w1".to_string(), "COMMIT".to_string()),
        ]
    );
}

#[tokio::test]
async fn test_transaction_rolls_back_on_error() {
    let (orm, connector) = split();

    let err = orm
        .transaction(|q| async move {
            q.exec("UPDATE accounts SET balance = 0", ()).await?;
            Err::<(), _>(OrmError::RecordNotFound)
        })
        .await
        .unwrap_err();

    assert!(matches!(err, OrmError::RecordNotFound));
    assert_eq!(
        connector.recorder.sql(),
        vec!["BEGIN", "UPDATE accounts SET balance = 0", "ROLLBACK"]
    );
}

#[tokio::test]
async fn test_transaction_rolls_back_on_panic() {
    let (orm, connector) = split();

    let err = orm
        .transaction(|q| async move {
            q.exec("UPDATE accounts SET balance = 0", ()).await?;
            if q.in_transaction() {
                panic!("ledger out of balance");
            }
            Ok(())
        })
        .await
        .unwrap_err();

    match err {
        OrmError::Transaction(message) => assert!(message.contains("ledger out of balance")),
        other => panic!("Expected a transaction error, got {:?}", other),
    }
    assert_eq!(connector.recorder.sql().last().map(String::as_str), Some("ROLLBACK"));
}

#[tokio::test]
async fn test_explicit_transaction_handle() {
    let (orm, connector) = split();

    let tx = orm.begin().await.unwrap();
    assert!(tx.in_transaction());
    tx.exec("DELETE FROM carts", ()).await.unwrap();
    assert!(tx.begin().await.is_err());
    tx.rollback().await.unwrap();

    assert_eq!(
        targets(&connector),
        vec!["w1", "tx:w1", "tx:w1"]
    );
    assert_eq!(connector.recorder.sql()[2], "ROLLBACK");
}

#[tokio::test]
async fn test_guards_reject_unbounded_writes() {
    let (orm, connector) = split();

    let err = orm
        .query()
        .update::<User>(attrs! { "age" => 1 })
        .await
        .unwrap_err();
    assert!(matches!(err, OrmError::MissingWhereClause));

    let err = orm.query().delete(&User::default()).await.unwrap_err();
    assert!(matches!(err, OrmError::MissingWhereClause));

    let err = orm.query().find::<User>(args![]).await.unwrap_err();
    assert!(matches!(err, OrmError::MissingWhereClause));

    let err = orm.query().get_rows().await.unwrap_err();
    assert!(matches!(err, OrmError::TableIsRequired));

    assert!(connector.recorder.statements().is_empty());
}

#[tokio::test]
async fn test_soft_delete_by_condition_scopes_the_update() {
    let (orm, connector) = split();

    orm.query()
        .where_("name = ?", args!["a"])
        .delete(&Member::default())
        .await
        .unwrap();
    let found = orm
        .query()
        .where_("name = ?", args!["a"])
        .first::<Member>()
        .await
        .unwrap();
    assert!(found.is_none());

    let statements = connector.recorder.statements();
    assert_eq!(statements[0].target, "w1");
    assert_eq!(
        statements[0].sql,
        "UPDATE `members` SET `deleted_at` = ? WHERE name = ? AND `members`.`deleted_at` IS NULL"
    );
    assert!(matches!(statements[0].params[0], DatabaseValue::DateTime(_)));
    assert_eq!(statements[0].params[1], DatabaseValue::from("a"));
    assert_eq!(
        statements[1].sql,
        "SELECT * FROM `members` WHERE name = ? AND `members`.`deleted_at` IS NULL ORDER BY `id` LIMIT 1"
    );
}

#[tokio::test]
async fn test_branching_does_not_leak_conditions() {
    let (orm, connector) = split();

    let adults = orm.query().where_gte("age", 18);
    let named = adults.where_eq("name", "ada");
    let ordered = adults.order_by_desc("age").limit(10);

    named.get::<User>().await.unwrap();
    ordered.get::<User>().await.unwrap();
    adults.get::<User>().await.unwrap();

    assert_eq!(
        connector.recorder.sql(),
        vec![
            "SELECT * FROM `users` WHERE `age` >= ? AND `name` = ?",
            "SELECT * FROM `users` WHERE `age` >= ? ORDER BY `age` DESC LIMIT 10",
            "SELECT * FROM `users` WHERE `age` >= ?",
        ]
    );
    assert_eq!(adults.conditions().wheres.len(), 1);
}

#[tokio::test]
async fn test_timeout_cancels_slow_statements() {
    let connector = FakeConnector::with_delay(Duration::from_millis(500));
    let orm = Orm::with_connector(split_config(), connector.clone());

    let err = orm
        .query()
        .with_timeout(Duration::from_millis(20))
        .get::<User>()
        .await
        .unwrap_err();

    assert!(matches!(err, OrmError::Timeout(limit) if limit == Duration::from_millis(20)));
}

#[tokio::test]
async fn test_postgres_placeholders_and_returning() {
    let connector = FakeConnector::new();
    let orm = Orm::with_connector(postgres_config(), connector.clone());

    orm.query()
        .where_("name = ? AND age > ?", args!["ada", 30])
        .get::<User>()
        .await
        .unwrap();

    connector.recorder.push_rows(vec![row(&[("id", 42.into())])]);
    let mut user = User {
        name: "grace".to_string(),
        age: 45,
        ..Default::default()
    };
    orm.query().create(&mut user).await.unwrap();

    assert_eq!(user.id, 42);
    assert_eq!(
        connector.recorder.sql(),
        vec![
            r#"SELECT * FROM "users" WHERE name = $1 AND age > $2"#,
            r#"INSERT INTO "users" ("age", "name") VALUES ($1, $2) RETURNING "id""#,
        ]
    );
}

fn analytics_config() -> MemoryConfig {
    MemoryConfig::from_yaml(
        r#"
database:
  default: mysql
  connections:
    mysql:
      driver: mysql
      host: w1
    analytics:
      driver: mysql
      host: a1
"#,
    )
    .unwrap()
}

#[tokio::test]
async fn test_model_connection_overrides_the_query() {
    let connector = FakeConnector::new();
    let orm = Orm::with_connector(analytics_config(), connector.clone());

    orm.query().get::<Report>().await.unwrap();
    orm.query().get::<User>().await.unwrap();

    assert_eq!(targets(&connector), vec!["a1", "w1"]);

    let err = orm
        .transaction(|q| async move { q.get::<Report>().await })
        .await
        .unwrap_err();
    assert!(matches!(err, OrmError::Transaction(_)));
}

#[tokio::test]
async fn test_unknown_connection_is_reported() {
    let (orm, _connector) = split();
    let err = orm.connection("reporting").get::<User>().await.unwrap_err();
    assert!(matches!(err, OrmError::ConnectionNotFound(name) if name == "reporting"));
}
