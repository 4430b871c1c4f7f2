//! End-to-end behavior against an in-memory sqlite database

mod common;

use chrono::{DateTime, Utc};
use keel_orm::{args, attrs, DatabaseValue, Model, Orm, OrmError, Relation, ASSOCIATIONS};
use serde::{Deserialize, Serialize};

use common::sqlite_config;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct Author {
    id: i64,
    name: String,
    created_at: Option<DateTime<Utc>>,
    updated_at: Option<DateTime<Utc>>,
    posts: Vec<Post>,
}

impl Model for Author {
    fn relations() -> Vec<Relation<Self>> {
        vec![Relation::has_many::<Post>("posts", "author_id")]
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct Post {
    id: i64,
    author_id: i64,
    title: String,
    published: i64,
    deleted_at: Option<DateTime<Utc>>,
}

impl Model for Post {
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

async fn setup() -> Orm {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();

    let orm = Orm::new(sqlite_config());
    let q = orm.query();
    q.exec(
        "CREATE TABLE authors (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            created_at TEXT,
            updated_at TEXT
        )",
        (),
    )
    .await
    .unwrap();
    q.exec(
        "CREATE TABLE posts (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            author_id INTEGER NOT NULL,
            title TEXT NOT NULL,
            published INTEGER NOT NULL DEFAULT 0,
            deleted_at TEXT
        )",
        (),
    )
    .await
    .unwrap();
    orm
}

async fn seed(orm: &Orm) -> Author {
    let mut author = Author {
        name: "ada".to_string(),
        posts: vec![
            Post {
                title: "notes on the engine".to_string(),
                published: 1,
                ..Default::default()
            },
            Post {
                title: "draft".to_string(),
                ..Default::default()
            },
        ],
        ..Default::default()
    };
    orm.query()
        .select(&[ASSOCIATIONS])
        .create(&mut author)
        .await
        .unwrap();
    author
}

#[tokio::test]
async fn test_create_cascades_associations() {
    let orm = setup().await;
    let author = seed(&orm).await;

    assert!(author.id > 0);
    assert!(author.created_at.is_some());
    assert!(author.posts.iter().all(|p| p.id > 0 && p.author_id == author.id));
    assert_eq!(orm.query().count::<Post>().await.unwrap(), 2);
}

#[tokio::test]
async fn test_create_reads_back_generated_keys() {
    let orm = setup().await;

    let mut first = Author {
        name: "ada".to_string(),
        ..Default::default()
    };
    let mut second = Author {
        name: "grace".to_string(),
        ..Default::default()
    };
    orm.query().create(&mut first).await.unwrap();
    orm.query().create(&mut second).await.unwrap();

    assert!(first.id > 0);
    assert!(second.id > first.id);

    // saving again updates the same row instead of inserting
    first.name = "ada lovelace".to_string();
    orm.query().save(&mut first).await.unwrap();
    assert_eq!(orm.query().count::<Author>().await.unwrap(), 2);
}

#[tokio::test]
async fn test_null_columns_read_back_as_none() {
    let orm = setup().await;
    let mut author = Author {
        name: "ada".to_string(),
        ..Default::default()
    };
    orm.query().create(&mut author).await.unwrap();
    orm.query()
        .exec(
            "INSERT INTO posts (author_id, title) VALUES (?, ?)",
            args![author.id, "untouched"],
        )
        .await
        .unwrap();

    let post = orm
        .query()
        .where_eq("title", "untouched")
        .first::<Post>()
        .await
        .unwrap()
        .unwrap();
    assert_eq!(post.deleted_at, None);
    assert_eq!(post.author_id, author.id);

    let rows = orm.query().table("posts").get_rows().await.unwrap();
    assert_eq!(rows[0].get("deleted_at"), Some(&DatabaseValue::Null));
}

#[tokio::test]
async fn test_soft_delete_restore_and_force_delete() {
    let orm = setup().await;
    let author = seed(&orm).await;
    let (first, second) = (&author.posts[0], &author.posts[1]);

    assert_eq!(orm.query().delete(first).await.unwrap(), 1);
    assert_eq!(orm.query().count::<Post>().await.unwrap(), 1);
    assert_eq!(orm.query().with_trashed().count::<Post>().await.unwrap(), 2);
    assert!(orm.query().find_one::<Post>(first.id).await.unwrap().is_none());

    let trashed = orm
        .query()
        .with_trashed()
        .find_or_fail::<Post>(first.id)
        .await
        .unwrap();
    assert!(trashed.deleted_at.is_some());

    assert_eq!(orm.query().restore(first).await.unwrap(), 1);
    assert_eq!(orm.query().count::<Post>().await.unwrap(), 2);

    orm.query().force_delete(second).await.unwrap();
    assert_eq!(orm.query().with_trashed().count::<Post>().await.unwrap(), 1);
}

#[tokio::test]
async fn test_first_or_create_is_idempotent() {
    let orm = setup().await;

    let created: Author = orm
        .query()
        .first_or_create(attrs! { "name" => "grace" }, attrs! {})
        .await
        .unwrap();
    let found: Author = orm
        .query()
        .first_or_create(attrs! { "name" => "grace" }, attrs! {})
        .await
        .unwrap();

    assert_eq!(created.id, found.id);
    assert_eq!(orm.query().count::<Author>().await.unwrap(), 1);

    let updated: Author = orm
        .query()
        .update_or_create(attrs! { "name" => "grace" }, attrs! { "name" => "grace hopper" })
        .await
        .unwrap();
    assert_eq!(updated.id, created.id);
    assert_eq!(updated.name, "grace hopper");
    assert!(created.id > 0);

    let stored = orm.query().find_or_fail::<Author>(created.id).await.unwrap();
    assert!(updated.updated_at.is_some());
    assert_eq!(updated.updated_at, stored.updated_at);
    assert_ne!(updated.updated_at, created.updated_at);
}

#[tokio::test]
async fn test_soft_delete_by_condition() {
    let orm = setup().await;
    seed(&orm).await;

    let deleted = orm
        .query()
        .where_("title = ?", args!["draft"])
        .delete(&Post::default())
        .await
        .unwrap();
    assert_eq!(deleted, 1);

    let hidden = orm
        .query()
        .where_("title = ?", args!["draft"])
        .first::<Post>()
        .await
        .unwrap();
    assert!(hidden.is_none());

    let trashed = orm
        .query()
        .with_trashed()
        .where_("title = ?", args!["draft"])
        .first::<Post>()
        .await
        .unwrap()
        .unwrap();
    assert!(trashed.deleted_at.is_some());
    assert_eq!(orm.query().count::<Post>().await.unwrap(), 1);
}

#[tokio::test]
async fn test_eager_loading() {
    let orm = setup().await;
    let author = seed(&orm).await;
    orm.query()
        .create(&mut Author {
            name: "no posts".to_string(),
            ..Default::default()
        })
        .await
        .unwrap();

    let authors: Vec<Author> = orm.query().with("posts").get().await.unwrap();
    assert_eq!(authors.len(), 2);
    assert_eq!(authors[0].posts.len(), 2);
    assert!(authors[1].posts.is_empty());

    let published: Vec<Author> = orm
        .query()
        .with_where("posts", "published = ?", args![1])
        .where_eq("id", author.id)
        .get()
        .await
        .unwrap();
    assert_eq!(published[0].posts.len(), 1);
    assert_eq!(published[0].posts[0].title, "notes on the engine");

    orm.query().delete(&author.posts[0]).await.unwrap();
    let mut reloaded = orm.query().find_or_fail::<Author>(author.id).await.unwrap();
    assert!(reloaded.posts.is_empty());
    orm.query().load(&mut reloaded, "posts").await.unwrap();
    assert_eq!(reloaded.posts.len(), 1);
}

#[tokio::test]
async fn test_transaction_commit_and_rollback() {
    let orm = setup().await;

    orm.transaction(|q| async move {
        q.create(&mut Author {
            name: "kept".to_string(),
            ..Default::default()
        })
        .await
    })
    .await
    .unwrap();

    let err = orm
        .transaction(|q| async move {
            q.create(&mut Author {
                name: "discarded".to_string(),
                ..Default::default()
            })
            .await?;
            q.table("missing_table").count_rows().await
        })
        .await
        .unwrap_err();
    assert!(matches!(err, OrmError::Database(_)));

    let panicked = orm
        .transaction(|q| async move {
            q.create(&mut Author {
                name: "also discarded".to_string(),
                ..Default::default()
            })
            .await?;
            if q.in_transaction() {
                panic!("aborting");
            }
            Ok(())
        })
        .await;
    assert!(matches!(panicked, Err(OrmError::Transaction(_))));

    let names: Vec<String> = orm
        .query()
        .get::<Author>()
        .await
        .unwrap()
        .into_iter()
        .map(|a| a.name)
        .collect();
    assert_eq!(names, vec!["kept".to_string()]);
}

#[tokio::test]
async fn test_aggregates_and_pagination() {
    let orm = setup().await;
    let author = seed(&orm).await;

    let total = orm.query().sum::<Post>("published").await.unwrap();
    assert_eq!(total, 1.0);

    let titles = orm
        .query()
        .order_by("title")
        .pluck::<Post>("title")
        .await
        .unwrap();
    assert_eq!(titles.len(), 2);

    let page = orm.query().paginate::<Post>(2, 1).await.unwrap();
    assert_eq!(page.total, 2);
    assert_eq!(page.items.len(), 1);
    assert_eq!(page.items[0].id, author.posts[1].id);

    assert!(orm.query().where_eq("author_id", author.id).exists::<Post>().await.unwrap());
}
