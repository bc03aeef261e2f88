//! Integration tests for SurrealDB schema initialization
//!
//! Runs the migrations against the `mem://` engine and checks the
//! constraints the settlement engine depends on.

use scoreboard_state::migrations::init_schema;
use surrealdb::engine::any::Any;
use surrealdb::Surreal;

async fn fresh_db() -> Surreal<Any> {
    let db = surrealdb::engine::any::connect("mem://").await.unwrap();
    db.use_ns("scoreboard").use_db("test").await.unwrap();
    db
}

#[tokio::test]
async fn init_schema_is_idempotent() {
    let db = fresh_db().await;
    init_schema(&db).await.unwrap();
    init_schema(&db).await.unwrap();
}

#[tokio::test]
async fn settled_round_index_is_unique() {
    let db = fresh_db().await;
    init_schema(&db).await.unwrap();

    db.query("CREATE settled_rounds CONTENT { round: 1, entry_count: 0 }")
        .await
        .unwrap()
        .check()
        .unwrap();

    let second = db
        .query("CREATE settled_rounds CONTENT { round: 1, entry_count: 3 }")
        .await
        .unwrap()
        .check();
    assert!(second.is_err(), "second marker for round 1 must be rejected");
}

#[tokio::test]
async fn failed_transaction_leaves_no_entries() {
    let db = fresh_db().await;
    init_schema(&db).await.unwrap();

    db.query("CREATE settled_rounds CONTENT { round: 2, entry_count: 0 }")
        .await
        .unwrap()
        .check()
        .unwrap();

    let result = db
        .query(
            "BEGIN TRANSACTION;
             CREATE score_entries CONTENT { team_id: 1, target_id: 1, round: 2, reason: 'attack', delta: 10.0 };
             CREATE settled_rounds CONTENT { round: 2, entry_count: 1 };
             COMMIT TRANSACTION;",
        )
        .await
        .unwrap()
        .check();
    assert!(result.is_err());

    let mut res = db.query("SELECT VALUE delta FROM score_entries").await.unwrap();
    let deltas: Vec<f64> = res.take(0).unwrap();
    assert!(deltas.is_empty());
}
