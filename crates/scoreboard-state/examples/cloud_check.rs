//! Remote store smoke check: connect with SURREALDB_* credentials,
//! run the migrations and print what the store holds.
//!
//! Run with: cargo run --package scoreboard-state --example cloud_check

use scoreboard_state::{CloudConfig, ScoreStore, SurrealScoreStore};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    let config = match CloudConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("✗ Missing environment variables: {}", e);
            std::process::exit(1);
        }
    };
    println!("Checking {} ({}/{})", config.endpoint, config.namespace, config.database);

    let store = match SurrealScoreStore::connect_cloud(&config).await {
        Ok(store) => store,
        Err(e) => {
            eprintln!("✗ Connection failed: {}", e);
            std::process::exit(1);
        }
    };
    println!("✓ Connected, schema ready");

    match tokio::try_join!(store.teams(), store.targets(), store.ledger_entries(None)) {
        Ok((teams, targets, entries)) => println!(
            "✓ {} teams, {} targets, {} ledger entries",
            teams.len(),
            targets.len(),
            entries.len()
        ),
        Err(e) => {
            eprintln!("✗ Read failed: {}", e);
            std::process::exit(1);
        }
    }
}
