//! Serve command - runs the governance engine HTTP server

use agent_warden::config;
use agent_warden::db::Database;
use agent_warden::web;
use std::path::Path;
use tracing::{info, warn};

pub async fn run(port: u16, db_path: &str, seed_path: &str) -> anyhow::Result<()> {
    let db = Database::open(Path::new(db_path))?;

    // First boot only: seed rules, audience sizes, and risk weights
    let seed = Path::new(seed_path);
    if seed.exists() {
        if config::bootstrap(&db, Some(seed))? {
            info!("🌱 Seeded configuration from {}", seed_path);
        }
    } else {
        if config::bootstrap(&db, None)? {
            warn!("⚠️  No seed file at {}, starting with default risk config", seed_path);
        }
    }
    drop(db);

    web::start_server(port, db_path.to_string()).await
}
