mod common;

use common::TestContext;
use dealer_inventory::db::{self, DbConfig};

#[tokio::test]
async fn connection_check_passes_on_live_pool() {
    let ctx = TestContext::new().await;
    assert!(db::check_connection(&ctx.db).await.is_ok());
}

#[tokio::test]
async fn unreachable_database_fails_to_connect() {
    let config = DbConfig {
        url: "sqlite:///nonexistent-dir/inventory.db?mode=ro".to_string(),
        max_connections: 1,
        ..DbConfig::default()
    };
    assert!(db::establish_connection_with_config(&config).await.is_err());
}
