use std::sync::Arc;

use reconcile::LogPublisher;
use rusqlite::params;
use tempfile::tempdir;
use usage_app::{AppConfig, AppError, AppState, setup_catalog_fixture};
use usage_db::open_connection;

fn config_in(dir: &std::path::Path) -> AppConfig {
    let mut config = AppConfig::default();
    config.record.path = dir.join("stores").join("record.sqlite");
    config.catalog.path = dir.join("stores").join("catalog.sqlite");
    config.reconcile.batch_jitter = false;
    config
}

fn seed_catalog(path: &std::path::Path) {
    let conn = open_connection(path).expect("open catalog");
    conn.execute_batch(
        "INSERT INTO r_resc_main (resc_id, resc_name, resc_net, resc_parent) VALUES \
         (1, 'mainReplRes', 'storage.example.com', '');",
    )
    .expect("resource");
    for (idx, name) in ["ann", "bea", "cy"].iter().enumerate() {
        conn.execute(
            "INSERT INTO r_user_main (user_name, zone_name, user_type_name) VALUES (?1, 'iplant', 'rodsuser')",
            params![name],
        )
        .expect("user");
        conn.execute(
            "INSERT INTO r_coll_main (coll_name) VALUES (?1)",
            params![format!("/iplant/home/{}", name)],
        )
        .expect("collection");
        conn.execute(
            "INSERT INTO r_data_main (data_id, coll_id, resc_id, data_name, data_size) \
             SELECT ?1, coll_id, 1, 'file', ?2 FROM r_coll_main WHERE coll_name = ?3",
            params![idx as i64 + 1, (idx as i64 + 1) * 100, format!("/iplant/home/{}", name)],
        )
        .expect("data");
    }
}

#[tokio::test]
async fn state_reconciles_and_reads_back() {
    let dir = tempdir().expect("temp dir");
    let config = config_in(dir.path());
    let state = AppState::new(config, Arc::new(LogPublisher)).expect("state");
    state.initialize().expect("initialize");
    setup_catalog_fixture(&state.config.catalog.path).expect("catalog");
    seed_catalog(&state.config.catalog.path);

    let records = state
        .services
        .reconcile
        .batch("ann", "cy")
        .await
        .expect("batch");
    assert_eq!(records.len(), 3);

    let current = state.services.usage.current("bea").await.expect("current");
    assert_eq!(current.username, "bea@example.com");
    assert_eq!(current.total, 200);

    state.services.reconcile.user("bea").await.expect("user");
    let history = state.services.usage.history("bea").await.expect("history");
    assert_eq!(history.len(), 2);
    assert!(history.iter().all(|record| record.total == 200));

    let bounds = state
        .services
        .reconcile
        .partition(Some(2))
        .await
        .expect("partition");
    assert_eq!(bounds.len(), 2);
    state.close();
}

#[tokio::test]
async fn invalid_requests_are_rejected_before_touching_stores() {
    let dir = tempdir().expect("temp dir");
    let state = AppState::new(config_in(dir.path()), Arc::new(LogPublisher)).expect("state");

    assert!(matches!(
        state.services.usage.current("  ").await,
        Err(AppError::InvalidInput(_))
    ));
    assert!(matches!(
        state.services.reconcile.batch("zed", "amy").await,
        Err(AppError::InvalidInput(_))
    ));
    assert!(matches!(
        state.services.reconcile.partition(Some(0)).await,
        Err(AppError::InvalidInput(_))
    ));
}

#[test]
fn invalid_config_is_refused() {
    let mut config = AppConfig::default();
    config.users.domain = String::new();
    assert!(matches!(
        AppState::new(config, Arc::new(LogPublisher)),
        Err(AppError::Config(_))
    ));
}
