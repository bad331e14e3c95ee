#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use reconcile::{
    ChannelPublisher, EngineSettings, EventPublisher, OutboundEvent, ReconcileError,
    ReconciliationEngine, TransactionCoordinator,
};
use rusqlite::{Connection, params};
use tempfile::TempDir;
use tokio::sync::mpsc;
use usage_core::{Trigger, UsageChanged, UsernameFormat};
use usage_db::{
    CatalogSettings, EMPTY_RESOURCE_HOST, Pool, PoolSettings, install_catalog_schema,
    migrate_record_store, open_connection,
};

pub const ZONE: &str = "iplant";
pub const DOMAIN: &str = "example.com";
pub const STORAGE: i64 = 2;
pub const UNLISTED: i64 = 3;

pub struct TestEngine {
    pub _dir: TempDir,
    pub engine: ReconciliationEngine,
    pub events: mpsc::Receiver<OutboundEvent>,
    pub catalog: Connection,
    pub record: Connection,
}

impl TestEngine {
    pub fn drain(&mut self) -> Vec<OutboundEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            events.push(event);
        }
        events
    }
}

pub fn settings() -> EngineSettings {
    EngineSettings {
        batch_size: 2,
        batch_jitter: false,
        single_user_timeout: Duration::from_secs(10),
        batch_timeout: Duration::from_secs(10),
        partition_timeout: Duration::from_secs(10),
        ..EngineSettings::default()
    }
}

pub fn setup_engine() -> TestEngine {
    setup_engine_with(settings())
}

pub fn setup_engine_with(settings: EngineSettings) -> TestEngine {
    let (publisher, events) = ChannelPublisher::channel(256);
    let (dir, coordinator, catalog, record) = stores();
    let engine = ReconciliationEngine::new(
        coordinator,
        CatalogSettings::default(),
        UsernameFormat::new(DOMAIN),
        Arc::new(publisher),
        settings,
    );
    TestEngine {
        _dir: dir,
        engine,
        events,
        catalog,
        record,
    }
}

pub fn setup_engine_with_publisher(publisher: Arc<dyn EventPublisher>) -> (TempDir, ReconciliationEngine, Connection) {
    let (dir, coordinator, catalog, _record) = stores();
    let engine = ReconciliationEngine::new(
        coordinator,
        CatalogSettings::default(),
        UsernameFormat::new(DOMAIN),
        publisher,
        settings(),
    );
    (dir, engine, catalog)
}

fn stores() -> (TempDir, TransactionCoordinator, Connection, Connection) {
    let dir = tempfile::tempdir().expect("temp dir");
    let catalog_path = dir.path().join("catalog.sqlite");
    let record_path = dir.path().join("record.sqlite");
    let mut catalog = open_connection(&catalog_path).expect("open catalog");
    install_catalog_schema(&mut catalog).expect("catalog schema");
    catalog
        .execute_batch(&format!(
            "INSERT INTO r_resc_main (resc_id, resc_name, resc_net, resc_parent) VALUES \
             (1, 'mainIngestRes', '{empty}', ''), \
             ({storage}, 'ingestStorage', 'storage1.example.com', '1'), \
             ({unlisted}, 'archiveRes', 'storage2.example.com', '');",
            empty = EMPTY_RESOURCE_HOST,
            storage = STORAGE,
            unlisted = UNLISTED,
        ))
        .expect("resources");
    let mut record = open_connection(&record_path).expect("open record");
    migrate_record_store(&mut record).expect("migrate record");

    let coordinator = TransactionCoordinator::new(
        Pool::open("catalog", catalog_path, PoolSettings::default()),
        Pool::open("record", record_path, PoolSettings::default()),
    );
    (dir, coordinator, catalog, record)
}

pub fn add_user(conn: &Connection, name: &str) {
    conn.execute(
        "INSERT INTO r_user_main (user_name, zone_name, user_type_name) VALUES (?1, ?2, 'rodsuser')",
        params![name, ZONE],
    )
    .expect("insert user");
}

pub fn add_data(conn: &Connection, user: &str, resc_id: i64, size: i64) {
    let collection = format!("/{}/home/{}", ZONE, user);
    conn.execute(
        "INSERT OR IGNORE INTO r_coll_main (coll_name) VALUES (?1)",
        params![collection],
    )
    .expect("collection");
    conn.execute(
        "INSERT INTO r_data_main (data_id, coll_id, resc_id, data_name, data_size) \
         SELECT (SELECT COUNT(*) + 1 FROM r_data_main), coll_id, ?2, 'file', ?3 \
         FROM r_coll_main WHERE coll_name = ?1",
        params![collection, resc_id, size],
    )
    .expect("data");
}

pub fn clear_data(conn: &Connection, user: &str) {
    conn.execute(
        "DELETE FROM r_data_main WHERE coll_id IN \
         (SELECT coll_id FROM r_coll_main WHERE coll_name = ?1)",
        params![format!("/{}/home/{}", ZONE, user)],
    )
    .expect("clear data");
}

pub fn add_record_user(conn: &Connection, qualified: &str) {
    conn.execute("INSERT INTO users (username) VALUES (?1)", params![qualified])
        .expect("record user");
}

pub fn usage_changes(events: &[OutboundEvent]) -> Vec<UsageChanged> {
    events
        .iter()
        .filter_map(|event| match event {
            OutboundEvent::UsageChanged(changed) => Some(changed.clone()),
            OutboundEvent::Trigger(_) => None,
        })
        .collect()
}

pub fn triggers(events: &[OutboundEvent]) -> Vec<Trigger> {
    events
        .iter()
        .filter_map(|event| match event {
            OutboundEvent::Trigger(trigger) => Some(trigger.clone()),
            OutboundEvent::UsageChanged(_) => None,
        })
        .collect()
}

/// Rejects every `fail_every`-th trigger and records the rest.
pub struct FlakyPublisher {
    pub fail_every: usize,
    pub published: Mutex<Vec<Trigger>>,
    attempts: Mutex<usize>,
}

impl FlakyPublisher {
    pub fn new(fail_every: usize) -> Self {
        Self {
            fail_every,
            published: Mutex::new(Vec::new()),
            attempts: Mutex::new(0),
        }
    }
}

#[async_trait]
impl EventPublisher for FlakyPublisher {
    async fn publish_trigger(&self, trigger: &Trigger) -> reconcile::Result<()> {
        let attempt = {
            let mut attempts = self.attempts.lock().expect("attempts");
            *attempts += 1;
            *attempts
        };
        if attempt % self.fail_every == 0 {
            return Err(ReconcileError::Publish(format!("attempt {} rejected", attempt)));
        }
        self.published.lock().expect("published").push(trigger.clone());
        Ok(())
    }

    async fn publish_usage_changed(&self, _event: &UsageChanged) -> reconcile::Result<()> {
        Ok(())
    }
}
