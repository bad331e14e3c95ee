#![allow(dead_code)]

use std::path::PathBuf;

use chrono::{DateTime, Duration, TimeZone, Utc};
use rusqlite::{Connection, params};
use tempfile::TempDir;
use usage_core::UsernameFormat;
use usage_db::{
    CatalogSettings, EMPTY_RESOURCE_HOST, install_catalog_schema, migrate_record_store,
    open_connection,
};

pub const ZONE: &str = "iplant";
pub const DOMAIN: &str = "example.com";

pub const INGEST_ROOT: i64 = 1;
pub const INGEST_STORAGE: i64 = 2;
pub const REPL_ROOT: i64 = 3;
pub const UNLISTED_ROOT: i64 = 4;
pub const BUNDLE_ROOT: i64 = 5;

pub struct TestStores {
    pub _dir: TempDir,
    pub catalog: Connection,
    pub record: Connection,
    pub catalog_path: PathBuf,
    pub record_path: PathBuf,
}

pub fn setup_stores() -> TestStores {
    let dir = tempfile::tempdir().expect("temp dir");
    let catalog_path = dir.path().join("catalog.sqlite");
    let record_path = dir.path().join("record.sqlite");
    let mut catalog = open_connection(&catalog_path).expect("open catalog");
    install_catalog_schema(&mut catalog).expect("catalog schema");
    install_resources(&catalog);
    let mut record = open_connection(&record_path).expect("open record");
    migrate_record_store(&mut record).expect("migrate record");
    TestStores {
        _dir: dir,
        catalog,
        record,
        catalog_path,
        record_path,
    }
}

pub fn settings() -> CatalogSettings {
    CatalogSettings {
        zone: ZONE.to_string(),
        ..CatalogSettings::default()
    }
}

pub fn users() -> UsernameFormat {
    UsernameFormat::new(DOMAIN)
}

/// `mainIngestRes` is a routing node whose child holds the bytes,
/// `mainReplRes` stores directly, `archiveRes` is not allow-listed.
fn install_resources(conn: &Connection) {
    add_resource(conn, INGEST_ROOT, "mainIngestRes", EMPTY_RESOURCE_HOST, "");
    add_resource(
        conn,
        INGEST_STORAGE,
        "ingestStorage",
        "storage1.example.com",
        &INGEST_ROOT.to_string(),
    );
    add_resource(conn, REPL_ROOT, "mainReplRes", "storage2.example.com", "");
    add_resource(conn, UNLISTED_ROOT, "archiveRes", "storage3.example.com", "");
    add_resource(conn, BUNDLE_ROOT, "bundleResc", "storage4.example.com", "");
}

pub fn add_resource(conn: &Connection, id: i64, name: &str, net: &str, parent: &str) {
    conn.execute(
        "INSERT INTO r_resc_main (resc_id, resc_name, resc_net, resc_parent) VALUES (?1, ?2, ?3, ?4)",
        params![id, name, net, parent],
    )
    .expect("insert resource");
}

pub fn add_user(conn: &Connection, name: &str) {
    add_user_of_type(conn, name, "rodsuser");
}

pub fn add_user_of_type(conn: &Connection, name: &str, user_type: &str) {
    conn.execute(
        "INSERT INTO r_user_main (user_name, zone_name, user_type_name) VALUES (?1, ?2, ?3)",
        params![name, ZONE, user_type],
    )
    .expect("insert user");
}

pub fn add_collection(conn: &Connection, path: &str) -> i64 {
    conn.execute(
        "INSERT OR IGNORE INTO r_coll_main (coll_name) VALUES (?1)",
        params![path],
    )
    .expect("insert collection");
    conn.query_row(
        "SELECT coll_id FROM r_coll_main WHERE coll_name = ?1",
        params![path],
        |row| row.get(0),
    )
    .expect("collection id")
}

pub fn add_data(conn: &Connection, collection: &str, resc_id: i64, size: i64) {
    let coll_id = add_collection(conn, collection);
    let data_id: i64 = conn
        .query_row("SELECT COUNT(*) + 1 FROM r_data_main", [], |row| row.get(0))
        .expect("next data id");
    conn.execute(
        "INSERT INTO r_data_main (data_id, coll_id, resc_id, data_name, data_size) \
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![data_id, coll_id, resc_id, format!("file{}", data_id), size],
    )
    .expect("insert data");
}

pub fn remove_data_under(conn: &Connection, prefix: &str) {
    conn.execute(
        "DELETE FROM r_data_main WHERE coll_id IN \
         (SELECT coll_id FROM r_coll_main WHERE coll_name = ?1 OR coll_name LIKE ?1 || '/%')",
        params![prefix],
    )
    .expect("delete data");
}

pub fn home(user: &str) -> String {
    format!("/{}/home/{}", ZONE, user)
}

pub fn at(minutes: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 10, 1, 12, 0, 0)
        .single()
        .expect("base time")
        + Duration::minutes(minutes)
}

pub fn user_count(conn: &Connection) -> i64 {
    conn.query_row("SELECT COUNT(*) FROM users", [], |row| row.get(0))
        .expect("count users")
}

pub fn usage_row_count(conn: &Connection) -> i64 {
    conn.query_row("SELECT COUNT(*) FROM user_data_usage", [], |row| row.get(0))
        .expect("count usage rows")
}
