mod helpers;

use circles::db;
use circles::db::migrations::{
    get_embedding_signature, get_schema_version, run_migrations, set_embedding_signature,
    EmbeddingSignature, CURRENT_SCHEMA_VERSION,
};

#[test]
fn fresh_db_migrates_to_current_version() {
    let conn = helpers::test_db();
    assert_eq!(get_schema_version(&conn).unwrap(), CURRENT_SCHEMA_VERSION);
}

#[test]
fn migration_records_embedding_signature() {
    let conn = helpers::test_db();
    let signature = get_embedding_signature(&conn).unwrap();
    assert_eq!(
        signature,
        Some(EmbeddingSignature {
            provider: "hashing".into(),
            dimension: 384,
        })
    );
}

#[test]
fn migrations_are_idempotent() {
    let mut conn = helpers::test_db();
    run_migrations(&mut conn).unwrap();
    assert_eq!(get_schema_version(&conn).unwrap(), CURRENT_SCHEMA_VERSION);
}

#[test]
fn manual_v1_db_upgrades_correctly() {
    let mut conn = rusqlite::Connection::open_in_memory().unwrap();
    conn.pragma_update(None, "foreign_keys", "ON").unwrap();
    db::schema::init_schema(&conn).unwrap();

    assert_eq!(get_schema_version(&conn).unwrap(), 1);
    assert!(get_embedding_signature(&conn).unwrap().is_none());

    run_migrations(&mut conn).unwrap();

    assert_eq!(get_schema_version(&conn).unwrap(), 2);
    assert!(get_embedding_signature(&conn).unwrap().is_some());
}

#[test]
fn signature_can_be_replaced() {
    let conn = helpers::test_db();
    let next = EmbeddingSignature {
        provider: "table".into(),
        dimension: 384,
    };
    set_embedding_signature(&conn, &next).unwrap();
    assert_eq!(get_embedding_signature(&conn).unwrap(), Some(next));
}

#[test]
fn open_database_creates_parent_dirs() {
    let tmp = tempfile::TempDir::new().unwrap();
    let path = tmp.path().join("nested").join("dir").join("circles.db");
    let conn = db::open_database(&path).unwrap();
    assert!(path.exists());
    assert_eq!(get_schema_version(&conn).unwrap(), CURRENT_SCHEMA_VERSION);
}
