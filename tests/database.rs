mod common;

use common::{create_db, create_flags, setup_env_with, setup_test_env};
use lumodb::{DatabaseConfig, DbFlags, EnvironmentConfig, Error, WriteFlags};

#[test]
fn named_database_round_trip() {
    let (_dir, env) = setup_env_with(EnvironmentConfig::new().max_databases(2));

    let mut txn = env.begin_txn().unwrap();
    let db = txn.open_database(Some("test"), create_flags(), true).unwrap();
    txn.put(&db, b"key1", b"value", WriteFlags::empty()).unwrap();
    txn.commit().unwrap();

    let txn = env.begin_ro_txn().unwrap();
    assert_eq!(txn.get(&db, b"key1").unwrap(), b"value");
    assert_eq!(db.name(), Some("test"));
    assert!(db.is_opened());
}

#[test]
fn opening_missing_database_without_create_fails() {
    let (_dir, env) = setup_test_env();
    let mut txn = env.begin_txn().unwrap();
    let err = txn.open_database(Some("missing"), DatabaseConfig::default(), true).unwrap_err();
    assert_eq!(err, Error::NotFound);
    // The transaction is still usable.
    txn.open_database(Some("present"), create_flags(), true).unwrap();
    txn.commit().unwrap();
}

#[test]
fn handle_from_aborted_transaction_is_rejected() {
    let (_dir, env) = setup_test_env();
    let mut txn = env.begin_txn().unwrap();
    let db = txn.open_database(Some("fleeting"), create_flags(), true).unwrap();
    txn.abort().unwrap();

    let mut txn = env.begin_txn().unwrap();
    assert!(matches!(
        txn.put(&db, b"k", b"v", WriteFlags::empty()),
        Err(Error::InvalidState(_))
    ));
    // Dropping the handle leaves the forgotten slot alone.
    drop(db);
    let db = txn.open_database(Some("fleeting"), create_flags(), true).unwrap();
    txn.put(&db, b"k", b"v", WriteFlags::empty()).unwrap();
    txn.commit().unwrap();
}

#[test]
fn rejects_names_with_nul_bytes() {
    let (_dir, env) = setup_test_env();
    let mut txn = env.begin_txn().unwrap();
    assert!(matches!(
        txn.open_database(Some("bad\0name"), create_flags(), true),
        Err(Error::InvalidArgument(_))
    ));
}

#[test]
fn default_database_has_no_name() {
    let (_dir, env) = setup_test_env();
    let db = create_db(&env, None, DatabaseConfig::default());
    assert_eq!(db.name(), None);
    assert_eq!(db.comparator(), None);
    assert!(db.flags().is_empty());
}

#[test]
fn dropped_database_is_gone() {
    let (_dir, env) = setup_test_env();
    let db = create_db(&env, Some("doomed"), create_flags());
    let mut txn = env.begin_txn().unwrap();
    txn.put(&db, b"k", b"v", WriteFlags::empty()).unwrap();
    txn.commit().unwrap();

    let mut txn = env.begin_txn().unwrap();
    db.drop_in(&mut txn).unwrap();
    assert!(db.is_released());
    assert!(matches!(txn.get(&db, b"k"), Err(Error::InvalidState(_))));
    assert!(matches!(db.drop_in(&mut txn), Err(Error::InvalidState(_))));
    txn.commit().unwrap();

    let mut txn = env.begin_txn().unwrap();
    let err = txn.open_database(Some("doomed"), DatabaseConfig::default(), true).unwrap_err();
    assert_eq!(err, Error::NotFound);
}

#[test]
fn drop_database_through_transaction() {
    let (_dir, env) = setup_test_env();
    let db = create_db(&env, Some("doomed"), create_flags());
    let mut txn = env.begin_txn().unwrap();
    txn.drop_database(&db).unwrap();
    txn.commit().unwrap();
    assert!(!db.is_opened());
}

#[test]
fn truncate_keeps_the_database() {
    let (_dir, env) = setup_test_env();
    let db = create_db(&env, Some("cleared"), create_flags());
    let mut txn = env.begin_txn().unwrap();
    for i in 0..20u32 {
        txn.put(&db, &i.to_be_bytes(), b"payload", WriteFlags::empty()).unwrap();
    }
    txn.commit().unwrap();

    let mut txn = env.begin_txn().unwrap();
    db.truncate(&mut txn).unwrap();
    assert_eq!(txn.entry_count(&db).unwrap(), 0);
    txn.put(&db, b"again", b"1", WriteFlags::empty()).unwrap();
    txn.commit().unwrap();

    let mut txn = env.begin_txn().unwrap();
    assert_eq!(txn.entry_count(&db).unwrap(), 1);
    txn.truncate_database(&db).unwrap();
    txn.commit().unwrap();
    assert!(db.is_opened());
    assert_eq!(env.begin_ro_txn().unwrap().entry_count(&db).unwrap(), 0);
}

#[test]
fn reports_database_stats() {
    let (_dir, env) = setup_test_env();
    let db = create_db(&env, Some("stats"), create_flags());
    let mut txn = env.begin_txn().unwrap();
    for i in 0..100u32 {
        txn.put(&db, &i.to_be_bytes(), &[0u8; 64], WriteFlags::empty()).unwrap();
    }
    let stats = db.stats(&txn).unwrap();
    assert_eq!(stats.entries, 100);
    assert!(stats.depth >= 1);
    assert!(stats.leaf_pages >= 1);
    assert_eq!(stats.overflow_pages, 0);
}

#[test]
fn respects_max_databases() {
    let (_dir, env) = setup_env_with(EnvironmentConfig::new().max_databases(1));
    let _only = create_db(&env, Some("only"), create_flags());

    let mut txn = env.begin_txn().unwrap();
    let err = txn.open_database(Some("second"), create_flags(), true).unwrap_err();
    assert_eq!(err, Error::DbsFull);
}

#[test]
fn handle_survives_aborted_transaction() {
    let (_dir, env) = setup_test_env();
    let db = create_db(&env, Some("sturdy"), create_flags());

    let mut txn = env.begin_txn().unwrap();
    txn.put(&db, b"lost", b"1", WriteFlags::empty()).unwrap();
    txn.abort().unwrap();

    let mut txn = env.begin_txn().unwrap();
    assert!(!txn.contains_key(&db, b"lost").unwrap());
    txn.put(&db, b"kept", b"2", WriteFlags::empty()).unwrap();
    txn.commit().unwrap();
    assert_eq!(env.begin_ro_txn().unwrap().get(&db, b"kept").unwrap(), b"2");
}

#[test]
fn handle_from_another_environment_is_rejected() {
    let (_dir_a, env_a) = setup_test_env();
    let (_dir_b, env_b) = setup_test_env();
    let db = create_db(&env_a, None, DatabaseConfig::default());

    let mut txn = env_b.begin_txn().unwrap();
    assert!(matches!(txn.get(&db, b"k"), Err(Error::InvalidArgument(_))));
    assert!(matches!(
        txn.put(&db, b"k", b"v", WriteFlags::empty()),
        Err(Error::InvalidArgument(_))
    ));
}

#[test]
fn handle_can_be_left_open_on_drop() {
    let (_dir, env) = setup_test_env();
    {
        let mut txn = env.begin_txn().unwrap();
        let db = txn.open_database(Some("kept"), create_flags(), false).unwrap();
        txn.put(&db, b"k", b"v", WriteFlags::empty()).unwrap();
        txn.commit().unwrap();
    }

    let mut txn = env.begin_ro_txn().unwrap();
    let db = txn.open_database(Some("kept"), DatabaseConfig::default(), true).unwrap();
    assert_eq!(txn.get(&db, b"k").unwrap(), b"v");
}

#[test]
fn explicit_close_releases_the_handle() {
    let (_dir, env) = setup_test_env();
    let db = create_db(&env, Some("short"), create_flags());
    db.close();

    let mut txn = env.begin_txn().unwrap();
    let db = txn.open_database(Some("short"), DatabaseConfig::default(), true).unwrap();
    txn.put(&db, b"k", b"v", WriteFlags::empty()).unwrap();
    txn.commit().unwrap();
}

#[test]
fn duplicate_values_can_be_deleted_individually() {
    let (_dir, env) = setup_test_env();
    let config = DatabaseConfig::new(DbFlags::CREATE | DbFlags::DUPSORT);
    let db = create_db(&env, Some("dups"), config);
    assert!(db.flags().contains(DbFlags::DUPSORT));

    let mut txn = env.begin_txn().unwrap();
    txn.put(&db, b"k", b"a", WriteFlags::empty()).unwrap();
    txn.put(&db, b"k", b"b", WriteFlags::empty()).unwrap();
    assert_eq!(
        txn.put(&db, b"k", b"b", WriteFlags::NODUPDATA),
        Err(Error::KeyExist)
    );
    assert_eq!(txn.entry_count(&db).unwrap(), 2);

    txn.delete(&db, b"k", Some(&b"a"[..])).unwrap();
    assert_eq!(txn.delete(&db, b"k", Some(&b"zzz"[..])), Err(Error::NotFound));
    assert_eq!(txn.entry_count(&db).unwrap(), 1);
    assert_eq!(txn.get(&db, b"k").unwrap(), b"b");
    txn.commit().unwrap();
}
