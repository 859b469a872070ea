mod common;

use common::{create_db, create_flags, setup_env_with, setup_test_env, MAP_SIZE};
use lumodb::{
    version, DatabaseConfig, EnvFlags, Environment, EnvironmentConfig, Error, TransactionState,
    WriteFlags, DEFAULT_FILE_MODE,
};
use tempfile::TempDir;

#[test]
fn reports_environment_info() {
    let (_dir, env) = setup_test_env();
    let before = env.info().unwrap();
    assert_eq!(before.mapsize, MAP_SIZE);
    assert_eq!(env.map_size(), MAP_SIZE);

    let db = create_db(&env, None, DatabaseConfig::default());
    let mut txn = env.begin_txn().unwrap();
    txn.put(&db, b"k", b"v", WriteFlags::empty()).unwrap();
    txn.commit().unwrap();

    let after = env.info().unwrap();
    assert!(after.last_txnid > before.last_txnid);
    assert!(after.last_pgno >= before.last_pgno);
}

#[test]
fn config_is_applied_before_open() {
    let config = EnvironmentConfig::new()
        .map_size(MAP_SIZE)
        .max_databases(2)
        .max_readers(3);
    let (_dir, env) = setup_env_with(config);
    assert_eq!(env.map_size(), MAP_SIZE);
    assert_eq!(env.max_databases(), 2);
    assert_eq!(env.max_readers().unwrap(), 3);
    assert!(env.max_key_size() > 0);
}

#[test]
fn limits_are_frozen_after_open() {
    let (_dir, mut env) = setup_test_env();
    assert!(matches!(env.set_max_databases(8), Err(Error::InvalidState(_))));
    assert!(matches!(env.set_max_readers(8), Err(Error::InvalidState(_))));
    // The map may still grow while no transaction is active.
    env.set_map_size(2 * MAP_SIZE).unwrap();
    assert_eq!(env.map_size(), 2 * MAP_SIZE);
}

#[test]
fn setters_work_before_open() {
    let dir = TempDir::new().unwrap();
    let mut env = Environment::new().unwrap();
    env.set_map_size(MAP_SIZE).unwrap();
    env.set_max_databases(5).unwrap();
    env.set_max_readers(16).unwrap();
    assert_eq!(env.map_size(), MAP_SIZE);
    assert!(!env.is_opened());

    env.open(dir.path(), EnvFlags::empty(), DEFAULT_FILE_MODE).unwrap();
    assert!(env.is_opened());
    assert_eq!(env.path().as_deref(), Some(dir.path()));
    assert_eq!(env.max_databases(), 5);
    assert_eq!(env.max_readers().unwrap(), 16);
}

#[test]
fn opens_only_once() {
    let (dir, mut env) = setup_test_env();
    let err = env.open(dir.path(), EnvFlags::empty(), DEFAULT_FILE_MODE);
    assert!(matches!(err, Err(Error::InvalidState(_))));
}

#[test]
fn failed_open_can_be_retried() {
    let dir = TempDir::new().unwrap();
    let mut env = Environment::with_config(EnvironmentConfig::new().max_databases(2)).unwrap();

    // A read-only open cannot create the data file.
    let err = env.open(dir.path(), EnvFlags::RDONLY, DEFAULT_FILE_MODE).unwrap_err();
    assert!(err.is_engine());
    assert!(!env.is_opened());

    env.open(dir.path(), EnvFlags::empty(), DEFAULT_FILE_MODE).unwrap();
    create_db(&env, Some("named"), create_flags());
}

#[test]
fn creates_missing_directory() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("nested").join("env");
    let mut env = Environment::new().unwrap();
    env.open(&path, EnvFlags::empty(), DEFAULT_FILE_MODE).unwrap();
    assert!(path.join("data.mdb").exists());
}

#[test]
fn transaction_before_open_is_rejected() {
    let env = Environment::new().unwrap();
    assert!(matches!(env.begin_txn(), Err(Error::InvalidState(_))));
    assert!(matches!(env.info(), Err(Error::InvalidState(_))));
}

#[test]
fn copies_environment() {
    for compact in [false, true] {
        let (_dir, env) = setup_test_env();
        let db = create_db(&env, None, DatabaseConfig::default());
        let mut txn = env.begin_txn().unwrap();
        txn.put(&db, b"key", b"value", WriteFlags::empty()).unwrap();
        txn.commit().unwrap();

        let backup = TempDir::new().unwrap();
        let dest = backup.path().join("copy");
        env.copy_to(&dest, compact).unwrap();
        assert!(dest.join("data.mdb").exists(), "compact: {}", compact);

        let mut copy = Environment::new().unwrap();
        copy.open(&dest, EnvFlags::empty(), DEFAULT_FILE_MODE).unwrap();
        let mut txn = copy.begin_ro_txn().unwrap();
        let db = txn.open_database(None, DatabaseConfig::default(), true).unwrap();
        assert_eq!(txn.get(&db, b"key").unwrap(), b"value");
    }
}

#[test]
fn reports_main_database_stat() {
    let (_dir, env) = setup_test_env();
    let stat = env.stat().unwrap();
    assert_eq!(stat.entries, 0);
    assert!(stat.psize > 0);

    create_db(&env, Some("named"), create_flags());
    // Named databases are records of the main database.
    assert_eq!(env.stat().unwrap().entries, 1);
    env.sync(true).unwrap();
}

#[test]
fn can_load_and_drop_multiple_environments() {
    for _ in 0..3 {
        let (_dir, env) = setup_test_env();
        assert!(env.is_opened());
    }
}

#[test]
fn close_aborts_active_transactions() {
    let (_dir, mut env) = setup_test_env();
    let db = create_db(&env, None, DatabaseConfig::default());
    let mut txn = env.begin_txn().unwrap();
    // Large enough to live in the transaction's own overflow pages.
    txn.put(&db, b"big", &vec![7u8; 1 << 20], WriteFlags::empty()).unwrap();
    let mut reader = env.begin_ro_txn().unwrap();
    reader.reset().unwrap();
    let view = txn.get(&db, b"big").unwrap();

    env.close();
    assert!(!env.is_opened());
    assert_eq!(txn.state(), TransactionState::Aborted);
    assert_eq!(reader.state(), TransactionState::Aborted);
    assert!(matches!(txn.get(&db, b"key"), Err(Error::InvalidState(_))));
    assert!(matches!(reader.renew(), Err(Error::InvalidState(_))));

    // Values read before the close stay readable until the transaction goes.
    assert_eq!(view.len(), 1 << 20);
    assert!(view.iter().all(|&b| b == 7));
    drop(txn);

    // Closing again is harmless, and nothing can be started any more.
    env.close();
    assert!(matches!(env.begin_ro_txn(), Err(Error::InvalidState(_))));
}

#[test]
fn close_leaves_finished_transactions_alone() {
    let (_dir, mut env) = setup_test_env();
    let mut txn = env.begin_txn().unwrap();
    txn.commit().unwrap();
    env.close();
    assert_eq!(txn.state(), TransactionState::Committed);
}

#[test]
fn reports_engine_version() {
    let info = version();
    assert_eq!((info.major, info.minor), (0, 9));
    assert!(!info.version.is_empty());
}
