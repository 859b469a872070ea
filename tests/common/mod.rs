#![allow(dead_code)]

use std::cmp::Ordering;

use lumodb::{
    Database, DatabaseConfig, DbFlags, EnvFlags, Environment, EnvironmentConfig, KeyComparator,
    DEFAULT_FILE_MODE,
};
use tempfile::TempDir;

pub const MAP_SIZE: usize = 10 * 1024 * 1024;

// Common test setup
pub fn setup_test_env() -> (TempDir, Environment) {
    setup_env_with(EnvironmentConfig::new().map_size(MAP_SIZE).max_databases(4))
}

/// Several tests hold more than one read-only transaction on a thread, which
/// needs NOTLS.
pub fn setup_env_with(config: EnvironmentConfig) -> (TempDir, Environment) {
    let temp_dir = TempDir::new().unwrap();
    let mut env = Environment::with_config(config).unwrap();
    env.open(temp_dir.path(), EnvFlags::NOTLS, DEFAULT_FILE_MODE).unwrap();
    (temp_dir, env)
}

/// Open (creating if needed) a named database and commit so the handle
/// outlives the setup transaction.
pub fn create_db(env: &Environment, name: Option<&str>, config: DatabaseConfig) -> Database {
    let mut txn = env.begin_txn().unwrap();
    let db = txn.open_database(name, config, true).unwrap();
    txn.commit().unwrap();
    db
}

pub fn create_flags() -> DatabaseConfig {
    DatabaseConfig::new(DbFlags::CREATE)
}

/// Orders 4-byte keys as little-endian unsigned integers.
pub struct LittleEndianU32;

impl KeyComparator for LittleEndianU32 {
    fn compare(a: &[u8], b: &[u8]) -> Ordering {
        read_u32(a).cmp(&read_u32(b))
    }
}

pub fn read_u32(bytes: &[u8]) -> u32 {
    u32::from_le_bytes(bytes.try_into().expect("4-byte key"))
}
