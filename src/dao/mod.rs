/// Key-value store contract and its backends.
pub mod kv_store;
/// Persisted entity definitions.
pub mod models;
/// Storage abstraction layer for database operations.
pub mod storage;
/// Tracker snapshot persistence.
pub mod tracker_repository;
