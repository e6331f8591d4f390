//! # modhost file store
//!
//! [`FileDataStore`] keeps every entry in memory. Entries stored with
//! [`Durability::Persistent`](modhost_protocols::Durability) are also written
//! to a single JSON file, rewritten whole on each persistent change, and read
//! back by [`FileDataStore::open`].

mod file_store;

pub use file_store::FileDataStore;
