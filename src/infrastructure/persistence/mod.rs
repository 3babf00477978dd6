//! Persistence adapters - Ledger and event log storage

mod factory;
mod memory_event_store;
mod memory_ledger;
mod sqlite_event_repository;
mod sqlite_ledger;

pub use factory::StorageFactory;
pub use memory_event_store::InMemoryStorageEventRepository;
pub use memory_ledger::InMemoryQuotaLedger;
pub use sqlite_event_repository::SqliteStorageEventRepository;
pub use sqlite_ledger::SqliteQuotaLedgerRepository;
