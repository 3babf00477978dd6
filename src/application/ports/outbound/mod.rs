//! Outbound ports - Interfaces that the application requires from external systems

mod event_bus_port;
mod quota_ledger_port;
mod storage_event_port;

pub use event_bus_port::EventBusPort;
pub use quota_ledger_port::{LedgerError, QuotaLedgerPort};
pub use storage_event_port::{EventStoreError, RecordedEvent, StorageEventRepositoryPort};

#[cfg(test)]
pub use quota_ledger_port::MockQuotaLedgerPort;
#[cfg(test)]
pub use storage_event_port::MockStorageEventRepositoryPort;
