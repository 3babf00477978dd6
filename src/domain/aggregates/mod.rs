//! Aggregates - Consistency boundaries over domain state

mod quota_ledger;

pub use quota_ledger::{QuotaError, QuotaLedger};
