pub mod audit;
pub mod charge_provisions;
pub mod deposit_retention;
pub mod documents;
pub mod lease_locks;
pub mod notifications;
pub mod proration;
pub mod provision_ledger;
pub mod regularization;
pub mod scheduler;
