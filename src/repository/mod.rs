pub mod charge_store;
#[cfg(test)]
pub mod memory_store;
pub mod pg_store;
pub mod table_service;
