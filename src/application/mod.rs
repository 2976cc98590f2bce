//! Application layer orchestrating the domain.
//!
//! [`engine::NodeEngine`] is the composition root: it owns the
//! [`registry::NodeRegistry`], the [`scheduler::Scheduler`] and a
//! [`ledger_client::LedgerClient`] per configured ledger.

pub mod engine;
pub mod ledger_client;
pub mod registry;
pub mod scheduler;
