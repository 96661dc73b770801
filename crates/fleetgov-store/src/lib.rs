//! Fleet governance persistence.
//!
//! Every mutation of governed state is expressed as a [`WriteBatch`]: a set
//! of preconditions (optimistic version checks, uniqueness of the pending
//! proposal per entity) plus the row writes and audit entries that belong to
//! one logical change. Backends commit a batch atomically, so an activation
//! that fails part-way leaves no trace.
//!
//! Two backends are provided:
//!
//! - [`InMemoryGovernanceStore`] for tests and local development
//! - `PostgresGovernanceStore` behind the `postgres` feature

#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]
#![deny(unsafe_code)]
#![warn(rust_2018_idioms)]

pub mod batch;
mod error;
pub mod memory;
#[cfg(feature = "postgres")]
pub mod postgres;
mod traits;

pub use batch::{Precondition, Write, WriteBatch};
pub use error::{StoreError, StoreResult};
pub use memory::InMemoryGovernanceStore;
#[cfg(feature = "postgres")]
pub use postgres::PostgresGovernanceStore;
pub use traits::GovernanceStore;
