// Application layer - use cases and orchestration.
// LedgerService owns every write; LedgerQueries is the read-only side.

pub mod error;
pub mod queries;
mod retry;
pub mod service;

pub use error::*;
pub use queries::*;
pub use service::*;
