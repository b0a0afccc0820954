// Application layer - validation and orchestration over the storage
// repository. Everything a client needs lives on LedgerService.

pub mod error;
pub mod reporting;
pub mod service;

pub use error::*;
pub use reporting::*;
pub use service::*;
