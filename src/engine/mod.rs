//! Task engine: dedup guard, registry, executor, janitor.

pub mod executor;
pub mod guard;
pub mod janitor;
pub mod registry;

pub use executor::{Executor, FailureReport, Work, flatten_result, into_work};
pub use guard::{Admission, DedupEntry, Guard, Policy};
pub use janitor::{Janitor, JanitorConfig};
pub use registry::Registry;
