//! The scheduler's working set: the tiered request queue, the request
//! registry that owns every job record, and the isolated worker slots that
//! run one compiler process at a time.

mod pool;
mod request_queue;
mod request_registry;
mod worker;

pub use pool::*;
pub use request_queue::*;
pub use request_registry::*;
pub use worker::*;
