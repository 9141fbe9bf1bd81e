//! Standard sync primitives, swappable for `shuttle`'s checked variants in
//! concurrency tests.

#[cfg(all(shuttle, test))]
pub(crate) use shuttle::{sync::*, thread};

#[cfg(not(all(shuttle, test)))]
pub(crate) use std::sync::*;
