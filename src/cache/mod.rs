//! Shared-cache admission.

mod admission;

pub use admission::{CacheAdmissionPolicy, CacheDecision};
