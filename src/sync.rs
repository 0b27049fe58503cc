//! Atomic types used by [`crate::ring`], routed through `loom` under
//! `cfg(loom)` so the reserve/commit/readable/advance protocol can be
//! exhaustively model-checked (`cargo test --cfg loom`), and through
//! `std::sync::atomic` otherwise. Ordinary builds never pay for loom.

#[cfg(loom)]
pub use loom::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

#[cfg(not(loom))]
pub use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
