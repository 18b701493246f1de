//! Pacing primitives for human-plausible outbound messaging.
//!
//! Provides the randomized delay model, the process-wide outbound rate
//! limiter, the response splitter, and the per-counterparty inbound gate used
//! by the delivery scheduler in `mentor-delivery`.
//!
//! ```rust
//! use mentor_pacing::{split_response, DEFAULT_MAX_PART_CHARS, DEFAULT_SPLIT_MARKER};
//!
//! let parts = split_response(
//!     "hello---SPLIT---how are you?",
//!     DEFAULT_SPLIT_MARKER,
//!     DEFAULT_MAX_PART_CHARS,
//! );
//! assert_eq!(parts, vec!["hello".to_string(), "how are you?".to_string()]);
//! ```

pub mod human_timing;
pub mod inbound_gate;
pub mod message_splitter;
pub mod outbound_rate_limiter;

pub use human_timing::*;
pub use inbound_gate::*;
pub use message_splitter::*;
pub use outbound_rate_limiter::*;

use std::sync::{Mutex, MutexGuard};

pub(crate) fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
