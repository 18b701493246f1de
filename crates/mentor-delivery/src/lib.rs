//! Paced outbound delivery for one-to-one conversations.
//!
//! The [`DeliveryScheduler`] admits inbound messages, simulates reading,
//! thinking and typing, and delivers generated responses part by part under
//! the shared [`mentor_pacing::OutboundRateLimiter`]. The greeting queue
//! serializes first-contact outreach through the same send path, and
//! [`DeliveryRuntime`] owns the background tasks so shutdown can cancel them.
//!
//! Platform access and response generation are collaborators behind the
//! [`MessagingPlatform`] and [`ResponseGenerator`] traits.

pub mod delivery_runtime;
pub mod delivery_scheduler;
pub mod greeting_queue;
pub mod interrupt_flags;
pub mod known_counterparties;
pub mod platform;
pub mod response_generator;
pub mod typing_keepalive;

#[cfg(test)]
mod test_support;

pub use delivery_runtime::*;
pub use delivery_scheduler::*;
pub use greeting_queue::*;
pub use interrupt_flags::*;
pub use known_counterparties::*;
pub use platform::*;
pub use response_generator::*;
pub use typing_keepalive::*;

use std::sync::{Mutex, MutexGuard};

pub(crate) fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
