//! Per-counterparty "new message arrived" signals.
//!
//! Raised from the inbound path while an older response may still be going
//! out; read by the delivery loop at part boundaries.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::lock_unpoisoned;
use crate::platform::CounterpartyId;

#[derive(Debug, Default)]
pub struct InterruptFlags {
    flags: Mutex<HashMap<CounterpartyId, Arc<AtomicBool>>>,
}

impl InterruptFlags {
    pub fn new() -> Self {
        Self::default()
    }

    fn flag(&self, counterparty: CounterpartyId) -> Arc<AtomicBool> {
        Arc::clone(
            lock_unpoisoned(&self.flags)
                .entry(counterparty)
                .or_insert_with(|| Arc::new(AtomicBool::new(false))),
        )
    }

    pub fn raise(&self, counterparty: CounterpartyId) {
        self.flag(counterparty).store(true, Ordering::Release);
    }

    pub fn clear(&self, counterparty: CounterpartyId) {
        if let Some(flag) = lock_unpoisoned(&self.flags).get(&counterparty) {
            flag.store(false, Ordering::Release);
        }
    }

    pub fn is_raised(&self, counterparty: CounterpartyId) -> bool {
        lock_unpoisoned(&self.flags)
            .get(&counterparty)
            .is_some_and(|flag| flag.load(Ordering::Acquire))
    }

    pub fn forget(&self, counterparty: CounterpartyId) {
        lock_unpoisoned(&self.flags).remove(&counterparty);
    }
}
