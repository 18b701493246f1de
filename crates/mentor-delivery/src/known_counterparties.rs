//! In-memory set of counterparties that already passed admission once.

use std::collections::HashSet;
use std::sync::RwLock;

use crate::platform::CounterpartyId;

#[derive(Debug, Default)]
pub struct KnownCounterparties {
    ids: RwLock<HashSet<CounterpartyId>>,
}

impl KnownCounterparties {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, counterparty: CounterpartyId) -> bool {
        match self.ids.read() {
            Ok(ids) => ids.contains(&counterparty),
            Err(poisoned) => poisoned.into_inner().contains(&counterparty),
        }
    }

    /// Returns true when the id was not known before.
    pub fn insert(&self, counterparty: CounterpartyId) -> bool {
        match self.ids.write() {
            Ok(mut ids) => ids.insert(counterparty),
            Err(poisoned) => poisoned.into_inner().insert(counterparty),
        }
    }

    pub fn remove(&self, counterparty: CounterpartyId) -> bool {
        match self.ids.write() {
            Ok(mut ids) => ids.remove(&counterparty),
            Err(poisoned) => poisoned.into_inner().remove(&counterparty),
        }
    }

    pub fn len(&self) -> usize {
        match self.ids.read() {
            Ok(ids) => ids.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
