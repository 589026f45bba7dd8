//! Outgoing datagram bookkeeping.

use std::collections::BTreeMap;

use crate::error::BrokerError;
use crate::resolver::PendingResolver;

/// Resolvers for datagrams the engine has not reported on yet.
///
/// Ids start at 1 and are never reused. The number of outstanding sends is
/// bounded by `capacity`; the default of 1 means the engine must report each
/// outcome before the next send is accepted.
#[derive(Debug)]
pub(crate) struct DatagramSlot {
    next_id: u64,
    capacity: usize,
    outstanding: BTreeMap<u64, PendingResolver<()>>,
}

impl DatagramSlot {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            next_id: 1,
            capacity: capacity.max(1),
            outstanding: BTreeMap::new(),
        }
    }

    /// Store `resolver` under a fresh id, or hand it back when full.
    pub(crate) fn register(
        &mut self,
        resolver: PendingResolver<()>,
    ) -> Result<u64, (PendingResolver<()>, BrokerError)> {
        if self.outstanding.len() >= self.capacity {
            let err = BrokerError::InvalidState(format!(
                "{} datagram(s) already awaiting an outcome",
                self.outstanding.len()
            ));
            return Err((resolver, err));
        }
        let id = self.next_id;
        self.next_id += 1;
        self.outstanding.insert(id, resolver);
        Ok(id)
    }

    pub(crate) fn complete(&mut self, id: u64) -> Option<PendingResolver<()>> {
        self.outstanding.remove(&id)
    }

    pub(crate) fn drain(&mut self) -> Vec<PendingResolver<()>> {
        std::mem::take(&mut self.outstanding).into_values().collect()
    }

    pub(crate) fn outstanding(&self) -> usize {
        self.outstanding.len()
    }
}
