//! Expansion of ruptures into stochastic events.
//!
//! Each rupture occurrence is combined with every realization that applies
//! to its group, yielding one event per (occurrence, realization) pair.
//! Event ids come from a single monotonic counter owned by the reducer;
//! expansion therefore always runs under the reduction's serialization and
//! receives the counter value as `base_eid`.

use crate::types::{Event, EventId, GroupId, LogicTree, RealizationId, Rupture};

/// Error raised during event expansion.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ExpanderError {
    /// A rupture belongs to a group with no realizations mapped to it.
    #[error("group {0} has no realizations mapped to it")]
    UnmappedGroup(GroupId),
    /// The emitted event ids do not match the expected dense sequence.
    /// Indicates a sampling/expansion bug, never a data problem.
    #[error("event id sequence mismatch at position {position}: emitted {emitted}, expected {expected}")]
    SequenceMismatch {
        /// Position of the first disagreement.
        position: usize,
        /// Event id actually emitted.
        emitted: EventId,
        /// Event id the dense sequence requires.
        expected: EventId,
    },
}

/// Expands ruptures into events against a loaded logic tree.
#[derive(Debug, Clone)]
pub struct EventExpander<'lt> {
    logic_tree: &'lt LogicTree,
    master_seed: u64,
}

impl<'lt> EventExpander<'lt> {
    /// Create an expander.
    ///
    /// The master seed drives the realization subsampling of sampled
    /// groups; full-enumeration groups ignore it.
    pub fn new(logic_tree: &'lt LogicTree, master_seed: u64) -> Self {
        Self {
            logic_tree,
            master_seed,
        }
    }

    /// Realizations effectively applying to one group's ruptures.
    pub fn realizations_for(&self, group: GroupId) -> Vec<RealizationId> {
        self.logic_tree
            .effective_realizations(group, self.master_seed)
    }

    /// Number of events one rupture expands into.
    pub fn expected_event_count(&self, rupture: &Rupture) -> u64 {
        let rlzs = self.realizations_for(rupture.group_id).len() as u64;
        u64::from(rupture.n_occ) * rlzs
    }

    /// Expand ruptures into events with ids `base_eid..`.
    ///
    /// Events are emitted rupture-serial-major, then occurrence, then
    /// realization, so the id sequence is a pure function of the rupture
    /// set. Returns the events and the next free event id.
    pub fn expand(
        &self,
        ruptures: &[Rupture],
        base_eid: u64,
    ) -> Result<(Vec<Event>, u64), ExpanderError> {
        let mut events = Vec::new();
        let mut next = base_eid;
        for rupture in ruptures {
            let rlzs = self.realizations_for(rupture.group_id);
            if rlzs.is_empty() {
                return Err(ExpanderError::UnmappedGroup(rupture.group_id));
            }
            for _occurrence in 0..rupture.n_occ {
                for &rlz in &rlzs {
                    events.push(Event {
                        eid: EventId(next),
                        rupture_serial: rupture.serial,
                        rlz,
                        group_id: rupture.group_id,
                    });
                    next += 1;
                }
            }
        }
        Ok((events, next))
    }

    /// Verify that emitted events form the dense id sequence the rupture
    /// set requires.
    ///
    /// The check recomputes the expected ids from per-rupture counts alone,
    /// independently of `expand`'s emission loop, so a bug in either side
    /// trips it.
    pub fn verify_sequence(
        &self,
        ruptures: &[Rupture],
        events: &[Event],
        base_eid: u64,
    ) -> Result<(), ExpanderError> {
        let expected_total: u64 = ruptures
            .iter()
            .map(|r| self.expected_event_count(r))
            .sum();
        if events.len() as u64 != expected_total {
            let position = events.len().min(expected_total as usize);
            return Err(ExpanderError::SequenceMismatch {
                position,
                emitted: events
                    .get(position)
                    .map(|e| e.eid)
                    .unwrap_or(EventId(u64::MAX)),
                expected: EventId(base_eid + position as u64),
            });
        }
        for (position, event) in events.iter().enumerate() {
            let expected = EventId(base_eid + position as u64);
            if event.eid != expected {
                return Err(ExpanderError::SequenceMismatch {
                    position,
                    emitted: event.eid,
                    expected,
                });
            }
        }
        Ok(())
    }
}
