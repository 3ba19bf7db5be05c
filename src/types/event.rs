//! Stochastic event types.

use serde::{Deserialize, Serialize};

use super::ids::{EventId, GroupId, RealizationId};

/// One (rupture occurrence, realization) pair.
///
/// Events are created during expansion, persisted exactly once and then
/// immutable. The persisted dataset is re-sorted by `eid` before being made
/// visible to downstream readers, so consumers never observe the scheduler's
/// completion order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    /// Global event id, unique and dense across the run.
    pub eid: EventId,
    /// Serial of the rupture this event occurs on.
    pub rupture_serial: u32,
    /// Realization the event belongs to.
    pub rlz: RealizationId,
    /// Group of the originating rupture.
    pub group_id: GroupId,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_is_copy_and_sortable_by_eid() {
        let mut events = vec![
            Event {
                eid: EventId(2),
                rupture_serial: 0,
                rlz: RealizationId(1),
                group_id: GroupId(0),
            },
            Event {
                eid: EventId(0),
                rupture_serial: 0,
                rlz: RealizationId(0),
                group_id: GroupId(0),
            },
        ];
        events.sort_by_key(|e| e.eid);
        assert_eq!(events[0].eid, EventId(0));
    }
}
