use std::collections::HashMap;

use crate::model::*;

use super::EngineError;

/// 0001-01-01 is far enough back for any real booking.
pub const MIN_VALID_TIMESTAMP_MS: Ms = -62_135_596_800_000;
/// 9999-12-31T23:59:59.999Z
pub const MAX_VALID_TIMESTAMP_MS: Ms = 253_402_300_799_999;

pub fn now_ms() -> Ms {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map_or(0, |d| d.as_millis() as Ms)
}

/// Reject caller-supplied slots before they reach the reservation tree.
pub fn validate_slot(slot: &Span) -> Result<(), EngineError> {
    if slot.start > slot.end {
        return Err(EngineError::InvalidSlot {
            slot: *slot,
            reason: "start is after end",
        });
    }
    if slot.start < MIN_VALID_TIMESTAMP_MS || slot.end > MAX_VALID_TIMESTAMP_MS {
        return Err(EngineError::InvalidSlot {
            slot: *slot,
            reason: "timestamp out of range",
        });
    }
    Ok(())
}

/// Reservations per allocation target, each list sorted by slot start.
#[derive(Debug, Clone, Default)]
pub(crate) struct SlotIndex {
    by_target: HashMap<TargetKey, Vec<(Span, ReservationId)>>,
}

impl SlotIndex {
    pub fn insert(&mut self, key: TargetKey, slot: Span, id: ReservationId) {
        let entries = self.by_target.entry(key).or_default();
        let pos = entries.partition_point(|(s, _)| s.start <= slot.start);
        entries.insert(pos, (slot, id));
    }

    pub fn remove(&mut self, key: TargetKey, id: ReservationId) {
        if let Some(entries) = self.by_target.get_mut(&key) {
            entries.retain(|(_, r)| *r != id);
            if entries.is_empty() {
                self.by_target.remove(&key);
            }
        }
    }

    /// Reservations on `key` whose slot strictly overlaps `query`.
    /// Binary search skips everything starting at or after `query.end`.
    pub fn overlapping(&self, key: TargetKey, query: Span) -> impl Iterator<Item = ReservationId> + '_ {
        let entries = self.by_target.get(&key).map_or(&[][..], Vec::as_slice);
        let right_bound = entries.partition_point(|(s, _)| s.start < query.end);
        entries[..right_bound]
            .iter()
            .filter(move |(s, _)| s.end > query.start)
            .map(|(_, id)| *id)
    }

    pub fn count(&self, key: TargetKey) -> usize {
        self.by_target.get(&key).map_or(0, Vec::len)
    }

    pub fn clear(&mut self) {
        self.by_target.clear();
    }
}
