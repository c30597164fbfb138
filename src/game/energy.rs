//! Energy Ledger
//!
//! Per-participant regenerating resource that gates captures.
//! Regeneration is lazy: it is applied on every access rather than on a
//! timer, using whole units only.

use std::collections::BTreeMap;

use serde::{Serialize, Deserialize};

use crate::core::time::Millis;
use crate::game::state::ParticipantId;

/// Energy state of one participant.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnergyState {
    /// Current energy, always `<= max`.
    pub current: u32,
    /// Capacity.
    pub max: u32,
    /// Units regenerated per second.
    pub regen_per_sec: u32,
    /// When regeneration was last applied.
    pub last_regen_at: Millis,
}

impl EnergyState {
    /// Full pool.
    pub fn full(max: u32, regen_per_sec: u32, now: Millis) -> Self {
        Self {
            current: max,
            max,
            regen_per_sec,
            last_regen_at: now,
        }
    }

    /// Apply whole units of regeneration earned since the last application.
    ///
    /// The timestamp only advances when at least one unit is earned, so
    /// fractional progress carries over.
    fn regenerate(&mut self, now: Millis) {
        let elapsed = now.saturating_sub(self.last_regen_at);
        let regen = elapsed.saturating_mul(u64::from(self.regen_per_sec)) / 1000;
        if regen > 0 {
            let regen = u32::try_from(regen).unwrap_or(u32::MAX);
            self.current = self.current.saturating_add(regen).min(self.max);
            self.last_regen_at = now;
        }
    }
}

/// Energy errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum EnergyError {
    /// Participant has no energy state.
    #[error("unknown participant")]
    UnknownParticipant,

    /// Not enough energy for the action.
    #[error("insufficient energy: have {current}, need {required}")]
    InsufficientEnergy {
        /// Energy after regeneration.
        current: u32,
        /// Cost of the action.
        required: u32,
    },
}

/// All energy pools.
#[derive(Debug)]
pub struct EnergyLedger {
    max: u32,
    regen_per_sec: u32,
    pools: BTreeMap<ParticipantId, EnergyState>,
}

impl EnergyLedger {
    /// Create a ledger handing out pools of the given shape.
    pub fn new(max: u32, regen_per_sec: u32) -> Self {
        Self {
            max,
            regen_per_sec,
            pools: BTreeMap::new(),
        }
    }

    /// Give a participant a full pool.
    pub fn register(&mut self, id: ParticipantId, now: Millis) -> EnergyState {
        let state = EnergyState::full(self.max, self.regen_per_sec, now);
        self.pools.insert(id, state);
        state
    }

    /// Drop a participant's pool.
    pub fn remove(&mut self, id: &ParticipantId) {
        self.pools.remove(id);
    }

    /// Read energy after applying regeneration.
    pub fn get(&mut self, id: &ParticipantId, now: Millis) -> Option<EnergyState> {
        let state = self.pools.get_mut(id)?;
        state.regenerate(now);
        Some(*state)
    }

    /// Spend `cost` energy.
    ///
    /// # Errors
    ///
    /// [`EnergyError::InsufficientEnergy`] if the regenerated pool is below
    /// `cost`. Regeneration earned up to `now` is applied either way.
    pub fn consume(
        &mut self,
        id: &ParticipantId,
        cost: u32,
        now: Millis,
    ) -> Result<EnergyState, EnergyError> {
        let state = self.pools.get_mut(id).ok_or(EnergyError::UnknownParticipant)?;
        state.regenerate(now);
        if state.current < cost {
            return Err(EnergyError::InsufficientEnergy {
                current: state.current,
                required: cost,
            });
        }
        state.current -= cost;
        state.last_regen_at = now;
        Ok(*state)
    }

    /// Refill every pool.
    pub fn reset_all(&mut self, now: Millis) {
        for state in self.pools.values_mut() {
            state.current = state.max;
            state.last_regen_at = now;
        }
    }

    /// Number of pools.
    pub fn len(&self) -> usize {
        self.pools.len()
    }

    /// Whether there are no pools.
    pub fn is_empty(&self) -> bool {
        self.pools.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pid() -> ParticipantId {
        ParticipantId::from_bytes([1; 16])
    }

    fn ledger() -> EnergyLedger {
        let mut ledger = EnergyLedger::new(100, 1);
        ledger.register(pid(), 0);
        ledger
    }

    #[test]
    fn test_consume_deducts_cost() {
        let mut ledger = ledger();
        let state = ledger.consume(&pid(), 5, 0).unwrap();
        assert_eq!(state.current, 95);
    }

    #[test]
    fn test_regen_is_whole_units_and_capped() {
        let mut ledger = ledger();
        ledger.consume(&pid(), 10, 0).unwrap();

        // 999 ms is not a full unit
        assert_eq!(ledger.get(&pid(), 999).unwrap().current, 90);
        // Fractional progress carries over
        assert_eq!(ledger.get(&pid(), 1_000).unwrap().current, 91);
        assert_eq!(ledger.get(&pid(), 1_000_000).unwrap().current, 100);
    }

    #[test]
    fn test_insufficient_energy() {
        let mut ledger = EnergyLedger::new(10, 1);
        ledger.register(pid(), 0);
        ledger.consume(&pid(), 8, 0).unwrap();

        let result = ledger.consume(&pid(), 5, 500);
        assert_eq!(
            result,
            Err(EnergyError::InsufficientEnergy { current: 2, required: 5 })
        );
    }

    #[test]
    fn test_failed_consume_still_spends_regen_window() {
        let mut ledger = EnergyLedger::new(10, 1);
        ledger.register(pid(), 0);
        ledger.consume(&pid(), 10, 0).unwrap();

        // 2.5s elapsed: 2 units regenerated, timestamp advances to 2500
        assert!(ledger.consume(&pid(), 5, 2_500).is_err());
        // Only 0.5s has elapsed since the last regen application
        assert_eq!(ledger.get(&pid(), 3_000).unwrap().current, 2);
        assert_eq!(ledger.get(&pid(), 3_500).unwrap().current, 3);
    }

    #[test]
    fn test_reset_all_refills() {
        let mut ledger = ledger();
        ledger.consume(&pid(), 50, 0).unwrap();
        ledger.reset_all(10);
        assert_eq!(ledger.get(&pid(), 10).unwrap().current, 100);
    }

    #[test]
    fn test_unknown_participant() {
        let mut ledger = EnergyLedger::new(100, 1);
        assert_eq!(
            ledger.consume(&pid(), 1, 0),
            Err(EnergyError::UnknownParticipant)
        );
        assert!(ledger.get(&pid(), 0).is_none());
    }
}
