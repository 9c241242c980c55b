//! Single-word barrier for phases without a completion action.
//!
//! The whole barrier state lives in one `u64`:
//!
//! ```text
//!  63          48 47          24 23           0
//! +--------------+--------------+--------------+
//! |    phase     |   arrived    |   expected   |
//! +--------------+--------------+--------------+
//! ```
//!
//! The expected field holds the participant count for the generations to come. The arrived field
//! holds the distance of the arrival count from `2^24`: a generation starts with
//! `arrived = 2^24 - expected`, so the arrival that brings the count up to `expected` carries out
//! of the arrived field and increments the phase. That carry is the completion signal: the
//! arrival whose add flips the phase's low bit completed the generation. It then folds the
//! distance for the expected count back into the now-zeroed arrived field to open the next
//! generation.
//!
//! Dropping a participant subtracts one from the expected field, which shrinks the count folded in
//! at the next completion without touching the generation in progress. Once every participant has
//! dropped, the expected field is zero and the completer folds nothing.

use std::{
    fmt,
    sync::atomic::{AtomicU64, Ordering},
};

use super::{ArrivalToken, BackendKind, BarrierBackend};
use crate::wait::WaitService;

const FIELD_BITS: u32 = 24;
const ARRIVED_SHIFT: u32 = FIELD_BITS;
const PHASE_SHIFT: u32 = 2 * FIELD_BITS;

const FIELD_CAPACITY: u64 = 1 << FIELD_BITS;
const EXPECTED_MASK: u64 = FIELD_CAPACITY - 1;
const EXPECTED_UNIT: u64 = 1;
const ARRIVED_UNIT: u64 = 1 << ARRIVED_SHIFT;
const PHASE_LOW_BIT: u64 = 1 << PHASE_SHIFT;

/// Largest participant count the packed word can track.
#[allow(clippy::cast_possible_truncation)]
pub const MAX: usize = EXPECTED_MASK as usize;

const fn initial_word(expected: u64) -> u64 {
    ((FIELD_CAPACITY - expected) << ARRIVED_SHIFT) | expected
}

#[allow(clippy::cast_possible_truncation)]
const fn phase_of(word: u64) -> u32 {
    (word >> PHASE_SHIFT) as u32
}

const fn flipped(before: u64, after: u64) -> bool {
    (before ^ after) & PHASE_LOW_BIT != 0
}

const fn expected_of(word: u64) -> u64 {
    word & EXPECTED_MASK
}

/// Arrived-field value that opens a generation of `expected` participants.
const fn reset_for(expected: u64) -> u64 {
    if expected == 0 {
        0
    } else {
        (FIELD_CAPACITY - expected) << ARRIVED_SHIFT
    }
}

pub struct CentralizedBarrier<S: WaitService> {
    state: AtomicU64,
    service: S,
}

impl<S: WaitService> CentralizedBarrier<S> {
    /// `expected` must be in `1..=MAX`; the facade checks it.
    pub(crate) fn new(expected: usize, service: S) -> Self {
        debug_assert!((1..=MAX).contains(&expected));

        Self {
            state: AtomicU64::new(initial_word(expected as u64)),
            service,
        }
    }

    /// Resets the arrived field from the expected field of `current` and wakes waiters.
    ///
    /// With no participants left the arrived field stays at zero; nobody arrives again.
    ///
    /// Participants released by the flip may arrive before the fold lands. Their adds commute
    /// with it, and only the completer's own missing arrival keeps the next generation from
    /// carrying early, unless the completer just dropped. In that case the fold itself can carry,
    /// completing the next generation too, and the loop publishes that as well.
    fn publish(&self, mut current: u64) {
        loop {
            let reset = reset_for(expected_of(current));
            let before = self.state.fetch_add(reset, Ordering::AcqRel);
            let after = before.wrapping_add(reset);

            log::trace!(
                "Centralized barrier published phase {}: expected={}",
                phase_of(before),
                expected_of(before),
            );
            self.service.notify_all(&self.state);

            if !flipped(before, after) {
                break;
            }
            current = after;
        }
    }

    #[cfg(test)]
    fn word(&self) -> u64 {
        self.state.load(Ordering::Acquire)
    }
}

impl<S: WaitService> BarrierBackend for CentralizedBarrier<S> {
    fn arrive(&self, update: usize) -> ArrivalToken {
        let increment = (update as u64).wrapping_mul(ARRIVED_UNIT);
        let old = self.state.fetch_add(increment, Ordering::AcqRel);
        let new = old.wrapping_add(increment);
        let leader = flipped(old, new);

        if leader {
            self.publish(new);
        }

        ArrivalToken::new(phase_of(old), leader)
    }

    fn wait(&self, token: ArrivalToken) {
        loop {
            let current = self.state.load(Ordering::Acquire);
            if phase_of(current) != token.phase() {
                return;
            }
            self.service
                .wait_on_word(&self.state, current, Ordering::Acquire);
        }
    }

    fn arrive_and_drop(&self) {
        let previous = self.state.fetch_sub(EXPECTED_UNIT, Ordering::Relaxed);
        debug_assert!(
            expected_of(previous) > 0,
            "barrier participant dropped with none remaining"
        );
        log::trace!("Centralized barrier participant dropped");
        let _ = self.arrive(1);
    }

    #[allow(clippy::cast_possible_truncation)]
    fn expected(&self) -> usize {
        expected_of(self.state.load(Ordering::Acquire)) as usize
    }

    fn kind(&self) -> BackendKind {
        BackendKind::Centralized
    }

    fn max(&self) -> usize {
        MAX
    }
}

impl<S: WaitService> fmt::Debug for CentralizedBarrier<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let word = self.state.load(Ordering::Relaxed);
        f.debug_struct("CentralizedBarrier")
            .field("phase", &phase_of(word))
            .field("expected", &expected_of(word))
            .finish_non_exhaustive()
    }
}
