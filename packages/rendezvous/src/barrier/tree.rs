//! Combining-tree barrier.
//!
//! Arrivals are merged pairwise through a tree of ticket slots so that no single word sees more
//! than two arrivals per round. The tree is a flat arena of `ceil(expected / 2)` nodes; node `i`
//! holds one ticket per round, and the winners of nodes `2k` and `2k + 1` in round `r` meet at node
//! `k` in round `r + 1`.
//!
//! A ticket holds the low byte of the phase it is waiting on. In a generation starting at phase
//! `p`, the first thread of a pair moves its ticket from `p` to `p + 1` (half step) and leaves; the
//! second moves it from `p + 1` to `p + 2` (full step) and climbs to the next round. When a level
//! has an odd number of nodes, its last node has no partner and the thread landing there moves
//! the ticket straight from `p` to `p + 2`. The thread that climbs out of the last level completes
//! the generation: it runs the completion action, folds pending drops into the expected count and
//! publishes phase `p + 2`, which is exactly the value every touched ticket now holds.

use std::{
    fmt,
    sync::atomic::{AtomicU8, AtomicU32, AtomicUsize, Ordering},
};

use super::{ArrivalToken, BackendKind, BarrierBackend, completion::Completion};
use crate::{Error, config::LeafSelection, thread_id, wait::WaitService};

/// Rounds per node. Each round halves the live node count, so this covers any `usize` count.
const ROUNDS: usize = 64;

/// Largest participant count the tree accepts.
pub const MAX: usize = usize::MAX >> 1;

#[repr(align(64))]
struct TicketNode {
    tickets: [AtomicU8; ROUNDS],
}

impl TicketNode {
    const fn new() -> Self {
        Self {
            tickets: [const { AtomicU8::new(0) }; ROUNDS],
        }
    }
}

/// Picks the node an arriving thread starts probing from.
#[derive(Debug)]
enum LeafSelector {
    ThreadAffinity,
    RoundRobin(AtomicUsize),
}

impl LeafSelector {
    const fn new(selection: LeafSelection) -> Self {
        match selection {
            LeafSelection::ThreadAffinity => Self::ThreadAffinity,
            LeafSelection::RoundRobin => Self::RoundRobin(AtomicUsize::new(0)),
        }
    }

    #[allow(clippy::cast_possible_truncation)]
    fn favorite(&self) -> usize {
        match self {
            Self::ThreadAffinity => thread_id() as usize,
            Self::RoundRobin(next) => next.fetch_add(1, Ordering::Relaxed),
        }
    }
}

pub struct TreeBarrier<S: WaitService> {
    expected: AtomicUsize,
    pending_drops: AtomicUsize,
    phase: AtomicU32,
    nodes: Box<[TicketNode]>,
    leaves: LeafSelector,
    completion: Completion,
    service: S,
}

impl<S: WaitService> TreeBarrier<S> {
    /// `expected` must be in `1..=MAX`; the facade checks it.
    ///
    /// # Errors
    ///
    /// * If the ticket arena cannot be allocated
    pub(crate) fn try_new(
        expected: usize,
        completion: Completion,
        leaf_selection: LeafSelection,
        service: S,
    ) -> Result<Self, Error> {
        debug_assert!((1..=MAX).contains(&expected));

        let count = expected.div_ceil(2);
        let mut nodes = Vec::new();
        nodes.try_reserve_exact(count)?;
        nodes.extend((0..count).map(|_| TicketNode::new()));
        log::debug!("Allocated tree barrier arena: expected={expected} nodes={count}");

        Ok(Self {
            expected: AtomicUsize::new(expected),
            pending_drops: AtomicUsize::new(0),
            phase: AtomicU32::new(0),
            nodes: nodes.into_boxed_slice(),
            leaves: LeafSelector::new(leaf_selection),
            completion,
            service,
        })
    }

    /// Records one arrival for the generation whose tickets read `old`.
    ///
    /// Returns `true` if this arrival completed the generation.
    fn combine(&self, old: u8, favorite: usize) -> bool {
        let half_step = old.wrapping_add(1);
        let full_step = old.wrapping_add(2);

        let mut remaining = self.expected.load(Ordering::Relaxed);
        let mut current = favorite % remaining.div_ceil(2).max(1);

        for round in 0..ROUNDS {
            if remaining <= 1 {
                return true;
            }

            let end_node = remaining.div_ceil(2);
            let last_node = end_node - 1;
            let odd = remaining % 2 == 1;

            loop {
                if current == end_node {
                    current = 0;
                }

                let ticket = &self.nodes[current].tickets[round];

                if current == last_node && odd {
                    // Unpaired node: the only arrival here goes straight up.
                    if ticket
                        .compare_exchange(old, full_step, Ordering::AcqRel, Ordering::Acquire)
                        .is_ok()
                    {
                        break;
                    }
                } else {
                    match ticket.compare_exchange(
                        old,
                        half_step,
                        Ordering::AcqRel,
                        Ordering::Acquire,
                    ) {
                        Ok(_) => return false,
                        Err(seen) if seen == half_step => {
                            if ticket
                                .compare_exchange(
                                    half_step,
                                    full_step,
                                    Ordering::AcqRel,
                                    Ordering::Acquire,
                                )
                                .is_ok()
                            {
                                break;
                            }
                        }
                        Err(_) => {}
                    }
                }

                current += 1;
            }

            remaining = end_node;
            current >>= 1;
        }

        true
    }

    fn complete(&self, old_phase: u32) {
        self.completion.invoke();

        let drops = self.pending_drops.swap(0, Ordering::Relaxed);
        let expected = if drops > 0 {
            self.expected.fetch_sub(drops, Ordering::Relaxed) - drops
        } else {
            self.expected.load(Ordering::Relaxed)
        };

        let new_phase = old_phase.wrapping_add(2);
        self.phase.store(new_phase, Ordering::Release);

        log::trace!(
            "Tree barrier published phase {new_phase}: expected={expected} drops_folded={drops}"
        );
        self.service.notify_all(&self.phase);
    }

    #[cfg(test)]
    fn current_phase(&self) -> u32 {
        self.phase.load(Ordering::Acquire)
    }
}

impl<S: WaitService> BarrierBackend for TreeBarrier<S> {
    fn arrive(&self, update: usize) -> ArrivalToken {
        let favorite = self.leaves.favorite();
        let old_phase = self.phase.load(Ordering::Relaxed);
        #[allow(clippy::cast_possible_truncation)]
        let ticket = old_phase as u8;

        let mut leader = false;
        for _ in 0..update {
            if self.combine(ticket, favorite) {
                leader = true;
                self.complete(old_phase);
            }
        }

        ArrivalToken::new(old_phase, leader)
    }

    fn wait(&self, token: ArrivalToken) {
        loop {
            let current = self.phase.load(Ordering::Acquire);
            if current != token.phase() {
                return;
            }
            self.service
                .wait_on_word(&self.phase, current, Ordering::Acquire);
        }
    }

    fn arrive_and_drop(&self) {
        self.pending_drops.fetch_add(1, Ordering::Relaxed);
        log::trace!("Tree barrier participant dropped");
        let _ = self.arrive(1);
    }

    fn expected(&self) -> usize {
        self.expected
            .load(Ordering::Acquire)
            .saturating_sub(self.pending_drops.load(Ordering::Acquire))
    }

    fn kind(&self) -> BackendKind {
        BackendKind::Tree
    }

    fn max(&self) -> usize {
        MAX
    }
}

impl<S: WaitService> fmt::Debug for TreeBarrier<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TreeBarrier")
            .field("phase", &self.phase.load(Ordering::Relaxed))
            .field("expected", &self.expected.load(Ordering::Relaxed))
            .field("pending_drops", &self.pending_drops.load(Ordering::Relaxed))
            .field("nodes", &self.nodes.len())
            .field("leaves", &self.leaves)
            .field("completion", &self.completion)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{
            Arc,
            atomic::{AtomicBool, AtomicUsize},
        },
        thread,
    };

    use pretty_assertions::assert_eq;

    use super::*;
    use crate::wait::ParkingWait;

    fn barrier(expected: usize, leaf_selection: LeafSelection) -> TreeBarrier<ParkingWait> {
        TreeBarrier::try_new(
            expected,
            Completion::noop(),
            leaf_selection,
            ParkingWait::new(),
        )
        .unwrap()
    }

    fn counting(expected: usize, calls: &Arc<AtomicUsize>) -> TreeBarrier<ParkingWait> {
        let calls = calls.clone();
        TreeBarrier::try_new(
            expected,
            Completion::new(move || {
                calls.fetch_add(1, Ordering::Relaxed);
            }),
            LeafSelection::ThreadAffinity,
            ParkingWait::new(),
        )
        .unwrap()
    }

    /// Arrives `expected` times from the calling thread and returns which arrival led.
    fn run_generation(barrier: &TreeBarrier<ParkingWait>, expected: usize) -> Vec<bool> {
        (0..expected)
            .map(|_| barrier.arrive(1).is_leader())
            .collect()
    }

    #[test_log::test]
    fn arena_holds_one_node_per_pair() {
        for (expected, nodes) in [(1, 1), (2, 1), (3, 2), (6, 3), (7, 4)] {
            assert_eq!(
                barrier(expected, LeafSelection::ThreadAffinity).nodes.len(),
                nodes
            );
        }
    }

    #[test_log::test]
    fn single_participant_completes_every_arrival() {
        let barrier = barrier(1, LeafSelection::ThreadAffinity);

        for generation in 1..=3 {
            assert!(barrier.arrive(1).is_leader());
            assert_eq!(barrier.current_phase(), generation * 2);
        }
    }

    #[test_log::test]
    fn odd_leftover_is_promoted_for_three() {
        let barrier = barrier(3, LeafSelection::ThreadAffinity);

        assert_eq!(run_generation(&barrier, 3), [false, false, true]);
        assert_eq!(barrier.current_phase(), 2);
        assert_eq!(run_generation(&barrier, 3), [false, false, true]);
        assert_eq!(barrier.current_phase(), 4);
    }

    #[test_log::test]
    fn last_arrival_leads_for_non_power_of_two_sizes() {
        for selection in [LeafSelection::ThreadAffinity, LeafSelection::RoundRobin] {
            for expected in [2, 3, 5, 6, 7, 9, 12, 13] {
                let barrier = barrier(expected, selection);

                for generation in 1..=4_u32 {
                    let leaders = run_generation(&barrier, expected);
                    let mut want = vec![false; expected];
                    want[expected - 1] = true;

                    assert_eq!(leaders, want, "expected={expected} selection={selection:?}");
                    assert_eq!(barrier.current_phase(), generation * 2);
                }
            }
        }
    }

    #[test_log::test]
    fn touched_tickets_hold_published_phase() {
        let barrier = barrier(7, LeafSelection::RoundRobin);

        run_generation(&barrier, 7);

        let mut remaining = 7_usize;
        let mut round = 0;
        while remaining > 1 {
            let nodes = remaining.div_ceil(2);
            for node in &barrier.nodes[..nodes] {
                assert_eq!(node.tickets[round].load(Ordering::Relaxed), 2);
            }
            remaining = nodes;
            round += 1;
        }
    }

    #[test_log::test]
    fn completion_runs_once_per_generation() {
        let calls = Arc::new(AtomicUsize::new(0));
        let barrier = counting(5, &calls);

        for generation in 1..=3 {
            run_generation(&barrier, 4);
            assert_eq!(calls.load(Ordering::Relaxed), generation - 1);
            assert!(barrier.arrive(1).is_leader());
            assert_eq!(calls.load(Ordering::Relaxed), generation);
        }
    }

    #[test_log::test]
    fn drop_shrinks_following_generations_only() {
        let calls = Arc::new(AtomicUsize::new(0));
        let barrier = counting(3, &calls);

        let _ = barrier.arrive(1);
        barrier.arrive_and_drop();
        assert_eq!(barrier.expected(), 2);
        assert_eq!(calls.load(Ordering::Relaxed), 0);
        assert!(barrier.arrive(1).is_leader());
        assert_eq!(calls.load(Ordering::Relaxed), 1);

        assert_eq!(run_generation(&barrier, 2), [false, true]);
        assert_eq!(run_generation(&barrier, 2), [false, true]);
        assert_eq!(calls.load(Ordering::Relaxed), 3);
    }

    #[test_log::test]
    fn dropping_down_to_one_participant() {
        let barrier = barrier(4, LeafSelection::ThreadAffinity);

        let _ = barrier.arrive(1);
        barrier.arrive_and_drop();
        barrier.arrive_and_drop();
        assert!(barrier.arrive(1).is_leader());
        assert_eq!(barrier.expected(), 2);

        let _ = barrier.arrive(1);
        barrier.arrive_and_drop();
        assert_eq!(barrier.expected(), 1);

        assert!(barrier.arrive(1).is_leader());
        assert!(barrier.arrive(1).is_leader());
    }

    #[test_log::test]
    fn bulk_update_counts_every_arrival() {
        let barrier = barrier(6, LeafSelection::ThreadAffinity);

        assert!(!barrier.arrive(2).is_leader());
        assert!(barrier.arrive(4).is_leader());
        assert_eq!(barrier.current_phase(), 2);
    }

    #[test_log::test]
    fn stale_token_returns_after_many_generations() {
        let barrier = barrier(2, LeafSelection::ThreadAffinity);
        let stale = barrier.arrive(1);
        let _ = barrier.arrive(1);

        for _ in 0..3 {
            run_generation(&barrier, 2);
        }

        assert_eq!(barrier.current_phase(), 8);
        barrier.wait(stale);
    }

    #[test_log::test]
    fn ticket_bytes_wrap_with_phase() {
        let barrier = barrier(5, LeafSelection::RoundRobin);

        for _ in 0..200 {
            assert!(run_generation(&barrier, 5)[4]);
        }

        assert_eq!(barrier.current_phase(), 400);
    }

    #[test_log::test]
    fn threads_see_completion_effects() {
        for expected in [3, 5, 6, 7] {
            let generations = 25;
            let calls = Arc::new(AtomicUsize::new(0));
            let barrier = counting(expected, &calls);
            let failed = AtomicBool::new(false);

            thread::scope(|s| {
                for _ in 0..expected {
                    s.spawn(|| {
                        for generation in 1..=generations {
                            let token = barrier.arrive(1);
                            barrier.wait(token);
                            if calls.load(Ordering::Relaxed) != generation {
                                failed.store(true, Ordering::Relaxed);
                            }
                        }
                    });
                }
            });

            assert!(!failed.load(Ordering::Relaxed), "expected={expected}");
            assert_eq!(calls.load(Ordering::Relaxed), generations);
        }
    }
}
