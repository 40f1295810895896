/*
 * Crab, a UCI-compatible chess engine
 * Copyright (C) 2024 Jasper Shovelton
 *
 * Crab is free software: you can redistribute it and/or modify it under the
 * terms of the GNU General Public License as published by the Free Software
 * Foundation, either version 3 of the License, or (at your option) any later
 * version.
 *
 * Crab is distributed in the hope that it will be useful, but WITHOUT ANY
 * WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
 * FOR A PARTICULAR PURPOSE. See the GNU General Public License for more
 * details.
 *
 * You should have received a copy of the GNU General Public License along with
 * Crab. If not, see <https://www.gnu.org/licenses/>.
 */

use std::sync::{Condvar, Mutex};

use crate::{
    board::Board,
    evaluation::Eval,
    movegen::Move,
    search::{Depth, Height, Pv, Worker},
    transposition_table::Bound,
};

/// The state of a node shared between a client and any helpers that join it.
///
/// A helper "joins" a [`Job`] by locking it, forking the client's board into
/// its own copy, then pulling moves from the shared move list one at a time
/// until none remain.
struct JobState {
    /// The position at this node, forked by every helper that joins.
    board: Board,
    /// The moves not yet handed out to a client or helper.
    remaining_moves: Vec<Move>,
    /// The current search window, shared and updated as workers report back.
    alpha: Eval,
    /// The current search window, shared and updated as workers report back.
    beta: Eval,
    /// The remaining depth to search the child positions at.
    depth: Depth,
    /// The ply of this node.
    height: Height,
    /// Whether this node is being searched with a null window expecting a
    /// fail-low.
    is_cut_node: bool,
    /// The best line found so far at this node.
    pv: Pv,
    /// The best move found so far at this node.
    best_move: Move,
    /// The best score found so far at this node.
    best_score: Eval,
    /// The bound of [`Self::best_score`] given what has been searched.
    bound: Bound,
    /// Whether any worker has found at least one legal move.
    has_legal_move: bool,
    /// How many helpers have forked this job and are still working on it.
    active_helpers: usize,
}

/// A node of the search tree opened up to helper threads under the
/// Young Brothers Wait Concept: the first few moves are always searched by
/// the client alone, and only once the window has stabilised is the
/// remainder of the move list shared out.
pub struct Job {
    /// The state shared under this job's lock.
    state: Mutex<JobState>,
    /// Signalled whenever a helper finishes forking the position, so the
    /// publishing client can stop waiting.
    helper_ready: Condvar,
}

impl Job {
    /// Creates a [`Job`] for a node about to be shared, seeded with the
    /// client's current search window and the moves still left to try.
    pub fn new(
        board: Board,
        remaining_moves: Vec<Move>,
        alpha: Eval,
        beta: Eval,
        depth: Depth,
        height: Height,
        is_cut_node: bool,
    ) -> Self {
        Self {
            state: Mutex::new(JobState {
                board,
                remaining_moves,
                alpha,
                beta,
                depth,
                height,
                is_cut_node,
                pv: Pv::new(),
                best_move: Move::null(),
                best_score: -crate::evaluation::INF_EVAL,
                bound: Bound::Upper,
                has_legal_move: false,
                active_helpers: 0,
            }),
            helper_ready: Condvar::new(),
        }
    }

    /// Registers a helper as actively working on this job; call
    /// [`Self::leave`] once it stops.
    fn register_helper(&self) {
        let mut state = self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        state.active_helpers += 1;
    }

    /// Forks the shared position into a fresh [`Board`] for a joining
    /// helper or the publishing client.
    pub fn board(&self) -> Board {
        let state = self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        state.board
    }

    /// The remaining depth to search each move in this job's list at.
    pub fn depth(&self) -> Depth {
        let state = self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        state.depth
    }

    /// The ply of the node this job represents.
    pub fn height(&self) -> Height {
        let state = self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        state.height
    }

    /// Whether this node expects a fail-low and should be searched as a cut
    /// node.
    pub fn is_cut_node(&self) -> bool {
        let state = self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        state.is_cut_node
    }

    /// The upper bound of this job's shared search window.
    pub fn beta(&self) -> Eval {
        let state = self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        state.beta
    }

    /// The current lower bound of this job's shared search window, raised as
    /// workers report improving scores.
    pub fn current_alpha(&self) -> Eval {
        let state = self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        state.alpha
    }

    /// Takes the next unclaimed move for a worker already joined to this
    /// job.
    pub fn next_move(&self) -> Option<Move> {
        let mut state = self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        state.remaining_moves.pop()
    }

    /// Whether any move is still unclaimed, without taking it.
    pub fn has_remaining_moves(&self) -> bool {
        let state = self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        !state.remaining_moves.is_empty()
    }

    /// Reports the result of searching `mv` back into the shared window,
    /// raising alpha and replacing the best line if it improved.
    ///
    /// Returns `true` if this report produced a beta cut.
    pub fn report(&self, mv: Move, score: Eval, child_pv: &Pv) -> bool {
        let mut state = self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        state.has_legal_move = true;

        if score > state.best_score {
            state.best_score = score;
            state.best_move = mv;
            state.pv.clear();
            state.pv.enqueue(mv);
            state.pv.append_pv(child_pv);
        }

        if score > state.alpha {
            state.alpha = score;
            state.bound = Bound::Exact;
        }

        if state.alpha >= state.beta {
            state.bound = Bound::Lower;
            true
        } else {
            false
        }
    }

    /// Marks a helper as no longer working on this job.
    pub fn leave(&self) {
        let mut state = self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        state.active_helpers = state.active_helpers.saturating_sub(1);
        drop(state);
        self.helper_ready.notify_all();
    }

    /// Blocks until every helper that joined this job has left.
    pub fn wait_for_helpers(&self) {
        let state = self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        drop(
            self.helper_ready
                .wait_while(state, |state| state.active_helpers > 0)
                .unwrap_or_else(std::sync::PoisonError::into_inner),
        );
    }

    /// Returns the best score, best move, line and bound accumulated from
    /// every worker that contributed to this job.
    pub fn into_result(self) -> (Eval, Move, Pv, Bound, bool) {
        let state = self.state.into_inner().unwrap_or_else(std::sync::PoisonError::into_inner);
        (state.best_score, state.best_move, state.pv, state.bound, state.has_legal_move)
    }
}

/// A single-slot mailbox through which a client publishes shared [`Job`]s and
/// idle helper threads pick them up.
///
/// There is one [`HelperQueue`] per search, shared by every [`Worker`](crate::search::Worker).
pub struct HelperQueue {
    /// The job currently on offer, if any.
    slot: Mutex<Slot>,
    /// Signalled when a job is published, waking any helper blocked in
    /// [`Self::acquire`].
    helpers_wake: Condvar,
    /// Signalled when a helper has copied a published job's state, waking
    /// the publishing client.
    client_wake: Condvar,
}

/// The contents of a [`HelperQueue`]'s single slot.
struct Slot {
    /// The job on offer, if any.
    ///
    /// A raw pointer because the job itself lives on the publishing client's
    /// stack for the duration of the publish call; the queue never outlives
    /// that call, so the borrow is always valid while the pointer is set.
    job: Option<*const Job>,
    /// Whether the offered job is the root of the search, served
    /// immediately to the first helper that arrives.
    is_root: bool,
    /// Whether a helper has copied the offered job's state yet.
    taken: bool,
    /// Set once no more helping will ever be needed; helpers waiting on
    /// [`HelperQueue::acquire`] wake and return `None`.
    no_more_help: bool,
    /// The number of helpers currently parked waiting for a job.
    waiting_helpers: usize,
}

// SAFETY: the raw pointer in `Slot::job` is only ever dereferenced while the
// originating `publish`/`publish_root` call is still on the stack, and every
// access to it happens with the queue's mutex held.
unsafe impl Send for Slot {}

impl HelperQueue {
    /// Creates an empty [`HelperQueue`] with no jobs on offer.
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(Slot {
                job: None,
                is_root: false,
                taken: false,
                no_more_help: false,
                waiting_helpers: 0,
            }),
            helpers_wake: Condvar::new(),
            client_wake: Condvar::new(),
        }
    }

    /// Publishes `job` for a single helper to pick up, blocking the caller
    /// until one does.
    pub fn publish(&self, job: &Job) {
        self.publish_impl(job, false);
    }

    /// Publishes the root `job`, marking it so the first helper to arrive
    /// serves it immediately rather than waiting for an ordinary slot check.
    pub fn publish_root(&self, job: &Job) {
        self.publish_impl(job, true);
    }

    /// Shared implementation of [`Self::publish`]/[`Self::publish_root`].
    fn publish_impl(&self, job: &Job, is_root: bool) {
        let mut slot = self.slot.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        slot.job = Some(std::ptr::from_ref(job));
        slot.is_root = is_root;
        slot.taken = false;
        drop(slot);

        self.helpers_wake.notify_all();

        let slot = self.slot.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let mut slot = self
            .client_wake
            .wait_while(slot, |slot| !slot.taken && slot.job.is_some())
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        slot.job = None;
        slot.is_root = false;
    }

    /// Returns whether a helper is currently parked waiting for a job.
    pub fn has_idle_helper(&self) -> bool {
        let slot = self.slot.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        slot.waiting_helpers > 0
    }

    /// Waits for a job to appear on the queue and joins it.
    ///
    /// Returns `None` once [`Self::release_all`] has been called and no job
    /// remains to hand out. The returned reference stays valid until the
    /// caller calls [`Job::leave`]; the publishing client blocks in
    /// [`Self::wait_for_helpers`] (indirectly, via [`Job::wait_for_helpers`])
    /// until every helper that joined has done so.
    pub fn acquire(&self, helper: &Worker<'_>) -> Option<&Job> {
        let _ = helper;
        let mut slot = self.slot.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        slot.waiting_helpers += 1;

        loop {
            if slot.no_more_help {
                slot.waiting_helpers -= 1;
                return None;
            }
            if let Some(job_ptr) = slot.job {
                if !slot.taken {
                    slot.taken = true;
                    slot.waiting_helpers -= 1;
                    drop(slot);
                    self.client_wake.notify_all();
                    // SAFETY: the publishing call that set this pointer is
                    // still blocked until every helper that joins calls
                    // `Job::leave`, which `Job::wait_for_helpers` waits on
                    // before the publishing call returns, so the referent
                    // outlives every use of this reference.
                    let job = unsafe { &*job_ptr };
                    job.register_helper();
                    return Some(job);
                }
            }
            slot = self
                .helpers_wake
                .wait(slot)
                .unwrap_or_else(std::sync::PoisonError::into_inner);
        }
    }

    /// Signals that no more help will be offered this search, waking every
    /// parked helper, then waits until they have all noticed and returned.
    pub fn release_all(&self) {
        {
            let mut slot = self.slot.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            slot.no_more_help = true;
        }
        self.helpers_wake.notify_all();

        let slot = self.slot.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        drop(
            self.helpers_wake
                .wait_while(slot, |slot| slot.waiting_helpers > 0)
                .unwrap_or_else(std::sync::PoisonError::into_inner),
        );
    }

    /// Resets the queue for a new top-level search.
    pub fn reset(&self) {
        let mut slot = self.slot.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        slot.job = None;
        slot.is_root = false;
        slot.taken = false;
        slot.no_more_help = false;
        slot.waiting_helpers = 0;
    }
}

impl Default for HelperQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc::channel;
    use std::sync::Mutex as StdMutex;
    use std::thread;

    use crate::{defs::Square, search::SharedState, transposition_table::TranspositionTable};

    #[test]
    fn publish_and_acquire_fork_the_position() {
        let queue = HelperQueue::new();
        let board = Board::default();
        let job = Job::new(
            board,
            vec![Move::new(Square::E2, Square::E4)],
            -crate::evaluation::INF_EVAL,
            crate::evaluation::INF_EVAL,
            Depth(4),
            Height(0),
            false,
        );

        let state = SharedState::new(StdMutex::new(channel().1), TranspositionTable::new());
        let worker = Worker::new(&state);

        thread::scope(|scope| {
            scope.spawn(|| {
                queue.publish(&job);
            });

            let joined = loop {
                if let Some(result) = queue.acquire(&worker) {
                    break result;
                }
            };
            assert!(joined.next_move().is_some());
            joined.leave();
        });
    }

    #[test]
    fn release_all_wakes_a_waiting_helper_with_none() {
        let queue = HelperQueue::new();
        let state = SharedState::new(StdMutex::new(channel().1), TranspositionTable::new());
        let worker = Worker::new(&state);

        thread::scope(|scope| {
            let handle = scope.spawn(|| queue.acquire(&worker));
            // give the helper a chance to park before releasing
            thread::yield_now();
            queue.release_all();
            assert!(handle.join().is_ok_and(|result| result.is_none()));
        });
    }

    #[test]
    fn job_report_detects_beta_cut() {
        let board = Board::default();
        let job = Job::new(board, vec![], 0, 10, Depth(4), Height(0), false);
        assert!(!job.report(Move::new(Square::E2, Square::E4), 5, &Pv::new()));
        assert!(job.report(Move::new(Square::D2, Square::D4), 15, &Pv::new()));
    }
}
