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

use std::{
    fmt::{self, Display, Formatter},
    mem::MaybeUninit,
    ops::{Deref, DerefMut},
    sync::{
        atomic::{AtomicU8, Ordering},
        mpsc::{Receiver, RecvError},
        Mutex,
    },
    time::{Duration, Instant},
};

use arrayvec::ArrayVec;

pub use depth::{CompressedDepth, Depth, Height};

use crate::{
    board::{Board, Key},
    defs::Side,
    evaluation::{is_mate, moves_to_mate, Eval},
    movegen::{Move, Moves},
    parallel::HelperQueue,
    transposition_table::TranspositionTable,
};

/// Runs the recursive negamax search at every depth.
pub mod alpha_beta_search;
/// Widens or narrows the window handed to the root search between
/// iterations.
pub mod aspiration;
/// [`Depth`], [`Height`] and [`CompressedDepth`].
mod depth;
/// The outer iterative deepening loop driving a top-level search.
pub mod iterative_deepening;
/// The staged move picker used inside the search worker.
mod movepick;
use movepick::{MovePicker, QuiescenceMovePicker};
/// The clock-to-thinking-time conversion.
pub mod time;

/// A marker trait distinguishing the three kinds of node a recursive search
/// call can be working on.
pub trait Node {
    /// Whether this node is searched with a non-null window.
    const IS_PV: bool;
    /// Whether this node is the root of the search tree.
    const IS_ROOT: bool;
}

/// A node searched with a null window, expected to fail either high or low.
pub struct NonPvNode;
/// A node searched with a full window, expected to be part of the PV.
pub struct PvNode;
/// The root of the search tree: always a [`PvNode`], plus root-only bookkeeping.
pub struct RootNode;

impl Node for NonPvNode {
    const IS_PV: bool = false;
    const IS_ROOT: bool = false;
}

impl Node for PvNode {
    const IS_PV: bool = true;
    const IS_ROOT: bool = false;
}

impl Node for RootNode {
    const IS_PV: bool = true;
    const IS_ROOT: bool = true;
}

/// How the current search should be cut off.
#[derive(Clone, Copy, Eq, PartialEq)]
pub enum Limits {
    /// Stop once the clock for the side to move runs out, minus overhead.
    Timed {
        /// Time left on the clock for the side to move.
        time: Duration,
        /// The increment gained after each move.
        inc: Duration,
        /// The number of moves left until the next time control, if known.
        moves_to_go: Option<CompressedDepth>,
    },
    /// Stop once a fixed depth has been reached.
    Depth(Depth),
    /// Stop once a fixed node count has been reached.
    Nodes(u64),
    /// Stop after a fixed amount of thinking time.
    Movetime(Duration),
    /// Stop as soon as a mate in this many moves (not plies) has been found,
    /// otherwise behaves like [`Self::Infinite`].
    Mate(u8),
    /// Never stop except on an explicit `stop` command.
    Infinite,
}

impl Default for Limits {
    fn default() -> Self {
        Self::Infinite
    }
}

impl Limits {
    /// Creates [`Self::Timed`] with no increment or moves-to-go information.
    pub const fn new_timed(time: Duration) -> Self {
        Self::Timed {
            time,
            inc: Duration::ZERO,
            moves_to_go: None,
        }
    }

    /// Sets the increment, if this is [`Self::Timed`].
    pub fn set_inc(&mut self, increment: Duration) {
        if let Self::Timed { inc, .. } = self {
            *inc = increment;
        }
    }

    /// Sets the moves-to-go, if this is [`Self::Timed`].
    pub fn set_moves_to_go(&mut self, mtg: CompressedDepth) {
        if let Self::Timed { moves_to_go, .. } = self {
            *moves_to_go = Some(mtg);
        }
    }
}

/// The status of an in-progress search, checked cooperatively at the top of
/// every node.
#[derive(Clone, Copy, Eq, PartialEq)]
pub enum SearchStatus {
    /// Keep searching.
    Continue,
    /// Stop and report `bestmove`, but keep the process alive.
    Stop,
    /// Stop, report `bestmove`, then exit the process.
    Quit,
}

impl From<u8> for SearchStatus {
    fn from(value: u8) -> Self {
        match value {
            1 => Self::Stop,
            2 => Self::Quit,
            _ => Self::Continue,
        }
    }
}

impl From<SearchStatus> for u8 {
    fn from(status: SearchStatus) -> Self {
        match status {
            SearchStatus::Continue => 0,
            SearchStatus::Stop => 1,
            SearchStatus::Quit => 2,
        }
    }
}

/// A stack of zobrist keys reached since the initial `position` command, used
/// for repetition detection.
#[allow(clippy::missing_docs_in_private_items)]
pub struct BoardHistory {
    history: ArrayVec<Key, { Depth::MAX.to_index() }>,
}

impl Deref for BoardHistory {
    type Target = ArrayVec<Key, { Depth::MAX.to_index() }>;

    fn deref(&self) -> &Self::Target {
        &self.history
    }
}

impl DerefMut for BoardHistory {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.history
    }
}

impl Default for BoardHistory {
    fn default() -> Self {
        Self::new()
    }
}

impl BoardHistory {
    /// Creates a new, empty [`BoardHistory`].
    pub fn new() -> Self {
        Self {
            history: ArrayVec::new(),
        }
    }

    /// Sets the contents of `self` to `other`.
    pub fn set_to(&mut self, other: &Self) {
        self.history.clear();
        for &key in other.iter() {
            // SAFETY: `other.len() <= self.capacity()`
            unsafe { self.history.push_unchecked(key) };
        }
    }
}

/// The number of killer slots kept for every ply: two that caused a cut at
/// this ply, and two shared up from a cut two plies deeper.
const KILLERS_PER_PLY: usize = 4;
/// Index of the first "two-plies-deeper" killer slot.
const DEEP_KILLER_START: usize = 2;

/// History, killer and repetition-detection state shared by a single worker
/// across the nodes of one top-level search.
struct Histories {
    /// A history of bonuses for previous quiets, indexed by side, start
    /// square then end square.
    butterfly_history: Box<[[[i32; 64]; 64]; 2]>,
    /// Killer moves per ply: see [`KILLERS_PER_PLY`].
    killers: [[Option<Move>; KILLERS_PER_PLY]; Depth::MAX.to_index() + 1],
    /// A stack of keys of previous board states, beginning from the initial
    /// `position` command.
    board_history: BoardHistory,
}

impl Histories {
    /// The cap placed on any history value, to keep the gravity formula from
    /// ever overflowing.
    const MAX_HISTORY_VAL: i32 = i32::MAX / 2;

    /// Creates new, empty [`Histories`].
    fn new() -> Self {
        Self {
            butterfly_history: Box::new([[[0; 64]; 64]; 2]),
            killers: [[None; KILLERS_PER_PLY]; Depth::MAX.to_index() + 1],
            board_history: BoardHistory::new(),
        }
    }

    /// Clears every history table apart from the board history.
    fn clear(&mut self) {
        self.butterfly_history = Box::new([[[0; 64]; 64]; 2]);
        self.killers = [[None; KILLERS_PER_PLY]; Depth::MAX.to_index() + 1];
    }

    /// The bonus awarded to a quiet move that produced a cut at `depth`.
    fn bonus(depth: Depth) -> i32 {
        i32::from(depth.0.clamp(0, 20)) * 200
    }

    /// Updates the butterfly history with a bonus for `best_move` and a
    /// penalty for every other quiet move tried at this node.
    fn update_butterfly_history(&mut self, quiet_moves: &Moves, best_move: Move, side: Side, depth: Depth) {
        let side = side.to_index();
        let abs_bonus = Self::bonus(depth);

        for scored_move in quiet_moves.iter() {
            let mv = scored_move.mv;
            let start = mv.start().to_index();
            let end = mv.end().to_index();
            let signed_bonus = if mv == best_move { abs_bonus } else { -abs_bonus };

            let val = &mut self.butterfly_history[side][start][end];
            // history gravity: the bonus shrinks as `val` approaches the cap
            // so the table self-normalises instead of saturating outright
            let delta = signed_bonus - abs_bonus * *val / Self::MAX_HISTORY_VAL;
            *val += delta;
        }
    }

    /// Returns the butterfly score of a move by `side`.
    fn history_score(&self, side: Side, mv: Move) -> i32 {
        self.butterfly_history[side.to_index()][mv.start().to_index()][mv.end().to_index()]
    }

    /// Records a beta cut at `height` with `mv`, inserting it as a killer at
    /// this ply and as a "two-plies-deeper" killer two plies shallower.
    fn insert_into_killers(&mut self, height: Height, mv: Move) {
        let slots = &mut self.killers[height.to_index()];
        if slots[0] != Some(mv) {
            slots[1] = slots[0];
            slots[0] = Some(mv);
        }

        if height.0 >= 2 {
            let deeper = &mut self.killers[height.to_index() - 2];
            if deeper[DEEP_KILLER_START] != Some(mv) {
                deeper[DEEP_KILLER_START + 1] = deeper[DEEP_KILLER_START];
                deeper[DEEP_KILLER_START] = Some(mv);
            }
        }
    }

    /// Returns the four killers of `height`.
    const fn current_killers(&self, height: Height) -> [Option<Move>; KILLERS_PER_PLY] {
        self.killers[height.to_index()]
    }

    /// Clears the plain (non-"two-plies-deeper") killers of the next ply
    /// before descending into it, so a stale killer from an unrelated branch
    /// of a previous iteration can't leak in before this node's own search
    /// populates it.
    fn clear_next_killers(&mut self, height: Height) {
        let next = height.to_index() + 1;
        if next <= Depth::MAX.to_index() {
            self.killers[next][0] = None;
            self.killers[next][1] = None;
        }
    }
}

/// Which sides are still allowed to try a null move at the current branch of
/// the search, to stop the verification search recursing forever.
#[derive(Clone, Copy)]
struct NmpRights(u8);

impl NmpRights {
    /// Both sides may attempt a null move.
    const fn new() -> Self {
        Self(0b11)
    }

    /// Whether `side` may currently attempt a null move.
    fn can_make_null_move(self, side: Side) -> bool {
        self.0 & (1 << side.to_index()) != 0
    }

    /// Forbids `side` from attempting a null move (used during the
    /// zugzwang-verification search at high depths).
    fn remove_right(&mut self, side: Side) {
        self.0 &= !(1 << side.to_index());
    }

    /// Restores `side`'s right to attempt a null move.
    fn add_right(&mut self, side: Side) {
        self.0 |= 1 << side.to_index();
    }
}

/// The maximum number of plies a [`Pv`] can hold.
const MAX_PV_LEN: usize = Depth::MAX.to_index() + 1;

/// The principal variation found so far at a node: a flat, non-circular
/// queue of moves.
pub struct Pv {
    /// The moves of the line, only `moves[..len]` of which are initialised.
    moves: [MaybeUninit<Move>; MAX_PV_LEN],
    /// How many moves of `moves` are initialised.
    len: usize,
}

/// An iterator over the moves of a [`Pv`].
pub struct PvIter<'a> {
    /// The [`Pv`] being iterated over.
    pv: &'a Pv,
    /// The index of the next move to yield.
    index: usize,
}

impl<'a> Iterator for PvIter<'a> {
    type Item = Move;

    fn next(&mut self) -> Option<Self::Item> {
        if self.index >= self.pv.len {
            return None;
        }
        // SAFETY: `index < len`, so this slot was initialised
        let mv = unsafe { self.pv.moves[self.index].assume_init() };
        self.index += 1;
        Some(mv)
    }
}

impl Display for Pv {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let mut moves = self.iter();
        if let Some(first) = moves.next() {
            write!(f, "{first}")?;
        }
        for mv in moves {
            write!(f, " {mv}")?;
        }
        Ok(())
    }
}

impl Default for Pv {
    fn default() -> Self {
        Self::new()
    }
}

impl Pv {
    /// Creates a new, empty [`Pv`].
    pub const fn new() -> Self {
        Self {
            moves: [MaybeUninit::uninit(); MAX_PV_LEN],
            len: 0,
        }
    }

    /// Empties the line without dropping its (`Copy`) contents.
    pub fn clear(&mut self) {
        self.len = 0;
    }

    /// Appends `mv` to the front of the line conceptually by writing it at
    /// index `0` and shifting nothing else: callers always clear before
    /// enqueuing the new best move, then append the child's line.
    pub fn enqueue(&mut self, mv: Move) {
        if self.len < MAX_PV_LEN {
            self.moves[self.len].write(mv);
            self.len += 1;
        }
    }

    /// Appends every move of `other` after the moves already in `self`.
    pub fn append_pv(&mut self, other: &Self) {
        for mv in other.iter() {
            self.enqueue(mv);
        }
    }

    /// Returns the move at `index`, or a null move if `index` is out of
    /// range.
    pub fn get(&self, index: usize) -> Move {
        if index < self.len {
            // SAFETY: `index < len`, so this slot was initialised
            unsafe { self.moves[index].assume_init() }
        } else {
            Move::null()
        }
    }

    /// Returns the number of moves in the line.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the line holds no moves.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Iterates over the moves of the line.
    pub fn iter(&self) -> PvIter<'_> {
        PvIter { pv: self, index: 0 }
    }
}

/// State shared, read-mostly, by every worker of one engine instance.
pub struct SharedState {
    /// The UCI command receiver, polled periodically during search for a
    /// `stop`/`quit` command.
    uci_rx: Mutex<Receiver<String>>,
    /// The shared transposition table.
    tt: TranspositionTable,
    /// The cooperative stop flag, shared by every worker of the current
    /// search.
    status: AtomicU8,
    /// The YBWC helper queue workers publish and acquire jobs through.
    helper_queue: HelperQueue,
}

impl SharedState {
    /// Creates new [`SharedState`] around `uci_rx` and `tt`.
    pub fn new(uci_rx: Mutex<Receiver<String>>, tt: TranspositionTable) -> Self {
        Self {
            uci_rx,
            tt,
            status: AtomicU8::new(SearchStatus::Continue.into()),
            helper_queue: HelperQueue::new(),
        }
    }

    /// Returns the shared transposition table.
    pub const fn tt(&self) -> &TranspositionTable {
        &self.tt
    }

    /// Resizes the shared transposition table to `size_mib` mebibytes.
    ///
    /// Requires exclusive access, since every worker's entries are
    /// invalidated by the reallocation.
    pub fn resize_tt(&mut self, size_mib: usize) {
        self.tt.resize(size_mib);
    }

    /// Returns the shared helper queue.
    pub const fn helper_queue(&self) -> &HelperQueue {
        &self.helper_queue
    }

    /// Cooperatively requests that every worker stop at its next node entry.
    pub fn request_stop(&self, status: SearchStatus) {
        self.status.store(status.into(), Ordering::Relaxed);
    }

    /// Resets the cooperative stop flag to [`SearchStatus::Continue`], ready
    /// for a fresh top-level search.
    pub fn reset_status(&self) {
        self.status.store(SearchStatus::Continue.into(), Ordering::Relaxed);
    }

    /// Blocks until a UCI command arrives and returns it.
    ///
    /// Only the main loop should call this, and only between searches: while
    /// a search is running, the client worker polls this same receiver for
    /// `stop`/`quit` via [`Worker::check_status`].
    pub fn recv_command(&self) -> Result<String, RecvError> {
        self.uci_rx.lock().expect("uci_rx mutex was poisoned").recv()
    }
}

/// A single search thread: either the client that owns the top-level call, or
/// a helper that joined a YBWC [`parallel::Job`](crate::parallel::Job).
pub struct Worker<'a> {
    /// State shared with every other worker of this search.
    state: &'a SharedState,
    /// History, killer and repetition state private to this worker.
    histories: Histories,
    /// The limits this search should respect.
    limits: Limits,
    /// When the current top-level search began.
    start: Instant,
    /// A safety margin subtracted from the time budget to account for
    /// communication and bookkeeping overhead.
    move_overhead: Duration,
    /// Nodes searched so far this top-level search.
    nodes: u64,
    /// The deepest ply reached so far this iteration.
    seldepth: Height,
    /// The depth being searched this iteration.
    depth: Depth,
    /// Whether this worker is allowed to print `info`/`bestmove` lines (only
    /// the client is).
    can_print: bool,
    /// The lowest ply at which a sibling at this worker's current branch has
    /// produced a beta cut, if any; checked at the top of every node.
    beta_cut_floor: Option<Height>,
    /// Whether the search right is allowed to make a null move for each
    /// side, disabled for a branch while a verification search is underway.
    nmp_rights: NmpRights,
    /// The static evaluation recorded for each ply reached so far this
    /// search, used to compute whether the position is improving.
    static_eval_stack: [Eval; Depth::MAX.to_index() + 1],
    /// If set by a `go searchmoves ...` command, restricts the root to only
    /// these moves.
    root_move_filter: Option<Vec<Move>>,
}

impl<'a> Worker<'a> {
    /// Creates a new client [`Worker`] around `state`.
    pub fn new(state: &'a SharedState) -> Self {
        Self {
            state,
            histories: Histories::new(),
            limits: Limits::default(),
            start: Instant::now(),
            move_overhead: Duration::ZERO,
            nodes: 0,
            seldepth: Height::default(),
            depth: Depth::default(),
            can_print: false,
            beta_cut_floor: None,
            nmp_rights: NmpRights::new(),
            static_eval_stack: [0; Depth::MAX.to_index() + 1],
            root_move_filter: None,
        }
    }

    /// Sets the board history this search should start from.
    pub fn with_board(mut self, board_history: &BoardHistory) -> Self {
        self.set_board(board_history);
        self
    }

    /// Sets whether this worker may print `info`/`bestmove` lines.
    pub const fn with_printing(mut self, can_print: bool) -> Self {
        self.can_print = can_print;
        self
    }

    /// Sets the limits this search should respect.
    pub fn with_limits(mut self, limits: Limits) -> Self {
        self.set_limits(limits);
        self
    }

    /// Sets the move overhead subtracted from the time budget.
    pub const fn with_move_overhead(mut self, move_overhead: Duration) -> Self {
        self.move_overhead = move_overhead;
        self
    }

    /// Replaces the board history this search should start from, for
    /// example after a new `position` command.
    pub fn set_board(&mut self, board_history: &BoardHistory) {
        self.histories.board_history.set_to(board_history);
    }

    /// Replaces the limits the next search should respect.
    pub fn set_limits(&mut self, limits: Limits) {
        self.limits = limits;
    }

    /// Restricts the next search's root to `moves`, or lifts any existing
    /// restriction if `None`.
    pub fn set_root_moves(&mut self, moves: Option<Vec<Move>>) {
        self.root_move_filter = moves;
    }

    /// Whether `mv` is allowed at the root, given any `searchmoves`
    /// restriction in effect.
    pub(super) fn is_root_move_allowed(&self, mv: Move) -> bool {
        self.root_move_filter.as_ref().map_or(true, |moves| moves.contains(&mv))
    }

    /// Runs iterative deepening on `board` until a stop condition is met,
    /// printing `bestmove` at the end if this worker can print.
    ///
    /// Only the client worker should call this; helpers should call
    /// [`Self::run_as_helper`] instead, after this worker's
    /// [`Self::reset_for_search`] has run.
    pub fn start_search(&mut self, board: &Board) {
        self.reset_for_search();
        self.state.tt.grow_old();
        self.state.helper_queue().reset();
        self.state.reset_status();
        self.iterative_deepening(board);
    }

    /// Clears the per-search state every worker of a fresh top-level search
    /// should start from, without touching the board history set by
    /// [`Self::with_board`] or the shared transposition table's generation
    /// (only the client advances that, once, in [`Self::start_search`]).
    pub fn reset_for_search(&mut self) {
        self.start = Instant::now();
        self.nodes = 0;
        self.histories.clear();
        self.nmp_rights = NmpRights::new();
        self.static_eval_stack = [0; Depth::MAX.to_index() + 1];
        self.beta_cut_floor = None;
    }

    /// Records the static evaluation reached at `height`, for later use by
    /// [`Self::is_improving`].
    fn record_static_eval(&mut self, height: Height, eval: Eval) {
        if let Some(slot) = self.static_eval_stack.get_mut(height.to_index()) {
            *slot = eval;
        }
    }

    /// Whether the static evaluation at `height` is better than it was two
    /// plies ago, suggesting the position has been improving for the side to
    /// move.
    fn is_improving(&self, height: Height, is_in_check: bool, static_eval: Eval) -> bool {
        if is_in_check || height.to_index() < 2 {
            return false;
        }
        self.static_eval_stack
            .get(height.to_index() - 2)
            .is_some_and(|&prev| static_eval > prev)
    }

    /// Returns the number of nodes searched so far this top-level search.
    pub const fn nodes(&self) -> u64 {
        self.nodes
    }

    /// Makes `mv` on `copy`, pushing it onto the worker's board history.
    ///
    /// Returns `false` (and leaves `copy` unmodified from the caller's point
    /// of view other than the attempted move) if `mv` leaves the mover's own
    /// king in check.
    fn make_move(&mut self, copy: &mut Board, mv: Move) -> bool {
        if !copy.make_move(mv) {
            return false;
        }
        self.push_board_history(copy.key());
        true
    }

    /// Undoes the bookkeeping performed by [`Self::make_move`].
    ///
    /// The board itself was a throwaway copy, so there is nothing to unmake
    /// on it; only the shared history stack needs popping.
    fn unmake_move(&mut self) {
        self.pop_board_history();
    }

    /// Makes a null move, tracked the same way a real move is.
    fn make_null_move(&mut self, copy: &mut Board) {
        copy.make_null_move();
        self.push_board_history(copy.key());
    }

    /// Undoes [`Self::make_null_move`].
    fn unmake_null_move(&mut self) {
        self.pop_board_history();
    }

    /// Pushes `key` onto the board history.
    fn push_board_history(&mut self, key: Key) {
        if self.histories.board_history.len() < self.histories.board_history.capacity() {
            self.histories.board_history.push(key);
        }
    }

    /// Pops the most recent key from the board history.
    fn pop_board_history(&mut self) {
        self.histories.board_history.pop();
    }

    /// Polls the UCI receiver (if this is the client) and checks the shared
    /// stop flag, returning the resulting [`SearchStatus`].
    fn check_status(&mut self) -> SearchStatus {
        if self.can_print {
            if let Ok(rx) = self.state.uci_rx.try_lock() {
                while let Ok(line) = rx.try_recv() {
                    match line.trim() {
                        "stop" => self.state.request_stop(SearchStatus::Stop),
                        "quit" => self.state.request_stop(SearchStatus::Quit),
                        _ => {}
                    }
                }
            }
        }

        if self.nodes % 2048 == 0 && self.should_stop(self.depth) {
            self.state.request_stop(SearchStatus::Stop);
        }

        SearchStatus::from(self.state.status.load(Ordering::Relaxed))
    }

    /// Decides whether a time/node/depth limit has been crossed.
    fn should_stop(&self, depth: Depth) -> bool {
        match self.limits {
            Limits::Infinite | Limits::Mate(_) => false,
            Limits::Depth(max) => depth >= max,
            Limits::Nodes(max) => self.nodes >= max,
            Limits::Movetime(time) => self.start.elapsed() >= time,
            Limits::Timed { .. } => {
                self.start.elapsed() >= time::calculate_time_window(self.limits, self.start, self.move_overhead)
            }
        }
    }

    /// Whether this worker is allowed to emit progress output.
    const fn should_print(&self) -> bool {
        self.can_print
    }

    /// Checks whether the current position is a draw by repetition or the
    /// fifty-move rule.
    ///
    /// Per the open question in the design notes: the original repetition
    /// check indexes four plies back from a shallow ply, which can read out
    /// of range; this guards the subtraction and falls back to a full
    /// linear scan instead of risking an out-of-range read.
    fn is_draw(&self, halfmoves: u8, current_key: Key) -> bool {
        if halfmoves >= 100 {
            return true;
        }

        let history = &self.histories.board_history;
        if history.len() < 2 {
            return false;
        }

        let limit = halfmoves as usize;
        let mut index = history.len();
        let mut step = 2;
        while step <= limit {
            if index < step {
                break;
            }
            index -= step;
            if history[index] == current_key {
                return true;
            }
            step += 2;
        }
        false
    }

    /// Checks whether a sibling has already produced a beta cut at or above
    /// `height`, meaning this branch should abandon its search immediately.
    fn should_abandon_for_beta_cut(&self, height: Height) -> bool {
        self.beta_cut_floor.is_some_and(|floor| floor <= height)
    }

    /// Broadcasts a beta cut at `height` to every helper sharing this
    /// worker's job, so siblings still searching stop promptly.
    fn broadcast_beta_cut(&mut self, height: Height) {
        self.beta_cut_floor = Some(match self.beta_cut_floor {
            Some(existing) if existing <= height => existing,
            _ => height,
        });
    }

    /// Clears the beta-cut broadcast for this level once post-processing for
    /// the node at that level has finished.
    fn clear_beta_cut(&mut self) {
        self.beta_cut_floor = None;
    }

    /// Prints a UCI `info` line reporting the result of one completed
    /// iteration.
    fn print_report(&self, score: Eval, pv: &Pv, depth: Depth) {
        if !self.can_print {
            return;
        }

        let time_ms = self.start.elapsed().as_millis().max(1);
        let nps = u128::from(self.nodes) * 1000 / time_ms;
        let score_str = if is_mate(score) {
            let moves = moves_to_mate(score);
            // `moves_to_mate` returns a plain 0 for "mated right now", which
            // would otherwise print indistinguishably from delivering mate
            // in 0; carry the side's sign explicitly.
            if moves == 0 && score < 0 {
                "mate -0".to_owned()
            } else {
                format!("mate {moves}")
            }
        } else {
            format!("cp {score}")
        };

        println!(
            "info depth {depth} seldepth {} score {score_str} time {time_ms} nodes {} nps {nps} hashfull {} pv {pv}",
            self.seldepth.to_index(),
            self.nodes,
            self.state.tt.utilization_permille(),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc::channel;

    fn worker() -> (SharedState, ()) {
        (
            SharedState::new(Mutex::new(channel().1), TranspositionTable::new()),
            (),
        )
    }

    #[test]
    fn pv_enqueue_and_append_preserve_order() {
        use crate::defs::Square;

        let mut pv = Pv::new();
        pv.enqueue(Move::new(Square::E2, Square::E4));
        let mut child = Pv::new();
        child.enqueue(Move::new(Square::E7, Square::E5));
        pv.append_pv(&child);

        let moves: Vec<_> = pv.iter().map(|mv| mv.to_string()).collect();
        assert_eq!(moves, vec!["e2e4".to_string(), "e7e5".to_string()]);
    }

    #[test]
    fn killers_share_two_plies_deeper() {
        use crate::defs::Square;

        let mut histories = Histories::new();
        let mv = Move::new(Square::G1, Square::F3);
        histories.insert_into_killers(Height(2), mv);

        assert_eq!(histories.current_killers(Height(2))[0], Some(mv));
        assert_eq!(histories.current_killers(Height(0))[DEEP_KILLER_START], Some(mv));
    }

    #[test]
    fn nmp_rights_round_trip() {
        let mut rights = NmpRights::new();
        assert!(rights.can_make_null_move(Side::WHITE));
        rights.remove_right(Side::WHITE);
        assert!(!rights.can_make_null_move(Side::WHITE));
        rights.add_right(Side::WHITE);
        assert!(rights.can_make_null_move(Side::WHITE));
    }

    #[test]
    fn fresh_worker_reports_zero_nodes() {
        let (state, ()) = worker();
        let worker = Worker::new(&state);
        assert_eq!(worker.nodes(), 0);
    }
}
