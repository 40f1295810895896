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

use super::{Depth, Height, MovePicker, Node, NonPvNode, Pv, PvNode, QuiescenceMovePicker, SearchStatus, Worker};
use crate::{
    board::Board,
    evaluation::{evaluate, is_mate, mate_in, mated_in, Eval, DRAW, INF_EVAL, MATE_BOUND},
    lookups::base_reductions,
    movegen::{CapturesOnly, Evasions, Move, Moves, ScoredMove},
    parallel::Job,
    transposition_table::{Bound, TranspositionEntry},
};

/// The minimum depth a node must have reached before null-move pruning is
/// attempted.
const NMP_MIN_DEPTH: u8 = 3;
/// The depth past which a null-move fail-high is re-verified with a normal
/// search instead of trusted outright.
const NMP_VERIFICATION_DEPTH: u8 = 16;
/// The minimum depth at which internal iterative deepening kicks in.
const IID_MIN_DEPTH: i16 = 6;
/// How much shallower the internal-iterative-deepening pre-search is than the
/// node it seeds.
const IID_REDUCTION: u8 = 3;
/// The minimum depth at which probability cut pre-scans captures.
const PROBCUT_MIN_DEPTH: i16 = 5;
/// How much shallower a probability-cut pre-scan is than the node it runs
/// from.
const PROBCUT_REDUCTION: u8 = 3;
/// The margin added to beta for a probability-cut pre-scan.
const PROBCUT_MARGIN: Eval = 150;
/// The deepest remaining depth at which history pruning is considered.
const HISTORY_PRUNING_MAX_DEPTH: i16 = 4;
/// The per-depth margin a quiet move's history score must clear to avoid
/// being pruned outright.
const HISTORY_PRUNING_MARGIN: i32 = 3072;
/// The number of already-searched moves, at or above which a node becomes
/// eligible to publish a [`Job`] for idle helpers.
const YBWC_INVALID_MOVES: u8 = 4;
/// The shallowest remaining depth at which a node is eligible to publish a
/// [`Job`] for idle helpers.
const YBWC_LIMIT_DEPTH: i16 = 5;

/// Converts a [`Height`] to the equivalent [`Depth`], for use with the
/// mate-scoring helpers in [`crate::evaluation`], which are expressed in
/// plies from the root rather than from the leaf.
const fn height_as_depth(height: Height) -> Depth {
    Depth(height.0 as i16)
}

impl Worker<'_> {
    /// Performs a search on `board`.
    ///
    /// Returns the evaluation after searching to the given depth. If
    /// `NodeType` is [`super::RootNode`], `pv` will always have at least one
    /// legal move in it after the search.
    #[allow(clippy::cognitive_complexity, clippy::too_many_arguments, clippy::too_many_lines)]
    pub fn search<NodeType: Node>(
        &mut self,
        pv: &mut Pv,
        board: &Board,
        mut alpha: Eval,
        mut beta: Eval,
        depth: Depth,
        height: Height,
        is_cut_node: bool,
    ) -> Eval {
        if self.should_abandon_for_beta_cut(height) {
            return alpha;
        }

        if depth.0 <= 0 || height.is_maximum() {
            return self.quiescence_search(board, alpha, beta, height);
        }

        let is_in_check = board.is_in_check();
        self.seldepth = self.seldepth.max(height);
        self.nodes += 1;

        if !NodeType::IS_ROOT {
            if self.check_status() != SearchStatus::Continue {
                return alpha;
            }

            // Mate distance pruning.
            alpha = alpha.max(mated_in(height_as_depth(height)));
            beta = beta.min(mate_in(height_as_depth(height + 1)));
            if alpha >= beta {
                return alpha;
            }

            if self.is_draw(board.halfmoves(), board.key()) || !board.has_sufficient_material() {
                return DRAW;
            }
        }

        let tt_hit = self.state.tt().load(board.key(), height);
        if let Some(hit) = tt_hit {
            if !NodeType::IS_PV
                && hit.depth() >= depth
                && hit.score().abs() < MATE_BOUND
                && (hit.bound() == Bound::Exact
                    || hit.bound() == Bound::Lower && hit.score() >= beta
                    || hit.bound() == Bound::Upper && hit.score() <= alpha)
            {
                return hit.score();
            }
        }
        let tt_move = tt_hit.and_then(crate::transposition_table::TranspositionHit::mv);

        // Seed killers from a non-capture hash move even when the probe
        // didn't cut off outright, so later sibling moves still benefit
        // from its ordering.
        if let (Some(mv), Some(hit)) = (tt_move, tt_hit) {
            if board.is_quiet(mv) && hit.bound() != Bound::Upper {
                self.histories.insert_into_killers(height, mv);
            }
        }

        let static_eval = if is_in_check {
            -INF_EVAL
        } else {
            tt_hit.map_or_else(|| evaluate(board), crate::transposition_table::TranspositionHit::static_eval)
        };
        self.record_static_eval(height, static_eval);
        self.histories.clear_next_killers(height);

        let is_improving = self.is_improving(height, is_in_check, static_eval);

        // Internal iterative deepening: without a hash move to order first,
        // a shallower search gives the move picker something better to try
        // first than a blind guess.
        let iid_move = if NodeType::IS_PV && tt_move.is_none() && depth.0 >= IID_MIN_DEPTH {
            let mut iid_pv = Pv::new();
            self.search::<PvNode>(&mut iid_pv, board, alpha, beta, depth - IID_REDUCTION, height, is_cut_node);
            (!iid_pv.is_empty()).then(|| iid_pv.get(0))
        } else {
            None
        };

        if !NodeType::IS_PV && !is_in_check {
            if self.nmp_rights.can_make_null_move(board.side_to_move())
                && depth.0 >= i16::from(NMP_MIN_DEPTH)
                && static_eval >= beta
                && beta < MATE_BOUND
                && board.has_non_pawn_pieces()
            {
                let reduction = null_move_reduction(static_eval, beta, depth);

                let mut copy = *board;
                self.make_null_move(&mut copy);

                let mut new_pv = Pv::new();
                let mut score = -self.search::<NonPvNode>(
                    &mut new_pv,
                    &copy,
                    -beta,
                    -alpha,
                    depth - reduction,
                    height + 1,
                    !is_cut_node,
                );

                self.unmake_null_move();

                if score >= beta && score.abs() < MATE_BOUND {
                    if depth.0 <= i16::from(NMP_VERIFICATION_DEPTH) {
                        return score;
                    }

                    self.nmp_rights.remove_right(board.side_to_move());
                    new_pv.clear();
                    score = self.search::<NonPvNode>(&mut new_pv, board, alpha, beta, depth - reduction, height, is_cut_node);
                    self.nmp_rights.add_right(board.side_to_move());

                    if score >= beta {
                        return score;
                    }
                }
            }

            // Probability cut: a capture that still beats a raised beta even
            // at reduced depth is very likely to beat the real beta too.
            if depth.0 >= PROBCUT_MIN_DEPTH && beta < MATE_BOUND {
                let probcut_beta = beta.saturating_add(PROBCUT_MARGIN);
                let probcut_depth = depth - PROBCUT_REDUCTION;
                let mut probcut_picker = QuiescenceMovePicker::new::<CapturesOnly>(board);
                while let Some(mv) = probcut_picker.next(board) {
                    let mut copy = *board;
                    if !self.make_move(&mut copy, mv) {
                        continue;
                    }
                    let mut discard_pv = Pv::new();
                    let score = -self.search::<NonPvNode>(
                        &mut discard_pv,
                        &copy,
                        -probcut_beta,
                        -probcut_beta + 1,
                        probcut_depth,
                        height + 1,
                        true,
                    );
                    self.unmake_move();

                    if score >= probcut_beta {
                        return score;
                    }
                }
            }
        }

        let extension = if is_in_check { Depth(1) } else { Depth(0) };

        let mut best_score = -INF_EVAL;
        let mut best_move = None;
        let mut new_pv = Pv::new();
        let killers = self.histories.current_killers(height);
        let history = &self.histories.butterfly_history[board.side_to_move().to_index()];
        let late_move_threshold = late_move_threshold(depth, is_improving);
        let mut movepicker = MovePicker::new::<crate::movegen::AllMoves>(tt_move, iid_move, killers, history);

        let mut total_moves: u8 = 0;
        let mut quiet_moves = Moves::new();

        while let Some(mv) = movepicker.next(board) {
            if NodeType::IS_ROOT && !self.is_root_move_allowed(mv) {
                continue;
            }

            // Once the window has stabilised on the first few moves, offer
            // what's left to idle helpers under the Young Brothers Wait
            // Concept.
            if total_moves >= YBWC_INVALID_MOVES
                && depth.0 >= YBWC_LIMIT_DEPTH
                && self.state.helper_queue().has_idle_helper()
            {
                let mut remaining = vec![mv];
                while let Some(rest) = movepicker.next(board) {
                    remaining.push(rest);
                }

                let (job_score, job_move, job_pv, job_bound, job_has_legal) =
                    self.share_remaining_moves(board, remaining, alpha, beta, depth, height, is_cut_node);

                if job_has_legal {
                    total_moves += 1;
                    if job_score > best_score {
                        best_score = job_score;
                        best_move = Some(job_move);
                        if NodeType::IS_PV {
                            pv.clear();
                            pv.append_pv(&job_pv);
                        }
                    }
                    if job_score > alpha {
                        alpha = job_score;
                    }
                    if job_bound == Bound::Lower {
                        self.broadcast_beta_cut(height);
                        break;
                    }
                }
                break;
            }

            let is_quiet = board.is_quiet(mv);
            let mut copy = *board;
            if !self.make_move(&mut copy, mv) {
                continue;
            }
            self.state.tt().prefetch(copy.key());
            total_moves += 1;

            if NodeType::IS_ROOT && self.should_print() {
                println!("info currmove {mv} currmovenumber {total_moves}");
            }

            let mut reduction = base_reductions(depth, total_moves);
            let mut new_depth = depth - 1;

            if !NodeType::IS_PV && !is_in_check && !is_mate(best_score) {
                let lmr_depth = new_depth - reduction;

                if lmr_depth.0 <= 8 && total_moves >= late_move_threshold {
                    movepicker.skip_quiets();
                }

                if is_quiet && lmr_depth.0 <= 5 && static_eval.saturating_add(futility_margin(lmr_depth)) <= alpha {
                    movepicker.skip_quiets();
                }

                if is_quiet
                    && depth.0 <= HISTORY_PRUNING_MAX_DEPTH
                    && total_moves > 1
                    && self.histories.history_score(board.side_to_move(), mv) < -HISTORY_PRUNING_MARGIN * i32::from(depth.0)
                {
                    self.unmake_move();
                    continue;
                }
            }

            if is_quiet {
                quiet_moves.push(mv);
            }

            new_depth += extension;

            let mut score;
            if !NodeType::IS_PV || total_moves > 1 {
                if depth.0 >= 3 && total_moves >= 3 {
                    reduction += Depth::from(!NodeType::IS_PV);
                    reduction += Depth::from(!is_improving);
                    reduction += Depth::from(is_cut_node);
                    reduction = reduction.min(new_depth - 1);
                } else {
                    reduction = Depth::default();
                }

                score = -self.search::<NonPvNode>(&mut new_pv, &copy, -alpha - 1, -alpha, new_depth - reduction, height + 1, true);

                if score > alpha && reduction.0 > 0 {
                    score = -self.search::<NonPvNode>(&mut new_pv, &copy, -alpha - 1, -alpha, new_depth, height + 1, !is_cut_node);
                }
            } else {
                score = 0;
            }

            if NodeType::IS_PV && (score > alpha || total_moves == 1) {
                score = -self.search::<PvNode>(&mut new_pv, &copy, -beta, -alpha, new_depth, height + 1, false);
            }

            self.unmake_move();

            if self.check_status() != SearchStatus::Continue {
                if NodeType::IS_ROOT && pv.is_empty() {
                    pv.enqueue(mv);
                }
                return if NodeType::IS_ROOT { alpha } else { 0 };
            }

            best_score = best_score.max(score);

            if score > alpha {
                best_move = Some(mv);

                if !NodeType::IS_PV {
                    break;
                }

                alpha = score;
                pv.clear();
                pv.enqueue(mv);
                pv.append_pv(&new_pv);

                if alpha >= beta {
                    self.broadcast_beta_cut(height);
                    break;
                }
            }

            new_pv.clear();
        }

        self.clear_beta_cut();

        if !NodeType::IS_ROOT && total_moves == 0 {
            return if is_in_check { mated_in(height_as_depth(height)) } else { DRAW };
        }

        let bound = if best_score >= beta {
            Bound::Lower
        } else if best_move.is_none() {
            Bound::Upper
        } else {
            Bound::Exact
        };

        if let Some(best_move) = best_move {
            if board.is_quiet(best_move) {
                self.histories.insert_into_killers(height, best_move);
                self.histories.update_butterfly_history(&quiet_moves, best_move, board.side_to_move(), depth);
            }
        }

        let tt_entry = TranspositionEntry::new(board.key(), static_eval, best_score, best_move, depth, bound, height, 0);
        self.state.tt().store(tt_entry);

        best_score
    }

    /// Drains a shared-out tail of the move list through a [`Job`], letting
    /// idle helpers join while this worker keeps searching moves from the
    /// same list.
    fn share_remaining_moves(
        &mut self,
        board: &Board,
        remaining: Vec<Move>,
        alpha: Eval,
        beta: Eval,
        depth: Depth,
        height: Height,
        is_cut_node: bool,
    ) -> (Eval, Move, Pv, Bound, bool) {
        let job = Job::new(*board, remaining, alpha, beta, depth - 1, height + 1, !is_cut_node);

        while self.state.helper_queue().has_idle_helper() && job.has_remaining_moves() {
            // publishing just re-offers the job; the helper that answers
            // claims its own move via `next_move` once it joins.
            self.state.helper_queue().publish(&job);
            if job.current_alpha() >= job.beta() {
                break;
            }
        }

        self.process_job(&job);
        job.wait_for_helpers();
        job.into_result()
    }

    /// Works through `job`'s shared move list until it's empty or a beta cut
    /// is reported, searching each move at `job.depth()` from `job.height()`.
    pub(crate) fn process_job(&mut self, job: &Job) {
        let board = job.board();
        loop {
            if job.current_alpha() >= job.beta() {
                break;
            }
            let Some(mv) = job.next_move() else { break };

            let mut copy = board;
            if !self.make_move(&mut copy, mv) {
                continue;
            }

            let alpha = job.current_alpha();
            let beta = job.beta();
            let mut child_pv = Pv::new();
            let score = -self.search::<NonPvNode>(&mut child_pv, &copy, -beta, -alpha, job.depth(), job.height(), job.is_cut_node());

            self.unmake_move();

            if self.check_status() != SearchStatus::Continue {
                break;
            }

            if job.report(mv, score, &child_pv) {
                break;
            }
        }
    }

    /// Performs a search that only considers captures and uses a static
    /// evaluation at the leaf nodes.
    fn quiescence_search(&mut self, board: &Board, mut alpha: Eval, beta: Eval, height: Height) -> Eval {
        self.seldepth = self.seldepth.max(height);
        self.nodes += 1;

        if !board.has_sufficient_material() {
            return DRAW;
        }

        let is_in_check = board.is_in_check();
        let mut best_score = if is_in_check { mated_in(height_as_depth(height)) } else { evaluate(board) };

        if height.is_maximum() {
            return best_score;
        }

        alpha = alpha.max(best_score);
        if alpha >= beta {
            return alpha;
        }

        let mut movepicker = if is_in_check {
            QuiescenceMovePicker::new::<Evasions>(board)
        } else {
            QuiescenceMovePicker::new::<CapturesOnly>(board)
        };

        while let Some(mv) = movepicker.next(board) {
            let mut copy = *board;
            if !self.make_move(&mut copy, mv) {
                continue;
            }

            let score = -self.quiescence_search(&copy, -beta, -alpha, height + 1);
            self.unmake_move();

            if self.check_status() != SearchStatus::Continue {
                return 0;
            }

            best_score = best_score.max(score);
            alpha = alpha.max(score);
            if alpha >= beta {
                return alpha;
            }
        }

        best_score
    }
}

/// Calculates the reduction for a null move.
fn null_move_reduction(static_eval: Eval, beta: Eval, depth: Depth) -> Depth {
    let base = Depth(((static_eval - beta) / 200).min(6)) + depth / 3 + 3;
    base.min(depth - 1)
}

/// Calculates how many moves need to have been made before late move pruning
/// applies.
fn late_move_threshold(depth: Depth, is_improving: bool) -> u8 {
    let divisor = 2 - i32::from(is_improving);
    ((i32::from(depth.0) * i32::from(depth.0) + 4) / divisor) as u8
}

/// Calculates the margin for futility pruning.
fn futility_margin(depth: Depth) -> Eval {
    depth.0.max(0) * 80 + 70
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{board::Board, search::SharedState, transposition_table::TranspositionTable};
    use std::sync::{mpsc::channel, Mutex};

    #[test]
    fn fools_mate_is_found() {
        use crate::defs::Square;

        let state = SharedState::new(Mutex::new(channel().1), TranspositionTable::new());
        let mut worker = Worker::new(&state);

        // Fool's mate: 1. f3 e5 2. g4 Qh4#, leaving white to move and mated.
        let mut board = Board::default();
        for (start, end) in [
            (Square::F2, Square::F3),
            (Square::E7, Square::E5),
            (Square::G2, Square::G4),
            (Square::D8, Square::H4),
        ] {
            assert!(worker.make_move(&mut board, Move::new(start, end)));
        }

        let mut pv = Pv::new();
        let score = worker.search::<crate::search::RootNode>(&mut pv, &board, -INF_EVAL, INF_EVAL, Depth(4), Height(0), false);
        assert!(is_mate(score));
    }

    #[test]
    fn quiescence_is_stable_in_a_quiet_position() {
        let state = SharedState::new(Mutex::new(channel().1), TranspositionTable::new());
        let mut worker = Worker::new(&state);
        let board = Board::default();
        let score = worker.quiescence_search(&board, -INF_EVAL, INF_EVAL, Height(0));
        assert_eq!(score, evaluate(&board));
    }
}
