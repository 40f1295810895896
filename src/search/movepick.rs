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

use crate::{
    board::Board,
    evaluation::Eval,
    movegen::{generate_moves, CapturesOnly, KingMovesOnly, Move, Moves, MovesType, QuietsOnly, ScoredMove},
};

/// The stage of move picking.
#[derive(PartialEq, Eq)]
enum Stage {
    /// Return the TT move.
    TtMove,
    /// Return the move suggested by internal iterative deepening.
    IidMove,
    /// Generate all captures.
    GenerateCaptures,
    /// Return all good captures.
    GoodCaptures,
    /// Return the first killer.
    FirstKiller,
    /// Return the second killer.
    SecondKiller,
    /// Return the first killer shared down from a cut two plies deeper.
    ThirdKiller,
    /// Return the second killer shared down from a cut two plies deeper.
    FourthKiller,
    /// Generate all remaining moves (i.e. quiets).
    GenerateRemaining,
    /// Return all remaining moves (bad captures and quiets).
    Remaining,
}

/// The number of killer slots a [`MovePicker`] is handed.
pub const KILLER_SLOTS: usize = 4;

/// A selector of the next best move in a position, ordered hash move, IID
/// move, captures refined by static exchange evaluation, killers, quiets by
/// history, then bad captures.
#[allow(clippy::missing_docs_in_private_items)]
pub struct MovePicker<'a> {
    tt_move: Option<Move>,
    iid_move: Option<Move>,
    killers: [Option<Move>; KILLER_SLOTS],
    stage: Stage,
    moves: Moves,
    skip_non_king_quiets: bool,
    skip_king_quiets: bool,
    history: &'a [[i32; 64]; 64],
}

impl<'a> MovePicker<'a> {
    /// Creates a new [`MovePicker`] based on the information in `board`,
    /// the hash move, the internal-iterative-deepening move, the four
    /// killer slots for this ply and the quiet-history table for the side
    /// to move.
    pub fn new<Type: MovesType>(
        tt_move: Option<Move>,
        iid_move: Option<Move>,
        killers: [Option<Move>; KILLER_SLOTS],
        history: &'a [[i32; 64]; 64],
    ) -> Self {
        assert!(
            Type::CAPTURES,
            "the movepicker relies on always generating captures"
        );
        Self {
            tt_move,
            iid_move,
            killers,
            stage: Stage::TtMove,
            moves: Moves::new(),
            skip_non_king_quiets: !Type::NON_KING_QUIETS,
            skip_king_quiets: !Type::KING_QUIETS,
            history,
        }
    }

    /// Returns the next best [`Move`] in the list of legal moves.
    pub fn next(&mut self, board: &Board) -> Option<Move> {
        if self.stage == Stage::TtMove {
            self.stage = Stage::IidMove;
            if self.tt_move.is_some() {
                return self.tt_move;
            }
        }

        if self.stage == Stage::IidMove {
            self.stage = Stage::GenerateCaptures;
            if self.iid_move.is_some() && self.iid_move != self.tt_move {
                return self.iid_move;
            }
        }

        if self.stage == Stage::GenerateCaptures {
            self.stage = Stage::GoodCaptures;
            generate_moves::<CapturesOnly>(board, &mut self.moves);
            // SAFETY: either `self.moves.len() - 1` is a valid index,
            // or it's 0, in which case `moves[0..0]` will return an
            // empty array
            unsafe { self.score::<CapturesOnly>(board, 0, self.moves.len()) };
        }

        if self.stage == Stage::GoodCaptures {
            if let Some(scored_move) = self.find_next_best(board) {
                return Some(scored_move.mv);
            }
            // this also skips bad captures
            if self.skip_non_king_quiets && self.skip_king_quiets {
                return None;
            }
            self.stage = Stage::FirstKiller;
        }

        if self.stage == Stage::FirstKiller {
            self.stage = Stage::SecondKiller;
            if let Some(mv) = self.next_killer(board, 0) {
                return Some(mv);
            }
        }

        if self.stage == Stage::SecondKiller {
            self.stage = Stage::ThirdKiller;
            if let Some(mv) = self.next_killer(board, 1) {
                return Some(mv);
            }
        }

        if self.stage == Stage::ThirdKiller {
            self.stage = Stage::FourthKiller;
            if let Some(mv) = self.next_killer(board, 2) {
                return Some(mv);
            }
        }

        if self.stage == Stage::FourthKiller {
            self.stage = Stage::GenerateRemaining;
            if let Some(mv) = self.next_killer(board, 3) {
                return Some(mv);
            }
        }

        if self.stage == Stage::GenerateRemaining {
            self.stage = Stage::Remaining;
            let total_non_quiets = self.moves.len();
            if self.skip_non_king_quiets {
                generate_moves::<KingMovesOnly>(board, &mut self.moves);
                // SAFETY: `total_non_quiets..self.moves.len()` is
                // always valid
                unsafe {
                    self.score::<KingMovesOnly>(board, total_non_quiets, self.moves.len());
                }
            } else {
                generate_moves::<QuietsOnly>(board, &mut self.moves);
                // SAFETY: `total_non_quiets..self.moves.len()` is
                // always valid
                unsafe {
                    self.score::<QuietsOnly>(board, total_non_quiets, self.moves.len());
                }
            }
            self.apply_history_scores(total_non_quiets);
        }

        debug_assert!(self.stage == Stage::Remaining, "unhandled stage");
        self.find_next_best(board).map(|scored_move| scored_move.mv)
    }

    /// Stops generating and returning quiet moves from this point on,
    /// leaving only killers already queued and remaining captures.
    pub fn skip_quiets(&mut self) {
        self.skip_non_king_quiets = true;
    }

    /// Returns killer slot `index` if it hasn't already been returned as the
    /// hash move, IID move, or an earlier killer, and is still pseudolegal.
    fn next_killer(&self, board: &Board, index: usize) -> Option<Move> {
        let mv = self.killers[index]?;
        if Some(mv) == self.tt_move || Some(mv) == self.iid_move {
            return None;
        }
        if self.killers[..index].contains(&Some(mv)) {
            return None;
        }
        board.is_pseudolegal_killer(mv).then_some(mv)
    }

    /// Adds a bonus, scaled down from the raw butterfly-history value, to
    /// every quiet move in `moves[start..]`.
    fn apply_history_scores(&mut self, start: usize) {
        let history = self.history;
        for index in start..self.moves.len() {
            // SAFETY: `index < self.moves.len()`
            let scored_move = unsafe { self.moves.get_unchecked_mut(index) };
            let bonus = history[scored_move.mv.start().to_index()][scored_move.mv.end().to_index()] / 64;
            scored_move.score += bonus as Eval;
        }
    }

    /// Finds the next best move in the current list of generated moves.
    fn find_next_best(&mut self, board: &Board) -> Option<ScoredMove> {
        loop {
            if self.moves.is_empty() {
                return None;
            }

            let mut best_score = -Eval::MAX;
            let mut best_index = 0;
            for (index, scored_move) in self.moves.iter().enumerate() {
                if scored_move.score > best_score {
                    best_score = scored_move.score;
                    best_index = index;
                }
            }

            // SAFETY: `best_index` was created from within `self.moves` so it
            // must be valid
            let scored_move = unsafe { self.moves.get_unchecked_mut(best_index) };

            if self.tt_move == Some(scored_move.mv)
                || self.iid_move == Some(scored_move.mv)
                || self.killers.contains(&Some(scored_move.mv))
            {
                self.moves.remove(best_index);
                continue;
            }

            if best_score >= ScoredMove::WINNING_CAPTURE_SCORE
                && !board.is_winning_exchange(scored_move.mv)
            {
                scored_move.score -= ScoredMove::WINNING_CAPTURE_SCORE;
                continue;
            }

            if self.stage == Stage::GoodCaptures && scored_move.score < ScoredMove::WINNING_CAPTURE_SCORE {
                return None;
            }

            return Some(self.moves.remove(best_index));
        }
    }

    /// Scores the moves in `moves[start..end]`.
    ///
    /// The slice does not bounds check: if `moves[start..end]` would have
    /// panicked, this function will have undefined behaviour.
    unsafe fn score<Type: MovesType>(&mut self, board: &Board, start: usize, end: usize) {
        // SAFETY: it's up to the caller to make sure this index is safe
        let moves = unsafe { self.moves.get_unchecked_mut(start..end).iter_mut() };
        for mv in moves {
            mv.score::<Type>(board);
        }
    }
}

/// A move picker restricted to generating captures and evasions, used inside
/// quiescence search.
#[allow(clippy::missing_docs_in_private_items)]
pub struct QuiescenceMovePicker {
    moves: Moves,
    scored: bool,
}

impl QuiescenceMovePicker {
    /// Creates a [`QuiescenceMovePicker`] that will generate moves of `Type`
    /// (either [`CapturesOnly`](crate::movegen::CapturesOnly) or
    /// [`Evasions`](crate::movegen::Evasions)) the first time [`Self::next`]
    /// is called.
    pub fn new<Type: MovesType>(board: &Board) -> Self {
        let mut moves = Moves::new();
        generate_moves::<Type>(board, &mut moves);
        for scored_move in moves.iter_mut() {
            scored_move.score::<Type>(board);
        }
        Self { moves, scored: true }
    }

    /// Returns the next best move, greedily.
    pub fn next(&mut self, board: &Board) -> Option<Move> {
        debug_assert!(self.scored, "QuiescenceMovePicker moves were never scored");

        loop {
            if self.moves.is_empty() {
                return None;
            }

            let mut best_score = -Eval::MAX;
            let mut best_index = 0;
            for (index, scored_move) in self.moves.iter().enumerate() {
                if scored_move.score > best_score {
                    best_score = scored_move.score;
                    best_index = index;
                }
            }

            // SAFETY: `best_index` was created from within `self.moves` so it
            // must be valid
            let scored_move = unsafe { self.moves.get_unchecked_mut(best_index) };

            if best_score >= ScoredMove::WINNING_CAPTURE_SCORE && !board.is_winning_exchange(scored_move.mv) {
                scored_move.score -= ScoredMove::WINNING_CAPTURE_SCORE;
                continue;
            }

            return Some(self.moves.remove(best_index).mv);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::defs::Square;

    #[test]
    fn next_killer_rejects_duplicate_of_tt_move() {
        let board = Board::default();
        let history = [[0; 64]; 64];
        let mv = Move::new(Square::B1, Square::C3);
        let picker = MovePicker::new::<crate::movegen::AllMoves>(Some(mv), None, [Some(mv), None, None, None], &history);
        assert_eq!(picker.next_killer(&board, 0), None);
    }
}
