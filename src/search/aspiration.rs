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

use std::mem::size_of;

use super::{Depth, Height, Pv, RootNode, SearchStatus, Worker};
use crate::{
    board::Board,
    evaluation::{Eval, INF_EVAL},
};

/// An aspiration window: a set of bounds searched at one iteration, widened
/// if the returned score fails high or low.
pub struct AspirationWindow {
    /// The lower bound.
    alpha: Eval,
    /// The upper bound.
    beta: Eval,
    /// How much higher or lower the bounds should be set above the returned
    /// score (if the score is a bound).
    margin: Eval,
}

impl AspirationWindow {
    /// The highest a margin can be before it's given up on and the window is
    /// opened all the way to infinity on that side.
    const MARGIN_LIMIT: Eval = 700;
}

impl AspirationWindow {
    /// Returns a new [`AspirationWindow`] with infinite bounds and no margin.
    pub const fn new() -> Self {
        Self { alpha: -INF_EVAL, beta: INF_EVAL, margin: 0 }
    }

    /// Narrows the window's bounds around `score`, ready for the next
    /// iteration.
    pub fn adjust_around(&mut self, score: Eval, depth: Depth) {
        // small depths get a higher margin, as do scores with a large
        // magnitude; `widening_mul()` is still nightly unfortunately
        assert!(
            size_of::<Eval>() * 2 == size_of::<i32>(),
            "an Eval must be half the size of an i32 or the following calculation could overflow"
        );
        let unbounded_margin = 50 / i32::from(depth.0).min(5) + i32::from(score) * i32::from(score) / 3_000;

        self.margin = Eval::try_from(unbounded_margin).unwrap_or(INF_EVAL);
        self.alpha = score.saturating_sub(self.margin);
        self.beta = score.saturating_add(self.margin);
    }

    /// Returns the lower bound.
    const fn alpha(&self) -> Eval {
        self.alpha
    }

    /// Returns the upper bound.
    const fn beta(&self) -> Eval {
        self.beta
    }

    /// Raises the upper bound above `score`.
    fn widen_up(&mut self, score: Eval) {
        if self.margin > Self::MARGIN_LIMIT {
            self.beta = INF_EVAL;
            return;
        }
        self.margin *= 2;
        self.beta = score.saturating_add(self.margin);
    }

    /// Whether the upper bound can still be raised.
    const fn can_widen_up(&self) -> bool {
        self.beta() < INF_EVAL
    }

    /// Lowers the lower bound below `score`.
    fn widen_down(&mut self, score: Eval) {
        if self.margin > Self::MARGIN_LIMIT {
            self.alpha = -INF_EVAL;
            return;
        }
        self.margin *= 2;
        // same as `score.saturating_sub(self.margin)`, but saturates at
        // `-Eval::MAX` instead of `Eval::MIN`
        self.alpha = -(-score).saturating_add(self.margin);
    }

    /// Whether the lower bound can still be lowered.
    const fn can_widen_down(&self) -> bool {
        self.alpha() > -INF_EVAL
    }
}

impl Default for AspirationWindow {
    fn default() -> Self {
        Self::new()
    }
}

impl Worker<'_> {
    /// Searches `board` to `depth`, widening `window` and retrying whenever
    /// the score falls outside it.
    ///
    /// See <https://www.chessprogramming.org/Aspiration_Windows>. `pv` does
    /// not need to be empty going in.
    pub(super) fn aspiration_loop(&mut self, pv: &mut Pv, board: &Board, window: &mut AspirationWindow, depth: Depth) -> Eval {
        loop {
            let score = self.search::<RootNode>(pv, board, window.alpha(), window.beta(), depth, Height(0), false);

            self.print_report(score, pv, depth);

            if self.check_status() != SearchStatus::Continue {
                break score;
            }

            if score <= window.alpha() && window.can_widen_down() {
                window.widen_down(score);
                continue;
            }

            if score >= window.beta() && window.can_widen_up() {
                window.widen_up(score);
                continue;
            }

            break score;
        }
    }
}
