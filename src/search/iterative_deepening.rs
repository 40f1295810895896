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

use std::process::exit;

use super::{aspiration::AspirationWindow, Depth, Height, Limits, Pv, SearchStatus, Worker};
use crate::{
    board::Board,
    evaluation::{is_mate, moves_to_mate},
    movegen::Move,
};

/// The number of completed iterations to keep searching for after a mate is
/// first found, so a shallower, noisier mate score isn't reported over one
/// found with more confidence.
const ITERATIONS_PAST_MATE: u8 = 4;

impl Worker<'_> {
    /// Deepens the search on `board` one ply at a time until a stop
    /// condition is met, printing `bestmove` at the end if this worker is
    /// allowed to print.
    ///
    /// Only the client worker should call this; helpers should call
    /// [`Self::run_as_helper`] instead.
    pub(super) fn iterative_deepening(&mut self, board: &Board) {
        let mut pv = Pv::new();
        let mut best_move = Move::null();
        let mut window = AspirationWindow::new();
        let mut iterations_since_mate = 0_u8;

        for raw_depth in 1_u8.. {
            let depth = Depth(raw_depth.into());
            self.depth = depth;
            self.seldepth = Height(0);

            if self.should_print() {
                println!("info depth {depth}");
            }

            let score = self.aspiration_loop(&mut pv, board, &mut window, depth);

            // the root search guarantees at least one legal move ends up in
            // the pv
            best_move = pv.get(0);
            window.adjust_around(score, depth);

            if is_mate(score) {
                iterations_since_mate += 1;
            } else {
                iterations_since_mate = 0;
            }

            if let Limits::Mate(target) = self.limits {
                if is_mate(score) && moves_to_mate(score).unsigned_abs() <= u16::from(target) && score > 0 {
                    self.state.request_stop(SearchStatus::Stop);
                }
            }

            if self.check_status() != SearchStatus::Continue || iterations_since_mate > ITERATIONS_PAST_MATE {
                break;
            }

            pv.clear();
        }

        self.state.helper_queue().release_all();

        if !self.should_print() {
            return;
        }

        println!("bestmove {best_move}");

        if self.check_status() == SearchStatus::Quit {
            exit(0);
        }
    }

    /// Loops acquiring and running shared [`parallel::Job`](crate::parallel::Job)s
    /// until the queue is released at the end of the top-level search.
    pub fn run_as_helper(&mut self) {
        self.reset_for_search();
        loop {
            let Some(job) = self.state.helper_queue().acquire(self) else {
                break;
            };
            self.process_job(job);
            job.leave();
        }
    }
}
