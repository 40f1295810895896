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

use std::time::{Duration, Instant};

use super::Limits;

impl Limits {
    /// The clock threshold above which the engine allots a fixed thinking
    /// time rather than a fraction of the clock.
    const LONG_CLOCK_THRESHOLD: Duration = Duration::from_millis(600_000);
    /// The fixed thinking time allotted once the clock crosses
    /// [`Self::LONG_CLOCK_THRESHOLD`].
    const LONG_CLOCK_ALLOTMENT: Duration = Duration::from_millis(60_000);
    /// The fraction of the remaining clock spent on one move otherwise.
    const CLOCK_FRACTION: u32 = 10;
}

/// Calculates the maximum window of time that should be used for the next
/// iterative deepening loop.
///
/// `moves_to_go` and `inc` are read for UCI compatibility but the allotment
/// itself only depends on the remaining clock: a clock of at least 600
/// seconds gets a flat 60 second allotment, otherwise a tenth of whatever is
/// left.
pub fn calculate_time_window(limits: Limits, start: Instant, move_overhead: Duration) -> Duration {
    if let Limits::Timed { time, .. } = limits {
        let allotment = if time >= Limits::LONG_CLOCK_THRESHOLD {
            Limits::LONG_CLOCK_ALLOTMENT
        } else {
            time / Limits::CLOCK_FRACTION
        };

        allotment.saturating_sub(start.elapsed() + move_overhead)
    } else {
        Duration::MAX
    }
}
