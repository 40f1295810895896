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
    sync::{mpsc::channel, Mutex},
    time::Instant,
};

use lazy_static::lazy_static;

use crate::{
    board::Board,
    search::{Limits, SharedState, Worker},
    transposition_table::TranspositionTable,
};

/// The depth [`bench`] searches to if none is given on the command line.
const DEFAULT_BENCH_DEPTH: u8 = 10;

/// How large the transposition table [`bench`] searches with should be, in
/// MiB.
const BENCH_HASH_MIB: usize = 16;

lazy_static! {
    /// A fixed, varied set of positions searched by [`bench`], so successive
    /// runs on the same binary are directly comparable to one another.
    static ref BENCH_POSITIONS: Vec<&'static str> = vec![
        "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1",
        "r3k2r/p1ppqpb1/bn2pnp1/3PN3/1p2P3/2N2Q1p/PPPBBPPP/R3K2R w KQkq - 0 1",
        "8/2p5/3p4/KP5r/1R3p1k/8/4P1P1/8 w - - 0 1",
        "r3k2r/Pppp1ppp/1b3nbN/nP6/BBP1P3/q4N2/Pp1P2PP/R2Q1RK1 w kq - 0 1",
        "rnbq1k1r/pp1Pbppp/2p5/8/2B5/8/PPP1NnPP/RNBQK2R w KQ - 0 1",
        "r3k2r/2pb1ppp/2pp1q2/p7/1nP1B3/1P2P3/P2N1PPP/R2QK2R w KQkq a6 0 1",
        "4rrk1/pp1n3p/3q2pQ/2p1pb2/2PP4/2P3N1/P2B2PP/4RRK1 b - - 7 19",
        "r3r1k1/2p2ppp/p1p1bn2/8/1q2P3/2NPQN2/PPP3PP/R4RK1 b - - 2 15",
        "2rr2k1/1p4bp/p1q1p1p1/4Pp1n/2PB4/1PN3P1/P3Q2P/2RR2K1 w - f6 0 20",
        "6k1/6p1/6Pp/ppp5/3pn2P/1P3K2/1PP2P2/3N4 b - - 0 1",
    ];
}

/// Runs a fixed-depth search across a fixed suite of positions and reports
/// the total node count and nodes-per-second, for comparing engine strength
/// and speed across builds.
///
/// `tokens` may optionally contain a single depth to search to, overriding
/// [`DEFAULT_BENCH_DEPTH`].
pub fn bench<'a>(mut tokens: impl Iterator<Item = &'a str>) {
    let depth = tokens
        .next()
        .and_then(|token| token.parse().ok())
        .unwrap_or(DEFAULT_BENCH_DEPTH);

    let mut total_nodes = 0_u64;
    let start = Instant::now();

    for fen in BENCH_POSITIONS.iter() {
        let Ok(board) = fen.parse::<Board>() else {
            continue;
        };

        let tt = TranspositionTable::with_capacity(BENCH_HASH_MIB);
        let state = SharedState::new(Mutex::new(channel().1), tt);
        let mut worker = Worker::new(&state)
            .with_printing(false)
            .with_limits(Limits::Depth(crate::search::Depth(depth.into())));

        worker.start_search(&board);
        total_nodes += worker.nodes();
    }

    let elapsed_ms = start.elapsed().as_millis().max(1);
    let nps = u128::from(total_nodes) * 1000 / elapsed_ms;

    println!("{total_nodes} nodes {nps} nps");
}
