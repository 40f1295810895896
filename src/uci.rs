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
    io::stdin,
    iter::Peekable,
    ops::RangeInclusive,
    str::FromStr,
    sync::{mpsc::RecvError, Mutex},
    thread::{scope, spawn},
    time::Duration,
};

use crate::{
    bench::bench,
    board::Board,
    defs::{File, PieceType, Side, Square},
    movegen::Move,
    perft::perft,
    search::{BoardHistory, CompressedDepth, Depth, Limits, SharedState, Worker},
    transposition_table::TranspositionTable,
};

/// The name of the author of this engine.
const ID_AUTHOR: &str = "Jasper Shovelton";
/// The name of this engine.
const ID_NAME: &str = "Crab";
/// The version of this engine.
const ID_VERSION: &str = env!("CARGO_PKG_VERSION");

/// The `go` tokens that terminate an in-progress `searchmoves` list.
const GO_KEYWORDS: [&str; 11] = [
    "searchmoves",
    "ponder",
    "wtime",
    "btime",
    "winc",
    "binc",
    "movestogo",
    "depth",
    "nodes",
    "mate",
    "movetime",
];

/// The UCI options this engine supports.
#[derive(Clone, Copy)]
pub struct UciOptions {
    /// The overhead of sending a move from the engine to the GUI.
    move_overhead: Duration,
    /// How many threads should be used.
    threads: usize,
    /// How large the transposition table should be, in MiB.
    hash: usize,
    /// Whether pondering is enabled. Accepted but does not currently change
    /// search behaviour: see [`go`]'s handling of a bare `ponder` token.
    ponder: bool,
    /// Whether analysis mode is enabled. Accepted for GUI compatibility; this
    /// engine doesn't change its search behaviour in analysis mode.
    analyse_mode: bool,
}

#[allow(clippy::missing_docs_in_private_items)]
impl UciOptions {
    /// The range that the move overhead can take, in milliseconds.
    pub const MOVE_OVERHEAD_RANGE: RangeInclusive<u64> = 0..=1_000;
    /// The range that the number of threads can take.
    pub const THREAD_RANGE: RangeInclusive<usize> = 1..=256;
    /// The range that the hash size can take.
    // hardware limit: 48-bit pointers
    pub const HASH_RANGE: RangeInclusive<usize> = 1..=2_usize.pow(48) / (1024 * 1024);
}

impl Default for UciOptions {
    fn default() -> Self {
        Self {
            move_overhead: Duration::from_millis(16),
            threads: 1,
            hash: 32,
            ponder: false,
            analyse_mode: false,
        }
    }
}

impl UciOptions {
    /// Creates new [`UciOptions`] with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Prints the identification of this engine and all the UCI options it
    /// supports.
    fn print() {
        let defaults = Self::default();
        let move_overhead_range = Self::MOVE_OVERHEAD_RANGE;
        let thread_range = Self::THREAD_RANGE;
        let hash_range = Self::HASH_RANGE;

        println!("id name {ID_NAME} {ID_VERSION}");
        println!("id author {ID_AUTHOR}");
        println!(
            "option name Move Overhead type spin default {} min {} max {}",
            defaults.move_overhead().as_millis(),
            move_overhead_range.start(),
            move_overhead_range.end(),
        );
        println!(
            "option name Threads type spin default {} min {} max {}",
            defaults.threads(),
            thread_range.start(),
            thread_range.end(),
        );
        println!(
            "option name Hash type spin default {} min {} max {}",
            defaults.hash(),
            hash_range.start(),
            hash_range.end(),
        );
        println!("option name Clear Hash type button");
        println!("option name Ponder type check default false");
        println!("option name UCI_AnalyseMode type check default false");
    }

    /// Sets the move overhead, in milliseconds, clamped in the range
    /// [`MOVE_OVERHEAD_RANGE`](Self::MOVE_OVERHEAD_RANGE).
    pub fn set_move_overhead(&mut self, duration: u64) {
        self.move_overhead = Duration::from_millis(duration.clamp(
            *Self::MOVE_OVERHEAD_RANGE.start(),
            *Self::MOVE_OVERHEAD_RANGE.end(),
        ));
    }

    /// Sets the thread count, clamped in the range
    /// [`THREAD_RANGE`](Self::THREAD_RANGE).
    pub fn set_threads(&mut self, threads: usize) {
        self.threads = threads.clamp(*Self::THREAD_RANGE.start(), *Self::THREAD_RANGE.end());
    }

    /// Sets the hash size, clamped in the range
    /// [`HASH_RANGE`](Self::HASH_RANGE).
    pub fn set_hash(&mut self, hash: usize) {
        self.hash = hash.clamp(*Self::HASH_RANGE.start(), *Self::HASH_RANGE.end());
    }

    /// Sets whether pondering is enabled.
    pub fn set_ponder(&mut self, ponder: bool) {
        self.ponder = ponder;
    }

    /// Sets whether analysis mode is enabled.
    pub fn set_analyse_mode(&mut self, analyse_mode: bool) {
        self.analyse_mode = analyse_mode;
    }

    /// Returns the move overhead.
    pub const fn move_overhead(&self) -> Duration {
        self.move_overhead
    }

    /// Returns the number of threads.
    pub const fn threads(&self) -> usize {
        self.threads
    }

    /// Returns the hash size.
    pub const fn hash(&self) -> usize {
        self.hash
    }
}

/// Repeatedly waits for a command and executes it according to the UCI
/// protocol.
///
/// Will run until [`recv()`](std::sync::mpsc::Receiver::recv) on the UCI
/// receiver returns an error or the process exits.
pub fn main_loop() -> Result<(), RecvError> {
    let (uci_tx, uci_rx) = std::sync::mpsc::channel();

    spawn(move || {
        let stdin = stdin();

        for command in stdin.lines() {
            let command = command.expect("error while reading from stdin");
            uci_tx
                .send(command)
                .expect("the main thread never exits before this one");
        }
    });

    let mut options = UciOptions::new();
    let mut board = Board::new();
    board.set_startpos();
    let mut board_history = BoardHistory::new();
    let tt = TranspositionTable::with_capacity(options.hash());
    let mut state = SharedState::new(Mutex::new(uci_rx), tt);
    let mut workers = create_workers(&state, &board_history, options.threads(), options.move_overhead());

    loop {
        let command = state.recv_command()?;
        let mut tokens = command.split_whitespace();

        match tokens.next() {
            Some("bench") => bench(tokens),
            Some("go") => go(tokens, &board, &mut workers),
            Some("isready") => println!("readyok"),
            Some("p") => board.pretty_print(),
            Some("position") => {
                set_position(tokens, &mut board_history, &mut board);
                for worker in &mut workers {
                    worker.set_board(&board_history);
                }
            }
            Some("ponderhit" | "stop") => {}
            Some("setoption") => {
                set_option(tokens, &mut options, &mut state);
                workers = create_workers(&state, &board_history, options.threads(), options.move_overhead());
            }
            Some("uci") => {
                UciOptions::print();
                println!("uciok");
            }
            Some("ucinewgame") => {
                board.set_startpos();
                board_history.clear();
                state.tt().clear();
                workers = create_workers(&state, &board_history, options.threads(), options.move_overhead());
            }
            Some("quit") => break Ok(()),
            Some(other) => println!("info string unrecognised command \"{other}\""),
            None => {}
        }
    }
}

/// Interprets and executes the `go` command.
fn go<'a, 'b, T>(given_limits: T, board: &Board, workers: &mut [Worker<'a>])
where
    T: Iterator<Item = &'b str>,
{
    let mut tokens: Peekable<T> = given_limits.peekable();
    let mut limits = Limits::default();
    let mut root_moves: Option<Vec<Move>> = None;
    let mut is_pondering = false;

    while let Some(token) = tokens.next() {
        match token {
            "searchmoves" => {
                let mut moves = Vec::new();
                while let Some(&next_token) = tokens.peek() {
                    if GO_KEYWORDS.contains(&next_token) {
                        break;
                    }
                    if let Some(mv) = parse_move(next_token, board).filter(|&mv| board.is_pseudolegal(mv)) {
                        moves.push(mv);
                    }
                    tokens.next();
                }
                root_moves = Some(moves);
            }
            "ponder" => is_pondering = true,
            "wtime" if board.side_to_move() == Side::WHITE => {
                if let Some(time) = parse_time(tokens.next()) {
                    limits = Limits::new_timed(time);
                }
            }
            "btime" if board.side_to_move() == Side::BLACK => {
                if let Some(time) = parse_time(tokens.next()) {
                    limits = Limits::new_timed(time);
                }
            }
            "winc" if board.side_to_move() == Side::WHITE => {
                if let Some(time) = parse_time(tokens.next()) {
                    limits.set_inc(time);
                }
            }
            "binc" if board.side_to_move() == Side::BLACK => {
                if let Some(time) = parse_time(tokens.next()) {
                    limits.set_inc(time);
                }
            }
            "movestogo" => {
                if let Some(mtg) = parse_into_nonzero_option(tokens.next()) {
                    limits.set_moves_to_go(CompressedDepth(mtg));
                }
            }
            "depth" => {
                if let Some(depth) = parse_into_nonzero_option::<u8>(tokens.next()) {
                    limits = Limits::Depth(Depth(depth.into()));
                }
            }
            "nodes" => {
                if let Some(nodes) = parse_into_nonzero_option(tokens.next()) {
                    limits = Limits::Nodes(nodes);
                }
            }
            "mate" => {
                if let Some(moves) = parse_into_nonzero_option(tokens.next()) {
                    limits = Limits::Mate(moves);
                }
            }
            "movetime" => {
                if let Some(movetime) = parse_time(tokens.next()) {
                    limits = Limits::Movetime(movetime);
                }
            }
            "infinite" => limits = Limits::Infinite,
            "perft" => {
                if let Some(depth) = parse_into_nonzero_option(tokens.next()) {
                    perft::<true, true>(board, depth);
                }
                return;
            }
            _ => (),
        }
    }

    // pondering isn't given a separate time budget of its own: the clock
    // doesn't start until `ponderhit`, which this engine doesn't yet defer
    // to, so a pondering search just runs unbounded until `stop`.
    if is_pondering {
        limits = Limits::Infinite;
    }

    let Some((client, helpers)) = workers.split_first_mut() else {
        return;
    };
    client.set_limits(limits);
    client.set_root_moves(root_moves);

    scope(|s| {
        let client_handle = s.spawn(move || client.start_search(board));
        for helper in helpers {
            s.spawn(move || helper.run_as_helper());
        }
        client_handle.join().expect("the client worker panicked during search");
    });
}

/// Sets the board to a position specified by the `position` command.
///
/// Will not change anything if the command fails to get parsed
/// successfully; see also [`parse_move`]'s handling of individual moves.
fn set_position<'b, T>(mut tokens: T, old_history: &mut BoardHistory, old_board: &mut Board)
where
    T: Iterator<Item = &'b str>,
{
    let mut board = Board::new();
    let mut board_history = BoardHistory::new();

    match tokens.next() {
        Some("startpos") => board.set_startpos(),
        Some("fen") => {
            let mut fen_str = String::with_capacity(128);

            // a position-notation string has exactly six fields
            for _ in 0..6 {
                let Some(token) = tokens.next() else {
                    return;
                };
                fen_str.push_str(token);
                fen_str.push(' ');
            }

            let Ok(parsed) = fen_str.parse() else {
                return;
            };
            board = parsed;
        }
        _ => return,
    }

    if let Some(token) = tokens.next() {
        if token != "moves" {
            return;
        }
    }

    // an illegal move in the list is skipped rather than aborting the whole
    // command, so a GUI's slightly-too-eager move list can't desync us
    for mv in tokens {
        let Some(mv) = parse_move(mv, &board).filter(|&mv| board.is_pseudolegal(mv)) else {
            continue;
        };

        if !board.make_move(mv) {
            continue;
        }

        if board.halfmoves() == 0 {
            board_history.clear();
        }
        if board_history.len() < board_history.capacity() {
            board_history.push(board.key());
        }
    }

    *old_board = board;
    old_history.set_to(&board_history);
}

/// Sets a UCI option from a `setoption` command.
fn set_option<'b, T>(mut tokens: T, options: &mut UciOptions, state: &mut SharedState)
where
    T: Iterator<Item = &'b str>,
{
    if tokens.next() != Some("name") {
        return;
    }

    match tokens.next() {
        Some("Move") => {
            if tokens.next() != Some("Overhead") {
                return;
            }
            if tokens.next() != Some("value") {
                return;
            }
            if let Some(d) = parse_option(tokens.next()) {
                options.set_move_overhead(d);
            }
        }
        Some("Threads") => {
            if tokens.next() != Some("value") {
                return;
            }
            if let Some(t) = parse_option(tokens.next()) {
                options.set_threads(t);
            }
        }
        Some("Hash") => {
            if tokens.next() != Some("value") {
                return;
            }
            if let Some(h) = parse_option(tokens.next()) {
                options.set_hash(h);
                state.resize_tt(h);
            }
        }
        Some("Clear") => {
            if tokens.next() != Some("Hash") {
                return;
            }
            state.tt().clear();
        }
        Some("Ponder") => {
            if tokens.next() != Some("value") {
                return;
            }
            if let Some(p) = parse_option(tokens.next()) {
                options.set_ponder(p);
            }
        }
        Some("UCI_AnalyseMode") => {
            if tokens.next() != Some("value") {
                return;
            }
            if let Some(a) = parse_option(tokens.next()) {
                options.set_analyse_mode(a);
            }
        }
        _ => (),
    }
}

/// Creates `threads` [`Worker`]s sharing `state`, all starting from
/// `board_history`.
fn create_workers<'a>(state: &'a SharedState, board_history: &BoardHistory, threads: usize, move_overhead: Duration) -> Vec<Worker<'a>> {
    (0..threads)
        .map(|_| Worker::new(state).with_board(board_history).with_move_overhead(move_overhead))
        .collect()
}

/// Parses a move in long algebraic notation into a [`Move`].
///
/// Returns [`None`] if the move cannot be parsed. Whether the result is
/// actually legal from `board` is left to the caller.
fn parse_move(string: &str, board: &Board) -> Option<Move> {
    let start: Square = string.get(0..=1)?.parse().ok()?;
    let end: Square = string.get(2..=3)?.parse().ok()?;
    let piece = board.piece_on(start);

    // if the move is fully legal, these will always be correct
    let is_promotion = string.len() == 5;
    let is_castling = PieceType::from(piece) == PieceType::KING && File::from(start).0.abs_diff(File::from(end).0) == 2;
    let is_en_passant = PieceType::from(piece) == PieceType::PAWN && end == board.ep_square();

    if is_castling {
        let is_white = board.side_to_move() == Side::WHITE;
        let is_kingside = File::from(end).0 >= File::FILE5.0;
        Some(new_castle_any(is_white, is_kingside))
    } else if is_promotion {
        let promotion_char = string.chars().next_back()?;
        let piece_type = PieceType::try_from(promotion_char).ok()?;
        Some(Move::new_promo_any(start, end, piece_type))
    } else if is_en_passant {
        Some(Move::new_en_passant(start, end))
    } else {
        Some(Move::new(start, end))
    }
}

/// Builds a castling move at runtime.
///
/// [`Move::new_castle`] is generic over both sides at compile time, so a move
/// parsed from wire text needs this to pick one of its four instantiations.
fn new_castle_any(is_white: bool, is_kingside: bool) -> Move {
    match (is_white, is_kingside) {
        (true, true) => Move::new_castle::<true, true>(),
        (true, false) => Move::new_castle::<true, false>(),
        (false, true) => Move::new_castle::<false, true>(),
        (false, false) => Move::new_castle::<false, false>(),
    }
}

/// Parses an `Option<&str>` into an `Option<T>`.
///
/// If the parse fails, it will return [`None`].
fn parse_option<T: FromStr>(num: Option<&str>) -> Option<T> {
    num.and_then(|t| t.parse::<T>().ok())
}

/// Parses an `Option<&str>` into an `Option<T>`.
///
/// Returns [`None`] if the result of the parse is 0 or an `Err`.
fn parse_into_nonzero_option<T: FromStr + PartialEq<T> + From<u8>>(num: Option<&str>) -> Option<T> {
    parse_option(num).and_then(|t| if t == T::from(0) { None } else { Some(t) })
}

/// Parses an `Option<&str>` into an `Option<Duration>`, where the string is
/// some kind of length of time.
///
/// Returns `None` if `num` cannot be parsed. If `num` can be parsed but is
/// negative, it will return [`Some`] with a small amount of time to account
/// for GUIs that send a negative time near a flag-fall.
fn parse_time(num: Option<&str>) -> Option<Duration> {
    parse_option::<i32>(num)
        .map(|t| if t < 0 { 1000 } else { t })
        // SAFETY: `t` was just made non-negative
        .map(|t| unsafe { u64::try_from(t).unwrap_unchecked() })
        .map(Duration::from_millis)
}
