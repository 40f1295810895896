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
    mem::size_of,
    sync::atomic::{AtomicU8, Ordering},
    sync::Mutex,
};

use crate::{
    board::Key,
    evaluation::Eval,
    movegen::Move,
    search::{CompressedDepth, Depth, Height},
};

/// The bound of a score depending on how it was obtained.
#[derive(Clone, Copy, Eq, PartialEq)]
pub enum Bound {
    /// A lower bound: `best_score >= beta`.
    Lower,
    /// An exact bound: `alpha < best_score < beta`.
    Exact,
    /// An upper bound: `best_score <= alpha`.
    Upper,
}

/// A single entry in a transposition table.
#[derive(Clone, Copy)]
pub struct TranspositionEntry {
    /// The key, used as a checksum.
    key: Key,
    /// The static evaluation of the position.
    static_eval: Eval,
    /// The score of the position, normalised relative to the root.
    score: Eval,
    /// The best move in the position.
    mv: Option<Move>,
    /// The depth at which the score was obtained.
    depth: CompressedDepth,
    /// The bound of the score.
    bound: Bound,
    /// The search generation this entry was written in.
    age: u8,
    /// Whether this slot has ever been written to.
    occupied: bool,
}

impl Default for TranspositionEntry {
    fn default() -> Self {
        Self {
            key: 0,
            static_eval: 0,
            score: 0,
            mv: None,
            depth: CompressedDepth(0),
            bound: Bound::Upper,
            age: 0,
            occupied: false,
        }
    }
}

/// The information from a successful transposition table lookup.
#[derive(Clone, Copy)]
pub struct TranspositionHit {
    /// The static evaluation of the position.
    static_eval: Eval,
    /// The score of the position, denormalised relative to the probing node.
    score: Eval,
    /// The best move in the position.
    mv: Option<Move>,
    /// The depth at which the score was obtained.
    depth: Depth,
    /// The bound of the score.
    bound: Bound,
}

impl TranspositionEntry {
    /// Creates a new [`TranspositionEntry`] with the given attributes.
    ///
    /// `score` is normalised relative to `height` before storing, so that a
    /// mate score means the same thing no matter how deep in the tree it is
    /// read back from.
    pub fn new(
        key: Key,
        static_eval: Eval,
        score: Eval,
        mv: Option<Move>,
        depth: Depth,
        bound: Bound,
        height: Height,
        age: u8,
    ) -> Self {
        Self {
            key,
            static_eval,
            score: normalise(score, height),
            mv,
            depth: depth.into(),
            bound,
            age,
            occupied: true,
        }
    }

    /// Checks if a given key matches the stored key.
    const fn matches(self, key: Key) -> bool {
        self.occupied && self.key == key
    }

    /// Whether `self` should be replaced by an incoming entry written at
    /// `new_age` with `new_depth`.
    ///
    /// An empty slot is always replaced. Otherwise replace when the
    /// incoming entry is from a newer search generation, or searched at
    /// least as deep as what is already stored.
    fn should_replace(self, new_age: u8, new_depth: Depth) -> bool {
        !self.occupied || new_age >= self.age || Depth::from(self.depth) <= new_depth
    }
}

impl TranspositionHit {
    /// Creates a new [`TranspositionHit`] from a stored entry, denormalising
    /// the score back to be relative to `height`.
    fn new(entry: TranspositionEntry, height: Height) -> Self {
        Self {
            static_eval: entry.static_eval,
            score: denormalise(entry.score, height),
            mv: entry.mv,
            depth: entry.depth.into(),
            bound: entry.bound,
        }
    }

    /// Returns the static evaluation.
    pub const fn static_eval(self) -> Eval {
        self.static_eval
    }

    /// Returns the score.
    pub const fn score(self) -> Eval {
        self.score
    }

    /// Returns the best move.
    pub const fn mv(self) -> Option<Move> {
        self.mv
    }

    /// Returns the depth at which the score was obtained.
    pub const fn depth(self) -> Depth {
        self.depth
    }

    /// Returns the bound of the score.
    pub const fn bound(self) -> Bound {
        self.bound
    }
}

/// The number of lock stripes the table is divided into.
///
/// Must be a power of two. Chosen so that contention between worker threads
/// is low without the per-stripe bookkeeping overhead becoming significant
/// relative to the table itself.
const STRIPE_COUNT: usize = 64;
/// `log2(STRIPE_COUNT)`.
const STRIPE_BITS: u32 = STRIPE_COUNT.trailing_zeros();

/// One lock-protected shard of the table.
struct Stripe {
    /// The entries owned by this stripe.
    entries: Mutex<Vec<TranspositionEntry>>,
}

/// A transposition table: a hash of previously searched positions, striped
/// across independent locks so that concurrent workers rarely contend.
pub struct TranspositionTable {
    /// The stripes, selected by the high bits of a position's key.
    stripes: Vec<Stripe>,
    /// How many entries each stripe holds.
    entries_per_stripe: usize,
    /// The current search generation. Incremented once per top-level search
    /// by [`Self::grow_old()`].
    age: AtomicU8,
}

impl TranspositionTable {
    /// Creates a new, empty, zero-sized [`TranspositionTable`].
    pub fn new() -> Self {
        Self::with_capacity(0)
    }

    /// Creates a new [`TranspositionTable`] with the given size in MiB.
    pub fn with_capacity(size_mib: usize) -> Self {
        let mut tt = Self {
            stripes: Vec::new(),
            entries_per_stripe: 0,
            age: AtomicU8::new(0),
        };
        tt.resize(size_mib);
        tt
    }

    /// Resizes the table to the given size in MiB and clears it.
    pub fn resize(&mut self, size_mib: usize) {
        let total_entries = size_mib * 1024 * 1024 / size_of::<TranspositionEntry>();
        self.entries_per_stripe = (total_entries / STRIPE_COUNT).max(1);
        self.stripes = (0..STRIPE_COUNT)
            .map(|_| Stripe {
                entries: Mutex::new(vec![TranspositionEntry::default(); self.entries_per_stripe]),
            })
            .collect();
    }

    /// Clears every entry in the table without changing its size.
    pub fn clear(&self) {
        for stripe in &self.stripes {
            let mut entries = stripe.entries.lock().unwrap_or_else(|e| e.into_inner());
            entries.fill(TranspositionEntry::default());
        }
        self.age.store(0, Ordering::Relaxed);
    }

    /// Bumps the search generation used by the replacement policy.
    ///
    /// Called once at the start of each top-level search so that entries
    /// from the previous search are preferentially overwritten even when
    /// they were searched deeper.
    pub fn grow_old(&self) {
        self.age.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns the entry with the given key, or [`None`] if it doesn't exist
    /// or the stored key doesn't match (a hash collision).
    pub fn load(&self, key: Key, height: Height) -> Option<TranspositionHit> {
        let (stripe, index) = self.locate(key);
        let entries = stripe.entries.lock().unwrap_or_else(|e| e.into_inner());
        let entry = *entries.get(index)?;
        entry
            .matches(key)
            .then(|| TranspositionHit::new(entry, height))
    }

    /// Stores an entry, following the age/depth replacement policy.
    pub fn store(&self, mut entry: TranspositionEntry) {
        let (stripe, index) = self.locate(entry.key);
        let age = self.age.load(Ordering::Relaxed);
        entry.age = age;

        let mut entries = stripe.entries.lock().unwrap_or_else(|e| e.into_inner());
        let Some(slot) = entries.get_mut(index) else {
            return;
        };
        if slot.matches(entry.key) && !slot.should_replace(age, Depth::from(entry.depth)) {
            return;
        }
        *slot = entry;
    }

    /// Prefetches the entry with the given key into cache.
    ///
    /// Striping makes this a best-effort hint only: it touches the stripe's
    /// mutex-guarded storage without taking the lock, which is sound because
    /// a stale or torn read is simply ignored by the prefetch.
    pub fn prefetch(&self, _key: Key) {
        // Striped, mutex-guarded storage doesn't expose a stable address to
        // prefetch without taking the lock, which would defeat the purpose.
        // Left as a no-op seam for a future lock-free redesign.
    }

    /// Samples entries across every stripe and reports how many are
    /// occupied with the current search generation, per mille.
    pub fn utilization_permille(&self) -> usize {
        const SAMPLE_PER_STRIPE: usize = 1000 / STRIPE_COUNT;
        let age = self.age.load(Ordering::Relaxed);
        let mut occupied = 0;
        let mut sampled = 0;

        for stripe in &self.stripes {
            let entries = stripe.entries.lock().unwrap_or_else(|e| e.into_inner());
            for entry in entries.iter().take(SAMPLE_PER_STRIPE.max(1)) {
                sampled += 1;
                if entry.occupied && entry.age == age {
                    occupied += 1;
                }
            }
        }

        if sampled == 0 {
            0
        } else {
            occupied * 1000 / sampled
        }
    }

    /// Finds the stripe and within-stripe index that `key` maps to.
    fn locate(&self, key: Key) -> (&Stripe, usize) {
        let stripe_index = (key >> (u64::BITS - STRIPE_BITS)) as usize;
        let remaining_bits = key << STRIPE_BITS >> STRIPE_BITS;
        let within_stripe =
            ((u128::from(remaining_bits) * self.entries_per_stripe as u128) >> 64) as usize;
        (&self.stripes[stripe_index], within_stripe)
    }
}

impl Default for TranspositionTable {
    fn default() -> Self {
        Self::new()
    }
}

/// If `score` is a mate score, assume it is a mate score relative to the root
/// node and turn it into a mate score relative to the current node.
fn normalise(score: Eval, height: Height) -> Eval {
    use crate::evaluation::MATE_BOUND;

    if score <= -MATE_BOUND {
        score - Eval::from(height.0)
    } else if score >= MATE_BOUND {
        score + Eval::from(height.0)
    } else {
        score
    }
}

/// If `score` is a mate score, assume it is a mate score relative to the
/// current node and turn it into a mate score relative to the root node.
fn denormalise(score: Eval, height: Height) -> Eval {
    use crate::evaluation::MATE_BOUND;

    if score <= -MATE_BOUND {
        score + Eval::from(height.0)
    } else if score >= MATE_BOUND {
        score - Eval::from(height.0)
    } else {
        score
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::movegen::Move;

    fn board_key_mapping_to(tt: &TranspositionTable, stripe_index: usize) -> Key {
        // Construct a key whose top STRIPE_BITS bits select `stripe_index`.
        (stripe_index as u64) << (u64::BITS - STRIPE_BITS)
    }

    #[test]
    fn replacement_favours_newer_age() {
        let tt = TranspositionTable::with_capacity(1);
        let key = board_key_mapping_to(&tt, 3);

        tt.store(TranspositionEntry::new(
            key,
            0,
            10,
            None,
            Depth(5),
            Bound::Exact,
            Height(0),
            0,
        ));
        tt.grow_old();
        tt.store(TranspositionEntry::new(
            key,
            0,
            20,
            None,
            Depth(1),
            Bound::Exact,
            Height(0),
            0,
        ));

        let hit = tt.load(key, Height(0)).expect("entry should be present");
        assert_eq!(hit.score(), 20);
    }

    #[test]
    fn replacement_favours_deeper_same_age() {
        let tt = TranspositionTable::with_capacity(1);
        let key = board_key_mapping_to(&tt, 7);

        tt.store(TranspositionEntry::new(
            key,
            0,
            10,
            None,
            Depth(2),
            Bound::Exact,
            Height(0),
            0,
        ));
        tt.store(TranspositionEntry::new(
            key,
            0,
            30,
            None,
            Depth(1),
            Bound::Exact,
            Height(0),
            0,
        ));

        let hit = tt.load(key, Height(0)).expect("entry should be present");
        assert_eq!(hit.score(), 10, "shallower same-age entry must not replace a deeper one");
    }

    #[test]
    fn collision_is_ignored() {
        let tt = TranspositionTable::with_capacity(1);
        let key = board_key_mapping_to(&tt, 1);
        let other_key = key ^ 1;

        tt.store(TranspositionEntry::new(
            key, 0, 42, None, Depth(4), Bound::Exact, Height(0), 0,
        ));

        assert!(tt.load(other_key, Height(0)).is_none());
        let _ = Move::null();
    }
}
