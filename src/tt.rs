use shakmaty::Move;

use crate::types::{Bound, Score, SCORE_MATE_IN_MAX_PLY, SCORE_NONE};

#[derive(Clone, Debug)]
pub struct TTEntry {
    /// Full Zobrist key, for collision detection.
    pub key: u64,
    pub depth: u8,
    pub bound: Bound,
    pub mv: Option<Move>,
    /// Stored with mate distances made node-relative; see `score_to_tt`.
    pub score: Score,
    /// Standing-pat evaluation recorded by quiescence, `SCORE_NONE` otherwise.
    pub static_eval: Score,
    /// Search generation, for aging out stale entries.
    pub age: u8,
    /// Entry was produced by a PV node.
    pub pv: bool,
}

impl Default for TTEntry {
    fn default() -> Self {
        Self {
            key: 0,
            depth: 0,
            bound: Bound::None,
            mv: None,
            score: SCORE_NONE,
            static_eval: SCORE_NONE,
            age: 0,
            pv: false,
        }
    }
}

/// Convert a search score to its table form: mate distances become relative
/// to the storing node so the entry stays valid on any path reaching it.
pub fn score_to_tt(score: Score, ply: usize) -> Score {
    if score == SCORE_NONE {
        SCORE_NONE
    } else if score >= SCORE_MATE_IN_MAX_PLY {
        score + ply as Score
    } else if score <= -SCORE_MATE_IN_MAX_PLY {
        score - ply as Score
    } else {
        score
    }
}

/// Inverse of `score_to_tt`: rebase a stored mate distance onto the probing
/// node's ply. `SCORE_NONE` passes through untouched.
pub fn score_from_tt(score: Score, ply: usize) -> Score {
    if score == SCORE_NONE {
        SCORE_NONE
    } else if score >= SCORE_MATE_IN_MAX_PLY {
        score - ply as Score
    } else if score <= -SCORE_MATE_IN_MAX_PLY {
        score + ply as Score
    } else {
        score
    }
}

/// A stored score is sufficient to cut the current window when it is exact,
/// a lower bound already failing high, or an upper bound already failing low.
pub fn bound_match(bound: Bound, score: Score, alpha: Score, beta: Score) -> bool {
    match bound {
        Bound::Exact => true,
        Bound::Lower => score >= beta,
        Bound::Upper => score <= alpha,
        Bound::None => false,
    }
}

pub struct TranspositionTable {
    entries: Vec<TTEntry>,
    mask: usize,
    generation: u8,
}

impl TranspositionTable {
    /// Create a table of roughly `mb` megabytes, rounded to a power of two.
    pub fn new(mb: usize) -> Self {
        let entry_size = std::mem::size_of::<TTEntry>();
        let num_entries = (mb * 1024 * 1024) / entry_size;
        let size = (num_entries.next_power_of_two() / 2).max(1024);

        Self {
            entries: vec![TTEntry::default(); size],
            mask: size - 1,
            generation: 0,
        }
    }

    /// Bump the generation; called once per `search()` so entries from earlier
    /// searches lose replacement priority without being wiped.
    pub fn new_search(&mut self) {
        self.generation = self.generation.wrapping_add(1);
    }

    pub fn probe(&self, hash: u64) -> Option<&TTEntry> {
        let entry = &self.entries[hash as usize & self.mask];
        if entry.key == hash && entry.bound != Bound::None {
            Some(entry)
        } else {
            None
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub fn store(
        &mut self,
        hash: u64,
        depth: i32,
        ply: usize,
        bound: Bound,
        mv: Option<Move>,
        static_eval: Score,
        score: Score,
        pv: bool,
    ) {
        let idx = hash as usize & self.mask;
        let entry = &self.entries[idx];

        // Depth-preferred replacement with aging: keep the deeper entry unless
        // it is stale or describes another position's slot collision.
        let depth = depth.clamp(0, u8::MAX as i32) as u8;
        let should_replace = entry.bound == Bound::None
            || entry.key == hash
            || depth >= entry.depth
            || entry.age != self.generation;

        if !should_replace {
            return;
        }

        self.entries[idx] = TTEntry {
            key: hash,
            depth,
            bound,
            mv,
            score: score_to_tt(score, ply),
            static_eval,
            age: self.generation,
            pv,
        };
    }

    pub fn clear(&mut self) {
        for entry in self.entries.iter_mut() {
            *entry = TTEntry::default();
        }
        self.generation = 0;
    }

    /// Table fill in permille, sampled over the first entries like the
    /// conventional UCI `hashfull` figure.
    pub fn usage(&self) -> u32 {
        let sample = self.entries.len().min(1000);
        let used = self.entries[..sample]
            .iter()
            .filter(|e| e.bound != Bound::None && e.age == self.generation)
            .count();
        (used * 1000 / sample) as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SCORE_MATE;

    #[test]
    fn store_then_probe_roundtrips() {
        let mut tt = TranspositionTable::new(1);
        let hash = 0x1234_5678_9ABC_DEF0;

        tt.store(hash, 5, 0, Bound::Exact, None, 17, 100, true);

        let entry = tt.probe(hash).expect("stored entry should be found");
        assert_eq!(entry.depth, 5);
        assert_eq!(entry.score, 100);
        assert_eq!(entry.static_eval, 17);
        assert_eq!(entry.bound, Bound::Exact);
        assert!(entry.pv);
    }

    #[test]
    fn probe_miss_on_unknown_key() {
        let tt = TranspositionTable::new(1);
        assert!(tt.probe(0xDEAD_BEEF).is_none());
    }

    #[test]
    fn mate_scores_rebase_across_plies() {
        // Mate in 3 more plies, found at ply 3: node-relative distance is 3.
        let at_ply3 = SCORE_MATE - 6;
        let stored = score_to_tt(at_ply3, 3);
        assert_eq!(stored, SCORE_MATE - 3);

        // Probing the same position at ply 5 sees mate in 3 from there.
        assert_eq!(score_from_tt(stored, 5), SCORE_MATE - 8);

        // Negative mates mirror.
        let mated = -SCORE_MATE + 6;
        assert_eq!(score_from_tt(score_to_tt(mated, 3), 5), -SCORE_MATE + 8);
    }

    #[test]
    fn score_none_survives_conversion() {
        assert_eq!(score_to_tt(SCORE_NONE, 10), SCORE_NONE);
        assert_eq!(score_from_tt(SCORE_NONE, 10), SCORE_NONE);
    }

    #[test]
    fn bound_match_semantics() {
        assert!(bound_match(Bound::Exact, 0, -10, 10));
        assert!(bound_match(Bound::Lower, 15, -10, 10));
        assert!(!bound_match(Bound::Lower, 5, -10, 10));
        assert!(bound_match(Bound::Upper, -15, -10, 10));
        assert!(!bound_match(Bound::Upper, 5, -10, 10));
        assert!(!bound_match(Bound::None, 0, -10, 10));
    }

    #[test]
    fn deeper_search_replaces_shallower() {
        let mut tt = TranspositionTable::new(1);
        let hash = 0x12345;

        tt.store(hash, 3, 0, Bound::Exact, None, SCORE_NONE, 50, false);
        tt.store(hash, 6, 0, Bound::Exact, None, SCORE_NONE, 75, false);

        let entry = tt.probe(hash).unwrap();
        assert_eq!(entry.depth, 6);
        assert_eq!(entry.score, 75);
    }

    #[test]
    fn clear_empties_the_table() {
        let mut tt = TranspositionTable::new(1);
        tt.store(42, 1, 0, Bound::Exact, None, SCORE_NONE, 1, false);
        assert!(tt.usage() > 0);
        tt.clear();
        assert!(tt.probe(42).is_none());
        assert_eq!(tt.usage(), 0);
    }
}
