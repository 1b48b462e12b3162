use arrayvec::ArrayVec;
use shakmaty::{Color, Move};

pub type Score = i32;

pub const SCORE_INFINITE: Score = 32_000;
pub const SCORE_MATE: Score = 31_000;
pub const SCORE_DRAW: Score = 0;
/// Sentinel for "no score recorded"; outside the [-INFINITE, INFINITE] range.
pub const SCORE_NONE: Score = 32_500;

pub const MAX_PLY: usize = 128;
pub const DEFAULT_HASH_MB: usize = 64;

/// Scores at or beyond this magnitude encode a forced mate.
pub const SCORE_MATE_IN_MAX_PLY: Score = SCORE_MATE - MAX_PLY as Score;

/// Mate score for the side to move delivering mate in `ply` plies.
pub fn mate_in(ply: usize) -> Score {
    SCORE_MATE - ply as Score
}

/// Mate score for the side to move being mated in `ply` plies.
pub fn mated_in(ply: usize) -> Score {
    -SCORE_MATE + ply as Score
}

pub fn is_mate_score(score: Score) -> bool {
    score.abs() >= SCORE_MATE_IN_MAX_PLY && score.abs() < SCORE_NONE
}

/// Index into per-side arrays (time controls).
pub fn side_index(color: Color) -> usize {
    match color {
        Color::White => 0,
        Color::Black => 1,
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Bound {
    None,
    /// True score <= stored score (fail-low, no move raised alpha).
    Upper,
    /// True score >= stored score (beta cutoff).
    Lower,
    /// Stored score is the minimax value for the stored depth.
    Exact,
}

/// A principal variation: moves from the current node, at most one per ply.
pub type Pv = ArrayVec<Move, MAX_PLY>;

/// Limits for one `search()` invocation. Zero means "unlimited" everywhere.
#[derive(Clone, Debug, Default)]
pub struct SearchLimits {
    /// Remaining clock time in ms, indexed by `side_index`.
    pub time_left: [u64; 2],
    /// Per-move increment in ms, indexed by `side_index`.
    pub increment: [u64; 2],
    /// Moves until the next time control; 0 = unknown.
    pub moves_to_go: u32,
    pub max_depth: i32,
    pub max_nodes: u64,
    /// Fixed time for this move in ms.
    pub max_time: u64,
    /// When non-empty, root search considers only these moves.
    pub search_moves: Vec<Move>,
}

/// Snapshot reported after each completed depth and on search termination.
#[derive(Clone, Debug)]
pub struct SearchEvent {
    pub depth: i32,
    pub pv: Vec<Move>,
    pub score: Score,
    pub nodes: u64,
    pub elapsed_ms: u64,
    /// Transposition table fill, in permille.
    pub hashfull: u32,
}
