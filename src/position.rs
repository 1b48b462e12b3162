use anyhow::{Context, Result};
use shakmaty::fen::Fen;
use shakmaty::uci::UciMove;
use shakmaty::zobrist::{Zobrist64, ZobristHash};
use shakmaty::{Board, CastlingMode, Chess, Color, EnPassantMode, Move, MoveList, Position as _};

/// Playing position: a `shakmaty::Chess` with its Zobrist key cached and the
/// keys of every earlier game position kept for repetition detection.
///
/// Move application is copy-make. `play` produces the child position the
/// search recurses into; the parent is never mutated, so a node's position is
/// trivially identical before and after searching its subtree.
#[derive(Clone, Debug)]
pub struct Position {
    chess: Chess,
    key: u64,
    history: Vec<u64>,
}

impl Default for Position {
    fn default() -> Self {
        Self::from_chess(Chess::default(), Vec::new())
    }
}

impl Position {
    fn from_chess(chess: Chess, history: Vec<u64>) -> Self {
        let key = chess.zobrist_hash::<Zobrist64>(EnPassantMode::Legal).0;
        Self { chess, key, history }
    }

    pub fn startpos() -> Self {
        Self::default()
    }

    pub fn from_fen(fen: &str) -> Result<Self> {
        let parsed: Fen = fen.parse().with_context(|| format!("invalid FEN {fen:?}"))?;
        let chess = parsed
            .into_position(CastlingMode::Standard)
            .with_context(|| format!("illegal position {fen:?}"))?;
        Ok(Self::from_chess(chess, Vec::new()))
    }

    pub fn side_to_move(&self) -> Color {
        self.chess.turn()
    }

    pub fn in_check(&self) -> bool {
        self.chess.is_check()
    }

    /// 64-bit Zobrist key, en-passant aware.
    pub fn hash(&self) -> u64 {
        self.key
    }

    /// Keys of every earlier position in the game, oldest first. The current
    /// position's own key is not included.
    pub fn game_history(&self) -> &[u64] {
        &self.history
    }

    pub fn is_fifty_move_draw(&self) -> bool {
        self.chess.halfmoves() >= 100
    }

    pub fn is_material_draw(&self) -> bool {
        self.chess.is_insufficient_material()
    }

    pub fn legal_moves(&self) -> MoveList {
        self.chess.legal_moves()
    }

    /// Captures and promotions. When in check every legal evasion qualifies,
    /// so quiescence can refute unsound checks.
    pub fn non_quiet_moves(&self) -> MoveList {
        let mut moves = self.chess.legal_moves();
        if !self.in_check() {
            moves.retain(|m| m.is_capture() || m.is_promotion());
        }
        moves
    }

    /// Copy-make: the position after the legal move `m`. The child carries no
    /// game history; the search tracks its own line of keys.
    pub fn play(&self, m: &Move) -> Position {
        let mut chess = self.chess.clone();
        chess.play_unchecked(m);
        let key = chess.zobrist_hash::<Zobrist64>(EnPassantMode::Legal).0;
        Position { chess, key, history: Vec::new() }
    }

    /// Applies a game move in place, recording the predecessor in the history.
    /// Used when replaying a move list from the GUI, not during search.
    pub fn apply(&mut self, m: &Move) {
        self.history.push(self.key);
        self.chess.play_unchecked(m);
        self.key = self.chess.zobrist_hash::<Zobrist64>(EnPassantMode::Legal).0;
    }

    pub fn parse_uci_move(&self, s: &str) -> Result<Move> {
        let uci: UciMove = s.parse().with_context(|| format!("unparsable move {s:?}"))?;
        uci.to_move(&self.chess)
            .with_context(|| format!("illegal move {s:?}"))
    }

    pub fn board(&self) -> &Board {
        self.chess.board()
    }
}

impl std::fmt::Display for Position {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "{:?}", self.chess.board())?;
        let stm = match self.side_to_move() {
            Color::White => "white",
            Color::Black => "black",
        };
        write!(f, "{stm} to move")
    }
}
