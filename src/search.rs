use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use log::debug;
use shakmaty::Move;

use crate::evaluation::evaluate;
use crate::movepicker::MovePicker;
use crate::position::Position;
use crate::tt::{bound_match, score_from_tt, TranspositionTable};
use crate::types::{
    mated_in, side_index, Bound, Pv, Score, SearchEvent, SearchLimits, MAX_PLY, SCORE_DRAW,
    SCORE_INFINITE, SCORE_NONE,
};

pub type EventSink = Arc<dyn Fn(&SearchEvent) + Send + Sync>;

/// Progress/finish callbacks invoked from the worker thread. The host is
/// responsible for making them thread-safe.
#[derive(Clone, Default)]
pub struct EventSinks {
    pub progress: Option<EventSink>,
    pub finish: Option<EventSink>,
}

/// Per-invocation search state: the root snapshot, the limits, and the
/// counters the limit checks run on. Owned exclusively by the worker.
pub struct SearchData {
    pub root: Position,
    pub limits: SearchLimits,
    pub nodes: u64,
    pub start_time: Instant,
    /// Time budget for this move in ms; 0 disables the clock check.
    pub allocated_ms: u64,
    /// Zobrist keys of every ancestor of the node being searched: the game
    /// history first, then the moves of the current line.
    keys: Vec<u64>,
}

impl SearchData {
    pub fn new(root: Position, limits: SearchLimits) -> Self {
        let mut sd = Self {
            keys: root.game_history().to_vec(),
            root,
            limits,
            nodes: 0,
            start_time: Instant::now(),
            allocated_ms: 0,
        };
        sd.allocated_ms = sd.init_allocated_time();
        sd
    }

    /// Tournament-clock budget: an even split of the remaining time over the
    /// moves to the next control (40 when unknown), plus the increment.
    fn init_allocated_time(&self) -> u64 {
        let stm = side_index(self.root.side_to_move());
        let moves = if self.limits.moves_to_go > 0 {
            self.limits.moves_to_go as u64
        } else {
            40
        };
        self.limits.time_left[stm] / moves + self.limits.increment[stm]
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.start_time.elapsed().as_millis() as u64
    }

    /// True once any limit is hit. Clock and counters are only polled every
    /// 1024 nodes to keep the per-node cost negligible.
    pub fn should_stop(&self) -> bool {
        if self.nodes % 1024 != 0 {
            return false;
        }

        let elapsed = self.elapsed_ms();
        if self.allocated_ms > 0 && elapsed >= self.allocated_ms {
            return true;
        }
        if self.limits.max_time > 0 && elapsed > self.limits.max_time {
            return true;
        }
        if self.limits.max_nodes > 0 && self.nodes >= self.limits.max_nodes {
            return true;
        }

        false
    }
}

fn update_pv(pv: &mut Pv, mv: &Move, child_pv: &Pv) {
    pv.clear();
    pv.push(mv.clone());
    for m in child_pv {
        pv.push(m.clone());
    }
}

/// The search worker: iterative-deepening driver plus the negamax kernel.
/// One instance per `search()` invocation, living on the worker thread.
pub struct Searcher {
    pub sd: SearchData,
    pub tt: TranspositionTable,
    aborted: Arc<AtomicBool>,
    sinks: EventSinks,
}

impl Searcher {
    pub fn new(
        sd: SearchData,
        tt: TranspositionTable,
        aborted: Arc<AtomicBool>,
        sinks: EventSinks,
    ) -> Self {
        Self { sd, tt, aborted, sinks }
    }

    fn abort(&self) {
        self.aborted.store(true, Ordering::Relaxed);
    }

    fn search_aborted(&self) -> bool {
        self.aborted.load(Ordering::Relaxed)
    }

    /// Iterative deepening: re-search the root at increasing depth, keeping
    /// the last fully completed iteration as the answer. Depth 1 is always
    /// accepted so a best move exists under any limit.
    pub fn id_search(&mut self) {
        let mut best_pv = Pv::new();
        let mut best_score = -SCORE_INFINITE;
        let mut completed_depth = 0;
        let mut depth = 0;

        for d in 1..MAX_PLY as i32 {
            depth = d;
            let mut pv = Pv::new();
            let root = self.sd.root.clone();
            let score =
                self.pv_search::<true>(&root, -SCORE_INFINITE, SCORE_INFINITE, d, 0, &mut pv);

            if d > 1 && self.search_aborted() {
                break;
            }

            best_pv = pv;
            best_score = score;
            completed_depth = d;

            self.emit_progress(&self.make_event(d, &best_pv, best_score));

            if self.sd.limits.max_depth > 0 && d >= self.sd.limits.max_depth {
                break;
            }
        }

        let event = self.make_event(completed_depth, &best_pv, best_score);
        if depth != completed_depth {
            // The last iteration was cut short; report the accepted one.
            self.emit_progress(&event);
        }
        self.emit_finish(&event);

        debug!(
            "search done: depth {} score {} nodes {} in {}ms",
            completed_depth, best_score, self.sd.nodes, event.elapsed_ms
        );
    }

    fn make_event(&self, depth: i32, pv: &Pv, score: Score) -> SearchEvent {
        SearchEvent {
            depth,
            pv: pv.iter().cloned().collect(),
            score,
            nodes: self.sd.nodes,
            elapsed_ms: self.sd.elapsed_ms(),
            hashfull: self.tt.usage(),
        }
    }

    fn emit_progress(&self, event: &SearchEvent) {
        if let Some(sink) = &self.sinks.progress {
            sink(event);
        }
    }

    fn emit_finish(&self, event: &SearchEvent) {
        if let Some(sink) = &self.sinks.finish {
            sink(event);
        }
    }

    /// A repeat of any ancestor is scored as a draw. Keys cannot recur across
    /// an irreversible move, so scanning the whole stack is exact.
    fn is_repetition(&self, pos: &Position) -> bool {
        self.sd.keys.contains(&pos.hash())
    }

    /// Negamax with a principal-variation split. PV nodes search a full
    /// window and never cut from the table; non-PV nodes run with zero-width
    /// windows and may return a stored score outright. Fail-soft.
    fn pv_search<const PV: bool>(
        &mut self,
        pos: &Position,
        mut alpha: Score,
        beta: Score,
        depth: i32,
        ply: usize,
        pv: &mut Pv,
    ) -> Score {
        if depth <= 0 {
            return self.q_search(pos, alpha, beta, 0, ply, pv);
        }

        pv.clear();
        let root = ply == 0;

        // The root must deliver a move, so limits are not polled there.
        if !root {
            if self.sd.should_stop() {
                self.abort();
            }
            if self.search_aborted() {
                return -SCORE_INFINITE;
            }
        }

        if pos.is_fifty_move_draw() || pos.is_material_draw() || self.is_repetition(pos) {
            return SCORE_DRAW;
        }

        if ply >= MAX_PLY {
            return evaluate(pos);
        }

        let mut tt_move: Option<Move> = None;
        if let Some(entry) = self.tt.probe(pos.hash()) {
            tt_move = entry.mv.clone();
            if !PV && entry.depth as i32 >= depth {
                let score = score_from_tt(entry.score, ply);
                if score != SCORE_NONE && bound_match(entry.bound, score, alpha, beta) {
                    return score;
                }
            }
        }

        let alpha_orig = alpha;
        let mut best_score = -SCORE_INFINITE;
        let mut best_move: Option<Move> = None;
        let mut nb_moves = 0u32;
        let mut child_pv = Pv::new();

        self.sd.keys.push(pos.hash());
        for mv in MovePicker::main(pos, tt_move.as_ref()) {
            if root
                && !self.sd.limits.search_moves.is_empty()
                && !self.sd.limits.search_moves.contains(&mv)
            {
                continue;
            }

            nb_moves += 1;
            self.sd.nodes += 1;

            let child = pos.play(&mv);

            let mut score = -SCORE_INFINITE;
            // The first move of a PV node gets the full window; later moves
            // are scouted with a zero-width window and re-searched only when
            // they fail high inside it.
            if !PV || nb_moves > 1 {
                score = -self.pv_search::<false>(
                    &child,
                    -alpha - 1,
                    -alpha,
                    depth - 1,
                    ply + 1,
                    &mut child_pv,
                );
            }
            if PV && (nb_moves == 1 || (score > alpha && (root || score < beta))) {
                score =
                    -self.pv_search::<true>(&child, -beta, -alpha, depth - 1, ply + 1, &mut child_pv);
            }

            if self.search_aborted() {
                // The child was cut short; its score must not be adopted.
                break;
            }

            if score > best_score {
                best_score = score;

                if best_score > alpha {
                    best_move = Some(mv.clone());
                    alpha = best_score;
                    update_pv(pv, &mv, &child_pv);

                    if alpha >= beta {
                        break;
                    }
                }
            }
        }
        self.sd.keys.pop();

        if self.search_aborted() {
            return best_score;
        }

        if nb_moves == 0 {
            return if pos.in_check() { mated_in(ply) } else { SCORE_DRAW };
        }

        let bound = if best_score >= beta {
            Bound::Lower
        } else if !PV || best_score <= alpha_orig {
            Bound::Upper
        } else {
            Bound::Exact
        };
        self.tt
            .store(pos.hash(), depth, ply, bound, best_move, SCORE_NONE, best_score, PV);

        best_score
    }

    /// Quiescence: resolve captures and promotions past the horizon,
    /// broadening to every evasion when in check, so the evaluation is only
    /// ever trusted on quiet positions.
    fn q_search(
        &mut self,
        pos: &Position,
        mut alpha: Score,
        beta: Score,
        depth: i32,
        ply: usize,
        pv: &mut Pv,
    ) -> Score {
        pv.clear();

        if self.sd.should_stop() {
            self.abort();
        }
        if self.search_aborted() {
            return -SCORE_INFINITE;
        }

        // Doubles as the mate score when in check with no evasion below.
        let mut best_score = mated_in(ply);

        if pos.is_fifty_move_draw() || pos.is_material_draw() || self.is_repetition(pos) {
            return SCORE_DRAW;
        }

        if ply >= MAX_PLY {
            return evaluate(pos);
        }

        let in_check = pos.in_check();
        let alpha_orig = alpha;
        let mut static_eval = SCORE_NONE;

        // Standing pat: the side to move can decline every capture, so the
        // static eval is an immediate lower bound. Illegal when in check.
        if !in_check {
            let eval = evaluate(pos);
            static_eval = eval;

            if eval >= beta {
                return eval;
            }
            if eval > alpha {
                alpha = eval;
            }
            best_score = eval;
        }

        // The table is probed for ordering only; its entries are too shallow
        // to justify a cutoff here.
        let tt_move = self.tt.probe(pos.hash()).and_then(|e| e.mv.clone());

        let mut best_move: Option<Move> = None;
        let mut child_pv = Pv::new();

        self.sd.keys.push(pos.hash());
        for mv in MovePicker::quiescence(pos, tt_move.as_ref()) {
            self.sd.nodes += 1;

            let child = pos.play(&mv);
            let score = -self.q_search(&child, -beta, -alpha, depth - 1, ply + 1, &mut child_pv);

            if self.search_aborted() {
                break;
            }

            if score > best_score {
                best_score = score;

                if best_score > alpha {
                    best_move = Some(mv.clone());
                    alpha = best_score;
                    update_pv(pv, &mv, &child_pv);

                    if alpha >= beta {
                        break;
                    }
                }
            }
        }
        self.sd.keys.pop();

        if self.search_aborted() {
            return best_score;
        }

        let bound = if best_score >= beta {
            Bound::Lower
        } else if best_score <= alpha_orig {
            Bound::Upper
        } else {
            Bound::Exact
        };
        let tt_depth = if in_check { 1 } else { 0 };
        self.tt
            .store(pos.hash(), tt_depth, ply, bound, best_move, static_eval, best_score, false);

        best_score
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{mate_in, SCORE_MATE};
    use shakmaty::uci::UciMove;

    fn searcher_for(pos: Position, limits: SearchLimits) -> Searcher {
        Searcher::new(
            SearchData::new(pos, limits),
            TranspositionTable::new(1),
            Arc::new(AtomicBool::new(false)),
            EventSinks::default(),
        )
    }

    fn fixed_depth(pos: Position, depth: i32) -> (Score, Pv, Searcher) {
        let mut s = searcher_for(pos, SearchLimits::default());
        let mut pv = Pv::new();
        let root = s.sd.root.clone();
        let score = s.pv_search::<true>(&root, -SCORE_INFINITE, SCORE_INFINITE, depth, 0, &mut pv);
        (score, pv, s)
    }

    #[test]
    fn finds_a_move_from_startpos() {
        let (_, pv, s) = fixed_depth(Position::startpos(), 3);
        assert!(!pv.is_empty());
        assert!(s.sd.nodes > 0);
    }

    #[test]
    fn finds_mate_in_one() {
        let pos = Position::from_fen(
            "r1bqkb1r/pppp1ppp/2n2n2/4p2Q/2B1P3/8/PPPP1PPP/RNB1K1NR w KQkq - 4 4",
        )
        .unwrap();
        let (score, pv, _) = fixed_depth(pos, 2);
        assert_eq!(score, mate_in(1));
        assert_eq!(UciMove::from_standard(&pv[0]).to_string(), "h5f7");
    }

    #[test]
    fn mated_position_scores_mated_in_zero() {
        let pos = Position::from_fen("R6k/6pp/8/8/8/8/8/6K1 b - - 0 1").unwrap();
        assert!(pos.in_check());
        let (score, pv, _) = fixed_depth(pos, 3);
        assert_eq!(score, mated_in(0));
        assert!(pv.is_empty());
    }

    #[test]
    fn stalemate_scores_draw() {
        let pos = Position::from_fen("7k/5Q2/6K1/8/8/8/8/8 b - - 0 1").unwrap();
        let (score, pv, _) = fixed_depth(pos, 3);
        assert_eq!(score, SCORE_DRAW);
        assert!(pv.is_empty());
    }

    #[test]
    fn fifty_move_draw_wins_over_tactics() {
        // A queen hangs, but the counter has run out.
        let pos = Position::from_fen("4k3/8/8/4q3/8/8/8/7K w - - 100 80").unwrap();
        let (score, _, _) = fixed_depth(pos, 4);
        assert_eq!(score, SCORE_DRAW);
    }

    #[test]
    fn repeated_ancestor_scores_draw() {
        let mut s = searcher_for(Position::startpos(), SearchLimits::default());
        let root = s.sd.root.clone();
        s.sd.keys.push(root.hash());
        let mut pv = Pv::new();
        let score = s.pv_search::<true>(&root, -SCORE_INFINITE, SCORE_INFINITE, 3, 1, &mut pv);
        assert_eq!(score, SCORE_DRAW);
    }

    #[test]
    fn quiescence_sees_mate_when_in_check() {
        let pos =
            Position::from_fen("rnb1kbnr/pppp1ppp/4p3/8/6Pq/5P2/PPPPP2P/RNBQKBNR w KQkq - 1 3")
                .unwrap();
        let mut s = searcher_for(pos.clone(), SearchLimits::default());
        let mut pv = Pv::new();
        let score = s.q_search(&pos, -SCORE_INFINITE, SCORE_INFINITE, 0, 0, &mut pv);
        assert_eq!(score, mated_in(0));
    }

    #[test]
    fn deeper_search_reuses_the_table() {
        let pos = Position::startpos();
        let (_, _, first) = fixed_depth(pos.clone(), 4);
        let nodes_cold = first.sd.nodes;

        let mut warm = Searcher::new(
            SearchData::new(pos, SearchLimits::default()),
            first.tt,
            Arc::new(AtomicBool::new(false)),
            EventSinks::default(),
        );
        let root = warm.sd.root.clone();
        let mut pv = Pv::new();
        warm.pv_search::<true>(&root, -SCORE_INFINITE, SCORE_INFINITE, 4, 0, &mut pv);
        assert!(
            warm.sd.nodes <= nodes_cold,
            "warm table should not search more nodes ({} vs {})",
            warm.sd.nodes,
            nodes_cold
        );
    }

    #[test]
    fn node_limit_stops_the_search() {
        let limits = SearchLimits { max_nodes: 1000, ..Default::default() };
        let mut s = searcher_for(Position::startpos(), limits);
        s.id_search();
        assert!(s.search_aborted());
        assert!(
            s.sd.nodes <= 1000 + 1024,
            "node limit overshoot: {}",
            s.sd.nodes
        );
    }

    #[test]
    fn depth_limit_is_honored() {
        let limits = SearchLimits { max_depth: 3, ..Default::default() };
        let events: Arc<std::sync::Mutex<Vec<SearchEvent>>> = Arc::default();
        let sink_events = Arc::clone(&events);
        let finishes: Arc<std::sync::Mutex<Vec<SearchEvent>>> = Arc::default();
        let finish_events = Arc::clone(&finishes);

        let sinks = EventSinks {
            progress: Some(Arc::new(move |e: &SearchEvent| {
                sink_events.lock().unwrap().push(e.clone());
            })),
            finish: Some(Arc::new(move |e: &SearchEvent| {
                finish_events.lock().unwrap().push(e.clone());
            })),
        };

        let mut s = Searcher::new(
            SearchData::new(Position::startpos(), limits),
            TranspositionTable::new(1),
            Arc::new(AtomicBool::new(false)),
            sinks,
        );
        s.id_search();

        let progress = events.lock().unwrap();
        let finish = finishes.lock().unwrap();
        assert_eq!(progress.len(), 3, "one progress event per depth");
        assert_eq!(finish.len(), 1, "exactly one finish event");
        assert_eq!(finish[0].depth, 3);
        assert!(!finish[0].pv.is_empty());
    }

    #[test]
    fn allocated_time_formula() {
        let mut limits = SearchLimits::default();
        limits.time_left[0] = 80_000;
        limits.increment[0] = 500;
        limits.moves_to_go = 20;
        let sd = SearchData::new(Position::startpos(), limits);
        assert_eq!(sd.allocated_ms, 80_000 / 20 + 500);

        let mut limits = SearchLimits::default();
        limits.time_left[0] = 40_000;
        let sd = SearchData::new(Position::startpos(), limits);
        assert_eq!(sd.allocated_ms, 1000, "40 moves assumed when movestogo is unknown");
    }

    #[test]
    fn mate_score_relation_holds() {
        // Back-rank mate: Qd8#.
        let pos = Position::from_fen("6k1/5ppp/8/8/8/8/5PPP/3Q2K1 w - - 0 1").unwrap();
        let (score, pv, _) = fixed_depth(pos, 6);
        if score > SCORE_MATE - MAX_PLY as Score {
            assert_eq!((SCORE_MATE - score) as usize, pv.len());
        }
    }
}
