use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use log::{debug, warn};

use crate::position::Position;
use crate::search::{EventSinks, SearchData, Searcher};
use crate::tt::TranspositionTable;
use crate::types::{SearchEvent, SearchLimits, DEFAULT_HASH_MB};

// Each recursion frame carries a PV buffer and a scored move list, and the
// search may go MAX_PLY frames deep. 8 MiB leaves a wide margin.
const WORKER_STACK_BYTES: usize = 8 * 1024 * 1024;

/// The engine facade: owns the root position and the transposition table,
/// runs one background worker per `search()` call, and reports progress
/// through registered sinks.
///
/// The table travels with the worker and comes back through its join handle,
/// so entries persist from one search to the next without any locking.
pub struct Engine {
    root: Position,
    tt: Option<TranspositionTable>,
    hash_mb: usize,
    worker: Option<JoinHandle<TranspositionTable>>,
    aborted: Arc<AtomicBool>,
    searching: Arc<AtomicBool>,
    sinks: EventSinks,
}

impl Default for Engine {
    fn default() -> Self {
        Self::new(DEFAULT_HASH_MB)
    }
}

impl Engine {
    pub fn new(hash_mb: usize) -> Self {
        Self {
            root: Position::startpos(),
            tt: Some(TranspositionTable::new(hash_mb)),
            hash_mb,
            worker: None,
            aborted: Arc::new(AtomicBool::new(true)),
            searching: Arc::new(AtomicBool::new(false)),
            sinks: EventSinks::default(),
        }
    }

    /// Registers the sink called after every completed depth. Ignored while a
    /// search is running. The sink runs on the worker thread.
    pub fn on_progress<F>(&mut self, sink: F)
    where
        F: Fn(&SearchEvent) + Send + Sync + 'static,
    {
        if self.is_searching() {
            return;
        }
        self.sinks.progress = Some(Arc::new(sink));
    }

    /// Registers the sink called exactly once when a search terminates.
    /// Ignored while a search is running. The sink runs on the worker thread.
    pub fn on_finish<F>(&mut self, sink: F)
    where
        F: Fn(&SearchEvent) + Send + Sync + 'static,
    {
        if self.is_searching() {
            return;
        }
        self.sinks.finish = Some(Arc::new(sink));
    }

    pub fn position(&self) -> &Position {
        &self.root
    }

    /// Replaces the root position. Silently ignored while a search runs.
    pub fn set_position(&mut self, pos: Position) {
        if self.is_searching() {
            return;
        }
        self.root = pos;
    }

    pub fn is_searching(&self) -> bool {
        self.searching.load(Ordering::Acquire)
    }

    /// Asks the running search to stop. Idempotent, safe from any thread,
    /// returns without waiting; pair with `await_idle` to block.
    pub fn stop(&self) {
        self.aborted.store(true, Ordering::SeqCst);
    }

    /// Blocks until the worker has fully exited and its table is reclaimed.
    pub fn await_idle(&mut self) {
        if let Some(handle) = self.worker.take() {
            match handle.join() {
                Ok(tt) => self.tt = Some(tt),
                Err(_) => {
                    warn!("search worker panicked, rebuilding the hash table");
                    self.tt = Some(TranspositionTable::new(self.hash_mb));
                }
            }
        }
    }

    /// Forgets everything learned in previous games.
    pub fn new_game(&mut self) {
        if self.is_searching() {
            return;
        }
        self.await_idle();
        if let Some(tt) = &mut self.tt {
            tt.clear();
        }
    }

    pub fn set_hash_size(&mut self, mb: usize) {
        if self.is_searching() {
            return;
        }
        self.await_idle();
        self.hash_mb = mb;
        self.tt = Some(TranspositionTable::new(mb));
    }

    /// Snapshots the root into fresh search state and dispatches a worker.
    /// Returns immediately; a call while a search runs is a no-op.
    pub fn search(&mut self, limits: SearchLimits) {
        if self.is_searching() {
            return;
        }
        self.await_idle();

        let mut tt = self
            .tt
            .take()
            .unwrap_or_else(|| TranspositionTable::new(self.hash_mb));
        tt.new_search();

        let sd = SearchData::new(self.root.clone(), limits);
        debug!(
            "starting search: allocated {}ms, max depth {}, max nodes {}",
            sd.allocated_ms, sd.limits.max_depth, sd.limits.max_nodes
        );

        self.aborted.store(false, Ordering::SeqCst);
        self.searching.store(true, Ordering::SeqCst);

        let aborted = Arc::clone(&self.aborted);
        let searching = Arc::clone(&self.searching);
        let sinks = self.sinks.clone();

        let handle = thread::Builder::new()
            .name("sable-search".into())
            .stack_size(WORKER_STACK_BYTES)
            .spawn(move || {
                let mut searcher = Searcher::new(sd, tt, aborted, sinks);
                searcher.id_search();
                searching.store(false, Ordering::Release);
                searcher.tt
            })
            .expect("failed to spawn search worker");

        self.worker = Some(handle);
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.stop();
        self.await_idle();
    }
}
