use std::io::{self, BufRead};

use anyhow::Result;
use log::warn;
use shakmaty::uci::UciMove;

use crate::engine::Engine;
use crate::position::Position;
use crate::types::{is_mate_score, Score, SearchEvent, SearchLimits, DEFAULT_HASH_MB, SCORE_MATE};

/// Runs the UCI loop on stdin until `quit` or EOF.
pub fn run() -> Result<()> {
    let stdin = io::stdin();
    let mut engine = Engine::new(DEFAULT_HASH_MB);

    engine.on_progress(|event| println!("{}", format_info(event)));
    engine.on_finish(|event| match event.pv.first() {
        Some(mv) => println!("bestmove {}", UciMove::from_standard(mv)),
        None => println!("bestmove 0000"),
    });

    for line in stdin.lock().lines() {
        let line = line?;
        let tokens: Vec<&str> = line.split_whitespace().collect();
        let Some(&command) = tokens.first() else {
            continue;
        };

        match command {
            "uci" => {
                println!("id name sable");
                println!("id author sable authors");
                println!("option name Hash type spin default {DEFAULT_HASH_MB} min 1 max 4096");
                println!("uciok");
            }
            "isready" => println!("readyok"),
            "ucinewgame" => engine.new_game(),
            "position" => {
                if let Err(err) = handle_position(&tokens, &mut engine) {
                    warn!("ignoring position command: {err:#}");
                }
            }
            "go" => {
                let limits = parse_go(&tokens, engine.position());
                engine.search(limits);
            }
            "stop" => engine.stop(),
            "setoption" => handle_setoption(&tokens, &mut engine),
            "d" | "print" => println!("{}", engine.position()),
            "quit" => {
                engine.stop();
                engine.await_idle();
                break;
            }
            other => warn!("unknown command {other:?}"),
        }
    }

    Ok(())
}

fn format_info(event: &SearchEvent) -> String {
    let nps = event.nodes * 1000 / event.elapsed_ms.max(1);
    let pv: Vec<String> = event
        .pv
        .iter()
        .map(|m| UciMove::from_standard(m).to_string())
        .collect();

    format!(
        "info depth {} {} nodes {} time {} nps {} hashfull {} pv {}",
        event.depth,
        format_score(event.score),
        event.nodes,
        event.elapsed_ms,
        nps,
        event.hashfull,
        pv.join(" "),
    )
}

/// UCI score: centipawns, or signed full moves to mate.
fn format_score(score: Score) -> String {
    if is_mate_score(score) {
        let plies = SCORE_MATE - score.abs();
        let moves = (plies + 1) / 2;
        if score > 0 {
            format!("score mate {moves}")
        } else {
            format!("score mate -{moves}")
        }
    } else {
        format!("score cp {score}")
    }
}

/// `position startpos | fen <fen> [moves ...]`, replaying the move list so
/// the game history is available for repetition detection.
fn handle_position(tokens: &[&str], engine: &mut Engine) -> Result<()> {
    let mut idx = 1;

    let mut pos = match tokens.get(idx) {
        Some(&"startpos") => {
            idx += 1;
            Position::startpos()
        }
        Some(&"fen") => {
            idx += 1;
            let mut fen_parts: Vec<&str> = Vec::new();
            while idx < tokens.len() && tokens[idx] != "moves" && fen_parts.len() < 6 {
                fen_parts.push(tokens[idx]);
                idx += 1;
            }
            Position::from_fen(&fen_parts.join(" "))?
        }
        _ => anyhow::bail!("expected startpos or fen"),
    };

    if tokens.get(idx) == Some(&"moves") {
        for token in &tokens[idx + 1..] {
            let mv = pos.parse_uci_move(token)?;
            pos.apply(&mv);
        }
    }

    engine.set_position(pos);
    Ok(())
}

fn parse_go(tokens: &[&str], pos: &Position) -> SearchLimits {
    let mut limits = SearchLimits::default();
    let mut idx = 1;

    while idx < tokens.len() {
        let parameter = tokens[idx];
        idx += 1;

        match parameter {
            "depth" => limits.max_depth = next_number(tokens, &mut idx) as i32,
            "nodes" => limits.max_nodes = next_number(tokens, &mut idx),
            "movetime" => limits.max_time = next_number(tokens, &mut idx),
            "wtime" => limits.time_left[0] = next_number(tokens, &mut idx),
            "btime" => limits.time_left[1] = next_number(tokens, &mut idx),
            "winc" => limits.increment[0] = next_number(tokens, &mut idx),
            "binc" => limits.increment[1] = next_number(tokens, &mut idx),
            "movestogo" => limits.moves_to_go = next_number(tokens, &mut idx) as u32,
            "searchmoves" => {
                while idx < tokens.len() {
                    match pos.parse_uci_move(tokens[idx]) {
                        Ok(mv) => limits.search_moves.push(mv),
                        Err(_) => break,
                    }
                    idx += 1;
                }
            }
            // `go infinite` is the default: no limit set, stopped by `stop`.
            "infinite" | "ponder" => {}
            other => warn!("unknown go parameter {other:?}"),
        }
    }

    limits
}

fn next_number(tokens: &[&str], idx: &mut usize) -> u64 {
    let value = tokens
        .get(*idx)
        .and_then(|t| t.parse().ok())
        .unwrap_or_default();
    *idx += 1;
    value
}

fn handle_setoption(tokens: &[&str], engine: &mut Engine) {
    let name_idx = tokens.iter().position(|&t| t == "name");
    let value_idx = tokens.iter().position(|&t| t == "value");

    let (Some(ni), Some(vi)) = (name_idx, value_idx) else {
        return;
    };
    if vi < ni + 1 {
        return;
    }
    let name = tokens[ni + 1..vi].join(" ");
    let value = tokens[vi + 1..].join(" ");

    match name.to_lowercase().as_str() {
        "hash" => {
            if let Ok(mb) = value.parse::<usize>() {
                engine.set_hash_size(mb.clamp(1, 4096));
            }
        }
        _ => warn!("unknown option {name:?}"),
    }
}
