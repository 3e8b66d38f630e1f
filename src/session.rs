// Game session loop (§4.8): setup, fixed-tick broadcast loop, and
// termination classification for both the 1v1 and 3+-player cases.
use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::seq::SliceRandom;
use rand::Rng;
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::fields;
use crate::player::Player;
use crate::protocol::{EndGame, Mode};
use crate::rating::{self, Participant, TerminalStats};
use crate::state::AppState;
use crate::transport::{self, InGameRead};

const SETUP_DELAY: Duration = Duration::from_secs(1);
const PEACE_TIMER_TICKS: u32 = 20;

/// One seat's outcome for the current tick.
struct SeatTick {
    input: Option<Value>,
    end_game: Option<EndGame>,
}

async fn read_seat(player: &mut Player) -> SeatTick {
    match transport::read_in_game(&mut player.reader).await {
        InGameRead::Message(v) => {
            if let Some(end_game) = EndGame::from_value(&v) {
                SeatTick { input: Some(v), end_game: Some(end_game) }
            } else {
                SeatTick { input: Some(v), end_game: None }
            }
        }
        InGameRead::NoUpdate => SeatTick { input: None, end_game: None },
        InGameRead::ConnectionLost => SeatTick { input: None, end_game: Some(EndGame::ConnectionLost) },
    }
}

/// Outcome of classifying a completed 1v1 tick.
enum OneVOneOutcome {
    Continue,
    Winner(usize),
    NoWinner,
    /// Exactly one seat reported; the other must be given one follow-up
    /// read attempt before a result is settled (resolves the spec's
    /// open question on the ambiguous "wait for its follow-up" wording).
    AwaitFollowup { reporter: usize, claim: EndGame },
}

fn classify_1v1(e0: Option<&EndGame>, e1: Option<&EndGame>) -> OneVOneOutcome {
    match (e0, e1) {
        (Some(a), Some(b)) => {
            if let (EndGame::Winner(w1), EndGame::Winner(w2)) = (a, b) {
                if w1 == w2 {
                    return OneVOneOutcome::Winner(*w1);
                }
            }
            if matches!(a, EndGame::ConnectionLost | EndGame::Surrender) {
                return OneVOneOutcome::Winner(1);
            }
            if matches!(b, EndGame::ConnectionLost | EndGame::Surrender) {
                return OneVOneOutcome::Winner(0);
            }
            OneVOneOutcome::NoWinner
        }
        (Some(a), None) => {
            if matches!(a, EndGame::ConnectionLost | EndGame::Surrender) {
                OneVOneOutcome::Winner(1)
            } else {
                OneVOneOutcome::AwaitFollowup { reporter: 0, claim: a.clone() }
            }
        }
        (None, Some(b)) => {
            if matches!(b, EndGame::ConnectionLost | EndGame::Surrender) {
                OneVOneOutcome::Winner(0)
            } else {
                OneVOneOutcome::AwaitFollowup { reporter: 1, claim: b.clone() }
            }
        }
        (None, None) => OneVOneOutcome::Continue,
    }
}

/// Settle an `AwaitFollowup` using the single extra read attempt §4.8
/// describes. `claim` is the reporter's original numeric winner claim.
fn settle_followup(claim_winner: usize, follow_up: Option<&EndGame>) -> Option<usize> {
    match follow_up {
        Some(EndGame::Winner(w2)) if *w2 == claim_winner => Some(claim_winner),
        None => Some(claim_winner),
        _ => None,
    }
}

enum MultiOutcome {
    Continue,
    LoneSurvivor(usize),
    AllGone,
    WinnerDeclared(usize),
}

fn classify_multi(active: &[bool], end_games: &[Option<EndGame>]) -> MultiOutcome {
    let active_count = active.iter().filter(|a| **a).count();
    if active_count == 0 {
        return MultiOutcome::AllGone;
    }
    if active_count == 1 {
        let survivor = active.iter().position(|a| *a).unwrap();
        return MultiOutcome::LoneSurvivor(survivor);
    }
    for (i, eg) in end_games.iter().enumerate() {
        if !active[i] {
            continue;
        }
        if let Some(EndGame::Winner(w)) = eg {
            return MultiOutcome::WinnerDeclared(*w);
        }
    }
    MultiOutcome::Continue
}

fn merge_inputs(inputs: &[Option<Value>]) -> Value {
    let mut merged = serde_json::Map::new();
    for input in inputs.iter().flatten() {
        if let Value::Object(map) = input {
            for (k, v) in map {
                merged.insert(k.clone(), v.clone());
            }
        }
    }
    Value::Object(merged)
}

fn parse_stats(v: &Value) -> Option<TerminalStats> {
    let stats = v.get("stats")?;
    let casualties: Vec<i64> = stats
        .get("casualties")?
        .as_array()?
        .iter()
        .filter_map(|c| c.as_i64())
        .collect();
    let time_secs = stats.get("time")?.as_i64()?;
    Some(TerminalStats { casualties, time_secs })
}

pub struct SessionParams {
    pub mode: Mode,
    pub players: Vec<Player>,
    pub custom_map: Option<Value>,
    pub score_flag: bool,
    pub spectators: Vec<Player>,
}

/// Runs one match to completion: setup, tick loop, termination,
/// rating application, and teardown. Consumes every seat and spectator
/// so nothing outlives the match (§4.8 teardown).
pub async fn run(state: Arc<AppState>, params: SessionParams) {
    let SessionParams { mode, mut players, custom_map, score_flag, mut spectators } = params;

    let map_id: u32 = if custom_map.is_some() {
        0
    } else {
        let range = mode.map_range();
        rand::thread_rng().gen_range(*range.start()..=*range.end())
    };

    players.shuffle(&mut rand::thread_rng());

    let titles = state
        .store
        .get_titles(players.iter().map(|p| p.username.clone()).collect())
        .await
        .unwrap_or_default();

    let display_names: Vec<String> = players
        .iter()
        .zip(titles.iter().chain(std::iter::repeat(&None)))
        .map(|(p, title)| match title {
            Some(t) => format!("[{t}] {}", p.username),
            None => p.username.clone(),
        })
        .collect();

    for (i, seat) in players.iter_mut().enumerate() {
        let payload = json!({ "color": i, "map": map_id, "players": display_names });
        transport::write_framed(&mut seat.writer, &payload).await;
    }
    for spectator in spectators.iter_mut() {
        let payload = json!({ "color": Value::Null, "map": map_id, "players": display_names });
        transport::write_framed(&mut spectator.writer, &payload).await;
    }

    tokio::time::sleep(SETUP_DELAY).await;

    let participants: Vec<Participant> = players
        .iter()
        .map(|p| Participant { username: p.username.clone(), score: p.score })
        .collect();

    let mut active = vec![true; players.len()];
    let mut peace_counter = 0usize;
    let mut peace_timer = 0u32;

    let outcome = loop {
        let tick_start = Instant::now();

        let mut ticks: Vec<Option<SeatTick>> = std::iter::repeat_with(|| None).take(players.len()).collect();
        {
            let futures = players
                .iter_mut()
                .enumerate()
                .filter(|(i, _)| active[*i])
                .map(|(i, seat)| async move { (i, read_seat(seat).await) });
            let results = futures::future::join_all(futures).await;
            for (i, tick) in results {
                ticks[i] = Some(tick);
            }
        }

        let end_games: Vec<Option<EndGame>> = ticks.iter().map(|t| t.as_ref().and_then(|t| t.end_game.clone())).collect();
        let inputs: Vec<Option<Value>> = ticks.iter().map(|t| t.as_ref().and_then(|t| t.input.clone())).collect();

        if players.len() == 2 {
            match classify_1v1(end_games[0].as_ref(), end_games[1].as_ref()) {
                OneVOneOutcome::Winner(w) => {
                    let marker = EndGame::Winner(w).to_value();
                    for seat in players.iter_mut() {
                        transport::write_framed(&mut seat.writer, &marker).await;
                    }
                    let stats = inputs.iter().flatten().find_map(parse_stats);
                    break Some((Some(w), stats));
                }
                OneVOneOutcome::NoWinner => break Some((None, None)),
                OneVOneOutcome::AwaitFollowup { reporter, claim } => {
                    let other = 1 - reporter;
                    let marker = claim.to_value();
                    transport::write_framed(&mut players[other].writer, &marker).await;
                    let follow_up = read_seat(&mut players[other]).await;
                    let claim_winner = match &claim {
                        EndGame::Winner(w) => *w,
                        _ => unreachable!("AwaitFollowup only arises from a numeric claim"),
                    };
                    match settle_followup(claim_winner, follow_up.end_game.as_ref()) {
                        Some(w) => {
                            let stats = inputs.iter().flatten().find_map(parse_stats);
                            break Some((Some(w), stats));
                        }
                        None => break Some((None, None)),
                    }
                }
                OneVOneOutcome::Continue => {}
            }
        } else {
            for (i, eg) in end_games.iter().enumerate() {
                if matches!(eg, Some(EndGame::ConnectionLost) | Some(EndGame::Surrender)) {
                    active[i] = false;
                }
            }
            match classify_multi(&active, &end_games) {
                MultiOutcome::AllGone => break Some((None, None)),
                MultiOutcome::LoneSurvivor(w) => {
                    let marker = EndGame::Winner(w).to_value();
                    transport::write_framed(&mut players[w].writer, &marker).await;
                    let follow_up = read_seat(&mut players[w]).await;
                    let stats = follow_up.input.as_ref().and_then(parse_stats);
                    break Some((Some(w), stats));
                }
                MultiOutcome::WinnerDeclared(w) => {
                    let marker = EndGame::Winner(w).to_value();
                    for (i, seat) in players.iter_mut().enumerate() {
                        if active[i] {
                            transport::write_framed(&mut seat.writer, &marker).await;
                        }
                    }
                    let stats = inputs.iter().flatten().find_map(parse_stats);
                    break Some((Some(w), stats));
                }
                MultiOutcome::Continue => {}
            }
        }

        let peace_votes_this_tick = inputs.iter().flatten().filter(|v| v.get("peace").is_some()).count();
        if peace_votes_this_tick > 0 {
            peace_counter += peace_votes_this_tick;
            peace_timer = PEACE_TIMER_TICKS;
        } else if peace_timer > 0 {
            peace_timer -= 1;
            if peace_timer == 0 {
                peace_counter = 0;
            }
        }
        if peace_counter >= active.iter().filter(|a| **a).count() {
            let marker = EndGame::Peace.to_value();
            for (i, seat) in players.iter_mut().enumerate() {
                if active[i] {
                    transport::write_framed(&mut seat.writer, &marker).await;
                }
            }
            let idx = active.iter().position(|a| *a);
            let stats = if let Some(idx) = idx {
                read_seat(&mut players[idx]).await.input.as_ref().and_then(parse_stats)
            } else {
                None
            };
            break Some((None, stats));
        }

        let merged = merge_inputs(&inputs);
        for (i, seat) in players.iter_mut().enumerate() {
            if active[i] {
                transport::write_framed(&mut seat.writer, &merged).await;
            }
        }
        for spectator in spectators.iter_mut() {
            transport::write_framed(&mut spectator.writer, &merged).await;
        }

        let elapsed = tick_start.elapsed();
        let period = state.config.tick_period();
        if elapsed < period {
            tokio::time::sleep(period - elapsed).await;
        }
    };

    if let Some((winner, stats)) = outcome {
        if let Err(e) = rating::apply(&state.store, &participants, winner, score_flag, stats).await {
            warn!({ fields::ERROR } = %e, "failed to apply match result");
        }
        info!(?winner, mode = mode.queue_type_str(), "session ended");
    }

    for seat in &players {
        state.mark_offline(&seat.username).await;
    }
    for spectator in &spectators {
        state.mark_offline(&spectator.username).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn both_agree_on_numeric_winner() {
        let e0 = EndGame::Winner(1);
        let e1 = EndGame::Winner(1);
        matches!(classify_1v1(Some(&e0), Some(&e1)), OneVOneOutcome::Winner(1));
    }

    #[test]
    fn disconnect_awards_other_seat() {
        let e0 = EndGame::ConnectionLost;
        match classify_1v1(Some(&e0), None) {
            OneVOneOutcome::Winner(1) => {}
            _ => panic!("expected seat 1 to win"),
        }
    }

    #[test]
    fn lone_claim_requires_followup() {
        let e0 = EndGame::Winner(0);
        match classify_1v1(Some(&e0), None) {
            OneVOneOutcome::AwaitFollowup { reporter: 0, .. } => {}
            _ => panic!("expected a followup to be requested"),
        }
    }

    #[test]
    fn followup_silence_confirms_reporters_claim() {
        assert_eq!(settle_followup(0, None), Some(0));
    }

    #[test]
    fn followup_disagreement_yields_no_winner() {
        assert_eq!(settle_followup(0, Some(&EndGame::Winner(1))), None);
    }

    #[test]
    fn multi_lone_survivor_detected() {
        let active = vec![false, true, false, false];
        let end_games = vec![None, None, None, None];
        match classify_multi(&active, &end_games) {
            MultiOutcome::LoneSurvivor(1) => {}
            _ => panic!("expected seat 1 as lone survivor"),
        }
    }

    #[test]
    fn multi_winner_declared_from_ticks() {
        let active = vec![true, true, true];
        let end_games = vec![None, Some(EndGame::Winner(1)), None];
        match classify_multi(&active, &end_games) {
            MultiOutcome::WinnerDeclared(1) => {}
            _ => panic!("expected seat 1 declared winner"),
        }
    }

    #[test]
    fn merge_inputs_last_seat_wins_key_collision() {
        let inputs = vec![Some(json!({"move": "a"})), Some(json!({"move": "b"}))];
        let merged = merge_inputs(&inputs);
        assert_eq!(merged["move"], "b");
    }
}
