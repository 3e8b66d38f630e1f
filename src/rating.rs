// Rating & stats applier (§4.9). Called once per finished match with
// every participant's pre-match rating snapshot; applies Elo, counters,
// and the per-seat stats merge in a single store transaction.
use crate::error::ServerError;
use crate::store::{MatchResultRow, SqliteUserStore};

const ELO_K: f64 = 50.0;
const DEV_USERNAME: &str = "TeaAndPython";

#[derive(Debug, Clone)]
pub struct Participant {
    pub username: String,
    pub score: i64,
}

/// The `stats` bundle a terminal tick payload may carry: per-seat
/// casualty counts and the match's elapsed time.
#[derive(Debug, Clone)]
pub struct TerminalStats {
    pub casualties: Vec<i64>,
    pub time_secs: i64,
}

fn elo_deltas(participants: &[Participant], winner: usize) -> Vec<i64> {
    let r_w = participants[winner].score as f64;
    let mut deltas = vec![0f64; participants.len()];
    let mut winner_delta = 0f64;
    for (i, p) in participants.iter().enumerate() {
        if i == winner {
            continue;
        }
        let r_i = p.score as f64;
        let delta_i = ELO_K * (1.0 - 1.0 / (1.0 + 10f64.powf((r_i - r_w) / 400.0)));
        deltas[i] = -delta_i;
        winner_delta += delta_i;
    }
    deltas[winner] = winner_delta;
    deltas.into_iter().map(|d| d.round() as i64).collect()
}

/// Applies the outcome of a finished match. `winner` is `None` for a
/// peace/no-winner result, in which case no Elo change occurs but games
/// still increment per the caller's rules.
pub async fn apply(
    store: &SqliteUserStore,
    participants: &[Participant],
    winner: Option<usize>,
    score_flag: bool,
    stats: Option<TerminalStats>,
) -> Result<(), ServerError> {
    let n = participants.len();
    let elo = match (score_flag, winner) {
        (true, Some(w)) => Some(elo_deltas(participants, w)),
        _ => None,
    };

    let units_destroyed = stats.as_ref().map(|s| per_seat_units_destroyed(n, &s.casualties));

    let mut rows = Vec::with_capacity(n);
    for (i, p) in participants.iter().enumerate() {
        let is_winner = winner == Some(i);
        let score_delta = elo.as_ref().map(|d| d[i]).unwrap_or(0);
        let money_delta = if is_winner { (n as i64) - 1 } else { 0 };
        let units_add = units_destroyed.as_ref().map(|u| u[i]).unwrap_or(0);

        let mut shortest_game_candidate = None;
        let mut minimal_casualties_candidate = None;
        let mut set_dev_defeated = false;

        if is_winner {
            if let Some(stats) = &stats {
                let no_cheating = stats.casualties.iter().any(|&c| c > 0);
                if no_cheating {
                    shortest_game_candidate = Some(stats.time_secs);
                    minimal_casualties_candidate = stats.casualties.get(i).copied();
                }
                if n == 2 {
                    let opponent = participants.iter().enumerate().find(|(j, _)| *j != i);
                    if let Some((_, opponent)) = opponent {
                        if opponent.username == DEV_USERNAME {
                            set_dev_defeated = true;
                        }
                    }
                }
            }
        }

        rows.push(MatchResultRow {
            username: p.username.clone(),
            increment_games: true,
            won: is_winner,
            score_delta,
            money_delta,
            units_destroyed_add: units_add,
            shortest_game_candidate,
            minimal_casualties_candidate,
            set_dev_defeated,
        });
    }

    store.apply_match_result(rows).await
}

fn per_seat_units_destroyed(n: usize, casualties: &[i64]) -> Vec<i64> {
    if n == 2 {
        vec![casualties.get(1).copied().unwrap_or(0), casualties.get(0).copied().unwrap_or(0)]
    } else {
        let total: i64 = casualties.iter().sum();
        let share = total / (n as i64).max(1);
        vec![share; n]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn elo_delta_is_zero_sum() {
        let participants = vec![
            Participant { username: "a".into(), score: 1000 },
            Participant { username: "b".into(), score: 1200 },
        ];
        let deltas = elo_deltas(&participants, 0);
        assert_eq!(deltas[0], -deltas[1]);
        // Underdog winning a higher-rated opponent gains more than 25.
        assert!(deltas[0] > 25);
    }

    #[test]
    fn favorite_winning_gains_less_than_k_half() {
        let participants = vec![
            Participant { username: "a".into(), score: 1200 },
            Participant { username: "b".into(), score: 1000 },
        ];
        let deltas = elo_deltas(&participants, 0);
        assert!(deltas[0] < 25);
        assert!(deltas[0] > 0);
    }

    #[test]
    fn units_destroyed_1v1_is_opponent_casualties() {
        let shares = per_seat_units_destroyed(2, &[3, 7]);
        assert_eq!(shares, vec![7, 3]);
    }

    #[test]
    fn units_destroyed_multiplayer_splits_evenly() {
        let shares = per_seat_units_destroyed(4, &[4, 4, 4, 4]);
        assert_eq!(shares, vec![4, 4, 4, 4]);
    }
}
