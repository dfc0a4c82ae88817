//! Rock-Paper-Scissors rules.
//!
//! Simultaneous submission followed by a reveal once both choices are in.
//! Best-of-N with N in {3, 5}; tied rounds are replayed and do not count
//! toward N.

use serde::{Deserialize, Serialize};
use serde_json::json;

use super::{
    GameConfig, GameRules, GameState, MatchAggregate, MoveRejection, PlayerSeat, RuleEvent,
    Terminal,
};
use crate::protocol::{BotDifficulty, GameType, GameWinner, MoveEnvelope, PrincipalId};

pub const MOVE_CHOOSE: &str = "choose";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Choice {
    Rock,
    Paper,
    Scissors,
}

impl Choice {
    pub const ALL: [Choice; 3] = [Choice::Rock, Choice::Paper, Choice::Scissors];

    pub fn beats(self, other: Choice) -> bool {
        matches!(
            (self, other),
            (Choice::Rock, Choice::Scissors)
                | (Choice::Scissors, Choice::Paper)
                | (Choice::Paper, Choice::Rock)
        )
    }

    /// The choice that defeats `self`.
    pub fn counter(self) -> Choice {
        match self {
            Choice::Rock => Choice::Paper,
            Choice::Paper => Choice::Scissors,
            Choice::Scissors => Choice::Rock,
        }
    }

    fn index(self) -> usize {
        match self {
            Choice::Rock => 0,
            Choice::Paper => 1,
            Choice::Scissors => 2,
        }
    }
}

/// Outcome of the most recent revealed round.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RevealedRound {
    pub choices: [Choice; 2],
    /// Seat of the round winner; `None` for a tie.
    pub winner_seat: Option<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RpsState {
    pub players: Vec<PlayerSeat>,
    pub best_of: u8,
    pub target_wins: u8,
    /// Choices submitted for the round in progress.
    pub pending: [Option<Choice>; 2],
    pub round_wins: [u8; 2],
    pub ties: u32,
    /// Per-seat counts of every choice ever revealed, indexed
    /// rock/paper/scissors. Drives the hard bot.
    pub choice_counts: [[u32; 3]; 2],
    pub last_round: Option<RevealedRound>,
    pub finished: bool,
    pub aggregate: MatchAggregate,
}

impl RpsState {
    fn seat_of(&self, player: &PrincipalId) -> Option<u8> {
        self.players
            .iter()
            .position(|p| &p.id == player)
            .map(|i| i as u8)
    }

    /// The lowest seat that has not submitted yet; keeps the
    /// one-current-player invariant meaningful during the simultaneous
    /// phase.
    pub fn current_player_index(&self) -> u8 {
        self.pending
            .iter()
            .position(Option::is_none)
            .unwrap_or(0) as u8
    }
}

fn parse_choice(mv: &MoveEnvelope) -> Result<Choice, MoveRejection> {
    mv.data
        .get("choice")
        .cloned()
        .and_then(|v| serde_json::from_value(v).ok())
        .ok_or_else(|| {
            MoveRejection::OutOfBounds("choice must be rock, paper, or scissors".to_string())
        })
}

pub struct RpsRules;

impl RpsRules {
    fn state<'a>(&self, state: &'a GameState) -> Result<&'a RpsState, MoveRejection> {
        match state {
            GameState::RockPaperScissors(s) => Ok(s),
            _ => Err(MoveRejection::WrongGame),
        }
    }
}

impl GameRules for RpsRules {
    fn game_type(&self) -> GameType {
        GameType::RockPaperScissors
    }

    fn initial_state(&self, players: &[PlayerSeat], config: &GameConfig) -> GameState {
        let best_of = if config.best_of == 5 { 5 } else { 3 };
        GameState::RockPaperScissors(RpsState {
            players: players.to_vec(),
            best_of,
            target_wins: best_of / 2 + 1,
            pending: [None, None],
            round_wins: [0, 0],
            ties: 0,
            choice_counts: [[0; 3]; 2],
            last_round: None,
            finished: false,
            aggregate: MatchAggregate::new(config.target_rounds),
        })
    }

    fn validate_move(&self, state: &GameState, mv: &MoveEnvelope) -> Result<(), MoveRejection> {
        let s = self.state(state)?;
        if s.finished {
            return Err(MoveRejection::GameNotPlaying);
        }
        let seat = s.seat_of(&mv.player_id).ok_or(MoveRejection::NotYourTurn)?;
        match mv.move_type.as_str() {
            MOVE_CHOOSE => {
                if s.pending[seat as usize].is_some() {
                    return Err(MoveRejection::AlreadyLocked(
                        "choice already submitted this round".to_string(),
                    ));
                }
                parse_choice(mv)?;
                Ok(())
            }
            other => Err(MoveRejection::UnknownMoveType(other.to_string())),
        }
    }

    fn apply_move(
        &self,
        state: &GameState,
        mv: &MoveEnvelope,
    ) -> Result<(GameState, Vec<RuleEvent>), MoveRejection> {
        self.validate_move(state, mv)?;
        let mut s = self.state(state)?.clone();
        let mut events = Vec::new();

        let seat = s.seat_of(&mv.player_id).expect("validated") as usize;
        let choice = parse_choice(mv)?;
        s.pending[seat] = Some(choice);
        events.push(RuleEvent::new(
            "choice-submitted",
            json!({ "seat": seat }),
        ));

        if let [Some(a), Some(b)] = s.pending {
            s.pending = [None, None];
            s.choice_counts[0][a.index()] += 1;
            s.choice_counts[1][b.index()] += 1;

            let winner_seat = if a.beats(b) {
                Some(0u8)
            } else if b.beats(a) {
                Some(1u8)
            } else {
                None
            };
            s.last_round = Some(RevealedRound {
                choices: [a, b],
                winner_seat,
            });

            match winner_seat {
                Some(winner) => {
                    s.round_wins[winner as usize] += 1;
                    events.push(RuleEvent::new(
                        "round-revealed",
                        json!({
                            "choices": [a, b],
                            "winnerSeat": winner,
                            "roundWins": s.round_wins,
                        }),
                    ));
                    if s.round_wins[winner as usize] >= s.target_wins {
                        s.finished = true;
                        let winner_id = s.players[winner as usize].id.clone();
                        s.aggregate.record_win(&winner_id);
                        events.push(RuleEvent::new(
                            "match-finished",
                            json!({ "winner": winner_id }),
                        ));
                    }
                }
                None => {
                    // Tied rounds are replayed; they do not count toward N.
                    s.ties += 1;
                    events.push(RuleEvent::new(
                        "round-tied",
                        json!({ "choices": [a, b], "ties": s.ties }),
                    ));
                }
            }
        }

        Ok((GameState::RockPaperScissors(s), events))
    }

    fn is_terminal(&self, state: &GameState) -> Option<Terminal> {
        let s = self.state(state).ok()?;
        if !s.finished {
            return None;
        }
        let winner_seat = (s.round_wins[1] >= s.target_wins) as usize;
        Some(Terminal {
            winner: GameWinner::Player(s.players[winner_seat].id.clone()),
            winning_detail: Some(json!({
                "roundWins": s.round_wins,
                "ties": s.ties,
                "bestOf": s.best_of,
            })),
        })
    }

    /// Deterministic: rock.
    fn fallback_move(&self, state: &GameState, player: &PrincipalId) -> Option<MoveEnvelope> {
        let s = self.state(state).ok()?;
        if s.finished {
            return None;
        }
        let seat = s.seat_of(player)?;
        if s.pending[seat as usize].is_some() {
            return None;
        }
        Some(MoveEnvelope::new(
            player.clone(),
            MOVE_CHOOSE,
            json!({ "choice": Choice::Rock }),
        ))
    }

    fn bot_move(
        &self,
        state: &GameState,
        player: &PrincipalId,
        difficulty: BotDifficulty,
    ) -> Option<MoveEnvelope> {
        let s = self.state(state).ok()?;
        if s.finished {
            return None;
        }
        let seat = s.seat_of(player)? as usize;
        if s.pending[seat].is_some() {
            return None;
        }
        let opponent = 1 - seat;

        let choice = match difficulty {
            BotDifficulty::Easy => Choice::ALL[fastrand::usize(..3)],
            BotDifficulty::Medium => {
                // Assume the opponent repeats their last revealed choice.
                s.last_round
                    .as_ref()
                    .map(|round| round.choices[opponent].counter())
                    .unwrap_or(Choice::Rock)
            }
            BotDifficulty::Hard => {
                // Counter the opponent's historically most frequent choice;
                // ties resolve in rock/paper/scissors order.
                let counts = &s.choice_counts[opponent];
                let mut best = Choice::Rock;
                for candidate in Choice::ALL {
                    if counts[candidate.index()] > counts[best.index()] {
                        best = candidate;
                    }
                }
                best.counter()
            }
        };

        Some(MoveEnvelope::new(
            player.clone(),
            MOVE_CHOOSE,
            json!({ "choice": choice }),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::games::test_seats;

    fn new_game(best_of: u8) -> GameState {
        let config = GameConfig {
            best_of,
            ..GameConfig::default()
        };
        RpsRules.initial_state(&test_seats(2), &config)
    }

    fn choose(state: &GameState, player: &str, choice: &str) -> GameState {
        let mv = MoveEnvelope::new(player, MOVE_CHOOSE, json!({ "choice": choice }));
        let (next, _) = RpsRules.apply_move(state, &mv).expect("legal choice");
        next
    }

    #[test]
    fn beats_relation() {
        assert!(Choice::Rock.beats(Choice::Scissors));
        assert!(Choice::Scissors.beats(Choice::Paper));
        assert!(Choice::Paper.beats(Choice::Rock));
        assert!(!Choice::Rock.beats(Choice::Paper));
        assert!(!Choice::Rock.beats(Choice::Rock));
    }

    #[test]
    fn best_of_three_completes() {
        let mut state = new_game(3);
        // p0 wins two straight rounds.
        state = choose(&state, "p0", "rock");
        state = choose(&state, "p1", "scissors");
        state = choose(&state, "p0", "paper");
        state = choose(&state, "p1", "rock");

        let terminal = RpsRules.is_terminal(&state).expect("match over");
        assert_eq!(terminal.winner, GameWinner::Player("p0".to_string()));
        let GameState::RockPaperScissors(s) = &state else {
            unreachable!()
        };
        assert_eq!(s.round_wins, [2, 0]);
        assert_eq!(s.aggregate.wins.get("p0"), Some(&1));
    }

    #[test]
    fn ties_do_not_count_toward_n() {
        let mut state = new_game(3);
        for _ in 0..4 {
            state = choose(&state, "p0", "rock");
            state = choose(&state, "p1", "rock");
        }
        let GameState::RockPaperScissors(s) = &state else {
            unreachable!()
        };
        assert_eq!(s.ties, 4);
        assert_eq!(s.round_wins, [0, 0]);
        assert!(!s.finished);
    }

    #[test]
    fn double_submission_is_locked() {
        let state = new_game(3);
        let state = choose(&state, "p0", "rock");
        let again = MoveEnvelope::new("p0", MOVE_CHOOSE, json!({ "choice": "paper" }));
        assert!(matches!(
            RpsRules.validate_move(&state, &again),
            Err(MoveRejection::AlreadyLocked(_))
        ));
        // The unsubmitted seat is now current.
        assert_eq!(state.current_player_index(), 1);
    }

    #[test]
    fn fallback_is_deterministic_rock() {
        let state = new_game(3);
        let mv = RpsRules.fallback_move(&state, &"p1".to_string()).unwrap();
        assert_eq!(mv.data, json!({ "choice": "rock" }));
        assert!(RpsRules.validate_move(&state, &mv).is_ok());
    }

    #[test]
    fn hard_bot_counters_most_frequent() {
        let mut state = new_game(5);
        // p1 shows scissors twice (p0 plays rock and wins both).
        state = choose(&state, "p0", "rock");
        state = choose(&state, "p1", "scissors");
        state = choose(&state, "p0", "rock");
        state = choose(&state, "p1", "scissors");

        let mv = RpsRules
            .bot_move(&state, &"p0".to_string(), BotDifficulty::Hard)
            .unwrap();
        // Most frequent opponent choice is scissors; its counter is rock.
        assert_eq!(mv.data, json!({ "choice": "rock" }));
    }

    #[test]
    fn state_round_trips_mid_round() {
        let state = new_game(5);
        let state = choose(&state, "p0", "paper");
        let restored = GameState::from_value(state.to_value()).unwrap();
        assert_eq!(state, restored);
    }
}
