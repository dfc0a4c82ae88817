//! Yahtzee rules.
//!
//! Thirteen categories, each scorable once per player. Up to three rolls
//! per turn with held dice preserved between rolls; scoring a category
//! ends the turn. The upper-section bonus (+35) is granted when the upper
//! categories sum to 63 or more.

use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeMap;

use super::{
    roll_die, GameConfig, GameRules, GameState, MatchAggregate, MoveRejection, PlayerSeat,
    RuleEvent, Terminal,
};
use crate::protocol::{BotDifficulty, GameType, GameWinner, MoveEnvelope, PrincipalId};

pub const MOVE_ROLL: &str = "roll";
pub const MOVE_SCORE: &str = "score";

pub const UPPER_BONUS: u16 = 35;
pub const UPPER_BONUS_THRESHOLD: u16 = 63;
pub const ROLLS_PER_TURN: u8 = 3;

/// Declaration order doubles as the deterministic tie-break order for
/// auto-scoring.
#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash,
)]
#[serde(rename_all = "kebab-case")]
pub enum Category {
    Ones,
    Twos,
    Threes,
    Fours,
    Fives,
    Sixes,
    ThreeOfAKind,
    FourOfAKind,
    FullHouse,
    SmallStraight,
    LargeStraight,
    Yahtzee,
    Chance,
}

impl Category {
    pub const ALL: [Category; 13] = [
        Category::Ones,
        Category::Twos,
        Category::Threes,
        Category::Fours,
        Category::Fives,
        Category::Sixes,
        Category::ThreeOfAKind,
        Category::FourOfAKind,
        Category::FullHouse,
        Category::SmallStraight,
        Category::LargeStraight,
        Category::Yahtzee,
        Category::Chance,
    ];

    pub fn is_upper(&self) -> bool {
        matches!(
            self,
            Self::Ones | Self::Twos | Self::Threes | Self::Fours | Self::Fives | Self::Sixes
        )
    }
}

/// Score five dice against a category.
pub fn score_category(category: Category, dice: &[u8; 5]) -> u16 {
    let mut counts = [0u8; 7];
    for &die in dice {
        counts[die as usize] += 1;
    }
    let sum: u16 = dice.iter().map(|&d| u16::from(d)).sum();

    match category {
        Category::Ones => u16::from(counts[1]),
        Category::Twos => 2 * u16::from(counts[2]),
        Category::Threes => 3 * u16::from(counts[3]),
        Category::Fours => 4 * u16::from(counts[4]),
        Category::Fives => 5 * u16::from(counts[5]),
        Category::Sixes => 6 * u16::from(counts[6]),
        Category::ThreeOfAKind => {
            if counts.iter().any(|&c| c >= 3) {
                sum
            } else {
                0
            }
        }
        Category::FourOfAKind => {
            if counts.iter().any(|&c| c >= 4) {
                sum
            } else {
                0
            }
        }
        Category::FullHouse => {
            let has_three = counts.iter().any(|&c| c == 3);
            let has_pair = counts.iter().any(|&c| c == 2);
            if has_three && has_pair {
                25
            } else {
                0
            }
        }
        Category::SmallStraight => {
            let runs = [[1, 2, 3, 4], [2, 3, 4, 5], [3, 4, 5, 6]];
            if runs
                .iter()
                .any(|run| run.iter().all(|&v| counts[v as usize] > 0))
            {
                30
            } else {
                0
            }
        }
        Category::LargeStraight => {
            let runs = [[1, 2, 3, 4, 5], [2, 3, 4, 5, 6]];
            if runs
                .iter()
                .any(|run| run.iter().all(|&v| counts[v as usize] > 0))
            {
                40
            } else {
                0
            }
        }
        Category::Yahtzee => {
            if counts.iter().any(|&c| c == 5) {
                50
            } else {
                0
            }
        }
        Category::Chance => sum,
    }
}

/// One player's scorecard: the categories they have locked in.
pub type Scorecard = BTreeMap<Category, u16>;

pub fn upper_sum(card: &Scorecard) -> u16 {
    card.iter()
        .filter(|(category, _)| category.is_upper())
        .map(|(_, &points)| points)
        .sum()
}

/// Grand total including the upper-section bonus.
pub fn card_total(card: &Scorecard) -> u16 {
    let base: u16 = card.values().sum();
    if upper_sum(card) >= UPPER_BONUS_THRESHOLD {
        base + UPPER_BONUS
    } else {
        base
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct YahtzeeState {
    pub players: Vec<PlayerSeat>,
    /// Parallel to `players`.
    pub scorecards: Vec<Scorecard>,
    pub current_player_index: u8,
    pub dice: [u8; 5],
    pub rolls_left: u8,
    pub has_rolled: bool,
    pub held: [bool; 5],
    pub finished: bool,
    pub rng_seed: u64,
    pub aggregate: MatchAggregate,
}

impl YahtzeeState {
    fn seat_of(&self, player: &PrincipalId) -> Option<u8> {
        self.players
            .iter()
            .position(|p| &p.id == player)
            .map(|i| i as u8)
    }

    fn current_card(&self) -> &Scorecard {
        &self.scorecards[self.current_player_index as usize]
    }

    /// Empty categories ranked best-scoring first, ties by declaration
    /// order.
    fn best_open_category(&self) -> Option<(Category, u16)> {
        let card = self.current_card();
        Category::ALL
            .iter()
            .filter(|c| !card.contains_key(c))
            .map(|&c| (c, score_category(c, &self.dice)))
            .max_by(|a, b| a.1.cmp(&b.1).then(b.0.cmp(&a.0)))
    }
}

fn parse_category(mv: &MoveEnvelope) -> Result<Category, MoveRejection> {
    mv.data
        .get("category")
        .cloned()
        .and_then(|v| serde_json::from_value(v).ok())
        .ok_or_else(|| MoveRejection::OutOfBounds("unknown or missing category".to_string()))
}

fn parse_held(mv: &MoveEnvelope) -> [bool; 5] {
    mv.data
        .get("held")
        .cloned()
        .and_then(|v| serde_json::from_value(v).ok())
        .unwrap_or([false; 5])
}

pub struct YahtzeeRules;

impl YahtzeeRules {
    fn state<'a>(&self, state: &'a GameState) -> Result<&'a YahtzeeState, MoveRejection> {
        match state {
            GameState::Yahtzee(s) => Ok(s),
            _ => Err(MoveRejection::WrongGame),
        }
    }
}

impl GameRules for YahtzeeRules {
    fn game_type(&self) -> GameType {
        GameType::Yahtzee
    }

    fn initial_state(&self, players: &[PlayerSeat], config: &GameConfig) -> GameState {
        GameState::Yahtzee(YahtzeeState {
            players: players.to_vec(),
            scorecards: vec![Scorecard::new(); players.len()],
            current_player_index: 0,
            dice: [0; 5],
            rolls_left: ROLLS_PER_TURN,
            has_rolled: false,
            held: [false; 5],
            finished: false,
            rng_seed: config.seed_or_entropy(),
            aggregate: MatchAggregate::new(config.target_rounds),
        })
    }

    fn validate_move(&self, state: &GameState, mv: &MoveEnvelope) -> Result<(), MoveRejection> {
        let s = self.state(state)?;
        if s.finished {
            return Err(MoveRejection::GameNotPlaying);
        }
        let seat = s.seat_of(&mv.player_id).ok_or(MoveRejection::NotYourTurn)?;
        if seat != s.current_player_index {
            return Err(MoveRejection::NotYourTurn);
        }

        match mv.move_type.as_str() {
            MOVE_ROLL => {
                if s.rolls_left == 0 {
                    return Err(MoveRejection::OutOfBounds(
                        "no rolls left this turn".to_string(),
                    ));
                }
                Ok(())
            }
            MOVE_SCORE => {
                if !s.has_rolled {
                    return Err(MoveRejection::OutOfBounds(
                        "cannot score before rolling".to_string(),
                    ));
                }
                let category = parse_category(mv)?;
                if s.current_card().contains_key(&category) {
                    return Err(MoveRejection::AlreadyLocked(format!(
                        "category {category:?} is already scored"
                    )));
                }
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

        match mv.move_type.as_str() {
            MOVE_ROLL => {
                // Held dice only apply after the first roll of the turn.
                let held = if s.has_rolled { parse_held(mv) } else { [false; 5] };
                for (i, die) in s.dice.iter_mut().enumerate() {
                    if !held[i] {
                        *die = roll_die(&mut s.rng_seed);
                    }
                }
                s.held = held;
                s.has_rolled = true;
                s.rolls_left -= 1;
                events.push(RuleEvent::new(
                    "dice-rolled",
                    json!({ "dice": s.dice, "rollsLeft": s.rolls_left }),
                ));
            }
            MOVE_SCORE => {
                let category = parse_category(mv)?;
                let points = score_category(category, &s.dice);
                let seat = s.current_player_index as usize;
                s.scorecards[seat].insert(category, points);
                events.push(RuleEvent::new(
                    "category-scored",
                    json!({ "category": category, "points": points }),
                ));

                let all_filled = s
                    .scorecards
                    .iter()
                    .all(|card| card.len() == Category::ALL.len());
                if all_filled {
                    s.finished = true;
                    let totals: Vec<u16> = s.scorecards.iter().map(card_total).collect();
                    let best = *totals.iter().max().unwrap_or(&0);
                    let winners: Vec<usize> = totals
                        .iter()
                        .enumerate()
                        .filter(|(_, &t)| t == best)
                        .map(|(i, _)| i)
                        .collect();
                    if winners.len() == 1 {
                        let winner_id = s.players[winners[0]].id.clone();
                        s.aggregate.record_win(&winner_id);
                    } else {
                        s.aggregate.record_draw();
                    }
                    events.push(RuleEvent::new("game-finished", json!({ "totals": totals })));
                } else {
                    s.current_player_index =
                        (s.current_player_index + 1) % s.players.len() as u8;
                    s.rolls_left = ROLLS_PER_TURN;
                    s.has_rolled = false;
                    s.held = [false; 5];
                }
            }
            _ => unreachable!("validated above"),
        }

        Ok((GameState::Yahtzee(s), events))
    }

    fn is_terminal(&self, state: &GameState) -> Option<Terminal> {
        let s = self.state(state).ok()?;
        if !s.finished {
            return None;
        }
        let totals: Vec<u16> = s.scorecards.iter().map(card_total).collect();
        let best = *totals.iter().max()?;
        let winners: Vec<usize> = totals
            .iter()
            .enumerate()
            .filter(|(_, &t)| t == best)
            .map(|(i, _)| i)
            .collect();
        let winner = if winners.len() == 1 {
            GameWinner::Player(s.players[winners[0]].id.clone())
        } else {
            GameWinner::Draw
        };
        Some(Terminal {
            winner,
            winning_detail: Some(json!({ "totals": totals })),
        })
    }

    /// Roll once if the turn has not rolled yet, otherwise auto-score the
    /// best-scoring open category.
    fn fallback_move(&self, state: &GameState, player: &PrincipalId) -> Option<MoveEnvelope> {
        let s = self.state(state).ok()?;
        if s.finished {
            return None;
        }
        if !s.has_rolled {
            return Some(MoveEnvelope::new(player.clone(), MOVE_ROLL, json!({})));
        }
        let (category, _) = s.best_open_category()?;
        Some(MoveEnvelope::new(
            player.clone(),
            MOVE_SCORE,
            json!({ "category": category }),
        ))
    }

    fn bot_move(
        &self,
        state: &GameState,
        player: &PrincipalId,
        difficulty: BotDifficulty,
    ) -> Option<MoveEnvelope> {
        let s = self.state(state).ok()?;
        if s.finished || s.seat_of(player) != Some(s.current_player_index) {
            return None;
        }
        if !s.has_rolled {
            return Some(MoveEnvelope::new(player.clone(), MOVE_ROLL, json!({})));
        }

        match difficulty {
            BotDifficulty::Easy => {
                // Random open category, no rerolls.
                let card = s.current_card();
                let open: Vec<Category> = Category::ALL
                    .iter()
                    .copied()
                    .filter(|c| !card.contains_key(c))
                    .collect();
                let category = open[fastrand::usize(..open.len())];
                Some(MoveEnvelope::new(
                    player.clone(),
                    MOVE_SCORE,
                    json!({ "category": category }),
                ))
            }
            BotDifficulty::Medium | BotDifficulty::Hard => {
                let (category, points) = s.best_open_category()?;
                let threshold = if difficulty == BotDifficulty::Hard { 25 } else { 20 };
                if s.rolls_left > 0 && points < threshold {
                    // Keep the most frequent value and reroll the rest.
                    let held = hold_most_frequent(&s.dice);
                    Some(MoveEnvelope::new(
                        player.clone(),
                        MOVE_ROLL,
                        json!({ "held": held }),
                    ))
                } else {
                    Some(MoveEnvelope::new(
                        player.clone(),
                        MOVE_SCORE,
                        json!({ "category": category }),
                    ))
                }
            }
        }
    }
}

/// Hold every die matching the most frequent value (highest value wins a
/// frequency tie).
fn hold_most_frequent(dice: &[u8; 5]) -> [bool; 5] {
    let mut counts = [0u8; 7];
    for &die in dice {
        counts[die as usize] += 1;
    }
    let mut best_value = 1u8;
    for value in 1..=6u8 {
        if counts[value as usize] >= counts[best_value as usize] {
            best_value = value;
        }
    }
    let mut held = [false; 5];
    for (i, &die) in dice.iter().enumerate() {
        held[i] = die == best_value;
    }
    held
}
