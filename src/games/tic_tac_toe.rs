//! Tic-Tac-Toe rules.
//!
//! X always plays first in round 1; each following round starts with the
//! symbol that did not start the previous one. Win detection scans rows,
//! then columns, then the main diagonal, then the anti-diagonal, and
//! reports the first matching triple.

use serde::{Deserialize, Serialize};
use serde_json::json;

use super::{
    GameConfig, GameRules, GameState, MatchAggregate, MoveRejection, PlayerSeat, RuleEvent,
    Terminal,
};
use crate::protocol::{BotDifficulty, GameType, GameWinner, MoveEnvelope, PrincipalId};

pub const MOVE_PLACE: &str = "place";
pub const MOVE_NEXT_ROUND: &str = "next-round";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Symbol {
    X,
    O,
}

impl Symbol {
    pub fn opposite(self) -> Self {
        match self {
            Self::X => Self::O,
            Self::O => Self::X,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::X => "X",
            Self::O => "O",
        }
    }

    /// Seat 0 plays X, seat 1 plays O, for the whole match.
    fn seat(self) -> u8 {
        match self {
            Self::X => 0,
            Self::O => 1,
        }
    }
}

type Board = [[Option<Symbol>; 3]; 3];
type Line = [[u8; 2]; 3];

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TicTacToeState {
    pub players: Vec<PlayerSeat>,
    pub board: Board,
    pub current_symbol: Symbol,
    pub current_player_index: u8,
    pub move_count: u8,
    /// 1-based round number; odd rounds start with X, even rounds with O.
    pub round: u32,
    pub winner: Option<Symbol>,
    pub winning_line: Option<Line>,
    pub round_over: bool,
    pub aggregate: MatchAggregate,
}

impl TicTacToeState {
    fn symbol_of(&self, player: &PrincipalId) -> Option<Symbol> {
        let seat = self.players.iter().position(|p| &p.id == player)?;
        match seat {
            0 => Some(Symbol::X),
            1 => Some(Symbol::O),
            _ => None,
        }
    }

    fn starting_symbol(round: u32) -> Symbol {
        if round % 2 == 1 {
            Symbol::X
        } else {
            Symbol::O
        }
    }
}

/// Scan order is fixed: rows, columns, main diagonal, anti-diagonal.
pub fn check_win_condition(board: &Board) -> Option<(Symbol, Line)> {
    for r in 0..3u8 {
        if let Some(symbol) = board[r as usize][0] {
            if board[r as usize][1] == Some(symbol) && board[r as usize][2] == Some(symbol) {
                return Some((symbol, [[r, 0], [r, 1], [r, 2]]));
            }
        }
    }
    for c in 0..3u8 {
        if let Some(symbol) = board[0][c as usize] {
            if board[1][c as usize] == Some(symbol) && board[2][c as usize] == Some(symbol) {
                return Some((symbol, [[0, c], [1, c], [2, c]]));
            }
        }
    }
    if let Some(symbol) = board[0][0] {
        if board[1][1] == Some(symbol) && board[2][2] == Some(symbol) {
            return Some((symbol, [[0, 0], [1, 1], [2, 2]]));
        }
    }
    if let Some(symbol) = board[0][2] {
        if board[1][1] == Some(symbol) && board[2][0] == Some(symbol) {
            return Some((symbol, [[0, 2], [1, 1], [2, 0]]));
        }
    }
    None
}

fn parse_cell(mv: &MoveEnvelope) -> Result<(usize, usize), MoveRejection> {
    let row = mv.data.get("row").and_then(serde_json::Value::as_u64);
    let col = mv.data.get("col").and_then(serde_json::Value::as_u64);
    match (row, col) {
        (Some(r), Some(c)) if r < 3 && c < 3 => Ok((r as usize, c as usize)),
        _ => Err(MoveRejection::OutOfBounds(
            "row and col must be integers in 0..=2".to_string(),
        )),
    }
}

pub struct TicTacToeRules;

impl TicTacToeRules {
    fn state<'a>(&self, state: &'a GameState) -> Result<&'a TicTacToeState, MoveRejection> {
        match state {
            GameState::TicTacToe(s) => Ok(s),
            _ => Err(MoveRejection::WrongGame),
        }
    }
}

impl GameRules for TicTacToeRules {
    fn game_type(&self) -> GameType {
        GameType::TicTacToe
    }

    fn initial_state(&self, players: &[PlayerSeat], config: &GameConfig) -> GameState {
        GameState::TicTacToe(TicTacToeState {
            players: players.to_vec(),
            board: Default::default(),
            current_symbol: Symbol::X,
            current_player_index: Symbol::X.seat(),
            move_count: 0,
            round: 1,
            winner: None,
            winning_line: None,
            round_over: false,
            aggregate: MatchAggregate::new(config.target_rounds),
        })
    }

    fn validate_move(&self, state: &GameState, mv: &MoveEnvelope) -> Result<(), MoveRejection> {
        let s = self.state(state)?;
        let symbol = s
            .symbol_of(&mv.player_id)
            .ok_or(MoveRejection::NotYourTurn)?;

        match mv.move_type.as_str() {
            MOVE_PLACE => {
                if s.round_over {
                    return Err(MoveRejection::GameNotPlaying);
                }
                if symbol != s.current_symbol {
                    return Err(MoveRejection::NotYourTurn);
                }
                let (row, col) = parse_cell(mv)?;
                if s.board[row][col].is_some() {
                    return Err(MoveRejection::AlreadyLocked(format!(
                        "cell ({row},{col}) is already taken"
                    )));
                }
                Ok(())
            }
            MOVE_NEXT_ROUND => {
                // Any seated player may start the next round once the
                // current one has ended.
                if !s.round_over {
                    return Err(MoveRejection::RoundNotFinished);
                }
                if !s.aggregate.next_round_allowed() {
                    return Err(MoveRejection::RoundLimitReached);
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
            MOVE_PLACE => {
                let (row, col) = parse_cell(mv)?;
                let symbol = s.current_symbol;
                s.board[row][col] = Some(symbol);
                s.move_count += 1;

                if let Some((winner, line)) = check_win_condition(&s.board) {
                    s.winner = Some(winner);
                    s.winning_line = Some(line);
                    s.round_over = true;
                    s.aggregate.record_win(winner.as_str());
                    events.push(RuleEvent::new(
                        "round-finished",
                        json!({ "winner": winner.as_str(), "winningLine": line }),
                    ));
                } else if s.move_count == 9 {
                    s.round_over = true;
                    s.aggregate.record_draw();
                    events.push(RuleEvent::new(
                        "round-finished",
                        json!({ "winner": "draw", "moveCount": s.move_count }),
                    ));
                } else {
                    s.current_symbol = symbol.opposite();
                    s.current_player_index = s.current_symbol.seat();
                }
            }
            MOVE_NEXT_ROUND => {
                s.round += 1;
                s.board = Default::default();
                s.move_count = 0;
                s.winner = None;
                s.winning_line = None;
                s.round_over = false;
                s.current_symbol = TicTacToeState::starting_symbol(s.round);
                s.current_player_index = s.current_symbol.seat();
                events.push(RuleEvent::new(
                    "round-started",
                    json!({ "round": s.round, "startingSymbol": s.current_symbol.as_str() }),
                ));
            }
            _ => unreachable!("validated above"),
        }

        Ok((GameState::TicTacToe(s), events))
    }

    fn is_terminal(&self, state: &GameState) -> Option<Terminal> {
        let s = self.state(state).ok()?;
        if !s.round_over {
            return None;
        }
        match s.winner {
            Some(symbol) => {
                let winner_id = s.players.get(symbol.seat() as usize)?.id.clone();
                Some(Terminal {
                    winner: GameWinner::Player(winner_id),
                    winning_detail: Some(json!({
                        "symbol": symbol.as_str(),
                        "winningLine": s.winning_line,
                    })),
                })
            }
            None => Some(Terminal {
                winner: GameWinner::Draw,
                winning_detail: Some(json!({ "moveCount": s.move_count })),
            }),
        }
    }

    /// First empty cell in row-major order.
    fn fallback_move(&self, state: &GameState, player: &PrincipalId) -> Option<MoveEnvelope> {
        let s = self.state(state).ok()?;
        if s.round_over {
            return None;
        }
        for row in 0..3 {
            for col in 0..3 {
                if s.board[row][col].is_none() {
                    return Some(MoveEnvelope::new(
                        player.clone(),
                        MOVE_PLACE,
                        json!({ "row": row, "col": col }),
                    ));
                }
            }
        }
        None
    }

    fn bot_move(
        &self,
        state: &GameState,
        player: &PrincipalId,
        difficulty: BotDifficulty,
    ) -> Option<MoveEnvelope> {
        let s = self.state(state).ok()?;
        if s.round_over {
            return s
                .aggregate
                .next_round_allowed()
                .then(|| MoveEnvelope::new(player.clone(), MOVE_NEXT_ROUND, json!({})));
        }
        let symbol = s.symbol_of(player)?;
        if symbol != s.current_symbol {
            return None;
        }
        let (row, col) = match difficulty {
            BotDifficulty::Easy => random_cell(&s.board)?,
            BotDifficulty::Medium => heuristic_cell(&s.board, symbol)?,
            BotDifficulty::Hard => minimax_cell(&s.board, symbol)?,
        };
        Some(MoveEnvelope::new(
            player.clone(),
            MOVE_PLACE,
            json!({ "row": row, "col": col }),
        ))
    }
}

fn empty_cells(board: &Board) -> Vec<(usize, usize)> {
    let mut cells = Vec::new();
    for row in 0..3 {
        for col in 0..3 {
            if board[row][col].is_none() {
                cells.push((row, col));
            }
        }
    }
    cells
}

fn random_cell(board: &Board) -> Option<(usize, usize)> {
    let cells = empty_cells(board);
    if cells.is_empty() {
        return None;
    }
    Some(cells[fastrand::usize(..cells.len())])
}

/// One-ply lookahead: win if possible, block if necessary, then prefer
/// the center, corners, and finally edges.
fn heuristic_cell(board: &Board, symbol: Symbol) -> Option<(usize, usize)> {
    let cells = empty_cells(board);
    for &(row, col) in &cells {
        let mut trial = *board;
        trial[row][col] = Some(symbol);
        if check_win_condition(&trial).is_some() {
            return Some((row, col));
        }
    }
    for &(row, col) in &cells {
        let mut trial = *board;
        trial[row][col] = Some(symbol.opposite());
        if check_win_condition(&trial).is_some() {
            return Some((row, col));
        }
    }
    for &(row, col) in PREFERENCE_ORDER {
        if board[row][col].is_none() {
            return Some((row, col));
        }
    }
    None
}

/// Deterministic tie-break order: center, corners, edges.
const PREFERENCE_ORDER: &[(usize, usize)] = &[
    (1, 1),
    (0, 0),
    (0, 2),
    (2, 0),
    (2, 2),
    (0, 1),
    (1, 0),
    (1, 2),
    (2, 1),
];

/// Full minimax with alpha-beta pruning. Candidates are evaluated in the
/// preference order, so equal scores resolve center > corners > edges.
fn minimax_cell(board: &Board, symbol: Symbol) -> Option<(usize, usize)> {
    let mut best: Option<((usize, usize), i32)> = None;
    for &(row, col) in PREFERENCE_ORDER {
        if board[row][col].is_some() {
            continue;
        }
        let mut trial = *board;
        trial[row][col] = Some(symbol);
        let score = minimax(&trial, symbol, symbol.opposite(), 1, i32::MIN, i32::MAX);
        if best.map_or(true, |(_, s)| score > s) {
            best = Some(((row, col), score));
        }
    }
    best.map(|(cell, _)| cell)
}

fn minimax(
    board: &Board,
    maximizer: Symbol,
    to_move: Symbol,
    depth: i32,
    mut alpha: i32,
    mut beta: i32,
) -> i32 {
    if let Some((winner, _)) = check_win_condition(board) {
        return if winner == maximizer {
            10 - depth
        } else {
            depth - 10
        };
    }
    let cells = empty_cells(board);
    if cells.is_empty() {
        return 0;
    }

    let maximizing = to_move == maximizer;
    let mut best = if maximizing { i32::MIN } else { i32::MAX };
    for (row, col) in cells {
        let mut trial = *board;
        trial[row][col] = Some(to_move);
        let score = minimax(&trial, maximizer, to_move.opposite(), depth + 1, alpha, beta);
        if maximizing {
            best = best.max(score);
            alpha = alpha.max(best);
        } else {
            best = best.min(score);
            beta = beta.min(best);
        }
        if beta <= alpha {
            break;
        }
    }
    best
}
