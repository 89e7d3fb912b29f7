//! Chinese chess pieces and per-piece reachable squares.
//!
//! Coordinates run x in 0..=8 and y in 0..=9 with the origin in the top-left
//! corner. Red starts on the low rows and advances towards higher y; black
//! starts on the high rows and advances towards lower y. Only reachable
//! squares are computed here; check and checkmate are not considered.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

pub const BOARD_WIDTH: i32 = 9;
pub const BOARD_HEIGHT: i32 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PieceKind {
    #[serde(rename = "车")]
    Chariot,
    #[serde(rename = "马")]
    Horse,
    #[serde(rename = "相")]
    Elephant,
    #[serde(rename = "士")]
    Advisor,
    #[serde(rename = "帅")]
    General,
    #[serde(rename = "炮")]
    Cannon,
    #[serde(rename = "兵")]
    Soldier,
}

impl PieceKind {
    pub fn symbol(self) -> &'static str {
        match self {
            PieceKind::Chariot => "车",
            PieceKind::Horse => "马",
            PieceKind::Elephant => "相",
            PieceKind::Advisor => "士",
            PieceKind::General => "帅",
            PieceKind::Cannon => "炮",
            PieceKind::Soldier => "兵",
        }
    }

    /// Single ASCII letter for plain-text boards.
    pub fn letter(self) -> char {
        match self {
            PieceKind::Chariot => 'R',
            PieceKind::Horse => 'H',
            PieceKind::Elephant => 'E',
            PieceKind::Advisor => 'A',
            PieceKind::General => 'G',
            PieceKind::Cannon => 'C',
            PieceKind::Soldier => 'S',
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    #[serde(rename = "r")]
    Red,
    #[serde(rename = "b")]
    Black,
}

impl Side {
    pub fn opponent(self) -> Side {
        match self {
            Side::Red => Side::Black,
            Side::Black => Side::Red,
        }
    }

    pub fn code(self) -> &'static str {
        match self {
            Side::Red => "r",
            Side::Black => "b",
        }
    }

    /// Direction of travel along y towards the opposing back rank.
    pub fn forward(self) -> i32 {
        match self {
            Side::Red => 1,
            Side::Black => -1,
        }
    }

    pub fn has_crossed_river(self, y: i32) -> bool {
        match self {
            Side::Red => y >= 5,
            Side::Black => y <= 4,
        }
    }

    pub fn palace(self) -> Palace {
        match self {
            Side::Red => Palace { top: 0 },
            Side::Black => Palace { top: 7 },
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Red => write!(f, "red"),
            Side::Black => write!(f, "black"),
        }
    }
}

impl std::str::FromStr for Side {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "r" | "red" => Ok(Side::Red),
            "b" | "black" => Ok(Side::Black),
            other => Err(format!("unknown side '{}'", other)),
        }
    }
}

/// The 3x3 box a general and its advisors may not leave.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Palace {
    top: i32,
}

impl Palace {
    pub fn contains(&self, pos: Position) -> bool {
        (3..=5).contains(&pos.x) && (self.top..=self.top + 2).contains(&pos.y)
    }

    pub fn center(&self) -> Position {
        Position::new(4, self.top + 1)
    }

    pub fn corners(&self) -> [Position; 4] {
        [
            Position::new(3, self.top),
            Position::new(5, self.top),
            Position::new(3, self.top + 2),
            Position::new(5, self.top + 2),
        ]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Position {
    pub x: i32,
    pub y: i32,
}

impl Position {
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    pub fn in_bounds(&self) -> bool {
        (0..BOARD_WIDTH).contains(&self.x) && (0..BOARD_HEIGHT).contains(&self.y)
    }

    pub fn offset(&self, dx: i32, dy: i32) -> Position {
        Position::new(self.x + dx, self.y + dy)
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Piece {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: PieceKind,
    pub side: Side,
    pub position: Position,
}

impl Piece {
    pub fn new(kind: PieceKind, side: Side, position: Position) -> Self {
        Self {
            id: format!("{}-{}-{}-{}", side.code(), kind.symbol(), position.y, position.x),
            kind,
            side,
            position,
        }
    }
}

const ORTHOGONAL: [(i32, i32); 4] = [(0, -1), (0, 1), (-1, 0), (1, 0)];
const DIAGONAL: [(i32, i32); 4] = [(-1, -1), (1, -1), (-1, 1), (1, 1)];

/// Occupancy lookup over an unordered piece list.
struct Board<'a> {
    squares: HashMap<Position, &'a Piece>,
}

impl<'a> Board<'a> {
    fn new(pieces: &'a [Piece]) -> Self {
        Self {
            squares: pieces.iter().map(|p| (p.position, p)).collect(),
        }
    }

    fn at(&self, pos: Position) -> Option<&'a Piece> {
        self.squares.get(&pos).copied()
    }

    fn is_empty(&self, pos: Position) -> bool {
        !self.squares.contains_key(&pos)
    }

    /// In bounds and not held by `side`.
    fn can_land(&self, side: Side, pos: Position) -> bool {
        pos.in_bounds() && self.at(pos).map_or(true, |p| p.side != side)
    }
}

/// Squares `piece` can move to or capture on, given every piece on the board.
/// A piece outside the board has no destinations.
pub fn legal_destinations(piece: &Piece, pieces: &[Piece]) -> Vec<Position> {
    if !piece.position.in_bounds() {
        return Vec::new();
    }
    let board = Board::new(pieces);
    match piece.kind {
        PieceKind::Soldier => soldier(piece, &board),
        PieceKind::Cannon => cannon(piece, &board),
        PieceKind::Chariot => chariot(piece, &board),
        PieceKind::Horse => horse(piece, &board),
        PieceKind::Elephant => elephant(piece, &board),
        PieceKind::Advisor => advisor(piece, &board),
        PieceKind::General => general(piece, &board),
    }
}

fn soldier(piece: &Piece, board: &Board) -> Vec<Position> {
    let pos = piece.position;
    let mut steps = vec![pos.offset(0, piece.side.forward())];
    if piece.side.has_crossed_river(pos.y) {
        steps.push(pos.offset(-1, 0));
        steps.push(pos.offset(1, 0));
    }
    steps
        .into_iter()
        .filter(|&to| board.can_land(piece.side, to))
        .collect()
}

fn chariot(piece: &Piece, board: &Board) -> Vec<Position> {
    let mut reach = Vec::new();
    for (dx, dy) in ORTHOGONAL {
        let mut to = piece.position.offset(dx, dy);
        while to.in_bounds() {
            match board.at(to) {
                None => reach.push(to),
                Some(other) => {
                    if other.side != piece.side {
                        reach.push(to);
                    }
                    break;
                }
            }
            to = to.offset(dx, dy);
        }
    }
    reach
}

fn cannon(piece: &Piece, board: &Board) -> Vec<Position> {
    let mut reach = Vec::new();
    for (dx, dy) in ORTHOGONAL {
        let mut to = piece.position.offset(dx, dy);
        while to.in_bounds() && board.is_empty(to) {
            reach.push(to);
            to = to.offset(dx, dy);
        }
        // `to` is now the screen, if any; only the next piece behind it counts
        if !to.in_bounds() {
            continue;
        }
        to = to.offset(dx, dy);
        while to.in_bounds() {
            if let Some(target) = board.at(to) {
                if target.side != piece.side {
                    reach.push(to);
                }
                break;
            }
            to = to.offset(dx, dy);
        }
    }
    reach
}

fn horse(piece: &Piece, board: &Board) -> Vec<Position> {
    let pos = piece.position;
    let mut reach = Vec::new();
    for (dx, dy) in ORTHOGONAL {
        let leg = pos.offset(dx, dy);
        if !leg.in_bounds() || !board.is_empty(leg) {
            continue;
        }
        // two landing squares per leg, splayed sideways from the leg direction
        let (sx, sy) = (dy, dx);
        for to in [
            pos.offset(2 * dx + sx, 2 * dy + sy),
            pos.offset(2 * dx - sx, 2 * dy - sy),
        ] {
            if board.can_land(piece.side, to) {
                reach.push(to);
            }
        }
    }
    reach
}

fn elephant(piece: &Piece, board: &Board) -> Vec<Position> {
    let pos = piece.position;
    DIAGONAL
        .iter()
        .filter(|&&(dx, dy)| board.is_empty(pos.offset(dx, dy)))
        .map(|&(dx, dy)| pos.offset(2 * dx, 2 * dy))
        .filter(|&to| board.can_land(piece.side, to))
        .collect()
}

fn advisor(piece: &Piece, board: &Board) -> Vec<Position> {
    let palace = piece.side.palace();
    let pos = piece.position;
    let targets: Vec<Position> = if pos == palace.center() {
        palace.corners().to_vec()
    } else if palace.corners().contains(&pos) {
        vec![palace.center()]
    } else {
        Vec::new()
    };
    targets
        .into_iter()
        .filter(|&to| board.can_land(piece.side, to))
        .collect()
}

fn general(piece: &Piece, board: &Board) -> Vec<Position> {
    let palace = piece.side.palace();
    ORTHOGONAL
        .iter()
        .map(|&(dx, dy)| piece.position.offset(dx, dy))
        .filter(|&to| palace.contains(to) && board.can_land(piece.side, to))
        .collect()
}
