//! Chinese chess played on a room document.
//!
//! Pieces live in the `chessPieces` map keyed by piece id. Every accepted
//! move is appended to the `chessMoves` array; whose turn it is and whether
//! the game is over are derived from those two containers, so every replica
//! agrees once it has seen the same moves.

use serde::{Deserialize, Serialize};

use crate::chess::{legal_destinations, Piece, PieceKind, Position, Side};
use crate::doc::{Doc, DocHandle, SubscriptionId};

pub const PIECES_MAP: &str = "chessPieces";
pub const MOVES_ARRAY: &str = "chessMoves";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MoveRecord {
    pub piece_id: String,
    #[serde(rename = "type")]
    pub kind: PieceKind,
    pub side: Side,
    pub from: Position,
    pub to: Position,
    /// Id of the piece taken by this move.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub captured: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ChessStatus {
    Playing,
    RedWin,
    BlackWin,
    /// Never produced by move logic; kept for wire compatibility.
    Draw,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChessGameState {
    pub current_player: Side,
    #[serde(rename = "gameStatus")]
    pub status: ChessStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChessMoveError {
    #[error("no piece at {0}")]
    NoPieceAt(Position),
    #[error("that piece belongs to {0}")]
    NotYourPiece(Side),
    #[error("it is {0}'s turn")]
    NotYourTurn(Side),
    #[error("{from} -> {to} is not a legal move")]
    IllegalMove { from: Position, to: Position },
    #[error("game is already finished")]
    GameFinished,
}

/// The standard 32-piece starting position.
pub fn opening_layout() -> Vec<Piece> {
    const BACK_RANK: [PieceKind; 9] = [
        PieceKind::Chariot,
        PieceKind::Horse,
        PieceKind::Elephant,
        PieceKind::Advisor,
        PieceKind::General,
        PieceKind::Advisor,
        PieceKind::Elephant,
        PieceKind::Horse,
        PieceKind::Chariot,
    ];

    let mut pieces = Vec::with_capacity(32);
    for side in [Side::Red, Side::Black] {
        // rows counted from the side's own back rank
        let row = |n: i32| match side {
            Side::Red => n,
            Side::Black => 9 - n,
        };
        for (x, kind) in BACK_RANK.iter().enumerate() {
            pieces.push(Piece::new(*kind, side, Position::new(x as i32, row(0))));
        }
        for x in [1, 7] {
            pieces.push(Piece::new(PieceKind::Cannon, side, Position::new(x, row(2))));
        }
        for x in [0, 2, 4, 6, 8] {
            pieces.push(Piece::new(PieceKind::Soldier, side, Position::new(x, row(3))));
        }
    }
    pieces
}

/// Chess engine bound to one room document.
#[derive(Debug, Clone)]
pub struct ChessGame {
    doc: DocHandle,
}

impl ChessGame {
    pub fn new(doc: DocHandle) -> Self {
        doc.with_mut(|d| {
            d.ensure_map(PIECES_MAP);
            d.ensure_array(MOVES_ARRAY);
        });
        Self { doc }
    }

    /// Reset to the opening position with an empty move log.
    pub fn start(&self) {
        self.doc.transact(|txn| {
            txn.map_clear(PIECES_MAP);
            txn.array_clear(MOVES_ARRAY);
            for piece in opening_layout() {
                txn.map_set(PIECES_MAP, &piece.id, &piece);
            }
        });
        tracing::debug!("chess board set up");
    }

    pub fn clear(&self) {
        self.doc.transact(|txn| {
            txn.map_clear(PIECES_MAP);
            txn.array_clear(MOVES_ARRAY);
        });
    }

    pub fn pieces(&self) -> Vec<Piece> {
        self.doc.read(pieces_in)
    }

    pub fn piece_at(&self, pos: Position) -> Option<Piece> {
        self.pieces().into_iter().find(|p| p.position == pos)
    }

    pub fn moves(&self) -> Vec<MoveRecord> {
        self.doc.read(|doc| doc.get_array(MOVES_ARRAY).to_vec())
    }

    pub fn state(&self) -> ChessGameState {
        self.doc.read(state_in)
    }

    /// Destinations for whatever piece stands on `pos`.
    pub fn legal_moves(&self, pos: Position) -> Vec<Position> {
        let pieces = self.pieces();
        match pieces.iter().find(|p| p.position == pos) {
            Some(piece) => legal_destinations(piece, &pieces),
            None => Vec::new(),
        }
    }

    pub fn move_piece(&self, side: Side, from: Position, to: Position) -> Result<MoveRecord, ChessMoveError> {
        let (pieces, state) = self.doc.read(|doc| (pieces_in(doc), state_in(doc)));
        if state.status != ChessStatus::Playing {
            return Err(ChessMoveError::GameFinished);
        }
        let piece = pieces
            .iter()
            .find(|p| p.position == from)
            .ok_or(ChessMoveError::NoPieceAt(from))?;
        if piece.side != side {
            return Err(ChessMoveError::NotYourPiece(piece.side));
        }
        if side != state.current_player {
            return Err(ChessMoveError::NotYourTurn(state.current_player));
        }
        if !legal_destinations(piece, &pieces).contains(&to) {
            return Err(ChessMoveError::IllegalMove { from, to });
        }

        let captured = pieces.iter().find(|p| p.position == to).map(|p| p.id.clone());
        let record = MoveRecord {
            piece_id: piece.id.clone(),
            kind: piece.kind,
            side,
            from,
            to,
            captured,
        };
        let moved = Piece {
            position: to,
            ..piece.clone()
        };
        self.doc.transact(|txn| {
            if let Some(id) = &record.captured {
                txn.map_delete(PIECES_MAP, id);
            }
            txn.map_set(PIECES_MAP, &moved.id, &moved);
            txn.array_push(MOVES_ARRAY, [&record]);
        });
        tracing::debug!(%side, %from, %to, captured = ?record.captured, "chess move");
        Ok(record)
    }

    pub fn observe(
        &self,
        mut listener: impl FnMut(&[Piece], ChessGameState) + 'static,
    ) -> SubscriptionId {
        self.doc.observe(move |event, doc| {
            if event.touches_any(&[PIECES_MAP, MOVES_ARRAY]) {
                listener(&pieces_in(doc), state_in(doc));
            }
        })
    }
}

fn pieces_in(doc: &Doc) -> Vec<Piece> {
    let mut pieces: Vec<Piece> = doc.get_map(PIECES_MAP).values();
    pieces.sort_by(|a, b| a.id.cmp(&b.id));
    pieces
}

fn state_in(doc: &Doc) -> ChessGameState {
    let pieces = pieces_in(doc);
    let last_mover = doc
        .get_array(MOVES_ARRAY)
        .to_vec::<MoveRecord>()
        .last()
        .map(|m| m.side);
    let current_player = last_mover.map_or(Side::Red, Side::opponent);

    let has_general = |side: Side| {
        pieces
            .iter()
            .any(|p| p.kind == PieceKind::General && p.side == side)
    };
    let status = if pieces.is_empty() {
        ChessStatus::Playing
    } else if !has_general(Side::Red) {
        ChessStatus::BlackWin
    } else if !has_general(Side::Black) {
        ChessStatus::RedWin
    } else {
        ChessStatus::Playing
    };

    ChessGameState {
        current_player,
        status,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn game() -> ChessGame {
        ChessGame::new(DocHandle::new(Doc::new(1)))
    }

    fn at(x: i32, y: i32) -> Position {
        Position::new(x, y)
    }

    #[test]
    fn test_opening_layout() {
        let pieces = opening_layout();
        assert_eq!(pieces.len(), 32);
        for side in [Side::Red, Side::Black] {
            let count = |kind| {
                pieces
                    .iter()
                    .filter(|p| p.side == side && p.kind == kind)
                    .count()
            };
            assert_eq!(count(PieceKind::General), 1);
            assert_eq!(count(PieceKind::Soldier), 5);
            assert_eq!(count(PieceKind::Cannon), 2);
        }
        let mut ids: Vec<&str> = pieces.iter().map(|p| p.id.as_str()).collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), 32);
        let mut squares: Vec<Position> = pieces.iter().map(|p| p.position).collect();
        squares.sort();
        squares.dedup();
        assert_eq!(squares.len(), 32);
    }

    #[test]
    fn test_start_sets_red_to_move() {
        let game = game();
        game.start();
        assert_eq!(game.pieces().len(), 32);
        assert_eq!(
            game.state(),
            ChessGameState {
                current_player: Side::Red,
                status: ChessStatus::Playing
            }
        );
    }

    #[test]
    fn test_move_alternates_turns() {
        let game = game();
        game.start();
        // red cannon to the centre file
        let record = game.move_piece(Side::Red, at(1, 2), at(4, 2)).unwrap();
        assert_eq!(record.kind, PieceKind::Cannon);
        assert_eq!(game.state().current_player, Side::Black);
        assert!(game.piece_at(at(1, 2)).is_none());
        assert_eq!(game.piece_at(at(4, 2)).unwrap().id, record.piece_id);

        assert_eq!(
            game.move_piece(Side::Red, at(7, 2), at(7, 6)),
            Err(ChessMoveError::NotYourTurn(Side::Black))
        );
        game.move_piece(Side::Black, at(1, 9), at(2, 7)).unwrap();
        assert_eq!(game.state().current_player, Side::Red);
        assert_eq!(game.moves().len(), 2);
    }

    #[test]
    fn test_rejected_moves_write_nothing() {
        let game = game();
        game.start();
        let before = game.pieces();

        assert_eq!(
            game.move_piece(Side::Red, at(4, 4), at(4, 5)),
            Err(ChessMoveError::NoPieceAt(at(4, 4)))
        );
        assert_eq!(
            game.move_piece(Side::Red, at(0, 9), at(0, 8)),
            Err(ChessMoveError::NotYourPiece(Side::Black))
        );
        assert_eq!(
            game.move_piece(Side::Red, at(0, 0), at(1, 0)),
            Err(ChessMoveError::IllegalMove {
                from: at(0, 0),
                to: at(1, 0)
            })
        );
        assert_eq!(game.pieces(), before);
        assert!(game.moves().is_empty());
    }

    #[test]
    fn test_capture_removes_piece() {
        let game = game();
        game.start();
        // red cannon takes the black horse, screened by the black cannon
        let record = game.move_piece(Side::Red, at(1, 2), at(1, 9)).unwrap();
        assert_eq!(record.captured.as_deref(), Some("b-马-9-1"));
        assert_eq!(game.pieces().len(), 31);
        assert_eq!(game.piece_at(at(1, 9)).unwrap().side, Side::Red);
        assert_eq!(game.state().current_player, Side::Black);
    }

    #[test]
    fn test_capturing_general_ends_game() {
        let game = game();
        let red_general = Piece::new(PieceKind::General, Side::Red, at(4, 0));
        let red_chariot = Piece::new(PieceKind::Chariot, Side::Red, at(4, 5));
        let black_general = Piece::new(PieceKind::General, Side::Black, at(4, 8));
        game.doc.transact(|txn| {
            for p in [&red_general, &red_chariot, &black_general] {
                txn.map_set(PIECES_MAP, &p.id, p);
            }
        });

        let record = game.move_piece(Side::Red, at(4, 5), at(4, 8)).unwrap();
        assert_eq!(record.captured.as_deref(), Some(black_general.id.as_str()));
        assert_eq!(game.pieces().len(), 2);
        assert_eq!(game.state().status, ChessStatus::RedWin);
        assert_eq!(
            game.move_piece(Side::Black, at(4, 0), at(4, 1)),
            Err(ChessMoveError::GameFinished)
        );
    }

    #[test]
    fn test_clear_empties_board() {
        let game = game();
        game.start();
        game.move_piece(Side::Red, at(0, 3), at(0, 4)).unwrap();
        game.clear();
        assert!(game.pieces().is_empty());
        assert!(game.moves().is_empty());
        assert_eq!(game.state().current_player, Side::Red);
    }

    #[test]
    fn test_legal_moves_for_square() {
        let game = game();
        game.start();
        let mut moves = game.legal_moves(at(1, 0));
        moves.sort();
        assert_eq!(moves, vec![at(0, 2), at(2, 2)]);
        assert!(game.legal_moves(at(4, 4)).is_empty());
    }

    #[test]
    fn test_state_json_names() {
        let state = ChessGameState {
            current_player: Side::Black,
            status: ChessStatus::RedWin,
        };
        let json = serde_json::to_value(state).unwrap();
        assert_eq!(json["currentPlayer"], "b");
        assert_eq!(json["gameStatus"], "red-win");
    }
}
