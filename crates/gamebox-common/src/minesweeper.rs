//! Cooperative Minesweeper on a room document.
//!
//! The board lives in five parallel arrays indexed by `y * width + x`
//! (`cells`, `mines`, `aroundMines`, `opens`, `flags`) plus a `global`
//! map holding the game-over flag. `opens` and `flags` may contain
//! duplicates when peers race; every read deduplicates them. Everything a
//! player sees (opened set, victory, game over) is recomputed from those
//! containers by [`BoardSnapshot::from_doc`].
//!
//! Peers that generate a board at the same time leave two layouts back to
//! back in the arrays and every replica keeps the first. Opens, flags and
//! the game-over flag are stamped with the [`board_id`] of the layout they
//! were made on, so marks left by the discarded layout never leak onto the
//! one that won.

use std::collections::VecDeque;

use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::doc::{Doc, DocHandle, SubscriptionId};

pub const CELLS: &str = "cells";
pub const MINES: &str = "mines";
pub const AROUND_MINES: &str = "aroundMines";
pub const OPENS: &str = "opens";
pub const FLAGS: &str = "flags";
pub const GLOBAL: &str = "global";
pub const STATUS_KEY: &str = "status";

const BOARD_CONTAINERS: [&str; 6] = [CELLS, MINES, AROUND_MINES, OPENS, FLAGS, GLOBAL];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Cell {
    pub x: i32,
    pub y: i32,
}

impl Cell {
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomStatus {
    pub game_over: bool,
    /// Layout the flag was raised on.
    pub board: u64,
}

/// One entry of `opens` or `flags`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mark {
    pub board: u64,
    pub idx: usize,
}

impl Mark {
    pub fn new(board: u64, idx: usize) -> Self {
        Self { board, idx }
    }
}

/// FNV-1a over the board size and mine positions. Stable across builds, so
/// every peer derives the same id for the same layout.
pub fn board_id(width: usize, height: usize, mines: &[bool]) -> u64 {
    const OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01b3;

    let mines_at = mines.iter().enumerate().filter(|(_, &m)| m).map(|(i, _)| i);
    [width, height]
        .into_iter()
        .chain(mines_at)
        .flat_map(|word| (word as u64).to_le_bytes())
        .fold(OFFSET, |hash, byte| (hash ^ u64::from(byte)).wrapping_mul(PRIME))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoardConfig {
    pub width: usize,
    pub height: usize,
    pub mine_count: usize,
}

impl BoardConfig {
    pub fn new(width: usize, height: usize, mine_count: usize) -> Self {
        Self {
            width,
            height,
            mine_count,
        }
    }

    pub fn cell_count(&self) -> usize {
        self.width * self.height
    }

    pub fn is_valid(&self) -> bool {
        self.width > 0 && self.height > 0
    }
}

impl Default for BoardConfig {
    fn default() -> Self {
        Difficulty::Classic.config()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Difficulty {
    Beginner,
    Intermediate,
    Expert,
    /// The 18x14 board rooms use unless told otherwise.
    Classic,
    Custom {
        width: usize,
        height: usize,
        mines: usize,
    },
}

impl Difficulty {
    pub fn config(self) -> BoardConfig {
        match self {
            Difficulty::Beginner => BoardConfig::new(9, 9, 10),
            Difficulty::Intermediate => BoardConfig::new(16, 16, 40),
            Difficulty::Expert => BoardConfig::new(30, 16, 99),
            Difficulty::Classic => BoardConfig::new(18, 14, 30),
            Difficulty::Custom {
                width,
                height,
                mines,
            } => BoardConfig::new(width, height, mines),
        }
    }
}

impl std::str::FromStr for Difficulty {
    type Err = String;

    /// Accepts `1`-`3`, a preset name, or `WIDTHxHEIGHTxMINES`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "1" | "beginner" | "easy" => Ok(Difficulty::Beginner),
            "2" | "intermediate" | "medium" => Ok(Difficulty::Intermediate),
            "3" | "expert" | "hard" => Ok(Difficulty::Expert),
            "classic" => Ok(Difficulty::Classic),
            custom => {
                let parts: Vec<usize> = custom
                    .split('x')
                    .map(|p| p.trim().parse::<usize>())
                    .collect::<Result<_, _>>()
                    .map_err(|_| format!("invalid difficulty '{}'", s))?;
                match parts.as_slice() {
                    [width, height, mines] if *width > 0 && *height > 0 && *mines < width * height => {
                        Ok(Difficulty::Custom {
                            width: *width,
                            height: *height,
                            mines: *mines,
                        })
                    }
                    _ => Err(format!("invalid difficulty '{}'", s)),
                }
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GameStatus {
    Uninitialized,
    Playing,
    GameOver,
    Victory,
}

/// Board state derived from a room document at one point in time.
#[derive(Debug, Clone, PartialEq)]
pub struct BoardSnapshot {
    config: BoardConfig,
    board: u64,
    mines: Vec<bool>,
    around_mines: Vec<u8>,
    opened: Vec<bool>,
    flagged: Vec<bool>,
    game_over: bool,
}

impl BoardSnapshot {
    pub fn from_doc(doc: &Doc, config: BoardConfig) -> Self {
        let n = config.cell_count();
        let mut mines: Vec<bool> = doc.get_array(MINES).to_vec();
        let mut around_mines: Vec<u8> = doc.get_array(AROUND_MINES).to_vec();
        let complete = n > 0
            && doc.get_array(CELLS).len() >= n
            && mines.len() >= n
            && around_mines.len() >= n;
        if !complete {
            return Self {
                config,
                board: 0,
                mines: Vec::new(),
                around_mines: Vec::new(),
                opened: Vec::new(),
                flagged: Vec::new(),
                game_over: false,
            };
        }
        // Two peers initialising at once leave two boards back to back;
        // every replica orders them the same way, so the first one wins.
        mines.truncate(n);
        around_mines.truncate(n);

        let board = board_id(config.width, config.height, &mines);
        let opened = mark_set(doc.get_array(OPENS).to_vec(), board, n);
        let flagged = mark_set(doc.get_array(FLAGS).to_vec(), board, n);
        let status_over = doc
            .get_map(GLOBAL)
            .get::<RoomStatus>(STATUS_KEY)
            .is_some_and(|s| s.game_over && s.board == board);
        let mine_opened = opened.iter().zip(&mines).any(|(&o, &m)| o && m);

        Self {
            config,
            board,
            mines,
            around_mines,
            opened,
            flagged,
            game_over: status_over || mine_opened,
        }
    }

    pub fn config(&self) -> BoardConfig {
        self.config
    }

    pub fn width(&self) -> usize {
        self.config.width
    }

    pub fn height(&self) -> usize {
        self.config.height
    }

    /// Id of the layout this snapshot shows; 0 before one exists.
    pub fn board_id(&self) -> u64 {
        self.board
    }

    pub fn is_initialized(&self) -> bool {
        !self.mines.is_empty()
    }

    pub fn status(&self) -> GameStatus {
        if !self.is_initialized() {
            GameStatus::Uninitialized
        } else if self.game_over {
            GameStatus::GameOver
        } else if self.is_victory() {
            GameStatus::Victory
        } else {
            GameStatus::Playing
        }
    }

    pub fn is_game_over(&self) -> bool {
        self.is_initialized() && self.game_over
    }

    /// Every safe cell is open. Mines never need to be flagged.
    pub fn is_victory(&self) -> bool {
        self.is_initialized()
            && !self.game_over
            && self
                .mines
                .iter()
                .zip(&self.opened)
                .all(|(&mine, &open)| mine || open)
    }

    pub fn index_of(&self, cell: Cell) -> Option<usize> {
        if !self.is_initialized() || cell.x < 0 || cell.y < 0 {
            return None;
        }
        let (x, y) = (cell.x as usize, cell.y as usize);
        if x >= self.width() || y >= self.height() {
            return None;
        }
        Some(y * self.width() + x)
    }

    pub fn cell_at(&self, idx: usize) -> Cell {
        Cell::new((idx % self.width()) as i32, (idx / self.width()) as i32)
    }

    pub fn is_open(&self, cell: Cell) -> bool {
        self.index_of(cell).is_some_and(|i| self.opened[i])
    }

    pub fn is_flag(&self, cell: Cell) -> bool {
        self.index_of(cell).is_some_and(|i| self.flagged[i])
    }

    pub fn is_mine(&self, cell: Cell) -> bool {
        self.index_of(cell).is_some_and(|i| self.mines[i])
    }

    pub fn around_mines(&self, cell: Cell) -> Option<u8> {
        self.index_of(cell).map(|i| self.around_mines[i])
    }

    pub fn mine_count(&self) -> usize {
        self.mines.iter().filter(|&&m| m).count()
    }

    pub fn flag_count(&self) -> usize {
        self.flagged.iter().filter(|&&f| f).count()
    }

    pub fn opened_count(&self) -> usize {
        self.opened.iter().filter(|&&o| o).count()
    }

    /// Mines left according to the flags placed so far (may go negative).
    pub fn remaining_mines(&self) -> i64 {
        self.mine_count() as i64 - self.flag_count() as i64
    }

    /// Cells revealed by opening the zero-count cell `start`: the connected
    /// zero region plus its numbered border. Flags, mines and open cells are
    /// never entered.
    pub fn flood_fill(&self, start: usize) -> Vec<usize> {
        let (w, h) = (self.width(), self.height());
        let mut visited = vec![false; self.mines.len()];
        let mut queue = VecDeque::from([start]);
        let mut region = vec![start];
        visited[start] = true;

        while let Some(idx) = queue.pop_front() {
            if self.around_mines[idx] != 0 {
                continue;
            }
            for next in neighbours(w, h, idx) {
                if visited[next] || self.opened[next] || self.flagged[next] || self.mines[next] {
                    continue;
                }
                visited[next] = true;
                region.push(next);
                queue.push_back(next);
            }
        }
        region
    }
}

/// Cells marked on `board`; marks for any other layout are ignored.
fn mark_set(marks: Vec<Mark>, board: u64, n: usize) -> Vec<bool> {
    let mut set = vec![false; n];
    for mark in marks.into_iter().filter(|m| m.board == board && m.idx < n) {
        set[mark.idx] = true;
    }
    set
}

/// Up to 8 grid neighbours of `idx`, clamped at the edges.
fn neighbours(width: usize, height: usize, idx: usize) -> impl Iterator<Item = usize> {
    let (x, y) = ((idx % width) as i64, (idx / width) as i64);
    let (w, h) = (width as i64, height as i64);
    (-1i64..=1)
        .flat_map(move |dy| (-1i64..=1).map(move |dx| (x + dx, y + dy)))
        .filter(move |&(nx, ny)| (nx, ny) != (x, y) && nx >= 0 && ny >= 0 && nx < w && ny < h)
        .map(move |(nx, ny)| (ny * w + nx) as usize)
}

fn count_around(mines: &[bool], width: usize, height: usize) -> Vec<u8> {
    (0..mines.len())
        .map(|idx| neighbours(width, height, idx).filter(|&n| mines[n]).count() as u8)
        .collect()
}

/// Minesweeper engine bound to one room document.
#[derive(Debug, Clone)]
pub struct Minesweeper {
    doc: DocHandle,
    config: BoardConfig,
}

impl Minesweeper {
    pub fn new(doc: DocHandle, config: BoardConfig) -> Self {
        doc.with_mut(|d| {
            for name in [CELLS, MINES, AROUND_MINES, OPENS, FLAGS] {
                d.ensure_array(name);
            }
            d.ensure_map(GLOBAL);
        });
        Self { doc, config }
    }

    pub fn config(&self) -> BoardConfig {
        self.config
    }

    pub fn snapshot(&self) -> BoardSnapshot {
        self.doc.read(|doc| BoardSnapshot::from_doc(doc, self.config))
    }

    pub fn status(&self) -> GameStatus {
        self.snapshot().status()
    }

    pub fn is_open(&self, cell: Cell) -> bool {
        self.snapshot().is_open(cell)
    }

    pub fn is_flag(&self, cell: Cell) -> bool {
        self.snapshot().is_flag(cell)
    }

    pub fn is_game_over(&self) -> bool {
        self.snapshot().is_game_over()
    }

    pub fn is_victory(&self) -> bool {
        self.snapshot().is_victory()
    }

    /// Call `listener` with a fresh snapshot whenever any board container
    /// changes, locally or remotely.
    pub fn observe(&self, mut listener: impl FnMut(&BoardSnapshot) + 'static) -> SubscriptionId {
        let config = self.config;
        self.doc.observe(move |event, doc| {
            if event.touches_any(&BOARD_CONTAINERS) {
                listener(&BoardSnapshot::from_doc(doc, config));
            }
        })
    }

    /// Generate a board and reveal its first blank area. No-op when the
    /// room already has a board.
    pub fn initialize(&self, rng: &mut impl Rng) -> bool {
        if !self.config.is_valid() {
            tracing::warn!(config = ?self.config, "refusing to generate an empty board");
            return false;
        }
        let n = self.config.cell_count();
        let mine_count = self.config.mine_count.min(n);
        let mut mines = vec![false; n];
        mines[..mine_count].fill(true);
        mines.shuffle(rng);

        if !self.write_layout(mines) {
            return false;
        }
        self.open_first_blank();
        true
    }

    /// Wipe the board and generate a new one.
    pub fn restart(&self, rng: &mut impl Rng) -> bool {
        if !self.config.is_valid() {
            return false;
        }
        self.doc.transact(|txn| {
            for name in [CELLS, MINES, AROUND_MINES, OPENS, FLAGS] {
                txn.array_clear(name);
            }
            txn.map_delete(GLOBAL, STATUS_KEY);
        });
        tracing::debug!("board cleared for restart");
        self.initialize(rng)
    }

    /// Reveal one cell. Opening a mine ends the game for everyone; opening a
    /// zero-count cell reveals its whole blank region in one batch.
    pub fn open_cell(&self, cell: Cell) -> bool {
        let board = self.snapshot();
        if board.status() != GameStatus::Playing {
            return false;
        }
        let Some(idx) = board.index_of(cell) else {
            return false;
        };
        if board.opened[idx] || board.flagged[idx] {
            return false;
        }

        if board.mines[idx] {
            tracing::debug!(x = cell.x, y = cell.y, "mine opened");
            let status = RoomStatus {
                game_over: true,
                board: board.board,
            };
            self.doc.transact(|txn| {
                txn.map_set(GLOBAL, STATUS_KEY, &status);
                txn.array_push(OPENS, [Mark::new(board.board, idx)]);
            });
            return true;
        }

        let revealed = if board.around_mines[idx] == 0 {
            board.flood_fill(idx)
        } else {
            vec![idx]
        };
        tracing::debug!(x = cell.x, y = cell.y, revealed = revealed.len(), "cell opened");
        let marks = revealed.into_iter().map(|i| Mark::new(board.board, i));
        self.doc.transact(|txn| txn.array_push(OPENS, marks));
        true
    }

    /// Toggle a flag on a closed cell.
    pub fn flag_cell(&self, cell: Cell) -> bool {
        let board = self.snapshot();
        if board.status() != GameStatus::Playing {
            return false;
        }
        let Some(idx) = board.index_of(cell) else {
            return false;
        };
        if board.opened[idx] {
            return false;
        }

        let mark = Mark::new(board.board, idx);
        if board.flagged[idx] {
            self.doc.transact(|txn| {
                let positions: Vec<usize> = txn
                    .array(FLAGS)
                    .entries::<Mark>()
                    .enumerate()
                    .filter(|(_, m)| *m == Some(mark))
                    .map(|(pos, _)| pos)
                    .collect();
                for pos in positions.into_iter().rev() {
                    txn.array_delete(FLAGS, pos, 1);
                }
            });
        } else {
            self.doc.transact(|txn| txn.array_push(FLAGS, [mark]));
        }
        true
    }

    /// Chord: once as many neighbours are flagged as the cell's mine count,
    /// open every other closed neighbour.
    pub fn open_around(&self, cell: Cell) -> bool {
        let board = self.snapshot();
        if board.status() != GameStatus::Playing {
            return false;
        }
        let Some(idx) = board.index_of(cell) else {
            return false;
        };
        if board.flagged[idx] {
            return false;
        }

        let (w, h) = (board.width(), board.height());
        let flags = neighbours(w, h, idx).filter(|&n| board.flagged[n]).count();
        if flags != board.around_mines[idx] as usize {
            return false;
        }

        let mut opened = false;
        for next in neighbours(w, h, idx) {
            if !board.opened[next] && !board.flagged[next] {
                opened |= self.open_cell(board.cell_at(next));
            }
        }
        opened
    }

    /// Store a fixed mine layout. No-op if the room already has cells or the
    /// layout does not fit the configured size.
    fn write_layout(&self, mines: Vec<bool>) -> bool {
        let BoardConfig { width, height, .. } = self.config;
        if mines.len() != width * height {
            return false;
        }
        if self.doc.read(|doc| !doc.get_array(CELLS).is_empty()) {
            return false;
        }

        let around = count_around(&mines, width, height);
        let cells: Vec<Cell> = (0..height)
            .flat_map(|y| (0..width).map(move |x| Cell::new(x as i32, y as i32)))
            .collect();
        self.doc.transact(|txn| {
            txn.array_push(CELLS, cells);
            txn.array_push(MINES, mines);
            txn.array_push(AROUND_MINES, around);
        });
        tracing::debug!(width, height, "board generated");
        true
    }

    /// Open the first blank safe cell in row-major order, so the game never
    /// starts fully hidden.
    fn open_first_blank(&self) -> bool {
        let board = self.snapshot();
        let first = (0..board.mines.len()).find(|&i| !board.mines[i] && board.around_mines[i] == 0);
        match first {
            Some(idx) => self.open_cell(board.cell_at(idx)),
            None => false,
        }
    }
}
