pub mod chat;
pub mod chess;
pub mod chess_game;
pub mod doc;
pub mod minesweeper;
pub mod player;
pub mod presence;
pub mod protocol;
pub mod rooms;
pub mod update;
