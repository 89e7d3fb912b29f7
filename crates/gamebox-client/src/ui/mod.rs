pub mod board_widget;
pub mod screen;

use chrono::{Local, TimeZone};
use ratatui::style::Color;

use gamebox_common::chess::Position;
use gamebox_common::chess_game::{ChessGameState, ChessStatus};
use gamebox_common::minesweeper::{BoardSnapshot, GameStatus};

/// `#rrggbb` player colours; anything else falls back to white.
pub fn player_color(hex: &str) -> Color {
    let rgb = hex
        .strip_prefix('#')
        .filter(|h| h.len() == 6)
        .and_then(|h| u32::from_str_radix(h, 16).ok());
    match rgb {
        Some(rgb) => Color::Rgb((rgb >> 16) as u8, (rgb >> 8) as u8, rgb as u8),
        None => Color::White,
    }
}

pub fn clock_time(timestamp_millis: i64) -> String {
    Local
        .timestamp_millis_opt(timestamp_millis)
        .single()
        .map(|t| t.format("%H:%M").to_string())
        .unwrap_or_else(|| "--:--".into())
}

pub fn minesweeper_status(board: &BoardSnapshot) -> String {
    match board.status() {
        GameStatus::Uninitialized => "waiting for the board".to_string(),
        GameStatus::GameOver => "BOOM - game over, 'restart' for a new board".to_string(),
        GameStatus::Victory => "cleared! 'restart' for a new board".to_string(),
        GameStatus::Playing => format!("mines left: {}", board.remaining_mines()),
    }
}

pub fn chess_status(state: &ChessGameState) -> String {
    match state.status {
        ChessStatus::Playing => format!("{} to move", state.current_player),
        ChessStatus::RedWin => "red wins".to_string(),
        ChessStatus::BlackWin => "black wins".to_string(),
        ChessStatus::Draw => "draw".to_string(),
    }
}

pub fn render_destinations(from: Position, destinations: &[Position]) -> String {
    if destinations.is_empty() {
        return format!("nothing can move from {}", from);
    }
    let list: Vec<String> = destinations.iter().map(|p| p.to_string()).collect();
    format!("{} -> {}", from, list.join(" "))
}

#[cfg(test)]
mod tests {
    use super::*;
    use gamebox_common::chess::Side;

    #[test]
    fn test_player_color_parsing() {
        assert_eq!(player_color("#30bced"), Color::Rgb(0x30, 0xbc, 0xed));
        assert_eq!(player_color("30bced"), Color::White);
        assert_eq!(player_color("#zzzzzz"), Color::White);
    }

    #[test]
    fn test_chess_status_text() {
        let state = ChessGameState {
            current_player: Side::Red,
            status: ChessStatus::Playing,
        };
        assert_eq!(chess_status(&state), "red to move");
    }

    #[test]
    fn test_destinations_text() {
        let from = Position::new(1, 2);
        assert_eq!(
            render_destinations(from, &[]),
            format!("nothing can move from {}", from)
        );
    }
}
