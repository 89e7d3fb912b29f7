use ratatui::{
    style::{Color, Modifier, Style},
    text::{Line, Span},
};

use gamebox_common::chess::{Piece, Position, Side, BOARD_HEIGHT, BOARD_WIDTH};
use gamebox_common::minesweeper::{BoardSnapshot, Cell};

const LABEL: Color = Color::Rgb(120, 120, 140);
const CLOSED: Color = Color::Rgb(90, 90, 110);

fn count_color(n: u8) -> Color {
    match n {
        1 => Color::Rgb(100, 160, 255),
        2 => Color::Rgb(100, 220, 120),
        3 => Color::Rgb(255, 110, 110),
        4 => Color::Rgb(200, 130, 255),
        _ => Color::Rgb(255, 200, 60),
    }
}

fn cell_span(board: &BoardSnapshot, cell: Cell, reveal_mines: bool) -> Span<'static> {
    if board.is_open(cell) || (reveal_mines && board.is_mine(cell)) {
        if board.is_mine(cell) {
            return Span::styled(
                "* ",
                Style::default()
                    .fg(Color::Rgb(255, 80, 80))
                    .add_modifier(Modifier::BOLD),
            );
        }
        return match board.around_mines(cell) {
            Some(0) | None => Span::styled(". ", Style::default().fg(Color::Rgb(60, 60, 80))),
            Some(n) => Span::styled(
                format!("{} ", n),
                Style::default().fg(count_color(n)).add_modifier(Modifier::BOLD),
            ),
        };
    }
    if board.is_flag(cell) {
        Span::styled(
            "F ",
            Style::default()
                .fg(Color::Rgb(255, 180, 50))
                .add_modifier(Modifier::BOLD),
        )
    } else {
        Span::styled("# ", Style::default().fg(CLOSED))
    }
}

fn column_labels(width: usize) -> Line<'static> {
    let labels: String = (0..width).map(|x| format!("{} ", x % 10)).collect();
    Line::from(Span::styled(format!("   {}", labels), Style::default().fg(LABEL)))
}

/// The minefield with row and column labels. Mines show once the game is
/// lost.
pub fn minesweeper_lines(board: &BoardSnapshot) -> Vec<Line<'static>> {
    if !board.is_initialized() {
        return vec![Line::from(Span::styled(
            "  Waiting for the board...",
            Style::default().fg(Color::Rgb(100, 100, 120)),
        ))];
    }
    let reveal_mines = board.is_game_over();

    let mut lines = vec![column_labels(board.width())];
    for y in 0..board.height() as i32 {
        let mut spans = vec![Span::styled(format!("{:>2} ", y), Style::default().fg(LABEL))];
        for x in 0..board.width() as i32 {
            spans.push(cell_span(board, Cell::new(x, y), reveal_mines));
        }
        lines.push(Line::from(spans));
    }
    lines
}

/// Red pieces in upper case, black in lower case; `~` marks the river.
pub fn chess_lines(pieces: &[Piece]) -> Vec<Line<'static>> {
    let mut lines = vec![column_labels(BOARD_WIDTH as usize)];
    for y in 0..BOARD_HEIGHT {
        let mut spans = vec![Span::styled(format!("{:>2} ", y), Style::default().fg(LABEL))];
        for x in 0..BOARD_WIDTH {
            let span = match pieces.iter().find(|p| p.position == Position::new(x, y)) {
                Some(piece) => piece_span(piece),
                None if y == 4 || y == 5 => {
                    Span::styled("~ ", Style::default().fg(Color::Rgb(80, 140, 200)))
                }
                None => Span::styled(". ", Style::default().fg(CLOSED)),
            };
            spans.push(span);
        }
        lines.push(Line::from(spans));
    }
    lines
}

fn piece_span(piece: &Piece) -> Span<'static> {
    let (glyph, color) = match piece.side {
        Side::Red => (piece.kind.letter(), Color::Rgb(255, 100, 100)),
        Side::Black => (
            piece.kind.letter().to_ascii_lowercase(),
            Color::Rgb(200, 200, 220),
        ),
    };
    Span::styled(
        format!("{} ", glyph),
        Style::default().fg(color).add_modifier(Modifier::BOLD),
    )
}
