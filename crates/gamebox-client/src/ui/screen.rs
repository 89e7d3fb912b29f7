use ratatui::{
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Paragraph},
    Frame,
};

use gamebox_common::chat::MessageData;
use gamebox_common::chess::Piece;
use gamebox_common::chess_game::ChessGameState;
use gamebox_common::minesweeper::BoardSnapshot;
use gamebox_common::player::Player;
use gamebox_common::presence::PresenceEntry;
use gamebox_common::rooms::{Membership, RoomInfo};

use super::{board_widget, chess_status, clock_time, minesweeper_status, player_color};

const BORDER: Color = Color::Rgb(80, 80, 100);
const TITLE: Color = Color::Rgb(180, 180, 200);
const DIM: Color = Color::Rgb(100, 100, 120);
const TEXT: Color = Color::Rgb(200, 200, 220);

pub enum GameView {
    Minesweeper(BoardSnapshot),
    Chess {
        pieces: Vec<Piece>,
        state: ChessGameState,
    },
}

pub struct RoomView<'a> {
    pub name: &'a str,
    pub game: GameView,
    pub seats: Membership,
    pub chat: Vec<MessageData>,
}

/// Everything one frame shows, gathered by the app before drawing.
pub struct Screen<'a> {
    pub me: &'a Player,
    pub server: &'a str,
    pub room: Option<RoomView<'a>>,
    pub rooms: Vec<RoomInfo>,
    pub present: Vec<PresenceEntry>,
    pub log: &'a [String],
    pub input: &'a str,
}

fn panel(title: &str) -> Block<'static> {
    Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(BORDER))
        .title(format!(" {} ", title))
        .title_style(Style::default().fg(TITLE).add_modifier(Modifier::BOLD))
}

/// The last lines that fit in a bordered panel of `area`.
fn tail<T>(items: &[T], area: Rect) -> &[T] {
    let fit = area.height.saturating_sub(2) as usize;
    &items[items.len().saturating_sub(fit)..]
}

impl Screen<'_> {
    pub fn draw(&self, frame: &mut Frame) {
        let rows = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Length(1), // Title
                Constraint::Min(8),    // Body
                Constraint::Length(3), // Command line
            ])
            .split(frame.area());

        let columns = Layout::default()
            .direction(Direction::Horizontal)
            .constraints([Constraint::Percentage(60), Constraint::Percentage(40)])
            .split(rows[1]);

        let side = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Percentage(30), // People
                Constraint::Percentage(40), // Chat
                Constraint::Percentage(30), // Log
            ])
            .split(columns[1]);

        self.draw_title_bar(frame, rows[0]);
        match &self.room {
            Some(room) => self.draw_board(frame, columns[0], room),
            None => self.draw_rooms(frame, columns[0]),
        }
        self.draw_people(frame, side[0]);
        self.draw_chat(frame, side[1]);
        self.draw_log(frame, side[2]);
        self.draw_command_line(frame, rows[2]);
    }

    fn draw_title_bar(&self, frame: &mut Frame, area: Rect) {
        let place = match &self.room {
            Some(room) => format!("room {}", room.name),
            None => "lobby".to_string(),
        };
        let title = Line::from(vec![
            Span::styled(
                " GAMEBOX ",
                Style::default()
                    .fg(Color::Rgb(255, 220, 50))
                    .add_modifier(Modifier::BOLD),
            ),
            Span::styled(
                self.me.username.clone(),
                Style::default()
                    .fg(player_color(&self.me.color))
                    .add_modifier(Modifier::BOLD),
            ),
            Span::styled(format!(" @ {}", self.server), Style::default().fg(DIM)),
            Span::styled("  |  ", Style::default().fg(BORDER)),
            Span::styled(place, Style::default().fg(TITLE)),
        ]);
        frame.render_widget(Paragraph::new(title), area);
    }

    fn draw_board(&self, frame: &mut Frame, area: Rect, room: &RoomView) {
        let (status, lines) = match &room.game {
            GameView::Minesweeper(board) => (
                minesweeper_status(board),
                board_widget::minesweeper_lines(board),
            ),
            GameView::Chess { pieces, state } => {
                (chess_status(state), board_widget::chess_lines(pieces))
            }
        };
        frame.render_widget(Paragraph::new(lines).block(panel(&status)), area);
    }

    fn draw_rooms(&self, frame: &mut Frame, area: Rect) {
        let lines: Vec<Line> = if self.rooms.is_empty() {
            vec![Line::from(Span::styled(
                "  No rooms yet; create one with: create <mines|chess> <name>",
                Style::default().fg(DIM),
            ))]
        } else {
            self.rooms
                .iter()
                .map(|room| {
                    Line::from(vec![
                        Span::styled(
                            format!(" {:<12} ", room.room_id),
                            Style::default().fg(Color::Rgb(100, 200, 255)),
                        ),
                        Span::styled(
                            format!("{:<20} ", room.room_name),
                            Style::default().fg(TEXT).add_modifier(Modifier::BOLD),
                        ),
                        Span::styled(
                            format!("{:<6} {} player(s) by {}", room.game_type.label(), room.member_count, room.creator),
                            Style::default().fg(TITLE),
                        ),
                        Span::styled(
                            if room.has_password { "  [locked]" } else { "" },
                            Style::default().fg(Color::Rgb(255, 180, 50)),
                        ),
                    ])
                })
                .collect()
        };
        frame.render_widget(Paragraph::new(lines).block(panel("Rooms")), area);
    }

    fn draw_people(&self, frame: &mut Frame, area: Rect) {
        let mut lines: Vec<Line> = self
            .present
            .iter()
            .map(|entry| {
                let player = &entry.record.player;
                let cursor = entry
                    .record
                    .cursor
                    .map(|c| format!(" @ ({:.0}, {:.0})", c.vector[0], c.vector[1]))
                    .unwrap_or_default();
                Line::from(vec![
                    Span::styled(
                        format!("  {}", player.username),
                        Style::default().fg(player_color(&player.color)),
                    ),
                    Span::styled(cursor, Style::default().fg(DIM)),
                ])
            })
            .collect();

        if let Some(room) = &self.room {
            for (i, seat) in room.seats.iter().enumerate() {
                let (name, style) = match seat {
                    Some(p) => (p.username.as_str(), Style::default().fg(player_color(&p.color))),
                    None => ("(empty)", Style::default().fg(DIM)),
                };
                lines.push(Line::from(vec![
                    Span::styled(format!("  seat {}: ", i), Style::default().fg(TITLE)),
                    Span::styled(name.to_string(), style),
                ]));
            }
        }
        frame.render_widget(Paragraph::new(lines).block(panel("People")), area);
    }

    fn draw_chat(&self, frame: &mut Frame, area: Rect) {
        let messages = self.room.as_ref().map(|r| r.chat.as_slice()).unwrap_or(&[]);
        let lines: Vec<Line> = tail(messages, area)
            .iter()
            .map(|m| {
                Line::from(vec![
                    Span::styled(format!("  {} ", clock_time(m.timestamp)), Style::default().fg(DIM)),
                    Span::styled(
                        m.sender.username.clone(),
                        Style::default()
                            .fg(player_color(&m.sender.color))
                            .add_modifier(Modifier::BOLD),
                    ),
                    Span::styled(format!(": {}", m.content), Style::default().fg(TEXT)),
                ])
            })
            .collect();
        frame.render_widget(Paragraph::new(lines).block(panel("Chat")), area);
    }

    fn draw_log(&self, frame: &mut Frame, area: Rect) {
        let lines: Vec<Line> = tail(self.log, area)
            .iter()
            .map(|l| Line::from(Span::styled(format!("  {}", l), Style::default().fg(TITLE))))
            .collect();
        frame.render_widget(Paragraph::new(lines).block(panel("Log")), area);
    }

    fn draw_command_line(&self, frame: &mut Frame, area: Rect) {
        let line = Line::from(vec![
            Span::styled(" > ", Style::default().fg(Color::Rgb(100, 255, 150))),
            Span::styled(self.input.to_string(), Style::default().fg(Color::White)),
        ]);
        let block = Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::Rgb(100, 180, 255)))
            .title(" Command ('help' lists them) ")
            .title_style(Style::default().fg(Color::Rgb(100, 180, 255)));
        frame.render_widget(Paragraph::new(line).block(block), area);

        let cursor_x = area.x + 4 + self.input.chars().count() as u16;
        frame.set_cursor_position((cursor_x, area.y + 1));
    }
}
