use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};

use gamebox_common::chess::Position;
use gamebox_common::minesweeper::Cell;
use gamebox_common::rooms::GameType;

/// What a key press does to the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Quit,
    TypeChar(char),
    Backspace,
    ClearLine,
    Submit,
}

pub fn map_key(key: KeyEvent) -> Option<Action> {
    // Ctrl+C always quits
    if key.modifiers.contains(KeyModifiers::CONTROL) && key.code == KeyCode::Char('c') {
        return Some(Action::Quit);
    }
    match key.code {
        KeyCode::Enter => Some(Action::Submit),
        KeyCode::Backspace => Some(Action::Backspace),
        KeyCode::Esc => Some(Action::ClearLine),
        KeyCode::Char(c) => Some(Action::TypeChar(c)),
        _ => None,
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    // Global
    Quit,
    Help,
    Rename(String),

    // Lobby
    Rooms,
    Create {
        game: GameType,
        name: String,
        password: Option<String>,
    },
    Join {
        room_id: String,
        password: Option<String>,
    },
    Leave,

    // Room
    Seat(usize),
    Say(String),
    Cursor(f64, f64),

    // Minesweeper
    Open(Cell),
    Flag(Cell),
    Chord(Cell),
    Restart,

    // Chess
    Start,
    Clear,
    Moves(Position),
    Move { from: Position, to: Position },
}

pub const HELP: &str = "\
lobby:  rooms | create <mines|chess> <name> [password] | join <id> [password] | name <new name>
room:   leave | seat <n> | say <text> | cursor <x> <y>
mines:  open <x> <y> | flag <x> <y> | chord <x> <y> | restart
chess:  start | clear | moves <x> <y> | move <x> <y> <x> <y>
        help | quit";

pub fn parse_line(line: &str) -> Result<Command, String> {
    let line = line.trim();
    let (word, rest) = match line.split_once(char::is_whitespace) {
        Some((word, rest)) => (word, rest.trim()),
        None => (line, ""),
    };
    let args: Vec<&str> = rest.split_whitespace().collect();

    match word.to_ascii_lowercase().as_str() {
        "q" | "quit" | "exit" => Ok(Command::Quit),
        "?" | "help" => Ok(Command::Help),
        "name" => non_empty(rest, "name").map(Command::Rename),

        "rooms" | "ls" => Ok(Command::Rooms),
        "create" => match args.as_slice() {
            [game, name, password @ ..] if password.len() <= 1 => Ok(Command::Create {
                game: game.parse()?,
                name: name.to_string(),
                password: password.first().map(|p| p.to_string()),
            }),
            _ => Err("usage: create <mines|chess> <name> [password]".into()),
        },
        "join" => match args.as_slice() {
            [room_id] => Ok(Command::Join {
                room_id: room_id.to_string(),
                password: None,
            }),
            [room_id, password] => Ok(Command::Join {
                room_id: room_id.to_string(),
                password: Some(password.to_string()),
            }),
            _ => Err("usage: join <id> [password]".into()),
        },
        "leave" => Ok(Command::Leave),

        "seat" => match args.as_slice() {
            [n] => n
                .parse()
                .map(Command::Seat)
                .map_err(|_| format!("bad seat '{}'", n)),
            _ => Err("usage: seat <n>".into()),
        },
        "say" => non_empty(rest, "say").map(Command::Say),
        "cursor" => match args.as_slice() {
            [x, y] => {
                let x = x.parse().map_err(|_| format!("bad number '{}'", x))?;
                let y = y.parse().map_err(|_| format!("bad number '{}'", y))?;
                Ok(Command::Cursor(x, y))
            }
            _ => Err("usage: cursor <x> <y>".into()),
        },

        "open" | "o" => coords(&args).map(|(x, y)| Command::Open(Cell::new(x, y))),
        "flag" | "f" => coords(&args).map(|(x, y)| Command::Flag(Cell::new(x, y))),
        "chord" | "c" => coords(&args).map(|(x, y)| Command::Chord(Cell::new(x, y))),
        "restart" => Ok(Command::Restart),

        "start" => Ok(Command::Start),
        "clear" => Ok(Command::Clear),
        "moves" => coords(&args).map(|(x, y)| Command::Moves(Position::new(x, y))),
        "move" | "mv" => match args.as_slice() {
            [a, b, c, d] => {
                let (fx, fy) = coords(&[*a, *b])?;
                let (tx, ty) = coords(&[*c, *d])?;
                Ok(Command::Move {
                    from: Position::new(fx, fy),
                    to: Position::new(tx, ty),
                })
            }
            _ => Err("usage: move <x> <y> <x> <y>".into()),
        },

        "" => Err("empty command".into()),
        other => Err(format!("unknown command '{}', try 'help'", other)),
    }
}

fn coords(args: &[&str]) -> Result<(i32, i32), String> {
    match args {
        [x, y] => {
            let x = x.parse().map_err(|_| format!("bad coordinate '{}'", x))?;
            let y = y.parse().map_err(|_| format!("bad coordinate '{}'", y))?;
            Ok((x, y))
        }
        _ => Err("expected two coordinates: <x> <y>".into()),
    }
}

fn non_empty(rest: &str, command: &str) -> Result<String, String> {
    if rest.is_empty() {
        Err(format!("usage: {} <text>", command))
    } else {
        Ok(rest.to_string())
    }
}
