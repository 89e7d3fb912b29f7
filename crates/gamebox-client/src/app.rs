use std::cell::{Ref, RefCell};
use std::io;
use std::path::PathBuf;
use std::rc::Rc;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::SeedableRng;
use ratatui::backend::CrosstermBackend;
use ratatui::{Frame, Terminal};
use tokio::sync::mpsc;

use gamebox_common::chat::ChatLog;
use gamebox_common::chess::Side;
use gamebox_common::chess_game::{ChessGame, ChessStatus};
use gamebox_common::minesweeper::{BoardConfig, GameStatus, Minesweeper};
use gamebox_common::player::{self, Player};
use gamebox_common::presence::{Cursor, PresenceRecord};
use gamebox_common::protocol::ServerMessage;
use gamebox_common::rooms::{room_doc_id, GameType, NewRoom, Room, RoomDirectory, LOBBY_DOC};

use crate::event::{self, AppEvent};
use crate::input::{self, Action, Command, HELP};
use crate::provider::{DocProvider, ProviderEvent};
use crate::ui::{self, screen};

const PING_INTERVAL: Duration = Duration::from_secs(20);
const LOG_LIMIT: usize = 200;

/// Lines shown in the log panel. Shared with document observers.
#[derive(Clone, Default)]
struct Log(Rc<RefCell<Vec<String>>>);

impl Log {
    fn push(&self, line: impl Into<String>) {
        let mut lines = self.0.borrow_mut();
        lines.push(line.into());
        let excess = lines.len().saturating_sub(LOG_LIMIT);
        lines.drain(..excess);
    }

    fn lines(&self) -> Ref<'_, Vec<String>> {
        self.0.borrow()
    }
}

enum RoomGame {
    Minesweeper(Minesweeper),
    Chess(ChessGame),
}

struct RoomSession {
    room: Room,
    provider: DocProvider,
    chat: ChatLog,
    game: RoomGame,
}

struct App {
    server: String,
    player: Player,
    identity: PathBuf,
    lobby: DocProvider,
    directory: RoomDirectory,
    room: Option<RoomSession>,
    rng: StdRng,
    log: Log,
    input: String,
    running: bool,
}

pub async fn run(
    terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    server: String,
    player: Player,
    identity: PathBuf,
) -> anyhow::Result<()> {
    let mut lobby = DocProvider::connect(&server, LOBBY_DOC).await?;
    lobby
        .presence_mut()
        .set_local_state(PresenceRecord::new(player.clone()));
    let directory = RoomDirectory::new(lobby.doc().clone());

    let log = Log::default();
    log.push(format!("connected as {}, type 'help'", player.username));
    let mut app = App {
        server,
        player,
        identity,
        lobby,
        directory,
        room: None,
        rng: StdRng::from_entropy(),
        log,
        input: String::new(),
        running: true,
    };

    let (event_tx, mut event_rx) = mpsc::channel::<AppEvent>(64);
    tokio::spawn(event::event_loop(event_tx));
    let mut ping = tokio::time::interval(PING_INTERVAL);

    while app.running {
        terminal.draw(|frame| app.draw(frame))?;

        tokio::select! {
            event = event_rx.recv() => match event {
                Some(AppEvent::Key(key)) => {
                    if let Some(action) = input::map_key(key) {
                        app.on_action(action).await;
                    }
                }
                Some(AppEvent::Tick) => {}
                None => break,
            },
            msg = app.lobby.recv() => match msg {
                Some(msg) => app.on_lobby_message(msg).await?,
                None => anyhow::bail!("lost connection to the relay"),
            },
            msg = recv_room(&mut app.room) => match msg {
                Some(msg) => app.on_room_message(msg).await?,
                None => {
                    app.log.push("lost connection to the room");
                    app.room = None;
                }
            },
            _ = ping.tick() => app.ping().await?,
        }

        app.flush().await?;
    }

    app.shutdown().await
}

async fn recv_room(room: &mut Option<RoomSession>) -> Option<ServerMessage> {
    match room {
        Some(session) => session.provider.recv().await,
        None => std::future::pending().await,
    }
}

impl App {
    fn draw(&self, frame: &mut Frame) {
        let log = self.log.lines();
        let room = self.room.as_ref().map(|session| screen::RoomView {
            name: &session.room.name,
            game: match &session.game {
                RoomGame::Minesweeper(game) => screen::GameView::Minesweeper(game.snapshot()),
                RoomGame::Chess(game) => screen::GameView::Chess {
                    pieces: game.pieces(),
                    state: game.state(),
                },
            },
            seats: self.directory.members_of(&session.room.id),
            chat: session.chat.messages(),
        });
        let present = match &self.room {
            Some(session) => session.provider.presence().states(),
            None => self.lobby.presence().states(),
        };
        let view = screen::Screen {
            me: &self.player,
            server: &self.server,
            room,
            rooms: self.directory.room_infos(),
            present,
            log: &log,
            input: &self.input,
        };
        view.draw(frame);
    }

    async fn on_action(&mut self, action: Action) {
        match action {
            Action::Quit => self.running = false,
            Action::TypeChar(c) => self.input.push(c),
            Action::Backspace => {
                self.input.pop();
            }
            Action::ClearLine => self.input.clear(),
            Action::Submit => {
                let line = std::mem::take(&mut self.input);
                if line.trim().is_empty() {
                    return;
                }
                match input::parse_line(&line) {
                    Ok(Command::Quit) => self.running = false,
                    Ok(command) => {
                        if let Err(e) = self.execute(command).await {
                            self.log.push(format!("error: {}", e));
                        }
                    }
                    Err(msg) => self.log.push(msg),
                }
            }
        }
    }

    async fn on_lobby_message(&mut self, msg: ServerMessage) -> anyhow::Result<()> {
        if let Some(ProviderEvent::Synced) = self.lobby.handle(msg).await? {
            self.log
                .push(format!("{} room(s) open", self.directory.rooms().len()));
        }
        Ok(())
    }

    async fn on_room_message(&mut self, msg: ServerMessage) -> anyhow::Result<()> {
        let Some(session) = self.room.as_mut() else {
            return Ok(());
        };
        match session.provider.handle(msg).await? {
            Some(ProviderEvent::Synced) => {
                // whoever arrives first sets the table
                match &session.game {
                    RoomGame::Minesweeper(game) => {
                        if game.status() == GameStatus::Uninitialized {
                            game.initialize(&mut self.rng);
                        }
                    }
                    RoomGame::Chess(game) => {
                        if game.pieces().is_empty() {
                            game.start();
                        }
                    }
                }
            }
            Some(ProviderEvent::PresenceChanged) => {
                tracing::debug!(present = session.provider.presence().states().len(), "presence changed");
            }
            Some(ProviderEvent::Changed) | None => {}
        }
        Ok(())
    }

    async fn execute(&mut self, command: Command) -> anyhow::Result<()> {
        match command {
            Command::Quit => {}
            Command::Help => HELP.lines().for_each(|line| self.log.push(line)),
            Command::Rename(name) => {
                self.player.username = name;
                player::save(&self.identity, &self.player)?;
                let record = PresenceRecord::new(self.player.clone());
                self.lobby.presence_mut().set_local_state(record.clone());
                if let Some(session) = self.room.as_mut() {
                    session.provider.presence_mut().set_local_state(record);
                }
                self.log.push(format!("you are now {}", self.player.username));
            }

            Command::Rooms => {
                let rooms = self.directory.room_infos();
                if rooms.is_empty() {
                    self.log.push("no rooms yet");
                }
                for room in rooms {
                    self.log.push(format!(
                        "{}  {} ({}, {} player(s))",
                        room.room_id,
                        room.room_name,
                        room.game_type.label(),
                        room.member_count
                    ));
                }
            }
            Command::Create {
                game,
                name,
                password,
            } => {
                let room_id = self.directory.create_room(
                    NewRoom {
                        name,
                        game_type: game,
                        password: password.clone().unwrap_or_default(),
                    },
                    &self.player,
                );
                self.log.push(format!("created room {}", room_id));
                self.join(&room_id, password.as_deref()).await?;
            }
            Command::Join { room_id, password } => self.join(&room_id, password.as_deref()).await?,
            Command::Leave => {
                if !self.leave().await? {
                    self.log.push("you are not in a room");
                }
            }

            Command::Seat(index) => {
                let session = self.session()?;
                if self.directory.seat(&session.room.id, index, &self.player) {
                    self.log.push(format!("you took seat {}", index));
                } else {
                    self.log.push(format!("seat {} is taken", index));
                }
            }
            Command::Say(text) => {
                self.session()?.chat.send(&self.player, &text);
            }
            Command::Cursor(x, y) => {
                let session = self.session_mut()?;
                session
                    .provider
                    .presence_mut()
                    .set_cursor(Some(Cursor { vector: [x, y] }));
            }

            Command::Open(cell) => {
                let changed = self.minesweeper()?.open_cell(cell);
                self.report(changed);
            }
            Command::Flag(cell) => {
                let changed = self.minesweeper()?.flag_cell(cell);
                self.report(changed);
            }
            Command::Chord(cell) => {
                let changed = self.minesweeper()?.open_around(cell);
                self.report(changed);
            }
            Command::Restart => {
                let game = self.minesweeper()?.clone();
                let changed = game.restart(&mut self.rng);
                self.report(changed);
            }

            Command::Start => self.chess()?.start(),
            Command::Clear => self.chess()?.clear(),
            Command::Moves(from) => {
                let moves = self.chess()?.legal_moves(from);
                self.log.push(ui::render_destinations(from, &moves));
            }
            Command::Move { from, to } => {
                let side = self.my_side()?;
                if let Err(e) = self.chess()?.move_piece(side, from, to) {
                    self.log.push(e.to_string());
                }
            }
        }
        Ok(())
    }

    async fn join(&mut self, room_id: &str, password: Option<&str>) -> anyhow::Result<()> {
        let Some(room) = self.directory.room(room_id) else {
            anyhow::bail!("no room '{}'", room_id);
        };
        if !room.check_password(password) {
            anyhow::bail!("wrong password for '{}'", room.name);
        }
        self.leave().await?;
        // false when we are already on the roster, e.g. after a restart
        self.directory
            .join_room_with_password(room_id, password, &self.player);

        let mut provider = DocProvider::connect(&self.server, &room_doc_id(room_id)).await?;
        provider
            .presence_mut()
            .set_local_state(PresenceRecord::new(self.player.clone()));
        let doc = provider.doc().clone();

        let log = self.log.clone();
        let game = match room.game_type {
            GameType::Minesweeper => {
                let game = Minesweeper::new(doc.clone(), BoardConfig::default());
                let mut last = game.status();
                game.observe(move |board| {
                    let status = board.status();
                    if status != last {
                        match status {
                            GameStatus::GameOver => log.push("BOOM, a mine went off"),
                            GameStatus::Victory => log.push("board cleared!"),
                            GameStatus::Playing if last != GameStatus::Uninitialized => {
                                log.push("new board")
                            }
                            _ => {}
                        }
                        last = status;
                    }
                });
                RoomGame::Minesweeper(game)
            }
            GameType::ChineseChess => {
                let game = ChessGame::new(doc.clone());
                let mut last = game.state().status;
                game.observe(move |_, state| {
                    if state.status != last && state.status != ChessStatus::Playing {
                        log.push(ui::chess_status(&state));
                    }
                    last = state.status;
                });
                RoomGame::Chess(game)
            }
        };

        self.log
            .push(format!("joined {} ({})", room.name, room.game_type.label()));
        self.room = Some(RoomSession {
            room,
            provider,
            chat: ChatLog::new(doc),
            game,
        });
        Ok(())
    }

    /// Returns false if we were not in a room.
    async fn leave(&mut self) -> anyhow::Result<bool> {
        let Some(mut session) = self.room.take() else {
            return Ok(false);
        };
        self.directory.leave_room(&session.room.id, &self.player);
        session.provider.presence_mut().clear_local_state();
        session.provider.flush().await?;
        self.log.push(format!("left {}", session.room.name));
        Ok(true)
    }

    async fn flush(&mut self) -> anyhow::Result<()> {
        self.lobby.flush().await?;
        if let Some(session) = self.room.as_mut() {
            session.provider.flush().await?;
        }
        Ok(())
    }

    async fn ping(&self) -> anyhow::Result<()> {
        self.lobby.ping().await?;
        if let Some(session) = &self.room {
            session.provider.ping().await?;
        }
        Ok(())
    }

    async fn shutdown(mut self) -> anyhow::Result<()> {
        self.leave().await?;
        self.lobby.presence_mut().clear_local_state();
        self.lobby.flush().await?;
        // let the writer tasks drain before the runtime goes away
        tokio::time::sleep(Duration::from_millis(100)).await;
        Ok(())
    }

    fn report(&self, changed: bool) {
        if !changed {
            self.log.push("nothing to do there");
        }
    }

    fn session(&self) -> anyhow::Result<&RoomSession> {
        self.room
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("join a room first"))
    }

    fn session_mut(&mut self) -> anyhow::Result<&mut RoomSession> {
        self.room
            .as_mut()
            .ok_or_else(|| anyhow::anyhow!("join a room first"))
    }

    fn minesweeper(&self) -> anyhow::Result<&Minesweeper> {
        match &self.session()?.game {
            RoomGame::Minesweeper(game) => Ok(game),
            RoomGame::Chess(_) => anyhow::bail!("this is a chess room"),
        }
    }

    fn chess(&self) -> anyhow::Result<&ChessGame> {
        match &self.session()?.game {
            RoomGame::Chess(game) => Ok(game),
            RoomGame::Minesweeper(_) => anyhow::bail!("this is a minesweeper room"),
        }
    }

    /// Seat 0 plays red, seat 1 plays black.
    fn my_side(&self) -> anyhow::Result<Side> {
        let session = self.session()?;
        let seats = self.directory.members_of(&session.room.id);
        let mine = seats
            .iter()
            .position(|seat| seat.as_ref().is_some_and(|p| p.id == self.player.id));
        match mine {
            Some(0) => Ok(Side::Red),
            Some(1) => Ok(Side::Black),
            _ => anyhow::bail!("take seat 0 (red) or 1 (black) to play"),
        }
    }
}
