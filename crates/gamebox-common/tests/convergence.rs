//! Several replicas of the same document exchanging updates in different
//! orders must end up showing the same thing.

use rand::seq::SliceRandom;
use rand::SeedableRng;
use uuid::Uuid;

use gamebox_common::chess::{Position, Side};
use gamebox_common::chess_game::{ChessGame, ChessMoveError, ChessStatus};
use gamebox_common::doc::{Doc, DocHandle};
use gamebox_common::minesweeper::{BoardConfig, Cell, GameStatus, Minesweeper};
use gamebox_common::update::{StateVector, Update};
use gamebox_common::player::Player;
use gamebox_common::rooms::{GameType, NewRoom, RoomDirectory};

fn replicas(n: u64) -> Vec<DocHandle> {
    (1..=n).map(|id| DocHandle::new(Doc::new(id))).collect()
}

/// Deliver every pending update of every replica to every other replica,
/// shuffling delivery order.
fn sync_all(docs: &[DocHandle], rng: &mut rand::rngs::StdRng) {
    let outgoing: Vec<(usize, Update)> = docs
        .iter()
        .enumerate()
        .flat_map(|(i, d)| d.take_updates().into_iter().map(move |u| (i, u)))
        .collect();
    for (to, doc) in docs.iter().enumerate() {
        let mut inbox: Vec<&Update> = outgoing
            .iter()
            .filter(|(from, _)| *from != to)
            .map(|(_, u)| u)
            .collect();
        inbox.shuffle(rng);
        for update in inbox {
            doc.apply_update(update.clone());
        }
    }
}

fn player(name: &str) -> Player {
    Player::new(Uuid::new_v4(), name.into(), "#ee6352".into())
}

#[test]
fn concurrent_opens_and_flags_converge() {
    let mut rng = rand::rngs::StdRng::seed_from_u64(5);
    let docs = replicas(3);
    let config = BoardConfig::new(9, 9, 10);
    let games: Vec<Minesweeper> = docs
        .iter()
        .map(|d| Minesweeper::new(d.clone(), config))
        .collect();

    games[0].initialize(&mut rng);
    sync_all(&docs, &mut rng);
    assert_eq!(games[1].snapshot(), games[0].snapshot());

    // everyone acts on safe cells at once, two of them on the same cell
    let board = games[0].snapshot();
    let safe: Vec<Cell> = (0..9)
        .flat_map(|y| (0..9).map(move |x| Cell::new(x, y)))
        .filter(|&c| !board.is_mine(c) && !board.is_open(c))
        .collect();
    let mine = (0..9)
        .flat_map(|y| (0..9).map(move |x| Cell::new(x, y)))
        .find(|&c| board.is_mine(c))
        .unwrap();

    games[0].open_cell(safe[0]);
    games[1].open_cell(safe[0]);
    games[2].flag_cell(mine);
    if let Some(&other) = safe.get(1) {
        games[1].open_cell(other);
    }
    sync_all(&docs, &mut rng);

    let first = games[0].snapshot();
    for game in &games[1..] {
        assert_eq!(game.snapshot(), first);
    }
    assert!(first.is_open(safe[0]));
    assert!(first.is_flag(mine));
    assert_eq!(first.status(), GameStatus::Playing);
}

#[test]
fn concurrent_initialize_settles_on_one_playable_board() {
    for seed in 0..20 {
        let mut rng = rand::rngs::StdRng::seed_from_u64(seed);
        let docs = replicas(2);
        let config = BoardConfig::new(18, 14, 30);
        let a = Minesweeper::new(docs[0].clone(), config);
        let b = Minesweeper::new(docs[1].clone(), config);

        assert!(a.initialize(&mut rng));
        assert!(b.initialize(&mut rng));
        sync_all(&docs, &mut rng);

        let (sa, sb) = (a.snapshot(), b.snapshot());
        assert_eq!(sa, sb, "seed {}", seed);
        assert_eq!(sa.status(), GameStatus::Playing, "seed {}", seed);
        assert_eq!(sa.mine_count(), 30);
        assert!(sa.opened_count() > 0, "seed {}", seed);
        assert!(!a.initialize(&mut rng));
    }
}

#[test]
fn concurrent_restart_keeps_the_game_alive() {
    for seed in 0..20 {
        let mut rng = rand::rngs::StdRng::seed_from_u64(100 + seed);
        let docs = replicas(2);
        let config = BoardConfig::new(16, 16, 40);
        let a = Minesweeper::new(docs[0].clone(), config);
        let b = Minesweeper::new(docs[1].clone(), config);
        a.initialize(&mut rng);
        sync_all(&docs, &mut rng);
        let old_board = a.snapshot().board_id();

        assert!(a.restart(&mut rng));
        assert!(b.restart(&mut rng));
        sync_all(&docs, &mut rng);

        let (sa, sb) = (a.snapshot(), b.snapshot());
        assert_eq!(sa, sb, "seed {}", seed);
        assert_eq!(sa.status(), GameStatus::Playing, "seed {}", seed);
        assert_ne!(sa.board_id(), old_board);
        assert_eq!(sa.mine_count(), 40);
    }
}

#[test]
fn restart_racing_a_fatal_open_ends_on_a_fresh_board() {
    let mut rng = rand::rngs::StdRng::seed_from_u64(44);
    let docs = replicas(2);
    let config = BoardConfig::new(8, 8, 10);
    let a = Minesweeper::new(docs[0].clone(), config);
    let b = Minesweeper::new(docs[1].clone(), config);
    a.initialize(&mut rng);
    sync_all(&docs, &mut rng);

    let board = b.snapshot();
    let mine = (0..8)
        .flat_map(|y| (0..8).map(move |x| Cell::new(x, y)))
        .find(|&c| board.is_mine(c))
        .unwrap();
    // b blows up the old board while a has already moved on
    assert!(a.restart(&mut rng));
    assert!(b.open_cell(mine));
    sync_all(&docs, &mut rng);

    assert_eq!(a.snapshot(), b.snapshot());
    assert_eq!(a.status(), GameStatus::Playing);
}

#[test]
fn game_over_reaches_every_replica() {
    let mut rng = rand::rngs::StdRng::seed_from_u64(8);
    let docs = replicas(2);
    let config = BoardConfig::new(6, 6, 6);
    let a = Minesweeper::new(docs[0].clone(), config);
    let b = Minesweeper::new(docs[1].clone(), config);
    a.initialize(&mut rng);
    sync_all(&docs, &mut rng);

    let board = b.snapshot();
    let mine = (0..6)
        .flat_map(|y| (0..6).map(move |x| Cell::new(x, y)))
        .find(|&c| board.is_mine(c))
        .unwrap();
    assert!(b.open_cell(mine));
    sync_all(&docs, &mut rng);

    assert!(a.is_game_over());
    assert!(!a.open_cell(Cell::new(0, 0)));

    a.restart(&mut rng);
    sync_all(&docs, &mut rng);
    assert!(!b.is_game_over());
    assert_eq!(a.snapshot(), b.snapshot());
}

#[test]
fn late_joiner_catches_up_from_state_vector() {
    let mut rng = rand::rngs::StdRng::seed_from_u64(13);
    let early = DocHandle::new(Doc::new(1));
    let game = Minesweeper::new(early.clone(), BoardConfig::new(5, 5, 3));
    game.initialize(&mut rng);
    early.take_updates();

    let late = DocHandle::new(Doc::new(2));
    let late_game = Minesweeper::new(late.clone(), BoardConfig::new(5, 5, 3));
    let missing = early.read(|doc| doc.diff(&StateVector::default()));
    assert!(late.apply_update(missing));
    assert_eq!(late_game.snapshot(), game.snapshot());
    assert_eq!(late_game.status(), GameStatus::Playing);
}

#[test]
fn directory_membership_converges() {
    let mut rng = rand::rngs::StdRng::seed_from_u64(2);
    let docs = replicas(2);
    let alice = player("alice");
    let bob = player("bob");
    let dir_a = RoomDirectory::new(docs[0].clone());
    let dir_b = RoomDirectory::new(docs[1].clone());

    let room_id = dir_a.create_room(
        NewRoom {
            name: "friday".into(),
            game_type: GameType::Minesweeper,
            password: "pw".into(),
        },
        &alice,
    );
    dir_a.join_room(&room_id, &alice);
    sync_all(&docs, &mut rng);

    assert!(!dir_b.join_room_with_password(&room_id, Some("nope"), &bob));
    assert!(dir_b.join_room_with_password(&room_id, Some("pw"), &bob));
    sync_all(&docs, &mut rng);

    assert_eq!(dir_a.members_of(&room_id), dir_b.members_of(&room_id));
    assert_eq!(dir_a.members_of(&room_id).len(), 2);
    assert_eq!(dir_a.room_infos(), dir_b.room_infos());
    assert!(dir_b.room_infos()[0].has_password);
}

#[test]
fn chess_moves_replicate_and_turns_follow() {
    let mut rng = rand::rngs::StdRng::seed_from_u64(3);
    let docs = replicas(2);
    let red = ChessGame::new(docs[0].clone());
    let black = ChessGame::new(docs[1].clone());

    red.start();
    sync_all(&docs, &mut rng);
    assert_eq!(black.pieces().len(), 32);

    red.move_piece(Side::Red, Position::new(7, 2), Position::new(4, 2))
        .unwrap();
    // black has not seen the move yet, so it still looks like red's turn there
    assert_eq!(
        black.move_piece(Side::Black, Position::new(7, 9), Position::new(6, 7)),
        Err(ChessMoveError::NotYourTurn(Side::Red))
    );
    sync_all(&docs, &mut rng);

    black
        .move_piece(Side::Black, Position::new(7, 9), Position::new(6, 7))
        .unwrap();
    sync_all(&docs, &mut rng);

    assert_eq!(red.pieces(), black.pieces());
    assert_eq!(red.state(), black.state());
    assert_eq!(red.state().current_player, Side::Red);
    assert_eq!(red.state().status, ChessStatus::Playing);
    assert_eq!(red.moves().len(), 2);
}
