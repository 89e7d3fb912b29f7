use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::doc::{Doc, DocHandle, SubscriptionId};
use crate::player::Player;

/// Document id of the lobby shared by every client.
pub const LOBBY_DOC: &str = "rooms";
pub const ROOMS_MAP: &str = "rooms";
pub const MEMBERS_MAP: &str = "roomMembers";

/// Document id carrying the board and chat of one room.
pub fn room_doc_id(room_id: &str) -> String {
    format!("room/{}", room_id)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GameType {
    #[serde(rename = "扫雷")]
    Minesweeper,
    #[serde(rename = "象棋")]
    ChineseChess,
}

impl GameType {
    pub fn label(self) -> &'static str {
        match self {
            GameType::Minesweeper => "minesweeper",
            GameType::ChineseChess => "chinese-chess",
        }
    }
}

impl std::str::FromStr for GameType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "mine" | "mines" | "minesweeper" | "扫雷" => Ok(GameType::Minesweeper),
            "chess" | "xiangqi" | "chinese-chess" | "象棋" => Ok(GameType::ChineseChess),
            other => Err(format!("unknown game type '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Room {
    pub id: String,
    pub name: String,
    /// Empty means anyone may join.
    pub password: String,
    /// Username of whoever created the room.
    pub creator: String,
    /// Milliseconds since the unix epoch.
    pub created_at: i64,
    pub game_type: GameType,
}

impl Room {
    pub fn has_password(&self) -> bool {
        !self.password.is_empty()
    }

    pub fn check_password(&self, provided: Option<&str>) -> bool {
        if !self.has_password() {
            return true;
        }
        provided.is_some_and(|p| p == self.password)
    }
}

#[derive(Debug, Clone)]
pub struct NewRoom {
    pub name: String,
    pub game_type: GameType,
    pub password: String,
}

/// Ordered seats of one room. `None` is an empty seat.
pub type Membership = Vec<Option<Player>>;

/// Listing row for the lobby.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomInfo {
    pub room_id: String,
    pub room_name: String,
    pub game_type: GameType,
    pub creator: String,
    pub member_count: usize,
    pub has_password: bool,
}

/// Time-ordered unique id, trimmed to its random tail.
pub fn generate_room_id() -> String {
    Uuid::now_v7()
        .simple()
        .to_string()
        .split_off(20)
}

/// Room metadata and membership rosters on the lobby document.
#[derive(Debug, Clone)]
pub struct RoomDirectory {
    doc: DocHandle,
}

impl RoomDirectory {
    pub fn new(doc: DocHandle) -> Self {
        doc.with_mut(|d| {
            d.ensure_map(ROOMS_MAP);
            d.ensure_map(MEMBERS_MAP);
        });
        Self { doc }
    }

    pub fn doc(&self) -> &DocHandle {
        &self.doc
    }

    /// Write a new room and its empty roster. Returns the room id.
    pub fn create_room(&self, new_room: NewRoom, creator: &Player) -> String {
        let room = Room {
            id: generate_room_id(),
            name: new_room.name,
            password: new_room.password,
            creator: creator.username.clone(),
            created_at: chrono::Utc::now().timestamp_millis(),
            game_type: new_room.game_type,
        };
        tracing::debug!(room = %room.id, name = %room.name, "creating room");
        self.doc.transact(|txn| {
            txn.map_set(ROOMS_MAP, &room.id, &room);
            txn.map_set(MEMBERS_MAP, &room.id, &Membership::new());
        });
        room.id
    }

    /// Append `player` to the roster. No-op if already present or if the
    /// room has no roster.
    pub fn join_room(&self, room_id: &str, player: &Player) -> bool {
        let Some(mut members) = self.roster(room_id) else {
            tracing::debug!(room = %room_id, "join ignored: no such room");
            return false;
        };
        if position_of(&members, player).is_some() {
            return false;
        }
        members.push(Some(player.clone()));
        self.write_roster(room_id, &members);
        true
    }

    /// Like [`join_room`](Self::join_room), but only when the password matches.
    pub fn join_room_with_password(
        &self,
        room_id: &str,
        password: Option<&str>,
        player: &Player,
    ) -> bool {
        match self.room(room_id) {
            Some(room) if room.check_password(password) => self.join_room(room_id, player),
            _ => false,
        }
    }

    /// Remove `player` from the roster. No-op if absent.
    pub fn leave_room(&self, room_id: &str, player: &Player) -> bool {
        let Some(members) = self.roster(room_id) else {
            return false;
        };
        let remaining: Membership = members
            .iter()
            .filter(|m| m.as_ref().map(|p| p.id) != Some(player.id))
            .cloned()
            .collect();
        if remaining.len() == members.len() {
            return false;
        }
        self.write_roster(room_id, &remaining);
        true
    }

    /// Move `player` into seat `index`, growing the roster with empty seats if
    /// needed. The player's previous seat is emptied. No-op if another player
    /// holds the seat.
    pub fn seat(&self, room_id: &str, index: usize, player: &Player) -> bool {
        let Some(mut members) = self.roster(room_id) else {
            return false;
        };
        if let Some(Some(_)) = members.get(index) {
            return false;
        }
        if let Some(previous) = position_of(&members, player) {
            members[previous] = None;
        }
        if members.len() <= index {
            members.resize(index + 1, None);
        }
        members[index] = Some(player.clone());
        self.write_roster(room_id, &members);
        true
    }

    pub fn room(&self, room_id: &str) -> Option<Room> {
        self.doc.read(|doc| doc.get_map(ROOMS_MAP).get(room_id))
    }

    /// Every room, oldest first.
    pub fn rooms(&self) -> Vec<Room> {
        self.doc.read(rooms_in)
    }

    pub fn members_of(&self, room_id: &str) -> Membership {
        self.roster(room_id).unwrap_or_default()
    }

    pub fn room_infos(&self) -> Vec<RoomInfo> {
        self.doc.read(|doc| {
            let rosters = doc.get_map(MEMBERS_MAP);
            rooms_in(doc)
                .into_iter()
                .map(|room| {
                    let member_count = rosters
                        .get::<Membership>(&room.id)
                        .map(|m| m.iter().flatten().count())
                        .unwrap_or(0);
                    RoomInfo {
                        room_id: room.id.clone(),
                        room_name: room.name.clone(),
                        game_type: room.game_type,
                        creator: room.creator.clone(),
                        member_count,
                        has_password: room.has_password(),
                    }
                })
                .collect()
        })
    }

    /// Call `listener` with the fresh room list after every directory change.
    pub fn observe(&self, mut listener: impl FnMut(&[Room]) + 'static) -> SubscriptionId {
        self.doc.observe(move |event, doc| {
            if event.touches_any(&[ROOMS_MAP, MEMBERS_MAP]) {
                listener(&rooms_in(doc));
            }
        })
    }

    fn roster(&self, room_id: &str) -> Option<Membership> {
        self.doc
            .read(|doc| doc.get_map(MEMBERS_MAP).get::<Membership>(room_id))
    }

    fn write_roster(&self, room_id: &str, members: &Membership) {
        self.doc
            .transact(|txn| txn.map_set(MEMBERS_MAP, room_id, members));
    }
}

fn rooms_in(doc: &Doc) -> Vec<Room> {
    let mut rooms: Vec<Room> = doc.get_map(ROOMS_MAP).values();
    rooms.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
    rooms
}

fn position_of(members: &Membership, player: &Player) -> Option<usize> {
    members
        .iter()
        .position(|m| m.as_ref().is_some_and(|p| p.id == player.id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::doc::Doc;
    use std::cell::Cell;
    use std::rc::Rc;

    fn player(name: &str) -> Player {
        Player::new(Uuid::new_v4(), name.into(), "#ffbc42".into())
    }

    fn directory() -> RoomDirectory {
        RoomDirectory::new(DocHandle::new(Doc::new(1)))
    }

    fn new_room(name: &str, password: &str) -> NewRoom {
        NewRoom {
            name: name.into(),
            game_type: GameType::Minesweeper,
            password: password.into(),
        }
    }

    #[test]
    fn test_room_id_is_twelve_hex_chars() {
        let id = generate_room_id();
        assert_eq!(id.len(), 12);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(id, generate_room_id());
    }

    #[test]
    fn test_create_room_writes_record_and_empty_roster() {
        let dir = directory();
        let alice = player("alice");
        let id = dir.create_room(new_room("fun", ""), &alice);

        let room = dir.room(&id).unwrap();
        assert_eq!(room.name, "fun");
        assert_eq!(room.creator, "alice");
        assert_eq!(room.game_type, GameType::Minesweeper);
        assert!(dir.members_of(&id).is_empty());
        assert_eq!(dir.rooms().len(), 1);
    }

    #[test]
    fn test_duplicate_names_are_allowed() {
        let dir = directory();
        let alice = player("alice");
        dir.create_room(new_room("same", ""), &alice);
        dir.create_room(new_room("same", ""), &alice);
        assert_eq!(dir.rooms().len(), 2);
    }

    #[test]
    fn test_join_is_idempotent() {
        let dir = directory();
        let alice = player("alice");
        let id = dir.create_room(new_room("r", ""), &alice);

        assert!(dir.join_room(&id, &alice));
        assert!(!dir.join_room(&id, &alice));
        assert_eq!(dir.members_of(&id).len(), 1);
    }

    #[test]
    fn test_join_missing_room_is_noop() {
        let dir = directory();
        assert!(!dir.join_room("nope", &player("bob")));
        assert!(dir.members_of("nope").is_empty());
        assert!(dir.doc().read(|doc| doc.get_map(MEMBERS_MAP).is_empty()));
    }

    #[test]
    fn test_leave_removes_only_that_player() {
        let dir = directory();
        let alice = player("alice");
        let bob = player("bob");
        let id = dir.create_room(new_room("r", ""), &alice);
        dir.join_room(&id, &alice);
        dir.join_room(&id, &bob);

        assert!(dir.leave_room(&id, &alice));
        let members = dir.members_of(&id);
        assert_eq!(members, vec![Some(bob.clone())]);
        assert!(!dir.leave_room(&id, &alice));
    }

    #[test]
    fn test_password_gate() {
        let dir = directory();
        let alice = player("alice");
        let id = dir.create_room(new_room("secret", "hunter2"), &alice);

        assert!(!dir.join_room_with_password(&id, None, &alice));
        assert!(!dir.join_room_with_password(&id, Some("wrong"), &alice));
        assert!(dir.join_room_with_password(&id, Some("hunter2"), &alice));
        assert!(dir.room_infos()[0].has_password);
    }

    #[test]
    fn test_seat_moves_player_and_respects_occupants() {
        let dir = directory();
        let alice = player("alice");
        let bob = player("bob");
        let id = dir.create_room(new_room("r", ""), &alice);
        dir.join_room(&id, &alice);

        assert!(dir.seat(&id, 2, &alice));
        assert_eq!(dir.members_of(&id), vec![None, None, Some(alice.clone())]);

        assert!(!dir.seat(&id, 2, &bob));
        assert!(dir.seat(&id, 0, &bob));
        assert_eq!(
            dir.members_of(&id),
            vec![Some(bob), None, Some(alice.clone())]
        );
        assert!(!dir.seat(&id, 2, &alice));
    }

    #[test]
    fn test_room_infos_count_occupied_seats() {
        let dir = directory();
        let alice = player("alice");
        let id = dir.create_room(new_room("r", ""), &alice);
        dir.seat(&id, 1, &alice);
        let info = &dir.room_infos()[0];
        assert_eq!(info.member_count, 1);
        assert_eq!(info.room_id, id);
    }

    #[test]
    fn test_observer_sees_new_rooms() {
        let dir = directory();
        let count = Rc::new(Cell::new(0));
        let sink = count.clone();
        dir.observe(move |rooms| sink.set(rooms.len()));
        dir.create_room(new_room("a", ""), &player("alice"));
        assert_eq!(count.get(), 1);
    }

    #[test]
    fn test_game_type_wire_names() {
        assert_eq!(
            serde_json::to_string(&GameType::Minesweeper).unwrap(),
            "\"扫雷\""
        );
        assert_eq!("chess".parse::<GameType>(), Ok(GameType::ChineseChess));
        assert!("go".parse::<GameType>().is_err());
    }

    #[test]
    fn test_room_doc_id() {
        assert_eq!(room_doc_id("abc"), "room/abc");
    }
}
