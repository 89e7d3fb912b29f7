use std::fs;
use std::io;
use std::path::Path;

use rand::Rng;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Cursor and badge colours handed out to new identities.
pub const USER_COLORS: [&str; 8] = [
    "#30bced", "#6eeb83", "#ffbc42", "#ecd444", "#ee6352", "#9ac2c9", "#8acb88", "#1be7ff",
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Player {
    pub id: Uuid,
    pub username: String,
    /// Hex colour, e.g. `#30bced`.
    pub color: String,
}

impl Player {
    pub fn new(id: Uuid, username: String, color: String) -> Self {
        Self {
            id,
            username,
            color,
        }
    }

    /// A fresh identity with a random colour and a `PlayerNNN` name.
    pub fn random(rng: &mut impl Rng) -> Self {
        let id = uuid::Builder::from_random_bytes(rng.gen()).into_uuid();
        let color = USER_COLORS[rng.gen_range(0..USER_COLORS.len())];
        let username = format!("Player{}", rng.gen_range(0..1000));
        Self::new(id, username, color.to_string())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum IdentityError {
    #[error("identity file i/o: {0}")]
    Io(#[from] io::Error),
    #[error("identity file is not valid json: {0}")]
    Json(#[from] serde_json::Error),
}

/// Load the identity stored at `path`, or create, save and return a new one.
/// The same identity is reused across sessions.
pub fn load_or_create(path: &Path, rng: &mut impl Rng) -> Result<Player, IdentityError> {
    match fs::read(path) {
        Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            let player = Player::random(rng);
            save(path, &player)?;
            tracing::info!("created identity {} ({})", player.username, player.id);
            Ok(player)
        }
        Err(e) => Err(e.into()),
    }
}

pub fn save(path: &Path, player: &Player) -> Result<(), IdentityError> {
    let json = serde_json::to_vec_pretty(player)?;
    fs::write(path, json)?;
    Ok(())
}
