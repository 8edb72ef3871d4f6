use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

pub const KEY_PLAYER_NAME: &str = "PlayerName";
pub const KEY_PLAYER_CHARACTER: &str = "Character";
pub const KEY_GAME_MODE: &str = "GameMode";
pub const KEY_RELAY_JOIN_CODE: &str = "RelayJoinCode";
pub const KEY_START_GAME: &str = "StartGameFlag";

pub const START_FLAG_IDLE: &str = "0";
pub const START_FLAG_STARTED: &str = "1";

/// Who may read a data value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Visibility {
    /// Readable by anyone, including lobby-list queries.
    Public,
    /// Readable only by members of the lobby.
    Member,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataValue {
    pub visibility: Visibility,
    pub value: String,
}

impl DataValue {
    pub fn public(value: impl Into<String>) -> Self {
        Self {
            visibility: Visibility::Public,
            value: value.into(),
        }
    }

    pub fn member(value: impl Into<String>) -> Self {
        Self {
            visibility: Visibility::Member,
            value: value.into(),
        }
    }
}

pub type Metadata = BTreeMap<String, DataValue>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GameMode {
    CaptureTheFlag,
    Conquest,
}

impl GameMode {
    pub fn toggled(self) -> Self {
        match self {
            Self::CaptureTheFlag => Self::Conquest,
            Self::Conquest => Self::CaptureTheFlag,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PlayerCharacter {
    #[default]
    Marine,
    Ninja,
    Zombie,
}

macro_rules! string_enum {
    ($ty:ty { $($variant:ident),+ $(,)? }) => {
        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                match self {
                    $(Self::$variant => f.write_str(stringify!($variant)),)+
                }
            }
        }

        impl FromStr for $ty {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $(stringify!($variant) => Ok(Self::$variant),)+
                    other => Err(format!("unknown {}: {other}", stringify!($ty))),
                }
            }
        }
    };
}

string_enum!(GameMode { CaptureTheFlag, Conquest });
string_enum!(PlayerCharacter { Marine, Ninja, Zombie });

/// A lobby member as seen in the shared record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Member {
    pub id: String,
    pub attributes: Metadata,
}

impl Member {
    pub fn new(id: impl Into<String>, display_name: &str, character: PlayerCharacter) -> Self {
        let attributes = Metadata::from([
            (KEY_PLAYER_NAME.to_string(), DataValue::public(display_name)),
            (
                KEY_PLAYER_CHARACTER.to_string(),
                DataValue::public(character.to_string()),
            ),
        ]);
        Self {
            id: id.into(),
            attributes,
        }
    }

    pub fn display_name(&self) -> &str {
        self.attributes
            .get(KEY_PLAYER_NAME)
            .map(|v| v.value.as_str())
            .unwrap_or_default()
    }

    pub fn character(&self) -> PlayerCharacter {
        self.attributes
            .get(KEY_PLAYER_CHARACTER)
            .and_then(|v| v.value.parse().ok())
            .unwrap_or_default()
    }
}

/// Local view of one shared lobby record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LobbySession {
    pub id: String,
    /// Short code other players use to join the lobby (not the relay code).
    pub lobby_code: String,
    pub name: String,
    pub host_id: String,
    pub members: Vec<Member>,
    pub metadata: Metadata,
    pub capacity: usize,
    pub is_private: bool,
    /// Milliseconds since the store's epoch; larger is newer.
    pub created_at: u64,
}

impl LobbySession {
    pub fn is_host(&self, player_id: &str) -> bool {
        self.host_id == player_id
    }

    pub fn has_member(&self, player_id: &str) -> bool {
        self.members.iter().any(|m| m.id == player_id)
    }

    pub fn member(&self, player_id: &str) -> Option<&Member> {
        self.members.iter().find(|m| m.id == player_id)
    }

    pub fn available_slots(&self) -> usize {
        self.capacity.saturating_sub(self.members.len())
    }

    pub fn is_full(&self) -> bool {
        self.members.len() >= self.capacity
    }

    pub fn data(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).map(|v| v.value.as_str())
    }

    /// The published relay join code, if the host has allocated one.
    pub fn relay_join_code(&self) -> Option<&str> {
        self.data(KEY_RELAY_JOIN_CODE)
            .map(str::trim)
            .filter(|code| !code.is_empty())
    }

    pub fn game_mode(&self) -> Option<GameMode> {
        self.data(KEY_GAME_MODE).and_then(|v| v.parse().ok())
    }

    pub fn member_ids(&self) -> BTreeSet<&str> {
        self.members.iter().map(|m| m.id.as_str()).collect()
    }

    /// Structural comparison that ignores member ordering.
    pub fn differs_from(&self, other: &LobbySession) -> bool {
        if self.id != other.id
            || self.name != other.name
            || self.host_id != other.host_id
            || self.capacity != other.capacity
            || self.is_private != other.is_private
            || self.metadata != other.metadata
            || self.members.len() != other.members.len()
        {
            return true;
        }

        let by_id: BTreeMap<&str, &Member> =
            other.members.iter().map(|m| (m.id.as_str(), m)).collect();
        self.members
            .iter()
            .any(|m| by_id.get(m.id.as_str()) != Some(&m))
    }

    /// Copy with member-only metadata stripped, as seen by lobby-list queries.
    pub fn public_view(&self) -> LobbySession {
        let mut view = self.clone();
        view.metadata
            .retain(|_, v| v.visibility == Visibility::Public);
        view
    }
}
