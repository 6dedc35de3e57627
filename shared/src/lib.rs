use serde::{Deserialize, Serialize};

pub const MAX_EDICTS: usize = 1024;
pub const UPDATE_BACKUP: usize = 32;
pub const MAX_RELIABLE_COMMANDS: usize = 64;

/// Entity is never sent to any client
pub const SVF_NOCLIENT: u32 = 0x0000_0001;
/// Entity is a projectile or other short-lived object
pub const SVF_PROJECTILE: u32 = 0x0000_0002;

/// Server-data flag: the stream carries reliable commands
pub const BITFLAGS_RELIABLE: u8 = 0x01;

pub const WORLD_WIDTH: f32 = 800.0;
pub const WORLD_HEIGHT: f32 = 600.0;

pub type EntityId = u32;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Entity {
    pub number: EntityId,
    pub in_use: bool,
    pub svflags: u32,
    pub owner: Option<EntityId>,
    pub x: f32,
    pub y: f32,
    pub vel_x: f32,
    pub vel_y: f32,
}

impl Entity {
    pub fn new(number: EntityId) -> Self {
        Self {
            number,
            in_use: false,
            svflags: 0,
            owner: None,
            x: 0.0,
            y: 0.0,
            vel_x: 0.0,
            vel_y: 0.0,
        }
    }

    pub fn is_hidden(&self) -> bool {
        self.svflags & SVF_NOCLIENT != 0
    }

    pub fn state(&self) -> EntityState {
        EntityState {
            number: self.number,
            owner: self.owner,
            x: self.x,
            y: self.y,
        }
    }
}

/// The networked part of an entity, as it lands in a recorded frame
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct EntityState {
    pub number: EntityId,
    pub owner: Option<EntityId>,
    pub x: f32,
    pub y: f32,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ConnectionState {
    Free,
    Connecting,
    Connected,
    Spawned,
}

#[derive(Debug, Clone)]
pub struct ClientSlot {
    pub name: String,
    pub state: ConnectionState,
    pub entity: Option<EntityId>,
    /// Game commands queued for delivery to this client
    pub outbound_commands: Vec<String>,
}

impl ClientSlot {
    pub fn free() -> Self {
        Self {
            name: String::new(),
            state: ConnectionState::Free,
            entity: None,
            outbound_commands: Vec::new(),
        }
    }

    pub fn is_spawned(&self) -> bool {
        self.state >= ConnectionState::Spawned && self.entity.is_some()
    }
}

/// Named view over the server's configstring table
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct ConfigStrings {
    /// Slot zero, sent verbatim in every demo header
    pub name: String,
    pub hostname: String,
    pub mapname: String,
    pub gametype: String,
    /// Level title shown in the loading screen
    pub message: String,
    pub match_name: String,
    pub match_score: String,
    pub match_uuid: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerPhase {
    Dead,
    Loading,
    Game,
}

/// Authoritative server state the demo recorder reads from
///
/// Entity numbers equal their index in `entities`. Entity 0 is the world,
/// entities `1..=max_clients` belong to the client slots in order.
#[derive(Debug, Clone)]
pub struct GameWorld {
    pub phase: ServerPhase,
    pub framenum: u64,
    /// Game clock in milliseconds
    pub gametime: u64,
    pub spawncount: u32,
    /// Milliseconds between snapshots
    pub snap_frame_time: u32,
    pub configstrings: ConfigStrings,
    pub purelist: Vec<String>,
    pub baselines: Vec<EntityState>,
    pub entities: Vec<Entity>,
    pub clients: Vec<ClientSlot>,
}

impl GameWorld {
    pub fn new(mapname: &str, max_clients: usize) -> Self {
        let mut entities: Vec<Entity> = (0..=max_clients as EntityId).map(Entity::new).collect();
        entities[0].in_use = true;

        Self {
            phase: ServerPhase::Game,
            framenum: 0,
            gametime: 0,
            spawncount: 1,
            snap_frame_time: 50,
            configstrings: ConfigStrings {
                mapname: mapname.to_string(),
                ..ConfigStrings::default()
            },
            purelist: Vec::new(),
            baselines: Vec::new(),
            entities,
            clients: (0..max_clients).map(|_| ClientSlot::free()).collect(),
        }
    }

    pub fn max_clients(&self) -> usize {
        self.clients.len()
    }

    /// Entity number owned by a client slot
    pub fn player_entity(slot: usize) -> EntityId {
        slot as EntityId + 1
    }

    /// Puts a new client in the first free slot
    pub fn connect_client(&mut self, name: &str) -> Option<usize> {
        let slot = self
            .clients
            .iter()
            .position(|c| c.state == ConnectionState::Free)?;

        let client = &mut self.clients[slot];
        client.name = name.to_string();
        client.state = ConnectionState::Connected;
        client.entity = None;
        client.outbound_commands.clear();
        Some(slot)
    }

    /// Moves a connected client into the game and gives it its player entity
    pub fn spawn_client(&mut self, slot: usize) -> bool {
        let Some(client) = self.clients.get_mut(slot) else {
            return false;
        };
        if client.state < ConnectionState::Connected {
            return false;
        }

        let number = Self::player_entity(slot);
        client.state = ConnectionState::Spawned;
        client.entity = Some(number);

        let entity = &mut self.entities[number as usize];
        *entity = Entity::new(number);
        entity.in_use = true;
        entity.x = 100.0 + (slot as f32 * 60.0) % (WORLD_WIDTH - 200.0);
        entity.y = WORLD_HEIGHT / 2.0;
        true
    }

    pub fn disconnect_client(&mut self, slot: usize) {
        let Some(client) = self.clients.get_mut(slot) else {
            return;
        };
        if let Some(number) = client.entity.take() {
            self.entities[number as usize] = Entity::new(number);
        }
        *client = ClientSlot::free();

        let player = Self::player_entity(slot);
        for entity in self.entities.iter_mut().filter(|e| e.owner == Some(player)) {
            entity.in_use = false;
            entity.owner = None;
        }
    }

    /// Allocates a non-player entity, reusing a free number when possible
    pub fn spawn_entity(&mut self, owner: Option<EntityId>, x: f32, y: f32) -> Option<EntityId> {
        let first = self.max_clients() + 1;
        let index = match self.entities[first.min(self.entities.len())..]
            .iter()
            .position(|e| !e.in_use)
        {
            Some(offset) => first + offset,
            None if self.entities.len() < MAX_EDICTS => {
                self.entities.push(Entity::new(self.entities.len() as EntityId));
                self.entities.len() - 1
            }
            None => return None,
        };

        let entity = &mut self.entities[index];
        *entity = Entity::new(index as EntityId);
        entity.in_use = true;
        entity.owner = owner;
        entity.x = x;
        entity.y = y;
        Some(entity.number)
    }

    /// True when at least one spawned client is visible to spectators
    pub fn has_visible_player(&self) -> bool {
        self.clients.iter().any(|client| {
            client.is_spawned()
                && client
                    .entity
                    .and_then(|n| self.entities.get(n as usize))
                    .is_some_and(|e| !e.is_hidden())
        })
    }

    /// Finds a connected client by case-insensitive name
    pub fn find_client_by_name(&self, name: &str) -> Option<usize> {
        self.clients.iter().position(|c| {
            c.state != ConnectionState::Free && c.name.eq_ignore_ascii_case(name)
        })
    }

    pub fn add_game_command(&mut self, slot: usize, command: &str) {
        if let Some(client) = self.clients.get_mut(slot) {
            client.outbound_commands.push(command.to_string());
        }
    }

    /// Advances the game clock by one server frame and integrates entity motion
    pub fn run_frame(&mut self, dt_ms: u64) {
        self.framenum += 1;
        self.gametime += dt_ms;

        let dt = dt_ms as f32 / 1000.0;
        for entity in self.entities.iter_mut().filter(|e| e.in_use && e.number != 0) {
            entity.x += entity.vel_x * dt;
            entity.y += entity.vel_y * dt;

            if entity.x <= 0.0 || entity.x >= WORLD_WIDTH {
                entity.vel_x = -entity.vel_x;
            }
            if entity.y <= 0.0 || entity.y >= WORLD_HEIGHT {
                entity.vel_y = -entity.vel_y;
            }
            entity.x = entity.x.clamp(0.0, WORLD_WIDTH);
            entity.y = entity.y.clamp(0.0, WORLD_HEIGHT);
        }
    }
}

/// One frame as seen by a recording client
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Snapshot {
    pub frame: u64,
    /// Frame this one is delta-compressed against, `None` for a keyframe
    pub delta_from: Option<u64>,
    pub gametime: u64,
    pub multipov: bool,
    pub viewer: Option<EntityId>,
    pub entities: Vec<EntityState>,
}

/// Records stored in a demo file, in stream order
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub enum DemoMessage {
    ServerData {
        spawncount: u32,
        frame_time: u32,
        mapname: String,
        bitflags: u8,
        purelist: Vec<String>,
        primary_configstring: String,
        baselines: Vec<EntityState>,
    },
    Frame {
        snapshot: Snapshot,
        commands: Vec<String>,
    },
    EndOfDemo,
    Metadata {
        data: Vec<u8>,
    },
}

pub fn encode_message(message: &DemoMessage) -> Result<Vec<u8>, bincode::Error> {
    bincode::serialize(message)
}

pub fn decode_message(bytes: &[u8]) -> Result<DemoMessage, bincode::Error> {
    bincode::deserialize(bytes)
}
