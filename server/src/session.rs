//! A single demo recording: the open temp file, timing state and the
//! synthetic client the frames are built for.
//!
//! A session exists only while it is recording. `start` either returns a
//! fully initialised session or cleans up after itself, and `finish` consumes
//! the session so nothing can touch it after the file is closed.

use crate::codec::{encode_frame_message, DemoCodec, DemoHeader, FrameBuilder, FrameClock};
use crate::config::DemoConfig;
use crate::error::{DemoError, DemoResult};
use crate::filename::encode_elapsed;
use crate::metadata::MetadataStore;
use crate::visibility::VisibilityFilter;
use log::{debug, error, info, warn};
use shared::{EntityId, GameWorld, Snapshot, BITFLAGS_RELIABLE, MAX_RELIABLE_COMMANDS, UPDATE_BACKUP};
use std::collections::VecDeque;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

pub const TEMP_SUFFIX: &str = ".rec";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionKind {
    /// Server-wide multipov demo
    Server,
    /// Demo filtered to the point of view of one client slot
    Race { slot: usize },
}

impl SessionKind {
    pub fn label(&self) -> &'static str {
        match self {
            SessionKind::Server => "server",
            SessionKind::Race { .. } => "race",
        }
    }
}

/// The pretend client a demo is recorded for
#[derive(Debug, Clone)]
pub struct RecordingClient {
    pub multipov: bool,
    pub nodelta: bool,
    /// Entity whose point of view is recorded, race demos only
    pub entity: Option<EntityId>,
    /// Server frame most recently written
    pub last_frame: u64,
    pub reliable_sequence: u64,
    pub reliable_sent: u64,
    pub reliable_acknowledge: u64,
    reliable_commands: VecDeque<String>,
    frames: VecDeque<Snapshot>,
}

impl RecordingClient {
    pub fn new(multipov: bool, entity: Option<EntityId>, last_frame: u64) -> Self {
        Self {
            multipov,
            nodelta: false,
            entity,
            last_frame,
            reliable_sequence: 0,
            reliable_sent: 0,
            reliable_acknowledge: 0,
            reliable_commands: VecDeque::new(),
            frames: VecDeque::with_capacity(UPDATE_BACKUP),
        }
    }

    /// Queues a reliable command for the next recorded frame
    pub fn add_reliable_command(&mut self, command: &str) {
        if self.reliable_commands.len() >= MAX_RELIABLE_COMMANDS {
            warn!("Demo reliable command overflow, dropping {:?}", self.reliable_commands.front());
            self.reliable_commands.pop_front();
        }
        self.reliable_commands.push_back(command.to_string());
        self.reliable_sequence += 1;
    }

    /// Drains the unsent reliable commands; a demo acknowledges them at once
    pub fn take_pending_commands(&mut self) -> Vec<String> {
        self.reliable_sent = self.reliable_sequence;
        self.reliable_acknowledge = self.reliable_sequence;
        self.reliable_commands.drain(..).collect()
    }

    pub fn pending_commands(&self) -> usize {
        self.reliable_commands.len()
    }

    pub fn push_frame(&mut self, snapshot: Snapshot) {
        if self.frames.len() >= UPDATE_BACKUP {
            self.frames.pop_front();
        }
        self.frames.push_back(snapshot);
    }

    pub fn latest_frame(&self) -> Option<&Snapshot> {
        self.frames.back()
    }

    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    pub fn free_frames(&mut self) {
        self.frames.clear();
    }
}

/// Final naming details a race demo is committed with
#[derive(Debug, Clone)]
pub struct RaceResult {
    pub public_path: String,
    pub player_name: String,
    pub elapsed: String,
}

/// Seconds since the Unix epoch
pub fn wall_clock_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::from_secs(0))
        .as_secs()
}

pub struct DemoSession {
    kind: SessionKind,
    public_path: String,
    temp_path: String,
    file: BufWriter<File>,
    base_time: u64,
    duration: u64,
    wall_clock_start: u64,
    client: RecordingClient,
    metadata: MetadataStore,
}

impl DemoSession {
    /// Opens `<public_path>.rec`, writes the header and one keyframe
    pub fn start(
        kind: SessionKind,
        public_path: String,
        world: &mut GameWorld,
        config: &DemoConfig,
        codec: &mut dyn DemoCodec,
        builder: &mut dyn FrameBuilder,
    ) -> DemoResult<Self> {
        let temp_path = format!("{}{}", public_path, TEMP_SUFFIX);
        let temp_file = config.resolve(&temp_path);

        let file = open_for_write(&temp_file)?;

        let client = match kind {
            SessionKind::Server => RecordingClient::new(true, None, world.framenum.saturating_sub(1)),
            SessionKind::Race { slot } => RecordingClient::new(
                false,
                Some(GameWorld::player_entity(slot)),
                world.framenum.saturating_sub(1),
            ),
        };

        let mut session = Self {
            kind,
            public_path,
            temp_path,
            file: BufWriter::new(file),
            base_time: world.gametime,
            duration: 0,
            wall_clock_start: wall_clock_now(),
            client,
            metadata: MetadataStore::default(),
        };
        let initial = codec.clear_metadata(&mut session.metadata);
        debug!("Metadata block for {} starts at {} bytes", session.public_path, initial);

        if let Err(e) = session.write_start(world, codec, builder) {
            error!("Couldn't start {} demo {}: {}", kind.label(), session.public_path, e);
            drop(session.file);
            if let Err(remove_err) = fs::remove_file(&temp_file) {
                warn!("Failed to delete {}: {}", temp_file.display(), remove_err);
            }
            return Err(e);
        }

        Ok(session)
    }

    fn write_start(
        &mut self,
        world: &mut GameWorld,
        codec: &mut dyn DemoCodec,
        builder: &mut dyn FrameBuilder,
    ) -> DemoResult<()> {
        let header = DemoHeader {
            spawncount: world.spawncount,
            frame_time: world.snap_frame_time,
            mapname: &world.configstrings.mapname,
            bitflags: BITFLAGS_RELIABLE,
            purelist: &world.purelist,
            primary_configstring: &world.configstrings.name,
            baselines: &world.baselines,
        };
        codec.begin_recording(&mut self.file, &header)?;

        // the first frame in the file is always a keyframe
        self.client.nodelta = true;
        let result = self.write_snap(world, codec, builder);
        self.client.nodelta = false;
        result
    }

    /// Builds and records one frame for the current server frame
    pub fn write_snap(
        &mut self,
        world: &mut GameWorld,
        codec: &mut dyn DemoCodec,
        builder: &mut dyn FrameBuilder,
    ) -> DemoResult<()> {
        let clock = FrameClock {
            framenum: world.framenum,
            gametime: world.gametime,
        };

        let snapshot = match (self.kind, self.client.entity) {
            (SessionKind::Race { .. }, Some(viewer)) => {
                // player slots follow the entity table, not the recorder config
                let player_slots = world.max_clients();
                let view = VisibilityFilter::new(viewer, player_slots).scoped(&mut world.entities);
                builder.build_frame(&self.client, clock, &view)
            }
            _ => builder.build_frame(&self.client, clock, &world.entities),
        };

        self.client.push_frame(snapshot.clone());
        let commands = self.client.take_pending_commands();
        let message = encode_frame_message(snapshot, commands)?;
        codec.record_message(&mut self.file, &message)?;

        self.duration = self.duration.max(world.gametime.saturating_sub(self.base_time));
        self.client.last_frame = world.framenum;
        Ok(())
    }

    /// Closes the file and either publishes or deletes it
    ///
    /// The session is consumed on every path. A failed rename leaves the
    /// recording under its temp name and is reported as an error.
    pub fn finish(
        self,
        cancel: bool,
        world: &GameWorld,
        config: &DemoConfig,
        codec: &mut dyn DemoCodec,
        race: Option<RaceResult>,
    ) -> DemoResult<String> {
        let DemoSession {
            kind,
            public_path,
            temp_path,
            mut file,
            duration,
            wall_clock_start,
            mut client,
            mut metadata,
            ..
        } = self;

        let temp_file = config.resolve(&temp_path);
        let public_path = race
            .as_ref()
            .map(|r| r.public_path.clone())
            .unwrap_or(public_path);

        if cancel {
            drop(file);
            client.free_frames();
            info!("Canceled {} demo recording: {}", kind.label(), public_path);
            return fs::remove_file(&temp_file)
                .map(|()| public_path)
                .map_err(|e| DemoError::io("delete", temp_file, e));
        }

        let stopped = codec.stop_recording(&mut file);
        let flushed = file.flush().map_err(|e| DemoError::io("flush", &temp_file, e));
        drop(file);
        client.free_frames();
        info!("Stopped {} demo recording: {}", kind.label(), public_path);
        stopped?;
        flushed?;

        let stamp = SessionStamp {
            multipov: client.multipov,
            duration,
            wall_clock_start,
        };
        fill_metadata(&mut metadata, &stamp, world, race.as_ref());
        codec.write_metadata(&temp_file, &metadata)?;

        let public_file = config.resolve(&public_path);
        fs::rename(&temp_file, &public_file).map_err(|e| {
            error!("Failed to rename {} to {}: {}", temp_file.display(), public_file.display(), e);
            DemoError::io("rename", temp_file.clone(), e)
        })?;

        debug!("Published demo {} ({} ms)", public_path, duration);
        Ok(public_path)
    }

    pub fn kind(&self) -> SessionKind {
        self.kind
    }

    pub fn public_path(&self) -> &str {
        &self.public_path
    }

    pub fn temp_path(&self) -> &str {
        &self.temp_path
    }

    /// Game time recorded so far, in milliseconds
    pub fn duration(&self) -> u64 {
        self.duration
    }

    pub fn base_time(&self) -> u64 {
        self.base_time
    }

    pub fn wall_clock_start(&self) -> u64 {
        self.wall_clock_start
    }

    pub fn client(&self) -> &RecordingClient {
        &self.client
    }

    pub fn client_mut(&mut self) -> &mut RecordingClient {
        &mut self.client
    }

    pub fn metadata(&self) -> &MetadataStore {
        &self.metadata
    }

    /// Elapsed-time string of this session, as stored in race demo names
    pub fn elapsed_string(&self) -> String {
        encode_elapsed(self.duration)
    }
}

struct SessionStamp {
    multipov: bool,
    duration: u64,
    wall_clock_start: u64,
}

fn fill_metadata(
    meta: &mut MetadataStore,
    stamp: &SessionStamp,
    world: &GameWorld,
    race: Option<&RaceResult>,
) {
    let cs = &world.configstrings;

    meta.set("hostname", &cs.hostname);
    meta.set("localtime", &stamp.wall_clock_start.to_string());
    meta.set("multipov", if stamp.multipov { "1" } else { "0" });
    meta.set("duration", &stamp.duration.div_ceil(1000).to_string());
    meta.set("mapname", &cs.mapname);
    meta.set("gametype", &cs.gametype);
    meta.set("levelname", &cs.message);
    match race {
        Some(race) => {
            meta.set("matchname", &race.player_name);
            meta.set("matchscore", &race.elapsed);
        }
        None => {
            meta.set("matchname", &cs.match_name);
            meta.set("matchscore", &cs.match_score);
        }
    }
    meta.set("matchuuid", &cs.match_uuid);
}

fn open_for_write(path: &Path) -> DemoResult<File> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| DemoError::io("create", parent, e))?;
    }
    File::create(path).map_err(|e| DemoError::io("open", path, e))
}
