//! Registry owning every demo session of the server
//!
//! One optional server-wide session plus one optional race session per
//! client slot. All mutation happens on the tick thread or inside a console
//! command, so the registry needs no locking.

use crate::codec::{BincodeDemoCodec, DemoCodec, FrameBuilder, WorldSnapshotBuilder};
use crate::config::DemoConfig;
use crate::error::{DemoError, DemoResult};
use crate::filename::{build_demo_path, encode_elapsed, sanitize, sanitize_file_path, validate_relative};
use crate::retention::{self, PurgeReport};
use crate::session::{wall_clock_now, DemoSession, RaceResult, SessionKind};
use log::{debug, error, info, warn};
use rand::Rng;
use shared::{GameWorld, ServerPhase};

/// Manages the lifetime of all demo recordings
///
/// Sessions are created by the `start_*` methods and consumed by the
/// `stop_*`/`cancel_*` methods. A failed start leaves no session behind, and a
/// session that fails mid-recording is cancelled without touching the others.
pub struct DemoRecorder {
    config: DemoConfig,
    codec: Box<dyn DemoCodec + Send>,
    builder: Box<dyn FrameBuilder + Send>,
    server: Option<DemoSession>,
    races: Vec<Option<DemoSession>>,
}

impl DemoRecorder {
    /// Creates a recorder writing bincode demos
    pub fn new(config: DemoConfig) -> Self {
        Self::with_codec(config, Box::new(BincodeDemoCodec), Box::new(WorldSnapshotBuilder))
    }

    pub fn with_codec(
        config: DemoConfig,
        codec: Box<dyn DemoCodec + Send>,
        builder: Box<dyn FrameBuilder + Send>,
    ) -> Self {
        let races = (0..config.max_clients).map(|_| None).collect();
        Self {
            config,
            codec,
            builder,
            server: None,
            races,
        }
    }

    pub fn config(&self) -> &DemoConfig {
        &self.config
    }

    pub fn server_session(&self) -> Option<&DemoSession> {
        self.server.as_ref()
    }

    pub fn race_session(&self, slot: usize) -> Option<&DemoSession> {
        self.races.get(slot).and_then(Option::as_ref)
    }

    pub fn is_recording(&self) -> bool {
        self.server.is_some() || self.races.iter().any(Option::is_some)
    }

    /// Number of race demos currently recording
    pub fn active_races(&self) -> usize {
        self.races.iter().filter(|r| r.is_some()).count()
    }

    /// Starts the server-wide multipov demo
    ///
    /// The name may contain subfolders but must stay below the demo root.
    pub fn start_server(&mut self, world: &mut GameWorld, name: &str) -> DemoResult<String> {
        if self.server.is_some() {
            return Err(DemoError::AlreadyRecording);
        }
        if world.phase != ServerPhase::Game {
            return Err(DemoError::NotInGame);
        }
        if !world.has_visible_player() {
            return Err(DemoError::NoQualifyingClient(
                "No players in game, can't record a demo".to_string(),
            ));
        }

        let root = self.config.demo_dir();
        let leaf = sanitize_file_path(name.trim());
        if leaf.is_empty() {
            return Err(DemoError::Usage("serverrecord <demoname>"));
        }
        let path = build_demo_path(&root, &[], &leaf, &self.config.demo_extension);
        if !validate_relative(&path, &root) {
            return Err(DemoError::InvalidName(name.to_string()));
        }

        let session = DemoSession::start(
            SessionKind::Server,
            path,
            world,
            &self.config,
            self.codec.as_mut(),
            self.builder.as_mut(),
        )?;
        info!("Recording server demo: {}", session.public_path());

        let public_path = session.public_path().to_string();
        self.server = Some(session);
        Ok(public_path)
    }

    /// Starts the server demo under an `_auto####` name and trims old autodemos
    pub fn start_auto_record(&mut self, world: &mut GameWorld) -> DemoResult<String> {
        let root = self.config.resolve(&self.config.demo_dir());
        let ext = self.config.demo_extension.clone();
        let last = retention::list_demos(&root, &ext)?
            .iter()
            .filter_map(|name| retention::auto_demo_number(name, &ext))
            .max()
            .unwrap_or(0);

        let name = format!(
            "{}_{}_auto{:04}",
            wall_clock_now(),
            world.configstrings.mapname,
            last % 9999 + 1
        );
        let path = self.start_server(world, &name)?;

        if self.config.max_auto_demos > 0 {
            self.purge_auto_demos(self.config.max_auto_demos)?;
        }
        Ok(path)
    }

    /// Commits or cancels the server demo
    pub fn stop_server(&mut self, world: &GameWorld, cancel: bool) -> DemoResult<String> {
        let session = self.server.take().ok_or(DemoError::NotRecording("server"))?;
        session.finish(cancel, world, &self.config, self.codec.as_mut(), None)
    }

    /// Resolves a slot number or player name to a connected client with an entity
    pub fn find_player(world: &GameWorld, target: &str) -> DemoResult<usize> {
        let slot = if target.starts_with(|c: char| c.is_ascii_digit()) {
            let id = crate::commands::atoi(target);
            match usize::try_from(id) {
                Ok(slot) if slot < world.max_clients() => slot,
                _ => return Err(DemoError::NoQualifyingClient(format!("Bad client slot: {}", id))),
            }
        } else {
            world.find_client_by_name(target).ok_or_else(|| {
                DemoError::NoQualifyingClient(format!("Userid {} is not on the server", target))
            })?
        };

        let client = &world.clients[slot];
        if client.state == shared::ConnectionState::Free || client.entity.is_none() {
            return Err(DemoError::NoQualifyingClient(format!(
                "Client {} is not active",
                target
            )));
        }
        Ok(slot)
    }

    /// Starts a race demo from the point of view of `target`
    pub fn start_race(&mut self, world: &mut GameWorld, target: &str, name: &str) -> DemoResult<String> {
        let slot = Self::find_player(world, target)?;

        let client = &world.clients[slot];
        let visible = client
            .entity
            .and_then(|n| world.entities.get(n as usize))
            .is_some_and(|e| !e.is_hidden());
        if !client.is_spawned() || !visible {
            return Err(DemoError::NoQualifyingClient(
                "Player not in game, can't record a demo".to_string(),
            ));
        }
        if slot >= self.races.len() {
            return Err(DemoError::NoQualifyingClient(format!("Bad client slot: {}", slot)));
        }
        if self.races[slot].is_some() {
            return Err(DemoError::AlreadyRecording);
        }
        if world.phase != ServerPhase::Game {
            return Err(DemoError::NotInGame);
        }

        let mapname = world.configstrings.mapname.clone();
        let leaf = format!(
            "{}_{}_{:04}",
            mapname,
            sanitize(name),
            rand::thread_rng().gen_range(1..=9999)
        );
        let root = self.config.demo_dir();
        let path = sanitize_file_path(&build_demo_path(
            &root,
            &[mapname.as_str()],
            &leaf,
            &self.config.demo_extension,
        ));
        if !validate_relative(&path, &root) {
            return Err(DemoError::InvalidName(path));
        }

        let session = DemoSession::start(
            SessionKind::Race { slot },
            path,
            world,
            &self.config,
            self.codec.as_mut(),
            self.builder.as_mut(),
        )?;
        info!("Recording client demo: {}", session.public_path());

        let public_path = session.public_path().to_string();
        self.races[slot] = Some(session);
        Ok(public_path)
    }

    /// Commits a race demo under its final `<map>_<player>_<time>` name
    ///
    /// An invalid final name leaves the session recording.
    pub fn stop_race(
        &mut self,
        world: &GameWorld,
        slot: usize,
        player_name: &str,
        elapsed_ms: u64,
    ) -> DemoResult<String> {
        if self.race_session(slot).is_none() {
            return Err(DemoError::NotRecording("race"));
        }

        let mapname = &world.configstrings.mapname;
        let elapsed = encode_elapsed(elapsed_ms);
        let root = self.config.demo_dir();
        let leaf = format!("{}_{}_{}", mapname, sanitize(player_name), elapsed);
        let final_path = sanitize_file_path(&build_demo_path(
            &root,
            &[mapname.as_str()],
            &leaf,
            &self.config.demo_extension,
        ));
        if !validate_relative(&final_path, &root) {
            return Err(DemoError::InvalidName(final_path));
        }

        let session = self.races[slot]
            .take()
            .ok_or(DemoError::NotRecording("race"))?;
        let race = RaceResult {
            public_path: final_path,
            player_name: world.clients.get(slot).map(|c| c.name.clone()).unwrap_or_default(),
            elapsed,
        };
        let public_path = session.finish(false, world, &self.config, self.codec.as_mut(), Some(race))?;

        if self.config.race_purge_max > 0 {
            let folder = self.config.resolve(&self.config.map_dir(mapname));
            let ext = &self.config.demo_extension;
            match retention::purge_race_demos(&folder, ext, true, self.config.race_purge_max) {
                Ok(report) => debug!("Race purge on {} removed {} demos", mapname, report.removed.len()),
                Err(e) => warn!("Race purge on {} failed: {}", mapname, e),
            }
        }
        Ok(public_path)
    }

    pub fn cancel_race(&mut self, world: &GameWorld, slot: usize) -> DemoResult<String> {
        let session = self
            .races
            .get_mut(slot)
            .and_then(Option::take)
            .ok_or(DemoError::NotRecording("race"))?;
        session.finish(true, world, &self.config, self.codec.as_mut(), None)
    }

    /// Records one frame for every active session
    ///
    /// The server demo is committed once no visible player is left. A race
    /// demo whose viewer left the game is cancelled. Returns the number of
    /// frames written.
    pub fn write_snaps(&mut self, world: &mut GameWorld) -> usize {
        let mut written = 0;

        if self.server.is_some() {
            if !world.has_visible_player() {
                warn!("{}", DemoError::NoViewersRemaining);
                if let Err(e) = self.stop_server(world, false) {
                    error!("Failed to stop server demo: {}", e);
                }
            } else if let Some(session) = self.server.as_mut() {
                match session.write_snap(world, self.codec.as_mut(), self.builder.as_mut()) {
                    Ok(()) => written += 1,
                    Err(e) => {
                        error!("Server demo write failed, cancelling: {}", e);
                        self.abort_server(world);
                    }
                }
            }
        }

        for slot in 0..self.races.len() {
            if self.races[slot].is_none() {
                continue;
            }

            let viewer_present = world
                .clients
                .get(slot)
                .is_some_and(|c| c.is_spawned() && c.entity.is_some());
            if !viewer_present {
                debug!("Race viewer {} left, cancelling race demo", slot);
                if let Err(e) = self.cancel_race(world, slot) {
                    warn!("Failed to cancel race demo {}: {}", slot, e);
                }
                continue;
            }

            let Some(session) = self.races[slot].as_mut() else {
                continue;
            };
            match session.write_snap(world, self.codec.as_mut(), self.builder.as_mut()) {
                Ok(()) => written += 1,
                Err(e) => {
                    error!("Race demo {} write failed, cancelling: {}", slot, e);
                    if let Err(e) = self.cancel_race(world, slot) {
                        warn!("Failed to cancel race demo {}: {}", slot, e);
                    }
                }
            }
        }

        written
    }

    fn abort_server(&mut self, world: &GameWorld) {
        if let Err(e) = self.stop_server(world, true) {
            warn!("Failed to cancel server demo: {}", e);
        }
    }

    /// Queues a reliable server command on every recording client
    pub fn broadcast_command(&mut self, command: &str) {
        let sessions = self.server.iter_mut().chain(self.races.iter_mut().flatten());
        for session in sessions {
            session.client_mut().add_reliable_command(command);
        }
    }

    /// Trims `_auto####` demos in the demo root down to `max_auto_demos`
    pub fn purge_auto_demos(&self, max_auto_demos: usize) -> DemoResult<PurgeReport> {
        let root = self.config.resolve(&self.config.demo_dir());
        retention::purge_auto_demos(&root, &self.config.demo_extension, max_auto_demos)
    }

    /// Runs the race retention passes over `<demo root>/<folder>`
    pub fn purge_race_demos(&self, folder: &str, dedupe: bool, max_demos: usize) -> DemoResult<PurgeReport> {
        let root = self.config.demo_dir();
        let relative = sanitize_file_path(&format!("{}/{}", root, folder));
        if !validate_relative(&relative, &root) {
            return Err(DemoError::InvalidName(folder.to_string()));
        }

        let path = self.config.resolve(&relative);
        if !path.is_dir() {
            return Err(DemoError::NotFound(relative));
        }
        retention::purge_race_demos(&path, &self.config.demo_extension, dedupe, max_demos)
    }

    /// Commits every active session, races under their current duration
    pub fn shutdown(&mut self, world: &GameWorld) -> Vec<DemoResult<String>> {
        let mut results = Vec::new();

        if self.server.is_some() {
            results.push(self.stop_server(world, false));
        }
        for slot in 0..self.races.len() {
            let Some(session) = self.races[slot].as_ref() else {
                continue;
            };
            let elapsed = session.duration();
            let name = world.clients.get(slot).map(|c| c.name.clone()).unwrap_or_default();
            let result = self.stop_race(world, slot, &name, elapsed);
            if result.is_err() && self.races[slot].is_some() {
                // the final name was rejected, discard the recording
                results.push(self.cancel_race(world, slot));
            }
            results.push(result);
        }

        results
    }
}
