//! Console and client command parsing and dispatch
//!
//! Console commands drive the recorder and the simulated world. Each one
//! produces at most one status line for the operator. Client commands
//! (`demolist`, `demoget`) answer with game commands queued on the
//! requesting client instead.

use crate::directory;
use crate::error::{DemoError, DemoResult};
use crate::recorder::DemoRecorder;
use log::{info, warn};
use shared::GameWorld;

/// C-style integer parse: optional sign, leading digits, 0 when there are none
pub fn atoi(s: &str) -> i64 {
    let s = s.trim_start();
    let (negative, digits) = match s.as_bytes().first() {
        Some(b'-') => (true, &s[1..]),
        Some(b'+') => (false, &s[1..]),
        _ => (false, s),
    };

    let value = digits
        .bytes()
        .take_while(u8::is_ascii_digit)
        .fold(0i64, |acc, d| acc.saturating_mul(10).saturating_add(i64::from(d - b'0')));

    if negative {
        -value
    } else {
        value
    }
}

/// Splits a command line on whitespace, keeping quoted runs together
pub fn tokenize(line: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut has_token = false;

    for c in line.chars() {
        match c {
            '"' => {
                in_quotes = !in_quotes;
                has_token = true;
            }
            c if c.is_whitespace() && !in_quotes => {
                if has_token {
                    tokens.push(std::mem::take(&mut current));
                    has_token = false;
                }
            }
            c => {
                current.push(c);
                has_token = true;
            }
        }
    }
    if has_token {
        tokens.push(current);
    }

    tokens
}

fn flag(arg: Option<&String>) -> bool {
    arg.is_some_and(|a| atoi(a) != 0)
}

fn slot_arg(arg: &str) -> DemoResult<usize> {
    usize::try_from(atoi(arg))
        .map_err(|_| DemoError::NoQualifyingClient(format!("Bad client slot: {}", atoi(arg))))
}

/// Requests a connected client may send about server demos
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientCommand {
    DemoList { start: Option<String> },
    DemoGet { selector: String },
}

impl ClientCommand {
    /// Parses a client command, `None` when it is not a demo request or malformed
    pub fn parse(args: &[String]) -> Option<Self> {
        match args.first().map(|a| a.to_ascii_lowercase()).as_deref() {
            Some("demolist") if args.len() <= 2 => Some(ClientCommand::DemoList {
                start: args.get(1).cloned(),
            }),
            // more than one argument is answered with the usage text
            Some("demolist") => Some(ClientCommand::DemoList {
                start: Some("0".to_string()),
            }),
            Some("demoget") if args.len() == 2 => Some(ClientCommand::DemoGet {
                selector: args[1].clone(),
            }),
            _ => None,
        }
    }

    /// Answers the request on the client's command queue
    ///
    /// Ignored until the client has spawned.
    pub fn execute(&self, recorder: &DemoRecorder, world: &mut GameWorld, slot: usize) -> DemoResult<()> {
        if !world.clients.get(slot).is_some_and(|c| c.is_spawned()) {
            return Ok(());
        }

        let config = recorder.config();
        let mapname = world.configstrings.mapname.clone();
        let replies = match self {
            ClientCommand::DemoList { start } => directory::demo_list(config, &mapname, start.as_deref())?,
            ClientCommand::DemoGet { selector } => vec![directory::demo_get(config, &mapname, selector)?],
        };

        for reply in replies {
            world.add_game_command(slot, &reply);
        }
        Ok(())
    }
}

/// Operator commands read from the server console
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    ServerRecord { name: String },
    ServerStop { silent: bool },
    ServerCancel { silent: bool },
    RaceRecord { target: String, name: String, silent: bool },
    RaceRecordStop { slot: String, silent: bool, name: String, elapsed_ms: u64 },
    RaceRecordCancel { slot: String, silent: bool },
    ServerRecordPurge { max_auto_demos: usize },
    RaceRecordPurge { folder: String, sort_field: i64, dedupe: bool, max_demos: usize },
    Connect { name: String },
    Spawn { slot: String },
    Drop { slot: String },
    Say { text: String },
    Client { slot: String, command: ClientCommand },
    Status,
    Quit,
}

impl ConsoleCommand {
    /// Parses one console line; an empty line yields `Ok(None)`
    pub fn parse(line: &str) -> DemoResult<Option<Self>> {
        let args = tokenize(line);
        let Some(name) = args.first() else {
            return Ok(None);
        };

        let argc = args.len();
        let command = match name.to_ascii_lowercase().as_str() {
            "serverrecord" => {
                if argc < 2 {
                    return Err(DemoError::Usage("serverrecord <demoname>"));
                }
                ConsoleCommand::ServerRecord {
                    name: args[1..].join(" "),
                }
            }
            "serverstop" => ConsoleCommand::ServerStop { silent: flag(args.get(1)) },
            "servercancel" => ConsoleCommand::ServerCancel { silent: flag(args.get(1)) },
            "racerecord" => {
                if argc < 3 {
                    return Err(DemoError::Usage("racerecord <id or name> <demoname> <silent>"));
                }
                ConsoleCommand::RaceRecord {
                    target: args[1].clone(),
                    name: args[2].clone(),
                    silent: flag(args.get(3)),
                }
            }
            "racerecordstop" => match argc {
                4 => ConsoleCommand::RaceRecordStop {
                    slot: args[1].clone(),
                    silent: false,
                    name: args[2].clone(),
                    elapsed_ms: atoi(&args[3]).max(0) as u64,
                },
                5 => ConsoleCommand::RaceRecordStop {
                    slot: args[1].clone(),
                    silent: flag(args.get(2)),
                    name: args[3].clone(),
                    elapsed_ms: atoi(&args[4]).max(0) as u64,
                },
                _ => {
                    return Err(DemoError::Usage(
                        "racerecordstop <id> [silent] <playername> <time>",
                    ))
                }
            },
            "racerecordcancel" => {
                if argc < 2 {
                    return Err(DemoError::Usage("racerecordcancel <id> [silent]"));
                }
                ConsoleCommand::RaceRecordCancel {
                    slot: args[1].clone(),
                    silent: flag(args.get(2)),
                }
            }
            "serverrecordpurge" => {
                if argc > 2 {
                    return Err(DemoError::Usage("serverrecordpurge [maxautodemos]"));
                }
                ConsoleCommand::ServerRecordPurge {
                    max_auto_demos: args.get(1).map_or(0, |a| atoi(a).max(0) as usize),
                }
            }
            "racerecordpurge" => {
                if !(4..=5).contains(&argc) {
                    return Err(DemoError::Usage(
                        "racerecordpurge <folder> <sortNum> <uniqueRemainder> [maxdemos]",
                    ));
                }
                ConsoleCommand::RaceRecordPurge {
                    folder: args[1].clone(),
                    sort_field: atoi(&args[2]),
                    dedupe: flag(args.get(3)),
                    max_demos: args.get(4).map_or(0, |a| atoi(a).max(0) as usize),
                }
            }
            "connect" => {
                if argc < 2 {
                    return Err(DemoError::Usage("connect <name>"));
                }
                ConsoleCommand::Connect { name: args[1].clone() }
            }
            "spawn" | "drop" => {
                if argc < 2 {
                    return Err(DemoError::Usage("spawn|drop <slot>"));
                }
                let slot = args[1].clone();
                if name.eq_ignore_ascii_case("spawn") {
                    ConsoleCommand::Spawn { slot }
                } else {
                    ConsoleCommand::Drop { slot }
                }
            }
            "say" => ConsoleCommand::Say {
                text: args[1..].join(" "),
            },
            "client" => {
                let command = ClientCommand::parse(args.get(2..).unwrap_or_default())
                    .ok_or(DemoError::Usage("client <slot> demolist [start] | demoget <index>"))?;
                ConsoleCommand::Client {
                    slot: args[1].clone(),
                    command,
                }
            }
            "status" => ConsoleCommand::Status,
            "quit" | "exit" => ConsoleCommand::Quit,
            other => return Err(DemoError::NotFound(format!("command {}", other))),
        };

        Ok(Some(command))
    }

    /// Runs the command, returning the status line to show, if any
    pub fn execute(&self, recorder: &mut DemoRecorder, world: &mut GameWorld) -> DemoResult<Option<String>> {
        let status = match self {
            ConsoleCommand::ServerRecord { name } => {
                let path = recorder.start_server(world, name)?;
                Some(format!("Recording server demo: {}", path))
            }
            ConsoleCommand::ServerStop { silent } | ConsoleCommand::ServerCancel { silent } => {
                let cancel = matches!(self, ConsoleCommand::ServerCancel { .. });
                let status = match recorder.stop_server(world, cancel) {
                    Ok(path) if cancel => format!("Canceled server demo recording: {}", path),
                    Ok(path) => format!("Stopped server demo recording: {}", path),
                    Err(e) => return quiet_unless(*silent, e),
                };
                (!silent).then_some(status)
            }
            ConsoleCommand::RaceRecord { target, name, silent } => {
                let path = recorder.start_race(world, target, name)?;
                (!silent).then(|| format!("Recording client demo: {}", path))
            }
            ConsoleCommand::RaceRecordStop {
                slot,
                silent,
                name,
                elapsed_ms,
            } => {
                let slot = slot_arg(slot)?;
                match recorder.stop_race(world, slot, name, *elapsed_ms) {
                    Ok(path) => (!silent).then(|| format!("Stopped race demo recording: {}", path)),
                    Err(e) => return quiet_unless(*silent, e),
                }
            }
            ConsoleCommand::RaceRecordCancel { slot, silent } => {
                let slot = slot_arg(slot)?;
                match recorder.cancel_race(world, slot) {
                    Ok(path) => (!silent).then(|| format!("Canceled race demo recording: {}", path)),
                    Err(e) => return quiet_unless(*silent, e),
                }
            }
            ConsoleCommand::ServerRecordPurge { max_auto_demos } => {
                let report = recorder.purge_auto_demos(*max_auto_demos)?;
                Some(format!(
                    "Removed {} autorecord demos, {} kept",
                    report.removed.len(),
                    report.kept
                ))
            }
            ConsoleCommand::RaceRecordPurge {
                folder,
                sort_field,
                dedupe,
                max_demos,
            } => {
                if *sort_field != 1 {
                    warn!("racerecordpurge sorts by the time suffix, ignoring sort field {}", sort_field);
                }
                let report = recorder.purge_race_demos(folder, *dedupe, *max_demos)?;
                Some(format!(
                    "Removed {} race demos, {} kept",
                    report.removed.len(),
                    report.kept
                ))
            }
            ConsoleCommand::Connect { name } => {
                let slot = world
                    .connect_client(name)
                    .ok_or_else(|| DemoError::NoQualifyingClient("Server is full".to_string()))?;
                info!("Client {} connected on slot {}", name, slot);
                Some(format!("{} connected on slot {}", name, slot))
            }
            ConsoleCommand::Spawn { slot } => {
                let slot = slot_arg(slot)?;
                if !world.spawn_client(slot) {
                    return Err(DemoError::NoQualifyingClient(format!("Client {} is not active", slot)));
                }
                Some(format!("Client {} spawned", slot))
            }
            ConsoleCommand::Drop { slot } => {
                let slot = slot_arg(slot)?;
                world.disconnect_client(slot);
                Some(format!("Client {} dropped", slot))
            }
            ConsoleCommand::Say { text } => {
                let command = format!("pr \"{}\n\"", text.replace('"', "'"));
                for slot in 0..world.max_clients() {
                    if world.clients[slot].is_spawned() {
                        world.add_game_command(slot, &command);
                    }
                }
                recorder.broadcast_command(&command);
                None
            }
            ConsoleCommand::Client { slot, command } => {
                let slot = slot_arg(slot)?;
                command.execute(recorder, world, slot)?;
                let replies = world
                    .clients
                    .get_mut(slot)
                    .map(|c| std::mem::take(&mut c.outbound_commands))
                    .unwrap_or_default();
                (!replies.is_empty()).then(|| replies.join("\n"))
            }
            ConsoleCommand::Status => Some(status_line(recorder, world)),
            ConsoleCommand::Quit => None,
        };

        Ok(status)
    }
}

fn quiet_unless(silent: bool, e: DemoError) -> DemoResult<Option<String>> {
    match e {
        DemoError::NotRecording(_) if silent => Ok(None),
        e => Err(e),
    }
}

fn status_line(recorder: &DemoRecorder, world: &GameWorld) -> String {
    let server = recorder
        .server_session()
        .map(|s| format!("{} ({} ms)", s.public_path(), s.duration()))
        .unwrap_or_else(|| "idle".to_string());
    let players = world.clients.iter().filter(|c| c.is_spawned()).count();

    format!(
        "map {} frame {} players {} | server demo: {} | race demos: {}",
        world.configstrings.mapname,
        world.framenum,
        players,
        server,
        recorder.active_races()
    )
}
