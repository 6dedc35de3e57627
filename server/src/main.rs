use clap::Parser;
use log::{error, info, warn};
use rand::Rng;
use server::commands::ConsoleCommand;
use server::config::{DemoConfig, DEFAULT_DEMO_EXTENSION, DEFAULT_RACE_PURGE_MAX};
use server::recorder::DemoRecorder;
use shared::{GameWorld, SVF_PROJECTILE};
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::time::{interval, Duration, MissedTickBehavior};

#[derive(Parser, Debug)]
#[command(author, version, about = "Game server with demo recording")]
struct Args {
    /// Directory that holds the demos/ tree
    #[arg(short, long, default_value = ".")]
    base_dir: PathBuf,

    /// Subdirectory below demos/server
    #[arg(long, default_value = "")]
    demo_subdir: String,

    /// Maximum number of client slots
    #[arg(short, long, default_value = "8")]
    max_clients: usize,

    /// Demo file extension, including the dot
    #[arg(long, default_value = DEFAULT_DEMO_EXTENSION)]
    extension: String,

    /// Server ticks per second
    #[arg(short, long, default_value = "20")]
    tick_rate: u32,

    /// Simulated players spawned at startup
    #[arg(long, default_value = "2")]
    bots: usize,

    /// Map name
    #[arg(long, default_value = "wdm1")]
    map: String,

    /// Start a server demo as soon as a player is in game
    #[arg(short, long)]
    autorecord: bool,

    /// Autodemos kept after each autorecord, 0 keeps all
    #[arg(long, default_value = "0")]
    max_auto_demos: usize,

    /// Race demos kept per map after each committed race demo
    #[arg(long, default_value_t = DEFAULT_RACE_PURGE_MAX)]
    race_purge_max: usize,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args = Args::parse();

    let mut config = DemoConfig::new(args.base_dir, args.max_clients);
    config.demo_subdir = args.demo_subdir;
    config.demo_extension = args.extension;
    config.max_auto_demos = args.max_auto_demos;
    config.race_purge_max = args.race_purge_max;
    config.autorecord = args.autorecord;

    let mut world = GameWorld::new(&args.map, args.max_clients);
    world.configstrings.hostname = "demo-server".to_string();
    world.snap_frame_time = 1000 / args.tick_rate.max(1);
    spawn_bots(&mut world, args.bots);

    let mut recorder = DemoRecorder::new(config);
    info!(
        "Server running map {} at {} Hz with {} bots",
        args.map, args.tick_rate, args.bots
    );

    run_loop(&mut recorder, &mut world, args.tick_rate).await;

    for result in recorder.shutdown(&world) {
        match result {
            Ok(path) => info!("Saved demo {}", path),
            Err(e) => error!("Failed to save demo on shutdown: {}", e),
        }
    }
    Ok(())
}

async fn run_loop(recorder: &mut DemoRecorder, world: &mut GameWorld, tick_rate: u32) {
    let frame_ms = u64::from(world.snap_frame_time);
    let mut ticker = interval(Duration::from_secs_f32(1.0 / tick_rate.max(1) as f32));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                world.run_frame(frame_ms);
                fire_projectiles(world);

                if recorder.config().autorecord && recorder.server_session().is_none() && world.has_visible_player() {
                    if let Err(e) = recorder.start_auto_record(world) {
                        warn!("Autorecord failed: {}", e);
                    }
                }
                recorder.write_snaps(world);
            }
            line = lines.next_line(), if stdin_open => {
                match line {
                    Ok(Some(line)) => {
                        if handle_line(&line, recorder, world) {
                            break;
                        }
                    }
                    Ok(None) => stdin_open = false,
                    Err(e) => {
                        error!("Failed to read console: {}", e);
                        stdin_open = false;
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl+C, shutting down");
                break;
            }
        }
    }
}

/// Runs one console line, returning true when the server should exit
fn handle_line(line: &str, recorder: &mut DemoRecorder, world: &mut GameWorld) -> bool {
    let command = match ConsoleCommand::parse(line) {
        Ok(Some(command)) => command,
        Ok(None) => return false,
        Err(e) => {
            println!("{}", e);
            return false;
        }
    };

    if command == ConsoleCommand::Quit {
        return true;
    }

    match command.execute(recorder, world) {
        Ok(Some(status)) => println!("{}", status),
        Ok(None) => {}
        Err(e) => println!("{}", e),
    }
    false
}

fn spawn_bots(world: &mut GameWorld, count: usize) {
    let mut rng = rand::thread_rng();
    for i in 0..count {
        let Some(slot) = world.connect_client(&format!("bot{}", i)) else {
            warn!("No free slot for bot {}", i);
            break;
        };
        world.spawn_client(slot);

        let number = GameWorld::player_entity(slot) as usize;
        let entity = &mut world.entities[number];
        entity.vel_x = rng.gen_range(-150.0..150.0);
        entity.vel_y = rng.gen_range(-150.0..150.0);
    }
}

/// Now and then a bot fires a short-lived projectile it owns
fn fire_projectiles(world: &mut GameWorld) {
    let mut rng = rand::thread_rng();

    for entity in world.entities.iter_mut() {
        if entity.svflags & SVF_PROJECTILE != 0 && rng.gen_bool(0.05) {
            entity.in_use = false;
            entity.owner = None;
            entity.svflags = 0;
        }
    }

    for slot in 0..world.max_clients() {
        if !world.clients[slot].is_spawned() || !rng.gen_bool(0.02) {
            continue;
        }
        let owner = GameWorld::player_entity(slot);
        let (x, y) = {
            let player = &world.entities[owner as usize];
            (player.x, player.y)
        };
        if let Some(number) = world.spawn_entity(Some(owner), x, y) {
            let projectile = &mut world.entities[number as usize];
            projectile.svflags |= SVF_PROJECTILE;
            projectile.vel_x = rng.gen_range(-400.0..400.0);
            projectile.vel_y = rng.gen_range(-400.0..400.0);
        }
    }
}
