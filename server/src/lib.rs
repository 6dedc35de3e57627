//! # Demo Recorder Library
//!
//! Server-side demo recording and retention for a real-time multiplayer game
//! server. It captures the per-frame snapshot stream to disk in two modes: one
//! server-wide "multipov" demo, and up to one race demo per client slot, each
//! filtered to exactly one player's point of view.
//!
//! ## Core Responsibilities
//!
//! ### Transactional File Lifecycle
//! A demo is written under a `.rec` temporary name and renamed to its public
//! name only after the end marker and metadata block are written. Cancelled
//! demos are deleted, so nothing half-written ever appears under a public name.
//!
//! ### Per-Viewer Filtering
//! Race demos hide every other player and everything those players own. The
//! entity visibility flags are saved before each race frame is built and put
//! back afterwards on every path, including panics.
//!
//! ### Retention
//! Autodemos are capped by count. Race demos are ranked by the elapsed time in
//! their names, deduplicated per player and capped per map.
//!
//! ## Module Organization
//!
//! ### Recorder Module (`recorder`)
//! The registry owning the server session and the per-slot race sessions.
//!
//! ### Session Module (`session`)
//! One recording: temp file, timing, the synthetic recording client and the
//! commit/cancel paths.
//!
//! ### Codec Module (`codec`)
//! The hooks the recorder writes through, plus the bincode reference codec and
//! the reference frame builder.
//!
//! ### Supporting Modules
//! - `visibility`: save/apply/restore of entity visibility flags
//! - `filename`: name sanitization, path validation, elapsed-time strings
//! - `metadata`: the `key\0value\0` block appended to committed demos
//! - `retention`: autodemo and race demo purge passes
//! - `directory`: `demolist`/`demoget` replies and download checks
//! - `commands`: console and client command parsing and dispatch
//!
//! ## Threading
//!
//! Everything runs on the server tick or inside a synchronously dispatched
//! command. File I/O is blocking. A failure in one session only ends that
//! session.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::config::DemoConfig;
//! use server::recorder::DemoRecorder;
//! use shared::GameWorld;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut world = GameWorld::new("wdm1", 8);
//!     let slot = world.connect_client("player").unwrap_or(0);
//!     world.spawn_client(slot);
//!
//!     let mut recorder = DemoRecorder::new(DemoConfig::new(".", 8));
//!     recorder.start_server(&mut world, "match")?;
//!
//!     for _ in 0..20 {
//!         world.run_frame(50);
//!         recorder.write_snaps(&mut world);
//!     }
//!
//!     recorder.stop_server(&world, false)?;
//!     Ok(())
//! }
//! ```

pub mod codec;
pub mod commands;
pub mod config;
pub mod directory;
pub mod error;
pub mod filename;
pub mod metadata;
pub mod recorder;
pub mod retention;
pub mod session;
pub mod visibility;
