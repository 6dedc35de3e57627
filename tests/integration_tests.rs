//! Integration tests for the demo recorder
//!
//! These tests drive the public APIs of the `server` and `shared` crates
//! together against real scratch directories.

use server::codec::BincodeDemoCodec;
use server::commands::ConsoleCommand;
use server::config::DemoConfig;
use server::error::DemoError;
use server::filename::{decode_elapsed, encode_elapsed, sanitize};
use server::recorder::DemoRecorder;
use server::retention::{list_demos, purge_auto_demos, purge_race_demos};
use shared::{DemoMessage, GameWorld, SVF_NOCLIENT};
use std::fs;
use std::path::Path;
use tokio_test::assert_ok;

fn world_with_players(names: &[&str]) -> GameWorld {
    let mut world = GameWorld::new("wdm1", 8);
    world.configstrings.hostname = "Test Host".to_string();
    world.configstrings.gametype = "race".to_string();
    for name in names {
        let slot = world.connect_client(name).unwrap();
        world.spawn_client(slot);
    }
    world
}

fn touch(dir: &Path, names: &[&str]) {
    fs::create_dir_all(dir).unwrap();
    for name in names {
        fs::write(dir.join(name), b"demo").unwrap();
    }
}

/// SESSION LIFECYCLE TESTS
mod lifecycle_tests {
    use super::*;

    /// One visible player, two frames a second apart, then a commit
    #[test]
    fn server_demo_full_lifecycle() {
        let dir = tempfile::tempdir().unwrap();
        let mut recorder = DemoRecorder::new(DemoConfig::new(dir.path(), 8));
        let mut world = world_with_players(&["alice"]);

        let path = assert_ok!(recorder.start_server(&mut world, "final"));
        let temp = dir.path().join(recorder.server_session().unwrap().temp_path());
        let public = dir.path().join(&path);
        assert!(temp.exists());
        assert!(!public.exists());

        recorder.write_snaps(&mut world);
        assert_eq!(recorder.server_session().unwrap().duration(), 0);

        world.run_frame(1000);
        recorder.write_snaps(&mut world);
        assert_eq!(recorder.server_session().unwrap().duration(), 1000);

        assert_ok!(recorder.stop_server(&world, false));
        assert!(!temp.exists());
        assert!(public.exists());

        let meta = BincodeDemoCodec::read_metadata(&public).unwrap().unwrap();
        assert_eq!(meta.get("multipov"), Some("1"));
        assert_eq!(meta.get("duration"), Some("1"));
        assert_eq!(meta.get("hostname"), Some("Test Host"));
        assert_eq!(meta.get("gametype"), Some("race"));
        assert_eq!(meta.get("mapname"), Some("wdm1"));
    }

    /// The file holds a header, a keyframe first, deltas after, then the end marker
    #[test]
    fn server_demo_file_shape() {
        let dir = tempfile::tempdir().unwrap();
        let mut recorder = DemoRecorder::new(DemoConfig::new(dir.path(), 8));
        let mut world = world_with_players(&["alice", "bob"]);

        let path = recorder.start_server(&mut world, "shape").unwrap();
        for _ in 0..5 {
            world.run_frame(50);
            recorder.write_snaps(&mut world);
        }
        recorder.stop_server(&world, false).unwrap();

        let messages = BincodeDemoCodec::read_demo(&dir.path().join(path)).unwrap();
        assert!(matches!(messages.first(), Some(DemoMessage::ServerData { .. })));
        assert!(matches!(messages.last(), Some(DemoMessage::Metadata { .. })));
        assert_eq!(messages[messages.len() - 2], DemoMessage::EndOfDemo);

        let frames: Vec<_> = messages
            .iter()
            .filter_map(|m| match m {
                DemoMessage::Frame { snapshot, .. } => Some(snapshot),
                _ => None,
            })
            .collect();
        assert_eq!(frames.len(), 6);
        assert_eq!(frames[0].delta_from, None);
        for pair in frames.windows(2) {
            assert_eq!(pair[1].delta_from, Some(pair[0].frame));
        }
        assert!(frames.iter().all(|f| f.multipov && f.entities.len() == 3));
    }

    #[test]
    fn cancel_never_publishes() {
        let dir = tempfile::tempdir().unwrap();
        let mut recorder = DemoRecorder::new(DemoConfig::new(dir.path(), 8));
        let mut world = world_with_players(&["alice"]);

        let path = recorder.start_server(&mut world, "scrap").unwrap();
        world.run_frame(50);
        recorder.write_snaps(&mut world);
        recorder.stop_server(&world, true).unwrap();

        assert!(!dir.path().join(&path).exists());
        assert!(!dir.path().join(format!("{}.rec", path)).exists());
        assert!(list_demos(&dir.path().join("demos/server"), ".wdz20").unwrap().is_empty());
    }

    #[test]
    fn already_recording_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        let mut recorder = DemoRecorder::new(DemoConfig::new(dir.path(), 8));
        let mut world = world_with_players(&["alice"]);

        recorder.start_server(&mut world, "first").unwrap();
        world.run_frame(300);
        recorder.write_snaps(&mut world);

        let err = recorder.start_server(&mut world, "second").unwrap_err();
        assert!(matches!(err, DemoError::AlreadyRecording));

        let session = recorder.server_session().unwrap();
        assert_eq!(session.public_path(), "demos/server/first.wdz20");
        assert_eq!(session.duration(), 300);
        assert_eq!(session.client().last_frame, world.framenum);
        assert!(!dir.path().join("demos/server/second.wdz20.rec").exists());
    }

    /// Race demo on a client that never spawned fails and leaves no file
    #[test]
    fn race_record_on_unspawned_client() {
        let dir = tempfile::tempdir().unwrap();
        let mut recorder = DemoRecorder::new(DemoConfig::new(dir.path(), 8));
        let mut world = world_with_players(&["alice"]);
        let late = world.connect_client("late").unwrap();

        let err = recorder.start_race(&mut world, &late.to_string(), "run").unwrap_err();
        assert!(matches!(err, DemoError::NoQualifyingClient(_)));
        assert!(recorder.race_session(late).is_none());
        assert!(!dir.path().join("demos").exists());
    }

    /// A spawned but hidden client cannot be recorded either
    #[test]
    fn race_record_on_hidden_client() {
        let dir = tempfile::tempdir().unwrap();
        let mut recorder = DemoRecorder::new(DemoConfig::new(dir.path(), 8));
        let mut world = world_with_players(&["alice"]);
        world.entities[1].svflags |= SVF_NOCLIENT;

        let err = recorder.start_race(&mut world, "alice", "run").unwrap_err();
        assert_eq!(err.to_string(), "Player not in game, can't record a demo");
    }
}

/// RACE DEMO TESTS
mod race_tests {
    use super::*;

    /// A race demo only shows its viewer and what the viewer owns
    #[test]
    fn race_demo_filters_other_players() {
        let dir = tempfile::tempdir().unwrap();
        let mut recorder = DemoRecorder::new(DemoConfig::new(dir.path(), 8));
        let mut world = world_with_players(&["alice", "bob", "carol"]);
        let alice_rocket = world.spawn_entity(Some(1), 10.0, 10.0).unwrap();
        let bob_rocket = world.spawn_entity(Some(2), 20.0, 20.0).unwrap();
        let item = world.spawn_entity(None, 30.0, 30.0).unwrap();
        world.entities[item as usize].svflags = 0x40;
        let flags_before: Vec<u32> = world.entities.iter().map(|e| e.svflags).collect();

        recorder.start_race(&mut world, "alice", "run").unwrap();
        for _ in 0..3 {
            world.run_frame(50);
            recorder.write_snaps(&mut world);
            let flags_now: Vec<u32> = world.entities.iter().map(|e| e.svflags).collect();
            assert_eq!(flags_now, flags_before);
        }
        let path = recorder.stop_race(&world, 0, "alice", 150).unwrap();

        let messages = BincodeDemoCodec::read_demo(&dir.path().join(path)).unwrap();
        for message in &messages {
            if let DemoMessage::Frame { snapshot, .. } = message {
                let numbers: Vec<u32> = snapshot.entities.iter().map(|e| e.number).collect();
                assert_eq!(numbers, vec![0, 1, alice_rocket, item]);
                assert!(!numbers.contains(&bob_rocket));
                assert!(!snapshot.multipov);
                assert_eq!(snapshot.viewer, Some(1));
            }
        }
    }

    /// Server and race demos record side by side without interfering
    #[test]
    fn concurrent_server_and_race_demos() {
        let dir = tempfile::tempdir().unwrap();
        let mut recorder = DemoRecorder::new(DemoConfig::new(dir.path(), 8));
        let mut world = world_with_players(&["alice", "bob"]);

        recorder.start_server(&mut world, "match").unwrap();
        recorder.start_race(&mut world, "0", "a").unwrap();
        recorder.start_race(&mut world, "1", "b").unwrap();

        for _ in 0..4 {
            world.run_frame(250);
            assert_eq!(recorder.write_snaps(&mut world), 3);
        }

        let bob = recorder.stop_race(&world, 1, "bob", 1000).unwrap();
        assert_eq!(bob, "demos/server/wdm1/wdm1_bob_00-01-000.wdz20");
        assert!(recorder.race_session(0).is_some());
        assert!(recorder.server_session().is_some());

        let meta = BincodeDemoCodec::read_metadata(&dir.path().join(&bob)).unwrap().unwrap();
        assert_eq!(meta.get("matchname"), Some("bob"));
        assert_eq!(meta.get("matchscore"), Some("00-01-000"));
        assert_eq!(meta.get("multipov"), Some("0"));
        assert_eq!(meta.get("duration"), Some("1"));
    }

    /// The viewer dropping mid-race cancels only that race
    #[test]
    fn viewer_disconnect_cancels_race() {
        let dir = tempfile::tempdir().unwrap();
        let mut recorder = DemoRecorder::new(DemoConfig::new(dir.path(), 8));
        let mut world = world_with_players(&["alice", "bob"]);

        recorder.start_server(&mut world, "match").unwrap();
        recorder.start_race(&mut world, "bob", "run").unwrap();
        world.disconnect_client(1);
        world.run_frame(50);

        assert_eq!(recorder.write_snaps(&mut world), 1);
        assert!(recorder.race_session(1).is_none());
        assert!(recorder.server_session().is_some());
        let folder = dir.path().join("demos/server/wdm1");
        let leftovers: Vec<_> = fs::read_dir(&folder).unwrap().collect();
        assert!(leftovers.is_empty());
    }

    /// Committing race demos keeps each player's best runs only
    #[test]
    fn race_commit_purges_map_folder() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = DemoConfig::new(dir.path(), 8);
        config.race_purge_max = 2;
        let mut recorder = DemoRecorder::new(config);
        let mut world = world_with_players(&["alice", "bob"]);

        for (slot, name, time) in [
            (0, "alice", 30_000),
            (0, "alice", 25_000),
            (1, "bob", 27_000),
            (1, "bob", 40_000),
        ] {
            recorder.start_race(&mut world, &slot.to_string(), "run").unwrap();
            recorder.stop_race(&world, slot, name, time).unwrap();
        }

        let left = list_demos(&dir.path().join("demos/server/wdm1"), ".wdz20").unwrap();
        assert_eq!(
            left,
            vec!["wdm1_alice_00-25-000.wdz20", "wdm1_bob_00-27-000.wdz20"]
        );
    }
}

/// RETENTION TESTS
mod retention_tests {
    use super::*;

    #[test]
    fn purge_auto_demos_leaves_min_of_count_and_max() {
        for max in [0usize, 2, 5, 10] {
            let dir = tempfile::tempdir().unwrap();
            let names: Vec<String> = (1..=5).map(|i| format!("170000000{}_wdm1_auto{:04}.wdz20", i, i)).collect();
            let refs: Vec<&str> = names.iter().map(String::as_str).collect();
            touch(dir.path(), &refs);
            touch(dir.path(), &["keepme.wdz20"]);

            purge_auto_demos(dir.path(), ".wdz20", max).unwrap();
            let left = list_demos(dir.path(), ".wdz20").unwrap();
            let autos = left.iter().filter(|n| n.contains("_auto")).count();
            assert_eq!(autos, max.min(5));
            assert!(left.contains(&"keepme.wdz20".to_string()));
        }
    }

    #[test]
    fn purge_race_dedupe_keeps_lower_key() {
        let dir = tempfile::tempdir().unwrap();
        touch(
            dir.path(),
            &["wdm1_Bob_01-00-000.wdz20", "wdm1_bob_00-59-999.wdz20"],
        );

        purge_race_demos(dir.path(), ".wdz20", true, 0).unwrap();
        let left = list_demos(dir.path(), ".wdz20").unwrap();
        assert_eq!(left, vec!["wdm1_bob_00-59-999.wdz20"]);
    }

    #[test]
    fn console_purge_commands() {
        let dir = tempfile::tempdir().unwrap();
        let mut recorder = DemoRecorder::new(DemoConfig::new(dir.path(), 8));
        let mut world = world_with_players(&["alice"]);
        touch(
            &dir.path().join("demos/server"),
            &["1_wdm1_auto0001.wdz20", "2_wdm1_auto0002.wdz20"],
        );
        touch(
            &dir.path().join("demos/server/wdm1"),
            &["wdm1_a_00-01-000.wdz20", "wdm1_a_00-02-000.wdz20", "wdm1_b_00-03-000.wdz20"],
        );

        let status = ConsoleCommand::parse("serverrecordpurge 1")
            .unwrap()
            .unwrap()
            .execute(&mut recorder, &mut world)
            .unwrap();
        assert_eq!(status.as_deref(), Some("Removed 1 autorecord demos, 1 kept"));

        let status = ConsoleCommand::parse("racerecordpurge wdm1 1 1 1")
            .unwrap()
            .unwrap()
            .execute(&mut recorder, &mut world)
            .unwrap();
        assert_eq!(status.as_deref(), Some("Removed 2 race demos, 1 kept"));
        let left = list_demos(&dir.path().join("demos/server/wdm1"), ".wdz20").unwrap();
        assert_eq!(left, vec!["wdm1_a_00-01-000.wdz20"]);
    }
}

/// NAMING TESTS
mod naming_tests {
    use super::*;

    #[test]
    fn sanitize_properties() {
        let inputs = [
            "plain",
            "with space",
            "a\"b*c/d:e?f\\g.h|i",
            "<tag>",
            "ctl\x01\x1f\x7fchars",
            "unicode ✓ name",
            "",
        ];
        for input in inputs {
            let clean = sanitize(input);
            assert!(!clean.chars().any(|c| (c as u32) < 0x20 || c == '\x7f'));
            assert!(!clean.chars().any(|c| "\"*/:?\\.| ".contains(c)));
            assert_eq!(sanitize(&clean), clean);
        }
        assert_eq!(sanitize("<tag>"), "(tag)");
    }

    #[test]
    fn elapsed_round_trip_under_an_hour() {
        assert_eq!(encode_elapsed(0), "00-00-000");
        assert_eq!(encode_elapsed(61_234), "01-01-234");

        for ms in (0..3_600_000u64).step_by(7_919) {
            assert_eq!(decode_elapsed(&encode_elapsed(ms)), ms);
        }
        assert_eq!(decode_elapsed(&encode_elapsed(3_599_999)), 3_599_999);
    }
}

/// CLIENT DIRECTORY TESTS
mod directory_tests {
    use super::*;

    #[tokio::test]
    async fn client_lists_and_fetches_race_demos() {
        let dir = tempfile::tempdir().unwrap();
        let mut recorder = DemoRecorder::new(DemoConfig::new(dir.path(), 8));
        let mut world = world_with_players(&["alice"]);

        recorder.start_race(&mut world, "alice", "run").unwrap();
        world.run_frame(50);
        recorder.write_snaps(&mut world);
        recorder.stop_race(&world, 0, "alice", 12_345).unwrap();

        let list = ConsoleCommand::parse("client 0 demolist")
            .unwrap()
            .unwrap()
            .execute(&mut recorder, &mut world)
            .unwrap()
            .unwrap();
        assert_eq!(
            list,
            "pr \"Available demos:\n----------------\n1: wdm1_alice_00-12-345\n\""
        );

        let get = ConsoleCommand::parse("client 0 demoget .")
            .unwrap()
            .unwrap()
            .execute(&mut recorder, &mut world)
            .unwrap()
            .unwrap();
        assert_eq!(get, "demoget \"demos/server/wdm1/wdm1_alice_00-12-345.wdz20\"");
        assert!(server::directory::is_download_request(
            recorder.config(),
            "demos/server/wdm1/wdm1_alice_00-12-345.wdz20"
        ));
    }
}
