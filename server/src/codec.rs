//! Demo codec hooks and frame building
//!
//! The recorder never touches the on-disk layout directly. It hands the
//! start-of-demo header, encoded frame messages and the metadata block to a
//! [`DemoCodec`], and asks a [`FrameBuilder`] to turn the entity table into a
//! frame for a recording client.
//!
//! [`BincodeDemoCodec`] stores every record as a little-endian `u32` length
//! followed by a bincode-encoded [`DemoMessage`].

use crate::error::{DemoError, DemoResult};
use crate::metadata::MetadataStore;
use crate::session::RecordingClient;
use shared::{decode_message, encode_message, DemoMessage, Entity, EntityState, Snapshot};
use std::fs::{File, OpenOptions};
use std::io::{self, BufReader, Read, Write};
use std::path::Path;

/// Everything written at the start of a demo
#[derive(Debug, Clone)]
pub struct DemoHeader<'a> {
    pub spawncount: u32,
    pub frame_time: u32,
    pub mapname: &'a str,
    pub bitflags: u8,
    pub purelist: &'a [String],
    pub primary_configstring: &'a str,
    pub baselines: &'a [EntityState],
}

pub trait DemoCodec {
    fn begin_recording(&mut self, out: &mut dyn Write, header: &DemoHeader<'_>) -> DemoResult<()>;

    fn record_message(&mut self, out: &mut dyn Write, message: &[u8]) -> DemoResult<()>;

    fn stop_recording(&mut self, out: &mut dyn Write) -> DemoResult<()>;

    /// Resets the metadata block of a new demo, returning its initial size
    fn clear_metadata(&mut self, metadata: &mut MetadataStore) -> usize {
        metadata.clear()
    }

    /// Appends the metadata block to a closed demo file
    fn write_metadata(&mut self, path: &Path, metadata: &MetadataStore) -> DemoResult<()>;
}

/// Clock values the frame builder stamps into a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameClock {
    pub framenum: u64,
    pub gametime: u64,
}

pub trait FrameBuilder {
    fn build_frame(
        &mut self,
        client: &RecordingClient,
        clock: FrameClock,
        entities: &[Entity],
    ) -> Snapshot;
}

/// Serializes a frame and the pending reliable commands into one message
pub fn encode_frame_message(snapshot: Snapshot, commands: Vec<String>) -> DemoResult<Vec<u8>> {
    Ok(encode_message(&DemoMessage::Frame { snapshot, commands })?)
}

/// Builds frames from every entity that is in use and not flagged `SVF_NOCLIENT`
#[derive(Debug, Default)]
pub struct WorldSnapshotBuilder;

impl FrameBuilder for WorldSnapshotBuilder {
    fn build_frame(
        &mut self,
        client: &RecordingClient,
        clock: FrameClock,
        entities: &[Entity],
    ) -> Snapshot {
        let delta_from = if client.nodelta {
            None
        } else {
            client.latest_frame().map(|frame| frame.frame)
        };

        Snapshot {
            frame: clock.framenum,
            delta_from,
            gametime: clock.gametime,
            multipov: client.multipov,
            viewer: client.entity,
            entities: entities
                .iter()
                .filter(|e| e.in_use && !e.is_hidden())
                .map(Entity::state)
                .collect(),
        }
    }
}

#[derive(Debug, Default)]
pub struct BincodeDemoCodec;

impl BincodeDemoCodec {
    fn write_record(out: &mut dyn Write, message: &DemoMessage) -> DemoResult<()> {
        let payload = encode_message(message)?;
        write_framed(out, &payload).map_err(|e| DemoError::io("write", "<demo>", e))
    }

    /// Reads every record of a finished demo
    pub fn read_demo(path: &Path) -> DemoResult<Vec<DemoMessage>> {
        let file = File::open(path).map_err(|e| DemoError::io("open", path, e))?;
        let mut reader = BufReader::new(file);
        let mut messages = Vec::new();

        loop {
            let mut len = [0u8; 4];
            match reader.read_exact(&mut len) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break,
                Err(e) => return Err(DemoError::io("read", path, e)),
            }

            let mut payload = vec![0u8; u32::from_le_bytes(len) as usize];
            reader
                .read_exact(&mut payload)
                .map_err(|e| DemoError::io("read", path, e))?;
            messages.push(decode_message(&payload)?);
        }

        Ok(messages)
    }

    /// Metadata block of a finished demo, if it has one
    pub fn read_metadata(path: &Path) -> DemoResult<Option<MetadataStore>> {
        let messages = Self::read_demo(path)?;
        Ok(messages.into_iter().rev().find_map(|m| match m {
            DemoMessage::Metadata { data } => Some(MetadataStore::parse(&data)),
            _ => None,
        }))
    }
}

fn write_framed(out: &mut dyn Write, payload: &[u8]) -> io::Result<()> {
    let len = u32::try_from(payload.len())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "demo record too large"))?;
    out.write_all(&len.to_le_bytes())?;
    out.write_all(payload)
}

impl DemoCodec for BincodeDemoCodec {
    fn begin_recording(&mut self, out: &mut dyn Write, header: &DemoHeader<'_>) -> DemoResult<()> {
        Self::write_record(
            out,
            &DemoMessage::ServerData {
                spawncount: header.spawncount,
                frame_time: header.frame_time,
                mapname: header.mapname.to_string(),
                bitflags: header.bitflags,
                purelist: header.purelist.to_vec(),
                primary_configstring: header.primary_configstring.to_string(),
                baselines: header.baselines.to_vec(),
            },
        )
    }

    fn record_message(&mut self, out: &mut dyn Write, message: &[u8]) -> DemoResult<()> {
        write_framed(out, message).map_err(|e| DemoError::io("write", "<demo>", e))
    }

    fn stop_recording(&mut self, out: &mut dyn Write) -> DemoResult<()> {
        Self::write_record(out, &DemoMessage::EndOfDemo)?;
        out.flush().map_err(|e| DemoError::io("flush", "<demo>", e))
    }

    fn write_metadata(&mut self, path: &Path, metadata: &MetadataStore) -> DemoResult<()> {
        let mut file = OpenOptions::new()
            .append(true)
            .open(path)
            .map_err(|e| DemoError::io("open", path, e))?;

        let payload = encode_message(&DemoMessage::Metadata {
            data: metadata.as_bytes().to_vec(),
        })?;
        write_framed(&mut file, &payload).map_err(|e| DemoError::io("write", path, e))
    }
}
