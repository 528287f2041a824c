//! Injected-input timeline and the versioned TAS input file format.
//!
//! The timeline keeps inputs sorted by `(tick, client_id)` with at most one
//! entry per key; lookups are binary searches. The file format is fixed
//! little-endian: a 5-byte magic, a u16 version, a 64-byte zero-padded map
//! name, a u32 input count, then one 18-byte record per input.

use std::cmp::Ordering;

use bytes::{Buf, BufMut, BytesMut};

use crate::sim::{ClientId, PlayerInput, Tick};

/// Magic bytes identifying a TAS input file
pub const FILE_MAGIC: &[u8; 5] = b"TASIF";

/// Current file format version
pub const FILE_VERSION: u16 = 1;

/// Zero-padded map-name field width in the file header
pub const MAP_NAME_LEN: usize = 64;

/// Encoded size of one input record
pub const RECORD_SIZE: usize = 18;

const HEADER_SIZE: usize = 5 + 2 + MAP_NAME_LEN + 4;

/// One scripted input: a `(tick, client_id)` key plus the input payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TasInput {
    pub tick: Tick,
    pub client_id: ClientId,
    pub input: PlayerInput,
}

impl TasInput {
    fn key(&self) -> (Tick, ClientId) {
        (self.tick, self.client_id)
    }
}

impl Ord for TasInput {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key().cmp(&other.key())
    }
}

impl PartialOrd for TasInput {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Sequence of scripted inputs, sorted by `(tick, client_id)`, unique per key
#[derive(Debug, Clone, Default)]
pub struct InputTimeline {
    inputs: Vec<TasInput>,
}

impl InputTimeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sorted insert. Inserting at an existing `(tick, client_id)` key
    /// replaces the previous entry.
    pub fn insert(&mut self, input: TasInput) {
        match self.inputs.binary_search_by_key(&input.key(), TasInput::key) {
            Ok(idx) => self.inputs[idx] = input,
            Err(idx) => self.inputs.insert(idx, input),
        }
    }

    pub fn insert_many(&mut self, inputs: impl IntoIterator<Item = TasInput>) {
        for input in inputs {
            self.insert(input);
        }
    }

    pub fn get(&self, client_id: ClientId, tick: Tick) -> Option<&TasInput> {
        self.inputs
            .binary_search_by_key(&(tick, client_id), TasInput::key)
            .ok()
            .map(|idx| &self.inputs[idx])
    }

    pub fn contains(&self, client_id: ClientId, tick: Tick) -> bool {
        self.get(client_id, tick).is_some()
    }

    /// All inputs scheduled for `tick`, in client-id order
    pub fn at_tick(&self, tick: Tick) -> &[TasInput] {
        let start = self.inputs.partition_point(|i| i.tick < tick);
        let end = self.inputs.partition_point(|i| i.tick <= tick);
        &self.inputs[start..end]
    }

    /// Drop every input with `tick > after`. Used on rewind so inputs from
    /// an abandoned future branch cannot leak into the new one.
    pub fn clear_after_tick(&mut self, after: Tick) {
        self.inputs.truncate(self.inputs.partition_point(|i| i.tick <= after));
    }

    pub fn clear(&mut self) {
        self.inputs.clear();
    }

    pub fn len(&self) -> usize {
        self.inputs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inputs.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &TasInput> {
        self.inputs.iter()
    }

    /// Encode the timeline into the TAS file layout
    pub fn encode(&self, map_name: &str) -> BytesMut {
        let mut buf = BytesMut::with_capacity(HEADER_SIZE + self.inputs.len() * RECORD_SIZE);

        buf.put_slice(FILE_MAGIC);
        buf.put_u16_le(FILE_VERSION);

        let name_bytes = map_name.as_bytes();
        let copied = name_bytes.len().min(MAP_NAME_LEN);
        buf.put_slice(&name_bytes[..copied]);
        buf.put_bytes(0, MAP_NAME_LEN - copied);

        buf.put_u32_le(self.inputs.len() as u32);

        for entry in &self.inputs {
            buf.put_i32_le(entry.tick);
            buf.put_u8(entry.client_id);
            // Direction is -1/0/1; offset by +128 so it fits one unsigned byte
            buf.put_u8((entry.input.direction as i16 + 128) as u8);
            buf.put_i32_le(entry.input.target_x);
            buf.put_i32_le(entry.input.target_y);
            buf.put_u8(entry.input.jump);
            buf.put_u8(entry.input.fire);
            buf.put_u8(entry.input.hook);
            buf.put_u8(entry.input.weapon);
        }

        buf
    }

    /// Decode a TAS file. Returns the stored map name and the timeline.
    /// Nothing is mutated on failure; callers swap the result in themselves.
    pub fn decode(mut data: &[u8]) -> Result<(String, InputTimeline), FileFormatError> {
        let buf = &mut data;

        if buf.remaining() < HEADER_SIZE {
            return Err(FileFormatError::Truncated);
        }

        let mut magic = [0u8; 5];
        buf.copy_to_slice(&mut magic);
        if &magic != FILE_MAGIC {
            return Err(FileFormatError::BadMagic);
        }

        let version = buf.get_u16_le();
        if version != FILE_VERSION {
            return Err(FileFormatError::UnsupportedVersion(version));
        }

        let mut name_bytes = [0u8; MAP_NAME_LEN];
        buf.copy_to_slice(&mut name_bytes);
        let name_end = name_bytes.iter().position(|&b| b == 0).unwrap_or(MAP_NAME_LEN);
        let map_name = String::from_utf8_lossy(&name_bytes[..name_end]).into_owned();

        let count = buf.get_u32_le() as usize;
        if count * RECORD_SIZE != buf.remaining() {
            return Err(FileFormatError::Truncated);
        }

        let mut timeline = InputTimeline::new();
        for _ in 0..count {
            let tick = buf.get_i32_le();
            let client_id = buf.get_u8();
            let direction = (buf.get_u8() as i16 - 128) as i8;
            let target_x = buf.get_i32_le();
            let target_y = buf.get_i32_le();
            let jump = buf.get_u8();
            let fire = buf.get_u8();
            let hook = buf.get_u8();
            let weapon = buf.get_u8();

            timeline.insert(TasInput {
                tick,
                client_id,
                input: PlayerInput {
                    direction,
                    target_x,
                    target_y,
                    jump,
                    fire,
                    hook,
                    weapon,
                },
            });
        }

        Ok((map_name, timeline))
    }
}

/// TAS file decode errors
#[derive(Debug, thiserror::Error)]
pub enum FileFormatError {
    #[error("Not a TAS input file (bad magic)")]
    BadMagic,

    #[error("Unsupported TAS file version {0}")]
    UnsupportedVersion(u16),

    #[error("TAS file is truncated or has a bad input count")]
    Truncated,
}
