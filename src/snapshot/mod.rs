//! Full simulation state captured at one tick.
//!
//! A snapshot is immutable once built. It records every character, projectile,
//! laser, switcher gate, and team aggregate, plus the world-pause flag, and
//! can put all of that back into a live simulation. An order-dependent
//! rotate-and-xor hash over character kinematics gives a cheap equivalence
//! pre-check for idle-range detection.

use std::mem;

use bytes::{Buf, BufMut, BytesMut};
use tracing::warn;

use crate::sim::{
    CharacterState, ClientId, LaserState, ProjectileState, Simulation, SwitcherState, TeamState,
    Tick, MAX_CLIENTS, TEE_BLOB_MAX,
};

/// Tolerance for position/velocity comparison in [`TasSnapshot::is_equivalent`]
pub const EQUIVALENCE_EPSILON: f32 = 0.001;

/// Complete captured simulation state at one tick
#[derive(Debug, Clone, Default)]
pub struct TasSnapshot {
    pub tick: Tick,
    pub is_keyframe: bool,
    pub state_hash: u32,
    pub world_paused: bool,
    pub characters: Vec<CharacterState>,
    pub projectiles: Vec<ProjectileState>,
    pub lasers: Vec<LaserState>,
    pub switchers: Vec<SwitcherState>,
    pub team_states: Vec<TeamState>,
}

/// Outcome of a restore: how many characters were loaded and which client
/// slots had to be skipped because no live player occupies them anymore
#[derive(Debug, Clone, Default)]
pub struct RestoreReport {
    pub restored: usize,
    pub skipped: Vec<ClientId>,
}

impl RestoreReport {
    /// True when at least one referenced client slot was disconnected
    pub fn is_partial(&self) -> bool {
        !self.skipped.is_empty()
    }
}

impl TasSnapshot {
    /// Capture the entire simulation state at the current tick
    pub fn capture<S: Simulation + ?Sized>(sim: &S) -> Self {
        let mut characters = Vec::new();
        for slot in 0..MAX_CLIENTS {
            if let Some(state) = sim.capture_character(slot as ClientId) {
                characters.push(state);
            }
        }

        let mut snapshot = Self {
            tick: sim.current_tick(),
            is_keyframe: false,
            state_hash: 0,
            world_paused: sim.world_paused(),
            characters,
            projectiles: sim.projectiles(),
            lasers: sim.lasers(),
            switchers: sim.switchers(),
            team_states: sim.team_states(),
        };
        snapshot.state_hash = snapshot.compute_hash();
        snapshot
    }

    /// Put the captured state back into the live simulation.
    ///
    /// Destroys all dynamic entities, recreates them from stored state, and
    /// spawns/kills characters to match recorded aliveness. A character whose
    /// client slot no longer has a live player is skipped; the restore
    /// continues and the slot is reported in the returned [`RestoreReport`].
    pub fn restore<S: Simulation + ?Sized>(&self, sim: &mut S) -> RestoreReport {
        let mut report = RestoreReport::default();

        sim.clear_dynamic_entities();

        for state in &self.characters {
            if !sim.is_client_connected(state.client_id) {
                warn!(
                    client_id = state.client_id,
                    tick = self.tick,
                    "Skipping restore for disconnected client slot"
                );
                report.skipped.push(state.client_id);
                continue;
            }

            if state.alive {
                if sim.capture_character(state.client_id).is_none()
                    && !sim.spawn_character(state.client_id, state.pos)
                {
                    report.skipped.push(state.client_id);
                    continue;
                }
                if sim.restore_character(state) {
                    report.restored += 1;
                } else {
                    report.skipped.push(state.client_id);
                }
            } else {
                sim.kill_character(state.client_id);
                report.restored += 1;
            }
        }

        // Characters alive now but absent from the snapshot were spawned
        // after the captured tick; kill them to match recorded aliveness.
        for slot in 0..MAX_CLIENTS {
            let client_id = slot as ClientId;
            if sim.capture_character(client_id).is_some()
                && !self.characters.iter().any(|c| c.client_id == client_id)
            {
                sim.kill_character(client_id);
            }
        }

        for state in &self.projectiles {
            sim.spawn_projectile(state);
        }
        for state in &self.lasers {
            sim.spawn_laser(state);
        }

        sim.restore_switchers(&self.switchers);
        sim.set_world_paused(self.world_paused);

        report
    }

    /// Order-dependent rotate-and-xor mix over character kinematics and
    /// dynamic entity counts
    pub fn compute_hash(&self) -> u32 {
        let mut hash: u32 = 0;

        for chr in &self.characters {
            hash ^= ((chr.pos.x * 100.0) as i32 as u32) << 16;
            hash ^= (chr.pos.y * 100.0) as i32 as u32;
            hash ^= ((chr.vel.x * 100.0) as i32 as u32) << 8;
            hash ^= ((chr.vel.y * 100.0) as i32 as u32) << 24;
            hash = hash.rotate_left(5);
        }

        hash ^= (self.projectiles.len() as u32) << 16;
        hash ^= self.lasers.len() as u32;

        hash
    }

    /// Loose equality used for idle-range detection: same characters in the
    /// same slots with positions and velocities within
    /// [`EQUIVALENCE_EPSILON`], and matching dynamic entity counts.
    ///
    /// This is not a full-state equality law; it only decides whether a tick
    /// is worth storing.
    pub fn is_equivalent(&self, other: &TasSnapshot) -> bool {
        if self.state_hash != other.state_hash {
            return false;
        }

        if self.characters.len() != other.characters.len() {
            return false;
        }

        for (a, b) in self.characters.iter().zip(other.characters.iter()) {
            if a.client_id != b.client_id || a.alive != b.alive {
                return false;
            }
            if (a.pos.x - b.pos.x).abs() > EQUIVALENCE_EPSILON
                || (a.pos.y - b.pos.y).abs() > EQUIVALENCE_EPSILON
            {
                return false;
            }
            if (a.vel.x - b.vel.x).abs() > EQUIVALENCE_EPSILON
                || (a.vel.y - b.vel.y).abs() > EQUIVALENCE_EPSILON
            {
                return false;
            }
        }

        self.projectiles.len() == other.projectiles.len()
            && self.lasers.len() == other.lasers.len()
    }

    /// Rough memory footprint for eviction accounting. The tee blob is
    /// charged at its bounded maximum, not its actual length.
    pub fn approximate_size(&self) -> usize {
        let mut size = mem::size_of::<TasSnapshot>();

        size += self.characters.len() * (mem::size_of::<CharacterState>() + TEE_BLOB_MAX);
        size += self.projectiles.len() * mem::size_of::<ProjectileState>();
        size += self.lasers.len() * mem::size_of::<LaserState>();

        for switcher in &self.switchers {
            size += mem::size_of::<SwitcherState>();
            size += switcher.status.len() * mem::size_of::<bool>();
            size += switcher.end_tick.len() * mem::size_of::<Tick>();
            size += switcher.kind.len() * mem::size_of::<i32>();
            size += switcher.last_update_tick.len() * mem::size_of::<Tick>();
        }

        size += self.team_states.len() * mem::size_of::<TeamState>();

        size
    }

    /// Serialize to a little-endian binary buffer.
    ///
    /// Layout: header (tick i32, keyframe u8, hash u32, paused u8), then a
    /// u32 count followed by records for characters, projectiles, and lasers.
    /// Character records end with a u32 blob length plus the blob bytes.
    pub fn save_to_buffer(&self, buf: &mut BytesMut) {
        buf.put_i32_le(self.tick);
        buf.put_u8(self.is_keyframe as u8);
        buf.put_u32_le(self.state_hash);
        buf.put_u8(self.world_paused as u8);

        buf.put_u32_le(self.characters.len() as u32);
        for chr in &self.characters {
            buf.put_u8(chr.client_id);
            buf.put_u8(chr.alive as u8);
            buf.put_f32_le(chr.pos.x);
            buf.put_f32_le(chr.pos.y);
            buf.put_f32_le(chr.vel.x);
            buf.put_f32_le(chr.vel.y);
            buf.put_u8(chr.super_mode as u8);
            buf.put_u8(chr.invincible as u8);
            buf.put_u32_le(chr.tee_blob.len() as u32);
            buf.put_slice(&chr.tee_blob);
        }

        buf.put_u32_le(self.projectiles.len() as u32);
        for proj in &self.projectiles {
            buf.put_i32_le(proj.kind);
            buf.put_i32_le(proj.owner);
            buf.put_f32_le(proj.pos.x);
            buf.put_f32_le(proj.pos.y);
            buf.put_f32_le(proj.dir.x);
            buf.put_f32_le(proj.dir.y);
            buf.put_i32_le(proj.life_span);
            buf.put_i32_le(proj.start_tick);
            buf.put_u8(proj.explosive as u8);
            buf.put_u8(proj.freeze as u8);
        }

        buf.put_u32_le(self.lasers.len() as u32);
        for laser in &self.lasers {
            buf.put_i32_le(laser.owner);
            buf.put_f32_le(laser.from.x);
            buf.put_f32_le(laser.from.y);
            buf.put_f32_le(laser.to.x);
            buf.put_f32_le(laser.to.y);
            buf.put_f32_le(laser.dir.x);
            buf.put_f32_le(laser.dir.y);
            buf.put_i32_le(laser.eval_tick);
            buf.put_f32_le(laser.energy);
            buf.put_i32_le(laser.bounces);
            buf.put_i32_le(laser.kind);
        }
    }

    /// Deserialize a buffer produced by [`TasSnapshot::save_to_buffer`].
    ///
    /// Switcher and team state are not part of the buffer layout; the
    /// returned snapshot has empty tables for both.
    pub fn load_from_buffer(mut data: &[u8]) -> Result<Self, CodecError> {
        let buf = &mut data;

        let tick = get_i32(buf)?;
        let is_keyframe = get_u8(buf)? != 0;
        let state_hash = get_u32(buf)?;
        let world_paused = get_u8(buf)? != 0;

        let char_count = get_count(buf, 22)?;
        let mut characters = Vec::with_capacity(char_count);
        for _ in 0..char_count {
            let client_id = get_u8(buf)?;
            let alive = get_u8(buf)? != 0;
            let pos = get_vec2(buf)?;
            let vel = get_vec2(buf)?;
            let super_mode = get_u8(buf)? != 0;
            let invincible = get_u8(buf)? != 0;

            let blob_len = get_u32(buf)? as usize;
            if blob_len > TEE_BLOB_MAX {
                return Err(CodecError::BlobTooLarge(blob_len));
            }
            if buf.remaining() < blob_len {
                return Err(CodecError::Truncated);
            }
            let mut tee_blob = vec![0u8; blob_len];
            buf.copy_to_slice(&mut tee_blob);

            characters.push(CharacterState {
                client_id,
                alive,
                pos,
                vel,
                super_mode,
                invincible,
                tee_blob,
            });
        }

        let proj_count = get_count(buf, 34)?;
        let mut projectiles = Vec::with_capacity(proj_count);
        for _ in 0..proj_count {
            projectiles.push(ProjectileState {
                kind: get_i32(buf)?,
                owner: get_i32(buf)?,
                pos: get_vec2(buf)?,
                dir: get_vec2(buf)?,
                life_span: get_i32(buf)?,
                start_tick: get_i32(buf)?,
                explosive: get_u8(buf)? != 0,
                freeze: get_u8(buf)? != 0,
            });
        }

        let laser_count = get_count(buf, 44)?;
        let mut lasers = Vec::with_capacity(laser_count);
        for _ in 0..laser_count {
            lasers.push(LaserState {
                owner: get_i32(buf)?,
                from: get_vec2(buf)?,
                to: get_vec2(buf)?,
                dir: get_vec2(buf)?,
                eval_tick: get_i32(buf)?,
                energy: get_f32(buf)?,
                bounces: get_i32(buf)?,
                kind: get_i32(buf)?,
            });
        }

        Ok(Self {
            tick,
            is_keyframe,
            state_hash,
            world_paused,
            characters,
            projectiles,
            lasers,
            switchers: Vec::new(),
            team_states: Vec::new(),
        })
    }
}

/// Snapshot buffer decode errors
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("Buffer ended before the record was complete")]
    Truncated,

    #[error("Record count larger than the remaining buffer")]
    CountOverflow,

    #[error("Character blob length {0} exceeds the allowed maximum")]
    BlobTooLarge(usize),
}

fn get_u8(buf: &mut &[u8]) -> Result<u8, CodecError> {
    if buf.remaining() < 1 {
        return Err(CodecError::Truncated);
    }
    Ok(buf.get_u8())
}

fn get_i32(buf: &mut &[u8]) -> Result<i32, CodecError> {
    if buf.remaining() < 4 {
        return Err(CodecError::Truncated);
    }
    Ok(buf.get_i32_le())
}

fn get_u32(buf: &mut &[u8]) -> Result<u32, CodecError> {
    if buf.remaining() < 4 {
        return Err(CodecError::Truncated);
    }
    Ok(buf.get_u32_le())
}

fn get_f32(buf: &mut &[u8]) -> Result<f32, CodecError> {
    if buf.remaining() < 4 {
        return Err(CodecError::Truncated);
    }
    Ok(buf.get_f32_le())
}

fn get_vec2(buf: &mut &[u8]) -> Result<crate::sim::Vec2, CodecError> {
    Ok(crate::sim::Vec2::new(get_f32(buf)?, get_f32(buf)?))
}

/// Read a record count and reject counts that cannot fit in the remaining
/// buffer given the minimum encoded record size
fn get_count(buf: &mut &[u8], min_record_size: usize) -> Result<usize, CodecError> {
    let count = get_u32(buf)? as usize;
    if count.saturating_mul(min_record_size) > buf.remaining() {
        return Err(CodecError::CountOverflow);
    }
    Ok(count)
}
