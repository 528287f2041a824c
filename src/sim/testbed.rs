//! Deterministic reference world backing the test suite and the demo shell.
//!
//! A tiny side-view world: characters fall under gravity onto a floor, run
//! left/right from their last input, and can fire short-lived projectiles
//! and lasers. Physics is fixed-point-free but fully deterministic for a
//! given seed and input sequence.

use bytes::{Buf, BufMut, BytesMut};
use rand::Rng;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use super::{
    CharacterState, ClientId, LaserState, PlayerInput, ProjectileState, Simulation, SwitcherState,
    TeamState, Tick, Vec2, MAX_CLIENTS,
};
use crate::util::time::tick_delta;

const FLOOR_Y: f32 = 400.0;
/// Downward velocity gain in units per second
const GRAVITY: f32 = 25.0;
const RUN_SPEED: f32 = 5.0;
const PROJECTILE_SPEED: f32 = 10.0;
const PROJECTILE_LIFE: i32 = 100;
const LASER_ENERGY: f32 = 800.0;

/// Encoded length of the testbed's character detail blob
const BLOB_LEN: usize = 13;

#[derive(Debug, Clone)]
struct Character {
    pos: Vec2,
    vel: Vec2,
    super_mode: bool,
    invincible: bool,
    weapon: u8,
    health: i32,
    armor: i32,
    jumps: i32,
}

impl Character {
    fn spawn(pos: Vec2) -> Self {
        Self {
            pos,
            vel: Vec2::default(),
            super_mode: false,
            invincible: false,
            weapon: 1,
            health: 10,
            armor: 0,
            jumps: 2,
        }
    }

    fn encode_blob(&self) -> Vec<u8> {
        let mut buf = BytesMut::with_capacity(BLOB_LEN);
        buf.put_u8(self.weapon);
        buf.put_i32_le(self.health);
        buf.put_i32_le(self.armor);
        buf.put_i32_le(self.jumps);
        buf.to_vec()
    }

    fn decode_blob(&mut self, blob: &[u8]) -> bool {
        if blob.len() != BLOB_LEN {
            return false;
        }
        let mut buf = blob;
        self.weapon = buf.get_u8();
        self.health = buf.get_i32_le();
        self.armor = buf.get_i32_le();
        self.jumps = buf.get_i32_le();
        true
    }
}

#[derive(Debug, Clone, Default)]
struct Slot {
    connected: bool,
    character: Option<Character>,
    last_input: Option<PlayerInput>,
}

/// In-crate [`Simulation`] implementation with deterministic toy physics
pub struct TestbedSim {
    current_tick: Tick,
    world_paused: bool,
    map_name: String,
    slots: Vec<Slot>,
    projectiles: Vec<ProjectileState>,
    lasers: Vec<LaserState>,
    switchers: Vec<SwitcherState>,
    teams: Vec<TeamState>,
    rng: ChaCha8Rng,
    resync_count: u32,
    broadcasts: Vec<String>,
}

impl TestbedSim {
    pub fn new(seed: u64, map_name: &str) -> Self {
        Self {
            current_tick: 0,
            world_paused: false,
            map_name: map_name.to_string(),
            slots: vec![Slot::default(); MAX_CLIENTS],
            projectiles: Vec::new(),
            lasers: Vec::new(),
            switchers: vec![SwitcherState::new(1), SwitcherState::new(2)],
            teams: Vec::new(),
            rng: ChaCha8Rng::seed_from_u64(seed),
            resync_count: 0,
            broadcasts: Vec::new(),
        }
    }

    /// Occupy a client slot and spawn its character at a seeded position.
    /// Out-of-range client ids are ignored, never panicked on.
    pub fn connect(&mut self, client_id: ClientId) {
        let x = self.rng.gen_range(100.0..200.0);
        let Some(slot) = self.slots.get_mut(client_id as usize) else {
            return;
        };
        slot.connected = true;
        slot.last_input = Some(PlayerInput::default());
        slot.character = Some(Character::spawn(Vec2::new(x, 100.0)));
    }

    pub fn disconnect(&mut self, client_id: ClientId) {
        if let Some(slot) = self.slots.get_mut(client_id as usize) {
            *slot = Slot::default();
        }
    }

    /// Advance the world one tick
    pub fn step(&mut self) {
        self.current_tick += 1;
        if self.world_paused {
            return;
        }

        for slot in &mut self.slots {
            let Some(chr) = &mut slot.character else {
                continue;
            };
            let direction = slot.last_input.map_or(0, |input| input.direction);
            chr.vel.x = direction as f32 * RUN_SPEED;
            chr.vel.y += GRAVITY * tick_delta();
            chr.pos.x += chr.vel.x;
            chr.pos.y += chr.vel.y;
            if chr.pos.y >= FLOOR_Y {
                chr.pos.y = FLOOR_Y;
                chr.vel.y = 0.0;
            }
        }

        self.projectiles.retain_mut(|proj| {
            proj.pos.x += proj.dir.x * PROJECTILE_SPEED;
            proj.pos.y += proj.dir.y * PROJECTILE_SPEED;
            proj.life_span -= 1;
            proj.life_span > 0
        });

        self.lasers.retain_mut(|laser| {
            laser.energy -= 100.0;
            laser.energy > 0.0
        });
    }

    pub fn fire_projectile(&mut self, owner: ClientId, dir: Vec2) {
        let Some(chr) = self
            .slots
            .get(owner as usize)
            .and_then(|slot| slot.character.as_ref())
        else {
            return;
        };
        self.projectiles.push(ProjectileState {
            kind: 1,
            owner: owner as i32,
            pos: chr.pos,
            dir,
            life_span: PROJECTILE_LIFE,
            start_tick: self.current_tick,
            explosive: false,
            freeze: false,
        });
    }

    pub fn fire_laser(&mut self, owner: ClientId, to: Vec2) {
        let Some(chr) = self
            .slots
            .get(owner as usize)
            .and_then(|slot| slot.character.as_ref())
        else {
            return;
        };
        self.lasers.push(LaserState {
            owner: owner as i32,
            from: chr.pos,
            to,
            dir: Vec2::new(to.x - chr.pos.x, to.y - chr.pos.y),
            eval_tick: self.current_tick,
            energy: LASER_ENERGY,
            bounces: 0,
            kind: 0,
        });
    }

    pub fn set_switcher(&mut self, number: i32, team: usize, status: bool) {
        if let Some(switcher) = self.switchers.iter_mut().find(|s| s.number == number) {
            if team < switcher.status.len() {
                switcher.status[team] = status;
                switcher.last_update_tick[team] = self.current_tick;
            }
        }
    }

    pub fn set_team(&mut self, state: TeamState) {
        match self.teams.iter_mut().find(|t| t.team == state.team) {
            Some(existing) => *existing = state,
            None => self.teams.push(state),
        }
    }

    pub fn resync_count(&self) -> u32 {
        self.resync_count
    }

    pub fn broadcasts(&self) -> &[String] {
        &self.broadcasts
    }

    /// Take all pending broadcast lines, oldest first
    pub fn drain_broadcasts(&mut self) -> Vec<String> {
        std::mem::take(&mut self.broadcasts)
    }
}

impl Simulation for TestbedSim {
    fn current_tick(&self) -> Tick {
        self.current_tick
    }

    fn set_current_tick(&mut self, tick: Tick) {
        self.current_tick = tick;
    }

    fn world_paused(&self) -> bool {
        self.world_paused
    }

    fn set_world_paused(&mut self, paused: bool) {
        self.world_paused = paused;
    }

    fn map_name(&self) -> &str {
        &self.map_name
    }

    fn is_client_connected(&self, client_id: ClientId) -> bool {
        self.slots
            .get(client_id as usize)
            .is_some_and(|slot| slot.connected)
    }

    fn capture_character(&self, client_id: ClientId) -> Option<CharacterState> {
        let slot = self.slots.get(client_id as usize)?;
        let chr = slot.character.as_ref()?;
        Some(CharacterState {
            client_id,
            alive: true,
            pos: chr.pos,
            vel: chr.vel,
            super_mode: chr.super_mode,
            invincible: chr.invincible,
            tee_blob: chr.encode_blob(),
        })
    }

    fn spawn_character(&mut self, client_id: ClientId, pos: Vec2) -> bool {
        let Some(slot) = self.slots.get_mut(client_id as usize) else {
            return false;
        };
        if !slot.connected {
            return false;
        }
        slot.character = Some(Character::spawn(pos));
        true
    }

    fn restore_character(&mut self, state: &CharacterState) -> bool {
        let Some(chr) = self
            .slots
            .get_mut(state.client_id as usize)
            .and_then(|slot| slot.character.as_mut())
        else {
            return false;
        };
        chr.pos = state.pos;
        chr.vel = state.vel;
        chr.super_mode = state.super_mode;
        chr.invincible = state.invincible;
        chr.decode_blob(&state.tee_blob)
    }

    fn kill_character(&mut self, client_id: ClientId) {
        if let Some(slot) = self.slots.get_mut(client_id as usize) {
            slot.character = None;
        }
    }

    fn projectiles(&self) -> Vec<ProjectileState> {
        self.projectiles.clone()
    }

    fn lasers(&self) -> Vec<LaserState> {
        self.lasers.clone()
    }

    fn clear_dynamic_entities(&mut self) {
        self.projectiles.clear();
        self.lasers.clear();
    }

    fn spawn_projectile(&mut self, state: &ProjectileState) {
        self.projectiles.push(state.clone());
    }

    fn spawn_laser(&mut self, state: &LaserState) {
        self.lasers.push(state.clone());
    }

    fn switchers(&self) -> Vec<SwitcherState> {
        self.switchers.clone()
    }

    fn restore_switchers(&mut self, switchers: &[SwitcherState]) {
        self.switchers = switchers.to_vec();
    }

    fn team_states(&self) -> Vec<TeamState> {
        self.teams.clone()
    }

    fn last_input(&self, client_id: ClientId) -> Option<PlayerInput> {
        self.slots.get(client_id as usize)?.last_input
    }

    fn apply_input(&mut self, client_id: ClientId, input: &PlayerInput) {
        let Some(slot) = self.slots.get_mut(client_id as usize) else {
            return;
        };
        if slot.connected {
            slot.last_input = Some(*input);
        }
    }

    fn force_full_resync(&mut self) {
        self.resync_count += 1;
    }

    fn broadcast(&mut self, message: &str) {
        self.broadcasts.push(message.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_seed_and_inputs_reproduce_identical_worlds() {
        let mut a = TestbedSim::new(9, "map");
        let mut b = TestbedSim::new(9, "map");
        for sim in [&mut a, &mut b] {
            sim.connect(0);
            sim.apply_input(
                0,
                &PlayerInput {
                    direction: 1,
                    ..Default::default()
                },
            );
            for _ in 0..50 {
                sim.step();
            }
        }
        assert_eq!(a.capture_character(0), b.capture_character(0));
    }

    #[test]
    fn character_settles_on_the_floor() {
        let mut sim = TestbedSim::new(1, "map");
        sim.connect(0);
        for _ in 0..100 {
            sim.step();
        }
        let chr = sim.capture_character(0).unwrap();
        assert_eq!(chr.pos.y, FLOOR_Y);
        assert_eq!(chr.vel.y, 0.0);
    }

    #[test]
    fn projectiles_expire() {
        let mut sim = TestbedSim::new(1, "map");
        sim.connect(0);
        sim.fire_projectile(0, Vec2::new(1.0, 0.0));
        assert_eq!(sim.projectiles().len(), 1);
        for _ in 0..PROJECTILE_LIFE + 1 {
            sim.step();
        }
        assert!(sim.projectiles().is_empty());
    }

    #[test]
    fn blob_round_trips_character_details() {
        let mut sim = TestbedSim::new(1, "map");
        sim.connect(0);
        if let Some(chr) = sim.slots[0].character.as_mut() {
            chr.weapon = 3;
            chr.health = 7;
            chr.armor = 5;
        }
        let state = sim.capture_character(0).unwrap();

        sim.kill_character(0);
        assert!(sim.spawn_character(0, state.pos));
        assert!(sim.restore_character(&state));
        assert_eq!(sim.capture_character(0).unwrap(), state);
    }

    #[test]
    fn out_of_range_client_ids_are_ignored() {
        let mut sim = TestbedSim::new(1, "map");
        sim.connect(200);
        sim.apply_input(
            200,
            &PlayerInput {
                direction: 1,
                ..Default::default()
            },
        );
        sim.kill_character(200);
        sim.disconnect(200);
        sim.fire_projectile(200, Vec2::new(1.0, 0.0));
        sim.fire_laser(200, Vec2::new(1.0, 0.0));

        assert!(!sim.is_client_connected(200));
        assert!(sim.capture_character(200).is_none());
        assert!(sim.last_input(200).is_none());
        assert!(!sim.spawn_character(200, Vec2::default()));
        assert!(sim.projectiles().is_empty());
        assert!(sim.lasers().is_empty());
    }

    #[test]
    fn world_pause_freezes_physics_but_not_ticks() {
        let mut sim = TestbedSim::new(1, "map");
        sim.connect(0);
        sim.step();
        let before = sim.capture_character(0).unwrap();

        sim.set_world_paused(true);
        sim.step();
        assert_eq!(sim.current_tick(), 2);
        assert_eq!(sim.capture_character(0).unwrap(), before);
    }
}
