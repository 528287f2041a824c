//! Simulation contract: the state records and host-side hooks the TAS layer
//! needs to capture, restore, and drive a tick-based game world.
//!
//! The control layer never touches live entity objects. The host exposes its
//! world as owned state records and a handful of mutation hooks; capture and
//! restore iterate those records, never raw pointers.

pub mod testbed;

use serde::{Deserialize, Serialize};

/// Monotonically increasing simulation step counter
pub type Tick = i32;

/// Client slot index
pub type ClientId = u8;

/// Maximum number of client slots the server tracks
pub const MAX_CLIENTS: usize = 64;

/// Number of team slots in the switcher tables
pub const NUM_TEAMS: usize = 64;

/// Upper bound on the opaque per-character detail blob, in bytes.
/// Used for memory accounting; the blob contents are host-defined.
pub const TEE_BLOB_MAX: usize = 2048;

/// 2D vector used for positions, velocities, and directions
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vec2 {
    pub x: f32,
    pub y: f32,
}

impl Vec2 {
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

/// Captured state of one character
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CharacterState {
    pub client_id: ClientId,
    pub alive: bool,
    pub pos: Vec2,
    pub vel: Vec2,
    pub super_mode: bool,
    pub invincible: bool,
    /// Opaque host-serialized character detail (hook state, weapons, timers).
    /// Bounded by [`TEE_BLOB_MAX`].
    pub tee_blob: Vec<u8>,
}

/// Captured state of one projectile
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ProjectileState {
    pub kind: i32,
    /// Owning client id, or -1 for world-owned projectiles
    pub owner: i32,
    pub pos: Vec2,
    pub dir: Vec2,
    pub life_span: i32,
    pub start_tick: Tick,
    pub explosive: bool,
    pub freeze: bool,
}

/// Captured state of one laser
#[derive(Debug, Clone, PartialEq, Default)]
pub struct LaserState {
    /// Owning client id, or -1 for world-owned lasers
    pub owner: i32,
    pub from: Vec2,
    pub to: Vec2,
    pub dir: Vec2,
    pub eval_tick: Tick,
    pub energy: f32,
    pub bounces: i32,
    pub kind: i32,
}

/// Captured state of one switcher gate: per-team status tables
#[derive(Debug, Clone, PartialEq)]
pub struct SwitcherState {
    pub number: i32,
    pub status: Vec<bool>,
    pub end_tick: Vec<Tick>,
    pub kind: Vec<i32>,
    pub last_update_tick: Vec<Tick>,
}

impl SwitcherState {
    pub fn new(number: i32) -> Self {
        Self {
            number,
            status: vec![false; NUM_TEAMS],
            end_tick: vec![0; NUM_TEAMS],
            kind: vec![0; NUM_TEAMS],
            last_update_tick: vec![0; NUM_TEAMS],
        }
    }
}

/// Lifecycle phase of a team
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TeamPhase {
    Open,
    Started,
    Finished,
}

impl Default for TeamPhase {
    fn default() -> Self {
        Self::Open
    }
}

/// Captured aggregate state of one team
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TeamState {
    pub team: i32,
    pub phase: TeamPhase,
    pub practice: bool,
    pub locked: bool,
}

/// Per-tick input for one client.
///
/// `jump`, `fire`, and `hook` carry the host protocol's raw counter values
/// (the low bit is the pressed state), not plain booleans, so a recorded run
/// replays the exact wire values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PlayerInput {
    /// Movement direction: -1 left, 0 none, 1 right
    pub direction: i8,
    /// Aim target X
    pub target_x: i32,
    /// Aim target Y
    pub target_y: i32,
    pub jump: u8,
    pub fire: u8,
    pub hook: u8,
    /// Selected weapon slot
    pub weapon: u8,
}

/// Everything the TAS control layer needs from the host simulation.
///
/// All methods are synchronous and are only called on the tick thread,
/// between ticks.
pub trait Simulation {
    /// Current simulation tick
    fn current_tick(&self) -> Tick;

    /// Reset the simulation tick counter after a state jump
    fn set_current_tick(&mut self, tick: Tick);

    /// Whether the game world is paused (world pause, not TAS pause)
    fn world_paused(&self) -> bool;

    fn set_world_paused(&mut self, paused: bool);

    /// Name of the currently loaded map
    fn map_name(&self) -> &str;

    /// Whether a live player occupies the client slot
    fn is_client_connected(&self, client_id: ClientId) -> bool;

    /// Capture the live character in the slot, or `None` if no character
    /// exists (dead or disconnected)
    fn capture_character(&self, client_id: ClientId) -> Option<CharacterState>;

    /// Force-spawn a character for the client at the given position.
    /// Returns false if the slot cannot spawn (e.g. disconnected).
    fn spawn_character(&mut self, client_id: ClientId, pos: Vec2) -> bool;

    /// Load a captured character state into the live character, including
    /// the opaque tee blob and super/invincible flags.
    /// Returns false if there is no live character to load into.
    fn restore_character(&mut self, state: &CharacterState) -> bool;

    /// Kill the client's character if one exists
    fn kill_character(&mut self, client_id: ClientId);

    /// Captured state of every live projectile
    fn projectiles(&self) -> Vec<ProjectileState>;

    /// Captured state of every live laser
    fn lasers(&self) -> Vec<LaserState>;

    /// Destroy all projectiles and lasers
    fn clear_dynamic_entities(&mut self);

    fn spawn_projectile(&mut self, state: &ProjectileState);

    fn spawn_laser(&mut self, state: &LaserState);

    /// The fixed switcher-gate table
    fn switchers(&self) -> Vec<SwitcherState>;

    fn restore_switchers(&mut self, switchers: &[SwitcherState]);

    /// Aggregate state of every team that currently has players
    fn team_states(&self) -> Vec<TeamState>;

    /// The input currently applied to the client's character, if any
    fn last_input(&self, client_id: ClientId) -> Option<PlayerInput>;

    /// Override the client's input for the upcoming tick
    fn apply_input(&mut self, client_id: ClientId, input: &PlayerInput);

    /// Push a full (non-delta) state resync to every external observer.
    /// Required after any state jump; a delta update would show torn state.
    fn force_full_resync(&mut self);

    /// Operator-visible notification (chat broadcast, console line, ...)
    fn broadcast(&mut self, message: &str);
}
