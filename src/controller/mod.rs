//! TAS orchestration: mode and playback state machines, tick-loop hooks,
//! seeking, speed control, input injection/recording, the permission model,
//! and the TAS input file surface.

pub mod timeline;

use std::collections::BTreeSet;
use std::fs;
use std::path::PathBuf;

use serde::Serialize;
use tracing::{info, warn};

use crate::config::Config;
use crate::history::{HistoryError, HistoryStats, TasHistory};
use crate::sim::{ClientId, Simulation, Tick, MAX_CLIENTS};
use crate::util::time::Timer;

pub use timeline::{FileFormatError, InputTimeline, TasInput};

/// Who may drive the TAS controls
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TasMode {
    /// Subsystem off: every hook is a pass-through, every command refused
    Disabled,
    /// Exactly one client holds the controls
    SingleControl,
    /// The control client plus a set of collaborators share the controls
    Collaborative,
}

/// Playback/recording state, orthogonal to the pause gate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaybackState {
    Stopped,
    Playing,
    Recording,
}

/// Snapshot of the controller for status surfaces
#[derive(Debug, Clone, Serialize)]
pub struct TasStatus {
    pub mode: TasMode,
    pub playback: PlaybackState,
    pub paused: bool,
    pub speed: f32,
    pub current_tick: Tick,
    pub target_tick: Option<Tick>,
    pub control_client: Option<ClientId>,
    pub collaborators: usize,
    pub injected_inputs: usize,
    pub recorded_inputs: usize,
    pub history: HistoryStats,
}

/// TAS operation errors. Every failure leaves prior state unmodified.
#[derive(Debug, thiserror::Error)]
pub enum TasError {
    #[error("TAS mode is not enabled")]
    ModeDisabled,

    #[error("Cannot rewind: no stored state or keyframe at or before tick {0}")]
    InvalidSeekTarget(Tick),

    #[error("Fast-forward target {target} is not ahead of current tick {current}")]
    NotInFuture { target: Tick, current: Tick },

    #[error("No inputs to play back")]
    EmptyTimeline,

    #[error("Invalid TAS file name: {0:?}")]
    InvalidFileName(String),

    #[error(transparent)]
    FileFormat(#[from] FileFormatError),

    #[error("TAS file I/O failed: {0}")]
    Io(#[from] std::io::Error),
}

/// The TAS control layer. Owned by the host; all calls happen on the tick
/// thread between ticks.
pub struct TasController {
    mode: TasMode,
    playback: PlaybackState,

    paused: bool,
    step_remaining: u32,
    speed: f32,
    speed_accumulator: f32,
    target_tick: Option<Tick>,

    history: TasHistory,
    injected: InputTimeline,
    recorded: Vec<TasInput>,
    recording_start: Option<Tick>,

    control_client: Option<ClientId>,
    collaborators: BTreeSet<ClientId>,

    save_dir: PathBuf,
}

impl TasController {
    pub fn new(config: &Config) -> Self {
        Self {
            mode: TasMode::Disabled,
            playback: PlaybackState::Stopped,
            paused: false,
            step_remaining: 0,
            speed: 1.0,
            speed_accumulator: 0.0,
            target_tick: None,
            history: TasHistory::new(config),
            injected: InputTimeline::new(),
            recorded: Vec::new(),
            recording_start: None,
            control_client: None,
            collaborators: BTreeSet::new(),
            save_dir: config.save_dir.clone(),
        }
    }

    // --- Mode ---

    pub fn mode(&self) -> TasMode {
        self.mode
    }

    pub fn is_enabled(&self) -> bool {
        self.mode != TasMode::Disabled
    }

    /// Switch modes. Disabling tears the whole session down: history, the
    /// injected timeline, and the recorded log are cleared, playback stops.
    pub fn set_mode(&mut self, mode: TasMode) {
        self.mode = mode;
        if mode == TasMode::Disabled {
            self.paused = false;
            self.step_remaining = 0;
            self.target_tick = None;
            self.playback = PlaybackState::Stopped;
            self.history.clear();
            self.injected.clear();
            self.recorded.clear();
            self.recording_start = None;
        }
        info!(?mode, "TAS mode changed");
    }

    // --- Tick hooks ---

    /// Pause gate consulted by the host tick loop. True when the tick may run.
    pub fn should_advance_tick(&self) -> bool {
        if !self.is_enabled() {
            return true;
        }
        !(self.paused && self.step_remaining == 0)
    }

    /// Speed gate: accumulates `speed` per call and lets a tick through each
    /// time the accumulator reaches 1.0. Implements slow motion without
    /// changing tick semantics. Returns true when the tick may run.
    pub fn on_pre_tick(&mut self) -> bool {
        if !self.is_enabled() || self.paused {
            return true;
        }

        // Cap the carry so speeds above 1.0 cannot bank unbounded credit.
        self.speed_accumulator = (self.speed_accumulator + self.speed).min(self.speed.max(1.0));
        if self.speed_accumulator < 1.0 {
            return false;
        }
        self.speed_accumulator -= 1.0;
        true
    }

    /// Post-tick bookkeeping: step countdown, history capture, input
    /// recording, and seek-target arrival.
    pub fn on_post_tick<S: Simulation + ?Sized>(&mut self, sim: &mut S) {
        if !self.is_enabled() {
            return;
        }

        if self.step_remaining > 0 {
            self.step_remaining -= 1;
        }

        let tick = sim.current_tick();
        self.history.save_state(sim, tick);

        if self.playback == PlaybackState::Recording {
            self.record_current_inputs(sim, tick);
        }

        if let Some(target) = self.target_tick {
            if tick >= target {
                self.target_tick = None;
                self.paused = true;
                info!(tick, "Reached seek target");
                sim.broadcast(&format!("TAS: Reached tick {tick}"));
            }
        }
    }

    // --- Pause and stepping ---

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn pause<S: Simulation + ?Sized>(&mut self, sim: &mut S) {
        self.paused = true;
        sim.broadcast("TAS: Paused");
    }

    pub fn resume<S: Simulation + ?Sized>(&mut self, sim: &mut S) {
        self.paused = false;
        self.step_remaining = 0;
        sim.broadcast("TAS: Resumed");
    }

    pub fn toggle_pause<S: Simulation + ?Sized>(&mut self, sim: &mut S) {
        if self.paused {
            self.resume(sim);
        } else {
            self.pause(sim);
        }
    }

    /// Advance exactly `num_ticks` ticks, then stay paused
    pub fn step_forward<S: Simulation + ?Sized>(&mut self, sim: &mut S, num_ticks: u32) {
        let num_ticks = num_ticks.max(1);
        self.paused = true;
        self.step_remaining = num_ticks;
        sim.broadcast(&format!(
            "TAS: Stepping {num_ticks} tick{}",
            if num_ticks > 1 { "s" } else { "" }
        ));
    }

    // --- Seeking ---

    /// Jump back to `target_tick`, or to the nearest keyframe at or before it
    /// when no exact state exists. Purges injected inputs after the resolved
    /// tick and leaves the simulation paused. Returns the resolved tick.
    pub fn rewind<S: Simulation + ?Sized>(
        &mut self,
        sim: &mut S,
        target_tick: Tick,
    ) -> Result<Tick, TasError> {
        let resolved = if self.history.has_state(target_tick) {
            target_tick
        } else {
            self.history
                .nearest_keyframe(target_tick)
                .ok_or(TasError::InvalidSeekTarget(target_tick))?
        };

        let timer = Timer::new();
        let (restored_tick, report) = self
            .history
            .load_state(sim, resolved)
            .map_err(|HistoryError::NoState(_)| TasError::InvalidSeekTarget(target_tick))?;

        if report.is_partial() {
            warn!(
                tick = restored_tick,
                skipped = ?report.skipped,
                "Partial restore: some client slots are no longer connected"
            );
        }

        sim.set_current_tick(restored_tick);
        sim.force_full_resync();

        // Nothing from the abandoned future branch may leak into the new
        // one: neither its scripted inputs nor its stored states.
        self.history.truncate_after(restored_tick);
        self.injected.clear_after_tick(restored_tick);

        self.target_tick = None;
        self.paused = true;

        info!(
            target = target_tick,
            resolved = restored_tick,
            elapsed_ms = timer.elapsed_ms(),
            "Rewound simulation"
        );
        sim.broadcast(&format!("TAS: Rewound to tick {restored_tick}"));

        Ok(restored_tick)
    }

    /// Run forward to `target_tick`; arrival is detected in
    /// [`TasController::on_post_tick`]
    pub fn fast_forward<S: Simulation + ?Sized>(
        &mut self,
        sim: &mut S,
        target_tick: Tick,
    ) -> Result<(), TasError> {
        let current = sim.current_tick();
        if target_tick <= current {
            return Err(TasError::NotInFuture {
                target: target_tick,
                current,
            });
        }

        self.target_tick = Some(target_tick);
        self.paused = false;
        sim.broadcast(&format!("TAS: Fast forwarding to tick {target_tick}"));
        Ok(())
    }

    /// Dispatch to rewind or fast-forward depending on the target
    pub fn goto_tick<S: Simulation + ?Sized>(
        &mut self,
        sim: &mut S,
        target_tick: Tick,
    ) -> Result<(), TasError> {
        let current = sim.current_tick();
        if target_tick < current {
            self.rewind(sim, target_tick).map(|_| ())
        } else if target_tick > current {
            self.fast_forward(sim, target_tick)
        } else {
            Ok(())
        }
    }

    pub fn speed(&self) -> f32 {
        self.speed
    }

    pub fn target_tick(&self) -> Option<Tick> {
        self.target_tick
    }

    /// Set the playback speed multiplier, clamped to [0.1, 10.0]
    pub fn set_speed<S: Simulation + ?Sized>(&mut self, sim: &mut S, speed: f32) -> f32 {
        self.speed = speed.clamp(0.1, 10.0);
        sim.broadcast(&format!("TAS: Speed set to {:.1}x", self.speed));
        self.speed
    }

    // --- Injected inputs ---

    pub fn inject_input(&mut self, input: TasInput) {
        self.injected.insert(input);
    }

    pub fn inject_inputs(&mut self, inputs: impl IntoIterator<Item = TasInput>) {
        self.injected.insert_many(inputs);
    }

    pub fn injected_input(&self, client_id: ClientId, tick: Tick) -> Option<&TasInput> {
        self.injected.get(client_id, tick)
    }

    pub fn has_injected_input(&self, client_id: ClientId, tick: Tick) -> bool {
        self.injected.contains(client_id, tick)
    }

    pub fn injected_timeline(&self) -> &InputTimeline {
        &self.injected
    }

    pub fn clear_injected_inputs(&mut self) {
        self.injected.clear();
    }

    pub fn clear_injected_inputs_after_tick(&mut self, tick: Tick) {
        self.injected.clear_after_tick(tick);
    }

    /// While Playing, push every input scripted for `tick` into the
    /// simulation. The host calls this before running the tick.
    pub fn apply_playback_inputs<S: Simulation + ?Sized>(&self, sim: &mut S, tick: Tick) {
        if self.playback != PlaybackState::Playing {
            return;
        }
        for entry in self.injected.at_tick(tick) {
            sim.apply_input(entry.client_id, &entry.input);
        }
    }

    // --- Recording and playback ---

    pub fn playback_state(&self) -> PlaybackState {
        self.playback
    }

    pub fn recorded_inputs(&self) -> &[TasInput] {
        &self.recorded
    }

    pub fn start_recording<S: Simulation + ?Sized>(&mut self, sim: &mut S) {
        self.playback = PlaybackState::Recording;
        self.recording_start = Some(sim.current_tick());
        self.recorded.clear();
        sim.broadcast("TAS: Recording started");
    }

    pub fn stop_recording<S: Simulation + ?Sized>(&mut self, sim: &mut S) {
        if self.playback == PlaybackState::Recording {
            self.playback = PlaybackState::Stopped;
            sim.broadcast(&format!(
                "TAS: Recording stopped ({} inputs recorded)",
                self.recorded.len()
            ));
        }
    }

    pub fn start_playback<S: Simulation + ?Sized>(&mut self, sim: &mut S) -> Result<(), TasError> {
        if self.injected.is_empty() {
            return Err(TasError::EmptyTimeline);
        }
        self.playback = PlaybackState::Playing;
        self.paused = false;
        sim.broadcast("TAS: Playback started");
        Ok(())
    }

    /// Stop whichever of playback or recording is active
    pub fn stop<S: Simulation + ?Sized>(&mut self, sim: &mut S) {
        match self.playback {
            PlaybackState::Playing => {
                self.playback = PlaybackState::Stopped;
                sim.broadcast("TAS: Playback stopped");
            }
            PlaybackState::Recording => self.stop_recording(sim),
            PlaybackState::Stopped => {}
        }
    }

    fn record_current_inputs<S: Simulation + ?Sized>(&mut self, sim: &S, tick: Tick) {
        for slot in 0..MAX_CLIENTS {
            let client_id = slot as ClientId;
            if sim.capture_character(client_id).is_none() {
                continue;
            }
            if let Some(input) = sim.last_input(client_id) {
                self.recorded.push(TasInput {
                    tick,
                    client_id,
                    input,
                });
            }
        }
    }

    // --- Permissions ---

    pub fn control_client(&self) -> Option<ClientId> {
        self.control_client
    }

    pub fn set_control_client(&mut self, client_id: Option<ClientId>) {
        self.control_client = client_id;
        info!(?client_id, "TAS control client changed");
    }

    pub fn add_collaborator(&mut self, client_id: ClientId) {
        self.collaborators.insert(client_id);
    }

    pub fn remove_collaborator(&mut self, client_id: ClientId) {
        self.collaborators.remove(&client_id);
    }

    pub fn is_collaborator(&self, client_id: ClientId) -> bool {
        self.collaborators.contains(&client_id)
    }

    pub fn can_control(&self, client_id: ClientId) -> bool {
        match self.mode {
            TasMode::Disabled => false,
            TasMode::SingleControl => self.control_client == Some(client_id),
            TasMode::Collaborative => {
                self.is_collaborator(client_id) || self.control_client == Some(client_id)
            }
        }
    }

    // --- History ---

    pub fn history(&self) -> &TasHistory {
        &self.history
    }

    pub fn clear_history(&mut self) {
        self.history.clear();
    }

    // --- Files ---

    /// Save the injected-input timeline to `<save_dir>/<name>.tas`
    pub fn save_to_file<S: Simulation + ?Sized>(
        &self,
        sim: &S,
        name: &str,
    ) -> Result<PathBuf, TasError> {
        let path = self.file_path(name)?;
        fs::create_dir_all(&self.save_dir)?;

        let encoded = self.injected.encode(sim.map_name());
        fs::write(&path, &encoded)?;

        info!(path = %path.display(), inputs = self.injected.len(), "Saved TAS file");
        Ok(path)
    }

    /// Replace the injected-input timeline with the contents of
    /// `<save_dir>/<name>.tas`. The existing timeline is untouched on any
    /// failure. Returns the number of loaded inputs.
    pub fn load_from_file<S: Simulation + ?Sized>(
        &mut self,
        sim: &S,
        name: &str,
    ) -> Result<usize, TasError> {
        let path = self.file_path(name)?;
        let data = fs::read(&path)?;
        let (map_name, timeline) = InputTimeline::decode(&data)?;

        if map_name != sim.map_name() {
            warn!(
                file_map = %map_name,
                live_map = %sim.map_name(),
                "TAS file was recorded on a different map"
            );
        }

        let count = timeline.len();
        self.injected = timeline;
        info!(path = %path.display(), inputs = count, "Loaded TAS file");
        Ok(count)
    }

    fn file_path(&self, name: &str) -> Result<PathBuf, TasError> {
        if name.is_empty()
            || name.contains(['/', '\\'])
            || name.contains("..")
            || name.starts_with('.')
        {
            return Err(TasError::InvalidFileName(name.to_string()));
        }
        Ok(self.save_dir.join(format!("{name}.tas")))
    }

    // --- Status ---

    pub fn status<S: Simulation + ?Sized>(&self, sim: &S) -> TasStatus {
        TasStatus {
            mode: self.mode,
            playback: self.playback,
            paused: self.paused,
            speed: self.speed,
            current_tick: sim.current_tick(),
            target_tick: self.target_tick,
            control_client: self.control_client,
            collaborators: self.collaborators.len(),
            injected_inputs: self.injected.len(),
            recorded_inputs: self.recorded.len(),
            history: self.history.stats(),
        }
    }

    /// Operator-readable status block
    pub fn format_status<S: Simulation + ?Sized>(&self, sim: &S) -> String {
        let status = self.status(sim);

        let mode = match status.mode {
            TasMode::Disabled => "Disabled",
            TasMode::SingleControl => "Single Control",
            TasMode::Collaborative => "Collaborative",
        };
        let playback = match status.playback {
            PlaybackState::Stopped => "Stopped",
            PlaybackState::Playing => "Playing",
            PlaybackState::Recording => "Recording",
        };

        format!(
            "TAS Status:\n\
             \x20 Mode: {mode}\n\
             \x20 State: {playback}\n\
             \x20 Paused: {}\n\
             \x20 Speed: {:.1}x\n\
             \x20 Current Tick: {}\n\
             \x20 History: {} states, {} keyframes\n\
             \x20 Memory: {:.1} MB / {:.1} MB\n\
             \x20 Injected Inputs: {}\n\
             \x20 Control Client: {}",
            if status.paused { "Yes" } else { "No" },
            status.speed,
            status.current_tick,
            status.history.stored_states,
            status.history.keyframes,
            status.history.memory_usage as f64 / (1024.0 * 1024.0),
            status.history.memory_limit as f64 / (1024.0 * 1024.0),
            status.injected_inputs,
            status
                .control_client
                .map_or_else(|| "none".to_string(), |id| id.to_string()),
        )
    }
}
