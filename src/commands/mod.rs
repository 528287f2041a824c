//! Text command surface for the TAS controls.
//!
//! Commands arrive as single lines (console, chat, or the demo shell's
//! stdin), get parsed into [`TasCommand`], and execute against the
//! controller. Everything except `help`, `status`, and `mode` is refused
//! while the subsystem is disabled.

use tracing::info;

use crate::controller::{TasController, TasError, TasInput, TasMode};
use crate::sim::{ClientId, PlayerInput, Simulation, Tick};

/// One parsed TAS command
#[derive(Debug, Clone, PartialEq)]
pub enum TasCommand {
    Help,
    Status,
    Mode(TasMode),
    Pause,
    Resume,
    TogglePause,
    Step(u32),
    Rewind(Tick),
    FastForward(Tick),
    Goto(Tick),
    Speed(f32),
    Record,
    Play,
    Stop,
    Save(String),
    Load(String),
    Inject {
        tick: Tick,
        client_id: ClientId,
        input: PlayerInput,
    },
    ClearInputs,
    Control(Option<ClientId>),
    AddCollaborator(ClientId),
    RemoveCollaborator(ClientId),
    ClearHistory,
}

/// Command parse and execution errors
#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error("Unknown command {0:?}; try \"help\"")]
    Unknown(String),

    #[error("Usage: {0}")]
    Usage(&'static str),

    #[error("Invalid number {0:?}")]
    BadNumber(String),

    #[error(transparent)]
    Tas(#[from] TasError),
}

const HELP_TEXT: &str = "\
TAS commands:
  mode off|single|collab      enable or disable the subsystem
  status                      show controller and history state
  pause / resume / toggle     control the pause gate
  step [n] / step_n <n>       advance n ticks (default 1), stay paused
  rewind <tick>               jump back to a stored tick
  ff <tick>                   run forward to a future tick
  goto <tick>                 rewind or fast-forward as needed
  speed <x>                   playback speed multiplier, 0.1 to 10.0
  record / play / stop        input recording and playback
  save <name> / load <name>   TAS input files
  input <tick> <client> <dir> [tx ty [jump fire hook [weapon]]]
  input_clear                 drop all injected inputs
  control <client>|none       set the control client
  collab_add <client> / collab_remove <client>
  history_clear               drop all stored snapshots";

fn num<T: std::str::FromStr>(raw: &str) -> Result<T, CommandError> {
    raw.parse().map_err(|_| CommandError::BadNumber(raw.to_string()))
}

/// Parse one command line. An empty line is not a command.
pub fn parse(line: &str) -> Result<TasCommand, CommandError> {
    let mut parts = line.split_whitespace();
    let verb = parts.next().ok_or(CommandError::Unknown(String::new()))?;
    let args: Vec<&str> = parts.collect();

    let command = match verb {
        "help" => TasCommand::Help,
        "status" => TasCommand::Status,
        "mode" => match args.first().copied() {
            Some("off") => TasCommand::Mode(TasMode::Disabled),
            Some("single") => TasCommand::Mode(TasMode::SingleControl),
            Some("collab") => TasCommand::Mode(TasMode::Collaborative),
            _ => return Err(CommandError::Usage("mode off|single|collab")),
        },
        "pause" => TasCommand::Pause,
        "resume" => TasCommand::Resume,
        "toggle" => TasCommand::TogglePause,
        "step" => match args.first() {
            Some(raw) => TasCommand::Step(num(raw)?),
            None => TasCommand::Step(1),
        },
        "step_n" => TasCommand::Step(num(
            args.first().ok_or(CommandError::Usage("step_n <n>"))?,
        )?),
        "rewind" => TasCommand::Rewind(num(args.first().ok_or(CommandError::Usage("rewind <tick>"))?)?),
        "ff" => TasCommand::FastForward(num(args.first().ok_or(CommandError::Usage("ff <tick>"))?)?),
        "goto" => TasCommand::Goto(num(args.first().ok_or(CommandError::Usage("goto <tick>"))?)?),
        "speed" => TasCommand::Speed(num(args.first().ok_or(CommandError::Usage("speed <x>"))?)?),
        "record" => TasCommand::Record,
        "play" => TasCommand::Play,
        "stop" => TasCommand::Stop,
        "save" => TasCommand::Save(
            args.first()
                .ok_or(CommandError::Usage("save <name>"))?
                .to_string(),
        ),
        "load" => TasCommand::Load(
            args.first()
                .ok_or(CommandError::Usage("load <name>"))?
                .to_string(),
        ),
        "input" => {
            if args.len() < 3 {
                return Err(CommandError::Usage(
                    "input <tick> <client> <dir> [tx ty [jump fire hook [weapon]]]",
                ));
            }
            let mut input = PlayerInput {
                direction: num(args[2])?,
                ..Default::default()
            };
            if args.len() >= 5 {
                input.target_x = num(args[3])?;
                input.target_y = num(args[4])?;
            }
            if args.len() >= 8 {
                input.jump = num(args[5])?;
                input.fire = num(args[6])?;
                input.hook = num(args[7])?;
            }
            if args.len() >= 9 {
                input.weapon = num(args[8])?;
            }
            TasCommand::Inject {
                tick: num(args[0])?,
                client_id: num(args[1])?,
                input,
            }
        }
        "input_clear" => TasCommand::ClearInputs,
        "control" => match args.first().copied() {
            Some("none") => TasCommand::Control(None),
            Some(raw) => TasCommand::Control(Some(num(raw)?)),
            None => return Err(CommandError::Usage("control <client>|none")),
        },
        "collab_add" => TasCommand::AddCollaborator(num(
            args.first().ok_or(CommandError::Usage("collab_add <client>"))?,
        )?),
        "collab_remove" => TasCommand::RemoveCollaborator(num(
            args.first()
                .ok_or(CommandError::Usage("collab_remove <client>"))?,
        )?),
        "history_clear" => TasCommand::ClearHistory,
        other => return Err(CommandError::Unknown(other.to_string())),
    };

    Ok(command)
}

/// Execute a parsed command, returning the operator-visible response line
pub fn execute<S: Simulation + ?Sized>(
    controller: &mut TasController,
    sim: &mut S,
    command: TasCommand,
) -> Result<String, CommandError> {
    // help, status, and mode work even while disabled; nothing else does.
    if !controller.is_enabled()
        && !matches!(
            command,
            TasCommand::Help | TasCommand::Status | TasCommand::Mode(_)
        )
    {
        return Err(TasError::ModeDisabled.into());
    }

    info!(?command, "Executing TAS command");

    let response = match command {
        TasCommand::Help => HELP_TEXT.to_string(),
        TasCommand::Status => controller.format_status(sim),
        TasCommand::Mode(mode) => {
            controller.set_mode(mode);
            format!("Mode set to {mode:?}")
        }
        TasCommand::Pause => {
            controller.pause(sim);
            "Paused".to_string()
        }
        TasCommand::Resume => {
            controller.resume(sim);
            "Resumed".to_string()
        }
        TasCommand::TogglePause => {
            controller.toggle_pause(sim);
            if controller.is_paused() { "Paused" } else { "Resumed" }.to_string()
        }
        TasCommand::Step(n) => {
            controller.step_forward(sim, n);
            format!("Stepping {} tick(s)", n.max(1))
        }
        TasCommand::Rewind(tick) => {
            let resolved = controller.rewind(sim, tick)?;
            format!("Rewound to tick {resolved}")
        }
        TasCommand::FastForward(tick) => {
            controller.fast_forward(sim, tick)?;
            format!("Fast forwarding to tick {tick}")
        }
        TasCommand::Goto(tick) => {
            controller.goto_tick(sim, tick)?;
            format!("Seeking to tick {tick}")
        }
        TasCommand::Speed(speed) => {
            let clamped = controller.set_speed(sim, speed);
            format!("Speed set to {clamped:.1}x")
        }
        TasCommand::Record => {
            controller.start_recording(sim);
            "Recording".to_string()
        }
        TasCommand::Play => {
            controller.start_playback(sim)?;
            "Playing".to_string()
        }
        TasCommand::Stop => {
            controller.stop(sim);
            "Stopped".to_string()
        }
        TasCommand::Save(name) => {
            let path = controller.save_to_file(sim, &name)?;
            format!("Saved {} inputs to {}", controller.injected_timeline().len(), path.display())
        }
        TasCommand::Load(name) => {
            let count = controller.load_from_file(sim, &name)?;
            format!("Loaded {count} inputs")
        }
        TasCommand::Inject {
            tick,
            client_id,
            input,
        } => {
            controller.inject_input(TasInput {
                tick,
                client_id,
                input,
            });
            format!("Injected input for client {client_id} at tick {tick}")
        }
        TasCommand::ClearInputs => {
            controller.clear_injected_inputs();
            "Injected inputs cleared".to_string()
        }
        TasCommand::Control(client_id) => {
            controller.set_control_client(client_id);
            match client_id {
                Some(id) => format!("Control client set to {id}"),
                None => "Control client cleared".to_string(),
            }
        }
        TasCommand::AddCollaborator(client_id) => {
            controller.add_collaborator(client_id);
            format!("Client {client_id} added as collaborator")
        }
        TasCommand::RemoveCollaborator(client_id) => {
            controller.remove_collaborator(client_id);
            format!("Client {client_id} removed as collaborator")
        }
        TasCommand::ClearHistory => {
            controller.clear_history();
            "History cleared".to_string()
        }
    };

    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::sim::testbed::TestbedSim;

    fn setup() -> (TasController, TestbedSim) {
        let mut controller = TasController::new(&Config::default());
        controller.set_mode(TasMode::SingleControl);
        let mut sim = TestbedSim::new(3, "map");
        sim.connect(0);
        (controller, sim)
    }

    #[test]
    fn parse_covers_the_verb_surface() {
        assert_eq!(parse("pause").unwrap(), TasCommand::Pause);
        assert_eq!(parse("step").unwrap(), TasCommand::Step(1));
        assert_eq!(parse("step 25").unwrap(), TasCommand::Step(25));
        assert_eq!(parse("step_n 4").unwrap(), TasCommand::Step(4));
        assert_eq!(parse("rewind 100").unwrap(), TasCommand::Rewind(100));
        assert_eq!(parse("speed 0.5").unwrap(), TasCommand::Speed(0.5));
        assert_eq!(parse("mode collab").unwrap(), TasCommand::Mode(TasMode::Collaborative));
        assert_eq!(parse("control none").unwrap(), TasCommand::Control(None));
        assert_eq!(parse("save myrun").unwrap(), TasCommand::Save("myrun".into()));
        assert_eq!(
            parse("input 100 2 -1 40 -7").unwrap(),
            TasCommand::Inject {
                tick: 100,
                client_id: 2,
                input: PlayerInput {
                    direction: -1,
                    target_x: 40,
                    target_y: -7,
                    ..Default::default()
                },
            }
        );
        assert_eq!(
            parse("input 7 0 1 0 0 1 1 0 3").unwrap(),
            TasCommand::Inject {
                tick: 7,
                client_id: 0,
                input: PlayerInput {
                    direction: 1,
                    jump: 1,
                    fire: 1,
                    weapon: 3,
                    ..Default::default()
                },
            }
        );
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!(matches!(parse("frobnicate"), Err(CommandError::Unknown(_))));
        assert!(matches!(parse("rewind"), Err(CommandError::Usage(_))));
        assert!(matches!(parse("step many"), Err(CommandError::BadNumber(_))));
        assert!(matches!(parse("mode sideways"), Err(CommandError::Usage(_))));
    }

    #[test]
    fn disabled_mode_refuses_everything_but_the_basics() {
        let (mut controller, mut sim) = setup();
        controller.set_mode(TasMode::Disabled);

        assert!(matches!(
            execute(&mut controller, &mut sim, TasCommand::Pause),
            Err(CommandError::Tas(TasError::ModeDisabled))
        ));
        assert!(execute(&mut controller, &mut sim, TasCommand::Status).is_ok());
        assert!(execute(&mut controller, &mut sim, TasCommand::Help).is_ok());
        assert!(
            execute(&mut controller, &mut sim, TasCommand::Mode(TasMode::SingleControl)).is_ok()
        );
        // Re-enabled, the same command now works.
        assert!(execute(&mut controller, &mut sim, TasCommand::Pause).is_ok());
    }

    #[test]
    fn pause_round_trip_through_the_command_surface() {
        let (mut controller, mut sim) = setup();

        execute(&mut controller, &mut sim, parse("pause").unwrap()).unwrap();
        assert!(controller.is_paused());
        execute(&mut controller, &mut sim, parse("toggle").unwrap()).unwrap();
        assert!(!controller.is_paused());
    }

    #[test]
    fn inject_then_play_goes_live() {
        let (mut controller, mut sim) = setup();

        assert!(matches!(
            execute(&mut controller, &mut sim, TasCommand::Play),
            Err(CommandError::Tas(TasError::EmptyTimeline))
        ));

        execute(&mut controller, &mut sim, parse("input 10 0 1").unwrap()).unwrap();
        let response = execute(&mut controller, &mut sim, TasCommand::Play).unwrap();
        assert_eq!(response, "Playing");
    }

    #[test]
    fn failed_rewind_surfaces_the_tas_error() {
        let (mut controller, mut sim) = setup();
        assert!(matches!(
            execute(&mut controller, &mut sim, TasCommand::Rewind(500)),
            Err(CommandError::Tas(TasError::InvalidSeekTarget(500)))
        ));
    }
}
