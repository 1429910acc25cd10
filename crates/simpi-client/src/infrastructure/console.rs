//! Line-oriented terminal control surface.
//!
//! One command per stdin line:
//!
//! | Command              | Effect                                   |
//! |----------------------|------------------------------------------|
//! | `press <button>`     | drive the button's input pin high        |
//! | `release <button>`   | drive it low again                       |
//! | `play` / `pause`     | start or stop the periodic exchange      |
//! | `interval <ms>`      | change the tick period                   |
//! | `reset`              | reset local registers, then the broker   |
//! | `terminate`          | shut the broker down                     |
//! | `show`               | print registers and LED levels           |
//! | `help` / `quit`      |                                          |

use std::fmt::Write as _;
use std::str::FromStr;
use std::sync::Mutex;
use std::time::Duration;

use simpi_core::{RegisterBank, RegisterEvent, RegisterObserver};
use thiserror::Error;
use tracing::info;

use crate::application::{lock_bank, SyncError, SyncScheduler};
use crate::domain::{BoardError, BoardLayout, BUTTON_REGISTER, LED_REGISTER};

pub const HELP: &str = "\
commands:
  press <button>     hold a button down (e.g. press BTN1)
  release <button>   let it go
  play | pause       start or stop syncing with the broker
  interval <ms>      change the sync period
  reset              reset registers here and on the broker
  terminate          shut the broker down
  show               print registers and LEDs
  quit";

/// A parsed control-surface command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlCommand {
    Press(String),
    Release(String),
    Play,
    Pause,
    Interval(u64),
    Reset,
    Terminate,
    Show,
    Help,
    Quit,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CommandParseError {
    #[error("empty command")]
    Empty,

    #[error("unknown command {0:?} (try `help`)")]
    Unknown(String),

    #[error("`{0}` needs an argument")]
    MissingArgument(&'static str),

    #[error("invalid interval {0:?}: expected milliseconds")]
    InvalidInterval(String),
}

impl FromStr for ControlCommand {
    type Err = CommandParseError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let mut words = line.split_whitespace();
        let verb = words.next().ok_or(CommandParseError::Empty)?.to_ascii_lowercase();
        let argument = words.next();

        let command = match verb.as_str() {
            "press" => ControlCommand::Press(
                argument.ok_or(CommandParseError::MissingArgument("press"))?.to_string(),
            ),
            "release" => ControlCommand::Release(
                argument.ok_or(CommandParseError::MissingArgument("release"))?.to_string(),
            ),
            "play" => ControlCommand::Play,
            "pause" => ControlCommand::Pause,
            "interval" => {
                let raw = argument.ok_or(CommandParseError::MissingArgument("interval"))?;
                let ms = raw
                    .parse()
                    .map_err(|_| CommandParseError::InvalidInterval(raw.to_string()))?;
                ControlCommand::Interval(ms)
            }
            "reset" => ControlCommand::Reset,
            "terminate" => ControlCommand::Terminate,
            "show" | "status" => ControlCommand::Show,
            "help" | "?" => ControlCommand::Help,
            "quit" | "exit" => ControlCommand::Quit,
            _ => return Err(CommandParseError::Unknown(verb)),
        };
        Ok(command)
    }
}

/// Errors from executing a well-formed command.
#[derive(Debug, Error)]
pub enum ConsoleError {
    #[error(transparent)]
    Board(#[from] BoardError),

    #[error(transparent)]
    Sync(#[from] SyncError),
}

/// What the input loop should do after a command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Silent,
    Text(String),
    Quit,
}

/// Executes one command against the session.
///
/// `reset` returns as soon as the local bank is reset; the broker's answer
/// arrives later as a [`SyncEvent`](crate::domain::SyncEvent).
pub async fn execute(
    command: ControlCommand,
    scheduler: &mut SyncScheduler,
    board: &BoardLayout,
) -> Result<Reply, ConsoleError> {
    match command {
        ControlCommand::Press(button) => {
            board.press(&mut lock_bank(&scheduler.bank()), &button)?;
        }
        ControlCommand::Release(button) => {
            board.release(&mut lock_bank(&scheduler.bank()), &button)?;
        }
        ControlCommand::Play => scheduler.play()?,
        ControlCommand::Pause => scheduler.pause(),
        ControlCommand::Interval(ms) => scheduler.set_interval(Duration::from_millis(ms))?,
        ControlCommand::Reset => {
            // Detached: the outcome is reported through the event stream.
            drop(scheduler.reset()?);
        }
        ControlCommand::Terminate => scheduler.terminate().await?,
        ControlCommand::Show => {
            let bank = scheduler.bank();
            let text = render_status(&lock_bank(&bank), board, scheduler);
            return Ok(Reply::Text(text));
        }
        ControlCommand::Help => return Ok(Reply::Text(HELP.to_string())),
        ControlCommand::Quit => return Ok(Reply::Quit),
    }
    Ok(Reply::Silent)
}

/// Renders the session state, every register and every LED.
pub fn render_status(bank: &RegisterBank, board: &BoardLayout, scheduler: &SyncScheduler) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "broker: {}  sync: {:?} every {:?}",
        scheduler.connection_state(),
        scheduler.run_state(),
        scheduler.interval()
    );
    bank.for_each_register(|register| {
        let _ = writeln!(out, "  {:<7} {}", register.key(), register.to_hex());
    });
    match board.led_states(bank) {
        Ok(leds) => {
            let row: Vec<String> = leds
                .iter()
                .map(|(name, on)| format!("{name}:{}", if *on { "on" } else { "off" }))
                .collect();
            let _ = write!(out, "  leds    {}", row.join(" "));
        }
        Err(e) => {
            let _ = write!(out, "  leds    unavailable ({e})");
        }
    }
    out
}

// ── LED observer ──────────────────────────────────────────────────────────────

/// Logs LED and button transitions as the bank changes.
///
/// The sync loop rewrites `output` on every tick, so the observer remembers
/// the last value and reports only the pins that actually flipped.
pub struct LedObserver {
    board: BoardLayout,
    last_output: Mutex<Option<u32>>,
}

impl LedObserver {
    pub fn new(board: BoardLayout) -> Self {
        Self {
            board,
            last_output: Mutex::new(None),
        }
    }

    /// LED names whose level differs between `before` and `after`, with the
    /// new level.
    fn flipped(&self, before: u32, after: u32) -> Vec<(&str, bool)> {
        self.board
            .leds
            .iter()
            .filter(|(_, &pin)| pin < 32 && (before ^ after) & (1u32 << pin) != 0)
            .map(|(name, &pin)| (name.as_str(), after & (1u32 << pin) != 0))
            .collect()
    }

    /// Records the new `output` value and logs the LEDs it flipped.
    fn update_output(&self, next: impl FnOnce(u32) -> u32) {
        let mut last = self
            .last_output
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let before = last.unwrap_or(0);
        let after = next(before);
        *last = Some(after);
        for (name, on) in self.flipped(before, after) {
            info!("{name} {}", if on { "on" } else { "off" });
        }
    }
}

impl RegisterObserver for LedObserver {
    fn notify(&self, event: &RegisterEvent) {
        match event {
            RegisterEvent::RegisterChanged { key, value } if key == LED_REGISTER => {
                self.update_output(|_| *value);
            }
            // Pin-level sync writes LEDs one pin at a time.
            RegisterEvent::PinChanged { key, pin, bit } if key == LED_REGISTER && *pin < 32 => {
                let mask = 1u32 << *pin;
                self.update_output(|before| if *bit == 1 { before | mask } else { before & !mask });
            }
            RegisterEvent::PinChanged { key, pin, bit } if key == BUTTON_REGISTER => {
                let name = self
                    .board
                    .buttons
                    .iter()
                    .find(|(_, p)| *p == pin)
                    .map_or("button", |(name, _)| name.as_str());
                info!("{name} {}", if *bit == 1 { "pressed" } else { "released" });
            }
            _ => {}
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
