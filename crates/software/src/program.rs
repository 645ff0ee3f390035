//! This module contains [`Program`], the state machine that sequences the device from power-on through normal
//! operation.
//!
//! ```text
//! Welcome -> Initializing -> Running
//!                 |  ^
//!                 v  |
//!             NoSettings
//!
//! (any failure while loading or creating settings) -> FatalError
//! ```
//!
//! [`Program::tick`] performs one step and tells the caller how long to pause before the next one, so the program
//! never sleeps on its own and tests can drive it one step at a time.

use crate::{
    codec::{self, CodecError, CommitError},
    configuration::{DeviceConfig, FailurePolicy},
    dispatcher::{self, DispatchError},
    io::{Board, Indicator, InputEdge, Io, MidiSink, MidiSource, Transport, TransportError, show},
    protocol::{ProtocolError, Request, Response},
    settings::Settings,
};
use alloc::{format, string::String};
use embassy_time::{Duration, Instant};
use thiserror::Error;
use wmidi::{ControlFunction, MidiMessage, U7};

/// Frames shown at power-on.
const GREETING: [(&str, &str); 2] = [
    ("Synth", "Transformer"),
    ("Firmware", concat!("v", env!("CARGO_PKG_VERSION"))),
];

/// Indicator pattern in the fatal error state, as (lit, milliseconds): three short flashes, then a long pause.
const DISTRESS: [(bool, u64); 6] = [
    (true, 100),
    (false, 100),
    (true, 100),
    (false, 100),
    (true, 100),
    (false, 800),
];

/// Something that took the device into [`ProgramState::FatalError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Fault {
    /// The persisted settings could not be loaded.
    #[error("loading settings: {0}")]
    Load(CodecError),
    /// Settings could not be persisted.
    #[error("committing settings: {0}")]
    Commit(CommitError),
    /// The editor sent something unusable.
    #[error("protocol: {0}")]
    Protocol(ProtocolError),
    /// The editor link failed mid-message.
    #[error("transport: {0}")]
    Transport(TransportError),
    /// A request could not be carried out.
    #[error("request: {0}")]
    Dispatch(DispatchError),
}

/// Where the device is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ProgramState {
    /// Showing the greeting.
    Welcome,
    /// Loading settings from storage.
    Initializing,
    /// Translating MIDI and serving the editor.
    Running,
    /// Storage is blank; default settings are about to be written.
    NoSettings,
    /// Terminal. The indicator repeats the distress pattern until the device is power cycled.
    FatalError(Fault),
}

/// The device's top-level state machine. Owns the [`Settings`] in use.
pub struct Program {
    state: ProgramState,
    settings: Settings,
    config: DeviceConfig,
    /// Greeting frame or distress step, depending on the state.
    step: usize,
    /// When a status screen gives way to the preset screen.
    preset_screen_due: Option<Instant>,
}

impl Program {
    /// Constructs a new [`Program`] at the start of the greeting, holding default settings until storage is read.
    pub fn new(config: DeviceConfig) -> Self {
        Self {
            state: ProgramState::Welcome,
            settings: Settings::default(),
            config,
            step: 0,
            preset_screen_due: None,
        }
    }

    /// The current state.
    pub fn state(&self) -> ProgramState {
        self.state
    }

    /// The settings currently in use.
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Performs one step and returns how long to wait before the next.
    pub async fn tick<B: Board>(&mut self, io: &mut Io<B>) -> Duration {
        match self.state {
            ProgramState::Welcome => self.welcome(io),
            ProgramState::Initializing => self.initialize(io),
            ProgramState::Running => self.run(io).await,
            ProgramState::NoSettings => self.create_default_settings(io),
            ProgramState::FatalError(_) => self.signal_distress(io),
        }
    }

    fn welcome<B: Board>(&mut self, io: &mut Io<B>) -> Duration {
        match GREETING.get(self.step) {
            Some((top, bottom)) => {
                show(&mut io.display, top, bottom);
                io.indicator.set(true);
                self.step += 1;
                self.config.welcome_frame_hold
            }
            None => {
                io.indicator.set(false);
                self.enter(ProgramState::Initializing);
                Duration::from_ticks(0)
            }
        }
    }

    fn initialize<B: Board>(&mut self, io: &mut Io<B>) -> Duration {
        match codec::load(&mut io.storage, self.config.max_record_len) {
            Ok(Some(settings)) => {
                self.settings = settings;
                show(&mut io.display, "Initialized", &preset_count_text(&self.settings));
                self.preset_screen_due = Some(Instant::now() + self.config.status_hold);
                self.enter(ProgramState::Running);
                self.config.tick_interval
            }
            Ok(None) => {
                show(&mut io.display, "Error:", "Memory Blank");
                self.enter(ProgramState::NoSettings);
                self.config.status_hold
            }
            Err(e) => self.fail(io, Fault::Load(e)),
        }
    }

    fn create_default_settings<B: Board>(&mut self, io: &mut Io<B>) -> Duration {
        match codec::commit(&Settings::default(), &mut io.storage, self.config.max_record_len) {
            Ok(()) => {
                info!("Wrote default settings");
                self.enter(ProgramState::Initializing);
                self.config.idle_interval
            }
            Err(e) => self.fail(io, Fault::Commit(e)),
        }
    }

    async fn run<B: Board>(&mut self, io: &mut Io<B>) -> Duration {
        if io.transport.available() {
            io.indicator.set(true);
            let serviced = self.serve_editor(io).await;
            io.indicator.set(false);

            if let Err(fault) = serviced {
                match self.config.failure_policy {
                    FailurePolicy::Halt => return self.fail(io, fault),
                    FailurePolicy::Recover => warn!("Recovered from {}", fault),
                }
            }
        }

        if io.button.went_active() {
            self.settings.activate_next_preset();
            debug!("Activated preset {}", self.settings.current_preset_id());
            self.show_preset(io);
        }

        self.forward_midi(io).await;

        if self.preset_screen_due.is_some_and(|due| Instant::now() >= due) {
            self.show_preset(io);
        }

        self.config.tick_interval
    }

    /// Reads, executes and answers one request. Every failure is answered with an error response before it is
    /// returned.
    async fn serve_editor<B: Board>(&mut self, io: &mut Io<B>) -> Result<(), Fault> {
        let message = match io
            .transport
            .read_message(self.config.read_timeout, self.config.max_message_len)
            .await
        {
            Ok(message) => message,
            Err(TransportError::Disconnected) => {
                warn!("Editor disconnected");
                return Ok(());
            }
            Err(e) => {
                reply(io, &Response::Error(e.code())).await;
                return Err(Fault::Transport(e));
            }
        };

        let request = match Request::decode(&message) {
            Ok(request) => request,
            Err(e) => {
                reply(io, &Response::Error(e.code())).await;
                return Err(Fault::Protocol(e));
            }
        };
        debug!("Handling {}", request.id());

        match dispatcher::handle(request, &mut self.settings, &mut io.storage, self.config.max_record_len) {
            Ok(response) => {
                reply(io, &response).await;
                match response {
                    Response::ReplaceAck => self.show_preset(io),
                    Response::CommitAck => {
                        show(&mut io.display, "Saved settings", &preset_count_text(&self.settings));
                        self.preset_screen_due = Some(Instant::now() + self.config.status_hold);
                    }
                    Response::Load(_) | Response::Error(_) => {}
                }
                Ok(())
            }
            // asking for a record that was never written is not a malfunction
            Err(DispatchError::Blank) => {
                reply(io, &Response::Error(DispatchError::Blank.code())).await;
                Ok(())
            }
            Err(e) => {
                reply(io, &Response::Error(e.code())).await;
                Err(Fault::Dispatch(e))
            }
        }
    }

    /// Passes every pending message to the synthesizer: CCs translated through the active preset, notes as they
    /// are, all on the active preset's channel. Anything else is dropped.
    async fn forward_midi<B: Board>(&mut self, io: &mut Io<B>) {
        while let Some(message) = io.midi_in.poll() {
            let channel = self.settings.current_channel();
            let sent = match message {
                MidiMessage::ControlChange(_, function, value) => {
                    let output = self
                        .settings
                        .translate_cc(U7::from_u8_lossy(u8::from(function)));
                    io.midi_out
                        .send_control_change(ControlFunction::from(output), value, channel)
                        .await
                }
                MidiMessage::NoteOn(_, note, velocity) => {
                    io.indicator.set(true);
                    io.midi_out.send_note_on(note, velocity, channel).await
                }
                MidiMessage::NoteOff(_, note, velocity) => {
                    io.indicator.set(false);
                    io.midi_out.send_note_off(note, velocity, channel).await
                }
                _ => continue,
            };

            if let Err(e) = sent {
                warn!("{}", e);
            }
        }
    }

    fn signal_distress<B: Board>(&mut self, io: &mut Io<B>) -> Duration {
        let (lit, millis) = DISTRESS[self.step % DISTRESS.len()];
        io.indicator.set(lit);
        self.step = (self.step + 1) % DISTRESS.len();
        Duration::from_millis(millis)
    }

    fn fail<B: Board>(&mut self, io: &mut Io<B>, fault: Fault) -> Duration {
        error!("Halting: {}", fault);
        match fault {
            Fault::Load(_) => show(&mut io.display, "Error during", "initialization"),
            _ => show(&mut io.display, "Error:", "Halted"),
        }
        io.indicator.set(false);
        self.enter(ProgramState::FatalError(fault));
        Duration::from_ticks(0)
    }

    fn show_preset<B: Board>(&mut self, io: &mut Io<B>) {
        self.preset_screen_due = None;
        let top = format!(
            "{}:{}",
            self.settings.current_preset_id(),
            self.settings.current_synth_name()
        );
        show(&mut io.display, &top, "[Details]");
    }

    fn enter(&mut self, state: ProgramState) {
        debug!("{} -> {}", self.state, state);
        self.state = state;
        self.step = 0;
    }
}

async fn reply<B: Board>(io: &mut Io<B>, response: &Response) {
    if let Err(e) = io.transport.write(&response.encode()).await {
        warn!("Could not answer the editor: {}", e);
    }
}

fn preset_count_text(settings: &Settings) -> String {
    match settings.preset_count() {
        1 => String::from("1 preset"),
        n => format!("{} presets", n),
    }
}
