//! Stubbed status indicator.
//!
//! Maps coarse server states onto an LED color. No hardware is attached in
//! this build; the observable effect is one log line per color change.
//! Replace [`drive_hardware`] with GPIO writes on the target platform.

use parking_lot::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Booting,
    Operational,
    Processing,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedColor {
    Off,
    Green,
    Yellow,
    Red,
}

impl LedColor {
    fn name(self) -> &'static str {
        match self {
            LedColor::Off => "off",
            LedColor::Green => "green",
            LedColor::Yellow => "yellow",
            LedColor::Red => "red",
        }
    }
}

fn color_for_state(state: ServerState) -> LedColor {
    match state {
        ServerState::Booting | ServerState::Processing => LedColor::Yellow,
        ServerState::Operational => LedColor::Green,
        ServerState::Error => LedColor::Red,
    }
}

struct Indicator {
    state: ServerState,
    color: LedColor,
}

pub struct StatusIndicator {
    inner: Mutex<Indicator>,
}

impl StatusIndicator {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Indicator {
                state: ServerState::Booting,
                color: LedColor::Off,
            }),
        }
    }

    pub fn set_state(&self, state: ServerState) {
        let mut inner = self.inner.lock();
        inner.state = state;
        let next = color_for_state(state);
        if next != inner.color {
            inner.color = next;
            drive_hardware(next);
        }
    }

    pub fn state(&self) -> ServerState {
        self.inner.lock().state
    }

    pub fn color(&self) -> LedColor {
        self.inner.lock().color
    }
}

impl Default for StatusIndicator {
    fn default() -> Self {
        Self::new()
    }
}

fn drive_hardware(color: LedColor) {
    tracing::info!(color = color.name(), "status led updated");
}
