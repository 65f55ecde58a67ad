//! SDL2 game controllers as input sources.
//!
//! SDL has to be pumped from the thread that initialised it, so [`SdlHub`] stays on the main
//! thread and forwards each controller's events over its own channel. The slot workers only
//! ever see the receiving ends.

use std::collections::HashMap;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use log::{debug, info, warn};
use sdl2::controller::{Button, GameController};
use sdl2::event::Event;
use sdl2::{EventPump, GameControllerSubsystem, Sdl};

use crate::link::input::joypad::{Direction, Dpad, InputEvent, Key};
use crate::link::input::source::{DeviceError, InputSource, SourceScanner};

const READ_POLL: Duration = Duration::from_millis(100);

fn direction(button: Button) -> Option<Direction> {
    match button {
        Button::DPadUp => Some(Direction::Up),
        Button::DPadDown => Some(Direction::Down),
        Button::DPadLeft => Some(Direction::Left),
        Button::DPadRight => Some(Direction::Right),
        _ => None,
    }
}

fn translate(button: Button, pressed: bool) -> InputEvent {
    match button {
        Button::A => InputEvent::Key { key: Key::South, pressed },
        Button::B => InputEvent::Key { key: Key::East, pressed },
        Button::Back => InputEvent::Key { key: Key::Select, pressed },
        Button::Start => InputEvent::Key { key: Key::Start, pressed },
        _ => InputEvent::Other,
    }
}

pub struct SdlPad {
    name: String,
    rx: Receiver<InputEvent>,
}

impl InputSource for SdlPad {
    fn identity(&self) -> &str {
        &self.name
    }

    fn read_events(&mut self) -> Result<Vec<InputEvent>, DeviceError> {
        match self.rx.recv_timeout(READ_POLL) {
            Ok(first) => {
                let mut events = vec![first];
                events.extend(self.rx.try_iter());
                Ok(events)
            }
            Err(RecvTimeoutError::Timeout) => Ok(vec![]),
            Err(RecvTimeoutError::Disconnected) => Err(DeviceError {
                identity: self.name.clone(),
                reason: "controller removed".into(),
            }),
        }
    }
}

struct Pending {
    instance: u32,
    pad: SdlPad,
}

/// Controllers SDL reported that no slot has claimed yet.
#[derive(Default)]
pub struct SdlScanner {
    pending: Mutex<Vec<Pending>>,
}

impl SourceScanner for SdlScanner {
    fn available(&self) -> Vec<String> {
        let pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        pending.iter().map(|p| p.pad.name.clone()).collect()
    }

    fn claim(&self, identity: &str) -> Option<Box<dyn InputSource>> {
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        let index = pending.iter().position(|p| p.pad.name == identity)?;
        Some(Box::new(pending.remove(index).pad))
    }
}

struct OpenPad {
    controller: GameController,
    tx: Sender<InputEvent>,
    dpad: Dpad,
}

pub struct SdlHub {
    _sdl: Sdl,
    controllers: GameControllerSubsystem,
    pump: EventPump,
    open: HashMap<u32, OpenPad>,
    scanner: Arc<SdlScanner>,
}

impl SdlHub {
    pub fn new() -> Result<SdlHub, String> {
        let sdl = sdl2::init()?;
        let controllers = sdl.game_controller()?;
        let pump = sdl.event_pump()?;
        Ok(SdlHub {
            _sdl: sdl,
            controllers,
            pump,
            open: HashMap::new(),
            scanner: Arc::new(SdlScanner::default()),
        })
    }

    pub fn scanner(&self) -> Arc<SdlScanner> {
        self.scanner.clone()
    }

    /// Handles SDL events for up to `timeout`. Returns false once SDL asks to quit.
    pub fn pump(&mut self, timeout: Duration) -> bool {
        let first = self.pump.wait_event_timeout(timeout.as_millis() as u32);
        let rest: Vec<Event> = self.pump.poll_iter().collect();
        first.into_iter().chain(rest).all(|event| self.handle(event))
    }

    fn handle(&mut self, event: Event) -> bool {
        match event {
            Event::Quit { .. } => return false,
            Event::ControllerDeviceAdded { which, .. } => self.attach(which),
            Event::ControllerDeviceRemoved { which, .. } => self.detach(which),
            Event::ControllerButtonDown { which, button, .. } => self.forward(which, button, true),
            Event::ControllerButtonUp { which, button, .. } => self.forward(which, button, false),
            _ => {}
        }
        true
    }

    fn attach(&mut self, index: u32) {
        let controller = match self.controllers.open(index) {
            Ok(c) => c,
            Err(e) => {
                warn!("Couldn't open controller #{}: {}", index, e);
                return;
            }
        };
        let name = controller.name();
        let instance = controller.instance_id();
        info!("Controller attached: {} (#{})", name, instance);
        let (tx, rx) = mpsc::channel();
        self.scanner.pending.lock().unwrap_or_else(PoisonError::into_inner)
            .push(Pending { instance, pad: SdlPad { name, rx } });
        self.open.insert(instance, OpenPad { controller, tx, dpad: Dpad::new() });
    }

    fn detach(&mut self, instance: u32) {
        // dropping the sender is what the bound slot notices
        if let Some(pad) = self.open.remove(&instance) {
            info!("Controller removed: {} (#{})", pad.controller.name(), instance);
        }
        self.scanner.pending.lock().unwrap_or_else(PoisonError::into_inner)
            .retain(|p| p.instance != instance);
    }

    fn forward(&mut self, instance: u32, button: Button, pressed: bool) {
        if let Some(pad) = self.open.get_mut(&instance) {
            let event = match direction(button) {
                Some(d) => pad.dpad.update(d, pressed),
                None => translate(button, pressed),
            };
            if pad.tx.send(event).is_err() {
                debug!("Dropped event for released controller #{}", instance);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::input::joypad::{Buttons, Joypad};

    #[test]
    fn rolling_dpad_keeps_the_held_direction() {
        let mut dpad = Dpad::new();
        let mut pad = Joypad::new();
        for &(button, pressed) in &[
            (Button::DPadLeft, true),
            (Button::DPadRight, true),
            (Button::DPadLeft, false),
            (Button::A, true),
        ] {
            let event = match direction(button) {
                Some(d) => dpad.update(d, pressed),
                None => translate(button, pressed),
            };
            pad.apply(&event);
        }
        assert_eq!(pad.get(), Buttons::RIGHT | Buttons::A);
    }
}
