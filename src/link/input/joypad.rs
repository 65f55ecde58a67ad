use bitflags::bitflags;

bitflags! {
    /// One controller byte as the target reads it.
    pub struct Buttons: u8 {
        const A = 1;
        const B = 1 << 1;
        const SELECT = 1 << 2;
        const START = 1 << 3;
        const UP = 1 << 4;
        const DOWN = 1 << 5;
        const LEFT = 1 << 6;
        const RIGHT = 1 << 7;
        const VERTICAL = Self::UP.bits | Self::DOWN.bits;
        const HORIZONTAL = Self::LEFT.bits | Self::RIGHT.bits;
    }
}

impl Default for Buttons {
    fn default() -> Self {
        Buttons::empty()
    }
}

/// Face and menu buttons, named after their position on a modern pad.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Key {
    South,
    East,
    Select,
    Start,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HatAxis {
    X,
    Y,
}

/// A raw report from an input device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputEvent {
    Key { key: Key, pressed: bool },
    /// Absolute d-pad position: negative is up/left, positive is down/right, zero is centred.
    Hat { axis: HatAxis, value: i32 },
    /// Anything the NES pad has no bit for.
    Other,
}

impl InputEvent {
    /// New mask after this event. Hat reports are absolute, so both directions of the axis
    /// are cleared before the active one is set.
    pub fn apply(&self, buttons: Buttons) -> Buttons {
        let mut buttons = buttons;
        match *self {
            InputEvent::Key { key, pressed } => {
                let bit = match key {
                    Key::South => Buttons::A,
                    Key::East => Buttons::B,
                    Key::Select => Buttons::SELECT,
                    Key::Start => Buttons::START,
                };
                buttons.set(bit, pressed);
            }
            InputEvent::Hat { axis, value } => {
                let (pair, negative, positive) = match axis {
                    HatAxis::X => (Buttons::HORIZONTAL, Buttons::LEFT, Buttons::RIGHT),
                    HatAxis::Y => (Buttons::VERTICAL, Buttons::UP, Buttons::DOWN),
                };
                buttons.remove(pair);
                if value < 0 {
                    buttons.insert(negative);
                } else if value > 0 {
                    buttons.insert(positive);
                }
            }
            InputEvent::Other => {}
        }
        buttons
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Up,
    Down,
    Left,
    Right,
}

/// Turns a d-pad reported as four buttons into absolute [`InputEvent::Hat`] positions.
///
/// Releasing one direction falls back to the opposite one if that is still held, so a rolling
/// left-right-release-left leaves RIGHT pressed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Dpad {
    held: Buttons,
}

impl Dpad {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, direction: Direction, pressed: bool) -> InputEvent {
        let (axis, bit, opposite, value) = match direction {
            Direction::Up => (HatAxis::Y, Buttons::UP, Buttons::DOWN, -1),
            Direction::Down => (HatAxis::Y, Buttons::DOWN, Buttons::UP, 1),
            Direction::Left => (HatAxis::X, Buttons::LEFT, Buttons::RIGHT, -1),
            Direction::Right => (HatAxis::X, Buttons::RIGHT, Buttons::LEFT, 1),
        };
        self.held.set(bit, pressed);
        let value = if pressed {
            value
        } else if self.held.contains(opposite) {
            -value
        } else {
            0
        };
        InputEvent::Hat { axis, value }
    }
}

/// One player slot: which device feeds it and what that device is holding down.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Joypad {
    identity: Option<String>,
    connected: bool,
    pressed_keys: Buttons,
}

impl Joypad {
    pub fn new() -> Self {
        Self::default()
    }

    /// Name of the device last bound here. Kept after a disconnect so the other slot won't
    /// grab it when it comes back.
    pub fn identity(&self) -> Option<&str> {
        self.identity.as_deref()
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn bind(&mut self, identity: String) {
        self.identity = Some(identity);
        self.connected = true;
    }

    pub fn unbind(&mut self) {
        self.connected = false;
    }

    pub fn set(&mut self, keys: Buttons) {
        self.pressed_keys = keys;
    }

    pub fn get(&self) -> Buttons {
        self.pressed_keys
    }

    pub fn apply(&mut self, event: &InputEvent) {
        self.pressed_keys = event.apply(self.pressed_keys);
    }
}
