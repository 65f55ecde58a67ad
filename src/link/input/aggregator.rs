//! Two player slots fed by independent devices.
//!
//! Each slot has a worker thread that either reads its bound device or, while unbound, scans
//! for one at a fixed interval. Workers push what they read into one channel; the [`PadHub`]
//! owning the receiving end applies it to the shared [`ControllerState`] and reports the
//! combined mask only when it differs from the one reported last.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use log::{debug, info, warn};

use crate::link::config::{DisconnectPolicy, LinkConfig};
use crate::link::input::joypad::{Buttons, InputEvent, Joypad};
use crate::link::input::source::{InputSource, ScanSchedule, SourceScanner};
use crate::link::serial::protocol::TransportError;

pub const SLOTS: usize = 2;
const RUN_POLL: Duration = Duration::from_millis(100);

/// Both slots. The binding rule spans the pair, so they sit behind a single lock.
#[derive(Debug, Default)]
pub struct ControllerState {
    joypads: [Joypad; SLOTS],
}

pub type SharedState = Arc<Mutex<ControllerState>>;

fn lock(state: &SharedState) -> MutexGuard<'_, ControllerState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

impl ControllerState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn joypad(&self, slot: usize) -> &Joypad {
        &self.joypads[slot]
    }

    pub fn masks(&self) -> [u8; SLOTS] {
        [self.joypads[0].get().bits(), self.joypads[1].get().bits()]
    }

    /// Index of the first candidate that isn't the other slot's device.
    pub fn pick(&self, slot: usize, candidates: &[String]) -> Option<usize> {
        let other = self.joypads[1 - slot].identity();
        candidates.iter().position(|c| Some(c.as_str()) != other)
    }

    /// Slot 0 gets first pick while both slots are waiting.
    fn defers_to_first_slot(&self, slot: usize, candidates: &[String]) -> bool {
        slot == 1 && !self.joypads[0].is_connected() && self.pick(0, candidates).is_some()
    }

    pub fn bind(&mut self, slot: usize, identity: String) {
        self.joypads[slot].bind(identity);
    }

    pub fn unbind(&mut self, slot: usize) {
        self.joypads[slot].unbind();
    }

    pub fn apply(&mut self, slot: usize, event: &InputEvent) {
        self.joypads[slot].apply(event);
    }

    pub fn release_all(&mut self, slot: usize) {
        self.joypads[slot].set(Buttons::empty());
    }
}

/// Scans for a device for `slot` and binds it, all under the state lock so the two slots
/// never decide at the same time.
pub fn try_bind(
    state: &SharedState,
    slot: usize,
    scanner: &dyn SourceScanner,
) -> Option<Box<dyn InputSource>> {
    let mut state = lock(state);
    let candidates = scanner.available();
    if state.defers_to_first_slot(slot, &candidates) {
        return None;
    }
    let index = state.pick(slot, &candidates)?;
    let source = scanner.claim(&candidates[index])?;
    state.bind(slot, source.identity().to_string());
    info!("Controller {} connected: {}", slot + 1, source.identity());
    Some(source)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PadMessage {
    Events(Vec<InputEvent>),
    Disconnected,
}

/// The merge point. Only this mutates button masks.
#[derive(Debug)]
pub struct Aggregator {
    state: SharedState,
    policy: DisconnectPolicy,
    last_sent: Option<[u8; SLOTS]>,
}

impl Aggregator {
    pub fn new(state: SharedState, policy: DisconnectPolicy) -> Self {
        // the target powers up with nothing pressed
        Self { state, policy, last_sent: Some([0; SLOTS]) }
    }

    /// Applies one message and returns the masks to send, if they changed.
    pub fn handle(&mut self, slot: usize, message: PadMessage) -> Option<[u8; SLOTS]> {
        let masks = {
            let mut state = lock(&self.state);
            match message {
                PadMessage::Events(events) => {
                    for event in &events {
                        state.apply(slot, event);
                    }
                }
                PadMessage::Disconnected => {
                    if self.policy == DisconnectPolicy::ReleaseAll {
                        state.release_all(slot);
                    }
                }
            }
            state.masks()
        };
        if self.last_sent == Some(masks) {
            return None;
        }
        self.last_sent = Some(masks);
        debug!("Buttons: {:02x}, {:02x}", masks[0], masks[1]);
        Some(masks)
    }

    /// Makes the next [`handle`](Self::handle) report the masks even if they didn't change.
    pub fn resend(&mut self) {
        self.last_sent = None;
    }
}

struct SlotWorker {
    slot: usize,
    state: SharedState,
    scanner: Arc<dyn SourceScanner>,
    tx: Sender<(usize, PadMessage)>,
    schedule: ScanSchedule,
    shutdown: Arc<AtomicBool>,
    source: Option<Box<dyn InputSource>>,
}

impl SlotWorker {
    fn run(mut self) {
        while !self.shutdown.load(Ordering::Relaxed) {
            match self.source.as_mut().map(|source| source.read_events()) {
                Some(Ok(events)) => {
                    if events.is_empty() {
                        continue;
                    }
                    if self.tx.send((self.slot, PadMessage::Events(events))).is_err() {
                        return;
                    }
                }
                Some(Err(e)) => {
                    warn!("Controller {} disconnected: {}", self.slot + 1, e);
                    lock(&self.state).unbind(self.slot);
                    self.source = None;
                    if self.tx.send((self.slot, PadMessage::Disconnected)).is_err() {
                        return;
                    }
                }
                None => {
                    let now = Instant::now();
                    if !self.schedule.is_due(now) {
                        thread::sleep(self.schedule.wait_time(now));
                        continue;
                    }
                    match try_bind(&self.state, self.slot, &*self.scanner) {
                        Some(source) => {
                            self.schedule.reset();
                            self.source = Some(source);
                        }
                        None => self.schedule.missed(now),
                    }
                }
            }
        }
    }
}

/// Owns the controller state, the slot workers and the merged event stream.
pub struct PadHub {
    state: SharedState,
    aggregator: Aggregator,
    events: Receiver<(usize, PadMessage)>,
    shutdown: Arc<AtomicBool>,
    workers: Vec<JoinHandle<()>>,
    closed: bool,
}

impl PadHub {
    pub fn start(scanner: Arc<dyn SourceScanner>, config: &LinkConfig) -> io::Result<PadHub> {
        let state: SharedState = Arc::new(Mutex::new(ControllerState::new()));
        let shutdown = Arc::new(AtomicBool::new(false));
        let (tx, events) = mpsc::channel();

        // first pass in slot order, so slot 0 takes the first pad found
        let initial: Vec<_> = (0..SLOTS).map(|slot| try_bind(&state, slot, &*scanner)).collect();
        let mut workers = Vec::with_capacity(SLOTS);
        for (slot, source) in initial.into_iter().enumerate() {
            let worker = SlotWorker {
                slot,
                state: state.clone(),
                scanner: scanner.clone(),
                tx: tx.clone(),
                schedule: ScanSchedule::new(config.scan_interval),
                shutdown: shutdown.clone(),
                source,
            };
            let handle = thread::Builder::new()
                .name(format!("pad-{}", slot))
                .spawn(move || worker.run())?;
            workers.push(handle);
        }

        Ok(PadHub {
            aggregator: Aggregator::new(state.clone(), config.disconnect),
            state,
            events,
            shutdown,
            workers,
            closed: false,
        })
    }

    pub fn state(&self) -> SharedState {
        self.state.clone()
    }

    /// Flag that stops the workers and [`run`](Self::run) once set.
    pub fn shutdown_flag(&self) -> Arc<AtomicBool> {
        self.shutdown.clone()
    }

    /// Waits up to `timeout` for the combined mask to change.
    pub fn next_change(&mut self, timeout: Duration) -> Option<[u8; SLOTS]> {
        let deadline = Instant::now() + timeout;
        loop {
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            match self.events.recv_timeout(deadline - now) {
                Ok((slot, message)) => {
                    if let Some(masks) = self.aggregator.handle(slot, message) {
                        return Some(masks);
                    }
                }
                Err(RecvTimeoutError::Timeout) => return None,
                Err(RecvTimeoutError::Disconnected) => {
                    self.closed = true;
                    return None;
                }
            }
        }
    }

    /// Hands every change to `emit` until shut down. A failed send is logged and the next
    /// change goes out in full regardless.
    pub fn run<F>(&mut self, mut emit: F)
    where
        F: FnMut([u8; SLOTS]) -> Result<(), TransportError>,
    {
        while !self.closed && !self.shutdown.load(Ordering::Relaxed) {
            if let Some(masks) = self.next_change(RUN_POLL) {
                if let Err(e) = emit(masks) {
                    warn!("Dropped button update {:02x}, {:02x}: {}", masks[0], masks[1], e);
                    self.aggregator.resend();
                }
            }
        }
    }

    pub fn shutdown(mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        for worker in std::mem::take(&mut self.workers) {
            if worker.join().is_err() {
                warn!("Controller worker panicked");
            }
        }
    }
}

impl Drop for PadHub {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::input::joypad::{HatAxis, Key};
    use crate::link::input::source::DeviceError;

    struct FakePad {
        name: String,
        rx: Receiver<Vec<InputEvent>>,
    }

    impl InputSource for FakePad {
        fn identity(&self) -> &str {
            &self.name
        }

        fn read_events(&mut self) -> Result<Vec<InputEvent>, DeviceError> {
            match self.rx.recv_timeout(Duration::from_millis(5)) {
                Ok(events) => Ok(events),
                Err(RecvTimeoutError::Timeout) => Ok(vec![]),
                Err(RecvTimeoutError::Disconnected) => Err(DeviceError {
                    identity: self.name.clone(),
                    reason: "unplugged".into(),
                }),
            }
        }
    }

    #[derive(Default)]
    struct FakeScanner {
        attached: Mutex<Vec<FakePad>>,
    }

    impl FakeScanner {
        fn plug(&self, name: &str) -> Sender<Vec<InputEvent>> {
            let (tx, rx) = mpsc::channel();
            self.attached.lock().unwrap().push(FakePad { name: name.into(), rx });
            tx
        }
    }

    impl SourceScanner for FakeScanner {
        fn available(&self) -> Vec<String> {
            self.attached.lock().unwrap().iter().map(|p| p.name.clone()).collect()
        }

        fn claim(&self, identity: &str) -> Option<Box<dyn InputSource>> {
            let mut attached = self.attached.lock().unwrap();
            let index = attached.iter().position(|p| p.name == identity)?;
            Some(Box::new(attached.remove(index)))
        }
    }

    fn press(key: Key) -> InputEvent {
        InputEvent::Key { key, pressed: true }
    }

    fn release(key: Key) -> InputEvent {
        InputEvent::Key { key, pressed: false }
    }

    const RELEASE: DisconnectPolicy = DisconnectPolicy::ReleaseAll;
    const KEEP: DisconnectPolicy = DisconnectPolicy::KeepLast;

    fn test_config(disconnect: DisconnectPolicy) -> LinkConfig {
        LinkConfig {
            scan_interval: Duration::from_millis(10),
            disconnect,
            ..LinkConfig::default()
        }
    }

    fn wait_for<F: Fn(&ControllerState) -> bool>(state: &SharedState, cond: F) -> bool {
        for _ in 0..200 {
            if cond(&lock(state)) {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        false
    }

    #[test]
    fn pick_skips_other_slots_device() {
        let mut state = ControllerState::new();
        state.bind(0, "pad".into());
        let candidates = vec!["pad".to_string(), "stick".to_string()];
        assert_eq!(state.pick(1, &candidates), Some(1));
        assert_eq!(state.pick(1, &candidates[..1]), None);
        // the remembered identity still counts once its device is gone
        state.unbind(0);
        assert_eq!(state.pick(1, &candidates[..1]), None);
    }

    #[test]
    fn second_slot_waits_for_first() {
        let state = ControllerState::new();
        let candidates = vec!["pad".to_string()];
        assert!(state.defers_to_first_slot(1, &candidates));
        assert!(!state.defers_to_first_slot(0, &candidates));
        assert!(!state.defers_to_first_slot(1, &[]));
    }

    #[test]
    fn emits_only_on_change() {
        let state: SharedState = Arc::new(Mutex::new(ControllerState::new()));
        let mut aggregator = Aggregator::new(state, DisconnectPolicy::ReleaseAll);
        let right = InputEvent::Hat { axis: HatAxis::X, value: 1 };
        let mut handle = |slot, events| aggregator.handle(slot, PadMessage::Events(events));
        assert_eq!(handle(0, vec![press(Key::South)]), Some([0x01, 0x00]));
        assert_eq!(handle(0, vec![press(Key::South)]), None);
        assert_eq!(handle(1, vec![InputEvent::Other]), None);
        assert_eq!(handle(0, vec![]), None);
        assert_eq!(handle(1, vec![right]), Some([0x01, 0x80]));
        assert_eq!(handle(0, vec![release(Key::South)]), Some([0x00, 0x80]));
    }

    #[test]
    fn press_and_release_in_one_batch_is_silent() {
        let state: SharedState = Arc::new(Mutex::new(ControllerState::new()));
        let mut aggregator = Aggregator::new(state, DisconnectPolicy::ReleaseAll);
        let batch = vec![press(Key::Start), release(Key::Start)];
        assert_eq!(aggregator.handle(0, PadMessage::Events(batch)), None);
    }

    #[test]
    fn resend_repeats_unchanged_masks() {
        let state: SharedState = Arc::new(Mutex::new(ControllerState::new()));
        let mut aggregator = Aggregator::new(state, DisconnectPolicy::ReleaseAll);
        aggregator.handle(0, PadMessage::Events(vec![press(Key::East)]));
        aggregator.resend();
        assert_eq!(aggregator.handle(0, PadMessage::Events(vec![])), Some([0x02, 0x00]));
    }

    #[test]
    fn disconnect_policy_decides_the_mask() {
        let state: SharedState = Arc::new(Mutex::new(ControllerState::new()));
        let mut release_all = Aggregator::new(state.clone(), DisconnectPolicy::ReleaseAll);
        release_all.handle(0, PadMessage::Events(vec![press(Key::South)]));
        assert_eq!(release_all.handle(0, PadMessage::Disconnected), Some([0x00, 0x00]));

        let state: SharedState = Arc::new(Mutex::new(ControllerState::new()));
        let mut keep_last = Aggregator::new(state.clone(), DisconnectPolicy::KeepLast);
        keep_last.handle(0, PadMessage::Events(vec![press(Key::South)]));
        assert_eq!(keep_last.handle(0, PadMessage::Disconnected), None);
        assert_eq!(lock(&state).masks(), [0x01, 0x00]);
    }

    #[test]
    fn hub_binds_in_slot_order_and_merges_events() {
        let scanner = Arc::new(FakeScanner::default());
        let pad_a = scanner.plug("pad-a");
        let pad_b = scanner.plug("pad-b");
        let mut hub = PadHub::start(scanner.clone(), &test_config(RELEASE)).unwrap();
        {
            let state = hub.state();
            let state = lock(&state);
            assert_eq!(state.joypad(0).identity(), Some("pad-a"));
            assert_eq!(state.joypad(1).identity(), Some("pad-b"));
        }

        pad_b.send(vec![press(Key::South)]).unwrap();
        assert_eq!(hub.next_change(Duration::from_secs(1)), Some([0x00, 0x01]));
        pad_a.send(vec![InputEvent::Hat { axis: HatAxis::Y, value: -1 }]).unwrap();
        assert_eq!(hub.next_change(Duration::from_secs(1)), Some([0x10, 0x01]));
        pad_a.send(vec![InputEvent::Hat { axis: HatAxis::Y, value: -1 }]).unwrap();
        assert_eq!(hub.next_change(Duration::from_millis(100)), None);

        drop(pad_a);
        assert_eq!(hub.next_change(Duration::from_secs(1)), Some([0x00, 0x01]));
        assert!(!lock(&hub.state()).joypad(0).is_connected());
        hub.shutdown();
    }

    #[test]
    fn replugged_pad_does_not_jump_slots() {
        let scanner = Arc::new(FakeScanner::default());
        let _pad_a = scanner.plug("pad-a");
        let pad_b = scanner.plug("pad-b");
        let hub = PadHub::start(scanner.clone(), &test_config(RELEASE)).unwrap();
        let state = hub.state();

        drop(pad_b);
        assert!(wait_for(&state, |s| !s.joypad(1).is_connected()));

        // a second pad with slot 0's name must not land in slot 1
        let _twin = scanner.plug("pad-a");
        thread::sleep(Duration::from_millis(50));
        assert!(!lock(&state).joypad(1).is_connected());

        let _pad_c = scanner.plug("pad-c");
        assert!(wait_for(&state, |s| s.joypad(1).is_connected()));
        assert_eq!(lock(&state).joypad(1).identity(), Some("pad-c"));
        hub.shutdown();
    }

    #[test]
    fn one_device_never_fills_both_slots() {
        let scanner = Arc::new(FakeScanner::default());
        let _pad = scanner.plug("only-pad");
        let hub = PadHub::start(scanner.clone(), &test_config(KEEP)).unwrap();
        let state = hub.state();
        thread::sleep(Duration::from_millis(50));
        {
            let state = lock(&state);
            assert!(state.joypad(0).is_connected());
            assert!(!state.joypad(1).is_connected());
        }
        hub.shutdown();
    }

    #[test]
    fn run_emits_changes_until_shutdown() {
        let scanner = Arc::new(FakeScanner::default());
        let pad = scanner.plug("pad-a");
        let mut hub = PadHub::start(scanner.clone(), &test_config(RELEASE)).unwrap();
        let shutdown = hub.shutdown_flag();

        pad.send(vec![press(Key::Select)]).unwrap();
        pad.send(vec![press(Key::Select)]).unwrap();
        pad.send(vec![release(Key::Select)]).unwrap();
        let mut sent = vec![];
        hub.run(|masks| {
            sent.push(masks);
            if sent.len() == 2 {
                shutdown.store(true, Ordering::Relaxed);
            }
            Ok(())
        });
        assert_eq!(sent, vec![[0x04, 0x00], [0x00, 0x00]]);
        hub.shutdown();
    }
}
