//! Device status aggregation
//!
//! Every status push updates one field of the [`StatusSnapshot`]. Observers
//! subscribe to a broadcast channel and receive only fields whose value
//! actually changed, so replaying a notification is harmless.

use parking_lot::RwLock;
use tokio::sync::broadcast;
use tracing::{debug, trace};

use bdk_transport::protocol::{cmd, error_code, resp};
use bdk_transport::{
    decode, AudioLevels, ControlFlags, EqLevels, LedState, Notification, SoundBank,
};

/// Capacity of the observer channels
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Current device state as last reported by the device
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatusSnapshot {
    pub eq: EqLevels,
    pub control: ControlFlags,
    pub led: LedState,
    pub name: String,
    pub firmware: String,
    pub sound: SoundBank,
}

/// One snapshot field that changed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusChange {
    Eq(EqLevels),
    Control(ControlFlags),
    Led(LedState),
    Name(String),
    Firmware(String),
    Sound(SoundBank),
}

/// Event delivered to status observers
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusEvent {
    Changed(StatusChange),
    /// Live audio meter; not part of the snapshot
    Levels(AudioLevels),
}

/// Result of an ordinary (non-transfer) command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandResult {
    Ok { opcode: u8 },
    Error { opcode: u8, code: u8 },
    Pong,
}

impl std::fmt::Display for CommandResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ok { opcode } => write!(f, "{} ok", cmd::name(*opcode)),
            Self::Error { opcode, code } => write!(
                f,
                "{} failed: {} (0x{:02X})",
                cmd::name(*opcode),
                error_code::name(*code),
                code
            ),
            Self::Pong => write!(f, "pong"),
        }
    }
}

/// Decodes notifications into the snapshot and republishes changes
pub struct StatusAggregator {
    snapshot: RwLock<StatusSnapshot>,
    status_tx: broadcast::Sender<StatusEvent>,
    command_tx: broadcast::Sender<CommandResult>,
}

impl Default for StatusAggregator {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusAggregator {
    pub fn new() -> Self {
        let (status_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (command_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            snapshot: RwLock::new(StatusSnapshot::default()),
            status_tx,
            command_tx,
        }
    }

    /// Copy of the current snapshot
    pub fn snapshot(&self) -> StatusSnapshot {
        self.snapshot.read().clone()
    }

    /// Subscribe to snapshot changes and audio levels
    pub fn subscribe(&self) -> broadcast::Receiver<StatusEvent> {
        self.status_tx.subscribe()
    }

    /// Subscribe to ACK_OK / ACK_ERROR / PONG results
    pub fn subscribe_commands(&self) -> broadcast::Receiver<CommandResult> {
        self.command_tx.subscribe()
    }

    /// Decode and apply one notification. Never fails: malformed and unknown
    /// frames are ignored.
    pub fn on_notification(&self, id: u8, payload: &[u8]) -> Vec<StatusChange> {
        match decode(id, payload) {
            Some(n) => self.apply(&n),
            None => {
                debug!(
                    "Ignoring malformed {} ({} bytes)",
                    resp::name(id),
                    payload.len()
                );
                Vec::new()
            }
        }
    }

    /// Apply an already-decoded notification, returning the fields that changed
    pub fn apply(&self, notification: &Notification) -> Vec<StatusChange> {
        let mut changes = Vec::new();
        {
            let mut snap = self.snapshot.write();
            match notification {
                Notification::Eq(eq) => set_field(&mut snap.eq, *eq, StatusChange::Eq, &mut changes),
                Notification::Control(flags) => {
                    set_field(&mut snap.control, *flags, StatusChange::Control, &mut changes)
                }
                Notification::Led(led) => {
                    set_field(&mut snap.led, *led, StatusChange::Led, &mut changes)
                }
                Notification::Name(name) => {
                    set_field(&mut snap.name, name.clone(), StatusChange::Name, &mut changes)
                }
                Notification::Firmware(fw) => {
                    set_field(&mut snap.firmware, fw.clone(), StatusChange::Firmware, &mut changes)
                }
                Notification::Sound(bank) => {
                    set_field(&mut snap.sound, *bank, StatusChange::Sound, &mut changes)
                }
                Notification::FullStatus(full) => {
                    set_field(&mut snap.eq, full.eq, StatusChange::Eq, &mut changes);
                    set_field(&mut snap.control, full.control, StatusChange::Control, &mut changes);
                    set_field(&mut snap.led, full.led, StatusChange::Led, &mut changes);
                    set_field(&mut snap.sound, full.sound, StatusChange::Sound, &mut changes);
                    set_field(&mut snap.name, full.name.clone(), StatusChange::Name, &mut changes);
                    if !full.firmware.is_empty() {
                        set_field(
                            &mut snap.firmware,
                            full.firmware.clone(),
                            StatusChange::Firmware,
                            &mut changes,
                        );
                    }
                }
                Notification::Levels(levels) => {
                    let _ = self.status_tx.send(StatusEvent::Levels(*levels));
                }
                Notification::AckOk { opcode } => {
                    trace!("ACK_OK for {}", cmd::name(*opcode));
                    let _ = self.command_tx.send(CommandResult::Ok { opcode: *opcode });
                }
                Notification::AckError { opcode, code } => {
                    debug!(
                        "ACK_ERROR for {}: {}",
                        cmd::name(*opcode),
                        error_code::name(*code)
                    );
                    let _ = self.command_tx.send(CommandResult::Error {
                        opcode: *opcode,
                        code: *code,
                    });
                }
                Notification::Pong => {
                    let _ = self.command_tx.send(CommandResult::Pong);
                }
                Notification::Unknown { id, payload } => {
                    debug!("Ignoring unknown response 0x{:02X} ({} bytes)", id, payload.len());
                }
                // Transfer progress belongs to the session supervisor
                other => trace!("Status aggregator skipping {:?}", other),
            }
        }

        for change in &changes {
            let _ = self.status_tx.send(StatusEvent::Changed(change.clone()));
        }
        changes
    }
}

fn set_field<T: PartialEq + Clone>(
    field: &mut T,
    value: T,
    wrap: impl FnOnce(T) -> StatusChange,
    changes: &mut Vec<StatusChange>,
) {
    if *field != value {
        *field = value.clone();
        changes.push(wrap(value));
    }
}
