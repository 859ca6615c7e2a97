//! In-process simulated speaker
//!
//! Implements [`Transport`] the way the speaker firmware behaves on the other
//! end of the link: frames are queued to a device worker thread, which
//! applies them to an internal state, reports write completion for
//! acknowledged writes and pushes the same notifications the real device
//! would. Faults (rejects, missing completions, link drops) can be injected
//! to exercise the error paths.

use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use bdk_speaker::eq;
use bdk_transport::protocol::{build_frame, cmd, error_code, limits, resp, split_frame};
use bdk_transport::{
    AudioLevels, ControlFlags, DeviceCommand, DeviceName, EqLevels, FullStatus, LedEffect,
    LedState, LinkHandler, SetEq, SetLed, SoundBank, SoundSlot, StatusPayload, Transport,
    WriteMode, WriteOutcome,
};

/// Simulated device parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulatorConfig {
    /// Negotiated payload size the link reports
    pub payload_size: usize,
    /// Round-trip delay for acknowledged writes
    pub link_latency_ms: u64,
    /// Flash write speed for OTA data
    pub flash_kib_per_sec: u32,
    /// Send OTA_PROGRESS every N data frames
    pub progress_every: u32,
    pub device_name: String,
    pub firmware: String,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            payload_size: 247,
            link_latency_ms: 2,
            flash_kib_per_sec: 256,
            progress_every: 16,
            device_name: "BDK Speaker".to_string(),
            firmware: "1.4.2".to_string(),
        }
    }
}

/// Injected link and device faults
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Faults {
    /// Reject every Nth write at the link layer (0 = never)
    pub reject_every: u32,
    /// Never report write completion
    pub never_ack: bool,
    /// Drop the link once this many transfer bytes arrived
    pub drop_after_bytes: Option<usize>,
    /// Fail OTA verification with this error code
    pub fail_ota_with: Option<u8>,
}

#[derive(Debug)]
enum Upload {
    Sound {
        slot: SoundSlot,
        expected: usize,
        data: Vec<u8>,
        next_seq: u16,
    },
    Ota {
        expected: usize,
        data: Vec<u8>,
        next_seq: u16,
        frames: u32,
    },
}

#[derive(Debug)]
struct DeviceState {
    status: FullStatus,
    sounds: [Option<Vec<u8>>; limits::SOUND_SLOTS as usize],
    last_image: Option<Vec<u8>>,
    upload: Option<Upload>,
    connected: bool,
    payload_size: usize,
    faults: Faults,
    writes: u64,
    transfer_bytes: usize,
}

struct Shared {
    config: SimulatorConfig,
    state: Mutex<DeviceState>,
    handler: Mutex<Option<Weak<dyn LinkHandler>>>,
}

struct Frame {
    data: Vec<u8>,
    mode: WriteMode,
}

/// What the device does after handling one frame
enum Reply {
    Notify(Vec<u8>),
    Sleep(Duration),
    LinkLost,
}

/// Simulated speaker; hand it to `Speaker` as its transport
pub struct SimulatedSpeaker {
    shared: Arc<Shared>,
    frame_tx: mpsc::UnboundedSender<Frame>,
}

impl SimulatedSpeaker {
    /// Start the simulated device and its worker thread
    pub fn new(config: SimulatorConfig) -> std::io::Result<Arc<Self>> {
        let status = FullStatus {
            eq: EqLevels::FLAT,
            control: ControlFlags::empty(),
            led: bdk_speaker::led::default_state(),
            sound: SoundBank::default(),
            name: config.device_name.clone(),
            firmware: config.firmware.clone(),
        };
        let shared = Arc::new(Shared {
            state: Mutex::new(DeviceState {
                status,
                sounds: Default::default(),
                last_image: None,
                upload: None,
                connected: true,
                payload_size: config.payload_size,
                faults: Faults::default(),
                writes: 0,
                transfer_bytes: 0,
            }),
            config,
            handler: Mutex::new(None),
        });

        let (frame_tx, frame_rx) = mpsc::unbounded_channel();
        let worker = Arc::clone(&shared);
        std::thread::Builder::new()
            .name("bdk-sim-device".into())
            .spawn(move || device_worker(worker, frame_rx))?;

        Ok(Arc::new(Self { shared, frame_tx }))
    }

    /// Register the handler that receives notifications and completions
    pub fn attach(&self, handler: &Arc<dyn LinkHandler>) {
        *self.shared.handler.lock() = Some(Arc::downgrade(handler));
    }

    pub fn set_faults(&self, faults: Faults) {
        self.shared.state.lock().faults = faults;
    }

    /// Renegotiate the link MTU
    pub fn set_payload_size(&self, size: usize) {
        info!("Simulated link renegotiated payload size {}", size);
        self.shared.state.lock().payload_size = size;
    }

    /// Drop the link
    pub fn disconnect(&self) {
        self.shared.link_lost();
    }

    /// Device-side state
    pub fn status(&self) -> FullStatus {
        self.shared.state.lock().status.clone()
    }

    /// Bytes stored in a sound slot
    pub fn sound(&self, slot: SoundSlot) -> Option<Vec<u8>> {
        self.shared.state.lock().sounds[usize::from(slot.index())].clone()
    }

    /// Last firmware image that passed verification
    pub fn last_image(&self) -> Option<Vec<u8>> {
        self.shared.state.lock().last_image.clone()
    }

    /// Push a live audio meter reading
    pub fn push_levels(&self, levels: AudioLevels) {
        self.shared
            .notify(&[resp::STATUS_LEVELS, levels.bass, levels.mid, levels.treble]);
    }

    fn enqueue(&self, frame: &[u8], mode: WriteMode) -> WriteOutcome {
        {
            let mut state = self.shared.state.lock();
            if !state.connected {
                return WriteOutcome::Rejected;
            }
            state.writes += 1;
            let every = u64::from(state.faults.reject_every);
            if every > 0 && state.writes % every == 0 {
                debug!("Simulated link rejecting write #{}", state.writes);
                return WriteOutcome::Rejected;
            }
        }
        match self.frame_tx.send(Frame {
            data: frame.to_vec(),
            mode,
        }) {
            Ok(()) => WriteOutcome::Queued,
            Err(_) => WriteOutcome::Rejected,
        }
    }
}

impl Transport for SimulatedSpeaker {
    fn negotiated_payload_size(&self) -> usize {
        self.shared.state.lock().payload_size
    }

    fn write_acknowledged(&self, frame: &[u8]) -> WriteOutcome {
        self.enqueue(frame, WriteMode::Acknowledged)
    }

    fn write_unacknowledged(&self, frame: &[u8]) -> WriteOutcome {
        self.enqueue(frame, WriteMode::Unacknowledged)
    }

    fn is_connected(&self) -> bool {
        self.shared.state.lock().connected
    }
}

impl Shared {
    fn handler(&self) -> Option<Arc<dyn LinkHandler>> {
        self.handler.lock().as_ref().and_then(Weak::upgrade)
    }

    fn notify(&self, frame: &[u8]) {
        if let Some(h) = self.handler() {
            h.on_notify(frame);
        }
    }

    fn link_lost(&self) {
        {
            let mut state = self.state.lock();
            if !state.connected {
                return;
            }
            state.connected = false;
            state.upload = None;
        }
        warn!("Simulated link dropped");
        if let Some(h) = self.handler() {
            h.on_link_lost();
        }
    }
}

fn device_worker(shared: Arc<Shared>, mut rx: mpsc::UnboundedReceiver<Frame>) {
    debug!("Simulated device started");

    while let Some(frame) = rx.blocking_recv() {
        let (connected, never_ack) = {
            let state = shared.state.lock();
            (state.connected, state.faults.never_ack)
        };
        // Frames still queued when the link dropped are lost
        if !connected {
            continue;
        }

        let replies = handle_frame(&shared, &frame.data);

        if frame.mode == WriteMode::Acknowledged {
            std::thread::sleep(Duration::from_millis(shared.config.link_latency_ms));
            if !never_ack {
                if let Some(h) = shared.handler() {
                    h.on_write_complete(true);
                }
            }
        }

        for reply in replies {
            match reply {
                Reply::Notify(data) => shared.notify(&data),
                Reply::Sleep(d) => std::thread::sleep(d),
                Reply::LinkLost => {
                    shared.link_lost();
                    break;
                }
            }
        }
    }

    debug!("Simulated device stopped");
}

fn ack(opcode: u8) -> Reply {
    Reply::Notify(vec![resp::ACK_OK, opcode])
}

fn nak(opcode: u8, code: u8) -> Reply {
    Reply::Notify(vec![resp::ACK_ERROR, opcode, code])
}

fn with_u32(id: u8, value: usize) -> Reply {
    let mut data = vec![id];
    // bounded by the transfer size limits
    data.extend_from_slice(&(value as u32).to_le_bytes());
    Reply::Notify(data)
}

fn eq_push(eq: EqLevels) -> Reply {
    Reply::Notify(build_frame(resp::STATUS_EQ, &SetEq(eq).to_payload()))
}

fn led_push(led: LedState) -> Reply {
    Reply::Notify(build_frame(resp::STATUS_LED, &SetLed::from_state(led).to_payload()))
}

/// Apply one frame to the device state and collect what the device sends back
fn handle_frame(shared: &Shared, frame: &[u8]) -> Vec<Reply> {
    let Some((opcode, payload)) = split_frame(frame) else {
        return Vec::new();
    };
    let mut state = shared.state.lock();
    let status = &mut state.status;

    match opcode {
        cmd::SET_EQ => match EqLevels::parse(payload) {
            Ok(levels) => {
                status.eq = levels;
                vec![eq_push(status.eq), ack(opcode)]
            }
            Err(_) => vec![nak(opcode, error_code::BAD_FRAME)],
        },
        cmd::SET_EQ_PRESET => match payload.first().and_then(|&i| eq::preset_by_id(i)) {
            Some(preset) => {
                status.eq = preset.levels();
                vec![eq_push(status.eq), ack(opcode)]
            }
            None => vec![nak(opcode, error_code::INVALID_ARG)],
        },
        cmd::SET_CONTROL => match ControlFlags::parse(payload) {
            Ok(flags) => {
                status.control = flags;
                vec![
                    Reply::Notify(vec![resp::STATUS_CONTROL, flags.bits()]),
                    ack(opcode),
                ]
            }
            Err(_) => vec![nak(opcode, error_code::BAD_FRAME)],
        },
        cmd::SET_NAME => match DeviceName::parse(payload) {
            Ok(name) if !name.0.is_empty() => {
                status.name = name.0;
                let push = build_frame(resp::STATUS_NAME, status.name.as_bytes());
                vec![Reply::Notify(push), ack(opcode)]
            }
            _ => vec![nak(opcode, error_code::INVALID_ARG)],
        },
        cmd::SET_LED => match LedState::parse(payload) {
            Ok(led) => {
                status.led = led;
                vec![led_push(led), ack(opcode)]
            }
            Err(_) => vec![nak(opcode, error_code::INVALID_ARG)],
        },
        cmd::SET_LED_EFFECT => match payload.first().and_then(|&id| LedEffect::from_u8(id)) {
            Some(effect) => {
                status.led.effect = effect;
                vec![led_push(status.led), ack(opcode)]
            }
            None => vec![nak(opcode, error_code::INVALID_ARG)],
        },
        cmd::SET_LED_BRIGHTNESS => match payload.first() {
            Some(&b) => {
                status.led.brightness = b;
                vec![led_push(status.led), ack(opcode)]
            }
            None => vec![nak(opcode, error_code::BAD_FRAME)],
        },
        cmd::SOUND_MUTE => match payload.first() {
            Some(&muted) => {
                if muted != 0 {
                    status.sound.0 |= limits::SOUND_MUTED_BIT;
                } else {
                    status.sound.0 &= !limits::SOUND_MUTED_BIT;
                }
                vec![
                    Reply::Notify(vec![resp::STATUS_SOUND, status.sound.0]),
                    ack(opcode),
                ]
            }
            None => vec![nak(opcode, error_code::BAD_FRAME)],
        },
        cmd::SOUND_DELETE => match payload.first().and_then(|&s| SoundSlot::from_u8(s)) {
            Some(slot) => {
                status.sound.0 &= !(1 << slot.index());
                let bank = status.sound.0;
                state.sounds[usize::from(slot.index())] = None;
                vec![Reply::Notify(vec![resp::STATUS_SOUND, bank]), ack(opcode)]
            }
            None => vec![nak(opcode, error_code::INVALID_ARG)],
        },
        cmd::GET_STATUS => {
            vec![Reply::Notify(build_frame(resp::FULL_STATUS, &status.to_payload()))]
        }
        cmd::PING => vec![Reply::Notify(vec![resp::PONG])],

        cmd::SOUND_UP_START => sound_start(&mut state, payload),
        cmd::SOUND_UP_DATA => sound_data(&mut state, payload),
        cmd::SOUND_UP_END => sound_end(&mut state),
        cmd::OTA_BEGIN => ota_begin(&mut state, payload),
        cmd::OTA_DATA => ota_data(&mut state, &shared.config, payload),
        cmd::OTA_END => ota_end(&mut state),
        cmd::OTA_ABORT => {
            if matches!(state.upload, Some(Upload::Ota { .. })) {
                info!("Simulated device discarding partial image");
                state.upload = None;
            }
            Vec::new()
        }

        other => {
            warn!("Simulated device got unknown opcode 0x{:02X}", other);
            vec![nak(other, error_code::BAD_FRAME)]
        }
    }
}

fn u16_at(data: &[u8], at: usize) -> Option<u16> {
    data.get(at..at + 2).map(|b| u16::from_le_bytes([b[0], b[1]]))
}

fn u32_at(data: &[u8], at: usize) -> Option<usize> {
    data.get(at..at + 4)
        .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]) as usize)
}

fn sound_failed(code: u8) -> Vec<Reply> {
    vec![Reply::Notify(vec![resp::SOUND_FAILED, code])]
}

fn ota_failed(code: u8) -> Vec<Reply> {
    vec![Reply::Notify(vec![resp::OTA_FAILED, code])]
}

/// Count transfer bytes toward an injected link drop
fn count_transfer_bytes(state: &mut DeviceState, n: usize) -> Option<Reply> {
    state.transfer_bytes += n;
    match state.faults.drop_after_bytes {
        Some(limit) if state.transfer_bytes >= limit => Some(Reply::LinkLost),
        _ => None,
    }
}

fn sound_start(state: &mut DeviceState, payload: &[u8]) -> Vec<Reply> {
    let (Some(slot), Some(size)) = (
        payload.first().and_then(|&s| SoundSlot::from_u8(s)),
        u32_at(payload, 1),
    ) else {
        return sound_failed(error_code::BAD_FRAME);
    };
    if state.upload.is_some() {
        return sound_failed(error_code::BUSY);
    }
    if size == 0 || size > limits::SOUND_MAX_BYTES {
        return sound_failed(error_code::TOO_LARGE);
    }
    debug!("Simulated device receiving {} bytes for slot {}", size, slot);
    state.upload = Some(Upload::Sound {
        slot,
        expected: size,
        data: Vec::with_capacity(size),
        next_seq: 0,
    });
    state.transfer_bytes = 0;
    vec![Reply::Notify(vec![resp::SOUND_READY])]
}

fn sound_data(state: &mut DeviceState, payload: &[u8]) -> Vec<Reply> {
    let (Some(seq), Some(len)) = (u16_at(payload, 0), u16_at(payload, 2)) else {
        return sound_failed(error_code::BAD_FRAME);
    };
    let chunk = &payload[4..];
    if chunk.len() != usize::from(len) {
        return sound_failed(error_code::BAD_FRAME);
    }
    let Some(Upload::Sound {
        expected,
        data,
        next_seq,
        ..
    }) = state.upload.as_mut()
    else {
        return sound_failed(error_code::BAD_FRAME);
    };
    if seq != *next_seq || data.len() + chunk.len() > *expected {
        state.upload = None;
        return sound_failed(error_code::BAD_FRAME);
    }
    data.extend_from_slice(chunk);
    *next_seq = next_seq.wrapping_add(1);
    let percent = (data.len() * 100 / *expected) as u8;

    let mut replies = Vec::new();
    if let Some(drop) = count_transfer_bytes(state, chunk.len()) {
        replies.push(drop);
        return replies;
    }
    let [lo, hi] = seq.to_le_bytes();
    replies.push(Reply::Notify(vec![resp::SOUND_PROGRESS, percent]));
    replies.push(Reply::Notify(vec![resp::SOUND_READY, lo, hi]));
    replies
}

fn sound_end(state: &mut DeviceState) -> Vec<Reply> {
    let Some(Upload::Sound {
        slot,
        expected,
        data,
        ..
    }) = state.upload.take()
    else {
        return sound_failed(error_code::BAD_FRAME);
    };
    if data.len() != expected {
        return sound_failed(error_code::VERIFY);
    }
    info!("Simulated device stored {} bytes in slot {}", data.len(), slot);
    let size = data.len();
    state.sounds[usize::from(slot.index())] = Some(data);
    state.status.sound.0 |= 1 << slot.index();
    vec![
        with_u32(resp::SOUND_COMPLETE, size),
        Reply::Notify(vec![resp::STATUS_SOUND, state.status.sound.0]),
    ]
}

fn ota_begin(state: &mut DeviceState, payload: &[u8]) -> Vec<Reply> {
    let Some(size) = u32_at(payload, 0) else {
        return ota_failed(error_code::BAD_FRAME);
    };
    if state.upload.is_some() {
        return ota_failed(error_code::BUSY);
    }
    if size == 0 || size > limits::OTA_MAX_BYTES {
        return ota_failed(error_code::TOO_LARGE);
    }
    debug!("Simulated device erasing for {} byte image", size);
    state.upload = Some(Upload::Ota {
        expected: size,
        data: Vec::with_capacity(size),
        next_seq: 0,
        frames: 0,
    });
    state.transfer_bytes = 0;
    vec![
        Reply::Sleep(Duration::from_millis(20)),
        Reply::Notify(vec![resp::OTA_READY]),
    ]
}

fn ota_data(state: &mut DeviceState, config: &SimulatorConfig, payload: &[u8]) -> Vec<Reply> {
    let Some(seq) = u16_at(payload, 0) else {
        return ota_failed(error_code::BAD_FRAME);
    };
    let chunk = &payload[2..];
    let Some(Upload::Ota {
        expected,
        data,
        next_seq,
        frames,
    }) = state.upload.as_mut()
    else {
        return ota_failed(error_code::BAD_FRAME);
    };
    if seq != *next_seq || data.len() + chunk.len() > *expected {
        warn!(
            "Simulated device got OTA seq {} (expected {}), aborting",
            seq, next_seq
        );
        state.upload = None;
        return ota_failed(error_code::BAD_FRAME);
    }
    data.extend_from_slice(chunk);
    *next_seq = next_seq.wrapping_add(1);
    *frames += 1;
    let received = data.len();
    let report = config.progress_every > 0 && *frames % config.progress_every == 0;

    let mut replies = Vec::new();
    if let Some(drop) = count_transfer_bytes(state, chunk.len()) {
        replies.push(drop);
        return replies;
    }
    let rate = u64::from(config.flash_kib_per_sec.max(1)) * 1024;
    replies.push(Reply::Sleep(Duration::from_micros(
        chunk.len() as u64 * 1_000_000 / rate,
    )));
    if report {
        replies.push(with_u32(resp::OTA_PROGRESS, received));
    }
    replies
}

fn ota_end(state: &mut DeviceState) -> Vec<Reply> {
    let Some(Upload::Ota { expected, data, .. }) = state.upload.take() else {
        return ota_failed(error_code::BAD_FRAME);
    };
    if data.len() != expected {
        return ota_failed(error_code::VERIFY);
    }
    if let Some(code) = state.faults.fail_ota_with {
        return ota_failed(code);
    }
    info!("Simulated device verified {} byte image", data.len());
    let size = data.len();
    state.last_image = Some(data);
    vec![with_u32(resp::OTA_COMPLETE, size)]
}
