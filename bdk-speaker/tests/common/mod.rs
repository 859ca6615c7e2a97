//! Scriptable in-memory device for transfer tests
//!
//! The mock answers synchronously from inside `write_*`, the way a fast
//! device on a loopback link would: write completion first, then the
//! protocol response.

#![allow(dead_code)]

use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;

use bdk_speaker::{
    Speaker, TransferConfig, TransferObserver, TransferOutcome, TransferState,
};
use bdk_transport::protocol::{cmd, resp};
use bdk_transport::{LinkHandler, RetryPolicy, ThrottleTable, Transport, WriteMode, WriteOutcome};

/// When the fake device reports OTA_PROGRESS
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressReports {
    Never,
    /// After each acknowledged DATA frame
    OnAcknowledged,
    /// After every DATA frame
    EveryFrame,
}

/// How the fake device reacts
#[derive(Debug, Clone)]
pub struct Behavior {
    /// Report write completion for acknowledged writes
    pub complete_writes: bool,
    /// Report those completions as failed
    pub fail_completions: bool,
    /// Send READY / COMPLETE responses
    pub respond: bool,
    /// Echo the sequence number in SOUND_READY
    pub echo_seq: bool,
    /// Echo this sequence instead of the real one for the Nth data frame (0-based)
    pub wrong_seq_at: Option<usize>,
    /// Added to the size reported in COMPLETE
    pub size_skew: i64,
    /// Reply with *_FAILED and this code after this many data frames
    pub fail_after: Option<(usize, u8)>,
    /// Drop the link after this many data frames
    pub drop_after: Option<usize>,
    /// Change the negotiated payload after this many data frames
    pub resize_after: Option<(usize, usize)>,
    pub ota_progress: ProgressReports,
}

impl Default for Behavior {
    fn default() -> Self {
        Self {
            complete_writes: true,
            fail_completions: false,
            respond: true,
            echo_seq: true,
            wrong_seq_at: None,
            size_skew: 0,
            fail_after: None,
            drop_after: None,
            resize_after: None,
            ota_progress: ProgressReports::OnAcknowledged,
        }
    }
}

#[derive(Debug, Default)]
struct MockState {
    payload_size: usize,
    connected: bool,
    reject_next: u32,
    frames: Vec<(Vec<u8>, WriteMode)>,
    data_frames: usize,
    data_bytes: usize,
}

pub struct MockTransport {
    state: Mutex<MockState>,
    behavior: Mutex<Behavior>,
    handler: Mutex<Option<Weak<dyn LinkHandler>>>,
}

impl MockTransport {
    pub fn new(payload_size: usize) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(MockState {
                payload_size,
                connected: true,
                ..Default::default()
            }),
            behavior: Mutex::new(Behavior::default()),
            handler: Mutex::new(None),
        })
    }

    pub fn attach(&self, handler: &Arc<dyn LinkHandler>) {
        *self.handler.lock() = Some(Arc::downgrade(handler));
    }

    pub fn set_behavior(&self, behavior: Behavior) {
        *self.behavior.lock() = behavior;
    }

    pub fn set_payload_size(&self, size: usize) {
        self.state.lock().payload_size = size;
    }

    pub fn set_connected(&self, connected: bool) {
        self.state.lock().connected = connected;
    }

    /// Refuse the next `n` writes at the link layer
    pub fn reject_next(&self, n: u32) {
        self.state.lock().reject_next = n;
    }

    pub fn frames(&self) -> Vec<(Vec<u8>, WriteMode)> {
        self.state.lock().frames.clone()
    }

    pub fn frames_with_opcode(&self, opcode: u8) -> Vec<(Vec<u8>, WriteMode)> {
        self.frames()
            .into_iter()
            .filter(|(f, _)| f.first() == Some(&opcode))
            .collect()
    }

    pub fn frame_count(&self) -> usize {
        self.state.lock().frames.len()
    }

    /// Deliver a raw notification as if the device had pushed it
    pub fn notify(&self, frame: &[u8]) {
        if let Some(h) = self.handler() {
            h.on_notify(frame);
        }
    }

    pub fn drop_link(&self) {
        self.set_connected(false);
        if let Some(h) = self.handler() {
            h.on_link_lost();
        }
    }

    fn handler(&self) -> Option<Arc<dyn LinkHandler>> {
        self.handler.lock().as_ref().and_then(Weak::upgrade)
    }

    fn record(&self, frame: &[u8], mode: WriteMode) -> WriteOutcome {
        let mut state = self.state.lock();
        if !state.connected {
            return WriteOutcome::Rejected;
        }
        if state.reject_next > 0 {
            state.reject_next -= 1;
            return WriteOutcome::Rejected;
        }
        state.frames.push((frame.to_vec(), mode));
        match frame.first() {
            Some(&cmd::SOUND_UP_DATA) => {
                state.data_frames += 1;
                state.data_bytes += frame.len() - 5;
            }
            Some(&cmd::OTA_DATA) => {
                state.data_frames += 1;
                state.data_bytes += frame.len() - 3;
            }
            _ => {}
        }
        WriteOutcome::Queued
    }

    /// Work out the device's reply to a frame, after it was recorded
    fn react(&self, frame: &[u8], acknowledged: bool) {
        let behavior = self.behavior.lock().clone();
        let (data_frames, data_bytes) = {
            let s = self.state.lock();
            (s.data_frames, s.data_bytes)
        };
        let opcode = frame[0];
        let is_data = opcode == cmd::SOUND_UP_DATA || opcode == cmd::OTA_DATA;

        if is_data {
            if let Some((after, size)) = behavior.resize_after {
                if data_frames == after {
                    self.set_payload_size(size);
                }
            }
            if behavior.drop_after == Some(data_frames) {
                self.drop_link();
                return;
            }
        }

        let Some(handler) = self.handler() else {
            return;
        };
        if acknowledged && behavior.complete_writes {
            handler.on_write_complete(!behavior.fail_completions);
            if behavior.fail_completions {
                return;
            }
        }
        if !behavior.respond {
            return;
        }

        if let Some((after, code)) = behavior.fail_after {
            if is_data && data_frames >= after {
                let id = if opcode == cmd::OTA_DATA {
                    resp::OTA_FAILED
                } else {
                    resp::SOUND_FAILED
                };
                handler.on_notify(&[id, code]);
                return;
            }
        }

        let final_size = (data_bytes as i64 + behavior.size_skew) as u32;
        match opcode {
            cmd::SOUND_UP_START => handler.on_notify(&[resp::SOUND_READY]),
            cmd::SOUND_UP_DATA => {
                let mut seq = u16::from_le_bytes([frame[1], frame[2]]);
                if behavior.wrong_seq_at == Some(data_frames - 1) {
                    seq = seq.wrapping_add(7);
                }
                if behavior.echo_seq {
                    let [lo, hi] = seq.to_le_bytes();
                    handler.on_notify(&[resp::SOUND_READY, lo, hi]);
                } else {
                    handler.on_notify(&[resp::SOUND_READY]);
                }
            }
            cmd::SOUND_UP_END => {
                let mut reply = vec![resp::SOUND_COMPLETE];
                reply.extend_from_slice(&final_size.to_le_bytes());
                handler.on_notify(&reply);
            }
            cmd::OTA_BEGIN => handler.on_notify(&[resp::OTA_READY]),
            cmd::OTA_DATA => {
                let report = match behavior.ota_progress {
                    ProgressReports::Never => false,
                    ProgressReports::OnAcknowledged => acknowledged,
                    ProgressReports::EveryFrame => true,
                };
                if report {
                    let mut reply = vec![resp::OTA_PROGRESS];
                    reply.extend_from_slice(&(data_bytes as u32).to_le_bytes());
                    handler.on_notify(&reply);
                }
            }
            cmd::OTA_END => {
                let mut reply = vec![resp::OTA_COMPLETE];
                reply.extend_from_slice(&final_size.to_le_bytes());
                handler.on_notify(&reply);
            }
            cmd::OTA_ABORT => {}
            cmd::PING => handler.on_notify(&[resp::PONG]),
            other => handler.on_notify(&[resp::ACK_OK, other]),
        }
    }
}

impl Transport for MockTransport {
    fn negotiated_payload_size(&self) -> usize {
        self.state.lock().payload_size
    }

    fn write_acknowledged(&self, frame: &[u8]) -> WriteOutcome {
        let outcome = self.record(frame, WriteMode::Acknowledged);
        if outcome == WriteOutcome::Queued {
            self.react(frame, true);
        }
        outcome
    }

    fn write_unacknowledged(&self, frame: &[u8]) -> WriteOutcome {
        let outcome = self.record(frame, WriteMode::Unacknowledged);
        if outcome == WriteOutcome::Queued {
            self.react(frame, false);
        }
        outcome
    }

    fn is_connected(&self) -> bool {
        self.state.lock().connected
    }
}

/// Observer that records every callback
#[derive(Default)]
pub struct RecordingObserver {
    pub states: Mutex<Vec<TransferState>>,
    pub progress: Mutex<Vec<(u8, usize, usize)>>,
    pub device_progress: Mutex<Vec<u8>>,
    pub terminals: Mutex<Vec<TransferOutcome>>,
}

impl RecordingObserver {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn terminal_count(&self) -> usize {
        self.terminals.lock().len()
    }
}

impl TransferObserver for RecordingObserver {
    fn on_state(&self, state: TransferState) {
        self.states.lock().push(state);
    }

    fn on_progress(&self, percent: u8, sent: usize, total: usize) {
        self.progress.lock().push((percent, sent, total));
    }

    fn on_device_progress(&self, percent: u8) {
        self.device_progress.lock().push(percent);
    }

    fn on_terminal(&self, outcome: TransferOutcome) {
        self.terminals.lock().push(outcome);
    }
}

/// Config with short timeouts and no pacing delays
pub fn fast_config() -> TransferConfig {
    TransferConfig {
        sound_start_timeout_ms: 500,
        sound_data_timeout_ms: 500,
        sound_end_timeout_ms: 500,
        ota_begin_timeout_ms: 500,
        ota_begin_settle_ms: 0,
        ota_end_timeout_ms: 500,
        write_complete_timeout_ms: 500,
        retry: RetryPolicy {
            short_backoff_ms: 1,
            long_backoff_ms: 1,
            ..RetryPolicy::default()
        },
        throttle: ThrottleTable {
            base_delay_ms: 0,
            tiers: Vec::new(),
        },
        ..TransferConfig::default()
    }
}

/// A speaker wired to a fresh mock device
pub fn setup(payload_size: usize) -> (Arc<Speaker>, Arc<MockTransport>) {
    let transport = MockTransport::new(payload_size);
    let speaker = Arc::new(Speaker::with_config(
        Arc::clone(&transport) as Arc<dyn Transport>,
        fast_config(),
    ));
    let handler: Arc<dyn LinkHandler> = Arc::clone(&speaker) as Arc<dyn LinkHandler>;
    transport.attach(&handler);
    (speaker, transport)
}

pub const WAIT: Duration = Duration::from_secs(10);

pub fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}
