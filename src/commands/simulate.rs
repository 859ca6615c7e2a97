//! Transfers against the simulated speaker.

use std::io::Write;
use std::path::Path;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{bail, Context};
use parking_lot::Mutex;

use bdk_driver::firmware::{calculate_checksum, FirmwareFile};
use bdk_driver::{DriverConfig, Faults, SimulatedSpeaker, SimulatorConfig, SoundFile};
use bdk_speaker::{
    SessionHandle, Speaker, SpeakerError, TransferObserver, TransferOutcome, TransferState,
};
use bdk_transport::{LinkHandler, SoundSlot};

use super::{setup_interrupt_handler, CommandResult};
use crate::cli::FaultArgs;

const BAR_WIDTH: usize = 40;

/// Prints state changes and a progress bar
#[derive(Default)]
struct ProgressPrinter {
    last_percent: Mutex<Option<u8>>,
    /// Last progress the device reported itself
    device_percent: Mutex<Option<u8>>,
}

impl TransferObserver for ProgressPrinter {
    fn on_state(&self, state: TransferState) {
        if !state.is_terminal() {
            println!("\n{state}");
        }
    }

    fn on_progress(&self, percent: u8, sent: usize, total: usize) {
        let mut last = self.last_percent.lock();
        if *last == Some(percent) {
            return;
        }
        *last = Some(percent);
        let filled = BAR_WIDTH * usize::from(percent.min(100)) / 100;
        let device = match *self.device_percent.lock() {
            Some(p) => format!(", device {p}%"),
            None => String::new(),
        };
        print!(
            "\r[{}{}] {percent:3}% ({sent}/{total} bytes{device})",
            "#".repeat(filled),
            " ".repeat(BAR_WIDTH - filled)
        );
        let _ = std::io::stdout().flush();
    }

    fn on_device_progress(&self, percent: u8) {
        *self.device_percent.lock() = Some(percent);
    }

    fn on_terminal(&self, outcome: TransferOutcome) {
        println!("\nTransfer {outcome}");
    }
}

impl FaultArgs {
    fn simulator(&self, base: &SimulatorConfig) -> SimulatorConfig {
        SimulatorConfig {
            payload_size: self.payload_size.unwrap_or(base.payload_size),
            ..base.clone()
        }
    }

    fn faults(&self) -> Faults {
        Faults {
            reject_every: self.reject_every.unwrap_or(0),
            never_ack: self.never_ack,
            drop_after_bytes: self.drop_after,
            fail_ota_with: self.fail_code,
        }
    }
}

/// Wire a speaker to a fresh simulated device
fn connect(
    config: &DriverConfig,
    faults: &FaultArgs,
) -> anyhow::Result<(Arc<Speaker>, Arc<SimulatedSpeaker>)> {
    let device = SimulatedSpeaker::new(faults.simulator(&config.simulator))
        .context("failed to start simulated speaker")?;
    device.set_faults(faults.faults());
    let speaker = Arc::new(Speaker::with_config(device.clone(), config.transfer.clone()));
    let handler: Arc<dyn LinkHandler> = speaker.clone();
    device.attach(&handler);
    Ok((speaker, device))
}

/// Start a transfer and wait for it, cancelling on Ctrl-C
fn run_transfer<F>(speaker: &Speaker, start: F) -> anyhow::Result<TransferOutcome>
where
    F: FnOnce(&Speaker, Arc<dyn TransferObserver>) -> Result<SessionHandle, SpeakerError>,
{
    let interrupted = setup_interrupt_handler();
    let started = Instant::now();
    let handle = start(speaker, Arc::new(ProgressPrinter::default()))?;

    let outcome = loop {
        if let Some(outcome) = handle.wait(Duration::from_millis(200)) {
            break outcome;
        }
        if interrupted.swap(false, Ordering::SeqCst) {
            eprintln!("\nInterrupted, cancelling transfer...");
            speaker.cancel(&handle);
        }
    };
    println!("Elapsed: {:.2}s", started.elapsed().as_secs_f32());
    Ok(outcome)
}

pub fn ota(config: &DriverConfig, file: &Path, faults: &FaultArgs) -> CommandResult {
    let fw = FirmwareFile::load(file)
        .with_context(|| format!("failed to load firmware file {}", file.display()))?;
    fw.validate()?;
    println!(
        "Image {} ({} bytes, checksum 0x{:08X})",
        fw.filename,
        fw.size(),
        fw.checksum
    );

    let (speaker, device) = connect(config, faults)?;
    let image = fw.data.clone();
    let outcome = run_transfer(&speaker, move |s, obs| s.start_ota(image, obs))?;
    if !outcome.is_success() {
        bail!("firmware update {outcome}");
    }

    match device.last_image() {
        Some(written) if calculate_checksum(&written) == fw.checksum => {
            println!("Device image checksum 0x{:08X} matches", fw.checksum);
            Ok(())
        }
        _ => bail!("device image does not match the file"),
    }
}

pub fn sound(config: &DriverConfig, file: &Path, slot: u8, faults: &FaultArgs) -> CommandResult {
    let slot = SoundSlot::from_u8(slot)
        .with_context(|| format!("sound slot must be 0-3, got {slot}"))?;
    let sound = SoundFile::load(file)
        .with_context(|| format!("failed to load sound file {}", file.display()))?;
    println!(
        "Sound {} ({} bytes, {:.1}s, {})",
        file.display(),
        sound.data.len(),
        sound.duration_secs(),
        sound.format
    );

    let (speaker, device) = connect(config, faults)?;
    let data = sound.data.clone();
    let outcome = run_transfer(&speaker, move |s, obs| s.upload_sound(slot, data, obs))?;
    if !outcome.is_success() {
        bail!("sound upload {outcome}");
    }

    let stored = device.sound(slot).map(|d| d.len()).unwrap_or(0);
    println!("Slot {slot} holds {stored} bytes");
    Ok(())
}
