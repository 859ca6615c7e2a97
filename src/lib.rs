// BDK speaker driver - shared library
// Config, firmware and sound file loading, and the simulated speaker

pub mod config;
pub mod firmware;
pub mod simulator;
pub mod sound_file;

pub use config::{ConfigError, DriverConfig};
pub use firmware::{FirmwareError, FirmwareFile};
pub use simulator::{Faults, SimulatedSpeaker, SimulatorConfig};
pub use sound_file::{SoundFile, SoundFileError};
