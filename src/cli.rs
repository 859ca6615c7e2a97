// CLI definitions using clap

use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "bdk")]
#[command(author, version, about = "BLE speaker protocol driver")]
#[command(propagate_version = true)]
pub struct Cli {
    /// Log level when RUST_LOG is not set (error, warn, info, debug, trace)
    #[arg(long, global = true, default_value = "warn")]
    pub log_level: String,

    /// Config file (default: ~/.config/bdk-driver/config.toml)
    #[arg(long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Print the frame bytes for a command
    #[command(subcommand, visible_alias = "enc")]
    Encode(EncodeCommands),

    /// Decode a notification frame given as hex (e.g. "81 03 FE 00")
    #[command(visible_alias = "dec")]
    Decode {
        /// Frame bytes; spaces, colons and 0x prefixes are accepted
        #[arg(required = true, num_args = 1..)]
        hex: Vec<String>,
    },

    /// List EQ presets
    #[command(visible_alias = "eq")]
    Presets {
        /// Include the extended presets
        #[arg(short, long)]
        all: bool,
    },

    /// List LED effects
    #[command(visible_alias = "fx")]
    Effects,

    /// Run a transfer against the simulated speaker
    #[command(subcommand, visible_alias = "sim")]
    Simulate(SimulateCommands),

    /// Firmware image commands
    #[command(subcommand, visible_alias = "fw")]
    Firmware(FirmwareCommands),

    /// Config file commands
    #[command(subcommand)]
    Config(ConfigCommands),
}

#[derive(Clone, Copy, ValueEnum)]
pub enum Switch {
    On,
    Off,
}

impl Switch {
    pub fn is_on(self) -> bool {
        matches!(self, Self::On)
    }
}

#[derive(Subcommand)]
pub enum EncodeCommands {
    /// SET_EQ: bass, mid and treble gain in dB (-12..12)
    #[command(allow_negative_numbers = true)]
    Eq {
        bass: i32,
        mid: i32,
        treble: i32,
        /// Values are 0-100 slider levels (50 = flat) instead of dB
        #[arg(long)]
        sliders: bool,
    },

    /// SET_EQ_PRESET by index or name
    Preset { preset: String },

    /// SET_CONTROL
    Control {
        #[arg(long)]
        bass_boost: bool,
        #[arg(long)]
        channel_flip: bool,
        #[arg(long)]
        bypass_dsp: bool,
        #[arg(long)]
        mute: bool,
    },

    /// SET_NAME
    Name { name: String },

    /// SET_LED: full LED state
    Led {
        /// Effect name or id
        #[arg(short, long, default_value = "spectrum-bars")]
        effect: String,
        #[arg(short, long, default_value_t = 100)]
        brightness: u8,
        #[arg(short, long, default_value_t = 50)]
        speed: u8,
        /// Primary color (#RRGGBB or a name)
        #[arg(short, long, default_value = "white")]
        color: String,
        /// Secondary color (#RRGGBB or a name)
        #[arg(long, default_value = "#00AAFF")]
        secondary: String,
        #[arg(short, long, default_value = "none")]
        gradient: String,
    },

    /// SET_LED_EFFECT by name or id ("off" turns the LEDs off)
    Effect { effect: String },

    /// SET_LED_BRIGHTNESS
    Brightness { value: u8 },

    /// SOUND_MUTE
    Mute {
        #[arg(value_enum)]
        state: Switch,
    },

    /// SOUND_DELETE
    DeleteSound { slot: u8 },

    /// SOUND_UP_START for a file of the given size
    SoundStart { slot: u8, size: u32 },

    /// OTA_BEGIN for an image of the given size
    OtaBegin { size: u32 },

    /// OTA_ABORT
    OtaAbort,

    /// GET_STATUS
    Status,

    /// PING
    Ping,
}

/// Faults injected into the simulated speaker
#[derive(Args, Clone, Default)]
pub struct FaultArgs {
    /// Override the negotiated payload size
    #[arg(long)]
    pub payload_size: Option<usize>,

    /// Reject every Nth write at the link layer
    #[arg(long, value_name = "N")]
    pub reject_every: Option<u32>,

    /// Drop the link after this many transfer bytes
    #[arg(long, value_name = "BYTES")]
    pub drop_after: Option<usize>,

    /// Fail OTA verification with this device error code
    #[arg(long, value_name = "CODE")]
    pub fail_code: Option<u8>,

    /// Never report write completion
    #[arg(long)]
    pub never_ack: bool,
}

#[derive(Subcommand)]
pub enum SimulateCommands {
    /// Firmware update with a .bin or .zip image
    Ota {
        file: PathBuf,
        #[command(flatten)]
        faults: FaultArgs,
    },

    /// Sound upload with a WAV file (11025 Hz mono 16-bit)
    Sound {
        file: PathBuf,
        /// Sound bank slot (0-3)
        #[arg(long, default_value_t = 0)]
        slot: u8,
        #[command(flatten)]
        faults: FaultArgs,
    },
}

#[derive(Subcommand)]
pub enum FirmwareCommands {
    /// Validate a firmware file (size, contents, chunk count)
    #[command(visible_alias = "val")]
    Validate {
        /// Path to firmware file (.bin or .zip)
        file: PathBuf,
    },
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Print the effective config
    Show,
    /// Print the config file location
    Path,
    /// Write a config file with default values
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}
