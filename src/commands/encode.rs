//! Frame encoding for every command.

use anyhow::{bail, Context};

use bdk_speaker::{eq, led};
use bdk_transport::protocol::{cmd, format_hex};
use bdk_transport::{
    ControlFlags, DeviceCommand, GetStatus, OtaAbort, OtaBegin, Ping, SetControl, SetEq,
    SetEqPreset, SetLed, SetLedBrightness, SetLedEffect, SetName, SoundDelete, SoundMute,
    SoundSlot, SoundUploadStart,
};

use super::CommandResult;
use crate::cli::EncodeCommands;

fn print<C: DeviceCommand>(command: &C) {
    let frame = command.build();
    println!("{:<20} {}", cmd::name(C::OPCODE), format_hex(&frame));
}

fn slot(index: u8) -> anyhow::Result<SoundSlot> {
    SoundSlot::from_u8(index).with_context(|| format!("sound slot must be 0-3, got {index}"))
}

/// Preset by index or by name
fn preset(arg: &str) -> anyhow::Result<&'static eq::EqPreset> {
    let found = match arg.parse::<u8>() {
        Ok(id) => eq::preset_by_id(id),
        Err(_) => eq::preset_by_name(arg),
    };
    found.with_context(|| format!("unknown EQ preset '{arg}' (see `bdk presets --all`)"))
}

pub fn run(command: EncodeCommands) -> CommandResult {
    match command {
        EncodeCommands::Eq {
            bass,
            mid,
            treble,
            sliders,
        } => {
            let levels = if sliders {
                let level = |v: i32| u8::try_from(v).ok().filter(|l| *l <= eq::LEVEL_MAX);
                let (Some(b), Some(m), Some(t)) = (level(bass), level(mid), level(treble)) else {
                    bail!("slider levels must be 0-{}", eq::LEVEL_MAX);
                };
                eq::levels_from_sliders(b, m, t)
            } else {
                SetEq::new(bass, mid, treble).0
            };
            println!(
                "bass {:+} dB, mid {:+} dB, treble {:+} dB",
                levels.bass, levels.mid, levels.treble
            );
            print(&SetEq(levels));
        }
        EncodeCommands::Preset { preset: arg } => {
            let p = preset(&arg)?;
            println!("{} ({})", p.name, p.description);
            print(&SetEqPreset::new(p.id)?);
        }
        EncodeCommands::Control {
            bass_boost,
            channel_flip,
            bypass_dsp,
            mute,
        } => {
            let mut flags = ControlFlags::empty();
            flags.set(ControlFlags::BASS_BOOST, bass_boost);
            flags.set(ControlFlags::CHANNEL_FLIP, channel_flip);
            flags.set(ControlFlags::BYPASS_DSP, bypass_dsp);
            flags.set(ControlFlags::MUTE, mute);
            print(&SetControl(flags));
        }
        EncodeCommands::Name { name } => print(&SetName::new(&name)?),
        EncodeCommands::Led {
            effect,
            brightness,
            speed,
            color,
            secondary,
            gradient,
        } => {
            let command = SetLed::new()
                .effect(led::parse_effect(&effect)?)
                .brightness(brightness.min(led::PERCENT_MAX))
                .speed(speed.min(led::PERCENT_MAX))
                .primary(led::parse_color(&color)?)
                .secondary(led::parse_color(&secondary)?)
                .gradient(led::parse_gradient(&gradient)?);
            let state = command.state();
            println!(
                "{} at {}%, {} / {}, gradient {}",
                state.effect,
                state.brightness,
                state.primary.to_hex(),
                state.secondary.to_hex(),
                state.gradient.name()
            );
            print(&command);
        }
        EncodeCommands::Effect { effect } => {
            print(&SetLedEffect(led::parse_effect(&effect)?));
        }
        EncodeCommands::Brightness { value } => {
            print(&SetLedBrightness(value.min(led::PERCENT_MAX)));
        }
        EncodeCommands::Mute { state } => print(&SoundMute(state.is_on())),
        EncodeCommands::DeleteSound { slot: index } => print(&SoundDelete(slot(index)?)),
        EncodeCommands::SoundStart { slot: index, size } => {
            print(&SoundUploadStart::new(slot(index)?, size));
        }
        EncodeCommands::OtaBegin { size } => print(&OtaBegin::new(size)),
        EncodeCommands::OtaAbort => print(&OtaAbort::default()),
        EncodeCommands::Status => print(&GetStatus::default()),
        EncodeCommands::Ping => print(&Ping::default()),
    }
    Ok(())
}
