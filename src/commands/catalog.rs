//! Preset and effect listings.

use bdk_speaker::{eq, led, PRESETS};
use bdk_transport::LedEffect;

pub fn presets(all: bool) {
    println!("{:<4} {:<16} {:>6} {:>6} {:>6}  Description", "Id", "Name", "Bass", "Mid", "Treble");
    for preset in PRESETS.iter().filter(|p| all || !p.extended) {
        let levels = preset.levels();
        println!(
            "{:<4} {:<16} {:>+6} {:>+6} {:>+6}  {}",
            preset.id, preset.name, levels.bass, levels.mid, levels.treble, preset.description
        );
    }
    if !all {
        println!("\n(use --all for {} more)", PRESETS.iter().filter(|p| p.extended).count());
    }
    println!("Gains in dB; slider levels 0..{} map to -12..+12", eq::LEVEL_MAX);
}

pub fn effects() {
    println!("{:<4} {:<20} Audio reactive", "Id", "Name");
    for effect in LedEffect::ALL.into_iter().chain([LedEffect::Off]) {
        println!(
            "{:<4} {:<20} {}",
            effect.id(),
            effect.name(),
            if led::is_audio_reactive(effect) { "yes" } else { "" }
        );
    }
}
