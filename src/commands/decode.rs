//! Notification decoding.

use anyhow::{bail, Context};

use bdk_transport::protocol::{error_code, format_hex, parse_hex, resp, split_frame};
use bdk_transport::{decode, DeviceProgress, LedState, Notification, SoundSlot};

use super::CommandResult;

pub fn run(hex: &str) -> CommandResult {
    let frame = parse_hex(hex).with_context(|| format!("invalid hex '{hex}'"))?;
    let Some((id, payload)) = split_frame(&frame) else {
        bail!("empty frame");
    };

    println!("Frame:   {}", format_hex(&frame));
    println!("Id:      0x{id:02X} ({})", resp::name(id));
    match decode(id, payload) {
        Some(notification) => {
            for line in describe(&notification) {
                println!("{line}");
            }
            Ok(())
        }
        None => bail!("malformed {} payload ({} bytes)", resp::name(id), payload.len()),
    }
}

fn led_lines(led: &LedState) -> Vec<String> {
    vec![
        format!("Effect:     {} ({})", led.effect, led.effect.id()),
        format!("Brightness: {}%", led.brightness),
        format!("Speed:      {}%", led.speed),
        format!("Primary:    {}", led.primary.to_hex()),
        format!("Secondary:  {}", led.secondary.to_hex()),
        format!("Gradient:   {}", led.gradient.name()),
    ]
}

fn code_line(code: u8) -> String {
    format!("Error:   {} (0x{code:02X})", error_code::name(code))
}

fn optional<T: std::fmt::Display>(v: Option<T>) -> String {
    v.map_or_else(|| "-".to_string(), |v| v.to_string())
}

/// Human-readable lines for one notification
pub fn describe(notification: &Notification) -> Vec<String> {
    match notification {
        Notification::Eq(eq) => vec![format!(
            "EQ:      bass {:+} dB, mid {:+} dB, treble {:+} dB",
            eq.bass, eq.mid, eq.treble
        )],
        Notification::Control(flags) => vec![format!("Control: {flags:?}")],
        Notification::Name(name) => vec![format!("Name:    {name}")],
        Notification::Firmware(fw) => vec![format!("Firmware: {fw}")],
        Notification::Led(led) => led_lines(led),
        Notification::Sound(bank) => {
            let slots: Vec<&str> = bank.present().map(SoundSlot::name).collect();
            vec![
                format!("Sounds:  {}", if slots.is_empty() { "-".to_string() } else { slots.join(", ") }),
                format!("Muted:   {}", bank.is_muted()),
            ]
        }
        Notification::Levels(l) => vec![format!(
            "Levels:  bass {}, mid {}, treble {}",
            l.bass, l.mid, l.treble
        )],
        Notification::FullStatus(s) => {
            let mut lines = vec![
                format!("Name:    {}", s.name),
                format!("Firmware: {}", s.firmware),
                format!(
                    "EQ:      bass {:+} dB, mid {:+} dB, treble {:+} dB",
                    s.eq.bass, s.eq.mid, s.eq.treble
                ),
                format!("Control: {:?}", s.control),
            ];
            lines.extend(led_lines(&s.led));
            lines.push(format!("Sound bank: 0x{:02X}", s.sound.0));
            lines
        }
        Notification::AckOk { opcode } => vec![format!(
            "Ack:     0x{opcode:02X} ({}) ok",
            bdk_transport::protocol::cmd::name(*opcode)
        )],
        Notification::AckError { opcode, code } => vec![
            format!(
                "Nack:    0x{opcode:02X} ({})",
                bdk_transport::protocol::cmd::name(*opcode)
            ),
            code_line(*code),
        ],
        Notification::OtaProgress(DeviceProgress::Percent(p)) => vec![format!("Progress: {p}%")],
        Notification::OtaProgress(DeviceProgress::Bytes(b)) => {
            vec![format!("Progress: {b} bytes written")]
        }
        Notification::OtaReady => vec!["OTA ready".to_string()],
        Notification::OtaComplete { size } => vec![format!("OTA complete, size {}", optional(*size))],
        Notification::OtaFailed { code } => vec!["OTA failed".to_string(), code_line(*code)],
        Notification::SoundProgress { percent } => vec![format!("Progress: {percent}%")],
        Notification::SoundReady { seq } => vec![format!("Sound ready, seq {}", optional(*seq))],
        Notification::SoundComplete { size } => {
            vec![format!("Sound complete, size {}", optional(*size))]
        }
        Notification::SoundFailed { code } => vec!["Sound upload failed".to_string(), code_line(*code)],
        Notification::Pong => vec!["Pong".to_string()],
        Notification::Unknown { id, payload } => vec![format!(
            "Unknown 0x{id:02X}, payload {}",
            format_hex(payload)
        )],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bdk_transport::EqLevels;

    #[test]
    fn test_describe_eq() {
        let lines = describe(&Notification::Eq(EqLevels::new(3, -2, 0)));
        assert_eq!(lines, vec!["EQ:      bass +3 dB, mid -2 dB, treble +0 dB"]);
    }

    #[test]
    fn test_describe_failure_names_code() {
        let lines = describe(&Notification::OtaFailed {
            code: error_code::VERIFY,
        });
        assert!(lines[1].contains("verification failed"));
    }

    #[test]
    fn test_run_rejects_bad_input() {
        assert!(run("zz").is_err());
        // STATUS_EQ with one byte
        assert!(run("81 01").is_err());
        assert!(run("81 03 FE 00").is_ok());
    }
}
