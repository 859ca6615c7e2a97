//! Firmware command handlers.

use std::path::Path;

use anyhow::Context;

use bdk_driver::firmware::{FirmwareFile, FirmwareSource};
use bdk_driver::DriverConfig;

use super::CommandResult;

/// Validate a firmware file
pub fn validate(file: &Path) -> CommandResult {
    println!("Validating firmware file: {}", file.display());

    let fw = FirmwareFile::load(file)
        .with_context(|| format!("failed to load firmware file {}", file.display()))?;
    let payload = DriverConfig::default().simulator.payload_size;

    println!("\nFirmware File Information");
    println!("=========================");
    println!("Filename:   {}", fw.filename);
    println!("Source:     {}", fw.source);
    println!("Size:       {} bytes ({} KB)", fw.size(), fw.size() / 1024);
    println!("Checksum:   0x{:08X}", fw.checksum);
    println!(
        "Chunks:     {} at a {payload}-byte link",
        fw.chunk_count(payload)
    );

    if let FirmwareSource::Archive { .. } = fw.source {
        if let Ok(contents) = FirmwareFile::list_zip_contents(file) {
            println!("\nZIP contents:");
            for name in contents {
                println!("  - {name}");
            }
        }
    }

    match fw.validate() {
        Ok(()) => {
            println!("\nStatus:     VALID");
            Ok(())
        }
        Err(e) => {
            println!("\nStatus:     INVALID - {e}");
            Err(e.into())
        }
    }
}
