// Firmware image loading for OTA
// Images arrive already decrypted; this only unpacks and sanity-checks them.

use std::fs;
use std::io::{self, Read};
use std::path::Path;
use zip::ZipArchive;

use bdk_transport::protocol::limits;
use bdk_transport::{chunk_size, TransferKind};

/// Smallest image the bootloader accepts
pub const MIN_IMAGE_SIZE: usize = 1024;

/// Error types for firmware operations
#[derive(Debug)]
pub enum FirmwareError {
    IoError(io::Error),
    ZipError(zip::result::ZipError),
    InvalidFormat(String),
    FileTooSmall(usize),
    FileTooLarge(usize),
}

impl std::fmt::Display for FirmwareError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::IoError(e) => write!(f, "I/O error: {e}"),
            Self::ZipError(e) => write!(f, "ZIP error: {e}"),
            Self::InvalidFormat(msg) => write!(f, "Invalid format: {msg}"),
            Self::FileTooSmall(size) => write!(f, "File too small: {size} bytes"),
            Self::FileTooLarge(size) => write!(
                f,
                "File too large: {size} bytes (limit {})",
                limits::OTA_MAX_BYTES
            ),
        }
    }
}

impl std::error::Error for FirmwareError {}

impl From<io::Error> for FirmwareError {
    fn from(e: io::Error) -> Self {
        Self::IoError(e)
    }
}

impl From<zip::result::ZipError> for FirmwareError {
    fn from(e: zip::result::ZipError) -> Self {
        Self::ZipError(e)
    }
}

/// Where the image came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FirmwareSource {
    /// Raw binary
    Binary,
    /// Entry inside a ZIP package
    Archive { entry: String },
}

impl std::fmt::Display for FirmwareSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Binary => write!(f, "binary"),
            Self::Archive { entry } => write!(f, "archive entry {entry}"),
        }
    }
}

/// A loaded firmware image
#[derive(Debug, Clone)]
pub struct FirmwareFile {
    /// Image bytes as sent over OTA
    pub data: Vec<u8>,
    /// 32-bit additive checksum, for display only
    pub checksum: u32,
    /// Original filename
    pub filename: String,
    pub source: FirmwareSource,
}

/// Sum of all bytes, wrapping
pub fn calculate_checksum(data: &[u8]) -> u32 {
    data.iter()
        .fold(0u32, |acc, &b| acc.wrapping_add(u32::from(b)))
}

impl FirmwareFile {
    /// Load a `.bin` image or a `.zip` package from disk
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, FirmwareError> {
        let path = path.as_ref();
        let filename = path
            .file_name()
            .and_then(|s| s.to_str())
            .unwrap_or("firmware.bin")
            .to_string();

        let data = fs::read(path)?;
        if data.is_empty() {
            return Err(FirmwareError::FileTooSmall(0));
        }

        // ZIP local file header
        if data.starts_with(b"PK\x03\x04") {
            return Self::from_zip(io::Cursor::new(data), filename);
        }

        Ok(Self::from_bytes(data, filename, FirmwareSource::Binary))
    }

    fn from_bytes(data: Vec<u8>, filename: String, source: FirmwareSource) -> Self {
        Self {
            checksum: calculate_checksum(&data),
            data,
            filename,
            source,
        }
    }

    /// Extract the image from a ZIP package
    fn from_zip<R: Read + io::Seek>(reader: R, filename: String) -> Result<Self, FirmwareError> {
        let mut archive = ZipArchive::new(reader)?;

        // Look for well-known names first
        let known = ["firmware.bin", "app.bin", "ota.bin"];
        let mut chosen = None;
        for name in known {
            if archive.by_name(name).is_ok() {
                chosen = Some(name.to_string());
                break;
            }
        }
        if chosen.is_none() {
            // Otherwise the first .bin entry
            for i in 0..archive.len() {
                let entry = archive.by_index(i)?;
                if entry.is_file() && entry.name().to_lowercase().ends_with(".bin") {
                    chosen = Some(entry.name().to_string());
                    break;
                }
            }
        }

        let Some(entry_name) = chosen else {
            return Err(FirmwareError::InvalidFormat(
                "No firmware file found in ZIP".to_string(),
            ));
        };
        let mut entry = archive.by_name(&entry_name)?;
        let mut data = Vec::new();
        entry.read_to_end(&mut data)?;
        Ok(Self::from_bytes(
            data,
            filename,
            FirmwareSource::Archive { entry: entry_name },
        ))
    }

    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// Number of OTA DATA frames at the given negotiated payload size
    pub fn chunk_count(&self, negotiated: usize) -> usize {
        self.size().div_ceil(chunk_size(TransferKind::Ota, negotiated))
    }

    /// Validate the image
    pub fn validate(&self) -> Result<(), FirmwareError> {
        if self.size() < MIN_IMAGE_SIZE {
            return Err(FirmwareError::FileTooSmall(self.size()));
        }

        if self.size() > limits::OTA_MAX_BYTES {
            return Err(FirmwareError::FileTooLarge(self.size()));
        }

        // Erased flash or zero fill
        if self.data.iter().all(|&b| b == 0xFF) {
            return Err(FirmwareError::InvalidFormat(
                "File contains only 0xFF bytes".to_string(),
            ));
        }

        if self.data.iter().all(|&b| b == 0x00) {
            return Err(FirmwareError::InvalidFormat(
                "File contains only 0x00 bytes".to_string(),
            ));
        }

        Ok(())
    }

    /// List contents if ZIP archive
    pub fn list_zip_contents<P: AsRef<Path>>(path: P) -> Result<Vec<String>, FirmwareError> {
        let file = fs::File::open(path)?;
        let mut archive = ZipArchive::new(file)?;

        let names: Vec<String> = (0..archive.len())
            .filter_map(|i| archive.by_index(i).ok().map(|e| e.name().to_string()))
            .collect();

        Ok(names)
    }
}
