//! Firmware image and signature pushed to a Build HAT stuck in bootloader mode.
//!
//! The blobs are read from a directory (`firmware.bin`, `signature.bin`) the
//! first time a bootloader banner is seen, or supplied in memory. Both are
//! immutable once loaded.

use crate::checksum::checksum;
use bytes::Bytes;
use hat_core::error::{HatError, HatResult};
use std::path::{Path, PathBuf};

/// File name of the firmware image inside the firmware directory.
pub const FIRMWARE_FILE: &str = "firmware.bin";

/// File name of the signature blob inside the firmware directory.
pub const SIGNATURE_FILE: &str = "signature.bin";

/// Default firmware directory.
pub const DEFAULT_FIRMWARE_DIR: &str = "/usr/share/buildhat";

/// Firmware image plus its signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FirmwareBundle {
    image: Bytes,
    signature: Bytes,
}

impl FirmwareBundle {
    /// Bundle from in-memory blobs.
    pub fn new(image: impl Into<Bytes>, signature: impl Into<Bytes>) -> Self {
        Self {
            image: image.into(),
            signature: signature.into(),
        }
    }

    /// Read `firmware.bin` and `signature.bin` from `dir`.
    pub async fn load_from_dir(dir: &Path) -> HatResult<Self> {
        let image = read_blob(&dir.join(FIRMWARE_FILE)).await?;
        let signature = read_blob(&dir.join(SIGNATURE_FILE)).await?;
        let bundle = Self::new(image, signature);
        tracing::info!(
            dir = %dir.display(),
            image_len = bundle.image.len(),
            signature_len = bundle.signature.len(),
            checksum = bundle.checksum(),
            "Loaded Build HAT firmware bundle"
        );
        Ok(bundle)
    }

    /// Firmware image bytes.
    pub fn image(&self) -> &Bytes {
        &self.image
    }

    /// Signature bytes.
    pub fn signature(&self) -> &Bytes {
        &self.signature
    }

    /// Checksum of the image as sent in the `load` command.
    pub fn checksum(&self) -> u32 {
        checksum(&self.image)
    }
}

async fn read_blob(path: &Path) -> HatResult<Vec<u8>> {
    tokio::fs::read(path)
        .await
        .map_err(|e| HatError::Firmware(format!("{}: {}", path.display(), e)))
}

/// Where a connection gets its firmware when recovery is needed.
#[derive(Debug, Clone)]
pub enum FirmwareSource {
    /// Load from a directory on demand.
    Directory(PathBuf),
    /// Already in memory.
    Bundle(FirmwareBundle),
}

impl Default for FirmwareSource {
    fn default() -> Self {
        FirmwareSource::Directory(PathBuf::from(DEFAULT_FIRMWARE_DIR))
    }
}

impl FirmwareSource {
    /// Load the bundle, reading files for a directory source.
    pub async fn resolve(&self) -> HatResult<FirmwareBundle> {
        match self {
            FirmwareSource::Directory(dir) => FirmwareBundle::load_from_dir(dir).await,
            FirmwareSource::Bundle(bundle) => Ok(bundle.clone()),
        }
    }
}
