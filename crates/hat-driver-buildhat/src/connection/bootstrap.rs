//! Bring-up sequence: version check and bootloader recovery.
//!
//! ```text
//! AwaitVersion --normal banner--> Normal --echo 0--> Ready
//!      |
//!      +--bootloader banner--> BootloaderRecovery --upload--> AwaitVersion (once)
//! ```
//!
//! A second bootloader banner after an upload is fatal.

use super::{BootstrapState, HatConnection};
use crate::protocol::{
    load_command, signature_command, BOOTLOADER_MARKER, CLEAR, ECHO_OFF, INIT_DONE_MARKER, REBOOT,
    VERSION_QUERY,
};
use hat_core::error::{HatError, HatResult};

impl HatConnection {
    pub(super) async fn bootstrap(&self) -> HatResult<()> {
        let mut recovered = false;

        loop {
            self.state.set_bootstrap(BootstrapState::AwaitVersion);
            self.state.metadata.lock().clear_version();

            self.write(VERSION_QUERY).await?;
            tokio::time::sleep(self.timing.version_query_delay).await;

            let version = self.wait_for_version().await?;
            if !version.contains(BOOTLOADER_MARKER) {
                self.state.set_bootstrap(BootstrapState::Normal);
                self.write(ECHO_OFF).await?;
                self.state.set_bootstrap(BootstrapState::Ready);
                return Ok(());
            }

            if recovered {
                return Err(HatError::Bootloader { version });
            }
            tracing::info!(connection = %self.name(), version = %version, "Loading firmware because bootloader");

            self.state.set_bootstrap(BootstrapState::BootloaderRecovery);
            self.upload_firmware().await?;
            recovered = true;
        }
    }

    /// Poll for a version banner.
    async fn wait_for_version(&self) -> HatResult<String> {
        for _ in 0..self.timing.version_poll_attempts {
            let version = self.version();
            if !version.is_empty() {
                return Ok(version);
            }
            tokio::time::sleep(self.timing.version_poll_interval).await;
        }

        let version = self.version();
        if version.is_empty() {
            return Err(HatError::Timeout("no version string detected".to_string()));
        }
        Ok(version)
    }

    /// Poll the recent-line history for a line containing `needle`.
    async fn wait_for_line(&self, needle: &str) -> HatResult<()> {
        for _ in 0..self.timing.confirm_poll_attempts {
            if self.state.metadata.lock().has_line_containing(needle) {
                return Ok(());
            }
            tokio::time::sleep(self.timing.confirm_poll_interval).await;
        }
        Err(HatError::Timeout(format!("did not get line [{}]", needle)))
    }

    /// Push firmware and signature, reboot, and wait for the new firmware.
    async fn upload_firmware(&self) -> HatResult<()> {
        let bundle = self.firmware.resolve().await?;
        let settle = self.timing.upload_settle;

        tracing::info!(
            connection = %self.name(),
            image_len = bundle.image().len(),
            signature_len = bundle.signature().len(),
            "Uploading Build HAT firmware"
        );

        self.write(CLEAR).await?;
        tokio::time::sleep(settle).await;

        self.write(load_command(bundle.image().len(), bundle.checksum()).as_bytes())
            .await?;
        tokio::time::sleep(settle).await;

        self.write_frame(bundle.image()).await?;
        tokio::time::sleep(settle).await;

        self.write(signature_command(bundle.signature().len()).as_bytes())
            .await?;
        tokio::time::sleep(settle).await;

        self.write_frame(bundle.signature()).await?;
        tokio::time::sleep(settle).await;

        self.write(REBOOT).await?;
        self.wait_for_line(INIT_DONE_MARKER).await?;

        tracing::info!(connection = %self.name(), "Firmware rebooted, waiting for it to settle");
        tokio::time::sleep(self.timing.reboot_settle).await;
        Ok(())
    }
}
