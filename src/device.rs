//! The remote e-ink frame's fetch -> persist -> decode -> display cycle.
//!
//! The device is severely memory-constrained and strictly sequential: one
//! outstanding network operation, a fixed reuse buffer for the body, a
//! single storage slot overwritten on every successful fetch. Failures are
//! never fatal to the loop; they degrade the displayed output (stale image
//! on fetch failure, diagnostic banner on decode failure) and the next
//! scheduled cycle always tries again.

use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use image::RgbaImage;
use reqwest::blocking::Client;
use reqwest::header::ACCEPT;
use tracing::{info, warn};

/// Size of the reuse buffer the body is streamed through.
const FETCH_BUF_LEN: usize = 1024;

/// Output surface of the physical frame.
///
/// The real device draws through its graphics firmware; tests substitute a
/// recording implementation.
pub trait Screen {
    /// Show a decoded image full-canvas with no overlay.
    fn show_image(&mut self, image: &RgbaImage);

    /// Clear the canvas and render a short diagnostic banner.
    fn show_banner(&mut self, message: &str);
}

/// Where one cycle of the state machine ended up.
///
/// `Displayed` is the happy path. `DisplayedStale` means the fetch failed
/// but the previously stored image still decoded; showing it is a product
/// choice (some image beats a blank panel). `DecodeFailedDisplayed` means
/// the slot held nothing decodable and the banner is on screen.
#[derive(Debug, Clone, PartialEq)]
pub enum CycleState {
    Displayed,
    DisplayedStale { fetch_error: String },
    DecodeFailedDisplayed {
        fetch_error: Option<String>,
        decode_error: String,
    },
}

/// The single named file slot holding the most recently fetched image.
///
/// At most one version exists at a time and a failed fetch never leaves a
/// half-written file visible: bodies stream into a sibling temp path and
/// only a fully received body is renamed over the slot.
pub struct SlotStore {
    path: PathBuf,
}

impl SlotStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Stream `reader` into the slot through a fixed-size buffer and commit
    /// atomically. On any error the previous slot content is left intact.
    pub fn replace_from(&self, reader: &mut impl Read) -> io::Result<u64> {
        let tmp = self.path.with_extension("part");
        let result = self.write_tmp(&tmp, reader);
        if result.is_err() {
            let _ = fs::remove_file(&tmp);
            return result;
        }
        fs::rename(&tmp, &self.path)?;
        result
    }

    fn write_tmp(&self, tmp: &Path, reader: &mut impl Read) -> io::Result<u64> {
        let mut file = fs::File::create(tmp)?;
        let mut buf = [0u8; FETCH_BUF_LEN];
        let mut total = 0u64;
        loop {
            let n = reader.read(&mut buf)?;
            if n == 0 {
                break;
            }
            file.write_all(&buf[..n])?;
            total += n as u64;
        }
        file.sync_all()?;
        Ok(total)
    }

    /// Read whatever currently occupies the slot.
    pub fn read(&self) -> io::Result<Vec<u8>> {
        fs::read(&self.path)
    }
}

/// Drives one device: fetch the adapted image, persist it, decode whatever
/// the slot holds, and put something on the screen.
///
/// The caller owns the wall-clock schedule; `run_cycle` performs exactly one
/// pass of the state machine and never panics the loop.
pub struct DeviceClient<S: Screen> {
    endpoint: String,
    slot: SlotStore,
    screen: S,
    http: Client,
    diagnostic: Option<String>,
}

impl<S: Screen> DeviceClient<S> {
    pub fn new(endpoint: impl Into<String>, slot_path: impl Into<PathBuf>, screen: S) -> Self {
        Self {
            endpoint: endpoint.into(),
            slot: SlotStore::new(slot_path),
            screen,
            // Renders block on the server's settle delay, so allow well past
            // reqwest's default timeout. Panics only if the TLS backend
            // cannot initialize, same as `Client::new`.
            http: Client::builder()
                .timeout(Duration::from_secs(120))
                .build()
                .expect("failed to build HTTP client"),
            diagnostic: None,
        }
    }

    /// Diagnostic from the most recent cycle, if it ended on the banner.
    /// Cleared when the next cycle starts.
    pub fn diagnostic(&self) -> Option<&str> {
        self.diagnostic.as_deref()
    }

    /// The output surface this client draws to.
    pub fn screen(&self) -> &S {
        &self.screen
    }

    /// Run one Fetching -> Decoding -> display pass.
    pub fn run_cycle(&mut self) -> CycleState {
        self.diagnostic = None;

        let fetch_error = match self.fetch() {
            Ok(bytes) => {
                info!(bytes, slot = %self.slot.path().display(), "image saved");
                None
            }
            Err(msg) => {
                // Keep going with whatever the slot already holds.
                warn!(error = %msg, "fetch failed, falling back to stored image");
                Some(msg)
            }
        };

        match self.decode() {
            Ok(img) => {
                self.screen.show_image(&img);
                match fetch_error {
                    None => CycleState::Displayed,
                    Some(fetch_error) => CycleState::DisplayedStale { fetch_error },
                }
            }
            Err(decode_error) => {
                self.diagnostic = Some(decode_error.clone());
                self.screen.show_banner(&decode_error);
                CycleState::DecodeFailedDisplayed {
                    fetch_error,
                    decode_error,
                }
            }
        }
    }

    fn fetch(&self) -> Result<u64, String> {
        let mut response = self
            .http
            .get(&self.endpoint)
            .header(ACCEPT, "image/png")
            .send()
            .map_err(|e| format!("request failed: {}", e))?;

        if !response.status().is_success() {
            return Err(format!("request failed with status {}", response.status()));
        }

        self.slot
            .replace_from(&mut response)
            .map_err(|e| format!("saving image failed: {}", e))
    }

    fn decode(&self) -> Result<RgbaImage, String> {
        let bytes = self
            .slot
            .read()
            .map_err(|e| format!("no stored image: {}", e))?;
        image::load_from_memory(&bytes)
            .map(|img| img.to_rgba8())
            .map_err(|e| format!("unable to display image: {}", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Reader that fails partway through, like a dropped connection.
    struct FailingReader {
        served: usize,
    }

    impl Read for FailingReader {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if self.served == 0 {
                self.served = 1;
                let chunk = b"partial body";
                buf[..chunk.len()].copy_from_slice(chunk);
                Ok(chunk.len())
            } else {
                Err(io::Error::new(
                    io::ErrorKind::ConnectionReset,
                    "connection reset",
                ))
            }
        }
    }

    #[test]
    fn slot_replace_commits_full_bodies() {
        let dir = tempfile::tempdir().unwrap();
        let slot = SlotStore::new(dir.path().join("weather.png"));

        let body = vec![7u8; 3000]; // spans multiple buffer fills
        let written = slot.replace_from(&mut body.as_slice()).unwrap();
        assert_eq!(written, 3000);
        assert_eq!(slot.read().unwrap(), body);
    }

    #[test]
    fn failed_stream_leaves_previous_content_intact() {
        let dir = tempfile::tempdir().unwrap();
        let slot = SlotStore::new(dir.path().join("weather.png"));
        slot.replace_from(&mut &b"good image"[..]).unwrap();

        let err = slot.replace_from(&mut FailingReader { served: 0 });
        assert!(err.is_err());
        assert_eq!(slot.read().unwrap(), b"good image");
        // No temp leftovers visible to the decode step.
        assert!(!slot.path().with_extension("part").exists());
    }

    #[test]
    fn failed_stream_with_empty_slot_stays_empty() {
        let dir = tempfile::tempdir().unwrap();
        let slot = SlotStore::new(dir.path().join("weather.png"));

        assert!(slot.replace_from(&mut FailingReader { served: 0 }).is_err());
        assert!(slot.read().is_err());
    }
}
