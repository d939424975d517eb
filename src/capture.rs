//! Render orchestration: drive a disposable headless Chrome instance to a
//! stable, fully-loaded state and capture a single PNG frame.
//!
//! Every capture launches its own browser so no cookies, cache, or viewport
//! state can leak between concurrent requests. The instance is torn down on
//! every exit path: `headless_chrome::Browser` kills its child process on
//! drop, so early returns and errors release the resource the same way
//! success does.

use std::thread;
use std::time::{Duration, Instant};

use headless_chrome::browser::tab::Tab;
use headless_chrome::protocol::cdp::{Emulation, Page, DOM};
use headless_chrome::{Browser, LaunchOptions};
use tracing::{debug, info};
use url::Url;

use crate::{Error, RenderRequest, Result};

/// Configuration for the capture stage.
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    /// Base URL of the dashboard SPA (usually this very server)
    pub dashboard_base: String,
    /// CSS selector whose appearance marks the page as mounted
    pub ready_selector: String,
    /// Cap on waiting for the readiness marker
    pub ready_timeout: Duration,
    /// Cap on waiting for network activity to settle
    pub idle_timeout: Duration,
    /// How long the resource count must hold still to count as idle
    pub idle_quiet: Duration,
    /// Fixed delay after idle for late animations and font swaps.
    /// A deliberate simplification: dashboard rendering latency is
    /// unpredictable, and the capture budget tolerates the wait.
    pub settle_delay: Duration,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            dashboard_base: "http://localhost:8000".to_string(),
            ready_selector: "#root div".to_string(),
            ready_timeout: Duration::from_secs(10),
            idle_timeout: Duration::from_secs(10),
            idle_quiet: Duration::from_millis(500),
            settle_delay: Duration::from_secs(5),
        }
    }
}

/// Seam between the HTTP layer and the browser backend.
///
/// `capture` is synchronous; the server drives it through a blocking task.
/// Tests substitute stub implementations to exercise the delivery contract
/// without Chrome.
pub trait Renderer: Send + Sync {
    /// Produce PNG bytes at exactly `request.width` x `request.height`.
    fn capture(&self, request: &RenderRequest) -> Result<Vec<u8>>;
}

/// Renderer backed by headless Chrome over the DevTools protocol.
pub struct CdpRenderer {
    config: CaptureConfig,
}

impl CdpRenderer {
    pub fn new(config: CaptureConfig) -> Self {
        Self { config }
    }

    /// Build the dashboard URL for a request.
    ///
    /// Query pairs go through `url`'s serializer, so the free-text `name`
    /// label is percent-escaped and cannot inject additional query
    /// structure.
    pub fn dashboard_url(&self, request: &RenderRequest) -> Result<Url> {
        let mut url = Url::parse(&self.config.dashboard_base)
            .map_err(|e| Error::ConfigError(format!("invalid dashboard base URL: {}", e)))?;
        url.set_path("/weather");
        {
            let mut pairs = url.query_pairs_mut();
            pairs.append_pair("lat", &request.latitude.to_string());
            pairs.append_pair("lon", &request.longitude.to_string());
            if let Some(name) = &request.name {
                pairs.append_pair("name", name);
            }
        }
        Ok(url)
    }
}

impl Renderer for CdpRenderer {
    fn capture(&self, request: &RenderRequest) -> Result<Vec<u8>> {
        request.validate()?;
        let url = self.dashboard_url(request)?;

        // Window size doubles as the viewport in headless mode, so the
        // capture comes out at exactly the requested dimensions.
        let launch_options = LaunchOptions::default_builder()
            .headless(true)
            .window_size(Some((request.width, request.height)))
            .build()
            .map_err(|e| Error::RenderFailed(format!("failed to build launch options: {}", e)))?;

        let browser = Browser::new(launch_options)
            .map_err(|e| Error::RenderFailed(format!("failed to launch browser: {}", e)))?;

        let tab = browser
            .new_tab()
            .map_err(|e| Error::RenderFailed(format!("failed to create tab: {}", e)))?;

        // Disable background compositing so pages without opaque content
        // keep their transparency in the capture.
        tab.call_method(Emulation::SetDefaultBackgroundColorOverride {
            color: Some(DOM::RGBA {
                r: 0,
                g: 0,
                b: 0,
                a: Some(0.0),
            }),
        })
        .map_err(|e| Error::RenderFailed(format!("failed to clear background: {}", e)))?;

        info!(url = %url, width = request.width, height = request.height, "navigating");
        tab.navigate_to(url.as_str())
            .map_err(|e| Error::RenderFailed(format!("navigation failed: {}", e)))?;
        tab.wait_until_navigated()
            .map_err(|e| Error::RenderFailed(format!("navigation did not complete: {}", e)))?;

        tab.wait_for_element_with_custom_timeout(
            &self.config.ready_selector,
            self.config.ready_timeout,
        )
        .map_err(|e| {
            Error::RenderFailed(format!(
                "readiness marker '{}' did not appear: {}",
                self.config.ready_selector, e
            ))
        })?;

        wait_for_network_idle(&tab, self.config.idle_quiet, self.config.idle_timeout)?;

        thread::sleep(self.config.settle_delay);

        let png = tab
            .capture_screenshot(Page::CaptureScreenshotFormatOption::Png, None, None, true)
            .map_err(|e| Error::RenderFailed(format!("screenshot failed: {}", e)))?;

        debug!(bytes = png.len(), "capture complete");
        Ok(png)
        // browser drops here on every path, reaping the Chrome process.
    }
}

/// Wait until the page's resource-timing entry count stops changing.
///
/// The DevTools client has no built-in network-idle signal, so this polls
/// `performance.getEntriesByType('resource')` and treats a count that holds
/// for `quiet` as settled. Exceeding `timeout` fails the render, matching
/// the bounded wait the capture contract requires.
fn wait_for_network_idle(tab: &Tab, quiet: Duration, timeout: Duration) -> Result<()> {
    const POLL: Duration = Duration::from_millis(250);

    let start = Instant::now();
    let mut last_count: i64 = -1;
    let mut stable_since = Instant::now();

    loop {
        let result = tab
            .evaluate("performance.getEntriesByType('resource').length", false)
            .map_err(|e| Error::RenderFailed(format!("network idle probe failed: {}", e)))?;
        let count = result
            .value
            .as_ref()
            .and_then(|v| v.as_i64())
            .unwrap_or(-1);

        if count != last_count {
            last_count = count;
            stable_since = Instant::now();
        } else if stable_since.elapsed() >= quiet {
            return Ok(());
        }

        if start.elapsed() >= timeout {
            return Err(Error::RenderFailed(format!(
                "network activity did not settle within {}ms",
                timeout.as_millis()
            )));
        }

        thread::sleep(POLL);
    }
}
