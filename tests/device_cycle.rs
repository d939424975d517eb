//! Device-side state machine tests against a local fixture server.

use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Once;
use std::time::Duration;

use image::{DynamicImage, Rgba, RgbaImage};
use tiny_http::{Header, Response, Server};

use weather_dash::device::{CycleState, DeviceClient, Screen};

static INIT: Once = Once::new();
static FLAKY_HITS: AtomicUsize = AtomicUsize::new(0);
const ADDR: &str = "127.0.0.1:18090";

fn fixture_png() -> Vec<u8> {
    let mut img = RgbaImage::new(8, 8);
    for (x, y, pixel) in img.enumerate_pixels_mut() {
        *pixel = Rgba([(x * 30) as u8, (y * 30) as u8, 200, 255]);
    }
    let mut bytes = Vec::new();
    DynamicImage::ImageRgba8(img)
        .write_to(&mut Cursor::new(&mut bytes), image::ImageOutputFormat::Png)
        .expect("failed to encode fixture");
    bytes
}

/// Start a fixture HTTP server shared by all tests in this file.
fn start_test_server() -> String {
    INIT.call_once(|| {
        std::thread::spawn(|| {
            let server = Server::http(ADDR).unwrap();
            let png_header = "Content-Type: image/png".parse::<Header>().unwrap();
            for request in server.incoming_requests() {
                let path = request.url().split('?').next().unwrap_or("").to_string();
                let response = match path.as_str() {
                    "/good.png" => {
                        Response::from_data(fixture_png()).with_header(png_header.clone())
                    }
                    "/corrupt.png" => Response::from_data(b"not a png".to_vec())
                        .with_header(png_header.clone()),
                    // Corrupt on the first hit, valid afterwards.
                    "/flaky.png" => {
                        if FLAKY_HITS.fetch_add(1, Ordering::SeqCst) == 0 {
                            Response::from_data(b"garbage first".to_vec())
                                .with_header(png_header.clone())
                        } else {
                            Response::from_data(fixture_png()).with_header(png_header.clone())
                        }
                    }
                    _ => Response::from_data(b"gone".to_vec()).with_status_code(503),
                };
                let _ = request.respond(response);
            }
        });
        // Give the server time to start
        std::thread::sleep(Duration::from_millis(100));
    });

    format!("http://{}", ADDR)
}

#[derive(Default)]
struct RecordingScreen {
    images: Vec<(u32, u32)>,
    banners: Vec<String>,
}

impl Screen for RecordingScreen {
    fn show_image(&mut self, image: &RgbaImage) {
        self.images.push(image.dimensions());
    }

    fn show_banner(&mut self, message: &str) {
        self.banners.push(message.to_string());
    }
}

#[test]
fn successful_fetch_is_displayed() {
    let base = start_test_server();
    let dir = tempfile::tempdir().unwrap();
    let slot = dir.path().join("weather.png");

    let mut client = DeviceClient::new(
        format!("{}/good.png", base),
        &slot,
        RecordingScreen::default(),
    );

    assert_eq!(client.run_cycle(), CycleState::Displayed);
    assert_eq!(client.screen().images, vec![(8, 8)]);
    assert!(client.screen().banners.is_empty());
    assert_eq!(std::fs::read(&slot).unwrap(), fixture_png());
}

#[test]
fn failed_fetch_displays_stale_image() {
    let base = start_test_server();
    let dir = tempfile::tempdir().unwrap();
    let slot = dir.path().join("weather.png");

    // Seed the slot as if a previous cycle had succeeded.
    std::fs::write(&slot, fixture_png()).unwrap();

    let mut client = DeviceClient::new(
        format!("{}/offline", base),
        &slot,
        RecordingScreen::default(),
    );

    match client.run_cycle() {
        CycleState::DisplayedStale { fetch_error } => {
            assert!(fetch_error.contains("503"), "error was: {}", fetch_error);
        }
        other => panic!("expected stale display, got {:?}", other),
    }
    // The prior file is untouched and was shown rather than a blank screen.
    assert_eq!(std::fs::read(&slot).unwrap(), fixture_png());
    assert_eq!(client.screen().images, vec![(8, 8)]);
    assert!(client.screen().banners.is_empty());
}

#[test]
fn failed_fetch_with_empty_slot_ends_on_banner() {
    let base = start_test_server();
    let dir = tempfile::tempdir().unwrap();

    let mut client = DeviceClient::new(
        format!("{}/offline", base),
        dir.path().join("weather.png"),
        RecordingScreen::default(),
    );

    match client.run_cycle() {
        CycleState::DecodeFailedDisplayed {
            fetch_error,
            decode_error,
        } => {
            assert!(fetch_error.is_some());
            assert!(decode_error.contains("no stored image"));
        }
        other => panic!("expected banner, got {:?}", other),
    }
    assert_eq!(client.screen().banners.len(), 1);
    assert!(client.screen().images.is_empty());
}

#[test]
fn corrupt_file_shows_banner_and_next_cycle_starts_clean() {
    let base = start_test_server();
    let dir = tempfile::tempdir().unwrap();

    let mut client = DeviceClient::new(
        format!("{}/flaky.png", base),
        dir.path().join("weather.png"),
        RecordingScreen::default(),
    );

    // First pass: the body saves fine but is not decodable.
    match client.run_cycle() {
        CycleState::DecodeFailedDisplayed {
            fetch_error,
            decode_error,
        } => {
            assert!(fetch_error.is_none());
            assert!(decode_error.contains("unable to display image"));
        }
        other => panic!("expected banner, got {:?}", other),
    }
    assert!(client.diagnostic().is_some());
    assert_eq!(client.screen().banners.len(), 1);

    // Second pass recovers and carries no residual diagnostic.
    assert_eq!(client.run_cycle(), CycleState::Displayed);
    assert!(client.diagnostic().is_none());
    assert_eq!(client.screen().images, vec![(8, 8)]);
}
