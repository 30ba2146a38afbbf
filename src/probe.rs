//! Probe decoding.
//!
//! Turns the raw string a caller sends into a canonical RGB raster.
//! Three interpretations are tried in a fixed priority order:
//!
//! 1. `http://` / `https://` URL - fetched with a bounded timeout
//! 2. Existing filesystem path - read from disk
//! 3. Anything else - base64 payload, optionally behind a
//!    `data:image/...;base64,` header
//!
//! Whatever the source format (indexed, grayscale, alpha, 16-bit), the
//! decoded image is converted to 8-bit RGB so the extractor always sees
//! one pixel layout.

use crate::error::{Error, Result};
use base64::Engine;
use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD};
use image::RgbImage;
use serde::Serialize;
use std::path::Path;
use std::time::Duration;
use tracing::debug;

/// Maximum number of characters echoed back in error previews.
pub const PREVIEW_CHARS: usize = 200;

/// Largest remote image body accepted before the fetch is abandoned.
pub const MAX_FETCH_BYTES: u64 = 32 * 1024 * 1024;

/// Which interpretation of the probe was used.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProbeStage {
    Remote,
    Local,
    Inline,
}

impl ProbeStage {
    /// Stage label used in error reports.
    #[must_use]
    pub const fn failure_label(&self) -> &'static str {
        match self {
            Self::Remote => "remote-decode",
            Self::Local => "local-read",
            Self::Inline => "inline-decode",
        }
    }
}

impl std::fmt::Display for ProbeStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Remote => write!(f, "remote"),
            Self::Local => write!(f, "local"),
            Self::Inline => write!(f, "inline"),
        }
    }
}

/// A probe string, classified.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeSource<'a> {
    Remote(&'a str),
    Local(&'a Path),
    Inline(&'a str),
}

impl ProbeSource<'_> {
    #[must_use]
    pub const fn stage(&self) -> ProbeStage {
        match self {
            Self::Remote(_) => ProbeStage::Remote,
            Self::Local(_) => ProbeStage::Local,
            Self::Inline(_) => ProbeStage::Inline,
        }
    }
}

/// Classify a raw probe string in priority order: URL, existing path, inline.
#[must_use]
pub fn classify(raw: &str) -> ProbeSource<'_> {
    let trimmed = raw.trim();
    let lower = trimmed.get(..8).unwrap_or(trimmed).to_ascii_lowercase();
    if lower.starts_with("http://") || lower.starts_with("https://") {
        return ProbeSource::Remote(trimmed);
    }

    let path = Path::new(trimmed);
    if !trimmed.is_empty() && path.exists() {
        return ProbeSource::Local(path);
    }

    ProbeSource::Inline(trimmed)
}

/// Bounded, char-safe preview of a probe for error reports.
#[must_use]
pub fn preview(raw: &str) -> String {
    let mut chars = raw.chars();
    let head: String = chars.by_ref().take(PREVIEW_CHARS).collect();
    if chars.next().is_some() {
        format!("{head}...")
    } else {
        head
    }
}

/// Decode encoded image bytes into the canonical RGB raster.
///
/// # Errors
///
/// Returns `Error::Decode` tagged with `stage` if the bytes are not a
/// supported image.
pub fn decode_bytes(bytes: &[u8], stage: ProbeStage) -> Result<RgbImage> {
    let image = image::load_from_memory(bytes).map_err(|e| Error::Decode {
        stage,
        reason: e.to_string(),
    })?;
    Ok(image.into_rgb8())
}

/// Read and decode an image file from disk.
///
/// # Errors
///
/// Returns `Error::Decode` (stage `local`) if the file cannot be read or decoded.
pub fn load_image_file(path: &Path) -> Result<RgbImage> {
    let bytes = std::fs::read(path).map_err(|e| Error::Decode {
        stage: ProbeStage::Local,
        reason: format!("{}: {e}", path.display()),
    })?;
    decode_bytes(&bytes, ProbeStage::Local)
}

/// Decode a base64 payload, stripping an optional media-type header.
///
/// # Errors
///
/// Returns `Error::Decode` (stage `inline`) on invalid base64 or image bytes.
pub fn decode_inline(payload: &str) -> Result<RgbImage> {
    let body = payload.split_once(',').map_or(payload, |(_, data)| data);
    let compact: String = body.chars().filter(|c| !c.is_whitespace()).collect();
    if compact.is_empty() {
        return Err(Error::Decode {
            stage: ProbeStage::Inline,
            reason: "empty payload".to_string(),
        });
    }

    let bytes = STANDARD
        .decode(&compact)
        .or_else(|_| STANDARD_NO_PAD.decode(&compact))
        .map_err(|e| Error::Decode {
            stage: ProbeStage::Inline,
            reason: format!("invalid base64: {e}"),
        })?;

    decode_bytes(&bytes, ProbeStage::Inline)
}

/// Decodes probes from any of the three supported encodings.
#[derive(Debug, Clone)]
pub struct ProbeDecoder {
    client: reqwest::Client,
    timeout: Duration,
    max_bytes: u64,
}

impl ProbeDecoder {
    /// Create a decoder whose remote fetches give up after `timeout`.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be constructed.
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Other(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            timeout,
            max_bytes: MAX_FETCH_BYTES,
        })
    }

    /// Override the remote body size limit.
    #[must_use]
    pub const fn with_max_bytes(mut self, max_bytes: u64) -> Self {
        self.max_bytes = max_bytes;
        self
    }

    /// Decode a raw probe string into an RGB image.
    ///
    /// # Errors
    ///
    /// `Error::Fetch` for remote retrieval failures, `Error::Decode` for
    /// undecodable bytes (tagged with the stage that produced them).
    pub async fn decode(&self, raw: &str) -> Result<RgbImage> {
        let source = classify(raw);
        debug!(stage = %source.stage(), len = raw.len(), "Decoding probe");

        let image = match source {
            ProbeSource::Remote(url) => {
                let bytes = self.fetch(url).await?;
                decode_bytes(&bytes, ProbeStage::Remote)?
            }
            ProbeSource::Local(path) => load_image_file(path)?,
            ProbeSource::Inline(payload) => decode_inline(payload)?,
        };

        debug!(width = image.width(), height = image.height(), "Probe decoded");
        Ok(image)
    }

    async fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        let fetch_err = |reason: String| Error::Fetch {
            url: url.to_string(),
            reason,
        };
        let transport_err = |e: reqwest::Error| {
            if e.is_timeout() {
                fetch_err(format!("timed out after {}s", self.timeout.as_secs()))
            } else {
                fetch_err(e.to_string())
            }
        };
        let too_large = || fetch_err(format!("response body exceeds {} bytes", self.max_bytes));

        let mut response = self.client.get(url).send().await.map_err(transport_err)?;

        let status = response.status();
        if !status.is_success() {
            return Err(fetch_err(format!("HTTP {status}")));
        }
        if response.content_length().is_some_and(|len| len > self.max_bytes) {
            return Err(too_large());
        }

        // Content-Length is advisory; the limit applies to bytes actually read
        let mut bytes = Vec::new();
        while let Some(chunk) = response.chunk().await.map_err(transport_err)? {
            if (bytes.len() + chunk.len()) as u64 > self.max_bytes {
                return Err(too_large());
            }
            bytes.extend_from_slice(&chunk);
        }

        Ok(bytes)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use image::{DynamicImage, GrayImage, ImageFormat, Luma, Rgba, RgbaImage};
    use std::io::Cursor;

    pub(crate) fn png_bytes(image: DynamicImage) -> Vec<u8> {
        let mut buf = Vec::new();
        image
            .write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
            .unwrap();
        buf
    }

    #[test]
    fn test_classify_priority() {
        assert!(matches!(classify("https://example.com/a.png"), ProbeSource::Remote(_)));
        assert!(matches!(classify("HTTP://example.com/a.png"), ProbeSource::Remote(_)));
        assert!(matches!(classify("iVBORw0KGgo="), ProbeSource::Inline(_)));
        assert!(matches!(classify("/definitely/not/here.png"), ProbeSource::Inline(_)));
    }

    /// Restores the working directory on drop.
    struct CwdGuard(std::path::PathBuf);

    impl Drop for CwdGuard {
        fn drop(&mut self) {
            let _ = std::env::set_current_dir(&self.0);
        }
    }

    #[test]
    fn test_local_path_wins_over_inline() {
        // A file named after a valid inline payload: the name decodes to a red
        // pixel, the file on disk holds a gray one
        let red = RgbImage::from_pixel(1, 1, image::Rgb([255, 0, 0]));
        let name = STANDARD.encode(png_bytes(DynamicImage::ImageRgb8(red)));
        assert_eq!(decode_inline(&name).unwrap().get_pixel(0, 0).0, [255, 0, 0]);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(&name);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        let gray = GrayImage::from_pixel(3, 2, Luma([120]));
        std::fs::write(&path, png_bytes(DynamicImage::ImageLuma8(gray))).unwrap();

        let _guard = CwdGuard(std::env::current_dir().unwrap());
        std::env::set_current_dir(dir.path()).unwrap();

        assert_eq!(classify(&name), ProbeSource::Local(Path::new(&name)));

        let rt = tokio::runtime::Runtime::new().unwrap();
        let decoder = ProbeDecoder::new(Duration::from_secs(1)).unwrap();
        let image = rt.block_on(decoder.decode(&name)).unwrap();
        assert_eq!(image.dimensions(), (3, 2));
        assert_eq!(image.get_pixel(0, 0).0, [120, 120, 120]);
    }

    #[test]
    fn test_inline_data_uri_with_alpha_is_rgb() {
        let rgba = RgbaImage::from_pixel(4, 4, Rgba([10, 20, 30, 128]));
        let encoded = STANDARD.encode(png_bytes(DynamicImage::ImageRgba8(rgba)));

        let image = decode_inline(&format!("data:image/png;base64,{encoded}")).unwrap();
        assert_eq!(image.dimensions(), (4, 4));
        assert_eq!(image.get_pixel(1, 1).0, [10, 20, 30]);

        // Bare payload without a header works too
        assert!(decode_inline(&encoded).is_ok());
    }

    #[test]
    fn test_inline_garbage_is_decode_error() {
        let err = decode_inline("not an image at all!").unwrap_err();
        assert!(matches!(err, Error::Decode { stage: ProbeStage::Inline, .. }));

        // Valid base64, invalid image bytes
        let err = decode_inline(&STANDARD.encode(b"hello world")).unwrap_err();
        assert!(matches!(err, Error::Decode { stage: ProbeStage::Inline, .. }));
    }

    #[test]
    fn test_local_non_image_is_local_decode_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.png");
        std::fs::write(&path, b"plain text").unwrap();

        let err = load_image_file(&path).unwrap_err();
        assert_eq!(err.stage(), Some("local-read"));
    }

    #[tokio::test]
    async fn test_unreachable_url_is_fetch_error() {
        let decoder = ProbeDecoder::new(Duration::from_secs(2)).unwrap();
        let err = decoder.decode("http://127.0.0.1:9/probe.png").await.unwrap_err();
        assert!(matches!(err, Error::Fetch { .. }));
        assert_eq!(err.stage(), Some("fetch"));
    }

    /// Serve one connection on a local port with `respond`, return its URL.
    fn one_shot_server<F>(respond: F) -> String
    where
        F: FnOnce(std::net::TcpStream) + Send + 'static,
    {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        std::thread::spawn(move || {
            if let Ok((stream, _)) = listener.accept() {
                respond(stream);
            }
        });
        format!("http://{addr}/probe.png")
    }

    fn read_request(stream: &mut std::net::TcpStream) {
        use std::io::Read;
        let mut buf = [0_u8; 4096];
        let _ = stream.read(&mut buf);
    }

    #[tokio::test]
    async fn test_silent_server_times_out_as_fetch_error() {
        let url = one_shot_server(|mut stream| {
            read_request(&mut stream);
            std::thread::sleep(Duration::from_secs(5));
            drop(stream);
        });

        let decoder = ProbeDecoder::new(Duration::from_secs(1)).unwrap();
        let started = std::time::Instant::now();
        let err = decoder.decode(&url).await.unwrap_err();

        assert!(started.elapsed() < Duration::from_secs(4));
        assert!(matches!(err, Error::Fetch { ref reason, .. } if reason.contains("timed out")));
        assert_eq!(err.stage(), Some("fetch"));
    }

    #[tokio::test]
    async fn test_non_success_status_is_fetch_error() {
        let url = one_shot_server(|mut stream| {
            use std::io::Write;
            read_request(&mut stream);
            let _ = stream.write_all(
                b"HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
            );
        });

        let decoder = ProbeDecoder::new(Duration::from_secs(2)).unwrap();
        let err = decoder.decode(&url).await.unwrap_err();

        assert!(matches!(err, Error::Fetch { ref reason, .. } if reason.contains("404")));
        assert_eq!(err.stage(), Some("fetch"));
    }

    #[tokio::test]
    async fn test_oversized_body_is_fetch_error() {
        let url = one_shot_server(|mut stream| {
            use std::io::Write;
            read_request(&mut stream);
            let body = vec![b'x'; 64];
            let head = format!(
                "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                body.len()
            );
            let _ = stream.write_all(head.as_bytes());
            let _ = stream.write_all(&body);
        });

        let decoder = ProbeDecoder::new(Duration::from_secs(2)).unwrap().with_max_bytes(16);
        let err = decoder.decode(&url).await.unwrap_err();

        assert!(matches!(err, Error::Fetch { ref reason, .. } if reason.contains("exceeds 16 bytes")));
        assert_eq!(err.stage(), Some("fetch"));
    }

    #[test]
    fn test_preview_is_bounded() {
        let long = "x".repeat(5000);
        let p = preview(&long);
        assert_eq!(p.chars().count(), PREVIEW_CHARS + 3);
        assert_eq!(preview("short"), "short");
        // Multi-byte characters are never split
        let wide = "é".repeat(300);
        assert!(preview(&wide).starts_with("éé"));
    }
}
