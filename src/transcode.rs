//! On-demand media conversion for browser playback
//!
//! Stored attachments keep their original bytes. When one is served, HEIC
//! images become JPEG and legacy 3GP/3G2/Matroska video becomes H.264 MP4.
//! Conversion failures are logged and the original payload is returned, so
//! a missing codec never turns into a failed request.

use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use image::codecs::jpeg::JpegEncoder;
use image::{Rgb, RgbImage};
use tracing::{debug, warn};

use crate::config::MediaConfig;
use crate::error::{Result, SbvError};
use crate::metrics;

const MP4_MIME: &str = "video/mp4";
const JPEG_MIME: &str = "image/jpeg";

const PLACEHOLDER_WIDTH: u32 = 400;
const PLACEHOLDER_HEIGHT: u32 = 300;
const PLACEHOLDER_QUALITY: u8 = 80;
const PLACEHOLDER_FILL: Rgb<u8> = Rgb([200, 200, 200]);
const PLACEHOLDER_BORDER: Rgb<u8> = Rgb([100, 100, 100]);

const VIDEO_FORMATS_NEEDING_CONVERSION: &[&str] =
    &["3gpp", "3gp", "3g2", "3gpp2", "video/x-matroska"];

/// Payload ready to hand to a browser
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedMedia {
    /// Bytes to serve
    pub data: Vec<u8>,
    /// MIME type matching `data`
    pub mime_type: String,
}

impl ResolvedMedia {
    fn original(data: &[u8], mime_type: &str) -> Self {
        Self {
            data: data.to_vec(),
            mime_type: mime_type.to_string(),
        }
    }
}

/// Stateless converter; safe to share across request handlers
#[derive(Debug, Clone)]
pub struct MediaTranscoder {
    ffmpeg_path: PathBuf,
    timeout: Duration,
    jpeg_quality: u8,
}

impl Default for MediaTranscoder {
    fn default() -> Self {
        Self {
            ffmpeg_path: PathBuf::from("ffmpeg"),
            timeout: Duration::from_secs(300),
            jpeg_quality: 90,
        }
    }
}

impl MediaTranscoder {
    /// Build from the media section of the app config
    #[must_use]
    pub fn from_config(config: &MediaConfig) -> Self {
        Self {
            ffmpeg_path: PathBuf::from(&config.ffmpeg_path),
            timeout: Duration::from_secs(config.conversion_timeout_secs),
            jpeg_quality: config.jpeg_quality,
        }
    }

    /// Use a different ffmpeg executable
    #[must_use]
    pub fn with_ffmpeg_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.ffmpeg_path = path.into();
        self
    }

    /// Bound a single video conversion
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Produce a browser-friendly payload. Never fails.
    #[must_use]
    pub fn resolve(&self, data: &[u8], mime_type: &str) -> ResolvedMedia {
        if is_heic_content_type(mime_type) {
            return self.resolve_heic(data, mime_type);
        }

        if needs_video_conversion(mime_type) {
            return match self.convert_video_to_mp4(data) {
                Ok(converted) => {
                    debug!(
                        from = mime_type,
                        input_bytes = data.len(),
                        output_bytes = converted.len(),
                        "Converted video to MP4"
                    );
                    metrics::record_media_conversion("video", "converted");
                    ResolvedMedia {
                        data: converted,
                        mime_type: MP4_MIME.to_string(),
                    }
                }
                Err(err) => {
                    warn!(mime_type, error = %err, "Video conversion failed, serving original");
                    metrics::record_media_conversion("video", "fallback");
                    ResolvedMedia::original(data, mime_type)
                }
            };
        }

        ResolvedMedia::original(data, mime_type)
    }

    #[cfg(feature = "heic")]
    fn resolve_heic(&self, data: &[u8], mime_type: &str) -> ResolvedMedia {
        match decode_heic(data).and_then(|image| encode_jpeg(&image, self.jpeg_quality)) {
            Ok(jpeg) => {
                metrics::record_media_conversion("heic", "converted");
                ResolvedMedia {
                    data: jpeg,
                    mime_type: JPEG_MIME.to_string(),
                }
            }
            Err(err) => {
                warn!(mime_type, error = %err, "HEIC conversion failed, serving original");
                metrics::record_media_conversion("heic", "fallback");
                ResolvedMedia::original(data, mime_type)
            }
        }
    }

    #[cfg(not(feature = "heic"))]
    fn resolve_heic(&self, data: &[u8], mime_type: &str) -> ResolvedMedia {
        debug!(quality = self.jpeg_quality, "HEIC support not compiled in, serving placeholder");
        match placeholder_jpeg() {
            Ok(jpeg) => {
                metrics::record_media_conversion("heic", "placeholder");
                ResolvedMedia {
                    data: jpeg,
                    mime_type: JPEG_MIME.to_string(),
                }
            }
            Err(err) => {
                warn!(error = %err, "Placeholder generation failed, serving original");
                metrics::record_media_conversion("heic", "fallback");
                ResolvedMedia::original(data, mime_type)
            }
        }
    }

    /// Run ffmpeg on a scoped temp directory; everything is removed on return.
    fn convert_video_to_mp4(&self, data: &[u8]) -> Result<Vec<u8>> {
        let workdir = tempfile::Builder::new().prefix("sbv-video-").tempdir()?;
        let input = workdir.path().join("input.3gp");
        let output = workdir.path().join("output.mp4");
        fs::write(&input, data)?;

        let child = Command::new(&self.ffmpeg_path)
            .arg("-nostdin")
            .args(["-loglevel", "error"])
            .arg("-i")
            .arg(&input)
            .args(["-c:v", "libx264", "-c:a", "aac"])
            .args(["-movflags", "+faststart", "-preset", "fast", "-crf", "23"])
            .arg("-y")
            .arg(&output)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                SbvError::MediaConversion(format!(
                    "failed to start {}: {e}",
                    self.ffmpeg_path.display()
                ))
            })?;

        let mut guard = ChildGuard(Some(child));
        let stderr_reader = guard.drain_stderr();
        let status = guard.wait_with_deadline(Instant::now() + self.timeout)?;
        let stderr = stderr_reader
            .and_then(|reader| reader.join().ok())
            .unwrap_or_default();

        if !status.success() {
            return Err(SbvError::MediaConversion(format!(
                "ffmpeg exited with {status}: {}",
                stderr.trim()
            )));
        }

        read_non_empty(&output)
    }
}

/// Kills the child if it is still running when dropped.
struct ChildGuard(Option<Child>);

impl ChildGuard {
    fn wait_with_deadline(&mut self, deadline: Instant) -> Result<ExitStatus> {
        let child = self
            .0
            .as_mut()
            .ok_or_else(|| SbvError::MediaConversion("process already reaped".to_string()))?;
        loop {
            if let Some(status) = child.try_wait()? {
                return Ok(status);
            }
            if Instant::now() >= deadline {
                return Err(SbvError::MediaConversion(
                    "ffmpeg timed out".to_string(),
                ));
            }
            thread::sleep(Duration::from_millis(50));
        }
    }

    /// Read stderr on its own thread so a chatty child never fills the pipe.
    fn drain_stderr(&mut self) -> Option<JoinHandle<String>> {
        let mut stderr = self.0.as_mut().and_then(|child| child.stderr.take())?;
        Some(thread::spawn(move || {
            let mut bytes = Vec::new();
            if let Err(err) = stderr.read_to_end(&mut bytes) {
                debug!(error = %err, "Could not read ffmpeg stderr");
            }
            String::from_utf8_lossy(&bytes).into_owned()
        }))
    }
}

impl Drop for ChildGuard {
    fn drop(&mut self) {
        if let Some(mut child) = self.0.take() {
            if matches!(child.try_wait(), Ok(None)) {
                let _ = child.kill();
            }
            let _ = child.wait();
        }
    }
}

fn read_non_empty(path: &Path) -> Result<Vec<u8>> {
    let data = fs::read(path)?;
    if data.is_empty() {
        return Err(SbvError::MediaConversion(
            "ffmpeg produced an empty file".to_string(),
        ));
    }
    Ok(data)
}

fn encode_jpeg(image: &RgbImage, quality: u8) -> Result<Vec<u8>> {
    let mut encoded = Vec::new();
    JpegEncoder::new_with_quality(&mut encoded, quality).encode_image(image)?;
    Ok(encoded)
}

/// Grey 400x300 card with a one-pixel dark border.
pub fn placeholder_jpeg() -> Result<Vec<u8>> {
    let mut canvas = RgbImage::from_pixel(PLACEHOLDER_WIDTH, PLACEHOLDER_HEIGHT, PLACEHOLDER_FILL);
    for x in 0..PLACEHOLDER_WIDTH {
        canvas.put_pixel(x, 0, PLACEHOLDER_BORDER);
        canvas.put_pixel(x, PLACEHOLDER_HEIGHT - 1, PLACEHOLDER_BORDER);
    }
    for y in 0..PLACEHOLDER_HEIGHT {
        canvas.put_pixel(0, y, PLACEHOLDER_BORDER);
        canvas.put_pixel(PLACEHOLDER_WIDTH - 1, y, PLACEHOLDER_BORDER);
    }
    encode_jpeg(&canvas, PLACEHOLDER_QUALITY)
}

#[cfg(feature = "heic")]
fn decode_heic(data: &[u8]) -> Result<RgbImage> {
    use libheif_rs::{ColorSpace, HeifContext, LibHeif, RgbChroma};

    let heif_err = |e: libheif_rs::HeifError| SbvError::MediaConversion(e.to_string());
    let lib_heif = LibHeif::new();
    let ctx = HeifContext::read_from_bytes(data).map_err(heif_err)?;
    let handle = ctx.primary_image_handle().map_err(heif_err)?;
    let decoded = lib_heif
        .decode(&handle, ColorSpace::Rgb(RgbChroma::Rgb), None)
        .map_err(heif_err)?;

    let planes = decoded.planes();
    let plane = planes
        .interleaved
        .ok_or_else(|| SbvError::MediaConversion("HEIC image has no RGB plane".to_string()))?;

    let (width, height) = (plane.width, plane.height);
    let row_len = width as usize * 3;
    let mut pixels = Vec::with_capacity(row_len * height as usize);
    for row in plane.data.chunks(plane.stride).take(height as usize) {
        pixels.extend_from_slice(&row[..row_len.min(row.len())]);
    }

    RgbImage::from_raw(width, height, pixels)
        .ok_or_else(|| SbvError::MediaConversion("HEIC plane size mismatch".to_string()))
}

/// HEIC and HEIF still images
#[must_use]
pub fn is_heic_content_type(content_type: &str) -> bool {
    let ct = content_type.trim().to_ascii_lowercase();
    ct.contains("heic") || ct.contains("heif")
}

/// Video containers browsers cannot play
#[must_use]
pub fn needs_video_conversion(content_type: &str) -> bool {
    let ct = content_type.trim().to_ascii_lowercase();
    VIDEO_FORMATS_NEEDING_CONVERSION
        .iter()
        .any(|format| ct.contains(format))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_type_detection() {
        assert!(is_heic_content_type("image/heic"));
        assert!(is_heic_content_type("IMAGE/HEIF-SEQUENCE"));
        assert!(!is_heic_content_type("image/jpeg"));
        assert!(needs_video_conversion("video/3gpp"));
        assert!(needs_video_conversion("video/3gpp2"));
        assert!(needs_video_conversion("video/x-matroska"));
        assert!(!needs_video_conversion("video/mp4"));
    }

    #[test]
    fn test_placeholder_is_jpeg() {
        let jpeg = placeholder_jpeg().expect("placeholder");
        assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);
    }

    #[test]
    fn test_read_non_empty_rejects_empty_output() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("out.mp4");
        fs::write(&path, b"").expect("write");
        assert!(read_non_empty(&path).is_err());
    }
}
