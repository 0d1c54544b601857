//! Comprehensive unit tests for transcode.rs module

use std::time::Duration;

use sbv_rust::config::MediaConfig;
use sbv_rust::transcode::{placeholder_jpeg, MediaTranscoder};

fn transcoder_without_ffmpeg() -> MediaTranscoder {
    MediaTranscoder::default()
        .with_ffmpeg_path("/nonexistent/bin/ffmpeg")
        .with_timeout(Duration::from_secs(5))
}

#[test]
fn test_browser_formats_pass_through() {
    let transcoder = transcoder_without_ffmpeg();
    for mime in ["image/jpeg", "image/png", "video/mp4", "text/x-vcard", "audio/amr"] {
        let resolved = transcoder.resolve(&[1, 2, 3], mime);
        assert_eq!(resolved.data, vec![1, 2, 3]);
        assert_eq!(resolved.mime_type, mime);
    }
}

#[test]
fn test_video_conversion_falls_back_to_original() {
    let payload = b"\x00\x00\x00\x18ftyp3gp4".to_vec();
    let resolved = transcoder_without_ffmpeg().resolve(&payload, "video/3gpp");

    assert_eq!(resolved.data, payload);
    assert_eq!(resolved.mime_type, "video/3gpp");
}

#[test]
fn test_matroska_fallback_keeps_mime_type() {
    let resolved = transcoder_without_ffmpeg().resolve(b"mkv", "video/x-matroska");
    assert_eq!(resolved.mime_type, "video/x-matroska");
    assert_eq!(resolved.data, b"mkv".to_vec());
}

#[test]
fn test_placeholder_dimensions() {
    let jpeg = placeholder_jpeg().expect("placeholder");
    let image = image::load_from_memory(&jpeg).expect("decode placeholder").to_rgb8();
    assert_eq!(image.dimensions(), (400, 300));
}

#[cfg(not(feature = "heic"))]
#[test]
fn test_heic_without_decoder_serves_placeholder() {
    let resolved = transcoder_without_ffmpeg().resolve(b"not really heic", "image/heic");

    assert_eq!(resolved.mime_type, "image/jpeg");
    assert_eq!(&resolved.data[..2], &[0xFF, 0xD8]);
    let image = image::load_from_memory(&resolved.data).expect("decode").to_rgb8();
    assert_eq!(image.dimensions(), (400, 300));
}

#[cfg(feature = "heic")]
#[test]
fn test_undecodable_heic_falls_back_to_original() {
    let resolved = transcoder_without_ffmpeg().resolve(b"not really heic", "image/heic");
    assert_eq!(resolved.mime_type, "image/heic");
    assert_eq!(resolved.data, b"not really heic".to_vec());
}

#[test]
fn test_from_config() {
    let config = MediaConfig {
        ffmpeg_path: "/nonexistent/ffmpeg".to_string(),
        conversion_timeout_secs: 1,
        jpeg_quality: 75,
    };
    let resolved = MediaTranscoder::from_config(&config).resolve(b"3gp", "video/3gpp");
    assert_eq!(resolved.mime_type, "video/3gpp");
}

/// Writes an executable stand-in for ffmpeg that emits `stderr_bytes` of noise,
/// writes `MP4DATA` to its last argument and exits with `exit_code`.
#[cfg(unix)]
fn fake_ffmpeg(dir: &std::path::Path, stderr_bytes: usize, exit_code: i32) -> std::path::PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join("ffmpeg");
    let script = format!(
        "#!/bin/sh\nhead -c {stderr_bytes} /dev/zero | tr '\\0' 'e' >&2\nfor out; do :; done\nprintf MP4DATA > \"$out\"\nexit {exit_code}\n"
    );
    std::fs::write(&path, script).expect("write script");
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).expect("chmod");
    path
}

#[cfg(unix)]
#[test]
fn test_video_conversion_with_quiet_ffmpeg() {
    let dir = tempfile::tempdir().expect("Failed to create temp directory");
    let transcoder = MediaTranscoder::default()
        .with_ffmpeg_path(fake_ffmpeg(dir.path(), 100, 0))
        .with_timeout(Duration::from_secs(30));

    let resolved = transcoder.resolve(b"orig", "video/3gpp");
    assert_eq!(resolved.mime_type, "video/mp4");
    assert_eq!(resolved.data, b"MP4DATA".to_vec());
}

#[cfg(unix)]
#[test]
fn test_video_conversion_survives_large_stderr() {
    let dir = tempfile::tempdir().expect("Failed to create temp directory");
    let timeout = Duration::from_secs(30);
    let transcoder = MediaTranscoder::default()
        .with_ffmpeg_path(fake_ffmpeg(dir.path(), 200_000, 0))
        .with_timeout(timeout);

    let started = std::time::Instant::now();
    let resolved = transcoder.resolve(b"orig", "video/3gpp");

    assert!(started.elapsed() < timeout);
    assert_eq!(resolved.mime_type, "video/mp4");
    assert_eq!(resolved.data, b"MP4DATA".to_vec());
}

#[cfg(unix)]
#[test]
fn test_failing_ffmpeg_with_large_stderr_falls_back_promptly() {
    let dir = tempfile::tempdir().expect("Failed to create temp directory");
    let timeout = Duration::from_secs(30);
    let transcoder = MediaTranscoder::default()
        .with_ffmpeg_path(fake_ffmpeg(dir.path(), 200_000, 1))
        .with_timeout(timeout);

    let started = std::time::Instant::now();
    let resolved = transcoder.resolve(b"orig", "video/3gpp");

    assert!(started.elapsed() < timeout);
    assert_eq!(resolved.mime_type, "video/3gpp");
    assert_eq!(resolved.data, b"orig".to_vec());
}
