//! Source-file introspection via an external prober (ffprobe-shaped).
//!
//! Grounded on the teacher's `tools/transcoder.rs` pattern of shelling out to
//! an external binary and parsing its output, adapted from a CLI-encoder
//! invocation to a read-only `-show_format -show_streams` probe.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use serde_json::Value;
use tokio::process::Command;
use tokio::sync::OnceCell;

use super::preset::QualityPreset;

const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Best-effort properties of a source file. Any field may be `None` if the
/// prober is unavailable, times out, or the stream doesn't report it —
/// absence, not an error, is the signal callers act on.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AudioProperties {
    pub codec_name: Option<String>,
    pub bitrate_kbps: Option<u32>,
    pub sample_rate_hz: Option<u32>,
    pub duration_secs: Option<f64>,
}

pub struct ProbeOracle {
    prober_path: String,
    available: OnceCell<bool>,
}

impl ProbeOracle {
    pub fn new(prober_path: impl Into<String>) -> Self {
        Self {
            prober_path: prober_path.into(),
            available: OnceCell::new(),
        }
    }

    pub async fn is_available(&self) -> bool {
        *self
            .available
            .get_or_init(|| async { self.detect().await })
            .await
    }

    async fn detect(&self) -> bool {
        Command::new(&self.prober_path)
            .arg("-version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map(|status| status.success())
            .unwrap_or(false)
    }

    /// Probe never fails outright; an unreachable prober or malformed output
    /// simply yields an all-`None` `AudioProperties`.
    pub async fn probe(&self, path: &Path) -> AudioProperties {
        if !self.is_available().await {
            return AudioProperties::default();
        }

        let child = Command::new(&self.prober_path)
            .args([
                "-v",
                "quiet",
                "-print_format",
                "json",
                "-show_format",
                "-show_streams",
            ])
            .arg(path)
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .output();

        let output = match tokio::time::timeout(PROBE_TIMEOUT, child).await {
            Ok(Ok(output)) if output.status.success() => output,
            _ => return AudioProperties::default(),
        };

        parse_probe_json(&output.stdout).unwrap_or_default()
    }

    /// True when the transcode would produce no meaningful improvement: the
    /// source is already at or below the preset's target bitrate in a codec
    /// the preset wouldn't change meaningfully.
    pub fn should_skip(&self, props: &AudioProperties, preset: QualityPreset) -> bool {
        let (Some(target), Some(source)) = (preset.target_bitrate_kbps(), props.bitrate_kbps) else {
            return false;
        };
        source > 0 && source <= target
    }
}

fn parse_probe_json(bytes: &[u8]) -> Option<AudioProperties> {
    let root: Value = serde_json::from_slice(bytes).ok()?;

    let audio_stream = root
        .get("streams")?
        .as_array()?
        .iter()
        .find(|s| s.get("codec_type").and_then(Value::as_str) == Some("audio"));

    let codec_name = audio_stream
        .and_then(|s| s.get("codec_name"))
        .and_then(Value::as_str)
        .map(String::from);

    let sample_rate_hz = audio_stream
        .and_then(|s| s.get("sample_rate"))
        .and_then(Value::as_str)
        .and_then(|s| s.parse().ok());

    let bitrate_kbps = audio_stream
        .and_then(|s| s.get("bit_rate"))
        .and_then(Value::as_str)
        .and_then(|s| s.parse::<u64>().ok())
        .or_else(|| {
            root.get("format")?
                .get("bit_rate")
                .and_then(Value::as_str)
                .and_then(|s| s.parse::<u64>().ok())
        })
        .map(|bps| (bps / 1000) as u32);

    let duration_secs = root
        .get("format")
        .and_then(|f| f.get("duration"))
        .and_then(Value::as_str)
        .and_then(|s| s.parse().ok());

    Some(AudioProperties {
        codec_name,
        bitrate_kbps,
        sample_rate_hz,
        duration_secs,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "streams": [{"codec_type":"audio","codec_name":"flac","sample_rate":"44100","bit_rate":"900000"}],
        "format": {"duration": "183.2", "bit_rate": "912000"}
    }"#;

    #[test]
    fn parses_audio_stream_fields() {
        let props = parse_probe_json(SAMPLE.as_bytes()).unwrap();
        assert_eq!(props.codec_name.as_deref(), Some("flac"));
        assert_eq!(props.sample_rate_hz, Some(44100));
        assert_eq!(props.bitrate_kbps, Some(900));
        assert_eq!(props.duration_secs, Some(183.2));
    }

    #[test]
    fn malformed_json_yields_none() {
        assert!(parse_probe_json(b"not json").is_none());
    }

    #[test]
    fn should_skip_when_source_already_below_target() {
        let oracle = ProbeOracle::new("ffprobe");
        let props = AudioProperties {
            bitrate_kbps: Some(64),
            ..Default::default()
        };
        assert!(oracle.should_skip(&props, QualityPreset::Medium));
    }

    #[test]
    fn does_not_skip_when_source_exceeds_target() {
        let oracle = ProbeOracle::new("ffprobe");
        let props = AudioProperties {
            bitrate_kbps: Some(900),
            ..Default::default()
        };
        assert!(!oracle.should_skip(&props, QualityPreset::Medium));
    }

    #[test]
    fn does_not_skip_when_bitrate_unknown() {
        let oracle = ProbeOracle::new("ffprobe");
        assert!(!oracle.should_skip(&AudioProperties::default(), QualityPreset::Medium));
    }
}
