//! Converter availability and codec selection.
//!
//! Grounded on `tools/transcoder.rs::check_ffmpeg_available()`, extended to
//! also memoize the preferred encoder name since the spec wants hardware
//! encoders preferred when the converter advertises them.

use std::process::Stdio;

use tokio::process::Command;
use tokio::sync::OnceCell;

const FALLBACK_CODEC: &str = "aac";

pub struct CodecSelector {
    converter_path: String,
    available: OnceCell<bool>,
    codec: OnceCell<String>,
}

impl CodecSelector {
    pub fn new(converter_path: impl Into<String>) -> Self {
        Self {
            converter_path: converter_path.into(),
            available: OnceCell::new(),
            codec: OnceCell::new(),
        }
    }

    pub async fn is_available(&self) -> bool {
        self.ensure_detected().await;
        *self.available.get().unwrap_or(&false)
    }

    pub async fn preferred_audio_codec(&self) -> String {
        self.ensure_detected().await;
        self.codec.get().cloned().unwrap_or_else(|| FALLBACK_CODEC.to_string())
    }

    async fn ensure_detected(&self) {
        if self.available.initialized() {
            return;
        }
        let encoders_list = Command::new(&self.converter_path)
            .args(["-hide_banner", "-encoders"])
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .output()
            .await;

        match encoders_list {
            Ok(output) if output.status.success() => {
                let text = String::from_utf8_lossy(&output.stdout);
                let _ = self.available.set(true);
                let _ = self.codec.set(pick_codec(&text));
            }
            _ => {
                let _ = self.available.set(false);
                let _ = self.codec.set(FALLBACK_CODEC.to_string());
            }
        }
    }
}

fn pick_codec(encoders_output: &str) -> String {
    if cfg!(target_os = "macos") && encoders_output.contains("aac_at") {
        "aac_at".to_string()
    } else if encoders_output.contains(" aac ") || encoders_output.contains("\naac ") {
        "aac".to_string()
    } else {
        FALLBACK_CODEC.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefers_hardware_encoder_on_macos_when_advertised() {
        let listing = " A....D aac_at            Apple AAC (AudioToolbox)\n A....D aac               AAC (Advanced Audio Coding)\n";
        let codec = pick_codec(listing);
        if cfg!(target_os = "macos") {
            assert_eq!(codec, "aac_at");
        } else {
            assert_eq!(codec, "aac");
        }
    }

    #[test]
    fn falls_back_when_no_aac_encoder_listed() {
        assert_eq!(pick_codec("A....D mp3               MP3\n"), FALLBACK_CODEC);
    }
}
