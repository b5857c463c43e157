//! Quality presets: the closed set of named transcode targets.
//!
//! Mirrors the shape of the teacher's `audio::compression::CompressionProfile`
//! table (name, codec, bitrate, extension) but as a closed `enum` rather than
//! a mutable `HashMap<String, CompressionProfile>`, since the spec treats the
//! preset set as fixed.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum QualityPreset {
    Low,
    Medium,
    High,
    /// Passthrough: `requires_transcoding() == false`, caller serves the original file.
    Original,
}

impl QualityPreset {
    pub const ALL: [QualityPreset; 4] = [
        QualityPreset::Low,
        QualityPreset::Medium,
        QualityPreset::High,
        QualityPreset::Original,
    ];

    /// Presets that actually produce a cache entry.
    pub fn transcoded() -> impl Iterator<Item = QualityPreset> {
        Self::ALL.into_iter().filter(|p| p.requires_transcoding())
    }

    pub fn name(&self) -> &'static str {
        match self {
            QualityPreset::Low => "low",
            QualityPreset::Medium => "medium",
            QualityPreset::High => "high",
            QualityPreset::Original => "original",
        }
    }

    pub fn parse(name: &str) -> Option<QualityPreset> {
        match name {
            "low" => Some(QualityPreset::Low),
            "medium" => Some(QualityPreset::Medium),
            "high" => Some(QualityPreset::High),
            "original" => Some(QualityPreset::Original),
            _ => None,
        }
    }

    pub fn requires_transcoding(&self) -> bool {
        !matches!(self, QualityPreset::Original)
    }

    /// `None` for the passthrough preset, which has no target bitrate.
    pub fn target_bitrate_kbps(&self) -> Option<u32> {
        match self {
            QualityPreset::Low => Some(96),
            QualityPreset::Medium => Some(128),
            QualityPreset::High => Some(256),
            QualityPreset::Original => None,
        }
    }

    pub fn file_extension(&self) -> &'static str {
        match self {
            QualityPreset::Low | QualityPreset::Medium | QualityPreset::High => "m4a",
            QualityPreset::Original => "",
        }
    }

    pub fn mime_type(&self) -> &'static str {
        match self {
            QualityPreset::Low | QualityPreset::Medium | QualityPreset::High => "audio/mp4",
            QualityPreset::Original => "application/octet-stream",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_original_skips_transcoding() {
        for preset in QualityPreset::ALL {
            assert_eq!(preset.requires_transcoding(), preset != QualityPreset::Original);
        }
    }

    #[test]
    fn parse_round_trips_name() {
        for preset in QualityPreset::ALL {
            assert_eq!(QualityPreset::parse(preset.name()), Some(preset));
        }
        assert_eq!(QualityPreset::parse("lossless"), None);
    }

    #[test]
    fn bitrates_strictly_increase_with_quality() {
        assert!(QualityPreset::Low.target_bitrate_kbps() < QualityPreset::Medium.target_bitrate_kbps());
        assert!(QualityPreset::Medium.target_bitrate_kbps() < QualityPreset::High.target_bitrate_kbps());
    }
}
