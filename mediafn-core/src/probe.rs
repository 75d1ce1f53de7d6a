//! Parsing of the probe tool's JSON output.
//!
//! The probe profile publishes the raw JSON; this parser exists to validate
//! it and to pull out the handful of fields worth logging (duration, size,
//! stream counts) before the invocation is declared a success.

use crate::error::{CoreError, CoreResult};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    #[serde(default)]
    format: Option<FfprobeFormat>,
    #[serde(default)]
    streams: Vec<FfprobeStream>,
}

#[derive(Debug, Deserialize)]
struct FfprobeFormat {
    duration: Option<String>,
    size: Option<String>,
    format_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    codec_type: Option<String>,
}

/// Summary of a probed media object.
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeSummary {
    pub duration_secs: Option<f64>,
    pub size_bytes: Option<u64>,
    pub container: Option<String>,
    pub video_streams: usize,
    pub audio_streams: usize,
}

/// Parses ffprobe `-print_format json` output.
///
/// Numeric fields arrive as strings and are tolerated when absent; a
/// document that is not probe-shaped JSON at all is an error.
pub fn parse_probe_output(json: &str) -> CoreResult<ProbeSummary> {
    let parsed: FfprobeOutput = serde_json::from_str(json)
        .map_err(|e| CoreError::ProbeParse(e.to_string()))?;

    let (duration_secs, size_bytes, container) = match parsed.format {
        Some(format) => (
            format.duration.as_deref().and_then(|d| d.parse::<f64>().ok()),
            format.size.as_deref().and_then(|s| s.parse::<u64>().ok()),
            format.format_name,
        ),
        None => (None, None, None),
    };

    let count = |kind: &str| {
        parsed
            .streams
            .iter()
            .filter(|s| s.codec_type.as_deref() == Some(kind))
            .count()
    };

    Ok(ProbeSummary {
        duration_secs,
        size_bytes,
        container,
        video_streams: count("video"),
        audio_streams: count("audio"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_typical_probe_output() {
        let json = r#"{
            "streams": [
                {"codec_type": "video", "width": 1280, "height": 720},
                {"codec_type": "audio", "channels": 2}
            ],
            "format": {
                "format_name": "mov,mp4,m4a,3gp,3g2,mj2",
                "duration": "5.000000",
                "size": "57344"
            }
        }"#;
        let summary = parse_probe_output(json).unwrap();
        assert_eq!(summary.duration_secs, Some(5.0));
        assert_eq!(summary.size_bytes, Some(57344));
        assert_eq!(summary.video_streams, 1);
        assert_eq!(summary.audio_streams, 1);
        assert!(summary.container.unwrap().contains("mp4"));
    }

    #[test]
    fn tolerates_missing_format_fields() {
        let summary = parse_probe_output(r#"{"streams": []}"#).unwrap();
        assert_eq!(summary.duration_secs, None);
        assert_eq!(summary.size_bytes, None);
        assert_eq!(summary.video_streams, 0);
    }

    #[test]
    fn rejects_non_json_output() {
        assert!(matches!(
            parse_probe_output("ffprobe: command not found"),
            Err(CoreError::ProbeParse(_))
        ));
    }
}
