//! Resolution of request parameters into a [`SynthesisRequest`].
//!
//! A field comes from the JSON body first, then from the query string, then
//! from a built-in default. Empty strings and unusable speeds count as absent
//! at every level.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::TtsError;

pub const DEFAULT_VOICE: &str = "en_US-amy-low";
pub const DEFAULT_SPEED: f64 = 1.0;

/// Fully resolved synthesis parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SynthesisRequest {
    pub text: String,
    pub voice: String,
    /// Speaker name within the voice; empty selects the default speaker.
    pub speaker: String,
    /// Playback speed multiplier, always strictly positive.
    pub speed: f64,
}

/// Shape of the JSON body accepted by the write-style endpoints.
#[derive(Debug, Default, Deserialize)]
struct RequestBody {
    text: Option<String>,
    voice: Option<String>,
    speaker: Option<String>,
    speed: Option<f64>,
}

/// Merge an optional JSON body with query parameters.
///
/// `body` is `None` for read-style requests. A body made only of whitespace
/// is treated the same as no body. Empty text is not rejected here; callers
/// validate it before synthesis.
pub fn resolve(
    body: Option<&[u8]>,
    query: &HashMap<String, String>,
) -> Result<SynthesisRequest, TtsError> {
    let body = match body {
        Some(bytes) if !bytes.iter().all(u8::is_ascii_whitespace) => {
            serde_json::from_slice::<RequestBody>(bytes).map_err(TtsError::MalformedRequest)?
        }
        _ => RequestBody::default(),
    };

    Ok(SynthesisRequest {
        text: resolve_str(body.text, query, "text", ""),
        voice: resolve_str(body.voice, query, "voice", DEFAULT_VOICE),
        speaker: resolve_str(body.speaker, query, "speaker", ""),
        speed: resolve_speed(body.speed, query),
    })
}

fn resolve_str(
    body_value: Option<String>,
    query: &HashMap<String, String>,
    key: &str,
    default: &str,
) -> String {
    body_value
        .filter(|v| !v.is_empty())
        .or_else(|| query.get(key).filter(|v| !v.is_empty()).cloned())
        .unwrap_or_else(|| default.to_string())
}

fn resolve_speed(body_value: Option<f64>, query: &HashMap<String, String>) -> f64 {
    body_value
        .filter(|s| is_usable_speed(*s))
        .or_else(|| {
            query
                .get("speed")
                .and_then(|raw| raw.trim().parse::<f64>().ok())
                .filter(|s| is_usable_speed(*s))
        })
        .unwrap_or(DEFAULT_SPEED)
}

fn is_usable_speed(speed: f64) -> bool {
    speed.is_finite() && speed > 0.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn query(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_defaults_without_body_or_query() {
        let req = resolve(None, &HashMap::new()).unwrap();
        assert_eq!(req.text, "");
        assert_eq!(req.voice, DEFAULT_VOICE);
        assert_eq!(req.speaker, "");
        assert_eq!(req.speed, 1.0);
    }

    #[test]
    fn test_body_takes_precedence_over_query() {
        let body = br#"{"text":"from body","voice":"de_DE-thorsten-low","speed":1.5}"#;
        let q = query(&[("text", "from query"), ("voice", "other"), ("speaker", "alice")]);
        let req = resolve(Some(body), &q).unwrap();
        assert_eq!(req.text, "from body");
        assert_eq!(req.voice, "de_DE-thorsten-low");
        assert_eq!(req.speaker, "alice");
        assert_eq!(req.speed, 1.5);
    }

    #[test]
    fn test_empty_body_string_falls_back_to_query() {
        let body = br#"{"text":"","voice":""}"#;
        let q = query(&[("text", "hello"), ("voice", "v1")]);
        let req = resolve(Some(body), &q).unwrap();
        assert_eq!(req.text, "hello");
        assert_eq!(req.voice, "v1");
    }

    #[test]
    fn test_unusable_speed_falls_back_to_default() {
        for raw in ["0", "-2", "fast", "", "NaN", "inf"] {
            let req = resolve(None, &query(&[("speed", raw)])).unwrap();
            assert_eq!(req.speed, 1.0, "speed={raw:?}");
        }
        let req = resolve(Some(br#"{"speed":-1.0}"#), &HashMap::new()).unwrap();
        assert_eq!(req.speed, 1.0);
        let req = resolve(Some(br#"{"speed":0}"#), &query(&[("speed", "2")])).unwrap();
        assert_eq!(req.speed, 2.0);
    }

    #[test]
    fn test_query_speed_is_parsed() {
        let req = resolve(None, &query(&[("speed", " 0.75 ")])).unwrap();
        assert_eq!(req.speed, 0.75);
    }

    #[test]
    fn test_malformed_body_is_rejected() {
        let result = resolve(Some(b"{not json"), &HashMap::new());
        assert!(matches!(result, Err(TtsError::MalformedRequest(_))));

        let result = resolve(Some(br#"{"speed":"fast"}"#), &HashMap::new());
        assert!(matches!(result, Err(TtsError::MalformedRequest(_))));
    }

    #[test]
    fn test_blank_body_counts_as_absent() {
        let req = resolve(Some(b"  \n"), &query(&[("text", "hi")])).unwrap();
        assert_eq!(req.text, "hi");
    }
}
