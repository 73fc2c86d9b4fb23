//! Pairing challenge rendering

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use chrono::{DateTime, Utc};
use qrcode::{render::svg, QrCode};
use serde::Serialize;
use tracing::warn;

/// A pairing challenge as issued by the network, plus its QR rendering
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PairingChallenge {
    /// Payload to encode in the QR code
    pub raw: String,
    /// `data:image/svg+xml;base64,...`, absent if the payload could not be encoded
    pub image: Option<String>,
    pub issued_at: DateTime<Utc>,
}

impl PairingChallenge {
    pub fn new(raw: String) -> Self {
        let image = match render_data_url(&raw) {
            Ok(url) => Some(url),
            Err(e) => {
                warn!("Failed to render pairing challenge: {}", e);
                None
            }
        };
        Self {
            raw,
            image,
            issued_at: Utc::now(),
        }
    }
}

/// Render `payload` as an SVG QR code wrapped in a data URL.
pub fn render_data_url(payload: &str) -> Result<String, qrcode::types::QrError> {
    let svg = QrCode::new(payload.as_bytes())?
        .render::<svg::Color>()
        .min_dimensions(256, 256)
        .dark_color(svg::Color("#000000"))
        .light_color(svg::Color("#FFFFFF"))
        .build();
    Ok(format!("data:image/svg+xml;base64,{}", BASE64.encode(svg)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_challenge_renders_svg_data_url() {
        let challenge = PairingChallenge::new("2@AbCdEf,123456,xyz==".into());
        let image = challenge.image.unwrap();
        assert!(image.starts_with("data:image/svg+xml;base64,"));

        let encoded = image.trim_start_matches("data:image/svg+xml;base64,");
        let svg = String::from_utf8(BASE64.decode(encoded).unwrap()).unwrap();
        assert!(svg.contains("<svg"));
    }

    #[test]
    fn test_oversized_payload_has_no_image() {
        let challenge = PairingChallenge::new("x".repeat(8000));
        assert!(challenge.image.is_none());
        assert_eq!(challenge.raw.len(), 8000);
    }
}
