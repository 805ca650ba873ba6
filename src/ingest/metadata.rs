use serde::{Deserialize, Serialize};

use crate::core::error::MetadataError;

// ---------------------------------------------------------------------------
// Wire delimiters
// ---------------------------------------------------------------------------

/// Marker the uploader prepends before the TOML document; everything up to
/// and including it is padding.
pub const NETWORK_TEXT_DELIM: &str = "----WAVECAST-METADATA----";

/// Marker after which the uploader appends trailing padding.
const BOTTOM_DELIM: &str = "--------------------------";

// ---------------------------------------------------------------------------
// Metadata document
// ---------------------------------------------------------------------------

/// Song metadata delivered alongside an upload via `POST /toml/upload`.
///
/// Every field except `path` is optional; `path` must be non-empty for the
/// document to be accepted.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AudioMetadata {
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub artist: String,
    #[serde(default)]
    pub album: String,
    #[serde(default)]
    pub duration_secs: f64,
    /// Bitrates (kbps) the uploader encoded, one playlist each.
    #[serde(default)]
    pub bitrates: Vec<u32>,
}

/// Strip the wire padding around the TOML document.
///
/// If the network text delimiter appears, everything through it is
/// discarded; if the bottom delimiter appears after that, everything from it
/// onward is discarded.
fn groom_body(body: &str) -> &str {
    let body = match body.find(NETWORK_TEXT_DELIM) {
        Some(pos) => &body[pos + NETWORK_TEXT_DELIM.len()..],
        None => body,
    };
    match body.find(BOTTOM_DELIM) {
        Some(pos) => &body[..pos],
        None => body,
    }
}

/// Groom and parse a metadata upload body.
pub fn parse_upload(body: &str) -> Result<AudioMetadata, MetadataError> {
    let document = groom_body(body);
    let metadata: AudioMetadata = toml::from_str(document)?;
    if metadata.path.is_empty() {
        return Err(MetadataError::MissingPath);
    }
    Ok(metadata)
}
