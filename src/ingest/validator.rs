use std::fmt;
use std::fs::File;
use std::io::Read;
use std::path::Path;

use thiserror::Error;

// ---------------------------------------------------------------------------
// Format constants
// ---------------------------------------------------------------------------

/// Mandatory HLS playlist marker. Accepted anywhere in the file, matching
/// what encoders in the wild actually emit.
const PLAYLIST_HEADER: &[u8] = b"#EXTM3U";

/// MPEG-TS packet sync byte.
const TS_SYNC_BYTE: u8 = 0x47;

pub const PLAYLIST_EXT: &str = "m3u8";
pub const TRANSPORT_STREAM_EXT: &str = "ts";
pub const M4S_EXT: &str = "m4s";
pub const MP4_EXT: &str = "mp4";

// ---------------------------------------------------------------------------
// Classification
// ---------------------------------------------------------------------------

/// File classes recognized inside an uploaded archive, dispatched on
/// extension. `Other` is rejected and removed by the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileClass {
    Playlist,
    TransportStream,
    FragmentedMp4,
    Mp4,
    Other,
}

impl FileClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileClass::Playlist => "playlist",
            FileClass::TransportStream => "transport_stream",
            FileClass::FragmentedMp4 => "fmp4_segment",
            FileClass::Mp4 => "mp4",
            FileClass::Other => "other",
        }
    }
}

impl fmt::Display for FileClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Classify a file by its name's extension. A name without a dot has no
/// extension and is `Other`.
pub fn classify(filename: &str) -> FileClass {
    let Some((_, ext)) = filename.rsplit_once('.') else {
        return FileClass::Other;
    };
    if ext.eq_ignore_ascii_case(PLAYLIST_EXT) {
        FileClass::Playlist
    } else if ext.eq_ignore_ascii_case(TRANSPORT_STREAM_EXT) {
        FileClass::TransportStream
    } else if ext.eq_ignore_ascii_case(M4S_EXT) {
        FileClass::FragmentedMp4
    } else if ext.eq_ignore_ascii_case(MP4_EXT) {
        FileClass::Mp4
    } else {
        FileClass::Other
    }
}

// ---------------------------------------------------------------------------
// Validators
// ---------------------------------------------------------------------------

/// An HLS playlist must carry the `#EXTM3U` marker.
pub fn validate_playlist(content: &[u8]) -> bool {
    content
        .windows(PLAYLIST_HEADER.len())
        .any(|w| w == PLAYLIST_HEADER)
}

/// An MPEG-TS file must be non-empty and start with the sync byte.
pub fn validate_transport_stream(content: &[u8]) -> bool {
    !content.is_empty() && content[0] == TS_SYNC_BYTE
}

/// Structural defects of a fragmented MP4 segment.
///
/// These are advisory: the pipeline logs a warning and keeps the file.
#[derive(Debug, Error)]
pub enum FragmentedMp4Issue {
    #[error("cannot open segment: {0}")]
    Unreadable(#[from] std::io::Error),

    #[error("segment shorter than a box header")]
    Truncated,

    #[error("first box is {found:?}, expected \"ftyp\"")]
    MissingFtyp { found: [u8; 4] },

    #[error("segment lacks a \"moof\" box")]
    MissingMoof,

    #[error("segment lacks an \"mdat\" box")]
    MissingMdat,
}

/// Check an `.m4s` segment: a big-endian box size followed by `ftyp`, and
/// `moof` plus `mdat` somewhere in the body.
pub fn validate_fragmented_mp4(path: &Path) -> Result<(), FragmentedMp4Issue> {
    let mut file = File::open(path)?;

    let mut header = [0u8; 12];
    let mut filled = 0;
    while filled < header.len() {
        let n = file.read(&mut header[filled..])?;
        if n == 0 {
            return Err(FragmentedMp4Issue::Truncated);
        }
        filled += n;
    }

    // header[0..4] is the ftyp box size (big-endian); only its presence
    // matters here, the box type is the actual gate.
    let _box_size = u32::from_be_bytes([header[0], header[1], header[2], header[3]]);
    if &header[4..8] != b"ftyp" {
        let mut found = [0u8; 4];
        found.copy_from_slice(&header[4..8]);
        return Err(FragmentedMp4Issue::MissingFtyp { found });
    }

    let content = std::fs::read(path)?;
    if !contains(&content, b"moof") {
        return Err(FragmentedMp4Issue::MissingMoof);
    }
    if !contains(&content, b"mdat") {
        return Err(FragmentedMp4Issue::MissingMdat);
    }

    Ok(())
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|w| w == needle)
}
