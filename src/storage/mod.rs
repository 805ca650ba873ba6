pub mod layout;

pub use layout::StorageLayout;

/// Determine the download Content-Type from a filename.
pub fn content_type_for(filename: &str) -> &'static str {
    if filename.ends_with(".m3u8") {
        "application/vnd.apple.mpegurl"
    } else if filename.ends_with(".ts") {
        "video/mp2t"
    } else {
        "application/octet-stream"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_types_by_extension() {
        assert_eq!(content_type_for("index.m3u8"), "application/vnd.apple.mpegurl");
        assert_eq!(content_type_for("seg_0.ts"), "video/mp2t");
        assert_eq!(content_type_for("seg_0.m4s"), "application/octet-stream");
        assert_eq!(content_type_for("metadata.toml"), "application/octet-stream");
    }
}
