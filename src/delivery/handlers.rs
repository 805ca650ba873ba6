use tracing::{error, info, warn};

use crate::server::http::Response;
use crate::storage::{content_type_for, StorageLayout};

/// Request target for the publisher listing.
pub const LISTING_TARGET: &str = "/hls/clients";

// ---------------------------------------------------------------------------
// Listing
// ---------------------------------------------------------------------------

/// `GET /hls/clients` — flat text listing of every publisher and its audio
/// identifiers.
pub async fn handle_listing(layout: &StorageLayout) -> Response {
    let layout = layout.clone();
    let listing = match tokio::task::spawn_blocking(move || layout.list_publishers()).await {
        Ok(Ok(listing)) => listing,
        Ok(Err(e)) => {
            error!(error = %e, "listing failed");
            return Response::new(500);
        }
        Err(e) => {
            error!(error = %e, "listing task failed");
            return Response::new(500);
        }
    };

    if listing.is_empty() {
        warn!("no publishers in storage");
        return Response::new(404);
    }

    Response::new(200).with_body("text/plain", format_listing(&listing).into_bytes())
}

/// Render the listing body. A publisher with no audio directories is still
/// listed, with a placeholder line.
fn format_listing(publishers: &[(String, Vec<String>)]) -> String {
    let mut out = String::new();
    for (publisher, audio_ids) in publishers {
        out.push_str(publisher);
        out.push_str(":\n");
        if audio_ids.is_empty() {
            out.push_str("  (No audio IDs found)\n");
        } else {
            for audio_id in audio_ids {
                out.push_str("  - ");
                out.push_str(audio_id);
                out.push('\n');
            }
        }
    }
    out
}

// ---------------------------------------------------------------------------
// Download
// ---------------------------------------------------------------------------

/// `GET /hls/<publisher>/<audio_id>/<file>` — serve one stored file.
pub async fn handle_download(layout: &StorageLayout, target: &str) -> Response {
    let Some((publisher, audio_id, filename)) = parse_download_target(target) else {
        warn!(target, "malformed download path");
        return Response::new(400);
    };

    let path = layout.path_for(publisher, audio_id, filename);

    match tokio::fs::metadata(&path).await {
        Ok(meta) if meta.is_file() => {}
        _ => return Response::new(404),
    }

    match tokio::fs::read(&path).await {
        Ok(content) => {
            info!(publisher, audio_id, filename, bytes = content.len(), "file served");
            Response::new(200).with_body(content_type_for(filename), content)
        }
        // The subtree can vanish between the metadata check and the read.
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Response::new(404),
        Err(e) => {
            error!(path = %path.display(), error = %e, "failed to read stored file");
            Response::new(500)
        }
    }
}

/// Split `/hls/<publisher>/<audio_id>/<file>`; anything shorter, not rooted
/// at `hls`, or smelling of traversal is refused.
fn parse_download_target(target: &str) -> Option<(&str, &str, &str)> {
    let mut parts = target.split('/').filter(|s| !s.is_empty());
    if parts.next() != Some("hls") {
        return None;
    }
    let publisher = parts.next()?;
    let audio_id = parts.next()?;
    let filename = parts.next()?;

    for segment in [publisher, audio_id, filename] {
        if segment == "." || segment == ".." || segment.contains('\\') {
            return None;
        }
    }
    Some((publisher, audio_id, filename))
}
