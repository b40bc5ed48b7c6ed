/// Listing-media key derivation
///
/// Raw uploads land under `{listing_id}/raw/{segment}/{reference}-{filename}`
/// and processed renditions under
/// `{listing_id}/{processed|thumb}/{segment}/{resolution}/{filename}`.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use super::StorageError;

/// Maximum length of a sanitized filename, extension included
pub const MAX_FILENAME_LEN: usize = 96;

/// Longest client extension preserved when a name is shortened
const MAX_KEPT_EXTENSION_LEN: usize = 16;

/// Maximum length of a key reference segment
pub const MAX_REFERENCE_LEN: usize = 48;

/// Asset kinds stored in the listing-media bucket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MediaAssetType {
    PhotoVertical,
    PhotoHorizontal,
    VideoVertical,
    VideoHorizontal,
    Thumbnail,
    Zip,
    ProjectDoc,
    ProjectRender,
    /// Anything else; stored under `misc`
    #[serde(other)]
    Other,
}

impl MediaAssetType {
    /// Path segment for the media type
    pub fn segment(self) -> &'static str {
        match self {
            MediaAssetType::PhotoVertical => "photo/vertical",
            MediaAssetType::PhotoHorizontal => "photo/horizontal",
            MediaAssetType::VideoVertical => "video/vertical",
            MediaAssetType::VideoHorizontal => "video/horizontal",
            MediaAssetType::ProjectDoc => "project/doc",
            MediaAssetType::ProjectRender => "project/render",
            MediaAssetType::Thumbnail => "thumb",
            MediaAssetType::Zip => "zip",
            MediaAssetType::Other => "misc",
        }
    }

    fn orientation_prefix(self) -> &'static str {
        match self {
            MediaAssetType::PhotoVertical | MediaAssetType::VideoVertical => "vertical",
            MediaAssetType::PhotoHorizontal | MediaAssetType::VideoHorizontal => "horizontal",
            _ => "seq",
        }
    }
}

impl fmt::Display for MediaAssetType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.segment())
    }
}

/// Listing asset as seen by the storage layer
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListingAsset {
    pub asset_type: Option<MediaAssetType>,
    /// 1-based position within the listing gallery; 0 when unknown
    #[serde(default)]
    pub sequence: u32,
    /// Client-side identifier, preferred as key reference
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub filename: Option<String>,
    #[serde(default)]
    pub content_type: Option<String>,
    #[serde(default)]
    pub raw_key: Option<String>,
    /// Key assigned by the processing pipeline
    #[serde(default)]
    pub processed_key: Option<String>,
}

impl ListingAsset {
    pub fn kind(&self) -> MediaAssetType {
        self.asset_type.unwrap_or(MediaAssetType::Other)
    }
}

/// Key for a raw upload
///
/// # Example
///
/// ```
/// use toq_shared::storage::listing::{raw_object_key, ListingAsset, MediaAssetType};
///
/// let asset = ListingAsset {
///     asset_type: Some(MediaAssetType::PhotoVertical),
///     sequence: 3,
///     filename: Some("IMG 01.jpeg".into()),
///     content_type: Some("image/jpeg".into()),
///     ..Default::default()
/// };
/// assert_eq!(raw_object_key(42, &asset), "42/raw/photo/vertical/vertical-03-IMG-01.jpeg");
/// ```
pub fn raw_object_key(listing_id: i64, asset: &ListingAsset) -> String {
    build_key(listing_id, "raw", asset)
}

fn build_key(listing_id: i64, stage: &str, asset: &ListingAsset) -> String {
    let filename = sanitize_filename(
        asset.filename.as_deref().unwrap_or("file"),
        asset.content_type.as_deref(),
    );
    format!(
        "{}/{}/{}/{}-{}",
        listing_id,
        stage,
        asset.kind().segment(),
        asset_reference(asset),
        filename
    )
}

/// Key of a processed rendition
///
/// Zip archives keep the key assigned by the pipeline. Thumbnails live under
/// the `thumb` stage, everything else under `processed`.
pub fn processed_object_key(listing_id: i64, asset: &ListingAsset, resolution: Option<&str>) -> String {
    let kind = asset.kind();
    if kind == MediaAssetType::Zip {
        if let Some(key) = asset.processed_key.as_deref().filter(|k| !k.trim().is_empty()) {
            return key.to_string();
        }
        return build_key(listing_id, "processed", asset);
    }

    let stage = if kind == MediaAssetType::Thumbnail {
        "thumb"
    } else {
        "processed"
    };
    let resolution = resolution
        .map(str::trim)
        .filter(|r| !r.is_empty())
        .unwrap_or("original");

    format!(
        "{}/{}/{}/{}/{}",
        listing_id,
        stage,
        kind.segment(),
        resolution,
        existing_filename(listing_id, asset)
    )
}

fn existing_filename(listing_id: i64, asset: &ListingAsset) -> String {
    let from_key = |key: &Option<String>| {
        key.as_deref()
            .and_then(|k| k.rsplit('/').next())
            .filter(|f| !f.is_empty())
            .map(str::to_string)
    };

    from_key(&asset.processed_key)
        .or_else(|| from_key(&asset.raw_key))
        .or_else(|| {
            asset
                .filename
                .as_deref()
                .filter(|f| !f.trim().is_empty())
                .map(|f| sanitize_filename(f, asset.content_type.as_deref()))
        })
        .unwrap_or_else(|| format!("asset-{}-{}.bin", listing_id, asset.sequence))
}

/// Key reference: client id, then orientation and sequence, then a fresh id
pub fn asset_reference(asset: &ListingAsset) -> String {
    let candidate = match asset.client_id.as_deref().map(str::trim) {
        Some(id) if !id.is_empty() => id.to_string(),
        _ if asset.sequence > 0 => {
            format!("{}-{:02}", asset.kind().orientation_prefix(), asset.sequence)
        }
        _ => format!("asset-{}", Uuid::new_v4()),
    };

    let sanitized = sanitize_segment(&candidate);
    if sanitized.is_empty() {
        Uuid::new_v4().to_string()
    } else {
        sanitized
    }
}

/// Collapses runs of characters outside `keep` into one `-`
fn collapse(input: &str, keep: impl Fn(char) -> bool) -> String {
    let mut out = String::with_capacity(input.len());
    let mut in_run = false;
    for c in input.chars() {
        if keep(c) {
            out.push(c);
            in_run = false;
        } else if !in_run {
            out.push('-');
            in_run = true;
        }
    }
    out
}

fn sanitize_segment(input: &str) -> String {
    let collapsed = collapse(input, |c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    let trimmed = collapsed.trim_matches(|c| c == '-' || c == '_');
    trimmed.chars().take(MAX_REFERENCE_LEN).collect()
}

/// Extensions accepted for a content type; the first one is canonical
fn extensions_for(content_type: &str) -> &'static [&'static str] {
    match content_type.trim().to_ascii_lowercase().as_str() {
        "image/jpeg" | "image/jpg" => &[".jpg", ".jpeg"],
        "image/png" => &[".png"],
        "image/heic" => &[".heic", ".heif"],
        "video/mp4" => &[".mp4"],
        "video/quicktime" => &[".mov", ".qt"],
        "application/pdf" => &[".pdf"],
        _ => &[],
    }
}

fn extension_of(name: &str) -> Option<&str> {
    let dot = name.rfind('.')?;
    if dot == 0 || dot + 1 == name.len() {
        return None;
    }
    Some(&name[dot..])
}

/// Sanitizes a client filename for use in an object key
///
/// Only `[A-Za-z0-9._-]` survive (runs of anything else become one `-`),
/// leading/trailing `-` and `.` are trimmed, the extension is forced to
/// match the content type and the result is capped at
/// [`MAX_FILENAME_LEN`] characters. A client extension longer than
/// 16 characters is not preserved when the name is shortened.
pub fn sanitize_filename(name: &str, content_type: Option<&str>) -> String {
    let trimmed = name.trim();
    let mut sanitized = if trimmed.is_empty() {
        String::new()
    } else {
        collapse(trimmed, |c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
            .trim_matches(|c| c == '-' || c == '.')
            .to_string()
    };
    if sanitized.is_empty() {
        sanitized = format!("asset-{}", Uuid::new_v4());
    }

    let allowed = content_type.map(extensions_for).unwrap_or(&[]);
    let current = extension_of(&sanitized).map(str::to_ascii_lowercase);

    let ext = match (&current, allowed.first()) {
        (Some(cur), Some(_)) if allowed.contains(&cur.as_str()) => String::new(),
        (_, Some(canonical)) => canonical.to_string(),
        (Some(_), None) => String::new(),
        (None, None) => ".bin".to_string(),
    };

    let max_base = MAX_FILENAME_LEN.saturating_sub(ext.len());
    if sanitized.len() > max_base {
        if ext.is_empty() {
            let keep = extension_of(&sanitized)
                .map(str::len)
                .filter(|len| *len <= MAX_KEPT_EXTENSION_LEN)
                .unwrap_or(0);
            let tail = sanitized[sanitized.len() - keep..].to_string();
            sanitized.truncate(MAX_FILENAME_LEN - keep);
            trim_end(&mut sanitized);
            sanitized.push_str(&tail);
            return sanitized;
        }
        sanitized.truncate(max_base);
        trim_end(&mut sanitized);
    }
    sanitized.push_str(&ext);
    sanitized
}

/// Drops trailing `-` and `.` left by truncation; names are ASCII here
fn trim_end(name: &mut String) {
    let len = name.trim_end_matches(|c| c == '-' || c == '.').len();
    name.truncate(len);
}

/// Validates a listing id supplied by a caller
pub(crate) fn check_listing_id(listing_id: i64) -> Result<(), StorageError> {
    if listing_id <= 0 {
        return Err(StorageError::InvalidInput {
            field: "listing_id".to_string(),
            message: "listing id must be positive".to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn photo(seq: u32, name: &str) -> ListingAsset {
        ListingAsset {
            asset_type: Some(MediaAssetType::PhotoVertical),
            sequence: seq,
            filename: Some(name.to_string()),
            content_type: Some("image/jpeg".to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_raw_key_from_sequence() {
        assert_eq!(
            raw_object_key(42, &photo(3, "IMG 01.jpeg")),
            "42/raw/photo/vertical/vertical-03-IMG-01.jpeg"
        );
    }

    #[test]
    fn test_client_id_wins() {
        let mut asset = photo(3, "a.jpg");
        asset.client_id = Some(" front door! ".to_string());
        assert_eq!(raw_object_key(7, &asset), "7/raw/photo/vertical/front-door-a.jpg");
    }

    #[test]
    fn test_reference_without_metadata_is_generated() {
        let asset = ListingAsset::default();
        let reference = asset_reference(&asset);
        assert!(reference.starts_with("asset-"));
        assert!(reference.len() <= MAX_REFERENCE_LEN);
    }

    #[test]
    fn test_sanitize_filename_forces_extension() {
        assert_eq!(sanitize_filename("plan", Some("application/pdf")), "plan.pdf");
        assert_eq!(sanitize_filename("clip.avi", Some("video/mp4")), "clip.avi.mp4");
        assert_eq!(sanitize_filename("..weird name..", Some("image/png")), "weird-name.png");
        assert_eq!(sanitize_filename("noext", None), "noext.bin");
    }

    #[test]
    fn test_sanitize_filename_properties() {
        let long = format!("{}.heic", "x y".repeat(80));
        for (name, ct) in [
            (long.as_str(), Some("image/heic")),
            ("", Some("image/jpeg")),
            ("ção ñ.png", Some("image/png")),
            ("../../etc/passwd", Some("application/pdf")),
        ] {
            let out = sanitize_filename(name, ct);
            assert!(out.len() <= MAX_FILENAME_LEN, "{}", out);
            assert!(out
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-')));
            let ext = extension_of(&out).unwrap().to_ascii_lowercase();
            assert!(extensions_for(ct.unwrap()).contains(&ext.as_str()), "{}", out);
        }
    }

    #[test]
    fn test_sanitize_filename_caps_long_unknown_extensions() {
        let long_ext = format!("a.{}", "x".repeat(200));
        let repeated = format!("photo.{}", "gif".repeat(50));
        let long_base = format!("{}.webp", "b".repeat(150));
        for (name, ct) in [
            (long_ext.as_str(), None),
            (repeated.as_str(), Some("image/gif")),
            (long_base.as_str(), None),
        ] {
            let out = sanitize_filename(name, ct);
            assert!(out.len() <= MAX_FILENAME_LEN, "{} chars: {}", out.len(), out);
            assert!(!out.ends_with('.') && !out.ends_with('-'), "{}", out);
        }

        // a short extension survives shortening
        assert!(sanitize_filename(&long_base, None).ends_with(".webp"));
    }

    #[test]
    fn test_processed_key_layout() {
        let mut asset = photo(1, "IMG.jpg");
        asset.raw_key = Some("9/raw/photo/vertical/vertical-01-IMG.jpg".to_string());
        assert_eq!(
            processed_object_key(9, &asset, Some("1080")),
            "9/processed/photo/vertical/1080/vertical-01-IMG.jpg"
        );

        asset.asset_type = Some(MediaAssetType::Thumbnail);
        assert_eq!(
            processed_object_key(9, &asset, None),
            "9/thumb/thumb/original/vertical-01-IMG.jpg"
        );
    }

    #[test]
    fn test_zip_keeps_server_key() {
        let asset = ListingAsset {
            asset_type: Some(MediaAssetType::Zip),
            processed_key: Some("9/zip/bundle-2024.zip".to_string()),
            ..Default::default()
        };
        assert_eq!(processed_object_key(9, &asset, Some("1080")), "9/zip/bundle-2024.zip");
    }

    #[test]
    fn test_unknown_type_deserializes_to_misc() {
        let t: MediaAssetType = serde_json::from_str("\"HOLOGRAM\"").unwrap();
        assert_eq!(t.segment(), "misc");
    }
}
