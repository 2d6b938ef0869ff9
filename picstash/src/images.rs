//! Naming and addressing rules for stored images.

use chrono::{DateTime, Utc};

/// Timestamp prefix of every blob key, second resolution.
pub const KEY_TIMESTAMP_FORMAT: &str = "%Y%m%dT%H%M%S";

/// Derive the blob key for an upload: `{timestamp}-{filename}` with spaces turned into underscores.
///
/// Two uploads of the same filename within one second map to the same key; the later one wins.
/// The filename is normalised first (see [`normalise_filename`]) so the returned key is exactly
/// the name the blob is stored and listed under.
pub fn blob_key(now: DateTime<Utc>, filename: &str) -> String {
    format!("{}-{}", now.format(KEY_TIMESTAMP_FORMAT), normalise_filename(filename))
}

/// Spaces become underscores, control characters are dropped and `.`/`..` path segments after
/// the first are removed.
///
/// Storage clients resolve dot segments out of request paths and Azure cannot return control
/// characters in a plain XML listing, so neither may survive into a key.
pub fn normalise_filename(filename: &str) -> String {
    let cleaned: String = filename
        .chars()
        .filter(|c| !c.is_control())
        .map(|c| if c == ' ' { '_' } else { c })
        .collect();

    // The first segment is prefixed with the timestamp, so it can never be a dot segment
    cleaned
        .split('/')
        .enumerate()
        .filter(|(i, segment)| *i == 0 || !matches!(*segment, "." | ".."))
        .map(|(_, segment)| segment)
        .collect::<Vec<_>>()
        .join("/")
}

/// Public URL of a blob. Plain concatenation, the key is not re-encoded.
pub fn blob_url(base: &str, container: &str, key: &str) -> String {
    format!("{}/{}/{}", base.trim_end_matches('/'), container, key)
}

/// Whether a declared content type is accepted for upload.
pub fn is_image(content_type: Option<&str>) -> bool {
    content_type.is_some_and(|ct| ct.starts_with("image/"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDateTime, TimeZone};

    #[test]
    fn test_blob_key_format() {
        let now = Utc.with_ymd_and_hms(2024, 7, 4, 9, 5, 3).unwrap();
        assert_eq!(blob_key(now, "a b.png"), "20240704T090503-a_b.png");
    }

    #[test]
    fn test_blob_key_replaces_every_space() {
        let key = blob_key(Utc::now(), "my  holiday pic.jpeg");
        let (stamp, name) = key.split_once('-').unwrap();

        assert_eq!(name, "my__holiday_pic.jpeg");
        assert!(NaiveDateTime::parse_from_str(stamp, KEY_TIMESTAMP_FORMAT).is_ok());
    }

    #[test]
    fn test_blob_key_keeps_other_characters() {
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(blob_key(now, "dir/ünï-cödé.gif"), "20240101T000000-dir/ünï-cödé.gif");
    }

    #[test]
    fn test_blob_key_drops_dot_segments() {
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(blob_key(now, "a/../b.png"), "20240101T000000-a/b.png");
        assert_eq!(blob_key(now, "x/./y/../z.png"), "20240101T000000-x/y/z.png");
        // A leading dot segment is glued to the timestamp and stays
        assert_eq!(blob_key(now, "../up.png"), "20240101T000000-../up.png");
    }

    #[test]
    fn test_blob_key_strips_control_characters() {
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(blob_key(now, "line\r\nbreak\u{7}.png"), "20240101T000000-linebreak.png");
    }

    #[test]
    fn test_blob_url() {
        assert_eq!(
            blob_url("https://acct.blob.core.windows.net", "images", "k.png"),
            "https://acct.blob.core.windows.net/images/k.png"
        );
        assert_eq!(
            blob_url("https://acct.blob.core.windows.net/", "images", "k.png"),
            "https://acct.blob.core.windows.net/images/k.png"
        );
    }

    #[test]
    fn test_is_image() {
        assert!(is_image(Some("image/png")));
        assert!(is_image(Some("image/svg+xml")));
        assert!(!is_image(Some("text/plain")));
        assert!(!is_image(Some("application/image")));
        assert!(!is_image(None));
    }
}
