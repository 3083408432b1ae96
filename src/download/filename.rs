//! Deterministic destination paths for download URLs.
//!
//! Resume depends on a URL always mapping to the same file, so unlike a
//! "find a free name" strategy there is no numeric suffixing here.

use std::path::{Component, Path, PathBuf};

use tracing::debug;
use url::Url;

use super::DownloadError;

/// Derives the destination path for `url` under `save_dir`.
///
/// The filename is the final URL path segment, percent-decoded and sanitized.
///
/// # Errors
///
/// Returns [`DownloadError::InvalidUrl`] if the URL does not parse or has no
/// usable final path segment (for example `https://host/dir/`).
pub fn destination_for(url: &str, save_dir: &Path) -> Result<PathBuf, DownloadError> {
    let parsed = Url::parse(url).map_err(|_| DownloadError::invalid_url(url))?;
    let filename = filename_from_url(&parsed).ok_or_else(|| DownloadError::invalid_url(url))?;
    Ok(save_dir.join(filename))
}

/// Final path segment of `url`, decoded and made safe for the filesystem.
pub(crate) fn filename_from_url(url: &Url) -> Option<String> {
    let last = url.path_segments()?.next_back()?;
    if last.is_empty() {
        return None;
    }

    let decoded = urlencoding::decode(last).unwrap_or_else(|e| {
        debug!(
            segment = %last,
            error = %e,
            "URL decoding failed, using raw segment"
        );
        last.into()
    });

    let sanitized = sanitize_filename(&decoded);
    if sanitized.trim_matches('_').is_empty() {
        return None;
    }
    Some(sanitized)
}

/// Sanitizes filename for filesystem safety.
///
/// Replaces characters that are invalid on common filesystems:
/// / \ : * ? " < > |
pub(crate) fn sanitize_filename(name: &str) -> String {
    let sanitized: String = name
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();

    if sanitized.is_empty() {
        return "_".to_string();
    }

    if is_safe_filename_segment(&sanitized) {
        sanitized
    } else {
        sanitized
            .chars()
            .map(|c| if c == '.' { '_' } else { c })
            .collect()
    }
}

fn is_safe_filename_segment(name: &str) -> bool {
    !Path::new(name).components().any(|component| {
        matches!(
            component,
            Component::CurDir | Component::ParentDir | Component::RootDir | Component::Prefix(_)
        )
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_destination_uses_final_segment() {
        let dest = destination_for(
            "https://data.example.org/archive/2024/GRANULE_A.h5",
            Path::new("/tmp/out"),
        )
        .unwrap();
        assert_eq!(dest, PathBuf::from("/tmp/out/GRANULE_A.h5"));
    }

    #[test]
    fn test_destination_ignores_query_string() {
        let dest = destination_for(
            "https://data.example.org/file.nc?token=abc",
            Path::new("out"),
        )
        .unwrap();
        assert_eq!(dest, PathBuf::from("out/file.nc"));
    }

    #[test]
    fn test_destination_decodes_percent_encoding() {
        let dest =
            destination_for("https://data.example.org/my%20file.txt", Path::new("out")).unwrap();
        assert_eq!(dest, PathBuf::from("out/my file.txt"));
    }

    #[test]
    fn test_destination_is_deterministic() {
        let url = "https://data.example.org/a/b/c.zip";
        let first = destination_for(url, Path::new("dl")).unwrap();
        let second = destination_for(url, Path::new("dl")).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_destination_rejects_directory_url() {
        let result = destination_for("https://data.example.org/dir/", Path::new("out"));
        assert!(matches!(result, Err(DownloadError::InvalidUrl { .. })));
    }

    #[test]
    fn test_destination_rejects_unparseable_url() {
        let result = destination_for("not a url", Path::new("out"));
        assert!(matches!(result, Err(DownloadError::InvalidUrl { .. })));
    }

    #[test]
    fn test_destination_rejects_encoded_traversal() {
        let result = destination_for("https://data.example.org/%2E%2E", Path::new("out"));
        assert!(matches!(result, Err(DownloadError::InvalidUrl { .. })));
    }

    #[test]
    fn test_destination_encoded_separator_is_replaced() {
        let dest =
            destination_for("https://data.example.org/a%2Fb.txt", Path::new("out")).unwrap();
        assert_eq!(dest, PathBuf::from("out/a_b.txt"));
    }

    #[test]
    fn test_sanitize_filename_removes_invalid_chars() {
        assert_eq!(sanitize_filename("file\\name.pdf"), "file_name.pdf");
        assert_eq!(sanitize_filename("file:name.pdf"), "file_name.pdf");
        assert_eq!(sanitize_filename("file<name>.pdf"), "file_name_.pdf");
        assert_eq!(sanitize_filename("file|name.pdf"), "file_name.pdf");
    }

    #[test]
    fn test_sanitize_filename_rewrites_dot_segments() {
        assert_eq!(sanitize_filename("."), "_");
        assert_eq!(sanitize_filename(".."), "__");
    }

    #[test]
    fn test_sanitize_filename_preserves_valid_chars() {
        assert_eq!(
            sanitize_filename("MOD09GA.A2024001.h10v05.061.hdf"),
            "MOD09GA.A2024001.h10v05.061.hdf"
        );
        assert_eq!(sanitize_filename("日本語.nc"), "日本語.nc");
    }
}
