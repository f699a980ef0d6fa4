use std::fs;

use thiserror::Error;
use tracing::{info, warn};
use unicode_normalization::UnicodeNormalization;

use super::StorageLayout;

pub const ALLOWED_EXTENSIONS: [&str; 4] = ["png", "jpg", "jpeg", "gif"];

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("No selected file")]
    EmptyFilename,
    #[error("File type not allowed")]
    DisallowedType,
    #[error("Failed to save file")]
    Save(#[source] std::io::Error),
}

/// Reduces an uploaded name to a flat, shell-safe basename.
///
/// Accented letters are decomposed and reduced to their ASCII base. Path
/// separators become spaces before splitting so `../../x.png` cannot climb
/// out of the upload directory. Returns an empty string when nothing usable
/// survives.
pub fn secure_filename(raw: &str) -> String {
    let ascii = raw.nfkd().filter(char::is_ascii).collect::<String>();
    let flattened = ascii.replace(['/', '\\'], " ");
    let joined = flattened.split_whitespace().collect::<Vec<_>>().join("_");
    let mut out = String::with_capacity(joined.len());
    for ch in joined.chars() {
        if ch.is_ascii_alphanumeric() || matches!(ch, '.' | '_' | '-') {
            out.push(ch);
        }
    }
    out.trim_matches(['.', '_']).to_string()
}

pub fn allowed_file(filename: &str) -> bool {
    let Some((_, ext)) = filename.rsplit_once('.') else {
        return false;
    };
    let ext = ext.to_ascii_lowercase();
    ALLOWED_EXTENSIONS.contains(&ext.as_str())
}

/// Returns the name only when it is already in sanitized form.
pub fn validate_stored_filename(filename: &str) -> Option<&str> {
    let trimmed = filename.trim();
    if trimmed.is_empty() || secure_filename(trimmed) != trimmed {
        return None;
    }
    Some(trimmed)
}

/// Sanitizes `raw_name`, checks the extension allow-list, and writes `bytes`
/// into the upload directory. Returns the stored filename.
pub fn save_upload(
    layout: &StorageLayout,
    raw_name: &str,
    bytes: &[u8],
) -> Result<String, UploadError> {
    if raw_name.trim().is_empty() {
        return Err(UploadError::EmptyFilename);
    }
    if !allowed_file(raw_name) {
        return Err(UploadError::DisallowedType);
    }
    let filename = secure_filename(raw_name);
    if filename.is_empty() || !allowed_file(filename.as_str()) {
        return Err(UploadError::DisallowedType);
    }

    fs::create_dir_all(layout.upload_dir.as_path()).map_err(UploadError::Save)?;
    let path = layout.upload_path(filename.as_str());
    if let Err(error) = fs::write(path.as_path(), bytes) {
        warn!(path = %path.display(), %error, "failed to save upload");
        return Err(UploadError::Save(error));
    }
    info!(path = %path.display(), bytes = bytes.len(), "saved upload");
    Ok(filename)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_layout() -> StorageLayout {
        let stamp = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .expect("time should be monotonic")
            .as_nanos();
        let root = std::env::temp_dir().join(format!("hdr_upload_{stamp}"));
        StorageLayout::new(root.join("up"), root.join("out"), root.join("assets"))
    }

    #[test]
    fn secure_filename_flattens_paths_and_strips_unsafe_chars() {
        assert_eq!(secure_filename("My cat.png"), "My_cat.png");
        assert_eq!(secure_filename("../../etc/passwd"), "etc_passwd");
        assert_eq!(secure_filename("a\"b;$(rm).jpg"), "abrm.jpg");
        assert_eq!(secure_filename("..."), "");
        assert_eq!(secure_filename(".hidden.gif"), "hidden.gif");
    }

    #[test]
    fn secure_filename_strips_edge_underscores_and_transliterates() {
        assert_eq!(secure_filename("__cat.png__"), "cat.png");
        assert_eq!(secure_filename("_ cat .png_"), "cat_.png");
        assert_eq!(secure_filename("café crème.jpg"), "cafe_creme.jpg");
        assert_eq!(secure_filename("日本.png"), "png");
    }

    #[test]
    fn allowed_file_checks_extension_case_insensitively() {
        assert!(allowed_file("x.PNG"));
        assert!(allowed_file("x.jpeg"));
        assert!(!allowed_file("x.tiff"));
        assert!(!allowed_file("png"));
    }

    #[test]
    fn validate_stored_filename_rejects_unsanitized_names() {
        assert_eq!(validate_stored_filename("cat.png"), Some("cat.png"));
        assert_eq!(validate_stored_filename("../cat.png"), None);
        assert_eq!(validate_stored_filename(""), None);
    }

    #[test]
    fn save_upload_writes_sanitized_file() {
        let layout = temp_layout();
        let stored = save_upload(&layout, "hello world.png", b"bytes").expect("save should work");
        assert_eq!(stored, "hello_world.png");
        let written = fs::read(layout.upload_path(stored.as_str())).expect("file should exist");
        assert_eq!(written, b"bytes");
    }

    #[test]
    fn save_upload_rejects_empty_and_disallowed_names() {
        let layout = temp_layout();
        assert!(matches!(
            save_upload(&layout, "  ", b"x"),
            Err(UploadError::EmptyFilename)
        ));
        assert!(matches!(
            save_upload(&layout, "notes.txt", b"x"),
            Err(UploadError::DisallowedType)
        ));
        assert!(!layout.upload_path("notes.txt").exists());
    }
}
