// VodCast Path Validation Service
// File-type checks for the browser and streaming endpoints

use std::path::Path;

/// Extensions the file browser tags (and the player accepts) as video
pub const VIDEO_EXTENSIONS: &[&str] = &[
    "mp4", "avi", "mkv", "mov", "wmv", "flv", "webm", "mpeg", "mpg", "m4v", "ts",
];

/// Whether a file name looks like a playable video
pub fn is_video_file(name: &str) -> bool {
    Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| {
            let lower = e.to_ascii_lowercase();
            VIDEO_EXTENSIONS.iter().any(|v| *v == lower)
        })
        .unwrap_or(false)
}

/// Validate file extension is allowed.
///
/// # Arguments
/// * `path` - The path to check
/// * `allowed_extensions` - List of allowed extensions (without dot, e.g., "mp4")
pub fn validate_extension(path: &Path, allowed_extensions: &[&str]) -> Result<(), String> {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .ok_or_else(|| "File must have an extension".to_string())?;

    if !allowed_extensions.contains(&extension.as_str()) {
        return Err(format!(
            "Invalid file extension '{}'. Allowed: {}",
            extension,
            allowed_extensions.join(", ")
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_video_file() {
        assert!(is_video_file("movie.mp4"));
        assert!(is_video_file("capture.TS"));
        assert!(is_video_file("talk.webm"));
        assert!(!is_video_file("notes.txt"));
        assert!(!is_video_file("Makefile"));
    }

    #[test]
    fn test_validates_extension() {
        let path = Path::new("/some/file.mp4");
        assert!(validate_extension(path, VIDEO_EXTENSIONS).is_ok());

        let bad_path = Path::new("/some/file.exe");
        assert!(validate_extension(bad_path, VIDEO_EXTENSIONS).is_err());
    }
}
