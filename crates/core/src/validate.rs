//! Input validation and sanitization.
//!
//! Checks applied at the boundary before any pipeline or turn work:
//! file size and extension, URL shape and target, message length.
//! Limits come from configuration; the denylist is fixed.

use std::path::Path;

use crate::error::{IngestError, TurnError};

/// Maximum accepted URL length.
pub const MAX_URL_LEN: usize = 2048;

/// Maximum accepted user message length, in characters.
pub const MAX_MESSAGE_LEN: usize = 50_000;

/// Extensions that are never ingested. Code files are allowed — this is
/// an analysis tool — only executables and installers are blocked.
const BLOCKED_EXTENSIONS: &[&str] = &[
    "exe", "bat", "cmd", "com", "scr", "vbs", "msi", "dll",
];

/// Validate a local file's size against the configured maximum.
pub fn validate_file_size(size: u64, max: u64) -> std::result::Result<(), IngestError> {
    if size == 0 {
        return Err(IngestError::EmptyFile);
    }
    if size > max {
        return Err(IngestError::FileTooLarge { size, max });
    }
    Ok(())
}

/// Reject files with dangerous extensions.
pub fn validate_extension(file_name: &str) -> std::result::Result<(), IngestError> {
    let ext = Path::new(file_name)
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase());
    if let Some(ext) = ext {
        if BLOCKED_EXTENSIONS.contains(&ext.as_str()) {
            return Err(IngestError::BlockedExtension(format!(".{ext}")));
        }
    }
    Ok(())
}

/// Validate a URL is http(s), bounded in length, and does not target
/// loopback or private address space.
pub fn validate_url(url: &str) -> std::result::Result<String, IngestError> {
    let url = url.trim();
    if url.is_empty() {
        return Err(IngestError::InvalidUrl("URL must be non-empty".into()));
    }
    if url.len() > MAX_URL_LEN {
        return Err(IngestError::InvalidUrl(format!(
            "URL exceeds {MAX_URL_LEN} character limit"
        )));
    }

    let rest = if let Some(r) = url.strip_prefix("https://") {
        r
    } else if let Some(r) = url.strip_prefix("http://") {
        r
    } else {
        return Err(IngestError::InvalidUrl(
            "URL scheme must be http or https".into(),
        ));
    };

    let host = rest
        .split(['/', '?', '#'])
        .next()
        .unwrap_or("")
        .split('@')
        .next_back()
        .unwrap_or("")
        .split(':')
        .next()
        .unwrap_or("")
        .to_lowercase();

    if host.is_empty() {
        return Err(IngestError::InvalidUrl("URL has no host".into()));
    }

    // SSRF guard: no loopback or private address space.
    const PRIVATE_PREFIXES: &[&str] = &["localhost", "127.", "10.", "172.16.", "192.168.", "169.254."];
    if PRIVATE_PREFIXES.iter().any(|p| host.starts_with(p)) {
        return Err(IngestError::InvalidUrl(
            "Cannot access local or private addresses".into(),
        ));
    }

    Ok(url.to_string())
}

/// Validate and sanitize a user message: non-empty, bounded length,
/// NUL bytes stripped.
pub fn validate_message(message: &str) -> std::result::Result<String, TurnError> {
    let message = message.trim();
    if message.is_empty() {
        return Err(TurnError::EmptyMessage);
    }
    let len = message.chars().count();
    if len > MAX_MESSAGE_LEN {
        return Err(TurnError::MessageTooLong { len, max: MAX_MESSAGE_LEN });
    }
    Ok(message.replace('\0', ""))
}

/// Strip path components and NUL bytes from a filename, bounding its
/// length to 255 characters.
pub fn sanitize_filename(filename: &str) -> String {
    let base = filename
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(filename)
        .replace("..", "")
        .replace('\0', "");
    if base.len() > 255 {
        match base.rfind('.') {
            Some(dot) if base.len() - dot <= 10 => {
                let (name, ext) = base.split_at(dot);
                let mut cut = 255 - ext.len();
                while !name.is_char_boundary(cut) {
                    cut -= 1;
                }
                format!("{}{}", &name[..cut], ext)
            }
            _ => {
                let mut cut = 255;
                while !base.is_char_boundary(cut) {
                    cut -= 1;
                }
                base[..cut].to_string()
            }
        }
    } else {
        base
    }
}
