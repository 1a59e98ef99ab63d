//! Extension-based type detection.
//!
//! Maps a file name to the MIME type sent to the backend and the media
//! category shown on the shelf. Unknown extensions fall back to
//! `application/octet-stream` / document.

use docshelf_core::MediaCategory;
use std::path::Path;

/// Well-known MIME constants used across the converter set.
pub const MIME_PDF: &str = "application/pdf";
pub const MIME_DOCX: &str =
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document";
pub const MIME_PPTX: &str =
    "application/vnd.openxmlformats-officedocument.presentationml.presentation";
pub const MIME_XLSX: &str = "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";
pub const MIME_ODS: &str = "application/vnd.oasis.opendocument.spreadsheet";
pub const MIME_ODP: &str = "application/vnd.oasis.opendocument.presentation";
pub const MIME_ODT: &str = "application/vnd.oasis.opendocument.text";
pub const MIME_CSV: &str = "text/csv";
pub const MIME_TEXT: &str = "text/plain";
pub const MIME_BINARY: &str = "application/octet-stream";

/// Detected type information for a file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Detected {
    pub mime_type: String,
    pub category: MediaCategory,
}

/// Detect MIME type and media category from a file name.
pub fn detect(file_name: &str) -> Detected {
    let ext = Path::new(file_name)
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default();

    let (mime, category) = match ext.as_str() {
        // Documents
        "pdf" => (MIME_PDF, MediaCategory::Document),
        "txt" => (MIME_TEXT, MediaCategory::Document),
        "md" => ("text/markdown", MediaCategory::Document),
        "rtf" => ("application/rtf", MediaCategory::Document),
        "html" | "htm" => ("text/html", MediaCategory::Document),
        "docx" => (MIME_DOCX, MediaCategory::Document),
        "odt" => (MIME_ODT, MediaCategory::Document),
        // Spreadsheets
        "csv" => (MIME_CSV, MediaCategory::Spreadsheet),
        "xlsx" => (MIME_XLSX, MediaCategory::Spreadsheet),
        "ods" => (MIME_ODS, MediaCategory::Spreadsheet),
        // Presentations
        "pptx" => (MIME_PPTX, MediaCategory::Presentation),
        "odp" => (MIME_ODP, MediaCategory::Presentation),
        // Images
        "jpg" | "jpeg" => ("image/jpeg", MediaCategory::Image),
        "png" => ("image/png", MediaCategory::Image),
        "gif" => ("image/gif", MediaCategory::Image),
        "webp" => ("image/webp", MediaCategory::Image),
        "heic" => ("image/heic", MediaCategory::Image),
        "heif" => ("image/heif", MediaCategory::Image),
        "svg" => ("image/svg+xml", MediaCategory::Image),
        // Video
        "mp4" => ("video/mp4", MediaCategory::Video),
        "mov" => ("video/quicktime", MediaCategory::Video),
        "avi" => ("video/x-msvideo", MediaCategory::Video),
        "mpeg" | "mpg" => ("video/mpeg", MediaCategory::Video),
        "flv" => ("video/x-flv", MediaCategory::Video),
        "webm" => ("video/webm", MediaCategory::Video),
        "wmv" => ("video/wmv", MediaCategory::Video),
        "3gp" => ("video/3gpp", MediaCategory::Video),
        // Audio
        "mp3" => ("audio/mpeg", MediaCategory::Audio),
        "wav" => ("audio/wav", MediaCategory::Audio),
        "aiff" | "aif" => ("audio/aiff", MediaCategory::Audio),
        "aac" => ("audio/aac", MediaCategory::Audio),
        "ogg" => ("audio/ogg", MediaCategory::Audio),
        "flac" => ("audio/flac", MediaCategory::Audio),
        // Structured data
        "json" => ("application/json", MediaCategory::Config),
        "xml" => ("application/xml", MediaCategory::Config),
        // Config files upload as plain text
        "yaml" | "yml" | "toml" | "ini" | "cfg" | "conf" => (MIME_TEXT, MediaCategory::Config),
        // Source code uploads as plain text
        "py" | "js" | "ts" | "jsx" | "tsx" | "java" | "c" | "cpp" | "h" | "hpp" | "cs" | "go"
        | "rs" | "swift" | "kt" | "scala" | "rb" | "php" | "sh" | "bash" | "sql" | "r" | "jl"
        | "ipynb" => (MIME_TEXT, MediaCategory::Code),
        _ => (MIME_BINARY, MediaCategory::Document),
    };

    Detected {
        mime_type: mime.to_string(),
        category,
    }
}

/// Category for an already-known MIME type (used for downloaded URLs
/// where the server's Content-Type is authoritative).
pub fn category_for_mime(mime_type: &str) -> MediaCategory {
    if mime_type.starts_with("image/") {
        MediaCategory::Image
    } else if mime_type.starts_with("video/") {
        MediaCategory::Video
    } else if mime_type.starts_with("audio/") {
        MediaCategory::Audio
    } else if mime_type == MIME_CSV || mime_type == MIME_XLSX || mime_type == MIME_ODS {
        MediaCategory::Spreadsheet
    } else if mime_type == MIME_PPTX || mime_type == MIME_ODP {
        MediaCategory::Presentation
    } else {
        MediaCategory::Document
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_office_formats() {
        assert_eq!(detect("report.xlsx").mime_type, MIME_XLSX);
        assert_eq!(detect("report.xlsx").category, MediaCategory::Spreadsheet);
        assert_eq!(detect("deck.PPTX").mime_type, MIME_PPTX);
        assert_eq!(detect("notes.odt").mime_type, MIME_ODT);
    }

    #[test]
    fn code_files_are_plain_text() {
        let d = detect("main.rs");
        assert_eq!(d.mime_type, MIME_TEXT);
        assert_eq!(d.category, MediaCategory::Code);
    }

    #[test]
    fn unknown_extension_is_binary_document() {
        let d = detect("blob.xyz123");
        assert_eq!(d.mime_type, MIME_BINARY);
        assert_eq!(d.category, MediaCategory::Document);
    }

    #[test]
    fn no_extension_is_binary() {
        assert_eq!(detect("README").mime_type, MIME_BINARY);
    }

    #[test]
    fn mime_category_mapping() {
        assert_eq!(category_for_mime("image/png"), MediaCategory::Image);
        assert_eq!(category_for_mime("video/mp4"), MediaCategory::Video);
        assert_eq!(category_for_mime(MIME_CSV), MediaCategory::Spreadsheet);
        assert_eq!(category_for_mime(MIME_PDF), MediaCategory::Document);
    }
}
