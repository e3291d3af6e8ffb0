//! Capture-side data models
//!
//! `NewClip` is a payload after normalization: the canonical bytes that get
//! stored, the content hash used for dedup identity, and the derived preview.

use sha2::{Digest, Sha256};

use crate::interface::{ClipKind, ClipPayload};

/// Default preview length in characters
pub const DEFAULT_PREVIEW_CHARS: usize = 100;

const ELLIPSIS: char = '\u{2026}';

/// Knobs that affect normalization and hashing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NormalizeOptions {
    /// When false, text is lower-cased before hashing (stored text keeps its case)
    pub case_sensitive: bool,
    pub preview_chars: usize,
}

impl Default for NormalizeOptions {
    fn default() -> Self {
        Self {
            case_sensitive: true,
            preview_chars: DEFAULT_PREVIEW_CHARS,
        }
    }
}

/// A normalized clipboard payload, ready to be inserted or matched
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewClip {
    pub payload: ClipPayload,
    pub content_hash: String,
    pub preview: String,
    /// Lower-cased text used for keyword search
    pub search_text: String,
    pub byte_size: u64,
}

impl NewClip {
    /// Normalize a raw payload. Returns None when nothing worth recording is left
    /// (whitespace-only text, empty file list, empty image).
    pub fn from_payload(payload: ClipPayload, options: &NormalizeOptions) -> Option<Self> {
        match payload {
            ClipPayload::Text(text) => Self::new_text(text, options),
            ClipPayload::Image(bytes) => Self::new_image(bytes),
            ClipPayload::FileList(paths) => Self::new_file_list(paths),
        }
    }

    /// Text item: line endings folded to `\n`
    pub fn new_text(text: String, options: &NormalizeOptions) -> Option<Self> {
        let text = normalize_line_endings(&text);
        if text.trim().is_empty() {
            return None;
        }

        let content_hash = if options.case_sensitive {
            hash_parts(ClipKind::Text, &[text.as_bytes()])
        } else {
            hash_parts(ClipKind::Text, &[text.to_lowercase().as_bytes()])
        };

        Some(Self {
            preview: text_preview(&text, options.preview_chars),
            search_text: text.to_lowercase(),
            byte_size: text.len() as u64,
            content_hash,
            payload: ClipPayload::Text(text),
        })
    }

    /// Image item: bytes are stored and hashed as received
    pub fn new_image(bytes: Vec<u8>) -> Option<Self> {
        if bytes.is_empty() {
            return None;
        }

        let preview = image_preview(&bytes);
        Some(Self {
            content_hash: hash_parts(ClipKind::Image, &[&bytes]),
            search_text: preview.to_lowercase(),
            byte_size: bytes.len() as u64,
            preview,
            payload: ClipPayload::Image(bytes),
        })
    }

    /// File list item. Order is kept for display; the hash is order independent.
    pub fn new_file_list(paths: Vec<String>) -> Option<Self> {
        let paths: Vec<String> = paths
            .iter()
            .map(|p| strip_file_scheme(p.trim()).to_string())
            .filter(|p| !p.is_empty())
            .collect();
        if paths.is_empty() {
            return None;
        }

        // Content hash: sort all paths, hash joined
        let mut sorted_paths = paths.clone();
        sorted_paths.sort();
        sorted_paths.dedup();
        let joined = sorted_paths.join("\n");

        let mut search_text = file_list_preview(&paths);
        for path in &paths {
            search_text.push('\n');
            search_text.push_str(path);
        }

        Some(Self {
            content_hash: hash_parts(ClipKind::FileList, &[joined.as_bytes()]),
            preview: file_list_preview(&paths),
            search_text: search_text.to_lowercase(),
            byte_size: paths.iter().map(|p| p.len() as u64).sum(),
            payload: ClipPayload::FileList(paths),
        })
    }

    pub fn kind(&self) -> ClipKind {
        self.payload.kind()
    }
}

/// SHA-256 over the kind tag and the normalized bytes, hex encoded
fn hash_parts(kind: ClipKind, parts: &[&[u8]]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(kind.database_type().as_bytes());
    hasher.update(b"\n");
    for part in parts {
        hasher.update(part);
    }
    format!("{:x}", hasher.finalize())
}

fn normalize_line_endings(text: &str) -> String {
    if !text.contains('\r') {
        return text.to_string();
    }
    text.replace("\r\n", "\n").replace('\r', "\n")
}

fn strip_file_scheme(path: &str) -> &str {
    path.strip_prefix("file://").unwrap_or(path)
}

fn file_name(path: &str) -> &str {
    std::path::Path::new(path)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(path)
}

/// Collapse whitespace runs to single spaces and truncate to `max_chars`,
/// appending an ellipsis when something was cut.
pub fn text_preview(content: &str, max_chars: usize) -> String {
    let mut result = String::with_capacity(max_chars.min(content.len()));
    let mut count = 0;
    let mut last_was_space = false;
    let mut truncated = false;

    for ch in content.trim().chars() {
        let ch = match ch {
            '\n' | '\t' | '\r' => ' ',
            c => c,
        };
        if ch == ' ' {
            if last_was_space {
                continue;
            }
            last_was_space = true;
        } else {
            last_was_space = false;
        }

        if count == max_chars {
            truncated = true;
            break;
        }
        result.push(ch);
        count += 1;
    }

    if truncated {
        let trimmed_len = result.trim_end().len();
        result.truncate(trimmed_len);
        result.push(ELLIPSIS);
    }
    result
}

fn file_list_preview(paths: &[String]) -> String {
    let names: Vec<&str> = paths.iter().map(|p| file_name(p)).collect();
    match names.len() {
        1 => format!("File: {}", names[0]),
        2 => format!("2 Files: {}, {}", names[0], names[1]),
        n => format!("{} Files: {} and {} more", n, names[0], n - 1),
    }
}

fn image_preview(bytes: &[u8]) -> String {
    let dimensions = image::ImageReader::new(std::io::Cursor::new(bytes))
        .with_guessed_format()
        .ok()
        .and_then(|reader| reader.into_dimensions().ok());

    match dimensions {
        Some((width, height)) => format!("Image {}\u{00d7}{}", width, height),
        None => format!("Image ({})", format_size(bytes.len() as u64)),
    }
}

/// Human readable byte size (B, KB, MB, GB)
pub fn format_size(bytes: u64) -> String {
    const KB: f64 = 1024.0;
    let size = bytes as f64;
    if size < KB {
        format!("{} B", bytes)
    } else if size < KB * KB {
        format!("{:.1} KB", size / KB)
    } else if size < KB * KB * KB {
        format!("{:.1} MB", size / (KB * KB))
    } else {
        format!("{:.1} GB", size / (KB * KB * KB))
    }
}
