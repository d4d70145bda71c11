use std::time::SystemTime;

use chrono::{DateTime, Utc};

/// What to send for a `Range` header against a resource of a given length.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum ByteRange {
    Full,
    /// Inclusive bounds.
    Partial { start: u64, end: u64 },
    Unsatisfiable,
}

impl ByteRange {
    /// Only single ranges are honoured, a list of ranges gets the whole resource.
    pub fn parse(header: Option<&str>, len: u64) -> Self {
        let Some(header) = header else {
            return Self::Full;
        };
        if len == 0 {
            return Self::Full;
        }
        let Some(ranges) = header.trim().strip_prefix("bytes=") else {
            return Self::Unsatisfiable;
        };
        if ranges.contains(',') {
            return Self::Full;
        }
        let Some((start, end)) = ranges.trim().split_once('-') else {
            return Self::Unsatisfiable;
        };
        let (start, end) = (start.trim(), end.trim());
        let last = len - 1;
        let range = match (start.is_empty(), end.is_empty()) {
            // bytes=-n, the last n bytes
            (true, false) => match end.parse::<u64>() {
                Ok(0) | Err(_) => None,
                Ok(suffix) => Some((len.saturating_sub(suffix), last)),
            },
            (false, true) => start.parse::<u64>().ok().map(|start| (start, last)),
            (false, false) => match (start.parse::<u64>(), end.parse::<u64>()) {
                (Ok(start), Ok(end)) if start <= end => Some((start, end.min(last))),
                _ => None,
            },
            (true, true) => None,
        };
        match range {
            Some((start, end)) if start <= last => Self::Partial { start, end },
            _ => Self::Unsatisfiable,
        }
    }
}

/// IMF-fixdate as used by `Last-Modified`.
pub fn http_date(time: SystemTime) -> String {
    DateTime::<Utc>::from(time)
        .format("%a, %d %b %Y %H:%M:%S GMT")
        .to_string()
}

/// Whether an `If-Modified-Since` value is at or after `modified`, to the second.
pub fn not_modified_since(if_modified_since: &str, modified: SystemTime) -> bool {
    let Ok(since) = DateTime::parse_from_rfc2822(if_modified_since.trim()) else {
        return false;
    };
    since.timestamp() >= DateTime::<Utc>::from(modified).timestamp()
}

pub fn content_type(path: &str) -> &'static str {
    let extension = path
        .rsplit_once('.')
        .map(|(_, extension)| extension.to_ascii_lowercase())
        .unwrap_or_default();
    match extension.as_str() {
        "html" | "htm" => "text/html; charset=utf-8",
        "txt" | "nfo" => "text/plain; charset=utf-8",
        "css" => "text/css",
        "js" => "text/javascript",
        "json" => "application/json",
        "xml" => "application/xml",
        "srt" => "application/x-subrip",
        "vtt" => "text/vtt",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "svg" => "image/svg+xml",
        "ico" => "image/x-icon",
        "mp4" | "m4v" => "video/mp4",
        "mkv" => "video/x-matroska",
        "webm" => "video/webm",
        "avi" => "video/x-msvideo",
        "mov" => "video/quicktime",
        "ts" => "video/mp2t",
        "mp3" => "audio/mpeg",
        "m4a" => "audio/mp4",
        "flac" => "audio/flac",
        "ogg" | "oga" => "audio/ogg",
        "opus" => "audio/opus",
        "wav" => "audio/wav",
        "pdf" => "application/pdf",
        "epub" => "application/epub+zip",
        "zip" => "application/zip",
        "gz" => "application/gzip",
        "tar" => "application/x-tar",
        "iso" => "application/x-iso9660-image",
        _ => "application/octet-stream",
    }
}
