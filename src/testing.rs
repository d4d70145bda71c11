//! Builders for in-memory torrents used across unit tests.

use std::time::Duration;

use crate::bencoding::Value;
use crate::core::Sha1;
use crate::torrent::{Info, Torrent};

/// Default time to wait for something to happen between peers on localhost.
pub const TIMEOUT: Duration = Duration::from_secs(10);

/// Initialise logging for tests, respecting `RUST_LOG`. Safe to call more than once.
pub fn init_test_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Deterministic, non-repeating-looking bytes.
pub fn test_data(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 31 % 251) as u8).collect()
}

fn piece_hashes(data: &[u8], piece_size: usize) -> Vec<u8> {
    data.chunks(piece_size)
        .flat_map(|chunk| Sha1::digest(chunk).0)
        .collect()
}

pub fn test_single_file_info(name: &str, data: &[u8], piece_size: usize) -> Info {
    let value = Value::dictionary()
        .with_entry("piece length", Value::Integer(piece_size as i64))
        .with_entry("pieces", Value::String(piece_hashes(data, piece_size)))
        .with_entry("name", Value::string(name))
        .with_entry("length", Value::Integer(data.len() as i64));
    Info::try_from(value).expect("invalid test info")
}

pub fn test_info(data: &[u8], piece_size: usize) -> Info {
    test_single_file_info("file.bin", data, piece_size)
}

/// `files` holds slash separated paths relative to the torrent directory.
pub fn test_multi_file_info(name: &str, files: &[(&str, &[u8])], piece_size: usize) -> Info {
    let data: Vec<u8> = files.iter().flat_map(|(_, data)| data.iter().copied()).collect();
    let files = files.iter().fold(Value::list(), |list, (path, data)| {
        let path = path
            .split('/')
            .fold(Value::list(), |path, part| path.with_value(Value::string(part)));
        list.with_value(
            Value::dictionary()
                .with_entry("length", Value::Integer(data.len() as i64))
                .with_entry("path", path),
        )
    });
    let value = Value::dictionary()
        .with_entry("piece length", Value::Integer(piece_size as i64))
        .with_entry("pieces", Value::String(piece_hashes(&data, piece_size)))
        .with_entry("name", Value::string(name))
        .with_entry("files", files);
    Info::try_from(value).expect("invalid test info")
}

pub fn test_torrent(info: Info) -> Torrent {
    Torrent {
        trackers: Vec::new(),
        info,
    }
}
