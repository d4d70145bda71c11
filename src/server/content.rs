use std::io::{self, ErrorKind, SeekFrom};

use axum::body::{Body, Bytes};
use axum::extract::rejection::PathRejection;
use axum::extract::{Path, State};
use axum::http::header::{
    ACCEPT_RANGES, CONTENT_DISPOSITION, CONTENT_LENGTH, CONTENT_RANGE, CONTENT_TYPE,
    IF_MODIFIED_SINCE, LAST_MODIFIED, RANGE,
};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use futures::Stream;
use log::debug;

use crate::core::Sha1;
use crate::error::{Error, Result};
use crate::server::AppState;
use crate::server::range::{self, ByteRange};
use crate::swarm::FileReader;

const CHUNK_SIZE: u64 = 64 * 1024;

/// `GET /torrent/{hash}/{*path}`
pub async fn download(
    State(state): State<AppState>,
    params: std::result::Result<Path<(String, String)>, PathRejection>,
    headers: HeaderMap,
) -> Result<Response> {
    let Path((hash, path)) = params.map_err(|_| Error::NotFound)?;
    let info_hash = Sha1::from_hex(&hash).map_err(|_| Error::NotFound)?;
    let transfer = state.swarm.transfer(&info_hash).ok_or(Error::NotFound)?;
    let file = transfer.file(&path).ok_or(Error::NotFound)?.clone();

    let last_modified = HeaderValue::from_str(&range::http_date(transfer.added_at))
        .map_err(|err| Error::Internal(err.to_string()))?;
    let not_modified = headers
        .get(IF_MODIFIED_SINCE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|since| range::not_modified_since(since, transfer.added_at));
    if not_modified {
        return Ok((StatusCode::NOT_MODIFIED, [(LAST_MODIFIED, last_modified)]).into_response());
    }

    let len = file.length;
    let (status, start, length) = match requested_range(&headers, len) {
        ByteRange::Full => (StatusCode::OK, 0, len),
        ByteRange::Partial { start, end } => (StatusCode::PARTIAL_CONTENT, start, end - start + 1),
        ByteRange::Unsatisfiable => {
            return Ok((
                StatusCode::RANGE_NOT_SATISFIABLE,
                [(CONTENT_RANGE, format!("bytes */{}", len))],
            )
                .into_response());
        }
    };
    debug!(
        "{}: serving {} bytes {}..{}",
        transfer.name(),
        file.path,
        start,
        start + length
    );

    let mut reader = transfer.reader(&file);
    reader.set_responsive();
    reader
        .seek(SeekFrom::Start(start))
        .map_err(|err| Error::Internal(err.to_string()))?;

    let mut response = (status, Body::from_stream(body(reader, length))).into_response();
    let response_headers = response.headers_mut();
    response_headers.insert(
        CONTENT_TYPE,
        HeaderValue::from_static(range::content_type(&file.path)),
    );
    response_headers.insert(CONTENT_LENGTH, HeaderValue::from(length));
    response_headers.insert(ACCEPT_RANGES, HeaderValue::from_static("bytes"));
    response_headers.insert(LAST_MODIFIED, last_modified);
    response_headers.insert(CONTENT_DISPOSITION, content_disposition(&file.path)?);
    if status == StatusCode::PARTIAL_CONTENT {
        let content_range = format!("bytes {}-{}/{}", start, start + length - 1, len);
        response_headers.insert(
            CONTENT_RANGE,
            HeaderValue::from_str(&content_range).map_err(|err| Error::Internal(err.to_string()))?,
        );
    }
    Ok(response)
}

fn content_disposition(path: &str) -> Result<HeaderValue> {
    let filename = path.replace('\\', "\\\\").replace('"', "\\\"");
    let value = format!("attachment; filename=\"{}\"", filename);
    HeaderValue::from_bytes(value.as_bytes()).map_err(|err| Error::Internal(err.to_string()))
}

/// Streams `length` bytes from the reader. The reader is dropped with the stream, which happens
/// as soon as the client goes away.
fn body(reader: FileReader, length: u64) -> impl Stream<Item = io::Result<Bytes>> + Send + 'static {
    futures::stream::try_unfold((reader, length), |(mut reader, remaining)| async move {
        if remaining == 0 {
            return Ok(None);
        }
        let mut buf = vec![0; remaining.min(CHUNK_SIZE) as usize];
        let read = reader.read(&mut buf).await?;
        if read == 0 {
            return Err(io::Error::new(ErrorKind::UnexpectedEof, "file ended early"));
        }
        buf.truncate(read);
        Ok(Some((Bytes::from(buf), (reader, remaining - read as u64))))
    })
}

/// A `Range` header that is not readable text is ignored.
fn requested_range(headers: &HeaderMap, len: u64) -> ByteRange {
    let requested = headers.get(RANGE).and_then(|value| value.to_str().ok());
    ByteRange::parse(requested, len)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unreadable_range_gets_everything() {
        let mut headers = HeaderMap::new();
        headers.insert(RANGE, HeaderValue::from_bytes(b"bytes=\xff-").unwrap());
        assert_eq!(requested_range(&headers, 100), ByteRange::Full);

        headers.insert(RANGE, HeaderValue::from_static("bytes=10-19"));
        assert_eq!(
            requested_range(&headers, 100),
            ByteRange::Partial { start: 10, end: 19 }
        );
    }

    #[test]
    fn disposition_escapes_quotes() {
        let value = content_disposition("dir/say \"hi\"\\.txt").unwrap();

        assert_eq!(
            value,
            "attachment; filename=\"dir/say \\\"hi\\\"\\\\.txt\""
        );
    }

    #[test]
    fn disposition_keeps_unicode() {
        let value = content_disposition("día.txt").unwrap();

        assert_eq!(value.as_bytes(), "attachment; filename=\"día.txt\"".as_bytes());
    }
}
