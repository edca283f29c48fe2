//! Live HLS endpoints: playlist, init segment and fragments.
//!
//! Everything is served from memory. The playlist is rebuilt per request
//! and never cached by clients; fragments are looked up by sequence number
//! against the current buffer window.

use std::convert::Infallible;
use std::pin::Pin;
use std::task::{Context, Poll};

use axum::{
    body::{Body, Bytes},
    extract::{Path, State},
    http::{header, HeaderMap, StatusCode},
    response::Response,
    routing::get,
    Extension, Router,
};
use chrono::Utc;
use futures::Stream;
use liverelay_media::{LivePlaylist, LookupError};
use uuid::Uuid;

use super::error::ApiError;
use super::{AppContext, ClientAddr};
use crate::state::{ConnectionGuard, Served};

const PLAYLIST_CACHE_CONTROL: &str = "no-cache, no-store, must-revalidate, max-age=0, s-maxage=0";
const FRAGMENT_CACHE_CONTROL: &str = "no-cache, no-store, must-revalidate";

pub fn live_routes() -> Router<AppContext> {
    Router::new()
        .route("/live.m3u8", get(live_playlist))
        .route("/stream.m3u8", get(live_playlist))
        .route("/init.mp4", get(init_segment))
        .route("/:file", get(fragment))
}

/// Serve the live media playlist.
pub async fn live_playlist(
    State(ctx): State<AppContext>,
    Extension(client): Extension<ClientAddr>,
) -> Result<Response, ApiError> {
    let snapshot = ctx.buffer().snapshot();
    let playlist = LivePlaylist::build(&snapshot, &ctx.playlist).map_err(|reason| {
        tracing::debug!(%reason, "Playlist not available");
        ApiError::NotReady(reason)
    })?;

    let guard = ctx.live.connection_guard();
    let m3u8 = playlist.render();
    ctx.live
        .clients()
        .record_served(client.0, m3u8.len() as u64, Served::Playlist);

    tracing::debug!(
        first = playlist.first_sequence(),
        last = playlist.last_sequence(),
        "Serving live playlist"
    );

    let etag = format!("\"{}-{}\"", playlist.last_sequence(), Uuid::new_v4().simple());

    Ok(Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "application/vnd.apple.mpegurl")
        .header(header::CACHE_CONTROL, PLAYLIST_CACHE_CONTROL)
        .header(header::PRAGMA, "no-cache")
        .header(header::EXPIRES, "0")
        .header(header::ETAG, etag)
        .header(header::LAST_MODIFIED, http_date_now())
        .header(header::CONTENT_LENGTH, m3u8.len())
        .body(guarded_body(Bytes::from(m3u8), guard))
        .unwrap())
}

/// Serve the current initialization segment (ftyp + moov).
pub async fn init_segment(
    State(ctx): State<AppContext>,
    Extension(client): Extension<ClientAddr>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let init = ctx.buffer().init_segment().ok_or(ApiError::InitMissing)?;
    let etag = format!("\"init-{}\"", init.generation);

    let max_age = ctx.config.stream.init_cache_max_age_secs;
    let cache_control = if max_age > 0 {
        format!("public, max-age={}", max_age)
    } else {
        "no-cache".to_string()
    };

    let not_modified = headers
        .get(header::IF_NONE_MATCH)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.split(',').any(|tag| tag.trim() == etag));
    if not_modified {
        return Ok(Response::builder()
            .status(StatusCode::NOT_MODIFIED)
            .header(header::ETAG, etag)
            .header(header::CACHE_CONTROL, cache_control)
            .body(Body::empty())
            .unwrap());
    }

    let guard = ctx.live.connection_guard();
    ctx.live
        .clients()
        .record_served(client.0, init.payload.len() as u64, Served::Init);
    tracing::debug!(
        size = init.payload.len(),
        generation = init.generation,
        "Serving init segment"
    );

    Ok(Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "video/mp4")
        .header(header::CACHE_CONTROL, cache_control)
        .header(header::ETAG, etag)
        .header(header::CONTENT_LENGTH, init.payload.len())
        .body(guarded_body(init.payload, guard))
        .unwrap())
}

/// Serve `seg-{n}.m4s`.
pub async fn fragment(
    State(ctx): State<AppContext>,
    Extension(client): Extension<ClientAddr>,
    Path(file): Path<String>,
) -> Result<Response, ApiError> {
    let sequence = parse_fragment_file(&file)?;
    let buffer = ctx.buffer();

    // Cheap rejection of requests from players that fell behind or raced ahead
    let window = buffer.window();
    if let Some(reason) = LookupError::outside(window, sequence) {
        match reason {
            LookupError::Stale { .. } => tracing::warn!(
                sequence,
                oldest = window.oldest,
                latest = window.latest,
                "Requested stale fragment"
            ),
            _ => tracing::warn!(
                sequence,
                oldest = window.oldest,
                latest = window.latest,
                "Requested fragment from the future"
            ),
        }
        return Err(reason.into());
    }

    let record = buffer.lookup(sequence).map_err(|reason| {
        tracing::warn!(sequence, %reason, "Fragment lookup failed");
        ApiError::from(reason)
    })?;

    let guard = ctx.live.connection_guard();
    ctx.live
        .clients()
        .record_served(client.0, record.size_bytes as u64, Served::Fragment);
    tracing::debug!(sequence, size = record.size_bytes, "Serving fragment");

    Ok(Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "video/mp4")
        .header(header::CACHE_CONTROL, FRAGMENT_CACHE_CONTROL)
        .header(header::PRAGMA, "no-cache")
        .header(header::EXPIRES, "0")
        .header(header::CONTENT_LENGTH, record.size_bytes)
        .body(guarded_body(record.payload.clone(), guard))
        .unwrap())
}

/// Response body that keeps `guard` alive until hyper drops it.
fn guarded_body(payload: Bytes, guard: ConnectionGuard) -> Body {
    Body::from_stream(GuardedChunk {
        chunk: Some(payload),
        _guard: guard,
    })
}

struct GuardedChunk {
    chunk: Option<Bytes>,
    _guard: ConnectionGuard,
}

impl Stream for GuardedChunk {
    type Item = Result<Bytes, Infallible>;

    fn poll_next(mut self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Poll::Ready(self.chunk.take().map(Ok))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let n = usize::from(self.chunk.is_some());
        (n, Some(n))
    }
}

/// `seg-{n}.m4s` -> n. Other names are 404, a bad number is 400.
fn parse_fragment_file(file: &str) -> Result<u64, ApiError> {
    let id = file
        .strip_prefix("seg-")
        .and_then(|rest| rest.strip_suffix(".m4s"))
        .ok_or(ApiError::NotFound)?;

    id.parse::<u64>()
        .map_err(|_| ApiError::InvalidFragmentId(id.to_string()))
}

fn http_date_now() -> String {
    Utc::now().format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_fragment_file() {
        assert_eq!(parse_fragment_file("seg-42.m4s").unwrap(), 42);
        assert!(matches!(
            parse_fragment_file("seg-abc.m4s"),
            Err(ApiError::InvalidFragmentId(_))
        ));
        assert!(matches!(
            parse_fragment_file("seg--1.m4s"),
            Err(ApiError::InvalidFragmentId(_))
        ));
        assert!(matches!(
            parse_fragment_file("favicon.ico"),
            Err(ApiError::NotFound)
        ));
    }

    #[tokio::test]
    async fn test_guarded_body_holds_connection() {
        use crate::config::StreamingMode;
        use crate::state::LiveState;
        use http_body_util::BodyExt;
        use liverelay_media::FragmentBuffer;
        use std::sync::Arc;

        let live = LiveState::new(
            Arc::new(FragmentBuffer::new(15)),
            StreamingMode::StreamOnly,
            60,
        );
        let body = guarded_body(Bytes::from_static(b"moof"), live.connection_guard());
        assert_eq!(live.active_connections(), 1);

        let collected = body.collect().await.unwrap().to_bytes();
        assert_eq!(&collected[..], b"moof");
        assert_eq!(live.active_connections(), 0);
    }

    #[test]
    fn test_http_date_format() {
        let date = http_date_now();
        assert!(date.ends_with(" GMT"));
        assert_eq!(date.len(), 29);
    }
}
