//! Shared test harness for integration tests.
//!
//! Provides [`TestHarness`] which builds a fragment buffer, live state and
//! [`AppContext`] from a config, plus helpers for feeding fragments and
//! issuing requests against the router.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::ops::RangeInclusive;
use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    body::Body,
    extract::ConnectInfo,
    http::{Request, Response},
    Router,
};
use bytes::Bytes;
use http_body_util::BodyExt;
use liverelay::config::Config;
use liverelay::server::{create_router, AppContext, ControlError, DeviceCommand, DeviceControl};
use liverelay::state::LiveState;
use liverelay_media::FragmentBuffer;
use parking_lot::Mutex;
use serde_json::Value;
use tower::ServiceExt;

pub struct TestHarness {
    pub ctx: AppContext,
}

impl TestHarness {
    pub fn new() -> Self {
        Self::with_config(Config::default())
    }

    pub fn with_config(config: Config) -> Self {
        let buffer = Arc::new(FragmentBuffer::new(config.stream.buffer_capacity));
        buffer.set_enabled(config.stream.enabled);
        let live = LiveState::new(
            buffer,
            config.stream.mode,
            config.server.client_expiry_secs,
        );
        Self {
            ctx: AppContext::new(config, live),
        }
    }

    pub fn live(&self) -> &Arc<LiveState> {
        &self.ctx.live
    }

    pub fn buffer(&self) -> &Arc<FragmentBuffer> {
        self.ctx.buffer()
    }

    pub fn router(&self) -> Router {
        create_router(self.ctx.clone())
    }

    /// Start a recording and deliver an init segment.
    pub fn start_session(&self) {
        self.live().start_recording("test-encoder");
        self.buffer().on_init_segment(Bytes::from(init_segment()));
    }

    pub fn push_fragments(&self, range: RangeInclusive<u64>) {
        for seq in range {
            self.buffer()
                .on_fragment_complete(seq, Bytes::from(fragment_payload(seq)));
        }
    }

    pub async fn get(&self, uri: &str) -> Response<Body> {
        self.router()
            .oneshot(Request::get(uri).body(Body::empty()).unwrap())
            .await
            .unwrap()
    }

    pub async fn get_from(&self, uri: &str, peer: SocketAddr) -> Response<Body> {
        let mut request = Request::get(uri).body(Body::empty()).unwrap();
        request.extensions_mut().insert(ConnectInfo(peer));
        self.router().oneshot(request).await.unwrap()
    }

    pub async fn post(&self, uri: &str) -> Response<Body> {
        self.router()
            .oneshot(Request::post(uri).body(Body::empty()).unwrap())
            .await
            .unwrap()
    }

    pub async fn post_json(&self, uri: &str, body: &str) -> Response<Body> {
        self.router()
            .oneshot(
                Request::post(uri)
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap()
    }
}

pub async fn body_bytes(response: Response<Body>) -> Bytes {
    response.into_body().collect().await.unwrap().to_bytes()
}

pub async fn body_string(response: Response<Body>) -> String {
    String::from_utf8(body_bytes(response).await.to_vec()).unwrap()
}

pub async fn body_json(response: Response<Body>) -> Value {
    serde_json::from_slice(&body_bytes(response).await).unwrap()
}

pub fn make_box(box_type: &[u8; 4], body: &[u8]) -> Vec<u8> {
    let mut out = ((body.len() + 8) as u32).to_be_bytes().to_vec();
    out.extend_from_slice(box_type);
    out.extend_from_slice(body);
    out
}

/// ftyp + moov
pub fn init_segment() -> Vec<u8> {
    let mut out = make_box(b"ftyp", b"isom\0\0\0\0");
    out.extend(make_box(b"moov", &[0u8; 32]));
    out
}

/// moof (with mfhd) + mdat whose content encodes the sequence number
pub fn fragment_payload(sequence: u64) -> Vec<u8> {
    let mut mfhd = vec![0u8; 4];
    mfhd.extend_from_slice(&(sequence as u32).to_be_bytes());
    let mut out = make_box(b"moof", &make_box(b"mfhd", &mfhd));
    out.extend(make_box(b"mdat", &sequence.to_be_bytes()));
    out
}

/// Device controller that records commands and optionally fails.
#[derive(Default)]
pub struct RecordingController {
    pub commands: Mutex<Vec<DeviceCommand>>,
    pub fail: bool,
}

impl RecordingController {
    pub fn failing() -> Self {
        Self {
            commands: Mutex::new(Vec::new()),
            fail: true,
        }
    }
}

#[async_trait]
impl DeviceControl for RecordingController {
    fn name(&self) -> &'static str {
        "recording-controller"
    }

    async fn execute(&self, command: &DeviceCommand) -> Result<Value, ControlError> {
        self.commands.lock().push(command.clone());
        if self.fail {
            return Err(ControlError::Unavailable("camera offline".to_string()));
        }
        Ok(serde_json::json!({ "applied": command.action }))
    }
}
