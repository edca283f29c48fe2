//! Per-client request accounting.
//!
//! Clients are keyed by IP address and forgotten after a period of
//! inactivity by a background cleanup task. Connects, first init fetches,
//! every 10 MB served and expiries are kept in a bounded event log.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::net::IpAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use super::types::{ClientEvent, ClientEventKind, ClientSnapshot};

/// A client counts as active if seen within this many seconds.
const ACTIVE_WINDOW_SECS: i64 = 30;

/// Events retained in the log.
const MAX_EVENTS: usize = 100;

const MB: u64 = 1024 * 1024;
const MILESTONE_MB: u64 = 10;

/// What a response body carried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Served {
    Playlist,
    Init,
    Fragment,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    Get,
    Post,
}

#[derive(Debug, Clone)]
struct ClientMetrics {
    first_seen: DateTime<Utc>,
    last_seen: DateTime<Utc>,
    get_requests: u64,
    post_requests: u64,
    fragments_served: u64,
    bytes_served: u64,
    init_served: bool,
}

impl ClientMetrics {
    fn new(now: DateTime<Utc>) -> Self {
        Self {
            first_seen: now,
            last_seen: now,
            get_requests: 0,
            post_requests: 0,
            fragments_served: 0,
            bytes_served: 0,
            init_served: false,
        }
    }
}

/// Thread-safe registry of clients that talked to the relay.
#[derive(Clone)]
pub struct ClientRegistry {
    clients: Arc<DashMap<IpAddr, ClientMetrics>>,
    total_bytes: Arc<AtomicU64>,
    events: Arc<Mutex<VecDeque<ClientEvent>>>,
    expiry_duration: Duration,
}

impl ClientRegistry {
    pub fn new(expiry_secs: u64) -> Self {
        Self {
            clients: Arc::new(DashMap::new()),
            total_bytes: Arc::new(AtomicU64::new(0)),
            events: Arc::new(Mutex::new(VecDeque::with_capacity(MAX_EVENTS))),
            expiry_duration: Duration::from_secs(expiry_secs),
        }
    }

    /// Count an incoming request from `ip`.
    pub fn record_request(&self, ip: IpAddr, kind: RequestKind) {
        let now = Utc::now();
        let mut connected = false;
        {
            let mut entry = self.clients.entry(ip).or_insert_with(|| {
                tracing::debug!(client = %ip, "New client");
                connected = true;
                ClientMetrics::new(now)
            });
            entry.last_seen = now;
            match kind {
                RequestKind::Get => entry.get_requests += 1,
                RequestKind::Post => entry.post_requests += 1,
            }
        }

        if connected {
            self.push_event(ClientEvent::new(ip, ClientEventKind::Connected, "First request"));
        }
    }

    /// Count a response body sent to `ip`.
    ///
    /// The global byte total is updated even when the peer is unknown.
    pub fn record_served(&self, ip: Option<IpAddr>, bytes: u64, served: Served) {
        self.total_bytes.fetch_add(bytes, Ordering::Relaxed);

        let Some(ip) = ip else {
            return;
        };
        let (first_init, milestone) = {
            let Some(mut entry) = self.clients.get_mut(&ip) else {
                return;
            };
            let before = entry.bytes_served;
            entry.bytes_served += bytes;
            let after = entry.bytes_served;

            let first_init = served == Served::Init && !entry.init_served;
            match served {
                Served::Init => entry.init_served = true,
                Served::Fragment => entry.fragments_served += 1,
                Served::Playlist => {}
            }

            let milestone = crossed_milestone(before, after);
            (first_init, milestone)
        };

        if first_init {
            self.push_event(ClientEvent::new(
                ip,
                ClientEventKind::FirstRequest,
                "First request - init segment",
            ));
        }
        if let Some(mb) = milestone {
            tracing::debug!(client = %ip, mb, "Client data milestone");
            self.push_event(ClientEvent::new(
                ip,
                ClientEventKind::DataMilestone,
                format!("{} MB served", mb),
            ));
        }
    }

    pub fn total_bytes(&self) -> u64 {
        self.total_bytes.load(Ordering::Relaxed)
    }

    /// Snapshot of every known client, ordered by address.
    pub fn snapshot(&self) -> Vec<ClientSnapshot> {
        let now = Utc::now();
        let mut clients: Vec<ClientSnapshot> = self
            .clients
            .iter()
            .map(|entry| {
                let metrics = entry.value();
                ClientSnapshot {
                    ip: *entry.key(),
                    get_requests: metrics.get_requests,
                    post_requests: metrics.post_requests,
                    fragments_served: metrics.fragments_served,
                    bytes_served: metrics.bytes_served,
                    session_duration_secs: (now - metrics.first_seen).num_seconds(),
                    active: (now - metrics.last_seen).num_seconds() < ACTIVE_WINDOW_SECS,
                }
            })
            .collect();
        clients.sort_by_key(|c| c.ip);
        clients
    }

    /// The last `limit` events, oldest first.
    pub fn recent_events(&self, limit: usize) -> Vec<ClientEvent> {
        let events = self.events.lock();
        let skip = events.len().saturating_sub(limit);
        events.iter().skip(skip).cloned().collect()
    }

    fn push_event(&self, event: ClientEvent) {
        let mut events = self.events.lock();
        if events.len() == MAX_EVENTS {
            events.pop_front();
        }
        events.push_back(event);
    }

    /// Forget every client, the event log and the byte total.
    pub fn clear(&self) {
        self.clients.clear();
        self.events.lock().clear();
        self.total_bytes.store(0, Ordering::Relaxed);
    }

    /// Remove clients idle for longer than the expiry duration.
    pub fn cleanup_expired(&self) -> usize {
        let now = Utc::now();
        let expiry = chrono::Duration::from_std(self.expiry_duration)
            .unwrap_or_else(|_| chrono::Duration::seconds(60));

        let mut expired = Vec::new();
        self.clients.retain(|ip, metrics| {
            let idle = now - metrics.last_seen;
            if idle > expiry {
                tracing::debug!(client = %ip, idle_secs = idle.num_seconds(), "Client expired");
                expired.push((*ip, idle.num_seconds()));
                false
            } else {
                true
            }
        });

        for (ip, idle_secs) in &expired {
            self.push_event(ClientEvent::new(
                *ip,
                ClientEventKind::Disconnected,
                format!("Idle for {}s", idle_secs),
            ));
        }
        expired.len()
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}

impl Default for ClientRegistry {
    fn default() -> Self {
        Self::new(60)
    }
}

/// Whole megabytes reached, if the step from `before` to `after` crosses a
/// 10 MB boundary.
fn crossed_milestone(before: u64, after: u64) -> Option<u64> {
    let (before_mb, after_mb) = (before / MB, after / MB);
    (after_mb > 0 && before_mb / MILESTONE_MB < after_mb / MILESTONE_MB).then_some(after_mb)
}

/// Start a background task that periodically drops idle clients.
pub fn start_cleanup_task(
    registry: ClientRegistry,
    interval_secs: u64,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(interval_secs.max(1)));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            interval.tick().await;
            registry.cleanup_expired();
        }
    })
}
