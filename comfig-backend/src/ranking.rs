//! Quickplay ping correction.
//!
//! A client tells us its ping to the control plane. Whatever part of it ideal
//! fiber propagation to the serving edge cannot explain is treated as the
//! client's last-mile overhead. Each server's own self-reported ping stands in
//! for its last mile. Both are added to the ideal client-to-server ping.

use std::sync::Arc;
use std::time::Duration;

use comfig_db::{DbError, KeyValueStore};
use thiserror::Error;
use tracing::{debug, warn};

use crate::cache::{CacheState, ServerListCache};
use crate::edges::EdgeDirectory;
use crate::geo::Coordinates;
use crate::latency::LatencyModel;
use crate::servers::{RankedServer, ServerRecord};

#[derive(Debug, Error)]
pub enum QuickplayError {
    #[error("client location is unavailable")]
    MissingGeolocation,

    #[error("unknown edge node '{0}'")]
    UnknownEdgeNode(String),

    #[error("backing store error: {0}")]
    Store(#[from] DbError),

    #[error("backing store did not answer in time")]
    StoreTimeout,

    #[error("stored server list is malformed: {0}")]
    CorruptSnapshot(#[from] serde_json::Error),
}

/// Fixed costs added on top of propagation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OverheadModel {
    /// Floor for the combined last-mile overhead of both ends.
    pub min_overhead_ms: f64,
    /// Protocol handshake cost added to every estimate.
    pub constant_overhead_ms: f64,
}

impl Default for OverheadModel {
    fn default() -> Self {
        Self {
            min_overhead_ms: 5.0,
            constant_overhead_ms: 2.0,
        }
    }
}

/// What the transport knows about the requesting client.
#[derive(Debug, Clone)]
pub struct ClientContext {
    /// Ping the client measured to us, in ms.
    pub ping: f64,
    pub location: Option<Coordinates>,
    /// IATA code of the edge node that served the request.
    pub edge_node: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RankedServers {
    pub servers: Vec<RankedServer>,
    /// When the list the ranking was based on goes stale (Unix ms).
    pub until: i64,
}

pub struct QuickplayService<S> {
    cache: ServerListCache<S>,
    edges: EdgeDirectory,
    latency: LatencyModel,
    overhead: OverheadModel,
}

impl<S: KeyValueStore> QuickplayService<S> {
    pub fn new(
        store: S,
        edges: EdgeDirectory,
        latency: LatencyModel,
        overhead: OverheadModel,
        min_freshness: Duration,
        store_timeout: Duration,
    ) -> Self {
        Self {
            cache: ServerListCache::new(store, min_freshness, store_timeout),
            edges,
            latency,
            overhead,
        }
    }

    pub fn store(&self) -> &S {
        self.cache.store()
    }

    /// Current server list as cached by this process.
    pub async fn snapshot(&self, now: i64) -> Result<Arc<CacheState>, QuickplayError> {
        self.cache.get(now).await
    }

    /// Replace the published server list.
    pub async fn publish(
        &self,
        servers: Vec<ServerRecord>,
        valid_until: i64,
        now: i64,
    ) -> Result<(), QuickplayError> {
        self.cache.put(servers, valid_until, now).await
    }

    /// Client-side overhead: reported ping not explained by the path to the edge.
    fn client_overhead(&self, client: &ClientContext) -> Result<(Coordinates, f64), QuickplayError> {
        let location = client.location.ok_or(QuickplayError::MissingGeolocation)?;
        let edge = self
            .edges
            .locate(&client.edge_node)
            .ok_or_else(|| QuickplayError::UnknownEdgeNode(client.edge_node.clone()))?;

        let expected = self.latency.ideal_ping_ms(location.distance_km(&edge));
        Ok((location, (client.ping - expected).max(0.0)))
    }

    /// Corrected ping from a client at `client` to `server`.
    pub fn corrected_ping(
        &self,
        client: Coordinates,
        overhead_client: f64,
        server: Coordinates,
        reported_ping: f64,
    ) -> f64 {
        let expected = self.latency.ideal_ping_ms(client.distance_km(&server));
        // Half the server's round trip, capped so it can't exceed the ideal path.
        let overhead_server = expected.min(reported_ping / 2.0);
        let overall = (overhead_client + overhead_server).max(self.overhead.min_overhead_ms);
        expected + overall + self.overhead.constant_overhead_ms
    }

    /// Every published server with its ping corrected for this client, in
    /// published order.
    pub async fn rank_servers(
        &self,
        client: &ClientContext,
        now: i64,
    ) -> Result<RankedServers, QuickplayError> {
        let (location, overhead_client) = self.client_overhead(client)?;
        let state = self.cache.get(now).await?;

        let Some(snapshot) = &state.snapshot else {
            return Ok(RankedServers {
                servers: Vec::new(),
                until: state.expires_at,
            });
        };

        let servers: Vec<RankedServer> = snapshot
            .servers
            .iter()
            .filter_map(|record| {
                let Some(point) = record.location() else {
                    warn!(addr = %record.info.addr, "published server has no location, skipping");
                    return None;
                };
                Some(RankedServer {
                    info: record.info.clone(),
                    corrected_ping: self.corrected_ping(
                        location,
                        overhead_client,
                        point,
                        record.reported_ping,
                    ),
                })
            })
            .collect();

        debug!(
            servers = servers.len(),
            overhead_client,
            edge = %client.edge_node,
            "ranked servers"
        );

        Ok(RankedServers {
            servers,
            until: state.expires_at,
        })
    }
}
