use serde::{Deserialize, Serialize};

use crate::geo::Coordinates;

/// Public description of a game server, shared by the stored and ranked forms.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerInfo {
    pub addr: String,
    pub steamid: String,
    pub name: String,
    pub players: u32,
    pub max_players: u32,
    pub bots: u32,
    pub map: String,
    pub gametype: Vec<String>,
    pub score: f64,
}

/// A server as published to the list, location included.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerRecord {
    #[serde(flatten)]
    pub info: ServerInfo,
    /// `[longitude, latitude]`, never sent to clients.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub point: Option<[f64; 2]>,
    /// Ping the server reported for itself.
    #[serde(rename = "ping")]
    pub reported_ping: f64,
}

impl ServerRecord {
    pub fn location(&self) -> Option<Coordinates> {
        self.point.map(Coordinates::from_lon_lat)
    }
}

/// A server as returned to a client: no location, corrected ping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedServer {
    #[serde(flatten)]
    pub info: ServerInfo,
    #[serde(rename = "ping")]
    pub corrected_ping: f64,
}

/// The authoritative server list at one point in time. Always replaced whole.
#[derive(Debug, Clone, PartialEq)]
pub struct ServerListSnapshot {
    pub servers: Vec<ServerRecord>,
    /// Publisher's freshness estimate (Unix ms), 0 when absent.
    pub valid_until: i64,
}
