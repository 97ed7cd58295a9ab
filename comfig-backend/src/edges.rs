//! Locations of CDN edge nodes, keyed by IATA airport code.

use std::collections::HashMap;

use serde::Deserialize;

use crate::geo::Coordinates;

/// Airport coordinates of every point of presence a request can be served from.
const BUNDLED_EDGES: &str = include_str!("../data/edges.json");

#[derive(Debug, Deserialize)]
struct EdgeEntry {
    iata: String,
    lat: f64,
    lon: f64,
}

/// Lookup table from edge node id to its location.
#[derive(Debug, Clone)]
pub struct EdgeDirectory {
    locations: HashMap<String, Coordinates>,
}

impl EdgeDirectory {
    pub fn empty() -> Self {
        Self {
            locations: HashMap::new(),
        }
    }

    /// Parse a JSON array of `{ "iata", "lat", "lon" }` entries.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        let entries: Vec<EdgeEntry> = serde_json::from_str(json)?;
        Ok(entries.into_iter().fold(Self::empty(), |directory, entry| {
            directory.with_location(&entry.iata, Coordinates::new(entry.lat, entry.lon))
        }))
    }

    /// Add or replace an edge location.
    pub fn with_location(mut self, id: &str, location: Coordinates) -> Self {
        self.locations.insert(id.to_ascii_uppercase(), location);
        self
    }

    /// Location of an edge node, case-insensitive on the id.
    pub fn locate(&self, id: &str) -> Option<Coordinates> {
        self.locations.get(&id.trim().to_ascii_uppercase()).copied()
    }

    pub fn len(&self) -> usize {
        self.locations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locations.is_empty()
    }
}

impl Default for EdgeDirectory {
    /// Every known point of presence.
    fn default() -> Self {
        Self::from_json(BUNDLED_EDGES).expect("bundled edge table is valid JSON")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_bundled_edge_resolves() {
        let entries: Vec<EdgeEntry> = serde_json::from_str(BUNDLED_EDGES).unwrap();
        let directory = EdgeDirectory::default();

        // No id appears twice
        assert_eq!(directory.len(), entries.len());
        assert!(directory.len() > 300);
        for entry in &entries {
            assert_eq!(entry.iata.len(), 3, "{}", entry.iata);
            let location = directory.locate(&entry.iata).unwrap();
            assert!(location.is_valid(), "{}", entry.iata);
            assert_eq!(location, Coordinates::new(entry.lat, entry.lon));
        }
    }

    #[test]
    fn test_regional_edges_resolve() {
        let directory = EdgeDirectory::default();
        for id in [
            "PHX", "KUL", "BKK", "DEL", "CGK", "BNE", "PER", "BCN", "MUC", "TLV", "CPT", "YYC",
            "SLC", "MSP", "SEA", "IAD", "FRA", "SIN",
        ] {
            assert!(directory.locate(id).is_some(), "{id} is missing");
        }
    }

    #[test]
    fn test_from_json() {
        let directory =
            EdgeDirectory::from_json(r#"[{ "iata": "tst", "lat": 1.5, "lon": -2.5 }]"#).unwrap();
        assert_eq!(directory.locate("TST"), Some(Coordinates::new(1.5, -2.5)));
        assert!(!directory.is_empty());

        assert!(EdgeDirectory::from_json("[]").unwrap().is_empty());
        assert!(EdgeDirectory::from_json(r#"[{ "iata": "TST" }]"#).is_err());
    }

    #[test]
    fn test_lookup_is_case_insensitive() {
        let directory = EdgeDirectory::default();
        assert_eq!(directory.locate("sjc"), directory.locate("SJC"));
        assert!(directory.locate(" fra ").is_some());
    }

    #[test]
    fn test_unknown_edge() {
        assert!(EdgeDirectory::default().locate("XXX").is_none());
        assert!(EdgeDirectory::empty().locate("SJC").is_none());
    }

    #[test]
    fn test_custom_location_overrides() {
        let directory = EdgeDirectory::default().with_location("sjc", Coordinates::new(0.0, 0.0));
        assert_eq!(directory.locate("SJC"), Some(Coordinates::new(0.0, 0.0)));
    }
}
