/// Input validation functions for all backend routes
use thiserror::Error;

use crate::servers::ServerRecord;

/// Max servers accepted in one publish
pub const MAX_SERVERS: usize = 10_000;
/// Max length of a HUD counter id
pub const MAX_COUNTER_ID_LEN: usize = 64;
/// Pings above this are not plausible measurements
pub const MAX_PING_MS: f64 = 10_000.0;

#[derive(Debug, Error, PartialEq)]
pub enum ValidationError {
    #[error("Ping must be a finite number between 0 and {max} ms")]
    PingOutOfRange { max: f64 },

    #[error("Server list too large (max {max} servers, got {actual})")]
    ServerListTooLarge { max: usize, actual: usize },

    #[error("Server {index} ({addr}) has no location")]
    ServerMissingPoint { index: usize, addr: String },

    #[error("Server {index} ({addr}) has an invalid location")]
    ServerInvalidPoint { index: usize, addr: String },

    #[error("Server {index} ({addr}) has an invalid ping")]
    ServerInvalidPing { index: usize, addr: String },

    #[error("Server {index} has an empty address")]
    ServerAddrEmpty { index: usize },

    #[error("Counter id cannot be empty")]
    CounterIdEmpty,

    #[error("Counter id too long (max {max} characters, got {actual})")]
    CounterIdTooLong { max: usize, actual: usize },

    #[error("Counter id contains invalid characters (only alphanumeric, '-', '_' and '.' allowed)")]
    CounterIdInvalidChars,
}

/// Validates a ping measured by a client
///
/// Rules:
/// - Must be finite
/// - Between 0 and 10 seconds
pub fn validate_ping(ping: f64) -> Result<(), ValidationError> {
    if !ping.is_finite() || !(0.0..=MAX_PING_MS).contains(&ping) {
        return Err(ValidationError::PingOutOfRange { max: MAX_PING_MS });
    }

    Ok(())
}

/// Validates a server list before it is published
///
/// Rules:
/// - Max 10000 servers per publish
/// - Every server has an address
/// - Every server has a `[lon, lat]` point on the globe
/// - Every self-reported ping is a valid ping
pub fn validate_server_list(servers: &[ServerRecord]) -> Result<(), ValidationError> {
    if servers.len() > MAX_SERVERS {
        return Err(ValidationError::ServerListTooLarge {
            max: MAX_SERVERS,
            actual: servers.len(),
        });
    }

    for (index, server) in servers.iter().enumerate() {
        let addr = &server.info.addr;
        if addr.is_empty() {
            return Err(ValidationError::ServerAddrEmpty { index });
        }

        match server.location() {
            None => {
                return Err(ValidationError::ServerMissingPoint {
                    index,
                    addr: addr.clone(),
                });
            }
            Some(location) if !location.is_valid() => {
                return Err(ValidationError::ServerInvalidPoint {
                    index,
                    addr: addr.clone(),
                });
            }
            Some(_) => {}
        }

        if validate_ping(server.reported_ping).is_err() {
            return Err(ValidationError::ServerInvalidPing {
                index,
                addr: addr.clone(),
            });
        }
    }

    Ok(())
}

/// Validates a HUD download counter id
///
/// Rules:
/// - Cannot be empty
/// - Max 64 characters
/// - Only ASCII alphanumeric characters, '-', '_' and '.'
pub fn validate_counter_id(id: &str) -> Result<(), ValidationError> {
    if id.is_empty() {
        return Err(ValidationError::CounterIdEmpty);
    }

    if id.len() > MAX_COUNTER_ID_LEN {
        return Err(ValidationError::CounterIdTooLong {
            max: MAX_COUNTER_ID_LEN,
            actual: id.len(),
        });
    }

    if !id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
    {
        return Err(ValidationError::CounterIdInvalidChars);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::servers::fixtures::server;

    // Ping validation tests
    #[test]
    fn test_valid_pings() {
        assert!(validate_ping(0.0).is_ok());
        assert!(validate_ping(35.5).is_ok());
        assert!(validate_ping(MAX_PING_MS).is_ok());
    }

    #[test]
    fn test_invalid_pings() {
        let err = Err(ValidationError::PingOutOfRange { max: MAX_PING_MS });
        assert_eq!(validate_ping(-1.0), err);
        assert_eq!(validate_ping(f64::NAN), err);
        assert_eq!(validate_ping(f64::INFINITY), err);
        assert_eq!(validate_ping(MAX_PING_MS + 1.0), err);
    }

    // Server list validation tests
    #[test]
    fn test_valid_server_list() {
        let servers = vec![
            server("203.0.113.1:27015", 47.6, -122.3, 12.0),
            server("203.0.113.2:27015", -33.9, 151.2, 30.0),
        ];
        assert!(validate_server_list(&servers).is_ok());
    }

    #[test]
    fn test_empty_server_list() {
        assert!(validate_server_list(&[]).is_ok()); // Unpublishing everything is valid
    }

    #[test]
    fn test_server_list_too_large() {
        let servers: Vec<_> = (0..MAX_SERVERS + 1)
            .map(|i| server(&format!("203.0.113.1:{i}"), 0.0, 0.0, 1.0))
            .collect();
        assert_eq!(
            validate_server_list(&servers),
            Err(ValidationError::ServerListTooLarge {
                max: MAX_SERVERS,
                actual: MAX_SERVERS + 1
            })
        );
    }

    #[test]
    fn test_server_missing_point() {
        let mut lost = server("203.0.113.9:27015", 0.0, 0.0, 1.0);
        lost.point = None;
        let servers = vec![server("203.0.113.1:27015", 0.0, 0.0, 1.0), lost];
        assert_eq!(
            validate_server_list(&servers),
            Err(ValidationError::ServerMissingPoint {
                index: 1,
                addr: "203.0.113.9:27015".to_string()
            })
        );
    }

    #[test]
    fn test_server_invalid_point() {
        // lat/lon swapped into an impossible latitude
        let servers = vec![server("203.0.113.1:27015", 151.2, -33.9, 1.0)];
        assert_eq!(
            validate_server_list(&servers),
            Err(ValidationError::ServerInvalidPoint {
                index: 0,
                addr: "203.0.113.1:27015".to_string()
            })
        );
    }

    #[test]
    fn test_server_invalid_ping() {
        let servers = vec![server("203.0.113.1:27015", 0.0, 0.0, -4.0)];
        assert!(matches!(
            validate_server_list(&servers),
            Err(ValidationError::ServerInvalidPing { index: 0, .. })
        ));
    }

    #[test]
    fn test_server_empty_addr() {
        let servers = vec![server("", 0.0, 0.0, 1.0)];
        assert_eq!(
            validate_server_list(&servers),
            Err(ValidationError::ServerAddrEmpty { index: 0 })
        );
    }

    // Counter id validation tests
    #[test]
    fn test_valid_counter_ids() {
        assert!(validate_counter_id("budhud").is_ok());
        assert!(validate_counter_id("flaw-hud_2.1").is_ok());
        assert!(validate_counter_id(&"a".repeat(MAX_COUNTER_ID_LEN)).is_ok());
    }

    #[test]
    fn test_empty_counter_id() {
        assert_eq!(validate_counter_id(""), Err(ValidationError::CounterIdEmpty));
    }

    #[test]
    fn test_counter_id_too_long() {
        assert_eq!(
            validate_counter_id(&"a".repeat(65)),
            Err(ValidationError::CounterIdTooLong {
                max: 64,
                actual: 65
            })
        );
    }

    #[test]
    fn test_counter_id_invalid_chars() {
        assert_eq!(
            validate_counter_id("bud hud"),
            Err(ValidationError::CounterIdInvalidChars)
        );
        assert_eq!(
            validate_counter_id("bud/hud"),
            Err(ValidationError::CounterIdInvalidChars)
        );
    }
}
