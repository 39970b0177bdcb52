use thiserror::Error;

/// Errors from parsing the request surface (bbox, style descriptor, SRS).
///
/// These always map to a 400-class response in the consuming HTTP layer.
#[derive(Debug, Clone, Error)]
pub enum RequestError {
    /// Bounding box string did not parse to four numbers
    #[error("malformed bounding box {input:?}: expected four comma-separated numbers")]
    MalformedBbox { input: String },

    /// Style/env descriptor could not be parsed
    #[error("malformed style descriptor: {reason}")]
    MalformedStyle { reason: String },

    /// Spatial reference string did not parse to an EPSG code
    #[error("malformed spatial reference {input:?}: expected EPSG:<code>")]
    MalformedSrs { input: String },

    /// Spatial reference id is not in the EPSG database
    #[error("unknown spatial reference: EPSG:{srid}")]
    UnknownSrid { srid: u32 },

    /// Tile dimensions are zero or implausibly large
    #[error("invalid tile dimensions {width}x{height}")]
    InvalidDimensions { width: u32, height: u32 },

    /// Stored query reference id could not be resolved
    #[error("unknown query reference: {id}")]
    UnknownQueryReference { id: String },
}

/// Coordinate transform failures.
#[derive(Debug, Clone, Error)]
pub enum ProjectionError {
    /// The whole tile envelope could not be projected (400-class)
    #[error("failed to project tile envelope from EPSG:{from} to EPSG:{to}: {reason}")]
    Envelope { from: u32, to: u32, reason: String },

    /// A single point could not be projected (logged and skipped, never fatal)
    #[error("failed to project point ({x}, {y}): {reason}")]
    Point { x: f64, y: f64, reason: String },
}

/// Failures from the occurrence index collaborator.
#[derive(Debug, Clone, Error)]
pub enum IndexError {
    /// The index call itself failed (network, query syntax, timeout)
    #[error("index query failed: {0}")]
    Upstream(String),

    /// The index answered with data the engine cannot interpret
    #[error("index returned a malformed response: {0}")]
    MalformedResponse(String),
}

/// Failures while populating a cache entry.
#[derive(Debug, Clone, Error)]
pub enum CacheError {
    /// Population of a cache entry failed
    #[error("cache build failed: {0}")]
    Build(#[from] IndexError),
}

/// Top-level error for tile production.
#[derive(Debug, Clone, Error)]
pub enum TileError {
    /// Request surface parsing error
    #[error(transparent)]
    Request(#[from] RequestError),

    /// Coordinate transform error
    #[error(transparent)]
    Projection(#[from] ProjectionError),

    /// Index collaborator error
    #[error(transparent)]
    Index(#[from] IndexError),

    /// Cache population error
    #[error(transparent)]
    Cache(#[from] CacheError),

    /// Image encoding error
    #[error("tile encoding failed: {message}")]
    Encode { message: String },
}

impl TileError {
    /// Whether this error was caused by the request rather than the engine.
    ///
    /// Client errors surface as a structured 4xx payload; everything else is
    /// a 5xx. Per-point projection failures never reach this type.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            TileError::Request(_) | TileError::Projection(ProjectionError::Envelope { .. })
        )
    }

    /// HTTP status code the consuming layer should use for this error.
    pub fn status_code(&self) -> u16 {
        if self.is_client_error() {
            400
        } else {
            500
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_errors_are_client_errors() {
        let err = TileError::from(RequestError::MalformedBbox {
            input: "1,2,3".to_string(),
        });
        assert!(err.is_client_error());
        assert_eq!(err.status_code(), 400);
    }

    #[test]
    fn test_envelope_projection_is_client_error() {
        let err = TileError::from(ProjectionError::Envelope {
            from: 3857,
            to: 4326,
            reason: "out of range".to_string(),
        });
        assert!(err.is_client_error());
    }

    #[test]
    fn test_point_projection_is_not_client_error() {
        let err = TileError::from(ProjectionError::Point {
            x: 0.0,
            y: 95.0,
            reason: "latitude out of range".to_string(),
        });
        assert!(!err.is_client_error());
        assert_eq!(err.status_code(), 500);
    }

    #[test]
    fn test_index_errors_are_server_errors() {
        let err = TileError::from(IndexError::Upstream("connection refused".to_string()));
        assert!(!err.is_client_error());
        assert_eq!(err.status_code(), 500);
    }

    #[test]
    fn test_cache_error_wraps_index_error() {
        let cache_err = CacheError::from(IndexError::Upstream("boom".to_string()));
        let err = TileError::from(cache_err);
        assert_eq!(err.status_code(), 500);
        assert!(err.to_string().contains("cache build failed"));
    }
}
