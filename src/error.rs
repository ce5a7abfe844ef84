use std::path::PathBuf;
use thiserror::Error;

pub type GatewayResult<T> = Result<T, GatewayError>;

/// Administrative and startup failures.
///
/// Routing outcomes (rate limited, not found, ...) are not errors, they are
/// `RoutingDecision`s handed back to the caller.
#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("service `{0}` is already registered")]
    RegistryConflict(String),

    #[error("service `{0}` must declare at least one endpoint")]
    NoEndpoints(String),

    #[error("service `{0}` is not registered")]
    UnknownService(String),

    #[error("no route registered at `{0}`")]
    UnknownRoute(String),

    #[error("failed to load definitions from {path}: {source}")]
    Config {
        path: PathBuf,
        #[source]
        source: ConfigSource,
    },
}

#[derive(Error, Debug)]
pub enum ConfigSource {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}
