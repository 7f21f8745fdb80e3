use thiserror::Error;

/// Error taxonomy for plan execution.
///
/// Variants carry the exact strings surfaced to the UI in step results, so
/// the dispatch policy and backends construct them directly instead of
/// formatting ad-hoc messages.
#[derive(Error, Debug)]
pub enum Error {
    // Connectivity: recoverable by waiting for reconnect or reconfiguring.
    #[error("disconnected")]
    Disconnected,

    #[error("mcp-timeout")]
    BridgeTimeout,

    #[error("mcp-bridge-not-connected")]
    BridgeNotConnected,

    // Resolution ambiguity.
    #[error("call-tool-missing-name")]
    MissingToolName,

    // Policy refusals: intentional, surfaced verbatim, never retried.
    #[error("blocked-new-page-without-url")]
    NewPageWithoutUrl,

    #[error("blocked-new-page-force-new-bridge-off")]
    ForceNewBridgeOff,

    #[error("select-page-missing-url")]
    SelectPageMissingUrl,

    #[error("navigate-missing-url")]
    NavigateMissingUrl,

    // Local primitive failures.
    #[error("selector-not-found")]
    SelectorNotFound,

    #[error("unsupported-element")]
    UnsupportedElement,

    #[error("tab-id-required")]
    TabIdRequired,

    #[error("unknown-action:{0}")]
    UnknownAction(String),

    // Carriers.
    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Tool(String),
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verbatim_error_strings() {
        assert_eq!(Error::Disconnected.to_string(), "disconnected");
        assert_eq!(Error::BridgeTimeout.to_string(), "mcp-timeout");
        assert_eq!(
            Error::BridgeNotConnected.to_string(),
            "mcp-bridge-not-connected"
        );
        assert_eq!(
            Error::MissingToolName.to_string(),
            "call-tool-missing-name"
        );
        assert_eq!(
            Error::NewPageWithoutUrl.to_string(),
            "blocked-new-page-without-url"
        );
        assert_eq!(
            Error::ForceNewBridgeOff.to_string(),
            "blocked-new-page-force-new-bridge-off"
        );
        assert_eq!(
            Error::UnknownAction("FLY".into()).to_string(),
            "unknown-action:FLY"
        );
        assert_eq!(Error::Tool("boom".into()).to_string(), "boom");
    }
}
