//! Error types for the MCP auth playground
//!
//! This module defines every error the flow can surface, using `thiserror`
//! for the enum and `anyhow` for propagation.

use thiserror::Error;

/// Main error type for playground operations
///
/// Variants are grouped by how a user recovers from them: transport errors
/// usually mean switching request mode, protocol errors mean the remote
/// server answered with something unusable, and validation errors are
/// caught locally before anything goes on the wire.
#[derive(Error, Debug)]
pub enum PlaygroundError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// The target could not be reached from the direct channel
    #[error(
        "CORS error: The server at {origin} doesn't allow direct requests. \
         Switch to Proxy or Extension mode to access this server."
    )]
    CrossOrigin {
        /// Origin of the request that failed
        origin: String,
    },

    /// Generic transport failure (relay unreachable, bridge closed, ...)
    #[error("Transport error: {0}")]
    Transport(String),

    /// Extension mode was requested but no bridge is ready
    #[error("Extension bridge is not available")]
    ExtensionUnavailable,

    /// The bridge did not answer in time
    #[error("Extension request timed out after {seconds}s")]
    ExtensionTimeout {
        /// Configured timeout
        seconds: u64,
    },

    /// The bridge answered with an error payload
    #[error("Extension bridge error: {0}")]
    Bridge(String),

    /// The remote server answered with something unusable
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The callback `state` did not match the one generated for this flow
    #[error("State mismatch! Possible CSRF attack.")]
    StateMismatch {
        /// State generated during preparation
        expected: String,
        /// State carried by the callback, if any
        received: Option<String>,
    },

    /// The authorization server redirected back with an `error` parameter
    #[error("Authorization error: {error}")]
    AuthorizationDenied {
        /// OAuth error code
        error: String,
        /// Optional human-readable description
        description: Option<String>,
    },

    /// The token endpoint answered with an OAuth error body
    #[error("Token error: {error} - {}", description.as_deref().unwrap_or(""))]
    TokenEndpoint {
        /// OAuth error code
        error: String,
        /// Optional human-readable description
        description: Option<String>,
    },

    /// The authorization server metadata has no registration endpoint
    #[error("Authorization server does not support dynamic client registration")]
    RegistrationUnsupported,

    /// Dynamic client registration was rejected
    #[error("Client registration failed with HTTP {status}")]
    RegistrationFailed {
        /// Status returned by the registration endpoint
        status: u16,
    },

    /// Client credentials already exist for this flow
    #[error("Client already registered as {client_id}; reset to start over")]
    ClientAlreadyRegistered {
        /// Existing client identifier
        client_id: String,
    },

    /// Navigation beyond the furthest reachable step
    #[error("Step {requested} is locked (furthest reachable step is {furthest})")]
    StepLocked {
        /// Step that was requested
        requested: u8,
        /// Furthest reachable step
        furthest: u8,
    },

    /// The gate for leaving a step is not satisfied
    #[error("Cannot leave step {step}: {requirement}")]
    GateNotSatisfied {
        /// Step being left
        step: u8,
        /// What the gate requires
        requirement: &'static str,
    },

    /// The requested tool was not returned by `tools/list`
    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    /// Tool arguments are not a JSON object
    #[error("Invalid JSON in tool arguments: {0}")]
    InvalidToolArguments(String),

    /// Other locally rejected input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// State persistence errors
    #[error("Storage error: {0}")]
    Storage(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// YAML parsing errors
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// HTTP request errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// URL parsing errors
    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),
}

impl PlaygroundError {
    /// Whether switching request mode is the likely remedy
    pub fn suggests_mode_switch(&self) -> bool {
        matches!(
            self,
            PlaygroundError::CrossOrigin { .. }
                | PlaygroundError::ExtensionUnavailable
                | PlaygroundError::ExtensionTimeout { .. }
        )
    }
}

/// Result type alias for playground operations
///
/// This is a convenience alias that uses `anyhow::Error` as the error type,
/// allowing for rich error context and easy error propagation.
pub type Result<T> = anyhow::Result<T>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_display() {
        let error = PlaygroundError::Config("invalid format".to_string());
        assert_eq!(error.to_string(), "Configuration error: invalid format");
    }

    #[test]
    fn test_cross_origin_error_names_origin_and_remedy() {
        let error = PlaygroundError::CrossOrigin {
            origin: "https://mcp.example.com".to_string(),
        };
        let s = error.to_string();
        assert!(s.starts_with("CORS error"));
        assert!(s.contains("https://mcp.example.com"));
        assert!(s.contains("Switch to Proxy or Extension mode"));
        assert!(error.suggests_mode_switch());
    }

    #[test]
    fn test_state_mismatch_display() {
        let error = PlaygroundError::StateMismatch {
            expected: "abc".to_string(),
            received: Some("xyz".to_string()),
        };
        assert_eq!(error.to_string(), "State mismatch! Possible CSRF attack.");
        assert!(!error.suggests_mode_switch());
    }

    #[test]
    fn test_token_error_display() {
        let error = PlaygroundError::TokenEndpoint {
            error: "invalid_grant".to_string(),
            description: Some("code expired".to_string()),
        };
        assert_eq!(error.to_string(), "Token error: invalid_grant - code expired");

        let bare = PlaygroundError::TokenEndpoint {
            error: "invalid_client".to_string(),
            description: None,
        };
        assert_eq!(bare.to_string(), "Token error: invalid_client - ");
    }

    #[test]
    fn test_authorization_denied_display() {
        let error = PlaygroundError::AuthorizationDenied {
            error: "access_denied".to_string(),
            description: None,
        };
        assert_eq!(error.to_string(), "Authorization error: access_denied");
    }

    #[test]
    fn test_step_locked_display() {
        let error = PlaygroundError::StepLocked {
            requested: 6,
            furthest: 3,
        };
        assert!(error.to_string().contains("Step 6 is locked"));
        assert!(error.to_string().contains("is 3"));
    }

    #[test]
    fn test_extension_timeout_display() {
        let error = PlaygroundError::ExtensionTimeout { seconds: 30 };
        assert_eq!(error.to_string(), "Extension request timed out after 30s");
        assert!(error.suggests_mode_switch());
    }

    #[test]
    fn test_io_error_conversion() {
        let io_error = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let error: PlaygroundError = io_error.into();
        assert!(matches!(error, PlaygroundError::Io(_)));
    }

    #[test]
    fn test_json_error_conversion() {
        let json_error = serde_json::from_str::<serde_json::Value>("{invalid json}").unwrap_err();
        let error: PlaygroundError = json_error.into();
        assert!(matches!(error, PlaygroundError::Serialization(_)));
    }

    #[test]
    fn test_yaml_error_conversion() {
        let yaml_error = serde_yaml::from_str::<serde_yaml::Value>("invalid: : yaml").unwrap_err();
        let error: PlaygroundError = yaml_error.into();
        assert!(matches!(error, PlaygroundError::Yaml(_)));
    }

    #[test]
    fn test_url_error_conversion() {
        let url_error = url::Url::parse("not a url").unwrap_err();
        let error: PlaygroundError = url_error.into();
        assert!(matches!(error, PlaygroundError::Url(_)));
    }

    #[test]
    fn test_error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<PlaygroundError>();
    }
}
