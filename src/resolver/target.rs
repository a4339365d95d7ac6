//! Dial target syntax: `<scheme>://<serviceName>/<ignored-path>?schema=<endpointSchemaPrefix>`.

use url::Url;

/// Endpoint scheme preferred when the target does not name one.
pub const DEFAULT_ENDPOINT_SCHEMA: &str = "grpc://";

/// Errors produced while parsing a dial target.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TargetError {
    #[error("could not parse target {target}: {reason}")]
    Malformed { target: String, reason: String },
    #[error("could not parse target {0}: invalid authority")]
    InvalidAuthority(String),
    #[error("could not parse target {0}: invalid endpoint")]
    InvalidEndpoint(String),
    #[error("target scheme {found} is not served by resolver scheme {expected}")]
    SchemeMismatch { expected: String, found: String },
}

/// A parsed dial target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub scheme: String,
    pub service_name: String,
    /// Endpoint scheme prefix selected by the `schema` query parameter.
    pub endpoint_schema: String,
}

impl Target {
    /// Parse a target string.
    pub fn parse(target: &str) -> Result<Self, TargetError> {
        let url = Url::parse(target).map_err(|e| TargetError::Malformed {
            target: target.to_string(),
            reason: e.to_string(),
        })?;

        let service_name = match url.host_str() {
            Some(host) if !host.is_empty() => host.to_string(),
            _ => return Err(TargetError::InvalidAuthority(target.to_string())),
        };
        if url.path().is_empty() {
            return Err(TargetError::InvalidEndpoint(target.to_string()));
        }

        let endpoint_schema = url
            .query_pairs()
            .find(|(k, _)| k == "schema")
            .map(|(_, v)| v.into_owned())
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| DEFAULT_ENDPOINT_SCHEMA.to_string());

        Ok(Self {
            scheme: url.scheme().to_string(),
            service_name,
            endpoint_schema,
        })
    }

    /// Render a target string for `service_name`.
    pub fn format(scheme: &str, service_name: &str, endpoint_schema: &str) -> String {
        let query: String = url::form_urlencoded::Serializer::new(String::new())
            .append_pair("schema", endpoint_schema)
            .finish();
        format!("{scheme}://{service_name}/?{query}")
    }
}
