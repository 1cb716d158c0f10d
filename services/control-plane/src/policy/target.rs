//! Policy targets and address normalization

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{Error, Result};

/// A delivery or replication target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Target {
    /// Target type, from a closed set defined by the policy kind
    #[serde(rename = "type")]
    pub kind: String,

    /// Absolute URL of the target
    pub address: String,

    /// Reference to stored credentials, never the credentials themselves
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential_ref: Option<String>,

    /// Allow plain HTTP
    #[serde(default)]
    pub insecure: bool,

    /// Skip TLS certificate verification
    #[serde(default)]
    pub skip_verify: bool,
}

/// Reduce an address to `scheme://host[:port]/path`.
///
/// Credentials, query and fragment are dropped so that a stored address can't
/// smuggle extra request parameters. Normalizing twice gives the same result.
pub fn normalize_address(address: &str) -> Result<String> {
    let url = Url::parse(address.trim())
        .map_err(|error| Error::BadRequest(format!("invalid address {address:?}: {error}")))?;

    let host = match url.host_str() {
        Some(host) if !host.is_empty() => host,
        _ => {
            return Err(Error::BadRequest(format!(
                "address {address:?} has no host"
            )));
        }
    };

    let authority = match url.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_owned(),
    };
    Ok(format!("{}://{authority}{}", url.scheme(), url.path()))
}

impl Target {
    /// Check the target type against `supported` and normalize the address.
    pub fn validate(&mut self, supported: &[&str]) -> Result<()> {
        if !supported.contains(&self.kind.as_str()) {
            return Err(Error::BadRequest(format!(
                "unsupported target type {:?}",
                self.kind
            )));
        }
        self.address = normalize_address(&self.address)?;
        Ok(())
    }

    /// The parsed target address
    pub fn url(&self) -> Result<Url> {
        Url::parse(&self.address)
            .map_err(|error| Error::BadRequest(format!("invalid address: {error}")))
    }
}
