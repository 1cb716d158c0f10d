//! Shared-secret authentication between the core and the job service.
//!
//! Every request to the job service carries `Authorization: Harbor-Secret <secret>`.
//! The secret is held in a [Secret] so that it never shows up in debug output,
//! and in an [ArcSwap] so it can be rotated without rebuilding the client.

use std::borrow::Cow;
use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

use arc_swap::ArcSwap;
use http::header::InvalidHeaderValue;
use http::HeaderValue;
use serde::Deserialize;
use tower::layer::Layer;
use zeroize::Zeroize;

/// Scheme used in the `Authorization` header for core-to-jobservice calls.
pub const SECRET_SCHEME: &str = "Harbor-Secret";

/// A semi-secret string: a shared secret, an access key, a password.
///
/// This wrapper prevents the value from appearing in debug reprs, and
/// zeroes owned values on drop.
///
/// Use [Secret::revealed] to get the underlying value.
#[derive(Clone, PartialEq, Eq, Deserialize)]
#[serde(from = "String")]
pub struct Secret(Cow<'static, str>);

impl Secret {
    /// Expose the underlying value.
    pub fn revealed(&self) -> &str {
        self.0.deref()
    }

    /// Whether the secret is the empty string.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The `Authorization` header value for this secret.
    pub fn authorization(&self) -> Result<HeaderValue, InvalidHeaderValue> {
        let mut header = HeaderValue::try_from(format!("{SECRET_SCHEME} {}", self.revealed()))?;
        header.set_sensitive(true);
        Ok(header)
    }
}

impl Drop for Secret {
    fn drop(&mut self) {
        if let Cow::Owned(ref mut s) = self.0 {
            s.zeroize()
        }
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(****)")
    }
}

impl From<String> for Secret {
    fn from(value: String) -> Self {
        Secret(value.into())
    }
}

impl From<&'static str> for Secret {
    fn from(value: &'static str) -> Self {
        Secret(value.into())
    }
}

/// A layer which stamps the shared secret onto outgoing requests.
#[derive(Debug, Clone)]
pub struct SecretAuthLayer {
    secret: Arc<ArcSwap<Secret>>,
}

impl SecretAuthLayer {
    pub(crate) fn new(secret: Arc<ArcSwap<Secret>>) -> Self {
        Self { secret }
    }
}

impl<S> Layer<S> for SecretAuthLayer {
    type Service = SecretAuthService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        SecretAuthService {
            inner,
            secret: self.secret.clone(),
        }
    }
}

/// A service which stamps the shared secret onto outgoing requests.
#[derive(Debug, Clone)]
pub struct SecretAuthService<S> {
    inner: S,
    secret: Arc<ArcSwap<Secret>>,
}

impl<S, BIn, BOut> tower::Service<http::Request<BIn>> for SecretAuthService<S>
where
    S: tower::Service<http::Request<BIn>, Response = http::Response<BOut>>,
    S::Future: Send + 'static,
{
    type Response = http::Response<BOut>;
    type Error = S::Error;
    type Future = S::Future;

    fn poll_ready(
        &mut self,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: http::Request<BIn>) -> Self::Future {
        if req.headers().contains_key(http::header::AUTHORIZATION) {
            tracing::warn!("{} header already set", http::header::AUTHORIZATION);
        } else {
            match self.secret.load().authorization() {
                Ok(value) => {
                    req.headers_mut().insert(http::header::AUTHORIZATION, value);
                }
                Err(_) => tracing::error!("job service secret is not a valid header value"),
            }
        }
        self.inner.call(req)
    }
}
