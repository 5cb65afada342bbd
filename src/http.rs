//! Transport primitives for backend calls.
//!
//! [`ApiHttpClient`] is the gateway's only dependency on an HTTP stack. The crate ships a
//! reqwest-backed implementation; tests and embedders can plug in their own transport as long
//! as it turns an [`HttpRequest`] into an [`ApiResponse`] without interpreting the status code.

// std
#[cfg(feature = "reqwest")] use std::ops::Deref;
// self
use crate::{
	_prelude::*,
	api::{ApiResponse, HttpRequest},
};
#[cfg(feature = "reqwest")]
use crate::{api::Method, error::ConfigError};

/// Boxed future returned by [`ApiHttpClient::send`].
pub type HttpFuture<'a, E> = Pin<Box<dyn Future<Output = Result<ApiResponse, E>> + 'a + Send>>;

/// Abstraction over HTTP transports used by the gateway.
///
/// Implementations must return every HTTP response, including 4xx and 5xx, as
/// `Ok(ApiResponse)`. Only failures that prevented a response from arriving (DNS, connect,
/// TLS, reset, client-side timeout) belong in `Err`. The gateway relies on this to tell a
/// token-expiry 401 apart from transport failures, which it never retries.
pub trait ApiHttpClient
where
	Self: 'static + Send + Sync,
{
	/// Concrete error emitted by the underlying transport.
	type TransportError: 'static + Send + Sync + StdError;

	/// Sends one request and resolves with the raw response.
	fn send(&self, request: HttpRequest) -> HttpFuture<'_, Self::TransportError>;
}

/// Thin wrapper around [`ReqwestClient`] so shared HTTP behavior lives in one place.
#[cfg(feature = "reqwest")]
#[derive(Clone, Debug, Default)]
pub struct ReqwestHttpClient(pub ReqwestClient);
#[cfg(feature = "reqwest")]
impl ReqwestHttpClient {
	/// Wraps an existing reqwest [`ReqwestClient`].
	pub fn with_client(client: ReqwestClient) -> Self {
		Self(client)
	}

	/// Builds a client whose requests are bounded by `timeout`.
	pub fn with_timeout(timeout: Duration) -> Result<Self, ConfigError> {
		let client = ReqwestClient::builder().timeout(timeout.unsigned_abs()).build()?;

		Ok(Self(client))
	}
}
#[cfg(feature = "reqwest")]
impl AsRef<ReqwestClient> for ReqwestHttpClient {
	fn as_ref(&self) -> &ReqwestClient {
		&self.0
	}
}
#[cfg(feature = "reqwest")]
impl Deref for ReqwestHttpClient {
	type Target = ReqwestClient;

	fn deref(&self) -> &Self::Target {
		&self.0
	}
}
#[cfg(feature = "reqwest")]
impl ApiHttpClient for ReqwestHttpClient {
	type TransportError = ReqwestError;

	fn send(&self, request: HttpRequest) -> HttpFuture<'_, Self::TransportError> {
		Box::pin(async move {
			let HttpRequest { method, url, headers, body } = request;
			let mut builder = self.0.request(reqwest_method(method), url);

			for (name, value) in &headers {
				builder = builder.header(name.as_str(), value.as_str());
			}
			if let Some(body) = body {
				builder = builder.body(body);
			}

			let response = builder.send().await?;
			let status = response.status().as_u16();
			let headers = collect_headers(response.headers());
			let body = response.bytes().await?.to_vec();

			Ok(ApiResponse::new(status, headers, body))
		})
	}
}

#[cfg(feature = "reqwest")]
fn reqwest_method(method: Method) -> reqwest::Method {
	match method {
		Method::Get => reqwest::Method::GET,
		Method::Post => reqwest::Method::POST,
		Method::Put => reqwest::Method::PUT,
		Method::Patch => reqwest::Method::PATCH,
		Method::Delete => reqwest::Method::DELETE,
	}
}

#[cfg(feature = "reqwest")]
fn collect_headers(headers: &reqwest::header::HeaderMap) -> BTreeMap<String, String> {
	let mut collected = BTreeMap::new();

	for (name, value) in headers {
		// Non-UTF-8 header values carry nothing the gateway inspects.
		if let Ok(value) = value.to_str() {
			collected.insert(name.as_str().to_owned(), value.to_owned());
		}
	}

	collected
}
