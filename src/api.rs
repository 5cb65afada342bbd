//! Request and response descriptors exchanged between callers, the gateway, and transports.
//!
//! [`ApiRequest`] is what callers hand to the gateway: a method, an endpoint relative to the
//! configured API root, headers, and an optional JSON body. The gateway resolves it into an
//! [`HttpRequest`] per attempt (so a replay carries the refreshed token) and transports answer
//! with an [`ApiResponse`].

// std
use std::ops::RangeInclusive;
// self
use crate::{
	_prelude::*,
	auth::TokenSecret,
	error::{ConfigError, DecodeError},
};

const SUCCESS_STATUS: RangeInclusive<u16> = 200..=299;

/// HTTP methods used by backend resources.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
	/// `GET`
	Get,
	/// `POST`
	Post,
	/// `PUT`
	Put,
	/// `PATCH`
	Patch,
	/// `DELETE`
	Delete,
}
impl Method {
	/// Returns the canonical upper-case method name.
	pub const fn as_str(self) -> &'static str {
		match self {
			Method::Get => "GET",
			Method::Post => "POST",
			Method::Put => "PUT",
			Method::Patch => "PATCH",
			Method::Delete => "DELETE",
		}
	}
}
impl Display for Method {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// One logical call against a backend resource.
///
/// Cloned freely: the gateway re-resolves the same descriptor when it replays a request after
/// a refresh.
#[derive(Clone, Debug, PartialEq)]
pub struct ApiRequest {
	/// HTTP method.
	pub method: Method,
	/// Resource path relative to the API root (e.g., `projects/42`).
	pub endpoint: String,
	/// Extra headers; names are stored lower-cased.
	pub headers: BTreeMap<String, String>,
	/// Optional JSON body.
	pub body: Option<serde_json::Value>,
}
impl ApiRequest {
	/// Creates a request without headers or body.
	pub fn new(method: Method, endpoint: impl Into<String>) -> Self {
		Self { method, endpoint: endpoint.into(), headers: BTreeMap::new(), body: None }
	}

	/// Shorthand for a `GET` request.
	pub fn get(endpoint: impl Into<String>) -> Self {
		Self::new(Method::Get, endpoint)
	}

	/// Shorthand for a `POST` request.
	pub fn post(endpoint: impl Into<String>) -> Self {
		Self::new(Method::Post, endpoint)
	}

	/// Shorthand for a `PUT` request.
	pub fn put(endpoint: impl Into<String>) -> Self {
		Self::new(Method::Put, endpoint)
	}

	/// Shorthand for a `PATCH` request.
	pub fn patch(endpoint: impl Into<String>) -> Self {
		Self::new(Method::Patch, endpoint)
	}

	/// Shorthand for a `DELETE` request.
	pub fn delete(endpoint: impl Into<String>) -> Self {
		Self::new(Method::Delete, endpoint)
	}

	/// Adds or replaces a header.
	pub fn with_header(mut self, name: impl AsRef<str>, value: impl Into<String>) -> Self {
		self.headers.insert(name.as_ref().to_ascii_lowercase(), value.into());

		self
	}

	/// Attaches an already-built JSON body.
	pub fn with_body(mut self, body: serde_json::Value) -> Self {
		self.body = Some(body);

		self
	}

	/// Serializes `body` and attaches it.
	pub fn with_json<T>(self, body: &T) -> Result<Self>
	where
		T: ?Sized + Serialize,
	{
		let value = serde_json::to_value(body).map_err(ConfigError::RequestBody)?;

		Ok(self.with_body(value))
	}

	/// Builds the wire-level request for one attempt, attaching `token` as a bearer credential.
	///
	/// A caller-supplied `authorization` header is overridden whenever a token is present.
	pub fn to_http(&self, url: Url, token: Option<&TokenSecret>) -> Result<HttpRequest> {
		let mut headers = self.headers.clone();

		headers.entry("accept".into()).or_insert_with(|| "application/json".into());

		let body = match &self.body {
			Some(value) => {
				headers
					.entry("content-type".into())
					.or_insert_with(|| "application/json".into());

				Some(serde_json::to_vec(value).map_err(ConfigError::RequestBody)?)
			},
			None => None,
		};

		if let Some(token) = token {
			headers.insert("authorization".into(), token.bearer());
		}

		Ok(HttpRequest { method: self.method, url, headers, body })
	}
}

/// Fully resolved request handed to an [`ApiHttpClient`](crate::http::ApiHttpClient).
#[derive(Clone, PartialEq, Eq)]
pub struct HttpRequest {
	/// HTTP method.
	pub method: Method,
	/// Absolute target URL.
	pub url: Url,
	/// Header map with lower-cased names.
	pub headers: BTreeMap<String, String>,
	/// Serialized body bytes.
	pub body: Option<Vec<u8>>,
}
impl HttpRequest {
	/// Returns the bearer token carried by the request, if any.
	pub fn bearer_token(&self) -> Option<&str> {
		self.headers.get("authorization").and_then(|value| value.strip_prefix("Bearer "))
	}
}
impl Debug for HttpRequest {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("HttpRequest")
			.field("method", &self.method)
			.field("url", &self.url.as_str())
			.field("authorized", &self.headers.contains_key("authorization"))
			.field("body_len", &self.body.as_ref().map(Vec::len))
			.finish()
	}
}

/// Response as observed by the gateway.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ApiResponse {
	/// HTTP status code.
	pub status: u16,
	/// Header map with lower-cased names.
	pub headers: BTreeMap<String, String>,
	/// Raw body bytes.
	pub body: Vec<u8>,
}
impl ApiResponse {
	/// Creates a response from its parts.
	pub fn new(status: u16, headers: BTreeMap<String, String>, body: Vec<u8>) -> Self {
		Self { status, headers, body }
	}

	/// Creates a response carrying a JSON body.
	pub fn json_body(status: u16, body: &serde_json::Value) -> Self {
		let mut headers = BTreeMap::new();

		headers.insert("content-type".into(), "application/json".into());

		Self { status, headers, body: body.to_string().into_bytes() }
	}

	/// Returns `true` for 2xx statuses.
	pub fn is_success(&self) -> bool {
		SUCCESS_STATUS.contains(&self.status)
	}

	/// Looks up a header by case-insensitive name.
	pub fn header(&self, name: &str) -> Option<&str> {
		self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
	}

	/// Returns the body as UTF-8 text, replacing invalid sequences.
	pub fn text(&self) -> String {
		String::from_utf8_lossy(&self.body).into_owned()
	}

	/// Decodes the body as `T`, reporting the failing JSON path on error.
	pub fn json<T>(&self) -> Result<T>
	where
		T: for<'de> Deserialize<'de>,
	{
		let mut de = serde_json::Deserializer::from_slice(&self.body);

		serde_path_to_error::deserialize(&mut de)
			.map_err(|source| DecodeError::Json { source, status: self.status }.into())
	}

	/// Decodes the standard `{ success, message, code, data }` envelope.
	pub fn envelope<T>(&self) -> Result<Envelope<T>>
	where
		T: for<'de> Deserialize<'de>,
	{
		self.json()
	}
}

/// Standard backend response envelope.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope<T> {
	/// Whether the backend considers the call successful.
	#[serde(default)]
	pub success: bool,
	/// Human-readable message.
	#[serde(default)]
	pub message: Option<String>,
	/// Structured error code.
	#[serde(default)]
	pub code: Option<String>,
	/// Payload.
	pub data: Option<T>,
}
