//! Refresh endpoint client: trades a refresh token for a new access token.

// self
use crate::{
	_prelude::*,
	api::{ApiResponse, Envelope, HttpRequest, Method},
	auth::TokenSecret,
	error::{SessionExpiredReason, TransportError},
	http::ApiHttpClient,
};

/// Boxed future returned by [`TokenRefresher::refresh`].
pub type RefreshFuture<'a> =
	Pin<Box<dyn Future<Output = Result<RefreshedTokens, RefreshError>> + 'a + Send>>;

/// Contract for anything able to mint a new access token from a refresh token.
pub trait TokenRefresher
where
	Self: Send + Sync,
{
	/// Calls the refresh endpoint once. Implementations must not retry.
	fn refresh<'a>(&'a self, refresh_token: &'a TokenSecret) -> RefreshFuture<'a>;
}

/// Tokens returned by a successful refresh.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RefreshedTokens {
	/// Newly minted access token.
	pub access_token: TokenSecret,
	/// Rotated refresh token, when the backend issues one.
	pub refresh_token: Option<TokenSecret>,
}

/// Failures reported by a [`TokenRefresher`].
#[derive(Debug, ThisError)]
pub enum RefreshError {
	/// Non-2xx status or `success: false`.
	#[error("Refresh endpoint rejected the refresh token with status {status}.")]
	Rejected {
		/// HTTP status code.
		status: u16,
		/// Backend-supplied message, when available.
		message: Option<String>,
	},
	/// The endpoint could not be reached.
	#[error(transparent)]
	Transport(#[from] TransportError),
	/// The success body does not match the contract.
	#[error("Refresh endpoint returned malformed JSON.")]
	Malformed {
		/// Structured parsing failure.
		#[source]
		source: serde_path_to_error::Error<serde_json::Error>,
		/// HTTP status code.
		status: u16,
	},
	/// The success body lacks `data.accessToken`.
	#[error("Refresh response is missing data.accessToken.")]
	MissingAccessToken,
	/// The request body could not be encoded.
	#[error("Refresh request body could not be encoded.")]
	Encode(#[source] serde_json::Error),
}
impl From<RefreshError> for SessionExpiredReason {
	fn from(err: RefreshError) -> Self {
		match err {
			RefreshError::Rejected { status, message } =>
				Self::RefreshRejected { status: Some(status), message },
			RefreshError::Transport(e) => Self::RefreshUnreachable { message: error_chain(&e) },
			RefreshError::Malformed { source, .. } =>
				Self::MalformedRefreshResponse { message: source.to_string() },
			RefreshError::MissingAccessToken =>
				Self::MalformedRefreshResponse { message: "missing data.accessToken".into() },
			RefreshError::Encode(e) => Self::MalformedRefreshResponse { message: e.to_string() },
		}
	}
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RefreshRequestBody<'a> {
	refresh_token: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RefreshData {
	#[serde(default)]
	access_token: Option<String>,
	#[serde(default)]
	refresh_token: Option<String>,
}

/// [`TokenRefresher`] that posts `{ "refreshToken": ... }` to the backend's refresh endpoint.
pub struct HttpTokenRefresher<C>
where
	C: ?Sized + ApiHttpClient,
{
	http_client: Arc<C>,
	url: Url,
}
impl<C> HttpTokenRefresher<C>
where
	C: ?Sized + ApiHttpClient,
{
	/// Creates a refresher that calls `url` through `http_client`.
	pub fn new(http_client: impl Into<Arc<C>>, url: Url) -> Self {
		Self { http_client: http_client.into(), url }
	}

	/// Target URL of the refresh call.
	pub fn url(&self) -> &Url {
		&self.url
	}

	fn build_request(&self, refresh_token: &TokenSecret) -> Result<HttpRequest, RefreshError> {
		let body = serde_json::to_vec(&RefreshRequestBody { refresh_token: refresh_token.expose() })
			.map_err(RefreshError::Encode)?;
		let mut headers = BTreeMap::new();

		headers.insert("accept".into(), "application/json".into());
		headers.insert("content-type".into(), "application/json".into());

		Ok(HttpRequest { method: Method::Post, url: self.url.clone(), headers, body: Some(body) })
	}
}
impl<C> TokenRefresher for HttpTokenRefresher<C>
where
	C: ?Sized + ApiHttpClient,
{
	fn refresh<'a>(&'a self, refresh_token: &'a TokenSecret) -> RefreshFuture<'a> {
		Box::pin(async move {
			let request = self.build_request(refresh_token)?;
			let response =
				self.http_client.send(request).await.map_err(TransportError::network)?;

			parse_refresh_response(&response)
		})
	}
}
impl<C> Debug for HttpTokenRefresher<C>
where
	C: ?Sized + ApiHttpClient,
{
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("HttpTokenRefresher").field("url", &self.url.as_str()).finish()
	}
}

fn parse_refresh_response(response: &ApiResponse) -> Result<RefreshedTokens, RefreshError> {
	let status = response.status;

	if !response.is_success() {
		let message = serde_json::from_slice::<Envelope<serde::de::IgnoredAny>>(&response.body)
			.ok()
			.and_then(|envelope| envelope.message);

		return Err(RefreshError::Rejected { status, message });
	}

	let mut de = serde_json::Deserializer::from_slice(&response.body);
	let envelope: Envelope<RefreshData> = serde_path_to_error::deserialize(&mut de)
		.map_err(|source| RefreshError::Malformed { source, status })?;

	if !envelope.success {
		return Err(RefreshError::Rejected { status, message: envelope.message });
	}

	let data = envelope.data.ok_or(RefreshError::MissingAccessToken)?;
	let access_token = data
		.access_token
		.filter(|token| !token.is_empty())
		.ok_or(RefreshError::MissingAccessToken)?;

	Ok(RefreshedTokens {
		access_token: TokenSecret::new(access_token),
		refresh_token: data.refresh_token.filter(|token| !token.is_empty()).map(TokenSecret::new),
	})
}

fn error_chain(err: &dyn StdError) -> String {
	let mut message = err.to_string();
	let mut source = err.source();

	while let Some(inner) = source {
		message.push_str(": ");
		message.push_str(&inner.to_string());

		source = inner.source();
	}

	message
}
