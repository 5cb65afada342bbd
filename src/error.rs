//! Gateway-level error types shared by the request, refresh, and storage layers.

// self
use crate::_prelude::*;

/// Gateway-wide result type alias returning [`Error`] by default.
pub type Result<T, E = Error> = std::result::Result<T, E>;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Canonical gateway error exposed by public APIs.
#[derive(Debug, ThisError)]
pub enum Error {
	/// Credential store failure outside the refresh path.
	#[error("{0}")]
	Storage(
		#[from]
		#[source]
		crate::store::StoreError,
	),
	/// Local configuration or request construction problem.
	#[error(transparent)]
	Config(#[from] ConfigError),
	/// Transport failure (DNS, TCP, TLS, timeout).
	#[error(transparent)]
	Transport(#[from] TransportError),
	/// Response body could not be decoded.
	#[error(transparent)]
	Decode(#[from] DecodeError),

	/// The session cannot be recovered; the caller must sign in again.
	#[error("Session expired: {reason}.")]
	SessionExpired {
		/// Why recovery was impossible.
		reason: SessionExpiredReason,
	},
	/// Backend answered with a non-2xx status or `success: false`.
	///
	/// Only produced by helpers that decode the response envelope.
	#[error("Backend rejected the request with status {status}: {}.", .message.as_deref().unwrap_or("no message"))]
	Api {
		/// HTTP status code.
		status: u16,
		/// Structured error code, when the backend supplied one.
		code: Option<String>,
		/// Human-readable message, when the backend supplied one.
		message: Option<String>,
	},
}
impl Error {
	/// Returns `true` when the error means the user must sign in again.
	pub fn is_session_expired(&self) -> bool {
		matches!(self, Self::SessionExpired { .. })
	}
}

impl From<crate::config::GatewayConfigError> for Error {
	fn from(e: crate::config::GatewayConfigError) -> Self {
		Self::Config(e.into())
	}
}

/// Why an expired session could not be recovered.
///
/// The value is cloned to every request that was waiting on the failed refresh.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ThisError)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum SessionExpiredReason {
	/// No refresh token was available in the credential store.
	#[error("no refresh token is available")]
	MissingRefreshToken,
	/// The refresh endpoint answered with an error.
	#[error("the refresh endpoint rejected the refresh token ({})", .message.as_deref().unwrap_or("no message"))]
	RefreshRejected {
		/// HTTP status code, when available.
		status: Option<u16>,
		/// Backend-supplied message, when available.
		message: Option<String>,
	},
	/// The refresh endpoint could not be reached.
	#[error("the refresh endpoint is unreachable: {message}")]
	RefreshUnreachable {
		/// Transport failure summary.
		message: String,
	},
	/// The refresh endpoint answered with a body that does not match the contract.
	#[error("the refresh endpoint returned a malformed response: {message}")]
	MalformedRefreshResponse {
		/// Parsing failure summary.
		message: String,
	},
	/// The refresh call exceeded the configured timeout.
	#[error("the refresh call timed out")]
	RefreshTimedOut,
	/// The refreshing task was dropped before it finished.
	#[error("the refresh was abandoned before it completed")]
	RefreshAbandoned,
	/// Refreshed credentials could not be read or persisted.
	#[error("the credential store is unavailable: {message}")]
	StoreUnavailable {
		/// Store failure summary.
		message: String,
	},
	/// The backend rejected the freshly minted access token as expired.
	#[error("the backend rejected the refreshed access token")]
	RejectedAfterRefresh,
}

/// Configuration and request construction failures.
#[derive(Debug, ThisError)]
pub enum ConfigError {
	/// HTTP client could not be constructed.
	#[error("HTTP client could not be constructed.")]
	HttpClientBuild {
		/// Underlying transport builder failure.
		#[source]
		source: BoxError,
	},
	/// Gateway configuration failed validation.
	#[error(transparent)]
	Gateway(#[from] crate::config::GatewayConfigError),
	/// Endpoint cannot be joined onto the configured base URL.
	#[error("Endpoint `{endpoint}` does not form a valid URL.")]
	InvalidEndpoint {
		/// Endpoint path supplied by the caller.
		endpoint: String,
		/// Underlying parsing failure.
		#[source]
		source: url::ParseError,
	},
	/// Request body could not be serialized to JSON.
	#[error("Request body could not be serialized.")]
	RequestBody(#[source] serde_json::Error),
}
impl ConfigError {
	/// Wraps a transport's builder failure inside [`ConfigError`].
	pub fn http_client_build(src: impl 'static + Send + Sync + std::error::Error) -> Self {
		Self::HttpClientBuild { source: Box::new(src) }
	}
}
#[cfg(feature = "reqwest")]
impl From<ReqwestError> for ConfigError {
	fn from(e: ReqwestError) -> Self {
		Self::http_client_build(e)
	}
}

/// Transport-level failures (network, IO).
#[derive(Debug, ThisError)]
pub enum TransportError {
	/// Underlying HTTP client reported a network failure.
	#[error("Network error occurred while calling the backend.")]
	Network {
		/// Transport-specific network error.
		#[source]
		source: BoxError,
	},
	/// Underlying IO failure surfaced during transport.
	#[error("I/O error occurred while calling the backend.")]
	Io(#[from] std::io::Error),
}
impl TransportError {
	/// Wraps a transport-specific network error.
	pub fn network(src: impl 'static + Send + Sync + std::error::Error) -> Self {
		Self::Network { source: Box::new(src) }
	}
}
#[cfg(feature = "reqwest")]
impl From<ReqwestError> for TransportError {
	fn from(e: ReqwestError) -> Self {
		Self::network(e)
	}
}

/// Response decoding failures.
#[derive(Debug, ThisError)]
pub enum DecodeError {
	/// Body is not valid JSON for the requested type.
	#[error("Response with status {status} carried malformed JSON.")]
	Json {
		/// Structured parsing failure, including the offending path.
		#[source]
		source: serde_path_to_error::Error<serde_json::Error>,
		/// HTTP status code of the response.
		status: u16,
	},
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn session_expired_is_distinguishable() {
		let err = Error::SessionExpired { reason: SessionExpiredReason::RefreshTimedOut };

		assert!(err.is_session_expired());
		assert_eq!(err.to_string(), "Session expired: the refresh call timed out.");

		let err = Error::Api { status: 403, code: None, message: Some("forbidden".into()) };

		assert!(!err.is_session_expired());
	}

	#[test]
	fn rejected_reason_renders_backend_message() {
		let reason = SessionExpiredReason::RefreshRejected {
			status: Some(401),
			message: Some("Invalid refresh token".into()),
		};

		assert_eq!(
			reason.to_string(),
			"the refresh endpoint rejected the refresh token (Invalid refresh token)"
		);
	}
}
