//! Gateway configuration: where the API lives and how long refreshes may take.

// self
use crate::{_prelude::*, error::ConfigError};

/// Errors raised while constructing or validating a [`GatewayConfig`].
#[derive(Debug, PartialEq, Eq, ThisError)]
pub enum GatewayConfigError {
	/// Only `http` and `https` bases are supported.
	#[error("The base URL must use http or https: {url}.")]
	UnsupportedScheme {
		/// Base URL that failed validation.
		url: String,
	},
	/// Plain HTTP is only accepted for loopback hosts unless explicitly allowed.
	#[error("The base URL must use HTTPS for non-loopback hosts: {url}.")]
	InsecureBaseUrl {
		/// Base URL that failed validation.
		url: String,
	},
	/// The base URL cannot carry a path (e.g., `mailto:`).
	#[error("The base URL cannot be used as a base: {url}.")]
	CannotBeABase {
		/// Base URL that failed validation.
		url: String,
	},
	/// The refresh endpoint path is empty.
	#[error("The refresh endpoint path must not be empty.")]
	EmptyRefreshEndpoint,
	/// A timeout is zero or negative.
	#[error("The {name} timeout must be positive.")]
	NonPositiveTimeout {
		/// Which timeout failed validation.
		name: &'static str,
	},
}

/// Validated gateway configuration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayConfig {
	/// Origin (and optional path prefix) of the backend, e.g. `https://app.example.com`.
	pub base_url: Url,
	/// Path segment(s) between the base and every resource (default `api`).
	pub api_prefix: String,
	/// Refresh endpoint relative to the API root (default `auth/refresh-token`).
	pub refresh_endpoint: String,
	/// Upper bound for a single refresh call.
	pub refresh_timeout: Duration,
	/// Upper bound applied by the built-in transport to every request.
	pub request_timeout: Duration,
	/// Accept plain HTTP for non-loopback hosts.
	pub allow_insecure_http: bool,
}
impl GatewayConfig {
	/// Default API prefix.
	pub const DEFAULT_API_PREFIX: &'static str = "api";
	/// Default refresh endpoint.
	pub const DEFAULT_REFRESH_ENDPOINT: &'static str = "auth/refresh-token";
	/// Default refresh timeout.
	pub const DEFAULT_REFRESH_TIMEOUT: Duration = Duration::seconds(10);
	/// Default request timeout.
	pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::seconds(30);

	/// Creates a new builder rooted at `base_url`.
	pub fn builder(base_url: Url) -> GatewayConfigBuilder {
		GatewayConfigBuilder::new(base_url)
	}

	/// Re-validates a config obtained through deserialization.
	pub fn validate(&self) -> Result<(), GatewayConfigError> {
		let url = || self.base_url.to_string();

		match self.base_url.scheme() {
			"https" => {},
			"http" if self.allow_insecure_http || is_loopback(&self.base_url) => {},
			"http" => return Err(GatewayConfigError::InsecureBaseUrl { url: url() }),
			_ => return Err(GatewayConfigError::UnsupportedScheme { url: url() }),
		}

		if self.base_url.cannot_be_a_base() {
			return Err(GatewayConfigError::CannotBeABase { url: url() });
		}
		if self.refresh_endpoint.trim_matches('/').is_empty() {
			return Err(GatewayConfigError::EmptyRefreshEndpoint);
		}
		if !self.refresh_timeout.is_positive() {
			return Err(GatewayConfigError::NonPositiveTimeout { name: "refresh" });
		}
		if !self.request_timeout.is_positive() {
			return Err(GatewayConfigError::NonPositiveTimeout { name: "request" });
		}

		Ok(())
	}

	/// Resolves `endpoint` (optionally carrying a query string) against the API root.
	pub fn resolve(&self, endpoint: &str) -> Result<Url, ConfigError> {
		let base = self.base_url.as_str().trim_end_matches('/');
		let prefix = self.api_prefix.trim_matches('/');
		let path = endpoint.trim_start_matches('/');
		let joined = if prefix.is_empty() {
			format!("{base}/{path}")
		} else {
			format!("{base}/{prefix}/{path}")
		};

		Url::parse(&joined)
			.map_err(|source| ConfigError::InvalidEndpoint { endpoint: endpoint.to_owned(), source })
	}

	/// Absolute URL of the refresh endpoint.
	pub fn refresh_url(&self) -> Result<Url, ConfigError> {
		self.resolve(&self.refresh_endpoint)
	}
}

/// Builder for [`GatewayConfig`] values.
#[derive(Debug)]
pub struct GatewayConfigBuilder {
	config: GatewayConfig,
}
impl GatewayConfigBuilder {
	/// Creates a builder with defaults for everything but the base URL.
	pub fn new(base_url: Url) -> Self {
		Self {
			config: GatewayConfig {
				base_url,
				api_prefix: GatewayConfig::DEFAULT_API_PREFIX.into(),
				refresh_endpoint: GatewayConfig::DEFAULT_REFRESH_ENDPOINT.into(),
				refresh_timeout: GatewayConfig::DEFAULT_REFRESH_TIMEOUT,
				request_timeout: GatewayConfig::DEFAULT_REQUEST_TIMEOUT,
				allow_insecure_http: false,
			},
		}
	}

	/// Overrides the API prefix; pass `""` for backends mounted at the root.
	pub fn api_prefix(mut self, prefix: impl Into<String>) -> Self {
		self.config.api_prefix = prefix.into();

		self
	}

	/// Overrides the refresh endpoint path.
	pub fn refresh_endpoint(mut self, endpoint: impl Into<String>) -> Self {
		self.config.refresh_endpoint = endpoint.into();

		self
	}

	/// Overrides the refresh timeout.
	pub fn refresh_timeout(mut self, timeout: Duration) -> Self {
		self.config.refresh_timeout = timeout;

		self
	}

	/// Overrides the per-request timeout of the built-in transport.
	pub fn request_timeout(mut self, timeout: Duration) -> Self {
		self.config.request_timeout = timeout;

		self
	}

	/// Accepts plain HTTP for non-loopback hosts.
	pub fn allow_insecure_http(mut self, allow: bool) -> Self {
		self.config.allow_insecure_http = allow;

		self
	}

	/// Consumes the builder and validates the resulting config.
	pub fn build(self) -> Result<GatewayConfig, GatewayConfigError> {
		self.config.validate()?;

		Ok(self.config)
	}
}

fn is_loopback(url: &Url) -> bool {
	match url.host() {
		Some(url::Host::Domain(domain)) => domain.eq_ignore_ascii_case("localhost"),
		Some(url::Host::Ipv4(ip)) => ip.is_loopback(),
		Some(url::Host::Ipv6(ip)) => ip.is_loopback(),
		None => false,
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	fn url(value: &str) -> Url {
		Url::parse(value).expect("Failed to parse config fixture URL.")
	}

	#[test]
	fn resolve_joins_prefix_and_endpoint() {
		let config = GatewayConfig::builder(url("https://app.example.com/"))
			.build()
			.expect("Default config should validate.");

		assert_eq!(
			config.resolve("/projects/42?view=full").expect("Endpoint should resolve.").as_str(),
			"https://app.example.com/api/projects/42?view=full"
		);
		assert_eq!(
			config.refresh_url().expect("Refresh endpoint should resolve.").as_str(),
			"https://app.example.com/api/auth/refresh-token"
		);

		let rooted = GatewayConfig::builder(url("https://app.example.com/v2"))
			.api_prefix("")
			.build()
			.expect("Rooted config should validate.");

		assert_eq!(
			rooted.resolve("cart").expect("Endpoint should resolve.").as_str(),
			"https://app.example.com/v2/cart"
		);
	}

	#[test]
	fn insecure_bases_are_rejected_unless_loopback_or_allowed() {
		let err = GatewayConfig::builder(url("http://app.example.com"))
			.build()
			.expect_err("Plain HTTP should be rejected for public hosts.");

		assert!(matches!(err, GatewayConfigError::InsecureBaseUrl { .. }));

		GatewayConfig::builder(url("http://127.0.0.1:8080"))
			.build()
			.expect("Loopback hosts may use plain HTTP.");
		GatewayConfig::builder(url("http://app.example.com"))
			.allow_insecure_http(true)
			.build()
			.expect("Explicit opt-in should allow plain HTTP.");

		let err = GatewayConfig::builder(url("ftp://app.example.com"))
			.build()
			.expect_err("Non-HTTP schemes should be rejected.");

		assert!(matches!(err, GatewayConfigError::UnsupportedScheme { .. }));
	}

	#[test]
	fn timeouts_and_refresh_endpoint_are_validated() {
		let err = GatewayConfig::builder(url("https://app.example.com"))
			.refresh_timeout(Duration::ZERO)
			.build()
			.expect_err("Zero refresh timeout should be rejected.");

		assert_eq!(err, GatewayConfigError::NonPositiveTimeout { name: "refresh" });

		let err = GatewayConfig::builder(url("https://app.example.com"))
			.refresh_endpoint("/")
			.build()
			.expect_err("Empty refresh endpoint should be rejected.");

		assert_eq!(err, GatewayConfigError::EmptyRefreshEndpoint);
	}
}
