//! Classifier hooks that decide whether a 401 means "access token expired".
//!
//! Only an expiry signal triggers the refresh protocol; any other 401 (bad credentials, revoked
//! session) is returned to the caller untouched. Backends should supply a structured error
//! `code`; the message-text fallback exists for backends that only report prose.

// self
use crate::{
	_prelude::*,
	api::{ApiResponse, Envelope},
};

/// How the gateway should treat a 401 response.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResponseClass {
	/// The access token expired; recovery is possible.
	TokenExpired,
	/// Any other authentication failure; hand the response back to the caller.
	Passthrough,
}

/// Strategy hook that decides whether a 401 signals token expiry.
pub trait ExpiryClassifier: Send + Sync {
	/// Classifies a 401 response.
	fn classify(&self, ctx: &ExpiryContext) -> ResponseClass;
}

/// Primitive view of a 401 response handed to an [`ExpiryClassifier`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ExpiryContext {
	/// HTTP status code.
	pub status: u16,
	/// Structured `code` field from the response envelope.
	pub code: Option<String>,
	/// `message` field from the response envelope.
	pub message: Option<String>,
	/// Raw `WWW-Authenticate` challenge, if any.
	pub challenge: Option<String>,
}
impl ExpiryContext {
	/// Creates a context for the provided status without any body hints.
	pub fn new(status: u16) -> Self {
		Self { status, ..Default::default() }
	}

	/// Extracts the envelope fields leniently; bodies that are not JSON yield no hints.
	pub fn from_response(response: &ApiResponse) -> Self {
		let envelope =
			serde_json::from_slice::<Envelope<serde::de::IgnoredAny>>(&response.body).ok();
		let (code, message) = match envelope {
			Some(envelope) => (envelope.code, envelope.message),
			None => (None, None),
		};

		Self {
			status: response.status,
			code,
			message,
			challenge: response.header("www-authenticate").map(str::to_owned),
		}
	}

	/// Adds a structured error code.
	pub fn with_code(mut self, code: impl Into<String>) -> Self {
		self.code = Some(code.into());

		self
	}

	/// Adds an error message.
	pub fn with_message(mut self, message: impl Into<String>) -> Self {
		self.message = Some(message.into());

		self
	}

	/// Adds a `WWW-Authenticate` challenge.
	pub fn with_challenge(mut self, challenge: impl Into<String>) -> Self {
		self.challenge = Some(challenge.into());

		self
	}
}

/// Default classifier.
///
/// A structured `code` decides on its own. Without one, an RFC 6750 `invalid_token` challenge
/// that mentions expiry counts, and finally (when `message_fallback` is on) any message
/// containing "expired".
#[derive(Clone, Debug)]
pub struct DefaultExpiryClassifier {
	/// Codes that signal an expired access token (compared case-insensitively).
	pub expired_codes: Vec<String>,
	/// Whether to fall back to matching "expired" in the message when no code is present.
	pub message_fallback: bool,
}
impl DefaultExpiryClassifier {
	/// Codes recognized out of the box.
	pub const DEFAULT_CODES: [&'static str; 3] =
		["TOKEN_EXPIRED", "ACCESS_TOKEN_EXPIRED", "JWT_EXPIRED"];

	/// Creates a classifier that only trusts the provided codes.
	pub fn with_codes<I, S>(codes: I) -> Self
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		Self { expired_codes: codes.into_iter().map(Into::into).collect(), message_fallback: false }
	}

	/// Toggles the message-text fallback.
	pub fn with_message_fallback(mut self, enabled: bool) -> Self {
		self.message_fallback = enabled;

		self
	}

	fn code_signals_expiry(&self, code: &str) -> bool {
		self.expired_codes.iter().any(|known| known.eq_ignore_ascii_case(code))
	}
}
impl Default for DefaultExpiryClassifier {
	fn default() -> Self {
		Self::with_codes(Self::DEFAULT_CODES).with_message_fallback(true)
	}
}
impl ExpiryClassifier for DefaultExpiryClassifier {
	fn classify(&self, ctx: &ExpiryContext) -> ResponseClass {
		if ctx.status != 401 {
			return ResponseClass::Passthrough;
		}
		if let Some(code) = ctx.code.as_deref() {
			return if self.code_signals_expiry(code) {
				ResponseClass::TokenExpired
			} else {
				ResponseClass::Passthrough
			};
		}
		if ctx.challenge.as_deref().is_some_and(challenge_signals_expiry) {
			return ResponseClass::TokenExpired;
		}
		if self.message_fallback && ctx.message.as_deref().is_some_and(mentions_expired) {
			return ResponseClass::TokenExpired;
		}

		ResponseClass::Passthrough
	}
}

fn challenge_signals_expiry(challenge: &str) -> bool {
	let lowered = challenge.to_ascii_lowercase();

	lowered.starts_with("bearer")
		&& lowered.contains("error=\"invalid_token\"")
		&& lowered.contains("expired")
}

fn mentions_expired(message: &str) -> bool {
	message.to_ascii_lowercase().contains("expired")
}
