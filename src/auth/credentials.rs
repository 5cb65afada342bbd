//! The access/refresh token pair persisted by credential stores.

// self
use crate::{_prelude::*, auth::TokenSecret};

/// Access and refresh tokens as held by a [`CredentialStore`](crate::store::CredentialStore).
///
/// Both halves are optional: a fresh install has neither, and a store may be left holding only
/// a refresh token after the access token was dropped.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Credentials {
	/// Short-lived bearer credential attached to every request.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub access_token: Option<TokenSecret>,
	/// Long-lived credential used only to mint new access tokens.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub refresh_token: Option<TokenSecret>,
}
impl Credentials {
	/// Creates a pair from the tokens issued at login or registration.
	pub fn new(access_token: impl Into<TokenSecret>, refresh_token: impl Into<TokenSecret>) -> Self {
		Self { access_token: Some(access_token.into()), refresh_token: Some(refresh_token.into()) }
	}

	/// Returns `true` when neither token is present.
	pub fn is_empty(&self) -> bool {
		self.access_token.is_none() && self.refresh_token.is_none()
	}

	/// Replaces the access token and, when the backend rotated it, the refresh token.
	pub fn rotate(&mut self, access_token: TokenSecret, refresh_token: Option<TokenSecret>) {
		self.access_token = Some(access_token);

		if let Some(refresh) = refresh_token {
			self.refresh_token = Some(refresh);
		}
	}
}
