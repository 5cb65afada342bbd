//! Storage contracts and built-in credential store implementations.

pub mod file;
pub mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;

// self
use crate::{
	_prelude::*,
	auth::{Credentials, TokenSecret},
};

/// Boxed future returned by [`CredentialStore`] operations.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + 'a + Send>>;

/// Storage backend holding the access/refresh token pair.
///
/// The gateway reads the pair before every request, rotates the access token after a
/// successful refresh, and clears both tokens when the session cannot be recovered.
pub trait CredentialStore
where
	Self: Send + Sync,
{
	/// Returns the current token pair (either half may be absent).
	fn fetch(&self) -> StoreFuture<'_, Credentials>;

	/// Replaces both tokens, typically after login or registration.
	fn save(&self, credentials: Credentials) -> StoreFuture<'_, ()>;

	/// Overwrites the access token and, when supplied, the rotated refresh token.
	fn rotate(
		&self,
		access_token: TokenSecret,
		refresh_token: Option<TokenSecret>,
	) -> StoreFuture<'_, ()>;

	/// Removes both tokens.
	fn clear(&self) -> StoreFuture<'_, ()>;
}

/// Error type produced by [`CredentialStore`] implementations.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ThisError)]
pub enum StoreError {
	/// Serialization failures surfaced by the backend.
	#[error("Serialization error: {message}.")]
	Serialization {
		/// Human-readable error payload.
		message: String,
	},
	/// Backend-level failure for the storage medium.
	#[error("Backend failure: {message}.")]
	Backend {
		/// Human-readable error payload.
		message: String,
	},
}
