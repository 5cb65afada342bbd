//! Thread-safe in-memory [`CredentialStore`] for tests and short-lived processes.

// self
use crate::{
	_prelude::*,
	auth::{Credentials, TokenSecret},
	store::{CredentialStore, StoreFuture},
};

/// Keeps the token pair in-process; contents vanish with the process.
#[derive(Clone, Debug, Default)]
pub struct MemoryStore(Arc<RwLock<Credentials>>);
impl MemoryStore {
	/// Creates a store seeded with the provided pair.
	pub fn with_credentials(credentials: Credentials) -> Self {
		Self(Arc::new(RwLock::new(credentials)))
	}

	/// Returns a copy of the stored pair without going through the async contract.
	pub fn snapshot(&self) -> Credentials {
		self.0.read().clone()
	}
}
impl CredentialStore for MemoryStore {
	fn fetch(&self) -> StoreFuture<'_, Credentials> {
		Box::pin(async move { Ok(self.snapshot()) })
	}

	fn save(&self, credentials: Credentials) -> StoreFuture<'_, ()> {
		let pair = self.0.clone();

		Box::pin(async move {
			*pair.write() = credentials;

			Ok(())
		})
	}

	fn rotate(
		&self,
		access_token: TokenSecret,
		refresh_token: Option<TokenSecret>,
	) -> StoreFuture<'_, ()> {
		let pair = self.0.clone();

		Box::pin(async move {
			pair.write().rotate(access_token, refresh_token);

			Ok(())
		})
	}

	fn clear(&self) -> StoreFuture<'_, ()> {
		let pair = self.0.clone();

		Box::pin(async move {
			*pair.write() = Credentials::default();

			Ok(())
		})
	}
}
