//! File-backed [`CredentialStore`] that survives process restarts.

// std
use std::{
	fs::{self, File},
	io::Write,
	path::{Path, PathBuf},
};
// self
use crate::{
	_prelude::*,
	auth::{Credentials, TokenSecret},
	store::{CredentialStore, StoreError, StoreFuture},
};

/// Persists the token pair to a JSON file after each mutation.
#[derive(Clone, Debug)]
pub struct FileStore {
	path: PathBuf,
	inner: Arc<RwLock<Credentials>>,
}
impl FileStore {
	/// Opens (or creates) a store at the provided path, eagerly loading existing data.
	pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
		let path = path.into();

		Self::ensure_parent_exists(&path)?;

		let snapshot = Self::load_snapshot(&path)?;

		Ok(Self { path, inner: Arc::new(RwLock::new(snapshot)) })
	}

	/// Location of the backing file.
	pub fn path(&self) -> &Path {
		&self.path
	}

	fn load_snapshot(path: &Path) -> Result<Credentials, StoreError> {
		if !path.exists() {
			return Ok(Credentials::default());
		}

		let bytes = fs::read(path).map_err(|e| StoreError::Backend {
			message: format!("Failed to read {}: {e}", path.display()),
		})?;

		if bytes.is_empty() {
			return Ok(Credentials::default());
		}

		serde_json::from_slice(&bytes).map_err(|e| StoreError::Serialization {
			message: format!("Failed to parse {}: {e}", path.display()),
		})
	}

	fn ensure_parent_exists(path: &Path) -> Result<(), StoreError> {
		if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
			fs::create_dir_all(parent).map_err(|e| StoreError::Backend {
				message: format!("Failed to create store directory {}: {e}", parent.display()),
			})?;
		}

		Ok(())
	}

	fn persist_locked(&self, contents: &Credentials) -> Result<(), StoreError> {
		Self::ensure_parent_exists(&self.path)?;

		let serialized =
			serde_json::to_vec_pretty(contents).map_err(|e| StoreError::Serialization {
				message: format!("Failed to serialize credentials: {e}"),
			})?;
		let mut tmp_path = self.path.clone();

		tmp_path.set_extension("tmp");

		{
			let mut file = File::create(&tmp_path).map_err(|e| StoreError::Backend {
				message: format!("Failed to create {}: {e}", tmp_path.display()),
			})?;

			file.write_all(&serialized).map_err(|e| StoreError::Backend {
				message: format!("Failed to write {}: {e}", tmp_path.display()),
			})?;
			file.sync_all().map_err(|e| StoreError::Backend {
				message: format!("Failed to sync {}: {e}", tmp_path.display()),
			})?;
		}

		fs::rename(&tmp_path, &self.path).map_err(|e| StoreError::Backend {
			message: format!("Failed to replace {}: {e}", self.path.display()),
		})
	}

	fn mutate(&self, f: impl FnOnce(&mut Credentials)) -> Result<(), StoreError> {
		let mut guard = self.inner.write();

		f(&mut guard);

		self.persist_locked(&guard)
	}
}
impl CredentialStore for FileStore {
	fn fetch(&self) -> StoreFuture<'_, Credentials> {
		Box::pin(async move { Ok(self.inner.read().clone()) })
	}

	fn save(&self, credentials: Credentials) -> StoreFuture<'_, ()> {
		Box::pin(async move { self.mutate(|current| *current = credentials) })
	}

	fn rotate(
		&self,
		access_token: TokenSecret,
		refresh_token: Option<TokenSecret>,
	) -> StoreFuture<'_, ()> {
		Box::pin(async move { self.mutate(|current| current.rotate(access_token, refresh_token)) })
	}

	fn clear(&self) -> StoreFuture<'_, ()> {
		Box::pin(async move { self.mutate(|current| *current = Credentials::default()) })
	}
}

#[cfg(test)]
mod tests {
	// std
	use std::{env, process};
	// self
	use super::*;

	fn temp_path() -> PathBuf {
		let unique = format!(
			"bearer_gateway_file_store_{}_{}.json",
			process::id(),
			OffsetDateTime::now_utc().unix_timestamp_nanos(),
		);

		env::temp_dir().join(unique)
	}

	#[tokio::test]
	async fn rotation_survives_reopen() {
		let path = temp_path();
		let store = FileStore::open(&path).expect("Failed to open file store.");

		store
			.save(Credentials::new("access-1", "refresh-1"))
			.await
			.expect("Failed to save credentials to file store.");
		store
			.rotate(TokenSecret::new("access-2"), None)
			.await
			.expect("Failed to rotate access token in file store.");
		drop(store);

		let reopened = FileStore::open(&path).expect("Failed to reopen file store.");
		let fetched = reopened.fetch().await.expect("Failed to fetch credentials from file store.");

		assert_eq!(fetched, Credentials::new("access-2", "refresh-1"));

		reopened.clear().await.expect("Failed to clear file store.");

		let cleared = FileStore::open(&path).expect("Failed to reopen cleared file store.");

		assert!(cleared.fetch().await.expect("Failed to fetch cleared credentials.").is_empty());

		fs::remove_file(&path).unwrap_or_else(|e| {
			panic!("Failed to remove temporary credential file {}: {e}", path.display())
		});
	}

	#[test]
	fn corrupt_file_surfaces_serialization_error() {
		let path = temp_path();

		fs::write(&path, b"{not json").expect("Failed to write corrupt fixture.");

		let err = FileStore::open(&path).expect_err("Corrupt files should fail to load.");

		assert!(matches!(err, StoreError::Serialization { .. }));

		fs::remove_file(&path).unwrap_or_else(|e| {
			panic!("Failed to remove temporary credential file {}: {e}", path.display())
		});
	}
}
