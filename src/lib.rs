//! Authenticated API gateway that attaches bearer tokens to every backend call and recovers
//! from expired access tokens with a single coordinated refresh and FIFO request replay.

#![deny(clippy::all, missing_docs, unused_crate_dependencies)]

pub mod api;
pub mod auth;
pub mod config;
pub mod error;
pub mod expiry;
pub mod gateway;
pub mod http;
pub mod obs;
pub mod refresh;
pub mod session;
pub mod store;
#[cfg(feature = "reqwest")]
#[doc(hidden)]
pub mod _preludet {
	//! Convenience re-exports and helpers for integration tests.

	pub use crate::_prelude::*;

	// self
	use crate::{
		config::GatewayConfig,
		gateway::Gateway,
		http::ReqwestHttpClient,
		store::{CredentialStore, MemoryStore},
	};

	/// Gateway type alias used by reqwest-backed integration tests.
	pub type ReqwestTestGateway = Gateway<ReqwestHttpClient>;

	/// Builds a loopback-friendly config rooted at `base_url`.
	pub fn test_config(base_url: &str) -> GatewayConfig {
		GatewayConfig::builder(
			Url::parse(base_url).expect("Mock backend base URL should parse successfully."),
		)
		.refresh_timeout(Duration::seconds(5))
		.build()
		.expect("Test gateway config should validate.")
	}

	/// Constructs a [`Gateway`] backed by an in-memory store and the reqwest transport.
	pub fn build_reqwest_test_gateway(base_url: &str) -> (ReqwestTestGateway, Arc<MemoryStore>) {
		let store_backend = Arc::new(MemoryStore::default());
		let store: Arc<dyn CredentialStore> = store_backend.clone();
		let gateway = Gateway::new(test_config(base_url), store)
			.expect("Reqwest test gateway should build successfully.");

		(gateway, store_backend)
	}
}

mod _prelude {
	pub use std::{
		collections::{BTreeMap, VecDeque},
		error::Error as StdError,
		fmt::{Debug, Display, Formatter, Result as FmtResult},
		future::Future,
		pin::Pin,
		sync::Arc,
	};

	pub use parking_lot::{Mutex, RwLock};
	#[cfg(feature = "reqwest")]
	pub use reqwest::{Client as ReqwestClient, Error as ReqwestError};
	pub use serde::{Deserialize, Serialize};
	pub use thiserror::Error as ThisError;
	pub use time::{Duration, OffsetDateTime};
	pub use url::Url;

	pub use crate::error::{Error, Result};
}

#[cfg(feature = "reqwest")] pub use reqwest;
pub use url;
#[cfg(test)] use {color_eyre as _, httpmock as _};
