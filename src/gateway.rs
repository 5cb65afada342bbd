//! The authenticated request gateway.
//!
//! [`Gateway`] owns the transport, credential store, refresh coordinator, and session bus.
//! Every backend call goes through [`Gateway::execute`], which attaches the current access
//! token and transparently recovers from token-expiry 401s (see the `recovery` module).

mod recovery;

// self
use crate::{
	_prelude::*,
	api::{ApiRequest, ApiResponse, Envelope},
	auth::Credentials,
	config::GatewayConfig,
	expiry::{DefaultExpiryClassifier, ExpiryClassifier},
	http::ApiHttpClient,
	refresh::{HttpTokenRefresher, RefreshCoordinator, RefreshMetrics, TokenRefresher},
	session::{LogoutReason, SessionEvent, SessionEvents},
	store::CredentialStore,
};
#[cfg(feature = "reqwest")] use crate::http::ReqwestHttpClient;

#[cfg(feature = "reqwest")]
/// Gateway specialized for the crate's default reqwest transport.
pub type ReqwestGateway = Gateway<ReqwestHttpClient>;

/// Authenticated API gateway with single-flight refresh.
///
/// Clones share the transport, store, coordinator, metrics, and session bus, so a clone handed
/// to another task still takes part in the same refresh cycle.
pub struct Gateway<C>
where
	C: ?Sized + ApiHttpClient,
{
	/// Transport used for resource calls and, by default, for the refresh call.
	pub http_client: Arc<C>,
	/// Credential store holding the access/refresh token pair.
	pub store: Arc<dyn CredentialStore>,
	config: GatewayConfig,
	coordinator: Arc<RefreshCoordinator>,
	refresher: Arc<dyn TokenRefresher>,
	classifier: Arc<dyn ExpiryClassifier>,
	events: SessionEvents,
	refresh_metrics: Arc<RefreshMetrics>,
}
impl<C> Gateway<C>
where
	C: ?Sized + ApiHttpClient,
{
	/// Creates a gateway that reuses the caller-provided transport.
	///
	/// The refresh endpoint is called through the same transport unless a custom
	/// [`TokenRefresher`] is installed with [`with_refresher`](Self::with_refresher).
	pub fn with_http_client(
		config: GatewayConfig,
		store: Arc<dyn CredentialStore>,
		http_client: impl Into<Arc<C>>,
	) -> Result<Self> {
		config.validate()?;

		let http_client = http_client.into();
		let refresher = HttpTokenRefresher::<C>::new(http_client.clone(), config.refresh_url()?);

		Ok(Self {
			http_client,
			store,
			config,
			coordinator: Default::default(),
			refresher: Arc::new(refresher),
			classifier: Arc::new(DefaultExpiryClassifier::default()),
			events: SessionEvents::default(),
			refresh_metrics: Default::default(),
		})
	}

	/// Replaces the refresh endpoint client.
	pub fn with_refresher(mut self, refresher: Arc<dyn TokenRefresher>) -> Self {
		self.refresher = refresher;

		self
	}

	/// Replaces the classifier deciding which 401 responses signal token expiry.
	pub fn with_classifier(mut self, classifier: Arc<dyn ExpiryClassifier>) -> Self {
		self.classifier = classifier;

		self
	}

	/// Publishes session events on an existing bus instead of a private one.
	pub fn with_events(mut self, events: SessionEvents) -> Self {
		self.events = events;

		self
	}

	/// Validated configuration in use.
	pub fn config(&self) -> &GatewayConfig {
		&self.config
	}

	/// Session bus the gateway publishes `auth:logout` on.
	pub fn events(&self) -> &SessionEvents {
		&self.events
	}

	/// Subscribes to session events.
	pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<SessionEvent> {
		self.events.subscribe()
	}

	/// Refresh counters shared by every clone of this gateway.
	pub fn refresh_metrics(&self) -> &RefreshMetrics {
		&self.refresh_metrics
	}

	/// Returns `true` while a refresh is in flight.
	pub fn is_refreshing(&self) -> bool {
		self.coordinator.is_refreshing()
	}

	/// Stores the token pair issued by login or registration.
	pub async fn establish_session(&self, credentials: Credentials) -> Result<()> {
		self.store.save(credentials).await?;

		crate::obs::gateway_event!(info, "Session established.");

		Ok(())
	}

	/// Clears both tokens and publishes `auth:logout`.
	pub async fn logout(&self) -> Result<()> {
		self.store.clear().await?;
		self.events.emit(SessionEvent::logout(LogoutReason::UserInitiated));

		crate::obs::gateway_event!(info, "Session ended by the caller.");

		Ok(())
	}

	/// Issues `GET <endpoint>`.
	pub async fn get(&self, endpoint: impl Into<String>) -> Result<ApiResponse> {
		self.execute(ApiRequest::get(endpoint)).await
	}

	/// Issues `POST <endpoint>` with a JSON body.
	pub async fn post<B>(&self, endpoint: impl Into<String>, body: &B) -> Result<ApiResponse>
	where
		B: ?Sized + Serialize,
	{
		self.execute(ApiRequest::post(endpoint).with_json(body)?).await
	}

	/// Issues `PUT <endpoint>` with a JSON body.
	pub async fn put<B>(&self, endpoint: impl Into<String>, body: &B) -> Result<ApiResponse>
	where
		B: ?Sized + Serialize,
	{
		self.execute(ApiRequest::put(endpoint).with_json(body)?).await
	}

	/// Issues `PATCH <endpoint>` with a JSON body.
	pub async fn patch<B>(&self, endpoint: impl Into<String>, body: &B) -> Result<ApiResponse>
	where
		B: ?Sized + Serialize,
	{
		self.execute(ApiRequest::patch(endpoint).with_json(body)?).await
	}

	/// Issues `DELETE <endpoint>`.
	pub async fn delete(&self, endpoint: impl Into<String>) -> Result<ApiResponse> {
		self.execute(ApiRequest::delete(endpoint)).await
	}

	/// Executes `request` and decodes the `{ success, message, code, data }` envelope.
	///
	/// Non-2xx responses and `success: false` become [`Error::Api`]. Returns the `data` payload,
	/// which may legitimately be absent (e.g., for deletions).
	pub async fn execute_json<T>(&self, request: ApiRequest) -> Result<Option<T>>
	where
		T: for<'de> Deserialize<'de>,
	{
		let response = self.execute(request).await?;

		if !response.is_success() {
			return Err(api_error(&response));
		}

		let envelope = response.envelope::<T>()?;

		if !envelope.success {
			return Err(Error::Api {
				status: response.status,
				code: envelope.code,
				message: envelope.message,
			});
		}

		Ok(envelope.data)
	}
}
#[cfg(feature = "reqwest")]
impl Gateway<ReqwestHttpClient> {
	/// Creates a gateway backed by a reqwest client bounded by `config.request_timeout`.
	pub fn new(config: GatewayConfig, store: Arc<dyn CredentialStore>) -> Result<Self> {
		config.validate()?;

		let http_client = ReqwestHttpClient::with_timeout(config.request_timeout)?;

		Self::with_http_client(config, store, http_client)
	}
}
impl<C> Clone for Gateway<C>
where
	C: ?Sized + ApiHttpClient,
{
	fn clone(&self) -> Self {
		Self {
			http_client: self.http_client.clone(),
			store: self.store.clone(),
			config: self.config.clone(),
			coordinator: self.coordinator.clone(),
			refresher: self.refresher.clone(),
			classifier: self.classifier.clone(),
			events: self.events.clone(),
			refresh_metrics: self.refresh_metrics.clone(),
		}
	}
}
impl<C> Debug for Gateway<C>
where
	C: ?Sized + ApiHttpClient,
{
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("Gateway")
			.field("base_url", &self.config.base_url.as_str())
			.field("api_prefix", &self.config.api_prefix)
			.field("refreshing", &self.coordinator.is_refreshing())
			.field("pending", &self.coordinator.pending())
			.finish()
	}
}

fn api_error(response: &ApiResponse) -> Error {
	let (code, message) =
		match serde_json::from_slice::<Envelope<serde::de::IgnoredAny>>(&response.body) {
			Ok(envelope) => (envelope.code, envelope.message),
			Err(_) => (None, None),
		};

	Error::Api { status: response.status, code, message }
}
