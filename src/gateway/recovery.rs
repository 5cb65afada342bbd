//! Request execution with token-expiry recovery.
//!
//! A request whose response is classified as [`ResponseClass::TokenExpired`] either replays
//! with an access token minted meanwhile, queues behind the in-flight refresh, or elects
//! itself to perform the refresh. The refresh is bounded by the configured timeout; its
//! failure clears the credential store, rejects every queued request, and publishes
//! `auth:logout`. A replay is attempted at most once per expiry.

// self
use crate::{
	_prelude::*,
	api::{ApiRequest, ApiResponse},
	auth::TokenSecret,
	error::{SessionExpiredReason, TransportError},
	expiry::{ExpiryContext, ResponseClass},
	gateway::Gateway,
	http::ApiHttpClient,
	obs::{self, FlowKind, FlowOutcome, FlowSpan, gateway_event},
	refresh::{RefreshLeader, RefreshTicket},
	session::{LogoutReason, SessionEvent},
	store::StoreError,
};

impl<C> Gateway<C>
where
	C: ?Sized + ApiHttpClient,
{
	/// Executes `request`, recovering once from an expired access token.
	///
	/// Returns the response exactly as the backend produced it, 4xx/5xx included. Only a
	/// token-expiry 401 is intercepted; unrecoverable sessions surface as
	/// [`Error::SessionExpired`]. Transport failures are returned as [`Error::Transport`] and
	/// never retried.
	///
	/// Requests queued behind a refresh are released in arrival order. Their replays are issued
	/// in that order only on a current-thread runtime; worker threads may reorder them.
	pub async fn execute(&self, request: ApiRequest) -> Result<ApiResponse> {
		const KIND: FlowKind = FlowKind::Request;

		let span = FlowSpan::new(KIND, "execute");

		obs::record_flow_outcome(KIND, FlowOutcome::Attempt);

		let result = span.instrument(self.execute_with_recovery(&request)).await;

		match &result {
			Ok(_) => obs::record_flow_outcome(KIND, FlowOutcome::Success),
			Err(_) => obs::record_flow_outcome(KIND, FlowOutcome::Failure),
		}

		result
	}

	async fn execute_with_recovery(&self, request: &ApiRequest) -> Result<ApiResponse> {
		let url = self.config.resolve(&request.endpoint)?;
		// Captured before the token read so a refresh settling in between is still observed.
		let generation = self.coordinator.generation();
		let presented = self.store.fetch().await?.access_token;
		let response = self.dispatch(request, url.clone(), presented.as_ref()).await?;

		if !self.signals_expiry(&response) {
			return Ok(response);
		}

		gateway_event!(
			debug,
			method = request.method.as_str(),
			endpoint = %request.endpoint,
			"Access token expired; starting recovery."
		);

		let token = self.recover(generation, presented.as_ref()).await?;

		self.refresh_metrics.record_replay();

		let replayed = self.dispatch(request, url, Some(&token)).await?;

		if self.signals_expiry(&replayed) {
			gateway_event!(
				warn,
				endpoint = %request.endpoint,
				"Backend rejected the refreshed access token."
			);

			return Err(Error::SessionExpired { reason: SessionExpiredReason::RejectedAfterRefresh });
		}

		Ok(replayed)
	}

	async fn dispatch(
		&self,
		request: &ApiRequest,
		url: Url,
		token: Option<&TokenSecret>,
	) -> Result<ApiResponse> {
		let http_request = request.to_http(url, token)?;
		let response =
			self.http_client.send(http_request).await.map_err(TransportError::network)?;

		Ok(response)
	}

	fn signals_expiry(&self, response: &ApiResponse) -> bool {
		// Cheap status gate before touching the body.
		response.status == 401
			&& self.classifier.classify(&ExpiryContext::from_response(response))
				== ResponseClass::TokenExpired
	}

	/// Obtains an access token that postdates `presented`.
	async fn recover(
		&self,
		generation: u64,
		presented: Option<&TokenSecret>,
	) -> Result<TokenSecret> {
		match self.coordinator.enroll(generation, presented) {
			RefreshTicket::Fresh(token) => {
				gateway_event!(
					debug,
					"Replaying with an access token minted by an earlier refresh."
				);

				Ok(token)
			},
			RefreshTicket::Follower(waiter) => {
				gateway_event!(
					debug,
					position = waiter.position(),
					"Refresh already in flight; queued behind it."
				);

				self.refresh_metrics.record_coalesced();

				waiter.wait().await.map_err(|reason| Error::SessionExpired { reason })
			},
			RefreshTicket::Leader(leader) => self.lead_refresh(leader).await,
		}
	}

	async fn lead_refresh(&self, leader: RefreshLeader<'_>) -> Result<TokenSecret> {
		const KIND: FlowKind = FlowKind::Refresh;

		let span = FlowSpan::new(KIND, "lead_refresh");

		gateway_event!(info, "Elected to refresh the access token.");
		obs::record_flow_outcome(KIND, FlowOutcome::Attempt);
		self.refresh_metrics.record_attempt();

		match span.instrument(self.mint_access_token()).await {
			Ok(token) => {
				self.refresh_metrics.record_success();
				obs::record_flow_outcome(KIND, FlowOutcome::Success);
				gateway_event!(
					info,
					waiters = self.coordinator.pending(),
					"Access token refreshed; releasing queued requests."
				);

				leader.settle(&Ok(token.clone()));

				Ok(token)
			},
			Err(reason) => {
				self.refresh_metrics.record_failure();
				obs::record_flow_outcome(KIND, FlowOutcome::Failure);
				gateway_event!(
					warn,
					waiters = self.coordinator.pending(),
					reason = %reason,
					"Refresh failed; ending the session."
				);

				let cleared = self.store.clear().await;

				if cleared.is_err() {
					gateway_event!(
						error,
						result = ?cleared,
						"Failed to clear credentials after refresh failure."
					);
				}

				leader.settle(&Err(reason.clone()));
				self.events.emit(SessionEvent::logout(LogoutReason::SessionExpired {
					reason: reason.clone(),
				}));

				Err(Error::SessionExpired { reason })
			},
		}
	}

	async fn mint_access_token(&self) -> Result<TokenSecret, SessionExpiredReason> {
		let refresh_token = self
			.store
			.fetch()
			.await
			.map_err(store_unavailable)?
			.refresh_token
			.filter(|token| !token.expose().is_empty())
			.ok_or(SessionExpiredReason::MissingRefreshToken)?;
		let tokens = tokio::time::timeout(
			self.config.refresh_timeout.unsigned_abs(),
			self.refresher.refresh(&refresh_token),
		)
		.await
		.map_err(|_| SessionExpiredReason::RefreshTimedOut)??;

		self.store
			.rotate(tokens.access_token.clone(), tokens.refresh_token)
			.await
			.map_err(store_unavailable)?;

		Ok(tokens.access_token)
	}
}

fn store_unavailable(err: StoreError) -> SessionExpiredReason {
	SessionExpiredReason::StoreUnavailable { message: err.to_string() }
}
