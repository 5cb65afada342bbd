#![cfg(feature = "reqwest")]

// std
use std::time::{Duration as StdDuration, Instant};
// crates.io
use serde_json::json;
use tokio::sync::broadcast::error::TryRecvError;
// self
use bearer_gateway::{
	_preludet::*,
	api::{ApiResponse, HttpRequest},
	auth::{Credentials, TokenSecret},
	config::GatewayConfig,
	error::{SessionExpiredReason, TransportError},
	gateway::Gateway,
	http::{ApiHttpClient, HttpFuture},
	session::{LogoutReason, SessionEvent},
	store::{CredentialStore, MemoryStore, StoreFuture},
};

const REFRESH_PATH: &str = "/api/auth/refresh-token";
const BASE_URL: &str = "http://127.0.0.1:9";

#[derive(Clone, Debug, PartialEq, Eq)]
struct Call {
	path: String,
	bearer: Option<String>,
}

#[derive(Debug, Default)]
struct BackendState {
	valid_access: Option<String>,
	refresh_calls: usize,
	refresh_delay: StdDuration,
	refresh_rejection: Option<u16>,
	reject_all: bool,
	resources_unreachable: bool,
	refresh_unreachable: bool,
	calls: Vec<Call>,
}

/// In-process backend whose access tokens are valid only once minted by its refresh endpoint.
#[derive(Debug, Default)]
struct FakeBackend {
	state: Mutex<BackendState>,
}
impl FakeBackend {
	fn with_refresh_delay(delay: StdDuration) -> Arc<Self> {
		let backend = Self::default();

		backend.state.lock().refresh_delay = delay;

		Arc::new(backend)
	}

	fn refresh_calls(&self) -> usize {
		self.state.lock().refresh_calls
	}

	fn replays(&self, token: &str) -> Vec<String> {
		self.state
			.lock()
			.calls
			.iter()
			.filter(|call| call.bearer.as_deref() == Some(token))
			.map(|call| call.path.clone())
			.collect()
	}

	fn expire_access(&self) {
		self.state.lock().valid_access = None;
	}

	async fn refresh(&self, request: &HttpRequest) -> ApiResponse {
		assert_eq!(request.bearer_token(), None, "Refresh calls must not carry a bearer token.");

		let body: serde_json::Value =
			serde_json::from_slice(request.body.as_deref().unwrap_or_default())
				.expect("Refresh request body should be JSON.");

		assert!(body["refreshToken"].as_str().is_some_and(|token| token.starts_with("refresh-")));

		let delay = {
			let mut state = self.state.lock();

			state.refresh_calls += 1;

			state.refresh_delay
		};

		if !delay.is_zero() {
			tokio::time::sleep(delay).await;
		}

		let mut state = self.state.lock();

		if let Some(status) = state.refresh_rejection {
			return ApiResponse::json_body(
				status,
				&json!({ "success": false, "message": "Refresh token revoked" }),
			);
		}

		let generation = state.refresh_calls + 1;
		let minted = format!("access-{generation}");

		state.valid_access = Some(minted.clone());

		ApiResponse::json_body(
			200,
			&json!({
				"success": true,
				"data": { "accessToken": minted, "refreshToken": format!("refresh-{generation}") }
			}),
		)
	}
}
impl ApiHttpClient for FakeBackend {
	type TransportError = std::io::Error;

	fn send(&self, request: HttpRequest) -> HttpFuture<'_, Self::TransportError> {
		Box::pin(async move {
			let path = request.url.path().to_owned();

			if path == REFRESH_PATH {
				let unreachable = {
					let mut state = self.state.lock();

					if state.refresh_unreachable {
						state.refresh_calls += 1;
					}

					state.refresh_unreachable
				};

				if unreachable {
					return Err(connection_refused());
				}

				return Ok(self.refresh(&request).await);
			}
			if self.state.lock().resources_unreachable {
				return Err(connection_refused());
			}

			let bearer = request.bearer_token().map(str::to_owned);
			let (response, delay) = {
				let mut state = self.state.lock();

				state.calls.push(Call { path: path.clone(), bearer: bearer.clone() });

				let response = match path.as_str() {
					"/api/forbidden" => ApiResponse::json_body(
						403,
						&json!({ "success": false, "message": "Forbidden" }),
					),
					"/api/broken" => ApiResponse::new(500, BTreeMap::new(), b"boom".to_vec()),
					"/api/wrong-password" => ApiResponse::json_body(
						401,
						&json!({
							"success": false,
							"code": "INVALID_CREDENTIALS",
							"message": "Invalid credentials"
						}),
					),
					_ if !state.reject_all
						&& bearer.is_some()
						&& bearer == state.valid_access =>
						ApiResponse::json_body(
							200,
							&json!({ "success": true, "data": { "path": path, "token": bearer } }),
						),
					_ => ApiResponse::json_body(
						401,
						&json!({
							"success": false,
							"code": "TOKEN_EXPIRED",
							"message": "Access token expired"
						}),
					),
				};
				let delay = if path == "/api/slow" {
					StdDuration::from_millis(300)
				} else {
					StdDuration::ZERO
				};

				(response, delay)
			};

			if !delay.is_zero() {
				tokio::time::sleep(delay).await;
			}

			Ok(response)
		})
	}
}

fn connection_refused() -> std::io::Error {
	std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "connection refused")
}

/// Store whose reads resolve `delay` after the tokens were read, like a remote backend.
#[derive(Debug)]
struct SlowReadStore {
	inner: MemoryStore,
	delay: StdDuration,
}
impl CredentialStore for SlowReadStore {
	fn fetch(&self) -> StoreFuture<'_, Credentials> {
		Box::pin(async move {
			let snapshot = self.inner.snapshot();

			tokio::time::sleep(self.delay).await;

			Ok(snapshot)
		})
	}

	fn save(&self, credentials: Credentials) -> StoreFuture<'_, ()> {
		self.inner.save(credentials)
	}

	fn rotate(
		&self,
		access_token: TokenSecret,
		refresh_token: Option<TokenSecret>,
	) -> StoreFuture<'_, ()> {
		self.inner.rotate(access_token, refresh_token)
	}

	fn clear(&self) -> StoreFuture<'_, ()> {
		self.inner.clear()
	}
}

fn build_gateway(
	backend: &Arc<FakeBackend>,
	config: GatewayConfig,
	credentials: Credentials,
) -> (Gateway<FakeBackend>, Arc<MemoryStore>) {
	let store = Arc::new(MemoryStore::with_credentials(credentials));
	let gateway = Gateway::with_http_client(config, store.clone(), backend.clone())
		.expect("Gateway over the fake backend should build.");

	(gateway, store)
}

fn expired_session() -> Credentials {
	Credentials::new("access-1", "refresh-1")
}

fn expect_reason(result: Result<ApiResponse>) -> SessionExpiredReason {
	match result {
		Err(Error::SessionExpired { reason }) => reason,
		other => panic!("Expected a session-expired error, got {other:?}."),
	}
}

#[tokio::test]
async fn concurrent_expiries_share_one_refresh_and_replay_in_order() {
	let backend = FakeBackend::with_refresh_delay(StdDuration::from_millis(200));
	let (gateway, store) = build_gateway(&backend, test_config(BASE_URL), expired_session());
	let started = Instant::now();
	let handles = (0..5)
		.map(|i| {
			let gateway = gateway.clone();

			tokio::spawn(async move { gateway.get(format!("projects/{i}")).await })
		})
		.collect::<Vec<_>>();

	for (i, handle) in handles.into_iter().enumerate() {
		let response = handle
			.await
			.expect("Request task should not panic.")
			.expect("Every request should recover after the refresh.");
		let body = response.json::<serde_json::Value>().expect("Replay body should be JSON.");

		assert_eq!(response.status, 200);
		assert_eq!(body["data"]["path"], format!("/api/projects/{i}"));
		assert_eq!(body["data"]["token"], "access-2");
	}

	let elapsed = started.elapsed();

	assert!(elapsed >= StdDuration::from_millis(200));
	assert!(elapsed < StdDuration::from_secs(2), "Recovery took {elapsed:?}.");
	assert_eq!(backend.refresh_calls(), 1);
	assert_eq!(
		backend.replays("access-2"),
		(0..5).map(|i| format!("/api/projects/{i}")).collect::<Vec<_>>()
	);
	assert_eq!(
		store.snapshot(),
		Credentials::new("access-2", "refresh-2"),
		"Refreshed tokens should be persisted."
	);

	let metrics = gateway.refresh_metrics();

	assert_eq!(metrics.attempts(), 1);
	assert_eq!(metrics.successes(), 1);
	assert_eq!(metrics.coalesced(), 4);
	assert_eq!(metrics.replays(), 5);
	assert!(!gateway.is_refreshing());
}

#[tokio::test]
async fn refresh_failure_rejects_every_request_and_logs_out() {
	let backend = FakeBackend::with_refresh_delay(StdDuration::from_millis(50));

	backend.state.lock().refresh_rejection = Some(401);

	let (gateway, store) = build_gateway(&backend, test_config(BASE_URL), expired_session());
	let mut events = gateway.subscribe();
	let handles = (0..3)
		.map(|i| {
			let gateway = gateway.clone();

			tokio::spawn(async move { gateway.get(format!("projects/{i}")).await })
		})
		.collect::<Vec<_>>();

	for handle in handles {
		let reason = expect_reason(handle.await.expect("Request task should not panic."));

		assert_eq!(
			reason,
			SessionExpiredReason::RefreshRejected {
				status: Some(401),
				message: Some("Refresh token revoked".into()),
			}
		);
	}

	assert_eq!(backend.refresh_calls(), 1);
	assert!(store.snapshot().is_empty(), "Both tokens should be cleared.");

	let event = events.recv().await.expect("A logout event should be published.");

	assert_eq!(event.name(), "auth:logout");
	assert!(matches!(
		event,
		SessionEvent::Logout {
			reason: LogoutReason::SessionExpired {
				reason: SessionExpiredReason::RefreshRejected { status: Some(401), .. }
			},
			..
		}
	));
	assert!(matches!(events.try_recv(), Err(TryRecvError::Empty)), "Logout is published once.");
	assert_eq!(gateway.refresh_metrics().failures(), 1);
}

#[tokio::test]
async fn second_burst_after_a_completed_cycle_refreshes_once_more() {
	let backend = FakeBackend::with_refresh_delay(StdDuration::from_millis(20));
	let (gateway, store) = build_gateway(&backend, test_config(BASE_URL), expired_session());

	for round in 0..2 {
		let handles = (0..3)
			.map(|i| {
				let gateway = gateway.clone();

				tokio::spawn(async move { gateway.get(format!("rounds/{round}/{i}")).await })
			})
			.collect::<Vec<_>>();

		for handle in handles {
			let response = handle
				.await
				.expect("Request task should not panic.")
				.expect("Every request should recover.");

			assert_eq!(response.status, 200);
		}

		assert_eq!(backend.refresh_calls(), round + 1);

		backend.expire_access();
	}

	assert_eq!(store.snapshot(), Credentials::new("access-3", "refresh-3"));
	assert_eq!(gateway.refresh_metrics().attempts(), 2);
}

#[tokio::test]
async fn non_expiry_responses_pass_through_untouched() {
	let backend = FakeBackend::with_refresh_delay(StdDuration::ZERO);
	let (gateway, store) = build_gateway(&backend, test_config(BASE_URL), expired_session());
	let forbidden = gateway.get("forbidden").await.expect("403 should be returned as-is.");
	let broken = gateway.get("broken").await.expect("500 should be returned as-is.");
	let wrong_password =
		gateway.get("wrong-password").await.expect("Non-expiry 401 should be returned as-is.");

	assert_eq!(forbidden.status, 403);
	assert_eq!(broken.status, 500);
	assert_eq!(broken.text(), "boom");
	assert_eq!(wrong_password.status, 401);
	assert_eq!(backend.refresh_calls(), 0);
	assert_eq!(store.snapshot(), expired_session());
}

#[tokio::test]
async fn refresh_timeout_ends_the_session() {
	let backend = FakeBackend::with_refresh_delay(StdDuration::from_secs(5));
	let config = GatewayConfig::builder(Url::parse(BASE_URL).expect("Base URL should parse."))
		.refresh_timeout(Duration::milliseconds(50))
		.build()
		.expect("Config with a short refresh timeout should validate.");
	let (gateway, store) = build_gateway(&backend, config, expired_session());
	let mut events = gateway.subscribe();
	let started = Instant::now();

	assert_eq!(
		expect_reason(gateway.get("projects").await),
		SessionExpiredReason::RefreshTimedOut
	);
	assert!(started.elapsed() < StdDuration::from_secs(2));
	assert!(store.snapshot().is_empty());
	assert!(matches!(
		events.recv().await,
		Ok(SessionEvent::Logout {
			reason: LogoutReason::SessionExpired { reason: SessionExpiredReason::RefreshTimedOut },
			..
		})
	));
}

#[tokio::test]
async fn replay_rejected_again_is_a_hard_failure() {
	let backend = FakeBackend::with_refresh_delay(StdDuration::ZERO);

	backend.state.lock().reject_all = true;

	let (gateway, store) = build_gateway(&backend, test_config(BASE_URL), expired_session());
	let mut events = gateway.subscribe();

	assert_eq!(
		expect_reason(gateway.get("projects").await),
		SessionExpiredReason::RejectedAfterRefresh
	);
	assert_eq!(backend.refresh_calls(), 1, "The replay must not trigger a second refresh.");
	assert_eq!(backend.replays("access-2"), vec!["/api/projects".to_owned()]);
	assert_eq!(store.snapshot(), Credentials::new("access-2", "refresh-2"));
	assert!(matches!(events.try_recv(), Err(TryRecvError::Empty)));
}

#[tokio::test]
async fn missing_refresh_token_ends_the_session_without_calling_the_endpoint() {
	let backend = FakeBackend::with_refresh_delay(StdDuration::ZERO);
	let credentials = Credentials { access_token: Some("access-1".into()), refresh_token: None };
	let (gateway, store) = build_gateway(&backend, test_config(BASE_URL), credentials);
	let mut events = gateway.subscribe();

	assert_eq!(
		expect_reason(gateway.get("projects").await),
		SessionExpiredReason::MissingRefreshToken
	);
	assert_eq!(backend.refresh_calls(), 0);
	assert!(store.snapshot().is_empty());
	assert!(events.recv().await.is_ok());
}

#[tokio::test]
async fn late_expiry_replays_with_the_already_refreshed_token() {
	let backend = FakeBackend::with_refresh_delay(StdDuration::from_millis(50));
	let (gateway, _store) = build_gateway(&backend, test_config(BASE_URL), expired_session());
	let slow = {
		let gateway = gateway.clone();

		tokio::spawn(async move { gateway.get("slow").await })
	};
	let fast = gateway.get("fast").await.expect("Fast request should recover.");
	let slow = slow
		.await
		.expect("Slow request task should not panic.")
		.expect("Slow request should replay with the refreshed token.");

	assert_eq!((fast.status, slow.status), (200, 200));
	assert_eq!(backend.refresh_calls(), 1);
	assert_eq!(gateway.refresh_metrics().coalesced(), 0);
	assert_eq!(gateway.refresh_metrics().replays(), 2);
}

#[tokio::test]
async fn abandoned_refresh_releases_waiters() {
	let backend = FakeBackend::with_refresh_delay(StdDuration::from_secs(10));
	let (gateway, _store) = build_gateway(&backend, test_config(BASE_URL), expired_session());
	let leader = {
		let gateway = gateway.clone();

		tokio::spawn(async move { gateway.get("projects/leader").await })
	};

	tokio::time::sleep(StdDuration::from_millis(20)).await;

	let follower = {
		let gateway = gateway.clone();

		tokio::spawn(async move { gateway.get("projects/follower").await })
	};

	tokio::time::sleep(StdDuration::from_millis(20)).await;

	assert!(gateway.is_refreshing());

	leader.abort();

	assert_eq!(
		expect_reason(follower.await.expect("Follower task should not panic.")),
		SessionExpiredReason::RefreshAbandoned
	);
	assert!(!gateway.is_refreshing());
}

#[tokio::test]
async fn expiry_during_refresh_joins_it_even_with_a_slow_store() {
	let backend = FakeBackend::with_refresh_delay(StdDuration::from_millis(200));
	let memory = MemoryStore::with_credentials(expired_session());
	let store = Arc::new(SlowReadStore {
		inner: memory.clone(),
		delay: StdDuration::from_millis(100),
	});
	let gateway: Gateway<FakeBackend> = Gateway::with_http_client(test_config(BASE_URL), store, backend.clone())
		.expect("Gateway over the slow store should build.");
	let first = {
		let gateway = gateway.clone();

		tokio::spawn(async move { gateway.get("projects/first").await })
	};
	let second = {
		let gateway = gateway.clone();

		tokio::spawn(async move {
			// Expires at ~330 ms, while the first request's refresh runs until ~400 ms.
			tokio::time::sleep(StdDuration::from_millis(230)).await;

			gateway.get("projects/second").await
		})
	};

	for handle in [first, second] {
		let response = handle
			.await
			.expect("Request task should not panic.")
			.expect("Both requests should recover.");

		assert_eq!(response.status, 200);
	}

	assert_eq!(backend.refresh_calls(), 1);
	assert_eq!(gateway.refresh_metrics().attempts(), 1);
	assert_eq!(memory.snapshot(), Credentials::new("access-2", "refresh-2"));
}

#[tokio::test]
async fn resource_transport_failure_is_returned_without_refreshing() {
	let backend = FakeBackend::with_refresh_delay(StdDuration::ZERO);

	backend.state.lock().resources_unreachable = true;

	let (gateway, store) = build_gateway(&backend, test_config(BASE_URL), expired_session());
	let err = gateway.get("projects").await.expect_err("Transport failures should propagate.");

	assert!(matches!(err, Error::Transport(TransportError::Network { .. })));
	assert_eq!(backend.refresh_calls(), 0);
	assert_eq!(backend.state.lock().calls.len(), 0, "Unreachable requests never land.");
	assert_eq!(store.snapshot(), expired_session());
	assert_eq!(gateway.refresh_metrics().attempts(), 0);
}

#[tokio::test]
async fn unreachable_refresh_endpoint_ends_the_session() {
	let backend = FakeBackend::with_refresh_delay(StdDuration::ZERO);

	backend.state.lock().refresh_unreachable = true;

	let (gateway, store) = build_gateway(&backend, test_config(BASE_URL), expired_session());
	let mut events = gateway.subscribe();
	let reason = expect_reason(gateway.get("projects").await);

	assert!(
		matches!(reason, SessionExpiredReason::RefreshUnreachable { ref message } if message.contains("connection refused")),
		"Unexpected reason {reason:?}."
	);
	assert_eq!(backend.refresh_calls(), 1, "The refresh call is not retried.");
	assert!(store.snapshot().is_empty());
	assert!(matches!(
		events.recv().await,
		Ok(SessionEvent::Logout {
			reason: LogoutReason::SessionExpired {
				reason: SessionExpiredReason::RefreshUnreachable { .. }
			},
			..
		})
	));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn worker_threads_share_one_refresh() {
	let backend = FakeBackend::with_refresh_delay(StdDuration::from_millis(200));
	let (gateway, store) = build_gateway(&backend, test_config(BASE_URL), expired_session());
	let handles = (0..8)
		.map(|i| {
			let gateway = gateway.clone();

			tokio::spawn(async move { gateway.get(format!("projects/{i}")).await })
		})
		.collect::<Vec<_>>();

	for handle in handles {
		let response = handle
			.await
			.expect("Request task should not panic.")
			.expect("Every request should recover after the refresh.");

		assert_eq!(response.status, 200);
	}

	let mut replayed = backend.replays("access-2");

	replayed.sort();

	assert_eq!(backend.refresh_calls(), 1);
	assert_eq!(replayed, (0..8).map(|i| format!("/api/projects/{i}")).collect::<Vec<_>>());
	assert_eq!(store.snapshot(), Credentials::new("access-2", "refresh-2"));
}
