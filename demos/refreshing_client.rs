//! Demonstrates the gateway recovering from an expired access token against a mock backend:
//! two concurrent calls share one refresh and both replay with the new token.

// std
use std::sync::Arc;
// crates.io
use color_eyre::Result;
use httpmock::prelude::*;
use serde_json::json;
use url::Url;
// self
use bearer_gateway::{
	auth::Credentials,
	config::GatewayConfig,
	gateway::ReqwestGateway,
	store::{CredentialStore, MemoryStore},
};

#[tokio::main]
async fn main() -> Result<()> {
	color_eyre::install()?;

	let server = MockServer::start_async().await;
	let refresh_mock = server
		.mock_async(|when, then| {
			when.method(POST).path("/api/auth/refresh-token");
			then.status(200).header("content-type", "application/json").json_body(json!({
				"success": true,
				"data": { "accessToken": "demo-access-2" }
			}));
		})
		.await;

	server
		.mock_async(|when, then| {
			when.method(GET).path("/api/me").header("authorization", "Bearer demo-access-1");
			then.status(401).header("content-type", "application/json").json_body(json!({
				"success": false,
				"code": "TOKEN_EXPIRED",
				"message": "Access token expired"
			}));
		})
		.await;
	server
		.mock_async(|when, then| {
			when.method(GET).path("/api/me").header("authorization", "Bearer demo-access-2");
			then.status(200)
				.header("content-type", "application/json")
				.json_body(json!({ "success": true, "data": { "name": "Ada" } }));
		})
		.await;

	let store: Arc<dyn CredentialStore> = Arc::new(MemoryStore::default());
	let config = GatewayConfig::builder(Url::parse(&server.base_url())?).build()?;
	let gateway = ReqwestGateway::new(config, store)?;
	let mut events = gateway.subscribe();

	gateway.establish_session(Credentials::new("demo-access-1", "demo-refresh-1")).await?;

	let (first, second) = tokio::join!(gateway.get("me"), gateway.get("me"));

	println!("First call returned status {}.", first?.status);
	println!("Second call returned {}.", second?.text());
	println!(
		"Refreshes: {}, replays: {}.",
		gateway.refresh_metrics().attempts(),
		gateway.refresh_metrics().replays()
	);

	refresh_mock.assert_calls_async(1).await;

	gateway.logout().await?;

	println!("Session event: {}.", events.recv().await?.name());

	Ok(())
}
