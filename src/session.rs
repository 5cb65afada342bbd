//! Process-wide session notifications (`auth:logout`).
//!
//! The gateway publishes a [`SessionEvent::Logout`] whenever the session ends, either because
//! recovery was impossible or because the caller logged out. UI/session layers subscribe and
//! redirect to their login surface.

// crates.io
use tokio::sync::broadcast;
// self
use crate::{_prelude::*, error::SessionExpiredReason};

/// Why the session ended.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum LogoutReason {
	/// Refresh failed; tokens were cleared.
	SessionExpired {
		/// Underlying recovery failure.
		reason: SessionExpiredReason,
	},
	/// The caller invoked [`Gateway::logout`](crate::gateway::Gateway::logout).
	UserInitiated,
}

/// Notification published on the session bus.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionEvent {
	/// The session ended and both tokens are gone.
	Logout {
		/// Why the session ended.
		reason: LogoutReason,
		/// When the gateway observed the end of the session.
		#[serde(with = "time::serde::rfc3339")]
		at: OffsetDateTime,
	},
}
impl SessionEvent {
	/// Builds a logout event stamped with the current time.
	pub fn logout(reason: LogoutReason) -> Self {
		Self::Logout { reason, at: OffsetDateTime::now_utc() }
	}

	/// Stable event name for consumers that dispatch on strings.
	pub const fn name(&self) -> &'static str {
		match self {
			Self::Logout { .. } => "auth:logout",
		}
	}
}

/// Broadcast bus for [`SessionEvent`]s.
///
/// Cloning the bus shares the channel. Events published while nobody listens are dropped, and
/// a receiver that falls more than `capacity` events behind observes a lag error.
#[derive(Clone, Debug)]
pub struct SessionEvents {
	sender: broadcast::Sender<SessionEvent>,
}
impl SessionEvents {
	const DEFAULT_CAPACITY: usize = 16;

	/// Creates a bus buffering up to `capacity` events per receiver.
	pub fn with_capacity(capacity: usize) -> Self {
		let (sender, _) = broadcast::channel(capacity.max(1));

		Self { sender }
	}

	/// Registers a new listener.
	pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
		self.sender.subscribe()
	}

	/// Publishes an event, returning how many listeners received it.
	pub fn emit(&self, event: SessionEvent) -> usize {
		self.sender.send(event).unwrap_or(0)
	}

	/// Number of live listeners.
	pub fn listener_count(&self) -> usize {
		self.sender.receiver_count()
	}
}
impl Default for SessionEvents {
	fn default() -> Self {
		Self::with_capacity(Self::DEFAULT_CAPACITY)
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[tokio::test]
	async fn listeners_receive_logout() {
		let events = SessionEvents::default();
		let mut rx = events.subscribe();
		let delivered = events.emit(SessionEvent::logout(LogoutReason::UserInitiated));

		assert_eq!(delivered, 1);

		let event = rx.recv().await.expect("Listener should receive the logout event.");

		assert_eq!(event.name(), "auth:logout");
		assert!(matches!(event, SessionEvent::Logout { reason: LogoutReason::UserInitiated, .. }));
	}

	#[test]
	fn emit_without_listeners_is_silent() {
		let events = SessionEvents::default();

		assert_eq!(events.emit(SessionEvent::logout(LogoutReason::UserInitiated)), 0);
		assert_eq!(events.listener_count(), 0);
	}
}
