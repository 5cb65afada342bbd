//! Single-flight refresh coordination with a FIFO wait queue.
//!
//! [`RefreshCoordinator`] holds the process-wide refresh state: whether a refresh is in flight
//! and the queue of callers waiting on it. The first caller to [`enroll`](RefreshCoordinator::enroll)
//! while no refresh is running becomes the [`RefreshLeader`] and performs the refresh; everyone
//! else receives a [`RefreshWaiter`] resolved, in arrival order, with the leader's outcome. The
//! queue is drained atomically with clearing the in-flight flag, so a new refresh can only start
//! after every waiter of the previous one has been released.
//!
//! Each settled cycle bumps a generation counter. Callers capture the generation before reading
//! the access token they dispatch with; a caller whose 401 arrives after a later cycle minted a
//! different token is handed that token instead of being elected, in the same critical section
//! that decides leadership.

pub mod endpoint;

mod metrics;

pub use self::endpoint::*;
pub use self::metrics::RefreshMetrics;

// crates.io
use tokio::sync::oneshot;
// self
use crate::{_prelude::*, auth::TokenSecret, error::SessionExpiredReason};

/// Result delivered to every participant of one refresh cycle.
pub type RefreshOutcome = Result<TokenSecret, SessionExpiredReason>;

#[derive(Debug, Default)]
struct RefreshState {
	refreshing: bool,
	generation: u64,
	minted: Option<TokenSecret>,
	waiters: VecDeque<oneshot::Sender<RefreshOutcome>>,
}

/// Owner of the refresh flag and wait queue.
#[derive(Debug, Default)]
pub struct RefreshCoordinator {
	state: Mutex<RefreshState>,
}
impl RefreshCoordinator {
	/// Number of settled refresh cycles.
	///
	/// Capture it before reading the access token a request is dispatched with and hand it back
	/// to [`enroll`](Self::enroll) if that request expires.
	pub fn generation(&self) -> u64 {
		self.state.lock().generation
	}

	/// Joins the current refresh cycle for a request that observed `generation` and presented
	/// `presented`.
	///
	/// Queues behind a running refresh, returns the token minted by a cycle that settled after
	/// `generation` when it differs from `presented`, and otherwise elects the caller as leader.
	pub fn enroll(&self, generation: u64, presented: Option<&TokenSecret>) -> RefreshTicket<'_> {
		let mut state = self.state.lock();

		if state.refreshing {
			let (tx, rx) = oneshot::channel();

			state.waiters.push_back(tx);

			return RefreshTicket::Follower(RefreshWaiter { rx, position: state.waiters.len() });
		}

		let fresh = (state.generation != generation)
			.then(|| state.minted.clone())
			.flatten()
			.filter(|minted| Some(minted) != presented);

		if let Some(minted) = fresh {
			return RefreshTicket::Fresh(minted);
		}

		state.refreshing = true;

		RefreshTicket::Leader(RefreshLeader { coordinator: self, settled: false })
	}

	/// Returns `true` while a leader holds the refresh.
	pub fn is_refreshing(&self) -> bool {
		self.state.lock().refreshing
	}

	/// Number of callers currently queued behind the leader.
	pub fn pending(&self) -> usize {
		self.state.lock().waiters.len()
	}

	fn settle(&self, outcome: &RefreshOutcome) -> usize {
		let waiters = {
			let mut state = self.state.lock();

			state.refreshing = false;
			state.generation += 1;
			state.minted = outcome.as_ref().ok().cloned();

			std::mem::take(&mut state.waiters)
		};

		// Waiters whose caller went away have dropped their receiver; skip them.
		waiters
			.into_iter()
			.filter(|waiter| !waiter.is_closed())
			.filter_map(|waiter| waiter.send(outcome.clone()).ok())
			.count()
	}
}

/// Role assigned by [`RefreshCoordinator::enroll`].
#[derive(Debug)]
pub enum RefreshTicket<'a> {
	/// The caller must perform the refresh and settle the cycle.
	Leader(RefreshLeader<'a>),
	/// Another caller is refreshing; wait for its outcome.
	Follower(RefreshWaiter),
	/// A cycle settled after the caller's request was dispatched; replay with its token.
	Fresh(TokenSecret),
}

/// Exclusive right to perform the in-flight refresh.
///
/// Dropping the leader without calling [`settle`](Self::settle) (for example when the owning
/// future is cancelled) releases every waiter with
/// [`SessionExpiredReason::RefreshAbandoned`].
#[derive(Debug)]
pub struct RefreshLeader<'a> {
	coordinator: &'a RefreshCoordinator,
	settled: bool,
}
impl RefreshLeader<'_> {
	/// Ends the cycle, resolving every waiter in arrival order with `outcome`.
	///
	/// Returns the number of waiters that received the outcome.
	pub fn settle(mut self, outcome: &RefreshOutcome) -> usize {
		self.settled = true;

		self.coordinator.settle(outcome)
	}
}
impl Drop for RefreshLeader<'_> {
	fn drop(&mut self) {
		if !self.settled {
			self.coordinator.settle(&Err(SessionExpiredReason::RefreshAbandoned));
		}
	}
}

/// Handle for a caller suspended behind the leader.
#[derive(Debug)]
pub struct RefreshWaiter {
	rx: oneshot::Receiver<RefreshOutcome>,
	position: usize,
}
impl RefreshWaiter {
	/// One-based position in the queue at enrollment time.
	pub fn position(&self) -> usize {
		self.position
	}

	/// Suspends until the leader settles the cycle.
	pub async fn wait(self) -> RefreshOutcome {
		self.rx.await.unwrap_or(Err(SessionExpiredReason::RefreshAbandoned))
	}
}
