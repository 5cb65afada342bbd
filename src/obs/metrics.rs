//! The `bearer_gateway_flow_total{flow, outcome}` counter.
//!
//! The `execute` stage records one `request` attempt per caller request and one success or
//! failure when it returns, whether or not a replay happened. The `lead_refresh` stage records
//! `refresh` outcomes for the leader only, so `refresh` attempts count refresh cycles rather
//! than expired requests. Coalescing is tracked by
//! [`RefreshMetrics`](crate::refresh::RefreshMetrics).

// self
use crate::obs::{FlowKind, FlowOutcome};

/// Records a flow outcome via the global metrics recorder (when enabled).
pub fn record_flow_outcome(kind: FlowKind, outcome: FlowOutcome) {
	#[cfg(feature = "metrics")]
	{
		metrics::counter!(
			"bearer_gateway_flow_total",
			"flow" => kind.as_str(),
			"outcome" => outcome.as_str()
		)
		.increment(1);
	}

	#[cfg(not(feature = "metrics"))]
	{
		let _ = (kind, outcome);
	}
}
