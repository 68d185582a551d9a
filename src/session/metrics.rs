//! Counters describing refresh flights, network calls, and their outcomes.

// std
use std::sync::atomic::{AtomicU64, Ordering};

/// Thread-safe counters for the refresh coordinator.
#[derive(Debug, Default)]
pub struct RefreshMetrics {
	flights: AtomicU64,
	network_calls: AtomicU64,
	joined: AtomicU64,
	success: AtomicU64,
	failure: AtomicU64,
}
impl RefreshMetrics {
	/// Number of refresh flights started.
	pub fn flights(&self) -> u64 {
		self.flights.load(Ordering::Relaxed)
	}

	/// Number of network refresh calls issued, retries included.
	pub fn network_calls(&self) -> u64 {
		self.network_calls.load(Ordering::Relaxed)
	}

	/// Number of callers that awaited an existing flight instead of starting one.
	pub fn joined(&self) -> u64 {
		self.joined.load(Ordering::Relaxed)
	}

	/// Number of flights that ended with a usable session.
	pub fn successes(&self) -> u64 {
		self.success.load(Ordering::Relaxed)
	}

	/// Number of flights that ended without a usable session.
	pub fn failures(&self) -> u64 {
		self.failure.load(Ordering::Relaxed)
	}

	pub(crate) fn record_flight(&self) {
		self.flights.fetch_add(1, Ordering::Relaxed);
	}

	pub(crate) fn record_network_call(&self) {
		self.network_calls.fetch_add(1, Ordering::Relaxed);
	}

	pub(crate) fn record_joined(&self) {
		self.joined.fetch_add(1, Ordering::Relaxed);
	}

	pub(crate) fn record_success(&self) {
		self.success.fetch_add(1, Ordering::Relaxed);
	}

	pub(crate) fn record_failure(&self) {
		self.failure.fetch_add(1, Ordering::Relaxed);
	}

	pub(crate) fn reset(&self) {
		for counter in [&self.flights, &self.network_calls, &self.joined, &self.success, &self.failure]
		{
			counter.store(0, Ordering::Relaxed);
		}
	}
}
