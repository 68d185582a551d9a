// crates.io
use tracing::{Instrument, Span, instrument::Instrumented};
// self
use crate::{_prelude::*, obs::FlowKind};

/// Span attached to every engine flow (refresh, restore, callback, join, boot).
#[derive(Clone, Debug)]
pub struct FlowSpan {
	span: Span,
}
impl FlowSpan {
	/// Opens a `session_continuity.flow` span for `kind` at `stage`.
	pub fn new(kind: FlowKind, stage: &'static str) -> Self {
		Self { span: tracing::info_span!("session_continuity.flow", flow = kind.as_str(), stage) }
	}

	/// Runs `fut` inside the span; no guard is held across `.await`.
	pub fn instrument<Fut>(&self, fut: Fut) -> Instrumented<Fut>
	where
		Fut: Future,
	{
		fut.instrument(self.span.clone())
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[tokio::test]
	async fn instrumented_flows_keep_their_output() {
		let span = FlowSpan::new(FlowKind::OAuthCallback, "resolve");
		let outcome = FlowSpan::instrument(&span, async { Ok::<_, Error>("confirmed") }).await;

		assert_eq!(outcome.ok(), Some("confirmed"));
	}
}
