//! Platform biometric prompt contract.

// self
use crate::_prelude::*;

/// Boxed future returned by prompt operations.
pub type PromptFuture<'a, T> = Pin<Box<dyn Future<Output = T> + 'a + Send>>;

/// Strongest biometric modality the device offers.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BiometricKind {
	/// Face recognition.
	Face,
	/// Fingerprint reader.
	Fingerprint,
	/// Iris scanner.
	Iris,
	/// No supported modality.
	#[default]
	None,
}

/// Hardware and enrollment status reported by the platform.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BiometricAvailability {
	/// Device has biometric hardware.
	pub has_hardware: bool,
	/// At least one biometric is enrolled.
	pub is_enrolled: bool,
	/// Preferred modality.
	pub kind: BiometricKind,
}
impl BiometricAvailability {
	/// Hardware present and enrolled.
	pub fn is_available(&self) -> bool {
		self.has_hardware && self.is_enrolled
	}
}

/// Result of a single prompt.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PromptOutcome {
	/// The user authenticated.
	Success,
	/// The user (or the system) dismissed the prompt.
	Cancelled,
	/// The prompt completed without a match.
	Failed(String),
}

/// Platform biometric prompt.
///
/// Implementations should report errors as [`PromptOutcome::Failed`] and unavailable hardware as
/// a non-available [`BiometricAvailability`]; the prompt itself never fails.
pub trait BiometricPrompt
where
	Self: Send + Sync,
{
	/// Reports hardware, enrollment, and modality.
	fn availability(&self) -> PromptFuture<'_, BiometricAvailability>;

	/// Shows the prompt with the provided reason text.
	fn authenticate<'a>(&'a self, reason: &'a str) -> PromptFuture<'a, PromptOutcome>;
}
