//! Row identifiers shared between the identity backend and the profile directory.
//!
//! Both kinds travel inside PostgREST filters (`eq.<id>`) and invite deep links, so only
//! URL- and filter-safe characters are accepted: ASCII letters, digits, `-`, and `_`. Backend
//! user ids are UUIDs, which always fit.

// self
use crate::_prelude::*;

/// Longest identifier the directory stores.
pub const IDENTIFIER_MAX_LEN: usize = 64;

macro_rules! def_id {
	($name:ident, $doc:literal, $kind:expr) => {
		#[doc = $doc]
		#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
		#[serde(try_from = "String", into = "String")]
		pub struct $name(String);
		impl $name {
			/// Validates `value` as a row id.
			pub fn new(value: impl Into<String>) -> Result<Self, IdentifierError> {
				let value = value.into();

				check($kind, &value)?;

				Ok(Self(value))
			}
		}
		impl AsRef<str> for $name {
			fn as_ref(&self) -> &str {
				&self.0
			}
		}
		impl From<$name> for String {
			fn from(value: $name) -> Self {
				value.0
			}
		}
		impl TryFrom<String> for $name {
			type Error = IdentifierError;

			fn try_from(value: String) -> Result<Self, Self::Error> {
				Self::new(value)
			}
		}
		impl Debug for $name {
			fn fmt(&self, f: &mut Formatter) -> FmtResult {
				write!(f, "{}({})", stringify!($name), self.0)
			}
		}
		impl Display for $name {
			fn fmt(&self, f: &mut Formatter) -> FmtResult {
				f.write_str(&self.0)
			}
		}
	};
}

def_id! { IdentityId, "Backend user id owning a session.", IdKind::Identity }
def_id! { GroupId, "Group a device may join through an invite link.", IdKind::Group }

/// Which identifier failed validation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IdKind {
	/// [`IdentityId`].
	Identity,
	/// [`GroupId`].
	Group,
}
impl Display for IdKind {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(match self {
			Self::Identity => "Identity",
			Self::Group => "Group",
		})
	}
}

/// Error returned when an identifier is not a usable row id.
#[derive(Clone, Debug, PartialEq, Eq, ThisError)]
pub enum IdentifierError {
	/// Nothing was supplied.
	#[error("{kind} id is empty.")]
	Empty {
		/// Identifier being validated.
		kind: IdKind,
	},
	/// The value is longer than [`IDENTIFIER_MAX_LEN`] bytes.
	#[error("{kind} id is {len} bytes; at most {max} are allowed.", max = IDENTIFIER_MAX_LEN)]
	TooLong {
		/// Identifier being validated.
		kind: IdKind,
		/// Supplied length.
		len: usize,
	},
	/// The value contains a character outside `[A-Za-z0-9_-]`.
	#[error("{kind} id contains {found:?} at byte {index}.")]
	InvalidCharacter {
		/// Identifier being validated.
		kind: IdKind,
		/// Offending character.
		found: char,
		/// Byte offset of `found`.
		index: usize,
	},
}

fn check(kind: IdKind, value: &str) -> Result<(), IdentifierError> {
	if value.is_empty() {
		return Err(IdentifierError::Empty { kind });
	}
	if value.len() > IDENTIFIER_MAX_LEN {
		return Err(IdentifierError::TooLong { kind, len: value.len() });
	}
	if let Some((index, found)) =
		value.char_indices().find(|(_, c)| !(c.is_ascii_alphanumeric() || matches!(c, '-' | '_')))
	{
		return Err(IdentifierError::InvalidCharacter { kind, found, index });
	}

	Ok(())
}
