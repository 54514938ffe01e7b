use {
	crate::primitives::Short,
	core::fmt,
	serde::{Deserialize, Serialize},
	sha3::{Digest as _, Sha3_256},
};

/// Opaque process identifier with a stable total order.
///
/// Addresses only need to be comparable, hashable and totally ordered; how
/// they map to network endpoints is the transport's business. The smallest
/// address of a view is its coordinator.
#[derive(
	Clone,
	Copy,
	PartialEq,
	Eq,
	PartialOrd,
	Ord,
	Hash,
	Serialize,
	Deserialize,
)]
pub struct Address([u8; 16]);

impl Address {
	pub const LEN: usize = 16;

	pub const fn from_bytes(bytes: [u8; Self::LEN]) -> Self {
		Self(bytes)
	}

	/// Generates a random address.
	pub fn random() -> Self {
		Self(rand::random())
	}

	/// Derives a deterministic address from a human-readable name.
	pub fn from_name(name: impl AsRef<[u8]>) -> Self {
		let hash = Sha3_256::digest(name.as_ref());
		let mut bytes = [0u8; Self::LEN];
		bytes.copy_from_slice(&hash[..Self::LEN]);
		Self(bytes)
	}

	pub const fn as_bytes(&self) -> &[u8; Self::LEN] {
		&self.0
	}
}

impl AsRef<[u8]> for Address {
	fn as_ref(&self) -> &[u8] {
		&self.0
	}
}

impl From<[u8; Address::LEN]> for Address {
	fn from(bytes: [u8; Address::LEN]) -> Self {
		Self(bytes)
	}
}

impl fmt::Display for Address {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", Short(self.0))
	}
}

impl fmt::Debug for Address {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", Short(self.0))
	}
}
