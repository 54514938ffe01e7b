//! Centralized encoding and decoding utilities that define the wire format
//! of all exchanged messages.
//!
//! Currently uses `postcard` as the underlying serialization format.

use {
	bytes::Bytes,
	serde::{Serialize, de::DeserializeOwned},
};

pub(crate) fn try_serialize<T: Serialize>(
	value: &T,
) -> Result<Bytes, postcard::Error> {
	postcard::to_allocvec(value).map(Bytes::from)
}

pub(crate) fn deserialize<T: DeserializeOwned>(
	bytes: impl AsRef<[u8]>,
) -> Result<T, postcard::Error> {
	postcard::from_bytes(bytes.as_ref())
}
