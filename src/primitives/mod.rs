//! Helpers and types used across the crate.

mod encoding;
mod fmt;
mod queue;

pub(crate) use {
	encoding::{deserialize, try_serialize},
	fmt::Short,
	queue::AsyncWorkQueue,
};
