use {core::time::Duration, derive_builder::Builder};

/// Configuration options for the flush barrier.
#[derive(Debug, Clone, Builder)]
#[builder(pattern = "owned", setter(prefix = "with"))]
#[builder_struct_attr(doc(hidden))]
pub struct Config {
	/// How long a downward message may be held at the flush gate before the
	/// process forcibly unblocks itself.
	#[builder(default = "Duration::from_secs(4)")]
	pub flush_timeout: Duration,

	/// How long to wait for the application to acknowledge a BLOCK event
	/// before proceeding without the acknowledgement.
	#[builder(default = "Duration::from_secs(10)")]
	pub block_timeout: Duration,
}

impl Config {
	/// Creates a new config builder with default values.
	pub fn builder() -> ConfigBuilder {
		ConfigBuilder::default()
	}
}

impl Default for Config {
	fn default() -> Self {
		Self {
			flush_timeout: Duration::from_secs(4),
			block_timeout: Duration::from_secs(10),
		}
	}
}
