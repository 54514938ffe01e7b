use {core::time::Duration, derive_builder::Builder};

/// Configuration options for the reliable multicast layer.
#[derive(Debug, Clone, Builder)]
#[builder(pattern = "owned", setter(prefix = "with"))]
#[builder_struct_attr(doc(hidden))]
pub struct Config {
	/// Backoff schedule for retransmission requests of a missing seqno. The
	/// last interval repeats until the message arrives or is garbage
	/// collected.
	#[builder(default = "default_retransmit_timeouts()")]
	pub retransmit_timeouts: Vec<Duration>,

	/// How many seqnos garbage collection lags behind the stability vector.
	#[builder(default = "20")]
	pub gc_lag: u64,

	/// Maximum size of a single retransmission response; larger batches are
	/// split into multiple responses. Overridden by a `frag_size` published
	/// through CONFIG by the fragmentation layer below.
	#[builder(default = "8192")]
	pub max_xmit_size: u64,

	/// Retransmit using multicast rather than unicast, so that a message
	/// lost by many receivers is retransmitted only once.
	#[builder(default = "true")]
	pub use_mcast_xmit: bool,

	/// Address retransmit requests to a random member instead of the
	/// original sender. Forces `discard_delivered` off, since any member
	/// must then be able to serve any message.
	#[builder(default = "false")]
	pub xmit_from_random_member: bool,

	/// Drop messages from the receive windows as soon as they are
	/// delivered instead of retaining them until declared stable.
	#[builder(default = "false")]
	pub discard_delivered: bool,

	/// When greater than zero, bounds the per-sender buffer of delivered
	/// messages; the oldest entries are evicted beyond the bound. Entries
	/// not yet delivered are never evicted.
	#[builder(default = "0")]
	pub max_xmit_buf_size: usize,

	/// Upper bound on how long a rebroadcast keeps chasing its target
	/// digest.
	#[builder(default = "Duration::from_millis(2000)")]
	pub max_rebroadcast_timeout: Duration,
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
			retransmit_timeouts: default_retransmit_timeouts(),
			gc_lag: 20,
			max_xmit_size: 8192,
			use_mcast_xmit: true,
			xmit_from_random_member: false,
			discard_delivered: false,
			max_xmit_buf_size: 0,
			max_rebroadcast_timeout: Duration::from_millis(2000),
		}
	}
}

fn default_retransmit_timeouts() -> Vec<Duration> {
	[600, 1200, 2400, 4800]
		.into_iter()
		.map(Duration::from_millis)
		.collect()
}
