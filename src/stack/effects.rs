use {crate::event::Event, core::time::Duration};

/// Side effects produced by a protocol layer while handling a single event:
/// events to continue down or up the chain, and timers to arm on the worker
/// loop. Relative order within each direction is preserved.
#[derive(Default)]
pub(crate) struct Effects {
	pub(crate) down: Vec<Event>,
	pub(crate) up: Vec<Event>,
	pub(crate) timers: Vec<Timer>,
}

impl Effects {
	pub(crate) fn new() -> Self {
		Self::default()
	}
}

/// A deferred callback into a protocol layer. Timers are one-shot; a layer
/// that wants periodic behaviour re-arms from the callback. Stale firings
/// are filtered by the generation counters carried in the timer kinds.
pub(crate) enum Timer {
	Flush { kind: FlushTimer, after: Duration },
	Nakack { kind: NakackTimer, after: Duration },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FlushTimer {
	/// The application did not acknowledge a BLOCK event in time.
	BlockAck { generation: u64 },

	/// A message has been held at the downward gate for too long.
	Gate { generation: u64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum NakackTimer {
	/// Re-evaluates rebroadcast progress and re-issues retransmit requests.
	RebroadcastTick { generation: u64 },
}
