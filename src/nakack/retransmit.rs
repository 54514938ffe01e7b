use {
	crate::{Address, digest::Seqno},
	core::time::Duration,
	std::sync::Arc,
	tokio::sync::mpsc::UnboundedSender,
	tokio_util::sync::CancellationToken,
};

/// A single retransmission demand produced by a gap timer or by the
/// stability protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct XmitRequest {
	pub low: Seqno,
	pub high: Seqno,
	/// The member that originally multicast the missing messages.
	pub sender: Address,
}

/// Schedules gap-retransmission timers for one stack instance.
///
/// A clone is handed to every receive window. Each missing seqno gets an
/// independent task that reports an [`XmitRequest`] on the shared channel
/// according to the backoff schedule, re-arming at the last interval until
/// cancelled. Tasks hold no reference back to the window; the window owns
/// only their cancellation handles and cancels them when the message arrives
/// or becomes stable.
#[derive(Clone)]
pub(crate) struct Retransmitter {
	tx: UnboundedSender<XmitRequest>,
	timeouts: Arc<[Duration]>,
	cancel: CancellationToken,
}

impl Retransmitter {
	pub(crate) fn new(
		tx: UnboundedSender<XmitRequest>,
		timeouts: Vec<Duration>,
		cancel: CancellationToken,
	) -> Self {
		let timeouts = if timeouts.is_empty() {
			tracing::warn!(
				"empty retransmit schedule, falling back to the default"
			);
			crate::nakack::Config::default().retransmit_timeouts
		} else {
			timeouts
		};

		Self {
			tx,
			timeouts: timeouts.into(),
			cancel,
		}
	}

	/// Spawns the backoff task for one missing seqno and returns its
	/// cancellation handle.
	pub(crate) fn schedule(
		&self,
		sender: Address,
		seqno: Seqno,
	) -> CancellationToken {
		let token = self.cancel.child_token();
		let task_token = token.clone();
		let tx = self.tx.clone();
		let timeouts = Arc::clone(&self.timeouts);

		tokio::spawn(async move {
			let mut attempt = 0usize;
			loop {
				let delay = timeouts[attempt.min(timeouts.len() - 1)];
				tokio::select! {
					() = task_token.cancelled() => return,
					() = tokio::time::sleep(delay) => {}
				}

				let request = XmitRequest {
					low: seqno,
					high: seqno,
					sender,
				};
				if tx.send(request).is_err() {
					return;
				}
				attempt += 1;
			}
		});

		token
	}
}
