use {
	super::retransmit::Retransmitter,
	crate::{Address, Message, digest::Seqno},
	core::fmt,
	std::collections::{BTreeMap, HashMap},
	tokio_util::sync::CancellationToken,
};

/// Result of inserting a message into a receive window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum AddOutcome {
	/// The seqno was already present or already delivered.
	Duplicate,

	/// The message was newly inserted.
	Added,

	/// The message was newly inserted and closed a known gap, cancelling the
	/// retransmission timer that was chasing it.
	FilledGap,
}

impl AddOutcome {
	pub(crate) const fn is_added(&self) -> bool {
		!matches!(self, Self::Duplicate)
	}
}

/// Per-sender reordering buffer with gap-driven retransmission scheduling.
///
/// Received messages wait here until they can be delivered in seqno order.
/// Delivered messages are retained (unless configured otherwise) so that
/// retransmission requests from other members can be served, and are dropped
/// once the stability protocol declares them seen by everyone.
///
/// Invariant: `lowest retained <= highest delivered <= highest received`.
pub(crate) struct ReceiverWindow {
	sender: Address,
	/// Received but not yet delivered messages.
	received: BTreeMap<Seqno, Message>,
	/// Delivered messages retained for retransmission until stable.
	delivered: BTreeMap<Seqno, Message>,
	highest_delivered: Seqno,
	highest_received: Seqno,
	discard_delivered: bool,
	max_buf_size: usize,
	/// Cancellation handles of the backoff tasks chasing missing seqnos.
	xmit_tasks: HashMap<Seqno, CancellationToken>,
	retransmitter: Retransmitter,
	running: bool,
}

impl ReceiverWindow {
	/// Creates a window positioned at `initial`: the next deliverable seqno
	/// is `initial + 1`.
	pub(crate) fn new(
		sender: Address,
		initial: Seqno,
		retransmitter: Retransmitter,
		discard_delivered: bool,
		max_buf_size: usize,
	) -> Self {
		Self {
			sender,
			received: BTreeMap::new(),
			delivered: BTreeMap::new(),
			highest_delivered: initial,
			highest_received: initial,
			discard_delivered,
			max_buf_size,
			xmit_tasks: HashMap::new(),
			retransmitter,
			running: true,
		}
	}

	/// Inserts `seqno` if it is new and not yet delivered. Opens
	/// retransmission timers for any gap the insertion reveals.
	pub(crate) fn add(&mut self, seqno: Seqno, msg: Message) -> AddOutcome {
		if !self.running || seqno <= self.highest_delivered {
			return AddOutcome::Duplicate;
		}

		if seqno <= self.highest_received {
			if self.received.contains_key(&seqno) {
				return AddOutcome::Duplicate;
			}
			self.received.insert(seqno, msg);
			if let Some(task) = self.xmit_tasks.remove(&seqno) {
				task.cancel();
			}
			return AddOutcome::FilledGap;
		}

		for missing in self.highest_received + 1..seqno {
			let task = self.retransmitter.schedule(self.sender, missing);
			self.xmit_tasks.insert(missing, task);
		}
		self.received.insert(seqno, msg);
		self.highest_received = seqno;
		AddOutcome::Added
	}

	/// Returns the message at `highest delivered + 1` if present, advancing
	/// the delivery cursor; `None` otherwise.
	pub(crate) fn remove(&mut self) -> Option<Message> {
		let next = self.highest_delivered + 1;
		let msg = self.received.remove(&next)?;
		self.highest_delivered = next;

		if !self.discard_delivered {
			self.delivered.insert(next, msg.clone());
			if self.max_buf_size > 0 {
				while self.delivered.len() > self.max_buf_size {
					self.delivered.pop_first();
				}
			}
		}

		Some(msg)
	}

	/// Looks up a retained message for serving a retransmission request.
	pub(crate) fn get(&self, seqno: Seqno) -> Option<&Message> {
		self
			.delivered
			.get(&seqno)
			.or_else(|| self.received.get(&seqno))
	}

	/// Drops delivered messages with seqnos up to and including `up_to` and
	/// cancels any still-pending retransmission timers in that range.
	pub(crate) fn stable(&mut self, up_to: Seqno) {
		self.delivered = self.delivered.split_off(&(up_to + 1));

		let cancelled: Vec<Seqno> = self
			.xmit_tasks
			.keys()
			.filter(|seqno| **seqno <= up_to)
			.copied()
			.collect();
		for seqno in cancelled {
			if let Some(task) = self.xmit_tasks.remove(&seqno) {
				task.cancel();
			}
		}
	}

	/// Cancels all retransmission timers and drops all buffered messages.
	pub(crate) fn reset(&mut self) {
		self.cancel_tasks();
		self.received.clear();
		self.delivered.clear();
	}

	/// Resets the window and rejects any further insertions.
	pub(crate) fn destroy(&mut self) {
		self.reset();
		self.running = false;
	}

	pub(crate) const fn highest_delivered(&self) -> Seqno {
		self.highest_delivered
	}

	pub(crate) const fn highest_received(&self) -> Seqno {
		self.highest_received
	}

	/// Lowest seqno still retained in the window; falls back to the
	/// delivery cursor when nothing is buffered.
	pub(crate) fn lowest_seen(&self) -> Seqno {
		self
			.delivered
			.first_key_value()
			.or_else(|| self.received.first_key_value())
			.map(|(seqno, _)| *seqno)
			.unwrap_or(self.highest_delivered)
	}

	fn cancel_tasks(&mut self) {
		for (_, task) in self.xmit_tasks.drain() {
			task.cancel();
		}
	}
}

impl Drop for ReceiverWindow {
	fn drop(&mut self) {
		self.cancel_tasks();
	}
}

impl fmt::Display for ReceiverWindow {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(
			f,
			"[{} (highest delivered), {} (highest received), {} pending]",
			self.highest_delivered,
			self.highest_received,
			self.received.len()
		)
	}
}

#[cfg(test)]
mod tests {
	use {
		super::*,
		bytes::Bytes,
		tokio::sync::mpsc,
	};

	fn window(initial: Seqno) -> (ReceiverWindow, mpsc::UnboundedReceiver<super::super::XmitRequest>) {
		let (tx, rx) = mpsc::unbounded_channel();
		let retransmitter = Retransmitter::new(
			tx,
			vec![core::time::Duration::from_millis(10)],
			CancellationToken::new(),
		);
		let win = ReceiverWindow::new(
			Address::from_name("sender"),
			initial,
			retransmitter,
			false,
			0,
		);
		(win, rx)
	}

	fn msg(tag: &str) -> Message {
		Message::multicast(Bytes::copy_from_slice(tag.as_bytes()))
	}

	#[tokio::test]
	async fn in_order_add_and_remove() {
		let (mut win, _rx) = window(0);

		assert!(win.add(1, msg("m1")).is_added());
		assert!(win.add(2, msg("m2")).is_added());

		assert_eq!(win.remove().unwrap().payload().as_ref(), b"m1");
		assert_eq!(win.remove().unwrap().payload().as_ref(), b"m2");
		assert!(win.remove().is_none());
		assert_eq!(win.highest_delivered(), 2);
	}

	#[tokio::test]
	async fn add_is_idempotent() {
		let (mut win, _rx) = window(0);

		assert!(win.add(1, msg("m1")).is_added());
		assert_eq!(win.add(1, msg("m1")), AddOutcome::Duplicate);

		win.remove().unwrap();
		// delivered seqnos are rejected as well
		assert_eq!(win.add(1, msg("m1")), AddOutcome::Duplicate);
	}

	#[tokio::test]
	async fn gap_blocks_delivery_until_filled() {
		let (mut win, _rx) = window(0);

		assert!(win.add(2, msg("m2")).is_added());
		assert!(win.remove().is_none());
		assert_eq!(win.highest_received(), 2);

		assert_eq!(win.add(1, msg("m1")), AddOutcome::FilledGap);
		assert_eq!(win.remove().unwrap().payload().as_ref(), b"m1");
		assert_eq!(win.remove().unwrap().payload().as_ref(), b"m2");
	}

	#[tokio::test(start_paused = true)]
	async fn gap_schedules_retransmission() {
		let (mut win, mut rx) = window(0);

		win.add(3, msg("m3"));
		tokio::time::sleep(core::time::Duration::from_millis(15)).await;

		let mut requested = std::collections::BTreeSet::new();
		for _ in 0..2 {
			let req = rx.recv().await.unwrap();
			assert_eq!(req.low, req.high);
			requested.insert(req.low);
		}
		assert_eq!(requested.into_iter().collect::<Vec<_>>(), vec![1, 2]);
	}

	#[tokio::test(start_paused = true)]
	async fn filling_a_gap_cancels_its_timer() {
		let (mut win, mut rx) = window(0);

		win.add(2, msg("m2"));
		win.add(1, msg("m1"));

		tokio::time::sleep(core::time::Duration::from_millis(50)).await;
		assert!(rx.try_recv().is_err());
	}

	#[tokio::test]
	async fn stable_drops_delivered_messages() {
		let (mut win, _rx) = window(0);

		for seqno in 1..=4 {
			win.add(seqno, msg(&format!("m{seqno}")));
		}
		while win.remove().is_some() {}

		assert_eq!(win.lowest_seen(), 1);
		win.stable(3);
		assert_eq!(win.lowest_seen(), 4);
		assert!(win.get(3).is_none());
		assert!(win.get(4).is_some());
	}

	#[tokio::test]
	async fn bounded_buffer_evicts_oldest_delivered() {
		let (tx, _rx) = mpsc::unbounded_channel();
		let retransmitter = Retransmitter::new(
			tx,
			vec![core::time::Duration::from_millis(10)],
			CancellationToken::new(),
		);
		let mut win = ReceiverWindow::new(
			Address::from_name("sender"),
			0,
			retransmitter,
			false,
			2,
		);

		for seqno in 1..=4 {
			win.add(seqno, msg(&format!("m{seqno}")));
		}
		while win.remove().is_some() {}

		assert!(win.get(1).is_none());
		assert!(win.get(2).is_none());
		assert!(win.get(3).is_some());
		assert!(win.get(4).is_some());
	}

	#[tokio::test]
	async fn destroyed_window_rejects_insertions() {
		let (mut win, _rx) = window(0);

		win.destroy();
		assert_eq!(win.add(1, msg("m1")), AddOutcome::Duplicate);
	}
}
