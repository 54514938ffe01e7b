//! Protocol stack wiring and the public handle.
//!
//! A [`Stack`] is the pair of protocol layers FLUSH over NAKACK, driven by a
//! dedicated worker task:
//!
//! ```text
//!   application  <->  FLUSH  <->  NAKACK  <->  transport
//! ```
//!
//! The application side injects events with [`Stack::down`] and consumes
//! upward events (delivered messages, view changes, block/unblock) from
//! [`StackIo::events`]. The transport side drains [`StackIo::outbound`] and
//! injects received frames and membership signals with [`Stack::up`].
//!
//! Transport contract: best-effort datagrams, message boundaries preserved,
//! and every multicast delivered back to the sending node as well — a
//! sender's own messages flow through its own receive window like everyone
//! else's. Unicasts addressed to the local node must equally loop back.

mod effects;
mod worker;

pub(crate) use effects::{Effects, FlushTimer, NakackTimer, Timer};

use {
	crate::{
		Address, Digest, Error, Event, Message,
		dispatch::RequestCaster,
		flush::{self, Flush},
		nakack::{self, Nakack, Retransmitter, Stats},
		primitives::AsyncWorkQueue,
	},
	bytes::Bytes,
	core::time::Duration,
	std::sync::Arc,
	tokio::{
		sync::{mpsc, oneshot},
		task::JoinHandle,
	},
	tokio_util::sync::{CancellationToken, DropGuard},
	worker::WorkerLoop,
};

/// Handle to a running protocol stack. Cheap to clone; the worker task stops
/// when the last handle is dropped.
pub struct Stack(Arc<Inner>);

impl Clone for Stack {
	fn clone(&self) -> Self {
		Self(Arc::clone(&self.0))
	}
}

struct Inner {
	local: Address,
	down_tx: mpsc::UnboundedSender<Event>,
	ingress_tx: mpsc::UnboundedSender<Event>,
	stats: Arc<Stats>,
	_worker: JoinHandle<()>,
	_abort: DropGuard,
}

/// The two event streams leaving a stack: one for the application above,
/// one for the transport below.
pub struct StackIo {
	/// Events surfacing to the application: delivered messages, view
	/// changes, BLOCK/UNBLOCK, SUSPEND_OK.
	pub events: mpsc::UnboundedReceiver<Event>,

	/// Events leaving the bottom of the stack: MSG frames for the wire plus
	/// pass-through control events.
	pub outbound: mpsc::UnboundedReceiver<Event>,
}

pub struct StackBuilder {
	local: Address,
	nakack: nakack::Config,
	flush: flush::Config,
}

impl StackBuilder {
	pub fn new(local: Address) -> Self {
		Self {
			local,
			nakack: nakack::Config::default(),
			flush: flush::Config::default(),
		}
	}

	#[must_use]
	pub fn with_nakack(mut self, config: nakack::Config) -> Self {
		self.nakack = config;
		self
	}

	#[must_use]
	pub fn with_flush(mut self, config: flush::Config) -> Self {
		self.flush = config;
		self
	}

	/// Spawns the worker task and returns the stack handle with its event
	/// streams.
	pub fn build(self) -> (Stack, StackIo) {
		let (down_tx, down_rx) = mpsc::unbounded_channel();
		let (ingress_tx, ingress_rx) = mpsc::unbounded_channel();
		let (app_tx, events) = mpsc::unbounded_channel();
		let (transport_tx, outbound) = mpsc::unbounded_channel();
		let (xmit_tx, xmit_rx) = mpsc::unbounded_channel();

		let cancel = CancellationToken::new();
		let stats = Arc::new(Stats::default());

		let retransmitter = Retransmitter::new(
			xmit_tx,
			self.nakack.retransmit_timeouts.clone(),
			cancel.child_token(),
		);
		let nakack = Nakack::new(
			self.local,
			self.nakack,
			retransmitter,
			Arc::clone(&stats),
		);
		let flush = Flush::new(self.local, self.flush);

		let worker = WorkerLoop {
			flush,
			nakack,
			down_rx,
			ingress_rx,
			xmit_rx,
			app_tx,
			transport_tx,
			timers: AsyncWorkQueue::new(),
			cancel: cancel.clone(),
		};
		let handle = tokio::spawn(worker.run());

		let stack = Stack(Arc::new(Inner {
			local: self.local,
			down_tx,
			ingress_tx,
			stats,
			_worker: handle,
			_abort: cancel.drop_guard(),
		}));

		(stack, StackIo { events, outbound })
	}
}

/// Public API
impl Stack {
	pub fn builder(local: Address) -> StackBuilder {
		StackBuilder::new(local)
	}

	pub fn local(&self) -> &Address {
		&self.0.local
	}

	/// Injects an event on the application side; it travels down the chain.
	pub fn down(&self, evt: Event) {
		let _ = self.0.down_tx.send(evt);
	}

	/// Injects an event on the transport side; it travels up the chain.
	/// This is how received frames, views and suspicions enter the stack.
	pub fn up(&self, evt: Event) {
		let _ = self.0.ingress_tx.send(evt);
	}

	/// Multicasts a payload to the group with FIFO reliable delivery.
	pub fn multicast(&self, payload: Bytes) {
		self.down(Event::Msg(Message::multicast(payload)));
	}

	/// Multicasts an out-of-band payload: delivered on reception, exempt
	/// from FIFO ordering.
	pub fn multicast_oob(&self, payload: Bytes) {
		self.down(Event::Msg(Message::multicast(payload).oob()));
	}

	/// Sends a payload to a single member. Unicasts bypass the reliable
	/// multicast machinery.
	pub fn unicast(&self, dest: Address, payload: Bytes) {
		self.down(Event::Msg(Message::unicast(dest, payload)));
	}

	/// Digest of the highest seqnos received per member.
	pub async fn digest(&self) -> Result<Digest, Error> {
		let (tx, rx) = oneshot::channel();
		self.down(Event::GetDigest(tx));
		rx.await.map_err(|_| Error::Terminated)
	}

	/// Digest of the highest seqnos delivered per member.
	pub async fn digest_stable(&self) -> Result<Digest, Error> {
		let (tx, rx) = oneshot::channel();
		self.down(Event::GetDigestStable(tx));
		rx.await.map_err(|_| Error::Terminated)
	}

	/// Retransmits until the local digest dominates `target`. Returns
	/// whether it did before the rebroadcast timeout.
	pub async fn rebroadcast(&self, target: Digest) -> bool {
		let (tx, rx) = oneshot::channel();
		self.down(Event::Rebroadcast { target, done: tx });
		rx.await.unwrap_or(false)
	}

	/// Runs a cluster-wide flush: broadcasts START_FLUSH and waits until
	/// every participant reported completion, bounded by `timeout`.
	pub async fn start_flush(&self, timeout: Duration) -> bool {
		let (tx, rx) = oneshot::channel();
		self.down(Event::Suspend {
			view: None,
			done: Some(tx),
		});
		matches!(tokio::time::timeout(timeout, rx).await, Ok(Ok(true)))
	}

	/// Releases a flush started with [`Stack::start_flush`].
	pub fn stop_flush(&self) {
		self.down(Event::Resume);
	}

	/// Leaves the group: resets the sent table and all receive windows.
	pub fn disconnect(&self) {
		self.down(Event::Disconnect);
	}

	/// Retransmission traffic counters.
	pub fn stats(&self) -> &Stats {
		&self.0.stats
	}
}

impl RequestCaster for Stack {
	fn cast(&self, dest: Option<&Address>, payload: &Bytes) {
		match dest {
			Some(dest) => self.unicast(*dest, payload.clone()),
			None => self.multicast(payload.clone()),
		}
	}
}
