//! Negative-acknowledgement reliable multicast.
//!
//! Multicasts are assigned a monotonically increasing per-sender seqno.
//! Receivers deliver messages in seqno order and request retransmission of
//! missing ones. Retransmitted messages are bundled: an xmit request for
//! messages 1-10 is answered with one response carrying all ten, split only
//! when the bundle would exceed `max_xmit_size` (there is no fragmentation
//! layer below to rely on).
//!
//! The layer also owns the digest operations that virtual synchrony is built
//! from: digest queries, digest installation on join and merge, stability
//! driven garbage collection and rebroadcast towards a target digest.

mod config;
mod protocol;
mod retransmit;
mod window;

pub use {
	config::{Config, ConfigBuilder},
	protocol::NakAckHeader,
};
pub(crate) use retransmit::{Retransmitter, XmitRequest};

use {
	crate::{
		Address, ConfigUpdate, Digest, DigestEntry, Event, Message, View,
		digest::Seqno,
		stack::{Effects, NakackTimer, Timer},
	},
	bytes::Bytes,
	core::time::Duration,
	rand::seq::IndexedRandom,
	std::{
		collections::{BTreeMap, HashMap},
		sync::{
			Arc,
			atomic::{AtomicU64, Ordering},
		},
		time::Instant,
	},
	tokio::sync::oneshot,
	window::{AddOutcome, ReceiverWindow},
};

/// How many retransmission rounds a rebroadcast gets before its deadline.
const NUM_REBROADCAST_MSGS: u32 = 3;

/// Retransmission traffic counters, shared with the owning stack handle.
#[derive(Debug, Default)]
pub struct Stats {
	xmit_reqs_sent: AtomicU64,
	xmit_reqs_received: AtomicU64,
	xmit_rsps_sent: AtomicU64,
	xmit_rsps_received: AtomicU64,
	missing_received: AtomicU64,
}

impl Stats {
	pub fn xmit_reqs_sent(&self) -> u64 {
		self.xmit_reqs_sent.load(Ordering::Relaxed)
	}

	pub fn xmit_reqs_received(&self) -> u64 {
		self.xmit_reqs_received.load(Ordering::Relaxed)
	}

	pub fn xmit_rsps_sent(&self) -> u64 {
		self.xmit_rsps_sent.load(Ordering::Relaxed)
	}

	pub fn xmit_rsps_received(&self) -> u64 {
		self.xmit_rsps_received.load(Ordering::Relaxed)
	}

	/// Messages that arrived after having been reported missing.
	pub fn missing_received(&self) -> u64 {
		self.missing_received.load(Ordering::Relaxed)
	}

	fn add(counter: &AtomicU64, n: u64) {
		counter.fetch_add(n, Ordering::Relaxed);
	}
}

struct RebroadcastState {
	target: Digest,
	done: oneshot::Sender<bool>,
	deadline: Instant,
	generation: u64,
}

/// The reliable multicast layer of one stack instance.
pub(crate) struct Nakack {
	config: Config,
	local: Address,
	/// Seqno of the last multicast sent by the local process.
	seqno: Seqno,
	/// Messages multicast by the local process, retained for retransmission
	/// until truncated by the stability protocol.
	sent: BTreeMap<Seqno, Message>,
	/// Receive windows keyed by sender.
	windows: HashMap<Address, ReceiverWindow>,
	members: Vec<Address>,
	view: Option<View>,
	is_server: bool,
	leaving: bool,
	retransmitter: Retransmitter,
	rebroadcast: Option<RebroadcastState>,
	rebroadcast_generation: u64,
	stats: Arc<Stats>,
}

impl Nakack {
	pub(crate) fn new(
		local: Address,
		mut config: Config,
		retransmitter: Retransmitter,
		stats: Arc<Stats>,
	) -> Self {
		if config.xmit_from_random_member && config.discard_delivered {
			tracing::warn!(
				"xmit_from_random_member is set, forcing discard_delivered \
				 off"
			);
			config.discard_delivered = false;
		}

		Self {
			config,
			local,
			seqno: 0,
			sent: BTreeMap::new(),
			windows: HashMap::new(),
			members: Vec::new(),
			view: None,
			is_server: false,
			leaving: false,
			retransmitter,
			rebroadcast: None,
			rebroadcast_generation: 0,
			stats,
		}
	}

	pub(crate) fn down(&mut self, evt: Event, fx: &mut Effects) {
		match evt {
			Event::Msg(msg) if msg.is_multicast() => self.send(msg, fx),
			Event::Stable(digest) => self.stable(&digest, fx),
			Event::GetDigest(reply) => {
				let _ = reply.send(self.digest());
			}
			Event::GetDigestStable(reply) => {
				let _ = reply.send(self.digest_stable());
			}
			Event::SetDigest(digest) => self.set_digest(&digest),
			Event::MergeDigest(digest) => self.merge_digest(&digest),
			Event::Rebroadcast { target, done } => {
				self.start_rebroadcast(target, done, fx);
			}
			Event::Config(update) => {
				self.handle_config(&update);
				fx.down.push(Event::Config(update));
			}
			Event::Disconnect => {
				self.leaving = true;
				self.finish_rebroadcast(false);
				self.reset();
				fx.down.push(Event::Disconnect);
			}
			// unicast messages and unrelated control events pass untouched
			other => fx.down.push(other),
		}
	}

	pub(crate) fn up(&mut self, evt: Event, fx: &mut Effects) {
		match evt {
			Event::Msg(msg) => self.handle_msg(msg, fx),
			Event::ViewChange(view) => {
				self.handle_view(&view, true);
				fx.up.push(Event::ViewChange(view));
			}
			Event::TmpView(view) => {
				self.handle_view(&view, false);
				fx.up.push(Event::TmpView(view));
			}
			Event::BecomeServer => {
				self.is_server = true;
				fx.up.push(Event::BecomeServer);
			}
			Event::SetLocalAddress(addr) => {
				self.local = addr;
				fx.up.push(Event::SetLocalAddress(addr));
			}
			Event::Suspect(addr) => {
				// release the rebroadcast promise, otherwise the caller
				// would wait out the full timeout; a new flush round follows
				// the suspicion anyway
				if self.rebroadcast.is_some() {
					tracing::trace!("cancel rebroadcasting");
					self.finish_rebroadcast(false);
				}
				fx.up.push(Event::Suspect(addr));
			}
			Event::Stable(digest) => self.stable(&digest, fx),
			Event::Config(update) => {
				self.handle_config(&update);
				fx.up.push(Event::Config(update));
			}
			other => fx.up.push(other),
		}
	}

	/// Deferred timer callback from the worker loop.
	pub(crate) fn on_timer(&mut self, timer: NakackTimer, fx: &mut Effects) {
		match timer {
			NakackTimer::RebroadcastTick { generation } => {
				self.on_rebroadcast_tick(generation, fx);
			}
		}
	}
}

/// Downward path
impl Nakack {
	/// Assigns the next seqno, stores the message in the sent table and
	/// passes it down. Seqno assignment and storing are one step: a message
	/// that fails to leave through the transport stays retransmittable and
	/// the seqno is never rolled back.
	fn send(&mut self, mut msg: Message, fx: &mut Effects) {
		self.seqno += 1;
		let seqno = self.seqno;

		if msg.src().is_none() {
			msg = msg.with_src(self.local);
		}
		msg.headers_mut().set_nakack(NakAckHeader::Msg(seqno));
		self.sent.insert(seqno, msg.clone());

		tracing::trace!(seqno, "sending multicast");
		fx.down.push(Event::Msg(msg));
	}

	/// Garbage collects messages that every member has delivered, lagging
	/// `gc_lag` seqnos behind the stability vector.
	fn stable(&mut self, digest: &Digest, fx: &mut Effects) {
		for (sender, entry) in digest.senders() {
			// when the stability vector has seen a higher seqno than we ever
			// received, the sender's last message was dropped; chase it
			// explicitly since no later message will reveal the gap
			let mine = self.windows.get(sender).map(ReceiverWindow::highest_received);
			if let Some(mine) = mine {
				if entry.high_seen > 0 && entry.high_seen > mine {
					tracing::trace!(
						sender = %sender,
						highest_received = mine,
						stability_high = entry.high_seen,
						"last message dropped, requesting retransmission",
					);
					self.retransmit(
						XmitRequest {
							low: entry.high_seen,
							high: entry.high_seen,
							sender: *sender,
						},
						fx,
					);
				}
			}

			let Some(cut) = entry.high.checked_sub(self.config.gc_lag) else {
				continue;
			};

			tracing::trace!(sender = %sender, up_to = cut, "collecting stable messages");
			if *sender == self.local {
				self.sent = self.sent.split_off(&(cut + 1));
			}
			if let Some(win) = self.windows.get_mut(sender) {
				win.stable(cut);
			}
		}
	}

	/// Replaces all receive windows with fresh ones positioned at the
	/// digest's high seqnos.
	fn set_digest(&mut self, digest: &Digest) {
		// own messages sent between joining and installing the digest stay
		// in the sent table so retransmit requests for them can still be
		// served; stability collects them later
		for win in self.windows.values_mut() {
			win.reset();
		}
		self.windows.clear();

		for (sender, entry) in digest.senders() {
			let win = self.new_window(*sender, entry.high);
			self.windows.insert(*sender, win);
		}
	}

	/// Adjusts the receive windows after a merge. Unknown senders get a
	/// window at the digest's high; a window trailing the digest is replaced
	/// outright, since the missing messages were already delivered in the
	/// other subgroup.
	fn merge_digest(&mut self, digest: &Digest) {
		for (sender, entry) in digest.senders() {
			let replace = match self.windows.get(sender) {
				None => true,
				Some(win) => win.highest_received() < entry.high,
			};
			if !replace {
				continue;
			}

			if let Some(mut old) = self.windows.remove(sender) {
				tracing::debug!(
					sender = %sender,
					high = entry.high,
					"repositioning receive window after merge",
				);
				old.reset();
			}
			let win = self.new_window(*sender, entry.high);
			self.windows.insert(*sender, win);
		}
	}
}

/// Upward path
impl Nakack {
	fn handle_msg(&mut self, msg: Message, fx: &mut Effects) {
		let Some(header) = msg.headers().nakack().cloned() else {
			// not ours, e.g. a unicast; pass up unchanged
			fx.up.push(Event::Msg(msg));
			return;
		};

		// discard multicasts until the join completed
		if !self.is_server {
			tracing::trace!("discarding message, not yet a server");
			return;
		}

		match header {
			NakAckHeader::Msg(seqno) => self.handle_multicast(seqno, msg, fx),
			NakAckHeader::XmitReq { low, high, sender } => {
				let requester = msg.src().copied();
				self.handle_xmit_req(requester, low, high, &sender, fx);
			}
			NakAckHeader::XmitRsp { low, high } => {
				tracing::trace!(low, high, "received missing messages");
				self.handle_xmit_rsp(&msg, fx);
			}
		}
	}

	/// Adds the message to its sender's window, then drains as many in-order
	/// messages as possible upward. OOB messages are dispatched immediately
	/// on insertion and skipped by the ordered drain.
	fn handle_multicast(
		&mut self,
		seqno: Seqno,
		msg: Message,
		fx: &mut Effects,
	) {
		let Some(src) = msg.src().copied() else {
			tracing::warn!("discarding multicast without a source");
			return;
		};

		tracing::trace!(sender = %src, seqno, "received multicast");

		let Some(win) = self.windows.get_mut(&src) else {
			if !self.leaving {
				tracing::warn!(
					sender = %src,
					view = ?self.view,
					"discarding message from non-member",
				);
			}
			return;
		};

		let oob = msg.is_oob().then(|| msg.clone());
		let outcome = win.add(seqno, msg);
		if outcome == AddOutcome::FilledGap {
			Stats::add(&self.stats.missing_received, 1);
		}
		if outcome.is_added() {
			if let Some(oob_msg) = oob {
				fx.up.push(Event::Msg(oob_msg));
			}
		}

		while let Some(deliverable) = win.remove() {
			// OOB messages were already dispatched on insertion
			if deliverable.is_oob() {
				continue;
			}
			fx.up.push(Event::Msg(deliverable));
		}
	}

	/// Serves a retransmission request from the sent table (when we are the
	/// original sender) or from the original sender's receive window,
	/// bundling the messages into responses bounded by `max_xmit_size`.
	fn handle_xmit_req(
		&mut self,
		requester: Option<Address>,
		low: Seqno,
		high: Seqno,
		original_sender: &Address,
		fx: &mut Effects,
	) {
		tracing::trace!(
			requester = ?requester,
			sender = %original_sender,
			low,
			high,
			"received retransmit request",
		);

		if low > high {
			tracing::warn!(low, high, "invalid retransmit range");
			return;
		}
		Stats::add(&self.stats.xmit_reqs_received, high - low + 1);

		let am_sender = *original_sender == self.local;
		let mut batch: Vec<Message> = Vec::new();
		let mut size = 0u64;
		let mut marker = low;

		for seqno in low..=high {
			let found = if am_sender {
				self.sent.get(&seqno)
			} else {
				self
					.windows
					.get(original_sender)
					.and_then(|win| win.get(seqno))
			};
			let Some(msg) = found else {
				tracing::warn!(
					sender = %original_sender,
					seqno,
					"message not found for retransmission, skipping",
				);
				continue;
			};

			let mut msg = msg.clone();
			if msg.src().is_none() {
				msg = msg.with_src(self.local);
			}

			let len = msg.size() as u64;
			size += len;
			if size > self.config.max_xmit_size && !batch.is_empty() {
				self.send_xmit_rsp(requester, &batch, marker, seqno - 1, fx);
				marker = seqno;
				batch.clear();
				size = len;
			}
			batch.push(msg);
		}

		if !batch.is_empty() {
			self.send_xmit_rsp(requester, &batch, marker, high, fx);
		}
	}

	fn send_xmit_rsp(
		&self,
		requester: Option<Address>,
		batch: &[Message],
		low: Seqno,
		high: Seqno,
		fx: &mut Effects,
	) {
		let dest = if self.config.use_mcast_xmit {
			None
		} else {
			requester
		};

		let payload = match protocol::encode_batch(batch) {
			Ok(payload) => payload,
			Err(error) => {
				// the requester will simply reissue its xmit request
				tracing::error!(%error, "failed encoding retransmit batch");
				return;
			}
		};

		tracing::trace!(low, high, dest = ?dest, "retransmitting messages");

		let mut msg = match dest {
			Some(dest) => Message::unicast(dest, payload),
			None => Message::multicast(payload),
		}
		.with_src(self.local);
		msg
			.headers_mut()
			.set_nakack(NakAckHeader::XmitRsp { low, high });

		Stats::add(&self.stats.xmit_rsps_sent, batch.len() as u64);
		fx.down.push(Event::Msg(msg));
	}

	/// Reinjects every message of a retransmit response through the normal
	/// receive path, so ordered delivery takes over.
	fn handle_xmit_rsp(&mut self, msg: &Message, fx: &mut Effects) {
		match protocol::decode_batch(msg.payload()) {
			Ok(batch) => {
				Stats::add(&self.stats.xmit_rsps_received, batch.len() as u64);
				for recovered in batch {
					self.up(Event::Msg(recovered), fx);
				}

				let caught_up = self
					.rebroadcast
					.as_ref()
					.is_some_and(|state| self.digest().dominates(&state.target));
				if caught_up {
					tracing::trace!("cancel rebroadcasting");
					self.finish_rebroadcast(true);
				}
			}
			Err(error) => {
				tracing::error!(
					%error,
					"failed decoding retransmitted message batch",
				);
			}
		}
	}

	/// Drops windows of departed members (unless the view is tentative) and
	/// creates fresh windows at seqno 0 for new ones.
	fn handle_view(&mut self, view: &View, remove: bool) {
		self.members = view.members().to_vec();

		if remove {
			let stale: Vec<Address> = self
				.windows
				.keys()
				.filter(|sender| !self.members.contains(sender))
				.copied()
				.collect();
			for sender in stale {
				tracing::debug!(
					sender = %sender,
					"removing receive window, no longer a member",
				);
				if let Some(mut win) = self.windows.remove(&sender) {
					win.reset();
				}
			}

			self.is_server = true;
			self.view = Some(view.clone());
		}

		for member in self.members.clone() {
			if !self.windows.contains_key(&member) {
				let win = self.new_window(member, 0);
				self.windows.insert(member, win);
			}
		}
	}
}

/// Retransmission and rebroadcast
impl Nakack {
	/// Issues an XMIT_REQ, addressed to the original sender or, when so
	/// configured, to a random other member.
	pub(crate) fn retransmit(&self, request: XmitRequest, fx: &mut Effects) {
		let mut dest = request.sender;
		if self.config.xmit_from_random_member && request.sender != self.local
		{
			if let Some(member) = self.random_member() {
				dest = member;
			}
		}

		tracing::trace!(
			low = request.low,
			high = request.high,
			sender = %request.sender,
			dest = %dest,
			"sending retransmit request",
		);

		let mut msg = Message::unicast(dest, Bytes::new())
			.oob()
			.with_src(self.local);
		msg.headers_mut().set_nakack(NakAckHeader::XmitReq {
			low: request.low,
			high: request.high,
			sender: request.sender,
		});

		Stats::add(&self.stats.xmit_reqs_sent, request.high - request.low + 1);
		fx.down.push(Event::Msg(msg));
	}

	fn random_member(&self) -> Option<Address> {
		let candidates: Vec<Address> = self
			.members
			.iter()
			.filter(|member| **member != self.local)
			.copied()
			.collect();
		candidates.choose(&mut rand::rng()).copied()
	}

	/// Enters the rebroadcast loop chasing `target`. Progress is re-checked
	/// whenever retransmitted messages arrive and on a periodic tick; the
	/// promise resolves `true` once the local digest dominates the target
	/// and `false` on timeout or cancellation.
	fn start_rebroadcast(
		&mut self,
		target: Digest,
		done: oneshot::Sender<bool>,
		fx: &mut Effects,
	) {
		// a superseded rebroadcast counts as failed
		self.finish_rebroadcast(false);

		self.rebroadcast_generation += 1;
		let generation = self.rebroadcast_generation;
		self.rebroadcast = Some(RebroadcastState {
			target,
			done,
			deadline: Instant::now() + self.config.max_rebroadcast_timeout,
			generation,
		});

		if !self.rebroadcast_pass(fx) {
			// nothing to chase, the local digest already dominates
			self.finish_rebroadcast(true);
			return;
		}

		fx.timers.push(Timer::Nakack {
			kind: NakackTimer::RebroadcastTick { generation },
			after: self.rebroadcast_tick(),
		});
	}

	/// One comparison pass: requests retransmission for every sender whose
	/// target high exceeds ours. Returns whether anything was requested.
	fn rebroadcast_pass(&self, fx: &mut Effects) -> bool {
		let Some(state) = &self.rebroadcast else {
			return false;
		};

		let mine = self.digest();
		let requests: Vec<XmitRequest> = state
			.target
			.senders()
			.filter_map(|(sender, theirs)| {
				let my_entry = mine.get(sender)?;
				(theirs.high > my_entry.high).then(|| XmitRequest {
					low: my_entry.high + 1,
					high: theirs.high,
					sender: *sender,
				})
			})
			.collect();

		let requested = !requests.is_empty();
		for request in requests {
			self.retransmit(request, fx);
		}
		requested
	}

	fn on_rebroadcast_tick(&mut self, generation: u64, fx: &mut Effects) {
		let Some(state) = &self.rebroadcast else {
			return;
		};
		if state.generation != generation {
			return;
		}
		let deadline = state.deadline;

		if self.digest().dominates(&state.target) {
			self.finish_rebroadcast(true);
			return;
		}
		if Instant::now() >= deadline {
			tracing::warn!("rebroadcast timed out chasing target digest");
			self.finish_rebroadcast(false);
			return;
		}

		if !self.rebroadcast_pass(fx) {
			self.finish_rebroadcast(true);
			return;
		}
		fx.timers.push(Timer::Nakack {
			kind: NakackTimer::RebroadcastTick { generation },
			after: self.rebroadcast_tick(),
		});
	}

	fn finish_rebroadcast(&mut self, caught_up: bool) {
		if let Some(state) = self.rebroadcast.take() {
			let _ = state.done.send(caught_up);
		}
	}

	fn rebroadcast_tick(&self) -> Duration {
		self.config.max_rebroadcast_timeout / NUM_REBROADCAST_MSGS
	}
}

/// Digests and lifecycle
impl Nakack {
	/// Digest of the highest seqnos *received* per member.
	pub(crate) fn digest(&self) -> Digest {
		self
			.members
			.iter()
			.filter_map(|member| {
				let win = self.windows.get(member)?;
				Some((
					*member,
					DigestEntry::new(
						win.lowest_seen(),
						win.highest_received(),
						self.high_seen(member, win),
					),
				))
			})
			.collect()
	}

	/// Digest of the highest seqnos *delivered* (gap-free) per member, with
	/// the highest seqno seen regardless of gaps. The latter lets the
	/// stability protocol detect a sender's dropped last message.
	pub(crate) fn digest_stable(&self) -> Digest {
		self
			.members
			.iter()
			.filter_map(|member| {
				let win = self.windows.get(member)?;
				Some((
					*member,
					DigestEntry::new(
						win.lowest_seen(),
						win.highest_delivered(),
						self.high_seen(member, win),
					),
				))
			})
			.collect()
	}

	/// Highest seqno seen from `member`; for the local process this is the
	/// highest seqno *sent*, which may be ahead of its own receive window.
	fn high_seen(&self, member: &Address, win: &ReceiverWindow) -> Seqno {
		if *member == self.local {
			self.seqno
		} else {
			win.highest_received()
		}
	}

	fn handle_config(&mut self, update: &ConfigUpdate) {
		if let Some(frag_size) = update.frag_size {
			tracing::debug!(
				max_xmit_size = frag_size,
				"adopting frag_size as retransmission bundle bound",
			);
			self.config.max_xmit_size = frag_size;
		}
	}

	fn new_window(&self, sender: Address, initial: Seqno) -> ReceiverWindow {
		ReceiverWindow::new(
			sender,
			initial,
			self.retransmitter.clone(),
			self.config.discard_delivered,
			self.config.max_xmit_buf_size,
		)
	}

	fn reset(&mut self) {
		self.sent.clear();
		self.seqno = 0;
		for win in self.windows.values_mut() {
			win.destroy();
		}
		self.windows.clear();
	}
}

#[cfg(test)]
mod tests {
	use {
		super::*,
		crate::{View, ViewId},
		tokio::sync::mpsc,
		tokio_util::sync::CancellationToken,
	};

	fn members(names: &[&str]) -> Vec<Address> {
		let mut addrs: Vec<Address> =
			names.iter().map(Address::from_name).collect();
		addrs.sort();
		addrs
	}

	fn nakack(local: Address, config: Config) -> Nakack {
		let (tx, _rx) = mpsc::unbounded_channel();
		let retransmitter = Retransmitter::new(
			tx,
			vec![Duration::from_millis(10)],
			CancellationToken::new(),
		);
		Nakack::new(local, config, retransmitter, Arc::new(Stats::default()))
	}

	fn install_view(nakack: &mut Nakack, addrs: &[Address]) {
		let view = View::new(ViewId::new(addrs[0], 1), addrs.to_vec());
		let mut fx = Effects::new();
		nakack.up(Event::ViewChange(view), &mut fx);
	}

	fn mcast(src: Address, seqno: Seqno, tag: &str) -> Message {
		let mut msg =
			Message::multicast(Bytes::copy_from_slice(tag.as_bytes()))
				.with_src(src);
		msg.headers_mut().set_nakack(NakAckHeader::Msg(seqno));
		msg
	}

	fn sent_seqnos(fx: &Effects) -> Vec<Seqno> {
		fx.down
			.iter()
			.filter_map(|evt| match evt {
				Event::Msg(msg) => match msg.headers().nakack() {
					Some(NakAckHeader::Msg(seqno)) => Some(*seqno),
					_ => None,
				},
				_ => None,
			})
			.collect()
	}

	fn delivered_payloads(fx: &Effects) -> Vec<Vec<u8>> {
		fx.up
			.iter()
			.filter_map(|evt| match evt {
				Event::Msg(msg) => Some(msg.payload().to_vec()),
				_ => None,
			})
			.collect()
	}

	#[test]
	fn assigns_incrementing_seqnos() {
		let addrs = members(&["a", "b"]);
		let mut nak = nakack(addrs[0], Config::default());
		install_view(&mut nak, &addrs);

		let mut fx = Effects::new();
		for tag in ["m1", "m2", "m3"] {
			nak.down(
				Event::Msg(Message::multicast(Bytes::copy_from_slice(
					tag.as_bytes(),
				))),
				&mut fx,
			);
		}

		assert_eq!(sent_seqnos(&fx), vec![1, 2, 3]);
	}

	#[tokio::test]
	async fn reorders_messages_per_sender() {
		let addrs = members(&["a", "b"]);
		let (local, remote) = (addrs[0], addrs[1]);
		let mut nak = nakack(local, Config::default());
		install_view(&mut nak, &addrs);

		let mut fx = Effects::new();
		nak.up(Event::Msg(mcast(remote, 2, "m2")), &mut fx);
		assert!(delivered_payloads(&fx).is_empty());

		nak.up(Event::Msg(mcast(remote, 1, "m1")), &mut fx);
		assert_eq!(delivered_payloads(&fx), vec![
			b"m1".to_vec(),
			b"m2".to_vec()
		]);
	}

	#[test]
	fn drops_multicast_from_non_member() {
		let addrs = members(&["a", "b"]);
		let mut nak = nakack(addrs[0], Config::default());
		install_view(&mut nak, &addrs);

		let stranger = Address::from_name("stranger");
		let mut fx = Effects::new();
		nak.up(Event::Msg(mcast(stranger, 1, "m1")), &mut fx);

		assert!(delivered_payloads(&fx).is_empty());
	}

	#[test]
	fn discards_multicasts_until_server() {
		let addrs = members(&["a", "b"]);
		let mut nak = nakack(addrs[0], Config::default());

		let mut fx = Effects::new();
		nak.up(Event::Msg(mcast(addrs[1], 1, "m1")), &mut fx);
		assert!(delivered_payloads(&fx).is_empty());
	}

	#[tokio::test]
	async fn oob_messages_are_dispatched_once() {
		let addrs = members(&["a", "b"]);
		let (local, remote) = (addrs[0], addrs[1]);
		let mut nak = nakack(local, Config::default());
		install_view(&mut nak, &addrs);

		// the oob message arrives ahead of a gap and is dispatched at once
		let mut fx = Effects::new();
		let mut oob = mcast(remote, 2, "oob");
		oob = oob.oob();
		nak.up(Event::Msg(oob), &mut fx);
		assert_eq!(delivered_payloads(&fx), vec![b"oob".to_vec()]);

		// closing the gap delivers the regular message only; the oob one is
		// skipped by the ordered drain
		let mut fx = Effects::new();
		nak.up(Event::Msg(mcast(remote, 1, "m1")), &mut fx);
		assert_eq!(delivered_payloads(&fx), vec![b"m1".to_vec()]);
	}

	#[test]
	fn sent_table_serves_xmit_requests_until_stable() {
		let addrs = members(&["a", "b"]);
		let (local, remote) = (addrs[0], addrs[1]);
		let config = Config::builder()
			.with_gc_lag(0)
			.with_use_mcast_xmit(false)
			.build()
			.unwrap();
		let mut nak = nakack(local, config);
		install_view(&mut nak, &addrs);

		let mut fx = Effects::new();
		for tag in ["m1", "m2", "m3"] {
			nak.down(
				Event::Msg(Message::multicast(Bytes::copy_from_slice(
					tag.as_bytes(),
				))),
				&mut fx,
			);
		}

		let mut xmit_req = Message::unicast(local, Bytes::new())
			.with_src(remote);
		xmit_req.headers_mut().set_nakack(NakAckHeader::XmitReq {
			low: 1,
			high: 3,
			sender: local,
		});

		// before stability the whole range is served back
		let mut fx = Effects::new();
		nak.up(Event::Msg(xmit_req.clone()), &mut fx);
		let batches: Vec<usize> = fx
			.down
			.iter()
			.filter_map(|evt| match evt {
				Event::Msg(msg)
					if matches!(
						msg.headers().nakack(),
						Some(NakAckHeader::XmitRsp { .. })
					) =>
				{
					Some(protocol::decode_batch(msg.payload()).unwrap().len())
				}
				_ => None,
			})
			.collect();
		assert_eq!(batches.iter().sum::<usize>(), 3);

		// everything up to seqno 3 is declared stable and truncated
		let stable: Digest =
			[(local, DigestEntry::new(0, 3, 0))].into_iter().collect();
		let mut fx = Effects::new();
		nak.down(Event::Stable(stable), &mut fx);

		let mut fx = Effects::new();
		nak.up(Event::Msg(xmit_req), &mut fx);
		assert!(fx.down.iter().all(|evt| !matches!(
			evt,
			Event::Msg(msg)
				if matches!(
					msg.headers().nakack(),
					Some(NakAckHeader::XmitRsp { .. })
				)
		)));
	}

	#[tokio::test]
	async fn merge_digest_positions_windows_for_new_senders() {
		let addrs = members(&["a", "b", "c", "d"]);
		let (local, known) = (addrs[0], addrs[1]);
		let mut nak = nakack(local, Config::default());
		install_view(&mut nak, &addrs[..2]);

		let merged: Digest = [
			(addrs[2], DigestEntry::new(0, 5, 5)),
			(addrs[3], DigestEntry::new(0, 2, 2)),
		]
		.into_iter()
		.collect();
		let mut fx = Effects::new();
		nak.down(Event::MergeDigest(merged), &mut fx);
		install_view(&mut nak, &addrs);

		// a message continuing from the digest high delivers with no gap
		let mut fx = Effects::new();
		nak.up(Event::Msg(mcast(addrs[2], 6, "m6")), &mut fx);
		assert_eq!(delivered_payloads(&fx), vec![b"m6".to_vec()]);

		// existing windows are left alone
		let mut fx = Effects::new();
		nak.up(Event::Msg(mcast(known, 1, "k1")), &mut fx);
		assert_eq!(delivered_payloads(&fx), vec![b"k1".to_vec()]);
	}

	#[tokio::test]
	async fn tentative_views_never_drop_windows() {
		let addrs = members(&["a", "b", "c"]);
		let mut nak = nakack(addrs[0], Config::default());
		install_view(&mut nak, &addrs);

		// a tentative view without the last member keeps its window
		let tmp = View::new(ViewId::new(addrs[0], 2), addrs[..2].to_vec());
		let mut fx = Effects::new();
		nak.up(Event::TmpView(tmp), &mut fx);

		let mut fx = Effects::new();
		nak.up(Event::Msg(mcast(addrs[2], 1, "m1")), &mut fx);
		assert_eq!(delivered_payloads(&fx), vec![b"m1".to_vec()]);

		// a definitive view without the member drops it
		let definitive =
			View::new(ViewId::new(addrs[0], 3), addrs[..2].to_vec());
		let mut fx = Effects::new();
		nak.up(Event::ViewChange(definitive), &mut fx);

		let mut fx = Effects::new();
		nak.up(Event::Msg(mcast(addrs[2], 2, "m2")), &mut fx);
		assert!(delivered_payloads(&fx).is_empty());
	}

	#[test]
	fn rebroadcast_resolves_immediately_when_dominating() {
		let addrs = members(&["a", "b"]);
		let mut nak = nakack(addrs[0], Config::default());
		install_view(&mut nak, &addrs);

		let target: Digest =
			[(addrs[1], DigestEntry::new(0, 0, 0))].into_iter().collect();
		let (tx, mut rx) = oneshot::channel();
		let mut fx = Effects::new();
		nak.down(
			Event::Rebroadcast {
				target,
				done: tx,
			},
			&mut fx,
		);

		assert_eq!(rx.try_recv(), Ok(true));
		assert!(fx.timers.is_empty());
	}

	#[test]
	fn suspect_cancels_an_active_rebroadcast() {
		let addrs = members(&["a", "b"]);
		let mut nak = nakack(addrs[0], Config::default());
		install_view(&mut nak, &addrs);

		let target: Digest =
			[(addrs[1], DigestEntry::new(0, 4, 4))].into_iter().collect();
		let (tx, mut rx) = oneshot::channel();
		let mut fx = Effects::new();
		nak.down(
			Event::Rebroadcast {
				target,
				done: tx,
			},
			&mut fx,
		);
		assert!(rx.try_recv().is_err());

		let mut fx = Effects::new();
		nak.up(Event::Suspect(addrs[1]), &mut fx);
		assert_eq!(rx.try_recv(), Ok(false));
	}
}
