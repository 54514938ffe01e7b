//! Cluster-wide flush barrier.
//!
//! Flushing forces group members to deliver their pending messages while
//! blocking them from sending new ones, acquiescing the group so that a
//! state transfer or a view change can be done. Everything multicast in the
//! current view is delivered in that view at every member before the barrier
//! settles, which is the essence of virtual synchrony.
//!
//! The flush caller broadcasts START_FLUSH; every participant raises BLOCK
//! to its application, answers FLUSH_OK once blocked, and reports
//! FLUSH_COMPLETED to the caller after observing FLUSH_OK from every other
//! participant. STOP_FLUSH releases the barrier and surfaces UNBLOCK.

mod config;
mod protocol;

pub use {
	config::{Config, ConfigBuilder},
	protocol::FlushHeader,
};

use {
	crate::{
		Address, ConfigUpdate, Event, Message, View,
		stack::{Effects, FlushTimer, Timer},
	},
	bytes::Bytes,
	std::collections::{BTreeSet, VecDeque},
	tokio::sync::oneshot,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
	/// Normal operation, downward messages flow freely.
	Open,

	/// START_FLUSH received, waiting for the application to acknowledge the
	/// BLOCK event.
	Blocking,

	/// FLUSH_OK sent, the downward gate is shut.
	Blocked,
}

/// A START_FLUSH waiting for the application's BLOCK acknowledgement.
struct PendingStart {
	caller: Address,
	view_id: u64,
	participants: Vec<Address>,
}

/// The flush barrier layer of one stack instance.
pub(crate) struct Flush {
	config: Config,
	local: Address,
	current_view: Option<View>,
	phase: Phase,
	flush_caller: Option<Address>,
	flush_members: BTreeSet<Address>,
	flush_ok_set: BTreeSet<Address>,
	flush_completed_set: BTreeSet<Address>,
	suspected: BTreeSet<Address>,
	/// Guards that UNBLOCK is surfaced exactly once per flush round.
	unblock_emitted: bool,
	received_first_view: bool,
	pending_start: Option<PendingStart>,
	/// Downward messages held while the gate is shut.
	pending_down: VecDeque<Message>,
	gate_generation: u64,
	block_generation: u64,
	/// Promise of a local SUSPEND caller, resolved on flush completion.
	suspend_done: Option<oneshot::Sender<bool>>,
}

impl Flush {
	pub(crate) fn new(local: Address, config: Config) -> Self {
		Self {
			config,
			local,
			current_view: None,
			// the gate opens when the first view installs
			phase: Phase::Blocked,
			flush_caller: None,
			flush_members: BTreeSet::new(),
			flush_ok_set: BTreeSet::new(),
			flush_completed_set: BTreeSet::new(),
			suspected: BTreeSet::new(),
			unblock_emitted: false,
			received_first_view: false,
			pending_start: None,
			pending_down: VecDeque::new(),
			gate_generation: 0,
			block_generation: 0,
			suspend_done: None,
		}
	}

	/// Publishes the flush timeout to the neighbouring layers. Called once
	/// when the stack starts.
	pub(crate) fn startup(&self, fx: &mut Effects) {
		let update = ConfigUpdate {
			frag_size: None,
			flush_timeout: Some(self.config.flush_timeout),
		};
		fx.up.push(Event::Config(update));
		fx.down.push(Event::Config(update));
	}

	pub(crate) fn down(&mut self, evt: Event, fx: &mut Effects) {
		match evt {
			Event::Msg(msg) => {
				if self.gate_shut() {
					if self.pending_down.is_empty() {
						fx.timers.push(Timer::Flush {
							kind: FlushTimer::Gate {
								generation: self.gate_generation,
							},
							after: self.config.flush_timeout,
						});
					}
					tracing::debug!("flush gate holding outbound message");
					self.pending_down.push_back(msg);
				} else {
					fx.down.push(Event::Msg(msg));
				}
			}
			Event::Suspend { view, done } => self.on_suspend(view, done, fx),
			Event::Resume => self.on_resume(fx),
			Event::BlockOk => self.on_block_ok(fx),
			other => fx.down.push(other),
		}
	}

	pub(crate) fn up(&mut self, evt: Event, fx: &mut Effects) {
		match evt {
			Event::Msg(mut msg) => {
				let Some(header) = msg.headers_mut().take_flush() else {
					fx.up.push(Event::Msg(msg));
					return;
				};
				self.handle_header(header, &msg, fx);
			}
			Event::ViewChange(view) => self.on_view_change(view, fx),
			Event::Suspect(addr) => {
				self.on_suspect(addr, fx);
				fx.up.push(Event::Suspect(addr));
			}
			Event::SetLocalAddress(addr) => {
				self.local = addr;
				fx.up.push(Event::SetLocalAddress(addr));
			}
			Event::Suspend { view, done } => self.on_suspend(view, done, fx),
			Event::Resume => self.on_resume(fx),
			other => fx.up.push(other),
		}
	}

	/// Deferred timer callback from the worker loop.
	pub(crate) fn on_timer(&mut self, timer: FlushTimer, fx: &mut Effects) {
		match timer {
			FlushTimer::BlockAck { generation } => {
				if generation != self.block_generation {
					return;
				}
				if self.pending_start.is_some() {
					tracing::warn!(
						timeout = ?self.config.block_timeout,
						"application did not acknowledge BLOCK in time",
					);
					self.complete_start_flush(fx);
				}
			}
			FlushTimer::Gate { generation } => {
				if generation != self.gate_generation || !self.gate_shut() {
					return;
				}
				// livelock avoidance: unilaterally acknowledge the suspend
				// below and let the held messages through
				tracing::warn!("forcing flush unblock");
				fx.down.push(Event::SuspendOk);
				self.open_gate(fx);
			}
		}
	}

	fn gate_shut(&self) -> bool {
		self.phase != Phase::Open
	}
}

/// Participant side
impl Flush {
	fn handle_header(
		&mut self,
		header: FlushHeader,
		msg: &Message,
		fx: &mut Effects,
	) {
		let Some(src) = msg.src().copied() else {
			tracing::warn!("discarding flush message without a source");
			return;
		};

		match header {
			FlushHeader::StartFlush {
				view_id,
				participants,
			} => self.on_start_flush(src, view_id, participants, fx),
			FlushHeader::FlushOk(view_id) if self.is_current(view_id) => {
				self.on_flush_ok(src, view_id, fx);
			}
			FlushHeader::FlushCompleted(view_id)
				if self.is_current(view_id) =>
			{
				self.on_flush_completed(src, fx);
			}
			FlushHeader::StopFlush(view_id) if self.is_current(view_id) => {
				if !self.unblock_emitted {
					self.unblock_emitted = true;
					self.on_stop_flush(fx);
					fx.up.push(Event::Unblock);
					tracing::debug!("unblocked");
				}
			}
			outdated => {
				tracing::debug!(
					header = %outdated,
					"ignoring outdated flush message",
				);
			}
		}
	}

	/// Enters BLOCKING: asks the application to stop sending and proceeds
	/// once it acknowledges or `block_timeout` elapses.
	fn on_start_flush(
		&mut self,
		caller: Address,
		view_id: u64,
		participants: Vec<Address>,
		fx: &mut Effects,
	) {
		tracing::debug!(caller = %caller, "received START_FLUSH");

		self.phase = Phase::Blocking;
		self.unblock_emitted = false;
		self.pending_start = Some(PendingStart {
			caller,
			view_id,
			participants,
		});

		self.block_generation += 1;
		fx.up.push(Event::Block);
		fx.timers.push(Timer::Flush {
			kind: FlushTimer::BlockAck {
				generation: self.block_generation,
			},
			after: self.config.block_timeout,
		});
	}

	fn on_block_ok(&mut self, fx: &mut Effects) {
		if self.pending_start.is_some() {
			tracing::debug!("application acknowledged BLOCK");
			self.complete_start_flush(fx);
		}
	}

	/// Enters BLOCKED and broadcasts FLUSH_OK for the pending flush round.
	fn complete_start_flush(&mut self, fx: &mut Effects) {
		let Some(start) = self.pending_start.take() else {
			return;
		};

		self.phase = Phase::Blocked;
		self.flush_caller = Some(start.caller);
		self.flush_members = start
			.participants
			.iter()
			.filter(|member| !self.suspected.contains(member))
			.copied()
			.collect();

		let mut msg =
			Message::multicast(Bytes::new()).with_src(self.local);
		msg
			.headers_mut()
			.set_flush(FlushHeader::FlushOk(start.view_id));
		tracing::debug!("responding with FLUSH_OK");
		fx.down.push(Event::Msg(msg));

		// flush oks of faster participants may have arrived before ours
		if !self.flush_ok_set.is_empty()
			&& self.flush_ok_set.is_superset(&self.flush_members)
		{
			self.send_flush_completed(start.view_id, fx);
		}
	}

	fn on_flush_ok(&mut self, src: Address, view_id: u64, fx: &mut Effects) {
		self.flush_ok_set.insert(src);
		let complete = self.flush_caller.is_some()
			&& self.flush_ok_set.is_superset(&self.flush_members);

		tracing::debug!(from = %src, complete, "received FLUSH_OK");
		if complete {
			self.send_flush_completed(view_id, fx);
		}
	}

	fn send_flush_completed(&self, view_id: u64, fx: &mut Effects) {
		let Some(caller) = self.flush_caller else {
			return;
		};

		let mut msg =
			Message::unicast(caller, Bytes::new()).with_src(self.local);
		msg
			.headers_mut()
			.set_flush(FlushHeader::FlushCompleted(view_id));
		tracing::debug!(caller = %caller, "sending FLUSH_COMPLETED");
		fx.down.push(Event::Msg(msg));
	}

	fn on_stop_flush(&mut self, fx: &mut Effects) {
		self.flush_completed_set.clear();
		self.flush_ok_set.clear();
		self.flush_members.clear();
		self.flush_caller = None;
		self.open_gate(fx);
	}

	fn open_gate(&mut self, fx: &mut Effects) {
		self.phase = Phase::Open;
		self.gate_generation += 1;
		while let Some(msg) = self.pending_down.pop_front() {
			fx.down.push(Event::Msg(msg));
		}
	}
}

/// Caller side
impl Flush {
	/// Starts a flush round over the given view (current view when absent).
	/// With no participants the suspend is acknowledged immediately.
	fn on_suspend(
		&mut self,
		view: Option<View>,
		done: Option<oneshot::Sender<bool>>,
		fx: &mut Effects,
	) {
		let participants: Vec<Address> = match (&view, &self.current_view) {
			(Some(requested), Some(current)) => requested
				.members()
				.iter()
				.filter(|member| current.contains(member))
				.copied()
				.collect(),
			(None, Some(current)) => current.members().to_vec(),
			(_, None) => Vec::new(),
		};

		self.suspend_done = done;

		if participants.is_empty() {
			fx.down.push(Event::SuspendOk);
			if let Some(promise) = self.suspend_done.take() {
				let _ = promise.send(true);
			}
			return;
		}

		let view_id = self.current_view_id().unwrap_or_default();
		let mut msg =
			Message::multicast(Bytes::new()).with_src(self.local);
		msg.headers_mut().set_flush(FlushHeader::StartFlush {
			view_id,
			participants: participants.clone(),
		});

		tracing::debug!(
			participants = participants.len(),
			"received SUSPEND, broadcasting START_FLUSH",
		);
		fx.down.push(Event::Msg(msg));
	}

	/// Releases the barrier cluster-wide.
	fn on_resume(&mut self, fx: &mut Effects) {
		let view_id = self.current_view_id().unwrap_or_default();
		let mut msg =
			Message::multicast(Bytes::new()).with_src(self.local);
		msg.headers_mut().set_flush(FlushHeader::StopFlush(view_id));
		tracing::debug!("received RESUME, broadcasting STOP_FLUSH");
		fx.down.push(Event::Msg(msg));
	}

	fn on_flush_completed(&mut self, src: Address, fx: &mut Effects) {
		self.flush_completed_set.insert(src);
		let complete = self.flush_caller.is_some()
			&& self.flush_completed_set.is_superset(&self.flush_members);

		tracing::debug!(from = %src, complete, "received FLUSH_COMPLETED");
		if complete {
			if let Some(promise) = self.suspend_done.take() {
				let _ = promise.send(true);
			}
			fx.up.push(Event::SuspendOk);
			fx.down.push(Event::SuspendOk);
			tracing::debug!("flush completed, suspend acknowledged");
		}
	}
}

/// Membership reactions
impl Flush {
	fn on_view_change(&mut self, view: View, fx: &mut Effects) {
		let first_view = !self.received_first_view;
		self.received_first_view = true;

		let members: BTreeSet<Address> =
			view.members().iter().copied().collect();
		self.suspected.retain(|addr| members.contains(addr));

		// if the flush caller left, its STOP_FLUSH will never arrive; the
		// new coordinator completes the flush on the caller's behalf
		let caller_left = self
			.flush_caller
			.is_some_and(|caller| !view.contains(&caller));
		let am_new_coordinator =
			caller_left && view.coordinator() == Some(&self.local);

		self.current_view = Some(view.clone());
		tracing::debug!(view = %view, "installing view");
		fx.up.push(Event::ViewChange(view));

		if am_new_coordinator {
			tracing::debug!("flush caller left, completing flush");
			self.on_resume(fx);
		}

		if first_view {
			// a joiner never saw the flush round around its own join, so it
			// synthesises the STOP_FLUSH and observes view then unblock
			self.unblock_emitted = true;
			self.on_stop_flush(fx);
			fx.up.push(Event::Unblock);
			tracing::debug!("unblocked after first view");
		}
	}

	fn on_suspect(&mut self, addr: Address, fx: &mut Effects) {
		self.suspected.insert(addr);
		let suspected = &self.suspected;
		self.flush_members.retain(|member| !suspected.contains(member));

		let complete = !self.flush_ok_set.is_empty()
			&& self.flush_ok_set.is_superset(&self.flush_members);
		tracing::debug!(suspect = %addr, complete, "member suspected");

		if complete {
			let view_id = self.current_view_id().unwrap_or_default();
			self.send_flush_completed(view_id, fx);
		}
	}

	fn is_current(&self, view_id: u64) -> bool {
		self.current_view_id() == Some(view_id)
	}

	fn current_view_id(&self) -> Option<u64> {
		self.current_view.as_ref().map(|view| view.id().counter())
	}
}
