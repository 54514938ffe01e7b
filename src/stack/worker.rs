use {
	super::effects::{Effects, Timer},
	crate::{
		Event,
		flush::Flush,
		nakack::{Nakack, XmitRequest},
		primitives::AsyncWorkQueue,
	},
	futures::StreamExt,
	tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender},
	tokio_util::sync::CancellationToken,
};

/// Which layer of the chain produced a set of effects. Events continue from
/// there: upward effects of the bottom layer enter the top layer, downward
/// effects of the top layer enter the bottom one, and whatever passes the
/// ends of the chain is handed to the application or the transport.
#[derive(Debug, Clone, Copy)]
enum Layer {
	Flush,
	Nakack,
}

/// The long-running task driving one stack instance. Owns all protocol
/// state; events from the application, the transport, the retransmission
/// timers and the deferred-timer queue are processed strictly one at a time.
pub(crate) struct WorkerLoop {
	pub(crate) flush: Flush,
	pub(crate) nakack: Nakack,
	pub(crate) down_rx: UnboundedReceiver<Event>,
	pub(crate) ingress_rx: UnboundedReceiver<Event>,
	pub(crate) xmit_rx: UnboundedReceiver<XmitRequest>,
	pub(crate) app_tx: UnboundedSender<Event>,
	pub(crate) transport_tx: UnboundedSender<Event>,
	pub(crate) timers: AsyncWorkQueue<Timer>,
	pub(crate) cancel: CancellationToken,
}

impl WorkerLoop {
	pub(crate) async fn run(mut self) {
		let mut fx = Effects::new();
		self.flush.startup(&mut fx);
		self.apply(Layer::Flush, fx);

		loop {
			tokio::select! {
				() = self.cancel.cancelled() => {
					tracing::debug!("stack worker terminated");
					break;
				}

				// events from the application side travel down
				Some(evt) = self.down_rx.recv() => {
					let mut fx = Effects::new();
					self.flush.down(evt, &mut fx);
					self.apply(Layer::Flush, fx);
				}

				// events from the transport side travel up
				Some(evt) = self.ingress_rx.recv() => {
					let mut fx = Effects::new();
					self.nakack.up(evt, &mut fx);
					self.apply(Layer::Nakack, fx);
				}

				// retransmission demands from gap backoff tasks
				Some(request) = self.xmit_rx.recv() => {
					let mut fx = Effects::new();
					self.nakack.retransmit(request, &mut fx);
					self.apply(Layer::Nakack, fx);
				}

				Some(timer) = self.timers.next() => self.on_timer(timer),

				else => break,
			}
		}
	}

	fn on_timer(&mut self, timer: Timer) {
		match timer {
			Timer::Flush { kind, .. } => {
				let mut fx = Effects::new();
				self.flush.on_timer(kind, &mut fx);
				self.apply(Layer::Flush, fx);
			}
			Timer::Nakack { kind, .. } => {
				let mut fx = Effects::new();
				self.nakack.on_timer(kind, &mut fx);
				self.apply(Layer::Nakack, fx);
			}
		}
	}

	/// Routes the effects of one layer through the rest of the chain.
	fn apply(&mut self, at: Layer, fx: Effects) {
		let Effects { down, up, timers } = fx;

		for timer in timers {
			self.arm(timer);
		}

		for evt in up {
			match at {
				Layer::Nakack => {
					let mut fx = Effects::new();
					self.flush.up(evt, &mut fx);
					self.apply(Layer::Flush, fx);
				}
				Layer::Flush => {
					let _ = self.app_tx.send(evt);
				}
			}
		}

		for evt in down {
			match at {
				Layer::Flush => {
					let mut fx = Effects::new();
					self.nakack.down(evt, &mut fx);
					self.apply(Layer::Nakack, fx);
				}
				Layer::Nakack => {
					let _ = self.transport_tx.send(evt);
				}
			}
		}
	}

	fn arm(&mut self, timer: Timer) {
		let after = match &timer {
			Timer::Flush { after, .. } | Timer::Nakack { after, .. } => {
				*after
			}
		};
		self.timers.enqueue(async move {
			tokio::time::sleep(after).await;
			timer
		});
	}
}
