#![allow(unused)]

use {
	bytes::Bytes,
	cohort::{flush, nakack, prelude::*},
	core::time::Duration,
	std::sync::{Arc, Mutex, Once},
	tokio::sync::mpsc::UnboundedReceiver,
};

/// Opt-in log output for test runs, e.g. `TEST_TRACE=debug`.
pub fn init_tracing() {
	static INIT: Once = Once::new();
	INIT.call_once(|| {
		if std::env::var("TEST_TRACE").is_ok() {
			let _ = tracing_subscriber::fmt()
				.with_env_filter(tracing_subscriber::EnvFilter::from_env(
					"TEST_TRACE",
				))
				.try_init();
		}
	});
}

pub fn payload(tag: &str) -> Bytes {
	Bytes::copy_from_slice(tag.as_bytes())
}

/// One member process: its stack handle and the application-side events.
pub struct Node {
	pub addr: Address,
	pub stack: Stack,
	pub events: UnboundedReceiver<Event>,
}

enum DropRule {
	/// Drop the multicast with this seqno once on the given link.
	Seqno {
		from: Address,
		to: Address,
		seqno: Seqno,
		done: bool,
	},

	/// Drop every frame from or to this member.
	Blackhole(Address),
}

/// A set of stacks wired through an in-memory mesh transport. Multicasts are
/// delivered to every node including the sender; unicasts point-to-point
/// (the local node included). Frames can be selectively dropped to simulate
/// loss and partitions.
pub struct Cluster {
	pub nodes: Vec<Node>,
	rules: Arc<Mutex<Vec<DropRule>>>,
	view_counter: u64,
}

impl Cluster {
	pub fn new(size: usize) -> Self {
		Self::with_configs(
			size,
			nakack::Config::default(),
			flush::Config::default(),
		)
	}

	pub fn with_configs(
		size: usize,
		nakack_config: nakack::Config,
		flush_config: flush::Config,
	) -> Self {
		init_tracing();

		let mut addrs: Vec<Address> = (0..size)
			.map(|i| Address::from_name(format!("node-{i}")))
			.collect();
		addrs.sort();

		let rules: Arc<Mutex<Vec<DropRule>>> =
			Arc::new(Mutex::new(Vec::new()));

		let mut stacks: Vec<(Address, Stack)> = Vec::new();
		let mut ios = Vec::new();
		for addr in &addrs {
			let (stack, io) = Stack::builder(*addr)
				.with_nakack(nakack_config.clone())
				.with_flush(flush_config.clone())
				.build();
			stacks.push((*addr, stack));
			ios.push(io);
		}

		let mut nodes = Vec::new();
		for (addr, io) in addrs.iter().zip(ios) {
			let StackIo { events, outbound } = io;
			tokio::spawn(route(
				*addr,
				outbound,
				stacks.clone(),
				Arc::clone(&rules),
			));

			let stack = stacks
				.iter()
				.find(|(a, _)| a == addr)
				.map(|(_, s)| s.clone())
				.unwrap();
			nodes.push(Node {
				addr: *addr,
				stack,
				events,
			});
		}

		Self {
			nodes,
			rules,
			view_counter: 0,
		}
	}

	/// Installs a view over the given node indices, delivered to exactly
	/// those nodes. Node indices are in address order, so the first listed
	/// member is the coordinator.
	pub fn install_view(&mut self, members: &[usize]) -> View {
		self.install_view_at(members, members)
	}

	/// Installs a view with the given members, delivered to the `at` nodes.
	pub fn install_view_at(
		&mut self,
		members: &[usize],
		at: &[usize],
	) -> View {
		let view = self.make_view(members, false);
		for i in at {
			self.nodes[*i].stack.up(Event::ViewChange(view.clone()));
		}
		view
	}

	/// Installs a merge view over the given node indices on all of them.
	pub fn install_merge_view(&mut self, members: &[usize]) -> View {
		let view = self.make_view(members, true);
		for i in members {
			self.nodes[*i].stack.up(Event::ViewChange(view.clone()));
		}
		view
	}

	fn make_view(&mut self, members: &[usize], merged: bool) -> View {
		self.view_counter += 1;
		let addrs: Vec<Address> =
			members.iter().map(|i| self.nodes[*i].addr).collect();
		let id = ViewId::new(addrs[0], self.view_counter);
		if merged {
			View::merge(id, addrs)
		} else {
			View::new(id, addrs)
		}
	}

	/// Drops the multicast with the given seqno once on the `from -> to`
	/// link. Retransmissions are not affected.
	pub fn drop_seqno(&self, from: usize, to: usize, seqno: Seqno) {
		self.rules.lock().unwrap().push(DropRule::Seqno {
			from: self.nodes[from].addr,
			to: self.nodes[to].addr,
			seqno,
			done: false,
		});
	}

	/// Drops every frame from or to the given node from now on.
	pub fn blackhole(&self, node: usize) {
		self
			.rules
			.lock()
			.unwrap()
			.push(DropRule::Blackhole(self.nodes[node].addr));
	}

	/// Injects a failure-detector suspicion for `suspect` at every node.
	pub fn suspect_everywhere(&self, suspect: usize) {
		let addr = self.nodes[suspect].addr;
		for node in &self.nodes {
			node.stack.up(Event::Suspect(addr));
		}
	}
}

async fn route(
	from: Address,
	mut outbound: UnboundedReceiver<Event>,
	peers: Vec<(Address, Stack)>,
	rules: Arc<Mutex<Vec<DropRule>>>,
) {
	while let Some(evt) = outbound.recv().await {
		let Event::Msg(msg) = evt else {
			continue;
		};

		match msg.dest().copied() {
			None => {
				for (peer, stack) in &peers {
					if !should_drop(&rules, &from, peer, &msg) {
						stack.up(Event::Msg(msg.clone()));
					}
				}
			}
			Some(dest) => {
				let target =
					peers.iter().find(|(peer, _)| *peer == dest);
				if let Some((_, stack)) = target {
					if !should_drop(&rules, &from, &dest, &msg) {
						stack.up(Event::Msg(msg.clone()));
					}
				}
			}
		}
	}
}

fn should_drop(
	rules: &Arc<Mutex<Vec<DropRule>>>,
	from: &Address,
	to: &Address,
	msg: &Message,
) -> bool {
	let mut rules = rules.lock().unwrap();
	for rule in rules.iter_mut() {
		match rule {
			DropRule::Blackhole(addr) => {
				if addr == from || addr == to {
					return true;
				}
			}
			DropRule::Seqno {
				from: rule_from,
				to: rule_to,
				seqno,
				done,
			} => {
				let matches = !*done
					&& rule_from == from
					&& rule_to == to
					&& msg.headers().nakack()
						== Some(&NakAckHeader::Msg(*seqno));
				if matches {
					*done = true;
					return true;
				}
			}
		}
	}
	false
}

const WITHIN: Duration = Duration::from_secs(10);

/// Waits until `pick` accepts an event, discarding everything else.
pub async fn expect_event<T>(
	node: &mut Node,
	mut pick: impl FnMut(Event) -> Option<T>,
) -> T {
	tokio::time::timeout(WITHIN, async {
		loop {
			let evt =
				node.events.recv().await.expect("event stream closed");
			if let Some(value) = pick(evt) {
				return value;
			}
		}
	})
	.await
	.expect("timed out waiting for event")
}

/// Next delivered message payload, discarding non-message events.
pub async fn expect_payload(node: &mut Node) -> Bytes {
	expect_event(node, |evt| match evt {
		Event::Msg(msg) => Some(msg.payload().clone()),
		_ => None,
	})
	.await
}

/// The exact sequence of the next `tags.len()` deliveries.
pub async fn expect_payloads(node: &mut Node, tags: &[&str]) {
	for tag in tags {
		assert_eq!(
			expect_payload(node).await,
			payload(tag),
			"unexpected delivery order",
		);
	}
}

/// Asserts that no message is delivered within the window.
pub async fn expect_no_payload(node: &mut Node, within: Duration) {
	let outcome = tokio::time::timeout(within, async {
		loop {
			match node.events.recv().await {
				Some(Event::Msg(msg)) => return msg,
				Some(_) => continue,
				None => std::future::pending().await,
			}
		}
	})
	.await;

	if let Ok(msg) = outcome {
		panic!("unexpected delivery: {msg:?}");
	}
}

/// Asserts that no event matching `reject` arrives within the window.
pub async fn expect_no_event(
	node: &mut Node,
	within: Duration,
	mut reject: impl FnMut(&Event) -> bool,
) {
	let _ = tokio::time::timeout(within, async {
		loop {
			match node.events.recv().await {
				Some(evt) if reject(&evt) => {
					panic!("unexpected event: {evt:?}")
				}
				Some(_) => continue,
				None => std::future::pending().await,
			}
		}
	})
	.await;
}

/// Consumes the view change and the synthesised unblock a node observes
/// when its first view installs.
pub async fn drain_first_view(node: &mut Node) {
	expect_event(node, |evt| match evt {
		Event::Unblock => Some(()),
		_ => None,
	})
	.await;
}
