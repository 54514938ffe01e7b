//! Group request dispatch.
//!
//! A [`GroupRequest`] broadcasts (or anycasts) a payload to a set of
//! recipients and collects their responses under concurrent view changes
//! and failure suspicions, applying a configurable completion policy. The
//! dispatcher does not itself receive anything from the network: whoever
//! correlates replies calls [`GroupRequest::receive_response`], and the
//! membership observer feeds [`GroupRequest::suspect`] and
//! [`GroupRequest::view_change`].
//!
//! The response table is fixed at dispatch time: members joining later are
//! never added, since a joiner cannot have received the request and would
//! otherwise be waited on forever.

mod response;

pub use response::{Rsp, RspList};

use {
	crate::{Address, Error, View},
	bytes::Bytes,
	core::time::Duration,
	std::{
		collections::{BTreeMap, BTreeSet, VecDeque},
		sync::Mutex,
	},
	tokio::sync::watch,
};

/// Bound on the suspects list; the oldest entries are evicted first so
/// long-lived dispatchers cannot grow without limit.
const MAX_SUSPECTS: usize = 40;

/// How many responses a group request waits for before it is done.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseMode {
	/// Done immediately after sending.
	None,

	/// Done after any response was received, or after every recipient was
	/// suspected.
	First,

	/// Done once every recipient responded or was suspected.
	All,

	/// Done once responses plus suspicions reach a majority of recipients.
	Majority,

	/// Done once responses alone reach a majority; suspicions do not count.
	AbsMajority,

	/// Done once the given number of responses arrived, or it became clear
	/// the count can no longer be reached. A bound of at least the
	/// recipient count behaves like [`ResponseMode::All`].
	N(usize),
}

/// Response filter consulted for every received value. When present, its
/// [`RspFilter::need_more_responses`] verdict overrides the numeric
/// completion policy.
pub trait RspFilter<T>: Send + Sync {
	/// Whether the response counts towards completion.
	fn is_acceptable(&self, response: &T, sender: &Address) -> bool;

	/// Whether the request should keep collecting.
	fn need_more_responses(&self) -> bool;
}

/// Sends the request frames of a group request. Implemented by the stack
/// handle; `dest` of `None` means multicast.
pub trait RequestCaster {
	fn cast(&self, dest: Option<&Address>, payload: &Bytes);
}

struct State<T> {
	requests: BTreeMap<Address, Rsp<T>>,
	suspects: VecDeque<Address>,
	members: BTreeSet<Address>,
	done: bool,
}

/// A single broadcast/anycast request and its response collector.
pub struct GroupRequest<T> {
	state: Mutex<State<T>>,
	done_tx: watch::Sender<bool>,
	mode: ResponseMode,
	anycast: bool,
	filter: Option<Box<dyn RspFilter<T>>>,
}

impl<T: Clone> GroupRequest<T> {
	/// Creates a request towards `targets`. The response table's key set is
	/// exactly the target set and never changes afterwards.
	pub fn new(
		targets: impl IntoIterator<Item = Address>,
		mode: ResponseMode,
	) -> Self {
		let requests: BTreeMap<Address, Rsp<T>> = targets
			.into_iter()
			.map(|target| (target, Rsp::new(target)))
			.collect();
		let members = requests.keys().copied().collect();

		Self {
			state: Mutex::new(State {
				requests,
				suspects: VecDeque::new(),
				members,
				done: false,
			}),
			done_tx: watch::Sender::new(false),
			mode,
			anycast: false,
			filter: None,
		}
	}

	/// Sends the payload to each recipient individually instead of
	/// multicasting it.
	#[must_use]
	pub fn with_anycast(mut self, anycast: bool) -> Self {
		self.anycast = anycast;
		self
	}

	#[must_use]
	pub fn with_filter(
		mut self,
		filter: impl RspFilter<T> + 'static,
	) -> Self {
		self.filter = Some(Box::new(filter));
		self
	}

	/// Dispatches the request. Recipients already on the suspects list are
	/// marked suspected up front.
	pub fn send(&self, caster: &impl RequestCaster, payload: &Bytes) {
		let targets: Vec<Address> = {
			let mut state = self.state.lock().expect("dispatcher lock");

			let suspects = state.suspects.clone();
			for suspect in &suspects {
				if let Some(rsp) = state.requests.get_mut(suspect) {
					rsp.mark_suspected();
				}
			}

			let done = self.complete(&state);
			state.done = done;
			state.requests.keys().copied().collect()
		};

		if self.anycast {
			for target in &targets {
				caster.cast(Some(target), payload);
			}
		} else {
			caster.cast(None, payload);
		}

		self.signal_if_done();
	}

	/// Records a response. Late responses after completion and responses
	/// from senders outside the recipient set are ignored.
	pub fn receive_response(&self, value: T, sender: &Address) {
		let mut state = self.state.lock().expect("dispatcher lock");
		if state.done {
			return;
		}
		let Some(rsp) = state.requests.get_mut(sender) else {
			return;
		};

		if !rsp.was_received() {
			let accepted = self
				.filter
				.as_ref()
				.is_none_or(|filter| filter.is_acceptable(&value, sender));
			rsp.set_value(value, accepted);
			tracing::trace!(sender = %sender, accepted, "received response");
		}

		let done = self.complete(&state);
		state.done = done;
		drop(state);
		self.signal_if_done();
	}

	/// Excludes a member reported faulty by the failure detector from the
	/// outstanding responses.
	pub fn suspect(&self, addr: &Address) {
		let mut state = self.state.lock().expect("dispatcher lock");
		Self::add_suspect(&mut state, *addr);
		if let Some(rsp) = state.requests.get_mut(addr) {
			rsp.mark_suspected();
		}

		let done = self.complete(&state);
		state.done = done;
		drop(state);
		self.signal_if_done();
	}

	/// Marks every recipient missing from the new view as suspected.
	/// Members of the view that are not in the recipient set are ignored.
	pub fn view_change(&self, view: &View) {
		let mut state = self.state.lock().expect("dispatcher lock");
		if state.requests.is_empty() {
			return;
		}

		state.members = view.members().iter().copied().collect();

		let departed: Vec<Address> = state
			.requests
			.keys()
			.filter(|member| !view.contains(member))
			.copied()
			.collect();
		for member in departed {
			Self::add_suspect(&mut state, member);
			if let Some(rsp) = state.requests.get_mut(&member) {
				rsp.mark_suspected();
			}
		}

		let done = self.complete(&state);
		state.done = done;
		drop(state);
		self.signal_if_done();
	}

	/// Whether the completion policy is satisfied.
	pub fn done(&self) -> bool {
		self.state.lock().expect("dispatcher lock").done
	}

	/// Waits until the completion policy is satisfied, then snapshots the
	/// response table.
	pub async fn get(&self) -> RspList<T> {
		let mut done_rx = self.done_tx.subscribe();
		let _ = done_rx.wait_for(|done| *done).await;
		self.results()
	}

	/// Bounded [`GroupRequest::get`]. A timeout leaves the response table
	/// undisturbed.
	pub async fn get_timeout(
		&self,
		timeout: Duration,
	) -> Result<RspList<T>, Error> {
		let mut done_rx = self.done_tx.subscribe();
		let wait = done_rx.wait_for(|done| *done);
		match tokio::time::timeout(timeout, wait).await {
			Ok(_) => Ok(self.results()),
			Err(_) => Err(Error::Timeout),
		}
	}

	/// Snapshot of the response table.
	pub fn results(&self) -> RspList<T> {
		let state = self.state.lock().expect("dispatcher lock");
		RspList::new(state.requests.values().cloned().collect())
	}

	pub fn suspects(&self) -> Vec<Address> {
		let state = self.state.lock().expect("dispatcher lock");
		state.suspects.iter().copied().collect()
	}

	pub fn num_suspects(&self) -> usize {
		self.state.lock().expect("dispatcher lock").suspects.len()
	}

	fn complete(&self, state: &State<T>) -> bool {
		if state.done {
			return true;
		}
		match &self.filter {
			Some(filter) => !filter.need_more_responses(),
			None => responses_complete(self.mode, &state.requests),
		}
	}

	fn add_suspect(state: &mut State<T>, addr: Address) {
		if state.suspects.contains(&addr) {
			return;
		}
		state.suspects.push_back(addr);
		while state.suspects.len() > MAX_SUSPECTS {
			state.suspects.pop_front();
		}
	}

	fn signal_if_done(&self) {
		if self.done() {
			self.done_tx.send_replace(true);
		}
	}
}

fn responses_complete<T>(
	mode: ResponseMode,
	requests: &BTreeMap<Address, Rsp<T>>,
) -> bool {
	let total = requests.len();
	let mut received = 0usize;
	let mut suspected = 0usize;
	let mut not_received = 0usize;

	for rsp in requests.values() {
		if rsp.was_received() {
			received += 1;
		} else if rsp.was_suspected() {
			suspected += 1;
		} else {
			not_received += 1;
		}
	}

	match mode {
		ResponseMode::None => true,
		ResponseMode::First => received > 0 || suspected >= total,
		ResponseMode::All => received + suspected >= total,
		ResponseMode::Majority => received + suspected >= majority(total),
		ResponseMode::AbsMajority => received >= majority(total),
		ResponseMode::N(expected) => {
			if expected >= total {
				// an expectation covering everyone degrades to ALL
				return received + suspected >= total;
			}
			let achievable = received + not_received >= expected;
			received >= expected
				|| !achievable
				|| received + suspected >= expected
		}
	}
}

fn majority(total: usize) -> usize {
	if total < 2 { total } else { total / 2 + 1 }
}

#[cfg(test)]
mod tests {
	use super::*;

	fn addr(name: &str) -> Address {
		Address::from_name(name)
	}

	fn request(mode: ResponseMode) -> GroupRequest<u64> {
		GroupRequest::new([addr("a"), addr("b"), addr("c")], mode)
	}

	#[test]
	fn all_policy_counts_suspicions() {
		let req = request(ResponseMode::All);

		req.receive_response(1, &addr("a"));
		assert!(!req.done());

		req.suspect(&addr("b"));
		assert!(!req.done());

		req.receive_response(3, &addr("c"));
		assert!(req.done());
	}

	#[test]
	fn first_policy_completes_on_single_response() {
		let req = request(ResponseMode::First);

		req.receive_response(1, &addr("b"));
		assert!(req.done());
	}

	#[test]
	fn first_policy_completes_when_all_suspected() {
		let req = request(ResponseMode::First);

		for name in ["a", "b", "c"] {
			req.suspect(&addr(name));
		}
		assert!(req.done());
	}

	#[test]
	fn abs_majority_ignores_suspicions() {
		let req = request(ResponseMode::AbsMajority);

		req.suspect(&addr("a"));
		req.suspect(&addr("b"));
		assert!(!req.done());

		req.receive_response(1, &addr("a"));
		assert!(!req.done());

		req.receive_response(3, &addr("c"));
		assert!(req.done());
	}

	#[test]
	fn get_n_with_expectation_covering_everyone_degrades_to_all() {
		let req = request(ResponseMode::N(5));

		req.receive_response(1, &addr("a"));
		req.receive_response(2, &addr("b"));
		assert!(!req.done());

		req.suspect(&addr("c"));
		assert!(req.done());
	}

	#[test]
	fn get_n_counts_suspicions_toward_the_expectation() {
		let req = request(ResponseMode::N(2));

		req.suspect(&addr("a"));
		assert!(!req.done());

		req.receive_response(1, &addr("b"));
		assert!(req.done());
	}

	#[test]
	fn get_n_detects_unreachable_expectations() {
		let req = GroupRequest::<u64>::new(
			[addr("a"), addr("b"), addr("c"), addr("d")],
			ResponseMode::N(3),
		);

		req.suspect(&addr("a"));
		assert!(!req.done());

		// two live recipients remain, three responses can never arrive
		req.suspect(&addr("b"));
		assert!(req.done());
	}

	#[test]
	fn view_change_never_extends_the_response_table() {
		let req = request(ResponseMode::All);
		let members =
			vec![addr("a"), addr("b"), addr("c"), addr("joiner")];
		let view = crate::ViewId::new(members[0], 2);
		req.view_change(&View::new(view, members));

		assert_eq!(req.results().len(), 3);
		assert!(req.results().get(&addr("joiner")).is_none());
	}

	#[test]
	fn view_change_suspects_departed_members() {
		let req = request(ResponseMode::All);

		req.receive_response(1, &addr("a"));
		let remaining = vec![addr("a"), addr("c")];
		req.view_change(&View::new(
			crate::ViewId::new(remaining[0], 2),
			remaining,
		));

		let results = req.results();
		assert!(results.get(&addr("b")).unwrap().was_suspected());
		assert!(!req.done());

		req.receive_response(3, &addr("c"));
		assert!(req.done());
	}

	#[test]
	fn received_and_suspected_are_exclusive() {
		let req = request(ResponseMode::All);

		req.receive_response(1, &addr("a"));
		req.suspect(&addr("a"));

		let results = req.results();
		let rsp = results.get(&addr("a")).unwrap();
		assert!(rsp.was_received());
		assert!(!rsp.was_suspected());
		assert_eq!(rsp.value(), Some(&1));
	}

	#[test]
	fn suspects_list_is_bounded() {
		let req = request(ResponseMode::All);

		for i in 0..MAX_SUSPECTS + 10 {
			req.suspect(&Address::from_name(format!("m{i}")));
		}
		assert_eq!(req.num_suspects(), MAX_SUSPECTS);
	}

	struct EvenOnly;

	impl RspFilter<u64> for EvenOnly {
		fn is_acceptable(&self, response: &u64, _: &Address) -> bool {
			response % 2 == 0
		}

		fn need_more_responses(&self) -> bool {
			true
		}
	}

	#[test]
	fn filter_controls_acceptance_and_completion() {
		let req = request(ResponseMode::First).with_filter(EvenOnly);

		req.receive_response(3, &addr("a"));
		let results = req.results();
		// the rejected value is kept but does not count as received
		assert!(!results.get(&addr("a")).unwrap().was_received());
		assert_eq!(results.get(&addr("a")).unwrap().value(), Some(&3));
		// the filter keeps asking for more even though FIRST is satisfied
		assert!(!req.done());

		req.receive_response(4, &addr("b"));
		assert!(req.results().get(&addr("b")).unwrap().was_received());
	}
}
