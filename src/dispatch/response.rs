use crate::Address;

/// Outcome slot for a single recipient of a group request.
///
/// `received` and `suspected` are never simultaneously true: a suspicion
/// arriving after a response does not retract it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rsp<T> {
	sender: Address,
	value: Option<T>,
	received: bool,
	suspected: bool,
}

impl<T> Rsp<T> {
	pub(crate) const fn new(sender: Address) -> Self {
		Self {
			sender,
			value: None,
			received: false,
			suspected: false,
		}
	}

	pub const fn sender(&self) -> &Address {
		&self.sender
	}

	pub const fn value(&self) -> Option<&T> {
		self.value.as_ref()
	}

	pub const fn was_received(&self) -> bool {
		self.received
	}

	pub const fn was_suspected(&self) -> bool {
		self.suspected
	}

	pub(crate) fn set_value(&mut self, value: T, accepted: bool) {
		self.value = Some(value);
		self.received = accepted;
	}

	/// Marks the recipient as suspected unless a response already arrived.
	pub(crate) fn mark_suspected(&mut self) {
		if !self.received {
			self.suspected = true;
			self.value = None;
		}
	}
}

/// Aggregated response vector of a group request, ordered by address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RspList<T>(Vec<Rsp<T>>);

impl<T> RspList<T> {
	pub(crate) fn new(responses: Vec<Rsp<T>>) -> Self {
		Self(responses)
	}

	pub fn len(&self) -> usize {
		self.0.len()
	}

	pub fn is_empty(&self) -> bool {
		self.0.is_empty()
	}

	pub fn get(&self, sender: &Address) -> Option<&Rsp<T>> {
		self.0.iter().find(|rsp| rsp.sender() == sender)
	}

	pub fn iter(&self) -> impl Iterator<Item = &Rsp<T>> {
		self.0.iter()
	}

	/// Values of the responses that were received and accepted.
	pub fn values(&self) -> impl Iterator<Item = &T> {
		self
			.0
			.iter()
			.filter(|rsp| rsp.was_received())
			.filter_map(Rsp::value)
	}

	pub fn num_received(&self) -> usize {
		self.0.iter().filter(|rsp| rsp.was_received()).count()
	}

	pub fn num_suspected(&self) -> usize {
		self.0.iter().filter(|rsp| rsp.was_suspected()).count()
	}
}

impl<T> IntoIterator for RspList<T> {
	type IntoIter = std::vec::IntoIter<Rsp<T>>;
	type Item = Rsp<T>;

	fn into_iter(self) -> Self::IntoIter {
		self.0.into_iter()
	}
}

impl<'a, T> IntoIterator for &'a RspList<T> {
	type IntoIter = std::slice::Iter<'a, Rsp<T>>;
	type Item = &'a Rsp<T>;

	fn into_iter(self) -> Self::IntoIter {
		self.0.iter()
	}
}
