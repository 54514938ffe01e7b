use {
	crate::Address,
	core::fmt,
	serde::{Deserialize, Serialize},
};

/// Monotonically increasing view identifier: the address of the member that
/// created the view plus a counter.
#[derive(
	Debug,
	Clone,
	Copy,
	PartialEq,
	Eq,
	PartialOrd,
	Ord,
	Hash,
	Serialize,
	Deserialize,
)]
pub struct ViewId {
	creator: Address,
	counter: u64,
}

impl ViewId {
	pub const fn new(creator: Address, counter: u64) -> Self {
		Self { creator, counter }
	}

	pub const fn creator(&self) -> &Address {
		&self.creator
	}

	pub const fn counter(&self) -> u64 {
		self.counter
	}
}

impl fmt::Display for ViewId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "[{}|{}]", self.creator, self.counter)
	}
}

/// Agreed membership snapshot. Immutable once installed. The first member is
/// the coordinator.
///
/// A view created with [`View::merge`] marks the fusion of two or more
/// previously disjoint subgroups.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct View {
	id: ViewId,
	members: Vec<Address>,
	merged: bool,
}

impl View {
	pub fn new(id: ViewId, members: Vec<Address>) -> Self {
		Self {
			id,
			members,
			merged: false,
		}
	}

	/// Creates a view resulting from the fusion of disjoint subgroups.
	pub fn merge(id: ViewId, members: Vec<Address>) -> Self {
		Self {
			id,
			members,
			merged: true,
		}
	}

	pub const fn id(&self) -> &ViewId {
		&self.id
	}

	pub fn members(&self) -> &[Address] {
		&self.members
	}

	pub fn coordinator(&self) -> Option<&Address> {
		self.members.first()
	}

	pub fn contains(&self, addr: &Address) -> bool {
		self.members.contains(addr)
	}

	pub fn len(&self) -> usize {
		self.members.len()
	}

	pub fn is_empty(&self) -> bool {
		self.members.is_empty()
	}

	pub const fn is_merge_view(&self) -> bool {
		self.merged
	}
}

impl fmt::Display for View {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{} ({})", self.id, self.members.len())?;
		write!(f, " [")?;
		for (i, member) in self.members.iter().enumerate() {
			if i > 0 {
				write!(f, ", ")?;
			}
			write!(f, "{member}")?;
		}
		write!(f, "]")
	}
}
