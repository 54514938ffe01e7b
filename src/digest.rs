use {
	crate::Address,
	core::fmt,
	serde::{Deserialize, Serialize},
	std::collections::BTreeMap,
};

/// Monotonic per-sender message sequence number.
pub type Seqno = u64;

/// Per-sender summary of message progress: the lowest seqno still retained,
/// the highest seqno delivered (or received, depending on which digest was
/// requested) and the highest seqno seen from the sender regardless of gaps.
#[derive(
	Debug,
	Clone,
	Copy,
	Default,
	PartialEq,
	Eq,
	Serialize,
	Deserialize,
)]
pub struct DigestEntry {
	pub low: Seqno,
	pub high: Seqno,
	pub high_seen: Seqno,
}

impl DigestEntry {
	pub const fn new(low: Seqno, high: Seqno, high_seen: Seqno) -> Self {
		Self {
			low,
			high,
			high_seen,
		}
	}
}

impl fmt::Display for DigestEntry {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "[{} - {} ({})]", self.low, self.high, self.high_seen)
	}
}

/// Per-sender delivery summary exchanged to synchronise state after joins
/// and merges, to guide rebroadcasting, and to drive stability-based garbage
/// collection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Digest {
	entries: BTreeMap<Address, DigestEntry>,
}

impl Digest {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn insert(&mut self, sender: Address, entry: DigestEntry) {
		self.entries.insert(sender, entry);
	}

	pub fn get(&self, sender: &Address) -> Option<&DigestEntry> {
		self.entries.get(sender)
	}

	pub fn contains(&self, sender: &Address) -> bool {
		self.entries.contains_key(sender)
	}

	pub fn senders(&self) -> impl Iterator<Item = (&Address, &DigestEntry)> {
		self.entries.iter()
	}

	pub fn len(&self) -> usize {
		self.entries.len()
	}

	pub fn is_empty(&self) -> bool {
		self.entries.is_empty()
	}

	/// Returns `true` when this digest is pointwise greater or equal to
	/// `other`: for every sender in `other` there is a local entry whose
	/// both high values dominate. Digests over different sender sets are
	/// incomparable.
	pub fn dominates(&self, other: &Digest) -> bool {
		other.entries.iter().all(|(sender, theirs)| {
			self.entries.get(sender).is_some_and(|mine| {
				mine.high >= theirs.high && mine.high_seen >= theirs.high_seen
			})
		})
	}

	/// Pointwise maximum over the union of senders.
	pub fn merge(&self, other: &Digest) -> Digest {
		let mut merged = self.clone();
		for (sender, theirs) in &other.entries {
			merged
				.entries
				.entry(*sender)
				.and_modify(|mine| {
					mine.low = mine.low.min(theirs.low);
					mine.high = mine.high.max(theirs.high);
					mine.high_seen = mine.high_seen.max(theirs.high_seen);
				})
				.or_insert(*theirs);
		}
		merged
	}
}

impl FromIterator<(Address, DigestEntry)> for Digest {
	fn from_iter<I: IntoIterator<Item = (Address, DigestEntry)>>(
		iter: I,
	) -> Self {
		Self {
			entries: iter.into_iter().collect(),
		}
	}
}

impl fmt::Display for Digest {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		for (i, (sender, entry)) in self.entries.iter().enumerate() {
			if i > 0 {
				write!(f, ", ")?;
			}
			write!(f, "{sender}: {entry}")?;
		}
		Ok(())
	}
}
