use {
	crate::{Address, flush::FlushHeader, nakack::NakAckHeader},
	bytes::Bytes,
	core::fmt,
	serde::{Deserialize, Serialize},
};

/// A unicast or multicast frame travelling through the stack.
///
/// A missing destination means multicast to the whole group. Headers are
/// typed per-protocol slots; a layer only ever touches its own slot.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
	src: Option<Address>,
	dest: Option<Address>,
	headers: Headers,
	oob: bool,
	payload: Bytes,
}

impl Message {
	/// Creates a multicast message addressed to the whole group.
	pub fn multicast(payload: Bytes) -> Self {
		Self {
			src: None,
			dest: None,
			headers: Headers::default(),
			oob: false,
			payload,
		}
	}

	/// Creates a unicast message addressed to a single member.
	pub fn unicast(dest: Address, payload: Bytes) -> Self {
		Self {
			src: None,
			dest: Some(dest),
			headers: Headers::default(),
			oob: false,
			payload,
		}
	}

	/// Marks the message as out-of-band: it is dispatched to the application
	/// as soon as it is received, exempt from FIFO ordering, and delivered at
	/// most once.
	#[must_use]
	pub fn oob(mut self) -> Self {
		self.oob = true;
		self
	}

	#[must_use]
	pub fn with_src(mut self, src: Address) -> Self {
		self.src = Some(src);
		self
	}

	pub const fn src(&self) -> Option<&Address> {
		self.src.as_ref()
	}

	pub const fn dest(&self) -> Option<&Address> {
		self.dest.as_ref()
	}

	pub const fn is_multicast(&self) -> bool {
		self.dest.is_none()
	}

	pub const fn is_oob(&self) -> bool {
		self.oob
	}

	pub const fn payload(&self) -> &Bytes {
		&self.payload
	}

	/// Approximate wire size, used to bound retransmission bundles.
	pub fn size(&self) -> usize {
		self.payload.len() + Address::LEN * 2
	}

	pub const fn headers(&self) -> &Headers {
		&self.headers
	}

	pub fn headers_mut(&mut self) -> &mut Headers {
		&mut self.headers
	}
}

impl fmt::Debug for Message {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "[")?;
		match &self.src {
			Some(src) => write!(f, "{src}")?,
			None => write!(f, "?")?,
		}
		write!(f, " -> ")?;
		match &self.dest {
			Some(dest) => write!(f, "{dest}")?,
			None => write!(f, "<mcast>")?,
		}
		write!(f, ", {} bytes", self.payload.len())?;
		if self.oob {
			write!(f, ", oob")?;
		}
		if let Some(hdr) = &self.headers.nakack {
			write!(f, ", {hdr}")?;
		}
		if let Some(hdr) = &self.headers.flush {
			write!(f, ", {hdr}")?;
		}
		write!(f, "]")
	}
}

/// Typed per-protocol header slots.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Headers {
	nakack: Option<NakAckHeader>,
	flush: Option<FlushHeader>,
}

impl Headers {
	pub fn nakack(&self) -> Option<&NakAckHeader> {
		self.nakack.as_ref()
	}

	pub fn set_nakack(&mut self, header: NakAckHeader) {
		self.nakack = Some(header);
	}

	pub fn flush(&self) -> Option<&FlushHeader> {
		self.flush.as_ref()
	}

	pub fn set_flush(&mut self, header: FlushHeader) {
		self.flush = Some(header);
	}

	pub fn take_flush(&mut self) -> Option<FlushHeader> {
		self.flush.take()
	}
}
