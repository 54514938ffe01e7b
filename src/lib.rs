//! Reliable group communication core.
//!
//! A set of processes forms a named cluster and exchanges multicast and
//! unicast messages with per-sender FIFO and virtual-synchrony guarantees.
//! Three tightly coupled subsystems make up the core:
//!
//! - [`nakack`] — negative-acknowledgement reliable multicast: per-sender
//!   seqnos, receive-side reordering, retransmission on gaps, stability
//!   driven garbage collection and digest exchange for joins and merges.
//! - [`flush`] — a cluster-wide barrier that quiesces message traffic so
//!   that sent queues and receive windows drain before a view change or a
//!   state transfer, and unblocks traffic afterwards.
//! - [`dispatch`] — a group request dispatcher that broadcasts or anycasts
//!   a payload, tracks per-recipient responses under concurrent view
//!   changes and suspicions, and applies a completion policy.
//!
//! Transport, failure detection, discovery, fragmentation and the channel
//! facade are external collaborators. They interact with the core solely
//! through [`Event`]s at the two ends of the [`stack::Stack`].

mod address;
mod digest;
mod error;
mod event;
mod message;
mod primitives;
mod view;

pub mod dispatch;
pub mod flush;
pub mod nakack;
pub mod stack;

pub use {
	address::Address,
	digest::{Digest, DigestEntry, Seqno},
	error::Error,
	event::{ConfigUpdate, Event},
	message::{Headers, Message},
	view::{View, ViewId},
};

pub mod prelude {
	pub use super::{
		Address, ConfigUpdate, Digest, DigestEntry, Error, Event, Headers,
		Message, Seqno, View, ViewId,
		dispatch::{
			GroupRequest, RequestCaster, ResponseMode, Rsp, RspFilter,
			RspList,
		},
		flush::FlushHeader,
		nakack::NakAckHeader,
		stack::{Stack, StackBuilder, StackIo},
	};
}
