use {
	crate::{Address, Digest, Message, View},
	core::{fmt, time::Duration},
	tokio::sync::oneshot,
};

/// Control and data signals exchanged between the layers of the stack and
/// its collaborators.
///
/// Messages and membership signals (views, suspicions, local address) enter
/// at the transport boundary and travel up; application messages and barrier
/// control (suspend/resume, block acknowledgements) enter at the top and
/// travel down. Request-shaped events carry a `oneshot` reply channel.
pub enum Event {
	/// A unicast or multicast message travelling up or down.
	Msg(Message),

	/// A new view has been agreed on.
	ViewChange(View),

	/// Tentative view during membership negotiation. Adds receive windows
	/// for new members but never drops existing ones.
	TmpView(View),

	/// The failure detector believes this member has failed. May be
	/// spurious.
	Suspect(Address),

	/// The transport has learned our own address.
	SetLocalAddress(Address),

	/// Configuration published by a neighbouring layer.
	Config(ConfigUpdate),

	/// Requests the digest of the highest seqnos *received* per sender.
	GetDigest(oneshot::Sender<Digest>),

	/// Requests the digest of the highest seqnos *delivered* per sender,
	/// including the highest seqno seen regardless of gaps.
	GetDigestStable(oneshot::Sender<Digest>),

	/// Replaces all receive windows with fresh ones positioned at the
	/// digest's high seqnos.
	SetDigest(Digest),

	/// Adjusts receive windows after a merge: unknown senders get fresh
	/// windows at the digest's high seqno, lagging ones are repositioned.
	MergeDigest(Digest),

	/// Stability vector agreed by all members; drives garbage collection of
	/// the sent table and the receive windows.
	Stable(Digest),

	/// Requests retransmission of everything needed to make the local digest
	/// dominate `target`. Resolves `done` with `true` once it does, `false`
	/// on timeout or cancellation.
	Rebroadcast {
		target: Digest,
		done: oneshot::Sender<bool>,
	},

	/// The local process is leaving the group.
	Disconnect,

	/// Starts a cluster-wide flush over the given view (current view when
	/// absent). `done` resolves once every participant reported flush
	/// completion.
	Suspend {
		view: Option<View>,
		done: Option<oneshot::Sender<bool>>,
	},

	/// Ends a cluster-wide flush.
	Resume,

	/// The flush barrier is in place: every message sent in the previous
	/// view has been delivered, no new multicasts are admitted.
	SuspendOk,

	/// Asks the application to stop sending; expected to be answered with
	/// [`Event::BlockOk`].
	Block,

	/// The application acknowledged a [`Event::Block`].
	BlockOk,

	/// Message sending is unblocked again.
	Unblock,

	/// The local process has completed joining and may deliver multicasts.
	BecomeServer,

	/// Transport hint: start accepting unicasts from this member.
	EnableUnicastsTo(Address),

	/// Transport hint: stop accepting unicasts from this member.
	DisableUnicastsTo(Address),
}

impl Event {
	/// Short kind tag for logs.
	pub const fn kind(&self) -> &'static str {
		match self {
			Self::Msg(_) => "MSG",
			Self::ViewChange(_) => "VIEW_CHANGE",
			Self::TmpView(_) => "TMP_VIEW",
			Self::Suspect(_) => "SUSPECT",
			Self::SetLocalAddress(_) => "SET_LOCAL_ADDRESS",
			Self::Config(_) => "CONFIG",
			Self::GetDigest(_) => "GET_DIGEST",
			Self::GetDigestStable(_) => "GET_DIGEST_STABLE",
			Self::SetDigest(_) => "SET_DIGEST",
			Self::MergeDigest(_) => "MERGE_DIGEST",
			Self::Stable(_) => "STABLE",
			Self::Rebroadcast { .. } => "REBROADCAST",
			Self::Disconnect => "DISCONNECT",
			Self::Suspend { .. } => "SUSPEND",
			Self::Resume => "RESUME",
			Self::SuspendOk => "SUSPEND_OK",
			Self::Block => "BLOCK",
			Self::BlockOk => "BLOCK_OK",
			Self::Unblock => "UNBLOCK",
			Self::BecomeServer => "BECOME_SERVER",
			Self::EnableUnicastsTo(_) => "ENABLE_UNICASTS_TO",
			Self::DisableUnicastsTo(_) => "DISABLE_UNICASTS_TO",
		}
	}
}

impl fmt::Debug for Event {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::Msg(msg) => write!(f, "MSG{msg:?}"),
			Self::ViewChange(view) | Self::TmpView(view) => {
				write!(f, "{}({view})", self.kind())
			}
			Self::Suspect(addr)
			| Self::SetLocalAddress(addr)
			| Self::EnableUnicastsTo(addr)
			| Self::DisableUnicastsTo(addr) => {
				write!(f, "{}({addr})", self.kind())
			}
			Self::SetDigest(digest)
			| Self::MergeDigest(digest)
			| Self::Stable(digest) => write!(f, "{}({digest})", self.kind()),
			Self::Rebroadcast { target, .. } => {
				write!(f, "REBROADCAST({target})")
			}
			other => f.write_str(other.kind()),
		}
	}
}

/// Configuration values published by one layer and read by its neighbours.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConfigUpdate {
	/// Fragmentation threshold of the layer below; adopted by the reliable
	/// multicast layer as its retransmission bundle bound.
	pub frag_size: Option<u64>,

	/// Timeout of the flush downward gate, published by the flush layer.
	pub flush_timeout: Option<Duration>,
}
