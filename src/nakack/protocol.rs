use {
	crate::{
		Address, Message,
		digest::Seqno,
		primitives::{deserialize, try_serialize},
	},
	bytes::Bytes,
	derive_more::Display,
	serde::{Deserialize, Serialize},
};

/// Wire header attached by the reliable multicast layer.
#[derive(Debug, Clone, PartialEq, Eq, Display, Serialize, Deserialize)]
pub enum NakAckHeader {
	/// A regular multicast carrying its sender-assigned seqno.
	#[display("MSG(#{_0})")]
	Msg(Seqno),

	/// Request to retransmit `[low, high]`, originally sent by `sender`. The
	/// request itself may be addressed to a member other than the original
	/// sender.
	#[display("XMIT_REQ([{low} - {high}], sender={sender})")]
	XmitReq {
		low: Seqno,
		high: Seqno,
		sender: Address,
	},

	/// Response carrying the encoded batch of retransmitted messages.
	#[display("XMIT_RSP([{low} - {high}])")]
	XmitRsp { low: Seqno, high: Seqno },
}

/// Encodes a batch of retransmitted messages into an XMIT_RSP payload.
pub(crate) fn encode_batch(
	batch: &[Message],
) -> Result<Bytes, postcard::Error> {
	try_serialize(&batch)
}

/// Decodes the batch of messages carried by an XMIT_RSP payload.
pub(crate) fn decode_batch(
	payload: impl AsRef<[u8]>,
) -> Result<Vec<Message>, postcard::Error> {
	deserialize(payload)
}
