use {
	crate::Address,
	derive_more::Display,
	serde::{Deserialize, Serialize},
};

/// Flush control header. These travel as regular multicasts through the
/// reliable layer below, except FLUSH_COMPLETED which is unicast to the
/// flush caller.
///
/// The carried view id ties a control message to the flush round it belongs
/// to; messages tagged with another view id are outdated and ignored.
#[derive(Debug, Clone, PartialEq, Eq, Display, Serialize, Deserialize)]
pub enum FlushHeader {
	/// The flush caller asks all participants to quiesce.
	#[display("START_FLUSH(view={view_id}, {} participants)", participants.len())]
	StartFlush {
		view_id: u64,
		participants: Vec<Address>,
	},

	/// A participant has stopped sending.
	#[display("FLUSH_OK(view={_0})")]
	FlushOk(u64),

	/// A participant observed FLUSH_OK from every other participant.
	#[display("FLUSH_COMPLETED(view={_0})")]
	FlushCompleted(u64),

	/// The flush caller releases the barrier.
	#[display("STOP_FLUSH(view={_0})")]
	StopFlush(u64),
}
