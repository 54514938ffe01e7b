/// Errors surfaced by the public stack and dispatcher operations. Protocol
/// anomalies (missing messages, flush timeouts, retransmission failures) are
/// handled internally and logged; only caller-facing waits report errors.
#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error("operation timed out")]
	Timeout,

	#[error("stack worker is terminated")]
	Terminated,
}
