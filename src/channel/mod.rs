//! Response channel adapters: how poller output reaches the caller.
//!
//! - [`buffered`]: poll server-side, answer once.
//! - [`streaming`]: push one batch of events per poll iteration over SSE.

pub mod buffered;
pub mod streaming;
