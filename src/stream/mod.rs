mod connection;
mod traced;

pub mod pb;
pub mod tracing;

pub use connection::TonicConnection;
pub use traced::TracedConnection;

use async_trait::async_trait;

use crate::core::errors::AgentResult;
use pb::{Message, Order};

/// The write half of an attached stream (C2). Owned exclusively by the
/// membership client's controller task — the Design Notes call this out as
/// the single writer to the stream.
#[async_trait]
pub trait ConnectionSender: Send {
    async fn send(&mut self, msg: Message) -> AgentResult<()>;
    async fn close_send(&mut self) -> AgentResult<()>;
}

/// The read half of an attached stream (C2). Owned exclusively by the
/// membership client's receiver task — the single reader.
#[async_trait]
pub trait ConnectionReceiver: Send {
    /// Returns `Ok(None)` on a clean end-of-stream.
    async fn recv(&mut self) -> AgentResult<Option<Order>>;
}

/// A freshly attached bidirectional stream, not yet split into its two
/// independent halves. Splitting is a one-way, ownership-moving operation:
/// once split, there is no way back to a single handle, which is what makes
/// "single writer, single reader" enforceable at the type level.
pub trait Connection: Send {
    fn split(self: Box<Self>) -> (Box<dyn ConnectionSender>, Box<dyn ConnectionReceiver>);
}
