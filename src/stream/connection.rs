use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tonic::metadata::{MetadataKey, MetadataValue};
use tonic::transport::{Channel, ClientTlsConfig, Endpoint};
use tonic::{Request, Streaming};

use crate::core::errors::{AgentError, AgentResult};
use crate::stream::pb::membership_server_client::MembershipServerClient;
use crate::stream::pb::{Message, Order};
use crate::stream::{Connection, ConnectionReceiver, ConnectionSender};

/// Outbound channel depth. Kept small: the controller paces sends itself, so
/// this only absorbs the one in-flight frame between `send` returning and
/// tonic actually writing it to the wire.
const OUTBOUND_CHANNEL_DEPTH: usize = 1;

/// A dialed, attached `Join` stream, not yet split.
pub struct TonicConnection {
    outbound: mpsc::Sender<Message>,
    inbound: Streaming<Order>,
}

impl TonicConnection {
    /// Dials `server_address` and opens the bidirectional `Join` stream,
    /// attaching `metadata` as gRPC request metadata (§6's connect-time
    /// metadata).
    pub async fn connect(
        server_address: &str,
        metadata: HashMap<String, Vec<String>>,
        tls: Option<ClientTlsConfig>,
    ) -> AgentResult<Self> {
        let mut endpoint = Endpoint::from_shared(format!("http://{server_address}"))
            .map_err(|e| AgentError::Transport(format!("invalid server address: {e}")))?;
        if let Some(tls) = tls {
            endpoint = endpoint
                .tls_config(tls)
                .map_err(|e| AgentError::Transport(format!("invalid tls config: {e}")))?;
        }

        let channel: Channel = endpoint.connect().await?;
        let mut client = MembershipServerClient::new(channel);

        let (tx, rx) = mpsc::channel(OUTBOUND_CHANNEL_DEPTH);
        let mut request = Request::new(ReceiverStream::new(rx));
        attach_metadata(&mut request, metadata)?;

        let response = client.join(request).await?;
        let inbound = response.into_inner();

        Ok(Self { outbound: tx, inbound })
    }
}

/// Attaches §6's connect-time metadata as gRPC request headers. Multi-valued
/// fields (`capabilities`, `MODULE_LIST`, `EE`) are appended as one repeated
/// header entry per value, matching the original's `md.Append(key, values...)`
/// rather than collapsing them into a single comma-joined string.
fn attach_metadata(
    request: &mut Request<ReceiverStream<Message>>,
    metadata: HashMap<String, Vec<String>>,
) -> AgentResult<()> {
    let md = request.metadata_mut();
    for (key, values) in metadata {
        let metadata_key = MetadataKey::from_bytes(key.to_lowercase().as_bytes())
            .map_err(|e| AgentError::Protocol(format!("invalid metadata key {key}: {e}")))?;
        for value in values {
            let metadata_value = MetadataValue::try_from(value.as_str())
                .map_err(|e| AgentError::Protocol(format!("invalid metadata value: {e}")))?;
            md.append(metadata_key.clone(), metadata_value);
        }
    }
    Ok(())
}

impl Connection for TonicConnection {
    fn split(self: Box<Self>) -> (Box<dyn ConnectionSender>, Box<dyn ConnectionReceiver>) {
        let this = *self;
        (
            Box::new(TonicSender {
                outbound: Some(this.outbound),
            }),
            Box::new(TonicReceiver { inbound: this.inbound }),
        )
    }
}

struct TonicSender {
    outbound: Option<mpsc::Sender<Message>>,
}

#[async_trait]
impl ConnectionSender for TonicSender {
    async fn send(&mut self, msg: Message) -> AgentResult<()> {
        match &self.outbound {
            Some(tx) => tx
                .send(msg)
                .await
                .map_err(|_| AgentError::Transport("outbound stream already closed".to_string())),
            None => Err(AgentError::Transport("send after close_send".to_string())),
        }
    }

    async fn close_send(&mut self) -> AgentResult<()> {
        self.outbound.take();
        Ok(())
    }
}

struct TonicReceiver {
    inbound: Streaming<Order>,
}

#[async_trait]
impl ConnectionReceiver for TonicReceiver {
    async fn recv(&mut self) -> AgentResult<Option<Order>> {
        Ok(self.inbound.message().await?)
    }
}
