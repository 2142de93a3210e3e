use async_trait::async_trait;
use opentelemetry::trace::{Span, Tracer};
use opentelemetry::{global, Context, KeyValue};

use crate::core::errors::AgentResult;
use crate::stream::pb::{Message, Order};
use crate::stream::tracing::{extract_otel_ctx, inject_otel_ctx};
use crate::stream::{Connection, ConnectionReceiver, ConnectionSender};

/// Decorates a `Connection` with trace-context propagation and, when
/// `debug` is set, an OpenTelemetry span per frame carrying the rendered
/// message body as an attribute (C2). No tracer provider or exporter is
/// constructed here (out of scope); spans are recorded against whatever
/// provider the process lifecycle installs globally, a no-op otherwise.
pub struct TracedConnection<C> {
    inner: C,
    debug: bool,
}

impl<C: Connection> TracedConnection<C> {
    pub fn new(inner: C, debug: bool) -> Self {
        Self { inner, debug }
    }
}

impl<C: Connection + 'static> Connection for TracedConnection<C> {
    fn split(self: Box<Self>) -> (Box<dyn ConnectionSender>, Box<dyn ConnectionReceiver>) {
        let this = *self;
        let (sender, receiver) = Box::new(this.inner).split();
        (
            Box::new(TracedSender {
                inner: sender,
                debug: this.debug,
            }),
            Box::new(TracedReceiver {
                inner: receiver,
                debug: this.debug,
            }),
        )
    }
}

struct TracedSender {
    inner: Box<dyn ConnectionSender>,
    debug: bool,
}

#[async_trait]
impl ConnectionSender for TracedSender {
    async fn send(&mut self, mut msg: Message) -> AgentResult<()> {
        inject_otel_ctx(&Context::current(), &mut msg.metadata);
        if self.debug {
            let mut span = global::tracer("membership_client").start("membership.send");
            span.set_attribute(KeyValue::new("grpc.message.raw", format!("{msg:?}")));
            span.end();
        }
        self.inner.send(msg).await
    }

    async fn close_send(&mut self) -> AgentResult<()> {
        self.inner.close_send().await
    }
}

struct TracedReceiver {
    inner: Box<dyn ConnectionReceiver>,
    debug: bool,
}

#[async_trait]
impl ConnectionReceiver for TracedReceiver {
    async fn recv(&mut self) -> AgentResult<Option<Order>> {
        let order = self.inner.recv().await?;
        if let Some(order) = &order {
            let _cx = extract_otel_ctx(&order.metadata);
            if self.debug {
                let mut span = global::tracer("membership_client").start("membership.recv");
                span.set_attribute(KeyValue::new("grpc.message.raw", format!("{order:?}")));
                span.end();
            }
        }
        Ok(order)
    }
}
