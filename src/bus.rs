use crate::cron::{Delivery, ExecutionSink};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};

/// A due prompt on its way to the agent.
#[derive(Clone, Debug)]
pub struct InboundMessage {
    pub channel: String,
    pub sender_id: String,
    pub job_id: String,
    pub job_name: String,
    pub content: String,
}

#[derive(Clone)]
pub struct MessageBus {
    inbound_tx: mpsc::Sender<InboundMessage>,
    inbound_rx: Arc<Mutex<mpsc::Receiver<InboundMessage>>>,
}

impl MessageBus {
    pub fn new(capacity: usize) -> Self {
        let (inbound_tx, inbound_rx) = mpsc::channel(capacity.max(1));
        MessageBus {
            inbound_tx,
            inbound_rx: Arc::new(Mutex::new(inbound_rx)),
        }
    }

    pub async fn publish_inbound(&self, msg: InboundMessage) -> Result<()> {
        self.inbound_tx
            .send(msg)
            .await
            .map_err(|_| anyhow!("agent inbox is closed"))
    }

    pub async fn consume_inbound(&self) -> Option<InboundMessage> {
        let mut rx = self.inbound_rx.lock().await;
        rx.recv().await
    }
}

#[async_trait]
impl ExecutionSink for MessageBus {
    async fn deliver(&self, delivery: Delivery) -> Result<()> {
        self.publish_inbound(InboundMessage {
            channel: "cron".to_string(),
            sender_id: "cron".to_string(),
            job_id: delivery.job_id,
            job_name: delivery.job_name,
            content: delivery.payload,
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn delivery() -> Delivery {
        Delivery {
            job_id: "abc".to_string(),
            job_name: "standup".to_string(),
            payload: "summarize my inbox".to_string(),
        }
    }

    #[tokio::test]
    async fn delivery_is_tagged_with_the_job() {
        let bus = MessageBus::new(4);
        bus.deliver(delivery()).await.unwrap();

        let msg = bus.consume_inbound().await.unwrap();
        assert_eq!(msg.channel, "cron");
        assert_eq!(msg.sender_id, "cron");
        assert_eq!(msg.job_id, "abc");
        assert_eq!(msg.job_name, "standup");
        assert_eq!(msg.content, "summarize my inbox");
    }
}
