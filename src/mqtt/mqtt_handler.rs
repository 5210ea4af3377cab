//! Broker link with statum lifecycle.
//!
//! # State Machine
//!
//! ```text
//! Configured ──► Running ──► Stopped
//!   (start)       (shutdown)
//! ```
//!
//! The event loop runs in its own tokio task. It re-subscribes on every
//! `ConnAck`, forwards every inbound publish to an [`InboundHandler`] and
//! reports connection changes to it. After a poll error it waits
//! [`RECONNECT_DELAY`] and polls again; rumqttc reconnects on that poll.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rumqttc::{
    AsyncClient, ClientError, ConnectionError, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS,
    Transport,
};
use statum::{machine, state};
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::config::MqttConfig;
use super::message_manager::InboundMessage;

pub const RECONNECT_DELAY: Duration = Duration::from_secs(2);
const REQUEST_CAPACITY: usize = 32;
const DISCONNECT_FLUSH_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Debug, Error)]
pub enum LinkError {
    #[error("broker client rejected the request: {0}")]
    Rejected(#[from] ClientError),

    #[error("event loop task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Receiver side of the link.
///
/// `handle` is awaited inline by the event loop, so implementations should not
/// block for long.
pub trait InboundHandler: Send + Sync + 'static {
    fn handle(&self, message: InboundMessage) -> impl Future<Output = ()> + Send;

    fn on_connected(&self) -> impl Future<Output = ()> + Send {
        async {}
    }

    fn on_disconnected(&self) -> impl Future<Output = ()> + Send {
        async {}
    }
}

/// Cloneable publish side of the link.
#[derive(Debug, Clone)]
pub struct BrokerHandle {
    client: AsyncClient,
}

impl BrokerHandle {
    /// QoS 0, not retained. `Ok` means the client queued the packet.
    pub async fn publish(&self, topic: &str, payload: impl Into<Vec<u8>>) -> Result<(), LinkError> {
        self.client
            .publish(topic, QoS::AtMostOnce, false, payload)
            .await?;
        debug!(topic, "publish queued");
        Ok(())
    }
}

#[state]
#[derive(Debug, Clone)]
pub enum LinkState {
    Configured, // client built, event loop not yet polled
    Running,    // event loop task spawned
    Stopped,    // disconnected, task finished
}

#[machine]
pub struct BrokerLink<S: LinkState> {
    client: AsyncClient,
    eventloop: Option<EventLoop>,
    shutdown: CancellationToken,
    task: Option<JoinHandle<()>>,
    endpoint: String,
}

impl<S: LinkState> BrokerLink<S> {
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn handle(&self) -> BrokerHandle {
        BrokerHandle {
            client: self.client.clone(),
        }
    }
}

impl BrokerLink<Configured> {
    pub fn configure(config: &MqttConfig) -> Self {
        let mut mqtt_options =
            MqttOptions::new(config.client_id.clone(), config.broker_url(), config.broker_port);
        mqtt_options.set_keep_alive(config.keep_alive());
        if config.use_websockets {
            mqtt_options.set_transport(Transport::Ws);
        }

        let (client, eventloop) = AsyncClient::new(mqtt_options, REQUEST_CAPACITY);
        let endpoint = format!(
            "{}://{}:{}",
            if config.use_websockets { "ws" } else { "tcp" },
            config.broker_address,
            config.broker_port
        );
        info!(%endpoint, client_id = %config.client_id, "broker link configured");

        Self::new(
            client,
            Some(eventloop),
            CancellationToken::new(),
            None, // task
            endpoint,
        )
    }

    /// Spawns the event loop and transitions to `Running`.
    pub fn start<H: InboundHandler>(
        mut self,
        handler: Arc<H>,
        subscriptions: Vec<String>,
    ) -> BrokerLink<Running> {
        match self.eventloop.take() {
            Some(eventloop) => {
                info!(endpoint = %self.endpoint, topics = ?subscriptions, "starting broker event loop");
                let task = tokio::spawn(run_event_loop(
                    eventloop,
                    self.client.clone(),
                    handler,
                    subscriptions,
                    self.shutdown.clone(),
                ));
                self.task = Some(task);
            }
            None => error!("broker link has no event loop to start"),
        }
        self.transition()
    }
}

impl BrokerLink<Running> {
    /// Cancels the event loop, sends DISCONNECT and waits for the task.
    pub async fn shutdown(mut self) -> Result<BrokerLink<Stopped>, LinkError> {
        info!(endpoint = %self.endpoint, "shutting down broker link");
        self.shutdown.cancel();
        if let Some(task) = self.task.take() {
            task.await?;
        }
        Ok(self.transition())
    }
}

async fn run_event_loop<H: InboundHandler>(
    mut eventloop: EventLoop,
    client: AsyncClient,
    handler: Arc<H>,
    subscriptions: Vec<String>,
    shutdown: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            _ = shutdown.cancelled() => break,
            event = eventloop.poll() => event,
        };

        match event {
            // rumqttc only yields a ConnAck for an accepted connection
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                info!("connected to MQTT broker");
                subscribe_all(&client, &subscriptions);
                handler.on_connected().await;
            }
            Ok(Event::Incoming(Packet::SubAck(ack))) => {
                debug!(pkid = ack.pkid, "subscription acknowledged");
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                let message =
                    InboundMessage::received_at(publish.topic, publish.payload.to_vec(), Utc::now());
                debug!(%message, "message received");
                handler.handle(message).await;
            }
            Ok(Event::Incoming(Packet::Disconnect)) => {
                warn!("broker sent disconnect");
                handler.on_disconnected().await;
            }
            Ok(_) => {}
            Err(e) => {
                match &e {
                    ConnectionError::ConnectionRefused(code) => {
                        warn!(?code, "broker refused connection")
                    }
                    _ => error!("MQTT connection error: {}", e),
                }
                handler.on_disconnected().await;
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(RECONNECT_DELAY) => {}
                }
            }
        }
    }

    if let Err(e) = client.try_disconnect() {
        warn!("failed to queue disconnect: {}", e);
    } else {
        let flushed = tokio::time::timeout(DISCONNECT_FLUSH_TIMEOUT, async {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Outgoing(Outgoing::Disconnect)) | Err(_) => break,
                    Ok(_) => {}
                }
            }
        })
        .await;
        if flushed.is_err() {
            debug!("disconnect not flushed before timeout");
        }
    }
    handler.on_disconnected().await;
    info!("broker event loop stopped");
}

fn subscribe_all(client: &AsyncClient, topics: &[String]) {
    for topic in topics {
        // try_ variant: the request queue is drained by this same task
        match client.try_subscribe(topic.as_str(), QoS::AtMostOnce) {
            Ok(()) => info!(topic = %topic, "subscribed"),
            Err(e) => error!(topic = %topic, "subscribe failed: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn offline_config() -> MqttConfig {
        MqttConfig {
            use_websockets: false,
            broker_port: 1883,
            ..MqttConfig::default()
        }
    }

    #[derive(Default)]
    struct ConnectionCounter {
        connected: AtomicUsize,
        disconnected: AtomicUsize,
    }

    impl InboundHandler for ConnectionCounter {
        async fn handle(&self, _message: InboundMessage) {}

        async fn on_connected(&self) {
            self.connected.fetch_add(1, Ordering::SeqCst);
        }

        async fn on_disconnected(&self) {
            self.disconnected.fetch_add(1, Ordering::SeqCst);
        }
    }

    /// Answers the first CONNECT with a CONNACK carrying `return_code`, then
    /// yields the first packet the client sends after it.
    async fn one_shot_broker(return_code: u8) -> (MqttConfig, JoinHandle<Vec<u8>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let broker = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 256];
            let _ = socket.read(&mut buf).await.unwrap();
            socket.write_all(&[0x20, 0x02, 0x00, return_code]).await.unwrap();
            let n = tokio::time::timeout(Duration::from_secs(2), socket.read(&mut buf))
                .await
                .map(|r| r.unwrap_or(0))
                .unwrap_or(0);
            buf[..n].to_vec()
        });
        let config = MqttConfig {
            use_websockets: false,
            broker_address: "127.0.0.1".to_string(),
            broker_port: port,
            ..MqttConfig::default()
        };
        (config, broker)
    }

    async fn wait_until(check: impl Fn() -> bool) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !check() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("condition not reached in time");
    }

    #[tokio::test]
    async fn publish_is_queued_while_event_loop_is_alive() {
        let link = BrokerLink::configure(&offline_config());
        let handle = link.handle();

        assert!(handle.publish("light", "on").await.is_ok());
        drop(link);
    }

    #[tokio::test]
    async fn publish_is_rejected_once_event_loop_is_gone() {
        let link = BrokerLink::configure(&offline_config());
        let handle = link.handle();
        drop(link);

        assert!(matches!(
            handle.publish("light", "on").await,
            Err(LinkError::Rejected(_))
        ));
    }

    #[tokio::test]
    async fn refused_connection_reports_disconnect() {
        let (config, _broker) = one_shot_broker(0x05).await;
        let counter = Arc::new(ConnectionCounter::default());
        let link = BrokerLink::configure(&config).start(counter.clone(), vec!["light".to_string()]);

        wait_until(|| counter.disconnected.load(Ordering::SeqCst) >= 1).await;
        assert_eq!(counter.connected.load(Ordering::SeqCst), 0);

        link.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn accepted_connection_subscribes() {
        let (config, broker) = one_shot_broker(0x00).await;
        let counter = Arc::new(ConnectionCounter::default());
        let link = BrokerLink::configure(&config).start(counter.clone(), vec!["light".to_string()]);

        wait_until(|| counter.connected.load(Ordering::SeqCst) == 1).await;
        let next_packet = broker.await.unwrap();
        assert_eq!(next_packet.first(), Some(&0x82), "expected SUBSCRIBE");

        link.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn endpoint_names_transport() {
        let link = BrokerLink::configure(&MqttConfig::default());
        assert_eq!(link.endpoint(), "ws://localhost:9001");
    }
}
