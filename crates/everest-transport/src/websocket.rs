//! MQTT-over-WebSocket transport adapter.
//!
//! A single driver task owns the socket. Commands arrive on an mpsc
//! channel; outcomes, message arrivals, and connection loss flow back on
//! the event channel. The task performs the WebSocket upgrade with the
//! `mqtt` subprotocol against a presigned URL, runs the CONNECT/CONNACK
//! handshake under a timeout, correlates SUBACK/UNSUBACK by packet id,
//! and answers keepalive on an interval.

use bytes::{Bytes, BytesMut};
use everest_protocol::{codec, ConnectReturnCode, Packet, QoS, SUBACK_FAILURE};
use futures_util::{SinkExt, StreamExt};
use std::collections::HashMap;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::SEC_WEBSOCKET_PROTOCOL;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, trace, warn};

use crate::traits::{BrokerEvent, BrokerTransport, TransportError};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// WebSocket transport configuration.
#[derive(Debug, Clone)]
pub struct WebSocketTransportConfig {
    /// MQTT keepalive interval in seconds; PINGREQ is sent at half this.
    pub keep_alive_secs: u16,
    /// Upgrade-plus-handshake deadline.
    pub connect_timeout: Duration,
}

impl Default for WebSocketTransportConfig {
    fn default() -> Self {
        Self {
            keep_alive_secs: 300,
            connect_timeout: Duration::from_secs(3),
        }
    }
}

/// Commands accepted by the driver task.
enum Command {
    Connect { url: String, client_id: String },
    Disconnect,
    Subscribe(String),
    Unsubscribe(String),
    Publish { topic: String, payload: Bytes },
}

/// Operation awaiting a broker acknowledgment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PendingOp {
    Subscribe,
    Unsubscribe,
}

/// MQTT-over-WebSocket broker transport.
///
/// Cheap to clone command handle; the socket lives in a spawned driver
/// task and is dropped when this handle and the event receiver go away.
pub struct MqttWebSocketTransport {
    commands: mpsc::UnboundedSender<Command>,
}

impl MqttWebSocketTransport {
    /// Spawn the driver task and return the command handle plus the event
    /// stream. Must be called from within a Tokio runtime.
    #[must_use]
    pub fn spawn(
        config: WebSocketTransportConfig,
    ) -> (Self, mpsc::UnboundedReceiver<BrokerEvent>) {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        tokio::spawn(drive(config, command_rx, event_tx));

        (
            Self {
                commands: command_tx,
            },
            event_rx,
        )
    }

    fn dispatch(&self, command: Command) {
        // A closed channel means the driver is gone; nothing to notify.
        let _ = self.commands.send(command);
    }
}

impl BrokerTransport for MqttWebSocketTransport {
    fn connect(&self, url: String, client_id: String) {
        self.dispatch(Command::Connect { url, client_id });
    }

    fn disconnect(&self) {
        self.dispatch(Command::Disconnect);
    }

    fn subscribe(&self, topic: &str) {
        self.dispatch(Command::Subscribe(topic.to_string()));
    }

    fn unsubscribe(&self, topic: &str) {
        self.dispatch(Command::Unsubscribe(topic.to_string()));
    }

    fn publish(&self, topic: &str, payload: Bytes) {
        self.dispatch(Command::Publish {
            topic: topic.to_string(),
            payload,
        });
    }
}

/// Driver loop: owns the socket, serializes all transport activity.
async fn drive(
    config: WebSocketTransportConfig,
    mut commands: mpsc::UnboundedReceiver<Command>,
    events: mpsc::UnboundedSender<BrokerEvent>,
) {
    let mut socket: Option<WsStream> = None;
    let mut read_buffer = BytesMut::with_capacity(4096);
    let mut pending: HashMap<u16, (String, PendingOp)> = HashMap::new();
    let mut next_packet_id: u16 = 1;

    let ping_period = Duration::from_secs(u64::from(config.keep_alive_secs.max(2)) / 2);
    let mut keepalive = tokio::time::interval(ping_period);
    keepalive.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        let connected = socket.is_some();
        let next_message = async {
            match socket.as_mut() {
                Some(ws) => ws.next().await,
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            command = commands.recv() => {
                let Some(command) = command else {
                    // Command handle dropped: tear down and exit.
                    if let Some(mut ws) = socket.take() {
                        let _ = ws.close(None).await;
                    }
                    break;
                };

                match command {
                    Command::Connect { url, client_id } => {
                        if let Some(mut old) = socket.take() {
                            warn!("Connect while a connection is open; replacing it");
                            let _ = old.close(None).await;
                        }
                        read_buffer.clear();
                        fail_pending(&mut pending, &events);

                        match open_session(&url, &client_id, &config).await {
                            Ok(ws) => {
                                debug!(client_id = %client_id, "Broker session established");
                                socket = Some(ws);
                                keepalive.reset();
                                let _ = events.send(BrokerEvent::Connected);
                            }
                            Err(e) => {
                                warn!(error = %e, "Broker connect failed");
                                let _ = events.send(BrokerEvent::ConnectFailed(e.to_string()));
                            }
                        }
                    }

                    Command::Disconnect => {
                        if let Some(mut ws) = socket.take() {
                            let _ = send_packet(&mut ws, &Packet::Disconnect).await;
                            let _ = ws.close(None).await;
                            debug!("Broker session closed by caller");
                        }
                        read_buffer.clear();
                        fail_pending(&mut pending, &events);
                    }

                    Command::Subscribe(topic) => {
                        let Some(ws) = socket.as_mut() else {
                            let _ = events.send(BrokerEvent::SubscribeResult {
                                topic,
                                success: false,
                            });
                            continue;
                        };
                        let id = allocate_packet_id(&mut next_packet_id, &pending);
                        pending.insert(id, (topic.clone(), PendingOp::Subscribe));
                        let packet = Packet::subscribe(id, topic.clone(), QoS::AtMostOnce);
                        if let Err(e) = send_packet(ws, &packet).await {
                            pending.remove(&id);
                            let _ = events.send(BrokerEvent::SubscribeResult {
                                topic,
                                success: false,
                            });
                            lose_connection(&mut socket, &mut pending, &events, &e.to_string());
                        }
                    }

                    Command::Unsubscribe(topic) => {
                        let Some(ws) = socket.as_mut() else {
                            let _ = events.send(BrokerEvent::UnsubscribeResult {
                                topic,
                                success: false,
                            });
                            continue;
                        };
                        let id = allocate_packet_id(&mut next_packet_id, &pending);
                        pending.insert(id, (topic.clone(), PendingOp::Unsubscribe));
                        let packet = Packet::unsubscribe(id, topic.clone());
                        if let Err(e) = send_packet(ws, &packet).await {
                            pending.remove(&id);
                            let _ = events.send(BrokerEvent::UnsubscribeResult {
                                topic,
                                success: false,
                            });
                            lose_connection(&mut socket, &mut pending, &events, &e.to_string());
                        }
                    }

                    Command::Publish { topic, payload } => {
                        let Some(ws) = socket.as_mut() else {
                            warn!(topic = %topic, "Publish with no connection; dropped");
                            continue;
                        };
                        let packet = Packet::publish(topic, payload);
                        if let Err(e) = send_packet(ws, &packet).await {
                            lose_connection(&mut socket, &mut pending, &events, &e.to_string());
                        }
                    }
                }
            }

            message = next_message => {
                match message {
                    Some(Ok(Message::Binary(data))) => {
                        read_buffer.extend_from_slice(&data);
                        loop {
                            match codec::decode_from(&mut read_buffer) {
                                Ok(Some(packet)) => {
                                    if let Some(response) =
                                        handle_packet(packet, &mut pending, &events)
                                    {
                                        if let Some(ws) = socket.as_mut() {
                                            if let Err(e) = send_packet(ws, &response).await {
                                                lose_connection(
                                                    &mut socket,
                                                    &mut pending,
                                                    &events,
                                                    &e.to_string(),
                                                );
                                                break;
                                            }
                                        }
                                    }
                                }
                                Ok(None) => break,
                                Err(e) => {
                                    error!(error = %e, "Undecodable broker data");
                                    lose_connection(
                                        &mut socket,
                                        &mut pending,
                                        &events,
                                        &e.to_string(),
                                    );
                                    break;
                                }
                            }
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if let Some(ws) = socket.as_mut() {
                            if ws.send(Message::Pong(data)).await.is_err() {
                                lose_connection(&mut socket, &mut pending, &events, "pong failed");
                            }
                        }
                    }
                    Some(Ok(Message::Pong(_))) => {}
                    Some(Ok(Message::Text(text))) => {
                        // Some brokers frame MQTT bytes as text; treat as binary.
                        read_buffer.extend_from_slice(text.as_bytes());
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        lose_connection(&mut socket, &mut pending, &events, "closed by broker");
                    }
                    Some(Ok(Message::Frame(_))) => {}
                    Some(Err(e)) => {
                        lose_connection(&mut socket, &mut pending, &events, &e.to_string());
                    }
                }
            }

            _ = keepalive.tick(), if connected => {
                if let Some(ws) = socket.as_mut() {
                    trace!("Keepalive ping");
                    if let Err(e) = send_packet(ws, &Packet::Pingreq).await {
                        lose_connection(&mut socket, &mut pending, &events, &e.to_string());
                    }
                }
            }
        }
    }
}

/// Upgrade the WebSocket and complete the MQTT handshake.
async fn open_session(
    url: &str,
    client_id: &str,
    config: &WebSocketTransportConfig,
) -> Result<WsStream, TransportError> {
    let mut request = url
        .into_client_request()
        .map_err(|e| TransportError::WebSocket(e.to_string()))?;
    request
        .headers_mut()
        .insert(SEC_WEBSOCKET_PROTOCOL, HeaderValue::from_static("mqtt"));

    let keep_alive = config.keep_alive_secs;
    let handshake = async move {
        let (mut ws, _response) = connect_async(request)
            .await
            .map_err(|e| TransportError::WebSocket(e.to_string()))?;

        send_packet(&mut ws, &Packet::connect(client_id, keep_alive)).await?;

        let mut buffer = BytesMut::with_capacity(256);
        loop {
            match ws.next().await {
                Some(Ok(Message::Binary(data))) => {
                    buffer.extend_from_slice(&data);
                    if let Some(packet) = codec::decode_from(&mut buffer)? {
                        return match packet {
                            Packet::Connack {
                                return_code: ConnectReturnCode::Accepted,
                                ..
                            } => Ok(ws),
                            Packet::Connack { return_code, .. } => {
                                Err(TransportError::Refused(return_code.description()))
                            }
                            _ => Err(TransportError::WebSocket(
                                "unexpected packet before CONNACK".to_string(),
                            )),
                        };
                    }
                }
                Some(Ok(Message::Ping(data))) => {
                    let _ = ws.send(Message::Pong(data)).await;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(TransportError::WebSocket(e.to_string())),
                None => return Err(TransportError::ConnectionClosed),
            }
        }
    };

    tokio::time::timeout(config.connect_timeout, handshake)
        .await
        .map_err(|_| TransportError::Timeout)?
}

/// Encode and send one packet as a binary WebSocket message.
async fn send_packet(ws: &mut WsStream, packet: &Packet) -> Result<(), TransportError> {
    let frame = codec::encode(packet)?;
    ws.send(Message::Binary(frame.to_vec()))
        .await
        .map_err(|e| TransportError::WebSocket(e.to_string()))
}

/// Apply an inbound packet; returns a response packet to send, if any.
fn handle_packet(
    packet: Packet,
    pending: &mut HashMap<u16, (String, PendingOp)>,
    events: &mpsc::UnboundedSender<BrokerEvent>,
) -> Option<Packet> {
    match packet {
        Packet::Publish {
            topic,
            payload,
            qos,
            packet_id,
            ..
        } => {
            let _ = events.send(BrokerEvent::MessageArrived { topic, payload });
            if qos == QoS::AtLeastOnce {
                return packet_id.map(Packet::puback);
            }
            None
        }

        Packet::Suback {
            packet_id,
            return_codes,
        } => {
            match pending.remove(&packet_id) {
                Some((topic, PendingOp::Subscribe)) => {
                    let success = return_codes
                        .first()
                        .map(|code| *code != SUBACK_FAILURE)
                        .unwrap_or(false);
                    let _ = events.send(BrokerEvent::SubscribeResult { topic, success });
                }
                Some((topic, PendingOp::Unsubscribe)) => {
                    warn!(topic = %topic, "SUBACK acknowledged an unsubscribe");
                    let _ = events.send(BrokerEvent::UnsubscribeResult {
                        topic,
                        success: false,
                    });
                }
                None => warn!(packet_id, "Unmatched SUBACK"),
            }
            None
        }

        Packet::Unsuback { packet_id } => {
            match pending.remove(&packet_id) {
                Some((topic, PendingOp::Unsubscribe)) => {
                    let _ = events.send(BrokerEvent::UnsubscribeResult {
                        topic,
                        success: true,
                    });
                }
                Some((topic, PendingOp::Subscribe)) => {
                    warn!(topic = %topic, "UNSUBACK acknowledged a subscribe");
                    let _ = events.send(BrokerEvent::SubscribeResult {
                        topic,
                        success: false,
                    });
                }
                None => warn!(packet_id, "Unmatched UNSUBACK"),
            }
            None
        }

        Packet::Pingresp => {
            trace!("Keepalive pong");
            None
        }

        other => {
            warn!(packet_type = ?other.packet_type(), "Unexpected packet");
            None
        }
    }
}

/// Drop the socket and report unsolicited loss.
///
/// Every pending operation gets its terminal failure event before the
/// loss event, preserving the one-terminal-callback contract.
fn lose_connection(
    socket: &mut Option<WsStream>,
    pending: &mut HashMap<u16, (String, PendingOp)>,
    events: &mpsc::UnboundedSender<BrokerEvent>,
    reason: &str,
) {
    if socket.take().is_some() {
        warn!(reason = %reason, "Broker connection lost");
        fail_pending(pending, events);
        let _ = events.send(BrokerEvent::ConnectionLost(reason.to_string()));
    }
}

/// Emit a failure for every in-flight operation.
fn fail_pending(
    pending: &mut HashMap<u16, (String, PendingOp)>,
    events: &mpsc::UnboundedSender<BrokerEvent>,
) {
    for (_, (topic, op)) in pending.drain() {
        let event = match op {
            PendingOp::Subscribe => BrokerEvent::SubscribeResult {
                topic,
                success: false,
            },
            PendingOp::Unsubscribe => BrokerEvent::UnsubscribeResult {
                topic,
                success: false,
            },
        };
        let _ = events.send(event);
    }
}

/// Allocate a packet id that is non-zero and not in flight.
fn allocate_packet_id(next: &mut u16, pending: &HashMap<u16, (String, PendingOp)>) -> u16 {
    loop {
        let id = *next;
        *next = next.wrapping_add(1);
        if *next == 0 {
            *next = 1;
        }
        if id != 0 && !pending.contains_key(&id) {
            return id;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = WebSocketTransportConfig::default();
        assert_eq!(config.keep_alive_secs, 300);
        assert_eq!(config.connect_timeout, Duration::from_secs(3));
    }

    #[test]
    fn test_allocate_packet_id_skips_zero_and_pending() {
        let mut pending = HashMap::new();
        pending.insert(2u16, ("t".to_string(), PendingOp::Subscribe));

        let mut next = 1u16;
        assert_eq!(allocate_packet_id(&mut next, &pending), 1);
        // 2 is in flight, so it is skipped.
        assert_eq!(allocate_packet_id(&mut next, &pending), 3);

        let mut next = u16::MAX;
        assert_eq!(allocate_packet_id(&mut next, &pending), u16::MAX);
        // Wraps past zero.
        assert_eq!(allocate_packet_id(&mut next, &pending), 1);
    }

    #[test]
    fn test_handle_qos1_publish_acks() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut pending = HashMap::new();

        let publish = Packet::Publish {
            dup: false,
            qos: QoS::AtLeastOnce,
            retain: false,
            topic: "vending/status".to_string(),
            packet_id: Some(9),
            payload: Bytes::from_static(b"{}"),
        };

        let response = handle_packet(publish, &mut pending, &tx);
        assert_eq!(response, Some(Packet::puback(9)));
        assert!(matches!(
            rx.try_recv().unwrap(),
            BrokerEvent::MessageArrived { .. }
        ));
    }

    #[test]
    fn test_suback_correlation() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut pending = HashMap::new();
        pending.insert(4u16, ("vending/status".to_string(), PendingOp::Subscribe));

        let suback = Packet::Suback {
            packet_id: 4,
            return_codes: vec![0x00],
        };
        assert!(handle_packet(suback, &mut pending, &tx).is_none());
        assert!(pending.is_empty());

        match rx.try_recv().unwrap() {
            BrokerEvent::SubscribeResult { topic, success } => {
                assert_eq!(topic, "vending/status");
                assert!(success);
            }
            other => panic!("Unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_suback_failure_code() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut pending = HashMap::new();
        pending.insert(5u16, ("vending/status".to_string(), PendingOp::Subscribe));

        let suback = Packet::Suback {
            packet_id: 5,
            return_codes: vec![SUBACK_FAILURE],
        };
        handle_packet(suback, &mut pending, &tx);

        match rx.try_recv().unwrap() {
            BrokerEvent::SubscribeResult { success, .. } => assert!(!success),
            other => panic!("Unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_fail_pending_emits_terminal_failures() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut pending = HashMap::new();
        pending.insert(1u16, ("a".to_string(), PendingOp::Subscribe));
        pending.insert(2u16, ("b".to_string(), PendingOp::Unsubscribe));

        fail_pending(&mut pending, &tx);
        assert!(pending.is_empty());

        let mut seen = 0;
        while let Ok(event) = rx.try_recv() {
            match event {
                BrokerEvent::SubscribeResult { success, .. }
                | BrokerEvent::UnsubscribeResult { success, .. } => {
                    assert!(!success);
                    seen += 1;
                }
                other => panic!("Unexpected event: {:?}", other),
            }
        }
        assert_eq!(seen, 2);
    }
}
