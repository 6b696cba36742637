//! Codec for encoding and decoding MQTT packets.
//!
//! Packets are framed by the MQTT fixed header: a type/flags byte followed
//! by a variable-length remaining-length field. `decode_from` tolerates
//! partial buffers, returning `Ok(None)` until a complete packet has been
//! accumulated.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

use crate::packet::{ConnectReturnCode, Packet, QoS};

/// Maximum accepted packet size (256 KiB).
pub const MAX_PACKET_SIZE: usize = 256 * 1024;

const PROTOCOL_NAME: &str = "MQTT";
const PROTOCOL_LEVEL: u8 = 4;
const CLEAN_SESSION_FLAG: u8 = 0x02;

/// Protocol errors that can occur during encoding/decoding.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Packet exceeds maximum size.
    #[error("Packet size {0} exceeds maximum {MAX_PACKET_SIZE}")]
    PacketTooLarge(usize),

    /// The remaining-length varint ran past its four-byte limit.
    #[error("Malformed remaining length")]
    MalformedRemainingLength,

    /// Packet type outside the supported subset.
    #[error("Unsupported packet type: {0}")]
    UnsupportedPacket(u8),

    /// Structurally invalid packet data.
    #[error("Malformed packet: {0}")]
    Malformed(&'static str),
}

/// Encode a packet to bytes.
///
/// # Errors
///
/// Returns an error if the packet is too large or structurally invalid
/// (e.g. a QoS 1 publish without a packet id).
pub fn encode(packet: &Packet) -> Result<Bytes, ProtocolError> {
    let mut body = BytesMut::new();

    let first_byte: u8 = match packet {
        Packet::Connect {
            client_id,
            keep_alive,
            clean_session,
        } => {
            put_string(&mut body, PROTOCOL_NAME)?;
            body.put_u8(PROTOCOL_LEVEL);
            body.put_u8(if *clean_session { CLEAN_SESSION_FLAG } else { 0 });
            body.put_u16(*keep_alive);
            put_string(&mut body, client_id)?;
            0x10
        }

        Packet::Connack {
            session_present,
            return_code,
        } => {
            body.put_u8(u8::from(*session_present));
            body.put_u8(*return_code as u8);
            0x20
        }

        Packet::Publish {
            dup,
            qos,
            retain,
            topic,
            packet_id,
            payload,
        } => {
            put_string(&mut body, topic)?;
            if *qos != QoS::AtMostOnce {
                let id = packet_id
                    .ok_or(ProtocolError::Malformed("publish above QoS 0 requires a packet id"))?;
                body.put_u16(id);
            }
            body.extend_from_slice(payload);
            0x30 | (u8::from(*dup) << 3) | ((*qos as u8) << 1) | u8::from(*retain)
        }

        Packet::Puback { packet_id } => {
            body.put_u16(*packet_id);
            0x40
        }

        Packet::Subscribe { packet_id, filters } => {
            if filters.is_empty() {
                return Err(ProtocolError::Malformed("subscribe without filters"));
            }
            body.put_u16(*packet_id);
            for (topic, qos) in filters {
                put_string(&mut body, topic)?;
                body.put_u8(*qos as u8);
            }
            0x82
        }

        Packet::Suback {
            packet_id,
            return_codes,
        } => {
            body.put_u16(*packet_id);
            body.extend_from_slice(return_codes);
            0x90
        }

        Packet::Unsubscribe { packet_id, topics } => {
            if topics.is_empty() {
                return Err(ProtocolError::Malformed("unsubscribe without filters"));
            }
            body.put_u16(*packet_id);
            for topic in topics {
                put_string(&mut body, topic)?;
            }
            0xA2
        }

        Packet::Unsuback { packet_id } => {
            body.put_u16(*packet_id);
            0xB0
        }

        Packet::Pingreq => 0xC0,
        Packet::Pingresp => 0xD0,
        Packet::Disconnect => 0xE0,
    };

    if body.len() > MAX_PACKET_SIZE {
        return Err(ProtocolError::PacketTooLarge(body.len()));
    }

    let mut out = BytesMut::with_capacity(body.len() + 5);
    out.put_u8(first_byte);
    put_remaining_length(&mut out, body.len());
    out.extend_from_slice(&body);

    Ok(out.freeze())
}

/// Decode a single complete packet from bytes.
///
/// # Errors
///
/// Returns an error if the data is truncated, too large, or invalid.
pub fn decode(data: &[u8]) -> Result<Packet, ProtocolError> {
    let mut buf = BytesMut::from(data);
    decode_from(&mut buf)?.ok_or(ProtocolError::Malformed("truncated packet"))
}

/// Try to decode a packet from a buffer, advancing it if successful.
///
/// Returns `Ok(Some(packet))` if a complete packet was decoded,
/// `Ok(None)` if more data is needed, or `Err` on protocol error.
///
/// # Errors
///
/// Returns an error if the packet is too large or invalid.
pub fn decode_from(buf: &mut BytesMut) -> Result<Option<Packet>, ProtocolError> {
    if buf.len() < 2 {
        return Ok(None);
    }

    let first = buf[0];

    // Remaining-length varint, at most four bytes.
    let mut remaining: usize = 0;
    let mut shift = 0;
    let mut idx = 1;
    loop {
        if idx >= buf.len() {
            return Ok(None);
        }
        let byte = buf[idx];
        remaining |= usize::from(byte & 0x7F) << shift;
        idx += 1;
        if byte & 0x80 == 0 {
            break;
        }
        shift += 7;
        if shift > 21 {
            return Err(ProtocolError::MalformedRemainingLength);
        }
    }

    if remaining > MAX_PACKET_SIZE {
        return Err(ProtocolError::PacketTooLarge(remaining));
    }

    let total = idx + remaining;
    if buf.len() < total {
        return Ok(None);
    }

    buf.advance(idx);
    let mut body = buf.split_to(remaining).freeze();
    parse_packet(first, &mut body).map(Some)
}

/// Parse a packet body once the fixed header has been consumed.
fn parse_packet(first: u8, body: &mut Bytes) -> Result<Packet, ProtocolError> {
    match first >> 4 {
        1 => {
            let protocol = read_string(body)?;
            if protocol != PROTOCOL_NAME {
                return Err(ProtocolError::Malformed("unexpected protocol name"));
            }
            if read_u8(body)? != PROTOCOL_LEVEL {
                return Err(ProtocolError::Malformed("unexpected protocol level"));
            }
            let flags = read_u8(body)?;
            let keep_alive = read_u16(body)?;
            let client_id = read_string(body)?;
            Ok(Packet::Connect {
                client_id,
                keep_alive,
                clean_session: flags & CLEAN_SESSION_FLAG != 0,
            })
        }

        2 => {
            let ack_flags = read_u8(body)?;
            let code = read_u8(body)?;
            Ok(Packet::Connack {
                session_present: ack_flags & 0x01 != 0,
                return_code: ConnectReturnCode::try_from(code)
                    .map_err(ProtocolError::Malformed)?,
            })
        }

        3 => {
            let flags = first & 0x0F;
            let qos = QoS::try_from((flags >> 1) & 0x03).map_err(ProtocolError::Malformed)?;
            let topic = read_string(body)?;
            let packet_id = if qos == QoS::AtMostOnce {
                None
            } else {
                Some(read_u16(body)?)
            };
            let payload = body.split_to(body.len());
            Ok(Packet::Publish {
                dup: flags & 0x08 != 0,
                qos,
                retain: flags & 0x01 != 0,
                topic,
                packet_id,
                payload,
            })
        }

        4 => Ok(Packet::Puback {
            packet_id: read_u16(body)?,
        }),

        8 => {
            let packet_id = read_u16(body)?;
            let mut filters = Vec::new();
            while !body.is_empty() {
                let topic = read_string(body)?;
                let qos = QoS::try_from(read_u8(body)?).map_err(ProtocolError::Malformed)?;
                filters.push((topic, qos));
            }
            if filters.is_empty() {
                return Err(ProtocolError::Malformed("subscribe without filters"));
            }
            Ok(Packet::Subscribe { packet_id, filters })
        }

        9 => {
            let packet_id = read_u16(body)?;
            Ok(Packet::Suback {
                packet_id,
                return_codes: body.to_vec(),
            })
        }

        10 => {
            let packet_id = read_u16(body)?;
            let mut topics = Vec::new();
            while !body.is_empty() {
                topics.push(read_string(body)?);
            }
            if topics.is_empty() {
                return Err(ProtocolError::Malformed("unsubscribe without filters"));
            }
            Ok(Packet::Unsubscribe { packet_id, topics })
        }

        11 => Ok(Packet::Unsuback {
            packet_id: read_u16(body)?,
        }),

        12 => Ok(Packet::Pingreq),
        13 => Ok(Packet::Pingresp),
        14 => Ok(Packet::Disconnect),

        other => Err(ProtocolError::UnsupportedPacket(other)),
    }
}

/// Append a length-prefixed UTF-8 string.
fn put_string(buf: &mut BytesMut, s: &str) -> Result<(), ProtocolError> {
    let len = u16::try_from(s.len()).map_err(|_| ProtocolError::Malformed("string too long"))?;
    buf.put_u16(len);
    buf.extend_from_slice(s.as_bytes());
    Ok(())
}

/// Append a remaining-length varint.
fn put_remaining_length(buf: &mut BytesMut, mut len: usize) {
    loop {
        let mut byte = (len % 128) as u8;
        len /= 128;
        if len > 0 {
            byte |= 0x80;
        }
        buf.put_u8(byte);
        if len == 0 {
            break;
        }
    }
}

fn read_u8(body: &mut Bytes) -> Result<u8, ProtocolError> {
    if body.is_empty() {
        return Err(ProtocolError::Malformed("truncated integer"));
    }
    Ok(body.get_u8())
}

fn read_u16(body: &mut Bytes) -> Result<u16, ProtocolError> {
    if body.len() < 2 {
        return Err(ProtocolError::Malformed("truncated integer"));
    }
    Ok(body.get_u16())
}

fn read_string(body: &mut Bytes) -> Result<String, ProtocolError> {
    let len = usize::from(read_u16(body)?);
    if body.len() < len {
        return Err(ProtocolError::Malformed("truncated string"));
    }
    let raw = body.split_to(len);
    String::from_utf8(raw.to_vec()).map_err(|_| ProtocolError::Malformed("invalid utf-8 string"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connect_byte_image() {
        let packet = Packet::connect("dash_1", 300);
        let encoded = encode(&packet).unwrap();
        assert_eq!(
            hex_of(&encoded),
            "101200044d5154540402012c0006646173685f31"
        );
    }

    #[test]
    fn test_connack_byte_image() {
        let data = [0x20, 0x02, 0x00, 0x00];
        let packet = decode(&data).unwrap();
        assert_eq!(
            packet,
            Packet::Connack {
                session_present: false,
                return_code: ConnectReturnCode::Accepted,
            }
        );
    }

    #[test]
    fn test_subscribe_byte_image() {
        let packet = Packet::subscribe(1, "vending/status", QoS::AtMostOnce);
        let encoded = encode(&packet).unwrap();
        assert_eq!(
            hex_of(&encoded),
            "82130001000e76656e64696e672f73746174757300"
        );
    }

    #[test]
    fn test_suback_byte_image() {
        let data = [0x90, 0x03, 0x00, 0x01, 0x00];
        let packet = decode(&data).unwrap();
        assert_eq!(
            packet,
            Packet::Suback {
                packet_id: 1,
                return_codes: vec![0],
            }
        );
    }

    #[test]
    fn test_publish_byte_image() {
        let payload: &[u8] = br#"{"time":1700000000000,"DC":0}"#;
        let packet = Packet::publish("vending/status", payload.to_vec());
        let encoded = encode(&packet).unwrap();
        assert_eq!(encoded.len(), 47);
        assert_eq!(&encoded[..2], &[0x30, 0x2d]);
        let decoded = decode(&encoded).unwrap();
        assert_eq!(packet, decoded);
    }

    #[test]
    fn test_encode_decode_roundtrip() {
        let packets = vec![
            Packet::connect("dash_abc123", 300),
            Packet::Connack {
                session_present: true,
                return_code: ConnectReturnCode::Accepted,
            },
            Packet::publish("vending/vendEvents", b"{\"time\":1}".to_vec()),
            Packet::Publish {
                dup: false,
                qos: QoS::AtLeastOnce,
                retain: false,
                topic: "vending/freeVend".to_string(),
                packet_id: Some(7),
                payload: Bytes::from_static(b"{\"product\":\"WATER\"}"),
            },
            Packet::puback(7),
            Packet::subscribe(2, "vending/vendEvents", QoS::AtMostOnce),
            Packet::Suback {
                packet_id: 2,
                return_codes: vec![0x00],
            },
            Packet::unsubscribe(3, "vending/status"),
            Packet::Unsuback { packet_id: 3 },
            Packet::Pingreq,
            Packet::Pingresp,
            Packet::Disconnect,
        ];

        for packet in packets {
            let encoded = encode(&packet).unwrap();
            let decoded = decode(&encoded).unwrap();
            assert_eq!(packet, decoded);
        }
    }

    #[test]
    fn test_multibyte_remaining_length() {
        // Topic (2 + 14 bytes) plus a 305-byte payload: remaining = 321.
        let packet = Packet::publish("vending/status", vec![b'x'; 305]);
        let encoded = encode(&packet).unwrap();
        assert_eq!(&encoded[..3], &[0x30, 0xC1, 0x02]);
        assert_eq!(decode(&encoded).unwrap(), packet);
    }

    #[test]
    fn test_streaming_decode() {
        let first = Packet::subscribe(1, "vending/status", QoS::AtMostOnce);
        let second = Packet::publish("vending/status", b"{}".to_vec());

        let mut buf = BytesMut::new();
        buf.extend_from_slice(&encode(&first).unwrap());
        buf.extend_from_slice(&encode(&second).unwrap());

        assert_eq!(decode_from(&mut buf).unwrap().unwrap(), first);
        assert_eq!(decode_from(&mut buf).unwrap().unwrap(), second);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_decode_partial() {
        let packet = Packet::subscribe(1, "vending/status", QoS::AtMostOnce);
        let encoded = encode(&packet).unwrap();

        // Feed the packet one byte at a time; no prefix may decode.
        let mut buf = BytesMut::new();
        for byte in &encoded[..encoded.len() - 1] {
            buf.extend_from_slice(&[*byte]);
            assert!(decode_from(&mut buf).unwrap().is_none());
        }
        buf.extend_from_slice(&encoded[encoded.len() - 1..]);
        assert_eq!(decode_from(&mut buf).unwrap().unwrap(), packet);
    }

    #[test]
    fn test_packet_too_large() {
        let packet = Packet::publish("vending/status", vec![0u8; MAX_PACKET_SIZE + 1]);
        match encode(&packet) {
            Err(ProtocolError::PacketTooLarge(_)) => {}
            other => panic!("Expected PacketTooLarge, got {:?}", other),
        }

        // Decode side: a header advertising more than the maximum.
        let mut buf = BytesMut::from(&[0x30, 0xFF, 0xFF, 0xFF, 0x7F][..]);
        match decode_from(&mut buf) {
            Err(ProtocolError::PacketTooLarge(_)) => {}
            other => panic!("Expected PacketTooLarge, got {:?}", other),
        }
    }

    #[test]
    fn test_malformed_remaining_length() {
        let mut buf = BytesMut::from(&[0x30, 0xFF, 0xFF, 0xFF, 0xFF, 0x01][..]);
        match decode_from(&mut buf) {
            Err(ProtocolError::MalformedRemainingLength) => {}
            other => panic!("Expected MalformedRemainingLength, got {:?}", other),
        }
    }

    #[test]
    fn test_qos2_rejected() {
        // PUBREC is outside the supported subset.
        let data = [0x50, 0x02, 0x00, 0x01];
        match decode(&data) {
            Err(ProtocolError::UnsupportedPacket(5)) => {}
            other => panic!("Expected UnsupportedPacket, got {:?}", other),
        }
    }

    fn hex_of(data: &[u8]) -> String {
        data.iter().map(|b| format!("{:02x}", b)).collect()
    }
}
