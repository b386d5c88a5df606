//! Mapping between `coap-lite` packets and the core message types.

use anyhow::{anyhow, Result};
use coap_lite::{CoapOption, MessageClass, MessageType, Packet};
use coapreg_core::types::{
    DiscoveryResponse, InboundRequest, MessageKind, Method, Reply, ResponseCode,
};
use coapreg_registration::DiscoveryTarget;
use std::net::SocketAddr;

/// A decoded datagram.
#[derive(Debug)]
pub enum Incoming {
    /// A request; the packet is kept to build the reply.
    Request {
        packet: Packet,
        request: InboundRequest,
    },
    /// A response to one of our requests.
    Response {
        message_id: u16,
        kind: MessageKind,
        token: Vec<u8>,
        response: DiscoveryResponse,
    },
    /// Empty message: ACK, RST or ping.
    Empty { message_id: u16, kind: MessageKind },
}

pub fn decode(buf: &[u8], source: SocketAddr) -> Result<Incoming> {
    let packet = Packet::from_bytes(buf).map_err(|e| anyhow!("invalid CoAP message: {e:?}"))?;
    let code = u8::from(packet.header.code);
    let kind = message_kind(packet.header.get_type());
    let message_id = packet.header.message_id;

    if code == 0 {
        return Ok(Incoming::Empty { message_id, kind });
    }

    if code >> 5 == 0 {
        let method = Method::from_code(code);
        let request = InboundRequest::new(kind, method, request_path(&packet), source);
        return Ok(Incoming::Request { packet, request });
    }

    let response = DiscoveryResponse::new(
        ResponseCode::from_raw(code),
        content_format(&packet),
        packet.payload.clone(),
    );
    Ok(Incoming::Response {
        message_id,
        kind,
        token: packet.get_token().to_vec(),
        response,
    })
}

/// Reply to `request`: piggybacked ACK for CON, NON otherwise.
pub fn encode_reply(request: &Packet, reply: &Reply, fresh_message_id: u16) -> Packet {
    let mut packet = Packet::new();
    if request.header.get_type() == MessageType::Confirmable {
        packet.header.set_type(MessageType::Acknowledgement);
        packet.header.message_id = request.header.message_id;
    } else {
        packet.header.set_type(MessageType::NonConfirmable);
        packet.header.message_id = fresh_message_id;
    }
    packet.header.code = MessageClass::from(reply.code.raw());
    packet.set_token(request.get_token().to_vec());
    packet.payload = reply.payload.to_vec();
    packet
}

/// Confirmable `GET /.well-known/core` to `target`.
pub fn discovery_request(target: &DiscoveryTarget, message_id: u16, token: Vec<u8>) -> Packet {
    let mut packet = Packet::new();
    packet.header.set_type(MessageType::Confirmable);
    packet.header.code = MessageClass::from(Method::Get.code());
    packet.header.message_id = message_id;
    packet.set_token(token);
    for segment in target.path_segments() {
        packet.add_option(CoapOption::UriPath, segment.as_bytes().to_vec());
    }
    packet
}

/// Empty ACK for a confirmable response we received.
pub fn empty_ack(message_id: u16) -> Packet {
    empty(MessageType::Acknowledgement, message_id)
}

/// RST: answers a CoAP ping or a confirmable message we cannot place.
pub fn reset(message_id: u16) -> Packet {
    empty(MessageType::Reset, message_id)
}

fn empty(kind: MessageType, message_id: u16) -> Packet {
    let mut packet = Packet::new();
    packet.header.set_type(kind);
    packet.header.code = MessageClass::from(0u8);
    packet.header.message_id = message_id;
    packet
}

pub fn encode(packet: &Packet) -> Result<Vec<u8>> {
    packet
        .to_bytes()
        .map_err(|e| anyhow!("failed to encode CoAP message: {e:?}"))
}

fn message_kind(kind: MessageType) -> MessageKind {
    match kind {
        MessageType::Confirmable => MessageKind::Confirmable,
        MessageType::NonConfirmable => MessageKind::NonConfirmable,
        MessageType::Acknowledgement => MessageKind::Acknowledgement,
        MessageType::Reset => MessageKind::Reset,
    }
}

/// Absolute path from the Uri-Path options.
fn request_path(packet: &Packet) -> String {
    let segments: Vec<String> = packet
        .get_option(CoapOption::UriPath)
        .map(|values| {
            values
                .iter()
                .map(|value| String::from_utf8_lossy(value).into_owned())
                .collect()
        })
        .unwrap_or_default();

    format!("/{}", segments.join("/"))
}

fn content_format(packet: &Packet) -> Option<u16> {
    packet
        .get_option(CoapOption::ContentFormat)
        .and_then(|values| values.front())
        .map(|value| value.iter().fold(0u16, |acc, byte| (acc << 8) | u16::from(*byte)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source() -> SocketAddr {
        "[2001:db8::1]:5683".parse().unwrap()
    }

    fn announcement(kind: MessageType) -> Packet {
        let mut packet = Packet::new();
        packet.header.set_type(kind);
        packet.header.code = MessageClass::from(Method::Post.code());
        packet.header.message_id = 0x1234;
        packet.set_token(vec![0xca, 0xfe]);
        packet.add_option(CoapOption::UriPath, b"here_i_am".to_vec());
        packet
    }

    #[test]
    fn test_decode_request() {
        let bytes = encode(&announcement(MessageType::Confirmable)).unwrap();
        let Incoming::Request { request, .. } = decode(&bytes, source()).unwrap() else {
            panic!("expected a request");
        };
        assert_eq!(request.kind, MessageKind::Confirmable);
        assert_eq!(request.method, Method::Post);
        assert_eq!(request.path, "/here_i_am");
        assert_eq!(request.source, source());
    }

    #[test]
    fn test_piggybacked_ack() {
        let request = announcement(MessageType::Confirmable);
        let reply = encode_reply(&request, &Reply::empty(ResponseCode::CONTENT), 99);

        assert_eq!(reply.header.get_type(), MessageType::Acknowledgement);
        assert_eq!(reply.header.message_id, 0x1234);
        assert_eq!(u8::from(reply.header.code), ResponseCode::CONTENT.raw());
        assert_eq!(reply.get_token().to_vec(), vec![0xca, 0xfe]);
        assert!(reply.payload.is_empty());
    }

    #[test]
    fn test_non_confirmable_reply_uses_fresh_id() {
        let request = announcement(MessageType::NonConfirmable);
        let reply = encode_reply(&request, &Reply::empty(ResponseCode::NOT_FOUND), 99);

        assert_eq!(reply.header.get_type(), MessageType::NonConfirmable);
        assert_eq!(reply.header.message_id, 99);
    }

    #[test]
    fn test_discovery_request_layout() {
        let target = DiscoveryTarget::new("2001:db8::1".parse().unwrap(), 5683).unwrap();
        let packet = discovery_request(&target, 7, vec![1, 2, 3, 4]);
        let bytes = encode(&packet).unwrap();

        let Incoming::Request { request, packet } = decode(&bytes, source()).unwrap() else {
            panic!("expected a request");
        };
        assert_eq!(request.method, Method::Get);
        assert_eq!(request.path, "/.well-known/core");
        assert_eq!(request.kind, MessageKind::Confirmable);
        assert_eq!(packet.header.message_id, 7);
        assert_eq!(packet.get_token().to_vec(), vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_decode_response_with_content_format() {
        let mut packet = Packet::new();
        packet.header.set_type(MessageType::Acknowledgement);
        packet.header.code = MessageClass::from(ResponseCode::CONTENT.raw());
        packet.header.message_id = 7;
        packet.set_token(vec![9, 9]);
        packet.add_option(CoapOption::ContentFormat, vec![40]);
        packet.payload = b"</temp>".to_vec();

        let bytes = encode(&packet).unwrap();
        let Incoming::Response {
            message_id,
            kind,
            token,
            response,
        } = decode(&bytes, source()).unwrap()
        else {
            panic!("expected a response");
        };
        assert_eq!(message_id, 7);
        assert_eq!(kind, MessageKind::Acknowledgement);
        assert_eq!(token, vec![9, 9]);
        assert_eq!(response.code, ResponseCode::CONTENT);
        assert_eq!(response.content_format, Some(DiscoveryResponse::LINK_FORMAT));
        assert_eq!(response.payload_str(), Some("</temp>"));
    }

    #[test]
    fn test_decode_empty_reset() {
        let bytes = encode(&reset(42)).unwrap();
        let Incoming::Empty { message_id, kind } = decode(&bytes, source()).unwrap() else {
            panic!("expected an empty message");
        };
        assert_eq!(message_id, 42);
        assert_eq!(kind, MessageKind::Reset);
    }

    #[test]
    fn test_garbage_is_rejected() {
        assert!(decode(&[0xff], source()).is_err());
    }
}
