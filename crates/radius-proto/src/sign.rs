//! Request signing and response verification
//!
//! A client signs a request once per server: a fresh Request Authenticator
//! is drawn, the Message-Authenticator (when present) is recomputed, and the
//! packet is encoded into its final wire image. Retransmissions to the same
//! server resend that image verbatim, keeping the Request Authenticator
//! identical across retries as RFC 2865 Section 2.5 requires.

use crate::attributes::AttributeType;
use crate::auth::{generate_request_authenticator, verify_response_authenticator};
use crate::message_auth::{calculate_message_authenticator, verify_response_message_authenticator};
use crate::packet::{find_attr_value_offset, Packet, PacketError};

/// A signed request ready for the wire.
#[derive(Debug, Clone)]
pub struct SignedRequest {
    /// Encoded packet, Authenticator and Message-Authenticator in place.
    pub bytes: Vec<u8>,
    /// The Request Authenticator, retained for response verification.
    pub authenticator: [u8; 16],
}

/// Sign `packet` for transmission with `secret`.
///
/// Draws a fresh Request Authenticator, recomputes an existing
/// Message-Authenticator attribute in place, and returns the encoded wire
/// image. The packet's identifier must already be its final value: the
/// identifier byte is covered by both authenticators.
pub fn sign_request(packet: &mut Packet, secret: &[u8]) -> Result<SignedRequest, PacketError> {
    packet.authenticator = generate_request_authenticator();

    if let Some(attr) = packet.find_attribute_mut(AttributeType::MessageAuthenticator as u8) {
        if attr.value.len() != 16 {
            return Err(PacketError::AttributeError(format!(
                "Message-Authenticator must be 16 bytes, got {}",
                attr.value.len()
            )));
        }
        attr.value.fill(0);
    }

    let mut bytes = packet.encode()?;

    if let Some(offset) =
        find_attr_value_offset(&bytes, AttributeType::MessageAuthenticator as u8)
    {
        let mac = calculate_message_authenticator(&bytes, secret);
        bytes[offset..offset + 16].copy_from_slice(&mac);
        if let Some(attr) = packet.find_attribute_mut(AttributeType::MessageAuthenticator as u8) {
            attr.value.copy_from_slice(&mac);
        }
    }

    Ok(SignedRequest {
        authenticator: packet.authenticator,
        bytes,
    })
}

/// Verify a decoded response against the retained Request Authenticator.
///
/// Checks the Response Authenticator (RFC 2865 Section 3) and, when the
/// response carries one, the Message-Authenticator (RFC 2869). `raw` must be
/// the datagram `response` was decoded from.
pub fn verify_response(
    response: &Packet,
    raw: &[u8],
    request_authenticator: &[u8; 16],
    secret: &[u8],
) -> bool {
    verify_response_authenticator(response, request_authenticator, secret)
        && verify_response_message_authenticator(raw, request_authenticator, secret)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attributes::Attribute;
    use crate::auth::calculate_response_authenticator;
    use crate::packet::Code;

    fn request_with_message_auth() -> Packet {
        let mut packet = Packet::new(Code::AccessRequest, 5, [0u8; 16]);
        packet.add_attribute(Attribute::string(AttributeType::UserName as u8, "eve").unwrap());
        packet.add_attribute(
            Attribute::new(AttributeType::MessageAuthenticator as u8, vec![0u8; 16]).unwrap(),
        );
        packet
    }

    #[test]
    fn test_sign_draws_fresh_authenticator() {
        let mut packet = request_with_message_auth();
        let a = sign_request(&mut packet, b"s").unwrap();
        let b = sign_request(&mut packet, b"s").unwrap();
        assert_ne!(a.authenticator, b.authenticator);
        assert_eq!(a.bytes[1], 5);
    }

    #[test]
    fn test_sign_fills_message_authenticator() {
        let mut packet = request_with_message_auth();
        let signed = sign_request(&mut packet, b"s").unwrap();
        let offset =
            find_attr_value_offset(&signed.bytes, AttributeType::MessageAuthenticator as u8)
                .unwrap();
        assert_ne!(&signed.bytes[offset..offset + 16], &[0u8; 16]);

        // The decoded packet and the wire image agree.
        let reparsed = Packet::decode(&signed.bytes).unwrap();
        let attr = reparsed
            .find_attribute(AttributeType::MessageAuthenticator as u8)
            .unwrap();
        assert_eq!(attr.value, &signed.bytes[offset..offset + 16]);
    }

    #[test]
    fn test_sign_rejects_malformed_message_authenticator() {
        let mut packet = Packet::new(Code::AccessRequest, 1, [0u8; 16]);
        packet.add_attribute(
            Attribute::new(AttributeType::MessageAuthenticator as u8, vec![0u8; 4]).unwrap(),
        );
        assert!(sign_request(&mut packet, b"s").is_err());
    }

    #[test]
    fn test_verify_response_end_to_end() {
        let secret = b"abc";
        let mut request = Packet::new(Code::AccessRequest, 77, [0u8; 16]);
        request.add_attribute(Attribute::string(AttributeType::UserName as u8, "bob").unwrap());
        let signed = sign_request(&mut request, secret).unwrap();

        // Server side: build the reply and stamp the Response Authenticator.
        let mut reply = Packet::new(Code::AccessAccept, 77, [0u8; 16]);
        reply.authenticator =
            calculate_response_authenticator(&reply, &signed.authenticator, secret);
        let raw = reply.encode().unwrap();
        let decoded = Packet::decode(&raw).unwrap();

        assert!(verify_response(&decoded, &raw, &signed.authenticator, secret));
        assert!(!verify_response(&decoded, &raw, &signed.authenticator, b"oops"));
        assert!(!verify_response(&decoded, &raw, &[1u8; 16], secret));
    }
}
