//! Message-Authenticator Support (RFC 2869)
//!
//! The Message-Authenticator attribute provides integrity protection using
//! HMAC-MD5 computed over the entire RADIUS packet with the attribute's own
//! value set to all zeros during calculation.
//!
//! For responses the HMAC is computed with the *Request* Authenticator in
//! the Authenticator field (RFC 2869 Section 5.14), so verification needs
//! the authenticator retained from the original request.

use crate::attributes::AttributeType;
use crate::packet::find_attr_value_offset;
use hmac::{Hmac, Mac};
use md5_digest::Md5;

type HmacMd5 = Hmac<Md5>;

/// Calculate Message-Authenticator over a complete encoded packet.
///
/// The caller must have zeroed the Message-Authenticator value bytes first.
pub fn calculate_message_authenticator(packet_bytes: &[u8], secret: &[u8]) -> [u8; 16] {
    let mut mac = HmacMd5::new_from_slice(secret).expect("HMAC can take key of any size");
    mac.update(packet_bytes);
    let result = mac.finalize();

    let mut output = [0u8; 16];
    output.copy_from_slice(&result.into_bytes());
    output
}

/// Verify the Message-Authenticator of an encoded response.
///
/// Returns `true` when the response carries no Message-Authenticator at all
/// (nothing to check), or when the HMAC computed with the Request
/// Authenticator substituted into the header matches.
pub fn verify_response_message_authenticator(
    response_bytes: &[u8],
    request_authenticator: &[u8; 16],
    secret: &[u8],
) -> bool {
    let Some(offset) = find_attr_value_offset(
        response_bytes,
        AttributeType::MessageAuthenticator as u8,
    ) else {
        return true;
    };
    if offset + 16 > response_bytes.len() {
        return false;
    }

    let received: [u8; 16] = match response_bytes[offset..offset + 16].try_into() {
        Ok(v) => v,
        Err(_) => return false,
    };

    let mut copy = response_bytes.to_vec();
    copy[4..20].copy_from_slice(request_authenticator);
    copy[offset..offset + 16].fill(0);

    calculate_message_authenticator(&copy, secret) == received
}
