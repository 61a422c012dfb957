//! RADIUS wire codec
//!
//! Encoding, decoding, and authentication primitives for the RADIUS
//! protocol (RFC 2865, RFC 2869) as needed by a RADIUS client:
//!
//! - Packet encoding and decoding with full shape validation
//! - Attribute construction and traversal
//! - Request/Response Authenticator generation and verification
//! - Message-Authenticator (HMAC-MD5) computation
//! - User-Password encryption (RFC 2865 Section 5.2)
//!
//! # Example
//!
//! ```rust
//! use radius_proto::{Packet, Code, Attribute, AttributeType};
//! use radius_proto::sign::sign_request;
//!
//! let mut packet = Packet::new(Code::AccessRequest, 0, [0u8; 16]);
//! packet.add_attribute(
//!     Attribute::string(AttributeType::UserName as u8, "alice").unwrap()
//! );
//!
//! // Signing draws a fresh Request Authenticator and yields the wire image.
//! let signed = sign_request(&mut packet, b"secret").unwrap();
//! assert_eq!(signed.bytes[1], 0); // identifier byte
//! ```

pub mod attributes;
pub mod auth;
pub mod message_auth;
pub mod packet;
pub mod sign;

pub use attributes::{Attribute, AttributeType};
pub use auth::{
    calculate_response_authenticator, decrypt_user_password, encrypt_user_password,
    generate_request_authenticator, verify_response_authenticator, USER_PASSWORD_MAX_LEN,
};
pub use message_auth::{calculate_message_authenticator, verify_response_message_authenticator};
pub use packet::{Code, Packet, PacketError};
pub use sign::{sign_request, verify_response, SignedRequest};
