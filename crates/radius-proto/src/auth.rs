use crate::packet::Packet;
use rand::Rng;

/// Maximum User-Password length per RFC 2865 Section 5.2. Shared secrets are
/// bounded by `USER_PASSWORD_MAX_LEN - 1` so the first encryption block can
/// always absorb them.
pub const USER_PASSWORD_MAX_LEN: usize = 128;

/// Generate a random Request Authenticator (16 bytes) per RFC 2865 Section 3
pub fn generate_request_authenticator() -> [u8; 16] {
    let mut rng = rand::rng();
    let mut authenticator = [0u8; 16];
    rng.fill(&mut authenticator);
    authenticator
}

/// Calculate Response Authenticator per RFC 2865 Section 3
///
/// Response Authenticator = MD5(Code + ID + Length + Request Authenticator + Attributes + Secret)
pub fn calculate_response_authenticator(
    packet: &Packet,
    request_authenticator: &[u8; 16],
    secret: &[u8],
) -> [u8; 16] {
    let mut data = Vec::with_capacity(packet.length() + secret.len());

    data.push(packet.code.as_u8());
    data.push(packet.identifier);

    let length = packet.length();
    data.push((length >> 8) as u8);
    data.push((length & 0xff) as u8);

    data.extend_from_slice(request_authenticator);

    for attr in &packet.attributes {
        // Attributes that decoded from the wire always re-encode.
        let encoded = attr.encode().expect("decoded attribute re-encodes");
        data.extend_from_slice(&encoded);
    }

    data.extend_from_slice(secret);

    let digest = md5::compute(&data);
    let mut authenticator = [0u8; 16];
    authenticator.copy_from_slice(&digest.0);
    authenticator
}

/// Verify a Response Authenticator against the stored Request Authenticator
/// and shared secret.
pub fn verify_response_authenticator(
    response: &Packet,
    request_authenticator: &[u8; 16],
    secret: &[u8],
) -> bool {
    let calculated = calculate_response_authenticator(response, request_authenticator, secret);
    response.authenticator == calculated
}

/// Encrypt User-Password attribute per RFC 2865 Section 5.2
///
/// The password is padded to a multiple of 16 bytes, then each block is
/// XORed with MD5(secret + previous_block), seeded with the Request
/// Authenticator.
pub fn encrypt_user_password(password: &str, secret: &[u8], authenticator: &[u8; 16]) -> Vec<u8> {
    let password_bytes = password.as_bytes();

    let mut padded = password_bytes.to_vec();
    let padding_needed = (16 - (padded.len() % 16)) % 16;
    padded.resize(padded.len() + padding_needed, 0);
    if padded.is_empty() {
        padded.resize(16, 0);
    }

    let mut result = Vec::with_capacity(padded.len());
    let mut previous_block = authenticator.to_vec();

    for chunk in padded.chunks(16) {
        let mut data = Vec::with_capacity(secret.len() + 16);
        data.extend_from_slice(secret);
        data.extend_from_slice(&previous_block);
        let hash = md5::compute(&data);

        let mut encrypted_block = [0u8; 16];
        for i in 0..16 {
            encrypted_block[i] = chunk[i] ^ hash.0[i];
        }

        previous_block = encrypted_block.to_vec();
        result.extend_from_slice(&encrypted_block);
    }

    result
}

/// Decrypt User-Password attribute per RFC 2865 Section 5.2
pub fn decrypt_user_password(
    encrypted: &[u8],
    secret: &[u8],
    authenticator: &[u8; 16],
) -> Result<String, String> {
    if encrypted.len() % 16 != 0 || encrypted.is_empty() {
        return Err("Invalid encrypted password length".to_string());
    }

    let mut result = Vec::with_capacity(encrypted.len());
    let mut previous_block = authenticator.to_vec();

    for chunk in encrypted.chunks(16) {
        let mut data = Vec::with_capacity(secret.len() + 16);
        data.extend_from_slice(secret);
        data.extend_from_slice(&previous_block);
        let hash = md5::compute(&data);

        let mut decrypted_block = [0u8; 16];
        for i in 0..16 {
            decrypted_block[i] = chunk[i] ^ hash.0[i];
        }

        previous_block = chunk.to_vec();
        result.extend_from_slice(&decrypted_block);
    }

    // Strip the null padding.
    while result.last() == Some(&0) {
        result.pop();
    }

    String::from_utf8(result).map_err(|e| format!("Invalid UTF-8 in password: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::Code;

    #[test]
    fn test_generate_authenticator() {
        let auth1 = generate_request_authenticator();
        let auth2 = generate_request_authenticator();
        // Should be random
        assert_ne!(auth1, auth2);
    }

    #[test]
    fn test_password_encryption_decryption() {
        let password = "mysecretpassword";
        let secret = b"sharedsecret";
        let authenticator = [1u8; 16];

        let encrypted = encrypt_user_password(password, secret, &authenticator);
        let decrypted = decrypt_user_password(&encrypted, secret, &authenticator).unwrap();

        assert_eq!(password, decrypted);
    }

    #[test]
    fn test_password_encryption_empty() {
        let encrypted = encrypt_user_password("", b"sharedsecret", &[1u8; 16]);
        assert_eq!(encrypted.len(), 16); // Padded to one full block
    }

    #[test]
    fn test_response_authenticator() {
        let secret = b"sharedsecret";
        let request_auth = [1u8; 16];
        let mut packet = Packet::new(Code::AccessAccept, 42, [0u8; 16]);

        let response_auth = calculate_response_authenticator(&packet, &request_auth, secret);
        packet.authenticator = response_auth;

        assert!(verify_response_authenticator(&packet, &request_auth, secret));
        assert!(!verify_response_authenticator(&packet, &[2u8; 16], secret));
        assert!(!verify_response_authenticator(&packet, &request_auth, b"wrong"));
    }
}
