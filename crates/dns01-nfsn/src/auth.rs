//! Request signing
//!
//! Every request carries `X-NFSN-Authentication: login;timestamp;salt;hash`
//! where `hash` is the SHA-1 hex digest of
//! `login;timestamp;salt;api_key;request_uri;sha1hex(body)`.

use sha1::{Digest, Sha1};

pub const AUTH_HEADER: &str = "X-NFSN-Authentication";

/// Build the authentication header value
pub fn sign(
    login: &str,
    api_key: &str,
    timestamp: i64,
    salt: &str,
    uri: &str,
    body_hash: &str,
) -> String {
    let check = format!(
        "{};{};{};{};{};{}",
        login, timestamp, salt, api_key, uri, body_hash
    );
    let hash = hex::encode(Sha1::digest(check.as_bytes()));
    format!("{};{};{};{}", login, timestamp, salt, hash)
}

#[cfg(test)]
mod tests {
    use super::*;

    const EMPTY_BODY_SHA1: &str = "da39a3ee5e6b4b0d3255bfef95601890afd80709";

    #[test]
    fn test_empty_body_hash() {
        assert_eq!(hex::encode(Sha1::digest(b"")), EMPTY_BODY_SHA1);
    }

    #[test]
    fn test_signature_format() {
        let header = sign(
            "testuser",
            "p3kxmycJH5kUiVM9",
            1012121212,
            "dkwo28Sile4jdXkw",
            "/site/example/getInfo",
            EMPTY_BODY_SHA1,
        );
        assert_eq!(
            header,
            "testuser;1012121212;dkwo28Sile4jdXkw;df07f7dd4ef25bc583edf9841a9f90c0a9e3ebde"
        );
    }

    #[test]
    fn test_signature_covers_body() {
        let body_hash = hex::encode(Sha1::digest(b"name=_acme-challenge&type=TXT"));
        assert_eq!(body_hash, "0f5544c666e4838c07df0296b79f70c0ad91c59d");

        let header = sign(
            "member",
            "secretkey",
            1700000000,
            "abcdefghijklmnop",
            "/dns/example.com/listRRs",
            &body_hash,
        );
        assert_eq!(
            header,
            "member;1700000000;abcdefghijklmnop;535307f7a2d7aa00e15954ffac014308f516bb0d"
        );
        // The key itself never appears in the header
        assert!(!header.contains("secretkey"));
    }
}
