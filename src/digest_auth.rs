//! HTTP digest authentication (RFC 7616, SHA-256) as spoken by Shelly Gen2 devices.

use crate::error::ShellyError;
use rand::Rng;
use sha2::{Digest, Sha256};

/// Shelly devices always authenticate the `admin` user.
pub const DIGEST_USERNAME: &str = "admin";

/// Parameters of a `WWW-Authenticate: Digest ...` challenge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DigestChallenge {
    pub realm: String,
    pub nonce: String,
    pub qop: Option<String>,
    pub opaque: Option<String>,
    pub algorithm: Option<String>,
}

impl DigestChallenge {
    pub fn parse(header: &str) -> Result<Self, ShellyError> {
        let header = header.trim();
        let params = match header.split_once(char::is_whitespace) {
            Some((scheme, rest)) if scheme.eq_ignore_ascii_case("digest") => rest,
            _ => {
                return Err(ShellyError::Digest(format!(
                    "not a digest challenge: {header}"
                )))
            }
        };

        let mut realm = None;
        let mut nonce = None;
        let mut qop = None;
        let mut opaque = None;
        let mut algorithm = None;
        for (key, value) in split_params(params) {
            match key.to_ascii_lowercase().as_str() {
                "realm" => realm = Some(value),
                "nonce" => nonce = Some(value),
                "qop" => qop = Some(value),
                "opaque" => opaque = Some(value),
                "algorithm" => algorithm = Some(value),
                _ => {}
            }
        }

        if let Some(algorithm) = &algorithm {
            if !algorithm.eq_ignore_ascii_case("SHA-256") {
                return Err(ShellyError::Digest(format!(
                    "unsupported algorithm {algorithm}"
                )));
            }
        }

        Ok(Self {
            realm: realm.ok_or_else(|| ShellyError::Digest("challenge without realm".into()))?,
            nonce: nonce.ok_or_else(|| ShellyError::Digest("challenge without nonce".into()))?,
            qop,
            opaque,
            algorithm,
        })
    }

    /// Builds the `Authorization` header value for one request with a fresh client nonce.
    pub fn authorization(&self, username: &str, password: &str, method: &str, uri: &str) -> String {
        let cnonce = format!("{:016x}", rand::thread_rng().gen::<u64>());
        self.authorization_with_cnonce(username, password, method, uri, &cnonce)
    }

    pub fn authorization_with_cnonce(
        &self,
        username: &str,
        password: &str,
        method: &str,
        uri: &str,
        cnonce: &str,
    ) -> String {
        const NONCE_COUNT: &str = "00000001";

        let ha1 = sha256_hex(&format!("{username}:{}:{password}", self.realm));
        let ha2 = sha256_hex(&format!("{method}:{uri}"));

        let mut header = format!(
            "Digest username=\"{username}\", realm=\"{}\", nonce=\"{}\", uri=\"{uri}\", algorithm=SHA-256",
            self.realm, self.nonce
        );

        if self.supports_auth_qop() {
            let response = sha256_hex(&format!(
                "{ha1}:{}:{NONCE_COUNT}:{cnonce}:auth:{ha2}",
                self.nonce
            ));
            header.push_str(&format!(
                ", response=\"{response}\", qop=auth, nc={NONCE_COUNT}, cnonce=\"{cnonce}\""
            ));
        } else {
            let response = sha256_hex(&format!("{ha1}:{}:{ha2}", self.nonce));
            header.push_str(&format!(", response=\"{response}\""));
        }

        if let Some(opaque) = &self.opaque {
            header.push_str(&format!(", opaque=\"{opaque}\""));
        }
        header
    }

    fn supports_auth_qop(&self) -> bool {
        self.qop
            .as_deref()
            .map(|qop| qop.split(',').any(|q| q.trim() == "auth"))
            .unwrap_or(false)
    }
}

pub(crate) fn sha256_hex(input: &str) -> String {
    format!("{:x}", Sha256::digest(input.as_bytes()))
}

/// Splits `key=value, key="quoted, value"` lists.
fn split_params(input: &str) -> Vec<(String, String)> {
    let mut params = Vec::new();
    let mut chars = input.chars().peekable();

    loop {
        while matches!(chars.peek(), Some(c) if c.is_whitespace() || *c == ',') {
            chars.next();
        }
        let mut key = String::new();
        while let Some(&c) = chars.peek() {
            if c == '=' || c == ',' {
                break;
            }
            key.push(c);
            chars.next();
        }
        if key.is_empty() && chars.peek().is_none() {
            break;
        }
        let mut value = String::new();
        if chars.peek() == Some(&'=') {
            chars.next();
            if chars.peek() == Some(&'"') {
                chars.next();
                while let Some(c) = chars.next() {
                    match c {
                        '\\' => {
                            if let Some(escaped) = chars.next() {
                                value.push(escaped);
                            }
                        }
                        '"' => break,
                        _ => value.push(c),
                    }
                }
            } else {
                while let Some(&c) = chars.peek() {
                    if c == ',' {
                        break;
                    }
                    value.push(c);
                    chars.next();
                }
            }
        }
        params.push((key.trim().to_string(), value.trim().to_string()));
    }
    params
}
