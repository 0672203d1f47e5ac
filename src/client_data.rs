//! The canonical JSON blob hashed into every ceremony.

use std::sync::OnceLock;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::error::{ClientError, Error, Result};

/// Legacy (U2F web API) client data, `typ`-keyed.
#[derive(Serialize)]
struct LegacyFields<'a> {
    typ: &'static str,
    challenge: &'a str,
    origin: &'a str,
}

/// WebAuthn client data, `type`-keyed with a client-extensions map.
#[derive(Serialize)]
struct WebauthnFields<'a> {
    #[serde(rename = "type")]
    typ: &'static str,
    #[serde(rename = "clientExtensions")]
    client_extensions: serde_json::Map<String, serde_json::Value>,
    challenge: &'a str,
    origin: &'a str,
}

/// Immutable client-data blob. The exact serialised bytes are what the
/// authenticator signs over, so they are fixed at construction and the
/// SHA-256 is memoised on first use.
#[derive(Debug, Clone)]
pub struct ClientData {
    bytes: Vec<u8>,
    hash: OnceLock<[u8; 32]>,
}

impl ClientData {
    /// `typ = "navigator.id.finishEnrollment"`.
    pub fn for_legacy_register(challenge: &str, origin: &str) -> Self {
        Self::from_fields(&LegacyFields {
            typ: "navigator.id.finishEnrollment",
            challenge,
            origin,
        })
    }

    /// `typ = "navigator.id.getAssertion"`.
    pub fn for_legacy_sign(challenge: &str, origin: &str) -> Self {
        Self::from_fields(&LegacyFields {
            typ: "navigator.id.getAssertion",
            challenge,
            origin,
        })
    }

    /// `type = "webauthn.create"`.
    pub fn for_create(challenge: &str, origin: &str) -> Self {
        Self::from_fields(&WebauthnFields {
            typ: "webauthn.create",
            client_extensions: serde_json::Map::new(),
            challenge,
            origin,
        })
    }

    /// `type = "webauthn.get"`.
    pub fn for_get(challenge: &str, origin: &str) -> Self {
        Self::from_fields(&WebauthnFields {
            typ: "webauthn.get",
            client_extensions: serde_json::Map::new(),
            challenge,
            origin,
        })
    }

    fn from_fields<T: Serialize>(fields: &T) -> Self {
        // serde_json cannot fail on these in-memory records
        let bytes = serde_json::to_vec(fields).expect("client data serialization");
        ClientData {
            bytes,
            hash: OnceLock::new(),
        }
    }

    /// Re-reads a serialised blob, e.g. one round-tripped through a
    /// caller. The JSON must carry an `origin` member.
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self> {
        let value: serde_json::Value = serde_json::from_slice(&bytes)
            .map_err(|e| Error::Client(ClientError::BadRequest(format!("invalid client data: {}", e))))?;
        if value.get("origin").and_then(|v| v.as_str()).is_none() {
            return Err(ClientError::BadRequest("client data has no origin".into()).into());
        }
        Ok(ClientData {
            bytes,
            hash: OnceLock::new(),
        })
    }

    pub fn from_base64(encoded: &str) -> Result<Self> {
        let bytes = URL_SAFE_NO_PAD
            .decode(encoded)
            .map_err(|e| Error::Client(ClientError::BadRequest(format!("invalid base64url: {}", e))))?;
        Self::from_bytes(bytes)
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// SHA-256 of the serialised bytes, computed once.
    pub fn hash(&self) -> [u8; 32] {
        *self.hash.get_or_init(|| {
            let mut hasher = Sha256::new();
            hasher.update(&self.bytes);
            hasher.finalize().into()
        })
    }

    pub fn base64(&self) -> String {
        URL_SAFE_NO_PAD.encode(&self.bytes)
    }

    pub fn origin(&self) -> Option<String> {
        let value: serde_json::Value = serde_json::from_slice(&self.bytes).ok()?;
        value.get("origin")?.as_str().map(str::to_owned)
    }
}

/// Websafe base64 of an arbitrary payload.
pub fn websafe_encode(data: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(data)
}

pub fn websafe_decode(data: &str) -> Result<Vec<u8>> {
    URL_SAFE_NO_PAD
        .decode(data)
        .map_err(|e| Error::Client(ClientError::BadRequest(format!("invalid base64url: {}", e))))
}
