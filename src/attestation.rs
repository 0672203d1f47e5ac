//! Attestation objects and authenticator-data byte layouts.
//!
//! `AuthenticatorData` serialises as a concatenation of fixed-size
//! fields: rpIdHash(32) || flags(1) || signCount(4 BE), optionally
//! followed by attested credential data and extensions. Never an
//! object-serialisation default.

use std::io::Cursor;

use anyhow::anyhow;
use ciborium::value::Value as CborValue;

use crate::cose::CoseKey;
use crate::error::{Error, Result};
use crate::webauthn::{CredentialDescriptor, UserEntity};

/// Flag bits of the authenticator-data flags byte.
pub const FLAG_UP: u8 = 0x01;
pub const FLAG_UV: u8 = 0x04;
pub const FLAG_AT: u8 = 0x40;
pub const FLAG_ED: u8 = 0x80;

/// aaguid(16) || credIdLen(2 BE) || credId || COSE public key.
#[derive(Debug, Clone, PartialEq)]
pub struct AttestedCredentialData {
    pub aaguid: [u8; 16],
    pub credential_id: Vec<u8>,
    pub public_key: CoseKey,
}

impl AttestedCredentialData {
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(16 + 2 + self.credential_id.len() + 80);
        out.extend_from_slice(&self.aaguid);
        out.extend_from_slice(&(self.credential_id.len() as u16).to_be_bytes());
        out.extend_from_slice(&self.credential_id);
        let mut key_bytes = Vec::new();
        ciborium::into_writer(&self.public_key.to_cbor(), &mut key_bytes)
            .expect("COSE key serialization");
        out.extend_from_slice(&key_bytes);
        out
    }

    /// Parses from a cursor positioned at the aaguid; leaves the cursor
    /// just past the COSE key.
    fn parse(cursor: &mut Cursor<&[u8]>) -> Result<Self> {
        let data = *cursor.get_ref();
        let pos = cursor.position() as usize;
        if data.len() < pos + 18 {
            return Err(Error::Transport(anyhow!("attested credential data truncated")));
        }
        let mut aaguid = [0u8; 16];
        aaguid.copy_from_slice(&data[pos..pos + 16]);
        let id_len = u16::from_be_bytes([data[pos + 16], data[pos + 17]]) as usize;
        let id_end = pos + 18 + id_len;
        if data.len() < id_end {
            return Err(Error::Transport(anyhow!("credential id truncated")));
        }
        let credential_id = data[pos + 18..id_end].to_vec();

        cursor.set_position(id_end as u64);
        let key_value: CborValue = ciborium::from_reader(&mut *cursor)
            .map_err(|e| Error::Transport(anyhow!("bad COSE key: {}", e)))?;
        let public_key = CoseKey::from_cbor(&key_value)?;

        Ok(AttestedCredentialData {
            aaguid,
            credential_id,
            public_key,
        })
    }
}

/// Parsed view of an authenticator-data blob.
#[derive(Debug, Clone, PartialEq)]
pub struct AuthenticatorData {
    pub rp_id_hash: [u8; 32],
    pub flags: u8,
    pub sign_count: u32,
    pub attested_credential: Option<AttestedCredentialData>,
}

impl AuthenticatorData {
    pub fn new(
        rp_id_hash: [u8; 32],
        flags: u8,
        sign_count: u32,
        attested_credential: Option<AttestedCredentialData>,
    ) -> Self {
        AuthenticatorData {
            rp_id_hash,
            flags,
            sign_count,
            attested_credential,
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(37);
        out.extend_from_slice(&self.rp_id_hash);
        out.push(self.flags);
        out.extend_from_slice(&self.sign_count.to_be_bytes());
        if let Some(attested) = &self.attested_credential {
            out.extend_from_slice(&attested.to_bytes());
        }
        out
    }

    pub fn parse(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < 37 {
            return Err(Error::Transport(anyhow!(
                "authenticator data too short: {} bytes",
                bytes.len()
            )));
        }
        let mut rp_id_hash = [0u8; 32];
        rp_id_hash.copy_from_slice(&bytes[..32]);
        let flags = bytes[32];
        let sign_count = u32::from_be_bytes([bytes[33], bytes[34], bytes[35], bytes[36]]);

        let attested_credential = if flags & FLAG_AT != 0 {
            let mut cursor = Cursor::new(bytes);
            cursor.set_position(37);
            Some(AttestedCredentialData::parse(&mut cursor)?)
        } else {
            None
        };

        Ok(AuthenticatorData {
            rp_id_hash,
            flags,
            sign_count,
            attested_credential,
        })
    }

    pub fn is_user_present(&self) -> bool {
        self.flags & FLAG_UP != 0
    }
}

/// CTAP2-shaped attestation object. `auth_data` holds the raw bytes as
/// produced by the device (or by the synthesiser), so the CTAP2 path
/// returns them verbatim.
#[derive(Debug, Clone)]
pub struct AttestationObject {
    pub fmt: String,
    pub auth_data: Vec<u8>,
    pub att_stmt: CborValue,
}

impl AttestationObject {
    pub fn authenticator_data(&self) -> Result<AuthenticatorData> {
        AuthenticatorData::parse(&self.auth_data)
    }

    /// WebAuthn attestation-object encoding, text keys in canonical
    /// CTAP2 order ("fmt", "attStmt", "authData").
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let value = CborValue::Map(vec![
            (
                CborValue::Text("fmt".into()),
                CborValue::Text(self.fmt.clone()),
            ),
            (CborValue::Text("attStmt".into()), self.att_stmt.clone()),
            (
                CborValue::Text("authData".into()),
                CborValue::Bytes(self.auth_data.clone()),
            ),
        ]);
        let mut out = Vec::new();
        ciborium::into_writer(&value, &mut out)
            .map_err(|e| Error::Transport(anyhow!("attestation encoding failed: {}", e)))?;
        Ok(out)
    }
}

/// One assertion as returned to the caller, CTAP2-shaped on both paths.
#[derive(Debug, Clone)]
pub struct AssertionResponse {
    pub credential: Option<CredentialDescriptor>,
    pub auth_data: Vec<u8>,
    pub signature: Vec<u8>,
    pub user: Option<UserEntity>,
    pub number_of_credentials: Option<u64>,
}

impl AssertionResponse {
    pub fn authenticator_data(&self) -> Result<AuthenticatorData> {
        AuthenticatorData::parse(&self.auth_data)
    }
}
