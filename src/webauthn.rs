//! Caller-facing request and response records.
//!
//! The legacy records mirror the U2F web API, therefore `camelCase`
//! field names and base64url-without-padding strings.

use serde::{Deserialize, Serialize};

/// COSE algorithm identifiers accepted in credential parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Algorithm {
    Es256,
    Rs256,
}

impl Algorithm {
    pub fn cose_id(&self) -> i64 {
        match self {
            Algorithm::Es256 => -7,
            Algorithm::Rs256 => -257,
        }
    }
}

/// Relying party for a registration ceremony.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelyingParty {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl RelyingParty {
    pub fn new(id: impl Into<String>) -> Self {
        RelyingParty {
            id: id.into(),
            name: None,
        }
    }
}

/// User account a new credential is bound to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserEntity {
    pub id: Vec<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(rename = "displayName", skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
}

impl UserEntity {
    pub fn new(id: impl Into<Vec<u8>>) -> Self {
        UserEntity {
            id: id.into(),
            name: None,
            display_name: None,
        }
    }
}

/// Entry of an exclude or allow list. The id carries raw credential
/// bytes, unlike the legacy `RegisteredKey` whose handle is base64url.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialDescriptor {
    pub id: Vec<u8>,
}

impl CredentialDescriptor {
    pub fn new(id: impl Into<Vec<u8>>) -> Self {
        CredentialDescriptor { id: id.into() }
    }

    /// Descriptor type; only public-key credentials exist today.
    pub fn credential_type(&self) -> &'static str {
        "public-key"
    }
}

/// Legacy registration request entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    pub version: String,
    pub challenge: String,
}

/// Previously registered key passed to the legacy calls. `app_id`, when
/// set, overrides the ceremony app-id for this handle.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisteredKey {
    pub version: String,
    pub key_handle: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub app_id: Option<String>,
}

/// Result of a legacy registration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct U2fRegisterResult {
    pub registration_data: String,
    pub client_data: String,
}

/// Result of a legacy sign.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct U2fSignResult {
    pub client_data: String,
    pub signature_data: String,
    pub key_handle: String,
}
