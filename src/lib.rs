//! Client-side orchestration for FIDO authenticator ceremonies.
//!
//! [`Fido2Client`] negotiates CTAP2 or CTAP1 with an attached
//! authenticator and exposes the two ceremonies, `make_credential` and
//! `get_assertion`, with CTAP2-shaped results on both paths.
//! [`U2fClient`] serves the legacy U2F web API over CTAP1.

pub mod attestation;
pub mod client;
pub mod client_data;
pub mod cose;
pub mod ctap1;
pub mod ctap2;
pub mod device;
pub mod error;
pub mod hid;
pub mod pin;
pub mod polling;
pub mod rpid;
pub mod u2f;
pub mod webauthn;

pub use attestation::{AssertionResponse, AttestationObject, AuthenticatorData};
pub use client::{Fido2Client, GetAssertionOptions, MakeCredentialOptions, Transport};
pub use client_data::ClientData;
pub use error::{ApduError, ClientError, CtapError, Error, Result};
pub use polling::Cancel;
pub use u2f::U2fClient;
pub use webauthn::{
    Algorithm, CredentialDescriptor, RegisterRequest, RegisteredKey, RelyingParty, UserEntity,
};
