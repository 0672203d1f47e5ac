//! The FIDO2 orchestrator.
//!
//! Binds to one authenticator and presents a CTAP2-shaped surface
//! regardless of which protocol the device speaks. CTAP2 requests are
//! passed through (with the PIN policy applied); on a CTAP1-only
//! device the ceremony is down-converted and the attestation object is
//! synthesised from the legacy registration response.

use std::time::Duration;

use ciborium::value::Value as CborValue;
use sha2::{Digest, Sha256};

use crate::attestation::{
    AssertionResponse, AttestationObject, AttestedCredentialData, AuthenticatorData, FLAG_AT,
    FLAG_UP,
};
use crate::client_data::ClientData;
use crate::cose::{CoseKey, ALG_ES256};
use crate::ctap1::{Ctap1Hid, Ctap1Transport};
use crate::ctap2::{
    AuthenticatorInfo, Ctap2Hid, Ctap2Options, Ctap2Transport, GetAssertionRequest,
    MakeCredentialRequest,
};
use crate::error::{ClientError, CtapError, Error, Result};
use crate::hid::CtapHidChannel;
use crate::pin;
use crate::polling::{call_polling, Cancel, DEFAULT_POLL_DELAY};
use crate::rpid::{self, OriginVerifier};
use crate::webauthn::{Algorithm, CredentialDescriptor, RelyingParty, UserEntity};

fn app_param(identifier: &str) -> [u8; 32] {
    Sha256::digest(identifier.as_bytes()).into()
}

/// The protocol negotiated at construction time.
pub enum Transport<C1, C2> {
    Ctap1(C1),
    Ctap2(C2),
}

/// Options for `make_credential` beyond the required arguments.
#[derive(Debug, Clone)]
pub struct MakeCredentialOptions {
    /// Preference-ordered credential algorithms.
    pub algorithms: Vec<Algorithm>,
    pub exclude_list: Vec<CredentialDescriptor>,
    pub extensions: Option<CborValue>,
    pub rk: bool,
    pub uv: bool,
    pub pin: Option<String>,
    pub timeout: Option<Duration>,
}

impl Default for MakeCredentialOptions {
    fn default() -> Self {
        MakeCredentialOptions {
            algorithms: vec![Algorithm::Es256],
            exclude_list: Vec::new(),
            extensions: None,
            rk: false,
            uv: false,
            pin: None,
            timeout: None,
        }
    }
}

/// Options for `get_assertion` beyond the required arguments.
#[derive(Debug, Clone, Default)]
pub struct GetAssertionOptions {
    pub allow_list: Vec<CredentialDescriptor>,
    pub extensions: Option<CborValue>,
    pub rk: bool,
    pub uv: bool,
    pub pin: Option<String>,
    pub timeout: Option<Duration>,
}

pub struct Fido2Client<C1, C2> {
    transport: Transport<C1, C2>,
    origin: String,
    verify: OriginVerifier,
    ctap1_poll_delay: Duration,
    cancel: Option<Cancel>,
}

impl Fido2Client<Ctap1Hid, Ctap2Hid> {
    /// Binds to a HID authenticator: CTAP2 when the device advertises
    /// the CBOR capability, CTAP1 otherwise.
    pub fn open(device: hidapi::HidDevice, origin: impl Into<String>) -> Result<Self> {
        let channel = CtapHidChannel::open(device)?;
        let transport = match Ctap2Hid::new(channel) {
            Ok(ctap2) => Transport::Ctap2(ctap2),
            Err(channel) => {
                log::debug!("device does not speak CTAP2, binding CTAP1");
                Transport::Ctap1(Ctap1Hid::new(channel))
            }
        };
        Ok(Self::from_transport(transport, origin))
    }
}

impl<C1: Ctap1Transport, C2: Ctap2Transport> Fido2Client<C1, C2> {
    pub fn from_transport(transport: Transport<C1, C2>, origin: impl Into<String>) -> Self {
        Self::with_verifier(transport, origin, rpid::verify_rp_id)
    }

    pub fn with_verifier(
        transport: Transport<C1, C2>,
        origin: impl Into<String>,
        verify: OriginVerifier,
    ) -> Self {
        Fido2Client {
            transport,
            origin: origin.into(),
            verify,
            ctap1_poll_delay: DEFAULT_POLL_DELAY,
            cancel: None,
        }
    }

    /// Flag checked between user-presence polls; cancelling surfaces
    /// `TIMEOUT` at the next wake.
    pub fn cancel_handle(&mut self) -> Cancel {
        let cancel = Cancel::new();
        self.cancel = Some(cancel.clone());
        cancel
    }

    fn verify_rp_id(&self, rp_id: &str) -> Result<()> {
        match (self.verify)(rp_id, &self.origin) {
            Ok(true) => Ok(()),
            _ => Err(ClientError::BadRequest(format!(
                "origin {} may not use rp id {}",
                self.origin, rp_id
            ))
            .into()),
        }
    }

    /// Creates a credential and returns the attestation object along
    /// with the client data it covers.
    pub fn make_credential(
        &mut self,
        rp: &RelyingParty,
        user: &UserEntity,
        challenge: &str,
        options: MakeCredentialOptions,
    ) -> Result<(AttestationObject, ClientData)> {
        self.verify_rp_id(&rp.id)?;
        let client_data = ClientData::for_create(challenge, &self.origin);

        let attestation = match &mut self.transport {
            Transport::Ctap2(ctap) => {
                ctap2_make_credential(ctap, &client_data, rp, user, &options)?
            }
            Transport::Ctap1(ctap) => ctap1_make_credential(
                ctap,
                &client_data,
                rp,
                &options,
                self.ctap1_poll_delay,
                self.cancel.as_ref(),
            )?,
        };
        Ok((attestation, client_data))
    }

    /// Requests assertions for a relying party. The returned list is
    /// in device order; CTAP1 devices always produce exactly one.
    pub fn get_assertion(
        &mut self,
        rp_id: &str,
        challenge: &str,
        options: GetAssertionOptions,
    ) -> Result<(Vec<AssertionResponse>, ClientData)> {
        self.verify_rp_id(rp_id)?;
        let client_data = ClientData::for_get(challenge, &self.origin);

        let assertions = match &mut self.transport {
            Transport::Ctap2(ctap) => ctap2_get_assertion(ctap, &client_data, rp_id, &options)?,
            Transport::Ctap1(ctap) => ctap1_get_assertion(
                ctap,
                &client_data,
                rp_id,
                &options,
                self.ctap1_poll_delay,
                self.cancel.as_ref(),
            )?,
        };
        Ok((assertions, client_data))
    }
}

/// PIN/UV policy shared by both CTAP2 ceremonies: derive a pinAuth when
/// a PIN was supplied, refuse when the device demands one and none was.
fn pin_parameters<C2: Ctap2Transport>(
    ctap: &mut C2,
    info: &AuthenticatorInfo,
    client_data: &ClientData,
    pin: Option<&str>,
) -> Result<(Option<Vec<u8>>, Option<u8>)> {
    match pin {
        Some(pin) if !pin.is_empty() => {
            if !info
                .pin_protocols
                .contains(&u32::from(pin::PIN_PROTOCOL_VERSION))
            {
                return Err(ClientError::ConfigurationUnsupported(
                    "device does not support PIN protocol 1".into(),
                )
                .into());
            }
            let token = pin::get_pin_token(ctap, pin)?;
            let auth = pin::pin_auth(token.as_bytes(), &client_data.hash());
            Ok((Some(auth.to_vec()), Some(pin::PIN_PROTOCOL_VERSION)))
        }
        _ => {
            if info.options.client_pin == Some(true) {
                return Err(ClientError::ConfigurationUnsupported(
                    "PIN required but not supplied".into(),
                )
                .into());
            }
            Ok((None, None))
        }
    }
}

fn request_options(rk: bool, uv: bool) -> Option<Ctap2Options> {
    if rk || uv {
        Some(Ctap2Options { rk, uv })
    } else {
        None
    }
}

fn ctap2_make_credential<C2: Ctap2Transport>(
    ctap: &mut C2,
    client_data: &ClientData,
    rp: &RelyingParty,
    user: &UserEntity,
    options: &MakeCredentialOptions,
) -> Result<AttestationObject> {
    let info = ctap.get_info()?;
    let (pin_auth, pin_protocol) =
        pin_parameters(ctap, &info, client_data, options.pin.as_deref())?;

    let request = MakeCredentialRequest {
        client_data_hash: client_data.hash(),
        rp: rp.clone(),
        user: user.clone(),
        algorithms: options.algorithms.iter().map(Algorithm::cose_id).collect(),
        exclude_list: options.exclude_list.clone(),
        extensions: options.extensions.clone(),
        options: request_options(options.rk, options.uv),
        pin_auth,
        pin_protocol,
    };
    ctap.make_credential(&request)
}

fn ctap2_get_assertion<C2: Ctap2Transport>(
    ctap: &mut C2,
    client_data: &ClientData,
    rp_id: &str,
    options: &GetAssertionOptions,
) -> Result<Vec<AssertionResponse>> {
    let info = ctap.get_info()?;
    let (pin_auth, pin_protocol) =
        pin_parameters(ctap, &info, client_data, options.pin.as_deref())?;

    let request = GetAssertionRequest {
        rp_id: rp_id.to_string(),
        client_data_hash: client_data.hash(),
        allow_list: options.allow_list.clone(),
        extensions: options.extensions.clone(),
        options: request_options(options.rk, options.uv),
        pin_auth,
        pin_protocol,
    };

    let first = ctap.get_assertion(&request)?;
    let count = first.number_of_credentials.unwrap_or(1);
    let mut assertions = vec![first];
    for _ in 1..count {
        assertions.push(ctap.get_next_assertion()?);
    }
    Ok(assertions)
}

fn ctap1_make_credential<C1: Ctap1Transport>(
    ctap: &mut C1,
    client_data: &ClientData,
    rp: &RelyingParty,
    options: &MakeCredentialOptions,
    poll_delay: Duration,
    cancel: Option<&Cancel>,
) -> Result<AttestationObject> {
    if options.rk || options.uv {
        return Err(CtapError::UnsupportedOption.into());
    }

    let param = app_param(&rp.id);
    let dummy = [0u8; 32];
    for cred in &options.exclude_list {
        // check-only probe; a touch is never requested here
        match ctap.authenticate(&dummy, &param, &cred.id, true) {
            Ok(_) => return Err(CtapError::CredentialExcluded.into()),
            Err(Error::Apdu(e)) if e.is_use_not_satisfied() => {
                return Err(CtapError::CredentialExcluded.into())
            }
            Err(_) => {}
        }
    }

    let challenge_hash = client_data.hash();
    let registration = call_polling(options.timeout, poll_delay, cancel, || {
        ctap.register(&challenge_hash, &param)
    })?;

    let public_key = CoseKey::from_uncompressed_point(ALG_ES256, &registration.public_key)?;
    let auth_data = AuthenticatorData::new(
        param,
        FLAG_UP | FLAG_AT,
        0,
        Some(AttestedCredentialData {
            aaguid: [0u8; 16],
            credential_id: registration.key_handle.clone(),
            public_key,
        }),
    );

    Ok(AttestationObject {
        fmt: "fido-u2f".to_string(),
        auth_data: auth_data.to_bytes(),
        att_stmt: CborValue::Map(vec![
            (
                CborValue::Text("sig".to_string()),
                CborValue::Bytes(registration.signature.clone()),
            ),
            (
                CborValue::Text("x5c".to_string()),
                CborValue::Array(vec![CborValue::Bytes(registration.certificate.clone())]),
            ),
        ]),
    })
}

fn ctap1_get_assertion<C1: Ctap1Transport>(
    ctap: &mut C1,
    client_data: &ClientData,
    rp_id: &str,
    options: &GetAssertionOptions,
    poll_delay: Duration,
    cancel: Option<&Cancel>,
) -> Result<Vec<AssertionResponse>> {
    // CTAP1 cannot discover credentials, so an allow list is mandatory
    if options.rk || options.uv || options.allow_list.is_empty() {
        return Err(CtapError::UnsupportedOption.into());
    }

    let param = app_param(rp_id);
    let challenge_hash = client_data.hash();
    for cred in &options.allow_list {
        let result = call_polling(options.timeout, poll_delay, cancel, || {
            ctap.authenticate(&challenge_hash, &param, &cred.id, false)
        });
        match result {
            Ok(response) => {
                // carry the device's low bit as the whole flags byte
                let flags = response.user_presence & FLAG_UP;
                let auth_data = AuthenticatorData::new(param, flags, response.counter, None);
                return Ok(vec![AssertionResponse {
                    credential: Some(cred.clone()),
                    auth_data: auth_data.to_bytes(),
                    signature: response.signature.clone(),
                    user: None,
                    number_of_credentials: None,
                }]);
            }
            Err(Error::Apdu(_)) => {}
            Err(e) => return Err(e),
        }
    }
    Err(CtapError::NoCredentials.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ctap1::{RegisterResponse, SignResponse};
    use crate::ctap2::{ClientPinRequest, ClientPinResponse};
    use crate::error::{ApduError, SW_CONDITIONS_NOT_SATISFIED, SW_WRONG_DATA};
    use std::collections::VecDeque;

    fn allow_all(_: &str, _: &str) -> anyhow::Result<bool> {
        Ok(true)
    }

    fn use_not_satisfied() -> Error {
        ApduError::new(SW_CONDITIONS_NOT_SATISFIED).into()
    }

    // ---- CTAP1 side ----

    struct MockCtap1 {
        register_responses: VecDeque<Result<RegisterResponse>>,
        auth_responses: VecDeque<Result<SignResponse>>,
        register_calls: usize,
        auth_calls: Vec<(Vec<u8>, bool)>,
        last_challenge: Option<[u8; 32]>,
    }

    impl MockCtap1 {
        fn new() -> Self {
            MockCtap1 {
                register_responses: VecDeque::new(),
                auth_responses: VecDeque::new(),
                register_calls: 0,
                auth_calls: Vec::new(),
                last_challenge: None,
            }
        }
    }

    impl Ctap1Transport for MockCtap1 {
        fn get_version(&mut self) -> Result<String> {
            Ok("U2F_V2".to_string())
        }

        fn register(&mut self, challenge: &[u8; 32], _: &[u8; 32]) -> Result<RegisterResponse> {
            self.register_calls += 1;
            self.last_challenge = Some(*challenge);
            self.register_responses
                .pop_front()
                .unwrap_or_else(|| Err(use_not_satisfied()))
        }

        fn authenticate(
            &mut self,
            challenge: &[u8; 32],
            _: &[u8; 32],
            key_handle: &[u8],
            check_only: bool,
        ) -> Result<SignResponse> {
            self.last_challenge = Some(*challenge);
            self.auth_calls.push((key_handle.to_vec(), check_only));
            self.auth_responses
                .pop_front()
                .unwrap_or_else(|| Err(ApduError::new(SW_WRONG_DATA).into()))
        }
    }

    struct NoCtap2;

    impl Ctap2Transport for NoCtap2 {
        fn get_info(&mut self) -> Result<AuthenticatorInfo> {
            unimplemented!()
        }
        fn make_credential(&mut self, _: &MakeCredentialRequest) -> Result<AttestationObject> {
            unimplemented!()
        }
        fn get_assertion(&mut self, _: &GetAssertionRequest) -> Result<AssertionResponse> {
            unimplemented!()
        }
        fn get_next_assertion(&mut self) -> Result<AssertionResponse> {
            unimplemented!()
        }
        fn client_pin(&mut self, _: &ClientPinRequest) -> Result<ClientPinResponse> {
            unimplemented!()
        }
    }

    fn registration_blob(key_handle: &[u8], cert: &[u8], sig: &[u8]) -> Vec<u8> {
        let mut blob = vec![0x05, 0x04];
        blob.extend_from_slice(&[0xAA; 32]);
        blob.extend_from_slice(&[0xBB; 32]);
        blob.push(key_handle.len() as u8);
        blob.extend_from_slice(key_handle);
        blob.extend_from_slice(cert);
        blob.extend_from_slice(sig);
        blob
    }

    fn ctap1_client(ctap: MockCtap1) -> Fido2Client<MockCtap1, NoCtap2> {
        let mut client = Fido2Client::with_verifier(
            Transport::Ctap1(ctap),
            "https://example.com",
            allow_all,
        );
        client.ctap1_poll_delay = Duration::from_millis(1);
        client
    }

    #[test]
    fn test_ctap1_make_credential_synthesises_attestation() {
        let key_handle = [0x11u8; 24];
        let cert = vec![0x30, 0x03, 0x02, 0x01, 0x02];
        let sig = vec![0xDD; 7];
        let mut ctap = MockCtap1::new();
        ctap.register_responses
            .push_back(RegisterResponse::from_bytes(registration_blob(
                &key_handle,
                &cert,
                &sig,
            )));
        let mut client = ctap1_client(ctap);

        let (attestation, client_data) = client
            .make_credential(
                &RelyingParty::new("example.com"),
                &UserEntity::new(vec![1]),
                "abc",
                MakeCredentialOptions::default(),
            )
            .unwrap();

        assert_eq!(attestation.fmt, "fido-u2f");
        let auth_data = attestation.authenticator_data().unwrap();
        assert_eq!(auth_data.rp_id_hash, app_param("example.com"));
        assert_eq!(auth_data.flags, 0x41);
        assert_eq!(auth_data.sign_count, 0);
        let attested = auth_data.attested_credential.unwrap();
        assert_eq!(attested.aaguid, [0u8; 16]);
        assert_eq!(attested.credential_id, key_handle);
        assert_eq!(attested.public_key.alg, -7);
        assert_eq!(attested.public_key.x, [0xAA; 32]);
        assert_eq!(attested.public_key.y, [0xBB; 32]);

        match &attestation.att_stmt {
            CborValue::Map(entries) => {
                let sig_entry = entries
                    .iter()
                    .find(|(k, _)| matches!(k, CborValue::Text(s) if s == "sig"))
                    .unwrap();
                assert_eq!(sig_entry.1, CborValue::Bytes(sig.clone()));
                let x5c_entry = entries
                    .iter()
                    .find(|(k, _)| matches!(k, CborValue::Text(s) if s == "x5c"))
                    .unwrap();
                assert_eq!(
                    x5c_entry.1,
                    CborValue::Array(vec![CborValue::Bytes(cert.clone())])
                );
            }
            _ => panic!("attStmt is not a map"),
        }

        // the challenge parameter sent to the device was the hash of
        // the returned client data
        assert_eq!(client.transport_challenge(), client_data.hash());
    }

    impl Fido2Client<MockCtap1, NoCtap2> {
        fn transport_challenge(&self) -> [u8; 32] {
            match &self.transport {
                Transport::Ctap1(ctap) => ctap.last_challenge.unwrap(),
                _ => unreachable!(),
            }
        }
    }

    #[test]
    fn test_ctap1_make_credential_rejects_rk_and_uv() {
        for (rk, uv) in [(true, false), (false, true)] {
            let mut client = ctap1_client(MockCtap1::new());
            let err = client
                .make_credential(
                    &RelyingParty::new("example.com"),
                    &UserEntity::new(vec![1]),
                    "abc",
                    MakeCredentialOptions {
                        rk,
                        uv,
                        ..Default::default()
                    },
                )
                .unwrap_err();
            assert!(matches!(err, Error::Ctap(CtapError::UnsupportedOption)));
        }
    }

    #[test]
    fn test_ctap1_exclude_list_probe_is_check_only() {
        let mut ctap = MockCtap1::new();
        ctap.auth_responses.push_back(Err(use_not_satisfied()));
        let mut client = ctap1_client(ctap);

        let err = client
            .make_credential(
                &RelyingParty::new("example.com"),
                &UserEntity::new(vec![1]),
                "abc",
                MakeCredentialOptions {
                    exclude_list: vec![CredentialDescriptor::new(vec![0x22; 16])],
                    ..Default::default()
                },
            )
            .unwrap_err();
        assert!(matches!(err, Error::Ctap(CtapError::CredentialExcluded)));

        match &client.transport {
            Transport::Ctap1(ctap) => {
                assert_eq!(ctap.auth_calls, vec![(vec![0x22; 16], true)]);
                assert_eq!(ctap.register_calls, 0);
            }
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_ctap1_excluded_probe_failure_ignored() {
        let key_handle = [0x11u8; 8];
        let mut ctap = MockCtap1::new();
        ctap.auth_responses
            .push_back(Err(ApduError::new(SW_WRONG_DATA).into()));
        ctap.register_responses
            .push_back(RegisterResponse::from_bytes(registration_blob(
                &key_handle,
                &[0x30, 0x01, 0x00],
                &[0x01],
            )));
        let mut client = ctap1_client(ctap);

        let result = client.make_credential(
            &RelyingParty::new("example.com"),
            &UserEntity::new(vec![1]),
            "abc",
            MakeCredentialOptions {
                exclude_list: vec![CredentialDescriptor::new(vec![0x33; 16])],
                ..Default::default()
            },
        );
        assert!(result.is_ok());
    }

    fn sign_blob(user_presence: u8, counter: u32) -> Vec<u8> {
        let mut blob = vec![user_presence];
        blob.extend_from_slice(&counter.to_be_bytes());
        blob.extend_from_slice(&[0x5A; 8]);
        blob
    }

    #[test]
    fn test_ctap1_get_assertion_masks_flags() {
        let mut ctap = MockCtap1::new();
        ctap.auth_responses
            .push_back(SignResponse::from_bytes(sign_blob(0xFF, 1234)));
        let mut client = ctap1_client(ctap);

        let (assertions, _) = client
            .get_assertion(
                "example.com",
                "abc",
                GetAssertionOptions {
                    allow_list: vec![CredentialDescriptor::new(vec![0x44; 12])],
                    ..Default::default()
                },
            )
            .unwrap();

        assert_eq!(assertions.len(), 1);
        let auth_data = assertions[0].authenticator_data().unwrap();
        assert_eq!(auth_data.flags, 0x01);
        assert_eq!(auth_data.sign_count, 1234);
        assert!(auth_data.attested_credential.is_none());
        assert_eq!(
            assertions[0].credential.as_ref().unwrap().id,
            vec![0x44; 12]
        );
    }

    #[test]
    fn test_ctap1_get_assertion_tries_next_handle() {
        let mut ctap = MockCtap1::new();
        ctap.auth_responses
            .push_back(Err(ApduError::new(SW_WRONG_DATA).into()));
        ctap.auth_responses
            .push_back(SignResponse::from_bytes(sign_blob(0x01, 1)));
        let mut client = ctap1_client(ctap);

        let (assertions, _) = client
            .get_assertion(
                "example.com",
                "abc",
                GetAssertionOptions {
                    allow_list: vec![
                        CredentialDescriptor::new(vec![0x01]),
                        CredentialDescriptor::new(vec![0x02]),
                    ],
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(assertions[0].credential.as_ref().unwrap().id, vec![0x02]);
    }

    #[test]
    fn test_ctap1_get_assertion_requires_allow_list() {
        let mut client = ctap1_client(MockCtap1::new());
        let err = client
            .get_assertion("example.com", "abc", GetAssertionOptions::default())
            .unwrap_err();
        assert!(matches!(err, Error::Ctap(CtapError::UnsupportedOption)));
    }

    #[test]
    fn test_ctap1_get_assertion_no_credentials() {
        let mut ctap = MockCtap1::new();
        ctap.auth_responses
            .push_back(Err(ApduError::new(SW_WRONG_DATA).into()));
        let mut client = ctap1_client(ctap);

        let err = client
            .get_assertion(
                "example.com",
                "abc",
                GetAssertionOptions {
                    allow_list: vec![CredentialDescriptor::new(vec![0x01])],
                    ..Default::default()
                },
            )
            .unwrap_err();
        assert!(matches!(err, Error::Ctap(CtapError::NoCredentials)));
    }

    #[test]
    fn test_bad_origin_is_rejected_before_any_device_io() {
        fn deny(_: &str, _: &str) -> anyhow::Result<bool> {
            Ok(false)
        }
        let mut client: Fido2Client<MockCtap1, NoCtap2> = Fido2Client::with_verifier(
            Transport::Ctap1(MockCtap1::new()),
            "https://evil.com",
            deny,
        );
        let err = client
            .make_credential(
                &RelyingParty::new("example.com"),
                &UserEntity::new(vec![1]),
                "abc",
                MakeCredentialOptions::default(),
            )
            .unwrap_err();
        assert!(matches!(err, Error::Client(ClientError::BadRequest(_))));
    }

    // ---- CTAP2 side ----

    struct NoCtap1;

    impl Ctap1Transport for NoCtap1 {
        fn get_version(&mut self) -> Result<String> {
            unimplemented!()
        }
        fn register(&mut self, _: &[u8; 32], _: &[u8; 32]) -> Result<RegisterResponse> {
            unimplemented!()
        }
        fn authenticate(
            &mut self,
            _: &[u8; 32],
            _: &[u8; 32],
            _: &[u8],
            _: bool,
        ) -> Result<SignResponse> {
            unimplemented!()
        }
    }

    #[derive(Default)]
    struct MockCtap2 {
        info: AuthenticatorInfo,
        make_credential_requests: Vec<MakeCredentialRequest>,
        get_assertion_requests: Vec<GetAssertionRequest>,
        next_assertion_calls: usize,
        number_of_credentials: Option<u64>,
        client_pin_calls: usize,
    }

    fn assertion(signature: Vec<u8>, number_of_credentials: Option<u64>) -> AssertionResponse {
        AssertionResponse {
            credential: Some(CredentialDescriptor::new(vec![9])),
            auth_data: AuthenticatorData::new([0u8; 32], FLAG_UP, 1, None).to_bytes(),
            signature,
            user: None,
            number_of_credentials,
        }
    }

    impl Ctap2Transport for MockCtap2 {
        fn get_info(&mut self) -> Result<AuthenticatorInfo> {
            Ok(self.info.clone())
        }

        fn make_credential(&mut self, request: &MakeCredentialRequest) -> Result<AttestationObject> {
            self.make_credential_requests.push(request.clone());
            Ok(AttestationObject {
                fmt: "packed".to_string(),
                auth_data: AuthenticatorData::new([0u8; 32], FLAG_UP, 1, None).to_bytes(),
                att_stmt: CborValue::Map(vec![]),
            })
        }

        fn get_assertion(&mut self, request: &GetAssertionRequest) -> Result<AssertionResponse> {
            self.get_assertion_requests.push(request.clone());
            Ok(assertion(vec![0], self.number_of_credentials))
        }

        fn get_next_assertion(&mut self) -> Result<AssertionResponse> {
            self.next_assertion_calls += 1;
            Ok(assertion(vec![self.next_assertion_calls as u8], None))
        }

        fn client_pin(&mut self, _: &ClientPinRequest) -> Result<ClientPinResponse> {
            self.client_pin_calls += 1;
            unimplemented!("PIN flows are exercised against the fake PIN device")
        }
    }

    fn ctap2_client(ctap: MockCtap2) -> Fido2Client<NoCtap1, MockCtap2> {
        Fido2Client::with_verifier(Transport::Ctap2(ctap), "https://example.com", allow_all)
    }

    fn inner_ctap2(client: &Fido2Client<NoCtap1, MockCtap2>) -> &MockCtap2 {
        match &client.transport {
            Transport::Ctap2(ctap) => ctap,
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_ctap2_make_credential_passthrough() {
        let mut client = ctap2_client(MockCtap2::default());
        let (attestation, client_data) = client
            .make_credential(
                &RelyingParty::new("example.com"),
                &UserEntity::new(vec![1]),
                "abc",
                MakeCredentialOptions {
                    algorithms: vec![Algorithm::Es256, Algorithm::Rs256],
                    ..Default::default()
                },
            )
            .unwrap();

        assert_eq!(attestation.fmt, "packed");
        let ctap = inner_ctap2(&client);
        let request = &ctap.make_credential_requests[0];
        assert_eq!(request.client_data_hash, client_data.hash());
        // caller order carries preference
        assert_eq!(request.algorithms, vec![-7, -257]);
        assert!(request.options.is_none());
        assert!(request.pin_auth.is_none());
        assert!(request.pin_protocol.is_none());
    }

    #[test]
    fn test_ctap2_options_carry_only_true_flags() {
        let mut client = ctap2_client(MockCtap2::default());
        client
            .make_credential(
                &RelyingParty::new("example.com"),
                &UserEntity::new(vec![1]),
                "abc",
                MakeCredentialOptions {
                    rk: true,
                    ..Default::default()
                },
            )
            .unwrap();
        let request = &inner_ctap2(&client).make_credential_requests[0];
        let options = request.options.unwrap();
        assert!(options.rk);
        assert!(!options.uv);
    }

    #[test]
    fn test_ctap2_pin_required_but_absent() {
        let mut ctap = MockCtap2::default();
        ctap.info.options.client_pin = Some(true);
        ctap.info.pin_protocols = vec![1];
        let mut client = ctap2_client(ctap);

        let err = client
            .make_credential(
                &RelyingParty::new("example.com"),
                &UserEntity::new(vec![1]),
                "abc",
                MakeCredentialOptions::default(),
            )
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Client(ClientError::ConfigurationUnsupported(_))
        ));
        let ctap = inner_ctap2(&client);
        assert!(ctap.make_credential_requests.is_empty());
    }

    #[test]
    fn test_ctap2_pin_protocol_unsupported() {
        let mut ctap = MockCtap2::default();
        ctap.info.pin_protocols = vec![];
        let mut client = ctap2_client(ctap);

        let err = client
            .get_assertion(
                "example.com",
                "abc",
                GetAssertionOptions {
                    pin: Some("1234".into()),
                    ..Default::default()
                },
            )
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Client(ClientError::ConfigurationUnsupported(_))
        ));
        let ctap = inner_ctap2(&client);
        assert_eq!(ctap.client_pin_calls, 0);
        assert!(ctap.get_assertion_requests.is_empty());
    }

    #[test]
    fn test_ctap2_empty_pin_means_no_pin() {
        let mut client = ctap2_client(MockCtap2::default());
        client
            .make_credential(
                &RelyingParty::new("example.com"),
                &UserEntity::new(vec![1]),
                "abc",
                MakeCredentialOptions {
                    pin: Some(String::new()),
                    ..Default::default()
                },
            )
            .unwrap();
        let request = &inner_ctap2(&client).make_credential_requests[0];
        assert!(request.pin_auth.is_none());
    }

    #[test]
    fn test_ctap2_collects_all_assertions_in_order() {
        let mut ctap = MockCtap2::default();
        ctap.number_of_credentials = Some(3);
        let mut client = ctap2_client(ctap);

        let (assertions, _) = client
            .get_assertion("example.com", "abc", GetAssertionOptions::default())
            .unwrap();

        assert_eq!(assertions.len(), 3);
        let ctap = inner_ctap2(&client);
        assert_eq!(ctap.next_assertion_calls, 2);
        assert_eq!(assertions[1].signature, vec![1]);
        assert_eq!(assertions[2].signature, vec![2]);
    }

    #[test]
    fn test_ctap2_missing_count_means_single_assertion() {
        let mut client = ctap2_client(MockCtap2::default());
        let (assertions, _) = client
            .get_assertion("example.com", "abc", GetAssertionOptions::default())
            .unwrap();
        assert_eq!(assertions.len(), 1);
        assert_eq!(inner_ctap2(&client).next_assertion_calls, 0);
    }
}
