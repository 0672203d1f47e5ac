//! CTAP2 (CBOR-framed) transport.

use anyhow::anyhow;
use ciborium::value::Value as CborValue;

use crate::cose::CoseKey;
use crate::error::{Error, Result};
use crate::hid::{CtapHidChannel, HidPacketIo};
use crate::webauthn::{CredentialDescriptor, RelyingParty, UserEntity};
use crate::attestation::{AssertionResponse, AttestationObject};

/// CTAP2 command codes
const CTAP2_MAKE_CREDENTIAL: u8 = 0x01;
const CTAP2_GET_ASSERTION: u8 = 0x02;
const CTAP2_GET_INFO: u8 = 0x04;
const CTAP2_CLIENT_PIN: u8 = 0x06;
const CTAP2_GET_NEXT_ASSERTION: u8 = 0x08;

/// Client PIN subcommands
pub const PIN_GET_RETRIES: u8 = 0x01;
pub const PIN_GET_KEY_AGREEMENT: u8 = 0x02;
pub const PIN_SET_PIN: u8 = 0x03;
pub const PIN_CHANGE_PIN: u8 = 0x04;
pub const PIN_GET_PIN_TOKEN: u8 = 0x05;

/// Device option flags from `get_info`.
#[derive(Debug, Clone, Default)]
pub struct InfoOptions {
    pub plat: bool,
    pub rk: bool,
    /// `Some(true)` means a client PIN is set, `Some(false)` means the
    /// device supports one but none is set, `None` means unsupported.
    pub client_pin: Option<bool>,
    pub up: bool,
    pub uv: Option<bool>,
}

/// Device capability record fetched per ceremony.
#[derive(Debug, Clone, Default)]
pub struct AuthenticatorInfo {
    pub versions: Vec<String>,
    pub extensions: Vec<String>,
    pub aaguid: [u8; 16],
    pub options: InfoOptions,
    pub max_msg_size: Option<u32>,
    pub pin_protocols: Vec<u32>,
    pub max_credential_count_in_list: Option<u32>,
    pub max_credential_id_length: Option<u32>,
    pub transports: Vec<String>,
}

/// Options block of a credential request. Only flags that are set are
/// put on the wire.
#[derive(Debug, Clone, Copy, Default)]
pub struct Ctap2Options {
    pub rk: bool,
    pub uv: bool,
}

#[derive(Debug, Clone)]
pub struct MakeCredentialRequest {
    pub client_data_hash: [u8; 32],
    pub rp: RelyingParty,
    pub user: UserEntity,
    /// COSE algorithm identifiers in caller preference order.
    pub algorithms: Vec<i64>,
    pub exclude_list: Vec<CredentialDescriptor>,
    pub extensions: Option<CborValue>,
    pub options: Option<Ctap2Options>,
    pub pin_auth: Option<Vec<u8>>,
    pub pin_protocol: Option<u8>,
}

#[derive(Debug, Clone)]
pub struct GetAssertionRequest {
    pub rp_id: String,
    pub client_data_hash: [u8; 32],
    pub allow_list: Vec<CredentialDescriptor>,
    pub extensions: Option<CborValue>,
    pub options: Option<Ctap2Options>,
    pub pin_auth: Option<Vec<u8>>,
    pub pin_protocol: Option<u8>,
}

/// Client PIN request; fields map to parameter keys 0x01..0x06.
#[derive(Debug, Clone, Default)]
pub struct ClientPinRequest {
    pub pin_protocol: Option<u8>,
    pub sub_command: u8,
    pub key_agreement: Option<CoseKey>,
    pub pin_auth: Option<Vec<u8>>,
    pub new_pin_enc: Option<Vec<u8>>,
    pub pin_hash_enc: Option<Vec<u8>>,
}

#[derive(Debug, Clone, Default)]
pub struct ClientPinResponse {
    pub key_agreement: Option<CoseKey>,
    pub pin_token_enc: Option<Vec<u8>>,
    pub retries: Option<u8>,
}

/// The modern authenticator API.
pub trait Ctap2Transport {
    fn get_info(&mut self) -> Result<AuthenticatorInfo>;
    fn make_credential(&mut self, request: &MakeCredentialRequest) -> Result<AttestationObject>;
    fn get_assertion(&mut self, request: &GetAssertionRequest) -> Result<AssertionResponse>;
    fn get_next_assertion(&mut self) -> Result<AssertionResponse>;
    fn client_pin(&mut self, request: &ClientPinRequest) -> Result<ClientPinResponse>;
}

fn int_key(k: i64) -> CborValue {
    CborValue::Integer(k.into())
}

fn text(s: &str) -> CborValue {
    CborValue::Text(s.to_string())
}

fn encode(value: &CborValue) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    ciborium::into_writer(value, &mut out)
        .map_err(|e| Error::Transport(anyhow!("Failed to encode CBOR: {}", e)))?;
    Ok(out)
}

fn decode(data: &[u8]) -> Result<CborValue> {
    ciborium::from_reader(data).map_err(|e| Error::Transport(anyhow!("Failed to parse CBOR: {}", e)))
}

fn cbor_to_string(value: &CborValue) -> String {
    match value {
        CborValue::Text(s) => s.clone(),
        CborValue::Bytes(b) => hex::encode(b),
        _ => format!("{:?}", value),
    }
}

fn cbor_to_u32(value: &CborValue) -> Option<u32> {
    match value {
        CborValue::Integer(i) => {
            let val: i128 = (*i).into();
            u32::try_from(val).ok()
        }
        _ => None,
    }
}

fn cbor_to_u8(value: &CborValue) -> Option<u8> {
    match value {
        CborValue::Integer(i) => {
            let val: i128 = (*i).into();
            u8::try_from(val).ok()
        }
        _ => None,
    }
}

fn cbor_to_bool(value: &CborValue) -> Option<bool> {
    match value {
        CborValue::Bool(b) => Some(*b),
        _ => None,
    }
}

fn credential_descriptor(cred: &CredentialDescriptor) -> CborValue {
    CborValue::Map(vec![
        (text("id"), CborValue::Bytes(cred.id.clone())),
        (text("type"), text(cred.credential_type())),
    ])
}

fn credential_list(list: &[CredentialDescriptor]) -> CborValue {
    CborValue::Array(list.iter().map(credential_descriptor).collect())
}

fn options_map(options: &Ctap2Options) -> CborValue {
    let mut map = Vec::new();
    if options.rk {
        map.push((text("rk"), CborValue::Bool(true)));
    }
    if options.uv {
        map.push((text("uv"), CborValue::Bool(true)));
    }
    CborValue::Map(map)
}

fn encode_make_credential(request: &MakeCredentialRequest) -> Result<Vec<u8>> {
    let mut rp = vec![(text("id"), text(&request.rp.id))];
    if let Some(name) = &request.rp.name {
        rp.push((text("name"), text(name)));
    }

    let mut user = vec![(text("id"), CborValue::Bytes(request.user.id.clone()))];
    if let Some(name) = &request.user.name {
        user.push((text("name"), text(name)));
    }
    if let Some(display_name) = &request.user.display_name {
        user.push((text("displayName"), text(display_name)));
    }

    let key_params = CborValue::Array(
        request
            .algorithms
            .iter()
            .map(|alg| {
                CborValue::Map(vec![
                    (text("alg"), CborValue::Integer((*alg).into())),
                    (text("type"), text("public-key")),
                ])
            })
            .collect(),
    );

    let mut map = vec![
        (int_key(0x01), CborValue::Bytes(request.client_data_hash.to_vec())),
        (int_key(0x02), CborValue::Map(rp)),
        (int_key(0x03), CborValue::Map(user)),
        (int_key(0x04), key_params),
    ];
    if !request.exclude_list.is_empty() {
        map.push((int_key(0x05), credential_list(&request.exclude_list)));
    }
    if let Some(extensions) = &request.extensions {
        map.push((int_key(0x06), extensions.clone()));
    }
    if let Some(options) = &request.options {
        map.push((int_key(0x07), options_map(options)));
    }
    if let Some(pin_auth) = &request.pin_auth {
        map.push((int_key(0x08), CborValue::Bytes(pin_auth.clone())));
    }
    if let Some(pin_protocol) = request.pin_protocol {
        map.push((int_key(0x09), CborValue::Integer(pin_protocol.into())));
    }
    encode(&CborValue::Map(map))
}

fn encode_get_assertion(request: &GetAssertionRequest) -> Result<Vec<u8>> {
    let mut map = vec![
        (int_key(0x01), text(&request.rp_id)),
        (int_key(0x02), CborValue::Bytes(request.client_data_hash.to_vec())),
    ];
    if !request.allow_list.is_empty() {
        map.push((int_key(0x03), credential_list(&request.allow_list)));
    }
    if let Some(extensions) = &request.extensions {
        map.push((int_key(0x04), extensions.clone()));
    }
    if let Some(options) = &request.options {
        map.push((int_key(0x05), options_map(options)));
    }
    if let Some(pin_auth) = &request.pin_auth {
        map.push((int_key(0x06), CborValue::Bytes(pin_auth.clone())));
    }
    if let Some(pin_protocol) = request.pin_protocol {
        map.push((int_key(0x07), CborValue::Integer(pin_protocol.into())));
    }
    encode(&CborValue::Map(map))
}

fn encode_client_pin(request: &ClientPinRequest) -> Result<Vec<u8>> {
    let mut map = Vec::new();
    if let Some(pin_protocol) = request.pin_protocol {
        map.push((int_key(0x01), CborValue::Integer(pin_protocol.into())));
    }
    map.push((int_key(0x02), CborValue::Integer(request.sub_command.into())));
    if let Some(key_agreement) = &request.key_agreement {
        map.push((int_key(0x03), key_agreement.to_cbor()));
    }
    if let Some(pin_auth) = &request.pin_auth {
        map.push((int_key(0x04), CborValue::Bytes(pin_auth.clone())));
    }
    if let Some(new_pin_enc) = &request.new_pin_enc {
        map.push((int_key(0x05), CborValue::Bytes(new_pin_enc.clone())));
    }
    if let Some(pin_hash_enc) = &request.pin_hash_enc {
        map.push((int_key(0x06), CborValue::Bytes(pin_hash_enc.clone())));
    }
    encode(&CborValue::Map(map))
}

fn parse_info(data: &[u8]) -> Result<AuthenticatorInfo> {
    let map = match decode(data)? {
        CborValue::Map(m) => m,
        _ => return Err(Error::Transport(anyhow!("get_info response is not a map"))),
    };

    let mut info = AuthenticatorInfo::default();
    for (key, value) in map {
        let key_int: i128 = match key {
            CborValue::Integer(i) => i.into(),
            _ => continue,
        };
        match key_int {
            0x01 => {
                if let CborValue::Array(arr) = value {
                    info.versions = arr.iter().map(cbor_to_string).collect();
                }
            }
            0x02 => {
                if let CborValue::Array(arr) = value {
                    info.extensions = arr.iter().map(cbor_to_string).collect();
                }
            }
            0x03 => {
                if let CborValue::Bytes(b) = value {
                    if b.len() == 16 {
                        info.aaguid.copy_from_slice(&b);
                    }
                }
            }
            0x04 => {
                if let CborValue::Map(opts) = value {
                    for (opt_key, opt_value) in opts {
                        let name = match opt_key {
                            CborValue::Text(s) => s,
                            _ => continue,
                        };
                        match name.as_str() {
                            "plat" => info.options.plat = cbor_to_bool(&opt_value).unwrap_or(false),
                            "rk" => info.options.rk = cbor_to_bool(&opt_value).unwrap_or(false),
                            "clientPin" => info.options.client_pin = cbor_to_bool(&opt_value),
                            "up" => info.options.up = cbor_to_bool(&opt_value).unwrap_or(false),
                            "uv" => info.options.uv = cbor_to_bool(&opt_value),
                            _ => {}
                        }
                    }
                }
            }
            0x05 => info.max_msg_size = cbor_to_u32(&value),
            0x06 => {
                if let CborValue::Array(arr) = value {
                    info.pin_protocols = arr.iter().filter_map(cbor_to_u32).collect();
                }
            }
            0x07 => info.max_credential_count_in_list = cbor_to_u32(&value),
            0x08 => info.max_credential_id_length = cbor_to_u32(&value),
            0x09 => {
                if let CborValue::Array(arr) = value {
                    info.transports = arr.iter().map(cbor_to_string).collect();
                }
            }
            other => {
                log::debug!("Unknown get_info key: {}", other);
            }
        }
    }
    Ok(info)
}

fn parse_attestation(data: &[u8]) -> Result<AttestationObject> {
    let map = match decode(data)? {
        CborValue::Map(m) => m,
        _ => return Err(Error::Transport(anyhow!("attestation response is not a map"))),
    };

    let mut fmt = None;
    let mut auth_data = None;
    let mut att_stmt = None;
    for (key, value) in map {
        let key_int: i128 = match key {
            CborValue::Integer(i) => i.into(),
            _ => continue,
        };
        match key_int {
            0x01 => {
                if let CborValue::Text(s) = value {
                    fmt = Some(s);
                }
            }
            0x02 => {
                if let CborValue::Bytes(b) = value {
                    auth_data = Some(b);
                }
            }
            0x03 => att_stmt = Some(value),
            _ => {}
        }
    }

    match (fmt, auth_data, att_stmt) {
        (Some(fmt), Some(auth_data), Some(att_stmt)) => Ok(AttestationObject {
            fmt,
            auth_data,
            att_stmt,
        }),
        _ => Err(Error::Transport(anyhow!("attestation response incomplete"))),
    }
}

fn parse_user(value: &CborValue) -> Option<UserEntity> {
    let map = match value {
        CborValue::Map(m) => m,
        _ => return None,
    };
    let mut user = UserEntity::new(Vec::new());
    for (key, val) in map {
        let field = match key {
            CborValue::Text(s) => s.as_str(),
            _ => continue,
        };
        match field {
            "id" => {
                if let CborValue::Bytes(b) = val {
                    user.id = b.clone();
                }
            }
            "name" => user.name = Some(cbor_to_string(val)),
            "displayName" => user.display_name = Some(cbor_to_string(val)),
            _ => {}
        }
    }
    Some(user)
}

fn parse_assertion(data: &[u8]) -> Result<AssertionResponse> {
    let map = match decode(data)? {
        CborValue::Map(m) => m,
        _ => return Err(Error::Transport(anyhow!("assertion response is not a map"))),
    };

    let mut credential = None;
    let mut auth_data = None;
    let mut signature = None;
    let mut user = None;
    let mut number_of_credentials = None;
    for (key, value) in map {
        let key_int: i128 = match key {
            CborValue::Integer(i) => i.into(),
            _ => continue,
        };
        match key_int {
            0x01 => {
                if let CborValue::Map(cred) = &value {
                    for (cred_key, cred_value) in cred {
                        if matches!(cred_key, CborValue::Text(s) if s == "id") {
                            if let CborValue::Bytes(b) = cred_value {
                                credential = Some(CredentialDescriptor::new(b.clone()));
                            }
                        }
                    }
                }
            }
            0x02 => {
                if let CborValue::Bytes(b) = value {
                    auth_data = Some(b);
                }
            }
            0x03 => {
                if let CborValue::Bytes(b) = value {
                    signature = Some(b);
                }
            }
            0x04 => user = parse_user(&value),
            0x05 => number_of_credentials = cbor_to_u32(&value).map(u64::from),
            _ => {}
        }
    }

    match (auth_data, signature) {
        (Some(auth_data), Some(signature)) => Ok(AssertionResponse {
            credential,
            auth_data,
            signature,
            user,
            number_of_credentials,
        }),
        _ => Err(Error::Transport(anyhow!("assertion response incomplete"))),
    }
}

fn parse_client_pin(data: &[u8]) -> Result<ClientPinResponse> {
    let map = match decode(data)? {
        CborValue::Map(m) => m,
        _ => return Err(Error::Transport(anyhow!("client_pin response is not a map"))),
    };

    let mut response = ClientPinResponse::default();
    for (key, value) in map {
        let key_int: i128 = match key {
            CborValue::Integer(i) => i.into(),
            _ => continue,
        };
        match key_int {
            0x01 => response.key_agreement = Some(CoseKey::from_cbor(&value)?),
            0x02 => {
                if let CborValue::Bytes(b) = value {
                    response.pin_token_enc = Some(b);
                }
            }
            0x03 => response.retries = cbor_to_u8(&value),
            _ => {}
        }
    }
    Ok(response)
}

/// CTAP2 over a CTAPHID channel. Construction fails when the device
/// did not advertise the CBOR capability, which is what sends the
/// orchestrator down the CTAP1 path.
pub struct Ctap2Hid<D = hidapi::HidDevice> {
    channel: CtapHidChannel<D>,
}

impl<D: HidPacketIo> Ctap2Hid<D> {
    pub fn new(channel: CtapHidChannel<D>) -> std::result::Result<Self, CtapHidChannel<D>> {
        if channel.supports_cbor() {
            Ok(Ctap2Hid { channel })
        } else {
            Err(channel)
        }
    }
}

impl<D: HidPacketIo> Ctap2Transport for Ctap2Hid<D> {
    fn get_info(&mut self) -> Result<AuthenticatorInfo> {
        let response = self.channel.cbor(CTAP2_GET_INFO, &[])?;
        parse_info(&response)
    }

    fn make_credential(&mut self, request: &MakeCredentialRequest) -> Result<AttestationObject> {
        let payload = encode_make_credential(request)?;
        let response = self.channel.cbor(CTAP2_MAKE_CREDENTIAL, &payload)?;
        parse_attestation(&response)
    }

    fn get_assertion(&mut self, request: &GetAssertionRequest) -> Result<AssertionResponse> {
        let payload = encode_get_assertion(request)?;
        let response = self.channel.cbor(CTAP2_GET_ASSERTION, &payload)?;
        parse_assertion(&response)
    }

    fn get_next_assertion(&mut self) -> Result<AssertionResponse> {
        let response = self.channel.cbor(CTAP2_GET_NEXT_ASSERTION, &[])?;
        parse_assertion(&response)
    }

    fn client_pin(&mut self, request: &ClientPinRequest) -> Result<ClientPinResponse> {
        let payload = encode_client_pin(request)?;
        let response = self.channel.cbor(CTAP2_CLIENT_PIN, &payload)?;
        parse_client_pin(&response)
    }
}
