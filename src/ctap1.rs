//! CTAP1 (U2F raw message) transport.

use anyhow::anyhow;

use crate::error::{Error, Result};
use crate::hid::{CtapHidChannel, HidPacketIo};

/// U2F instruction bytes
const INS_REGISTER: u8 = 0x01;
const INS_AUTHENTICATE: u8 = 0x02;
const INS_VERSION: u8 = 0x03;

/// Authenticate control byte: check-only probes the key handle without
/// requiring a touch; enforce demands user presence and signs.
const P1_CHECK_ONLY: u8 = 0x07;
const P1_ENFORCE_UP_AND_SIGN: u8 = 0x03;

/// Successful registration payload: reserved(0x05) || publicKey(65) ||
/// khLen(1) || keyHandle || certificate(DER) || signature.
#[derive(Debug, Clone)]
pub struct RegisterResponse {
    raw: Vec<u8>,
    pub key_handle: Vec<u8>,
    pub public_key: [u8; 65],
    pub certificate: Vec<u8>,
    pub signature: Vec<u8>,
}

impl RegisterResponse {
    pub fn from_bytes(raw: Vec<u8>) -> Result<Self> {
        if raw.len() < 67 || raw[0] != 0x05 {
            return Err(Error::Transport(anyhow!("malformed registration response")));
        }
        let mut public_key = [0u8; 65];
        public_key.copy_from_slice(&raw[1..66]);

        let kh_len = raw[66] as usize;
        let cert_start = 67 + kh_len;
        if raw.len() < cert_start {
            return Err(Error::Transport(anyhow!("key handle truncated")));
        }
        let key_handle = raw[67..cert_start].to_vec();

        let cert_len = der_tlv_len(&raw[cert_start..])?;
        let sig_start = cert_start + cert_len;
        if raw.len() < sig_start {
            return Err(Error::Transport(anyhow!("attestation certificate truncated")));
        }
        let certificate = raw[cert_start..sig_start].to_vec();
        let signature = raw[sig_start..].to_vec();

        Ok(RegisterResponse {
            raw,
            key_handle,
            public_key,
            certificate,
            signature,
        })
    }

    /// The unparsed payload, as the legacy web API returns it.
    pub fn bytes(&self) -> &[u8] {
        &self.raw
    }
}

/// Successful authenticate payload: userPresence(1) || counter(4 BE) ||
/// signature.
#[derive(Debug, Clone)]
pub struct SignResponse {
    raw: Vec<u8>,
    pub user_presence: u8,
    pub counter: u32,
    pub signature: Vec<u8>,
}

impl SignResponse {
    pub fn from_bytes(raw: Vec<u8>) -> Result<Self> {
        if raw.len() < 6 {
            return Err(Error::Transport(anyhow!("malformed signature response")));
        }
        let user_presence = raw[0];
        let counter = u32::from_be_bytes([raw[1], raw[2], raw[3], raw[4]]);
        let signature = raw[5..].to_vec();
        Ok(SignResponse {
            raw,
            user_presence,
            counter,
            signature,
        })
    }

    pub fn bytes(&self) -> &[u8] {
        &self.raw
    }
}

/// Measures one DER TLV (tag, length, value) at the head of `data`.
fn der_tlv_len(data: &[u8]) -> Result<usize> {
    if data.len() < 2 {
        return Err(Error::Transport(anyhow!("DER element truncated")));
    }
    let first = data[1];
    if first & 0x80 == 0 {
        return Ok(2 + first as usize);
    }
    let n = (first & 0x7F) as usize;
    if n == 0 || n > 4 || data.len() < 2 + n {
        return Err(Error::Transport(anyhow!("bad DER length encoding")));
    }
    let mut len = 0usize;
    for &b in &data[2..2 + n] {
        len = (len << 8) | b as usize;
    }
    Ok(2 + n + len)
}

/// The legacy challenge/response protocol. `authenticate` fails with
/// `SW_CONDITIONS_NOT_SATISFIED` until the user touches the key; the
/// polling driver owns that retry.
pub trait Ctap1Transport {
    fn get_version(&mut self) -> Result<String>;

    fn register(
        &mut self,
        challenge_hash: &[u8; 32],
        app_param: &[u8; 32],
    ) -> Result<RegisterResponse>;

    fn authenticate(
        &mut self,
        challenge_hash: &[u8; 32],
        app_param: &[u8; 32],
        key_handle: &[u8],
        check_only: bool,
    ) -> Result<SignResponse>;
}

/// Extended-length APDU: CLA INS P1 P2 | 0x00 Lc(2) | data | Le(2).
fn build_apdu(ins: u8, p1: u8, data: &[u8]) -> Vec<u8> {
    let mut apdu = Vec::with_capacity(9 + data.len());
    apdu.extend_from_slice(&[0x00, ins, p1, 0x00]);
    apdu.push(0x00);
    apdu.extend_from_slice(&(data.len() as u16).to_be_bytes());
    apdu.extend_from_slice(data);
    apdu.extend_from_slice(&[0x00, 0x00]);
    apdu
}

/// CTAP1 over a CTAPHID channel.
pub struct Ctap1Hid<D = hidapi::HidDevice> {
    channel: CtapHidChannel<D>,
}

impl<D: HidPacketIo> Ctap1Hid<D> {
    pub fn new(channel: CtapHidChannel<D>) -> Self {
        Ctap1Hid { channel }
    }
}

impl<D: HidPacketIo> Ctap1Transport for Ctap1Hid<D> {
    fn get_version(&mut self) -> Result<String> {
        let response = self.channel.msg(&build_apdu(INS_VERSION, 0x00, &[]))?;
        String::from_utf8(response)
            .map_err(|_| Error::Transport(anyhow!("version string is not UTF-8")))
    }

    fn register(
        &mut self,
        challenge_hash: &[u8; 32],
        app_param: &[u8; 32],
    ) -> Result<RegisterResponse> {
        let mut data = Vec::with_capacity(64);
        data.extend_from_slice(challenge_hash);
        data.extend_from_slice(app_param);
        let response = self.channel.msg(&build_apdu(INS_REGISTER, 0x00, &data))?;
        RegisterResponse::from_bytes(response)
    }

    fn authenticate(
        &mut self,
        challenge_hash: &[u8; 32],
        app_param: &[u8; 32],
        key_handle: &[u8],
        check_only: bool,
    ) -> Result<SignResponse> {
        let p1 = if check_only {
            P1_CHECK_ONLY
        } else {
            P1_ENFORCE_UP_AND_SIGN
        };
        let mut data = Vec::with_capacity(65 + key_handle.len());
        data.extend_from_slice(challenge_hash);
        data.extend_from_slice(app_param);
        data.push(key_handle.len() as u8);
        data.extend_from_slice(key_handle);
        let response = self.channel.msg(&build_apdu(INS_AUTHENTICATE, p1, &data))?;
        SignResponse::from_bytes(response)
    }
}
