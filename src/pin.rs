//! PIN protocol v1.
//!
//! A per-session shared secret is agreed via ECDH over P-256, the PIN
//! hash travels encrypted under AES-256-CBC (zero IV), and the device
//! answers with an encrypted PIN token. Token and shared secret are
//! zeroised when their scope ends and never logged.

use aes::Aes256;
use anyhow::anyhow;
use cbc::cipher::{block_padding::NoPadding, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use cbc::{Decryptor, Encryptor};
use hmac::{Hmac, Mac};
use p256::elliptic_curve::sec1::ToEncodedPoint;
use p256::{ecdh::EphemeralSecret, PublicKey};
use rand::rngs::OsRng;
use sha2::{Digest, Sha256};

use crate::cose::CoseKey;
use crate::ctap2::{
    ClientPinRequest, Ctap2Transport, PIN_CHANGE_PIN, PIN_GET_KEY_AGREEMENT, PIN_GET_PIN_TOKEN,
    PIN_GET_RETRIES, PIN_SET_PIN,
};
use crate::error::{ClientError, Error, Result};

type Aes256CbcEnc = Encryptor<Aes256>;
type Aes256CbcDec = Decryptor<Aes256>;
type HmacSha256 = Hmac<Sha256>;

pub const PIN_PROTOCOL_VERSION: u8 = 1;

const PIN_MIN_LENGTH: usize = 4;
const PIN_MAX_LENGTH: usize = 63;

/// Session PIN token. Holds the decrypted token bytes; wiped on drop.
pub struct PinToken(Vec<u8>);

impl PinToken {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl Drop for PinToken {
    fn drop(&mut self) {
        for byte in self.0.iter_mut() {
            *byte = 0;
        }
    }
}

/// First 16 bytes of HMAC-SHA-256 over `data`.
pub fn pin_auth(key: &[u8], data: &[u8]) -> [u8; 16] {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC accepts any key length");
    mac.update(data);
    let digest = mac.finalize().into_bytes();
    let mut out = [0u8; 16];
    out.copy_from_slice(&digest[..16]);
    out
}

/// ECDH result for one PIN-protocol exchange. The platform half of the
/// key agreement goes to the device; the secret is wiped on drop.
struct SharedSecret {
    secret: [u8; 32],
    platform_key: CoseKey,
}

impl Drop for SharedSecret {
    fn drop(&mut self) {
        self.secret = [0u8; 32];
    }
}

fn establish_shared_secret<T: Ctap2Transport>(ctap: &mut T) -> Result<SharedSecret> {
    let response = ctap.client_pin(&ClientPinRequest {
        pin_protocol: Some(PIN_PROTOCOL_VERSION),
        sub_command: PIN_GET_KEY_AGREEMENT,
        ..Default::default()
    })?;
    let device_key = response
        .key_agreement
        .ok_or_else(|| Error::Transport(anyhow!("key agreement missing from response")))?;

    let ephemeral = EphemeralSecret::random(&mut OsRng);
    let platform_public = PublicKey::from(&ephemeral);
    let encoded = platform_public.to_encoded_point(false);
    let platform_key =
        CoseKey::from_uncompressed_point(crate::cose::ALG_ECDH_ES_HKDF_256, encoded.as_bytes())?;

    let device_public = PublicKey::from_sec1_bytes(&device_key.to_uncompressed_point())
        .map_err(|e| Error::Transport(anyhow!("bad authenticator public key: {}", e)))?;
    let shared = ephemeral.diffie_hellman(&device_public);

    let mut hasher = Sha256::new();
    hasher.update(shared.raw_secret_bytes());
    let secret: [u8; 32] = hasher.finalize().into();

    Ok(SharedSecret {
        secret,
        platform_key,
    })
}

/// AES-256-CBC with zero IV; input length must be a block multiple.
fn encrypt(shared: &SharedSecret, data: &[u8]) -> Result<Vec<u8>> {
    let mut buffer = data.to_vec();
    let len = buffer.len();
    let iv = [0u8; 16];
    let cipher = Aes256CbcEnc::new((&shared.secret).into(), (&iv).into());
    cipher
        .encrypt_padded_mut::<NoPadding>(&mut buffer, len)
        .map_err(|e| Error::Transport(anyhow!("encryption failed: {:?}", e)))?;
    Ok(buffer)
}

fn decrypt(shared: &SharedSecret, data: &[u8]) -> Result<Vec<u8>> {
    let mut buffer = data.to_vec();
    let iv = [0u8; 16];
    let cipher = Aes256CbcDec::new((&shared.secret).into(), (&iv).into());
    let plain = cipher
        .decrypt_padded_mut::<NoPadding>(&mut buffer)
        .map_err(|e| Error::Transport(anyhow!("decryption failed: {:?}", e)))?;
    Ok(plain.to_vec())
}

fn check_pin_length(pin: &str) -> Result<()> {
    if pin.len() < PIN_MIN_LENGTH {
        return Err(ClientError::BadRequest("PIN must be at least 4 characters".into()).into());
    }
    if pin.len() > PIN_MAX_LENGTH {
        return Err(ClientError::BadRequest("PIN must be at most 63 characters".into()).into());
    }
    Ok(())
}

/// SHA-256 of the PIN, truncated to 16 bytes, as the device compares it.
fn pin_hash(pin: &str) -> [u8; 16] {
    let digest: [u8; 32] = Sha256::digest(pin.as_bytes()).into();
    let mut out = [0u8; 16];
    out.copy_from_slice(&digest[..16]);
    out
}

/// PIN padded to the fixed 64-byte plaintext block.
fn padded_pin(pin: &str) -> [u8; 64] {
    let mut padded = [0u8; 64];
    padded[..pin.len()].copy_from_slice(pin.as_bytes());
    padded
}

/// Derives the session PIN token for `pin`.
pub fn get_pin_token<T: Ctap2Transport>(ctap: &mut T, pin: &str) -> Result<PinToken> {
    let shared = establish_shared_secret(ctap)?;
    let pin_hash_enc = encrypt(&shared, &pin_hash(pin))?;

    let response = ctap.client_pin(&ClientPinRequest {
        pin_protocol: Some(PIN_PROTOCOL_VERSION),
        sub_command: PIN_GET_PIN_TOKEN,
        key_agreement: Some(shared.platform_key.clone()),
        pin_hash_enc: Some(pin_hash_enc),
        ..Default::default()
    })?;

    let token_enc = response
        .pin_token_enc
        .ok_or_else(|| Error::Transport(anyhow!("PIN token missing from response")))?;
    Ok(PinToken(decrypt(&shared, &token_enc)?))
}

/// Remaining PIN attempts before lockout.
pub fn get_pin_retries<T: Ctap2Transport>(ctap: &mut T) -> Result<u8> {
    let response = ctap.client_pin(&ClientPinRequest {
        pin_protocol: Some(PIN_PROTOCOL_VERSION),
        sub_command: PIN_GET_RETRIES,
        ..Default::default()
    })?;
    response
        .retries
        .ok_or_else(|| Error::Transport(anyhow!("retry count missing from response")))
}

/// Sets the initial PIN on a device that has none.
pub fn set_pin<T: Ctap2Transport>(ctap: &mut T, new_pin: &str) -> Result<()> {
    check_pin_length(new_pin)?;

    let shared = establish_shared_secret(ctap)?;
    let new_pin_enc = encrypt(&shared, &padded_pin(new_pin))?;
    let auth = pin_auth(&shared.secret, &new_pin_enc);

    ctap.client_pin(&ClientPinRequest {
        pin_protocol: Some(PIN_PROTOCOL_VERSION),
        sub_command: PIN_SET_PIN,
        key_agreement: Some(shared.platform_key.clone()),
        pin_auth: Some(auth.to_vec()),
        new_pin_enc: Some(new_pin_enc),
        ..Default::default()
    })?;
    log::info!("PIN set");
    Ok(())
}

/// Replaces an existing PIN; the device checks the old one first.
pub fn change_pin<T: Ctap2Transport>(ctap: &mut T, current_pin: &str, new_pin: &str) -> Result<()> {
    check_pin_length(new_pin)?;

    let shared = establish_shared_secret(ctap)?;
    let new_pin_enc = encrypt(&shared, &padded_pin(new_pin))?;
    let pin_hash_enc = encrypt(&shared, &pin_hash(current_pin))?;

    // pinAuth covers newPinEnc || pinHashEnc
    let mut auth_data = new_pin_enc.clone();
    auth_data.extend_from_slice(&pin_hash_enc);
    let auth = pin_auth(&shared.secret, &auth_data);

    ctap.client_pin(&ClientPinRequest {
        pin_protocol: Some(PIN_PROTOCOL_VERSION),
        sub_command: PIN_CHANGE_PIN,
        key_agreement: Some(shared.platform_key.clone()),
        pin_auth: Some(auth.to_vec()),
        new_pin_enc: Some(new_pin_enc),
        pin_hash_enc: Some(pin_hash_enc),
        ..Default::default()
    })?;
    log::info!("PIN changed");
    Ok(())
}
