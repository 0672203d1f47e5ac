//! Legacy U2F web-API client over CTAP1.

use std::time::Duration;

use sha2::{Digest, Sha256};

use crate::client_data::{websafe_decode, websafe_encode, ClientData};
use crate::ctap1::{Ctap1Hid, Ctap1Transport};
use crate::error::{ClientError, Error, Result};
use crate::hid::CtapHidChannel;
use crate::polling::{call_polling, Cancel, DEFAULT_POLL_DELAY};
use crate::rpid::{self, OriginVerifier};
use crate::webauthn::{RegisterRequest, RegisteredKey, U2fRegisterResult, U2fSignResult};

fn app_param(identifier: &str) -> [u8; 32] {
    Sha256::digest(identifier.as_bytes()).into()
}

/// Drives the legacy `register`/`sign` ceremonies against one device.
pub struct U2fClient<T> {
    ctap: T,
    origin: String,
    poll_delay: Duration,
    verify: OriginVerifier,
    cancel: Option<Cancel>,
}

impl U2fClient<Ctap1Hid> {
    /// Binds to a HID authenticator over its CTAP1 interface.
    pub fn open(device: hidapi::HidDevice, origin: impl Into<String>) -> Result<Self> {
        let channel = CtapHidChannel::open(device)?;
        Ok(Self::new(Ctap1Hid::new(channel), origin))
    }
}

impl<T: Ctap1Transport> U2fClient<T> {
    pub fn new(ctap: T, origin: impl Into<String>) -> Self {
        Self::with_verifier(ctap, origin, rpid::verify_app_id)
    }

    pub fn with_verifier(ctap: T, origin: impl Into<String>, verify: OriginVerifier) -> Self {
        U2fClient {
            ctap,
            origin: origin.into(),
            poll_delay: DEFAULT_POLL_DELAY,
            verify,
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

    fn verify_app_id(&self, app_id: &str) -> Result<()> {
        // Verifier failure and a negative answer both end the ceremony
        match (self.verify)(app_id, &self.origin) {
            Ok(true) => Ok(()),
            _ => Err(ClientError::BadRequest(format!(
                "origin {} may not use app id {}",
                self.origin, app_id
            ))
            .into()),
        }
    }

    /// Registers a new credential. Keys already registered with this
    /// device make it ineligible, probed with check-only requests that
    /// never require a touch.
    pub fn register(
        &mut self,
        app_id: &str,
        register_requests: &[RegisterRequest],
        registered_keys: &[RegisteredKey],
        timeout: Option<Duration>,
    ) -> Result<U2fRegisterResult> {
        self.verify_app_id(app_id)?;

        let version = self.ctap.get_version()?;
        let dummy = [0u8; 32];
        for key in registered_keys {
            if key.version != version {
                continue;
            }
            let key_app_id = key.app_id.as_deref().unwrap_or(app_id);
            self.verify_app_id(key_app_id)?;
            let param = app_param(key_app_id);
            let key_handle = websafe_decode(&key.key_handle)?;
            match self.ctap.authenticate(&dummy, &param, &key_handle, true) {
                // check-only must not succeed; both outcomes mean the
                // device already holds this credential
                Ok(_) => return Err(ClientError::DeviceIneligible.into()),
                Err(Error::Apdu(e)) if e.is_use_not_satisfied() => {
                    return Err(ClientError::DeviceIneligible.into())
                }
                Err(_) => {}
            }
        }

        let challenge = register_requests
            .iter()
            .find(|request| request.version == version)
            .map(|request| request.challenge.as_str())
            .ok_or(ClientError::DeviceIneligible)?;

        let client_data = ClientData::for_legacy_register(challenge, &self.origin);
        let challenge_hash = client_data.hash();
        let param = app_param(app_id);

        let ctap = &mut self.ctap;
        let registration = call_polling(timeout, self.poll_delay, self.cancel.as_ref(), || {
            ctap.register(&challenge_hash, &param)
        })?;

        Ok(U2fRegisterResult {
            registration_data: websafe_encode(registration.bytes()),
            client_data: client_data.base64(),
        })
    }

    /// Signs a challenge with the first registered key the device
    /// recognises. Per-key transport failures are silent; only "no key
    /// worked" surfaces.
    pub fn sign(
        &mut self,
        app_id: &str,
        challenge: &str,
        registered_keys: &[RegisteredKey],
        timeout: Option<Duration>,
    ) -> Result<U2fSignResult> {
        let client_data = ClientData::for_legacy_sign(challenge, &self.origin);
        let challenge_hash = client_data.hash();

        let version = self.ctap.get_version()?;
        for key in registered_keys {
            if key.version != version {
                continue;
            }
            let key_app_id = key.app_id.as_deref().unwrap_or(app_id);
            self.verify_app_id(key_app_id)?;
            let param = app_param(key_app_id);
            let key_handle = websafe_decode(&key.key_handle)?;

            let ctap = &mut self.ctap;
            let result = call_polling(timeout, self.poll_delay, self.cancel.as_ref(), || {
                ctap.authenticate(&challenge_hash, &param, &key_handle, false)
            });
            match result {
                Ok(signature) => {
                    return Ok(U2fSignResult {
                        client_data: client_data.base64(),
                        signature_data: websafe_encode(signature.bytes()),
                        key_handle: key.key_handle.clone(),
                    })
                }
                Err(Error::Apdu(_)) => {}
                Err(e) => return Err(e),
            }
        }
        Err(ClientError::DeviceIneligible.into())
    }
}
