//! CTAPHID channel: INIT, MSG and CBOR transactions over 64-byte
//! HID reports.

use anyhow::{anyhow, Context, Result as AnyResult};

use crate::error::{ApduError, CtapError, Error, Result, SW_NO_ERROR};

/// CTAPHID commands
const CTAPHID_MSG: u8 = 0x03;
const CTAPHID_INIT: u8 = 0x06;
const CTAPHID_CBOR: u8 = 0x10;
const CTAPHID_KEEPALIVE: u8 = 0x3B;
const CTAPHID_ERROR: u8 = 0x3F;

const TYPE_INIT: u8 = 0x80;
const BROADCAST_CID: [u8; 4] = [0xFF, 0xFF, 0xFF, 0xFF];

/// INIT capability flags
pub const CAPABILITY_WINK: u8 = 0x01;
pub const CAPABILITY_CBOR: u8 = 0x04;
pub const CAPABILITY_NMSG: u8 = 0x08;

const PACKET_SIZE: usize = 64;
const INIT_PAYLOAD: usize = PACKET_SIZE - 7;
const CONT_PAYLOAD: usize = PACKET_SIZE - 5;

/// Default transaction timeout. CBOR ceremonies wait on the user, so
/// the device answers with keepalives in the meantime.
const DEFAULT_TIMEOUT_MS: i32 = 5000;
const USER_WAIT_TIMEOUT_MS: i32 = 60_000;

/// Raw 64-byte report exchange. Implemented for `hidapi::HidDevice`;
/// tests substitute a scripted fake.
pub trait HidPacketIo {
    fn write_packet(&self, packet: &[u8]) -> AnyResult<()>;
    fn read_packet(&self, timeout_ms: i32) -> AnyResult<Vec<u8>>;
}

impl HidPacketIo for hidapi::HidDevice {
    fn write_packet(&self, packet: &[u8]) -> AnyResult<()> {
        // hidapi wants a leading report-id byte on most platforms
        let mut report = vec![0u8; PACKET_SIZE + 1];
        report[1..1 + packet.len()].copy_from_slice(packet);
        self.write(&report).context("HID write failed")?;
        log::trace!("HID out: {}", hex::encode(packet));
        Ok(())
    }

    fn read_packet(&self, timeout_ms: i32) -> AnyResult<Vec<u8>> {
        let mut buffer = vec![0u8; PACKET_SIZE];
        let read = self
            .read_timeout(&mut buffer, timeout_ms)
            .context("HID read failed")?;
        if read == 0 {
            return Err(anyhow!("HID read timeout after {}ms", timeout_ms));
        }
        buffer.truncate(read);
        log::trace!("HID in: {}", hex::encode(&buffer));
        Ok(buffer)
    }
}

/// A logical channel to one authenticator, allocated via INIT.
pub struct CtapHidChannel<D = hidapi::HidDevice> {
    device: D,
    cid: [u8; 4],
    capabilities: u8,
}

impl<D: HidPacketIo> CtapHidChannel<D> {
    /// Performs the INIT transaction on the broadcast channel: sends an
    /// 8-byte nonce, verifies the echo and records the allocated
    /// channel id and capability flags.
    pub fn open(device: D) -> Result<Self> {
        let nonce: [u8; 8] = rand::random();

        let mut packet = [0u8; PACKET_SIZE];
        packet[0..4].copy_from_slice(&BROADCAST_CID);
        packet[4] = CTAPHID_INIT | TYPE_INIT;
        packet[5] = 0x00;
        packet[6] = 0x08;
        packet[7..15].copy_from_slice(&nonce);
        device.write_packet(&packet).map_err(Error::Transport)?;

        // Other traffic may share the broadcast channel; keep reading
        // until our nonce comes back.
        loop {
            let response = device
                .read_packet(DEFAULT_TIMEOUT_MS)
                .map_err(Error::Transport)?;
            if response.len() < 24 || response[4] != (CTAPHID_INIT | TYPE_INIT) {
                continue;
            }
            if response[7..15] != nonce {
                continue;
            }
            let cid = [response[15], response[16], response[17], response[18]];
            let capabilities = response[23];
            log::debug!(
                "CTAPHID channel {} open, capabilities 0x{:02X}",
                hex::encode(cid),
                capabilities
            );
            return Ok(CtapHidChannel {
                device,
                cid,
                capabilities,
            });
        }
    }

    pub fn supports_cbor(&self) -> bool {
        self.capabilities & CAPABILITY_CBOR != 0
    }

    pub fn supports_msg(&self) -> bool {
        self.capabilities & CAPABILITY_NMSG == 0
    }

    /// One request/response exchange: initial packet, continuation
    /// packets, then reassembly of the response, skipping keepalives
    /// while the device waits for the user.
    fn transaction(&self, command: u8, payload: &[u8]) -> Result<Vec<u8>> {
        let mut packet = [0u8; PACKET_SIZE];
        packet[0..4].copy_from_slice(&self.cid);
        packet[4] = command | TYPE_INIT;
        packet[5] = ((payload.len() >> 8) & 0xFF) as u8;
        packet[6] = (payload.len() & 0xFF) as u8;

        let first = payload.len().min(INIT_PAYLOAD);
        packet[7..7 + first].copy_from_slice(&payload[..first]);
        self.device.write_packet(&packet).map_err(Error::Transport)?;

        let mut sent = first;
        let mut seq = 0u8;
        while sent < payload.len() {
            let mut cont = [0u8; PACKET_SIZE];
            cont[0..4].copy_from_slice(&self.cid);
            cont[4] = seq;
            let chunk = (payload.len() - sent).min(CONT_PAYLOAD);
            cont[5..5 + chunk].copy_from_slice(&payload[sent..sent + chunk]);
            self.device.write_packet(&cont).map_err(Error::Transport)?;
            sent += chunk;
            seq += 1;
        }

        // Initial response packet, skipping keepalives
        let response = loop {
            let response = self
                .device
                .read_packet(USER_WAIT_TIMEOUT_MS)
                .map_err(Error::Transport)?;
            if response.len() < 7 {
                return Err(Error::Transport(anyhow!("CTAPHID response too short")));
            }
            if response[0..4] != self.cid {
                continue;
            }
            if response[4] == (CTAPHID_KEEPALIVE | TYPE_INIT) {
                log::trace!("keepalive, status {}", response.get(7).copied().unwrap_or(0));
                continue;
            }
            if response[4] == (CTAPHID_ERROR | TYPE_INIT) {
                return Err(Error::Transport(anyhow!(
                    "CTAPHID error: 0x{:02X}",
                    response.get(7).copied().unwrap_or(0)
                )));
            }
            if response[4] != (command | TYPE_INIT) {
                return Err(Error::Transport(anyhow!(
                    "unexpected CTAPHID command 0x{:02X}",
                    response[4]
                )));
            }
            break response;
        };

        let total = ((response[5] as usize) << 8) | response[6] as usize;
        let mut data = Vec::with_capacity(total);
        let first = total.min(response.len().saturating_sub(7)).min(INIT_PAYLOAD);
        data.extend_from_slice(&response[7..7 + first]);

        let mut expected_seq = 0u8;
        while data.len() < total {
            let cont = self
                .device
                .read_packet(DEFAULT_TIMEOUT_MS)
                .map_err(Error::Transport)?;
            if cont.len() < 5 || cont[0..4] != self.cid {
                return Err(Error::Transport(anyhow!("continuation packet mismatch")));
            }
            if cont[4] != expected_seq {
                return Err(Error::Transport(anyhow!(
                    "continuation sequence mismatch: got {}, want {}",
                    cont[4],
                    expected_seq
                )));
            }
            let chunk = (total - data.len()).min(cont.len() - 5).min(CONT_PAYLOAD);
            data.extend_from_slice(&cont[5..5 + chunk]);
            expected_seq += 1;
        }

        Ok(data)
    }

    /// Sends a raw U2F APDU via CTAPHID_MSG. Splits off the trailing
    /// status word; anything other than 0x9000 becomes an `ApduError`.
    pub fn msg(&self, apdu: &[u8]) -> Result<Vec<u8>> {
        let mut response = self.transaction(CTAPHID_MSG, apdu)?;
        if response.len() < 2 {
            return Err(Error::Transport(anyhow!("APDU response too short")));
        }
        let sw = u16::from_be_bytes([response[response.len() - 2], response[response.len() - 1]]);
        response.truncate(response.len() - 2);
        if sw != SW_NO_ERROR {
            return Err(ApduError::new(sw).into());
        }
        Ok(response)
    }

    /// Sends a CTAP2 command via CTAPHID_CBOR. The leading status byte
    /// is checked; nonzero becomes a `CtapError`.
    pub fn cbor(&self, command: u8, payload: &[u8]) -> Result<Vec<u8>> {
        let mut framed = Vec::with_capacity(1 + payload.len());
        framed.push(command);
        framed.extend_from_slice(payload);
        let response = self.transaction(CTAPHID_CBOR, &framed)?;

        let status = *response
            .first()
            .ok_or_else(|| Error::Transport(anyhow!("empty CTAP2 response")))?;
        if status != 0 {
            return Err(CtapError::from_code(status).into());
        }
        Ok(response[1..].to_vec())
    }
}
