//! COSE_Key handling for EC2/P-256 keys.

use anyhow::anyhow;
use ciborium::value::Value as CborValue;

use crate::error::{Error, Result};

pub const KTY_EC2: i64 = 2;
pub const CRV_P256: i64 = 1;
pub const ALG_ES256: i64 = -7;
pub const ALG_ECDH_ES_HKDF_256: i64 = -25;

/// An EC2 key over P-256 in COSE_Key map form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoseKey {
    pub alg: i64,
    pub x: [u8; 32],
    pub y: [u8; 32],
}

impl CoseKey {
    pub fn es256(x: [u8; 32], y: [u8; 32]) -> Self {
        CoseKey { alg: ALG_ES256, x, y }
    }

    pub fn ecdh(x: [u8; 32], y: [u8; 32]) -> Self {
        CoseKey {
            alg: ALG_ECDH_ES_HKDF_256,
            x,
            y,
        }
    }

    /// Splits a 65-byte uncompressed SEC1 point `0x04 || X || Y`.
    pub fn from_uncompressed_point(alg: i64, point: &[u8]) -> Result<Self> {
        if point.len() != 65 || point[0] != 0x04 {
            return Err(Error::Transport(anyhow!(
                "not an uncompressed P-256 point ({} bytes)",
                point.len()
            )));
        }
        let mut x = [0u8; 32];
        let mut y = [0u8; 32];
        x.copy_from_slice(&point[1..33]);
        y.copy_from_slice(&point[33..65]);
        Ok(CoseKey { alg, x, y })
    }

    pub fn to_uncompressed_point(&self) -> Vec<u8> {
        let mut point = Vec::with_capacity(65);
        point.push(0x04);
        point.extend_from_slice(&self.x);
        point.extend_from_slice(&self.y);
        point
    }

    /// Canonical CBOR map, integer keys in the order {1, 3, -1, -2, -3}
    /// expected by verifiers.
    pub fn to_cbor(&self) -> CborValue {
        CborValue::Map(vec![
            (CborValue::Integer(1.into()), CborValue::Integer(KTY_EC2.into())),
            (CborValue::Integer(3.into()), CborValue::Integer(self.alg.into())),
            (CborValue::Integer((-1).into()), CborValue::Integer(CRV_P256.into())),
            (CborValue::Integer((-2).into()), CborValue::Bytes(self.x.to_vec())),
            (CborValue::Integer((-3).into()), CborValue::Bytes(self.y.to_vec())),
        ])
    }

    pub fn from_cbor(value: &CborValue) -> Result<Self> {
        let map = match value {
            CborValue::Map(m) => m,
            _ => return Err(Error::Transport(anyhow!("COSE key is not a map"))),
        };

        let mut alg = ALG_ES256;
        let mut x: Option<[u8; 32]> = None;
        let mut y: Option<[u8; 32]> = None;

        for (key, val) in map {
            let key_int: i128 = match key {
                CborValue::Integer(i) => (*i).into(),
                _ => continue,
            };
            match key_int {
                3 => {
                    if let CborValue::Integer(i) = val {
                        alg = i128::from(*i) as i64;
                    }
                }
                -2 => x = coordinate(val),
                -3 => y = coordinate(val),
                _ => {}
            }
        }

        match (x, y) {
            (Some(x), Some(y)) => Ok(CoseKey { alg, x, y }),
            _ => Err(Error::Transport(anyhow!("COSE key missing coordinates"))),
        }
    }
}

fn coordinate(value: &CborValue) -> Option<[u8; 32]> {
    match value {
        CborValue::Bytes(b) if b.len() == 32 => {
            let mut out = [0u8; 32];
            out.copy_from_slice(b);
            Some(out)
        }
        _ => None,
    }
}
