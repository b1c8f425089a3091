//! Chain primitives shared across the basenode subsystem

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TypeError {
    #[error("Invalid hash hex: {0}")]
    InvalidHashHex(String),

    #[error("Invalid outpoint: {0}")]
    InvalidOutPoint(String),
}

/// 256-bit value, stored big-endian so that byte order equals numeric order.
///
/// Doubles as a hash digest and as the unsigned integer the election
/// scoring does arithmetic on.
#[derive(
    Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct Hash256(pub [u8; 32]);

impl Hash256 {
    pub const ZERO: Hash256 = Hash256([0u8; 32]);

    /// SHA-256 of arbitrary bytes
    pub fn sha256(data: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(data);
        Hash256(hasher.finalize().into())
    }

    /// SHA-256 over the concatenation of two byte slices
    pub fn sha256_concat(a: &[u8], b: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(a);
        hasher.update(b);
        Hash256(hasher.finalize().into())
    }

    pub fn from_hex(s: &str) -> Result<Self, TypeError> {
        let bytes = hex::decode(s).map_err(|_| TypeError::InvalidHashHex(s.to_string()))?;
        let arr: [u8; 32] = bytes
            .try_into()
            .map_err(|_| TypeError::InvalidHashHex(s.to_string()))?;
        Ok(Hash256(arr))
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Smallest-width embedding of a u64 into the 256-bit space
    pub fn from_u64(n: u64) -> Self {
        let mut bytes = [0u8; 32];
        bytes[24..].copy_from_slice(&n.to_be_bytes());
        Hash256(bytes)
    }

    /// Low 64 bits of the 256-bit value
    pub fn low_u64(&self) -> u64 {
        u64::from_be_bytes(self.0[24..].try_into().unwrap())
    }

    /// 256-bit addition, wrapping on overflow
    pub fn wrapping_add(&self, other: &Hash256) -> Hash256 {
        let mut out = [0u8; 32];
        let mut carry = 0u16;
        for i in (0..32).rev() {
            let sum = self.0[i] as u16 + other.0[i] as u16 + carry;
            out[i] = (sum & 0xff) as u8;
            carry = sum >> 8;
        }
        Hash256(out)
    }

    /// Magnitude of the 256-bit difference |self - other|
    pub fn abs_diff(&self, other: &Hash256) -> Hash256 {
        let (hi, lo) = if self >= other {
            (self, other)
        } else {
            (other, self)
        };
        let mut out = [0u8; 32];
        let mut borrow = 0i16;
        for i in (0..32).rev() {
            let mut diff = hi.0[i] as i16 - lo.0[i] as i16 - borrow;
            if diff < 0 {
                diff += 256;
                borrow = 1;
            } else {
                borrow = 0;
            }
            out[i] = diff as u8;
        }
        Hash256(out)
    }
}

impl fmt::Display for Hash256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for Hash256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash256({})", self.to_hex())
    }
}

/// Reference to a transaction output. The collateral outpoint is the
/// sole identity of a basenode.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Default, Serialize, Deserialize)]
pub struct OutPoint {
    pub txid: Hash256,
    pub vout: u32,
}

impl OutPoint {
    pub fn new(txid: Hash256, vout: u32) -> Self {
        OutPoint { txid, vout }
    }

    /// Parse "txid:vout"
    pub fn from_str_pair(s: &str) -> Result<Self, TypeError> {
        let (txid, vout) = s
            .rsplit_once(':')
            .ok_or_else(|| TypeError::InvalidOutPoint(s.to_string()))?;
        Ok(OutPoint {
            txid: Hash256::from_hex(txid)?,
            vout: vout
                .parse()
                .map_err(|_| TypeError::InvalidOutPoint(s.to_string()))?,
        })
    }
}

impl fmt::Display for OutPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.txid, self.vout)
    }
}

/// Spent output reference inside a transaction
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TxInput {
    pub prevout: OutPoint,
}

/// Value paid to an address
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TxOutput {
    pub address: String,
    pub value: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    pub txid: Hash256,
    pub coinbase: bool,
    pub inputs: Vec<TxInput>,
    pub outputs: Vec<TxOutput>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Block {
    pub height: u64,
    pub hash: Hash256,
    pub transactions: Vec<Transaction>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hex_round_trip() {
        let h = Hash256::sha256(b"credo");
        let parsed = Hash256::from_hex(&h.to_hex()).unwrap();
        assert_eq!(h, parsed);
    }

    #[test]
    fn test_from_u64_low_u64() {
        let h = Hash256::from_u64(0xdead_beef_cafe_f00d);
        assert_eq!(h.low_u64(), 0xdead_beef_cafe_f00d);
    }

    #[test]
    fn test_wrapping_add_carries() {
        let mut max = [0xffu8; 32];
        max[0] = 0x00;
        let a = Hash256(max);
        let one = Hash256::from_u64(1);
        let sum = a.wrapping_add(&one);
        let mut expect = [0u8; 32];
        expect[0] = 0x01;
        assert_eq!(sum, Hash256(expect));
    }

    #[test]
    fn test_abs_diff_symmetric() {
        let a = Hash256::sha256(b"a");
        let b = Hash256::sha256(b"b");
        assert_eq!(a.abs_diff(&b), b.abs_diff(&a));
        assert_eq!(a.abs_diff(&a), Hash256::ZERO);
    }

    #[test]
    fn test_abs_diff_small_numbers() {
        let a = Hash256::from_u64(1000);
        let b = Hash256::from_u64(300);
        assert_eq!(a.abs_diff(&b).low_u64(), 700);
    }

    #[test]
    fn test_outpoint_display_parse() {
        let op = OutPoint::new(Hash256::sha256(b"tx"), 3);
        let parsed = OutPoint::from_str_pair(&op.to_string()).unwrap();
        assert_eq!(op, parsed);
    }
}
