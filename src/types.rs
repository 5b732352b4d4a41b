//! Decoded chain records shared by the sources and the SLA engine

use primitive_types::U256;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Block number on the monitored chain
pub type BlockHeight = u64;

/// Amount promised for a fulfillment, in the token's base unit (wei-style, 18 decimals)
pub type Payment = U256;

/// Fixed-size opaque byte identifier rendered as `0x`-prefixed lowercase hex
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FixedBytes<const N: usize>(pub [u8; N]);

/// Contract or account address (20 bytes)
pub type Address = FixedBytes<20>;

/// 32-byte word used for request ids and spec ids
pub type Bytes32 = FixedBytes<32>;

pub type RequestId = Bytes32;
pub type SpecId = Bytes32;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseBytesError {
    InvalidHex(String),
    InvalidLength { expected: usize, got: usize },
}

impl fmt::Display for ParseBytesError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseBytesError::InvalidHex(msg) => write!(f, "Invalid hex: {}", msg),
            ParseBytesError::InvalidLength { expected, got } => {
                write!(f, "Expected {} bytes, got {}", expected, got)
            }
        }
    }
}

impl std::error::Error for ParseBytesError {}

impl<const N: usize> FixedBytes<N> {
    pub const fn zero() -> Self {
        Self([0u8; N])
    }

    pub fn as_bytes(&self) -> &[u8; N] {
        &self.0
    }

    /// Metric label form: printable ASCII text when the bytes hold one (trailing NULs
    /// trimmed), hex otherwise.
    pub fn to_label(&self) -> String {
        let end = self.0.iter().rposition(|b| *b != 0).map_or(0, |i| i + 1);
        let text = &self.0[..end];

        if !text.is_empty() && text.iter().all(|b| b.is_ascii_graphic()) {
            String::from_utf8_lossy(text).into_owned()
        } else {
            self.to_string()
        }
    }
}

impl<const N: usize> Default for FixedBytes<N> {
    fn default() -> Self {
        Self::zero()
    }
}

impl<const N: usize> From<[u8; N]> for FixedBytes<N> {
    fn from(bytes: [u8; N]) -> Self {
        Self(bytes)
    }
}

impl<const N: usize> FromStr for FixedBytes<N> {
    type Err = ParseBytesError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let digits = trimmed
            .strip_prefix("0x")
            .or_else(|| trimmed.strip_prefix("0X"))
            .unwrap_or(trimmed);

        let decoded = hex::decode(digits).map_err(|e| ParseBytesError::InvalidHex(e.to_string()))?;
        let bytes: [u8; N] = decoded
            .as_slice()
            .try_into()
            .map_err(|_| ParseBytesError::InvalidLength {
                expected: N,
                got: decoded.len(),
            })?;

        Ok(Self(bytes))
    }
}

impl<const N: usize> fmt::Display for FixedBytes<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl<const N: usize> fmt::Debug for FixedBytes<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl<const N: usize> Serialize for FixedBytes<N> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de, const N: usize> Deserialize<'de> for FixedBytes<N> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// New block header (only the height matters here)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    pub number: BlockHeight,
}

/// `OracleRequest` event emitted by the oracle contract
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestEvent {
    pub request_id: RequestId,
    pub requester: Address,
    pub spec_id: SpecId,
    pub payment: Payment,
    pub block_number: BlockHeight,
}

/// `ChainlinkFulfilled` event emitted by an aggregator contract
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FulfillmentEvent {
    pub request_id: RequestId,
    pub block_number: BlockHeight,
}

/// One outstanding request waiting for its fulfillment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingJob {
    pub request_id: RequestId,
    pub requester: Address,
    pub spec_id: SpecId,
    pub payment: Payment,
    pub request_height: BlockHeight,
}

impl From<&RequestEvent> for PendingJob {
    fn from(event: &RequestEvent) -> Self {
        Self {
            request_id: event.request_id,
            requester: event.requester,
            spec_id: event.spec_id,
            payment: event.payment,
            request_height: event.block_number,
        }
    }
}

const WEI_PER_ETHER: f64 = 1e18;

/// Converts an 18-decimal base-unit amount to whole tokens (lossy above 2^53)
pub fn wei_to_ether(amount: U256) -> f64 {
    let wei = amount
        .0
        .iter()
        .rev()
        .fold(0f64, |acc, limb| acc * 18_446_744_073_709_551_616f64 + *limb as f64);
    wei / WEI_PER_ETHER
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_roundtrips_through_text() {
        let addr: Address = "0x514910771AF9Ca656af840dff83E8264EcF986CA".parse().unwrap();
        assert_eq!(addr.to_string(), "0x514910771af9ca656af840dff83e8264ecf986ca");

        let no_prefix: Address = "514910771af9ca656af840dff83e8264ecf986ca".parse().unwrap();
        assert_eq!(addr, no_prefix);
    }

    #[test]
    fn test_rejects_wrong_length_and_bad_hex() {
        assert_eq!(
            "0xabcd".parse::<Address>(),
            Err(ParseBytesError::InvalidLength { expected: 20, got: 2 })
        );
        assert!(matches!(
            "0xzz".parse::<Bytes32>(),
            Err(ParseBytesError::InvalidHex(_))
        ));
    }

    #[test]
    fn test_spec_id_label() {
        let mut raw = [0u8; 32];
        raw[..6].copy_from_slice(b"abc123");
        assert_eq!(SpecId::from(raw).to_label(), "abc123");

        let binary = SpecId::from([0xffu8; 32]);
        assert_eq!(binary.to_label(), format!("0x{}", "ff".repeat(32)));

        assert_eq!(SpecId::zero().to_label(), format!("0x{}", "00".repeat(32)));
    }

    #[test]
    fn test_request_event_json() {
        let line = r#"{"request_id":"0x00000000000000000000000000000000000000000000000000000000000000aa","requester":"0x1111111111111111111111111111111111111111","spec_id":"0x3461336334643866616562306134636262363338613939363565656232643035","payment":"0xde0b6b3a7640000","block_number":10}"#;
        let event: RequestEvent = serde_json::from_str(line).unwrap();

        assert_eq!(event.block_number, 10);
        assert_eq!(event.request_id.0[31], 0xaa);
        assert_eq!(event.payment, U256::exp10(18));
        assert_eq!(event.spec_id.to_label(), "4a3c4d8faeb0a4cbb638a9965eeb2d05");
    }

    #[test]
    fn test_wei_to_ether() {
        assert_eq!(wei_to_ether(U256::exp10(18)), 1.0);
        assert_eq!(wei_to_ether(U256::from(5u64) * U256::exp10(17)), 0.5);
        assert_eq!(wei_to_ether(U256::zero()), 0.0);
        // beyond u64 range
        let big = U256::from(100u64) * U256::exp10(18);
        assert_eq!(wei_to_ether(big), 100.0);
    }
}
