//! Request and chain data types shared across the query pipeline.

use std::fmt;
use std::str::FromStr;

use alloy_consensus::{Header, Transaction, TxEnvelope};
use alloy_primitives::{Address, Bytes, Log, TxKind, B256, U256};
use serde::{Deserialize, Deserializer};
use tracing::warn;

use crate::error::ApiError;
use crate::executor::{FeeFields, MessageContext};

// ============================================================================
// Block References
// ============================================================================

/// A block height or one of the height tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum BlockNumber {
    /// The current chain head.
    #[default]
    Latest,
    /// The pending block. Served from the current head.
    Pending,
    /// The genesis block.
    Earliest,
    /// A concrete height.
    Number(u64),
}

impl FromStr for BlockNumber {
    type Err = ApiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "latest" => Ok(BlockNumber::Latest),
            "pending" => Ok(BlockNumber::Pending),
            "earliest" => Ok(BlockNumber::Earliest),
            other => {
                let digits = other
                    .strip_prefix("0x")
                    .ok_or_else(|| ApiError::InvalidParams(format!("invalid block number {other:?}")))?;
                u64::from_str_radix(digits, 16)
                    .map(BlockNumber::Number)
                    .map_err(|err| ApiError::InvalidParams(format!("invalid block number {other:?}: {err}")))
            }
        }
    }
}

impl fmt::Display for BlockNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlockNumber::Latest => f.write_str("latest"),
            BlockNumber::Pending => f.write_str("pending"),
            BlockNumber::Earliest => f.write_str("earliest"),
            BlockNumber::Number(n) => write!(f, "{n:#x}"),
        }
    }
}

impl<'de> Deserialize<'de> for BlockNumber {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Either a block number (or tag) or a block hash.
///
/// The enum cannot hold both arms. Requests that name both, or neither, are
/// rejected while deserializing with [`ApiError::AmbiguousReference`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(try_from = "RawReference")]
pub enum BlockReference {
    Number(BlockNumber),
    Hash {
        hash: B256,
        require_canonical: bool,
    },
}

impl BlockReference {
    pub const fn latest() -> Self {
        BlockReference::Number(BlockNumber::Latest)
    }

    pub const fn pending() -> Self {
        BlockReference::Number(BlockNumber::Pending)
    }

    pub const fn number(number: u64) -> Self {
        BlockReference::Number(BlockNumber::Number(number))
    }

    pub const fn hash(hash: B256) -> Self {
        BlockReference::Hash {
            hash,
            require_canonical: false,
        }
    }

    pub const fn canonical_hash(hash: B256) -> Self {
        BlockReference::Hash {
            hash,
            require_canonical: true,
        }
    }

    /// Returns true for the `pending` tag.
    pub fn is_pending(&self) -> bool {
        matches!(self, BlockReference::Number(BlockNumber::Pending))
    }
}

impl Default for BlockReference {
    fn default() -> Self {
        Self::latest()
    }
}

impl From<BlockNumber> for BlockReference {
    fn from(number: BlockNumber) -> Self {
        BlockReference::Number(number)
    }
}

impl From<B256> for BlockReference {
    fn from(hash: B256) -> Self {
        BlockReference::hash(hash)
    }
}

impl fmt::Display for BlockReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlockReference::Number(number) => number.fmt(f),
            BlockReference::Hash { hash, .. } => write!(f, "{hash}"),
        }
    }
}

impl FromStr for BlockReference {
    type Err = ApiError;

    /// Parses a tag, a hex height, or a 32-byte hex hash.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.len() == 66 && s.starts_with("0x") {
            let hash = B256::from_str(s)
                .map_err(|err| ApiError::InvalidParams(format!("invalid block hash {s:?}: {err}")))?;
            return Ok(BlockReference::hash(hash));
        }
        s.parse().map(BlockReference::Number)
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawReference {
    Text(String),
    Object(RawReferenceObject),
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawReferenceObject {
    #[serde(default)]
    block_number: Option<BlockNumber>,
    #[serde(default)]
    block_hash: Option<B256>,
    #[serde(default)]
    require_canonical: bool,
}

impl TryFrom<RawReference> for BlockReference {
    type Error = ApiError;

    fn try_from(raw: RawReference) -> Result<Self, Self::Error> {
        match raw {
            RawReference::Text(text) => text.parse(),
            RawReference::Object(object) => match (object.block_number, object.block_hash) {
                (Some(number), None) => Ok(BlockReference::Number(number)),
                (None, Some(hash)) => Ok(BlockReference::Hash {
                    hash,
                    require_canonical: object.require_canonical,
                }),
                _ => Err(ApiError::AmbiguousReference),
            },
        }
    }
}

// ============================================================================
// Call Messages
// ============================================================================

/// Arguments for `call`, `estimate_gas` and `send_transaction`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallMessage {
    #[serde(default)]
    pub from: Option<Address>,
    #[serde(default)]
    pub to: Option<Address>,
    #[serde(default, with = "alloy_serde::quantity::opt")]
    pub gas: Option<u64>,
    #[serde(default, with = "alloy_serde::quantity::opt")]
    pub gas_price: Option<u128>,
    #[serde(default, with = "alloy_serde::quantity::opt")]
    pub max_fee_per_gas: Option<u128>,
    #[serde(default, with = "alloy_serde::quantity::opt")]
    pub max_priority_fee_per_gas: Option<u128>,
    #[serde(default)]
    pub value: Option<U256>,
    #[serde(default, alias = "data")]
    pub input: Option<Bytes>,
    #[serde(default, with = "alloy_serde::quantity::opt")]
    pub nonce: Option<u64>,
}

impl CallMessage {
    /// Sender, defaulting to the zero address.
    pub fn sender(&self) -> Address {
        self.from.unwrap_or(Address::ZERO)
    }

    /// Rejects messages that mix legacy and fee-market pricing.
    pub fn check_fee_fields(&self) -> Result<(), ApiError> {
        if self.gas_price.is_some()
            && (self.max_fee_per_gas.is_some() || self.max_priority_fee_per_gas.is_some())
        {
            return Err(ApiError::ConflictingFeeFields);
        }
        Ok(())
    }

    /// Highest price per gas the sender may be charged: `gasPrice`, else
    /// `maxFeePerGas`, else zero.
    pub fn fee_cap(&self) -> Result<u128, ApiError> {
        self.check_fee_fields()?;
        Ok(self.gas_price.or(self.max_fee_per_gas).unwrap_or_default())
    }

    /// Returns a copy with the gas limit replaced.
    pub fn with_gas(&self, gas: u64) -> Self {
        Self {
            gas: Some(gas),
            ..self.clone()
        }
    }

    /// Builds the execution message.
    ///
    /// Gas defaults to `gas_cap`, or `u64::MAX / 2` without a cap, and a
    /// nonzero cap always bounds it.
    pub fn to_message_context(&self, gas_cap: u64) -> Result<MessageContext, ApiError> {
        self.check_fee_fields()?;
        let fees = match (self.gas_price, self.max_fee_per_gas, self.max_priority_fee_per_gas) {
            (Some(gas_price), _, _) => FeeFields::Legacy { gas_price },
            (None, None, None) => FeeFields::Legacy { gas_price: 0 },
            (None, max_fee, max_priority_fee) => FeeFields::Dynamic {
                max_fee_per_gas: max_fee.unwrap_or_default(),
                max_priority_fee_per_gas: max_priority_fee.unwrap_or_default(),
            },
        };

        let mut gas = self
            .gas
            .unwrap_or(if gas_cap != 0 { gas_cap } else { u64::MAX / 2 });
        if gas_cap != 0 && gas_cap < gas {
            warn!(requested = gas, cap = gas_cap, "Caller gas above allowance, capping");
            gas = gas_cap;
        }

        Ok(MessageContext {
            caller: self.sender(),
            to: self.to,
            value: self.value.unwrap_or_default(),
            input: self.input.clone().unwrap_or_default(),
            gas_limit: gas,
            fees,
            nonce: self.nonce,
        })
    }
}

// ============================================================================
// Chain Data
// ============================================================================

/// A header together with its hash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SealedHeader {
    header: Header,
    hash: B256,
}

impl SealedHeader {
    /// Hashes and seals the header.
    pub fn seal(header: Header) -> Self {
        let hash = header.hash_slow();
        Self { header, hash }
    }

    pub fn hash(&self) -> B256 {
        self.hash
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    pub fn number(&self) -> u64 {
        self.header.number
    }

    pub fn parent_hash(&self) -> B256 {
        self.header.parent_hash
    }

    pub fn gas_limit(&self) -> u64 {
        self.header.gas_limit
    }

    pub fn base_fee(&self) -> Option<u64> {
        self.header.base_fee_per_gas
    }

    pub fn timestamp(&self) -> u64 {
        self.header.timestamp
    }

    /// An unsealed child header: next height, same gas limit and base fee,
    /// twelve seconds later.
    pub fn child(&self) -> Header {
        Header {
            parent_hash: self.hash,
            number: self.number() + 1,
            gas_limit: self.gas_limit(),
            base_fee_per_gas: self.base_fee(),
            timestamp: self.timestamp() + 12,
            beneficiary: self.header.beneficiary,
            ..Default::default()
        }
    }
}

/// A transaction paired with its recovered sender.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecoveredTx {
    envelope: TxEnvelope,
    sender: Address,
}

impl RecoveredTx {
    pub fn new(envelope: TxEnvelope, sender: Address) -> Self {
        Self { envelope, sender }
    }

    pub fn hash(&self) -> B256 {
        *self.envelope.tx_hash()
    }

    pub fn sender(&self) -> Address {
        self.sender
    }

    pub fn envelope(&self) -> &TxEnvelope {
        &self.envelope
    }

    pub fn nonce(&self) -> u64 {
        self.envelope.nonce()
    }

    pub fn gas_limit(&self) -> u64 {
        self.envelope.gas_limit()
    }

    pub fn value(&self) -> U256 {
        self.envelope.value()
    }

    /// Recipient, `None` for contract creation.
    pub fn to(&self) -> Option<Address> {
        match self.envelope.kind() {
            TxKind::Call(to) => Some(to),
            TxKind::Create => None,
        }
    }

    /// Gas price for legacy transactions, max fee for fee-market ones.
    pub fn max_fee_per_gas(&self) -> u128 {
        self.envelope.max_fee_per_gas()
    }

    /// Price actually paid per gas in a block with the given base fee.
    ///
    /// With a base fee this is the base fee plus the effective tip. Blocks
    /// without one charge the legacy gas price.
    pub fn effective_gas_price(&self, base_fee: Option<u64>) -> u128 {
        match base_fee {
            Some(base_fee) => {
                u128::from(base_fee) + self.envelope.effective_tip_per_gas(base_fee).unwrap_or_default()
            }
            None => self
                .envelope
                .gas_price()
                .unwrap_or_else(|| self.envelope.max_fee_per_gas()),
        }
    }
}

/// A block body with recovered transactions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub header: SealedHeader,
    pub transactions: Vec<RecoveredTx>,
}

/// Execution receipt as persisted by the chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredReceipt {
    pub success: bool,
    pub gas_used: u64,
    pub cumulative_gas_used: u64,
    pub contract_address: Option<Address>,
    pub logs: Vec<Log>,
}

/// Position of a mined transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TxLocation {
    pub block_hash: B256,
    pub block_number: u64,
    pub index: u64,
}
