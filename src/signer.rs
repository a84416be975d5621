//! Local accounts and transaction signing.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use alloy_consensus::{SignableTransaction, TxEip1559, TxEnvelope, TxLegacy};
use alloy_primitives::{keccak256, Address, Signature, B256};
use k256::ecdsa::{SigningKey, VerifyingKey};
use rand::{rngs::StdRng, Rng, SeedableRng};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SignerError {
    #[error("unknown account {0}")]
    UnknownAccount(Address),
    #[error("invalid signing key: {0}")]
    InvalidKey(String),
    #[error("signing failed: {0}")]
    Signing(String),
}

/// A transaction body waiting for a signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnsignedTx {
    Legacy(TxLegacy),
    Eip1559(TxEip1559),
}

/// Something that holds a key and can sign with it.
pub trait Wallet: Send + Sync {
    fn address(&self) -> Address;

    /// Sets `chain_id` on the body, signs it and wraps it in an envelope.
    fn sign_transaction(&self, tx: UnsignedTx, chain_id: u64) -> Result<TxEnvelope, SignerError>;
}

/// Lookup of wallets by address.
pub trait AccountManager: Send + Sync {
    fn accounts(&self) -> Vec<Address>;

    fn find(&self, address: Address) -> Result<Arc<dyn Wallet>, SignerError>;
}

// ============================================================================
// Local Wallet
// ============================================================================

/// A secp256k1 key held in memory.
#[derive(Clone)]
pub struct LocalWallet {
    signing_key: SigningKey,
    address: Address,
}

impl LocalWallet {
    /// Creates a wallet from a signing key.
    pub fn from_signing_key(signing_key: SigningKey) -> Self {
        let verifying_key = VerifyingKey::from(&signing_key);
        let address = public_key_to_address(&verifying_key);
        Self { signing_key, address }
    }

    /// Creates a wallet from raw secret key bytes.
    pub fn from_bytes(secret: &B256) -> Result<Self, SignerError> {
        let signing_key =
            SigningKey::from_slice(secret.as_slice()).map_err(|err| SignerError::InvalidKey(err.to_string()))?;
        Ok(Self::from_signing_key(signing_key))
    }

    /// Derives a deterministic wallet from a seed.
    ///
    /// Draws fresh bytes until they form a valid scalar, which in practice
    /// happens on the first try.
    pub fn from_seed(seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        loop {
            let mut key_bytes = [0u8; 32];
            rng.fill(&mut key_bytes);
            if let Ok(signing_key) = SigningKey::from_slice(&key_bytes) {
                return Self::from_signing_key(signing_key);
            }
        }
    }

    fn sign_hash(&self, hash: B256) -> Result<Signature, SignerError> {
        let (signature, recovery_id) = self
            .signing_key
            .sign_prehash_recoverable(hash.as_slice())
            .map_err(|err| SignerError::Signing(err.to_string()))?;
        Ok(Signature::from_signature_and_parity(signature, recovery_id.is_y_odd()))
    }
}

impl Wallet for LocalWallet {
    fn address(&self) -> Address {
        self.address
    }

    fn sign_transaction(&self, tx: UnsignedTx, chain_id: u64) -> Result<TxEnvelope, SignerError> {
        match tx {
            UnsignedTx::Legacy(mut tx) => {
                tx.chain_id = Some(chain_id);
                let signature = self.sign_hash(tx.signature_hash())?;
                Ok(TxEnvelope::Legacy(tx.into_signed(signature)))
            }
            UnsignedTx::Eip1559(mut tx) => {
                tx.chain_id = chain_id;
                let signature = self.sign_hash(tx.signature_hash())?;
                Ok(TxEnvelope::Eip1559(tx.into_signed(signature)))
            }
        }
    }
}

impl fmt::Debug for LocalWallet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalWallet")
            .field("address", &self.address)
            .finish()
    }
}

/// Derives an Ethereum address from a secp256k1 public key.
fn public_key_to_address(verifying_key: &VerifyingKey) -> Address {
    let public_key = verifying_key.to_encoded_point(false);
    // Skip the 0x04 prefix byte, hash the rest.
    let hash = keccak256(&public_key.as_bytes()[1..]);
    Address::from_slice(&hash[12..])
}

// ============================================================================
// Keystore
// ============================================================================

/// In-memory [`AccountManager`].
#[derive(Debug, Default, Clone)]
pub struct Keystore {
    wallets: BTreeMap<Address, Arc<LocalWallet>>,
}

impl Keystore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, wallet: LocalWallet) -> Address {
        let address = wallet.address();
        self.wallets.insert(address, Arc::new(wallet));
        address
    }
}

impl FromIterator<LocalWallet> for Keystore {
    fn from_iter<I: IntoIterator<Item = LocalWallet>>(iter: I) -> Self {
        let mut keystore = Keystore::new();
        for wallet in iter {
            keystore.insert(wallet);
        }
        keystore
    }
}

impl AccountManager for Keystore {
    fn accounts(&self) -> Vec<Address> {
        self.wallets.keys().copied().collect()
    }

    fn find(&self, address: Address) -> Result<Arc<dyn Wallet>, SignerError> {
        self.wallets
            .get(&address)
            .map(|wallet| Arc::clone(wallet) as Arc<dyn Wallet>)
            .ok_or(SignerError::UnknownAccount(address))
    }
}
