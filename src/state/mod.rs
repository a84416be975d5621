//! Address-keyed ledger state as of one block.
//!
//! [`StateSnapshot`] is built on persistent `im` maps, so cloning one is O(1)
//! and every clone is an independent copy: writes to a clone never show up in
//! the snapshot it was taken from. Each request gets its own clone.

mod overrides;

pub use overrides::{AccountOverride, StateOverride};

use alloy_primitives::{keccak256, Address, Bytes, B256, U256};
use revm::primitives::KECCAK_EMPTY;

/// Nonce, balance, code and storage of a single account.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccountState {
    pub nonce: u64,
    pub balance: U256,
    pub code: Bytes,
    pub storage: im::HashMap<U256, U256>,
}

impl AccountState {
    /// An account holding only a balance.
    pub fn with_balance(balance: U256) -> Self {
        Self {
            balance,
            ..Default::default()
        }
    }

    pub fn code_hash(&self) -> B256 {
        if self.code.is_empty() {
            KECCAK_EMPTY
        } else {
            keccak256(&self.code)
        }
    }
}

/// Copy-on-write view of every account.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StateSnapshot {
    accounts: im::HashMap<Address, AccountState>,
}

impl StateSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_accounts(accounts: impl IntoIterator<Item = (Address, AccountState)>) -> Self {
        Self {
            accounts: accounts.into_iter().collect(),
        }
    }

    pub fn account(&self, address: &Address) -> Option<&AccountState> {
        self.accounts.get(address)
    }

    pub fn exists(&self, address: &Address) -> bool {
        self.accounts.contains_key(address)
    }

    pub fn balance(&self, address: Address) -> U256 {
        self.accounts
            .get(&address)
            .map(|account| account.balance)
            .unwrap_or_default()
    }

    pub fn nonce(&self, address: Address) -> u64 {
        self.accounts
            .get(&address)
            .map(|account| account.nonce)
            .unwrap_or_default()
    }

    pub fn code(&self, address: Address) -> Bytes {
        self.accounts
            .get(&address)
            .map(|account| account.code.clone())
            .unwrap_or_default()
    }

    pub fn storage_at(&self, address: Address, slot: U256) -> U256 {
        self.accounts
            .get(&address)
            .and_then(|account| account.storage.get(&slot).copied())
            .unwrap_or_default()
    }

    /// Looks up code by hash across all accounts.
    pub fn code_by_hash(&self, code_hash: B256) -> Option<Bytes> {
        if code_hash == KECCAK_EMPTY {
            return Some(Bytes::new());
        }
        self.accounts
            .values()
            .find(|account| !account.code.is_empty() && account.code_hash() == code_hash)
            .map(|account| account.code.clone())
    }

    pub fn insert_account(&mut self, address: Address, account: AccountState) {
        self.accounts.insert(address, account);
    }

    pub fn set_nonce(&mut self, address: Address, nonce: u64) {
        self.account_mut(address).nonce = nonce;
    }

    pub fn set_balance(&mut self, address: Address, balance: U256) {
        self.account_mut(address).balance = balance;
    }

    pub fn set_code(&mut self, address: Address, code: Bytes) {
        self.account_mut(address).code = code;
    }

    /// Writes a single slot. Zero values clear the slot.
    pub fn set_storage(&mut self, address: Address, slot: U256, value: U256) {
        let storage = &mut self.account_mut(address).storage;
        if value.is_zero() {
            storage.remove(&slot);
        } else {
            storage.insert(slot, value);
        }
    }

    /// Wipes the account's storage, then writes every given slot.
    pub fn replace_storage(&mut self, address: Address, slots: impl IntoIterator<Item = (U256, U256)>) {
        self.account_mut(address).storage = im::HashMap::new();
        for (slot, value) in slots {
            self.set_storage(address, slot, value);
        }
    }

    pub fn len(&self) -> usize {
        self.accounts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Address, &AccountState)> {
        self.accounts.iter()
    }

    fn account_mut(&mut self, address: Address) -> &mut AccountState {
        self.accounts.entry(address).or_insert_with(AccountState::default)
    }
}
