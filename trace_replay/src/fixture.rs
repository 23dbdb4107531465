//! The replay unit: block environment, pre-state and transaction, laid out
//! like an Ethereum state test.

use ethereum_types::{Address, H256, U256};
use keccak_hash::keccak;
use rlp::RlpStream;
use serde::{Deserialize, Serialize};

use crate::error::StateError;
use crate::prestate::{Participants, PreState, Target};

/// Byte strings as `0x`-prefixed hex.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(transparent)]
pub struct Bytes(#[serde(with = "evm_replay_common::hex")] pub Vec<u8>);

/// The block the transaction executes in.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockEnv {
    pub current_coinbase: Address,
    pub current_gas_limit: U256,
    pub current_number: U256,
    pub current_timestamp: U256,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_base_fee: Option<U256>,
    #[serde(default)]
    pub current_difficulty: U256,
    #[serde(default)]
    pub current_random: H256,
    #[serde(default)]
    pub previous_hash: H256,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessListItem {
    pub address: Address,
    #[serde(default)]
    pub storage_keys: Vec<H256>,
}

/// Transaction metadata as fetched from a node.
///
/// The RPC spellings (`from`, `input`, `gas`) are accepted too.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TxMeta {
    #[serde(alias = "from")]
    pub sender: Address,
    /// [`None`] for contract creation.
    #[serde(default)]
    pub to: Option<Address>,
    #[serde(default, alias = "input")]
    pub data: Bytes,
    #[serde(alias = "gas")]
    pub gas_limit: U256,
    #[serde(default)]
    pub gas_price: U256,
    #[serde(default)]
    pub value: U256,
    #[serde(default)]
    pub nonce: U256,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub access_list: Vec<AccessListItem>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub blob_versioned_hashes: Vec<H256>,
}

impl TxMeta {
    /// The address a creation deploys to, `keccak(rlp([sender, nonce]))[12..]`.
    pub fn created_address(&self) -> Option<Address> {
        match self.to {
            Some(_) => None,
            None => Some(self.deployment_address()),
        }
    }

    fn deployment_address(&self) -> Address {
        let mut stream = RlpStream::new_list(2);
        stream.append(&self.sender);
        stream.append(&self.nonce);
        Address::from(keccak(stream.out()))
    }

    pub fn target(&self) -> Target {
        match self.to {
            Some(to) => Target::Call(to),
            None => Target::Create(self.deployment_address()),
        }
    }

    pub fn participants(&self, coinbase: Option<Address>) -> Participants {
        Participants {
            sender: self.sender,
            target: self.target(),
            coinbase,
        }
    }

    /// Access lists and blobs change gas accounting and validity in ways the
    /// fixture cannot express.
    pub fn check_supported(&self) -> Result<(), StateError> {
        if !self.access_list.is_empty() {
            return Err(StateError::UnsupportedFeature(format!(
                "access list with {} entries",
                self.access_list.len()
            )));
        }
        if !self.blob_versioned_hashes.is_empty() {
            return Err(StateError::UnsupportedFeature(String::from(
                "blob transaction",
            )));
        }
        Ok(())
    }
}

/// The `transaction` section of a state test. Indexed fields carry a single
/// entry.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FixtureTransaction {
    pub data: Vec<Bytes>,
    pub gas_limit: Vec<U256>,
    pub gas_price: U256,
    pub nonce: U256,
    pub sender: Address,
    #[serde(with = "recipient")]
    pub to: Option<Address>,
    pub value: Vec<U256>,
}

impl From<&TxMeta> for FixtureTransaction {
    fn from(meta: &TxMeta) -> Self {
        Self {
            data: vec![meta.data.clone()],
            gas_limit: vec![meta.gas_limit],
            gas_price: meta.gas_price,
            nonce: meta.nonce,
            sender: meta.sender,
            to: meta.to,
            value: vec![meta.value],
        }
    }
}

/// An empty string marks a creation.
mod recipient {
    use ethereum_types::Address;
    use serde::{de::Error as _, Deserialize as _, Deserializer, Serialize as _, Serializer};

    pub fn serialize<S: Serializer>(to: &Option<Address>, s: S) -> Result<S::Ok, S::Error> {
        match to {
            Some(it) => it.serialize(s),
            None => s.serialize_str(""),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Address>, D::Error> {
        let s = String::deserialize(d)?;
        match s.as_str() {
            "" | "0x" => Ok(None),
            _ => s
                .strip_prefix("0x")
                .unwrap_or(&s)
                .parse()
                .map(Some)
                .map_err(D::Error::custom),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct ReplayFixture {
    pub env: BlockEnv,
    pub pre: PreState,
    pub transaction: FixtureTransaction,
}

impl ReplayFixture {
    pub fn assemble(env: BlockEnv, pre: PreState, meta: &TxMeta) -> Result<Self, StateError> {
        meta.check_supported()?;
        Ok(Self {
            env,
            pre,
            transaction: meta.into(),
        })
    }
}
