//! Deterministic development identities.
//!
//! Every identity is the dev phrase with a single hard junction (`//Alice`,
//! `//Bob`, ...), the same derivation the node applies to its `--alice` style
//! flags and to `author_insertKey` URIs. Keys therefore match the chain's
//! endowed and sudo accounts.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use blake2::digest::consts::U32;
use bip39::{Language, Mnemonic};
use blake2::{Blake2b, Blake2b512, Digest};
use parking_lot::RwLock;
use schnorrkel::derive::ChainCode;
use schnorrkel::keys::{ExpansionMode, Keypair, PublicKey};
use schnorrkel::Signature;
use substrate_bip39::mini_secret_from_entropy;
use tracing::debug;

use crate::errors::{HarnessError, HarnessResult};

/// Names of the development seeds, in topology order.
pub const PREDEFINED_IDENTITIES: [&str; 6] = ["alice", "bob", "charlie", "dave", "eve", "ferdie"];

pub const SS58_PREFIX: u8 = 42;
const SIGNING_CONTEXT: &[u8] = b"substrate";
const SS58_CHECKSUM_PREFIX: &[u8] = b"SS58PRE";

/// Root phrase of the development accounts.
pub const DEV_PHRASE: &str =
    "bottom drive obey lake curtain smoke basket hold race lonely fit walk";
const CHAIN_CODE_LENGTH: usize = 32;

type Blake2b256 = Blake2b<U32>;

pub struct Identity {
    name: String,
    seed: String,
    keypair: Keypair,
    address: String,
}

impl Identity {
    fn derive(canonical: &str) -> HarnessResult<Self> {
        let name = title_case(canonical);
        let seed = format!("//{name}");
        let keypair = dev_keypair(&name)?;
        let address = ss58_address(&keypair.public, SS58_PREFIX);
        Ok(Self {
            name,
            seed,
            keypair,
            address,
        })
    }

    /// Display name, e.g. `Alice`.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Node CLI flag form, e.g. `alice`.
    pub fn flag(&self) -> String {
        self.name.to_ascii_lowercase()
    }

    /// Secret URI the node keystore derives the same key from.
    pub fn seed(&self) -> &str {
        &self.seed
    }

    pub fn public_key(&self) -> [u8; 32] {
        self.keypair.public.to_bytes()
    }

    pub fn public_key_hex(&self) -> String {
        hex::encode(self.public_key())
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn sign(&self, payload: &[u8]) -> Signature {
        self.keypair.sign_simple(SIGNING_CONTEXT, payload)
    }

    pub fn verify(&self, payload: &[u8], signature: &Signature) -> bool {
        self.keypair
            .public
            .verify_simple(SIGNING_CONTEXT, payload, signature)
            .is_ok()
    }
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Identity")
            .field("name", &self.name)
            .field("address", &self.address)
            .finish()
    }
}

/// Name-keyed registry of development identities. Derivation happens once
/// per name; later lookups return the cached identity.
#[derive(Debug, Default)]
pub struct IdentityProvider {
    cache: RwLock<HashMap<String, Arc<Identity>>>,
}

impl IdentityProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn names(&self) -> &'static [&'static str] {
        &PREDEFINED_IDENTITIES
    }

    pub fn resolve(&self, name: &str) -> HarnessResult<Arc<Identity>> {
        let canonical = canonical_name(name).ok_or_else(|| HarnessError::UnknownIdentity {
            name: name.to_string(),
            known: PREDEFINED_IDENTITIES.iter().map(|n| title_case(n)).collect(),
        })?;

        if let Some(identity) = self.cache.read().get(canonical) {
            return Ok(Arc::clone(identity));
        }

        let mut cache = self.cache.write();
        if let Some(identity) = cache.get(canonical) {
            return Ok(Arc::clone(identity));
        }
        let identity = Arc::new(Identity::derive(canonical)?);
        debug!(
            target = "chain_harness::identity",
            name = identity.name(),
            address = identity.address(),
            "derived identity"
        );
        cache.insert(canonical.to_string(), Arc::clone(&identity));
        Ok(identity)
    }
}

/// Derives `DEV_PHRASE//<junction>`.
fn dev_keypair(junction: &str) -> HarnessResult<Keypair> {
    let mnemonic = Mnemonic::parse_in_normalized(Language::English, DEV_PHRASE)
        .map_err(|err| HarnessError::Config(format!("invalid dev phrase: {err}")))?;
    let root = mini_secret_from_entropy(&mnemonic.to_entropy(), "")
        .map_err(|err| HarnessError::Config(format!("invalid dev entropy: {err:?}")))?
        .expand(ExpansionMode::Ed25519);
    let (derived, _) = root.hard_derive_mini_secret_key(Some(junction_chain_code(junction)), b"");
    Ok(derived.expand_to_keypair(ExpansionMode::Ed25519))
}

/// Chain code of a textual junction: its SCALE encoding, zero padded, or
/// hashed when longer than a chain code.
fn junction_chain_code(junction: &str) -> ChainCode {
    let mut encoded = compact_length(junction.len());
    encoded.extend_from_slice(junction.as_bytes());

    let mut code = [0u8; CHAIN_CODE_LENGTH];
    if encoded.len() > CHAIN_CODE_LENGTH {
        code.copy_from_slice(&Blake2b256::digest(&encoded));
    } else {
        code[..encoded.len()].copy_from_slice(&encoded);
    }
    ChainCode(code)
}

fn compact_length(len: usize) -> Vec<u8> {
    match len {
        0..=0x3f => vec![(len as u8) << 2],
        0x40..=0x3fff => ((len as u16) << 2 | 0b01).to_le_bytes().to_vec(),
        _ => ((len as u32) << 2 | 0b10).to_le_bytes().to_vec(),
    }
}

fn canonical_name(name: &str) -> Option<&'static str> {
    let lowered = name.trim().to_ascii_lowercase();
    PREDEFINED_IDENTITIES
        .iter()
        .copied()
        .find(|candidate| *candidate == lowered)
}

fn title_case(name: &str) -> String {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
        None => String::new(),
    }
}

pub fn ss58_address(public_key: &PublicKey, prefix: u8) -> String {
    let mut payload = Vec::with_capacity(35);
    payload.push(prefix);
    payload.extend_from_slice(&public_key.to_bytes());
    let checksum = Blake2b512::new()
        .chain_update(SS58_CHECKSUM_PREFIX)
        .chain_update(&payload)
        .finalize();
    payload.extend_from_slice(&checksum[..2]);
    bs58::encode(payload).into_string()
}

pub fn signature_to_hex(signature: &Signature) -> String {
    hex::encode(signature.to_bytes())
}
