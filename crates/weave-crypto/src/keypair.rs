use pqcrypto_dilithium::dilithium2;
use pqcrypto_traits::sign::{PublicKey, SecretKey};
use serde::{Deserialize, Serialize};
use weave_core::ids::{Address, DilithiumPublicKey};
use zeroize::Zeroizing;

use crate::canonical::chash160;

/// A Weave keypair: Dilithium2 public + secret keys, with the address derived
/// from a trivial single-sig definition over the public key.
#[derive(Serialize, Deserialize)]
pub struct KeyPair {
    pub address: Address,
    pub public_key: DilithiumPublicKey,
    secret_key: Vec<u8>,
}

impl KeyPair {
    /// Generate a fresh Dilithium2 keypair and derive its single-sig address.
    pub fn generate() -> Self {
        let (pk, sk) = dilithium2::keypair();
        let pk_bytes = pk.as_bytes().to_vec();
        let definition = single_sig_definition(&pk_bytes);
        let address = chash160(&definition).expect("single-sig definition is well-formed");
        Self {
            address,
            public_key: DilithiumPublicKey(pk_bytes),
            secret_key: sk.as_bytes().to_vec(),
        }
    }

    pub fn sign(&self, message: &[u8]) -> weave_core::ids::DilithiumSignature {
        let sk = Zeroizing::new(self.secret_key.clone());
        crate::dilithium::sign(&sk, message).expect("sign with valid secret key is infallible")
    }

    pub fn secret_key_bytes(&self) -> &[u8] {
        &self.secret_key
    }

    pub fn from_raw(pk_bytes: Vec<u8>, sk_bytes: Vec<u8>) -> Self {
        let definition = single_sig_definition(&pk_bytes);
        let address = chash160(&definition).expect("single-sig definition is well-formed");
        Self {
            address,
            public_key: DilithiumPublicKey(pk_bytes),
            secret_key: sk_bytes,
        }
    }

    pub fn definition(&self) -> serde_json::Value {
        single_sig_definition(&self.public_key.0)
    }
}

/// The canonical `["sig", {pubkey}]` single-signature definition tree.
pub fn single_sig_definition(pubkey_bytes: &[u8]) -> serde_json::Value {
    serde_json::json!(["sig", {"pubkey": hex::encode(pubkey_bytes)}])
}

impl Drop for KeyPair {
    fn drop(&mut self) {
        use zeroize::Zeroize;
        self.secret_key.zeroize();
    }
}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "KeyPair {{ address: {:?} }}", self.address)
    }
}
