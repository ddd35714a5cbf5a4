pub mod canonical;
pub mod definition;
pub mod dilithium;
pub mod hash;
pub mod keypair;

pub use canonical::{ball_hash, canonical_bytes, chash160, unit_hash, CanonicalError};
pub use definition::{verify_author, DefinitionEvaluator, DefinitionError};
pub use dilithium::{verify_signature, WeaveSigner};
pub use hash::{blake3_hash, sha1, sha256, unit_hash_from_bytes};
pub use keypair::{single_sig_definition, KeyPair};
