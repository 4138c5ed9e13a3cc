use base64::{engine::general_purpose::STANDARD, Engine};
use solana_sdk::{
    signature::{Keypair, Signature},
    signer::Signer,
};

use crate::errors::IdentityError;

/// The session's signing capability.
///
/// Either call may come back empty when no wallet is attached; callers treat
/// that as a precondition failure rather than something to retry.
pub trait Identity: Send + Sync {
    fn pubkey(&self) -> Option<[u8; 32]>;

    fn sign(&self, message: &[u8]) -> Option<Signature>;

    /// Base58 text of the signature over `message`.
    fn sign_text(&self, message: &[u8]) -> Result<String, IdentityError> {
        self.sign(message).map(|sig| sig.to_string()).ok_or(IdentityError::Unavailable)
    }
}

impl Identity for Keypair {
    fn pubkey(&self) -> Option<[u8; 32]> {
        Some(Signer::pubkey(self).to_bytes())
    }

    fn sign(&self, message: &[u8]) -> Option<Signature> {
        self.try_sign_message(message).ok()
    }
}

/// `Authorization` header value proving ownership of the identity at `timestamp`.
///
/// `Basic base64("<pubkey>:<base58(sig(timestamp_le))>")`
pub fn basic_auth(identity: &dyn Identity, timestamp: u64) -> Result<String, IdentityError> {
    let pubkey = identity.pubkey().ok_or(IdentityError::Unavailable)?;
    let signature = identity.sign_text(&timestamp.to_le_bytes())?;
    let pubkey = bs58::encode(pubkey).into_string();
    Ok(format!("Basic {}", STANDARD.encode(format!("{pubkey}:{signature}"))))
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use super::*;

    struct Detached;

    impl Identity for Detached {
        fn pubkey(&self) -> Option<[u8; 32]> {
            None
        }

        fn sign(&self, _: &[u8]) -> Option<Signature> {
            None
        }
    }

    #[test]
    fn basic_auth_carries_pubkey_and_signature() {
        let keypair = Keypair::new();
        let header = basic_auth(&keypair, 1_718_000_000).unwrap();

        let encoded = header.strip_prefix("Basic ").unwrap();
        let decoded = String::from_utf8(STANDARD.decode(encoded).unwrap()).unwrap();
        let (pubkey, signature) = decoded.split_once(':').unwrap();

        assert_eq!(pubkey, Signer::pubkey(&keypair).to_string());
        let signature = Signature::from_str(signature).unwrap();
        assert!(signature
            .verify(&Signer::pubkey(&keypair).to_bytes(), &1_718_000_000u64.to_le_bytes()));
    }

    #[test]
    fn detached_identity_is_unavailable() {
        assert_eq!(basic_auth(&Detached, 1), Err(IdentityError::Unavailable));
        assert_eq!(Detached.sign_text(b"x"), Err(IdentityError::Unavailable));
    }
}
