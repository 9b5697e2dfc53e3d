use anyhow::{anyhow, Result};
use argon2::{Algorithm, Argon2, Params, PasswordHasher as _, PasswordVerifier, Version};
use password_hash::{PasswordHash, SaltString};

use crate::config::HashCost;

/// Argon2id hashing with a fixed cost per instance.
///
/// Also keeps a hash of random bytes so lookups of unknown accounts can run a
/// verification of the same cost as a real one.
pub struct PasswordHasher {
    argon: Argon2<'static>,
    dummy_hash: String,
}

impl PasswordHasher {
    pub fn new(cost: HashCost) -> Result<Self> {
        let params = Params::new(cost.memory_kib, cost.iterations, Params::DEFAULT_P_COST, None)
            .map_err(|e| anyhow!("invalid argon2 parameters: {}", e))?;
        let argon = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);
        let mut filler = [0u8; 24];
        getrandom::getrandom(&mut filler).map_err(|e| anyhow!(e.to_string()))?;
        let dummy_hash = hash_with(&argon, &filler)?;
        Ok(Self { argon, dummy_hash })
    }

    pub fn hash(&self, password: &str) -> Result<String> {
        hash_with(&self.argon, password.as_bytes())
    }

    pub fn verify(&self, hash: &str, password: &str) -> bool {
        if let Ok(parsed) = PasswordHash::new(hash) {
            self.argon.verify_password(password.as_bytes(), &parsed).is_ok()
        } else { false }
    }

    /// Burn one verification against the dummy hash. Always false.
    pub fn verify_dummy(&self, password: &str) -> bool {
        let _ = self.verify(&self.dummy_hash, password);
        false
    }
}

fn hash_with(argon: &Argon2<'static>, secret: &[u8]) -> Result<String> {
    let mut salt_bytes = [0u8; 16];
    getrandom::getrandom(&mut salt_bytes).map_err(|e| anyhow!(e.to_string()))?;
    let salt = SaltString::encode_b64(&salt_bytes).map_err(|e| anyhow!(e.to_string()))?;
    let phc = argon.hash_password(secret, &salt).map_err(|e| anyhow!(e.to_string()))?.to_string();
    Ok(phc)
}
