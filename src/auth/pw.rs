use argon2::{Algorithm, Argon2, Params, Version};
use secrecy::{ExposeSecret, SecretString};
use sha2::Sha256;
use crate::auth::token::{random_bytes, SALT_BYTES};
use crate::auth::utils::constant_time_eq;
use crate::errors::{AppError, Result};
use crate::models::security::{CredentialRecord, HashAlgorithm};

/// Floor for PBKDF2 rounds
pub const MIN_PBKDF2_ITERATIONS: u32 = 100_000;

/// Derived key length in bytes
const KEY_LEN: usize = 32;

// Argon2id memory and lane parameters are fixed; only the time cost is recorded
const ARGON2_MEMORY_KIB: u32 = 65536;
const ARGON2_LANES: u32 = 4;
const ARGON2_DEFAULT_TIME_COST: u32 = 3;

fn create_argon2(time_cost: u32) -> std::result::Result<Argon2<'static>, argon2::Error> {
    let params = Params::new(ARGON2_MEMORY_KIB, time_cost, ARGON2_LANES, Some(KEY_LEN))?;
    Ok(Argon2::new(Algorithm::Argon2id, Version::V0x13, params))
}

/// Derives and verifies credential hashes
#[derive(Debug, Clone, Copy)]
pub struct CredentialHasher {
    algorithm: HashAlgorithm,
    iterations: u32,
}

impl Default for CredentialHasher {
    fn default() -> Self {
        Self {
            algorithm: HashAlgorithm::Pbkdf2Sha256,
            iterations: MIN_PBKDF2_ITERATIONS,
        }
    }
}

impl CredentialHasher {
    /// PBKDF2-HMAC-SHA256 hasher. Refuses round counts below the floor.
    pub fn pbkdf2(iterations: u32) -> Result<Self> {
        if iterations < MIN_PBKDF2_ITERATIONS {
            return Err(AppError::configuration(format!(
                "PBKDF2 needs at least {} iterations, got {}",
                MIN_PBKDF2_ITERATIONS, iterations
            )));
        }
        Ok(Self { algorithm: HashAlgorithm::Pbkdf2Sha256, iterations })
    }

    /// Argon2id hasher with the default time cost
    pub fn argon2id() -> Self {
        Self {
            algorithm: HashAlgorithm::Argon2id,
            iterations: ARGON2_DEFAULT_TIME_COST,
        }
    }

    pub fn algorithm(&self) -> HashAlgorithm {
        self.algorithm
    }

    /// Derive a credential record. A fresh random salt is drawn when none is given.
    pub fn hash(&self, secret: &SecretString, salt: Option<&str>) -> Result<CredentialRecord> {
        let salt = match salt {
            Some(salt) => salt.to_string(),
            None => hex::encode(random_bytes(SALT_BYTES)?),
        };

        let derived = derive(
            self.algorithm,
            self.iterations,
            secret.expose_secret().as_bytes(),
            salt.as_bytes(),
        )?;

        Ok(CredentialRecord {
            hash: hex::encode(derived),
            salt,
            algorithm: self.algorithm,
            iterations: self.iterations,
        })
    }

    /// Record for a random secret nobody knows. Verifying against it costs the
    /// same as verifying against a real record with this hasher's parameters.
    pub fn placeholder_record(&self) -> Result<CredentialRecord> {
        let secret = SecretString::from(hex::encode(random_bytes(SALT_BYTES)?));
        self.hash(&secret, None)
    }

    /// Re-derive with the record's own parameters and compare in constant time.
    ///
    /// Any malformed record yields `false`.
    pub fn verify(&self, secret: &SecretString, record: &CredentialRecord) -> bool {
        let expected = match hex::decode(&record.hash) {
            Ok(bytes) => bytes,
            Err(_) => {
                tracing::warn!("Credential record has a non-hex hash");
                return false;
            }
        };

        if record.algorithm == HashAlgorithm::Pbkdf2Sha256 && record.iterations < MIN_PBKDF2_ITERATIONS {
            tracing::warn!(iterations = record.iterations, "Credential record below PBKDF2 floor");
            return false;
        }

        match derive(
            record.algorithm,
            record.iterations,
            secret.expose_secret().as_bytes(),
            record.salt.as_bytes(),
        ) {
            Ok(actual) => constant_time_eq(&actual, &expected),
            Err(e) => {
                tracing::warn!("Credential verification failed to derive: {}", e);
                false
            }
        }
    }
}

#[cfg(test)]
thread_local! {
    static DERIVATIONS: std::cell::Cell<u64> = std::cell::Cell::new(0);
}

/// Key derivations run on the current thread
#[cfg(test)]
pub(crate) fn derivations_on_this_thread() -> u64 {
    DERIVATIONS.with(|count| count.get())
}

fn derive(algorithm: HashAlgorithm, iterations: u32, secret: &[u8], salt: &[u8]) -> Result<Vec<u8>> {
    #[cfg(test)]
    DERIVATIONS.with(|count| count.set(count.get() + 1));

    let mut out = vec![0u8; KEY_LEN];
    match algorithm {
        HashAlgorithm::Pbkdf2Sha256 => {
            pbkdf2::pbkdf2_hmac::<Sha256>(secret, salt, iterations, &mut out);
        }
        HashAlgorithm::Argon2id => {
            create_argon2(iterations)?.hash_password_into(secret, salt, &mut out)?;
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn secret(s: &str) -> SecretString {
        SecretString::from(s.to_string())
    }

    #[test]
    fn test_hash_and_verify() {
        let hasher = CredentialHasher::default();
        let record = hasher.hash(&secret("correct horse battery"), None).unwrap();

        assert_eq!(record.algorithm, HashAlgorithm::Pbkdf2Sha256);
        assert_eq!(record.iterations, 100_000);
        assert_eq!(record.salt.len(), SALT_BYTES * 2);
        assert!(hasher.verify(&secret("correct horse battery"), &record));
        assert!(!hasher.verify(&secret("correct horse battery!"), &record));
    }

    #[test]
    fn test_explicit_salt_is_deterministic() {
        let hasher = CredentialHasher::default();
        let a = hasher.hash(&secret("password123"), Some("fixed-salt")).unwrap();
        let b = hasher.hash(&secret("password123"), Some("fixed-salt")).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_fresh_salts_differ() {
        let hasher = CredentialHasher::default();
        let a = hasher.hash(&secret("password123"), None).unwrap();
        let b = hasher.hash(&secret("password123"), None).unwrap();
        assert_ne!(a.salt, b.salt);
        assert_ne!(a.hash, b.hash);
    }

    #[test]
    fn test_known_vector() {
        // hashlib.pbkdf2_hmac('sha256', b'password', b'salt', 100000).hex()
        let record = CredentialHasher::default()
            .hash(&secret("password"), Some("salt"))
            .unwrap();
        assert_eq!(
            record.hash,
            "0394a2ede332c9a13eb82e9b24631604c31df978b4e2f0fbd2c549944f9d79a5"
        );
    }

    #[test]
    fn test_malformed_records_fail_closed() {
        let hasher = CredentialHasher::default();
        let mut record = hasher.hash(&secret("password123"), None).unwrap();

        let mut bad_hex = record.clone();
        bad_hex.hash = "zz-not-hex".to_string();
        assert!(!hasher.verify(&secret("password123"), &bad_hex));

        record.iterations = 10;
        assert!(!hasher.verify(&secret("password123"), &record));
    }

    #[test]
    fn test_low_iteration_hasher_rejected() {
        assert!(CredentialHasher::pbkdf2(1_000).is_err());
        assert!(CredentialHasher::pbkdf2(200_000).is_ok());
    }

    #[test]
    fn test_argon2id_round_trip() {
        let hasher = CredentialHasher::argon2id();
        let record = hasher.hash(&secret("password123"), None).unwrap();
        assert_eq!(record.algorithm, HashAlgorithm::Argon2id);
        assert!(hasher.verify(&secret("password123"), &record));
        assert!(!hasher.verify(&secret("password124"), &record));

        // Argon2 rejects salts shorter than eight bytes
        let mut short_salt = record.clone();
        short_salt.salt = "abc".to_string();
        assert!(!hasher.verify(&secret("password123"), &short_salt));
    }

    #[test]
    fn test_placeholder_record_matches_hasher_cost() {
        let hasher = CredentialHasher::default();
        let placeholder = hasher.placeholder_record().unwrap();
        assert_eq!(placeholder.algorithm, HashAlgorithm::Pbkdf2Sha256);
        assert_eq!(placeholder.iterations, 100_000);

        let before = derivations_on_this_thread();
        assert!(!hasher.verify(&secret("password123"), &placeholder));
        assert_eq!(derivations_on_this_thread(), before + 1);
    }

    #[test]
    fn test_debug_output_redacts_secret() {
        let s = secret("hunter2hunter2");
        assert!(!format!("{:?}", s).contains("hunter2"));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(6))]

        #[test]
        fn prop_only_the_original_secret_verifies(
            s in "[ -~]{1,24}",
            other in "[ -~]{1,24}",
            salt in "[a-f0-9]{8,32}",
        ) {
            let hasher = CredentialHasher::default();
            let record = hasher.hash(&secret(&s), Some(&salt)).unwrap();
            prop_assert!(hasher.verify(&secret(&s), &record));
            if other != s {
                prop_assert!(!hasher.verify(&secret(&other), &record));
            }
        }
    }
}
