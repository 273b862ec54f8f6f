//! Passphrase-keyed sealing on top of scrypt.
//!
//! Layout: `[log_n: 1][salt: 16][secret ciphertext]`. The work factor travels
//! with the blob so it can be raised without breaking old ciphertexts.

use scrypt::Params;

use super::secret::{Secret, SecretError, SECRET_SIZE};

pub const SALT_SIZE: usize = 16;
/// scrypt N = 2^14, r = 8, p = 1
pub const DEFAULT_LOG_N: u8 = 14;
/// Highest accepted work factor; 2^20 rounds already need 1 GiB.
pub const MAX_LOG_N: u8 = 20;
const SCRYPT_R: u32 = 8;
const SCRYPT_P: u32 = 1;
const HEADER_SIZE: usize = 1 + SALT_SIZE;

#[derive(Debug, thiserror::Error)]
pub enum PasswordSealError {
    #[error("password seal error: {0}")]
    Default(#[from] anyhow::Error),
    #[error("secret error: {0}")]
    Secret(#[from] SecretError),
    #[error("scrypt cost 2^{0} is too high")]
    CostTooHigh(u8),
}

fn stretch(password: &[u8], salt: &[u8], log_n: u8) -> Result<Secret, PasswordSealError> {
    // the cost comes from the blob header, so it is attacker controlled on open
    if log_n > MAX_LOG_N {
        return Err(PasswordSealError::CostTooHigh(log_n));
    }
    let params = Params::new(log_n, SCRYPT_R, SCRYPT_P, SECRET_SIZE)
        .map_err(|e| anyhow::anyhow!("invalid scrypt params: {}", e))?;
    let mut key = [0u8; SECRET_SIZE];
    scrypt::scrypt(password, salt, &params, &mut key)
        .map_err(|e| anyhow::anyhow!("scrypt failed: {}", e))?;
    Ok(Secret::from(key))
}

pub fn seal_with_password(password: &[u8], plaintext: &[u8]) -> Result<Vec<u8>, PasswordSealError> {
    seal_with_password_cost(password, plaintext, DEFAULT_LOG_N)
}

pub fn seal_with_password_cost(
    password: &[u8],
    plaintext: &[u8],
    log_n: u8,
) -> Result<Vec<u8>, PasswordSealError> {
    let mut salt = [0u8; SALT_SIZE];
    getrandom::getrandom(&mut salt).map_err(|e| anyhow::anyhow!("failed to generate salt: {}", e))?;

    let secret = stretch(password, &salt, log_n)?;
    let ciphertext = secret.encrypt(plaintext)?;

    let mut out = Vec::with_capacity(HEADER_SIZE + ciphertext.len());
    out.push(log_n);
    out.extend_from_slice(&salt);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

pub fn open_with_password(password: &[u8], sealed: &[u8]) -> Result<Vec<u8>, PasswordSealError> {
    if sealed.len() < HEADER_SIZE {
        return Err(anyhow::anyhow!("password sealed data too short").into());
    }
    let log_n = sealed[0];
    let salt = &sealed[1..HEADER_SIZE];
    let secret = stretch(password, salt, log_n)?;
    Ok(secret.decrypt(&sealed[HEADER_SIZE..])?)
}

#[cfg(test)]
mod test {
    use super::*;

    // keep the tests fast, the format is cost independent
    const TEST_LOG_N: u8 = 4;

    #[test]
    fn test_password_round_trip() {
        let sealed = seal_with_password_cost(b"hunter2", b"payload", TEST_LOG_N).unwrap();
        assert_eq!(sealed[0], TEST_LOG_N);
        assert_eq!(open_with_password(b"hunter2", &sealed).unwrap(), b"payload");
    }

    #[test]
    fn test_wrong_password_fails() {
        let sealed = seal_with_password_cost(b"hunter2", b"payload", TEST_LOG_N).unwrap();
        assert!(open_with_password(b"hunter3", &sealed).is_err());
    }

    #[test]
    fn test_default_cost() {
        let sealed = seal_with_password(b"pw", b"x").unwrap();
        assert_eq!(sealed[0], DEFAULT_LOG_N);
        assert_eq!(open_with_password(b"pw", &sealed).unwrap(), b"x");
    }

    #[test]
    fn test_excessive_cost_is_rejected() {
        let mut sealed = seal_with_password_cost(b"pw", b"x", TEST_LOG_N).unwrap();
        sealed[0] = 36;
        assert!(matches!(
            open_with_password(b"pw", &sealed),
            Err(PasswordSealError::CostTooHigh(36))
        ));
        assert!(matches!(
            seal_with_password_cost(b"pw", b"x", MAX_LOG_N + 1),
            Err(PasswordSealError::CostTooHigh(_))
        ));
    }

    #[test]
    fn test_short_input_fails() {
        assert!(open_with_password(b"pw", &[14, 1, 2]).is_err());
    }
}
