use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use base64::Engine as _;
use jiff::Timestamp;
use rsa::pkcs1v15::SigningKey;
use rsa::pkcs8::EncodePublicKey;
use rsa::sha2::{Digest, Sha256};
use rsa::signature::{SignatureEncoding, Signer};
use rsa::RsaPrivateKey;

use crate::errors::JobError;

/// Snowflake caps key-pair JWTs at one hour; a single run finishes in
/// seconds, so 55 minutes leaves plenty of clock-skew margin.
const JWT_LIFETIME_SECS: i64 = 55 * 60;

/// Account locator as it appears in JWT claims: anything after the first `.`
/// (region, cloud segments) is dropped, uppercased.
pub fn account_locator(account: &str) -> String {
    account.split('.').next().unwrap_or(account).to_uppercase()
}

/// `SHA256:<base64>` fingerprint of the DER-encoded public key, matching the
/// RSA_PUBLIC_KEY_FP shown by `DESC USER`.
pub fn public_key_fingerprint(key: &RsaPrivateKey) -> Result<String, JobError> {
    let der = key
        .to_public_key()
        .to_public_key_der()
        .map_err(|_| JobError::Connection("failed to encode public key".to_string()))?;
    let digest = Sha256::digest(der.as_bytes());
    Ok(format!("SHA256:{}", STANDARD.encode(digest)))
}

/// Self-signed RS256 JWT for Snowflake key-pair authentication:
/// `iss = ACCOUNT.USER.SHA256:<fingerprint>`, `sub = ACCOUNT.USER`.
pub fn keypair_jwt(account: &str, user: &str, key: &RsaPrivateKey) -> Result<String, JobError> {
    let qualified = format!("{}.{}", account_locator(account), user.to_uppercase());
    let fingerprint = public_key_fingerprint(key)?;
    let now = Timestamp::now().as_second();

    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"RS256","typ":"JWT"}"#);
    let claims = serde_json::json!({
        "iss": format!("{}.{}", qualified, fingerprint),
        "sub": qualified,
        "iat": now,
        "exp": now + JWT_LIFETIME_SECS,
    });
    let payload = URL_SAFE_NO_PAD.encode(claims.to_string());
    let signing_input = format!("{}.{}", header, payload);

    let signer = SigningKey::<Sha256>::new(key.clone());
    let signature = signer
        .try_sign(signing_input.as_bytes())
        .map_err(|_| JobError::Connection("failed to sign auth token".to_string()))?;

    Ok(format!(
        "{}.{}",
        signing_input,
        URL_SAFE_NO_PAD.encode(signature.to_bytes())
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn locator_drops_region_and_uppercases() {
        assert_eq!(account_locator("xy12345.us-east-1"), "XY12345");
        assert_eq!(account_locator("xy12345"), "XY12345");
        assert_eq!(account_locator("my_org.azure.westeurope"), "MY_ORG");
    }
}
