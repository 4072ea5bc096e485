use std::env;
use std::fs;
use std::path::Path;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use rsa::pkcs1::DecodeRsaPrivateKey;
use rsa::pkcs8::DecodePrivateKey;
use rsa::RsaPrivateKey;
use serde::Deserialize;

use crate::errors::JobError;

/// Key-pair credentials for the warehouse.  The private key material is kept
/// only as a parsed key and never appears in logs or error messages.
pub struct Credentials {
    pub account: String,
    pub user: String,
    pub private_key: RsaPrivateKey,
}

/// One named section of `~/.snowflake/connections.toml`.  This path supports
/// only unencrypted key files.
#[derive(Deserialize)]
struct Profile {
    account: String,
    user: String,
    private_key_path: String,
}

impl Credentials {
    /// Environment variables first, then the named profile in
    /// `~/.snowflake/connections.toml`.  If neither source is complete,
    /// resolution fails with a configuration error.
    pub fn resolve(connection_name: &str) -> Result<Credentials, JobError> {
        let default_path =
            dirs::home_dir().map(|home| home.join(".snowflake").join("connections.toml"));
        Credentials::resolve_from(connection_name, default_path.as_deref())
    }

    fn resolve_from(
        connection_name: &str,
        profile_path: Option<&Path>,
    ) -> Result<Credentials, JobError> {
        if let Some(creds) = Credentials::from_env()? {
            return Ok(creds);
        }
        let profile = match profile_path {
            Some(path) => Credentials::from_profile(path, connection_name)?,
            None => None,
        };
        profile.ok_or_else(|| {
            JobError::Config(
                "missing Snowflake credentials: set SNOWFLAKE_ACCOUNT/SNOWFLAKE_USER with a \
                 private key, or add a connections.toml profile"
                    .to_string(),
            )
        })
    }

    /// Read `SNOWFLAKE_ACCOUNT`, `SNOWFLAKE_USER` and a PEM private key from
    /// either `SNOWFLAKE_PRIVATE_KEY_B64` or `SNOWFLAKE_PRIVATE_KEY_PATH`,
    /// optionally protected by `SNOWFLAKE_PRIVATE_KEY_PASSPHRASE`.
    /// Returns `Ok(None)` when the environment does not carry a complete set.
    pub fn from_env() -> Result<Option<Credentials>, JobError> {
        let (Ok(account), Ok(user)) = (env::var("SNOWFLAKE_ACCOUNT"), env::var("SNOWFLAKE_USER"))
        else {
            return Ok(None);
        };
        let passphrase = env::var("SNOWFLAKE_PRIVATE_KEY_PASSPHRASE").ok();

        let pem = if let Ok(b64) = env::var("SNOWFLAKE_PRIVATE_KEY_B64") {
            let bytes = STANDARD.decode(b64.trim()).map_err(|e| {
                JobError::Config(format!("SNOWFLAKE_PRIVATE_KEY_B64 is not valid base64: {}", e))
            })?;
            String::from_utf8(bytes).map_err(|_| {
                JobError::Config("SNOWFLAKE_PRIVATE_KEY_B64 does not decode to PEM text".to_string())
            })?
        } else if let Ok(path) = env::var("SNOWFLAKE_PRIVATE_KEY_PATH") {
            read_key_file(Path::new(&path))?
        } else {
            return Ok(None);
        };

        let private_key = decode_private_key(&pem, passphrase.as_deref())?;
        Ok(Some(Credentials {
            account,
            user,
            private_key,
        }))
    }

    /// Load the named profile from a connections.toml file.  A missing file
    /// or missing profile is `Ok(None)` so the caller can report the overall
    /// resolution failure; a present but broken profile is an error.
    pub fn from_profile(path: &Path, connection_name: &str) -> Result<Option<Credentials>, JobError> {
        if !path.exists() {
            return Ok(None);
        }
        let text = fs::read_to_string(path).map_err(|e| {
            JobError::Config(format!("failed to read {}: {}", path.display(), e))
        })?;
        let Some(profile) = parse_profile(&text, connection_name)? else {
            return Ok(None);
        };
        let pem = read_key_file(Path::new(&profile.private_key_path))?;
        let private_key = decode_private_key(&pem, None)?;
        Ok(Some(Credentials {
            account: profile.account,
            user: profile.user,
            private_key,
        }))
    }
}

fn parse_profile(text: &str, connection_name: &str) -> Result<Option<Profile>, JobError> {
    let table: toml::Table = toml::from_str(text)
        .map_err(|e| JobError::Config(format!("invalid connections.toml: {}", e)))?;
    match table.get(connection_name) {
        None => Ok(None),
        Some(value) => value.clone().try_into::<Profile>().map(Some).map_err(|e| {
            JobError::Config(format!(
                "connections.toml profile [{}] is incomplete: {}",
                connection_name, e
            ))
        }),
    }
}

fn read_key_file(path: &Path) -> Result<String, JobError> {
    if !path.exists() {
        return Err(JobError::Config(format!(
            "private key file not found: {}",
            path.display()
        )));
    }
    fs::read_to_string(path)
        .map_err(|e| JobError::Config(format!("failed to read private key file {}: {}", path.display(), e)))
}

/// Accepts PKCS#8 PEM (clear or passphrase-encrypted) and legacy PKCS#1 PEM.
/// Decode failures stay generic so no key material leaks into messages.
fn decode_private_key(pem: &str, passphrase: Option<&str>) -> Result<RsaPrivateKey, JobError> {
    if let Some(pass) = passphrase {
        return RsaPrivateKey::from_pkcs8_encrypted_pem(pem, pass.as_bytes()).map_err(|_| {
            JobError::Config(
                "failed to decrypt private key (wrong passphrase or malformed PEM)".to_string(),
            )
        });
    }
    if let Ok(key) = RsaPrivateKey::from_pkcs8_pem(pem) {
        return Ok(key);
    }
    RsaPrivateKey::from_pkcs1_pem(pem)
        .map_err(|_| JobError::Config("malformed private key PEM".to_string()))
}

#[cfg(test)]
mod tests {
    use std::env;
    use std::fs;

    use super::*;
    use crate::errors::JobError;

    #[test]
    fn profile_lookup() -> Result<(), JobError> {
        let text = r#"
            [DEFAULT_CONNECTION]
            account = "xy12345.us-east-1"
            user = "LOADER"
            private_key_path = "/tmp/does_not_matter.p8"

            [OTHER]
            account = "ab98765"
            user = "ANALYST"
            private_key_path = "/tmp/other.p8"
        "#;
        let profile = parse_profile(text, "DEFAULT_CONNECTION")?.unwrap();
        assert_eq!(profile.account, "xy12345.us-east-1");
        assert_eq!(profile.user, "LOADER");
        assert!(parse_profile(text, "MISSING")?.is_none());
        Ok(())
    }

    #[test]
    fn incomplete_profile_is_an_error() {
        let text = r#"
            [DEFAULT_CONNECTION]
            account = "xy12345"
        "#;
        let res = parse_profile(text, "DEFAULT_CONNECTION");
        assert!(matches!(res, Err(JobError::Config(_))));
    }

    #[test]
    fn malformed_pem_is_a_config_error() {
        let res = decode_private_key("not a pem at all", None);
        assert!(matches!(res, Err(JobError::Config(_))));
        let res = decode_private_key("not a pem at all", Some("hunter2"));
        assert!(matches!(res, Err(JobError::Config(_))));
    }

    #[test]
    fn missing_profile_file_is_none() -> Result<(), JobError> {
        let path = env::temp_dir().join("wxload_no_such_connections.toml");
        assert!(Credentials::from_profile(&path, "DEFAULT_CONNECTION")?.is_none());
        Ok(())
    }

    #[test]
    fn profile_with_missing_key_file_is_an_error() {
        let dir = env::temp_dir().join("wxload_credentials_test");
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join("connections.toml");
        fs::write(
            &path,
            r#"
            [DEFAULT_CONNECTION]
            account = "xy12345"
            user = "LOADER"
            private_key_path = "/nonexistent/rsa_key.p8"
        "#,
        )
        .unwrap();
        let res = Credentials::from_profile(&path, "DEFAULT_CONNECTION");
        assert!(matches!(res, Err(JobError::Config(_))));
    }

    // The only test that touches SNOWFLAKE_* environment variables, so it
    // can't race with a parallel test reading them.
    #[test]
    fn env_credentials_beat_the_profile() -> Result<(), JobError> {
        use base64::Engine as _;
        use rsa::pkcs8::{EncodePrivateKey, LineEnding};

        let mut rng = rand::thread_rng();
        let key = RsaPrivateKey::new(&mut rng, 1024).unwrap();
        let pem = key.to_pkcs8_pem(LineEnding::LF).unwrap();

        let dir = env::temp_dir().join("wxload_precedence_test");
        fs::create_dir_all(&dir).unwrap();
        let key_path = dir.join("rsa_key.p8");
        fs::write(&key_path, pem.as_bytes()).unwrap();
        let profile_path = dir.join("connections.toml");
        fs::write(
            &profile_path,
            format!(
                "[DEFAULT_CONNECTION]\n\
                 account = \"profile_acct\"\n\
                 user = \"PROFILE_USER\"\n\
                 private_key_path = \"{}\"\n",
                key_path.display()
            ),
        )
        .unwrap();

        env::set_var("SNOWFLAKE_ACCOUNT", "env_acct");
        env::set_var("SNOWFLAKE_USER", "ENV_USER");
        env::set_var("SNOWFLAKE_PRIVATE_KEY_B64", STANDARD.encode(pem.as_bytes()));
        env::remove_var("SNOWFLAKE_PRIVATE_KEY_PATH");
        env::remove_var("SNOWFLAKE_PRIVATE_KEY_PASSPHRASE");

        // both sources are complete: the environment wins
        let creds = Credentials::resolve_from("DEFAULT_CONNECTION", Some(&profile_path))?;
        assert_eq!(creds.account, "env_acct");
        assert_eq!(creds.user, "ENV_USER");

        // account/user without key material does not count as complete
        env::remove_var("SNOWFLAKE_PRIVATE_KEY_B64");
        assert!(Credentials::from_env()?.is_none());

        // with the environment out of the picture the profile is used
        env::remove_var("SNOWFLAKE_ACCOUNT");
        env::remove_var("SNOWFLAKE_USER");
        assert!(Credentials::from_env()?.is_none());
        let creds = Credentials::resolve_from("DEFAULT_CONNECTION", Some(&profile_path))?;
        assert_eq!(creds.account, "profile_acct");
        assert_eq!(creds.user, "PROFILE_USER");

        // neither source complete
        let res = Credentials::resolve_from("NO_SUCH_PROFILE", Some(&profile_path));
        assert!(matches!(res, Err(JobError::Config(_))));
        Ok(())
    }
}
