use anyhow::{Context, Result};
use base64::{engine::general_purpose, Engine as _};
use ring::aead::{Aad, LessSafeKey, Nonce, UnboundKey, AES_256_GCM, NONCE_LEN};
use ring::rand::{SecureRandom, SystemRandom};
#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;
use std::path::Path;

const KEY_FILE: &str = "token.key";
const KEY_LEN: usize = 32;

/// AES-256-GCM encryption for transport secrets (SMTP password, SMS API
/// key). Ciphertext is stored as base64 of `nonce || ciphertext || tag`.
pub struct SecretEncryptor {
    key: LessSafeKey,
    rng: SystemRandom,
}

impl SecretEncryptor {
    /// Loads the key from `<data_dir>/token.key`, generating it on first use.
    pub fn load_or_create(data_dir: &Path) -> Result<Self> {
        let key_path = data_dir.join(KEY_FILE);
        let rng = SystemRandom::new();
        let key_bytes = if key_path.exists() {
            std::fs::read(&key_path)
                .with_context(|| format!("reading {}", key_path.display()))?
        } else {
            let mut key = vec![0u8; KEY_LEN];
            rng.fill(&mut key)
                .map_err(|_| anyhow::anyhow!("Failed to generate encryption key"))?;
            std::fs::write(&key_path, &key)
                .with_context(|| format!("writing {}", key_path.display()))?;
            #[cfg(unix)]
            std::fs::set_permissions(&key_path, std::fs::Permissions::from_mode(0o600))?;
            tracing::info!(path = %key_path.display(), "Generated new secret encryption key");
            key
        };

        if key_bytes.len() != KEY_LEN {
            anyhow::bail!(
                "Invalid secret encryption key length: expected {KEY_LEN} bytes, got {}",
                key_bytes.len()
            );
        }
        let unbound = UnboundKey::new(&AES_256_GCM, &key_bytes)
            .map_err(|_| anyhow::anyhow!("Invalid encryption key"))?;

        Ok(Self {
            key: LessSafeKey::new(unbound),
            rng,
        })
    }

    pub fn encrypt(&self, plaintext: &str) -> Result<String> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        self.rng
            .fill(&mut nonce_bytes)
            .map_err(|_| anyhow::anyhow!("Failed to generate nonce"))?;

        let mut in_out = plaintext.as_bytes().to_vec();
        self.key
            .seal_in_place_append_tag(Nonce::assume_unique_for_key(nonce_bytes), Aad::empty(), &mut in_out)
            .map_err(|_| anyhow::anyhow!("Encryption failed"))?;

        let mut sealed = nonce_bytes.to_vec();
        sealed.extend_from_slice(&in_out);
        Ok(general_purpose::STANDARD.encode(sealed))
    }

    pub fn decrypt(&self, encrypted: &str) -> Result<String> {
        let data = general_purpose::STANDARD
            .decode(encrypted)
            .context("secret is not valid base64")?;
        if data.len() < NONCE_LEN + AES_256_GCM.tag_len() {
            anyhow::bail!("Encrypted data too short");
        }

        let (nonce_bytes, ciphertext) = data.split_at(NONCE_LEN);
        let nonce = Nonce::try_assume_unique_for_key(nonce_bytes)
            .map_err(|_| anyhow::anyhow!("Invalid nonce"))?;
        let mut in_out = ciphertext.to_vec();
        let plaintext = self
            .key
            .open_in_place(nonce, Aad::empty(), &mut in_out)
            .map_err(|_| anyhow::anyhow!("Decryption failed"))?;

        Ok(String::from_utf8(plaintext.to_vec())?)
    }

    /// Encrypts only non-empty values; blank secrets are stored as `None`.
    pub fn encrypt_opt(&self, plaintext: Option<&str>) -> Result<Option<String>> {
        plaintext
            .filter(|s| !s.is_empty())
            .map(|s| self.encrypt(s))
            .transpose()
    }
}
