//! Key and wallet management.
//!
//! Every eigen executes through N sub-wallets. Derived sub-wallet keys are a
//! pure function of `(master secret, eigen id, index)` and are rederived on
//! demand - they never touch disk. Imported wallets instead carry an
//! AES-256-GCM-encrypted private key in the store, keyed by the SHA-256 of
//! the master secret.
//!
//! Neither the master secret nor any derived/decrypted key is ever logged.

use alloy::primitives::{Address, B256, keccak256};
use alloy::signers::local::PrivateKeySigner;
use keeper_core::types::{EigenConfig, WalletSource};
use keeper_store::Store;
use keeper_store::wallets::WalletMeta;
use sha2::{Digest, Sha256};
use tracing::{debug, instrument, warn};

use aes_gcm::aead::{Aead, OsRng};
use aes_gcm::{AeadCore, Aes256Gcm, Key, KeyInit, Nonce};

use crate::error::{ConfigError, Result, ServiceError};

/// AES-GCM nonce length in bytes.
const NONCE_LEN: usize = 12;

// ═══════════════════════════════════════════════════════════════════════════════
// WALLET MANAGER
// ═══════════════════════════════════════════════════════════════════════════════

/// Derives, imports, selects, and tracks sub-wallets.
pub struct WalletManager {
    master: PrivateKeySigner,
    master_secret: B256,
    cipher_key: [u8; 32],
    store: Store,
}

impl std::fmt::Debug for WalletManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WalletManager")
            .field("master_address", &self.master.address())
            .finish_non_exhaustive()
    }
}

impl WalletManager {
    /// Create a manager from the 0x-prefixed master key.
    ///
    /// # Errors
    ///
    /// Returns an error when the key is not a valid secp256k1 scalar.
    pub fn new(keeper_private_key: &str, store: Store) -> Result<Self> {
        let master_secret: B256 = keeper_private_key
            .parse()
            .map_err(|e| ConfigError::InvalidKeeperKey(format!("unparseable key: {e}")))?;

        let master = PrivateKeySigner::from_bytes(&master_secret)
            .map_err(|e| ConfigError::InvalidKeeperKey(format!("invalid scalar: {e}")))?;

        let cipher_key: [u8; 32] = Sha256::digest(master_secret.as_slice()).into();

        Ok(Self {
            master,
            master_secret,
            cipher_key,
            store,
        })
    }

    /// The keeper's master address (gas source and transfer sink).
    #[must_use]
    pub fn master_address(&self) -> Address {
        self.master.address()
    }

    /// The master signer (vault calls, funding transfers).
    #[must_use]
    pub const fn master_signer(&self) -> &PrivateKeySigner {
        &self.master
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Derivation
    // ─────────────────────────────────────────────────────────────────────────

    /// Deterministically derive the signer for `(eigen, index)`.
    ///
    /// The key is `keccak256(master ∥ eigen_id ∥ index_be)`, rehashed in the
    /// astronomically unlikely case the digest is not a valid scalar.
    #[must_use]
    pub fn derive_signer(&self, eigen_id: &str, index: u32) -> PrivateKeySigner {
        let mut preimage =
            Vec::with_capacity(self.master_secret.len() + eigen_id.len() + 4);
        preimage.extend_from_slice(self.master_secret.as_slice());
        preimage.extend_from_slice(eigen_id.as_bytes());
        preimage.extend_from_slice(&index.to_be_bytes());

        let mut candidate = keccak256(&preimage);
        loop {
            match PrivateKeySigner::from_bytes(&candidate) {
                Ok(signer) => return signer,
                Err(_) => candidate = keccak256(candidate.as_slice()),
            }
        }
    }

    /// Idempotently derive the first `count` sub-wallets and return their
    /// stored metadata.
    ///
    /// # Errors
    ///
    /// Returns an error on store failure.
    #[instrument(skip(self), fields(eigen = eigen_id))]
    pub async fn derive_or_get(&self, eigen_id: &str, count: u32) -> Result<Vec<WalletMeta>> {
        for index in 0..count {
            let address = self.derive_signer(eigen_id, index).address();
            self.store
                .ensure_sub_wallet(eigen_id, index, address)
                .await?;
        }

        Ok(self.store.sub_wallets(eigen_id, count).await?)
    }

    /// Resolve the wallets an eigen trades through.
    ///
    /// Imported wallets win when the eigen is configured for them and any
    /// exist; otherwise the derived set is (created and) returned.
    pub async fn wallets_for(&self, config: &EigenConfig) -> Result<(Vec<WalletMeta>, WalletSource)> {
        if config.wallet_source == WalletSource::Imported {
            let imported = self.store.imported_wallets(&config.id).await?;
            if !imported.is_empty() {
                let metas = imported.into_iter().map(|w| w.meta).collect();
                return Ok((metas, WalletSource::Imported));
            }
            warn!(eigen = %config.id, "Imported source configured but no wallets, deriving");
        }

        let derived = self.derive_or_get(&config.id, config.wallet_count).await?;
        Ok((derived, WalletSource::Derived))
    }

    /// Resolve the signer for one wallet of an eigen.
    ///
    /// # Errors
    ///
    /// Returns an error when an imported wallet's blob fails decryption or
    /// yields a malformed key.
    pub async fn signer_for(
        &self,
        config: &EigenConfig,
        source: WalletSource,
        index: u32,
    ) -> Result<PrivateKeySigner> {
        match source {
            WalletSource::Derived => Ok(self.derive_signer(&config.id, index)),
            WalletSource::Imported => {
                let wallets = self.store.imported_wallets(&config.id).await?;
                let wallet = wallets
                    .iter()
                    .find(|w| w.meta.wallet_index == index)
                    .ok_or_else(|| {
                        ServiceError::Internal(format!(
                            "imported wallet {index} missing for {}",
                            config.id
                        ))
                    })?;

                let key_hex = self.decrypt_private_key(&wallet.encrypted_key)?;
                let key: B256 = key_hex
                    .parse()
                    .map_err(|e| ServiceError::KeyIntegrity(format!("unparseable key: {e}")))?;
                PrivateKeySigner::from_bytes(&key)
                    .map_err(|e| ServiceError::KeyIntegrity(format!("invalid scalar: {e}")))
            }
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Selection and bookkeeping
    // ─────────────────────────────────────────────────────────────────────────

    /// Pick the wallet to execute with: wallets that never traded win (by
    /// index), otherwise the least-recently-traded.
    #[must_use]
    pub fn select<'a>(wallets: &'a [WalletMeta]) -> Option<&'a WalletMeta> {
        if let Some(fresh) = wallets.iter().find(|w| w.last_trade_at.is_none()) {
            return Some(fresh);
        }
        wallets.iter().min_by_key(|w| w.last_trade_at)
    }

    /// Record a trade against a wallet, dispatching on its source.
    pub async fn record_trade(
        &self,
        eigen_id: &str,
        source: WalletSource,
        index: u32,
    ) -> Result<()> {
        match source {
            WalletSource::Derived => self.store.record_sub_wallet_trade(eigen_id, index).await?,
            WalletSource::Imported => {
                self.store
                    .record_imported_wallet_trade(eigen_id, index)
                    .await?;
            }
        }
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Imported wallet crypto
    // ─────────────────────────────────────────────────────────────────────────

    /// Import a wallet for an eigen, storing the key encrypted.
    ///
    /// # Errors
    ///
    /// Returns an error when the key is malformed.
    #[instrument(skip(self, private_key_hex), fields(eigen = eigen_id, wallet = index))]
    pub async fn import_wallet(
        &self,
        eigen_id: &str,
        index: u32,
        private_key_hex: &str,
    ) -> Result<Address> {
        let key: B256 = private_key_hex
            .parse()
            .map_err(|e| ServiceError::KeyIntegrity(format!("unparseable key: {e}")))?;
        let signer = PrivateKeySigner::from_bytes(&key)
            .map_err(|e| ServiceError::KeyIntegrity(format!("invalid scalar: {e}")))?;
        let address = signer.address();

        let blob = self.encrypt_private_key(private_key_hex)?;
        self.store
            .insert_imported_wallet(eigen_id, index, address, &blob)
            .await?;

        debug!(%address, "Wallet imported");
        Ok(address)
    }

    /// Encrypt a private key hex string: `nonce ∥ ciphertext ∥ tag`.
    ///
    /// # Errors
    ///
    /// Returns an error on cipher failure.
    pub fn encrypt_private_key(&self, private_key_hex: &str) -> Result<Vec<u8>> {
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&self.cipher_key));
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);

        let ciphertext = cipher
            .encrypt(&nonce, private_key_hex.as_bytes())
            .map_err(|_| ServiceError::KeyIntegrity("encryption failed".into()))?;

        let mut blob = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        blob.extend_from_slice(&nonce);
        blob.extend_from_slice(&ciphertext);
        Ok(blob)
    }

    /// Decrypt an imported-wallet blob back to the 0x-prefixed hex key.
    ///
    /// # Errors
    ///
    /// Returns an error when the blob is truncated, the tag does not verify,
    /// or the plaintext is not a syntactically valid key.
    pub fn decrypt_private_key(&self, blob: &[u8]) -> Result<String> {
        if blob.len() <= NONCE_LEN {
            return Err(ServiceError::KeyIntegrity("blob too short".into()));
        }

        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&self.cipher_key));
        let nonce = Nonce::from_slice(&blob[..NONCE_LEN]);

        let plaintext = cipher
            .decrypt(nonce, &blob[NONCE_LEN..])
            .map_err(|_| ServiceError::KeyIntegrity("authentication failed".into()))?;

        let key_hex = String::from_utf8(plaintext)
            .map_err(|_| ServiceError::KeyIntegrity("non-utf8 plaintext".into()))?;

        if !key_hex.starts_with("0x")
            || key_hex.len() != 66
            || !key_hex[2..].chars().all(|c| c.is_ascii_hexdigit())
        {
            return Err(ServiceError::KeyIntegrity(
                "decrypted key is not 0x-prefixed 64-hex".into(),
            ));
        }

        Ok(key_hex)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use keeper_core::types::EigenStatus;

    const KEY: &str = "0x4c0883a69102937d6231471b5dbb6204fe512961708279feb1be6ae5538da033";
    const OTHER_KEY: &str =
        "0x59c6995e998f97a5a0044966f0945389dc9e86dae88c7a8412f4603b6b78690d";

    async fn manager() -> WalletManager {
        let store = Store::open_in_memory().await.unwrap();
        WalletManager::new(KEY, store).unwrap()
    }

    fn config(id: &str, source: WalletSource) -> EigenConfig {
        EigenConfig {
            id: id.into(),
            token: Address::repeat_byte(0x11),
            pool: None,
            owner: Address::repeat_byte(0x22),
            vault: None,
            status: EigenStatus::Active,
            volume_target_eth: 10.0,
            trade_frequency_per_hour: 6.0,
            order_size_min_pct: 8.0,
            order_size_max_pct: 15.0,
            spread_pct: 2.0,
            profit_target_pct: 50.0,
            stop_loss_pct: 30.0,
            wallet_count: 3,
            slippage_bps: 100,
            reactive_sell_enabled: false,
            reactive_sell_pct: 50.0,
            last_scanned_block: None,
            gas_budget_eth: 0.5,
            gas_spent_eth: 0.0,
            custom_prompt: None,
            wallet_source: source,
            chain_id: 10143,
        }
    }

    #[tokio::test]
    async fn derivation_is_deterministic_and_distinct() {
        let mgr = manager().await;

        let a0 = mgr.derive_signer("e1", 0).address();
        let a0_again = mgr.derive_signer("e1", 0).address();
        assert_eq!(a0, a0_again);

        let a1 = mgr.derive_signer("e1", 1).address();
        let b0 = mgr.derive_signer("e2", 0).address();
        assert_ne!(a0, a1);
        assert_ne!(a0, b0);
    }

    #[tokio::test]
    async fn different_masters_derive_different_wallets() {
        let store_a = Store::open_in_memory().await.unwrap();
        let store_b = Store::open_in_memory().await.unwrap();
        let mgr_a = WalletManager::new(KEY, store_a).unwrap();
        let mgr_b = WalletManager::new(OTHER_KEY, store_b).unwrap();

        assert_ne!(
            mgr_a.derive_signer("e1", 0).address(),
            mgr_b.derive_signer("e1", 0).address()
        );
    }

    #[tokio::test]
    async fn derive_or_get_is_idempotent() {
        let mgr = manager().await;

        let first = mgr.derive_or_get("e1", 3).await.unwrap();
        let second = mgr.derive_or_get("e1", 3).await.unwrap();

        assert_eq!(first.len(), 3);
        assert_eq!(
            first.iter().map(|w| w.address).collect::<Vec<_>>(),
            second.iter().map(|w| w.address).collect::<Vec<_>>()
        );

        // Addresses match fresh derivation
        for meta in &first {
            assert_eq!(
                meta.address,
                mgr.derive_signer("e1", meta.wallet_index).address()
            );
        }
    }

    #[tokio::test]
    async fn select_prefers_untried_then_oldest() {
        let now = Utc::now();
        let wallets = vec![
            WalletMeta {
                eigen_id: "e1".into(),
                wallet_index: 0,
                address: Address::repeat_byte(0x01),
                last_trade_at: Some(now - Duration::minutes(5)),
                trade_count: 3,
            },
            WalletMeta {
                eigen_id: "e1".into(),
                wallet_index: 1,
                address: Address::repeat_byte(0x02),
                last_trade_at: None,
                trade_count: 0,
            },
        ];

        // The never-traded wallet wins
        assert_eq!(WalletManager::select(&wallets).unwrap().wallet_index, 1);

        // When all have traded, the oldest wins
        let wallets = vec![
            WalletMeta {
                eigen_id: "e1".into(),
                wallet_index: 0,
                address: Address::repeat_byte(0x01),
                last_trade_at: Some(now - Duration::minutes(5)),
                trade_count: 3,
            },
            WalletMeta {
                eigen_id: "e1".into(),
                wallet_index: 1,
                address: Address::repeat_byte(0x02),
                last_trade_at: Some(now - Duration::minutes(30)),
                trade_count: 1,
            },
        ];
        assert_eq!(WalletManager::select(&wallets).unwrap().wallet_index, 1);

        assert!(WalletManager::select(&[]).is_none());
    }

    #[tokio::test]
    async fn encrypt_decrypt_is_identity() {
        let mgr = manager().await;

        let blob = mgr.encrypt_private_key(OTHER_KEY).unwrap();
        assert_ne!(blob.as_slice(), OTHER_KEY.as_bytes());

        let decrypted = mgr.decrypt_private_key(&blob).unwrap();
        assert_eq!(decrypted, OTHER_KEY);
    }

    #[tokio::test]
    async fn tampered_blob_fails_authentication() {
        let mgr = manager().await;

        let mut blob = mgr.encrypt_private_key(OTHER_KEY).unwrap();
        let last = blob.len() - 1;
        blob[last] ^= 0x01;

        assert!(mgr.decrypt_private_key(&blob).is_err());
        assert!(mgr.decrypt_private_key(&[0u8; 4]).is_err());
    }

    #[tokio::test]
    async fn imported_wallets_win_when_present() {
        let mgr = manager().await;
        let cfg = config("e1", WalletSource::Imported);

        // No imports yet: falls back to derived
        let (wallets, source) = mgr.wallets_for(&cfg).await.unwrap();
        assert_eq!(source, WalletSource::Derived);
        assert_eq!(wallets.len(), 3);

        // Import one wallet: imported set wins
        let address = mgr.import_wallet("e1", 0, OTHER_KEY).await.unwrap();
        let (wallets, source) = mgr.wallets_for(&cfg).await.unwrap();
        assert_eq!(source, WalletSource::Imported);
        assert_eq!(wallets.len(), 1);
        assert_eq!(wallets[0].address, address);

        // And the signer round-trips through decryption
        let signer = mgr
            .signer_for(&cfg, WalletSource::Imported, 0)
            .await
            .unwrap();
        assert_eq!(signer.address(), address);
    }
}
