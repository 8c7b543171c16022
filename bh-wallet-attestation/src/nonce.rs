// Copyright (C) 2020-2025  The Blockhouse Technology Limited (TBTL).
//
// This program is free software: you can redistribute it and/or modify it
// under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or (at your
// option) any later version.
//
// This program is distributed in the hope that it will be useful, but
// WITHOUT ANY WARRANTY; without even the implied warranty of MERCHANTABILITY
// or FITNESS FOR A PARTICULAR PURPOSE.  See the GNU Affero General Public
// License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

//! Single-use, audience-bound nonces.
//!
//! A nonce is a stateless token: its claims are encrypted and authenticated with AES-256-GCM
//! under the shared nonce key. Only redemption is stateful. The token id is recorded in a
//! [`TtlCache`] until the token expires, and a second redemption of the same id is refused.

use bh_jws_utils::{base64_url_decode, base64_url_encode};
use bherror::{
    traits::{ErrorContext as _, ForeignError as _, Loggable as _, PropagateError as _},
    Error,
};
use openssl::{
    rand::rand_bytes,
    symm::{decrypt_aead, encrypt_aead, Cipher},
};
use serde::{Deserialize, Serialize};

use crate::{InMemoryTtlCache, Result, TtlCache, WalletError};

/// Version and mode of the token format.
///
/// It is authenticated as additional data but not transmitted.
pub const NONCE_VERSION_HEADER: &str = "v1.local.";

/// Audience of nonces issued without an identity session.
pub const ANONYMOUS: &str = "anonymous";

const IV_LENGTH: usize = 12;
const TAG_LENGTH: usize = 16;

#[derive(Debug, Serialize, Deserialize)]
struct NonceClaims {
    iss: String,
    sub: String,
    aud: String,
    iat: u64,
    nbf: u64,
    exp: u64,
}

/// Body of the nonce endpoint response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NonceResponse {
    /// The issued nonce.
    pub c_nonce: String,
}

/// Issues and redeems nonces.
pub struct NonceService<C = InMemoryTtlCache<bool>> {
    key: [u8; 32],
    issuer: String,
    ttl: u64,
    consumed: C,
}

impl NonceService {
    /// Creates a service recording consumed nonces in process memory.
    pub fn new(key: [u8; 32], issuer: impl Into<String>, ttl: u64) -> Self {
        Self::with_cache(key, issuer, ttl, InMemoryTtlCache::new())
    }
}

impl<C: TtlCache<bool>> NonceService<C> {
    /// Creates a service recording consumed nonces in `consumed`.
    ///
    /// `issuer` is the wallet public URL, `ttl` the nonce lifetime in seconds.
    pub fn with_cache(key: [u8; 32], issuer: impl Into<String>, ttl: u64, consumed: C) -> Self {
        Self {
            key,
            issuer: issuer.into(),
            ttl,
            consumed,
        }
    }

    /// Issues a nonce for `audience`, the identity session, or [`ANONYMOUS`] without one.
    pub fn issue(&self, audience: Option<&str>, now: u64) -> Result<String> {
        let claims = NonceClaims {
            iss: self.issuer.clone(),
            sub: uuid::Uuid::new_v4().to_string(),
            aud: audience.unwrap_or(ANONYMOUS).to_owned(),
            iat: now,
            nbf: now,
            exp: now.saturating_add(self.ttl),
        };
        let token = self.seal(&claims)?;

        log::debug!("Issued nonce {} valid until {}", claims.sub, claims.exp);

        Ok(token)
    }

    /// Redeems a nonce and returns its audience.
    ///
    /// Each nonce can be redeemed once. A nonce is never accepted when the consumed-nonce
    /// store cannot record the redemption.
    pub fn redeem(&self, token: &str, now: u64) -> Result<String> {
        let claims = self.open(token)?;

        if claims.iss != self.issuer {
            return Err(Error::root(WalletError::NonceInvalid))
                .ctx(|| format!("nonce issued by {}", claims.iss));
        }
        if claims.nbf > now {
            return Err(Error::root(WalletError::NonceInvalid)).ctx(|| "nonce not yet valid");
        }
        if claims.exp <= now {
            return Err(Error::root(WalletError::NonceExpired));
        }

        let inserted = self
            .consumed
            .insert_if_absent(&claims.sub, true, claims.exp - now, now)
            .with_err(|| WalletError::NonceStoreUnavailable)
            .log_err()?;
        if !inserted {
            return Err(Error::root(WalletError::NonceReused)).ctx(|| claims.sub.clone());
        }

        log::debug!("Redeemed nonce {}", claims.sub);

        Ok(claims.aud)
    }

    fn seal(&self, claims: &NonceClaims) -> Result<String> {
        let plaintext = serde_json::to_vec(claims).foreign_err(|| WalletError::CryptoBackend)?;

        let mut iv = [0; IV_LENGTH];
        rand_bytes(&mut iv).foreign_err(|| WalletError::CryptoBackend)?;
        let mut tag = [0; TAG_LENGTH];
        let ciphertext = encrypt_aead(
            Cipher::aes_256_gcm(),
            &self.key,
            Some(&iv),
            NONCE_VERSION_HEADER.as_bytes(),
            &plaintext,
            &mut tag,
        )
        .foreign_err(|| WalletError::CryptoBackend)?;

        let mut payload = Vec::with_capacity(IV_LENGTH + ciphertext.len() + TAG_LENGTH);
        payload.extend_from_slice(&iv);
        payload.extend_from_slice(&ciphertext);
        payload.extend_from_slice(&tag);

        Ok(base64_url_encode(payload))
    }

    fn open(&self, token: &str) -> Result<NonceClaims> {
        let token = token.strip_prefix(NONCE_VERSION_HEADER).unwrap_or(token);
        let payload = base64_url_decode(token).foreign_err(|| WalletError::NonceInvalid)?;

        if payload.len() < IV_LENGTH + TAG_LENGTH {
            return Err(Error::root(WalletError::NonceInvalid)).ctx(|| "nonce too short");
        }
        let (iv, rest) = payload.split_at(IV_LENGTH);
        let (ciphertext, tag) = rest.split_at(rest.len() - TAG_LENGTH);

        let plaintext = decrypt_aead(
            Cipher::aes_256_gcm(),
            &self.key,
            Some(iv),
            NONCE_VERSION_HEADER.as_bytes(),
            ciphertext,
            tag,
        )
        .foreign_err(|| WalletError::NonceInvalid)
        .ctx(|| "nonce authentication failed")?;

        serde_json::from_slice(&plaintext).foreign_err(|| WalletError::NonceInvalid)
    }
}
