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

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

//! JWS signing and verification for wallet assertions and wallet attestations, and the
//! public key conversions around them.
//!
//! # Details
//!
//! Tokens are built with the re-exported [`jwt`] crate and signed or verified through the
//! [`JwtSigner`] and [`JwtVerifier`] extension traits, which surface the error of the key
//! backend instead of a bare [`jwt::Error`]. The default `openssl` feature provides the ES256
//! backend, [`Es256Signer`] and [`Es256Verifier`].
//!
//! The same feature converts public keys between OpenSSL, PEM and JWK form, for `EC`
//! (P-256, P-384, P-521) and `RSA` keys, and computes the [`KeyTag`] identifying a key:
//! the SHA-256 digest of an uncompressed EC point or of a PKCS#1 RSA key.
//!
//! # Examples
//!
//! ## Sign and verify an assertion
//!
//! ```
//! use bh_jws_utils::{json_object, Es256Signer, Es256Verifier, JwtSigner, JwtVerifier, Signer};
//!
//! let signer = Es256Signer::generate("hardware-key".to_string()).unwrap();
//!
//! let claims = json_object!({
//!    "sub": "https://wallet.example",
//!    "type": "WalletInstanceAttestationRequest",
//!    "exp": 1516239022
//! });
//! let signed: String = signer.sign_jwt(claims).unwrap();
//!
//! let public_jwk = signer.public_jwk().unwrap();
//! let claims: serde_json::Value = Es256Verifier
//!     .verify_jwt_signature(signed.as_str(), &public_jwk)
//!     .unwrap();
//! assert_eq!(claims["sub"], "https://wallet.example");
//! ```
//!
//! ## Compute the hardware key tag of a JWK
//!
//! ```
//! use bh_jws_utils::{base64_std_encode, jwk_key_tag, Es256Signer, Signer};
//!
//! let signer = Es256Signer::generate("hardware-key".to_string()).unwrap();
//! let tag = jwk_key_tag(&signer.public_jwk().unwrap()).unwrap();
//!
//! println!("hardware key tag: {}", base64_std_encode(tag));
//! ```

#[cfg(feature = "openssl")]
mod certificate;
#[cfg(feature = "openssl")]
mod openssl_impl;
#[cfg(feature = "openssl")]
mod public_key;

mod error;
mod jwk;
mod traits;
mod utils;

#[cfg(feature = "openssl")]
pub use certificate::*;
pub use error::*;
pub use jwk::*;
pub use jwt;
#[cfg(feature = "openssl")]
pub use openssl_impl::*;
#[cfg(feature = "openssl")]
pub use public_key::*;
pub use traits::*;
pub use utils::*;

/// [`serde_json::json`] for objects, evaluating to a [`serde_json::Map`].
///
/// Panics when the literal is not an object.
#[macro_export]
macro_rules! json_object {
    ($stuff:tt) => {
        match ::serde_json::json!($stuff) {
            ::serde_json::Value::Object(o) => o,
            _ => unreachable!("not a JSON object literal"),
        }
    };
}
