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

/// A JWK that cannot be turned into a public key.
#[derive(strum_macros::Display, Debug, PartialEq, Clone)]
pub enum FormatError {
    /// A member is missing or malformed.
    #[strum(to_string = "Malformed JWK: {0}")]
    JwkParsingFailed(String),
    /// The `kty` is neither `EC` nor `RSA`.
    #[strum(to_string = "Unsupported key type: {0}")]
    UnsupportedKeyType(String),
}

impl bherror::BhError for FormatError {}

/// A JWS header that cannot be honoured.
#[derive(strum_macros::Display, Debug, PartialEq, Clone)]
pub enum SignatureError {
    /// The `alg` names no ECDSA algorithm.
    #[strum(to_string = "Unsupported signing algorithm {0}")]
    UnsupportedAlgorithm(String),
}

impl bherror::BhError for SignatureError {}

/// Failure of key handling in the OpenSSL backend.
#[derive(strum_macros::Display, Debug, PartialEq, Clone)]
pub enum CryptoError {
    /// No key pair could be generated.
    #[strum(to_string = "Key generation failed")]
    KeyGenerationFailed,
    /// OpenSSL failed unexpectedly.
    #[strum(to_string = "Crypto backend failed")]
    CryptoBackend,
    /// The certificate carries no usable public key.
    #[strum(to_string = "Invalid certificate")]
    InvalidCertificate,
    /// The key type, curve or algorithm is not handled.
    #[strum(to_string = "Unsupported: {0}")]
    Unsupported(String),
    /// The public key is malformed.
    #[strum(to_string = "Invalid public key")]
    InvalidPublicKey,
    /// A [`Signer`](crate::Signer) does not hold the key of its certificate.
    #[strum(to_string = "Public key mismatch")]
    PublicKeyMismatch,
}

impl bherror::BhError for CryptoError {}
