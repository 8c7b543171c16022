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

use bh_device_attestation::{AttestationError, Rejection};

/// The JWT kinds handled by the wallet provider.
#[derive(strum_macros::Display, Debug, PartialEq, Clone, Copy)]
pub enum TokenKind {
    /// The assertion a wallet instance signs with its hardware key.
    #[strum(to_string = "assertion")]
    Assertion,
    /// The wallet attestation issued by the wallet provider.
    #[strum(to_string = "wallet_attestation")]
    WalletAttestation,
}

impl TokenKind {
    fn field(&self) -> &'static str {
        match self {
            Self::Assertion => "assertion",
            Self::WalletAttestation => "wallet_attestation",
        }
    }
}

/// Error type of the wallet provider.
#[derive(strum_macros::Display, Debug, PartialEq, Clone)]
pub enum WalletError {
    /// The device attestation was rejected.
    #[strum(to_string = "{0}")]
    Attestation(AttestationError),
    /// The challenge is not valid base64url.
    #[strum(to_string = "Invalid challenge")]
    ChallengeInvalid,
    /// The `hardware_key_tag` claim is absent.
    #[strum(to_string = "Missing hardware key tag")]
    HardwareKeyTagMissing,
    /// The hardware key tag does not identify the confirmation key.
    #[strum(to_string = "Hardware key tag mismatch")]
    KeyTagMismatch,
    /// The `cnf` claim is absent or has no usable `jwk` member.
    #[strum(to_string = "Invalid confirmation key")]
    ConfirmationKeyInvalid,
    /// The confirmation key is neither `EC` nor `RSA`.
    #[strum(to_string = "Unsupported confirmation key type")]
    UnsupportedKeyType,
    /// The nonce cannot be decrypted or carries foreign claims.
    #[strum(to_string = "Invalid nonce")]
    NonceInvalid,
    /// The nonce is past its expiration.
    #[strum(to_string = "Nonce expired")]
    NonceExpired,
    /// The nonce has already been redeemed.
    #[strum(to_string = "Nonce already used")]
    NonceReused,
    /// The consumed-nonce store could not be reached.
    #[strum(to_string = "Nonce store unavailable")]
    NonceStoreUnavailable,
    /// A JWT failed signature, header or claim validation.
    #[strum(to_string = "Invalid {0} token")]
    TokenInvalid(TokenKind),
    /// No wallet instance is registered for the hardware key tag.
    #[strum(to_string = "Wallet instance not found")]
    InstanceNotFound,
    /// The identity session could not be resolved to a person.
    #[strum(to_string = "Identity session could not be resolved")]
    IdentityUnresolved,
    /// The wallet instance store failed.
    #[strum(to_string = "Wallet store failed")]
    Store,
    /// The credential offer URL or its `credential_offer` parameter is malformed.
    #[strum(to_string = "Invalid credential offer")]
    CredentialOfferInvalid,
    /// No transaction code is cached for the pre-authorized code.
    #[strum(to_string = "Transaction code not found")]
    TxCodeNotFound,
    /// The transaction code cache failed.
    #[strum(to_string = "Transaction code cache failed")]
    TxCodeStoreUnavailable,
    /// The configuration is invalid.
    #[strum(to_string = "Invalid configuration: {0}")]
    Configuration(String),
    /// An OpenSSL call failed unexpectedly.
    #[strum(to_string = "Crypto backend failed")]
    CryptoBackend,
}

impl bherror::BhError for WalletError {}

impl WalletError {
    /// The request field the error refers to.
    pub fn field(&self) -> &'static str {
        match self {
            Self::Attestation(error) => error.field(),
            Self::ChallengeInvalid => "challenge",
            Self::HardwareKeyTagMissing | Self::KeyTagMismatch => "hardware_key_tag",
            Self::ConfirmationKeyInvalid | Self::UnsupportedKeyType => "cnf",
            Self::NonceInvalid
            | Self::NonceExpired
            | Self::NonceReused
            | Self::NonceStoreUnavailable => "nonce",
            Self::TokenInvalid(kind) => kind.field(),
            Self::InstanceNotFound | Self::Store => "instance",
            Self::IdentityUnresolved => "session",
            Self::CredentialOfferInvalid => "credential_offer",
            Self::TxCodeNotFound | Self::TxCodeStoreUnavailable => "tx_code",
            Self::Configuration(_) => "configuration",
            Self::CryptoBackend => "server",
        }
    }

    /// The machine readable reason code.
    pub fn reason(&self) -> &'static str {
        match self {
            Self::Attestation(error) => error.reason(),
            Self::HardwareKeyTagMissing => "missing",
            Self::UnsupportedKeyType => "unsupported",
            Self::NonceExpired => "expired",
            Self::NonceReused => "reused",
            Self::InstanceNotFound | Self::TxCodeNotFound => "not_found",
            Self::NonceStoreUnavailable
            | Self::Store
            | Self::TxCodeStoreUnavailable
            | Self::CryptoBackend => "unavailable",
            Self::ChallengeInvalid
            | Self::KeyTagMismatch
            | Self::ConfirmationKeyInvalid
            | Self::NonceInvalid
            | Self::TokenInvalid(_)
            | Self::IdentityUnresolved
            | Self::CredentialOfferInvalid
            | Self::Configuration(_) => "invalid",
        }
    }

    /// The caller-facing form of this error.
    pub fn rejection(&self) -> Rejection {
        Rejection {
            field: self.field(),
            reason: self.reason(),
        }
    }

    /// Whether the error is caused by the server rather than by the request.
    pub fn is_internal(&self) -> bool {
        matches!(
            self,
            Self::NonceStoreUnavailable
                | Self::Store
                | Self::TxCodeStoreUnavailable
                | Self::Configuration(_)
                | Self::CryptoBackend
        ) || matches!(self, Self::Attestation(AttestationError::CryptoBackend))
    }
}

impl From<AttestationError> for WalletError {
    fn from(error: AttestationError) -> Self {
        Self::Attestation(error)
    }
}

#[cfg(feature = "axum")]
impl bherror::adapters::axum::IntoAxumResponse for WalletError {
    fn http_status_code(&self) -> bherror::adapters::axum::StatusCode {
        use bherror::adapters::axum::StatusCode;

        if self.is_internal() {
            return StatusCode::INTERNAL_SERVER_ERROR;
        }

        match self {
            Self::InstanceNotFound
            | Self::TokenInvalid(_)
            | Self::IdentityUnresolved
            | Self::NonceInvalid
            | Self::NonceExpired
            | Self::NonceReused => StatusCode::UNAUTHORIZED,
            _ => StatusCode::BAD_REQUEST,
        }
    }
}

/// The [`bherror::Result`] type with the error type of [`WalletError`].
pub type Result<T> = bherror::Result<T, WalletError>;
