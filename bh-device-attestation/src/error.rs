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

use serde::Serialize;

/// Error returned when an attestation statement is rejected.
///
/// Every variant is terminal for the request that supplied the statement. Use
/// [`AttestationError::field`] and [`AttestationError::reason`], or
/// [`AttestationError::rejection`], to report it to the caller.
#[derive(strum_macros::Display, Debug, PartialEq, Clone)]
pub enum AttestationError {
    /// The statement is not valid base64url, CBOR, or lacks a required member.
    #[strum(to_string = "Malformed attestation statement")]
    DecodingError,
    /// The certificate chain does not validate against the pinned root.
    #[strum(to_string = "Invalid attestation certificate chain")]
    CertificateInvalid,
    /// The key is not protected by StrongBox hardware.
    #[strum(to_string = "Attested key is not hardware protected")]
    InsecureHardware,
    /// The leaf certificate lacks the attestation extension.
    #[strum(to_string = "Attestation extension not found")]
    ExtensionMissing,
    /// An attestation extension is present but cannot be decoded.
    #[strum(to_string = "Invalid attestation extension")]
    ExtensionInvalid,
    /// The attested challenge differs from the expected one.
    #[strum(to_string = "Attestation challenge mismatch")]
    ChallengeMismatch,
    /// The hardware key tag does not identify the attested key.
    #[strum(to_string = "Hardware key tag mismatch")]
    KeyTagMismatch,
    /// The statement format is neither Android nor Apple.
    #[strum(to_string = "Unsupported attestation format: {0}")]
    UnsupportedFormat(String),
    /// The attested key is not an elliptic curve key.
    #[strum(to_string = "Unsupported attested key type")]
    UnsupportedKeyType,
    /// An OpenSSL call failed unexpectedly.
    #[strum(to_string = "Crypto backend failed")]
    CryptoBackend,
}

impl bherror::BhError for AttestationError {}

impl AttestationError {
    /// The request field the error refers to.
    pub fn field(&self) -> &'static str {
        match self {
            Self::DecodingError | Self::UnsupportedFormat(_) => "key_attestation",
            Self::CertificateInvalid
            | Self::InsecureHardware
            | Self::UnsupportedKeyType
            | Self::CryptoBackend => "certificate",
            Self::ExtensionMissing | Self::ExtensionInvalid => "certificate:extension",
            Self::ChallengeMismatch => "challenge",
            Self::KeyTagMismatch => "hardware_key_tag",
        }
    }

    /// The machine readable reason code.
    pub fn reason(&self) -> &'static str {
        match self {
            Self::DecodingError
            | Self::CertificateInvalid
            | Self::ExtensionInvalid
            | Self::ChallengeMismatch
            | Self::KeyTagMismatch
            | Self::CryptoBackend => "invalid",
            Self::InsecureHardware => "insecure",
            Self::ExtensionMissing => "not_found",
            Self::UnsupportedFormat(_) | Self::UnsupportedKeyType => "unsupported",
        }
    }

    /// The caller-facing form of this error.
    pub fn rejection(&self) -> Rejection {
        Rejection {
            field: self.field(),
            reason: self.reason(),
        }
    }
}

/// A caller-facing validation error naming the offending field and a reason code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Rejection {
    /// Name of the offending request field, e.g. `hardware_key_tag`.
    pub field: &'static str,
    /// Reason code, e.g. `invalid`.
    pub reason: &'static str,
}

/// The [`bherror::Result`] type with the error type of [`AttestationError`].
pub type Result<T> = bherror::Result<T, AttestationError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejections_name_field_and_reason() {
        let cases = [
            (AttestationError::DecodingError, "key_attestation", "invalid"),
            (AttestationError::CertificateInvalid, "certificate", "invalid"),
            (AttestationError::InsecureHardware, "certificate", "insecure"),
            (
                AttestationError::ExtensionMissing,
                "certificate:extension",
                "not_found",
            ),
            (
                AttestationError::ExtensionInvalid,
                "certificate:extension",
                "invalid",
            ),
            (AttestationError::ChallengeMismatch, "challenge", "invalid"),
            (AttestationError::KeyTagMismatch, "hardware_key_tag", "invalid"),
            (
                AttestationError::UnsupportedFormat("tpm".to_owned()),
                "key_attestation",
                "unsupported",
            ),
        ];

        for (error, field, reason) in cases {
            assert_eq!(error.rejection(), Rejection { field, reason });
        }
    }

    #[test]
    fn rejection_serializes_as_object() {
        let rejection = AttestationError::InsecureHardware.rejection();

        assert_eq!(
            serde_json::to_value(rejection).unwrap(),
            serde_json::json!({ "field": "certificate", "reason": "insecure" })
        );
    }
}
