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

//! Apple App Attest.
//!
//! See <https://developer.apple.com/documentation/devicecheck/validating-apps-that-connect-to-your-server>.

use bherror::{
    traits::{ErrorContext as _, ForeignError as _, PropagateError as _},
    Error,
};
use bhx5chain::{TrustAnchor, X5Chain};
use openssl::{memcmp, sha::sha256};
use x509_parser::der_parser::{error::BerError, parse_der};

use crate::{
    verifier::{check_key_tag, find_extension, verify_chain, PlatformVerifier},
    AttestationError, AttestationStatement, DeviceType, Result, VerifiedAttestation,
};

/// OID of the credential certificate extension holding the attestation nonce.
pub const NONCE_OID: &str = "1.2.840.113635.100.8.2";

/// Context-specific tag of the nonce inside the extension sequence.
const NONCE_TAG: u32 = 1;

/// Computes the nonce an App Attest credential certificate must carry:
/// `SHA-256(authData ‖ SHA-256(challenge))`.
pub fn expected_nonce(auth_data: &[u8], challenge: &[u8]) -> [u8; 32] {
    let mut message = auth_data.to_vec();
    message.extend_from_slice(&sha256(challenge));

    sha256(&message)
}

/// Decodes the DER encoded nonce extension, `SEQUENCE { [1] EXPLICIT OCTET STRING }`.
pub fn parse_nonce(der: &[u8]) -> Result<Vec<u8>> {
    parse_nonce_extension(der)
        .foreign_err(|| AttestationError::ExtensionInvalid)
        .ctx(|| "malformed nonce extension")
}

fn parse_nonce_extension(der: &[u8]) -> std::result::Result<Vec<u8>, BerError> {
    let (_, parsed) = parse_der(der)?;
    let tagged = parsed
        .as_sequence()?
        .iter()
        .find(|element| element.tag().0 == NONCE_TAG)
        .ok_or(BerError::BerValueError)?;

    // explicit tagging wraps the complete octet string
    let (_, nonce) = parse_der(tagged.content.as_slice()?)?;

    Ok(nonce.as_slice()?.to_vec())
}

fn check_nonce(chain: &X5Chain, auth_data: &[u8], challenge: &[u8]) -> Result<()> {
    let extension = find_extension(chain.leaf_certificate(), NONCE_OID)?
        .ok_or_else(|| Error::root(AttestationError::ExtensionMissing))
        .ctx(|| format!("credential certificate lacks {NONCE_OID}"))?;
    let nonce = parse_nonce(&extension)?;
    let expected = expected_nonce(auth_data, challenge);

    if nonce.len() != expected.len() || !memcmp::eq(&nonce, &expected) {
        return Err(Error::root(AttestationError::ChallengeMismatch));
    }

    Ok(())
}

/// Verifies Apple App Attest statements against a pinned root.
#[derive(Debug, Clone)]
pub struct AppleVerifier {
    root: TrustAnchor,
}

impl AppleVerifier {
    /// Creates a verifier trusting `root`.
    pub fn new(root: TrustAnchor) -> Self {
        Self { root }
    }
}

impl PlatformVerifier for AppleVerifier {
    fn verify(
        &self,
        statement: &AttestationStatement,
        challenge: &[u8],
        hardware_key_tag: &str,
        now: u64,
    ) -> Result<VerifiedAttestation> {
        let auth_data = statement
            .auth_data()
            .ok_or_else(|| Error::root(AttestationError::DecodingError))
            .ctx(|| "`authData` is missing")?;

        let chain = verify_chain(statement.x5c(), &self.root, now)?;

        check_nonce(&chain, auth_data, challenge)?;

        let public_key = chain
            .leaf_certificate_key()
            .with_err(|| AttestationError::CertificateInvalid)?;
        check_key_tag(&public_key, hardware_key_tag)?;

        VerifiedAttestation::new(DeviceType::Ios, hardware_key_tag, &public_key, None)
    }
}
