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

use bherror::traits::{ErrorContext as _, ForeignError as _};
use openssl::{
    error::ErrorStack,
    pkey::{PKey, Public},
    stack::Stack,
    x509::{
        store::{X509Store, X509StoreBuilder},
        verify::{X509VerifyFlags, X509VerifyParam},
        X509StoreContext, X509,
    },
};

use crate::{Error, Result, TrustAnchor};

/// An attestation certificate chain verified against a pinned [`TrustAnchor`].
///
/// Attestation statements carry their certificates in no guaranteed order, so the chain is
/// partitioned by role rather than by position:
///
/// - self-signed certificates are roots, trusted only if their key is the anchor key,
/// - the single non-CA certificate with the digital signature key usage is the leaf,
/// - everything else is an intermediate.
///
/// A value of this type only exists for chains with a valid path from the leaf to a trusted
/// root at the verification time.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct X5Chain {
    leaf: X509,
    intermediates: Vec<X509>,
}

impl X5Chain {
    /// Verifies DER encoded certificates against `anchor` at `now` (seconds since the Unix
    /// epoch).
    ///
    /// # Errors
    ///
    /// - [`Error::LeafNotFound`] if there is no leaf candidate, or more than one.
    /// - [`Error::CertificateInvalid`] if a certificate is malformed or no path validates.
    pub fn verify(chain: &[Vec<u8>], anchor: &TrustAnchor, now: u64) -> Result<Self> {
        let Partition {
            leaf,
            intermediates,
            mut roots,
        } = partition(chain, anchor)?;

        if let Some(certificate) = anchor.certificate() {
            roots = vec![certificate.clone()];
        }

        // It is "ugly" that we need to clone here, but keeping intermediates as a Stack messes up
        // Debug, Clone and PartialEq.
        let untrusted = chain_to_stack(intermediates.clone())?;
        let trust = certs_to_store(roots, now)?;

        let mut context = X509StoreContext::new().foreign_err(|| Error::CertificateInvalid)?;
        let is_valid = context
            .init(&trust, &leaf, &untrusted, |ctx| {
                clean_up_after_openssl(|| ctx.verify_cert())
            })
            .foreign_err(|| Error::CertificateInvalid)?;

        if !is_valid {
            return Err(bherror::Error::root(Error::CertificateInvalid)
                .ctx("Chain validation against the trust anchor failed")
                .ctx(format!(
                    "OpenSSL error on depth {}: {}",
                    context.error_depth(),
                    context.error()
                )));
        }

        Ok(Self {
            leaf,
            intermediates,
        })
    }

    /// Returns the leaf certificate.
    pub fn leaf_certificate(&self) -> &X509 {
        &self.leaf
    }

    /// Returns the public key from the leaf certificate.
    pub fn leaf_certificate_key(&self) -> Result<PKey<Public>> {
        self.leaf
            .public_key()
            .foreign_err(|| Error::CertificateInvalid)
            .ctx(|| "Failed to access X509 public key")
    }

    /// Returns the intermediate certificates, in chain order.
    pub fn intermediates(&self) -> &[X509] {
        &self.intermediates
    }
}

#[derive(Debug)]
struct Partition {
    leaf: X509,
    intermediates: Vec<X509>,
    roots: Vec<X509>,
}

fn partition(chain: &[Vec<u8>], anchor: &TrustAnchor) -> Result<Partition> {
    let mut leaves = Vec::new();
    let mut intermediates = Vec::new();
    let mut roots = Vec::new();

    for (i, der) in chain.iter().enumerate() {
        let certificate = X509::from_der(der)
            .foreign_err(|| Error::CertificateInvalid)
            .ctx(|| format!("certificate {i} is not valid DER"))?;
        let role = classify(der).ctx(|| format!("certificate {i}"))?;

        match role {
            CertificateRole::SelfSigned => {
                let key = certificate
                    .public_key()
                    .foreign_err(|| Error::CertificateInvalid)?;
                if anchor.is_anchor_key(&key)? {
                    roots.push(certificate);
                }
            }
            CertificateRole::Leaf => leaves.push(certificate),
            CertificateRole::Intermediate => intermediates.push(certificate),
        }
    }

    let leaf = match <[X509; 1]>::try_from(leaves) {
        Ok([leaf]) => leaf,
        Err(leaves) => {
            return Err(bherror::Error::root(Error::LeafNotFound)
                .ctx(format!("expected one leaf certificate, found {}", leaves.len())))
        }
    };

    Ok(Partition {
        leaf,
        intermediates,
        roots,
    })
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum CertificateRole {
    SelfSigned,
    Leaf,
    Intermediate,
}

fn classify(der: &[u8]) -> Result<CertificateRole> {
    let (_, certificate) =
        x509_parser::parse_x509_certificate(der).foreign_err(|| Error::CertificateInvalid)?;

    if certificate.subject().as_raw() == certificate.issuer().as_raw() {
        return Ok(CertificateRole::SelfSigned);
    }

    let is_ca = certificate
        .basic_constraints()
        .foreign_err(|| Error::CertificateInvalid)?
        .is_some_and(|constraints| constraints.value.ca);
    let signs = certificate
        .key_usage()
        .foreign_err(|| Error::CertificateInvalid)?
        .is_some_and(|usage| usage.value.digital_signature());

    if signs && !is_ca {
        Ok(CertificateRole::Leaf)
    } else {
        Ok(CertificateRole::Intermediate)
    }
}

/// Helper method for converting certificates to `Stack<x509>`.
fn chain_to_stack(chain: impl IntoIterator<Item = X509>) -> Result<Stack<X509>> {
    let mut intermediates = Stack::new().foreign_err(|| Error::CertificateInvalid)?;

    for cert in chain {
        intermediates
            .push(cert)
            .foreign_err(|| Error::CertificateInvalid)?;
    }

    Ok(intermediates)
}

/// Helper method for converting trusted roots to `X509Store` checking validity at `now`.
fn certs_to_store(certificates: impl IntoIterator<Item = X509>, now: u64) -> Result<X509Store> {
    let mut param = X509VerifyParam::new().foreign_err(|| Error::CertificateInvalid)?;
    param
        .set_flags(X509VerifyFlags::CHECK_SS_SIGNATURE)
        .foreign_err(|| Error::CertificateInvalid)?;
    param.set_time(now as _);

    let mut builder = X509StoreBuilder::new().foreign_err(|| Error::CertificateInvalid)?;
    builder
        .set_param(&param)
        .foreign_err(|| Error::CertificateInvalid)?;

    for cert in certificates {
        builder
            .add_cert(cert)
            .foreign_err(|| Error::CertificateInvalid)?;
    }

    Ok(builder.build())
}

/// Wrap a closure calling OpenSSL with low-level cleanup to make it safer in an async context.
///
/// Usage: wrap an `openssl` call in a closure and call this function with it.
/// Try to make the closure as small as possible.
fn clean_up_after_openssl<T>(
    f: impl FnOnce() -> std::result::Result<T, ErrorStack>,
) -> std::result::Result<T, ErrorStack> {
    let return_value = f()?;

    // The call succeeded, so the error stack is expected to be clean. Clear it if it isn't.
    drop(ErrorStack::get());

    Ok(return_value)
}
