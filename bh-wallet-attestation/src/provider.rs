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

use std::sync::Arc;

use bh_device_attestation::AttestationVerifier;
use bh_jws_utils::{base64_url_decode, JwkSet};
use bherror::{
    traits::{ErrorContext as _, ForeignError as _, Loggable as _, PropagateError as _},
    Error,
};
use openssl::sha::sha256;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{
    assertion::Assertion,
    attestation_jwt::{self, WalletAttestationClaims},
    Configuration, IdentityResolver, InMemoryTtlCache, InstanceRegistration, NonceResponse,
    NonceService, Person, Result, TokenKind, TtlCache, WalletAttestationResponse, WalletError,
    WalletInstance, WalletSigningKey, WalletStore, WalletUrls, ANONYMOUS,
    DEFAULT_ATTESTATION_VALIDITY,
};

/// Body of a wallet instance registration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttestationRequest {
    /// A nonce issued by the wallet provider, as returned in [`NonceResponse::c_nonce`].
    pub challenge: String,
    /// The base64url encoded attestation statement of the device.
    pub key_attestation: String,
    /// Standard base64 SHA-256 digest of the attested public point.
    pub hardware_key_tag: String,
}

/// Metadata published by the wallet provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WalletMetadata {
    /// The wallet public URL.
    pub credential_issuer: String,
    /// Where nonces are issued.
    pub nonce_endpoint: String,
    /// Credential configurations, none are issued by the wallet provider itself.
    pub credential_configurations_supported: Map<String, Value>,
}

/// The wallet provider.
///
/// Registers wallet instances from device attestations, exchanges instance assertions for
/// wallet attestations and verifies wallet attestations presented on later calls.
pub struct WalletProvider<S, I, C = InMemoryTtlCache<bool>> {
    urls: WalletUrls,
    verifier: AttestationVerifier,
    nonces: NonceService<C>,
    signing_key: Arc<WalletSigningKey>,
    attestation_validity: u64,
    store: S,
    identity: I,
}

impl<S: WalletStore, I: IdentityResolver> WalletProvider<S, I> {
    /// Creates a wallet provider from a validated `configuration`.
    ///
    /// Consumed nonces are recorded in process memory.
    pub fn from_configuration(
        configuration: &Configuration,
        verifier: AttestationVerifier,
        store: S,
        identity: I,
    ) -> Result<Self> {
        configuration.validate()?;

        let urls = configuration.urls()?;
        let nonces = NonceService::new(
            configuration.nonce_key()?,
            urls.public(),
            configuration.nonce_ttl_secs,
        );
        let signing_key = Arc::new(configuration.signing_key()?);

        Ok(
            Self::new(urls, verifier, nonces, signing_key, store, identity)
                .with_attestation_validity(configuration.attestation_validity_secs),
        )
    }
}

impl<S: WalletStore, I: IdentityResolver, C: TtlCache<bool>> WalletProvider<S, I, C> {
    /// Creates a wallet provider from its parts.
    ///
    /// The `nonces` must be issued for [`WalletUrls::public`].
    pub fn new(
        urls: WalletUrls,
        verifier: AttestationVerifier,
        nonces: NonceService<C>,
        signing_key: Arc<WalletSigningKey>,
        store: S,
        identity: I,
    ) -> Self {
        Self {
            urls,
            verifier,
            nonces,
            signing_key,
            attestation_validity: DEFAULT_ATTESTATION_VALIDITY,
            store,
            identity,
        }
    }

    /// Sets the validity of issued wallet attestations, in seconds.
    pub fn with_attestation_validity(mut self, attestation_validity: u64) -> Self {
        self.attestation_validity = attestation_validity;
        self
    }

    /// The URLs of the wallet provider.
    pub fn urls(&self) -> &WalletUrls {
        &self.urls
    }

    /// The signing key of the wallet provider.
    pub fn signing_key(&self) -> &Arc<WalletSigningKey> {
        &self.signing_key
    }

    /// The wallet instance store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// The JWK Set verifying wallet attestations.
    pub fn jwks(&self) -> &JwkSet {
        self.signing_key.jwks()
    }

    /// The wallet provider metadata.
    pub fn metadata(&self) -> WalletMetadata {
        WalletMetadata {
            credential_issuer: self.urls.public().to_owned(),
            nonce_endpoint: self.urls.nonce_endpoint(),
            credential_configurations_supported: Map::new(),
        }
    }

    /// Issues a nonce bound to the identity `session`, or an anonymous one.
    pub fn issue_nonce(&self, session: Option<&str>, now: u64) -> Result<NonceResponse> {
        Ok(NonceResponse {
            c_nonce: self.nonces.issue(session, now)?,
        })
    }

    /// Redeems a nonce and returns its audience.
    pub fn redeem_nonce(&self, nonce: &str, now: u64) -> Result<String> {
        self.nonces.redeem(nonce, now)
    }

    /// Registers the wallet instance holding the attested hardware key.
    ///
    /// The device must have attested its key over the SHA-256 digest of the decoded
    /// challenge. The challenge is then redeemed as a nonce; its audience selects the person
    /// the instance is bound to.
    pub async fn register_instance(
        &self,
        request: &AttestationRequest,
        now: u64,
    ) -> Result<WalletInstance> {
        let challenge =
            base64_url_decode(&request.challenge).foreign_err(|| WalletError::ChallengeInvalid)?;

        let verified = self
            .verifier
            .verify(
                &request.key_attestation,
                &sha256(&challenge),
                &request.hardware_key_tag,
                now,
            )
            .match_err(|error| WalletError::Attestation(error.clone()))?;

        let audience = self.nonces.redeem(&request.challenge, now)?;
        let person = self.person(&audience).await?;

        let registration = InstanceRegistration {
            hardware_key_tag: verified.hardware_key_tag().to_owned(),
            public_key: verified.public_key().to_owned(),
            device_type: verified.device_type(),
            certs_issued: verified.certs_issued(),
            person,
        };
        let instance = self
            .store
            .create_instance(registration)
            .await
            .foreign_err(|| WalletError::Store)
            .log_err()?;

        log::info!(
            "Registered {} wallet instance {}",
            verified.device_type().as_str(),
            instance.hardware_key_tag
        );

        Ok(instance)
    }

    async fn person(&self, audience: &str) -> Result<Person> {
        if audience == ANONYMOUS {
            return Ok(Person::anonymous());
        }

        let mut person = self
            .identity
            .person(audience)
            .await
            .foreign_err(|| WalletError::IdentityUnresolved)
            .log_err()?;
        if person.requester_code.is_none() {
            person.requester_code = Some(person.code.clone());
        }

        Ok(person)
    }

    /// Exchanges an instance assertion for a wallet attestation.
    ///
    /// The assertion is verified under the public key registered for the hardware key tag in
    /// its `kid` header.
    pub async fn process_assertion(
        &self,
        assertion: &str,
        now: u64,
    ) -> Result<WalletAttestationResponse> {
        let parsed = Assertion::parse(assertion)?;
        let hardware_key_tag = parsed.signer_key_tag()?.to_owned();

        let instance_key = self
            .store
            .instance_key(&hardware_key_tag)
            .await
            .foreign_err(|| WalletError::Store)
            .log_err()?
            .ok_or_else(|| Error::root(WalletError::InstanceNotFound))
            .ctx(|| format!("no public key for {hardware_key_tag}"))?;
        let instance_id = self.urls.instance_id(&hardware_key_tag);

        let verified = parsed.verify(&instance_key.public_key)?;
        let cnf = verified.validate(&self.urls, &instance_id, now)?.clone();
        if let Some(nonce) = verified.nonce() {
            self.nonces.redeem(nonce, now)?;
        }

        let wallet_attestation =
            self.issue_attestation(instance_id, cnf, instance_key.person.as_ref(), now)?;
        log::info!("Issued wallet attestation for instance {hardware_key_tag}");

        Ok(WalletAttestationResponse::jwt(wallet_attestation))
    }

    /// Signs a wallet attestation for `instance_id` confirming `cnf`.
    ///
    /// Claims of a non-anonymous `person` are included.
    pub fn issue_attestation(
        &self,
        instance_id: String,
        cnf: Value,
        person: Option<&Person>,
        now: u64,
    ) -> Result<String> {
        let claims = WalletAttestationClaims::new(
            &self.urls,
            instance_id,
            cnf,
            person,
            now,
            self.attestation_validity,
        );

        attestation_jwt::sign(claims, &self.signing_key)
    }

    /// Verifies a presented wallet attestation and resolves the instance it was issued to.
    ///
    /// Fails with [`WalletError::InstanceNotFound`] when the instance is not registered.
    pub async fn verify_attestation(&self, token: &str, now: u64) -> Result<WalletInstance> {
        let claims = attestation_jwt::verify(token, &self.signing_key, &self.urls, now)?;
        let hardware_key_tag = self
            .urls
            .hardware_key_tag(&claims.instance_id)
            .ok_or_else(|| Error::root(WalletError::TokenInvalid(TokenKind::WalletAttestation)))?;

        self.store
            .instance_by_tag(hardware_key_tag)
            .await
            .foreign_err(|| WalletError::Store)
            .log_err()?
            .ok_or_else(|| Error::root(WalletError::InstanceNotFound))
            .ctx(|| format!("no instance {}", claims.instance_id))
    }
}
