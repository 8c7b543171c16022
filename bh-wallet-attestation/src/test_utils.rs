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

//! In-memory collaborators and key fixtures for exercising the wallet provider.
//!
//! Do NOT use this module for production code, but only tests.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Mutex,
    },
};

use bhx5chain::Builder;
use openssl::{
    ec::{EcGroup, EcKey},
    nid::Nid,
    pkey::PKey,
};

use crate::{
    IdentityResolver, InstanceKey, InstanceRegistration, Person, WalletInstance, WalletSigningKey,
    WalletStore,
};

/// Status of every instance created by [`InMemoryWalletStore`].
pub const ACTIVE: &str = "active";

/// Generates a P-256 key and a certificate for it, concatenated in one PEM document.
pub fn signing_key_pem() -> String {
    let private_key =
        EcKey::generate(&EcGroup::from_curve_name(Nid::X9_62_PRIME256V1).unwrap()).unwrap();
    let public_key = PKey::from_ec_key(
        EcKey::from_public_key(private_key.group(), private_key.public_key()).unwrap(),
    )
    .unwrap();

    let certificate = Builder::self_signed_root("Test Wallet Provider CA")
        .unwrap()
        .issue_leaf(&public_key, &[("CN", "Test Wallet Provider")], &[])
        .unwrap();

    let mut pem = String::from_utf8(certificate.to_pem().unwrap()).unwrap();
    pem.push_str(&String::from_utf8(private_key.private_key_to_pem().unwrap()).unwrap());
    pem
}

/// A freshly generated wallet provider signing key.
pub fn signing_key() -> WalletSigningKey {
    WalletSigningKey::from_pem(signing_key_pem().as_bytes(), None).unwrap()
}

/// A [`WalletStore`] keeping instances in memory.
#[derive(Debug, Default)]
pub struct InMemoryWalletStore {
    instances: Mutex<HashMap<String, (InstanceRegistration, WalletInstance)>>,
    ids: AtomicU64,
}

impl InMemoryWalletStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// The registration stored for `hardware_key_tag`.
    pub fn registration(&self, hardware_key_tag: &str) -> Option<InstanceRegistration> {
        self.instances
            .lock()
            .unwrap()
            .get(hardware_key_tag)
            .map(|(registration, _)| registration.clone())
    }

    /// Number of stored instances.
    pub fn len(&self) -> usize {
        self.instances.lock().unwrap().len()
    }

    /// Whether no instance is stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

}

impl WalletStore for InMemoryWalletStore {
    type Err = std::convert::Infallible;

    async fn create_instance(
        &self,
        registration: InstanceRegistration,
    ) -> Result<WalletInstance, Self::Err> {
        let instance = WalletInstance {
            id: self.ids.fetch_add(1, Ordering::Relaxed).to_string(),
            status: ACTIVE.to_owned(),
            hardware_key_tag: registration.hardware_key_tag.clone(),
            person: Some(registration.person.clone()),
        };
        self.instances.lock().unwrap().insert(
            registration.hardware_key_tag.clone(),
            (registration, instance.clone()),
        );
        Ok(instance)
    }

    async fn instance_key(&self, hardware_key_tag: &str) -> Result<Option<InstanceKey>, Self::Err> {
        Ok(self.registration(hardware_key_tag).map(|registration| InstanceKey {
            public_key: registration.public_key,
            person: Some(registration.person),
        }))
    }

    async fn instance_by_tag(
        &self,
        hardware_key_tag: &str,
    ) -> Result<Option<WalletInstance>, Self::Err> {
        Ok(self
            .instances
            .lock()
            .unwrap()
            .get(hardware_key_tag)
            .map(|(_, instance)| instance.clone()))
    }
}

/// Error of [`StaticIdentityResolver`] for sessions it does not know.
#[derive(strum_macros::Display, Debug, PartialEq, Clone)]
pub enum IdentityError {
    /// The bearer token names no session.
    #[strum(to_string = "Unknown identity session")]
    UnknownSession,
}

impl std::error::Error for IdentityError {}

/// An [`IdentityResolver`] over a fixed set of sessions.
#[derive(Debug, Default, Clone)]
pub struct StaticIdentityResolver {
    sessions: HashMap<String, Person>,
}

impl StaticIdentityResolver {
    /// Creates a resolver knowing no sessions.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds the session `bearer_token` authenticating `person`.
    pub fn with_session(mut self, bearer_token: impl Into<String>, person: Person) -> Self {
        self.sessions.insert(bearer_token.into(), person);
        self
    }
}

impl IdentityResolver for StaticIdentityResolver {
    type Err = IdentityError;

    async fn person(&self, bearer_token: &str) -> Result<Person, Self::Err> {
        self.sessions
            .get(bearer_token)
            .cloned()
            .ok_or(IdentityError::UnknownSession)
    }
}
