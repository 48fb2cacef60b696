//! # Secret Builder
//!
//! Turns a resolved pair into the deterministic data map of a connection
//! secret: credentials plus every connection string with the credentials
//! spliced into its authority.

use crate::constants::{LABEL_CLUSTER_NAME, LABEL_PROJECT_ID, LABEL_TYPE, LABEL_TYPE_CREDENTIAL};
use crate::controller::connsecret::pair::ResourcePair;
use crate::crd::{DatabaseDeployment, DatabaseUser};
use crate::provider::{CredentialError, CredentialReader};
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use k8s_openapi::ByteString;
use std::collections::BTreeMap;
use thiserror::Error;
use zeroize::Zeroizing;

pub const USERNAME_KEY: &str = "username";
pub const PASSWORD_KEY: &str = "password";
pub const STANDARD_KEY: &str = "standard";
pub const STANDARD_SRV_KEY: &str = "standardSrv";
pub const PRIVATE_KEY: &str = "private";
pub const PRIVATE_SRV_KEY: &str = "privateSrv";
pub const PRIVATE_SRV_SHARD_KEY: &str = "privateSrvShard";

/// Connection strings of one private link
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PrivateLinkUrls {
    pub private: String,
    pub private_srv: String,
    pub private_srv_shard: String,
}

/// Everything a connection secret is derived from. Never persisted on its own.
#[derive(Clone)]
pub struct ConnectionData {
    pub username: String,
    pub password: Zeroizing<String>,
    pub standard: String,
    pub standard_srv: String,
    pub private_links: Vec<PrivateLinkUrls>,
}

impl std::fmt::Debug for ConnectionData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionData")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("standard", &self.standard)
            .field("standard_srv", &self.standard_srv)
            .field("private_links", &self.private_links.len())
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnectionStringError {
    #[error("connection string {key:?} has no scheme")]
    MissingScheme { key: String },
}

impl ConnectionData {
    /// Collect connection strings from the deployment. The legacy single
    /// private pair, when set, becomes the first private link.
    #[must_use]
    pub fn new(
        deployment: &DatabaseDeployment,
        user: &DatabaseUser,
        password: Zeroizing<String>,
    ) -> Self {
        let strings = deployment.connection_strings();

        let mut private_links = Vec::with_capacity(strings.private_endpoint.len() + 1);
        if !strings.private.is_empty() {
            private_links.push(PrivateLinkUrls {
                private: strings.private.clone(),
                private_srv: strings.private_srv.clone(),
                private_srv_shard: String::new(),
            });
        }
        private_links.extend(strings.private_endpoint.iter().map(|pe| PrivateLinkUrls {
            private: pe.connection_string.clone(),
            private_srv: pe.srv_connection_string.clone(),
            private_srv_shard: pe.srv_shard_optimized_connection_string.clone(),
        }));

        Self {
            username: user.username().to_string(),
            password,
            standard: strings.standard,
            standard_srv: strings.standard_srv,
            private_links,
        }
    }

    /// Secret data map with credentials spliced into every connection string.
    ///
    /// `private` and `privateSrv` are always present so consumers can rely on
    /// the keys; the i-th private link after the first is suffixed with `i`.
    pub fn to_secret_data(&self) -> Result<BTreeMap<String, ByteString>, ConnectionStringError> {
        let mut data = BTreeMap::new();
        let mut put = |key: String, value: &str| {
            data.insert(key, ByteString(value.as_bytes().to_vec()));
        };

        put(USERNAME_KEY.to_string(), &self.username);
        put(PASSWORD_KEY.to_string(), &self.password);
        put(STANDARD_KEY.to_string(), &self.credentialed(STANDARD_KEY, &self.standard)?);
        put(
            STANDARD_SRV_KEY.to_string(),
            &self.credentialed(STANDARD_SRV_KEY, &self.standard_srv)?,
        );
        put(PRIVATE_KEY.to_string(), "");
        put(PRIVATE_SRV_KEY.to_string(), "");

        for (i, link) in self.private_links.iter().enumerate() {
            let suffix = if i == 0 { String::new() } else { i.to_string() };
            for (key, url) in [
                (PRIVATE_KEY, &link.private),
                (PRIVATE_SRV_KEY, &link.private_srv),
                (PRIVATE_SRV_SHARD_KEY, &link.private_srv_shard),
            ] {
                let key = format!("{key}{suffix}");
                let value = self.credentialed(&key, url)?;
                put(key, &value);
            }
        }

        Ok(data)
    }

    fn credentialed(&self, key: &str, url: &str) -> Result<String, ConnectionStringError> {
        with_credentials(url, &self.username, &self.password).ok_or_else(|| {
            ConnectionStringError::MissingScheme {
                key: key.to_string(),
            }
        })
    }
}

/// Read the password and collect connection data for a resolved pair.
pub async fn read_connection_data(
    pair: &ResourcePair,
    credentials: &dyn CredentialReader,
) -> Result<ConnectionData, CredentialError> {
    let password = credentials.read_password(&pair.user).await?;
    Ok(ConnectionData::new(&pair.deployment, &pair.user, password))
}

/// Splice percent-encoded credentials into the authority of `url`,
/// replacing any user info already present. Multi-host authorities
/// (`a:27017,b:27017`) are kept as they are.
///
/// Empty input stays empty; `None` when `url` has no `scheme://`.
#[must_use]
pub fn with_credentials(url: &str, username: &str, password: &str) -> Option<String> {
    if url.is_empty() {
        return Some(String::new());
    }
    let (scheme, rest) = url.split_once("://")?;
    if scheme.is_empty() {
        return None;
    }

    let authority_end = rest.find(['/', '?', '#']).unwrap_or(rest.len());
    let (authority, tail) = rest.split_at(authority_end);
    let hosts = authority.rsplit_once('@').map_or(authority, |(_, hosts)| hosts);

    let user = urlencoding::encode(username);
    let userinfo = if password.is_empty() {
        user.into_owned()
    } else {
        format!("{user}:{}", urlencoding::encode(password))
    };
    Some(format!("{scheme}://{userinfo}@{hosts}{tail}"))
}

/// Labels every connection secret carries
#[must_use]
pub fn connection_labels(project_id: &str, cluster_name: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        (LABEL_TYPE.to_string(), LABEL_TYPE_CREDENTIAL.to_string()),
        (LABEL_PROJECT_ID.to_string(), project_id.to_string()),
        (LABEL_CLUSTER_NAME.to_string(), cluster_name.to_string()),
    ])
}

/// Desired state of a connection secret
#[must_use]
pub fn desired_secret(
    namespace: &str,
    name: &str,
    labels: BTreeMap<String, String>,
    data: BTreeMap<String, ByteString>,
    owner: Option<OwnerReference>,
) -> Secret {
    Secret {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            labels: Some(labels),
            owner_references: owner.map(|o| vec![o]),
            ..Default::default()
        },
        data: Some(data),
        type_: Some("Opaque".to_string()),
        ..Default::default()
    }
}
