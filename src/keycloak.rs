//! Identity provider client.
//!
//! Wraps the OIDC directory's token and admin endpoints. Every call
//! classifies its failure: connection refused/reset and timeouts surface as
//! [`ServerError::ProviderUnavailable`] (retryable inside a saga budget),
//! while invalid grants, missing roles and uniqueness conflicts are terminal.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, Response, StatusCode};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::config;
use crate::error::{Result, ServerError};

/// Transport timeout on every provider call. The saga retry budget sits
/// above this, not inside it.
pub const PROVIDER_TIMEOUT: Duration = Duration::from_secs(5);

/// Refresh the cached service credential this long before it expires.
const CREDENTIAL_SKEW_SECS: i64 = 10;

/// Token bundle returned by the password grant.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct TokenBundle {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub id_token: Option<String>,
    pub expires_in: u64,
    #[serde(default)]
    pub refresh_expires_in: Option<u64>,
}

/// Introspection result for a caller-supplied token.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct Introspection {
    pub active: bool,
    #[serde(default)]
    pub sub: Option<String>,
    #[serde(default)]
    pub realm_access: crate::token::RoleSet,
}

/// A user as the provider knows it.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ProviderIdentity {
    pub id: String,
    pub username: String,
    #[serde(default)]
    pub email: Option<String>,
}

/// Entry of the provider's role catalog.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct RoleRef {
    pub id: String,
    pub name: String,
}

/// Administration surface of the identity provider.
///
/// Injected into the orchestrator so sagas can be exercised against a
/// scripted directory.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Look up an identity matching the username or the email.
    async fn find_identity(
        &self,
        username: &str,
        email: &str,
    ) -> Result<Option<ProviderIdentity>>;

    /// Create an identity, returning its provider-assigned id.
    async fn create_identity(
        &self,
        username: &str,
        email: &str,
        password: &str,
    ) -> Result<String>;

    /// Delete an identity. Deleting an unknown id is `NotFound`;
    /// compensation call sites tolerate it.
    async fn delete_identity(&self, external_id: &str) -> Result<()>;

    /// Resolve a realm role from the catalog, `RoleNotFound` when absent.
    async fn resolve_realm_role(&self, name: &str) -> Result<RoleRef>;

    /// Resolve a role scoped to the service client.
    async fn resolve_client_role(&self, name: &str) -> Result<RoleRef>;

    async fn assign_realm_role(
        &self,
        external_id: &str,
        role: &RoleRef,
    ) -> Result<()>;

    async fn assign_client_role(
        &self,
        external_id: &str,
        role: &RoleRef,
    ) -> Result<()>;

    async fn revoke_realm_role(
        &self,
        external_id: &str,
        role: &RoleRef,
    ) -> Result<()>;

    /// Resource-owner password grant. `InvalidCredentials` is terminal.
    async fn password_login(
        &self,
        username: &str,
        password: &str,
    ) -> Result<TokenBundle>;

    /// Re-validate a caller-supplied token before a privileged mutation.
    async fn introspect(&self, token: &str) -> Result<Introspection>;
}

#[derive(Clone, Debug)]
struct ServiceCredential {
    access_token: String,
    expires_at: DateTime<Utc>,
}

impl ServiceCredential {
    fn usable(&self) -> bool {
        self.expires_at - chrono::TimeDelta::seconds(CREDENTIAL_SKEW_SECS)
            > Utc::now()
    }
}

/// reqwest-backed [`IdentityProvider`] with a refresh-on-expiry service
/// credential cache.
pub struct Keycloak {
    http: Client,
    config: config::Keycloak,
    credential: RwLock<Option<ServiceCredential>>,
    client_uuid: RwLock<Option<String>>,
}

impl Keycloak {
    /// Create a new [`Keycloak`] client.
    pub fn new(config: config::Keycloak) -> Result<Self> {
        let http = Client::builder()
            .timeout(PROVIDER_TIMEOUT)
            .build()
            .map_err(|err| ServerError::Internal {
                details: err.to_string(),
            })?;

        Ok(Self {
            http,
            config,
            credential: RwLock::new(None),
            client_uuid: RwLock::new(None),
        })
    }

    fn token_url(&self) -> String {
        format!(
            "{}/realms/{}/protocol/openid-connect/token",
            self.config.address, self.config.realm
        )
    }

    fn admin_url(&self, path: &str) -> String {
        format!(
            "{}/admin/realms/{}{path}",
            self.config.address, self.config.realm
        )
    }

    fn secret(&self) -> &str {
        self.config.client_secret.as_deref().unwrap_or_default()
    }

    /// Client-credentials grant, cached until shortly before expiry.
    async fn service_token(&self) -> Result<String> {
        if let Some(credential) = self.credential.read().await.as_ref()
            && credential.usable()
        {
            return Ok(credential.access_token.clone());
        }

        let response = self
            .http
            .post(self.token_url())
            .form(&[
                ("grant_type", "client_credentials"),
                ("client_id", &self.config.client_id),
                ("client_secret", self.secret()),
            ])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(ServerError::ProviderForbidden);
        }

        let bundle: TokenBundle = response.json().await?;
        let credential = ServiceCredential {
            access_token: bundle.access_token.clone(),
            expires_at: Utc::now()
                + chrono::TimeDelta::seconds(bundle.expires_in as i64),
        };
        *self.credential.write().await = Some(credential);

        tracing::debug!("service credential refreshed");
        Ok(bundle.access_token)
    }

    /// Provider-assigned UUID of the service client, resolved once.
    async fn service_client_uuid(&self) -> Result<String> {
        if let Some(uuid) = self.client_uuid.read().await.as_ref() {
            return Ok(uuid.clone());
        }

        #[derive(Deserialize)]
        struct ClientEntry {
            id: String,
        }

        let token = self.service_token().await?;
        let response = self
            .http
            .get(self.admin_url("/clients"))
            .bearer_auth(&token)
            .query(&[("clientId", &self.config.client_id)])
            .send()
            .await?;
        let entries: Vec<ClientEntry> =
            check(response, "client").await?.json().await?;
        let entry = entries
            .into_iter()
            .next()
            .ok_or(ServerError::NotFound("client"))?;

        *self.client_uuid.write().await = Some(entry.id.clone());
        Ok(entry.id)
    }

    async fn resolve_role_at(&self, url: String, name: &str) -> Result<RoleRef> {
        let token = self.service_token().await?;
        let response =
            self.http.get(url).bearer_auth(&token).send().await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(ServerError::RoleNotFound(name.to_owned()));
        }
        let role: RoleRef = check(response, "role").await?.json().await?;
        Ok(role)
    }

    async fn role_mapping(
        &self,
        method: reqwest::Method,
        url: String,
        role: &RoleRef,
    ) -> Result<()> {
        let token = self.service_token().await?;
        let response = self
            .http
            .request(method, url)
            .bearer_auth(&token)
            .json(&[role])
            .send()
            .await?;
        check(response, "role mapping").await?;
        Ok(())
    }
}

#[async_trait]
impl IdentityProvider for Keycloak {
    async fn find_identity(
        &self,
        username: &str,
        email: &str,
    ) -> Result<Option<ProviderIdentity>> {
        let token = self.service_token().await?;

        for (field, value) in [("username", username), ("email", email)] {
            let response = self
                .http
                .get(self.admin_url("/users"))
                .bearer_auth(&token)
                .query(&[(field, value), ("exact", "true")])
                .send()
                .await?;
            let matches: Vec<ProviderIdentity> =
                check(response, "identity").await?.json().await?;

            if let Some(identity) = matches.into_iter().next() {
                return Ok(Some(identity));
            }
        }

        Ok(None)
    }

    async fn create_identity(
        &self,
        username: &str,
        email: &str,
        password: &str,
    ) -> Result<String> {
        let token = self.service_token().await?;
        let response = self
            .http
            .post(self.admin_url("/users"))
            .bearer_auth(&token)
            .json(&serde_json::json!({
                "username": username,
                "email": email,
                "enabled": true,
                "emailVerified": true,
                "credentials": [{
                    "type": "password",
                    "value": password,
                    "temporary": false,
                }],
            }))
            .send()
            .await?;
        let response = check(response, "identity").await?;

        // The admin API answers 201 with a Location ending in the new id.
        response
            .headers()
            .get(reqwest::header::LOCATION)
            .and_then(|location| location.to_str().ok())
            .and_then(|location| location.rsplit('/').next())
            .map(str::to_owned)
            .ok_or(ServerError::Internal {
                details: "identity created without a Location header".into(),
            })
    }

    async fn delete_identity(&self, external_id: &str) -> Result<()> {
        let token = self.service_token().await?;
        let response = self
            .http
            .delete(self.admin_url(&format!("/users/{external_id}")))
            .bearer_auth(&token)
            .send()
            .await?;
        check(response, "identity").await?;
        Ok(())
    }

    async fn resolve_realm_role(&self, name: &str) -> Result<RoleRef> {
        self.resolve_role_at(self.admin_url(&format!("/roles/{name}")), name)
            .await
    }

    async fn resolve_client_role(&self, name: &str) -> Result<RoleRef> {
        let uuid = self.service_client_uuid().await?;
        self.resolve_role_at(
            self.admin_url(&format!("/clients/{uuid}/roles/{name}")),
            name,
        )
        .await
    }

    async fn assign_realm_role(
        &self,
        external_id: &str,
        role: &RoleRef,
    ) -> Result<()> {
        self.role_mapping(
            reqwest::Method::POST,
            self.admin_url(&format!(
                "/users/{external_id}/role-mappings/realm"
            )),
            role,
        )
        .await
    }

    async fn assign_client_role(
        &self,
        external_id: &str,
        role: &RoleRef,
    ) -> Result<()> {
        let uuid = self.service_client_uuid().await?;
        self.role_mapping(
            reqwest::Method::POST,
            self.admin_url(&format!(
                "/users/{external_id}/role-mappings/clients/{uuid}"
            )),
            role,
        )
        .await
    }

    async fn revoke_realm_role(
        &self,
        external_id: &str,
        role: &RoleRef,
    ) -> Result<()> {
        self.role_mapping(
            reqwest::Method::DELETE,
            self.admin_url(&format!(
                "/users/{external_id}/role-mappings/realm"
            )),
            role,
        )
        .await
    }

    async fn password_login(
        &self,
        username: &str,
        password: &str,
    ) -> Result<TokenBundle> {
        let response = self
            .http
            .post(self.token_url())
            .form(&[
                ("grant_type", "password"),
                ("client_id", &self.config.client_id),
                ("client_secret", self.secret()),
                ("username", username),
                ("password", password),
            ])
            .send()
            .await?;

        match response.status() {
            status if status.is_success() => Ok(response.json().await?),
            StatusCode::BAD_REQUEST | StatusCode::UNAUTHORIZED => {
                Err(ServerError::InvalidCredentials)
            },
            StatusCode::FORBIDDEN => Err(ServerError::ProviderForbidden),
            status => Err(ServerError::Internal {
                details: format!("password grant answered {status}"),
            }),
        }
    }

    async fn introspect(&self, token: &str) -> Result<Introspection> {
        let response = self
            .http
            .post(format!("{}/introspect", self.token_url()))
            .form(&[
                ("client_id", self.config.client_id.as_str()),
                ("client_secret", self.secret()),
                ("token", token),
            ])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(ServerError::ProviderForbidden);
        }
        Ok(response.json().await?)
    }
}

/// Map admin API statuses onto the error taxonomy.
async fn check(response: Response, subject: &'static str) -> Result<Response> {
    match response.status() {
        status if status.is_success() => Ok(response),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            Err(ServerError::ProviderForbidden)
        },
        StatusCode::NOT_FOUND => Err(ServerError::NotFound(subject)),
        StatusCode::CONFLICT => Err(ServerError::AlreadyExists(subject)),
        status => Err(ServerError::Internal {
            details: format!("provider answered {status} for {subject}"),
        }),
    }
}

#[cfg(test)]
pub(crate) mod mock {
    //! Scripted directory for saga tests.

    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    #[derive(Default)]
    struct MockState {
        identities: Vec<ProviderIdentity>,
        assigned_roles: Vec<(String, String)>,
        created: u32,
        deleted: u32,
    }

    /// In-memory [`IdentityProvider`] with fault injection per operation.
    pub(crate) struct MockProvider {
        state: Mutex<MockState>,
        realm_roles: Vec<String>,
        client_roles: Vec<String>,
        /// Next N `create_identity` calls fail with a transient fault.
        pub fail_create: AtomicU32,
        /// Next N role assignments fail with a transient fault.
        pub fail_assign: AtomicU32,
        pub introspection_active: std::sync::atomic::AtomicBool,
    }

    impl Default for MockProvider {
        fn default() -> Self {
            Self {
                state: Mutex::default(),
                realm_roles: ["USER", "PREMIUM_USER", "TEAM_MANAGER"]
                    .map(String::from)
                    .to_vec(),
                client_roles: vec!["ADMIN".to_owned()],
                fail_create: AtomicU32::new(0),
                fail_assign: AtomicU32::new(0),
                introspection_active: std::sync::atomic::AtomicBool::new(
                    true,
                ),
            }
        }
    }

    impl MockProvider {
        pub fn without_roles() -> Self {
            Self {
                realm_roles: Vec::new(),
                client_roles: Vec::new(),
                ..Self::default()
            }
        }

        fn transient() -> ServerError {
            ServerError::ProviderUnavailable("connection reset".into())
        }

        fn take_fault(counter: &AtomicU32) -> bool {
            counter
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                    n.checked_sub(1)
                })
                .is_ok()
        }

        /// Identities currently alive in the directory.
        pub fn identity_count(&self) -> usize {
            self.state.lock().unwrap().identities.len()
        }

        /// Gross create/delete counters, for net-mutation assertions.
        pub fn mutations(&self) -> (u32, u32) {
            let state = self.state.lock().unwrap();
            (state.created, state.deleted)
        }

        pub fn roles_of(&self, external_id: &str) -> Vec<String> {
            self.state
                .lock()
                .unwrap()
                .assigned_roles
                .iter()
                .filter(|(id, _)| id == external_id)
                .map(|(_, role)| role.clone())
                .collect()
        }
    }

    #[async_trait]
    impl IdentityProvider for MockProvider {
        async fn find_identity(
            &self,
            username: &str,
            email: &str,
        ) -> Result<Option<ProviderIdentity>> {
            Ok(self
                .state
                .lock()
                .unwrap()
                .identities
                .iter()
                .find(|identity| {
                    identity.username == username
                        || identity.email.as_deref() == Some(email)
                })
                .cloned())
        }

        async fn create_identity(
            &self,
            username: &str,
            email: &str,
            _password: &str,
        ) -> Result<String> {
            if Self::take_fault(&self.fail_create) {
                return Err(Self::transient());
            }

            let mut state = self.state.lock().unwrap();
            let id = uuid::Uuid::new_v4().to_string();
            state.identities.push(ProviderIdentity {
                id: id.clone(),
                username: username.to_owned(),
                email: Some(email.to_owned()),
            });
            state.created += 1;
            Ok(id)
        }

        async fn delete_identity(&self, external_id: &str) -> Result<()> {
            let mut state = self.state.lock().unwrap();
            let before = state.identities.len();
            state.identities.retain(|identity| identity.id != external_id);

            if state.identities.len() == before {
                return Err(ServerError::NotFound("identity"));
            }
            state.deleted += 1;
            Ok(())
        }

        async fn resolve_realm_role(&self, name: &str) -> Result<RoleRef> {
            if self.realm_roles.iter().any(|role| role == name) {
                Ok(RoleRef {
                    id: format!("realm-{name}"),
                    name: name.to_owned(),
                })
            } else {
                Err(ServerError::RoleNotFound(name.to_owned()))
            }
        }

        async fn resolve_client_role(&self, name: &str) -> Result<RoleRef> {
            if self.client_roles.iter().any(|role| role == name) {
                Ok(RoleRef {
                    id: format!("client-{name}"),
                    name: name.to_owned(),
                })
            } else {
                Err(ServerError::RoleNotFound(name.to_owned()))
            }
        }

        async fn assign_realm_role(
            &self,
            external_id: &str,
            role: &RoleRef,
        ) -> Result<()> {
            if Self::take_fault(&self.fail_assign) {
                return Err(Self::transient());
            }

            self.state
                .lock()
                .unwrap()
                .assigned_roles
                .push((external_id.to_owned(), role.name.clone()));
            Ok(())
        }

        async fn assign_client_role(
            &self,
            external_id: &str,
            role: &RoleRef,
        ) -> Result<()> {
            self.assign_realm_role(external_id, role).await
        }

        async fn revoke_realm_role(
            &self,
            external_id: &str,
            role: &RoleRef,
        ) -> Result<()> {
            self.state
                .lock()
                .unwrap()
                .assigned_roles
                .retain(|(id, name)| id != external_id || name != &role.name);
            Ok(())
        }

        async fn password_login(
            &self,
            username: &str,
            password: &str,
        ) -> Result<TokenBundle> {
            if password == "wrong" {
                return Err(ServerError::InvalidCredentials);
            }

            Ok(TokenBundle {
                access_token: format!("access-{username}"),
                refresh_token: Some(format!("refresh-{username}")),
                id_token: None,
                expires_in: 300,
                refresh_expires_in: Some(1800),
            })
        }

        async fn introspect(&self, _token: &str) -> Result<Introspection> {
            Ok(Introspection {
                active: self.introspection_active.load(Ordering::SeqCst),
                sub: None,
                realm_access: crate::token::RoleSet::default(),
            })
        }
    }
}
