//! Account orchestration.
//!
//! Every mutating operation here is a saga over two stores that share no
//! transaction: the identity provider and Postgres. Provider side effects
//! are compensated before an error surfaces or an attempt is retried, and
//! retries are reserved for transient network faults.

use std::sync::Arc;

use chrono::Utc;

use crate::error::{Result, ServerError};
use crate::events::{Event, EventPublisher};
use crate::keycloak::{IdentityProvider, TokenBundle};
use crate::saga::{self, Compensations, RetryPolicy};
use crate::sport::{MAX_SPORT_PREFERENCES, SportCategoryRepository};
use crate::team::{self, MAX_SELECTED_TEAMS, Team, TeamRepository};
use crate::token::AuthContext;
use crate::user::repository::UserRepository;
use crate::user::{
    MembershipBadge, MembershipStatus, NotificationPreferences, PlanDuration,
    Role, SubscriptionPlan, User,
};

/// Account creation request, already shape-validated at the edge.
#[derive(Clone, Debug)]
pub struct CreateAccount {
    pub username: String,
    pub email: String,
    pub password: String,
    pub role: Role,
    pub team_ids: Vec<String>,
    pub notification_preferences: NotificationPreferences,
    pub managed_team_id: Option<String>,
}

/// Allow-listed profile mutation. Anything not named here cannot be
/// changed through the profile path.
#[derive(Clone, Debug, Default)]
pub struct ProfileUpdate {
    pub username: Option<String>,
    pub email: Option<String>,
    pub notification_preferences: Option<NotificationPreferences>,
}

#[derive(Clone)]
pub struct AccountService {
    repo: UserRepository,
    teams: TeamRepository,
    sports: SportCategoryRepository,
    provider: Arc<dyn IdentityProvider>,
    events: EventPublisher,
    retry: RetryPolicy,
}

impl AccountService {
    /// Create a new [`AccountService`].
    pub fn new(
        repo: UserRepository,
        teams: TeamRepository,
        sports: SportCategoryRepository,
        provider: Arc<dyn IdentityProvider>,
        events: EventPublisher,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            repo,
            teams,
            sports,
            provider,
            events,
            retry,
        }
    }

    /// Create an account in the provider and the local store.
    ///
    /// Team resolution happens once, outside the retry scope: an unresolved
    /// id fails the whole call before any side effect. The retried sequence
    /// compensates its provider-identity creation before every re-attempt,
    /// so a mid-budget recovery leaves exactly one identity behind.
    pub async fn create_account(
        &self,
        request: CreateAccount,
    ) -> Result<User> {
        if !matches!(request.role, Role::User | Role::Admin) {
            return Err(ServerError::InvalidArgument(
                "role must be USER or ADMIN".into(),
            ));
        }
        if request.team_ids.len() > MAX_SELECTED_TEAMS {
            return Err(ServerError::InvalidArgument(format!(
                "at most {MAX_SELECTED_TEAMS} teams may be selected"
            )));
        }

        let teams = self.resolve_teams(&request.team_ids).await?;
        let sports = team::derived_sports(&teams);

        let user = saga::retry(&self.retry, |_| {
            self.create_attempt(&request, &sports)
        })
        .await?;

        self.events
            .publish_or_log(
                Event::UserCreated,
                serde_json::json!({
                    "id": user.id,
                    "externalId": user.external_id,
                    "username": user.username,
                    "email": user.email,
                    "role": user.role,
                }),
            )
            .await;

        Ok(user)
    }

    async fn create_attempt(
        &self,
        request: &CreateAccount,
        sports: &[String],
    ) -> Result<User> {
        if self
            .repo
            .exists_username_or_email(&request.username, &request.email)
            .await?
        {
            return Err(ServerError::AlreadyExists("user"));
        }
        if self
            .provider
            .find_identity(&request.username, &request.email)
            .await?
            .is_some()
        {
            return Err(ServerError::AlreadyExists("identity"));
        }

        let external_id = self
            .provider
            .create_identity(
                &request.username,
                &request.email,
                &request.password,
            )
            .await?;

        let mut compensations = Compensations::new();
        let provider = Arc::clone(&self.provider);
        let orphan = external_id.clone();
        compensations.push("delete provider identity", async move {
            provider.delete_identity(&orphan).await
        });

        match self.finish_create(request, sports, &external_id).await {
            Ok(user) => {
                compensations.commit();
                Ok(user)
            },
            Err(err) => {
                compensations.unwind().await;
                Err(err)
            },
        }
    }

    async fn finish_create(
        &self,
        request: &CreateAccount,
        sports: &[String],
        external_id: &str,
    ) -> Result<User> {
        let role = self
            .provider
            .resolve_realm_role(request.role.name())
            .await?;
        self.provider.assign_realm_role(external_id, &role).await?;

        let user = User {
            id: uuid::Uuid::new_v4().to_string(),
            external_id: external_id.to_owned(),
            username: request.username.clone(),
            email: request.email.clone(),
            role: request.role,
            membership_status: MembershipStatus::Inactive,
            membership_badge: MembershipBadge::Basic,
            selected_team_ids: request.team_ids.clone(),
            selected_sports: sports.to_vec(),
            notification_preferences: request.notification_preferences,
            managed_team_id: request.managed_team_id.clone(),
            subscription: None,
            payment_ref: None,
            created_at: Utc::now(),
        };
        self.repo.insert(&user).await?;

        Ok(user)
    }

    /// Resource-owner login. The local record must exist even when the
    /// provider knows the credentials.
    pub async fn login(
        &self,
        username: &str,
        password: &str,
    ) -> Result<(TokenBundle, User)> {
        let user = self
            .repo
            .find_by_username(username)
            .await?
            .ok_or(ServerError::NotFound("user"))?;
        let bundle = self.provider.password_login(username, password).await?;

        Ok((bundle, user))
    }

    /// Upgrade to the premium tier.
    ///
    /// The retried sequence needs no compensation: both the role grant and
    /// the local update re-apply the same target state on re-entry.
    pub async fn upgrade_membership(
        &self,
        external_id: &str,
        duration: PlanDuration,
        price: Option<f64>,
        bearer_token: &str,
    ) -> Result<User> {
        let user = self
            .repo
            .find_by_external_id(external_id)
            .await?
            .ok_or(ServerError::NotFound("user"))?;

        let introspection = self.provider.introspect(bearer_token).await?;
        if !introspection.active {
            return Err(ServerError::Unauthenticated);
        }

        let user = saga::retry(&self.retry, |_| {
            self.upgrade_attempt(&user, duration, price)
        })
        .await?;

        self.events
            .publish_or_log(
                Event::MembershipUpgraded,
                serde_json::json!({
                    "id": user.id,
                    "externalId": user.external_id,
                    "subscription": user.subscription,
                }),
            )
            .await;

        Ok(user)
    }

    async fn upgrade_attempt(
        &self,
        user: &User,
        duration: PlanDuration,
        price: Option<f64>,
    ) -> Result<User> {
        let role = self
            .provider
            .resolve_realm_role(Role::PremiumUser.name())
            .await?;
        self.provider
            .assign_realm_role(&user.external_id, &role)
            .await?;

        let plan =
            SubscriptionPlan::new(duration, price, Utc::now().date_naive())?;
        self.repo
            .set_membership(
                &user.id,
                MembershipStatus::Active,
                MembershipBadge::Premium,
                Role::PremiumUser,
                &plan,
            )
            .await
    }

    /// Replace the team selection and recompute the derived sports.
    ///
    /// `selected_sports` is recomputed from scratch, never merged: removing
    /// the last team of a sport removes the sport.
    pub async fn update_selected_teams(
        &self,
        user_id: &str,
        team_ids: Vec<String>,
    ) -> Result<User> {
        if team_ids.len() > MAX_SELECTED_TEAMS {
            return Err(ServerError::InvalidArgument(format!(
                "at most {MAX_SELECTED_TEAMS} teams may be selected"
            )));
        }

        self.repo
            .find_by_id(user_id)
            .await?
            .ok_or(ServerError::NotFound("user"))?;

        let teams = self.resolve_teams(&team_ids).await?;
        let sports = team::derived_sports(&teams);
        let user = self
            .repo
            .set_teams_and_sports(user_id, &team_ids, &sports)
            .await?;

        self.events
            .publish_or_log(
                Event::UserTeamsUpdated,
                serde_json::json!({
                    "id": user.id,
                    "selectedTeamIds": user.selected_team_ids,
                    "selectedSports": user.selected_sports,
                }),
            )
            .await;

        Ok(user)
    }

    /// Independent sport-category preferences, only for users without any
    /// team affiliation.
    pub async fn update_sport_preferences(
        &self,
        user_id: &str,
        sport_ids: Vec<String>,
    ) -> Result<User> {
        if sport_ids.len() > MAX_SPORT_PREFERENCES {
            return Err(ServerError::InvalidArgument(format!(
                "at most {MAX_SPORT_PREFERENCES} sport categories may be \
                 selected"
            )));
        }

        let user = self
            .repo
            .find_by_id(user_id)
            .await?
            .ok_or(ServerError::NotFound("user"))?;
        if !user.selected_team_ids.is_empty() {
            return Err(ServerError::InvalidArgument(
                "sport preferences are derived from teams while teams are \
                 selected"
                    .into(),
            ));
        }

        let known = self.sports.count_existing(&sport_ids).await?;
        if known as usize != sport_ids.len() {
            return Err(ServerError::InvalidArgument(
                "unknown sport category in selection".into(),
            ));
        }

        let user =
            self.repo.set_sport_preferences(user_id, &sport_ids).await?;

        self.events
            .publish_or_log(
                Event::UserSportCategoriesUpdated,
                serde_json::json!({
                    "id": user.id,
                    "selectedSports": user.selected_sports,
                }),
            )
            .await;

        Ok(user)
    }

    /// Grant the team-manager role for one team.
    ///
    /// Non-transactional: a provider grant followed by a local failure is
    /// logged for reconciliation, not rolled back.
    pub async fn assign_gestionnaire(
        &self,
        user_id: &str,
        team_id: &str,
    ) -> Result<User> {
        let user = self
            .repo
            .find_by_id(user_id)
            .await?
            .ok_or(ServerError::NotFound("user"))?;
        let wanted = [team_id.to_owned()];
        let team = self.teams.find_by_ids(&wanted).await?;
        if team.is_empty() {
            return Err(ServerError::NotFound("team"));
        }

        let role = self
            .provider
            .resolve_realm_role(Role::TeamManager.name())
            .await?;
        self.provider
            .assign_realm_role(&user.external_id, &role)
            .await?;

        let user = match self
            .repo
            .set_role(user_id, Role::TeamManager, Some(team_id))
            .await
        {
            Ok(user) => user,
            Err(err) => {
                tracing::error!(
                    user_id,
                    external_id = user.external_id,
                    error = %err,
                    "provider role granted but local role update failed"
                );
                return Err(err);
            },
        };

        self.publish_role_assigned(&user, team_id).await;
        Ok(user)
    }

    /// Grant the admin role, resolved from the service client's catalog.
    pub async fn assign_admin(&self, user_id: &str) -> Result<User> {
        let user = self
            .repo
            .find_by_id(user_id)
            .await?
            .ok_or(ServerError::NotFound("user"))?;

        saga::retry(&self.retry, |_| {
            self.admin_grant_attempt(&user.external_id)
        })
        .await?;

        let user = self.repo.set_role(user_id, Role::Admin, None).await?;

        self.publish_role_assigned(&user, "").await;
        Ok(user)
    }

    async fn admin_grant_attempt(&self, external_id: &str) -> Result<()> {
        let role = self
            .provider
            .resolve_client_role(Role::Admin.name())
            .await?;
        self.provider.assign_client_role(external_id, &role).await
    }

    async fn publish_role_assigned(&self, user: &User, team_id: &str) {
        self.events
            .publish_or_log(
                Event::RoleAssigned,
                serde_json::json!({
                    "id": user.id,
                    "role": user.role,
                    "teamId": (!team_id.is_empty()).then_some(team_id),
                }),
            )
            .await;
    }

    /// Delete the account everywhere, provider first.
    ///
    /// A provider identity already gone is tolerated; a local delete
    /// failing after the provider delete leaves the stores diverged and is
    /// surfaced as [`ServerError::Inconsistent`], never auto-retried.
    pub async fn delete_account(
        &self,
        user_id: &str,
        caller: &AuthContext,
    ) -> Result<()> {
        let user = self
            .repo
            .find_by_id(user_id)
            .await?
            .ok_or(ServerError::NotFound("user"))?;
        caller.authorize(&user.external_id)?;

        match self.provider.delete_identity(&user.external_id).await {
            Ok(()) => {},
            Err(ServerError::NotFound(_)) => {
                tracing::warn!(
                    external_id = user.external_id,
                    "identity already absent from the provider"
                );
            },
            Err(err) => return Err(err),
        }

        if let Err(err) = self.repo.delete(&user.id).await {
            return Err(ServerError::Inconsistent {
                details: format!(
                    "identity {} deleted but local record {} remains: {err}",
                    user.external_id, user.id
                ),
            });
        }

        self.events
            .publish_or_log(
                Event::UserDeleted,
                serde_json::json!({
                    "id": user.id,
                    "externalId": user.external_id,
                }),
            )
            .await;

        Ok(())
    }

    pub async fn update_profile(
        &self,
        user_id: &str,
        update: ProfileUpdate,
    ) -> Result<User> {
        let user = self
            .repo
            .update_profile(
                user_id,
                update.username.as_deref(),
                update.email.as_deref(),
                update.notification_preferences.as_ref(),
            )
            .await?;

        self.events
            .publish_or_log(
                Event::UserProfileUpdated,
                serde_json::json!({
                    "id": user.id,
                    "username": user.username,
                    "email": user.email,
                }),
            )
            .await;

        Ok(user)
    }

    pub async fn link_payment(
        &self,
        user_id: &str,
        payment_ref: &str,
    ) -> Result<User> {
        let user = self.repo.set_payment(user_id, payment_ref).await?;

        self.events
            .publish_or_log(
                Event::UserPaymentLinked,
                serde_json::json!({
                    "id": user.id,
                    "paymentRef": user.payment_ref,
                }),
            )
            .await;

        Ok(user)
    }

    pub async fn get_profile(&self, user_id: &str) -> Result<User> {
        self.repo
            .find_by_id(user_id)
            .await?
            .ok_or(ServerError::NotFound("user"))
    }

    pub async fn get_by_external_id(
        &self,
        external_id: &str,
    ) -> Result<User> {
        self.repo
            .find_by_external_id(external_id)
            .await?
            .ok_or(ServerError::NotFound("user"))
    }

    pub async fn get_teams(&self, user_id: &str) -> Result<Vec<Team>> {
        let user = self.get_profile(user_id).await?;
        self.teams.find_by_ids(&user.selected_team_ids).await
    }

    pub async fn list(&self) -> Result<Vec<User>> {
        self.repo.list_all().await
    }

    pub async fn exists(&self, username: &str) -> Result<bool> {
        Ok(self.repo.find_by_username(username).await?.is_some())
    }

    async fn resolve_teams(&self, team_ids: &[String]) -> Result<Vec<Team>> {
        let teams = self.teams.find_by_ids(team_ids).await?;
        if teams.len() != team_ids.len() {
            return Err(ServerError::InvalidArgument(
                "unknown team in selection".into(),
            ));
        }
        Ok(teams)
    }
}
