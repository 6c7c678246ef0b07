//! `SeaORM` implementation of the `AuthService` trait.

use async_trait::async_trait;
use tracing::{info, warn};

use crate::db::repositories::identity::verify_password;
use crate::db::{AuthLogEntry, NewAuthLogEntry, Store};
use crate::policy::{Device, Identity};
use crate::services::auth_service::{AuthError, AuthOutcome, AuthRequest, AuthService};
use crate::services::totp_service::TotpError;
use crate::services::totp_service_impl::{SeaOrmTotpService, unix_now};

/// Why one factor rejected the attempt. Never leaves this module except
/// through logs.
struct Rejection {
    factor: &'static str,
    reason: String,
}

impl Rejection {
    fn new(factor: &'static str, reason: impl Into<String>) -> Self {
        Self {
            factor,
            reason: reason.into(),
        }
    }
}

pub struct SeaOrmAuthService {
    store: Store,
    totp: SeaOrmTotpService,
}

impl SeaOrmAuthService {
    #[must_use]
    pub const fn new(store: Store, totp: SeaOrmTotpService) -> Self {
        Self { store, totp }
    }

    async fn device(&self, address: Option<&str>) -> Result<Option<Device>, AuthError> {
        match address {
            Some(address) => Ok(self.store.device_repo().get_by_address(address).await?),
            None => Ok(None),
        }
    }

    async fn check(
        &self,
        identity: Option<&Identity>,
        device: Option<&Device>,
        request: &AuthRequest,
        unix_time: u64,
    ) -> Result<Result<&'static str, Rejection>, AuthError> {
        let Some(identity) = identity else {
            return Ok(Err(Rejection::new("identity", "unknown identity")));
        };
        if !identity.enabled {
            return Ok(Err(Rejection::new("identity", "identity is disabled")));
        }

        if let Some(address) = request.device_address.as_deref() {
            match device {
                None => return Ok(Err(Rejection::new("device", format!("unknown device {address}")))),
                Some(d) if !d.enabled => {
                    return Ok(Err(Rejection::new("device", format!("device '{}' is disabled", d.name))));
                }
                Some(_) => {}
            }
        }

        let Some(hash) = identity.credential.as_deref() else {
            return Ok(Err(Rejection::new("password", "no password set")));
        };
        match verify_password(&request.password, hash).await {
            Ok(true) => {}
            Ok(false) => return Ok(Err(Rejection::new("password", "password mismatch"))),
            Err(e) => {
                return Ok(Err(Rejection::new(
                    "password",
                    format!("stored hash is unusable: {e}"),
                )));
            }
        }

        let mfa = match self.totp.has_enabled_profile(identity.id).await {
            Ok(mfa) => mfa,
            Err(TotpError::Store(e)) => return Err(e.into()),
            Err(e) => return Err(AuthError::Internal(e.to_string())),
        };
        if !mfa {
            return Ok(Ok("password"));
        }

        let Some(code) = request.totp_code.as_deref() else {
            return Ok(Err(Rejection::new("totp", "code required")));
        };
        match self.totp.check_code(identity, code, unix_time).await {
            Ok(_) => Ok(Ok("password+totp")),
            Err(TotpError::Store(e)) => Err(e.into()),
            Err(e) => Ok(Err(Rejection::new("totp", e.to_string()))),
        }
    }
}

#[async_trait]
impl AuthService for SeaOrmAuthService {
    async fn authenticate(&self, request: AuthRequest) -> Result<AuthOutcome, AuthError> {
        self.authenticate_at(request, unix_now()).await
    }

    async fn authenticate_at(
        &self,
        request: AuthRequest,
        unix_time: u64,
    ) -> Result<AuthOutcome, AuthError> {
        let identity = self.store.identity_repo().get_by_name(&request.username).await?;
        let device = self.device(request.device_address.as_deref()).await?;

        let result = self
            .check(identity.as_ref(), device.as_ref(), &request, unix_time)
            .await?;

        let mut entry = NewAuthLogEntry {
            identity_id: identity.as_ref().map(|i| i.id),
            device_id: device.as_ref().map(|d| d.id),
            username: request.username.clone(),
            device_address: request.device_address.clone(),
            ..Default::default()
        };

        match result {
            Ok(factors) => {
                entry.success = true;
                entry.factor = Some(factors.to_string());
                self.store.append_auth_log(entry).await?;

                info!(
                    identity = %request.username,
                    device = request.device_address.as_deref().unwrap_or("-"),
                    factors,
                    "Authentication succeeded"
                );
                Ok(AuthOutcome {
                    identity: request.username,
                    factors,
                })
            }
            Err(rejection) => {
                warn!(
                    target: "tacman::audit",
                    identity = %request.username,
                    device = request.device_address.as_deref().unwrap_or("-"),
                    factor = rejection.factor,
                    reason = %rejection.reason,
                    "Authentication failed"
                );

                entry.factor = Some(rejection.factor.to_string());
                entry.detail = Some(rejection.reason);
                self.store.append_auth_log(entry).await?;
                Err(AuthError::AuthenticationFailed)
            }
        }
    }

    async fn history(&self, limit: u64) -> Result<Vec<AuthLogEntry>, AuthError> {
        Ok(self.store.recent_auth_log(limit).await?)
    }
}
