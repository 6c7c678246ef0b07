//! TOTP lifecycle and combined password + TOTP authentication.

use tacman::config::{SecurityConfig, TotpConfig};
use tacman::db::{IdentityChanges, Store};
use tacman::error::CredentialError;
use tacman::services::{
    AuthError, AuthRequest, AuthService, DeviceSpec, IdentitySpec, PolicyService,
    ProvisionRequest, SeaOrmAuthService, SeaOrmPolicyService, SeaOrmTotpService, TotpError,
    TotpService, TotpState,
};
use tacman::totp::{self, Algorithm, TotpParams};

/// Mid-step, so neighbouring steps are exactly one period away.
const T0: u64 = 1_700_000_010;
const PERIOD: u64 = 30;

async fn setup() -> (Store, SeaOrmTotpService) {
    let db_path =
        std::env::temp_dir().join(format!("tacman-totp-test-{}.db", uuid::Uuid::new_v4()));
    let store = Store::new(&format!("sqlite:{}", db_path.display()))
        .await
        .expect("failed to open store");

    let policy = SeaOrmPolicyService::new(store.clone(), SecurityConfig { bcrypt_cost: 4 });
    policy
        .put_identity(IdentitySpec {
            name: "netadmin".to_string(),
            password: Some("correct horse".to_string()),
            ..Default::default()
        })
        .await
        .unwrap();
    policy
        .put_device(DeviceSpec {
            name: "r1".to_string(),
            address: "10.0.0.1".to_string(),
            secret: "s3cret".to_string(),
            description: None,
            enabled: true,
        })
        .await
        .unwrap();

    let service = SeaOrmTotpService::new(store.clone(), TotpConfig::default());
    (store, service)
}

async fn provision(service: &SeaOrmTotpService) -> Vec<u8> {
    let enrollment = service
        .provision(ProvisionRequest {
            identity: "netadmin".to_string(),
            ..Default::default()
        })
        .await
        .unwrap();
    totp::decode_secret(&enrollment.secret).unwrap()
}

fn code(secret: &[u8], unix_time: u64) -> String {
    let params = TotpParams::new(6, 30, Algorithm::Sha1).unwrap();
    totp::code_at(secret, unix_time, &params).unwrap()
}

fn is_credential(result: &Result<u64, TotpError>, expected: &CredentialError) -> bool {
    matches!(result, Err(TotpError::Credential(e)) if e == expected)
}

#[tokio::test]
async fn test_provision_returns_enrollment_material() {
    let (_, service) = setup().await;

    let enrollment = service
        .provision(ProvisionRequest {
            identity: "netadmin".to_string(),
            ..Default::default()
        })
        .await
        .unwrap();

    assert_eq!(totp::decode_secret(&enrollment.secret).unwrap().len(), 20);
    assert!(enrollment.uri.starts_with(&format!(
        "otpauth://totp/tacacs-plus%3Anetadmin?secret={}&issuer=tacacs-plus",
        enrollment.secret
    )));
    assert!(enrollment.uri.ends_with("&digits=6&period=30"));

    let status = service.status("netadmin").await.unwrap().unwrap();
    assert_eq!(status.state, TotpState::Provisioned);

    let revealed = service.reveal("netadmin").await.unwrap();
    assert_eq!(revealed.secret, enrollment.secret);

    let missing = service
        .provision(ProvisionRequest {
            identity: "nobody".to_string(),
            ..Default::default()
        })
        .await;
    assert!(matches!(missing, Err(TotpError::IdentityNotFound(_))));
}

#[tokio::test]
async fn test_same_code_is_accepted_once() {
    let (_, service) = setup().await;
    let secret = provision(&service).await;

    service.enable_at("netadmin", &code(&secret, T0), T0).await.unwrap();

    // Enrollment consumed this step already.
    let replay = service.verify_at("netadmin", &code(&secret, T0), T0).await;
    assert!(is_credential(&replay, &CredentialError::Replay));

    let next = T0 + PERIOD;
    let first = service.verify_at("netadmin", &code(&secret, next), next).await;
    assert_eq!(first.unwrap(), next / PERIOD);

    let second = service.verify_at("netadmin", &code(&secret, next), next).await;
    assert!(is_credential(&second, &CredentialError::Replay));
}

#[tokio::test]
async fn test_clock_skew_window() {
    let (_, service) = setup().await;
    let secret = provision(&service).await;
    service.enable_at("netadmin", &code(&secret, T0), T0).await.unwrap();

    let now = T0 + 10 * PERIOD;

    let too_old = service
        .verify_at("netadmin", &code(&secret, now - 2 * PERIOD), now)
        .await;
    assert!(is_credential(&too_old, &CredentialError::InvalidCode));

    let too_new = service
        .verify_at("netadmin", &code(&secret, now + 2 * PERIOD), now)
        .await;
    assert!(is_credential(&too_new, &CredentialError::InvalidCode));

    let behind = service
        .verify_at("netadmin", &code(&secret, now - PERIOD), now)
        .await;
    assert!(behind.is_ok());

    let ahead = service
        .verify_at("netadmin", &code(&secret, now + PERIOD), now)
        .await;
    assert!(ahead.is_ok());

    // The watermark is now past the current step.
    let current = service.verify_at("netadmin", &code(&secret, now), now).await;
    assert!(is_credential(&current, &CredentialError::Replay));
}

#[tokio::test]
async fn test_concurrent_verification_accepts_one() {
    let (_, service) = setup().await;
    let secret = provision(&service).await;
    service.enable_at("netadmin", &code(&secret, T0), T0).await.unwrap();

    let now = T0 + 3 * PERIOD;
    let submitted = code(&secret, now);
    let (a, b) = tokio::join!(
        service.verify_at("netadmin", &submitted, now),
        service.verify_at("netadmin", &submitted, now),
    );

    assert_eq!(u8::from(a.is_ok()) + u8::from(b.is_ok()), 1);
}

#[tokio::test]
async fn test_lifecycle() {
    let (_, service) = setup().await;
    let secret = provision(&service).await;

    let wrong = service.enable_at("netadmin", "000000", T0).await;
    assert!(matches!(wrong, Err(TotpError::Credential(_))));

    service.enable_at("netadmin", &code(&secret, T0), T0).await.unwrap();
    assert!(matches!(
        service.reveal("netadmin").await,
        Err(TotpError::SecretSealed)
    ));
    let again = service
        .enable_at("netadmin", &code(&secret, T0 + PERIOD), T0 + PERIOD)
        .await;
    assert!(matches!(
        again,
        Err(TotpError::Credential(CredentialError::AlreadyEnabled))
    ));

    service.disable("netadmin").await.unwrap();
    let status = service.status("netadmin").await.unwrap().unwrap();
    assert_eq!(status.state, TotpState::Disabled);
    assert!(status.last_used_at.is_some());

    let disabled = service
        .verify_at("netadmin", &code(&secret, T0 + PERIOD), T0 + PERIOD)
        .await;
    assert!(is_credential(&disabled, &CredentialError::ProfileDisabled));

    let later = T0 + 5 * PERIOD;
    service.enable_at("netadmin", &code(&secret, later), later).await.unwrap();
    assert_eq!(
        service.status("netadmin").await.unwrap().unwrap().state,
        TotpState::Enabled
    );

    service.delete("netadmin").await.unwrap();
    assert!(service.status("netadmin").await.unwrap().is_none());
    let gone = service.verify_at("netadmin", &code(&secret, later), later).await;
    assert!(is_credential(&gone, &CredentialError::ProfileMissing));
}

#[tokio::test]
async fn test_authentication_requires_both_factors() {
    let (store, totp_service) = setup().await;
    let secret = provision(&totp_service).await;
    totp_service
        .enable_at("netadmin", &code(&secret, T0), T0)
        .await
        .unwrap();

    let auth = SeaOrmAuthService::new(
        store.clone(),
        SeaOrmTotpService::new(store.clone(), TotpConfig::default()),
    );
    let request = |password: &str, totp_code: Option<String>| AuthRequest {
        username: "netadmin".to_string(),
        password: password.to_string(),
        totp_code,
        device_address: Some("10.0.0.1".to_string()),
    };

    let now = T0 + PERIOD;

    let no_code = auth.authenticate_at(request("correct horse", None), now).await;
    assert!(matches!(no_code, Err(AuthError::AuthenticationFailed)));

    let bad_password = auth
        .authenticate_at(request("wrong", Some(code(&secret, now))), now)
        .await;
    assert!(matches!(bad_password, Err(AuthError::AuthenticationFailed)));

    let ok = auth
        .authenticate_at(request("correct horse", Some(code(&secret, now))), now)
        .await
        .unwrap();
    assert_eq!(ok.factors, "password+totp");

    let replay = auth
        .authenticate_at(request("correct horse", Some(code(&secret, now))), now)
        .await;
    assert!(matches!(replay, Err(AuthError::AuthenticationFailed)));

    let history = auth.history(10).await.unwrap();
    assert_eq!(history.len(), 4);
    let factors: Vec<(&str, Option<&str>)> = history
        .iter()
        .map(|e| (e.outcome.as_str(), e.factor.as_deref()))
        .collect();
    assert_eq!(
        factors,
        [
            ("failure", Some("totp")),
            ("success", Some("password+totp")),
            ("failure", Some("password")),
            ("failure", Some("totp")),
        ]
    );
    assert!(history.iter().all(|e| e.device_id.is_some()));
}

#[tokio::test]
async fn test_unknown_identity_is_logged() {
    let (store, totp_service) = setup().await;
    let auth = SeaOrmAuthService::new(store, totp_service);

    let result = auth
        .authenticate(AuthRequest {
            username: "ghost".to_string(),
            password: "anything".to_string(),
            ..Default::default()
        })
        .await;
    assert!(matches!(result, Err(AuthError::AuthenticationFailed)));

    let password_only = auth
        .authenticate(AuthRequest {
            username: "netadmin".to_string(),
            password: "correct horse".to_string(),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(password_only.factors, "password");

    let history = auth.history(10).await.unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[1].username, "ghost");
    assert_eq!(history[1].identity_id, None);
    assert_eq!(history[1].factor.as_deref(), Some("identity"));
}

#[tokio::test]
async fn test_corrupt_password_hash_is_an_opaque_failure() {
    let (store, totp_service) = setup().await;
    store
        .identity_repo()
        .put(
            "legacy",
            IdentityChanges {
                password_hash: Some(Some("$argon2id$v=19$m=8192,t=3,p=1$c2FsdA$aGFzaA".to_string())),
                enabled: None,
            },
        )
        .await
        .unwrap();

    let auth = SeaOrmAuthService::new(store, totp_service);
    let result = auth
        .authenticate(AuthRequest {
            username: "legacy".to_string(),
            password: "anything".to_string(),
            ..Default::default()
        })
        .await;
    assert!(matches!(result, Err(AuthError::AuthenticationFailed)));

    let history = auth.history(1).await.unwrap();
    assert_eq!(history[0].factor.as_deref(), Some("password"));
    assert!(history[0].detail.as_deref().unwrap().contains("unusable"));
}
