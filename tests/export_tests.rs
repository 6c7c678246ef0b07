//! Compile and publish against a real store and a temporary export directory.

use std::path::PathBuf;

use tacman::compiler::{ArtifactKind, CompileError, PublishError};
use tacman::config::{ExportConfig, SecurityConfig};
use tacman::db::{NewRule, Store};
use tacman::error::ResolutionError;
use tacman::policy::{Action, PrivLevel, RuleSubject};
use tacman::services::{
    ApplyOptions, DeviceSpec, ExportError, ExportService, FilterSpec, IdentitySpec, PolicyError,
    PolicyService, RuleSpec, SeaOrmExportService, SeaOrmPolicyService,
};

struct Harness {
    store: Store,
    policy: SeaOrmPolicyService,
    export: SeaOrmExportService,
    directory: PathBuf,
}

async fn setup() -> Harness {
    let id = uuid::Uuid::new_v4();
    let db_path = std::env::temp_dir().join(format!("tacman-export-test-{id}.db"));
    let directory = std::env::temp_dir().join(format!("tacman-export-test-{id}"));

    let store = Store::new(&format!("sqlite:{}", db_path.display()))
        .await
        .expect("failed to open store");

    let export = ExportConfig {
        directory: directory.display().to_string(),
        ..ExportConfig::default()
    };

    Harness {
        policy: SeaOrmPolicyService::new(store.clone(), SecurityConfig { bcrypt_cost: 4 }),
        export: SeaOrmExportService::new(store.clone(), export),
        store,
        directory,
    }
}

async fn seed(policy: &SeaOrmPolicyService) {
    for name in ["operator", "netadmin"] {
        policy
            .put_identity(IdentitySpec {
                name: name.to_string(),
                ..Default::default()
            })
            .await
            .unwrap();
    }
    policy
        .set_attribute("netadmin", "department", "noc {east}")
        .await
        .unwrap();

    policy.put_group("network-admins", Some("Core team"), true).await.unwrap();
    policy.add_member("netadmin", "network-admins", 10).await.unwrap();

    policy.put_device_group("core-routers", None, None).await.unwrap();
    for (name, address) in [("r2", "10.0.0.2"), ("r1", "10.0.0.1")] {
        policy
            .put_device(DeviceSpec {
                name: name.to_string(),
                address: address.to_string(),
                secret: "s3cret".to_string(),
                description: None,
                enabled: true,
            })
            .await
            .unwrap();
        policy.add_device(name, "core-routers").await.unwrap();
    }

    policy.link("network-admins", "core-routers").await.unwrap();
    policy
        .create_rule(RuleSpec {
            group: Some("network-admins".to_string()),
            device_group: "core-routers".to_string(),
            priv_lvl: 15,
            action: "permit".to_string(),
            filters: vec![FilterSpec::new("permit", "show .*")],
            av_pairs: vec![("timeout".to_string(), "60".to_string())],
            ..Default::default()
        })
        .await
        .unwrap();
}

#[tokio::test]
async fn test_compile_is_idempotent() {
    let h = setup().await;
    seed(&h.policy).await;

    let first = h.export.compile().await.unwrap();
    let second = h.export.compile().await.unwrap();
    assert_eq!(first, second);

    let counts = first.counts();
    assert_eq!(counts[&ArtifactKind::Users], 2);
    assert_eq!(counts[&ArtifactKind::Hosts], 2);
    assert_eq!(counts[&ArtifactKind::HostGroups], 1);

    let users = &first.users.content;
    let netadmin = users.find("user netadmin {").unwrap();
    let operator = users.find("user operator {").unwrap();
    assert!(netadmin < operator);
    assert!(users.contains("attribute department = \"noc \\{east\\}\""));
    assert!(users.contains("cmd permit \"^(?:show .*)$\""));
    assert!(users.contains("set timeout = \"60\""));

    let r1 = first.hosts.content.find("host r1 {").unwrap();
    let r2 = first.hosts.content.find("host r2 {").unwrap();
    assert!(r1 < r2);
}

#[tokio::test]
async fn test_passwords_compile_to_crypt_hashes() {
    let h = setup().await;
    seed(&h.policy).await;

    h.policy
        .put_identity(IdentitySpec {
            name: "netadmin".to_string(),
            password: Some("correct horse".to_string()),
            ..Default::default()
        })
        .await
        .unwrap();

    let imported = "$2b$04$R9h/cIPz0gi.URNNX3kh2OPST9/PgBkqquzi.Ss7KIUgO2t0jWMUW";
    h.policy
        .put_identity(IdentitySpec {
            name: "operator".to_string(),
            password_hash: Some(imported.to_string()),
            ..Default::default()
        })
        .await
        .unwrap();

    let rejected = h
        .policy
        .put_identity(IdentitySpec {
            name: "operator".to_string(),
            password_hash: Some("$argon2id$v=19$m=8192,t=3,p=1$c2FsdA$aGFzaA".to_string()),
            ..Default::default()
        })
        .await;
    assert!(matches!(rejected, Err(PolicyError::Validation(e)) if e.field == "password_hash"));

    let users = h.export.compile().await.unwrap().users.content;
    let hashes: Vec<&str> = users
        .lines()
        .filter_map(|l| l.trim().strip_prefix("password login = crypt \""))
        .map(|rest| rest.trim_end_matches('"'))
        .collect();
    assert_eq!(hashes.len(), 2);

    assert!(hashes[0].starts_with("$2b$04$"));
    assert!(bcrypt::verify("correct horse", hashes[0]).unwrap());
    assert_eq!(hashes[1], imported);
}

#[tokio::test]
async fn test_apply_publishes_every_artifact() {
    let h = setup().await;
    seed(&h.policy).await;

    let report = h.export.apply(ApplyOptions::default()).await.unwrap();
    let published = report.published.expect("apply should publish");
    assert_eq!(published.files.len(), 3);

    for artifact in report.compiled.artifacts() {
        let file = published
            .files
            .iter()
            .find(|f| f.kind == artifact.kind)
            .unwrap();
        let on_disk = std::fs::read_to_string(&file.path).unwrap();
        assert_eq!(on_disk, artifact.content);
    }

    let leftovers: Vec<_> = std::fs::read_dir(&h.directory)
        .unwrap()
        .filter_map(Result::ok)
        .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
        .collect();
    assert!(leftovers.is_empty());
}

#[tokio::test]
async fn test_dry_run_writes_nothing() {
    let h = setup().await;
    seed(&h.policy).await;

    let report = h
        .export
        .apply(ApplyOptions {
            dry_run: true,
            allow_empty: false,
        })
        .await
        .unwrap();

    assert!(report.published.is_none());
    assert!(!h.directory.exists());
}

#[tokio::test]
async fn test_empty_policy_is_refused() {
    let h = setup().await;

    let result = h.export.apply(ApplyOptions::default()).await;
    assert!(matches!(
        result,
        Err(ExportError::Publish(PublishError::EmptyArtifact(
            ArtifactKind::Users
        )))
    ));
    assert!(!h.directory.exists());

    let report = h
        .export
        .apply(ApplyOptions {
            dry_run: false,
            allow_empty: true,
        })
        .await
        .unwrap();
    assert!(report.published.is_some());
}

#[tokio::test]
async fn test_failed_compile_keeps_published_config() {
    let h = setup().await;
    seed(&h.policy).await;
    h.export.apply(ApplyOptions::default()).await.unwrap();

    let users_path = h.directory.join(ExportConfig::default().users_file);
    let before = std::fs::read_to_string(&users_path).unwrap();

    // Bypasses the service so the rule lacks an access policy link.
    let snapshot = h.store.snapshot().await.unwrap();
    let group = snapshot.groups.iter().find(|g| g.name == "network-admins").unwrap();
    h.policy.put_device_group("edge", None, None).await.unwrap();
    let edge = h.store.device_group_repo().get_by_name("edge").await.unwrap().unwrap();
    h.store
        .policy_repo()
        .create_rule(NewRule {
            subject: RuleSubject::Group(group.id),
            device_group_id: edge.id,
            service: "exec".to_string(),
            priv_lvl: PrivLevel::new(1).unwrap(),
            action: Action::Permit,
            filters: Vec::new(),
            av_pairs: Vec::new(),
        })
        .await
        .unwrap();

    let result = h.export.apply(ApplyOptions::default()).await;
    assert!(matches!(
        result,
        Err(ExportError::Compile(CompileError::Resolution(
            ResolutionError::MissingPolicyLink { .. }
        )))
    ));

    let after = std::fs::read_to_string(&users_path).unwrap();
    assert_eq!(before, after);
}
