pub mod auth_service;
pub mod auth_service_impl;
pub use auth_service::{AuthError, AuthOutcome, AuthRequest, AuthService};
pub use auth_service_impl::SeaOrmAuthService;

pub mod export_service;
pub mod export_service_impl;
pub use export_service::{ApplyOptions, ApplyReport, ExportError, ExportService};
pub use export_service_impl::SeaOrmExportService;

pub mod policy_service;
pub mod policy_service_impl;
pub use policy_service::{
    AccessDecision, DeviceAccess, DeviceSpec, FilterSpec, IdentitySpec, PolicyError, PolicyService,
    RuleSpec,
};
pub use policy_service_impl::SeaOrmPolicyService;

pub mod totp_service;
pub mod totp_service_impl;
pub use totp_service::{
    Enrollment, ProvisionRequest, TotpError, TotpProfileInfo, TotpService, TotpState,
};
pub use totp_service_impl::SeaOrmTotpService;
