pub use super::access_policies::Entity as AccessPolicies;
pub use super::access_rules::Entity as AccessRules;
pub use super::auth_log::Entity as AuthLog;
pub use super::device_group_members::Entity as DeviceGroupMembers;
pub use super::device_groups::Entity as DeviceGroups;
pub use super::devices::Entity as Devices;
pub use super::identities::Entity as Identities;
pub use super::identity_attributes::Entity as IdentityAttributes;
pub use super::identity_group_members::Entity as IdentityGroupMembers;
pub use super::identity_groups::Entity as IdentityGroups;
pub use super::rule_av_pairs::Entity as RuleAvPairs;
pub use super::rule_command_filters::Entity as RuleCommandFilters;
pub use super::totp_profiles::Entity as TotpProfiles;
