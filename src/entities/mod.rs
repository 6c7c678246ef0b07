pub mod prelude;

pub mod access_policies;
pub mod access_rules;
pub mod auth_log;
pub mod device_group_members;
pub mod device_groups;
pub mod devices;
pub mod identities;
pub mod identity_attributes;
pub mod identity_group_members;
pub mod identity_groups;
pub mod rule_av_pairs;
pub mod rule_command_filters;
pub mod totp_profiles;
