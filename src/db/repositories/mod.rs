pub mod auth_log;
pub mod device;
pub mod group;
pub mod identity;
pub mod policy;
pub mod snapshot;
pub mod totp;
