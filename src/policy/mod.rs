pub mod evaluator;
pub mod filter;
pub mod model;
pub mod validate;

pub use evaluator::{AccessEvaluator, EffectiveRule, RuleScope, RuleSource};
pub use filter::{CommandFilter, PatternCache};
pub use model::{
    AccessPolicy, AccessRule, Action, AvPair, CommandFilterEntry, Device, DeviceGroup,
    DeviceMembership, Identity, IdentityGroup, Membership, PolicySnapshot, PrivLevel, RuleSubject,
    TotpStatus, DEFAULT_SERVICE,
};
