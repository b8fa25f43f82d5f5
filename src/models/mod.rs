pub mod access_log;
pub mod consent;
pub mod patient;
pub mod role;
pub mod scope;

pub use access_log::{
    emergency_action, AccessLog, NewAccessLog, EMERGENCY_ACTION_PREFIX, EMERGENCY_PROFILE,
    FULL_MEDICAL_HISTORY,
};
pub use consent::{
    Consent, ConsentCheck, ConsentKey, ConsentStatus, ConsentUpdate, ExpiryUpdate, GrantRequest,
    ProviderType,
};
pub use patient::Patient;
pub use role::{can_act, Actor, Operation, Role};
pub use scope::{ConsentScope, DataCategory};
