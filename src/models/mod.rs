pub mod api;
pub mod security;
pub mod ses;

pub use security::{
    ComplianceReport, CredentialRecord, HashAlgorithm, SecurityPolicy, ThreatAction, ThreatVerdict,
};
pub use ses::{OriginContext, Session, SessionSummary, ADMIN_PERMISSION};
