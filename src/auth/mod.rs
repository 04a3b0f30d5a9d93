pub mod audit;
pub mod cipher;
pub mod credentials;
pub mod lockout;
pub mod policy;
pub mod pw;
pub mod ses;
pub mod threat;
pub mod token;
pub mod utils;

pub use audit::{AuditEvent, AuditEventType, AuditLog, AuditSink, ChainBreak, JsonLinesSink};
pub use cipher::{Aes256GcmCipher, AeadCipher, SealedData};
pub use credentials::CredentialStore;
pub use lockout::{FailureOutcome, LoginAttemptTracker};
pub use policy::PolicyEngine;
pub use pw::CredentialHasher;
pub use ses::SessionStore;
pub use threat::{SignalDetector, ThreatScorer};
pub use token::TokenGenerator;
pub use utils::{Clock, ManualClock, SystemClock};
