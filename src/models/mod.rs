pub mod secret_record;
pub mod session;

pub use secret_record::SecretRecord;
pub use session::{
    EnrolledUser, Enrollment, GateState, GateStats, SessionStart, VerifiedSession,
};
