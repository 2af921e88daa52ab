//! Stream sessions and the composers that drive them.

pub mod composer;
pub mod state;

pub use composer::{
    Collaborators, Composer, PersistFailure, INTERPRETATION_SUBTYPE, RetryReport, StreamingTurn, SubmitOutcome, TurnReport,
};
pub use state::{
    Discarded, DrainDecision, SessionSnapshot, SessionStatus, StreamSession, Transition,
};
