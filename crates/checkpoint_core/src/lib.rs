pub mod domain;
pub mod ports;
pub mod report;

pub use domain::{
    option_letter, AnswerOption, Checkpoint, CheckpointReport, DomainError, ParticipantResult,
    Presentation, ResponseRecord, Role, SessionRecord, SessionReport,
};
pub use ports::{PortError, PortResult, StoreService};
pub use report::compile_report;
