//! SeaORM entity models

mod submission;

pub use submission::{
    Entity as SubmissionEntity,
    Model as Submission,
    ActiveModel as SubmissionActiveModel,
    Column as SubmissionColumn,
    DocumentNature,
    InvalidTransition,
    StatusEvent,
    SubmissionStatus,
    SubmissionType,
    UnknownStatus,
};
