pub mod core;
pub mod drafts;
pub mod exams;
pub mod lifecycle;
pub mod question_bank;
pub mod setup;
pub mod wizard;
