//! The worker classes the fabric runs.

pub mod entity;
pub mod find_link;
pub mod history;
pub mod insert;
pub mod invite;
pub mod join;
pub mod mark;
pub mod ocr;
pub mod report;

pub use entity::EntityUpdateWorker;
pub use find_link::FindLinkWorker;
pub use history::FetchHistoryWorker;
pub use insert::MessageInsertWorker;
pub use invite::InviteWorker;
pub use join::JoinGroupWorker;
pub use mark::MessageMarkWorker;
pub use ocr::OcrWorker;
pub use report::run_reporter;
