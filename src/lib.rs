pub mod api;
pub mod core;
pub mod dispatch;
pub mod domain;
pub mod drafts;
pub mod filters;
pub mod scanner;
pub mod storage;
