pub mod grade;
pub mod quiz;
pub mod quiz_attempt;
pub mod viewer;
pub mod webhook_log;
