pub mod access_policy;
pub mod access_rules;
pub mod attempt_lifecycle;
pub mod attempt_repository;
pub mod grade_calculator;
pub mod gradebook;
pub mod notification_service;
pub mod preflight;
pub mod quiz_repository;
pub mod view_service;
