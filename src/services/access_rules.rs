use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::fmt;

use crate::models::quiz::Quiz;
use crate::models::quiz_attempt::QuizAttempt;

/// Why a user may not start or continue an attempt right now.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "code", rename_all = "snake_case")]
pub enum DenialReason {
    NotOpen { opens_at: DateTime<Utc> },
    Closed { closed_at: DateTime<Utc> },
    AttemptLimitReached { max_attempts: i32 },
    MustWait { until: DateTime<Utc> },
    ClosesBeforeWaitEnds { until: DateTime<Utc> },
    PasswordRequired,
    PasswordIncorrect,
    SubnetRejected,
    AddressUnknown,
    NoQuestions,
    InvalidQuestions,
}

impl DenialReason {
    pub fn code(&self) -> &'static str {
        match self {
            DenialReason::NotOpen { .. } => "not_open",
            DenialReason::Closed { .. } => "closed",
            DenialReason::AttemptLimitReached { .. } => "attempt_limit_reached",
            DenialReason::MustWait { .. } => "must_wait",
            DenialReason::ClosesBeforeWaitEnds { .. } => "closes_before_wait_ends",
            DenialReason::PasswordRequired => "password_required",
            DenialReason::PasswordIncorrect => "password_incorrect",
            DenialReason::SubnetRejected => "subnet_rejected",
            DenialReason::AddressUnknown => "address_unknown",
            DenialReason::NoQuestions => "no_questions",
            DenialReason::InvalidQuestions => "invalid_questions",
        }
    }
}

impl fmt::Display for DenialReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DenialReason::NotOpen { opens_at } => {
                write!(f, "This quiz will not be available until {}", format_date(*opens_at))
            }
            DenialReason::Closed { closed_at } => {
                write!(f, "This quiz closed on {}", format_date(*closed_at))
            }
            DenialReason::AttemptLimitReached { .. } => write!(f, "No more attempts are allowed"),
            DenialReason::MustWait { until } => write!(
                f,
                "You must wait before you may re-attempt this quiz. You will be allowed to start another attempt after {}",
                format_date(*until)
            ),
            DenialReason::ClosesBeforeWaitEnds { .. } => write!(
                f,
                "This quiz closes before you will be allowed to start another attempt"
            ),
            DenialReason::PasswordRequired => {
                write!(f, "To attempt this quiz you need to know the quiz password")
            }
            DenialReason::PasswordIncorrect => write!(f, "The password entered was incorrect"),
            DenialReason::SubnetRejected => write!(
                f,
                "This quiz is only accessible from certain locations, and this computer is not on the allowed list"
            ),
            DenialReason::AddressUnknown => {
                write!(f, "Your network address could not be determined")
            }
            DenialReason::NoQuestions => {
                write!(f, "This quiz has no questions, so it cannot be attempted")
            }
            DenialReason::InvalidQuestions => write!(
                f,
                "This quiz cannot be attempted because it contains questions of a type that is not available"
            ),
        }
    }
}

/// When a rule is consulted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RulePhase {
    /// Blocks starting and continuing attempts.
    Access,
    /// Blocks starting a new attempt only.
    NewAttempt,
    /// Checked synchronously right before an attempt is created.
    Preflight,
    /// Contributes messages or deadlines but never denies.
    Info,
}

/// Everything a rule may look at.
#[derive(Debug, Clone, Copy)]
pub struct RuleContext<'a> {
    pub now: DateTime<Utc>,
    pub attempts_used: u32,
    pub last_finished: Option<&'a QuizAttempt>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccessRule {
    OpenDate(DateTime<Utc>),
    CloseDate(DateTime<Utc>),
    AttemptLimit(i32),
    DelayBetweenAttempts {
        delay1: Duration,
        delay2: Duration,
        max_attempts: i32,
        time_limit: Option<Duration>,
        closes: Option<DateTime<Utc>>,
    },
    TimeLimit(Duration),
    Password,
    Subnet(String),
    SecureWindow,
}

impl AccessRule {
    /// Rules that apply to `quiz`, in the order their reasons are reported.
    ///
    /// Users who may ignore time limits get no open/close window and no time limit.
    pub fn for_quiz(quiz: &Quiz, bypass_time_limits: bool) -> Vec<AccessRule> {
        let mut rules = Vec::new();
        let time_limit = quiz
            .time_limit_secs
            .filter(|secs| *secs > 0)
            .map(|secs| Duration::seconds(secs as i64));

        if !bypass_time_limits {
            if let Some(open) = quiz.time_open {
                rules.push(AccessRule::OpenDate(open));
            }
            if let Some(close) = quiz.time_close {
                rules.push(AccessRule::CloseDate(close));
            }
        }
        if quiz.max_attempts > 0 {
            rules.push(AccessRule::AttemptLimit(quiz.max_attempts));
        }
        if quiz.delay1_secs > 0 || quiz.delay2_secs > 0 {
            rules.push(AccessRule::DelayBetweenAttempts {
                delay1: Duration::seconds(quiz.delay1_secs as i64),
                delay2: Duration::seconds(quiz.delay2_secs as i64),
                max_attempts: quiz.max_attempts,
                time_limit,
                closes: quiz.time_close,
            });
        }
        if !bypass_time_limits {
            if let Some(limit) = time_limit {
                rules.push(AccessRule::TimeLimit(limit));
            }
        }
        if quiz.has_password() {
            rules.push(AccessRule::Password);
        }
        if let Some(subnet) = quiz.subnet.as_deref().filter(|s| !s.trim().is_empty()) {
            rules.push(AccessRule::Subnet(subnet.trim().to_string()));
        }
        if quiz.require_popup {
            rules.push(AccessRule::SecureWindow);
        }
        rules
    }

    pub fn phase(&self) -> RulePhase {
        match self {
            AccessRule::OpenDate(_) | AccessRule::CloseDate(_) => RulePhase::Access,
            AccessRule::AttemptLimit(_) | AccessRule::DelayBetweenAttempts { .. } => {
                RulePhase::NewAttempt
            }
            AccessRule::Password | AccessRule::Subnet(_) => RulePhase::Preflight,
            AccessRule::TimeLimit(_) | AccessRule::SecureWindow => RulePhase::Info,
        }
    }

    pub fn check(&self, ctx: &RuleContext<'_>) -> Option<DenialReason> {
        match self {
            AccessRule::OpenDate(open) if ctx.now < *open => {
                Some(DenialReason::NotOpen { opens_at: *open })
            }
            AccessRule::CloseDate(close) if ctx.now > *close => {
                Some(DenialReason::Closed { closed_at: *close })
            }
            AccessRule::AttemptLimit(max) if ctx.attempts_used >= *max as u32 => {
                Some(DenialReason::AttemptLimitReached { max_attempts: *max })
            }
            AccessRule::DelayBetweenAttempts {
                max_attempts,
                closes,
                ..
            } => {
                if *max_attempts > 0 && ctx.attempts_used >= *max_attempts as u32 {
                    return None;
                }
                if closes.is_some_and(|c| ctx.now > c) {
                    return None;
                }
                let next_start = self.next_start_time(ctx)?;
                if ctx.now >= next_start {
                    return None;
                }
                match closes {
                    Some(c) if next_start > *c => {
                        Some(DenialReason::ClosesBeforeWaitEnds { until: next_start })
                    }
                    _ => Some(DenialReason::MustWait { until: next_start }),
                }
            }
            _ => None,
        }
    }

    fn next_start_time(&self, ctx: &RuleContext<'_>) -> Option<DateTime<Utc>> {
        let AccessRule::DelayBetweenAttempts {
            delay1,
            delay2,
            time_limit,
            ..
        } = self
        else {
            return None;
        };
        let last = ctx.last_finished?;
        let mut finished = last.time_finish?;
        if let Some(limit) = time_limit {
            finished = finished.min(last.time_start + *limit);
        }
        match ctx.attempts_used {
            0 => None,
            1 if *delay1 > Duration::zero() => Some(finished + *delay1),
            n if n > 1 && *delay2 > Duration::zero() => Some(finished + *delay2),
            _ => None,
        }
    }

    pub fn describe(&self, now: DateTime<Utc>) -> Option<String> {
        match self {
            AccessRule::OpenDate(open) if now < *open => {
                Some(format!("This quiz will open on {}", format_date(*open)))
            }
            AccessRule::OpenDate(open) => {
                Some(format!("This quiz opened on {}", format_date(*open)))
            }
            AccessRule::CloseDate(close) if now > *close => {
                Some(format!("This quiz closed on {}", format_date(*close)))
            }
            AccessRule::CloseDate(close) => {
                Some(format!("This quiz will close on {}", format_date(*close)))
            }
            AccessRule::AttemptLimit(max) => Some(format!("Attempts allowed: {}", max)),
            AccessRule::TimeLimit(limit) => Some(format!("Time limit: {}", format_duration(*limit))),
            AccessRule::Password => {
                Some("This quiz requires a password to attempt it".to_string())
            }
            AccessRule::Subnet(_) => {
                Some("This quiz may only be attempted from certain locations".to_string())
            }
            AccessRule::SecureWindow => {
                Some("This quiz must be attempted in a secure window".to_string())
            }
            AccessRule::DelayBetweenAttempts { .. } => None,
        }
    }

    /// The latest moment an attempt started at `started` may run until.
    pub fn end_time(&self, started: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            AccessRule::TimeLimit(limit) => Some(started + *limit),
            AccessRule::CloseDate(close) => Some(*close),
            _ => None,
        }
    }

    /// True when this rule alone means the user will never get another attempt.
    pub fn is_finished(&self, ctx: &RuleContext<'_>) -> bool {
        match self {
            AccessRule::CloseDate(close) => ctx.now > *close,
            AccessRule::AttemptLimit(max) => ctx.attempts_used >= *max as u32,
            _ => false,
        }
    }

    pub fn requires_popup(&self) -> bool {
        matches!(self, AccessRule::SecureWindow)
    }
}

pub fn format_date(dt: DateTime<Utc>) -> String {
    dt.format("%A, %-d %B %Y, %H:%M").to_string()
}

pub fn format_duration(d: Duration) -> String {
    let total = d.num_seconds().max(0);
    let (days, hours, mins, secs) = (
        total / 86_400,
        (total % 86_400) / 3_600,
        (total % 3_600) / 60,
        total % 60,
    );
    let mut parts = Vec::new();
    for (value, one, many) in [
        (days, "day", "days"),
        (hours, "hour", "hours"),
        (mins, "min", "mins"),
        (secs, "sec", "secs"),
    ] {
        if value > 0 {
            parts.push(format!("{} {}", value, if value == 1 { one } else { many }));
        }
    }
    if parts.is_empty() {
        "0 secs".to_string()
    } else {
        parts.join(" ")
    }
}
