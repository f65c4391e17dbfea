use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::models::quiz::Quiz;
use crate::models::quiz_attempt::QuizAttempt;
use crate::services::access_rules::{AccessRule, DenialReason, RuleContext, RulePhase};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AccessDecision {
    pub may_attempt: bool,
    /// Every blocking condition, in rule order. Empty when access is permitted.
    pub reasons: Vec<DenialReason>,
    pub preflight_required: bool,
    pub window_open: bool,
    pub attempts_used: u32,
    /// The active attempt the user would continue instead of starting a new one.
    pub resume_attempt: Option<Uuid>,
}

/// Access rules of one quiz, evaluated at one instant.
///
/// Holds no state besides its inputs, so the same engine and history always
/// produce the same decision.
#[derive(Debug, Clone)]
pub struct AccessPolicyEngine<'q> {
    quiz: &'q Quiz,
    now: DateTime<Utc>,
    rules: Vec<AccessRule>,
}

impl<'q> AccessPolicyEngine<'q> {
    pub fn new(quiz: &'q Quiz, now: DateTime<Utc>, bypass_time_limits: bool) -> Self {
        Self {
            quiz,
            now,
            rules: AccessRule::for_quiz(quiz, bypass_time_limits),
        }
    }

    pub fn evaluate(&self, history: &[QuizAttempt]) -> Result<AccessDecision> {
        validate_quiz(self.quiz)?;
        validate_history(self.quiz, history)?;

        let ordered = chronological(history);
        let active = ordered.iter().find(|a| a.state.is_active()).copied();
        let attempts_used = attempts_used(&ordered);
        let last_finished = last_finished(&ordered);

        let ctx = RuleContext {
            now: self.now,
            attempts_used,
            last_finished,
        };

        let mut reasons = Vec::new();
        let mut window_open = true;
        for rule in &self.rules {
            let applies = match rule.phase() {
                RulePhase::Access => true,
                RulePhase::NewAttempt => active.is_none(),
                RulePhase::Preflight | RulePhase::Info => false,
            };
            if !applies {
                continue;
            }
            if let Some(reason) = rule.check(&ctx) {
                if rule.phase() == RulePhase::Access {
                    window_open = false;
                }
                reasons.push(reason);
            }
        }

        Ok(AccessDecision {
            may_attempt: reasons.is_empty(),
            reasons,
            preflight_required: self.is_preflight_required(),
            window_open,
            attempts_used,
            resume_attempt: active.map(|a| a.id),
        })
    }

    /// Reasons the user may not use the quiz at all right now.
    pub fn prevent_access(&self) -> Vec<DenialReason> {
        let ctx = RuleContext {
            now: self.now,
            attempts_used: 0,
            last_finished: None,
        };
        self.check_phase(RulePhase::Access, &ctx)
    }

    /// Reasons the user may not start another attempt.
    pub fn prevent_new_attempt(
        &self,
        attempts_used: u32,
        last_finished: Option<&QuizAttempt>,
    ) -> Vec<DenialReason> {
        let ctx = RuleContext {
            now: self.now,
            attempts_used,
            last_finished,
        };
        self.check_phase(RulePhase::NewAttempt, &ctx)
    }

    /// Whether the user can never start another attempt at this quiz.
    pub fn is_finished(&self, attempts_used: u32, last_finished: Option<&QuizAttempt>) -> bool {
        let ctx = RuleContext {
            now: self.now,
            attempts_used,
            last_finished,
        };
        self.rules.iter().any(|r| r.is_finished(&ctx))
    }

    pub fn is_preflight_required(&self) -> bool {
        self.rules.iter().any(|r| r.phase() == RulePhase::Preflight)
    }

    pub fn describe_rules(&self) -> Vec<String> {
        self.rules
            .iter()
            .filter_map(|r| r.describe(self.now))
            .collect()
    }

    /// Earliest end time any rule imposes on an attempt started at `started`.
    pub fn attempt_deadline(&self, started: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.rules.iter().filter_map(|r| r.end_time(started)).min()
    }

    pub fn popup_required(&self) -> bool {
        self.rules.iter().any(AccessRule::requires_popup)
    }

    fn check_phase(&self, phase: RulePhase, ctx: &RuleContext<'_>) -> Vec<DenialReason> {
        self.rules
            .iter()
            .filter(|r| r.phase() == phase)
            .filter_map(|r| r.check(ctx))
            .collect()
    }
}

/// Decide whether the user may attempt `quiz` at `now` given their attempt history.
pub fn evaluate(
    quiz: &Quiz,
    history: &[QuizAttempt],
    now: DateTime<Utc>,
    bypass_time_limits: bool,
) -> Result<AccessDecision> {
    AccessPolicyEngine::new(quiz, now, bypass_time_limits).evaluate(history)
}

/// Attempts ordered by start time, then attempt number.
pub fn chronological(history: &[QuizAttempt]) -> Vec<&QuizAttempt> {
    let mut ordered: Vec<&QuizAttempt> = history.iter().collect();
    ordered.sort_by(|a, b| {
        a.time_start
            .cmp(&b.time_start)
            .then(a.attempt_number.cmp(&b.attempt_number))
    });
    ordered
}

pub fn attempts_used(ordered: &[&QuizAttempt]) -> u32 {
    ordered
        .iter()
        .filter(|a| a.state.counts_toward_limit())
        .count() as u32
}

pub fn last_finished<'a>(ordered: &[&'a QuizAttempt]) -> Option<&'a QuizAttempt> {
    ordered.iter().rev().find(|a| a.state.is_terminal()).copied()
}

fn validate_quiz(quiz: &Quiz) -> Result<()> {
    if quiz.max_attempts < 0 {
        return Err(Error::ContractViolation(format!(
            "quiz {} has negative max_attempts {}",
            quiz.id, quiz.max_attempts
        )));
    }
    if quiz.grace_period_secs < 0 || quiz.delay1_secs < 0 || quiz.delay2_secs < 0 {
        return Err(Error::ContractViolation(format!(
            "quiz {} has a negative grace period or delay",
            quiz.id
        )));
    }
    Ok(())
}

pub fn validate_history(quiz: &Quiz, history: &[QuizAttempt]) -> Result<()> {
    let mut owner: Option<Uuid> = None;
    let mut active = 0usize;
    for attempt in history {
        if attempt.quiz_id != quiz.id {
            return Err(Error::ContractViolation(format!(
                "attempt {} belongs to quiz {}, not {}",
                attempt.id, attempt.quiz_id, quiz.id
            )));
        }
        match owner {
            None => owner = Some(attempt.user_id),
            Some(user) if user != attempt.user_id => {
                return Err(Error::ContractViolation(format!(
                    "attempt history mixes users {} and {}",
                    user, attempt.user_id
                )));
            }
            Some(_) => {}
        }
        if attempt.attempt_number <= 0 {
            return Err(Error::ContractViolation(format!(
                "attempt {} has non-positive number {}",
                attempt.id, attempt.attempt_number
            )));
        }
        if attempt.state.is_active() {
            active += 1;
        }
    }
    if active > 1 {
        return Err(Error::ContractViolation(format!(
            "{} active attempts at quiz {} for one user",
            active, quiz.id
        )));
    }
    Ok(())
}
