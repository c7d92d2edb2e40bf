use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::api::{ChangePasswordRequest, CreatePollRequest, RegisterRequest, UpdatePollRequest};

pub const USERNAME_MIN: usize = 3;
pub const USERNAME_MAX: usize = 32;
pub const PASSWORD_MIN: usize = 8;
pub const TITLE_MAX: usize = 200;
pub const QUESTION_MAX: usize = 600;
pub const CHOICE_MAX: usize = 300;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct ValidationError(pub String);

fn invalid(msg: impl Into<String>) -> ValidationError {
    ValidationError(msg.into())
}

fn check_text(field: &str, value: &str, max: usize) -> Result<(), ValidationError> {
    let len = value.trim().chars().count();
    if len == 0 {
        return Err(invalid(format!("{field} must not be empty")));
    }
    if len > max {
        return Err(invalid(format!("{field} must be at most {max} characters")));
    }
    Ok(())
}

fn check_end_date(end_date: Option<DateTime<Utc>>, now: DateTime<Utc>) -> Result<(), ValidationError> {
    match end_date {
        Some(end) if end <= now => Err(invalid("end_date must be in the future")),
        _ => Ok(()),
    }
}

fn check_password(password: &str) -> Result<(), ValidationError> {
    if password.chars().count() < PASSWORD_MIN {
        return Err(invalid(format!(
            "password must be at least {PASSWORD_MIN} characters"
        )));
    }
    Ok(())
}

impl RegisterRequest {
    pub fn validate(&self) -> Result<(), ValidationError> {
        let len = self.username.chars().count();
        if !(USERNAME_MIN..=USERNAME_MAX).contains(&len) {
            return Err(invalid(format!(
                "username must be between {USERNAME_MIN} and {USERNAME_MAX} characters"
            )));
        }
        check_password(&self.password)
    }
}

impl ChangePasswordRequest {
    pub fn validate(&self) -> Result<(), ValidationError> {
        check_password(&self.new_password)
    }
}

impl CreatePollRequest {
    pub fn validate(&self, now: DateTime<Utc>) -> Result<(), ValidationError> {
        check_text("title", &self.title, TITLE_MAX)?;
        check_end_date(self.end_date, now)?;
        for question in &self.questions {
            check_text("question text", &question.text, QUESTION_MAX)?;
            for choice in &question.choices {
                check_text("choice text", &choice.text, CHOICE_MAX)?;
            }
        }
        Ok(())
    }
}

impl UpdatePollRequest {
    pub fn validate(&self, now: DateTime<Utc>) -> Result<(), ValidationError> {
        if let Some(title) = &self.title {
            check_text("title", title, TITLE_MAX)?;
        }
        check_end_date(self.end_date.flatten(), now)?;

        let Some(questions) = &self.questions else {
            return Ok(());
        };
        for question in questions {
            check_text("question text", &question.text, QUESTION_MAX)?;
            for choice in &question.choices {
                check_text("choice text", &choice.text, CHOICE_MAX)?;
            }
        }
        Ok(())
    }

    /// True when the request rewrites questions or choices.
    pub fn is_structural(&self) -> bool {
        self.questions.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{CreateChoice, CreateQuestion};

    fn poll(title: &str) -> CreatePollRequest {
        CreatePollRequest {
            title: title.into(),
            description: None,
            end_date: None,
            questions: vec![CreateQuestion {
                text: "Which language do you prefer?".into(),
                choices: vec![
                    CreateChoice { text: "Python".into() },
                    CreateChoice { text: "Rust".into() },
                ],
            }],
        }
    }

    #[test]
    fn accepts_well_formed_poll() {
        assert!(poll("Favorite Programming Language").validate(Utc::now()).is_ok());
    }

    #[test]
    fn rejects_blank_and_oversized_titles() {
        assert!(poll("   ").validate(Utc::now()).is_err());
        assert!(poll(&"x".repeat(TITLE_MAX + 1)).validate(Utc::now()).is_err());
    }

    #[test]
    fn rejects_empty_choice_text() {
        let mut req = poll("Pets");
        req.questions[0].choices.push(CreateChoice { text: String::new() });
        let err = req.validate(Utc::now()).unwrap_err();
        assert_eq!(err.0, "choice text must not be empty");
    }

    #[test]
    fn rejects_end_date_in_the_past() {
        let now = Utc::now();
        let mut req = poll("Pets");
        req.end_date = Some(now - chrono::Duration::hours(1));
        assert!(req.validate(now).is_err());
    }

    #[test]
    fn short_username_rejected() {
        let req = RegisterRequest {
            username: "ab".into(),
            password: "long-enough".into(),
        };
        assert!(req.validate().is_err());
    }

    #[test]
    fn metadata_only_update_is_not_structural() {
        let req = UpdatePollRequest {
            title: Some("Renamed".into()),
            ..Default::default()
        };
        assert!(!req.is_structural());
        assert!(req.validate(Utc::now()).is_ok());
    }

    #[test]
    fn update_end_date_distinguishes_null_from_absent() {
        let absent: UpdatePollRequest = serde_json::from_str(r#"{"title": "T"}"#).unwrap();
        assert_eq!(absent.end_date, None);

        let cleared: UpdatePollRequest = serde_json::from_str(r#"{"end_date": null}"#).unwrap();
        assert_eq!(cleared.end_date, Some(None));
        assert!(cleared.validate(Utc::now()).is_ok());

        let set: UpdatePollRequest =
            serde_json::from_str(r#"{"end_date": "2999-01-01T00:00:00Z"}"#).unwrap();
        assert!(matches!(set.end_date, Some(Some(_))));
    }
}
