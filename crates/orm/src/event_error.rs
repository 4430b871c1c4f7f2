use std::fmt;

/// Error a lifecycle hook returns to abort the pipeline
#[derive(Debug, Clone, PartialEq)]
pub enum EventError {
    Validation {
        message: String,
        hint: Option<String>,
    },
    Database {
        message: String,
    },
    Observer {
        message: String,
    },
    PropagationStopped {
        reason: String,
    },
}

impl EventError {
    pub fn validation(message: &str) -> Self {
        Self::Validation {
            message: message.to_string(),
            hint: None,
        }
    }

    pub fn validation_with_hint(message: &str, hint: &str) -> Self {
        Self::Validation {
            message: message.to_string(),
            hint: Some(hint.to_string()),
        }
    }

    pub fn database(message: &str) -> Self {
        Self::Database {
            message: message.to_string(),
        }
    }

    pub fn observer(message: &str) -> Self {
        Self::Observer {
            message: message.to_string(),
        }
    }

    pub fn propagation_stopped(reason: &str) -> Self {
        Self::PropagationStopped {
            reason: reason.to_string(),
        }
    }
}

impl fmt::Display for EventError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventError::Validation { message, hint } => {
                write!(f, "Validation error: {}", message)?;
                if let Some(hint) = hint {
                    write!(f, " (hint: {})", hint)?;
                }
                Ok(())
            }
            EventError::Database { message } => write!(f, "Database error: {}", message),
            EventError::Observer { message } => write!(f, "Observer error: {}", message),
            EventError::PropagationStopped { reason } => {
                write!(f, "Event propagation stopped: {}", reason)
            }
        }
    }
}

impl std::error::Error for EventError {}

/// Lets hooks use `?` on engine calls such as `event.query().count::<M>()`
impl From<crate::error::OrmError> for EventError {
    fn from(err: crate::error::OrmError) -> Self {
        match err {
            crate::error::OrmError::Event(inner) => inner,
            other => Self::database(&other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_error_validation_with_hint() {
        let error =
            EventError::validation_with_hint("Invalid email format", "Use format user@domain.com");

        match error {
            EventError::Validation { message, hint } => {
                assert_eq!(message, "Invalid email format");
                assert_eq!(hint.unwrap(), "Use format user@domain.com");
            }
            _ => panic!("Expected validation error"),
        }
    }

    #[test]
    fn test_event_error_display() {
        let error = EventError::propagation_stopped("User cancelled operation");
        assert_eq!(
            error.to_string(),
            "Event propagation stopped: User cancelled operation"
        );
    }

    #[test]
    fn test_orm_error_unwraps_back_into_event_error() {
        let original = EventError::observer("boom");
        let orm: crate::error::OrmError = original.clone().into();
        let back: EventError = orm.into();
        assert_eq!(back, original);
    }
}
