use std::fmt;

#[derive(Debug)]
pub enum RuleError {
    InvalidRule(String),
    NotFound(uuid::Uuid),
    Storage(String),
}

impl fmt::Display for RuleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidRule(msg) => write!(f, "invalid rule: {}", msg),
            Self::NotFound(id) => write!(f, "rule not found: {}", id),
            Self::Storage(msg) => write!(f, "storage error: {}", msg),
        }
    }
}

impl std::error::Error for RuleError {}
