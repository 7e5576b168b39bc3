use thiserror::Error;

use crate::domain::processing_unit::PuType;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DomainError {
    #[error("invalid benchmark sample `{benchmark}`: {reason}")]
    InvalidSample { benchmark: String, reason: String },
    #[error("invalid laptop record `{name}`: {reason}")]
    InvalidLaptop { name: String, reason: String },
    #[error("invalid rule set for category `{category}`: {reason}")]
    InvalidRuleSet { category: String, reason: String },
    #[error("unknown category `{0}`")]
    UnknownCategory(String),
    #[error("invalid selection request: {0}")]
    InvalidSelection(String),
    #[error("unknown {pu_type} processing unit `{id}`")]
    UnknownProcessingUnit { pu_type: PuType, id: String },
    #[error("domain invariant violation: {0}")]
    InvariantViolation(String),
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("catalog store unavailable: {0}")]
    Unavailable(String),
    #[error("catalog store decode failure: {0}")]
    Decode(String),
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ApplicationError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error("persistence failure: {0}")]
    Persistence(String),
    #[error("background task failure: {0}")]
    Task(String),
}

impl From<StoreError> for ApplicationError {
    fn from(value: StoreError) -> Self {
        Self::Persistence(value.to_string())
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum InterfaceError {
    #[error("bad request: {message}")]
    BadRequest { message: String, correlation_id: String },
    #[error("service unavailable: {message}")]
    ServiceUnavailable { message: String, correlation_id: String },
    #[error("internal error: {message}")]
    Internal { message: String, correlation_id: String },
}

impl InterfaceError {
    pub fn correlation_id(&self) -> &str {
        match self {
            Self::BadRequest { correlation_id, .. }
            | Self::ServiceUnavailable { correlation_id, .. }
            | Self::Internal { correlation_id, .. } => correlation_id,
        }
    }
}

impl ApplicationError {
    pub fn into_interface(self, correlation_id: impl Into<String>) -> InterfaceError {
        let correlation_id = correlation_id.into();
        let mut mapped = InterfaceError::from(self);
        match &mut mapped {
            InterfaceError::BadRequest { correlation_id: id, .. }
            | InterfaceError::ServiceUnavailable { correlation_id: id, .. }
            | InterfaceError::Internal { correlation_id: id, .. } => *id = correlation_id,
        }
        mapped
    }
}

impl From<ApplicationError> for InterfaceError {
    fn from(value: ApplicationError) -> Self {
        match value {
            ApplicationError::Domain(DomainError::InvariantViolation(message))
            | ApplicationError::Task(message) => {
                Self::Internal { message, correlation_id: "unassigned".to_owned() }
            }
            ApplicationError::Domain(error) => Self::BadRequest {
                message: error.to_string(),
                correlation_id: "unassigned".to_owned(),
            },
            ApplicationError::Persistence(message) => {
                Self::ServiceUnavailable { message, correlation_id: "unassigned".to_owned() }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::errors::{ApplicationError, DomainError, InterfaceError, StoreError};

    #[test]
    fn unknown_category_maps_to_bad_request_interface_error() {
        let interface = ApplicationError::from(DomainError::UnknownCategory("cooking".to_owned()))
            .into_interface("req-1");

        assert!(matches!(
            interface,
            InterfaceError::BadRequest {
                ref correlation_id,
                ref message,
            } if correlation_id == "req-1" && message.contains("cooking")
        ));
    }

    #[test]
    fn invalid_selection_keeps_its_correlation_id() {
        let interface =
            ApplicationError::from(DomainError::InvalidSelection("weights sum to zero".to_owned()))
                .into_interface("req-2");

        assert!(matches!(interface, InterfaceError::BadRequest { .. }));
        assert_eq!(interface.correlation_id(), "req-2");
    }

    #[test]
    fn store_error_maps_to_service_unavailable() {
        let interface = ApplicationError::from(StoreError::Unavailable("pool timed out".to_owned()))
            .into_interface("req-3");

        assert!(matches!(interface, InterfaceError::ServiceUnavailable { .. }));
        assert_eq!(interface.correlation_id(), "req-3");
    }

    #[test]
    fn invariant_violation_maps_to_internal() {
        let interface =
            ApplicationError::from(DomainError::InvariantViolation("negative weight".to_owned()))
                .into_interface("req-4");

        assert!(matches!(interface, InterfaceError::Internal { .. }));
    }
}
