use http::StatusCode;
use sea_orm::error::DbErr;
use serde::Serialize;

/// The four failure categories callers branch on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum::Display)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    NotFound,
    Conflict,
    Persistence,
}

#[derive(Debug, thiserror::Error, Serialize)]
pub enum ServiceError {
    #[error("Database error: {0}")]
    DatabaseError(
        #[from]
        #[serde(skip)]
        DbErr,
    ),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Insufficient stock: {0}")]
    InsufficientStock(String),

    #[error("Internal error: {0}")]
    InternalError(String),

    #[error(transparent)]
    Other(
        #[from]
        #[serde(skip)]
        anyhow::Error,
    ),
}

impl ServiceError {
    pub fn not_found(entity: &str, id: impl std::fmt::Display) -> Self {
        ServiceError::NotFound(format!("{} {} not found", entity, id))
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            ServiceError::ValidationError(_) | ServiceError::InvalidOperation(_) => {
                ErrorKind::Validation
            }
            ServiceError::NotFound(_) => ErrorKind::NotFound,
            ServiceError::Conflict(_) | ServiceError::InsufficientStock(_) => ErrorKind::Conflict,
            ServiceError::DatabaseError(_)
            | ServiceError::InternalError(_)
            | ServiceError::Other(_) => ErrorKind::Persistence,
        }
    }

    /// Suggested status code for the HTTP layer wrapping this crate
    pub fn status_code(&self) -> StatusCode {
        match self {
            ServiceError::ValidationError(_) => StatusCode::BAD_REQUEST,
            ServiceError::InvalidOperation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ServiceError::NotFound(_) => StatusCode::NOT_FOUND,
            ServiceError::Conflict(_) | ServiceError::InsufficientStock(_) => StatusCode::CONFLICT,
            ServiceError::DatabaseError(_)
            | ServiceError::InternalError(_)
            | ServiceError::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message safe to hand to an end user; persistence details stay in the logs
    pub fn response_message(&self) -> String {
        match self.kind() {
            ErrorKind::Persistence => "An internal error occurred".to_string(),
            _ => self.to_string(),
        }
    }
}

impl From<validator::ValidationErrors> for ServiceError {
    fn from(errors: validator::ValidationErrors) -> Self {
        let mut messages = Vec::new();
        flatten_validation_errors("", &errors, &mut messages);
        messages.sort();

        ServiceError::ValidationError(messages.join("; "))
    }
}

fn flatten_validation_errors(
    prefix: &str,
    errors: &validator::ValidationErrors,
    out: &mut Vec<String>,
) {
    use validator::ValidationErrorsKind;

    for (field, kind) in errors.errors() {
        let path = if prefix.is_empty() {
            (*field).to_string()
        } else {
            format!("{}.{}", prefix, field)
        };

        match kind {
            ValidationErrorsKind::Field(errs) => {
                out.extend(errs.iter().map(|err| match &err.message {
                    Some(message) => format!("{}: {}", path, message),
                    None => format!("{}: {}", path, err.code),
                }));
            }
            ValidationErrorsKind::Struct(inner) => flatten_validation_errors(&path, inner, out),
            ValidationErrorsKind::List(items) => {
                for (index, inner) in items {
                    flatten_validation_errors(&format!("{}[{}]", path, index), inner, out);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(ServiceError::ValidationError("x".into()), ErrorKind::Validation, StatusCode::BAD_REQUEST)]
    #[case(ServiceError::InvalidOperation("x".into()), ErrorKind::Validation, StatusCode::UNPROCESSABLE_ENTITY)]
    #[case(ServiceError::NotFound("x".into()), ErrorKind::NotFound, StatusCode::NOT_FOUND)]
    #[case(ServiceError::Conflict("x".into()), ErrorKind::Conflict, StatusCode::CONFLICT)]
    #[case(ServiceError::InsufficientStock("x".into()), ErrorKind::Conflict, StatusCode::CONFLICT)]
    #[case(ServiceError::DatabaseError(DbErr::RecordNotInserted), ErrorKind::Persistence, StatusCode::INTERNAL_SERVER_ERROR)]
    fn maps_errors_onto_kind_and_status(
        #[case] error: ServiceError,
        #[case] kind: ErrorKind,
        #[case] status: StatusCode,
    ) {
        assert_eq!(error.kind(), kind);
        assert_eq!(error.status_code(), status);
    }

    #[test]
    fn persistence_errors_hide_details() {
        let err = ServiceError::DatabaseError(DbErr::Custom("password=secret".into()));
        assert_eq!(err.response_message(), "An internal error occurred");

        let err = ServiceError::Conflict("adjustment already approved".into());
        assert!(err.response_message().contains("already approved"));
    }

    #[test]
    fn validation_errors_are_flattened() {
        let mut errors = validator::ValidationErrors::new();
        let mut err = validator::ValidationError::new("range");
        err.message = Some("must not be negative".into());
        errors.add("quantity_physical", err);

        let converted: ServiceError = errors.into();
        assert_matches::assert_matches!(
            converted,
            ServiceError::ValidationError(msg) if msg == "quantity_physical: must not be negative"
        );
    }
}
