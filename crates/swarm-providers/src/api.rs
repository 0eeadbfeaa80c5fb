use std::fmt;

use crate::retry::{classify_http_status, classify_reqwest, ErrorClass};

/// Backend API failure with the HTTP status preserved for classification.
#[derive(Debug)]
pub(crate) struct ApiError {
    pub status: Option<u16>,
    pub message: String,
}

impl ApiError {
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        Self {
            status: Some(status),
            message: message.into(),
        }
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status {
            Some(status) => write!(f, "backend API error {}: {}", status, self.message),
            None => write!(f, "backend API error: {}", self.message),
        }
    }
}

impl std::error::Error for ApiError {}

pub(crate) fn classify_api_error(error: &anyhow::Error) -> ErrorClass {
    if let Some(api) = error.downcast_ref::<ApiError>() {
        return match api.status {
            Some(status) => classify_http_status(status),
            None => ErrorClass::Transient,
        };
    }
    if let Some(req) = error.downcast_ref::<reqwest::Error>() {
        return classify_reqwest(req);
    }
    ErrorClass::Permanent
}

pub(crate) fn is_not_found(error: &anyhow::Error) -> bool {
    classify_api_error(error) == ErrorClass::NotFound
}
