//! Boundary result type: a success flag plus a human-readable message

use crate::AppError;
use app_fs::BatchReport;
use serde::Serialize;

/// What outer layers serialize for every operation
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Reply<T> {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T> Reply<T> {
    pub fn success(data: T) -> Self {
        Self {
            ok: true,
            message: None,
            data: Some(data),
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            message: Some(message.into()),
            data: None,
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

impl Reply<BatchReport> {
    /// Batch results stay `ok`; failed items are counted in the message
    pub fn batch(report: BatchReport, action: &str) -> Self {
        let message = report.summary(action);
        Self::success(report).with_message(message)
    }
}

impl<T> From<Result<T, AppError>> for Reply<T> {
    fn from(result: Result<T, AppError>) -> Self {
        match result {
            Ok(data) => Self::success(data),
            Err(e) => {
                if e.is_client_error() {
                    tracing::debug!("Request failed: {}", e);
                } else {
                    tracing::error!("Request failed: {}", e);
                }
                Self::failure(e.user_message())
            }
        }
    }
}
