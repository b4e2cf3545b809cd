//! Response shapes and rendering for the trigger endpoint
//!
//! The trigger endpoint speaks two formats over one response shape: JSON for
//! programmatic callers, and single-line tagged output (`::notice::` /
//! `::error::`) for CI log parsers when `ga` is requested.

use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::dispatch::DispatchReport;

/// Output format selected by the request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// JSON body
    Json,
    /// CI-friendly tagged plain text
    CiAnnotations,
}

/// Generic API response wrapper for the status/stats surface
#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message.into()),
        }
    }
}

/// Render a completed dispatch report in the requested format
pub fn render_report(report: &DispatchReport, format: OutputFormat) -> Response {
    match format {
        OutputFormat::Json => (StatusCode::OK, Json(report)).into_response(),
        OutputFormat::CiAnnotations => {
            let line = if report.success {
                format!(
                    "::notice::{} (execution time: {}s)\n",
                    report.message, report.execution_time
                )
            } else {
                format!("::error::{}\n", report.message)
            };
            plain_text(StatusCode::OK, line)
        }
    }
}

/// Render a short-circuit denial (rate limit, auth, lock) or internal error
pub fn render_denial(status: StatusCode, message: &str, format: OutputFormat) -> Response {
    match format {
        OutputFormat::Json => {
            let body = DispatchReport {
                success: false,
                message: message.to_string(),
                count: 0,
                execution_time: 0.0,
            };
            (status, Json(body)).into_response()
        }
        OutputFormat::CiAnnotations => plain_text(status, format!("::error::{message}\n")),
    }
}

fn plain_text(status: StatusCode, body: String) -> Response {
    (
        status,
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        body,
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;

    fn report(success: bool) -> DispatchReport {
        DispatchReport {
            success,
            message: if success {
                "Queued 3 sites for cron processing".to_string()
            } else {
                "No eligible sites found in the directory".to_string()
            },
            count: if success { 3 } else { 0 },
            execution_time: 0.05,
        }
    }

    async fn body_string(response: Response) -> String {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_json_report() {
        let response = render_report(&report(true), OutputFormat::Json);
        assert_eq!(response.status(), StatusCode::OK);

        let body = body_string(response).await;
        let value: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(value["success"], true);
        assert_eq!(value["count"], 3);
    }

    #[tokio::test]
    async fn test_ci_notice_line() {
        let response = render_report(&report(true), OutputFormat::CiAnnotations);
        let body = body_string(response).await;
        assert!(body.starts_with("::notice::Queued 3 sites"));
        assert!(body.contains("execution time: 0.05s"));
    }

    #[tokio::test]
    async fn test_ci_error_line() {
        let response = render_report(&report(false), OutputFormat::CiAnnotations);
        let body = body_string(response).await;
        assert!(body.starts_with("::error::No eligible sites"));
    }

    #[tokio::test]
    async fn test_denial_json_carries_status() {
        let response = render_denial(
            StatusCode::TOO_MANY_REQUESTS,
            "Rate limit exceeded. Please try again later.",
            OutputFormat::Json,
        );
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);

        let body = body_string(response).await;
        let value: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(value["success"], false);
    }

    #[tokio::test]
    async fn test_denial_ci_format() {
        let response = render_denial(
            StatusCode::UNAUTHORIZED,
            "Authentication required",
            OutputFormat::CiAnnotations,
        );
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let body = body_string(response).await;
        assert_eq!(body, "::error::Authentication required\n");
    }
}
