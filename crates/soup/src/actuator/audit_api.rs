//! Audit trail query route.
//!
//! `GET <root>/audit?from=<rfc3339>[&to=<rfc3339>][&limit=<n>][&offset=<n>]`
//! answers the matching events oldest first and the window size in
//! `X-Total-Count`.

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::Deserialize;

use super::{error_response, Actuator};
use crate::audit::{AuditError, ReadLogOption};

pub const TOTAL_COUNT_HEADER: &str = "x-total-count";

#[derive(Debug, Default, Deserialize)]
pub(crate) struct AuditQuery {
    from: Option<String>,
    to: Option<String>,
    limit: Option<String>,
    offset: Option<String>,
}

fn parse_time(name: &str, value: &str) -> Result<DateTime<Utc>, Response> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| {
            error_response(
                StatusCode::BAD_REQUEST,
                format!("'{}' is not an RFC 3339 time: {}", name, e),
            )
        })
}

fn parse_count(name: &str, value: &str) -> Result<usize, Response> {
    value.parse::<usize>().map_err(|_| {
        error_response(
            StatusCode::BAD_REQUEST,
            format!("'{}' must be a non-negative integer", name),
        )
    })
}

impl AuditQuery {
    fn into_option(self) -> Result<ReadLogOption, Response> {
        let Some(from) = self.from.as_deref().filter(|s| !s.is_empty()) else {
            return Err(error_response(
                StatusCode::UNPROCESSABLE_ENTITY,
                "'from' is required",
            ));
        };

        let start_time = parse_time("from", from)?;
        let end_time = match self.to.as_deref().filter(|s| !s.is_empty()) {
            Some(to) => parse_time("to", to)?,
            None => Utc::now(),
        };

        let mut option = ReadLogOption::between(start_time, end_time);
        if let Some(limit) = self.limit.as_deref() {
            option.limit = Some(parse_count("limit", limit)?);
        }
        if let Some(offset) = self.offset.as_deref() {
            option.offset = parse_count("offset", offset)?;
        }
        Ok(option)
    }
}

pub(crate) async fn query(
    State(actuator): State<Arc<Actuator>>,
    Query(params): Query<AuditQuery>,
) -> Response {
    let Some(log) = actuator.audit_log() else {
        return error_response(StatusCode::NOT_FOUND, "audit log not enabled");
    };

    let option = match params.into_option() {
        Ok(option) => option,
        Err(response) => return response,
    };

    match log.query(&option).await {
        Ok(page) => (
            StatusCode::OK,
            [(TOTAL_COUNT_HEADER, page.total.to_string())],
            Json(page.events),
        )
            .into_response(),
        Err(AuditError::InvalidQuery(msg)) => error_response(StatusCode::BAD_REQUEST, msg),
        Err(e) => {
            tracing::error!(error = %e, "audit query failed");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}
