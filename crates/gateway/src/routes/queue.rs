//! Queue listing for the dashboard

use axum::{
    extract::{Query, State},
    Json,
};
use serde::{Deserialize, Serialize};
use time::{macros::format_description, Date, OffsetDateTime};

use antrian_shared::{DayWindow, QueueRecord, QueueStatus};

use crate::{
    error::{ApiError, ApiResult},
    state::AppState,
};

#[derive(Debug, Deserialize)]
pub struct QueueQuery {
    /// `YYYY-MM-DD` in clinic local time; today when absent
    pub date: Option<String>,
    pub status: Option<QueueStatus>,
}

#[derive(Debug, Serialize)]
pub struct QueueResponse {
    pub date: String,
    pub total: usize,
    pub records: Vec<QueueRecord>,
}

fn parse_day(raw: &str) -> Result<Date, ApiError> {
    Date::parse(raw, format_description!("[year]-[month]-[day]"))
        .map_err(|_| ApiError::Validation("date must be formatted as YYYY-MM-DD".to_string()))
}

/// Records submitted on one local day, in ticket order
pub async fn list_queue(
    State(state): State<AppState>,
    Query(query): Query<QueueQuery>,
) -> ApiResult<Json<QueueResponse>> {
    let offset = state.config.clinic_offset();
    let day = match query.date.as_deref() {
        Some(raw) => parse_day(raw)?,
        None => OffsetDateTime::now_utc().to_offset(offset).date(),
    };

    let window = DayWindow::for_day(day, offset);
    let mut records = state.store.records_between(window.start, window.end).await?;
    if let Some(status) = query.status {
        records.retain(|record| record.status == status);
    }

    Ok(Json(QueueResponse {
        date: day.to_string(),
        total: records.len(),
        records,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::date;

    #[test]
    fn test_parse_day() {
        assert_eq!(parse_day("2024-03-09").unwrap(), date!(2024 - 03 - 09));
        assert!(matches!(parse_day("09/03/2024"), Err(ApiError::Validation(_))));
        assert!(parse_day("2024-02-30").is_err());
    }
}
