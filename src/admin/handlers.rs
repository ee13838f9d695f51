use axum::{
    extract::{Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};

use super::AdminState;
use crate::pipeline::journal::JournalSummary;
use crate::pipeline::types::{ClaimFailure, ClaimRecord, ClaimState};

#[derive(Serialize)]
pub struct SystemStatus {
    pub version: &'static str,
    pub status: &'static str,
    pub claims: JournalSummary,
}

#[derive(Deserialize)]
pub struct ClaimsQuery {
    pub state: Option<String>,
}

const STATES: [ClaimState; 5] = [
    ClaimState::Observed,
    ClaimState::Validating,
    ClaimState::Approved,
    ClaimState::Rejected,
    ClaimState::Failed,
];

pub async fn get_status(State(state): State<AdminState>) -> Json<SystemStatus> {
    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION"),
        status: "operational",
        claims: state.journal.summary(),
    })
}

pub async fn get_claims(
    State(state): State<AdminState>,
    Query(query): Query<ClaimsQuery>,
) -> Result<Json<Vec<ClaimRecord>>, StatusCode> {
    let states: Vec<ClaimState> = match query.state.as_deref() {
        None => STATES.to_vec(),
        Some(name) => {
            let wanted = STATES
                .into_iter()
                .find(|s| s.as_str() == name)
                .ok_or(StatusCode::BAD_REQUEST)?;
            vec![wanted]
        }
    };

    let records = states
        .into_iter()
        .flat_map(|s| state.journal.in_state(s))
        .collect();
    Ok(Json(records))
}

/// Claims that exhausted their retries and need an operator.
pub async fn get_failed_claims(State(state): State<AdminState>) -> Json<Vec<ClaimFailure>> {
    let failed = state
        .journal
        .in_state(ClaimState::Failed)
        .iter()
        .map(ClaimFailure::from)
        .collect();
    Json(failed)
}
