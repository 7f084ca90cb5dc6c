use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;

use crate::error::{CuOptError, Result};
use crate::response::{Envelope, KEY_REQ_ID, KEY_RESPONSE};

/// Solution data of a single LP/MILP solve
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SolutionData {
    #[serde(default)]
    pub problem_category: Option<i64>,
    #[serde(default)]
    pub primal_solution: Vec<f64>,
    #[serde(default)]
    pub dual_solution: Vec<f64>,
    #[serde(default)]
    pub reduced_cost: Vec<f64>,
    #[serde(default)]
    pub primal_objective: Option<f64>,
    #[serde(default)]
    pub dual_objective: Option<f64>,
    #[serde(default)]
    pub solver_time: Option<f64>,
    /// Variable name to value
    #[serde(default)]
    pub vars: HashMap<String, f64>,
    #[serde(default)]
    pub lp_statistics: Map<String, Value>,
    #[serde(default)]
    pub milp_statistics: Map<String, Value>,
}

/// One solver response: termination status plus solution data
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LpSolution {
    pub status: i64,
    pub solution: SolutionData,
}

/// Typed view of a completed LP/MILP job
#[derive(Debug, Clone, PartialEq)]
pub struct LpResponse {
    /// One entry per problem; batch solves return several
    pub solutions: Vec<LpSolution>,
    pub total_solve_time: Option<f64>,
    pub req_id: Option<String>,
}

fn solver_response(envelope: &Envelope) -> Option<&Value> {
    envelope.get(KEY_RESPONSE)?.get("solver_response")
}

fn looks_like_lp(value: &Value) -> bool {
    value
        .get("solution")
        .and_then(|s| s.get("primal_solution"))
        .is_some()
}

/// True for completed LP/MILP jobs; routing responses carry no primal
/// solution.
pub fn is_lp_response(envelope: &Envelope) -> bool {
    match solver_response(envelope) {
        Some(Value::Array(items)) => !items.is_empty() && items.iter().all(looks_like_lp),
        Some(single) => looks_like_lp(single),
        None => false,
    }
}

impl TryFrom<&Envelope> for LpResponse {
    type Error = CuOptError;

    fn try_from(envelope: &Envelope) -> Result<Self> {
        let raw = solver_response(envelope)
            .ok_or_else(|| CuOptError::Decode("missing response.solver_response".to_string()))?;
        let solutions = match raw {
            Value::Array(_) => Vec::<LpSolution>::deserialize(raw),
            single => LpSolution::deserialize(single).map(|s| vec![s]),
        }
        .map_err(|e| CuOptError::Decode(e.to_string()))?;

        Ok(LpResponse {
            solutions,
            total_solve_time: envelope
                .get(KEY_RESPONSE)
                .and_then(|r| r.get("total_solve_time"))
                .and_then(Value::as_f64),
            req_id: envelope
                .get(KEY_REQ_ID)
                .and_then(Value::as_str)
                .map(str::to_string),
        })
    }
}
