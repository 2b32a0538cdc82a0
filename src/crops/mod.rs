//! Prediction workflows: disease detection, crop recommendation and
//! desertification forecasting.
//!
//! Each workflow calls its external model endpoint, persists a history row
//! for the requesting user and answers with the prediction. History rows are
//! soft-deleted so records survive for later analysis.

mod disease;
mod forecasting;
mod recommendation;

pub use disease::*;
pub use forecasting::*;
pub use recommendation::*;

const HISTORY_NOT_FOUND: &str =
    "History item not found or does not belong to you";
