//! Actions run by the demo binary.

use anyhow::Context;
use serde::{Deserialize, Serialize};
use serde_json::json;
use workhost::{
    Actions, Error,
    workhost_core::types::{Method, Payload},
};

/// Estimates pi on a worker.
pub struct Pi;

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct PiParams {
    /// Terms of the Leibniz series to sum.
    pub terms: u64,
}

impl Method for Pi {
    const NAME: &'static str = "pi";
    type Params = PiParams;
    type Output = f64;
}

/// Sums every byte of the payload's attachments.
pub const CHECKSUM: &str = "checksum";

pub fn actions() -> Result<Actions, Error> {
    let mut actions = Actions::new();
    actions
        .register_method::<Pi, _, _>(|params: PiParams| async move {
            // CPU bound; keep it off the async worker threads.
            tokio::task::spawn_blocking(move || leibniz(params.terms))
                .await
                .context("pi estimation task failed")
        })?
        .register(CHECKSUM, |payload: Payload| async move {
            let bytes: usize = payload.transfer.iter().map(|b| b.len()).sum();
            let sum: u64 = payload
                .transfer
                .iter()
                .flat_map(|b| b.iter())
                .map(|&b| u64::from(b))
                .sum();
            Ok::<_, anyhow::Error>(json!({ "bytes": bytes, "sum": sum }))
        })?;
    Ok(actions)
}

fn leibniz(terms: u64) -> f64 {
    let mut acc = 0.0;
    for k in 0..terms {
        let term = term(k);
        if k % 2 == 0 {
            acc += term;
        } else {
            acc -= term;
        }
    }
    4.0 * acc
}

/// Magnitude of the `k`th series term, computed in floating point so huge
/// term counts cannot overflow.
fn term(k: u64) -> f64 {
    1.0 / (2.0 * k as f64 + 1.0)
}
