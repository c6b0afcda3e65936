//! Applies definitions and detects drift against the control plane.

use super::controlplane::{Comparison, ControlPlane};
use super::definitions::Request;
use super::error::{GitOpsError, Result};
use super::resource::Owner;

/// Drift status of a set of definitions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DriftReport {
    /// Identities of drifted definitions, in dependency order.
    pub drifted: Vec<String>,
    /// Number of definitions compared.
    pub checked: usize,
}

impl DriftReport {
    pub fn is_drifted(&self) -> bool {
        !self.drifted.is_empty()
    }
}

/// Applies every definition in order, stamped with `owner`.
///
/// Stops at the first failure; later definitions may depend on the failed one.
pub async fn sync(
    control_plane: &dyn ControlPlane,
    owner: &Owner,
    requests: &[Request],
) -> Result<usize> {
    for (index, request) in requests.iter().enumerate() {
        let definition = request.owned_by(owner);
        if let Err(e) = control_plane.apply(&definition).await {
            log::warn!(
                "{}: applying {} failed, {} definitions not applied: {}",
                owner.header_value(),
                request.identity(),
                requests.len() - index - 1,
                e
            );
            return Err(e);
        }
        log::debug!("{}: applied {}", owner.header_value(), request.identity());
    }

    Ok(requests.len())
}

/// Compares every definition with live state.
///
/// All definitions are checked even after one is found drifted. A rejection
/// or unreachable control plane aborts the check.
pub async fn drift(
    control_plane: &dyn ControlPlane,
    owner: &Owner,
    requests: &[Request],
) -> Result<DriftReport> {
    let mut report = DriftReport::default();

    for request in requests {
        let definition = request.owned_by(owner);
        match control_plane.compare(&definition).await {
            Ok(Comparison::Same) => {}
            Ok(Comparison::Drifted) => {
                log::info!("{}: {} drifted", owner.header_value(), request.identity());
                report.drifted.push(request.identity());
            }
            Err(e) => return Err(e),
        }
        report.checked += 1;
    }

    Ok(report)
}

/// Deletes definitions in reverse dependency order, waiting for each ack.
///
/// Keeps going after a failure and returns the first error at the end, so one
/// stuck object does not leave the rest behind.
pub async fn delete_all(
    control_plane: &dyn ControlPlane,
    owner: &Owner,
    requests: &[Request],
) -> Result<()> {
    let mut first_error: Option<GitOpsError> = None;

    for request in requests.iter().rev() {
        let definition = request.owned_by(owner);
        if let Err(e) = control_plane.delete(&definition).await {
            log::warn!(
                "{}: deleting {} failed: {}",
                owner.header_value(),
                request.identity(),
                e
            );
            first_error.get_or_insert(e);
        }
    }

    match first_error {
        Some(e) => Err(e),
        None => Ok(()),
    }
}
