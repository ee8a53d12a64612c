use std::collections::BTreeMap;

use crate::model::ControlTcpConnectResult;
use crate::model::testkeys::TcpConnectEntry;

/// Returns a copy of `measurement` with `status.blocked` set for every
/// endpoint the control also tried.
///
/// An endpoint is blocked when the control reached it and the probe did not.
/// Endpoints the control did not report on keep `blocked` as it was.
pub fn compute_tcp_blocking(
    measurement: &[TcpConnectEntry],
    control: &BTreeMap<String, ControlTcpConnectResult>,
) -> Vec<TcpConnectEntry> {
    measurement
        .iter()
        .map(|entry| {
            let mut entry = entry.clone();
            if let Some(theirs) = control.get(&entry.endpoint()) {
                entry.status.blocked =
                    Some(theirs.failure.is_none() && entry.status.failure.is_some());
            }
            entry
        })
        .collect()
}
