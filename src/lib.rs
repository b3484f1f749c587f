use anyhow::Result;
use chrono::{DateTime, Utc};
use log::{debug, info};
use serde::Serialize;
use std::collections::HashSet;
use std::fmt;
use std::time::Instant;

pub mod ec2;
pub mod logging;

pub use ec2::{AwsEc2, Ec2Api, VolumeLookupError};
pub use logging::set_up_logger;

use ec2::Snapshot;

pub const APP_NAME: &str = "snapshot_gc";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StaleReason {
    NoVolume,
    VolumeUnattached,
    VolumeMissing,
}

impl fmt::Display for StaleReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            StaleReason::NoVolume => "it was not attached to any volume",
            StaleReason::VolumeUnattached => {
                "its volume was not attached to any running instance"
            }
            StaleReason::VolumeMissing => "its associated volume was not found",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeletedSnapshot {
    pub snapshot_id: String,
    pub reason: StaleReason,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SweepReport {
    pub started_at: DateTime<Utc>,
    pub dry_run: bool,
    pub snapshots_examined: usize,
    pub running_instances: usize,
    pub deleted: Vec<DeletedSnapshot>,
    pub kept: usize,
}

/// Decides whether `snapshot` is stale. `Ok(None)` means it should be kept.
///
/// A volume with any attachment keeps its snapshots, whatever the state of the
/// attached instance.
pub async fn classify_snapshot(
    ec2: &impl Ec2Api,
    snapshot: &Snapshot,
) -> Result<Option<StaleReason>> {
    let Some(volume_id) = snapshot.volume_id() else {
        return Ok(Some(StaleReason::NoVolume));
    };

    match ec2.describe_volume(volume_id).await {
        Ok(volume) if volume.is_attached() => {
            debug!(
                "Keeping {} (volume {volume_id} is attached to {:?})",
                snapshot.snapshot_id,
                volume.attached_instance_ids()
            );
            Ok(None)
        }
        Ok(_) => Ok(Some(StaleReason::VolumeUnattached)),
        Err(VolumeLookupError::NotFound { .. }) => Ok(Some(StaleReason::VolumeMissing)),
        Err(VolumeLookupError::Other(err)) => Err(err),
    }
}

pub async fn gc_snapshots(dry_run: bool) -> Result<SweepReport> {
    let ec2 = AwsEc2::from_env(None).await;
    sweep_snapshots(&ec2, dry_run).await
}

pub async fn gc_snapshots_in_region(region: String, dry_run: bool) -> Result<SweepReport> {
    let ec2 = AwsEc2::from_env(Some(region)).await;
    sweep_snapshots(&ec2, dry_run).await
}

/// Runs one pass over the account's snapshots, deleting every stale one.
///
/// Any error other than a missing volume aborts the pass. Deletions issued
/// before the error are not undone.
pub async fn sweep_snapshots(ec2: &impl Ec2Api, dry_run: bool) -> Result<SweepReport> {
    let started_at = Utc::now();
    let start_time = Instant::now();

    let snapshots = ec2.list_snapshots().await?;

    // Not consulted when classifying; see `classify_snapshot`.
    let active_instance_ids: HashSet<String> = ec2
        .list_running_instances()
        .await?
        .into_iter()
        .map(|instance| instance.instance_id)
        .collect();

    debug!(
        "Examining {} snapshot(s) with {} running instance(s)",
        snapshots.len(),
        active_instance_ids.len()
    );

    let mut report = SweepReport {
        started_at,
        dry_run,
        snapshots_examined: snapshots.len(),
        running_instances: active_instance_ids.len(),
        deleted: Vec::new(),
        kept: 0,
    };

    for snapshot in snapshots {
        let Some(reason) = classify_snapshot(ec2, &snapshot).await? else {
            report.kept += 1;
            continue;
        };

        if dry_run {
            info!(
                "Would delete EBS snapshot {} as {reason} (Dry-Run)",
                snapshot.snapshot_id
            );
        } else {
            ec2.delete_snapshot(&snapshot.snapshot_id).await?;
            info!(
                "Deleted EBS snapshot {} as {reason}.",
                snapshot.snapshot_id
            );
        }

        report.deleted.push(DeletedSnapshot {
            snapshot_id: snapshot.snapshot_id,
            reason,
        });
    }

    info!(
        "Snapshot sweep completed: {} {} of {} snapshot(s), kept {} in {:.2}s",
        if dry_run { "would delete" } else { "deleted" },
        report.deleted.len(),
        report.snapshots_examined,
        report.kept,
        start_time.elapsed().as_secs_f64()
    );

    Ok(report)
}
