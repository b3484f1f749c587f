use anyhow::{Context, Result, anyhow};
use aws_config::ConfigLoader;
use aws_config::retry::RetryConfig;
use aws_sdk_ec2::Client;
use aws_sdk_ec2::config::Region;
use aws_sdk_ec2::error::ProvideErrorMetadata;
use aws_sdk_ec2::types::{self, Filter};
use log::{debug, trace};
use std::error::Error as StdError;
use std::future::Future;
use thiserror::Error;

/// Service error code returned by `DescribeVolumes` for an unknown volume id.
pub const VOLUME_NOT_FOUND_CODE: &str = "InvalidVolume.NotFound";

const SNAPSHOT_OWNER_SELF: &str = "self";
const INSTANCE_STATE_FILTER: &str = "instance-state-name";
const INSTANCE_STATE_RUNNING: &str = "running";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub snapshot_id: String,
    pub volume_id: Option<String>,
}

impl Snapshot {
    /// The associated volume id, with an empty id treated as no volume.
    pub fn volume_id(&self) -> Option<&str> {
        self.volume_id.as_deref().filter(|id| !id.is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub instance_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Volume {
    pub attachments: Vec<Attachment>,
}

impl Volume {
    pub fn is_attached(&self) -> bool {
        !self.attachments.is_empty()
    }

    /// Ids of the instances this volume is attached to, for log lines.
    pub fn attached_instance_ids(&self) -> Vec<&str> {
        self.attachments
            .iter()
            .filter_map(|attachment| attachment.instance_id.as_deref())
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instance {
    pub instance_id: String,
}

#[derive(Debug, Error)]
pub enum VolumeLookupError {
    #[error("volume {volume_id} was not found")]
    NotFound { volume_id: String },
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// The EC2 control-plane calls a sweep needs.
pub trait Ec2Api {
    /// All snapshots owned by the calling account, in listing order.
    fn list_snapshots(&self) -> impl Future<Output = Result<Vec<Snapshot>>> + Send;

    /// All instances in the `running` state, flattened across reservations.
    fn list_running_instances(&self) -> impl Future<Output = Result<Vec<Instance>>> + Send;

    fn describe_volume(
        &self,
        volume_id: &str,
    ) -> impl Future<Output = Result<Volume, VolumeLookupError>> + Send;

    fn delete_snapshot(&self, snapshot_id: &str) -> impl Future<Output = Result<()>> + Send;
}

fn volume_lookup_error<E>(volume_id: &str, err: E) -> VolumeLookupError
where
    E: ProvideErrorMetadata + StdError + Send + Sync + 'static,
{
    if err.code() == Some(VOLUME_NOT_FOUND_CODE) {
        VolumeLookupError::NotFound {
            volume_id: volume_id.to_string(),
        }
    } else {
        VolumeLookupError::Other(
            anyhow::Error::from(err).context(format!("Failed to describe volume: {}", volume_id)),
        )
    }
}

/// `DescribeVolumes` for a single id; an empty result is treated as not found.
fn first_volume(
    volume_id: &str,
    volumes: Option<Vec<types::Volume>>,
) -> Result<Volume, VolumeLookupError> {
    let volume = volumes
        .unwrap_or_default()
        .into_iter()
        .next()
        .ok_or_else(|| VolumeLookupError::NotFound {
            volume_id: volume_id.to_string(),
        })?;

    let attachments = volume
        .attachments()
        .iter()
        .map(|attachment| Attachment {
            instance_id: attachment.instance_id().map(str::to_string),
        })
        .collect();

    Ok(Volume { attachments })
}

#[derive(Debug, Clone)]
pub struct AwsEc2 {
    client: Client,
}

impl AwsEc2 {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Loads the shared AWS configuration, optionally pinned to `region`.
    pub async fn from_env(region: Option<String>) -> Self {
        let mut aws_config = ConfigLoader::default();
        if let Some(region) = region {
            aws_config = aws_config.region(Region::new(region));
        }

        let aws_config = aws_config
            .retry_config(RetryConfig::standard())
            .load()
            .await;

        Self::new(Client::new(&aws_config))
    }
}

impl Ec2Api for AwsEc2 {
    async fn list_snapshots(&self) -> Result<Vec<Snapshot>> {
        let mut next_token = None;
        let mut snapshots = Vec::new();

        loop {
            trace!("Describing snapshots (next_token={next_token:?})");

            let describe_output = self
                .client
                .describe_snapshots()
                .owner_ids(SNAPSHOT_OWNER_SELF)
                .set_next_token(next_token)
                .send()
                .await
                .context("Failed to describe snapshots")?;

            for snapshot in describe_output.snapshots.unwrap_or_default() {
                let snapshot_id = snapshot
                    .snapshot_id()
                    .ok_or_else(|| anyhow!("Snapshot is missing an id"))?
                    .to_string();

                snapshots.push(Snapshot {
                    snapshot_id,
                    volume_id: snapshot.volume_id().map(str::to_string),
                });
            }

            next_token = describe_output.next_token;
            if next_token.is_none() {
                debug!("Found {} snapshot(s)", snapshots.len());
                break Ok(snapshots);
            }
        }
    }

    async fn list_running_instances(&self) -> Result<Vec<Instance>> {
        let mut next_token = None;
        let mut instances = Vec::new();

        let running = Filter::builder()
            .name(INSTANCE_STATE_FILTER)
            .values(INSTANCE_STATE_RUNNING)
            .build();

        loop {
            trace!("Describing running instances (next_token={next_token:?})");

            let describe_output = self
                .client
                .describe_instances()
                .filters(running.clone())
                .set_next_token(next_token)
                .send()
                .await
                .context("Failed to describe running instances")?;

            for reservation in describe_output.reservations.unwrap_or_default() {
                for instance in reservation.instances() {
                    let Some(instance_id) = instance.instance_id() else {
                        continue;
                    };

                    instances.push(Instance {
                        instance_id: instance_id.to_string(),
                    });
                }
            }

            next_token = describe_output.next_token;
            if next_token.is_none() {
                debug!("Found {} running instance(s)", instances.len());
                break Ok(instances);
            }
        }
    }

    async fn describe_volume(&self, volume_id: &str) -> Result<Volume, VolumeLookupError> {
        trace!("Describing volume {volume_id}");

        let describe_output = self
            .client
            .describe_volumes()
            .volume_ids(volume_id)
            .send()
            .await
            .map_err(|err| volume_lookup_error(volume_id, err))?;

        first_volume(volume_id, describe_output.volumes)
    }

    async fn delete_snapshot(&self, snapshot_id: &str) -> Result<()> {
        self.client
            .delete_snapshot()
            .snapshot_id(snapshot_id)
            .send()
            .await
            .with_context(|| format!("Failed to delete snapshot: {}", snapshot_id))?;

        debug!("Deleted {snapshot_id}");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aws_sdk_ec2::error::ErrorMetadata;
    use aws_sdk_ec2::operation::describe_volumes::DescribeVolumesError;

    #[test]
    fn test_snapshot_volume_id() {
        let snapshot = |volume_id: Option<&str>| Snapshot {
            snapshot_id: "snap-1".to_string(),
            volume_id: volume_id.map(str::to_string),
        };

        assert_eq!(None, snapshot(None).volume_id());
        assert_eq!(None, snapshot(Some("")).volume_id());
        assert_eq!(Some("vol-1"), snapshot(Some("vol-1")).volume_id());
    }

    #[test]
    fn test_volume_is_attached() {
        let mut volume = Volume {
            attachments: Vec::new(),
        };
        assert!(!volume.is_attached());

        volume.attachments.push(Attachment {
            instance_id: Some("i-1".to_string()),
        });
        volume.attachments.push(Attachment { instance_id: None });
        assert!(volume.is_attached());
        assert_eq!(vec!["i-1"], volume.attached_instance_ids());
    }

    fn service_error(code: &str) -> DescribeVolumesError {
        DescribeVolumesError::generic(
            ErrorMetadata::builder()
                .code(code)
                .message("The volume 'vol-1' does not exist.")
                .build(),
        )
    }

    #[test]
    fn test_volume_lookup_error_not_found() {
        match volume_lookup_error("vol-1", service_error(VOLUME_NOT_FOUND_CODE)) {
            VolumeLookupError::NotFound { volume_id } => assert_eq!("vol-1", volume_id),
            other => panic!("Expected NotFound, got {other:?}"),
        }
    }

    #[test]
    fn test_volume_lookup_error_other() {
        for code in ["UnauthorizedOperation", "RequestLimitExceeded", "InvalidVolumeID.Malformed"] {
            let err = volume_lookup_error("vol-1", service_error(code));
            assert!(matches!(err, VolumeLookupError::Other(_)), "{code}");
            assert!(err.to_string().contains("vol-1"));
        }

        let err = volume_lookup_error(
            "vol-1",
            DescribeVolumesError::generic(ErrorMetadata::builder().build()),
        );
        assert!(matches!(err, VolumeLookupError::Other(_)));
    }

    #[test]
    fn test_first_volume_empty_is_not_found() {
        for volumes in [None, Some(Vec::new())] {
            match first_volume("vol-2", volumes) {
                Err(VolumeLookupError::NotFound { volume_id }) => assert_eq!("vol-2", volume_id),
                other => panic!("Expected NotFound, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_first_volume_attachments() -> Result<()> {
        let detached = types::Volume::builder().volume_id("vol-1").build();
        assert!(!first_volume("vol-1", Some(vec![detached]))?.is_attached());

        let attached = types::Volume::builder()
            .volume_id("vol-3")
            .attachments(
                types::VolumeAttachment::builder()
                    .instance_id("i-stopped")
                    .volume_id("vol-3")
                    .build(),
            )
            .build();
        let volume = first_volume("vol-3", Some(vec![attached]))?;
        assert!(volume.is_attached());
        assert_eq!(vec!["i-stopped"], volume.attached_instance_ids());
        Ok(())
    }
}
