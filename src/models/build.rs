use crate::models::{Nevra, Recipe, UploadSummary};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BuildStatus {
    Waiting,
    Running,
    Finished,
    Failed,
}

impl BuildStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Waiting => "WAITING",
            Self::Running => "RUNNING",
            Self::Finished => "FINISHED",
            Self::Failed => "FAILED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Finished | Self::Failed)
    }
}

impl fmt::Display for BuildStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BuildStatus {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim() {
            "WAITING" => Ok(Self::Waiting),
            "RUNNING" => Ok(Self::Running),
            "FINISHED" => Ok(Self::Finished),
            "FAILED" => Ok(Self::Failed),
            other => Err(format!("Unknown build status: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimestampKind {
    Created,
    Started,
    Finished,
}

/// Unix times (seconds, UTC) of the build's transitions.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Timestamps {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished: Option<f64>,
}

impl Timestamps {
    pub fn set(&mut self, kind: TimestampKind, when: f64) {
        let slot = match kind {
            TimestampKind::Created => &mut self.created,
            TimestampKind::Started => &mut self.started,
            TimestampKind::Finished => &mut self.finished,
        };
        *slot = Some(when);
    }
}

/// What the image creator is asked to produce.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum OutputKind {
    Iso,
    Disk,
    FsImage,
    Tar,
}

/// Parameters handed to the build executor, written once as `config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BuildConfig {
    pub compose_type: String,
    pub image_name: String,
    pub output: OutputKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_type: Option<String>,
    pub image_only: bool,
    pub compression: String,
    #[serde(default)]
    pub compress_args: Vec<String>,
    pub ks: PathBuf,
    pub logfile: PathBuf,
    /// Minutes before the creator gives up.
    pub timeout: u64,
    pub arch: String,
    pub title: String,
    pub project: String,
    pub releasever: String,
}

struct ComposeKind {
    name: &'static str,
    output: OutputKind,
    image_name: &'static str,
    image_type: Option<&'static str>,
    image_only: bool,
}

const COMPOSE_KINDS: &[ComposeKind] = &[
    ComposeKind {
        name: "ami",
        output: OutputKind::Disk,
        image_name: "disk.ami",
        image_type: None,
        image_only: true,
    },
    ComposeKind {
        name: "ext4-filesystem",
        output: OutputKind::FsImage,
        image_name: "filesystem.img",
        image_type: None,
        image_only: true,
    },
    ComposeKind {
        name: "live-iso",
        output: OutputKind::Iso,
        image_name: "live.iso",
        image_type: None,
        image_only: false,
    },
    ComposeKind {
        name: "liveimg-tar",
        output: OutputKind::Tar,
        image_name: "root.tar.xz",
        image_type: None,
        image_only: true,
    },
    ComposeKind {
        name: "openstack",
        output: OutputKind::Disk,
        image_name: "disk.qcow2",
        image_type: Some("qcow2"),
        image_only: true,
    },
    ComposeKind {
        name: "partitioned-disk",
        output: OutputKind::Disk,
        image_name: "disk.img",
        image_type: None,
        image_only: true,
    },
    ComposeKind {
        name: "qcow2",
        output: OutputKind::Disk,
        image_name: "disk.qcow2",
        image_type: Some("qcow2"),
        image_only: true,
    },
    ComposeKind {
        name: "tar",
        output: OutputKind::Tar,
        image_name: "root.tar.xz",
        image_type: None,
        image_only: true,
    },
    ComposeKind {
        name: "vhd",
        output: OutputKind::Disk,
        image_name: "disk.vhd",
        image_type: Some("vpc"),
        image_only: true,
    },
    ComposeKind {
        name: "vmdk",
        output: OutputKind::Disk,
        image_name: "disk.vmdk",
        image_type: Some("vmdk"),
        image_only: true,
    },
];

/// Returns true when the crate knows how to configure a build of this type.
pub fn is_known_compose_type(compose_type: &str) -> bool {
    COMPOSE_KINDS.iter().any(|kind| kind.name == compose_type)
}

impl BuildConfig {
    pub fn for_compose_type(
        compose_type: &str,
        ks: PathBuf,
        logfile: PathBuf,
        arch: &str,
    ) -> Option<Self> {
        let kind = COMPOSE_KINDS.iter().find(|kind| kind.name == compose_type)?;
        Some(Self {
            compose_type: compose_type.to_string(),
            image_name: kind.image_name.to_string(),
            output: kind.output,
            image_type: kind.image_type.map(str::to_string),
            image_only: kind.image_only,
            compression: "xz".to_string(),
            compress_args: Vec::new(),
            ks,
            logfile,
            timeout: 60,
            arch: arch.to_string(),
            title: "Lorax Composer".to_string(),
            project: "Linux".to_string(),
            releasever: "".to_string(),
        })
    }
}

/// Read-only projection of one build's state.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct BuildDetail {
    pub id: Uuid,
    pub queue_status: BuildStatus,
    pub job_created: Option<f64>,
    pub job_started: Option<f64>,
    pub job_finished: Option<f64>,
    pub blueprint: String,
    pub version: String,
    pub compose_type: String,
    pub image_size: u64,
    pub uploads: Vec<UploadSummary>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BuildInfo {
    pub id: Uuid,
    pub commit: String,
    pub blueprint: Recipe,
    pub config: BuildConfig,
    pub deps: Vec<Nevra>,
    pub compose_type: String,
    pub queue_status: BuildStatus,
    pub image_size: u64,
    pub uploads: Vec<UploadSummary>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct QueueStatus {
    pub new: Vec<BuildDetail>,
    pub run: Vec<BuildDetail>,
}
