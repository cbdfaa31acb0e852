//! Per-build log capture.
//!
//! While a build runs, the monitor attaches that build's `logs/` directory to
//! [`BuildLogLayer`]. Every event then lands in `combined.log`, and is also
//! routed by target: `program` (external tool output) to `program.log`, `dnf`
//! (package resolution) to `dnf.log`, everything else to `composer.log`.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing_subscriber::Layer;

pub const PROGRAM_TARGET: &str = "program";
pub const DNF_TARGET: &str = "dnf";

struct BuildLogFiles {
    combined: File,
    composer: File,
    program: File,
    dnf: File,
}

impl BuildLogFiles {
    fn open(logs_dir: &Path) -> std::io::Result<Self> {
        std::fs::create_dir_all(logs_dir)?;
        let open = |name: &str| {
            OpenOptions::new()
                .create(true)
                .append(true)
                .open(logs_dir.join(name))
        };
        Ok(Self {
            combined: open("combined.log")?,
            composer: open("composer.log")?,
            program: open("program.log")?,
            dnf: open("dnf.log")?,
        })
    }

    fn stream_for(&mut self, target: &str) -> &mut File {
        if target.starts_with(PROGRAM_TARGET) {
            &mut self.program
        } else if target.starts_with(DNF_TARGET) {
            &mut self.dnf
        } else {
            &mut self.composer
        }
    }
}

/// Shared slot for the currently attached build, if any.
#[derive(Clone, Default)]
pub struct BuildLogs {
    active: Arc<Mutex<Option<BuildLogFiles>>>,
}

impl BuildLogs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn layer(&self) -> BuildLogLayer {
        BuildLogLayer { logs: self.clone() }
    }

    /// Starts capturing into `logs_dir` until the returned guard is dropped.
    pub fn attach(&self, logs_dir: &Path) -> std::io::Result<BuildLogGuard> {
        let files = BuildLogFiles::open(logs_dir)?;
        *self.lock() = Some(files);
        Ok(BuildLogGuard { logs: self.clone() })
    }

    pub fn is_attached(&self) -> bool {
        self.lock().is_some()
    }

    fn lock(&self) -> MutexGuard<'_, Option<BuildLogFiles>> {
        self.active.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Detaches the build's log files when dropped.
pub struct BuildLogGuard {
    logs: BuildLogs,
}

impl Drop for BuildLogGuard {
    fn drop(&mut self) {
        if let Some(mut files) = self.logs.lock().take() {
            let _ = files.combined.flush();
        }
    }
}

pub struct BuildLogLayer {
    logs: BuildLogs,
}

impl<S> Layer<S> for BuildLogLayer
where
    S: tracing::Subscriber,
{
    fn on_event(
        &self,
        event: &tracing::Event<'_>,
        _ctx: tracing_subscriber::layer::Context<'_, S>,
    ) {
        use std::fmt::Write as _;
        use tracing::field::Visit;

        let mut active = self.logs.lock();
        let Some(files) = active.as_mut() else {
            return;
        };

        struct MessageVisitor {
            message: String,
        }

        impl Visit for MessageVisitor {
            fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
                if field.name() == "message" {
                    let _ = write!(self.message, "{:?}", value);
                } else {
                    let _ = write!(self.message, " {}={:?}", field.name(), value);
                }
            }

            fn record_str(&mut self, field: &tracing::field::Field, value: &str) {
                if field.name() == "message" {
                    self.message.push_str(value);
                } else {
                    let _ = write!(self.message, " {}={}", field.name(), value);
                }
            }
        }

        let mut visitor = MessageVisitor {
            message: String::new(),
        };
        event.record(&mut visitor);

        let metadata = event.metadata();
        let line = format!(
            "{} {:<5} {}: {}\n",
            chrono::Utc::now().format("%Y-%m-%d %H:%M:%S%.3f"),
            metadata.level(),
            metadata.target(),
            visitor.message
        );

        let _ = files.combined.write_all(line.as_bytes());
        let _ = files.stream_for(metadata.target()).write_all(line.as_bytes());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_subscriber::layer::SubscriberExt;

    #[test]
    fn events_are_routed_while_attached() {
        let dir = tempfile::tempdir().unwrap();
        let logs = BuildLogs::new();
        let subscriber = tracing_subscriber::registry().with(logs.layer());

        tracing::subscriber::with_default(subscriber, || {
            tracing::info!("before attach");
            {
                let _guard = logs.attach(dir.path()).unwrap();
                assert!(logs.is_attached());
                tracing::info!(build = "abc", "composer event");
                tracing::info!(target: "program", "anaconda says hi");
                tracing::warn!(target: "dnf", "repo metadata expired");
            }
            assert!(!logs.is_attached());
            tracing::info!("after detach");
        });

        let read = |name: &str| std::fs::read_to_string(dir.path().join(name)).unwrap();
        let combined = read("combined.log");
        assert_eq!(combined.lines().count(), 3);
        assert!(!combined.contains("before attach"));
        assert!(!combined.contains("after detach"));

        let composer = read("composer.log");
        assert!(composer.contains("composer event"));
        assert!(composer.contains("build=abc"));
        assert!(!composer.contains("anaconda"));
        assert!(read("program.log").contains("anaconda says hi"));
        assert!(read("dnf.log").contains("repo metadata expired"));
    }
}
