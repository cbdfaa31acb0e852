use crate::error::{AppError, Result};
use crate::logging::DNF_TARGET;
use crate::models::{Nevra, RecipePackage};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Command;

const QUERY_FORMAT: &str = "%{name}|%{epoch}|%{version}|%{release}|%{arch}";

/// Resolves recipe projects into the full package set to install.
pub trait Depsolver: Send + Sync {
    fn depsolve(&self, projects: &[RecipePackage]) -> Result<Vec<Nevra>>;
}

/// Resolves through `dnf repoquery` against the host's enabled repositories.
#[derive(Debug, Clone)]
pub struct RepoqueryDepsolver {
    dnf_path: PathBuf,
}

impl RepoqueryDepsolver {
    pub fn new(dnf_path: Option<PathBuf>) -> Self {
        Self {
            dnf_path: dnf_path.unwrap_or_else(|| PathBuf::from("dnf")),
        }
    }

    /// `name-version` globs as dnf understands them.
    fn package_specs(projects: &[RecipePackage]) -> Vec<String> {
        projects
            .iter()
            .map(|project| match project.version.as_deref() {
                None | Some("") | Some("*") => project.name.clone(),
                Some(version) => format!("{}-{}", project.name, version),
            })
            .collect()
    }

    fn repoquery(&self, extra: &[&str], specs: &[String]) -> Result<Vec<Nevra>> {
        let output = Command::new(&self.dnf_path)
            .arg("repoquery")
            .arg("--quiet")
            .arg("--latest-limit=1")
            .arg(format!("--queryformat={}\\n", QUERY_FORMAT))
            .args(extra)
            .args(specs)
            .output()
            .map_err(|e| AppError::Depsolve(format!("Failed to run dnf: {}", e)))?;

        let stderr = String::from_utf8_lossy(&output.stderr);
        for line in stderr.lines().filter(|l| !l.trim().is_empty()) {
            tracing::warn!(target: DNF_TARGET, "{}", line);
        }
        if !output.status.success() {
            return Err(AppError::Depsolve(format!(
                "dnf repoquery failed: {}",
                stderr.trim()
            )));
        }

        String::from_utf8_lossy(&output.stdout)
            .lines()
            .filter(|l| !l.trim().is_empty())
            .map(parse_nevra_line)
            .collect()
    }
}

impl Default for RepoqueryDepsolver {
    fn default() -> Self {
        Self::new(None)
    }
}

impl Depsolver for RepoqueryDepsolver {
    fn depsolve(&self, projects: &[RecipePackage]) -> Result<Vec<Nevra>> {
        if projects.is_empty() {
            return Ok(Vec::new());
        }
        let specs = Self::package_specs(projects);
        tracing::info!(target: DNF_TARGET, "Depsolving {}", specs.join(" "));

        let direct = self.repoquery(&[], &specs)?;
        for project in projects {
            if !direct.iter().any(|nevra| nevra.name == project.name) {
                return Err(AppError::Depsolve(format!(
                    "No package matches {}",
                    project.name
                )));
            }
        }
        let required = self.repoquery(&["--requires", "--resolve", "--recursive"], &specs)?;

        let mut by_name = BTreeMap::new();
        for nevra in direct.into_iter().chain(required) {
            by_name.entry(nevra.name.clone()).or_insert(nevra);
        }
        Ok(by_name.into_values().collect())
    }
}

/// Parses one `name|epoch|version|release|arch` line.
pub fn parse_nevra_line(line: &str) -> Result<Nevra> {
    let fields: Vec<&str> = line.trim().split('|').collect();
    let [name, epoch, version, release, arch] = fields.as_slice() else {
        return Err(AppError::Depsolve(format!("Unexpected repoquery line: {}", line)));
    };
    let epoch = match epoch.trim() {
        "" | "(none)" => 0,
        raw => raw
            .parse()
            .map_err(|_| AppError::Depsolve(format!("Bad epoch in: {}", line)))?,
    };
    Ok(Nevra {
        name: name.to_string(),
        epoch,
        version: version.to_string(),
        release: release.to_string(),
        arch: arch.to_string(),
    })
}
