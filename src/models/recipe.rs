use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// A blueprint: the package selection a build is made from.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Recipe {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub modules: Vec<RecipePackage>,
    #[serde(default)]
    pub packages: Vec<RecipePackage>,
    #[serde(default)]
    pub groups: Vec<RecipeGroup>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RecipePackage {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RecipeGroup {
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Nevra {
    pub name: String,
    pub epoch: u32,
    pub version: String,
    pub release: String,
    pub arch: String,
}

impl Nevra {
    /// `[epoch:]version-release.arch`, the form pinned into frozen recipes.
    pub fn evra(&self) -> String {
        if self.epoch == 0 {
            format!("{}-{}.{}", self.version, self.release, self.arch)
        } else {
            format!("{}:{}-{}.{}", self.epoch, self.version, self.release, self.arch)
        }
    }
}

impl fmt::Display for Nevra {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.name, self.evra())
    }
}

/// On-disk shape of `deps.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DependencySnapshot {
    #[serde(default)]
    pub packages: Vec<Nevra>,
}

impl Recipe {
    /// Modules and packages merged, deduplicated and sorted case-insensitively.
    pub fn projects(&self) -> Vec<RecipePackage> {
        let mut projects: Vec<RecipePackage> = Vec::new();
        for project in self.modules.iter().chain(self.packages.iter()) {
            if !projects.contains(project) {
                projects.push(project.clone());
            }
        }
        projects.sort_by_key(|p| p.name.to_lowercase());
        projects
    }

    /// Copy of the recipe with every module and package pinned to its
    /// depsolved version. Entries missing from `deps` keep their version.
    pub fn freeze(&self, deps: &[Nevra]) -> Recipe {
        let by_name: HashMap<&str, &Nevra> =
            deps.iter().map(|dep| (dep.name.as_str(), dep)).collect();
        let pin = |list: &[RecipePackage]| -> Vec<RecipePackage> {
            list.iter()
                .map(|pkg| RecipePackage {
                    name: pkg.name.clone(),
                    version: by_name
                        .get(pkg.name.as_str())
                        .map(|dep| dep.evra())
                        .or_else(|| pkg.version.clone()),
                })
                .collect()
        };

        Recipe {
            name: self.name.clone(),
            description: self.description.clone(),
            version: self.version.clone(),
            modules: pin(&self.modules),
            packages: pin(&self.packages),
            groups: self.groups.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nevra(name: &str, epoch: u32) -> Nevra {
        Nevra {
            name: name.to_string(),
            epoch,
            version: "1.2".to_string(),
            release: "3.fc30".to_string(),
            arch: "x86_64".to_string(),
        }
    }

    fn package(name: &str, version: Option<&str>) -> RecipePackage {
        RecipePackage {
            name: name.to_string(),
            version: version.map(str::to_string),
        }
    }

    #[test]
    fn freeze_pins_resolved_versions() {
        let recipe = Recipe {
            name: "demo".to_string(),
            description: String::new(),
            version: "0.0.1".to_string(),
            modules: vec![package("httpd", Some("2.*"))],
            packages: vec![package("tmux", Some("*")), package("missing", Some("1.0"))],
            groups: Vec::new(),
        };

        let frozen = recipe.freeze(&[nevra("httpd", 0), nevra("tmux", 2)]);

        assert_eq!(frozen.modules[0].version.as_deref(), Some("1.2-3.fc30.x86_64"));
        assert_eq!(frozen.packages[0].version.as_deref(), Some("2:1.2-3.fc30.x86_64"));
        assert_eq!(frozen.packages[1].version.as_deref(), Some("1.0"));
    }

    #[test]
    fn projects_are_merged_and_sorted_ignoring_case() {
        let recipe: Recipe = toml::from_str(
            r#"
            name = "demo"
            [[modules]]
            name = "Zsh"
            [[packages]]
            name = "bash"
            [[packages]]
            name = "Zsh"
            "#,
        )
        .unwrap();

        let names: Vec<_> = recipe.projects().into_iter().map(|p| p.name).collect();
        assert_eq!(names, vec!["bash", "Zsh"]);
    }
}
