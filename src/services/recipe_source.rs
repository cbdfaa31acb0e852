use crate::error::{AppError, Result};
use crate::models::Recipe;
use sha2::{Digest, Sha256};
use std::path::PathBuf;

/// Where blueprints come from.
pub trait RecipeSource: Send + Sync {
    /// The recipe named `name` on `branch`, with the id of the revision read.
    fn read_recipe_and_id(&self, branch: &str, name: &str) -> Result<(String, Recipe)>;
}

/// Blueprints stored as `<root>/<branch>/<name>.toml`. The revision id is
/// the SHA-256 of the file contents.
#[derive(Debug, Clone)]
pub struct DirectoryRecipes {
    root: PathBuf,
}

impl DirectoryRecipes {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    /// Spaces are not allowed in blueprint file names.
    pub fn recipe_filename(name: &str) -> String {
        format!("{}.toml", name.replace(' ', "-"))
    }

    fn validate_segment(segment: &str, label: &str) -> Result<()> {
        if segment.trim().is_empty()
            || segment.contains('/')
            || segment.contains('\\')
            || segment == ".."
            || segment == "."
        {
            return Err(AppError::RecipeNotFound(format!("invalid {}: {:?}", label, segment)));
        }
        Ok(())
    }
}

impl RecipeSource for DirectoryRecipes {
    fn read_recipe_and_id(&self, branch: &str, name: &str) -> Result<(String, Recipe)> {
        Self::validate_segment(branch, "branch")?;
        Self::validate_segment(name, "blueprint name")?;

        let path = self.root.join(branch).join(Self::recipe_filename(name));
        let content = match std::fs::read_to_string(&path) {
            Ok(content) => content,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(AppError::RecipeNotFound(name.to_string()));
            }
            Err(err) => return Err(err.into()),
        };
        let recipe: Recipe = toml::from_str(&content)?;

        let mut hasher = Sha256::new();
        hasher.update(content.as_bytes());
        let revision = hex::encode(hasher.finalize());

        Ok((revision, recipe))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_blueprint_by_branch_and_name() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("master")).unwrap();
        std::fs::write(
            dir.path().join("master/http-server.toml"),
            "name = \"http server\"\nversion = \"0.2.0\"\n[[packages]]\nname = \"httpd\"\n",
        )
        .unwrap();

        let recipes = DirectoryRecipes::new(dir.path().to_path_buf());
        let (revision, recipe) = recipes.read_recipe_and_id("master", "http server").unwrap();
        assert_eq!(recipe.name, "http server");
        assert_eq!(recipe.packages.len(), 1);
        assert_eq!(
            revision,
            "cf49b3e46b5b0f336f4ca9884c15e1fc9a7650951d9bee7a0bee1034e060f35f"
        );

        let (again, _) = recipes.read_recipe_and_id("master", "http server").unwrap();
        assert_eq!(revision, again);
    }

    #[test]
    fn unknown_or_escaping_names_are_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let recipes = DirectoryRecipes::new(dir.path().to_path_buf());
        assert!(matches!(
            recipes.read_recipe_and_id("master", "nope"),
            Err(AppError::RecipeNotFound(_))
        ));
        assert!(matches!(
            recipes.read_recipe_and_id("..", "nope"),
            Err(AppError::RecipeNotFound(_))
        ));
        assert!(matches!(
            recipes.read_recipe_and_id("master", "../../etc/passwd"),
            Err(AppError::RecipeNotFound(_))
        ));
    }
}
