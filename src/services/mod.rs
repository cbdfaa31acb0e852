pub mod compose_service;
pub mod depsolve;
pub mod queue_monitor;
pub mod recipe_source;
pub mod reconcile;

pub use compose_service::{ComposeService, StartBuild, UploadRequest};
pub use depsolve::{Depsolver, RepoqueryDepsolver};
pub use queue_monitor::{MonitorStep, QueueMonitor};
pub use recipe_source::{DirectoryRecipes, RecipeSource};
pub use reconcile::check_queues;
