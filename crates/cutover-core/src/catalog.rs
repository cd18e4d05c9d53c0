//! Phase catalog: the ordered, author-supplied list of migration phases.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::error::ConfigError;

/// What a phase does when executed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PhaseAction {
    /// Run an executable as a child process.
    Script {
        /// Resolved path of the executable.
        program: PathBuf,
        /// Arguments passed verbatim (no shell).
        args: Vec<String>,
    },
    /// Execute the statements of a `.sql` file.
    Sql {
        /// Resolved path of the SQL file.
        path: PathBuf,
    },
}

impl PhaseAction {
    /// The file this action references.
    pub fn path(&self) -> &Path {
        match self {
            PhaseAction::Script { program, .. } => program,
            PhaseAction::Sql { path } => path,
        }
    }

    /// Short label for plan output.
    pub fn kind(&self) -> &'static str {
        match self {
            PhaseAction::Script { .. } => "script",
            PhaseAction::Sql { .. } => "sql",
        }
    }
}

/// One unit of work in the migration catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhaseDescriptor {
    /// Stable identifier, recorded in the state file.
    pub id: String,
    /// Display name.
    pub name: String,
    /// What the phase does.
    pub description: String,
    /// Whether a failure halts the whole run.
    pub critical: bool,
    /// The unit of work.
    pub action: PhaseAction,
}

impl PhaseDescriptor {
    /// Create a critical script phase.
    pub fn script(id: impl Into<String>, name: impl Into<String>, program: impl Into<PathBuf>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: String::new(),
            critical: true,
            action: PhaseAction::Script {
                program: program.into(),
                args: Vec::new(),
            },
        }
    }

    /// Create a critical SQL phase.
    pub fn sql(id: impl Into<String>, name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: String::new(),
            critical: true,
            action: PhaseAction::Sql { path: path.into() },
        }
    }

    /// Set the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Mark the phase optional: failures are recorded and the run continues.
    pub fn optional(mut self) -> Self {
        self.critical = false;
        self
    }

    /// Set script arguments. No effect on SQL phases.
    pub fn with_args<I, S>(mut self, new_args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        if let PhaseAction::Script { args, .. } = &mut self.action {
            *args = new_args.into_iter().map(Into::into).collect();
        }
        self
    }
}

/// Ordered set of phases. Order is significant and total.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PhaseCatalog {
    phases: Vec<PhaseDescriptor>,
}

impl PhaseCatalog {
    /// Build a catalog, rejecting empty or duplicate ids.
    pub fn new(phases: Vec<PhaseDescriptor>) -> Result<Self, ConfigError> {
        let mut seen = HashSet::new();
        for phase in &phases {
            if phase.id.trim().is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "phase {:?} has an empty id",
                    phase.name
                )));
            }
            if !seen.insert(phase.id.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate phase id {:?}",
                    phase.id
                )));
            }
        }
        Ok(Self { phases })
    }

    /// Phases in execution order.
    pub fn phases(&self) -> &[PhaseDescriptor] {
        &self.phases
    }

    /// Look up a phase by id.
    pub fn get(&self, id: &str) -> Option<&PhaseDescriptor> {
        self.phases.iter().find(|p| p.id == id)
    }

    pub fn len(&self) -> usize {
        self.phases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.phases.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, PhaseDescriptor> {
        self.phases.iter()
    }
}

impl<'a> IntoIterator for &'a PhaseCatalog {
    type Item = &'a PhaseDescriptor;
    type IntoIter = std::slice::Iter<'a, PhaseDescriptor>;

    fn into_iter(self) -> Self::IntoIter {
        self.phases.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duplicate_ids_rejected() {
        let result = PhaseCatalog::new(vec![
            PhaseDescriptor::script("backup", "Backup", "backup.sh"),
            PhaseDescriptor::sql("backup", "Backup again", "001.sql"),
        ]);
        assert!(matches!(result, Err(ConfigError::Invalid(msg)) if msg.contains("duplicate")));
    }

    #[test]
    fn test_order_preserved() {
        let catalog = PhaseCatalog::new(vec![
            PhaseDescriptor::script("backup", "Backup", "backup.sh"),
            PhaseDescriptor::sql("schema", "Schema", "001.sql"),
            PhaseDescriptor::script("reindex", "Reindex", "reindex.sh").optional(),
        ])
        .unwrap();

        let ids: Vec<_> = catalog.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["backup", "schema", "reindex"]);
        assert!(!catalog.get("reindex").unwrap().critical);
        assert!(catalog.get("schema").unwrap().critical);
    }

    #[test]
    fn test_with_args_only_applies_to_scripts() {
        let script = PhaseDescriptor::script("s", "S", "run.sh").with_args(["--all"]);
        assert_eq!(
            script.action,
            PhaseAction::Script {
                program: PathBuf::from("run.sh"),
                args: vec!["--all".to_string()],
            }
        );

        let sql = PhaseDescriptor::sql("q", "Q", "q.sql").with_args(["--all"]);
        assert_eq!(sql.action, PhaseAction::Sql { path: PathBuf::from("q.sql") });
    }
}
