//! Change-set classification
//!
//! Decides how much work an update needs from the list of paths that changed
//! between two revisions. Pure: no I/O, no git.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use glob::Pattern;
use serde::{Deserialize, Serialize};

use crate::errors::UpdateError;
use crate::storage::settings::RuleSettings;

/// Paths modified between the deployed revision and the target revision
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeSet {
    Known(BTreeSet<PathBuf>),
    /// No prior revision, or the diff could not be computed
    Unknown,
}

impl ChangeSet {
    pub fn empty() -> Self {
        ChangeSet::Known(BTreeSet::new())
    }

    pub fn from_paths<I, P>(paths: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        ChangeSet::Known(paths.into_iter().map(Into::into).collect())
    }

    pub fn paths(&self) -> Option<&BTreeSet<PathBuf>> {
        match self {
            ChangeSet::Known(paths) => Some(paths),
            ChangeSet::Unknown => None,
        }
    }
}

/// Kind of file a changed path is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeCategory {
    BuildDefinition,
    ApplicationSource,
    StaticAsset,
    Configuration,
    Documentation,
    /// Host-side scripts that never end up in the image
    Tooling,
}

impl ChangeCategory {
    /// Strategy required when a path of this category changes
    pub fn strategy(&self) -> UpdateStrategy {
        match self {
            ChangeCategory::BuildDefinition
            | ChangeCategory::ApplicationSource
            | ChangeCategory::StaticAsset => UpdateStrategy::Rebuild,
            ChangeCategory::Configuration => UpdateStrategy::RestartOnly,
            ChangeCategory::Documentation | ChangeCategory::Tooling => UpdateStrategy::NoOp,
        }
    }
}

/// How the service is brought to the new revision.
///
/// Ordered by cost so the strategy of a change set is the maximum over its
/// paths.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateStrategy {
    NoOp,
    RestartOnly,
    Rebuild,
}

impl std::fmt::Display for UpdateStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            UpdateStrategy::NoOp => "no-op",
            UpdateStrategy::RestartOnly => "restart-only",
            UpdateStrategy::Rebuild => "rebuild",
        };
        f.write_str(name)
    }
}

/// One row of the rule table
#[derive(Debug, Clone)]
pub struct Rule {
    pattern: Pattern,
    match_file_name: bool,
    category: ChangeCategory,
}

impl Rule {
    /// Build a rule. Patterns without a `/` match the file name anywhere in
    /// the tree, like `.gitignore` entries; others match the whole path.
    pub fn new(pattern: &str, category: ChangeCategory) -> Result<Self, UpdateError> {
        let compiled = Pattern::new(pattern).map_err(|e| {
            UpdateError::ConfigError(format!("Invalid classification pattern {}: {}", pattern, e))
        })?;
        Ok(Self {
            pattern: compiled,
            match_file_name: !pattern.contains('/'),
            category,
        })
    }

    pub fn category(&self) -> ChangeCategory {
        self.category
    }

    pub fn matches(&self, path: &Path) -> bool {
        let normalized = path.to_string_lossy().replace('\\', "/");
        if self.match_file_name {
            let name = normalized.rsplit('/').next().unwrap_or(&normalized);
            self.pattern.matches(name)
        } else {
            self.pattern.matches(&normalized)
        }
    }
}

const BUILTIN_RULES: &[(&str, ChangeCategory)] = &[
    // Documentation trees, whatever the file type
    ("docs/*", ChangeCategory::Documentation),
    ("doc/*", ChangeCategory::Documentation),
    // Image and dependency definitions
    ("Dockerfile", ChangeCategory::BuildDefinition),
    ("Dockerfile.*", ChangeCategory::BuildDefinition),
    ("*.dockerfile", ChangeCategory::BuildDefinition),
    (".dockerignore", ChangeCategory::BuildDefinition),
    ("docker-compose*.yml", ChangeCategory::BuildDefinition),
    ("docker-compose*.yaml", ChangeCategory::BuildDefinition),
    ("compose.yml", ChangeCategory::BuildDefinition),
    ("compose.yaml", ChangeCategory::BuildDefinition),
    ("requirements*.txt", ChangeCategory::BuildDefinition),
    ("pyproject.toml", ChangeCategory::BuildDefinition),
    ("poetry.lock", ChangeCategory::BuildDefinition),
    ("setup.py", ChangeCategory::BuildDefinition),
    ("setup.cfg", ChangeCategory::BuildDefinition),
    ("Pipfile", ChangeCategory::BuildDefinition),
    ("Pipfile.lock", ChangeCategory::BuildDefinition),
    ("package.json", ChangeCategory::BuildDefinition),
    ("package-lock.json", ChangeCategory::BuildDefinition),
    ("Cargo.toml", ChangeCategory::BuildDefinition),
    ("Cargo.lock", ChangeCategory::BuildDefinition),
    // Assets baked into the image
    ("static/*", ChangeCategory::StaticAsset),
    ("templates/*", ChangeCategory::StaticAsset),
    ("public/*", ChangeCategory::StaticAsset),
    ("assets/*", ChangeCategory::StaticAsset),
    ("*.html", ChangeCategory::StaticAsset),
    ("*.css", ChangeCategory::StaticAsset),
    ("*.svg", ChangeCategory::StaticAsset),
    ("*.png", ChangeCategory::StaticAsset),
    ("*.jpg", ChangeCategory::StaticAsset),
    ("*.ico", ChangeCategory::StaticAsset),
    ("*.woff2", ChangeCategory::StaticAsset),
    // Source
    ("src/*", ChangeCategory::ApplicationSource),
    ("*.py", ChangeCategory::ApplicationSource),
    ("*.rs", ChangeCategory::ApplicationSource),
    ("*.js", ChangeCategory::ApplicationSource),
    ("*.ts", ChangeCategory::ApplicationSource),
    ("*.go", ChangeCategory::ApplicationSource),
    // Runtime configuration
    ("nginx/*", ChangeCategory::Configuration),
    ("config/*", ChangeCategory::Configuration),
    (".env", ChangeCategory::Configuration),
    (".env.*", ChangeCategory::Configuration),
    ("*.env", ChangeCategory::Configuration),
    ("*.conf", ChangeCategory::Configuration),
    ("*.ini", ChangeCategory::Configuration),
    ("*.cfg", ChangeCategory::Configuration),
    ("*.service", ChangeCategory::Configuration),
    ("*.yml", ChangeCategory::Configuration),
    ("*.yaml", ChangeCategory::Configuration),
    ("*.toml", ChangeCategory::Configuration),
    ("*.json", ChangeCategory::Configuration),
    // Documentation
    ("*.md", ChangeCategory::Documentation),
    ("*.rst", ChangeCategory::Documentation),
    ("*.adoc", ChangeCategory::Documentation),
    ("*.txt", ChangeCategory::Documentation),
    ("*.pdf", ChangeCategory::Documentation),
    ("LICENSE*", ChangeCategory::Documentation),
    ("CHANGELOG*", ChangeCategory::Documentation),
    // Operator scripts
    ("*.sh", ChangeCategory::Tooling),
    ("*.bat", ChangeCategory::Tooling),
    ("*.cmd", ChangeCategory::Tooling),
    ("*.ps1", ChangeCategory::Tooling),
];

static BUILTIN: LazyLock<Vec<Rule>> = LazyLock::new(|| {
    BUILTIN_RULES
        .iter()
        // patterns above are literals checked by test_builtin_rules_compile
        .map(|(pattern, category)| Rule::new(pattern, *category).expect("valid built-in pattern"))
        .collect()
});

/// Ordered rule table; the first matching rule decides a path's category
#[derive(Debug, Clone)]
pub struct RuleTable {
    rules: Vec<Rule>,
}

impl RuleTable {
    /// The built-in table
    pub fn builtin() -> Self {
        Self {
            rules: BUILTIN.clone(),
        }
    }

    /// The built-in table with `extra` rules checked first
    pub fn with_extra(extra: &[RuleSettings]) -> Result<Self, UpdateError> {
        let mut rules = extra
            .iter()
            .map(|r| Rule::new(&r.pattern, r.category))
            .collect::<Result<Vec<_>, _>>()?;
        rules.extend(BUILTIN.iter().cloned());
        Ok(Self { rules })
    }

    /// Category of a single path, `None` when no rule matches
    pub fn category_of(&self, path: &Path) -> Option<ChangeCategory> {
        self.rules
            .iter()
            .find(|rule| rule.matches(path))
            .map(Rule::category)
    }

    /// Classify a whole change set
    pub fn classify(&self, change_set: &ChangeSet) -> Classification {
        let paths = match change_set {
            ChangeSet::Unknown => {
                return Classification {
                    strategy: UpdateStrategy::Rebuild,
                    by_category: BTreeMap::new(),
                    unmatched: Vec::new(),
                    unknown: true,
                }
            }
            ChangeSet::Known(paths) => paths,
        };

        let mut by_category: BTreeMap<ChangeCategory, Vec<PathBuf>> = BTreeMap::new();
        let mut unmatched = Vec::new();
        for path in paths {
            match self.category_of(path) {
                Some(category) => by_category.entry(category).or_default().push(path.clone()),
                None => unmatched.push(path.clone()),
            }
        }

        // Unrecognised files may well end up in the image.
        let unmatched_strategy = (!unmatched.is_empty()).then_some(UpdateStrategy::Rebuild);
        let strategy = by_category
            .keys()
            .map(ChangeCategory::strategy)
            .chain(unmatched_strategy)
            .max()
            .unwrap_or(UpdateStrategy::NoOp);

        Classification {
            strategy,
            by_category,
            unmatched,
            unknown: false,
        }
    }
}

impl Default for RuleTable {
    fn default() -> Self {
        Self::builtin()
    }
}

/// Result of classifying a change set
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Classification {
    pub strategy: UpdateStrategy,
    pub by_category: BTreeMap<ChangeCategory, Vec<PathBuf>>,
    pub unmatched: Vec<PathBuf>,
    /// The change set could not be determined
    pub unknown: bool,
}

/// Classify with the built-in rule table
pub fn classify(change_set: &ChangeSet) -> UpdateStrategy {
    RuleTable::builtin().classify(change_set).strategy
}
