//! Static sandbox policy
//!
//! The policy is the first of the two defense layers: a set of tables the
//! validator checks every submission against before any process is spawned.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │  Import policy                                               │
//! │  - allow-list, exact module name or top-level package        │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Builtin-call policy                                         │
//! │  - deny-list of directly called builtins                     │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Attribute policy                                            │
//! │  - deny-list of introspection / escape-hatch attributes      │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! A policy is built once at startup and only ever read afterwards.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

// ============================================================================
// DEFAULT TABLES
// ============================================================================

/// Modules a submission may import.
///
/// Some entries are conventional aliases (`np`, `pd`, `sns`, `yf`) rather
/// than importable packages; they are kept so that the table matches what
/// analysis prompts are written against.
const DATA_ANALYSIS_MODULES: &[&str] = &[
    // Math & science
    "math",
    "cmath",
    "decimal",
    "fractions",
    "statistics",
    "random",
    // Data
    "numpy",
    "np",
    "pandas",
    "pd",
    // Plotting
    "matplotlib",
    "matplotlib.pyplot",
    "matplotlib.figure",
    "matplotlib.dates",
    "mpl_toolkits",
    "mpl_toolkits.mplot3d",
    "seaborn",
    "sns",
    // Finance
    "yfinance",
    "yf",
    // Scientific computing / ML
    "scipy",
    "scipy.stats",
    "scipy.optimize",
    "scipy.interpolate",
    "scipy.signal",
    "scipy.linalg",
    "scipy.integrate",
    "sklearn",
    "sklearn.linear_model",
    "sklearn.cluster",
    "sklearn.preprocessing",
    "sklearn.model_selection",
    "sklearn.metrics",
    "sklearn.ensemble",
    "sklearn.tree",
    "sklearn.neighbors",
    "sklearn.svm",
    "sklearn.decomposition",
    "sklearn.pipeline",
    // HTTP (market data libraries depend on it)
    "requests",
    // Standard library
    "datetime",
    "json",
    "csv",
    "collections",
    "itertools",
    "functools",
    "re",
    "string",
    "textwrap",
    "operator",
    "copy",
    "pprint",
    "typing",
    "dataclasses",
    "enum",
    "abc",
    "io",
    "base64",
    "hashlib",
    "hmac",
    "time",
    "calendar",
];

/// Builtins that must never be called directly: dynamic code execution,
/// namespace introspection, dynamic attribute access, file and stdin access,
/// debugger entry and interpreter exit.
const BLOCKED_BUILTINS: &[&str] = &[
    "exec",
    "eval",
    "compile",
    "__import__",
    "globals",
    "locals",
    "getattr",
    "setattr",
    "delattr",
    "vars",
    "open",
    "input",
    "breakpoint",
    "exit",
    "quit",
];

/// Attributes used to walk class hierarchies or reach globals, code objects,
/// builtins and module-loader internals.
const BLOCKED_ATTRIBUTES: &[&str] = &[
    "__subclasses__",
    "__bases__",
    "__mro__",
    "__class__",
    "__globals__",
    "__code__",
    "__builtins__",
    "__import__",
    "__loader__",
    "__spec__",
];

fn to_set(items: &[&str]) -> BTreeSet<String> {
    items.iter().map(|s| s.to_string()).collect()
}

// ============================================================================
// SANDBOX POLICY
// ============================================================================

/// Allow/deny tables consulted by the validator
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SandboxPolicy {
    /// Human-readable name for this policy
    pub name: String,
    /// Importable modules (exact name or top-level package)
    pub allowed_modules: BTreeSet<String>,
    /// Builtins that may not be called by name
    pub blocked_builtins: BTreeSet<String>,
    /// Attribute names that may not be accessed on any object
    pub blocked_attributes: BTreeSet<String>,
}

impl Default for SandboxPolicy {
    fn default() -> Self {
        Self::data_analysis()
    }
}

impl SandboxPolicy {
    /// Data analysis template: numeric, tabular, plotting and market-data
    /// libraries plus a small standard-library subset.
    pub fn data_analysis() -> Self {
        Self {
            name: "Data Analysis".to_string(),
            allowed_modules: to_set(DATA_ANALYSIS_MODULES),
            blocked_builtins: to_set(BLOCKED_BUILTINS),
            blocked_attributes: to_set(BLOCKED_ATTRIBUTES),
        }
    }

    /// Check if an import target is covered by the allow-list.
    ///
    /// `scipy.stats` passes when either `scipy.stats` or `scipy` is listed.
    pub fn is_module_allowed(&self, module: &str) -> bool {
        let root_module = module.split('.').next().unwrap_or(module);
        self.allowed_modules.contains(module) || self.allowed_modules.contains(root_module)
    }

    pub fn is_builtin_blocked(&self, name: &str) -> bool {
        self.blocked_builtins.contains(name)
    }

    pub fn is_attribute_blocked(&self, attr: &str) -> bool {
        self.blocked_attributes.contains(attr)
    }

    /// Allowed modules in sorted order, comma separated
    pub fn allowed_modules_listing(&self) -> String {
        self.allowed_modules
            .iter()
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Create a custom policy starting from a template
    pub fn custom(base: Self) -> SandboxPolicyBuilder {
        SandboxPolicyBuilder { policy: base }
    }
}

/// Builder for creating custom policies
pub struct SandboxPolicyBuilder {
    policy: SandboxPolicy,
}

impl SandboxPolicyBuilder {
    pub fn name(mut self, name: &str) -> Self {
        self.policy.name = name.to_string();
        self
    }

    pub fn allow_module(mut self, module: &str) -> Self {
        self.policy.allowed_modules.insert(module.to_string());
        self
    }

    pub fn disallow_module(mut self, module: &str) -> Self {
        self.policy.allowed_modules.remove(module);
        self
    }

    pub fn block_builtin(mut self, name: &str) -> Self {
        self.policy.blocked_builtins.insert(name.to_string());
        self
    }

    pub fn block_attribute(mut self, attr: &str) -> Self {
        self.policy.blocked_attributes.insert(attr.to_string());
        self
    }

    pub fn build(self) -> SandboxPolicy {
        self.policy
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_module_prefix_matching() {
        let policy = SandboxPolicy::data_analysis();
        assert!(policy.is_module_allowed("numpy"));
        assert!(policy.is_module_allowed("scipy.stats"));
        // Not listed, but its top-level package is
        assert!(policy.is_module_allowed("scipy.spatial"));
        assert!(policy.is_module_allowed("matplotlib.colors"));
        assert!(!policy.is_module_allowed("os"));
        assert!(!policy.is_module_allowed("os.path"));
        assert!(!policy.is_module_allowed("http.server"));
    }

    #[test]
    fn test_default_deny_lists() {
        let policy = SandboxPolicy::default();
        for name in ["exec", "eval", "open", "__import__", "breakpoint", "quit"] {
            assert!(policy.is_builtin_blocked(name), "{name} should be blocked");
        }
        assert!(!policy.is_builtin_blocked("print"));
        assert!(policy.is_attribute_blocked("__subclasses__"));
        assert!(policy.is_attribute_blocked("__globals__"));
        assert!(!policy.is_attribute_blocked("__name__"));
    }

    #[test]
    fn test_listing_is_sorted() {
        let policy = SandboxPolicy::custom(SandboxPolicy::data_analysis())
            .name("tiny")
            .build();
        let listing = policy.allowed_modules_listing();
        let names: Vec<&str> = listing.split(", ").collect();
        let mut sorted = names.clone();
        sorted.sort();
        assert_eq!(names, sorted);
        assert_eq!(policy.name, "tiny");
    }

    #[test]
    fn test_policy_builder() {
        let policy = SandboxPolicy::custom(SandboxPolicy::data_analysis())
            .allow_module("sympy")
            .disallow_module("requests")
            .block_builtin("print")
            .block_attribute("__dict__")
            .build();

        assert!(policy.is_module_allowed("sympy.abc"));
        assert!(!policy.is_module_allowed("requests"));
        assert!(policy.is_builtin_blocked("print"));
        assert!(policy.is_attribute_blocked("__dict__"));
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let policy: SandboxPolicy =
            serde_json::from_str(r#"{"allowed_modules": ["math"]}"#).unwrap();
        assert!(policy.is_module_allowed("math"));
        assert!(!policy.is_module_allowed("numpy"));
        assert!(policy.is_builtin_blocked("eval"));
    }
}
