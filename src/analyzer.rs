use crate::policy::SandboxPolicy;
use rustpython_ast::Visitor;
use rustpython_parser::{ast, Parse};
use serde::Serialize;
use tracing::debug;

/// Which rule a violation broke
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ViolationKind {
    Syntax,
    Import,
    BuiltinCall,
    Attribute,
}

/// One policy break, located by 1-based source line
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct PolicyViolation {
    pub line: usize,
    pub kind: ViolationKind,
    pub message: String,
}

/// Outcome of static validation. Accepted iff there are no violations.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Validation {
    pub violations: Vec<PolicyViolation>,
}

impl Validation {
    pub fn is_accepted(&self) -> bool {
        self.violations.is_empty()
    }

    /// Violation messages in the order they were found
    pub fn errors(&self) -> Vec<String> {
        self.violations.iter().map(|v| v.message.clone()).collect()
    }
}

/// Analyzes Python source against the sandbox policy.
///
/// A source that fails to parse yields exactly one syntax violation and no
/// further checks. Otherwise every import, direct builtin call and attribute
/// access in the tree is checked, and all violations are reported together.
///
/// Only calls that name a blocked builtin directly are caught; rebinding it
/// first (`f = eval; f("1")`) is not.
pub fn analyze_code(source: &str, policy: &SandboxPolicy) -> Validation {
    let lines = LineIndex::new(source);

    let suite = match ast::Suite::parse(source, "<submission>") {
        Ok(suite) => suite,
        Err(e) => {
            let line = lines.line_of(usize::from(e.offset));
            debug!("[VALIDATOR] Parse failure at line {}: {}", line, e.error);
            return Validation {
                violations: vec![PolicyViolation {
                    line,
                    kind: ViolationKind::Syntax,
                    message: format!("Syntax error: {} (line {})", e.error, line),
                }],
            };
        }
    };

    let mut walker = PolicyWalker {
        policy,
        lines,
        violations: Vec::new(),
    };
    for stmt in suite {
        walker.visit_stmt(stmt);
    }

    if !walker.violations.is_empty() {
        debug!(
            "[VALIDATOR] Rejected submission with {} violation(s)",
            walker.violations.len()
        );
    }
    Validation {
        violations: walker.violations,
    }
}

/// Byte offset to line number lookup
struct LineIndex {
    starts: Vec<usize>,
}

impl LineIndex {
    fn new(source: &str) -> Self {
        let starts = std::iter::once(0)
            .chain(source.match_indices('\n').map(|(i, _)| i + 1))
            .collect();
        Self { starts }
    }

    fn line_of(&self, offset: usize) -> usize {
        match self.starts.binary_search(&offset) {
            Ok(i) => i + 1,
            Err(i) => i,
        }
    }
}

struct PolicyWalker<'a> {
    policy: &'a SandboxPolicy,
    lines: LineIndex,
    violations: Vec<PolicyViolation>,
}

impl PolicyWalker<'_> {
    fn check_module(&mut self, module: &str, line: usize) {
        if self.policy.is_module_allowed(module) {
            return;
        }
        self.violations.push(PolicyViolation {
            line,
            kind: ViolationKind::Import,
            message: format!(
                "Line {}: import of '{}' is not allowed. Allowed modules: {}",
                line,
                module,
                self.policy.allowed_modules_listing()
            ),
        });
    }
}

impl Visitor for PolicyWalker<'_> {
    fn visit_stmt_import(&mut self, node: ast::StmtImport) {
        let line = self.lines.line_of(usize::from(node.range.start()));
        for alias in &node.names {
            self.check_module(alias.name.as_str(), line);
        }
        self.generic_visit_stmt_import(node);
    }

    fn visit_stmt_import_from(&mut self, node: ast::StmtImportFrom) {
        // `from . import x` has no module to check
        if let Some(module) = &node.module {
            let line = self.lines.line_of(usize::from(node.range.start()));
            self.check_module(module.as_str(), line);
        }
        self.generic_visit_stmt_import_from(node);
    }

    fn visit_expr_call(&mut self, node: ast::ExprCall) {
        if let ast::Expr::Name(name) = node.func.as_ref() {
            if self.policy.is_builtin_blocked(name.id.as_str()) {
                let line = self.lines.line_of(usize::from(node.range.start()));
                self.violations.push(PolicyViolation {
                    line,
                    kind: ViolationKind::BuiltinCall,
                    message: format!("Line {}: call to '{}()' is not allowed.", line, name.id),
                });
            }
        }
        self.generic_visit_expr_call(node);
    }

    // The upstream defaults for the node kinds below do not descend, so each
    // one walks its children explicitly.

    fn visit_keyword(&mut self, node: ast::Keyword) {
        self.visit_expr(node.value);
    }

    fn visit_comprehension(&mut self, node: ast::Comprehension) {
        self.visit_expr(node.target);
        self.visit_expr(node.iter);
        for cond in node.ifs {
            self.visit_expr(cond);
        }
    }

    fn visit_arguments(&mut self, node: ast::Arguments) {
        let with_defaults = node
            .posonlyargs
            .into_iter()
            .chain(node.args)
            .chain(node.kwonlyargs);
        for arg in with_defaults {
            self.visit_arg(arg.def);
            if let Some(default) = arg.default {
                self.visit_expr(*default);
            }
        }
        if let Some(arg) = node.vararg {
            self.visit_arg(*arg);
        }
        if let Some(arg) = node.kwarg {
            self.visit_arg(*arg);
        }
    }

    fn visit_arg(&mut self, node: ast::Arg) {
        if let Some(annotation) = node.annotation {
            self.visit_expr(*annotation);
        }
    }

    fn visit_withitem(&mut self, node: ast::WithItem) {
        self.visit_expr(node.context_expr);
        if let Some(vars) = node.optional_vars {
            self.visit_expr(*vars);
        }
    }

    fn visit_match_case(&mut self, node: ast::MatchCase) {
        self.visit_pattern(node.pattern);
        if let Some(guard) = node.guard {
            self.visit_expr(*guard);
        }
        for stmt in node.body {
            self.visit_stmt(stmt);
        }
    }

    fn visit_expr_attribute(&mut self, node: ast::ExprAttribute) {
        if self.policy.is_attribute_blocked(node.attr.as_str()) {
            let line = self.lines.line_of(usize::from(node.range.start()));
            self.violations.push(PolicyViolation {
                line,
                kind: ViolationKind::Attribute,
                message: format!("Line {}: access to '{}' is not allowed.", line, node.attr),
            });
        }
        self.generic_visit_expr_attribute(node);
    }
}
