// ABOUTME: Static pre-execution checks for sandboxed code: an import allow-list
// ABOUTME: and a RegexSet of blocked builtins, attributes, and shell commands.

use regex::{Regex, RegexSet};

use crate::error::SandboxError;

/// Modules importable without any configuration.
pub const BASE_AUTHORIZED_IMPORTS: &[&str] = &[
    "collections",
    "datetime",
    "itertools",
    "math",
    "queue",
    "random",
    "re",
    "stat",
    "statistics",
    "time",
    "unicodedata",
];

/// Bare dunder names that ordinary scripts need.
const ALLOWED_DUNDERS: &[&str] = &["__name__", "__main__", "__init__"];

/// Builtins the interpreter withholds while the matching rule is active.
const GUARDED_BUILTINS: &[(&str, &[&str])] = &[
    ("eval", &["eval", "exec", "compile"]),
    ("open", &["open"]),
    (
        "introspection",
        &["globals", "locals", "vars", "getattr", "setattr", "delattr"],
    ),
    ("interactive", &["input", "breakpoint"]),
];

/// A named rule that rejects code matching a pattern.
#[derive(Debug, Clone)]
pub struct BlockRule {
    pub id: String,
    pub pattern: String,
    pub reason: String,
}

impl BlockRule {
    fn new(id: &str, pattern: &str, reason: &str) -> Self {
        Self {
            id: id.to_string(),
            pattern: pattern.to_string(),
            reason: reason.to_string(),
        }
    }
}

/// Rules applied to Python code.
pub fn python_blocklist() -> Vec<BlockRule> {
    vec![
        BlockRule::new("dynamic_import", r"\b__import__\s*\(", "Dynamic imports are not allowed"),
        BlockRule::new(
            "eval",
            r"(?:^|[^\w.])(?:eval|exec|compile)\s*\(",
            "Dynamic code evaluation is not allowed",
        ),
        BlockRule::new("open", r"(?:^|[^\w.])open\s*\(", "Direct file access is not allowed"),
        BlockRule::new(
            "introspection",
            r"(?:^|[^\w.])(?:globals|locals|vars|getattr|setattr|delattr)\s*\(",
            "Namespace introspection is not allowed",
        ),
        BlockRule::new(
            "interactive",
            r"(?:^|[^\w.])(?:input|breakpoint)\s*\(",
            "Interactive builtins are not allowed",
        ),
        BlockRule::new("dunder", r"\.\s*__\w+__", "Access to dunder attributes is not allowed"),
        BlockRule::new(
            "os_process",
            r"\bos\s*\.\s*(?:system|popen|fork|kill|exec\w*|spawn\w*|environ|putenv|remove|unlink|rmdir)\b",
            "Process and environment primitives are not allowed",
        ),
        BlockRule::new("subprocess", r"\bsubprocess\b", "Spawning processes is not allowed"),
    ]
}

/// Rules applied to shell code.
pub fn shell_blocklist() -> Vec<BlockRule> {
    vec![
        BlockRule::new("sudo", r"(?i)\b(?:sudo|doas)\b", "Privilege escalation is not allowed"),
        BlockRule::new(
            "rm_root",
            r"rm\s+(-[^\s]*)?(\s+-[^\s]*)?\s+/($|\s|\*)",
            "Recursive deletion at root is not allowed",
        ),
        BlockRule::new("mkfs", r"(?i)\bmkfs\b", "Filesystem formatting is not allowed"),
        BlockRule::new("fork_bomb", r":\(\)\s*\{.*\}", "Fork bomb pattern detected"),
        BlockRule::new(
            "power",
            r"(?i)\b(?:shutdown|reboot|halt|poweroff)\b",
            "System power control is not allowed",
        ),
    ]
}

/// Import and attribute policy checked before any code runs.
#[derive(Debug, Clone)]
pub struct SandboxPolicy {
    authorized_imports: Option<Vec<String>>,
    rules: Vec<BlockRule>,
    patterns: RegexSet,
    import_re: Regex,
    from_re: Regex,
    dunder_re: Regex,
}

impl SandboxPolicy {
    /// Python policy: base imports plus `extra`, with the Python blocklist minus `allowed_rules`.
    pub fn python(extra: &[String], allowed_rules: &[String]) -> Result<Self, regex::Error> {
        let mut imports: Vec<String> = BASE_AUTHORIZED_IMPORTS.iter().map(|s| s.to_string()).collect();
        for module in extra {
            if !imports.contains(module) {
                imports.push(module.clone());
            }
        }
        Self::build(Some(imports), python_blocklist(), allowed_rules)
    }

    /// Shell policy: no import checks, shell blocklist minus `allowed_rules`.
    pub fn shell(allowed_rules: &[String]) -> Result<Self, regex::Error> {
        Self::build(None, shell_blocklist(), allowed_rules)
    }

    fn build(
        authorized_imports: Option<Vec<String>>,
        rules: Vec<BlockRule>,
        allowed_rules: &[String],
    ) -> Result<Self, regex::Error> {
        let rules: Vec<BlockRule> = rules
            .into_iter()
            .filter(|r| !allowed_rules.contains(&r.id))
            .collect();
        let patterns = RegexSet::new(rules.iter().map(|r| format!("(?m){}", r.pattern)))?;

        Ok(Self {
            authorized_imports,
            rules,
            patterns,
            import_re: Regex::new(r"(?m)(?:^|[;:])\s*import\s+([\w.]+(?:\s+as\s+\w+)?(?:\s*,\s*[\w.]+(?:\s+as\s+\w+)?)*)")?,
            from_re: Regex::new(r"(?m)(?:^|[;:])\s*from\s+(\.*[\w.]*)\s+import\b")?,
            dunder_re: Regex::new(r"\b__\w+__\b")?,
        })
    }

    /// The authorized import list, if this policy checks imports.
    pub fn authorized_imports(&self) -> Option<&[String]> {
        self.authorized_imports.as_deref()
    }

    /// Whether dunder names and attributes are rejected.
    pub fn blocks_dunders(&self) -> bool {
        self.rules.iter().any(|r| r.id == "dunder")
    }

    /// Builtins withheld from the interpreter under the active rules.
    pub fn blocked_builtins(&self) -> Vec<&'static str> {
        GUARDED_BUILTINS
            .iter()
            .filter(|(id, _)| self.rules.iter().any(|r| r.id == *id))
            .flat_map(|(_, names)| names.iter().copied())
            .collect()
    }

    /// Whether `module` may be imported.
    pub fn is_import_authorized(&self, module: &str) -> bool {
        let Some(authorized) = &self.authorized_imports else {
            return true;
        };
        if authorized.iter().any(|a| a == "*") {
            return true;
        }

        let parts: Vec<&str> = module.split('.').collect();
        (1..=parts.len()).any(|n| {
            let prefix = parts[..n].join(".");
            let wildcard = format!("{}.*", prefix);
            authorized.iter().any(|a| *a == prefix || *a == wildcard)
        })
    }

    /// Reject code that imports an unauthorized module or matches a blocked rule.
    pub fn check(&self, code: &str) -> Result<(), SandboxError> {
        let source = strip_comments(code);

        if self.authorized_imports.is_some() {
            for caps in self.import_re.captures_iter(&source) {
                for clause in caps[1].split(',') {
                    let module = clause.split_whitespace().next().unwrap_or("");
                    if !self.is_import_authorized(module) {
                        return Err(self.import_violation("Import of", module));
                    }
                }
            }
            for caps in self.from_re.captures_iter(&source) {
                let module = &caps[1];
                if !self.is_import_authorized(module) {
                    return Err(self.import_violation("Import from", module));
                }
            }
        }

        if let Some(index) = self.patterns.matches(&source).into_iter().next() {
            return Err(SandboxError::Violation(self.rules[index].reason.clone()));
        }

        if self.blocks_dunders()
            && self
                .dunder_re
                .find_iter(&source)
                .any(|m| !ALLOWED_DUNDERS.contains(&m.as_str()))
        {
            return Err(SandboxError::Violation(
                "Access to dunder names is not allowed".to_string(),
            ));
        }

        Ok(())
    }

    fn import_violation(&self, prefix: &str, module: &str) -> SandboxError {
        let allowed = self
            .authorized_imports
            .as_deref()
            .unwrap_or_default()
            .join(", ");
        SandboxError::Violation(format!(
            "{} {} is not allowed. Authorized imports are: [{}]",
            prefix, module, allowed
        ))
    }
}

fn strip_comments(code: &str) -> String {
    code.replace("\\\n", " ")
        .lines()
        .filter(|line| !line.trim_start().starts_with('#'))
        .collect::<Vec<_>>()
        .join("\n")
}
