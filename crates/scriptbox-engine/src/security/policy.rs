//! Security policy: allow/deny lists for everything a module references

use serde::{Deserialize, Serialize};

/// What a list does with names no entry matches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleBehaviour {
    /// Unlisted names are allowed
    #[default]
    Allow,
    /// Unlisted names are denied
    Deny,
}

/// Outcome of checking one name against a list
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuleDecision {
    /// Allowed by an explicit entry
    Allowed(String),
    /// Denied by an explicit entry
    Denied(String),
    /// No entry matched; the default applied
    Default(RuleBehaviour),
}

impl RuleDecision {
    /// Whether the name may be used
    pub fn is_allowed(&self) -> bool {
        matches!(
            self,
            RuleDecision::Allowed(_) | RuleDecision::Default(RuleBehaviour::Allow)
        )
    }

    /// Rule text for reports
    pub fn rule(&self) -> String {
        match self {
            RuleDecision::Allowed(p) => format!("allow '{}'", p),
            RuleDecision::Denied(p) => format!("deny '{}'", p),
            RuleDecision::Default(RuleBehaviour::Allow) => "default allow".to_string(),
            RuleDecision::Default(RuleBehaviour::Deny) => "default deny".to_string(),
        }
    }
}

/// One allow/deny list
///
/// Deny entries take precedence over allow entries; names matching neither
/// fall back to `default_behaviour`. Entries are `glob` patterns unless
/// `use_regex` is set.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RestrictionList {
    /// Behaviour for names no entry matches
    pub default_behaviour: RuleBehaviour,
    /// Treat entries as regular expressions
    pub use_regex: bool,
    /// Allowed patterns
    pub allow: Vec<String>,
    /// Denied patterns
    pub deny: Vec<String>,
}

impl RestrictionList {
    /// Empty list that allows everything
    pub fn allow_by_default() -> Self {
        Self::default()
    }

    /// Empty list that denies everything
    pub fn deny_by_default() -> Self {
        Self {
            default_behaviour: RuleBehaviour::Deny,
            ..Self::default()
        }
    }

    /// Add an allow pattern
    pub fn with_allow(mut self, pattern: impl Into<String>) -> Self {
        self.allow.push(pattern.into());
        self
    }

    /// Add a deny pattern
    pub fn with_deny(mut self, pattern: impl Into<String>) -> Self {
        self.deny.push(pattern.into());
        self
    }

    /// Check a name against the list
    ///
    /// Compiles every pattern; use [`compile`](Self::compile) to check many
    /// names.
    pub fn evaluate(&self, name: &str) -> RuleDecision {
        self.compile().evaluate(name)
    }

    /// Patterns that fail to compile
    pub fn invalid_patterns(&self) -> Vec<String> {
        self.compile().invalid
    }

    /// Compile every pattern once
    pub fn compile(&self) -> CompiledList {
        let mut invalid = Vec::new();
        let mut compile_all = |patterns: &[String]| -> Vec<(String, Matcher)> {
            patterns
                .iter()
                .filter_map(|p| match Matcher::new(p, self.use_regex) {
                    Some(m) => Some((p.clone(), m)),
                    None => {
                        invalid.push(p.clone());
                        None
                    }
                })
                .collect()
        };
        let allow = compile_all(&self.allow);
        let deny = compile_all(&self.deny);
        CompiledList {
            default_behaviour: self.default_behaviour,
            allow,
            deny,
            invalid,
        }
    }
}

#[derive(Debug, Clone)]
enum Matcher {
    Glob(glob::Pattern),
    Regex(regex::Regex),
}

impl Matcher {
    fn new(pattern: &str, use_regex: bool) -> Option<Self> {
        if use_regex {
            regex::Regex::new(pattern).ok().map(Matcher::Regex)
        } else {
            glob::Pattern::new(pattern).ok().map(Matcher::Glob)
        }
    }

    fn is_match(&self, name: &str) -> bool {
        match self {
            Matcher::Glob(p) => p.matches(name),
            Matcher::Regex(re) => re.is_match(name),
        }
    }
}

/// A [`RestrictionList`] with its patterns compiled
///
/// Invalid patterns are dropped and never match.
#[derive(Debug, Clone)]
pub struct CompiledList {
    default_behaviour: RuleBehaviour,
    allow: Vec<(String, Matcher)>,
    deny: Vec<(String, Matcher)>,
    invalid: Vec<String>,
}

impl CompiledList {
    /// Check a name; deny entries win over allow entries
    pub fn evaluate(&self, name: &str) -> RuleDecision {
        if let Some((p, _)) = self.deny.iter().find(|(_, m)| m.is_match(name)) {
            return RuleDecision::Denied(p.clone());
        }
        if let Some((p, _)) = self.allow.iter().find(|(_, m)| m.is_match(name)) {
            return RuleDecision::Allowed(p.clone());
        }
        RuleDecision::Default(self.default_behaviour)
    }

    /// Patterns dropped because they failed to compile
    pub fn invalid_patterns(&self) -> &[String] {
        &self.invalid
    }
}

/// Restrictions applied by the security gate
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityPolicy {
    /// Libraries imports may come from
    pub libraries: RestrictionList,
    /// Namespaces of imported types
    pub namespaces: RestrictionList,
    /// Fully qualified imported or inherited types
    pub types: RestrictionList,
    /// Fully qualified imported members (`Namespace.Type.member`)
    pub members: RestrictionList,
    /// Master switch for unsafe interop
    pub allow_unsafe_interop: bool,
}

impl SecurityPolicy {
    /// Policy that allows everything, including unsafe interop
    pub fn permissive() -> Self {
        Self {
            allow_unsafe_interop: true,
            ..Self::default()
        }
    }

    /// SHA-256 of the policy's JSON form, hex-encoded
    ///
    /// Reports cached on a module stay valid while this hash is unchanged.
    pub fn hash(&self) -> String {
        use sha2::{Digest, Sha256};

        let json = serde_json::to_vec(self).unwrap_or_default();
        hex::encode(Sha256::digest(&json))
    }

    /// Every pattern in the policy that fails to compile
    pub fn invalid_patterns(&self) -> Vec<String> {
        self.compile().invalid_patterns()
    }

    /// Compile every list once for checking a whole module
    pub fn compile(&self) -> CompiledPolicy {
        CompiledPolicy {
            hash: self.hash(),
            libraries: self.libraries.compile(),
            namespaces: self.namespaces.compile(),
            types: self.types.compile(),
            members: self.members.compile(),
            allow_unsafe_interop: self.allow_unsafe_interop,
        }
    }
}

/// A [`SecurityPolicy`] with every pattern compiled
#[derive(Debug, Clone)]
pub struct CompiledPolicy {
    /// Hash of the source policy
    pub hash: String,
    /// Compiled library list
    pub libraries: CompiledList,
    /// Compiled namespace list
    pub namespaces: CompiledList,
    /// Compiled type list
    pub types: CompiledList,
    /// Compiled member list
    pub members: CompiledList,
    /// Master switch for unsafe interop
    pub allow_unsafe_interop: bool,
}

impl CompiledPolicy {
    /// Every pattern that failed to compile
    pub fn invalid_patterns(&self) -> Vec<String> {
        [&self.libraries, &self.namespaces, &self.types, &self.members]
            .iter()
            .flat_map(|list| list.invalid_patterns().iter().cloned())
            .collect()
    }
}
