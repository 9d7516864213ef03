//! Static screening of script source before it is parsed.
//!
//! This is a best-effort filter: a pattern list can always be dodged by a
//! determined author. Scripts are contained by the interpreter, which has no
//! file, process, network, import or reflection capability to reach; the
//! filter only turns obviously hostile code away early with a clear message.

use std::sync::LazyLock;

use regex::{Regex, RegexBuilder};

#[derive(Debug)]
pub struct DenyRule {
    pub label: &'static str,
    pub pattern: Regex,
}

const RULES: &[(&str, &str)] = &[
    ("__import__", r"\b__import__\b"),
    ("eval", r"\beval\b"),
    ("exec", r"\bexec\b"),
    ("compile", r"\bcompile\b"),
    ("open", r"\bopen\b"),
    ("file", r"\bfile\b"),
    ("input", r"\binput\b"),
    ("raw_input", r"\braw_input\b"),
    ("reload", r"\breload\b"),
    ("importlib", r"\bimportlib\b"),
    ("os.", r"\bos\."),
    ("sys.", r"\bsys\."),
    ("subprocess.", r"\bsubprocess\."),
    ("globals", r"\bglobals\b"),
    ("locals", r"\blocals\b"),
    ("vars", r"\bvars\b"),
    ("dir", r"\bdir\b"),
    ("getattr", r"\bgetattr\b"),
    ("setattr", r"\bsetattr\b"),
    ("hasattr", r"\bhasattr\b"),
    ("delattr", r"\bdelattr\b"),
    ("dunder", r"\b__.*__\b"),
];

static DENYLIST: LazyLock<Vec<DenyRule>> = LazyLock::new(|| {
    RULES
        .iter()
        .filter_map(|(label, pattern)| {
            RegexBuilder::new(pattern)
                .case_insensitive(true)
                .build()
                .ok()
                .map(|pattern| DenyRule { label, pattern })
        })
        .collect()
});

pub fn rules() -> &'static [DenyRule] {
    &DENYLIST
}

/// First rule, in declaration order, that matches anywhere in `code`.
pub fn first_violation(code: &str) -> Option<&'static DenyRule> {
    DENYLIST.iter().find(|rule| rule.pattern.is_match(code))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_rule_compiles() {
        assert_eq!(rules().len(), RULES.len());
    }

    #[test]
    fn test_rejects_known_patterns() {
        let cases = [
            ("__import__('os')", "__import__"),
            ("x = eval('1')", "eval"),
            ("open('f')", "open"),
            ("import os; os.system('ls')", "os."),
            ("EXEC('x')", "exec"),
            ("getattr(df, 'x')", "getattr"),
            ("df.__class__", "dunder"),
        ];
        for (code, label) in cases {
            let rule = first_violation(code).map(|r| r.label);
            assert_eq!(rule, Some(label), "code: {}", code);
        }
    }

    #[test]
    fn test_first_match_wins() {
        assert_eq!(first_violation("eval(open('x'))").map(|r| r.label), Some("eval"));
    }

    #[test]
    fn test_whole_word_matching() {
        assert!(first_violation("df['opened'] = df['evaluation']").is_none());
        assert!(first_violation("profile = df['filename']").is_none());
        assert!(first_violation("df = df.dropna()").is_none());
    }
}
