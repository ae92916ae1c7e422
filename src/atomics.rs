// Atomics — User overrides of which operations stay opaque
//
// Built from a whitespace-separated token list:
//
//   +name   keep `name` atomic even if it has a body
//   -name   expand `name` even if the parser would keep it atomic
//
// Tokens without a `+`/`-` prefix are rejected and skipped. A name given
// twice keeps the later verdict.

use std::collections::HashMap;

use log::debug;

use crate::callback::AtomicPolicy;
use crate::graph::{Dictionary, Prototype, Value};

/// Explicit atomicity verdicts, consulted before the parser's own policy.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AtomicOverrides {
    verdicts: HashMap<String, bool>,
}

impl AtomicOverrides {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse an override list. Returns the overrides and the rejected tokens.
    pub fn parse(text: &str) -> (Self, Vec<String>) {
        let mut overrides = Self::new();
        let mut rejected = Vec::new();

        for token in text.split_whitespace() {
            let parsed = token
                .strip_prefix('+')
                .map(|name| (name, true))
                .or_else(|| token.strip_prefix('-').map(|name| (name, false)));
            match parsed {
                Some((name, verdict)) if !name.is_empty() => overrides.set(name, verdict),
                _ => {
                    debug!("rejected atomic override token '{token}'");
                    rejected.push(token.to_string());
                }
            }
        }
        (overrides, rejected)
    }

    pub fn set(&mut self, name: &str, atomic: bool) {
        self.verdicts.insert(name.to_string(), atomic);
    }

    /// The explicit verdict for `name`, if any.
    pub fn verdict(&self, name: &str) -> Option<bool> {
        self.verdicts.get(name).copied()
    }

    /// The explicit verdict, else whatever `defaults` says.
    pub fn resolve(
        &self,
        proto: &Prototype,
        args: &Dictionary<Value>,
        defaults: &dyn AtomicPolicy,
    ) -> bool {
        self.verdict(&proto.name)
            .unwrap_or_else(|| defaults.is_atomic(proto, args))
    }

    pub fn len(&self) -> usize {
        self.verdicts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.verdicts.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    struct Everything;

    impl AtomicPolicy for Everything {
        fn is_atomic(&self, _proto: &Prototype, _args: &Dictionary<Value>) -> bool {
            true
        }
    }

    fn proto(name: &str) -> Prototype {
        Prototype::graph(name, &[], &[])
    }

    #[test]
    fn test_parse_prefixes() {
        let (overrides, rejected) = AtomicOverrides::parse("+conv_layer -relu");
        assert!(rejected.is_empty());
        assert_eq!(overrides.verdict("conv_layer"), Some(true));
        assert_eq!(overrides.verdict("relu"), Some(false));
        assert_eq!(overrides.verdict("sigmoid"), None);
    }

    #[test]
    fn test_rejected_token_is_skipped() {
        let (overrides, rejected) = AtomicOverrides::parse("+a relu -b");
        assert_eq!(rejected, vec!["relu".to_string()]);
        assert_eq!(overrides.len(), 2);
        assert_eq!(overrides.verdict("relu"), None);
    }

    #[test]
    fn test_empty_list() {
        let (overrides, rejected) = AtomicOverrides::parse("   ");
        assert!(overrides.is_empty());
        assert!(rejected.is_empty());
    }

    #[test]
    fn test_resolve_falls_back_to_policy() {
        let (overrides, _) = AtomicOverrides::parse("-relu");
        let args = Dictionary::new();
        assert!(!overrides.resolve(&proto("relu"), &args, &Everything));
        assert!(overrides.resolve(&proto("sigmoid"), &args, &Everything));
    }

    fn name() -> impl Strategy<Value = String> {
        "[a-z_][a-z0-9_]{0,8}"
    }

    proptest! {
        #[test]
        fn prop_prefix_sets_verdict(names in prop::collection::vec((name(), any::<bool>()), 1..12)) {
            let text: Vec<String> = names
                .iter()
                .map(|(n, atomic)| format!("{}{n}", if *atomic { '+' } else { '-' }))
                .collect();
            let (overrides, rejected) = AtomicOverrides::parse(&text.join(" "));
            prop_assert!(rejected.is_empty());

            // The last verdict for each name wins.
            let mut expected = HashMap::new();
            for (n, atomic) in &names {
                expected.insert(n.clone(), *atomic);
            }
            prop_assert_eq!(overrides.len(), expected.len());
            for (n, atomic) in expected {
                prop_assert_eq!(overrides.verdict(&n), Some(atomic));
            }
        }

        #[test]
        fn prop_unprefixed_token_warns_once(
            good in prop::collection::vec(name(), 0..6),
            bad in name(),
        ) {
            let mut tokens: Vec<String> = good.iter().map(|n| format!("+{n}")).collect();
            tokens.insert(tokens.len() / 2, bad.clone());
            let (overrides, rejected) = AtomicOverrides::parse(&tokens.join(" "));
            prop_assert_eq!(rejected, vec![bad.clone()]);
            if !good.contains(&bad) {
                prop_assert_eq!(overrides.verdict(&bad), None);
            }
        }
    }
}
