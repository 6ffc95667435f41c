use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Responder (rule tables)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Right-hand side of an `[responder.actions]` entry.
///
/// ```toml
/// [responder.actions]
/// "remote/button" = "lights/toggle{$1}"
/// "oppo/started"  = ["hw50/on", "oppo/play"]
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ActionSpec {
    Single(String),
    List(Vec<String>),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponderConfig {
    /// Event name to command template.
    #[serde(default)]
    pub actions: BTreeMap<String, ActionSpec>,
    /// Alias name to ordered command templates.
    #[serde(default)]
    pub groups: BTreeMap<String, Vec<String>>,
    /// Alias expansion depth limit.
    #[serde(default = "d_max_depth")]
    pub max_depth: usize,
}

impl Default for ResponderConfig {
    fn default() -> Self {
        Self {
            actions: BTreeMap::new(),
            groups: BTreeMap::new(),
            max_depth: d_max_depth(),
        }
    }
}

impl ResponderConfig {
    /// Normalize the tables: every list-valued action becomes a group named
    /// `__<event>` and the action points at that group.
    ///
    /// Returns `(actions, groups)` with every action a single template.
    pub fn resolve(&self) -> (BTreeMap<String, String>, BTreeMap<String, Vec<String>>) {
        let mut groups = self.groups.clone();
        let actions = self
            .actions
            .iter()
            .map(|(event, spec)| {
                let template = match spec {
                    ActionSpec::Single(t) => t.clone(),
                    ActionSpec::List(list) => {
                        let group = format!("__{event}");
                        groups.insert(group.clone(), list.clone());
                        group
                    }
                };
                (event.clone(), template)
            })
            .collect();
        (actions, groups)
    }
}

fn d_max_depth() -> usize {
    10
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_single_and_list_actions() {
        let cfg: ResponderConfig = toml::from_str(
            r#"
            [actions]
            "remote/button" = "lights/toggle{$1}"
            "oppo/started" = ["hw50/on", "oppo/play"]

            [groups]
            movie = ["hw50/on", "yamaha/input{hdmi1}"]
        "#,
        )
        .unwrap();
        assert_eq!(cfg.max_depth, 10);
        assert_eq!(
            cfg.actions["remote/button"],
            ActionSpec::Single("lights/toggle{$1}".into())
        );
        assert!(matches!(cfg.actions["oppo/started"], ActionSpec::List(_)));
        assert_eq!(cfg.groups["movie"].len(), 2);
    }

    #[test]
    fn list_action_becomes_generated_group() {
        let mut cfg = ResponderConfig::default();
        cfg.actions.insert(
            "oppo/started".into(),
            ActionSpec::List(vec!["hw50/on".into(), "oppo/play".into()]),
        );
        cfg.actions
            .insert("a".into(), ActionSpec::Single("b{$*}".into()));

        let (actions, groups) = cfg.resolve();
        assert_eq!(actions["oppo/started"], "__oppo/started");
        assert_eq!(groups["__oppo/started"], vec!["hw50/on", "oppo/play"]);
        assert_eq!(actions["a"], "b{$*}");
        assert_eq!(groups.len(), 1);
    }
}
