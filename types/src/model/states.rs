//! Dependencies of functions on the application's states.

use std::{
    collections::{BTreeMap, BTreeSet},
    fmt,
};

use serde::{Deserialize, Serialize};

use crate::error::EdgeError;

/// Which functions depend on which named state. Objects of this type are
/// immutable. A state with an empty dependency list is a "free" state.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "StatesWire", into = "StatesWire")]
pub struct States {
    dependencies: BTreeMap<String, Vec<String>>,
}

/// JSON shape: `{"dependencies": {"state": ["fn", ...] | null, ...}}`, where
/// `null` marks a free state.
#[derive(Serialize, Deserialize)]
struct StatesWire {
    dependencies: BTreeMap<String, Option<Vec<String>>>,
}

impl From<StatesWire> for States {
    fn from(wire: StatesWire) -> Self {
        Self {
            dependencies: wire
                .dependencies
                .into_iter()
                .map(|(state, functions)| (state, functions.unwrap_or_default()))
                .collect(),
        }
    }
}

impl From<States> for StatesWire {
    fn from(states: States) -> Self {
        Self {
            dependencies: states
                .dependencies
                .into_iter()
                .map(|(state, functions)| {
                    if functions.is_empty() {
                        (state, None)
                    } else {
                        (state, Some(functions))
                    }
                })
                .collect(),
        }
    }
}

impl States {
    pub fn new(dependencies: BTreeMap<String, Vec<String>>) -> Self {
        Self { dependencies }
    }

    pub fn dependencies(&self) -> &BTreeMap<String, Vec<String>> {
        &self.dependencies
    }

    /// The dependencies restricted to a given function.
    pub fn dependencies_of(&self, function: &str) -> BTreeMap<String, Vec<String>> {
        self.dependencies
            .iter()
            .filter(|(_, functions)| functions.iter().any(|f| f == function))
            .map(|(state, _)| (state.clone(), vec![function.to_string()]))
            .collect()
    }

    /// All the state names, optionally including the free states.
    pub fn all_states(&self, include_free_states: bool) -> BTreeSet<String> {
        self.dependencies
            .iter()
            .filter(|(_, functions)| include_free_states || !functions.is_empty())
            .map(|(state, _)| state.clone())
            .collect()
    }

    /// The states that the given function requires.
    pub fn states_of(&self, function: &str) -> BTreeSet<String> {
        self.dependencies
            .iter()
            .filter(|(_, functions)| functions.iter().any(|f| f == function))
            .map(|(state, _)| state.clone())
            .collect()
    }

    /// Check that every function mentioned in the dependencies is in the
    /// given set.
    pub(crate) fn check_against(&self, functions: &BTreeSet<String>) -> Result<(), EdgeError> {
        for (state, dependent) in &self.dependencies {
            for function in dependent {
                if !functions.contains(function) {
                    return Err(EdgeError::InvalidModel(format!(
                        "could not find the following function that state '{state}' \
                         depends on: {function}"
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn from_json(json: &str) -> Result<Self, EdgeError> {
        serde_json::from_str(json).map_err(|err| EdgeError::InvalidModel(err.to_string()))
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(self).expect("states are always serializable")
    }
}

impl fmt::Display for States {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (state, functions) in &self.dependencies {
            write!(f, "({}: {}) ", state, functions.join(","))?;
        }
        write!(f, "}}")
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn example() -> States {
        States::new(BTreeMap::from([
            ("s0".to_string(), vec!["f1".to_string()]),
            ("s1".to_string(), vec!["f1".to_string(), "f2".to_string()]),
            ("s2".to_string(), vec!["f2".to_string()]),
            ("s3".to_string(), vec![]),
        ]))
    }

    #[test]
    fn test_all_states() {
        let states = example();
        assert_eq!(
            BTreeSet::from(["s0".into(), "s1".into(), "s2".into(), "s3".into()]),
            states.all_states(true)
        );
        assert_eq!(
            BTreeSet::from(["s0".into(), "s1".into(), "s2".into()]),
            states.all_states(false)
        );
    }

    #[test]
    fn test_states_of() {
        let states = example();
        assert_eq!(BTreeSet::new(), states.states_of("fX"));
        assert_eq!(
            BTreeSet::from(["s0".to_string(), "s1".to_string()]),
            states.states_of("f1")
        );
        assert_eq!(
            BTreeSet::from(["s1".to_string(), "s2".to_string()]),
            states.states_of("f2")
        );
    }

    #[test]
    fn test_json_round_trip_with_free_state() {
        let states = example();
        let json = states.to_json();
        // free states serialize as null
        assert!(json.contains("\"s3\": null"));
        assert_eq!(states, States::from_json(&json).unwrap());
    }
}
