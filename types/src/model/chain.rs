//! A chain of stateful function invocations.

use std::{
    collections::{BTreeMap, BTreeSet},
    fmt,
};

use serde::{Deserialize, Serialize};

use super::states::States;
use crate::error::EdgeError;

/// An ordered sequence of function invocations (duplicates allowed) plus the
/// state dependencies of the functions. Objects of this type are immutable.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "ChainWire", into = "ChainWire")]
pub struct Chain {
    functions: Vec<String>,
    states: States,
}

/// JSON shape:
/// `{"functions": [...], "dependencies": {"state": ["fn", ...] | null}}`.
#[derive(Serialize, Deserialize)]
struct ChainWire {
    functions: Vec<String>,
    dependencies: BTreeMap<String, Option<Vec<String>>>,
}

impl TryFrom<ChainWire> for Chain {
    type Error = EdgeError;

    fn try_from(wire: ChainWire) -> Result<Self, Self::Error> {
        let dependencies = wire
            .dependencies
            .into_iter()
            .map(|(state, functions)| (state, functions.unwrap_or_default()))
            .collect();
        Chain::new(wire.functions, dependencies)
    }
}

impl From<Chain> for ChainWire {
    fn from(chain: Chain) -> Self {
        Self {
            functions: chain.functions,
            dependencies: chain
                .states
                .dependencies()
                .iter()
                .map(|(state, functions)| {
                    if functions.is_empty() {
                        (state.clone(), None)
                    } else {
                        (state.clone(), Some(functions.clone()))
                    }
                })
                .collect(),
        }
    }
}

impl Chain {
    /// Build a chain, checking that every function appearing in the state
    /// dependencies is part of the sequence.
    pub fn new(
        functions: Vec<String>,
        dependencies: BTreeMap<String, Vec<String>>,
    ) -> Result<Self, EdgeError> {
        let states = States::new(dependencies);
        states.check_against(&functions.iter().cloned().collect())?;
        Ok(Self { functions, states })
    }

    /// The chain name, a mangle of the function names.
    pub fn name(&self) -> String {
        self.functions.join("-")
    }

    pub fn functions(&self) -> &[String] {
        &self.functions
    }

    pub fn unique_functions(&self) -> BTreeSet<String> {
        self.functions.iter().cloned().collect()
    }

    pub fn dependencies(&self) -> &BTreeMap<String, Vec<String>> {
        self.states.dependencies()
    }

    pub fn states(&self) -> &States {
        &self.states
    }

    /// All the state names, optionally including the free states.
    pub fn all_states(&self, include_free_states: bool) -> BTreeSet<String> {
        self.states.all_states(include_free_states)
    }

    /// The states that the given function requires.
    pub fn states_of(&self, function: &str) -> BTreeSet<String> {
        self.states.states_of(function)
    }

    /// A new chain containing only the given function, with its
    /// dependencies.
    pub fn single_function_chain(&self, function: &str) -> Result<Chain, EdgeError> {
        Chain::new(
            vec![function.to_string()],
            self.states.dependencies_of(function),
        )
    }

    pub fn from_json(json: &str) -> Result<Self, EdgeError> {
        serde_json::from_str(json).map_err(|err| EdgeError::InvalidModel(err.to_string()))
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(self).expect("chains are always serializable")
    }
}

impl fmt::Display for Chain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}], {}", self.functions.join(" -> "), self.states)
    }
}

/// An example chain used by tests and the configuration template.
pub fn example_chain() -> Chain {
    Chain::new(
        vec!["f1".to_string(), "f2".to_string(), "f1".to_string()],
        BTreeMap::from([
            ("s0".to_string(), vec!["f1".to_string()]),
            ("s1".to_string(), vec!["f1".to_string(), "f2".to_string()]),
            ("s2".to_string(), vec!["f2".to_string()]),
            ("s3".to_string(), vec![]),
        ]),
    )
    .expect("the example chain is well-formed")
}

#[cfg(test)]
mod test {
    use std::collections::BTreeMap;

    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_serialize_deserialize() {
        let chain = example_chain();
        let serialized = chain.to_json();
        let deserialized = Chain::from_json(&serialized).unwrap();
        assert_eq!(chain, deserialized);
    }

    #[test]
    fn test_access_methods() {
        let chain = example_chain();

        assert_eq!(
            vec!["f1".to_string(), "f2".to_string(), "f1".to_string()],
            chain.functions().to_vec()
        );
        assert_eq!(
            BTreeSet::from(["f1".to_string(), "f2".to_string()]),
            chain.unique_functions()
        );
        assert_eq!(
            BTreeSet::from(["s0".into(), "s1".into(), "s2".into(), "s3".into()]),
            chain.all_states(true)
        );
        assert_eq!(
            BTreeSet::from(["s0".into(), "s1".into(), "s2".into()]),
            chain.all_states(false)
        );
        assert_eq!(BTreeSet::new(), chain.states_of("fX"));
        assert_eq!(
            BTreeSet::from(["s0".to_string(), "s1".to_string()]),
            chain.states_of("f1")
        );
        assert_eq!(
            BTreeSet::from(["s1".to_string(), "s2".to_string()]),
            chain.states_of("f2")
        );
        assert_eq!("f1-f2-f1", chain.name());
    }

    #[test]
    fn test_single_function_chain() {
        let single = example_chain().single_function_chain("f2").unwrap();
        assert_eq!(vec!["f2".to_string()], single.functions().to_vec());
        assert_eq!(
            BTreeSet::from(["s1".to_string(), "s2".to_string()]),
            single.states_of("f2")
        );
    }

    #[test]
    fn test_invalid() {
        assert!(Chain::new(
            vec!["f1".to_string(), "f2".to_string()],
            BTreeMap::from([("s".to_string(), vec!["fX".to_string()])]),
        )
        .is_err());

        let json = r#"{
          "dependencies": { "s": [ "fX" ] },
          "functions": [ "f1", "f2" ]
        }"#;
        assert!(Chain::from_json(json).is_err());

        assert!(Chain::from_json("not-a-json").is_err());
    }
}
