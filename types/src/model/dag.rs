//! A directed acyclic graph of stateful function invocations.

use std::{
    collections::{BTreeMap, BTreeSet},
    fmt,
};

use serde::{Deserialize, Serialize};

use super::states::States;
use crate::error::EdgeError;

/// A DAG of function invocations with a unique entry (slot 0) and a unique
/// terminal (the last slot). `successors[i]` lists the slots immediately
/// following slot `i`; the terminal has no entry. Objects of this type are
/// immutable.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(try_from = "DagWire", into = "DagWire")]
pub struct Dag {
    successors: Vec<Vec<usize>>,
    /// Derived at construction: `predecessors[j - 1]` lists the slots
    /// immediately preceding slot `j`.
    predecessors: Vec<Vec<usize>>,
    function_names: Vec<String>,
    states: States,
}

/// JSON shape: `{"successors": [[...], ...], "functionNames": [...],
/// "dependencies": {...}}`.
#[derive(Serialize, Deserialize)]
struct DagWire {
    successors: Vec<Vec<usize>>,
    #[serde(rename = "functionNames")]
    function_names: Vec<String>,
    dependencies: BTreeMap<String, Option<Vec<String>>>,
}

impl TryFrom<DagWire> for Dag {
    type Error = EdgeError;

    fn try_from(wire: DagWire) -> Result<Self, Self::Error> {
        let dependencies = wire
            .dependencies
            .into_iter()
            .map(|(state, functions)| (state, functions.unwrap_or_default()))
            .collect();
        Dag::new(wire.successors, wire.function_names, dependencies)
    }
}

impl From<Dag> for DagWire {
    fn from(dag: Dag) -> Self {
        Self {
            successors: dag.successors,
            function_names: dag.function_names,
            dependencies: dag
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

impl PartialEq for Dag {
    fn eq(&self, other: &Self) -> bool {
        // predecessors are derived from successors, no need to compare them
        self.successors == other.successors
            && self.function_names == other.function_names
            && self.states == other.states
    }
}

impl Eq for Dag {}

impl Dag {
    /// Build a DAG, checking the size of the successor graph against the
    /// function slots, the validity of all the edges, and the state
    /// dependencies.
    pub fn new(
        successors: Vec<Vec<usize>>,
        function_names: Vec<String>,
        dependencies: BTreeMap<String, Vec<String>>,
    ) -> Result<Self, EdgeError> {
        if function_names.is_empty() || successors.len() != function_names.len() - 1 {
            return Err(EdgeError::InvalidModel(format!(
                "invalid size of successors and function names: {} vs {}",
                successors.len(),
                function_names.len()
            )));
        }

        let predecessors = Self::make_predecessors(&successors)?;

        let states = States::new(dependencies);
        states.check_against(&function_names.iter().cloned().collect())?;

        Ok(Self {
            successors,
            predecessors,
            function_names,
            states,
        })
    }

    /// The DAG name, a mangle of the function names.
    pub fn name(&self) -> String {
        self.function_names.join("-")
    }

    pub fn unique_functions(&self) -> BTreeSet<String> {
        self.function_names.iter().cloned().collect()
    }

    pub fn successors(&self) -> &[Vec<usize>] {
        &self.successors
    }

    pub fn function_names(&self) -> &[String] {
        &self.function_names
    }

    pub fn states(&self) -> &States {
        &self.states
    }

    /// Number of function slots.
    pub fn num_functions(&self) -> usize {
        self.function_names.len()
    }

    pub fn entry_function_name(&self) -> &str {
        &self.function_names[0]
    }

    /// Index of the terminal slot.
    pub fn terminal(&self) -> usize {
        self.function_names.len() - 1
    }

    /// The slots immediately following the given one. The terminal slot has
    /// none.
    pub fn successors_of(&self, index: usize) -> Result<&[usize], EdgeError> {
        if index > self.successors.len() {
            return Err(self.out_of_range(index));
        }
        if index == self.successors.len() {
            return Ok(&[]);
        }
        Ok(&self.successors[index])
    }

    /// The slots immediately preceding the given one. The entry slot has
    /// none.
    pub fn predecessors_of(&self, index: usize) -> Result<&[usize], EdgeError> {
        if index > self.predecessors.len() {
            return Err(self.out_of_range(index));
        }
        if index == 0 {
            return Ok(&[]);
        }
        Ok(&self.predecessors[index - 1])
    }

    /// The names of the functions immediately following the given slot.
    pub fn successor_names(&self, index: usize) -> Result<BTreeSet<String>, EdgeError> {
        Ok(self.to_names(self.successors_of(index)?))
    }

    /// The names of the functions immediately preceding the given slot.
    pub fn predecessor_names(&self, index: usize) -> Result<BTreeSet<String>, EdgeError> {
        Ok(self.to_names(self.predecessors_of(index)?))
    }

    pub fn from_json(json: &str) -> Result<Self, EdgeError> {
        serde_json::from_str(json).map_err(|err| EdgeError::InvalidModel(err.to_string()))
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(self).expect("DAGs are always serializable")
    }

    fn make_predecessors(successors: &[Vec<usize>]) -> Result<Vec<Vec<usize>>, EdgeError> {
        let mut ret = vec![Vec::new(); successors.len()];
        for (i, slots) in successors.iter().enumerate() {
            for &j in slots {
                if j == 0 || (j - 1) >= ret.len() {
                    return Err(EdgeError::InvalidModel(
                        "invalid successor graph".to_string(),
                    ));
                }
                ret[j - 1].push(i);
            }
        }
        Ok(ret)
    }

    fn to_names(&self, indices: &[usize]) -> BTreeSet<String> {
        indices
            .iter()
            .filter_map(|&i| self.function_names.get(i).cloned())
            .collect()
    }

    fn out_of_range(&self, index: usize) -> EdgeError {
        EdgeError::InvalidModel(format!(
            "out of range function index: {} > {}",
            index,
            self.successors.len()
        ))
    }
}

impl fmt::Display for Dag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{ ")?;
        for (i, slots) in self.successors.iter().enumerate() {
            if i > 0 {
                write!(f, "; ")?;
            }
            let names: Vec<String> = slots
                .iter()
                .filter_map(|&j| self.function_names.get(j).cloned())
                .collect();
            write!(f, "{} -> {}", self.function_names[i], names.join(","))?;
        }
        write!(f, "}}, {}", self.states)
    }
}

/// An example DAG used by tests and the configuration template.
pub fn example_dag() -> Dag {
    Dag::new(
        vec![vec![1, 2], vec![3], vec![3]],
        vec![
            "f0".to_string(),
            "f1".to_string(),
            "f2".to_string(),
            "f2".to_string(),
        ],
        BTreeMap::from([
            ("s0".to_string(), vec!["f0".to_string()]),
            ("s1".to_string(), vec!["f0".to_string(), "f1".to_string()]),
            ("s2".to_string(), vec!["f2".to_string()]),
            ("s3".to_string(), vec![]),
        ]),
    )
    .expect("the example DAG is well-formed")
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_serialize_deserialize() {
        let dag = example_dag();
        let serialized = dag.to_json();
        let deserialized = Dag::from_json(&serialized).unwrap();
        assert_eq!(dag, deserialized);
    }

    #[test]
    fn test_access_methods() {
        let dag = example_dag();

        assert_eq!(
            BTreeSet::from(["f0".to_string(), "f1".to_string(), "f2".to_string()]),
            dag.unique_functions()
        );
        assert_eq!(
            BTreeSet::from(["s0".into(), "s1".into(), "s2".into(), "s3".into()]),
            dag.states().all_states(true)
        );
        assert_eq!(
            BTreeSet::from(["s0".into(), "s1".into(), "s2".into()]),
            dag.states().all_states(false)
        );
        assert_eq!(BTreeSet::new(), dag.states().states_of("fX"));
        assert_eq!(
            BTreeSet::from(["s0".to_string(), "s1".to_string()]),
            dag.states().states_of("f0")
        );
        assert_eq!(
            BTreeSet::from(["s1".to_string()]),
            dag.states().states_of("f1")
        );
        assert_eq!("f0-f1-f2-f2", dag.name());
        assert_eq!("f0", dag.entry_function_name());
        assert_eq!(3, dag.terminal());

        assert_eq!(
            BTreeSet::from(["f1".to_string(), "f2".to_string()]),
            dag.successor_names(0).unwrap()
        );
        assert_eq!(
            BTreeSet::from(["f2".to_string()]),
            dag.successor_names(1).unwrap()
        );
        assert_eq!(
            BTreeSet::from(["f2".to_string()]),
            dag.successor_names(2).unwrap()
        );
        assert_eq!(BTreeSet::new(), dag.successor_names(3).unwrap());
        assert!(dag.successor_names(4).is_err());

        assert_eq!(BTreeSet::new(), dag.predecessor_names(0).unwrap());
        assert_eq!(
            BTreeSet::from(["f0".to_string()]),
            dag.predecessor_names(1).unwrap()
        );
        assert_eq!(
            BTreeSet::from(["f0".to_string()]),
            dag.predecessor_names(2).unwrap()
        );
        assert_eq!(
            BTreeSet::from(["f1".to_string(), "f2".to_string()]),
            dag.predecessor_names(3).unwrap()
        );
        assert!(dag.predecessor_names(4).is_err());
    }

    #[test]
    fn test_invalid() {
        // state depending on an unknown function
        assert!(Dag::new(
            vec![vec![1, 2], vec![3], vec![3]],
            vec!["f0".into(), "f1".into(), "f2".into(), "f3".into()],
            BTreeMap::from([("s".to_string(), vec!["fX".to_string()])]),
        )
        .is_err());

        // successors/function names size mismatch
        assert!(Dag::new(
            vec![vec![1, 2], vec![3], vec![3]],
            vec!["f0".into(), "f1".into(), "f2".into()],
            BTreeMap::from([("s".to_string(), vec!["f0".to_string()])]),
        )
        .is_err());
        assert!(Dag::new(
            vec![vec![1, 2], vec![3]],
            vec!["f0".into(), "f1".into(), "f2".into(), "f3".into()],
            BTreeMap::from([("s".to_string(), vec!["f0".to_string()])]),
        )
        .is_err());

        // an edge pointing back to the entry
        assert!(Dag::new(
            vec![vec![1, 0], vec![3], vec![3]],
            vec!["f0".into(), "f1".into(), "f2".into(), "f3".into()],
            BTreeMap::new(),
        )
        .is_err());

        assert!(Dag::new(
            vec![vec![1, 2], vec![3], vec![3]],
            vec!["f0".into(), "f1".into(), "f2".into(), "f3".into()],
            BTreeMap::from([("s".to_string(), vec!["f0".to_string()])]),
        )
        .is_ok());

        // missing "functionNames"
        assert!(Dag::from_json(
            r#"{"dependencies": {"s0": null}, "successors": [[1], []]}"#
        )
        .is_err());
        // missing "successors"
        assert!(Dag::from_json(
            r#"{"dependencies": {"s0": null}, "functionNames": ["f0", "f1"]}"#
        )
        .is_err());
        assert!(Dag::from_json("not-a-json").is_err());
    }
}
