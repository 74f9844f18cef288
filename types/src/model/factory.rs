//! Loading chains and DAGs from configuration files. Besides the model
//! itself, a file may carry a sibling `"state-sizes"` block giving the size
//! in bytes of the (dummy) states to be created by clients.

use std::{collections::BTreeMap, path::Path};

use anyhow::{Context, Result};

use super::{chain::example_chain, dag::example_dag, Chain, Dag};

/// Size in bytes of each named state, as declared in the file.
pub type StateSizes = BTreeMap<String, usize>;

/// Load a chain from a JSON file.
pub fn chain_from_file(path: impl AsRef<Path>) -> Result<(Chain, StateSizes)> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("cannot read chain file {}", path.display()))?;
    let chain = Chain::from_json(&content)
        .with_context(|| format!("invalid chain in {}", path.display()))?;
    Ok((chain, state_sizes(&content)?))
}

/// Load a DAG from a JSON file.
pub fn dag_from_file(path: impl AsRef<Path>) -> Result<(Dag, StateSizes)> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("cannot read DAG file {}", path.display()))?;
    let dag = Dag::from_json(&content)
        .with_context(|| format!("invalid DAG in {}", path.display()))?;
    Ok((dag, state_sizes(&content)?))
}

/// An example chain file content, usable as a configuration template.
pub fn example_chain_json() -> String {
    with_example_state_sizes(example_chain().to_json())
}

/// An example DAG file content, usable as a configuration template.
pub fn example_dag_json() -> String {
    with_example_state_sizes(example_dag().to_json())
}

fn state_sizes(content: &str) -> Result<StateSizes> {
    let value: serde_json::Value =
        serde_json::from_str(content).with_context(|| "invalid JSON")?;
    match value.get("state-sizes") {
        None => Ok(StateSizes::new()),
        Some(sizes) => {
            serde_json::from_value(sizes.clone()).with_context(|| "invalid state-sizes block")
        }
    }
}

fn with_example_state_sizes(model_json: String) -> String {
    let mut value: serde_json::Value =
        serde_json::from_str(&model_json).expect("the example serializes to valid JSON");
    value["state-sizes"] = serde_json::json!({"s0": 100, "s1": 200, "s2": 300, "s3": 400});
    serde_json::to_string_pretty(&value).expect("valid JSON")
}

#[cfg(test)]
mod test {
    use std::io::Write;

    use super::*;

    #[test]
    fn test_example_templates_parse() {
        let (chain, sizes) = {
            let mut file = tempfile::NamedTempFile::new().unwrap();
            file.write_all(example_chain_json().as_bytes()).unwrap();
            chain_from_file(file.path()).unwrap()
        };
        assert_eq!(example_chain(), chain);
        assert_eq!(Some(&100), sizes.get("s0"));
        assert_eq!(Some(&400), sizes.get("s3"));

        let (dag, sizes) = {
            let mut file = tempfile::NamedTempFile::new().unwrap();
            file.write_all(example_dag_json().as_bytes()).unwrap();
            dag_from_file(file.path()).unwrap()
        };
        assert_eq!(example_dag(), dag);
        assert_eq!(4, sizes.len());
    }

    #[test]
    fn test_missing_state_sizes_block() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(example_chain().to_json().as_bytes()).unwrap();
        let (_, sizes) = chain_from_file(file.path()).unwrap();
        assert!(sizes.is_empty());
    }

    #[test]
    fn test_invalid_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"not-a-json").unwrap();
        assert!(chain_from_file(file.path()).is_err());
        assert!(dag_from_file(file.path()).is_err());
    }
}
