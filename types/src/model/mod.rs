//! Model of composed lambda invocations: linear chains, DAGs with
//! fan-out/fan-in, and the state dependencies shared by both.

mod chain;
mod dag;
pub mod factory;
mod states;

pub use chain::{example_chain, Chain};
pub use dag::{example_dag, Dag};
pub use states::States;
