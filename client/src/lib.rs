//! Client-side components of the edgefab workspace: the edge client
//! interface with its single- and multi-destination implementations, the
//! per-destination client pool used by the edge nodes, the chain/DAG
//! composer, and the clients of the ancillary state and callback services.

mod callback_server;
mod composer;
mod edge_client;
mod interface;
mod multi_client;
mod pool;
mod state_client;

pub use callback_server::CallbackServer;
pub use composer::{Composer, ComposerConfig};
pub use edge_client::EdgeClient;
pub use interface::EdgeClientInterface;
pub use multi_client::EdgeClientMulti;
pub use pool::{ClientFactory, EdgeClientPool, TransportClientFactory};
pub use state_client::StateClient;
