//! Transport shared by exchange clients: request signing, the REST client,
//! WebSocket streams and periodic background tasks.

pub mod credential;
pub mod rest;
pub mod stream;
pub mod task;

pub use credential::Credential;
pub use rest::{Params, RestClient, RestClientConfig, Security};
pub use stream::{collect_for, serve, watch_for, StreamHandle};
pub use task::PeriodicTask;
