mod enqueue_ops;
mod lock_ops;

use super::{builder::ClientBuilder, Client};

impl Client {
    /// Create an instance of [`ClientBuilder`]
    pub fn builder() -> ClientBuilder {
        ClientBuilder::default()
    }
}
