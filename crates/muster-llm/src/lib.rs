pub mod chat;
pub mod mock;
pub mod router;

pub use chat::ChatClient;
pub use mock::{MockClient, MockCompletion};
pub use router::ModelRouter;
