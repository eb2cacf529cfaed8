//! Key material kept outside the database: voter verification keys and the
//! node's own signing keypair.

mod server;
mod store;

pub use server::{ServerKeys, PRIVATE_KEY_FILE, PUBLIC_KEY_FILE};
pub use store::KeyStore;
