//! Well-known names inside the data directory

pub const CONFIG: &str = "config.json";
pub const PID: &str = "hopwire.pid";
pub const CREDENTIAL: &str = "credential.json";
pub const PROOF_TOKENS: &str = "proof_tokens.json";
pub const BYPASS: &str = "bypass.json";
pub const CONTRACT: &str = "contract.json";
pub const RELAYS: &str = "relays.json";
pub const DIRECTORY: &str = "directory.json";
