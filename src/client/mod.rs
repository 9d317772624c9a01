pub mod session;
pub mod upstream;

pub use session::{ChatSession, ResponseSource, TurnEvent, TurnOutcome};
pub use upstream::UpstreamClient;
