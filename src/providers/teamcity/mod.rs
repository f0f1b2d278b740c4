mod client;
mod provider;
mod types;
pub mod xml;

pub use client::{
    DataKind, Inspection, Method, Payload, Reply, RestRequest, RetryPolicy, ServerAddress,
    TeamCityClient, Triggered, MAX_TRIGGER_ATTEMPTS,
};
pub use provider::{PollPolicy, RetriggerRequest, Retriggered, TeamCityProvider};
pub use types::{
    latest_change, BuildRef, BuildSnapshot, TriggerRequest, TriggeredBuild, RUNNING_STATE,
};
