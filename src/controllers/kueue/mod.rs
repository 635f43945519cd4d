pub mod client;
pub mod controller;
mod events;
mod reconcilers;
#[cfg(test)]
mod testing;

pub use client::{ClusterClient, KubeClient};
pub use controller::run;
