//! parcelsync keeps a reconciled local snapshot of Parcel app deliveries.
//!
//! The [`coordinator`] polls the Parcel API through a [`client::DeliveryApi`],
//! merges each response into an immutable [`coordinator::DeliverySnapshot`],
//! evicts completed deliveries after the retention threshold, and publishes
//! the resulting change sets on an [`events::EventBus`]. Presentation
//! adapters ([`adapter::PresentationAdapter`]) consume those changes.

pub mod adapter;
pub mod client;
pub mod config;
pub mod coordinator;
pub mod delivery;
pub mod events;
#[cfg(feature = "server")]
pub mod observability;

#[cfg(test)]
mod tests;
