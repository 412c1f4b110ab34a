//! In-process event distribution for pinmark.
//!
//! Every state change becomes one [`Event`](pm_domain::model::Event) with a
//! sequence number drawn from a single [`Sequencer`]. The [`EventBus`] fans
//! events out to global and per-session subscribers; the [`UserEventBus`]
//! does the same within one user's scope and shares the sequencer, so
//! sequence numbers stay strictly increasing across the whole process.

pub mod bus;
pub mod handler;
pub mod sequencer;
pub mod user_bus;

mod registry;

pub use bus::EventBus;
pub use handler::{Handler, Subscription};
pub use sequencer::Sequencer;
pub use user_bus::UserEventBus;
