//! listwatch: watch listing pages and slot-booking systems on behalf of
//! subscribers and notify each of them about every new item exactly once.
//!
//! ## Architecture overview
//!
//! ```text
//! ┌────────────┐ add/list/drop ┌────────────┐ spawn/stop ┌─────────────┐
//! │ console.rs │ ────────────► │ service.rs │ ─────────► │ registry.rs │
//! └────────────┘               └────────────┘            └─────────────┘
//!                                    │ dispatch                │ one task per
//!                                    ▼                         ▼ subscription
//!                              ┌───────────┐  fetch   ┌──────────┐ deliver ┌───────────┐
//!                              │  source/  │ ◄─────── │ poll.rs  │ ──────► │ notify.rs │
//!                              └───────────┘          └──────────┘         └───────────┘
//!                                                          │ seen / metadata
//!                                                          ▼
//!                                                     ┌─────────┐
//!                                                     │ store/  │
//!                                                     └─────────┘
//! ```
//!
//! * **`subscription`**: the persisted record and its source queries.
//! * **`source/`**: the `Reader` trait and the listing and slot Readers.
//! * **`store/`**: subscription and seen-item repositories (Redis, in-memory).
//! * **`notify`**: the `Notifier` trait and the Telegram implementation.
//! * **`poll`**: one fetch → dedup → notify → mark-seen cycle, and the loop.
//! * **`registry`**: at most one cancellable polling task per subscription.
//! * **`service`**: the orchestrator tying the above together.
//! * **`console`**: the line-oriented command front end.

pub mod config;
pub mod console;
pub mod error;
pub mod notify;
pub mod poll;
pub mod registry;
pub mod service;
pub mod source;
pub mod store;
pub mod subscription;

#[cfg(test)]
mod test_utils;

pub use config::{ServiceConfig, Settings};
pub use error::{WatchError, WatchResult};
pub use service::{Stores, SubscriptionsService};
pub use subscription::{Source, Subscription, SubscriptionId};
