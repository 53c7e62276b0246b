//! Orderflow Core - Order Aggregate and Wire Types
//!
//! Pure data structures with no I/O. All other crates depend on this.
//!
//! - [`Order`] and its owned parts ([`Delivery`], [`Payment`], [`OrderItem`])
//! - [`OrderMessage`], the JSON schema of messages arriving on the feed, with
//!   validation and normalization into an [`Order`]
//! - The error taxonomy shared by storage, ingestion and the API layer

pub mod constants;
pub mod entities;
pub mod error;
pub mod message;

pub use entities::{Delivery, Order, OrderItem, Payment, Timestamp};
pub use error::{ConfigError, FeedError, StorageError, ValidationError};
pub use message::{
    parse_order, DeliveryMessage, ItemMessage, NormalizedOrder, OrderMessage, PaymentMessage,
};
