//! Function tools the relay can expose to the model.

pub mod order_status;

pub use order_status::{OrderStatus, get_order_status};
