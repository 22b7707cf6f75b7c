pub mod order;
pub mod view;

pub use order::{
    NewOrderItem, Order, OrderItem, OrderStatus, PaymentMethod, PaymentProofInput, Pricing,
    ShippingAddress, TimelineEntry,
};
pub use view::{OrderItemView, OrderView};
