pub mod analytics;
pub mod cancellation;
pub mod order_status;
pub mod orders;

pub use analytics::OrderAnalytics;
pub use cancellation::BulkCancellation;
pub use order_status::UpdateStatusRequest;
pub use orders::{
    CreateOrderRequest, CreatePaymentIntentRequest, OrderWorkflow, WorkflowDeps,
    DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE,
};
