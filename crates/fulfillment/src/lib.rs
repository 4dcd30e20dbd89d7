//! Order fulfillment for the inventory engine.
//!
//! [`FulfillmentPipeline`] drives one order through placement, inventory
//! reservation, payment, fulfillment and notification, compensating the
//! completed stages in reverse when a later one fails, times out or is
//! cancelled.
//!
//! - [`services`] holds the collaborator contracts (catalog, inventory,
//!   payment, shipping, notification) with in-memory implementations
//! - [`jobs`] is the fire-and-forget background job contract
//! - [`FulfillmentRecord`] captures what each run did

pub mod error;
pub mod jobs;
pub mod pipeline;
pub mod record;
pub mod services;
pub mod stage;

pub use error::{FailureCategory, FulfillmentError, InventoryError, Result, ServiceError};
pub use jobs::{ChannelJobQueue, InMemoryJobQueue, Job, JobError, JobQueue};
pub use pipeline::{
    Collaborators, FulfillmentHandle, FulfillmentPipeline, FulfillmentRequest, PipelineConfig,
};
pub use record::{CompensationAction, CompensationOutcome, FulfillmentRecord};
pub use services::{
    InMemoryNotificationService, InMemoryPaymentService, InMemoryProductCatalog,
    InMemoryShippingService, InventoryService, LedgerInventoryService, NotificationKind,
    NotificationService, PaymentReceipt, PaymentService, ProductCatalog, ProductInfo, Shipment,
    ShippingService,
};
pub use stage::{PipelineStatus, Stage, StageOutcome};
