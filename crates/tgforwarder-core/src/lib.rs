pub mod config;
pub mod db;
pub mod delivery_logs;
pub mod dispatch;
pub mod dispatcher;
pub mod migrations;
pub mod rules;
pub mod telemetry;
pub mod transport;

#[cfg(test)]
mod test_support;

pub use config::Config;
pub use db::Database;
pub use delivery_logs::{
    AuditSink, DeliveryLog, DeliveryLogError, DeliveryLogRepository, DeliveryStatus,
    NewDeliveryLog,
};
pub use dispatch::{DeliveryOutcome, DispatchConfig, DispatchEngine, DispatchError, DispatchReport};
pub use dispatcher::{DispatcherConfig, run_dispatcher};
pub use migrations::run_migrations;
pub use telemetry::{TelemetryError, TelemetryGuard, init_telemetry};
pub use transport::{
    InboundEvent, MessageHandle, MessageTransport, TelegramBotClient, TransportError,
};
