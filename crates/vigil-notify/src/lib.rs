pub mod config;
pub mod dedup;
pub mod dispatcher;
pub mod message;
pub mod notifier;
pub mod providers;
pub mod retry;

pub use config::{AlertsConfig, ChannelConfig, ChannelTransport, DedupConfig, RetryConfig};
pub use dedup::{
    finding_set_hash, AlertDeduplicator, AlertDispatchRecord, DispatchOutcome, PendingWrite,
};
pub use dispatcher::{AlertDispatcher, RegisteredChannel};
pub use message::AlertMessage;
pub use notifier::{NotifyError, Notifier};
pub use providers::{EmailConfig, EmailNotifier, SlackConfig, SlackNotifier, WebhookConfig, WebhookNotifier};
pub use retry::{retry_with_backoff, RetryPolicy};
