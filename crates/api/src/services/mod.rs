//! Adapters from domain ports to external services.

pub mod webhook_notifier;

pub use webhook_notifier::WebhookNotifier;
