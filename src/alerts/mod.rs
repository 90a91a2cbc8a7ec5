//! Alert decisions and delivery
//!
//! Evaluates each observation against the bindings of every configured
//! transport, keeps per (check, transport) rule state, and hands alerts to
//! notifiers through a bounded delivery queue.

pub mod delivery;
pub mod message;
pub mod notifier;
pub mod publisher;
pub mod rule;

pub use delivery::{DeliveryJob, DeliveryQueue};
pub use message::AlertMessage;
pub use notifier::{DeliveryError, LogNotifier, Notifier, WebhookNotifier};
pub use publisher::Publisher;
pub use rule::{evaluate, AlertDecision, AlertRuleEvaluator, RuleKey, RuleState};
