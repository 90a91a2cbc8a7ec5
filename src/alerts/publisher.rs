//! Report observer for one named transport

use std::sync::Arc;

use super::delivery::{DeliveryJob, DeliveryQueue};
use super::message::AlertMessage;
use super::notifier::Notifier;
use super::rule::{AlertRuleEvaluator, RuleKey};
use crate::bus::{ObserverError, ReportObserver};
use crate::model::{
    CheckDefinition, ObservationError, Report, TransportMethod, TransportSettings,
};

/// Evaluates every binding that references one transport and queues the
/// resulting alerts for its notifier
pub struct Publisher {
    transport_name: String,
    settings: TransportSettings,
    notifier: Arc<dyn Notifier>,
    checks: Vec<CheckDefinition>,
    evaluator: Arc<AlertRuleEvaluator>,
    queue: Arc<DeliveryQueue>,
}

impl Publisher {
    pub fn new(
        transport_name: impl Into<String>,
        settings: TransportSettings,
        notifier: Arc<dyn Notifier>,
        checks: Vec<CheckDefinition>,
        evaluator: Arc<AlertRuleEvaluator>,
        queue: Arc<DeliveryQueue>,
    ) -> Self {
        Self {
            transport_name: transport_name.into(),
            settings,
            notifier,
            checks,
            evaluator,
            queue,
        }
    }

    pub fn transport_name(&self) -> &str {
        &self.transport_name
    }

    pub fn method(&self) -> TransportMethod {
        self.notifier.method()
    }

    /// Names of the checks bound to this transport
    pub fn check_names(&self) -> Vec<String> {
        self.checks.iter().map(|c| c.name.clone()).collect()
    }

    /// Evaluate one report; returns the number of alerts raised
    pub fn process(&self, report: &Report) -> usize {
        let now = report.timestamp.with_timezone(&self.settings.offset());
        let mut raised = 0;

        for check in &self.checks {
            let Some(observation) = report.observation(&check.name) else {
                let err = ObservationError::MissingEntry(check.name.clone());
                tracing::warn!(transport = %self.transport_name, error = %err, "Skipping check");
                continue;
            };

            let key = RuleKey::new(&check.name, &self.transport_name);
            let binding = check.binding(&self.transport_name);
            let decision = self.evaluator.evaluate(&key, &observation, binding, &now);

            if !decision.alert {
                continue;
            }
            raised += 1;

            let message = AlertMessage::compose(check, &observation, &now, decision.recovered);
            let job = DeliveryJob {
                check_name: check.name.clone(),
                notifier: Arc::clone(&self.notifier),
                message,
            };

            if let Err(e) = self.queue.enqueue(job) {
                tracing::warn!(
                    check = %check.name,
                    transport = %self.transport_name,
                    error = %e,
                    "Alert not queued"
                );
            }
        }

        raised
    }
}

impl ReportObserver for Publisher {
    fn name(&self) -> &str {
        &self.transport_name
    }

    fn on_report(&self, report: &Report) -> Result<(), ObserverError> {
        self.process(report);
        Ok(())
    }
}
