//! Discriminator -> strategy registration table
//!
//! Probers are registered per service type and notifiers per transport
//! method. `build` resolves every configured check and transport, validates
//! each strategy, and subscribes one [`Publisher`] per valid transport to
//! the bus. Unknown discriminators abort the build; invalid settings only
//! exclude the offending strategy. A later build replaces the publishers of
//! the previous one on the bus; a failed build leaves the bus untouched.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use parking_lot::RwLock;

use super::error::{ConfigurationError, RegistryError, ValidationError};
use super::probe::{HttpProber, Monitor, Prober, TcpProber};
use crate::alerts::{
    AlertRuleEvaluator, DeliveryQueue, LogNotifier, Notifier, Publisher, WebhookNotifier,
};
use crate::bus::{ObservationBus, Subscription};
use crate::model::{
    CheckDefinition, ServiceType, TransportBinding, TransportMethod, TransportSettings,
};

pub type ProberFactory = Arc<dyn Fn(&CheckDefinition) -> Box<dyn Prober> + Send + Sync>;
pub type NotifierFactory =
    Arc<dyn Fn(&str, &TransportSettings) -> Box<dyn Notifier> + Send + Sync>;

/// Collaborators a publisher needs, shared by every publisher the registry builds
pub struct PublisherContext {
    pub bus: ObservationBus,
    pub evaluator: Arc<AlertRuleEvaluator>,
    pub queue: Arc<DeliveryQueue>,
}

/// Counts from one build
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BuildSummary {
    pub monitors: usize,
    pub publishers: usize,
    pub rejected: usize,
}

pub struct Registry {
    probers: HashMap<ServiceType, ProberFactory>,
    notifiers: HashMap<TransportMethod, NotifierFactory>,
    monitors: RwLock<Vec<Arc<Monitor>>>,
    publishers: RwLock<Vec<Arc<Publisher>>>,
    subscriptions: RwLock<Vec<Subscription>>,
    rejected: RwLock<Vec<ValidationError>>,
}

impl Registry {
    /// Empty registration table
    pub fn new() -> Self {
        Self {
            probers: HashMap::new(),
            notifiers: HashMap::new(),
            monitors: RwLock::new(Vec::new()),
            publishers: RwLock::new(Vec::new()),
            subscriptions: RwLock::new(Vec::new()),
            rejected: RwLock::new(Vec::new()),
        }
    }

    /// Table with the built-in http/tcp probers and log/webhook notifiers
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register_prober(ServiceType::Http, |check| Box::new(HttpProber::new(check)));
        registry.register_prober(ServiceType::Tcp, |check| Box::new(TcpProber::new(check)));
        registry.register_notifier(TransportMethod::Log, |name, _| {
            Box::new(LogNotifier::new(name))
        });
        registry.register_notifier(TransportMethod::Webhook, |name, settings| {
            Box::new(WebhookNotifier::from_settings(name, settings))
        });
        registry
    }

    pub fn register_prober<F>(&mut self, service_type: ServiceType, factory: F)
    where
        F: Fn(&CheckDefinition) -> Box<dyn Prober> + Send + Sync + 'static,
    {
        self.probers.insert(service_type, Arc::new(factory));
    }

    pub fn register_notifier<F>(&mut self, method: TransportMethod, factory: F)
    where
        F: Fn(&str, &TransportSettings) -> Box<dyn Notifier> + Send + Sync + 'static,
    {
        self.notifiers.insert(method, Arc::new(factory));
    }

    /// Build and validate the prober for a check
    pub fn resolve_prober(
        &self,
        check: &CheckDefinition,
    ) -> Result<Arc<dyn Prober>, RegistryError> {
        let factory = self.probers.get(&check.service_type).ok_or_else(|| {
            ConfigurationError::UnknownServiceType {
                check: check.name.clone(),
                service_type: check.service_type,
            }
        })?;

        let prober: Arc<dyn Prober> = Arc::from(factory(check));
        prober.validate()?;
        Ok(prober)
    }

    /// Build and validate the notifier a binding refers to
    pub fn resolve_notifier(
        &self,
        check_name: &str,
        binding: &TransportBinding,
        transports: &HashMap<String, TransportSettings>,
    ) -> Result<Arc<dyn Notifier>, RegistryError> {
        let settings = Self::transport_settings(check_name, binding, transports)?;

        let factory = self.notifiers.get(&settings.method).ok_or_else(|| {
            ConfigurationError::UnknownTransportMethod {
                transport: binding.transport_name.clone(),
                method: settings.method,
            }
        })?;

        let notifier: Arc<dyn Notifier> = Arc::from(factory(&binding.transport_name, settings));
        notifier.validate()?;
        Ok(notifier)
    }

    fn transport_settings<'a>(
        check_name: &str,
        binding: &TransportBinding,
        transports: &'a HashMap<String, TransportSettings>,
    ) -> Result<&'a TransportSettings, ConfigurationError> {
        let settings = transports.get(&binding.transport_name).ok_or_else(|| {
            ConfigurationError::UnknownTransport {
                check: check_name.to_string(),
                transport: binding.transport_name.clone(),
            }
        })?;

        if settings.method != binding.transport_method {
            return Err(ConfigurationError::MethodMismatch {
                check: check_name.to_string(),
                transport: binding.transport_name.clone(),
                binding: binding.transport_method,
                configured: settings.method,
            });
        }

        Ok(settings)
    }

    /// Resolve every check and transport, replacing the live sets.
    pub fn build(
        &self,
        checks: &[CheckDefinition],
        transports: &HashMap<String, TransportSettings>,
        context: &PublisherContext,
    ) -> Result<BuildSummary, ConfigurationError> {
        let mut monitors = Vec::new();
        let mut rejected = Vec::new();

        for check in checks {
            match self.resolve_prober(check) {
                Ok(prober) => monitors.push(Arc::new(Monitor::new(check.clone(), prober))),
                Err(RegistryError::Validation(e)) => {
                    tracing::warn!(check = %check.name, error = %e, "Prober rejected");
                    rejected.push(e);
                }
                Err(RegistryError::Configuration(e)) => return Err(e),
            }
        }

        // transport name -> (first binding, bound checks); ordered for stable subscription order
        let mut by_transport: BTreeMap<&str, (&TransportBinding, &str, Vec<CheckDefinition>)> =
            BTreeMap::new();
        for check in checks {
            for binding in &check.transports {
                Self::transport_settings(&check.name, binding, transports)?;
                let (_, _, bound) = by_transport
                    .entry(binding.transport_name.as_str())
                    .or_insert_with(|| (binding, check.name.as_str(), Vec::new()));
                if !bound.iter().any(|c| c.name == check.name) {
                    bound.push(check.clone());
                }
            }
        }

        let mut publishers = Vec::new();
        for (name, (binding, first_check, bound)) in by_transport {
            let notifier = match self.resolve_notifier(first_check, binding, transports) {
                Ok(notifier) => notifier,
                Err(RegistryError::Validation(e)) => {
                    tracing::warn!(transport = %name, error = %e, "Notifier rejected");
                    rejected.push(e);
                    continue;
                }
                Err(RegistryError::Configuration(e)) => return Err(e),
            };

            let settings = transports.get(name).cloned().ok_or_else(|| {
                ConfigurationError::UnknownTransport {
                    check: first_check.to_string(),
                    transport: name.to_string(),
                }
            })?;

            publishers.push(Arc::new(Publisher::new(
                name,
                settings,
                notifier,
                bound,
                Arc::clone(&context.evaluator),
                Arc::clone(&context.queue),
            )));
        }

        let mut subscriptions = Vec::with_capacity(publishers.len());
        for publisher in &publishers {
            match context.bus.subscribe(publisher.clone()) {
                Ok(subscription) => subscriptions.push(subscription),
                Err(e) => {
                    for subscription in &subscriptions {
                        subscription.unsubscribe();
                    }
                    return Err(e.into());
                }
            }
            tracing::info!(
                transport = %publisher.transport_name(),
                method = %publisher.method(),
                checks = publisher.check_names().len(),
                "Publisher registered"
            );
        }

        let previous = std::mem::replace(&mut *self.subscriptions.write(), subscriptions);
        for subscription in previous {
            subscription.unsubscribe();
        }

        let summary = BuildSummary {
            monitors: monitors.len(),
            publishers: publishers.len(),
            rejected: rejected.len(),
        };

        *self.monitors.write() = monitors;
        *self.publishers.write() = publishers;
        *self.rejected.write() = rejected;

        Ok(summary)
    }

    /// Live, validated probers
    pub fn monitors(&self) -> Vec<Arc<Monitor>> {
        self.monitors.read().clone()
    }

    /// Live, validated publishers
    pub fn publishers(&self) -> Vec<Arc<Publisher>> {
        self.publishers.read().clone()
    }

    /// Strategies excluded by validation
    pub fn rejected(&self) -> Vec<ValidationError> {
        self.rejected.read().clone()
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::with_defaults()
    }
}
