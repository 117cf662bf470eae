//! Single call surface: classify, route, dispatch.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::RouterConfig;
use crate::dispatch::{AdapterSet, DispatchResult, Dispatcher};
use crate::error::{ConfigError, RouteError, RouterError};
use crate::otel;
use crate::registry::BackendRegistry;
use crate::router::{Router, RoutingDecision, TaskClassifier};
use crate::types::TaskRequest;

/// Owns the classifier, router and dispatcher over a shared registry.
#[derive(Debug)]
pub struct RoutingService {
    registry: Arc<BackendRegistry>,
    classifier: TaskClassifier,
    router: Router,
    dispatcher: Dispatcher,
}

impl RoutingService {
    pub fn new(
        registry: Arc<BackendRegistry>,
        adapters: AdapterSet,
        config: RouterConfig,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        for profile in registry.snapshot().iter().map(|(_, p)| p) {
            if !adapters.contains(&profile.id) {
                warn!(backend = %profile.id, "Registered backend has no adapter");
            }
        }
        Ok(Self {
            registry,
            classifier: TaskClassifier::new(config.classifier),
            router: Router::new(config.policy),
            dispatcher: Dispatcher::new(adapters, config.dispatch),
        })
    }

    pub fn registry(&self) -> &Arc<BackendRegistry> {
        &self.registry
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Classify and rank against the current registry snapshot. No I/O.
    pub fn plan(&self, request: &TaskRequest) -> Result<RoutingDecision, RouteError> {
        let span = otel::route_span(&request.id.to_string(), &request.label);
        let _guard = span.enter();

        let vector = self.classifier.classify(request);
        let snapshot = self.registry.snapshot();
        match self.router.route(&vector, &snapshot) {
            Ok(decision) => {
                otel::record_route_result(
                    &span,
                    decision.primary().map(|p| p.backend.as_str()),
                    decision.len(),
                );
                info!(
                    request_id = %request.id,
                    candidates = decision.len(),
                    rationale = %decision.rationale,
                    "Routing decision"
                );
                Ok(decision)
            }
            Err(e) => {
                otel::record_route_result(&span, None, 0);
                warn!(request_id = %request.id, error = %e, "Routing failed");
                Err(e)
            }
        }
    }

    pub async fn execute(&self, request: &TaskRequest) -> Result<DispatchResult, RouterError> {
        self.execute_with_cancel(request, &CancellationToken::new())
            .await
    }

    pub async fn execute_with_cancel(
        &self,
        request: &TaskRequest,
        cancel: &CancellationToken,
    ) -> Result<DispatchResult, RouterError> {
        let decision = self.plan(request)?;
        let result = self
            .dispatcher
            .dispatch_with_cancel(&decision, request, cancel)
            .await?;
        Ok(result)
    }
}
