use std::sync::Arc;

use invoicer_core::{
    Config, DownloadPackager, EventBus, InvoiceService, ReimbursementSetAggregate,
    ReimbursementSetService, SanitizedConfig, UploadOrchestrator,
};

use crate::api::WsBroadcaster;

/// Shared application state
pub struct AppState {
    config: Config,
    uploads: Arc<UploadOrchestrator>,
    exports: Arc<DownloadPackager>,
    invoices: InvoiceService,
    sets: ReimbursementSetService,
    set_aggregate: Arc<ReimbursementSetAggregate>,
    bus: EventBus,
    ws_broadcaster: WsBroadcaster,
}

impl AppState {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: Config,
        uploads: Arc<UploadOrchestrator>,
        exports: Arc<DownloadPackager>,
        invoices: InvoiceService,
        sets: ReimbursementSetService,
        set_aggregate: Arc<ReimbursementSetAggregate>,
        bus: EventBus,
        ws_broadcaster: WsBroadcaster,
    ) -> Self {
        Self {
            config,
            uploads,
            exports,
            invoices,
            sets,
            set_aggregate,
            bus,
            ws_broadcaster,
        }
    }

    pub fn sanitized_config(&self) -> SanitizedConfig {
        SanitizedConfig::from(&self.config)
    }

    pub fn uploads(&self) -> &UploadOrchestrator {
        &self.uploads
    }

    pub fn exports(&self) -> &DownloadPackager {
        &self.exports
    }

    pub fn invoices(&self) -> &InvoiceService {
        &self.invoices
    }

    pub fn sets(&self) -> &ReimbursementSetService {
        &self.sets
    }

    pub fn set_aggregate(&self) -> &ReimbursementSetAggregate {
        &self.set_aggregate
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn ws_broadcaster(&self) -> &WsBroadcaster {
        &self.ws_broadcaster
    }
}
