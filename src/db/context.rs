//! Database context with automatic event emission.

use sqlx::PgPool;
use std::sync::Arc;

use crate::db::allowlist::AllowlistOps;
use crate::db::alerts::AlertOps;
use crate::db::browser_events::BrowserEventOps;
use crate::db::iocs::IocOps;
use crate::db::job_results::JobResultOps;
use crate::db::jobs::JobOps;
use crate::db::scheduled_tasks::ScheduledTaskOps;
use crate::db::secrets::SecretOps;
use crate::db::seen_domains::SeenDomainOps;
use crate::db::sinks::SinkOps;
use crate::db::sites::SiteOps;
use crate::db::sources::SourceOps;
use crate::events::EventBuffer;

/// Database context that wraps the pool and the domain event buffer.
///
/// Repository operations that should emit events go through this context.
#[derive(Clone)]
pub struct DbContext {
    pool: PgPool,
    events: Arc<EventBuffer>,
}

impl DbContext {
    pub fn new(pool: PgPool, events: Arc<EventBuffer>) -> Self {
        Self { pool, events }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// The in-process domain event buffer.
    pub fn events(&self) -> &EventBuffer {
        &self.events
    }

    pub fn sources(&self) -> SourceOps<'_> {
        SourceOps::new(self)
    }

    pub fn sites(&self) -> SiteOps<'_> {
        SiteOps::new(self)
    }

    pub fn secrets(&self) -> SecretOps<'_> {
        SecretOps::new(self)
    }

    pub fn sinks(&self) -> SinkOps<'_> {
        SinkOps::new(self)
    }

    pub fn jobs(&self) -> JobOps<'_> {
        JobOps::new(self)
    }

    pub fn job_results(&self) -> JobResultOps<'_> {
        JobResultOps::new(self)
    }

    /// Browser-recorded observation events (the `events` table), distinct
    /// from the in-process domain event buffer.
    pub fn browser_events(&self) -> BrowserEventOps<'_> {
        BrowserEventOps::new(self)
    }

    pub fn alerts(&self) -> AlertOps<'_> {
        AlertOps::new(self)
    }

    pub fn seen_domains(&self) -> SeenDomainOps<'_> {
        SeenDomainOps::new(self)
    }

    pub fn allowlist(&self) -> AllowlistOps<'_> {
        AllowlistOps::new(self)
    }

    pub fn iocs(&self) -> IocOps<'_> {
        IocOps::new(self)
    }

    pub fn scheduled_tasks(&self) -> ScheduledTaskOps<'_> {
        ScheduledTaskOps::new(self)
    }
}
