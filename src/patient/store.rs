use std::sync::Arc;
use futures::future::try_join_all;
use tracing::{debug, info, warn};

use crate::config::StoreConfig;
use crate::error::{Error, Result};
use crate::identity::{IdGenerator, PatientId};
use crate::shard::{
    FanOutExecutor, FanOutPolicy, HashScheme, ShardConnectionSet, ShardHealth, ShardIndex, ShardRouter,
};
use super::model::{Patient, PatientDetails};
use super::page::Page;
use super::sql;

const CONFLICT_MESSAGE: &str = "a patient with the same contact information already exists";

/// Public entry point of the data-access layer.
///
/// Writes go to the owning shard's master, point reads to its replica, and
/// list, search and contact checks fan out across every replica. Cheap to
/// clone; clones share connections and the identifier generator.
#[derive(Debug, Clone)]
pub struct PatientStore {
    router: ShardRouter,
    shards: ShardConnectionSet,
    ids: Arc<dyn IdGenerator>,
    fan_out: FanOutExecutor,
}

impl PatientStore {
    /// Opens every shard endpoint named in `config`.
    ///
    /// Does not create tables; call [`PatientStore::ensure_schema`] for that.
    pub async fn connect(config: StoreConfig) -> Result<Self> {
        config.validate()?;
        let shards = ShardConnectionSet::connect(&config).await?;
        let ids = config.id_strategy.build(config.sequential_start);

        info!(
            shards = shards.len(),
            id_strategy = ?config.id_strategy,
            fan_out = ?config.fan_out_policy,
            timeout_ms = config.request_timeout.as_millis() as u64,
            "patient store connected"
        );
        Self::with_scheme(shards, ids, config.fan_out_policy, config.hash_scheme)
    }

    /// Assembles a store from handles opened elsewhere
    pub fn new(shards: ShardConnectionSet, ids: Arc<dyn IdGenerator>, policy: FanOutPolicy) -> Result<Self> {
        Self::with_scheme(shards, ids, policy, HashScheme::default())
    }

    fn with_scheme(
        shards: ShardConnectionSet,
        ids: Arc<dyn IdGenerator>,
        policy: FanOutPolicy,
        scheme: HashScheme,
    ) -> Result<Self> {
        Ok(Self {
            router: ShardRouter::with_scheme(shards.len(), scheme)?,
            shards,
            ids,
            fan_out: FanOutExecutor::new(policy),
        })
    }

    /// Creates missing tables and indexes on every master.
    pub async fn ensure_schema(&self) -> Result<()> {
        let masters = self.shards.masters();
        try_join_all(masters.iter().map(sql::ensure_schema)).await?;
        info!(shards = masters.len(), "patient schema ready");
        Ok(())
    }

    /// Shard that owns `id`
    pub fn shard_of(&self, id: &PatientId) -> ShardIndex {
        self.router.route(id)
    }

    /// Router in use
    pub fn router(&self) -> &ShardRouter {
        &self.router
    }

    /// Pings every master and replica
    pub async fn health(&self) -> Vec<ShardHealth> {
        self.shards.health().await
    }

    /// Creates a patient on the shard its new identifier routes to.
    ///
    /// Fails with `Conflict` if any contact value is registered anywhere. The
    /// check and the insert are not atomic, so two racing creates on different
    /// shards can both pass the check.
    pub async fn create_patient(&self, details: PatientDetails) -> Result<Patient> {
        let id = self.ids.generate_id()?;
        let shard = self.router.route(&id);

        if self.exists_by_contact(&details.contact_values(), None).await? {
            debug!(patient_id = %id, shard = %shard, "create rejected: contact already registered");
            return Err(Error::conflict(CONFLICT_MESSAGE));
        }

        let patient = Patient::from_details(id, details);
        let master = self.shards.master(shard)?;
        sql::insert(master, &patient).await.map_err(|err| self.log_expected(&id, err))?;

        info!(patient_id = %id, shard = %shard, "patient created");
        Ok(patient)
    }

    /// Reads a patient from its shard's replica.
    ///
    /// A patient created a moment ago may not be visible yet.
    pub async fn get_patient(&self, id: &PatientId) -> Result<Patient> {
        let replica = self.shards.replica(self.router.route(id))?;
        match sql::fetch(replica, id).await? {
            Some(patient) => Ok(patient),
            None => Err(self.log_expected(id, Error::NotFound(*id))),
        }
    }

    /// Replaces the caller-controlled fields of a patient.
    ///
    /// The secondary address and the contact set are replaced wholesale. The
    /// active flag and reason are kept. The conflict check runs before the
    /// existence check.
    pub async fn update_patient(&self, id: &PatientId, details: PatientDetails) -> Result<Patient> {
        let shard = self.router.route(id);

        if self.exists_by_contact(&details.contact_values(), Some(id)).await? {
            debug!(patient_id = %id, shard = %shard, "update rejected: contact already registered");
            return Err(Error::conflict(CONFLICT_MESSAGE));
        }

        let master = self.shards.master(shard)?;
        let mut patient = match sql::fetch(master, id).await? {
            Some(patient) => patient,
            None => return Err(self.log_expected(id, Error::NotFound(*id))),
        };
        patient.apply(details);
        sql::replace(master, &patient).await.map_err(|err| self.log_expected(id, err))?;

        info!(patient_id = %id, shard = %shard, "patient updated");
        Ok(patient)
    }

    /// Marks a patient inactive and records why. Repeating it overwrites the
    /// reason.
    pub async fn deactivate_patient(&self, id: &PatientId, reason: &str) -> Result<()> {
        let shard = self.router.route(id);
        let master = self.shards.master(shard)?;

        if !sql::deactivate(master, id, reason).await? {
            return Err(self.log_expected(id, Error::NotFound(*id)));
        }
        info!(patient_id = %id, shard = %shard, "patient deactivated");
        Ok(())
    }

    /// Every patient, grouped by shard in shard order.
    ///
    /// Under best-effort, shards that did not answer are skipped and logged.
    pub async fn list_patients(&self) -> Result<Vec<Patient>> {
        let merged = self
            .fan_out
            .collect(&self.shards.replicas(), |conn| async move { sql::search(&conn, None).await })
            .await?;
        if !merged.unavailable.is_empty() {
            warn!(unavailable = ?merged.unavailable, "patient list is partial");
        }
        Ok(merged.items)
    }

    /// Patients whose names, date of birth (`YYYY-MM-DD`) or any contact value
    /// contain `term`, case-sensitively.
    ///
    /// Results are concatenated in shard order without a global sort, then cut
    /// into pages. An empty or absent term matches every patient.
    pub async fn search_patients(&self, term: Option<&str>, page: usize, page_size: usize) -> Result<Page<Patient>> {
        let term = term.filter(|t| !t.is_empty()).map(str::to_owned);

        let merged = self
            .fan_out
            .collect(&self.shards.replicas(), |conn| {
                let term = term.clone();
                async move { sql::search(&conn, term.as_deref()).await }
            })
            .await?;

        let result = Page::paginate(merged.items, page, page_size).with_unavailable(merged.unavailable);
        debug!(
            total = result.total_count,
            page = result.page_index,
            complete = result.is_complete(),
            "search finished"
        );
        Ok(result)
    }

    /// Whether any of `values` belongs to a patient other than `exclude`, on
    /// any shard.
    ///
    /// Every replica must answer; an unavailable shard fails the check whatever
    /// the configured fan-out policy.
    pub async fn exists_by_contact(&self, values: &[String], exclude: Option<&PatientId>) -> Result<bool> {
        if values.is_empty() {
            return Ok(false);
        }
        let exclude = exclude.copied();

        self.fan_out
            .any(&self.shards.replicas(), |conn| {
                let values = values.to_vec();
                async move { sql::contact_exists(&conn, &values, exclude.as_ref()).await }
            })
            .await
    }

    fn log_expected(&self, id: &PatientId, err: Error) -> Error {
        if err.is_expected() {
            debug!(patient_id = %id, shard = %self.router.route(id), error = %err, "expected outcome");
        }
        err
    }
}
