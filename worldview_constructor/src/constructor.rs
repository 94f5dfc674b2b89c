use crate::config::{ClusterConfig, ProjectConfig};
use crate::loaders::Loader;
use crate::multicluster;
use crate::profile::Profile;
use crate::queries::{raw_from, raw_step, QueryPlan};
use crate::recording_rules::{self, RecordingRuleStore, SharedRecordingRuleStore};
use anyhow::Context as _;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};
use worldview_core::model::{CheckConfigs, MAX_ALERT_RULE_WINDOW};
use worldview_core::{Context, World};
use worldview_query::cache::ProjectCache;
use worldview_query::selector::{add_extra_selector, parse_selector};
use worldview_query::{
    parallel_query_range, CacheClient, CancellationToken, DynPromClient, ExecutorConfig, QueryResults, QueryStats,
    StaticPromClient,
};

/// Where the metrics of a world come from.
#[derive(Clone)]
pub enum QuerySource {
    /// Straight to the backend; templates are rendered per cluster.
    Prometheus(DynPromClient),
    /// Through a project cache, which renders and fetches on its own.
    Cache(Arc<ProjectCache>),
    /// In-memory series keyed by query name instead of query text.
    Fixture(Arc<StaticPromClient>),
}

/// Builds worlds of one project.
///
/// Recording rules computed from one world are kept in the constructor and
/// fed into the next build.
pub struct Constructor {
    config: ProjectConfig,
    source: QuerySource,
    recording_rules: SharedRecordingRuleStore,
}

impl Constructor {
    pub fn new(config: ProjectConfig, source: QuerySource) -> Self {
        Self {
            config,
            source,
            recording_rules: RecordingRuleStore::shared(MAX_ALERT_RULE_WINDOW),
        }
    }

    pub fn config(&self) -> &ProjectConfig {
        &self.config
    }

    pub fn recording_rules(&self) -> SharedRecordingRuleStore {
        self.recording_rules.clone()
    }

    /// Queries every cluster of the project over `ctx`, builds one world per
    /// cluster and merges them.
    ///
    /// Fails only on cancellation or an invalid cluster selector; failed
    /// queries leave their part of the world empty and show up in the
    /// returned profile.
    pub async fn load_world(&self, token: &CancellationToken, ctx: Context) -> anyhow::Result<(World, Profile)> {
        let mut profile = Profile::new();
        let check_configs = self.config.effective_check_configs();
        let raw_ctx = Context::new(
            raw_from(ctx.to),
            ctx.to,
            raw_step(self.config.prometheus.effective_refresh_interval(), ctx.step),
        );
        // one client per build so that every query sees the same cache snapshot
        let client = self.client();

        let mut clusters = self.config.cluster_list();
        clusters.sort_by(|a, b| a.id.cmp(&b.id));

        let mut worlds = Vec::with_capacity(clusters.len());
        for cluster in &clusters {
            let plan = QueryPlan::new(&check_configs, &cluster.id, true, true);
            let stage = profile.stage("query");
            let (metrics, stats) = self
                .query(token, &client, cluster, plan.templates(false), &ctx)
                .await
                .with_context(|| format!("cluster '{}'", cluster.id))?;
            profile.add_queries(stats);
            let (raw_metrics, stats) = self
                .query(token, &client, cluster, plan.templates(true), &raw_ctx)
                .await
                .with_context(|| format!("cluster '{}'", cluster.id))?;
            profile.add_queries(stats);
            profile.finish(stage);

            let world = self.build_world(cluster, &check_configs, ctx, raw_ctx, &metrics, &raw_metrics, &mut profile);
            worlds.push(world);
        }

        let stage = profile.stage("multicluster");
        let mut world = multicluster::merge(worlds, ctx);
        world.check_configs = check_configs;
        profile.finish(stage);

        let failed = profile.failed_queries().count();
        if failed > 0 {
            warn!("{} of {} queries failed", failed, profile.queries.len());
        }
        info!(
            "World of project '{}' built: {} nodes, {} applications, {} instances, {} connections",
            self.config.project_id,
            world.nodes.len(),
            world.applications.len(),
            world.instances.len(),
            world.connections.len()
        );
        Ok((world, profile))
    }

    fn client(&self) -> DynPromClient {
        match &self.source {
            QuerySource::Prometheus(client) => client.clone(),
            QuerySource::Cache(project) => Arc::new(CacheClient::new(project.clone())),
            QuerySource::Fixture(fixture) => fixture.clone(),
        }
    }

    async fn query(
        &self,
        token: &CancellationToken,
        client: &DynPromClient,
        cluster: &ClusterConfig,
        templates: BTreeMap<String, String>,
        ctx: &Context,
    ) -> anyhow::Result<(QueryResults, BTreeMap<String, QueryStats>)> {
        if templates.is_empty() {
            return Ok((QueryResults::new(), BTreeMap::new()));
        }
        let matchers = parse_selector(&cluster.extra_selector)?;
        let (queries, cfg) = match &self.source {
            QuerySource::Prometheus(_) => (templates, ExecutorConfig::from_cache_config(&self.config.cache, matchers)),
            QuerySource::Cache(_) => {
                let queries = templates
                    .into_iter()
                    .map(|(name, t)| {
                        let t = add_extra_selector(&t, &matchers);
                        (name, t)
                    })
                    .collect();
                (queries, ExecutorConfig::passthrough())
            }
            QuerySource::Fixture(_) => {
                let queries = templates.into_keys().map(|name| (name.clone(), name)).collect();
                (queries, ExecutorConfig::passthrough())
            }
        };
        debug!("cluster '{}': {} queries over {}..{}", cluster.id, queries.len(), ctx.from, ctx.to);
        let res = parallel_query_range(token, client.clone(), ctx.from, ctx.to, ctx.step, &queries, &cfg).await?;
        Ok(res)
    }

    /// Runs the loaders of one cluster in order. Each phase reads what the
    /// previous ones left in the world.
    #[allow(clippy::too_many_arguments)]
    pub fn build_world(
        &self,
        cluster: &ClusterConfig,
        check_configs: &CheckConfigs,
        ctx: Context,
        raw_ctx: Context,
        metrics: &QueryResults,
        raw_metrics: &QueryResults,
        profile: &mut Profile,
    ) -> World {
        let mut world = World::new(ctx);
        world.check_configs = check_configs.clone();
        world.cluster_names.insert(cluster.id.clone(), cluster.name.clone());
        let mut loader = Loader::new(
            world,
            metrics,
            raw_metrics,
            raw_ctx,
            &cluster.id,
            self.config.instrumented_ports(),
        );

        let stage = profile.stage("nodes");
        loader.load_job_statuses();
        loader.load_nodes();
        loader.load_fargate_nodes();
        profile.finish(stage);

        let stage = profile.stage("k8s");
        loader.load_k8s();
        profile.finish(stage);

        let stage = profile.stage("aws");
        loader.load_rds();
        loader.load_elasticache();
        loader.load_aws_errors();
        loader.finalize_disks();
        profile.finish(stage);

        let stage = profile.stage("containers");
        loader.load_containers();
        loader.load_fargate_containers();
        profile.finish(stage);

        let stage = profile.stage("runtimes");
        loader.load_runtimes();
        profile.finish(stage);

        let stage = profile.stage("connections");
        loader.load_connections();
        profile.finish(stage);

        let stage = profile.stage("databases");
        loader.load_databases();
        loader.join_db_clusters();
        loader.world.rebuild_links();
        profile.finish(stage);

        let stage = profile.stage("dns_traffic_flux");
        loader.load_dns();
        loader.load_traffic();
        loader.load_flux();
        loader.load_fqdns();
        profile.finish(stage);

        let stage = profile.stage("recording_rules");
        let rr = recording_rules::compute(&loader.world, &loader.container_logs);
        match self.recording_rules.lock() {
            Ok(mut store) => {
                store.ingest(&rr);
                let current = store.query_all(&ctx);
                let raw = store.query_all(&raw_ctx);
                loader.set_recording_rules(current, raw);
            }
            Err(_) => {
                warn!("recording rule store is poisoned, using this build's rules only");
                loader.set_recording_rules(rr.clone(), rr);
            }
        }
        loader.load_app_links();
        profile.finish(stage);

        loader.world.categorize(&self.config.categories());

        let stage = profile.stage("slis");
        loader.load_logs();
        loader.load_slis();
        profile.finish(stage);

        let stage = profile.stage("deployments_events");
        loader.load_deployments();
        loader.calc_events();
        profile.finish(stage);

        let mut world = loader.into_world();
        world.compact();
        world
    }
}
