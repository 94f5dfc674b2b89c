use super::Loader;
use worldview_core::model::flux::{
    Flux, FluxHelmChart, FluxHelmRelease, FluxKustomization, FluxRepository, FluxRepositoryKind, FluxResourceSet,
    FluxStatus,
};
use worldview_core::{ApplicationId, ApplicationKind, MetricValues, Time};

const REPOSITORIES: &[(&str, &str, ApplicationKind, FluxRepositoryKind)] = &[
    (
        "fluxcd_git_repository_info",
        "fluxcd_git_repository_status",
        ApplicationKind::GitRepository,
        FluxRepositoryKind::Git,
    ),
    (
        "fluxcd_oci_repository_info",
        "fluxcd_oci_repository_status",
        ApplicationKind::OciRepository,
        FluxRepositoryKind::Oci,
    ),
    (
        "fluxcd_helm_repository_info",
        "fluxcd_helm_repository_status",
        ApplicationKind::HelmRepository,
        FluxRepositoryKind::Helm,
    ),
];

fn suspended(m: &MetricValues) -> bool {
    m.label("suspended") == "true" && m.values.last() == 1.0
}

/// Newer `*_info` series win; a series without a point in the window is ignored.
fn is_newer(m: &MetricValues, last_info: &mut Time) -> bool {
    let (t, v) = m.values.last_not_null();
    if v.is_nan() || t < *last_info {
        return false;
    }
    *last_info = t;
    true
}

impl Loader<'_> {
    /// Flux CD sources, charts, releases, kustomizations and resource sets.
    pub fn load_flux(&mut self) {
        let mut flux = Flux::default();
        for (info, status, kind, repo_kind) in REPOSITORIES {
            self.load_flux_repositories(&mut flux, info, kind, repo_kind);
            self.load_flux_statuses(&mut flux, status, kind);
        }
        self.load_flux_helm_charts(&mut flux);
        self.load_flux_helm_releases(&mut flux);
        self.load_flux_kustomizations(&mut flux);
        self.load_flux_resource_sets(&mut flux);
        if !flux.is_empty() {
            self.world.flux.merge(flux);
        }
    }

    fn flux_id(&self, m: &MetricValues, kind: ApplicationKind) -> ApplicationId {
        ApplicationId::new(&self.cluster_id, m.label("namespace"), kind, m.label("name"))
    }

    /// `<source_kind>/<source_namespace>/<source_name>`, defaulting to the namespace of `owner`.
    fn flux_source_id(&self, owner: &ApplicationId, kind: &str, ns: &str, name: &str) -> ApplicationId {
        let mut id = ApplicationId::new(&self.cluster_id, ns, ApplicationKind::from(kind), name);
        if id.namespace_is_empty() {
            id.namespace = owner.namespace.clone();
        }
        id
    }

    /// Inventory entry ids look like `<namespace>_<name>_<group>_<kind>`.
    fn flux_entry_id(&self, entry: &str) -> Option<ApplicationId> {
        let parts: Vec<&str> = entry.splitn(4, '_').collect();
        match parts.as_slice() {
            [ns, name, _, kind] => Some(ApplicationId::new(&self.cluster_id, ns, ApplicationKind::from(*kind), name)),
            _ => None,
        }
    }

    fn load_flux_repositories(&self, flux: &mut Flux, query: &str, kind: &ApplicationKind, repo_kind: &FluxRepositoryKind) {
        for m in self.metrics(query) {
            let id = self.flux_id(m, kind.clone());
            let repo = flux.repositories.entry(id).or_insert_with(|| FluxRepository {
                kind: repo_kind.clone(),
                ready: FluxStatus::default(),
                url: Default::default(),
                interval: Default::default(),
                suspended: false,
            });
            repo.url.update(&m.values, m.label("url"));
            repo.interval.update(&m.values, m.label("interval"));
            if suspended(m) {
                repo.suspended = true;
            }
        }
    }

    fn load_flux_statuses(&self, flux: &mut Flux, query: &str, kind: &ApplicationKind) {
        for m in self.metrics(query) {
            if m.label("type") != "Ready" {
                continue;
            }
            let id = self.flux_id(m, kind.clone());
            let ready = match kind {
                ApplicationKind::GitRepository | ApplicationKind::OciRepository | ApplicationKind::HelmRepository => {
                    flux.repositories.get_mut(&id).map(|o| &mut o.ready)
                }
                ApplicationKind::HelmChart => flux.helm_charts.get_mut(&id).map(|o| &mut o.ready),
                ApplicationKind::HelmRelease => flux.helm_releases.get_mut(&id).map(|o| &mut o.ready),
                ApplicationKind::Kustomization => flux.kustomizations.get_mut(&id).map(|o| &mut o.ready),
                ApplicationKind::ResourceSet => flux.resource_sets.get_mut(&id).map(|o| &mut o.ready),
                _ => None,
            };
            if let Some(ready) = ready {
                ready.update(m.label("status"), m.label("reason"), &m.values);
            }
        }
    }

    fn load_flux_helm_charts(&self, flux: &mut Flux) {
        for m in self.metrics("fluxcd_helm_chart_info") {
            let id = self.flux_id(m, ApplicationKind::HelmChart);
            let source = self.flux_source_id(&id, m.label("source_kind"), m.label("source_namespace"), m.label("source_name"));
            let chart: &mut FluxHelmChart = flux.helm_charts.entry(id).or_default();
            if !is_newer(m, &mut chart.last_info) {
                continue;
            }
            chart.repository_id = Some(source);
            chart.chart = m.label("chart").to_string();
            chart.version = m.label("version").to_string();
            chart.interval = m.label("interval").to_string();
            if suspended(m) {
                chart.suspended = true;
            }
        }
        self.load_flux_statuses(flux, "fluxcd_helm_chart_status", &ApplicationKind::HelmChart);
    }

    fn load_flux_helm_releases(&self, flux: &mut Flux) {
        for m in self.metrics("fluxcd_helm_release_info") {
            let id = self.flux_id(m, ApplicationKind::HelmRelease);
            let source = if m.label("chart_ref_name").is_empty() {
                self.flux_source_id(&id, m.label("source_kind"), m.label("source_namespace"), m.label("source_name"))
            } else {
                self.flux_source_id(
                    &id,
                    m.label("chart_ref_kind"),
                    m.label("chart_ref_namespace"),
                    m.label("chart_ref_name"),
                )
            };
            let release: &mut FluxHelmRelease = flux.helm_releases.entry(id).or_default();
            if !is_newer(m, &mut release.last_info) {
                continue;
            }
            release.repository_id = Some(source);
            release.chart = m.label("chart").to_string();
            release.version = m.label("version").to_string();
            release.interval = m.label("interval").to_string();
            release.target_namespace = m.label("target_namespace").to_string();
            if suspended(m) {
                release.suspended = true;
            }
        }
        self.load_flux_statuses(flux, "fluxcd_helm_release_status", &ApplicationKind::HelmRelease);
    }

    fn load_flux_kustomizations(&self, flux: &mut Flux) {
        for m in self.metrics("fluxcd_kustomization_info") {
            let id = self.flux_id(m, ApplicationKind::Kustomization);
            let source = self.flux_source_id(&id, m.label("source_kind"), m.label("source_namespace"), m.label("source_name"));
            let k: &mut FluxKustomization = flux.kustomizations.entry(id).or_default();
            if !is_newer(m, &mut k.last_info) {
                continue;
            }
            k.repository_id = Some(source);
            k.path = m.label("path").to_string();
            k.interval = m.label("interval").to_string();
            k.target_namespace = m.label("target_namespace").to_string();
            k.last_applied_revision = m.label("last_applied_revision").to_string();
            k.last_attempted_revision = m.label("last_attempted_revision").to_string();
            if suspended(m) {
                k.suspended = true;
            }
        }
        self.load_flux_statuses(flux, "fluxcd_kustomization_status", &ApplicationKind::Kustomization);

        for m in self.metrics("fluxcd_kustomization_dependency_info") {
            let id = self.flux_id(m, ApplicationKind::Kustomization);
            let dep = self.flux_source_id(&id, "Kustomization", m.label("depends_on_namespace"), m.label("depends_on_name"));
            if !flux.kustomizations.contains_key(&dep) {
                continue;
            }
            if let Some(k) = flux.kustomizations.get_mut(&id) {
                k.depends_on.insert(dep);
            }
        }
        for m in self.metrics("fluxcd_kustomization_inventory_entry_info") {
            let id = self.flux_id(m, ApplicationKind::Kustomization);
            let (Some(k), Some(entry)) = (flux.kustomizations.get_mut(&id), self.flux_entry_id(m.label("entry_id"))) else {
                continue;
            };
            k.inventory_entries.insert(entry);
        }
    }

    fn load_flux_resource_sets(&self, flux: &mut Flux) {
        for m in self.metrics("fluxcd_resourceset_info") {
            let id = self.flux_id(m, ApplicationKind::ResourceSet);
            let rs: &mut FluxResourceSet = flux.resource_sets.entry(id).or_default();
            rs.last_applied_revision.update(&m.values, m.label("last_applied_revision"));
        }
        self.load_flux_statuses(flux, "fluxcd_resourceset_status", &ApplicationKind::ResourceSet);

        for m in self.metrics("fluxcd_resourceset_dependency_info") {
            let id = self.flux_id(m, ApplicationKind::ResourceSet);
            let dep = self.flux_source_id(
                &id,
                m.label("depends_on_kind"),
                m.label("depends_on_namespace"),
                m.label("depends_on_name"),
            );
            if let Some(rs) = flux.resource_sets.get_mut(&id) {
                rs.depends_on.insert(dep);
            }
        }
        for m in self.metrics("fluxcd_resourceset_inventory_entry_info") {
            let id = self.flux_id(m, ApplicationKind::ResourceSet);
            let (Some(rs), Some(entry)) = (flux.resource_sets.get_mut(&id), self.flux_entry_id(m.label("entry_id"))) else {
                continue;
            };
            rs.inventory_entries.insert(entry);
        }
    }
}
