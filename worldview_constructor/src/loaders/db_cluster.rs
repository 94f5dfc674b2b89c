use super::Loader;
use std::collections::BTreeMap;
use tracing::debug;
use worldview_core::model::AppIdx;
use worldview_core::{ApplicationId, ApplicationKind};

impl Loader<'_> {
    /// Moves the components of operator-managed databases into one
    /// `DatabaseCluster` application per cluster name. The applications they
    /// came from are marked removed and dropped by the final compaction.
    pub fn join_db_clusters(&mut self) {
        let mut moves: BTreeMap<AppIdx, ApplicationId> = BTreeMap::new();
        for (idx, app) in self.world.applications.iter().enumerate() {
            if app.id.kind == ApplicationKind::DatabaseCluster {
                continue;
            }
            let cluster_name = self
                .world
                .app_instances(idx)
                .map(|i| i.cluster_name.value())
                .find(|n| !n.is_empty());
            if let Some(name) = cluster_name {
                let id = ApplicationId::new(&app.id.cluster_id, &app.id.namespace, ApplicationKind::DatabaseCluster, name);
                moves.insert(idx, id);
            }
        }
        if moves.is_empty() {
            return;
        }

        let mut targets: BTreeMap<AppIdx, AppIdx> = BTreeMap::new();
        for (from, id) in moves {
            debug!("{} joins {}", self.world.applications[from].id, id);
            let to = self.world.get_or_create_application(id, false);
            for instance in self.world.applications[from].instances.clone() {
                self.world.reassign_instance(instance, to);
            }
            self.world.applications[from].removed = true;
            targets.insert(from, to);
        }
        for c in &mut self.world.connections {
            if let Some(to) = c.remote_application.and_then(|a| targets.get(&a)) {
                c.remote_application = Some(*to);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::{constant, ctx, mv};
    use super::super::Loader;
    use std::collections::BTreeMap;
    use worldview_core::{ApplicationKind, MetricValues, World};
    use worldview_query::QueryResults;

    fn pod(name: &str, owner: &str, uid: &str) -> MetricValues {
        mv(
            &[
                ("namespace", "db"),
                ("pod", name),
                ("uid", uid),
                ("created_by_kind", "StatefulSet"),
                ("created_by_name", owner),
            ],
            constant(1.0),
        )
    }

    #[test]
    fn test_join_db_cluster() {
        let labels = |uid: &str, role: &str| {
            mv(
                &[("uid", uid), ("label_cnpg_io_cluster", "main"), ("label_role", role)],
                constant(1.0),
            )
        };
        let metrics: QueryResults = vec![
            (
                "kube_pod_info".to_string(),
                vec![pod("main-0", "main", "u0"), pod("main-1", "main", "u1"), pod("web-0", "web", "u2")],
            ),
            (
                "kube_pod_labels".to_string(),
                vec![labels("u0", "primary"), labels("u1", "replica")],
            ),
        ]
        .into_iter()
        .collect();
        let raw = QueryResults::new();
        let mut loader = Loader::new(World::new(ctx()), &metrics, &raw, ctx(), "c1", BTreeMap::new());
        loader.load_k8s();
        loader.join_db_clusters();
        let mut w = loader.into_world();
        w.compact();

        let clusters: Vec<_> = w
            .applications
            .iter()
            .filter(|a| a.id.kind == ApplicationKind::DatabaseCluster)
            .collect();
        assert_eq!(clusters.len(), 1);
        assert_eq!(clusters[0].id.name, "main");
        assert_eq!(clusters[0].instances.len(), 2);
        assert!(!w.applications.iter().any(|a| a.id.kind == ApplicationKind::StatefulSet && a.id.name == "main"));
        assert!(w.applications.iter().any(|a| a.id.name == "web"));
    }
}
