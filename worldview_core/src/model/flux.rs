use super::id::ApplicationId;
use super::labels::LabelLastValue;
use super::status::Status;
use crate::timeseries::{Time, TimeSeries};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, Default, Serialize)]
pub struct FluxStatus {
    pub status: Status,
    pub reason: LabelLastValue,
}

impl FluxStatus {
    /// `Ready` condition: "True" is OK, anything else a warning with its reason.
    pub fn update(&mut self, ready: &str, reason: &str, series: &TimeSeries) {
        if series.last().is_nan() || series.last() <= 0.0 {
            return;
        }
        self.status = if ready == "True" { Status::Ok } else { Status::Warning };
        self.reason.update(series, reason);
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FluxRepositoryKind {
    Git,
    Oci,
    Helm,
}

#[derive(Debug, Clone, Serialize)]
pub struct FluxRepository {
    pub kind: FluxRepositoryKind,
    pub ready: FluxStatus,
    pub url: LabelLastValue,
    pub interval: LabelLastValue,
    pub suspended: bool,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct FluxHelmChart {
    pub ready: FluxStatus,
    pub chart: String,
    pub version: String,
    pub interval: String,
    pub repository_id: Option<ApplicationId>,
    pub last_info: Time,
    pub suspended: bool,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct FluxHelmRelease {
    pub ready: FluxStatus,
    pub last_info: Time,
    pub target_namespace: String,
    pub chart: String,
    pub version: String,
    pub interval: String,
    pub repository_id: Option<ApplicationId>,
    pub suspended: bool,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct FluxKustomization {
    pub ready: FluxStatus,
    pub last_info: Time,
    pub target_namespace: String,
    pub path: String,
    pub interval: String,
    pub last_applied_revision: String,
    pub last_attempted_revision: String,
    pub repository_id: Option<ApplicationId>,
    pub depends_on: BTreeSet<ApplicationId>,
    pub inventory_entries: BTreeSet<ApplicationId>,
    pub suspended: bool,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct FluxResourceSet {
    pub ready: FluxStatus,
    pub last_applied_revision: LabelLastValue,
    pub depends_on: BTreeSet<ApplicationId>,
    pub inventory_entries: BTreeSet<ApplicationId>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct Flux {
    pub repositories: BTreeMap<ApplicationId, FluxRepository>,
    pub helm_charts: BTreeMap<ApplicationId, FluxHelmChart>,
    pub helm_releases: BTreeMap<ApplicationId, FluxHelmRelease>,
    pub kustomizations: BTreeMap<ApplicationId, FluxKustomization>,
    pub resource_sets: BTreeMap<ApplicationId, FluxResourceSet>,
}

impl Flux {
    pub fn is_empty(&self) -> bool {
        self.repositories.is_empty()
            && self.helm_charts.is_empty()
            && self.helm_releases.is_empty()
            && self.kustomizations.is_empty()
            && self.resource_sets.is_empty()
    }

    pub fn merge(&mut self, other: Flux) {
        self.repositories.extend(other.repositories);
        self.helm_charts.extend(other.helm_charts);
        self.helm_releases.extend(other.helm_releases);
        self.kustomizations.extend(other.kustomizations);
        self.resource_sets.extend(other.resource_sets);
    }
}
