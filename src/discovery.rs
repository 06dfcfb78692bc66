use std::collections::{BTreeMap, BTreeSet};

use tracing::{debug, warn};

use crate::catalog::{CatalogClient, CatalogQuery};

/// Models seen per (experiment, variable) catalog query.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModelSet {
    entries: BTreeMap<(String, String), BTreeSet<String>>,
}

impl ModelSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(
        &mut self,
        experiment: &str,
        variable: &str,
        models: impl IntoIterator<Item = String>,
    ) {
        self.entries
            .entry((experiment.to_string(), variable.to_string()))
            .or_default()
            .extend(models);
    }

    pub fn get(&self, experiment: &str, variable: &str) -> Option<&BTreeSet<String>> {
        self.entries
            .get(&(experiment.to_string(), variable.to_string()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&(String, String), &BTreeSet<String>)> {
        self.entries.iter()
    }
}

/// Models present in every entry. An empty map or any empty entry yields an empty set.
pub fn intersect_models(set: &ModelSet) -> BTreeSet<String> {
    let mut entries = set.entries.values();
    let Some(first) = entries.next() else {
        return BTreeSet::new();
    };
    entries.fold(first.clone(), |acc, models| {
        acc.intersection(models).cloned().collect()
    })
}

/// Query the catalog once per (experiment, variable) for daily data and record
/// every `source_id` returned. A failing query records an empty set.
pub fn discover<C: CatalogClient>(
    catalog: &C,
    experiments: &[String],
    variables: &[String],
) -> ModelSet {
    let mut set = ModelSet::new();
    for experiment in experiments {
        for variable in variables {
            let query = CatalogQuery::daily(experiment, variable);
            let models: BTreeSet<String> = match catalog.search(&query) {
                Ok(datasets) => datasets
                    .into_iter()
                    .flat_map(|dataset| dataset.source_ids)
                    .collect(),
                Err(err) => {
                    warn!(%experiment, %variable, error = %err, "catalog search failed");
                    BTreeSet::new()
                }
            };
            if models.is_empty() {
                warn!(%experiment, %variable, "no models found");
            } else {
                debug!(%experiment, %variable, count = models.len(), "models found");
            }
            set.insert(experiment, variable, models);
        }
    }
    set
}

/// Intersect the discovered models, then narrow to the allow-list when one is given.
pub fn select_models(set: &ModelSet, allow: Option<&[String]>) -> BTreeSet<String> {
    let common = intersect_models(set);
    match allow {
        Some(allow) => common
            .into_iter()
            .filter(|model| allow.iter().any(|wanted| wanted == model))
            .collect(),
        None => common,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::catalog::{DatasetHandle, FileRecord};
    use crate::error::ClimprojError;

    struct MockCatalog {
        calls: Mutex<Vec<CatalogQuery>>,
    }

    impl CatalogClient for MockCatalog {
        fn search(&self, query: &CatalogQuery) -> Result<Vec<DatasetHandle>, ClimprojError> {
            self.calls.lock().unwrap().push(query.clone());
            let models: &[&str] = match (query.experiment_id.as_str(), query.variable_id.as_str()) {
                ("ssp245", "pr") => &["A", "B", "C"],
                ("ssp245", "tas") => &["B", "C"],
                ("ssp585", "pr") => &["C", "B", "D"],
                ("ssp585", "tas") => {
                    return Err(ClimprojError::CatalogStatus {
                        status: 500,
                        message: "down".into(),
                    });
                }
                _ => &[],
            };
            Ok(models
                .iter()
                .map(|model| DatasetHandle {
                    id: format!("{model}.{}", query.variable_id),
                    source_ids: vec![model.to_string()],
                })
                .collect())
        }

        fn file_context(&self, _dataset: &DatasetHandle) -> Result<Vec<FileRecord>, ClimprojError> {
            Ok(Vec::new())
        }
    }

    fn strings(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[test]
    fn intersection_is_common_subset() {
        let mut set = ModelSet::new();
        set.insert("e1", "pr", strings(&["A", "B", "C"]));
        set.insert("e1", "tas", strings(&["B", "C", "D"]));
        set.insert("e2", "pr", strings(&["C", "B"]));
        let common = intersect_models(&set);
        assert_eq!(common, BTreeSet::from(["B".to_string(), "C".to_string()]));
        for (_, models) in set.iter() {
            assert!(common.is_subset(models));
        }
    }

    #[test]
    fn any_empty_entry_empties_intersection() {
        let mut set = ModelSet::new();
        set.insert("e1", "pr", strings(&["A"]));
        set.insert("e1", "tas", Vec::new());
        assert!(intersect_models(&set).is_empty());
        assert!(intersect_models(&ModelSet::new()).is_empty());
    }

    #[test]
    fn discover_queries_every_pair_and_tolerates_failures() {
        let catalog = MockCatalog {
            calls: Mutex::new(Vec::new()),
        };
        let set = discover(
            &catalog,
            &strings(&["ssp245", "ssp585"]),
            &strings(&["pr", "tas"]),
        );
        let calls = catalog.calls.lock().unwrap();
        assert_eq!(calls.len(), 4);
        assert!(calls.iter().all(|query| query.frequency == "day"));
        assert_eq!(set.len(), 4);
        assert!(set.get("ssp585", "tas").unwrap().is_empty());
        assert!(intersect_models(&set).is_empty());
    }

    #[test]
    fn allow_list_narrows_selection() {
        let catalog = MockCatalog {
            calls: Mutex::new(Vec::new()),
        };
        let set = discover(&catalog, &strings(&["ssp245"]), &strings(&["pr", "tas"]));
        assert_eq!(
            select_models(&set, None),
            BTreeSet::from(["B".to_string(), "C".to_string()])
        );
        let allow = strings(&["C", "Z"]);
        assert_eq!(
            select_models(&set, Some(&allow)),
            BTreeSet::from(["C".to_string()])
        );
    }
}
