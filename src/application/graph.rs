//! Stage planning over the static dependency graph.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;

use super::catalog::Catalog;
use crate::domain::{OrchestrationRequest, ServiceName};
use crate::error::{Error, Result, ServiceError};

/// Services whose dependencies are satisfied by earlier stages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Stage {
    pub index: usize,
    pub services: Vec<ServiceName>,
}

/// Dependency edges restricted to the services managed in one run.
#[derive(Debug, Clone)]
pub struct DependencyGraph {
    edges: BTreeMap<ServiceName, BTreeSet<ServiceName>>,
    unsatisfiable: BTreeSet<ServiceName>,
}

impl DependencyGraph {
    /// Build the graph for a request.
    ///
    /// Dependencies on services ignored this run are treated as satisfied
    /// externally. A dependency on a service missing from the catalog can
    /// never be satisfied.
    pub fn build(catalog: &Catalog, request: &OrchestrationRequest) -> Result<Self> {
        let mut edges = BTreeMap::new();
        let mut unsatisfiable = BTreeSet::new();

        for (name, _) in request.managed() {
            let def = catalog.get(name)?;
            let mut deps = BTreeSet::new();
            for dep in &def.dependencies {
                if !catalog.contains(dep.as_str()) {
                    tracing::warn!(service = %name, dependency = %dep, "dependency is not a known service");
                    unsatisfiable.insert(name.clone());
                } else if request.level(dep).is_managed() {
                    deps.insert(dep.clone());
                }
            }
            edges.insert(name.clone(), deps);
        }

        Ok(Self {
            edges,
            unsatisfiable,
        })
    }

    /// Ordered stages; every service lands after all of its dependencies.
    pub fn stages(&self) -> Result<Vec<Stage>> {
        let mut placed: BTreeSet<ServiceName> = BTreeSet::new();
        let mut stages = Vec::new();

        loop {
            let ready: Vec<ServiceName> = self
                .edges
                .iter()
                .filter(|(name, _)| !placed.contains(*name) && !self.unsatisfiable.contains(*name))
                .filter(|(_, deps)| deps.iter().all(|dep| placed.contains(dep)))
                .map(|(name, _)| name.clone())
                .collect();

            if ready.is_empty() {
                break;
            }
            placed.extend(ready.iter().cloned());
            stages.push(Stage {
                index: stages.len(),
                services: ready,
            });
        }

        let stranded: Vec<ServiceName> = self
            .edges
            .keys()
            .filter(|name| !placed.contains(*name))
            .cloned()
            .collect();
        if !stranded.is_empty() {
            return Err(Error::Unschedulable { services: stranded });
        }

        Ok(stages)
    }

    /// Plan stages for a request in one step.
    pub fn plan(catalog: &Catalog, request: &OrchestrationRequest) -> Result<Vec<Stage>> {
        for name in request.requirements.keys() {
            if !catalog.contains(name.as_str()) {
                return Err(ServiceError::UnknownService(name.clone()).into());
            }
        }
        Self::build(catalog, request)?.stages()
    }
}

/// Order in which to stop `services`: dependents before their dependencies.
pub fn stop_order(catalog: &Catalog, services: &[ServiceName]) -> Vec<ServiceName> {
    let mut ordered: Vec<(usize, ServiceName)> = services
        .iter()
        .map(|name| (depth(catalog, name, &mut BTreeSet::new()), name.clone()))
        .collect();
    ordered.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.cmp(&b.1)));
    ordered.dedup_by(|a, b| a.1 == b.1);
    ordered.into_iter().map(|(_, name)| name).collect()
}

fn depth(catalog: &Catalog, name: &ServiceName, visiting: &mut BTreeSet<ServiceName>) -> usize {
    if !visiting.insert(name.clone()) {
        return 0;
    }
    let deepest = catalog
        .get(name)
        .map(|def| {
            def.dependencies
                .iter()
                .map(|dep| depth(catalog, dep, visiting) + 1)
                .max()
                .unwrap_or(0)
        })
        .unwrap_or(0);
    visiting.remove(name);
    deepest
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ServiceDefinition;
    use url::Url;

    fn request() -> OrchestrationRequest {
        OrchestrationRequest::new(Url::parse("http://localhost:8080").unwrap())
    }

    fn names(stage: &Stage) -> Vec<&str> {
        stage.services.iter().map(ServiceName::as_str).collect()
    }

    #[test]
    fn standard_stack_runs_server_and_runtime_first() {
        let req = request().require("server").require("runtime").optional("rag");
        let stages = DependencyGraph::plan(&Catalog::standard(), &req).unwrap();

        assert_eq!(stages.len(), 2);
        assert_eq!(names(&stages[0]), vec!["runtime", "server"]);
        assert_eq!(names(&stages[1]), vec!["rag"]);
    }

    #[test]
    fn ignored_dependency_counts_as_satisfied() {
        let req = request().require("rag");
        let stages = DependencyGraph::plan(&Catalog::standard(), &req).unwrap();

        assert_eq!(stages.len(), 1);
        assert_eq!(names(&stages[0]), vec!["rag"]);
    }

    #[test]
    fn cycle_is_unschedulable() {
        let catalog = Catalog::new([
            ServiceDefinition::new("a").depends_on("b"),
            ServiceDefinition::new("b").depends_on("a"),
            ServiceDefinition::new("c"),
        ]);
        let req = request().require("a").require("b").require("c");

        let err = DependencyGraph::plan(&catalog, &req).unwrap_err();
        match err {
            Error::Unschedulable { services } => {
                let services: Vec<&str> = services.iter().map(ServiceName::as_str).collect();
                assert_eq!(services, vec!["a", "b"]);
            }
            other => panic!("expected Unschedulable, got {other:?}"),
        }
    }

    #[test]
    fn missing_dependency_is_unschedulable() {
        let catalog = Catalog::new([ServiceDefinition::new("a").depends_on("ghost")]);
        let req = request().require("a");

        assert!(matches!(
            DependencyGraph::plan(&catalog, &req),
            Err(Error::Unschedulable { .. })
        ));
    }

    #[test]
    fn dependents_stop_first() {
        let order = stop_order(
            &Catalog::standard(),
            &[
                ServiceName::from("server"),
                ServiceName::from("rag"),
                ServiceName::from("runtime"),
                ServiceName::from("rag"),
            ],
        );
        let order: Vec<&str> = order.iter().map(ServiceName::as_str).collect();
        assert_eq!(order, vec!["rag", "runtime", "server"]);
    }

    #[test]
    fn unknown_requested_service_fails_before_planning() {
        let req = request().require("frontend");
        assert!(matches!(
            DependencyGraph::plan(&Catalog::standard(), &req),
            Err(Error::Service(ServiceError::UnknownService(_)))
        ));
    }
}
