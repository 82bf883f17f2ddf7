// src/config/validate.rs

use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;

use std::collections::BTreeMap;

use crate::config::model::{AnalysisConfig, AnalysisRequest, RawAnalysisRequest};
use crate::errors::{AnadagError, Result};

impl TryFrom<RawAnalysisRequest> for AnalysisRequest {
    type Error = crate::errors::AnadagError;

    fn try_from(raw: RawAnalysisRequest) -> std::result::Result<Self, Self::Error> {
        validate_raw_request(&raw)?;
        Ok(AnalysisRequest::new_unchecked(raw))
    }
}

fn validate_raw_request(req: &RawAnalysisRequest) -> Result<()> {
    ensure_has_analyses(req)?;
    validate_scheduler(req)?;
    validate_names(req)?;
    validate_references(req)?;
    analysis_order(&req.analysis)?;
    Ok(())
}

fn ensure_has_analyses(req: &RawAnalysisRequest) -> Result<()> {
    if req.analysis.is_empty() {
        return Err(AnadagError::ConfigError(
            "request must contain at least one [analysis.<name>] section".to_string(),
        ));
    }
    Ok(())
}

fn validate_scheduler(req: &RawAnalysisRequest) -> Result<()> {
    let s = &req.scheduler;

    if s.max_workers == Some(0) {
        return Err(AnadagError::ConfigError(
            "[scheduler].max_workers must be >= 1 (got 0)".to_string(),
        ));
    }
    if !(0.0..1.0).contains(&s.safety_margin) {
        return Err(AnadagError::ConfigError(format!(
            "[scheduler].safety_margin must be in [0, 1) (got {})",
            s.safety_margin
        )));
    }
    if s.poll_interval_ms == 0 {
        return Err(AnadagError::ConfigError(
            "[scheduler].poll_interval_ms must be >= 1 (got 0)".to_string(),
        ));
    }

    Ok(())
}

fn validate_names(req: &RawAnalysisRequest) -> Result<()> {
    for name in req.analysis.keys() {
        if req.dataset.contains_key(name) {
            return Err(AnadagError::ConfigError(format!(
                "'{}' is declared both as a dataset and as an analysis",
                name
            )));
        }
    }
    Ok(())
}

fn validate_references(req: &RawAnalysisRequest) -> Result<()> {
    for (name, analysis) in req.analysis.iter() {
        for input in analysis.inputs.iter() {
            if !req.analysis.contains_key(input) && !req.dataset.contains_key(input) {
                return Err(AnadagError::ConfigError(format!(
                    "analysis '{}' has unknown input '{}'",
                    name, input
                )));
            }
        }
        for dep in analysis.after.iter() {
            if !req.analysis.contains_key(dep) {
                return Err(AnadagError::ConfigError(format!(
                    "analysis '{}' has unknown dependency '{}' in `after`",
                    name, dep
                )));
            }
        }
        if analysis.inputs.iter().chain(analysis.after.iter()).any(|d| d == name) {
            return Err(AnadagError::ConfigError(format!(
                "analysis '{}' cannot depend on itself",
                name
            )));
        }
    }
    Ok(())
}

/// Analysis names with producers before consumers.
///
/// Edge direction: dependency -> analysis. For
///   [analysis.tsne]
///   inputs = ["pca"]
/// we add edge pca -> tsne.
pub(crate) fn analysis_order(analyses: &BTreeMap<String, AnalysisConfig>) -> Result<Vec<String>> {
    let mut graph: DiGraphMap<&str, ()> = DiGraphMap::new();

    for name in analyses.keys() {
        graph.add_node(name.as_str());
    }

    for (name, analysis) in analyses.iter() {
        for dep in analysis.inputs.iter().chain(analysis.after.iter()) {
            if analyses.contains_key(dep) {
                graph.add_edge(dep.as_str(), name.as_str(), ());
            }
        }
    }

    // A topological sort will fail if there is a cycle.
    match toposort(&graph, None) {
        Ok(order) => Ok(order.into_iter().map(str::to_string).collect()),
        Err(cycle) => {
            let node = cycle.node_id();
            Err(AnadagError::ConfigError(format!(
                "cycle detected in analysis graph involving '{}'",
                node
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::loader::parse_str;

    fn validate(toml: &str) -> Result<AnalysisRequest> {
        AnalysisRequest::try_from(parse_str(toml)?)
    }

    #[test]
    fn order_puts_producers_first() {
        let req = parse_str(
            r#"
            [analysis.tsne]
            inputs = ["pca"]

            [analysis.pca]

            [analysis.report]
            after = ["tsne"]
            "#,
        )
        .unwrap();

        let order = analysis_order(&req.analysis).unwrap();
        let pos = |n: &str| order.iter().position(|x| x == n).unwrap();
        assert!(pos("pca") < pos("tsne"));
        assert!(pos("tsne") < pos("report"));
    }

    #[test]
    fn rejects_zero_workers_and_bad_margin() {
        let err = validate("[scheduler]\nmax_workers = 0\n[analysis.a]\n").unwrap_err();
        assert!(err.to_string().contains("max_workers"));

        let err = validate("[scheduler]\nsafety_margin = 1.0\n[analysis.a]\n").unwrap_err();
        assert!(err.to_string().contains("safety_margin"));
    }

    #[test]
    fn rejects_name_used_twice() {
        let err = validate(
            r#"
            [dataset.x]
            source = "x.csv"

            [analysis.x]
            "#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("both as a dataset and as an analysis"));
    }

    #[test]
    fn rejects_self_reference() {
        let err = validate("[analysis.a]\nafter = [\"a\"]\n").unwrap_err();
        assert!(err.to_string().contains("itself"));
    }
}
