//! LifecycleTransition CRD
//!
//! Declares a named start/end condition pair that the kubelet may drive on
//! a node through this driver. The driver publishes its two transitions once
//! at startup.

use crate::error::{Error, Result};
use crate::transition::TransitionKind;
use kube::api::{Api, PostParams};
use kube::{Client, CustomResource};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};

// =============================================================================
// LifecycleTransition CRD
// =============================================================================

/// A lifecycle transition offered by a driver
#[derive(CustomResource, Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "lifecycle.k8s.io",
    version = "v1alpha1",
    kind = "LifecycleTransition",
    plural = "lifecycletransitions",
    printcolumn = r#"{"name": "Driver", "type": "string", "jsonPath": ".spec.driver"}"#,
    printcolumn = r#"{"name": "Start", "type": "string", "jsonPath": ".spec.start"}"#,
    printcolumn = r#"{"name": "End", "type": "string", "jsonPath": ".spec.end"}"#,
    printcolumn = r#"{"name": "Age", "type": "date", "jsonPath": ".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct LifecycleTransitionSpec {
    /// Condition reported once the transition has started
    pub start: String,

    /// Condition reported once the transition has completed
    pub end: String,

    /// Offered on every node
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub all_nodes: Option<bool>,

    /// Driver that implements the transition
    pub driver: String,

    /// Expected completion time, e.g. "5m0s". Informational.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sla: Option<String>,
}

/// Name of the published object for a transition kind
pub fn transition_name(driver: &str, kind: TransitionKind) -> String {
    match kind {
        TransitionKind::Drain => format!("{}-drain", driver),
        TransitionKind::Uncordon => format!("{}-maintenance-complete", driver),
    }
}

/// Render whole seconds the way Go's `time.Duration` prints them
pub fn format_go_duration(duration: Duration) -> String {
    let total = duration.as_secs();
    let (hours, minutes, seconds) = (total / 3600, (total % 3600) / 60, total % 60);

    if hours > 0 {
        format!("{}h{}m{}s", hours, minutes, seconds)
    } else if minutes > 0 {
        format!("{}m{}s", minutes, seconds)
    } else {
        format!("{}s", seconds)
    }
}

/// The transitions published by `driver`
pub fn transition_definitions(driver: &str, sla: Duration) -> Vec<LifecycleTransition> {
    let sla = format_go_duration(sla);

    TransitionKind::ALL
        .iter()
        .map(|kind| {
            LifecycleTransition::new(
                &transition_name(driver, *kind),
                LifecycleTransitionSpec {
                    start: kind.start_condition().to_string(),
                    end: kind.end_condition().to_string(),
                    all_nodes: Some(true),
                    driver: driver.to_string(),
                    sla: Some(sla.clone()),
                },
            )
        })
        .collect()
}

/// Render definitions as a multi-document YAML stream
pub fn render_yaml(definitions: &[LifecycleTransition]) -> Result<String> {
    let mut out = String::new();
    for definition in definitions {
        out.push_str("---\n");
        out.push_str(&serde_yaml::to_string(definition)?);
    }
    Ok(out)
}

/// Create each definition, or replace the spec of the existing object
pub async fn publish(client: Client, definitions: &[LifecycleTransition]) -> Result<()> {
    let api: Api<LifecycleTransition> = Api::all(client);
    let params = PostParams::default();

    for definition in definitions {
        let name = definition
            .metadata
            .name
            .clone()
            .ok_or_else(|| Error::Internal("LifecycleTransition without a name".into()))?;

        match api.create(&params, definition).await {
            Ok(_) => info!(name = %name, "Created LifecycleTransition"),
            Err(kube::Error::Api(response)) if response.code == 409 => {
                debug!(name = %name, "LifecycleTransition exists, updating");
                let mut existing = api.get(&name).await?;
                existing.spec = definition.spec.clone();
                api.replace(&name, &params, &existing).await?;
                info!(name = %name, "Updated LifecycleTransition");
            }
            Err(e) => return Err(e.into()),
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::Resource;

    #[test]
    fn test_go_duration_format() {
        assert_eq!(format_go_duration(Duration::from_secs(300)), "5m0s");
        assert_eq!(format_go_duration(Duration::from_secs(90)), "1m30s");
        assert_eq!(format_go_duration(Duration::from_secs(45)), "45s");
        assert_eq!(format_go_duration(Duration::from_secs(3600)), "1h0m0s");
        assert_eq!(format_go_duration(Duration::ZERO), "0s");
    }

    #[test]
    fn test_definitions() {
        let definitions = transition_definitions("drain.slm.k8s.io", Duration::from_secs(300));
        assert_eq!(definitions.len(), 2);

        let drain = &definitions[0];
        assert_eq!(drain.metadata.name.as_deref(), Some("drain.slm.k8s.io-drain"));
        assert_eq!(drain.spec.start, "drain-started");
        assert_eq!(drain.spec.end, "drain-complete");
        assert_eq!(drain.spec.all_nodes, Some(true));
        assert_eq!(drain.spec.sla.as_deref(), Some("5m0s"));

        let uncordon = &definitions[1];
        assert_eq!(
            uncordon.metadata.name.as_deref(),
            Some("drain.slm.k8s.io-maintenance-complete")
        );
        assert_eq!(uncordon.spec.start, "uncordoning");
        assert_eq!(uncordon.spec.end, "maintenance-complete");
        assert_eq!(uncordon.spec.driver, "drain.slm.k8s.io");
    }

    #[test]
    fn test_resource_identity() {
        assert_eq!(LifecycleTransition::group(&()), "lifecycle.k8s.io");
        assert_eq!(LifecycleTransition::version(&()), "v1alpha1");
        assert_eq!(LifecycleTransition::plural(&()), "lifecycletransitions");
    }

    #[test]
    fn test_yaml_rendering() {
        let yaml = render_yaml(&transition_definitions("drain.slm.k8s.io", Duration::from_secs(600))).unwrap();

        assert_eq!(yaml.matches("---\n").count(), 2);
        assert!(yaml.contains("apiVersion: lifecycle.k8s.io/v1alpha1"));
        assert!(yaml.contains("kind: LifecycleTransition"));
        assert!(yaml.contains("allNodes: true"));
        assert!(yaml.contains("sla: 10m0s"));
    }
}
