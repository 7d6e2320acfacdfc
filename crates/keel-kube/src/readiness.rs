//! Readiness evaluation of live objects
//!
//! Works on the raw JSON returned by the API server so every kind can be
//! evaluated through the same dynamic client.

use serde_json::Value as JsonValue;

/// Outcome of evaluating one live object
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Readiness {
    Ready,
    /// Not there yet; carries a progress message
    Pending(String),
    /// Will never become ready without intervention
    Failed(String),
}

impl Readiness {
    pub fn is_ready(&self) -> bool {
        matches!(self, Readiness::Ready)
    }
}

/// How strict the evaluation is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitMode {
    /// Workloads ready; Jobs are not waited on
    Resources,
    /// Workloads ready and Jobs completed
    ResourcesAndJobs,
    /// A single hook object run to completion
    Completion,
}

fn int_at(object: &JsonValue, pointer: &str) -> Option<i64> {
    object.pointer(pointer).and_then(JsonValue::as_i64)
}

fn str_at<'a>(object: &'a JsonValue, pointer: &str) -> Option<&'a str> {
    object.pointer(pointer).and_then(JsonValue::as_str)
}

fn has_condition(object: &JsonValue, type_: &str) -> bool {
    object
        .pointer("/status/conditions")
        .and_then(JsonValue::as_array)
        .map(|conditions| {
            conditions.iter().any(|c| {
                c.get("type").and_then(JsonValue::as_str) == Some(type_)
                    && c.get("status").and_then(JsonValue::as_str) == Some("True")
            })
        })
        .unwrap_or(false)
}

/// Evaluate a live object of `kind`
pub fn evaluate(kind: &str, object: &JsonValue, mode: WaitMode) -> Readiness {
    match (kind, mode) {
        ("Job", WaitMode::Resources) => Readiness::Ready,
        ("Job", _) => job(object),
        ("Pod", WaitMode::Completion) => pod_completion(object),
        (_, WaitMode::Completion) => Readiness::Ready,
        ("Deployment", _) => deployment(object),
        ("StatefulSet", _) => stateful_set(object),
        ("DaemonSet", _) => daemon_set(object),
        ("Pod", _) => pod(object),
        ("PersistentVolumeClaim", _) => pvc(object),
        ("Service", _) => service(object),
        _ => Readiness::Ready,
    }
}

/// Ready when every replica is updated, ready and available
fn deployment(object: &JsonValue) -> Readiness {
    let desired = int_at(object, "/spec/replicas").unwrap_or(1);
    let ready = int_at(object, "/status/readyReplicas").unwrap_or(0);
    let updated = int_at(object, "/status/updatedReplicas").unwrap_or(0);
    let available = int_at(object, "/status/availableReplicas").unwrap_or(0);

    if ready >= desired && updated >= desired && available >= desired {
        Readiness::Ready
    } else {
        Readiness::Pending(format!(
            "{}/{} ready, {}/{} updated, {}/{} available",
            ready, desired, updated, desired, available, desired
        ))
    }
}

fn stateful_set(object: &JsonValue) -> Readiness {
    let desired = int_at(object, "/spec/replicas").unwrap_or(1);
    let ready = int_at(object, "/status/readyReplicas").unwrap_or(0);
    let current_rev = str_at(object, "/status/currentRevision");
    let update_rev = str_at(object, "/status/updateRevision");

    if ready >= desired && current_rev == update_rev {
        Readiness::Ready
    } else {
        Readiness::Pending(format!(
            "{}/{} ready, revision match: {}",
            ready,
            desired,
            current_rev == update_rev
        ))
    }
}

fn daemon_set(object: &JsonValue) -> Readiness {
    let desired = int_at(object, "/status/desiredNumberScheduled").unwrap_or(0);
    let ready = int_at(object, "/status/numberReady").unwrap_or(0);
    let updated = int_at(object, "/status/updatedNumberScheduled").unwrap_or(0);

    if ready >= desired && updated >= desired {
        Readiness::Ready
    } else {
        Readiness::Pending(format!("{}/{} ready, {}/{} updated", ready, desired, updated, desired))
    }
}

fn job(object: &JsonValue) -> Readiness {
    if has_condition(object, "Failed") {
        return Readiness::Failed("job failed".to_string());
    }
    if has_condition(object, "Complete") || int_at(object, "/status/succeeded").unwrap_or(0) > 0 {
        return Readiness::Ready;
    }
    let failed = int_at(object, "/status/failed").unwrap_or(0);
    let active = int_at(object, "/status/active").unwrap_or(0);
    if failed > 0 && active == 0 {
        return Readiness::Failed(format!("job has {} failed pods", failed));
    }
    Readiness::Pending(format!("{} active", active))
}

fn pod(object: &JsonValue) -> Readiness {
    match str_at(object, "/status/phase") {
        Some("Succeeded") => Readiness::Ready,
        Some("Failed") => Readiness::Failed("pod failed".to_string()),
        _ if has_condition(object, "Ready") => Readiness::Ready,
        phase => Readiness::Pending(format!("phase {}", phase.unwrap_or("Unknown"))),
    }
}

fn pod_completion(object: &JsonValue) -> Readiness {
    match str_at(object, "/status/phase") {
        Some("Succeeded") => Readiness::Ready,
        Some("Failed") => Readiness::Failed("pod failed".to_string()),
        phase => Readiness::Pending(format!("phase {}", phase.unwrap_or("Unknown"))),
    }
}

fn pvc(object: &JsonValue) -> Readiness {
    match str_at(object, "/status/phase") {
        Some("Bound") => Readiness::Ready,
        phase => Readiness::Pending(format!("phase {}", phase.unwrap_or("Pending"))),
    }
}

/// LoadBalancer services must have an ingress address
fn service(object: &JsonValue) -> Readiness {
    if str_at(object, "/spec/type") != Some("LoadBalancer") {
        return Readiness::Ready;
    }
    let assigned = object
        .pointer("/status/loadBalancer/ingress")
        .and_then(JsonValue::as_array)
        .is_some_and(|ingress| !ingress.is_empty());
    if assigned {
        Readiness::Ready
    } else {
        Readiness::Pending("waiting for load balancer address".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_deployment_readiness() {
        let pending = json!({
            "spec": {"replicas": 3},
            "status": {"readyReplicas": 2, "updatedReplicas": 3, "availableReplicas": 2}
        });
        assert!(matches!(
            evaluate("Deployment", &pending, WaitMode::Resources),
            Readiness::Pending(_)
        ));

        let ready = json!({
            "spec": {"replicas": 3},
            "status": {"readyReplicas": 3, "updatedReplicas": 3, "availableReplicas": 3}
        });
        assert!(evaluate("Deployment", &ready, WaitMode::Resources).is_ready());
    }

    #[test]
    fn test_jobs_only_waited_when_asked() {
        let running = json!({"status": {"active": 1}});
        assert!(evaluate("Job", &running, WaitMode::Resources).is_ready());
        assert!(!evaluate("Job", &running, WaitMode::ResourcesAndJobs).is_ready());

        let failed = json!({"status": {"conditions": [{"type": "Failed", "status": "True"}]}});
        assert!(matches!(
            evaluate("Job", &failed, WaitMode::Completion),
            Readiness::Failed(_)
        ));

        let done = json!({"status": {"succeeded": 1}});
        assert!(evaluate("Job", &done, WaitMode::Completion).is_ready());
    }

    #[test]
    fn test_pod_completion_vs_readiness() {
        let running = json!({
            "status": {"phase": "Running", "conditions": [{"type": "Ready", "status": "True"}]}
        });
        assert!(evaluate("Pod", &running, WaitMode::Resources).is_ready());
        assert!(!evaluate("Pod", &running, WaitMode::Completion).is_ready());
    }

    #[test]
    fn test_load_balancer_service() {
        let cluster_ip = json!({"spec": {"type": "ClusterIP"}});
        assert!(evaluate("Service", &cluster_ip, WaitMode::Resources).is_ready());

        let lb = json!({"spec": {"type": "LoadBalancer"}, "status": {"loadBalancer": {}}});
        assert!(!evaluate("Service", &lb, WaitMode::Resources).is_ready());
    }

    #[test]
    fn test_unknown_kinds_are_ready() {
        assert!(evaluate("ConfigMap", &json!({}), WaitMode::ResourcesAndJobs).is_ready());
        assert!(evaluate("ConfigMap", &json!({}), WaitMode::Completion).is_ready());
    }
}
