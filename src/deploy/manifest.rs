//! The slice of Kubernetes manifests that declares ports.
//!
//! Multi-document YAML. Workloads (`Deployment`, `StatefulSet`, `DaemonSet`)
//! contribute their first container; `Service` contributes its target ports.
//! Every other kind is skipped.

use std::collections::BTreeMap;

use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("invalid yaml: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("{kind} `{name}` has no containers")]
    NoContainers { kind: String, name: String },
}

/// A port given either as a number or as the name of a container port.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum IntOrString {
    Int(u16),
    String(String),
}

#[derive(Debug, Clone, Default, Deserialize)]
struct Metadata {
    #[serde(default)]
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Document {
    kind: Option<String>,
    #[serde(default)]
    metadata: Metadata,
    #[serde(default)]
    spec: serde_yaml::Value,
}

#[derive(Debug, Deserialize)]
struct WorkloadSpec {
    template: PodTemplate,
}

#[derive(Debug, Deserialize)]
struct PodTemplate {
    #[serde(default)]
    metadata: TemplateMetadata,
    spec: PodSpec,
}

#[derive(Debug, Default, Deserialize)]
struct TemplateMetadata {
    #[serde(default)]
    labels: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct PodSpec {
    #[serde(default)]
    containers: Vec<Container>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Container {
    pub name: String,
    #[serde(default)]
    pub ports: Vec<ContainerPort>,
    #[serde(default)]
    pub env: Vec<EnvVar>,
    pub readiness_probe: Option<Probe>,
    pub liveness_probe: Option<Probe>,
}

impl Container {
    /// Resolve a probe/target port against this container's named ports.
    pub fn resolve(&self, port: &IntOrString) -> Option<u16> {
        match port {
            IntOrString::Int(n) => Some(*n),
            IntOrString::String(name) => self
                .ports
                .iter()
                .find(|p| p.name.as_deref() == Some(name.as_str()))
                .map(|p| p.container_port),
        }
    }

    pub fn env_value(&self, key: &str) -> Option<&str> {
        self.env
            .iter()
            .find(|e| e.name == key)
            .and_then(|e| e.value.as_deref())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerPort {
    pub name: Option<String>,
    pub container_port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EnvVar {
    pub name: String,
    pub value: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Probe {
    pub http_get: Option<HttpGetAction>,
    pub tcp_socket: Option<TcpSocketAction>,
}

impl Probe {
    pub fn port(&self) -> Option<&IntOrString> {
        self.http_get
            .as_ref()
            .map(|h| &h.port)
            .or_else(|| self.tcp_socket.as_ref().map(|t| &t.port))
    }

    pub fn http_path(&self) -> Option<&str> {
        self.http_get.as_ref().and_then(|h| h.path.as_deref())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct HttpGetAction {
    pub path: Option<String>,
    pub port: IntOrString,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TcpSocketAction {
    pub port: IntOrString,
}

#[derive(Debug, Deserialize)]
struct ServiceSpec {
    #[serde(default)]
    selector: BTreeMap<String, String>,
    #[serde(default)]
    ports: Vec<ServicePort>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServicePort {
    pub name: Option<String>,
    pub port: u16,
    /// Defaults to `port` when omitted.
    pub target_port: Option<IntOrString>,
}

impl ServicePort {
    pub fn target(&self) -> IntOrString {
        self.target_port
            .clone()
            .unwrap_or(IntOrString::Int(self.port))
    }
}

#[derive(Debug, Clone)]
pub enum Manifest {
    Workload {
        kind: String,
        name: String,
        /// Pod template labels, matched by Service selectors.
        labels: BTreeMap<String, String>,
        container: Container,
    },
    Service {
        name: String,
        selector: BTreeMap<String, String>,
        ports: Vec<ServicePort>,
    },
}

/// An empty selector matches nothing in Kubernetes; here it matches every
/// workload so a selector-less Service still gets checked.
pub fn selects(selector: &BTreeMap<String, String>, labels: &BTreeMap<String, String>) -> bool {
    selector.iter().all(|(k, v)| labels.get(k) == Some(v))
}

pub fn parse(text: &str) -> Result<Vec<Manifest>, ManifestError> {
    let mut out = Vec::new();

    for doc in serde_yaml::Deserializer::from_str(text) {
        let value = serde_yaml::Value::deserialize(doc)?;
        if value.is_null() {
            continue;
        }

        let doc: Document = serde_yaml::from_value(value)?;
        let name = doc.metadata.name.unwrap_or_default();
        match doc.kind.as_deref() {
            Some(kind @ ("Deployment" | "StatefulSet" | "DaemonSet")) => {
                let spec: WorkloadSpec = serde_yaml::from_value(doc.spec)?;
                let labels = spec.template.metadata.labels;
                let container = spec
                    .template
                    .spec
                    .containers
                    .into_iter()
                    .next()
                    .ok_or_else(|| ManifestError::NoContainers {
                        kind: kind.to_string(),
                        name: name.clone(),
                    })?;
                out.push(Manifest::Workload {
                    kind: kind.to_string(),
                    name,
                    labels,
                    container,
                });
            }
            Some("Service") => {
                let spec: ServiceSpec = serde_yaml::from_value(doc.spec)?;
                out.push(Manifest::Service {
                    name,
                    selector: spec.selector,
                    ports: spec.ports,
                });
            }
            _ => {}
        }
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    const DEPLOYMENT: &str = r#"
apiVersion: apps/v1
kind: Deployment
metadata:
  name: web
spec:
  template:
    spec:
      containers:
        - name: web
          image: web:latest
          ports:
            - name: http
              containerPort: 8080
          env:
            - name: PORT
              value: "8080"
          readinessProbe:
            httpGet:
              path: /healthz
              port: http
          livenessProbe:
            httpGet:
              path: /healthz
              port: 5000
        - name: sidecar
          image: proxy:latest
---
apiVersion: v1
kind: Service
metadata:
  name: web
spec:
  ports:
    - port: 80
      targetPort: http
    - port: 9000
---
apiVersion: v1
kind: ConfigMap
metadata:
  name: ignored
data:
  PORT: "1234"
"#;

    #[test]
    fn parses_workload_and_service() {
        let manifests = parse(DEPLOYMENT).unwrap();
        assert_eq!(manifests.len(), 2);

        let Manifest::Workload {
            kind,
            name,
            container,
            ..
        } = &manifests[0]
        else {
            panic!("expected workload, got {:?}", manifests[0]);
        };
        assert_eq!(kind, "Deployment");
        assert_eq!(name, "web");
        assert_eq!(container.name, "web");
        assert_eq!(container.env_value("PORT"), Some("8080"));

        let readiness = container.readiness_probe.as_ref().unwrap();
        assert_eq!(readiness.http_path(), Some("/healthz"));
        assert_eq!(container.resolve(readiness.port().unwrap()), Some(8080));

        let liveness = container.liveness_probe.as_ref().unwrap();
        assert_eq!(container.resolve(liveness.port().unwrap()), Some(5000));

        let Manifest::Service { ports, selector, .. } = &manifests[1] else {
            panic!("expected service, got {:?}", manifests[1]);
        };
        assert!(selector.is_empty());
        assert_eq!(ports[0].target(), IntOrString::String("http".into()));
        assert_eq!(ports[1].target(), IntOrString::Int(9000));
    }

    #[test]
    fn unknown_named_port_does_not_resolve() {
        let manifests = parse(DEPLOYMENT).unwrap();
        let Manifest::Workload { container, .. } = &manifests[0] else {
            unreachable!();
        };
        assert_eq!(container.resolve(&IntOrString::String("grpc".into())), None);
    }

    #[test]
    fn tcp_socket_probe_exposes_port_without_path() {
        let text = r#"
kind: DaemonSet
metadata: { name: agent }
spec:
  template:
    spec:
      containers:
        - name: agent
          livenessProbe:
            tcpSocket:
              port: 7000
"#;
        let manifests = parse(text).unwrap();
        let Manifest::Workload { container, .. } = &manifests[0] else {
            unreachable!();
        };
        let probe = container.liveness_probe.as_ref().unwrap();
        assert_eq!(probe.port(), Some(&IntOrString::Int(7000)));
        assert_eq!(probe.http_path(), None);
    }

    #[test]
    fn workload_without_containers_is_an_error() {
        let text = "kind: Deployment\nmetadata: {name: empty}\nspec:\n  template:\n    spec:\n      containers: []\n";
        assert!(matches!(
            parse(text),
            Err(ManifestError::NoContainers { .. })
        ));
    }

    #[test]
    fn selector_matches_template_labels() {
        let text = r#"
kind: Deployment
metadata: { name: web }
spec:
  template:
    metadata:
      labels: { app: web, tier: front }
    spec:
      containers: [{ name: web }]
---
kind: Service
metadata: { name: web }
spec:
  selector: { app: web }
  ports: [{ port: 80 }]
"#;
        let manifests = parse(text).unwrap();
        let (Manifest::Workload { labels, .. }, Manifest::Service { selector, .. }) =
            (&manifests[0], &manifests[1])
        else {
            unreachable!();
        };
        assert!(selects(selector, labels));

        let other: BTreeMap<String, String> = [("app".to_string(), "api".to_string())].into();
        assert!(!selects(&other, labels));
    }

    #[test]
    fn empty_documents_are_skipped() {
        assert!(parse("---\n---\n").unwrap().is_empty());
    }
}
