//! Port consistency across the application, the image, and the manifests.
//!
//! The service's port is declared in several places that nothing ties
//! together at build time: the compiled-in default, the Dockerfile's `EXPOSE`
//! and `ENV PORT`, the workload's `containerPort` and env, both probes, and the
//! Service's `targetPort`. [`collect`] reads all of them from a repository
//! checkout and [`check`] fails when any one disagrees with the expected port.

pub mod dockerfile;
pub mod manifest;

use std::collections::BTreeSet;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::api::HEALTH_PATH;
use crate::config::DEFAULT_PORT;
use manifest::{IntOrString, Manifest};

pub const DOCKERFILE: &str = "Dockerfile";
pub const MANIFEST_DIR: &str = "k8s";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PortSource {
    Application,
    DockerExpose,
    DockerEnv,
    ContainerPort,
    ContainerEnv,
    ReadinessProbe,
    LivenessProbe,
    ServiceTargetPort,
}

impl PortSource {
    /// Sources that must be declared at least once.
    pub const REQUIRED: [PortSource; 5] = [
        PortSource::Application,
        PortSource::DockerExpose,
        PortSource::ContainerPort,
        PortSource::ReadinessProbe,
        PortSource::LivenessProbe,
    ];

    /// Probe field name for the two probe sources.
    pub fn probe_kind(&self) -> Option<&'static str> {
        match self {
            PortSource::ReadinessProbe => Some("readinessProbe"),
            PortSource::LivenessProbe => Some("livenessProbe"),
            _ => None,
        }
    }
}

impl fmt::Display for PortSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PortSource::Application => "application default",
            PortSource::DockerExpose => "Dockerfile EXPOSE",
            PortSource::DockerEnv => "Dockerfile ENV PORT",
            PortSource::ContainerPort => "containerPort",
            PortSource::ContainerEnv => "container env PORT",
            PortSource::ReadinessProbe => "readinessProbe port",
            PortSource::LivenessProbe => "livenessProbe port",
            PortSource::ServiceTargetPort => "Service targetPort",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortDeclaration {
    pub source: PortSource,
    /// Where the value was read from, e.g. `k8s/deployment.yaml (Deployment/web)`.
    pub origin: String,
    pub port: u16,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbePath {
    pub source: PortSource,
    pub origin: String,
    pub path: Option<String>,
}

/// Everything [`collect`] found.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Inventory {
    pub declarations: Vec<PortDeclaration>,
    pub probe_paths: Vec<ProbePath>,
}

impl Inventory {
    pub fn push(&mut self, source: PortSource, origin: impl Into<String>, port: u16) {
        self.declarations.push(PortDeclaration {
            source,
            origin: origin.into(),
            port,
        });
    }

    /// The application's compiled-in default port.
    pub fn with_application_default() -> Self {
        let mut inventory = Self::default();
        inventory.push(PortSource::Application, "config::DEFAULT_PORT", DEFAULT_PORT);
        inventory
    }

    pub fn add_dockerfile(&mut self, origin: &str, ports: &dockerfile::DockerfilePorts) {
        for port in &ports.exposed {
            self.push(PortSource::DockerExpose, origin, *port);
        }
        if let Some(port) = ports.env_port {
            self.push(PortSource::DockerEnv, origin, port);
        }
    }

    /// Add workloads and services from every manifest file.
    ///
    /// Named probe ports resolve against their own container. Named Service
    /// target ports resolve against the workloads the Service selects, and
    /// must name the same number in all of them.
    pub fn add_manifests(&mut self, files: &[(String, Vec<Manifest>)]) -> Result<(), DeployError> {
        let workloads: Vec<_> = files
            .iter()
            .flat_map(|(_, manifests)| manifests)
            .filter_map(|m| match m {
                Manifest::Workload {
                    labels, container, ..
                } => Some((labels, container)),
                Manifest::Service { .. } => None,
            })
            .collect();

        for (file, manifests) in files {
            for m in manifests {
                match m {
                    Manifest::Workload {
                        kind,
                        name,
                        container,
                        ..
                    } => {
                        let origin = format!("{file} ({kind}/{name})");
                        for p in &container.ports {
                            self.push(PortSource::ContainerPort, &origin, p.container_port);
                        }
                        if let Some(raw) = container.env_value("PORT") {
                            let port = raw.trim().parse::<u16>().map_err(|_| {
                                DeployError::InvalidEnvPort {
                                    origin: origin.clone(),
                                    value: raw.to_string(),
                                }
                            })?;
                            self.push(PortSource::ContainerEnv, &origin, port);
                        }

                        let probes = [
                            (PortSource::ReadinessProbe, &container.readiness_probe),
                            (PortSource::LivenessProbe, &container.liveness_probe),
                        ];
                        for (source, probe) in probes {
                            let Some(probe) = probe else { continue };
                            let Some(port) = probe.port() else { continue };
                            let resolved = container.resolve(port).ok_or_else(|| {
                                DeployError::UnknownNamedPort {
                                    origin: origin.clone(),
                                    name: port_name(port),
                                }
                            })?;
                            self.push(source, &origin, resolved);
                            if probe.http_get.is_some() {
                                self.probe_paths.push(ProbePath {
                                    source,
                                    origin: origin.clone(),
                                    path: probe.http_path().map(str::to_string),
                                });
                            }
                        }
                    }
                    Manifest::Service {
                        name,
                        selector,
                        ports,
                    } => {
                        let origin = format!("{file} (Service/{name})");
                        for sp in ports {
                            let target = sp.target();
                            let candidates: BTreeSet<u16> = workloads
                                .iter()
                                .filter(|(labels, _)| manifest::selects(selector, labels))
                                .filter_map(|(_, container)| container.resolve(&target))
                                .collect();
                            let mut found = candidates.into_iter();
                            let port = match (target, found.next(), found.next()) {
                                (IntOrString::Int(n), _, _) => n,
                                (IntOrString::String(_), Some(port), None) => port,
                                (IntOrString::String(name), None, _) => {
                                    return Err(DeployError::UnknownNamedPort { origin, name });
                                }
                                (IntOrString::String(name), Some(first), Some(second)) => {
                                    return Err(DeployError::AmbiguousNamedPort {
                                        origin,
                                        name,
                                        ports: [first, second].into_iter().chain(found).collect(),
                                    });
                                }
                            };
                            self.push(PortSource::ServiceTargetPort, &origin, port);
                        }
                    }
                }
            }
        }

        Ok(())
    }
}

fn port_name(port: &IntOrString) -> String {
    match port {
        IntOrString::Int(n) => n.to_string(),
        IntOrString::String(s) => s.clone(),
    }
}

#[derive(Debug, Error)]
pub enum DeployError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("{path}: {source}")]
    Dockerfile {
        path: PathBuf,
        source: dockerfile::DockerfileError,
    },
    #[error("{path}: {source}")]
    Manifest {
        path: PathBuf,
        source: manifest::ManifestError,
    },
    #[error("{origin}: port name `{name}` does not match any container port")]
    UnknownNamedPort { origin: String, name: String },
    #[error("{origin}: port name `{name}` means different ports in selected workloads: {ports:?}")]
    AmbiguousNamedPort {
        origin: String,
        name: String,
        ports: Vec<u16>,
    },
    #[error("{origin}: env PORT is not a port number: `{value}`")]
    InvalidEnvPort { origin: String, value: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Violation {
    Mismatch(PortDeclaration),
    Missing(PortSource),
    ProbePath(ProbePath),
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Violation::Mismatch(d) => write!(f, "{} in {} is {}", d.source, d.origin, d.port),
            Violation::Missing(source) => write!(f, "no {source} declared"),
            Violation::ProbePath(p) => write!(
                f,
                "{} in {} targets {} instead of {HEALTH_PATH}",
                p.source,
                p.origin,
                p.path.as_deref().unwrap_or("/")
            ),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("port drift against {expected}: {}", summary(.violations))]
pub struct DriftError {
    pub expected: u16,
    pub violations: Vec<Violation>,
}

fn summary(violations: &[Violation]) -> String {
    violations
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Read every port declaration under `root`.
pub fn collect(root: &Path) -> Result<Inventory, DeployError> {
    let mut inventory = Inventory::with_application_default();

    let dockerfile_path = root.join(DOCKERFILE);
    let text = read(&dockerfile_path)?;
    let ports = dockerfile::parse(&text).map_err(|source| DeployError::Dockerfile {
        path: dockerfile_path.clone(),
        source,
    })?;
    inventory.add_dockerfile(DOCKERFILE, &ports);

    let dir = root.join(MANIFEST_DIR);
    let entries = fs::read_dir(&dir).map_err(|source| DeployError::Io {
        path: dir.clone(),
        source,
    })?;
    let mut paths: Vec<PathBuf> = entries
        .filter_map(|e| e.ok().map(|e| e.path()))
        .filter(|p| {
            matches!(
                p.extension().and_then(|e| e.to_str()),
                Some("yaml" | "yml")
            )
        })
        .collect();
    paths.sort();

    let mut files = Vec::with_capacity(paths.len());
    for path in paths {
        let text = read(&path)?;
        let manifests = manifest::parse(&text).map_err(|source| DeployError::Manifest {
            path: path.clone(),
            source,
        })?;
        let shown = path
            .strip_prefix(root)
            .unwrap_or(&path)
            .display()
            .to_string();
        tracing::debug!(file = %shown, count = manifests.len(), "parsed manifests");
        files.push((shown, manifests));
    }
    inventory.add_manifests(&files)?;

    Ok(inventory)
}

fn read(path: &Path) -> Result<String, DeployError> {
    fs::read_to_string(path).map_err(|source| DeployError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Every declaration must equal `expected`, every required source must be
/// present, and every HTTP probe must target the health route.
pub fn check(inventory: &Inventory, expected: u16) -> Result<u16, DriftError> {
    let mut violations: Vec<Violation> = PortSource::REQUIRED
        .iter()
        .filter(|source| !inventory.declarations.iter().any(|d| d.source == **source))
        .map(|source| Violation::Missing(*source))
        .collect();

    violations.extend(
        inventory
            .declarations
            .iter()
            .filter(|d| d.port != expected)
            .cloned()
            .map(Violation::Mismatch),
    );

    violations.extend(
        inventory
            .probe_paths
            .iter()
            .filter(|p| p.path.as_deref() != Some(HEALTH_PATH))
            .cloned()
            .map(Violation::ProbePath),
    );

    if violations.is_empty() {
        Ok(expected)
    } else {
        Err(DriftError {
            expected,
            violations,
        })
    }
}
