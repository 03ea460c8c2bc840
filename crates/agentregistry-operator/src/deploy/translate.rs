//! The deployment translator: a pure function from (catalog entry,
//! deployment record) to the concrete runtime objects for the target
//! cluster. All I/O stays in the apply step.

use crate::error::{Error, Result};
use agentregistry_api::catalog::{
    Agent, ArgumentSpec, ArgumentType, HeaderSpec, McpServer, PackageSpec, RegistryType,
    RemoteSpec, TransportType,
};
use agentregistry_api::deployment::AgentDeployment;
use agentregistry_api::names::{sanitize_name, substitute};
use agentregistry_api::runtime::{
    AgentSpec as RuntimeAgentSpec, MCPServerSpec, RemoteHeader, RemoteMCPServerSpec, RuntimeObject,
    ServerDeployment,
};
use k8s_openapi::api::core::v1::ConfigMap;
use kube::api::ObjectMeta;
use kube::ResourceExt;
use std::collections::BTreeMap;

/// Base image used for npm-distributed servers.
const NPM_BASE_IMAGE: &str = "node:20-alpine";
/// Base image used for pypi-distributed servers.
const PYPI_BASE_IMAGE: &str = "python:3.12-slim";
/// Defaults for HTTP-style transports when the package URL names none.
const DEFAULT_HTTP_PORT: u16 = 8080;
const DEFAULT_HTTP_PATH: &str = "/";

/// The catalog side of a translation.
#[derive(Clone, Debug)]
pub enum CatalogEntry {
    Server(McpServer),
    Agent(Agent),
}

impl CatalogEntry {
    pub fn meta_payload(&self) -> Option<&serde_json::Value> {
        match self {
            CatalogEntry::Server(s) => s.spec.meta.as_ref(),
            CatalogEntry::Agent(a) => a.spec.meta.as_ref(),
        }
    }
}

/// Deterministically lower a catalog entry plus deployment config into the
/// target object list: one primary object plus optional sidecar ConfigMaps.
pub fn translate(entry: &CatalogEntry, deployment: &AgentDeployment) -> Result<Vec<RuntimeObject>> {
    let namespace = deployment
        .spec
        .namespace
        .clone()
        .or_else(|| deployment.namespace())
        .unwrap_or_else(|| "default".to_string());
    let name = sanitize_name(&deployment.spec.resource_name);
    if name.is_empty() {
        return Err(Error::Translate("resource name is empty".to_string()));
    }

    let mut objects = match entry {
        CatalogEntry::Server(server) => translate_server(server, deployment, &name, &namespace)?,
        CatalogEntry::Agent(agent) => translate_agent(agent, &name, &namespace)?,
    };

    for obj in &mut objects {
        obj.set_owner_labels(&deployment.name_any(), &deployment.namespace().unwrap_or_default());
    }
    Ok(objects)
}

fn translate_server(
    server: &McpServer,
    deployment: &AgentDeployment,
    name: &str,
    namespace: &str,
) -> Result<Vec<RuntimeObject>> {
    let spec = &server.spec;
    let config = &deployment.spec.config;

    let use_remote =
        !spec.remotes.is_empty() && (deployment.spec.prefer_remote || spec.packages.is_empty());
    if use_remote {
        let remote = &spec.remotes[0];
        return Ok(vec![translate_remote(remote, config, name, namespace)?]);
    }

    let package = spec.packages.first().ok_or_else(|| {
        Error::Translate(format!(
            "catalog entry '{}' has neither packages nor remotes",
            spec.name
        ))
    })?;

    let (image, command) = match package.registry_type {
        RegistryType::Npm => (
            NPM_BASE_IMAGE.to_string(),
            Some(package.runtime_hint.clone().unwrap_or_else(|| "npm".to_string())),
        ),
        RegistryType::Pypi => (
            PYPI_BASE_IMAGE.to_string(),
            Some(package.runtime_hint.clone().unwrap_or_else(|| "pip".to_string())),
        ),
        // The identifier is itself the image; no launcher involved.
        RegistryType::Oci => (substitute(&package.identifier, config), None),
    };

    let args = if package.registry_type == RegistryType::Oci {
        Vec::new()
    } else {
        let mut args = render_arguments(&package.runtime_arguments, config);
        args.push(substitute(&package.identifier, config));
        if let Some(version) = &package.version {
            args.push(substitute(version, config));
        }
        args.extend(render_arguments(&package.package_arguments, config));
        args
    };

    let env = render_env(package, config)?;

    let transport = package.transport.type_;
    let (port, path) = match transport {
        TransportType::Stdio => (None, None),
        TransportType::Http | TransportType::StreamableHttp => {
            let (port, path) = parse_http_target(package.transport.url.as_deref())?;
            (Some(port), Some(path))
        }
    };

    let mut objects = Vec::new();
    if !env.is_empty() {
        objects.push(RuntimeObject::ConfigMap(ConfigMap {
            metadata: ObjectMeta {
                name: Some(format!("{name}-config")),
                namespace: Some(namespace.to_string()),
                ..Default::default()
            },
            data: Some(env.clone()),
            ..Default::default()
        }));
    }

    let mut primary = agentregistry_api::runtime::MCPServer::new(
        name,
        MCPServerSpec {
            deployment: ServerDeployment {
                image,
                command,
                args,
                env,
                port,
                path,
            },
            transport,
        },
    );
    primary.metadata.namespace = Some(namespace.to_string());
    objects.insert(0, RuntimeObject::Server(primary));
    Ok(objects)
}

fn translate_remote(
    remote: &RemoteSpec,
    config: &BTreeMap<String, String>,
    name: &str,
    namespace: &str,
) -> Result<RuntimeObject> {
    let url = url::Url::parse(&remote.url)
        .map_err(|e| Error::Translate(format!("remote url '{}': {e}", remote.url)))?;
    let host = url
        .host_str()
        .ok_or_else(|| Error::Translate(format!("remote url '{}' has no host", remote.url)))?
        .to_string();
    let port = url
        .port_or_known_default()
        .ok_or_else(|| Error::Translate(format!("remote url '{}' has no port", remote.url)))?;
    let path = match url.path() {
        "" => DEFAULT_HTTP_PATH.to_string(),
        p => p.to_string(),
    };

    let mut headers = Vec::with_capacity(remote.headers.len());
    for header in &remote.headers {
        headers.push(RemoteHeader {
            name: header.name.clone(),
            value: render_header(header, config)?,
        });
    }

    let mut primary = agentregistry_api::runtime::RemoteMCPServer::new(
        name,
        RemoteMCPServerSpec {
            host,
            port,
            path: Some(path),
            transport: remote.transport_type,
            headers,
        },
    );
    primary.metadata.namespace = Some(namespace.to_string());
    Ok(RuntimeObject::Remote(primary))
}

fn translate_agent(agent: &Agent, name: &str, namespace: &str) -> Result<Vec<RuntimeObject>> {
    let image = agent
        .spec
        .image
        .clone()
        .filter(|i| !i.is_empty())
        .ok_or_else(|| Error::Translate(format!("agent '{}' has no image", agent.spec.name)))?;
    let mut primary = agentregistry_api::runtime::Agent::new(
        name,
        RuntimeAgentSpec {
            image,
            framework: agent.spec.framework.clone(),
            model_ref: agent.spec.model_ref.clone(),
            a2a_url: agent.spec.a2a_url.clone(),
            description: agent.spec.description.clone(),
        },
    );
    primary.metadata.namespace = Some(namespace.to_string());
    Ok(vec![RuntimeObject::Agent(primary)])
}

fn render_arguments(arguments: &[ArgumentSpec], config: &BTreeMap<String, String>) -> Vec<String> {
    let mut out = Vec::new();
    for arg in arguments {
        match arg.type_ {
            ArgumentType::Named => {
                if let Some(name) = &arg.name {
                    out.push(substitute(name, config));
                }
                if let Some(value) = &arg.value {
                    out.push(substitute(value, config));
                }
            }
            ArgumentType::Positional => {
                if let Some(value) = &arg.value {
                    out.push(substitute(value, config));
                }
            }
        }
    }
    out
}

fn render_env(
    package: &PackageSpec,
    config: &BTreeMap<String, String>,
) -> Result<BTreeMap<String, String>> {
    let mut env = BTreeMap::new();
    for var in &package.environment_variables {
        let value = var
            .value
            .clone()
            .or_else(|| config.get(&var.name).cloned())
            .or_else(|| var.default.clone());
        match value {
            Some(value) => {
                env.insert(var.name.clone(), substitute(&value, config));
            }
            None if var.required => {
                return Err(Error::Translate(format!(
                    "missing required environment variable '{}'",
                    var.name
                )));
            }
            None => {}
        }
    }
    Ok(env)
}

fn render_header(header: &HeaderSpec, config: &BTreeMap<String, String>) -> Result<String> {
    // Variable defaults seed the substitution map; deployment config wins.
    let mut merged: BTreeMap<String, String> = BTreeMap::new();
    for (name, variable) in &header.variables {
        match (config.get(name), &variable.default) {
            (Some(value), _) => {
                merged.insert(name.clone(), value.clone());
            }
            (None, Some(default)) => {
                merged.insert(name.clone(), default.clone());
            }
            (None, None) if variable.required => {
                return Err(Error::Translate(format!(
                    "missing required variable '{}' for header '{}'",
                    name, header.name
                )));
            }
            (None, None) => {}
        }
    }
    for (key, value) in config {
        merged.entry(key.clone()).or_insert_with(|| value.clone());
    }
    Ok(substitute(header.value.as_deref().unwrap_or_default(), &merged))
}

fn parse_http_target(url: Option<&str>) -> Result<(u16, String)> {
    let Some(raw) = url else {
        return Ok((DEFAULT_HTTP_PORT, DEFAULT_HTTP_PATH.to_string()));
    };
    let parsed =
        url::Url::parse(raw).map_err(|e| Error::Translate(format!("package url '{raw}': {e}")))?;
    let port = parsed.port().unwrap_or(DEFAULT_HTTP_PORT);
    let path = match parsed.path() {
        "" => DEFAULT_HTTP_PATH.to_string(),
        p => p.to_string(),
    };
    Ok((port, path))
}
