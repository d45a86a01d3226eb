//! Services described by a profile.
//!
//! A profile names the resources of a web service, each with a URI template
//! and an HTTP method, relative to a base URL:
//!
//! ```json
//! {
//!     "BaseURL": "https://api.example.com/v1",
//!     "Resources": [
//!         { "Name": "GetUser", "URITemplate": "users/{id}" },
//!         { "Name": "CreateUser", "URITemplate": "users", "Method": "POST" }
//!     ]
//! }
//! ```
//!
//! Profiles can be written in JSON or TOML.

use std::collections::HashSet;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

use http::Method;
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::cycle::{Cycle, CycleState};
use crate::form::{self, Params};
use crate::request::Payload;
use crate::session::Session;
use crate::transport::TaskKind;
use crate::uri_template::{SimpleExpander, UriTemplateExpander, expand_uri_template};
use crate::{Error, Result};

/// Profile file formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProfileFormat {
    /// JSON object with `BaseURL` and `Resources` keys.
    Json,
    /// TOML document with the same keys.
    Toml,
}

impl ProfileFormat {
    /// Pick a format from a file extension.
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_lowercase().as_str() {
            "json" => Some(ProfileFormat::Json),
            "toml" => Some(ProfileFormat::Toml),
            _ => None,
        }
    }
}

/// One resource of a service.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ResourceProfile {
    /// Name used to look the resource up.
    #[serde(rename = "Name", default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Template expanded against the request values.
    #[serde(rename = "URITemplate", default, skip_serializing_if = "Option::is_none")]
    pub uri_template: Option<String>,
    /// Defaults to `GET`.
    #[serde(rename = "Method", default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
}

/// Description of a web service.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ServiceProfile {
    /// Prefix joined with every expanded template.
    #[serde(rename = "BaseURL", default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    /// Resources offered by the service.
    #[serde(rename = "Resources", default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<Vec<ResourceProfile>>,
}

impl ServiceProfile {
    /// Parse a profile from text.
    pub fn parse(content: &str, format: ProfileFormat) -> Result<Self> {
        match format {
            ProfileFormat::Json => serde_json::from_str(content)
                .map_err(|e| Error::MalformedProfile(format!("JSON parse error: {}", e))),
            ProfileFormat::Toml => toml::from_str(content)
                .map_err(|e| Error::MalformedProfile(format!("TOML parse error: {}", e))),
        }
    }

    /// Load a profile from a file, picking the format from its extension.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(Error::FileNotFound(path.display().to_string()));
        }

        let format = path
            .extension()
            .and_then(|ext| ext.to_str())
            .and_then(ProfileFormat::from_extension)
            .ok_or_else(|| {
                Error::MalformedProfile(format!("Unsupported profile file: {}", path.display()))
            })?;

        let content = std::fs::read_to_string(path)?;
        Self::parse(&content, format)
    }

    /// Check the profile is usable. Problems are logged.
    pub fn verify(&self) -> bool {
        let Some(resources) = &self.resources else {
            error!("Service profile has no resources");
            return false;
        };

        let mut names = HashSet::new();
        for resource in resources {
            let Some(name) = &resource.name else {
                error!("Resource without a name in service profile");
                return false;
            };
            if !names.insert(name.as_str()) {
                error!(resource = %name, "Duplicate resource name in service profile");
                return false;
            }
            if resource.uri_template.is_none() {
                error!(resource = %name, "Resource has no URI template");
                return false;
            }
        }
        true
    }

    /// Find a resource by name.
    pub fn resource(&self, name: &str) -> Option<&ResourceProfile> {
        self.resources
            .as_deref()?
            .iter()
            .find(|resource| resource.name.as_deref() == Some(name))
    }
}

/// Join two URL pieces with exactly one slash between them.
pub fn join_url(base: &str, path: &str) -> String {
    if base.is_empty() {
        return path.to_string();
    }
    if path.is_empty() {
        return base.to_string();
    }
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

/// What to do when a cycle with the same identifier already exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CycleOption {
    /// Always create a new cycle.
    #[default]
    Create,
    /// Return the live cycle with the identifier, if any.
    Reuse,
    /// Cancel the live cycle with the identifier and create a new one.
    Replace,
}

/// Arguments for [`Service::cycle_for_resource`].
#[derive(Debug, Clone, Default)]
pub struct ResourceRequest {
    /// Identifier of the cycle. Required for `Reuse` and `Replace`.
    pub identifier: Option<String>,
    pub option: CycleOption,
    /// Values for the URI template.
    pub values: Params,
    /// Payload for the request processors.
    pub request_object: Option<Payload>,
    pub solicited: bool,
}

impl ResourceRequest {
    /// An empty request that creates a new cycle.
    pub fn new() -> Self {
        Self::default()
    }

    /// Name the cycle and choose how an existing one is treated.
    pub fn identifier(mut self, identifier: impl Into<String>, option: CycleOption) -> Self {
        self.identifier = Some(identifier.into());
        self.option = option;
        self
    }

    /// Set one template value.
    pub fn value(mut self, name: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.values.insert(name.into(), value.into());
        self
    }

    /// Replace all template values.
    pub fn values(mut self, values: Params) -> Self {
        self.values = values;
        self
    }

    /// Set the request object handed to request processors.
    pub fn object(mut self, object: impl Into<Payload>) -> Self {
        self.request_object = Some(object.into());
        self
    }

    /// Retry until the cycle succeeds.
    pub fn solicited(mut self, solicited: bool) -> Self {
        self.solicited = solicited;
        self
    }
}

type CycleHook = Arc<dyn Fn(&Cycle) + Send + Sync>;

/// A web service whose resources are described by a [`ServiceProfile`].
pub struct Service {
    session: Session,
    profile: ServiceProfile,
    base_url: Option<String>,
    expander: Arc<dyn UriTemplateExpander>,
    on_cycle_created: Option<CycleHook>,
}

impl fmt::Debug for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Service")
            .field("base_url", &self.base_url())
            .field("profile", &self.profile)
            .finish()
    }
}

impl Service {
    pub fn new(session: Session, profile: ServiceProfile) -> Self {
        Self {
            session,
            profile,
            base_url: None,
            expander: Arc::new(SimpleExpander),
            on_cycle_created: None,
        }
    }

    /// Create a service from a profile file.
    pub fn from_file(session: Session, path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self::new(session, ServiceProfile::from_file(path)?))
    }

    /// Override the base URL of the profile.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    /// Use a different URI template expander.
    pub fn with_expander(mut self, expander: Arc<dyn UriTemplateExpander>) -> Self {
        self.expander = expander;
        self
    }

    /// Run `hook` on every cycle the service creates, before it is returned.
    pub fn on_cycle_created<F>(mut self, hook: F) -> Self
    where
        F: Fn(&Cycle) + Send + Sync + 'static,
    {
        self.on_cycle_created = Some(Arc::new(hook));
        self
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn profile(&self) -> &ServiceProfile {
        &self.profile
    }

    /// The override if set, else the profile's base URL, else empty.
    pub fn base_url(&self) -> &str {
        self.base_url
            .as_deref()
            .or(self.profile.base_url.as_deref())
            .unwrap_or("")
    }

    pub fn verify_profile(&self) -> bool {
        self.profile.verify()
    }

    pub fn resource_profile(&self, name: &str) -> Option<&ResourceProfile> {
        self.profile.resource(name)
    }

    /// Create, reuse, or replace the cycle for a resource.
    pub fn cycle_for_resource(&self, name: &str, request: ResourceRequest) -> Result<Cycle> {
        let ResourceRequest {
            identifier,
            option,
            values,
            request_object,
            solicited,
        } = request;

        if option != CycleOption::Create {
            let Some(identifier) = &identifier else {
                error!(resource = %name, ?option, "Reuse or replace needs an identifier");
                return Err(Error::MissingIdentifier);
            };
            if let Some(existing) = self.session.cycle_for_identifier(identifier) {
                if option == CycleOption::Reuse {
                    debug!(cycle = %existing.id(), %identifier, "Reusing cycle");
                    return Ok(existing);
                }
                debug!(cycle = %existing.id(), %identifier, "Replacing cycle");
                existing.cancel(true);
                existing.set_identifier(None)?;
            }
        }

        let resource = self.resource_profile(name).ok_or_else(|| {
            error!(resource = %name, "Resource is not in the service profile");
            Error::ResourceNotFound(name.to_string())
        })?;
        let template = resource
            .uri_template
            .as_deref()
            .ok_or_else(|| Error::MalformedProfile(format!("Resource {} has no URI template", name)))?;
        let method = match resource.method.as_deref() {
            Some(method) => Method::from_bytes(method.to_uppercase().as_bytes())
                .map_err(|_| Error::MalformedProfile(format!("Invalid method: {}", method)))?,
            None => Method::GET,
        };

        let path = expand_uri_template(self.expander.as_ref(), template, &values);
        let url = form::url_for_string(&join_url(self.base_url(), &path), None)?;

        let mut state = CycleState::new(method, url, TaskKind::Data);
        state.request.set_object(request_object);
        state.solicited = solicited;
        state.identifier = identifier;
        let cycle = Cycle::register(&self.session, state)?;

        if let Some(hook) = &self.on_cycle_created {
            hook(&cycle);
        }
        Ok(cycle)
    }

    /// Get the cycle for a resource and start it.
    pub fn request_resource<F>(&self, name: &str, request: ResourceRequest, handler: F) -> Result<Cycle>
    where
        F: Fn(&Cycle, Result<()>) + Send + Sync + 'static,
    {
        let cycle = self.cycle_for_resource(name, request)?;
        cycle.start_with(handler);
        Ok(cycle)
    }
}
