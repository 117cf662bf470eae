//! Provider profiles: backend catalogs loaded once at startup.
//!
//! ## Precedence (highest to lowest)
//!
//! Endpoint settings (`api_base`, `api_version`):
//!
//! 1. Per-backend settings in the profile
//! 2. Profile-level defaults
//! 3. `AZURE_API_BASE` / `AZURE_API_VERSION`, which fill whatever the profile
//!    leaves unset (the built-in catalog sets neither)
//! 4. Built-in defaults
//!
//! Router settings: `MODEL_ROUTER_*` variables override the profile's
//! `router` section.
//!
//! ## File format
//!
//! ```toml
//! [profiles.local]
//! api_base = "http://localhost:8080/v1"
//! api_style = "openai"
//! api_key_env = "LOCAL_API_KEY"
//!
//! [[profiles.local.backends]]
//! id = "qwen"
//! model = "Qwen3-Coder"
//! capabilities = ["code", "general"]
//! cost_weight = 0.2
//!
//! [profiles.local.router.dispatch]
//! attempt_timeout_ms = 30000
//! ```
//!
//! YAML files use the same shape.

use std::collections::{BTreeMap, BTreeSet};
use std::env;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use routing::{
    AdapterSet, AffinityRule, BackendId, BackendProfile, BackendRegistry, Capability,
    RouterConfig, RouterPolicy, RoutingService, TaskComplexity, TaskPriority,
};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::client_pool::ClientPool;
use crate::error::ProfileError;
use crate::openai::{ApiStyle, ChatCompletionsBackend, Endpoint, Sampling, DEFAULT_API_VERSION};

/// Name of the built-in Azure AI Foundry catalog.
pub const BUILTIN_PROFILE: &str = "azure-foundry";

pub const ENV_PROFILE: &str = "MODEL_ROUTER_PROFILE";
pub const ENV_PROFILE_PATH: &str = "MODEL_ROUTER_PROFILE_PATH";
pub const ENV_API_BASE: &str = "AZURE_API_BASE";
pub const ENV_API_KEY: &str = "AZURE_API_KEY";
pub const ENV_API_VERSION: &str = "AZURE_API_VERSION";

const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 120;
const DEFAULT_TEMPERATURE: f64 = 0.7;
const DEFAULT_MAX_CONTEXT: u32 = 128_000;

fn default_api_key_env() -> String {
    ENV_API_KEY.to_string()
}

fn default_request_timeout_secs() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_SECS
}

fn default_temperature() -> f64 {
    DEFAULT_TEMPERATURE
}

fn default_cost_weight() -> f64 {
    1.0
}

fn default_max_context() -> u32 {
    DEFAULT_MAX_CONTEXT
}

fn default_true() -> bool {
    true
}

/// A profile file: named bundles under `profiles`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProfileFile {
    #[serde(default)]
    pub profiles: BTreeMap<String, ProfileBundle>,
}

/// Endpoint defaults, backends and router overrides for one deployment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileBundle {
    #[serde(default)]
    pub api_base: Option<String>,
    #[serde(default)]
    pub api_version: Option<String>,
    /// Environment variable holding the API key.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default)]
    pub api_style: ApiStyle,
    /// Client-level timeout. The dispatcher's per-attempt timeout is
    /// usually the tighter bound.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    pub backends: Vec<BackendSpec>,
    #[serde(default)]
    pub router: Option<RouterConfig>,
}

/// One backend: registry profile plus how to call it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendSpec {
    pub id: String,
    /// Model or deployment name sent to the provider.
    pub model: String,
    pub capabilities: BTreeSet<Capability>,
    #[serde(default = "default_cost_weight")]
    pub cost_weight: f64,
    #[serde(default = "default_max_context")]
    pub max_context: u32,
    #[serde(default = "default_true")]
    pub available: bool,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub api_base: Option<String>,
    #[serde(default)]
    pub api_version: Option<String>,
    #[serde(default)]
    pub api_key_env: Option<String>,
    #[serde(default)]
    pub api_style: Option<ApiStyle>,
}

impl BackendSpec {
    pub fn new(
        id: &str,
        model: &str,
        capabilities: impl IntoIterator<Item = Capability>,
    ) -> Self {
        Self {
            id: id.to_string(),
            model: model.to_string(),
            capabilities: capabilities.into_iter().collect(),
            cost_weight: default_cost_weight(),
            max_context: DEFAULT_MAX_CONTEXT,
            available: true,
            temperature: DEFAULT_TEMPERATURE,
            max_tokens: None,
            api_base: None,
            api_version: None,
            api_key_env: None,
            api_style: None,
        }
    }

    fn with_cost(mut self, cost_weight: f64) -> Self {
        self.cost_weight = cost_weight;
        self
    }

    fn with_context(mut self, max_context: u32) -> Self {
        self.max_context = max_context;
        self
    }

    fn with_sampling(mut self, temperature: f64, max_tokens: Option<u32>) -> Self {
        self.temperature = temperature;
        self.max_tokens = max_tokens;
        self
    }

    fn with_style(mut self, style: ApiStyle) -> Self {
        self.api_style = Some(style);
        self
    }

    pub fn profile(&self) -> BackendProfile {
        BackendProfile::new(self.id.as_str(), self.capabilities.iter().copied())
            .with_cost(self.cost_weight)
            .with_max_context(self.max_context)
            .with_available(self.available)
    }
}

impl ProfileFile {
    pub fn from_toml_str(s: &str) -> Result<Self, ProfileError> {
        Ok(toml::from_str(s)?)
    }

    pub fn from_yaml_str(s: &str) -> Result<Self, ProfileError> {
        Ok(serde_yaml::from_str(s)?)
    }

    /// Read a `.toml`, `.yaml` or `.yml` file. Other extensions parse as TOML.
    pub fn from_path(path: &Path) -> Result<Self, ProfileError> {
        let content = std::fs::read_to_string(path).map_err(|source| ProfileError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("yaml") | Some("yml") => Self::from_yaml_str(&content),
            _ => Self::from_toml_str(&content),
        }
    }

    /// The built-in catalog.
    pub fn builtin() -> Self {
        let mut profiles = BTreeMap::new();
        profiles.insert(BUILTIN_PROFILE.to_string(), azure_foundry());
        Self { profiles }
    }

    /// Add `other`'s bundles, replacing same-named ones.
    pub fn merge(&mut self, other: ProfileFile) {
        self.profiles.extend(other.profiles);
    }

    pub fn names(&self) -> Vec<String> {
        self.profiles.keys().cloned().collect()
    }
}

/// Azure AI Foundry deployments with affinities for complexity/priority
/// combinations where one model is known to do best.
fn azure_foundry() -> ProfileBundle {
    use Capability::*;

    let backends = vec![
        BackendSpec::new("gpt5-chat", "gpt-5-chat", [General, Reasoning])
            .with_cost(3.0)
            .with_context(128_000)
            .with_sampling(1.0, Some(16_000)),
        BackendSpec::new("deepseek-r1", "DeepSeek-R1-0528", [Reasoning, Code])
            .with_cost(1.5)
            .with_context(128_000)
            .with_sampling(0.4, Some(250_000))
            .with_style(ApiStyle::AzureInference),
        BackendSpec::new("gpt4o", "gpt-4o", [General, Vision])
            .with_cost(2.0)
            .with_context(128_000)
            .with_sampling(0.7, None),
        BackendSpec::new("grok-fast", "grok-4-fast-reasoning", [General, Reasoning, LowLatency])
            .with_cost(0.8)
            .with_context(2_000_000)
            .with_sampling(0.6, Some(250_000))
            .with_style(ApiStyle::AzureInference),
        BackendSpec::new("codestral", "Codestral-2501", [Code, LowLatency])
            .with_cost(0.5)
            .with_context(256_000)
            .with_sampling(0.3, None)
            .with_style(ApiStyle::AzureInference),
    ];

    let rule = |complexity, priority, capability: Option<Capability>, backend: &str, bonus| {
        AffinityRule {
            backend: BackendId::from(backend),
            complexity: Some(complexity),
            priority: Some(priority),
            capability,
            bonus,
        }
    };
    use TaskComplexity::{High, Medium, Ultra};
    use TaskPriority as P;
    let affinities = vec![
        rule(Ultra, P::Quality, Some(Code), "codestral", 1.5),
        rule(Ultra, P::Quality, None, "gpt5-chat", 1.0),
        rule(Ultra, P::Reasoning, Some(Code), "deepseek-r1", 1.5),
        rule(Ultra, P::Reasoning, Some(Reasoning), "deepseek-r1", 1.5),
        rule(Ultra, P::Reasoning, None, "gpt5-chat", 1.0),
        rule(High, P::Quality, Some(Code), "codestral", 1.5),
        rule(High, P::Quality, None, "gpt4o", 1.0),
        rule(High, P::Speed, None, "grok-fast", 1.0),
        rule(Medium, P::Balanced, None, "gpt4o", 0.5),
    ];

    ProfileBundle {
        api_base: None,
        api_version: None,
        api_key_env: default_api_key_env(),
        api_style: ApiStyle::AzureOpenai,
        request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
        backends,
        router: Some(RouterConfig {
            policy: RouterPolicy {
                affinities,
                ..RouterPolicy::default()
            },
            ..RouterConfig::default()
        }),
    }
}

type Lookup = Box<dyn Fn(&str) -> Option<String> + Send + Sync>;

/// Resolves a profile against an environment.
pub struct ProfileLoader {
    lookup: Lookup,
}

impl std::fmt::Debug for ProfileLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProfileLoader").finish_non_exhaustive()
    }
}

impl ProfileLoader {
    /// Loader reading the process environment.
    pub fn from_env() -> Self {
        Self::with_lookup(|var| env::var(var).ok())
    }

    /// Loader over an arbitrary variable source.
    pub fn with_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String> + Send + Sync + 'static,
    {
        Self {
            lookup: Box::new(lookup),
        }
    }

    fn var(&self, name: &str) -> Option<String> {
        (self.lookup)(name).filter(|v| !v.trim().is_empty())
    }

    /// Built-in catalog plus `MODEL_ROUTER_PROFILE_PATH`, then select
    /// `MODEL_ROUTER_PROFILE` (default `azure-foundry`).
    pub fn load(&self) -> Result<LoadedProfile, ProfileError> {
        let mut file = ProfileFile::builtin();
        if let Some(path) = self.var(ENV_PROFILE_PATH) {
            file.merge(ProfileFile::from_path(Path::new(&path))?);
        }
        let name = self
            .var(ENV_PROFILE)
            .unwrap_or_else(|| BUILTIN_PROFILE.to_string());
        self.load_named(&file, &name)
    }

    /// Resolve one bundle of `file` into registry profiles and adapters.
    pub fn load_named(&self, file: &ProfileFile, name: &str) -> Result<LoadedProfile, ProfileError> {
        let bundle = file
            .profiles
            .get(name)
            .ok_or_else(|| ProfileError::UnknownProfile {
                name: name.to_string(),
                available: file.names(),
            })?;

        if bundle.backends.is_empty() {
            return Err(ProfileError::Invalid(format!("profile '{}' has no backends", name)));
        }

        let env_base = self.var(ENV_API_BASE);
        let env_version = self.var(ENV_API_VERSION);
        let timeout = Duration::from_secs(bundle.request_timeout_secs);
        let mut pool = ClientPool::new(timeout);
        let mut seen = BTreeSet::new();
        let mut profiles = Vec::with_capacity(bundle.backends.len());
        let mut adapters = AdapterSet::new();

        for spec in &bundle.backends {
            if !seen.insert(spec.id.as_str()) {
                return Err(ProfileError::Invalid(format!("duplicate backend id '{}'", spec.id)));
            }
            if spec.model.trim().is_empty() {
                return Err(ProfileError::Invalid(format!("backend '{}' has no model", spec.id)));
            }
            if !spec.temperature.is_finite() || !(0.0..=2.0).contains(&spec.temperature) {
                return Err(ProfileError::Invalid(format!(
                    "backend '{}' temperature must be in [0, 2], got {}",
                    spec.id, spec.temperature
                )));
            }
            let profile = spec.profile();
            profile
                .validate()
                .map_err(|message| ProfileError::Invalid(format!("backend '{}': {}", spec.id, message)))?;

            let api_base = spec
                .api_base
                .clone()
                .or_else(|| bundle.api_base.clone())
                .or_else(|| env_base.clone())
                .ok_or_else(|| ProfileError::MissingSetting {
                    backend: spec.id.clone(),
                    setting: "api_base",
                })?;
            let api_version = spec
                .api_version
                .clone()
                .or_else(|| bundle.api_version.clone())
                .or_else(|| env_version.clone())
                .unwrap_or_else(|| DEFAULT_API_VERSION.to_string());
            let key_var = spec
                .api_key_env
                .clone()
                .unwrap_or_else(|| bundle.api_key_env.clone());
            let api_key = self
                .var(&key_var)
                .ok_or_else(|| ProfileError::MissingCredential {
                    backend: spec.id.clone(),
                    var: key_var.clone(),
                })?;

            let client = pool.client_for(&api_base)?;
            let backend = ChatCompletionsBackend::new(
                client,
                Endpoint {
                    api_base,
                    api_version,
                    api_key,
                    style: spec.api_style.unwrap_or(bundle.api_style),
                },
                spec.model.clone(),
                Sampling {
                    temperature: spec.temperature,
                    max_tokens: spec.max_tokens,
                },
                timeout,
            );
            adapters.insert(spec.id.as_str(), Arc::new(backend));
            profiles.push(profile);
        }

        let mut router = bundle.router.clone().unwrap_or_default();
        router.apply_env(|var| self.var(var))?;
        router.validate()?;

        info!(
            profile = %name,
            backends = profiles.len(),
            endpoints = pool.len(),
            "Loaded provider profile"
        );

        Ok(LoadedProfile {
            name: name.to_string(),
            profiles,
            adapters,
            router,
        })
    }
}

/// A resolved profile, ready to inject.
#[derive(Debug)]
pub struct LoadedProfile {
    pub name: String,
    pub profiles: Vec<BackendProfile>,
    pub adapters: AdapterSet,
    pub router: RouterConfig,
}

impl LoadedProfile {
    /// Registry batch, adapter set and router configuration.
    pub fn into_parts(self) -> (Vec<BackendProfile>, AdapterSet, RouterConfig) {
        (self.profiles, self.adapters, self.router)
    }

    /// Register every backend and wire a [`RoutingService`].
    pub fn into_service(self) -> Result<RoutingService, ProfileError> {
        let (profiles, adapters, router) = self.into_parts();
        let registry = Arc::new(BackendRegistry::with_profiles(profiles)?);
        Ok(RoutingService::new(registry, adapters, router)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use routing::Backend;
    use std::collections::HashMap;

    fn loader(pairs: &[(&str, &str)]) -> ProfileLoader {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ProfileLoader::with_lookup(move |var| map.get(var).cloned())
    }

    const AZURE_ENV: &[(&str, &str)] = &[
        (ENV_API_BASE, "https://res.openai.azure.com"),
        (ENV_API_KEY, "k"),
    ];

    #[test]
    fn test_builtin_catalog_loads_with_env() {
        let loaded = loader(AZURE_ENV).load().unwrap();
        assert_eq!(loaded.name, BUILTIN_PROFILE);
        let ids: Vec<&str> = loaded.profiles.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["gpt5-chat", "deepseek-r1", "gpt4o", "grok-fast", "codestral"]);
        assert_eq!(loaded.adapters.len(), 5);
        assert_eq!(loaded.router.policy.affinities.len(), 9);

        let gpt5 = loaded.adapters.get(&BackendId::from("gpt5-chat")).unwrap();
        assert_eq!(gpt5.model(), "gpt-5-chat");
    }

    #[test]
    fn test_builtin_without_base_is_missing_setting() {
        let err = loader(&[(ENV_API_KEY, "k")]).load().unwrap_err();
        assert!(matches!(err, ProfileError::MissingSetting { setting: "api_base", .. }));
    }

    #[test]
    fn test_missing_key_is_missing_credential() {
        let err = loader(&[(ENV_API_BASE, "https://res.openai.azure.com")])
            .load()
            .unwrap_err();
        match err {
            ProfileError::MissingCredential { var, .. } => assert_eq!(var, ENV_API_KEY),
            other => panic!("expected MissingCredential, got {other:?}"),
        }
    }

    #[test]
    fn test_blank_env_values_are_ignored() {
        let err = loader(&[(ENV_API_BASE, "  "), (ENV_API_KEY, "k")])
            .load()
            .unwrap_err();
        assert!(matches!(err, ProfileError::MissingSetting { .. }));
    }

    #[test]
    fn test_unknown_profile_lists_available() {
        let mut pairs = AZURE_ENV.to_vec();
        pairs.push((ENV_PROFILE, "nope"));
        let err = loader(&pairs).load().unwrap_err();
        assert!(err.to_string().contains("azure-foundry"));
    }

    #[test]
    fn test_toml_bundle_with_overrides() {
        let file = ProfileFile::from_toml_str(
            r#"
            [profiles.local]
            api_base = "http://localhost:8080/v1"
            api_style = "openai"
            api_key_env = "LOCAL_KEY"

            [[profiles.local.backends]]
            id = "qwen"
            model = "Qwen3-Coder"
            capabilities = ["code", "general"]
            cost_weight = 0.2

            [[profiles.local.backends]]
            id = "remote"
            model = "gpt-4o"
            capabilities = ["vision"]
            api_base = "https://other.example.com"
            api_style = "azure_openai"
            available = false

            [profiles.local.router.dispatch]
            attempt_timeout_ms = 30000
            "#,
        )
        .unwrap();

        let loaded = loader(&[("LOCAL_KEY", "x")])
            .load_named(&file, "local")
            .unwrap();
        assert_eq!(loaded.profiles.len(), 2);
        assert_eq!(loaded.profiles[0].cost_weight, 0.2);
        assert_eq!(loaded.profiles[0].max_context, DEFAULT_MAX_CONTEXT);
        assert!(!loaded.profiles[1].available);
        assert_eq!(loaded.router.dispatch.attempt_timeout_ms, 30_000);
    }

    #[test]
    fn test_env_overrides_router_settings() {
        let file = ProfileFile::builtin();
        let mut pairs = AZURE_ENV.to_vec();
        pairs.push(("MODEL_ROUTER_ATTEMPT_TIMEOUT_MS", "2500"));
        let loaded = loader(&pairs).load_named(&file, BUILTIN_PROFILE).unwrap();
        assert_eq!(loaded.router.dispatch.attempt_timeout_ms, 2_500);
        // Affinities from the bundle survive the override.
        assert!(!loaded.router.policy.affinities.is_empty());
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        let file = ProfileFile::from_yaml_str(
            r#"
profiles:
  dup:
    api_base: http://localhost:1
    backends:
      - { id: a, model: m, capabilities: [general] }
      - { id: a, model: m2, capabilities: [code] }
"#,
        )
        .unwrap();
        let err = loader(&[(ENV_API_KEY, "k")])
            .load_named(&file, "dup")
            .unwrap_err();
        assert!(matches!(err, ProfileError::Invalid(ref m) if m.contains("duplicate")));
    }

    #[test]
    fn test_invalid_backend_values_rejected() {
        let mut bundle = azure_foundry();
        bundle.backends[0].temperature = 3.5;
        let mut file = ProfileFile::default();
        file.profiles.insert("bad".into(), bundle);
        let err = loader(AZURE_ENV).load_named(&file, "bad").unwrap_err();
        assert!(matches!(err, ProfileError::Invalid(_)));

        let mut bundle = azure_foundry();
        bundle.backends[0].cost_weight = -1.0;
        file.profiles.insert("bad".into(), bundle);
        let err = loader(AZURE_ENV).load_named(&file, "bad").unwrap_err();
        assert!(matches!(err, ProfileError::Invalid(_)));
    }

    #[test]
    fn test_merge_replaces_same_name() {
        let mut file = ProfileFile::builtin();
        let mut replacement = ProfileFile::default();
        let mut bundle = azure_foundry();
        bundle.backends.truncate(1);
        replacement.profiles.insert(BUILTIN_PROFILE.into(), bundle);
        file.merge(replacement);
        assert_eq!(file.profiles[BUILTIN_PROFILE].backends.len(), 1);
    }

    #[tokio::test]
    async fn test_into_service_plans_with_builtin_catalog() {
        let service = loader(AZURE_ENV).load().unwrap().into_service().unwrap();
        let request = routing::TaskRequest::new("Describe the chart in this image")
            .requiring(Capability::Vision);
        let decision = service.plan(&request).unwrap();
        assert_eq!(decision.primary().unwrap().backend, BackendId::from("gpt4o"));
    }
}
