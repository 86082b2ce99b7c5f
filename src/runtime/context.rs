//! Per-call execution context.

use std::collections::HashMap;
use std::fmt;

use indexmap::IndexMap;
use serde::Serialize;

/// How the current execution was triggered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    /// Module initialization at server startup.
    RunOnce,
    /// RPC invoked by a client or another server.
    #[default]
    Rpc,
    /// Plain HTTP handler.
    Http,
    /// Scheduled trigger.
    Cron,
    /// Hook running before a server API call.
    Before,
    /// Hook running after a server API call.
    After,
}

impl ExecutionMode {
    pub fn as_str(self) -> &'static str {
        match self {
            ExecutionMode::RunOnce => "run_once",
            ExecutionMode::Rpc => "rpc",
            ExecutionMode::Http => "http",
            ExecutionMode::Cron => "cron",
            ExecutionMode::Before => "before",
            ExecutionMode::After => "after",
        }
    }
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Key to ordered-values mapping, used for headers and query parameters.
///
/// Repeated keys keep every value in arrival order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct HeaderMultiMap(IndexMap<String, Vec<String>>);

impl HeaderMultiMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a value under `key`.
    pub fn append(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.entry(key.into()).or_default().push(value.into());
    }

    /// All values for `key`, empty if absent.
    pub fn get_all(&self, key: &str) -> &[String] {
        self.0.get(key).map(Vec::as_slice).unwrap_or(&[])
    }

    /// First value for `key`.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.get_all(key).first().map(String::as_str)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Vec<String>)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K, V> FromIterator<(K, V)> for HeaderMultiMap
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut map = HeaderMultiMap::new();
        for (k, v) in iter {
            map.append(k, v);
        }
        map
    }
}

/// Transport data for one inbound call.
///
/// Produced by the transport edge (gateway, scheduler, or a test) and turned
/// into a [`Context`] by the dispatcher.
#[derive(Debug, Clone, Default)]
pub struct InboundRequest {
    /// Target function identifier.
    pub id: String,
    /// Opaque payload, conventionally JSON. Never parsed by the bridge.
    pub payload: String,
    pub mode: ExecutionMode,
    pub headers: HeaderMultiMap,
    pub query_params: HeaderMultiMap,
    pub user_id: String,
    pub username: String,
    pub vars: HashMap<String, String>,
    pub session_exp: i64,
    pub session_id: String,
    pub client_ip: String,
    pub client_port: String,
    pub lang: String,
}

impl InboundRequest {
    /// A bare request for `id` carrying `payload`.
    pub fn new(id: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            payload: payload.into(),
            ..Default::default()
        }
    }
}

/// Immutable snapshot of caller and environment metadata for one call.
///
/// Every field is always present; absent data is represented by empty
/// strings, empty maps, or zero.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Context {
    env: HashMap<String, String>,
    execution_mode: ExecutionMode,
    node: String,
    headers: HeaderMultiMap,
    query_params: HeaderMultiMap,
    user_id: String,
    username: String,
    vars: HashMap<String, String>,
    user_session_exp: i64,
    session_id: String,
    client_ip: String,
    client_port: String,
    lang: String,
}

impl Context {
    /// Context for a module init function at startup.
    pub(crate) fn for_init(env: &HashMap<String, String>, node: &str) -> Self {
        Self {
            env: env.clone(),
            execution_mode: ExecutionMode::RunOnce,
            node: node.to_string(),
            ..Default::default()
        }
    }

    /// Context for an inbound call.
    pub(crate) fn for_request(
        env: &HashMap<String, String>,
        node: &str,
        request: &InboundRequest,
    ) -> Self {
        Self {
            env: env.clone(),
            execution_mode: request.mode,
            node: node.to_string(),
            headers: request.headers.clone(),
            query_params: request.query_params.clone(),
            user_id: request.user_id.clone(),
            username: request.username.clone(),
            vars: request.vars.clone(),
            user_session_exp: request.session_exp,
            session_id: request.session_id.clone(),
            client_ip: request.client_ip.clone(),
            client_port: request.client_port.clone(),
            lang: request.lang.clone(),
        }
    }

    pub fn env(&self) -> &HashMap<String, String> {
        &self.env
    }

    pub fn execution_mode(&self) -> ExecutionMode {
        self.execution_mode
    }

    pub fn node(&self) -> &str {
        &self.node
    }

    pub fn headers(&self) -> &HeaderMultiMap {
        &self.headers
    }

    pub fn query_params(&self) -> &HeaderMultiMap {
        &self.query_params
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn vars(&self) -> &HashMap<String, String> {
        &self.vars
    }

    /// Session expiry as Unix seconds, 0 when there is no session.
    pub fn user_session_exp(&self) -> i64 {
        self.user_session_exp
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn client_ip(&self) -> &str {
        &self.client_ip
    }

    pub fn client_port(&self) -> &str {
        &self.client_port
    }

    pub fn lang(&self) -> &str {
        &self.lang
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_multimap_keeps_repeated_values_in_order() {
        let mut map = HeaderMultiMap::new();
        map.append("x-tag", "a");
        map.append("accept", "json");
        map.append("x-tag", "b");

        assert_eq!(map.get_all("x-tag"), ["a", "b"]);
        assert_eq!(map.get("x-tag"), Some("a"));
        assert_eq!(map.len(), 2);
        assert!(map.get_all("missing").is_empty());
        assert_eq!(map.get("missing"), None);
    }

    #[test]
    fn test_multimap_from_iter() {
        let map: HeaderMultiMap = vec![("k", "1"), ("k", "2")].into_iter().collect();
        assert_eq!(map.get_all("k"), ["1", "2"]);
    }

    #[test]
    fn test_default_context_fields_present() {
        let ctx = Context::default();
        assert_eq!(ctx.user_id(), "");
        assert_eq!(ctx.user_session_exp(), 0);
        assert!(ctx.headers().is_empty());
        assert!(ctx.vars().is_empty());
        assert_eq!(ctx.execution_mode(), ExecutionMode::Rpc);
    }

    #[test]
    fn test_for_request_copies_request_data() {
        let mut env = HashMap::new();
        env.insert("region".to_string(), "eu".to_string());

        let mut request = InboundRequest::new("echo", "{}");
        request.user_id = "u-1".to_string();
        request.session_id = "s-1".to_string();
        request.session_exp = 1_700_000_000;
        request.headers.append("x-a", "1");
        request.lang = "de".to_string();

        let ctx = Context::for_request(&env, "node-1", &request);
        assert_eq!(ctx.env().get("region").unwrap(), "eu");
        assert_eq!(ctx.node(), "node-1");
        assert_eq!(ctx.user_id(), "u-1");
        assert_eq!(ctx.session_id(), "s-1");
        assert_eq!(ctx.user_session_exp(), 1_700_000_000);
        assert_eq!(ctx.headers().get("x-a"), Some("1"));
        assert_eq!(ctx.lang(), "de");
    }

    #[test]
    fn test_derived_context_is_a_copy() {
        let ctx = Context::for_init(&HashMap::new(), "n");
        let derived = ctx.clone();
        assert_eq!(ctx, derived);
        assert_eq!(derived.execution_mode(), ExecutionMode::RunOnce);
    }

    #[test]
    fn test_context_serializes_snake_case() {
        let ctx = Context::for_init(&HashMap::new(), "n");
        let json = serde_json::to_value(&ctx).unwrap();
        assert_eq!(json["execution_mode"], "run_once");
        assert_eq!(json["node"], "n");
        assert_eq!(json["user_session_exp"], 0);
    }
}
