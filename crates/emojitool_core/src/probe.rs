//! Throwaway diagnostics for the "400 on authorize" investigation.
//!
//! Every probe writes a transcript for a human to read next to a known-good
//! configuration. Responses are printed, never interpreted; nothing is retried
//! or persisted. The literal scope strings are a snapshot of one hypothesis
//! about how the authorization server treats `#fragment` suffixes.

use std::collections::BTreeSet;
use std::io::Write;

use anyhow::{Context, Result, anyhow};
use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use reqwest::Url;
use reqwest::blocking::{Client, Response};
use reqwest::redirect::Policy;
use serde::Serialize;
use serde_json::{Value, json};

use crate::config::ToolConfig;
use crate::html::extract_title;

const BASE_SCOPE: &str = "atproto repo:io.zzstoatzz.status.record";
const PROFILE_RPC: &str = "rpc:app.bsky.actor.getProfile";
const FOLLOWS_RPC: &str = "rpc:app.bsky.graph.getFollows";
const APPVIEW_AUDIENCE: &str = "?aud=did:web:api.bsky.app";
const APPVIEW_FRAGMENT: &str = "#bsky_appview";
const RULE: &str = "============================================================";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScopeCase {
    pub label: &'static str,
    pub scope: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RpcScopeStatus {
    pub present: bool,
    pub has_fragment: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ScopeAnalysis {
    pub get_profile: RpcScopeStatus,
    pub get_follows: RpcScopeStatus,
    pub contains_fragment: bool,
    pub contains_query: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScopeComparison {
    pub declared: BTreeSet<String>,
    pub requested: BTreeSet<String>,
    pub missing: Vec<String>,
    pub extra: Vec<String>,
}

impl ScopeComparison {
    pub fn matches(&self) -> bool {
        self.missing.is_empty() && self.extra.is_empty()
    }
}

fn rpc_scope(method: &str, with_fragment: bool) -> String {
    let fragment = if with_fragment { APPVIEW_FRAGMENT } else { "" };
    format!("{method}{APPVIEW_AUDIENCE}{fragment}")
}

fn scope_with(profile_fragment: bool, follows_fragment: Option<bool>) -> String {
    let mut scope = format!("{BASE_SCOPE} {}", rpc_scope(PROFILE_RPC, profile_fragment));
    if let Some(follows_fragment) = follows_fragment {
        scope.push(' ');
        scope.push_str(&rpc_scope(FOLLOWS_RPC, follows_fragment));
    }
    scope
}

/// The four fragment permutations of the getProfile/getFollows pair.
pub fn scope_matrix() -> Vec<ScopeCase> {
    vec![
        ScopeCase {
            label: "Both with fragment",
            scope: scope_with(true, Some(true)),
        },
        ScopeCase {
            label: "getFollows without fragment",
            scope: scope_with(true, Some(false)),
        },
        ScopeCase {
            label: "Both without fragment",
            scope: scope_with(false, Some(false)),
        },
        ScopeCase {
            label: "getProfile without fragment",
            scope: scope_with(false, Some(true)),
        },
    ]
}

/// Scopes tried against the live authorize endpoint, in order.
pub fn live_scope_candidates() -> Vec<ScopeCase> {
    vec![
        ScopeCase {
            label: "Current (getFollows no fragment)",
            scope: scope_with(true, Some(false)),
        },
        ScopeCase {
            label: "Both with fragment",
            scope: scope_with(true, Some(true)),
        },
        ScopeCase {
            label: "Both without fragment",
            scope: scope_with(false, Some(false)),
        },
        ScopeCase {
            label: "Just getProfile (working in prod)",
            scope: scope_with(true, None),
        },
    ]
}

/// Mock client metadata document for a client hosted at `client_base`.
pub fn client_metadata(client_base: &str, scope: &str) -> Value {
    let base = client_base.trim_end_matches('/');
    json!({
        "client_id": format!("{base}/oauth-client-metadata.json"),
        "client_name": "Test Status App",
        "client_uri": base,
        "redirect_uris": [format!("{base}/oauth/callback")],
        "scope": scope,
        "grant_types": ["authorization_code", "refresh_token"],
        "response_types": ["code"],
        "token_endpoint_auth_method": "none",
        "dpop_bound_access_tokens": true,
    })
}

pub fn analyze_scope(scope: &str) -> ScopeAnalysis {
    let status = |method: &str| {
        scope
            .split_whitespace()
            .find(|token| token.starts_with(method))
            .map(|token| RpcScopeStatus {
                present: true,
                has_fragment: token.contains(APPVIEW_FRAGMENT),
            })
            .unwrap_or_default()
    };
    ScopeAnalysis {
        get_profile: status(PROFILE_RPC),
        get_follows: status(FOLLOWS_RPC),
        contains_fragment: scope.contains('#'),
        contains_query: scope.contains('?'),
    }
}

pub fn compare_scopes(declared: &str, requested: &str) -> ScopeComparison {
    let declared = declared
        .split_whitespace()
        .map(ToString::to_string)
        .collect::<BTreeSet<_>>();
    let requested = requested
        .split_whitespace()
        .map(ToString::to_string)
        .collect::<BTreeSet<_>>();
    let missing = requested.difference(&declared).cloned().collect();
    let extra = declared.difference(&requested).cloned().collect();
    ScopeComparison {
        declared,
        requested,
        missing,
        extra,
    }
}

pub fn authorization_url(
    auth_server: &str,
    client_id: &str,
    redirect_uri: &str,
    scope: &str,
    state: &str,
) -> Result<Url> {
    let endpoint = format!("{}/oauth/authorize", auth_server.trim_end_matches('/'));
    let mut url =
        Url::parse(&endpoint).with_context(|| format!("invalid authorize URL {endpoint}"))?;
    url.query_pairs_mut()
        .append_pair("response_type", "code")
        .append_pair("client_id", client_id)
        .append_pair("redirect_uri", redirect_uri)
        .append_pair("scope", scope)
        .append_pair("state", state);
    Ok(url)
}

/// Decode the claims segment of a JWT without verifying it.
pub fn decode_jwt_payload(token: &str) -> Result<Value> {
    let payload = token
        .split('.')
        .nth(1)
        .filter(|segment| !segment.is_empty())
        .ok_or_else(|| anyhow!("token has no payload segment"))?;
    let bytes = URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .context("token payload is not base64url")?;
    serde_json::from_slice(&bytes).context("token payload is not JSON")
}

fn preview(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

fn yes_no(value: bool) -> &'static str {
    if value { "yes" } else { "no" }
}

fn write_analysis(out: &mut dyn Write, analysis: &ScopeAnalysis) -> Result<()> {
    for (label, status) in [
        ("getProfile", analysis.get_profile),
        ("getFollows", analysis.get_follows),
    ] {
        if status.present {
            writeln!(
                out,
                "  - {label}: present (fragment: {})",
                yes_no(status.has_fragment)
            )?;
        } else {
            writeln!(out, "  - {label}: absent")?;
        }
    }
    Ok(())
}

/// Print each scope permutation with the client metadata it would produce.
pub fn print_scope_matrix(out: &mut dyn Write) -> Result<()> {
    writeln!(out, "Testing OAuth scope combinations...")?;
    writeln!(out, "{RULE}")?;
    for case in scope_matrix() {
        writeln!(out, "\nTest: {}", case.label)?;
        writeln!(out, "Scope: {}", case.scope)?;
        let metadata = client_metadata("https://test.example.com", &case.scope);
        writeln!(out, "Metadata: {}", serde_json::to_string_pretty(&metadata)?)?;
        write_analysis(out, &analyze_scope(&case.scope))?;
        writeln!(out, "{}", "-".repeat(40))?;
    }
    Ok(())
}

#[derive(Debug, Clone)]
pub struct MetadataFetch {
    pub url: String,
    pub status: u16,
    pub body: String,
    pub document: Option<Value>,
}

impl MetadataFetch {
    pub fn scope(&self) -> Option<&str> {
        self.document
            .as_ref()
            .and_then(|document| document.get("scope"))
            .and_then(Value::as_str)
    }
}

fn build_probe_client(config: &ToolConfig) -> Result<Client> {
    Client::builder()
        .timeout(config.request_timeout())
        .redirect(Policy::none())
        .cookie_store(true)
        .user_agent(config.user_agent())
        .build()
        .context("failed to build probe HTTP client")
}

pub fn fetch_metadata(client: &Client, url: &str, browser_like: bool) -> Result<MetadataFetch> {
    let mut request = client.get(url);
    if browser_like {
        request = request
            .header("User-Agent", "Bluesky OAuth Client")
            .header("Accept", "application/json");
    }
    let response = request
        .send()
        .with_context(|| format!("failed to fetch {url}"))?;
    let status = response.status().as_u16();
    let body = response.text().context("failed to read metadata body")?;
    let document = if (200..300).contains(&status) {
        serde_json::from_str::<Value>(&body).ok()
    } else {
        None
    };
    Ok(MetadataFetch {
        url: url.to_string(),
        status,
        body,
        document,
    })
}

/// Compare the scope declared by the production and preview deployments.
pub fn compare_deployments(config: &ToolConfig, out: &mut dyn Write) -> Result<()> {
    let client = build_probe_client(config)?;

    writeln!(out, "{RULE}")?;
    writeln!(out, "OAuth Metadata and Scope Test")?;
    writeln!(out, "{RULE}")?;

    let mut scopes = Vec::new();
    for (index, (label, url)) in [
        ("Production", config.production_metadata_url()),
        ("Preview", config.preview_metadata_url()),
    ]
    .into_iter()
    .enumerate()
    {
        writeln!(out, "\n{}. {label} site metadata:", index + 1)?;
        let fetch = fetch_metadata(&client, url, false)?;
        match fetch.scope() {
            Some(scope) => {
                writeln!(out, "  got metadata from {}", fetch.url)?;
                writeln!(out, "  Scope: {scope}")?;
                write_analysis(out, &analyze_scope(scope))?;
                scopes.push(scope.to_string());
            }
            None => {
                writeln!(out, "  failed to get metadata: HTTP {}", fetch.status)?;
                writeln!(out, "  body: {}", preview(&fetch.body, 200))?;
            }
        }
    }

    writeln!(out, "\n3. Comparison:")?;
    if let [production, preview_scope] = scopes.as_slice() {
        if production == preview_scope {
            writeln!(out, "  scopes are identical")?;
        } else {
            writeln!(out, "  scopes differ:")?;
            writeln!(out, "  Production:  {production}")?;
            writeln!(out, "  Preview:     {preview_scope}")?;
        }
    } else {
        writeln!(out, "  skipped: both documents are needed")?;
    }

    writeln!(out, "\n4. What the authorization server's errors asked for:")?;
    writeln!(out, "  - getProfile needs: {}", rpc_scope(PROFILE_RPC, true))?;
    writeln!(out, "  - getFollows needs: {}", rpc_scope(FOLLOWS_RPC, false))?;

    writeln!(out, "\n5. OAuth authorization URL test:")?;
    let url = authorization_url(
        config.auth_server(),
        config.client_id(),
        config.redirect_uri(),
        config.requested_scope(),
        "test",
    )?;
    writeln!(out, "  Authorization URL (first 150 chars):")?;
    writeln!(out, "  {}...", preview(url.as_str(), 150))?;

    writeln!(out, "\n{RULE}")?;
    writeln!(
        out,
        "Note: the server may cache grants; old tokens can keep old scopes."
    )?;
    writeln!(out, "{RULE}")?;
    Ok(())
}

/// Walk through what the authorization server would see when it fetches `metadata_url`.
pub fn validate_metadata(
    config: &ToolConfig,
    metadata_url: &str,
    out: &mut dyn Write,
) -> Result<()> {
    let client = build_probe_client(config)?;

    writeln!(out, "{RULE}")?;
    writeln!(out, "METADATA VALIDATION TEST")?;
    writeln!(out, "{RULE}")?;

    writeln!(out, "\n1. Fetching metadata from: {metadata_url}")?;
    let fetch = fetch_metadata(&client, metadata_url, false)?;
    let Some(document) = fetch.document.as_ref() else {
        writeln!(out, "  failed to fetch metadata: HTTP {}", fetch.status)?;
        writeln!(out, "  body: {}", preview(&fetch.body, 500))?;
        return Ok(());
    };
    writeln!(out, "  metadata fetched")?;

    writeln!(out, "\n2. Metadata content:")?;
    writeln!(out, "{}", serde_json::to_string_pretty(document)?)?;

    writeln!(out, "\n3. Repeated fetches (cache check):")?;
    for attempt in 1..=3 {
        let repeat = fetch_metadata(&client, metadata_url, true)?;
        match repeat.scope() {
            Some(scope) => writeln!(
                out,
                "  Request {attempt}: scope = {}...",
                preview(scope, 50)
            )?,
            None => writeln!(out, "  Request {attempt}: failed with {}", repeat.status)?,
        }
    }

    let declared = fetch.scope().unwrap_or_default();
    let comparison = compare_scopes(declared, config.requested_scope());
    writeln!(out, "\n4. Checking scope matching:")?;
    writeln!(out, "  Declared scopes ({}):", comparison.declared.len())?;
    for scope in &comparison.declared {
        writeln!(out, "    - {scope}")?;
    }
    writeln!(out, "\n  Requested scopes ({}):", comparison.requested.len())?;
    for scope in &comparison.requested {
        writeln!(out, "    - {scope}")?;
    }

    writeln!(out, "\n5. Comparison:")?;
    if comparison.matches() {
        writeln!(out, "  scopes match exactly")?;
    } else {
        writeln!(out, "  scopes don't match")?;
        if !comparison.missing.is_empty() {
            writeln!(out, "  Missing from metadata: {:?}", comparison.missing)?;
        }
        if !comparison.extra.is_empty() {
            writeln!(out, "  Extra in metadata: {:?}", comparison.extra)?;
        }
    }

    writeln!(out, "\n6. URL encoding check:")?;
    let encoded = urlencoding::encode(declared);
    writeln!(out, "  URL encoded scope: {}...", preview(&encoded, 100))?;
    let analysis = analyze_scope(declared);
    if analysis.contains_fragment {
        writeln!(out, "  warning: scope contains a # fragment")?;
    }
    if analysis.contains_query {
        writeln!(out, "  warning: scope contains ? query params")?;
    }

    writeln!(out, "\n{RULE}")?;
    writeln!(out, "Possible reasons for a 400 on authorize:")?;
    writeln!(out, "1. Metadata isn't reachable by the authorization server")?;
    writeln!(out, "2. Scope format is incorrect")?;
    writeln!(out, "3. Client ID doesn't match the redirect URI domain")?;
    writeln!(out, "4. The client needs to be registered differently")?;
    writeln!(out, "{RULE}")?;
    Ok(())
}

fn header_value(response: &Response, name: &str) -> Option<String> {
    response
        .headers()
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(ToString::to_string)
}

struct AuthorizeAttempt {
    status: u16,
    location: Option<String>,
    headers: Vec<(String, String)>,
    body: String,
}

/// Log in with an app password and walk the authorize/token/API sequence.
pub fn run_live_flow(
    config: &ToolConfig,
    handle: &str,
    app_password: &str,
    out: &mut dyn Write,
) -> Result<()> {
    let client = build_probe_client(config)?;
    let auth_server = config.auth_server();

    writeln!(out, "{RULE}")?;
    writeln!(out, "TESTING REAL OAUTH FLOW")?;
    writeln!(out, "{RULE}")?;

    writeln!(out, "\n1. Creating session...")?;
    let login = client
        .post(format!("{auth_server}/xrpc/com.atproto.server.createSession"))
        .json(&json!({ "identifier": handle, "password": app_password }))
        .send()
        .context("failed to reach createSession")?;
    if !login.status().is_success() {
        let status = login.status().as_u16();
        let body = login.text().unwrap_or_default();
        writeln!(out, "Failed to login (HTTP {status}): {body}")?;
        return Ok(());
    }
    let session: Value = login.json().context("createSession returned invalid JSON")?;
    let did = session
        .get("did")
        .and_then(Value::as_str)
        .ok_or_else(|| anyhow!("createSession response has no did"))?
        .to_string();
    let access_jwt = session
        .get("accessJwt")
        .and_then(Value::as_str)
        .ok_or_else(|| anyhow!("createSession response has no accessJwt"))?
        .to_string();
    writeln!(out, "  logged in as {did}")?;

    writeln!(out, "\n2. Starting OAuth flow...")?;
    let mut last_attempt = None::<AuthorizeAttempt>;
    let mut redirected = None::<AuthorizeAttempt>;
    for case in live_scope_candidates() {
        writeln!(out, "\nTesting: {}", case.label)?;
        writeln!(out, "Scope: {}", case.scope)?;
        let url = authorization_url(
            auth_server,
            config.client_id(),
            config.redirect_uri(),
            &case.scope,
            "test123",
        )?;
        let response = client
            .get(url)
            .bearer_auth(&access_jwt)
            .send()
            .context("failed to reach authorize endpoint")?;
        let status = response.status().as_u16();
        let location = header_value(&response, "location");
        let headers = response
            .headers()
            .iter()
            .map(|(name, value)| {
                (
                    name.to_string(),
                    value.to_str().unwrap_or("<binary>").to_string(),
                )
            })
            .collect::<Vec<_>>();
        let body = response.text().unwrap_or_default();
        writeln!(out, "  Status: {status}")?;

        let attempt = AuthorizeAttempt {
            status,
            location,
            headers,
            body,
        };
        match status {
            302 => {
                writeln!(out, "  this scope configuration was accepted")?;
                if redirected.is_none() {
                    redirected = Some(attempt);
                }
            }
            400 => {
                if let Some(title) = extract_title(&attempt.body) {
                    writeln!(out, "  Error: {title}")?;
                }
                last_attempt = Some(attempt);
            }
            _ => {
                writeln!(out, "  Unexpected status")?;
                last_attempt = Some(attempt);
            }
        }
    }

    let Some(attempt) = redirected.or(last_attempt) else {
        return Ok(());
    };
    writeln!(out, "\nAuthorization response status: {}", attempt.status)?;
    if attempt.status != 302 {
        writeln!(out, "Response headers:")?;
        for (name, value) in &attempt.headers {
            writeln!(out, "  {name}: {value}")?;
        }
        writeln!(out, "Response body: {}", preview(&attempt.body, 500))?;
        return Ok(());
    }

    let Some(location) = attempt.location else {
        writeln!(out, "no redirect location")?;
        return Ok(());
    };
    let base = Url::parse(auth_server).with_context(|| format!("invalid {auth_server}"))?;
    let redirect = Url::parse(&location)
        .or_else(|_| base.join(&location))
        .with_context(|| format!("invalid redirect location {location}"))?;
    let query = redirect
        .query_pairs()
        .map(|(key, value)| (key.into_owned(), value.into_owned()))
        .collect::<Vec<_>>();
    let lookup = |key: &str| {
        query
            .iter()
            .find(|(name, _)| name == key)
            .map(|(_, value)| value.clone())
    };

    let Some(code) = lookup("code") else {
        if let Some(error) = lookup("error") {
            writeln!(
                out,
                "got error: {error} - {}",
                lookup("error_description").unwrap_or_default()
            )?;
        } else {
            writeln!(out, "unexpected redirect: {location}")?;
        }
        return Ok(());
    };
    writeln!(out, "got authorization code: {}...", preview(&code, 20))?;

    writeln!(out, "\n3. Exchanging code for token...")?;
    let token_response = client
        .post(format!("{auth_server}/oauth/token"))
        .json(&json!({
            "grant_type": "authorization_code",
            "code": code,
            "redirect_uri": config.redirect_uri(),
            "client_id": config.client_id(),
        }))
        .send()
        .context("failed to reach token endpoint")?;
    let token_status = token_response.status().as_u16();
    writeln!(out, "Token exchange status: {token_status}")?;
    let token_body = token_response.text().unwrap_or_default();
    if token_status != 200 {
        writeln!(out, "token exchange failed: {token_body}")?;
        return Ok(());
    }
    let token_data: Value =
        serde_json::from_str(&token_body).context("token endpoint returned invalid JSON")?;
    let Some(oauth_token) = token_data.get("access_token").and_then(Value::as_str) else {
        writeln!(out, "token response has no access_token")?;
        return Ok(());
    };
    writeln!(out, "got OAuth token")?;

    match decode_jwt_payload(oauth_token) {
        Ok(payload) => {
            writeln!(out, "\nToken payload:")?;
            writeln!(out, "{}", serde_json::to_string_pretty(&payload)?)?;
            match payload.get("scope").and_then(Value::as_str) {
                Some(scope) => writeln!(out, "\nScopes in token: {scope}")?,
                None => writeln!(out, "\nNo scope field in token")?,
            }
        }
        Err(error) => writeln!(out, "could not decode token payload: {error:#}")?,
    }

    writeln!(out, "\n4. Testing OAuth token with APIs...")?;
    for (label, method, extra) in [
        ("getProfile", "app.bsky.actor.getProfile", None),
        ("getFollows", "app.bsky.graph.getFollows", Some(("limit", "1"))),
    ] {
        let mut params = vec![("actor", did.as_str())];
        params.extend(extra);
        let response = client
            .get(format!("{auth_server}/xrpc/{method}"))
            .query(&params)
            .bearer_auth(oauth_token)
            .send()
            .with_context(|| format!("failed to call {method}"))?;
        let status = response.status();
        writeln!(out, "{label}: {}", status.as_u16())?;
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            writeln!(out, "  Error: {}", preview(&body, 200))?;
        }
    }

    writeln!(out, "\n{RULE}")?;
    writeln!(
        out,
        "Compare the scopes granted in the token with the ones requested above."
    )?;
    writeln!(out, "{RULE}")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use base64::Engine as _;
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;

    use super::*;

    #[test]
    fn matrix_covers_every_fragment_permutation() {
        let cases = scope_matrix();
        assert_eq!(cases.len(), 4);
        let flags = cases
            .iter()
            .map(|case| {
                let analysis = analyze_scope(&case.scope);
                (
                    analysis.get_profile.has_fragment,
                    analysis.get_follows.has_fragment,
                )
            })
            .collect::<BTreeSet<_>>();
        assert_eq!(flags.len(), 4);
        assert!(cases.iter().all(|case| case.scope.starts_with("atproto ")));
    }

    #[test]
    fn live_candidates_end_with_profile_only_scope() {
        let cases = live_scope_candidates();
        let last = cases.last().expect("candidates");
        let analysis = analyze_scope(&last.scope);
        assert!(analysis.get_profile.present);
        assert!(!analysis.get_follows.present);
    }

    #[test]
    fn analysis_is_per_token() {
        let scope = "atproto rpc:app.bsky.actor.getProfile?aud=did:web:api.bsky.app rpc:app.bsky.graph.getFollows?aud=did:web:api.bsky.app#bsky_appview";
        let analysis = analyze_scope(scope);
        assert_eq!(
            analysis.get_profile,
            RpcScopeStatus {
                present: true,
                has_fragment: false
            }
        );
        assert!(analysis.get_follows.has_fragment);
        assert!(analysis.contains_fragment);
        assert!(analysis.contains_query);

        let bare = analyze_scope("atproto transition:generic");
        assert!(!bare.get_profile.present);
        assert!(!bare.contains_fragment);
    }

    #[test]
    fn metadata_document_carries_scope_and_client_urls() {
        let metadata = client_metadata("https://test.example.com/", "atproto");
        assert_eq!(
            metadata["client_id"],
            "https://test.example.com/oauth-client-metadata.json"
        );
        assert_eq!(
            metadata["redirect_uris"][0],
            "https://test.example.com/oauth/callback"
        );
        assert_eq!(metadata["scope"], "atproto");
        assert_eq!(metadata["dpop_bound_access_tokens"], true);
    }

    #[test]
    fn comparison_reports_missing_and_extra_tokens() {
        let comparison = compare_scopes("atproto a b", "atproto b c");
        assert!(!comparison.matches());
        assert_eq!(comparison.missing, vec!["c"]);
        assert_eq!(comparison.extra, vec!["a"]);
        assert!(compare_scopes("b  a", "a b").matches());
    }

    #[test]
    fn authorization_url_encodes_fragment_in_scope() {
        let url = authorization_url(
            "https://auth.example/",
            "https://app.example/oauth-client-metadata.json",
            "https://app.example/oauth/callback",
            "atproto rpc:x?aud=did:web:y#frag",
            "test",
        )
        .expect("url");
        assert_eq!(url.path(), "/oauth/authorize");
        assert!(url.fragment().is_none());
        let scope = url
            .query_pairs()
            .find(|(key, _)| key == "scope")
            .map(|(_, value)| value.into_owned());
        assert_eq!(scope.as_deref(), Some("atproto rpc:x?aud=did:web:y#frag"));
        assert!(url.as_str().contains("%23frag"));
    }

    #[test]
    fn jwt_payload_decodes_with_or_without_padding() {
        let claims = URL_SAFE_NO_PAD.encode(br#"{"scope":"atproto","sub":"did:plc:x"}"#);
        let token = format!("header.{claims}.signature");
        let payload = decode_jwt_payload(&token).expect("decode");
        assert_eq!(payload["scope"], "atproto");

        let padded = format!("header.{claims}==.signature");
        assert_eq!(decode_jwt_payload(&padded).expect("decode padded"), payload);

        assert!(decode_jwt_payload("not-a-jwt").is_err());
    }

    #[test]
    fn matrix_transcript_lists_each_case() {
        let mut out = Vec::new();
        print_scope_matrix(&mut out).expect("print");
        let text = String::from_utf8(out).expect("utf8");
        for case in scope_matrix() {
            assert!(text.contains(&format!("Test: {}", case.label)));
        }
        assert!(text.contains("\"token_endpoint_auth_method\": \"none\""));
    }
}
