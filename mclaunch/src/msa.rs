//! Microsoft Account authentication for Minecraft accounts.
//!
//! See <https://minecraft.wiki/w/Microsoft_authentication>.

use std::io::Write;
use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::RngCore;
use reqwest::{Client, StatusCode, Url};
use serde_json::json;
use sha2::{Digest, Sha256};
use uuid::{uuid, Uuid};

use jsonwebtoken::{DecodingKey, TokenData, Validation};


const AUTHORIZE_URL: &str = "https://login.microsoftonline.com/consumers/oauth2/v2.0/authorize";
const TOKEN_URL: &str = "https://login.microsoftonline.com/consumers/oauth2/v2.0/token";
const REFRESH_URL: &str = "https://login.live.com/oauth20_token.srf";
const XBL_URL: &str = "https://user.auth.xboxlive.com/user/authenticate";
const XSTS_URL: &str = "https://xsts.auth.xboxlive.com/xsts/authorize";
const MC_LOGIN_URL: &str = "https://api.minecraftservices.com/authentication/login_with_xbox";
const MC_PROFILE_URL: &str = "https://api.minecraftservices.com/minecraft/profile";

const SCOPE: &str = "XboxLive.signin offline_access";

/// Microsoft Account authenticator, holding the application (client) id and the
/// redirect URI registered for it.
#[derive(Debug, Clone)]
pub struct Auth {
    app_id: Arc<str>,
    redirect_uri: Arc<str>,
}

impl Auth {

    /// Create a new authenticator with the given application (client) id and redirect
    /// URI (must match one registered for the application in Azure).
    pub fn new(app_id: impl Into<Arc<str>>, redirect_uri: impl Into<Arc<str>>) -> Self {
        Self {
            app_id: app_id.into(),
            redirect_uri: redirect_uri.into(),
        }
    }

    pub fn app_id(&self) -> &str {
        &self.app_id
    }

    pub fn redirect_uri(&self) -> &str {
        &self.redirect_uri
    }

    /// Generate a login URL using the PKCE authorization code flow. The returned
    /// [`PendingLogin`] must be kept around (it holds the code verifier and expected
    /// state) until the browser redirects back with an authorization code.
    pub fn generate_login(&self) -> Result<(String, PendingLogin), AuthError> {

        let code_verifier = generate_code_verifier();
        let code_challenge = URL_SAFE_NO_PAD.encode(Sha256::digest(code_verifier.as_bytes()));
        let state = generate_state();

        let mut url = Url::parse(AUTHORIZE_URL).map_err(|e| AuthError::Unknown(e.to_string()))?;
        url.query_pairs_mut()
            .append_pair("client_id", &self.app_id)
            .append_pair("response_type", "code")
            .append_pair("redirect_uri", &self.redirect_uri)
            .append_pair("response_mode", "query")
            .append_pair("scope", SCOPE)
            .append_pair("state", &state)
            .append_pair("code_challenge", &code_challenge)
            .append_pair("code_challenge_method", "S256");

        let pending = PendingLogin {
            client: crate::http::client()?,
            app_id: Arc::clone(&self.app_id),
            redirect_uri: Arc::clone(&self.redirect_uri),
            code_verifier,
            state,
        };

        Ok((url.to_string(), pending))

    }

}

/// Generate a PKCE code verifier: 96 random bytes, base64url (no padding), truncated to
/// at most 128 characters as required by the spec.
fn generate_code_verifier() -> String {
    let mut bytes = [0u8; 96];
    rand::thread_rng().fill_bytes(&mut bytes);
    let mut verifier = URL_SAFE_NO_PAD.encode(bytes);
    verifier.truncate(128);
    verifier
}

/// Generate an opaque anti-CSRF state token: 16 random bytes, base64url (no padding).
fn generate_state() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// A login that has been started and is waiting for the OAuth redirect callback.
#[derive(Debug, Clone)]
pub struct PendingLogin {
    client: Client,
    app_id: Arc<str>,
    redirect_uri: Arc<str>,
    code_verifier: String,
    state: String,
}

impl PendingLogin {

    /// Parse the redirect callback URL, checking that the `state` parameter matches the
    /// one generated for this login, and returning the authorization `code` on success.
    pub fn parse_callback(&self, callback_url: &str) -> Result<String, AuthError> {

        let url = Url::parse(callback_url).map_err(|_| AuthError::AuthProtocolError)?;

        let mut code = None;
        let mut state = None;

        for (key, value) in url.query_pairs() {
            match &*key {
                "code" => code = Some(value.into_owned()),
                "state" => state = Some(value.into_owned()),
                _ => {}
            }
        }

        match state {
            Some(state) if state == self.state => {}
            _ => return Err(AuthError::AuthProtocolError),
        }

        code.ok_or(AuthError::AuthProtocolError)

    }

    /// Exchange the authorization code obtained from [`Self::parse_callback`] for a
    /// fully authenticated Minecraft account.
    pub fn exchange(&self, code: &str) -> Result<Account, AuthError> {

        crate::rt::sync(async move {

            let req = MsTokenRequest::AuthorizationCode {
                client_id: &self.app_id,
                code,
                redirect_uri: &self.redirect_uri,
                code_verifier: &self.code_verifier,
            };

            let res = request_ms_token(&self.client, TOKEN_URL, &req, SCOPE).await?;
            let res = res.map_err(|e| AuthError::Unknown(e.error_description))?;

            let mut account = request_minecraft_account(&self.client, &res.access_token).await?;
            account.app_id = self.app_id.to_string();
            account.refresh_token = res.refresh_token;

            Ok(account)

        })

    }

}

/// An authenticated and validated Minecraft account.
#[derive(Debug, Clone)]
pub struct Account {
    app_id: String,
    refresh_token: String,
    access_token: String,
    uuid: Uuid,
    username: String,
    xuid: String,
}

impl Account {

    /// The UUID namespace used to derive offline UUIDs from an arbitrary seed (hostname
    /// or username) when no Mojang-compatible derivation is requested.
    const NAMESPACE_OFFLINE: Uuid = uuid!("8df5a464-38de-11ec-aa66-3fd636ee2ed7");

    /// Build an offline (non-authenticated) account for the given username, using the
    /// same UUID derivation as vanilla offline-mode servers: an MD5 (v3) UUID hashed
    /// from `OfflinePlayer:<username>`. The username is truncated to 16 characters.
    pub fn offline(mut username: String) -> Self {

        username.truncate(16);

        let mut context = md5::Context::new();
        context.write_fmt(format_args!("OfflinePlayer:{username}")).unwrap();

        let uuid = uuid::Builder::from_bytes(context.compute().0)
            .with_variant(uuid::Variant::RFC4122)
            .with_version(uuid::Version::Md5)
            .into_uuid();

        Self {
            app_id: String::new(),
            refresh_token: String::new(),
            access_token: String::new(),
            uuid,
            username,
            xuid: String::new(),
        }

    }

    /// Build an offline account with a username derived from this machine's hostname,
    /// using a reproducible UUID v5 derivation rather than a random UUID (unlike the
    /// fully random UUID that some launchers generate for test accounts), so repeated
    /// runs on the same machine resolve to the same account.
    pub fn offline_random() -> Self {
        let hostname = gethostname::gethostname();
        let uuid = Uuid::new_v5(&Self::NAMESPACE_OFFLINE, hostname.as_encoded_bytes());
        let mut username = uuid.to_string();
        username.truncate(8);
        Self {
            app_id: String::new(),
            refresh_token: String::new(),
            access_token: String::new(),
            uuid,
            username,
            xuid: String::new(),
        }
    }

    /// The ID of the application that account was authorized for, empty for offline
    /// accounts.
    pub fn app_id(&self) -> &str {
        &self.app_id
    }

    /// The access token to give to Minecraft's AuthLib when starting the game, empty
    /// for offline accounts.
    pub fn access_token(&self) -> &str {
        &self.access_token
    }

    /// The refresh token used to request a new access token, empty for offline
    /// accounts.
    pub fn refresh_token(&self) -> &str {
        &self.refresh_token
    }

    /// The player's UUID.
    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    /// The player's username.
    pub fn username(&self) -> &str {
        &self.username
    }

    /// The Xbox XUID, empty for non-MSA (offline) accounts.
    pub fn xuid(&self) -> &str {
        &self.xuid
    }

    /// True if this account has no refresh token, meaning it's an offline account that
    /// cannot be refreshed nor used to query the real profile.
    pub fn is_offline(&self) -> bool {
        self.app_id.is_empty()
    }

    /// Rebuild an account from its persisted parts, as stored by the launcher's
    /// persistent state. Crate-private since it bypasses authentication entirely.
    pub(crate) fn from_parts(
        app_id: String,
        refresh_token: String,
        access_token: String,
        uuid: Uuid,
        username: String,
        xuid: String,
    ) -> Self {
        Self { app_id, refresh_token, access_token, uuid, username, xuid }
    }

    /// Request this account's profile, updating the username if it changed since the
    /// last request. Not required immediately after authentication or refresh.
    pub fn request_profile(&mut self) -> Result<(), AuthError> {
        let client = crate::http::client()?;
        let profile = crate::rt::sync(request_minecraft_profile(&client, &self.access_token))?;
        self.username = profile.name;
        Ok(())
    }

    /// Refresh this account's access token using its stored refresh token, updating the
    /// refresh token, access token, UUID and username in place.
    pub fn request_refresh(&mut self) -> Result<(), AuthError> {

        crate::rt::sync(async move {

            let client = crate::http::client()?;
            let req = MsTokenRequest::RefreshToken {
                client_id: &self.app_id,
                scope: Some(SCOPE),
                refresh_token: &self.refresh_token,
            };

            let res = match request_ms_token(&client, REFRESH_URL, &req, SCOPE).await? {
                Ok(res) => res,
                Err(_) => return Err(AuthError::InvalidRefreshToken),
            };

            let account = request_minecraft_account(&client, &res.access_token).await?;
            self.refresh_token = res.refresh_token;
            self.access_token = account.access_token;
            self.uuid = account.uuid;
            self.username = account.username;
            self.xuid = account.xuid;

            Ok(())

        })

    }

}

/// Request a Minecraft Account token from the given Microsoft OAuth2 token endpoint.
async fn request_ms_token(
    client: &Client,
    endpoint: &str,
    req: &MsTokenRequest<'_>,
    expected_scope: &str,
) -> Result<std::result::Result<MsTokenSuccess, MsAuthError>, AuthError> {

    let res = client
        .post(endpoint)
        .form(req)
        .send().await?;

    match res.status() {
        StatusCode::OK => {

            let res = res.json::<MsTokenSuccess>().await?;

            if res.token_type != "Bearer" {
                return Err(AuthError::Unknown(format!("unexpected token type: {}", res.token_type)));
            } else if res.scope != expected_scope {
                return Err(AuthError::Unknown(format!("unexpected scope: {}", res.scope)));
            }

            Ok(Ok(res))

        }
        StatusCode::BAD_REQUEST => Ok(Err(res.json::<MsAuthError>().await?)),
        status => Err(AuthError::InvalidStatus(status)),
    }

}

/// Full procedure to gain access to a real Minecraft account from a given MSA access
/// token: XBL authenticate, XSTS authorize, Minecraft login with Xbox, profile fetch.
/// The returned account has no client id and no refresh token set.
async fn request_minecraft_account(
    client: &Client,
    ms_access_token: &str,
) -> Result<Account, AuthError> {

    let user_res = request_xbl_user(client, ms_access_token).await?;
    let xsts_res = request_xbl_xsts(client, &user_res.token).await?;

    if user_res.display_claims.xui.is_empty()
    || user_res.display_claims.xui != xsts_res.display_claims.xui {
        return Err(AuthError::Unknown("invalid or incoherent display claims".to_string()));
    }

    let user_hash = xsts_res.display_claims.xui[0].uhs.as_str();
    let xsts_token = xsts_res.token.as_str();

    let mc_res = request_minecraft_with_xbl(client, user_hash, xsts_token).await?;
    let access_token = mc_res.access_token.ok_or(AuthError::AzureAppNotPermitted)?;
    let mc_res_token = decode_jwt_without_validation::<MinecraftToken>(&access_token)?;
    let profile_res = request_minecraft_profile(client, &access_token).await?;

    Ok(Account {
        app_id: String::new(),
        refresh_token: String::new(),
        access_token,
        uuid: profile_res.id,
        username: profile_res.name,
        xuid: mc_res_token.claims.xuid,
    })

}

async fn request_xbl_user(client: &Client, ms_access_token: &str) -> Result<XblSuccess, AuthError> {

    let req = json!({
        "Properties": {
            "AuthMethod": "RPS",
            "SiteName": "user.auth.xboxlive.com",
            "RpsTicket": format!("d={ms_access_token}"),
        },
        "RelyingParty": "http://auth.xboxlive.com",
        "TokenType": "JWT",
    });

    let res = client.post(XBL_URL).json(&req).send().await?;

    match res.status() {
        StatusCode::OK => Ok(res.json::<XblSuccess>().await?),
        status => Err(AuthError::InvalidStatus(status)),
    }

}

async fn request_xbl_xsts(client: &Client, xbl_user_token: &str) -> Result<XblSuccess, AuthError> {

    let req = json!({
        "Properties": {
            "SandboxId": "RETAIL",
            "UserTokens": [xbl_user_token],
        },
        "RelyingParty": "rp://api.minecraftservices.com/",
        "TokenType": "JWT",
    });

    let res = client.post(XSTS_URL).json(&req).send().await?;

    match res.status() {
        StatusCode::OK => Ok(res.json::<XblSuccess>().await?),
        StatusCode::UNAUTHORIZED => {
            let res = res.json::<XblError>().await?;
            Err(AuthError::Unknown(res.message))
        }
        status => Err(AuthError::InvalidStatus(status)),
    }

}

async fn request_minecraft_with_xbl(
    client: &Client,
    user_hash: &str,
    xsts_token: &str,
) -> Result<MinecraftWithXblSuccess, AuthError> {

    let req = json!({
        "identityToken": format!("XBL3.0 x={user_hash};{xsts_token}"),
    });

    let res = client.post(MC_LOGIN_URL).json(&req).send().await?;

    match res.status() {
        StatusCode::OK => Ok(res.json::<MinecraftWithXblSuccess>().await?),
        status => Err(AuthError::InvalidStatus(status)),
    }

}

async fn request_minecraft_profile(client: &Client, access_token: &str) -> Result<MinecraftProfileSuccess, AuthError> {

    let res = client
        .get(MC_PROFILE_URL)
        .bearer_auth(access_token)
        .send().await?;

    match res.status() {
        StatusCode::OK => Ok(res.json::<MinecraftProfileSuccess>().await?),
        StatusCode::FORBIDDEN => Err(AuthError::Unknown(
            "forbidden access to api.minecraftservices.com, the application likely lacks approval from Mojang".to_string(),
        )),
        StatusCode::UNAUTHORIZED => Err(AuthError::OutdatedToken),
        StatusCode::NOT_FOUND => Err(AuthError::AccountNotOwnMinecraft),
        status => Err(AuthError::InvalidStatus(status)),
    }

}

fn decode_jwt_without_validation<T>(token: &str) -> Result<TokenData<T>, AuthError>
where
    T: serde::de::DeserializeOwned,
{
    let key = DecodingKey::from_secret(&[]);
    let mut validation = Validation::default();
    validation.insecure_disable_signature_validation();
    validation.validate_aud = false;
    Ok(jsonwebtoken::decode(token, &key, &validation)?)
}

/// Errors raised at any step of the authentication chain.
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum AuthError {
    /// Reqwest HTTP-related error.
    #[error("reqwest: {0}")]
    Reqwest(#[from] reqwest::Error),
    /// A JWT decoding error happened.
    #[error("jwt: {0}")]
    Jwt(#[from] jsonwebtoken::errors::Error),
    /// An unknown HTTP status has been received.
    #[error("invalid status: {0}")]
    InvalidStatus(reqwest::StatusCode),
    /// An unknown, unhandled error happened.
    #[error("unknown: {0}")]
    Unknown(String),
    /// The OAuth redirect callback is missing its authorization code, or its `state`
    /// parameter doesn't match the one generated for this login.
    #[error("auth protocol error")]
    AuthProtocolError,
    /// The Minecraft-with-Xbox response has no access token, which happens when the
    /// application (client id) isn't Mojang-approved for Minecraft authentication.
    #[error("azure application not permitted to authenticate with minecraft services")]
    AzureAppNotPermitted,
    /// The authenticated Microsoft account does not own a copy of Minecraft.
    #[error("account does not own minecraft")]
    AccountNotOwnMinecraft,
    /// The stored refresh token was rejected by the token endpoint.
    #[error("invalid refresh token")]
    InvalidRefreshToken,
    #[error("outdated token")]
    OutdatedToken,
}

/// (URL encoded)
#[derive(Debug, Clone, serde::Serialize)]
#[serde(tag = "grant_type")]
enum MsTokenRequest<'a> {
    #[serde(rename = "authorization_code")]
    AuthorizationCode {
        client_id: &'a str,
        code: &'a str,
        redirect_uri: &'a str,
        code_verifier: &'a str,
    },
    #[serde(rename = "refresh_token")]
    RefreshToken {
        client_id: &'a str,
        scope: Option<&'a str>,
        refresh_token: &'a str,
    },
}

/// (JSON)
#[derive(Debug, Clone, serde::Deserialize)]
struct MsTokenSuccess {
    token_type: String,
    scope: String,
    #[allow(unused)]
    expires_in: u32,
    access_token: String,
    refresh_token: String,
}

/// (JSON) Generic authentication error returned by the API.
#[derive(Debug, Clone, serde::Deserialize)]
struct MsAuthError {
    #[allow(unused)]
    error: String,
    error_description: String,
}

/// (JSON)
#[derive(Debug, Clone, serde::Deserialize)]
#[serde(rename_all = "PascalCase")]
struct XblSuccess {
    display_claims: XblDisplayClaims,
    token: String,
}

#[derive(Debug, Clone, serde::Deserialize)]
struct XblDisplayClaims {
    xui: Vec<XblXui>,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize)]
struct XblXui {
    uhs: String,
}

#[derive(Debug, Clone, serde::Deserialize)]
#[serde(rename_all = "PascalCase")]
#[allow(unused)]
struct XblError {
    message: String,
}

#[derive(Debug, Clone, serde::Deserialize)]
struct MinecraftWithXblSuccess {
    /// The actual Minecraft access token to use to launch the game, absent when the
    /// client application isn't Mojang-approved.
    access_token: Option<String>,
}

#[derive(Debug, Clone, serde::Deserialize)]
struct MinecraftProfileSuccess {
    #[serde(with = "uuid::serde::simple")]
    id: Uuid,
    name: String,
}

#[derive(Debug, Clone, serde::Deserialize)]
struct MinecraftToken {
    xuid: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generate_login_produces_pkce_pair() {
        let auth = Auth::new("app-id", "http://localhost:12345/callback");
        let (url, pending) = auth.generate_login().unwrap();

        assert!(url.contains("code_challenge="));
        assert!(url.contains("code_challenge_method=S256"));
        assert!(url.contains("state="));
        assert!(pending.code_verifier.len() <= 128);
        assert!(!pending.state.is_empty());
    }

    #[test]
    fn parse_callback_rejects_state_mismatch() {
        let auth = Auth::new("app-id", "http://localhost:12345/callback");
        let (_, pending) = auth.generate_login().unwrap();

        let bad = format!("http://localhost:12345/callback?code=abc&state=not-the-real-state");
        assert!(matches!(pending.parse_callback(&bad), Err(AuthError::AuthProtocolError)));
    }

    #[test]
    fn parse_callback_extracts_code_on_matching_state() {
        let auth = Auth::new("app-id", "http://localhost:12345/callback");
        let (_, pending) = auth.generate_login().unwrap();

        let good = format!("http://localhost:12345/callback?code=abc123&state={}", pending.state);
        assert_eq!(pending.parse_callback(&good).unwrap(), "abc123");
    }

    #[test]
    fn parse_callback_rejects_missing_code() {
        let auth = Auth::new("app-id", "http://localhost:12345/callback");
        let (_, pending) = auth.generate_login().unwrap();

        let missing_code = format!("http://localhost:12345/callback?state={}", pending.state);
        assert!(matches!(pending.parse_callback(&missing_code), Err(AuthError::AuthProtocolError)));
    }

    #[test]
    fn offline_account_derivation_is_stable() {
        let a = Account::offline("Steve".to_string());
        let b = Account::offline("Steve".to_string());
        assert_eq!(a.uuid(), b.uuid());
        assert_eq!(a.username(), "Steve");
        assert!(a.is_offline());
    }

    #[test]
    fn offline_account_derivation_differs_per_username() {
        let a = Account::offline("Steve".to_string());
        let b = Account::offline("Alex".to_string());
        assert_ne!(a.uuid(), b.uuid());
    }
}
