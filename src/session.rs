//! Server-held browser sessions.
//!
//! Handlers load a [`Session`] value at the start of a request, pass it into
//! whatever needs it, and save it back explicitly. The browser only ever
//! holds a signed session id: `relay_session={id}.{base64url(hmac)}`.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::Sha256;

pub const SESSION_COOKIE: &str = "relay_session";

type HmacSha256 = Hmac<Sha256>;

/// Merged identity document returned by the aggregation API's `/profile`.
///
/// Only `id` and `services` drive decisions; everything else is kept so the
/// document round-trips untouched. `id` is stored as sent (string or number)
/// and a null or missing `services` reads as no linked services.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub services: Map<String, Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<Map<String, Value>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(Option::<Map<String, Value>>::deserialize(deserializer)?.unwrap_or_default())
}

impl Profile {
    pub fn has_service(&self, service: &str) -> bool {
        self.services.contains_key(service)
    }

    /// The aggregation API identity, rendered as text. Empty strings, nulls
    /// and non-scalar ids count as no identity.
    pub fn id(&self) -> Option<String> {
        match self.id.as_ref()? {
            Value::String(s) if !s.is_empty() => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }
}

/// Per-user state.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Session {
    pub access_token: Option<String>,
    pub profile: Option<Profile>,
}

/// A loaded session plus the id it is stored under, if any.
#[derive(Debug, Default)]
pub struct LoadedSession {
    id: Option<String>,
    pub session: Session,
}

/// In-memory session table keyed by random ids. Entries are never evicted;
/// the table grows by one per new browser for the life of the process.
#[derive(Clone)]
pub struct SessionStore {
    mac: HmacSha256,
    sessions: Arc<RwLock<HashMap<String, Session>>>,
}

impl SessionStore {
    pub fn new(secret: &[u8]) -> Result<Self, hmac::digest::InvalidLength> {
        Ok(Self {
            mac: HmacSha256::new_from_slice(secret)?,
            sessions: Arc::new(RwLock::new(HashMap::new())),
        })
    }

    fn sign(&self, id: &str) -> String {
        let mut mac = self.mac.clone();
        mac.update(id.as_bytes());
        let tag = URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());
        format!("{id}.{tag}")
    }

    fn verify<'a>(&self, cookie_value: &'a str) -> Option<&'a str> {
        let (id, tag) = cookie_value.rsplit_once('.')?;
        let tag = URL_SAFE_NO_PAD.decode(tag).ok()?;
        let mut mac = self.mac.clone();
        mac.update(id.as_bytes());
        mac.verify_slice(&tag).ok()?;
        Some(id)
    }

    /// Look up the session named by the request's cookie. Unsigned, forged or
    /// unknown ids yield an empty session.
    pub fn load(&self, jar: &CookieJar) -> LoadedSession {
        let Some(id) = jar
            .get(SESSION_COOKIE)
            .and_then(|c| self.verify(c.value()))
            .map(str::to_string)
        else {
            return LoadedSession::default();
        };

        let sessions = match self.sessions.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        match sessions.get(&id) {
            Some(session) => LoadedSession {
                id: Some(id),
                session: session.clone(),
            },
            None => LoadedSession::default(),
        }
    }

    /// Persist `loaded`, allocating an id on first save, and return the jar
    /// carrying the signed cookie. Saving again later in the same request
    /// overwrites the same entry.
    pub fn save(&self, jar: CookieJar, loaded: &mut LoadedSession) -> CookieJar {
        let id = loaded
            .id
            .get_or_insert_with(|| format!("{:032x}", rand::random::<u128>()))
            .clone();

        {
            let mut sessions = match self.sessions.write() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            sessions.insert(id.clone(), loaded.session.clone());
        }

        let cookie = Cookie::build((SESSION_COOKIE, self.sign(&id)))
            .path("/")
            .http_only(true)
            .same_site(SameSite::Lax);
        jar.add(cookie)
    }
}
