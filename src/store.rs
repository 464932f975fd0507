//! Session lifecycle controller.
//!
//! Resolves the session behind a request's cookie, seals values into stored
//! documents, and issues or expires the response cookie on save.

use http::header::SET_COOKIE;
use http::{HeaderValue, Request, Response};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::codec::{codecs_from_pairs, decode_multi, encode_multi, Codec, CodecError, KeyPair};
use crate::cookie::{build_cookie, find_cookie};
use crate::error::SessionError;
use crate::repository::{DocumentRepository, StoredDocument};
use crate::session::registry::RegistryEntry;
use crate::session::{CookieOptions, Session, SessionId, SessionRegistry, SessionValues};

/// Stores sessions as sealed documents in a [`DocumentRepository`].
pub struct SessionStore {
    codecs: Vec<Box<dyn Codec>>,
    options: CookieOptions,
    repository: Arc<dyn DocumentRepository>,
}

impl SessionStore {
    /// Build a store with one `SecureCookie` codec per key pair.
    ///
    /// `options` defaults to [`CookieOptions::default`]. The options' max age
    /// is applied to every codec before the store is returned.
    pub fn new(
        repository: Arc<dyn DocumentRepository>,
        options: Option<CookieOptions>,
        key_pairs: &[KeyPair],
    ) -> Result<Self, CodecError> {
        let codecs = codecs_from_pairs(key_pairs)?;
        Ok(Self::with_codecs(repository, options, codecs))
    }

    /// Build a store from pre-built codecs, newest key generation first.
    pub fn with_codecs(
        repository: Arc<dyn DocumentRepository>,
        options: Option<CookieOptions>,
        codecs: Vec<Box<dyn Codec>>,
    ) -> Self {
        let options = options.unwrap_or_default();
        let max_age = options.max_age;
        let mut store = Self {
            codecs,
            options,
            repository,
        };
        store.set_max_age(max_age);
        store
    }

    /// Store-wide cookie defaults.
    pub fn options(&self) -> &CookieOptions {
        &self.options
    }

    /// Set the store-wide max age and the embedded expiry of every codec
    /// that supports one. Individual sessions are deleted by setting their
    /// own `options.max_age` below zero instead.
    pub fn set_max_age(&mut self, secs: i64) {
        self.options.max_age = secs;

        for codec in &mut self.codecs {
            if let Some(expiring) = codec.as_expiring_mut() {
                expiring.set_max_age(secs);
            }
        }
    }

    /// Fetch-or-create: return the session registered for `name` in this
    /// request, decoding it on first use.
    ///
    /// The decode error from the first load, if any, is returned on every
    /// call. The session is always usable; on error it is new and empty.
    pub fn get<'r, B>(
        &self,
        req: &'r mut Request<B>,
        name: &str,
    ) -> (&'r mut Session, Option<Arc<SessionError>>) {
        let cookie = find_cookie(req.headers(), name);
        let registry = req
            .extensions_mut()
            .get_or_insert_default::<SessionRegistry>();

        let entry = registry
            .entries
            .entry(name.to_string())
            .or_insert_with(|| {
                let (session, error) = self.load(name, cookie.as_deref());
                RegistryEntry {
                    session,
                    error: error.map(Arc::new),
                }
            });

        (&mut entry.session, entry.error.clone())
    }

    /// Create-fresh: decode the session for `name` without consulting or
    /// updating the request registry.
    ///
    /// A missing cookie yields a new session and no error. Any decode or
    /// lookup failure yields a new, empty session together with the error.
    pub fn new_session<B>(&self, req: &Request<B>, name: &str) -> (Session, Option<SessionError>) {
        let cookie = find_cookie(req.headers(), name);
        self.load(name, cookie.as_deref())
    }

    fn load(&self, name: &str, cookie: Option<&str>) -> (Session, Option<SessionError>) {
        let mut session = Session::new(name, self.options.clone());

        let Some(cookie) = cookie else {
            return (session, None);
        };

        match self.resolve(name, cookie) {
            Ok((id, values)) => {
                session.id = Some(id);
                session.values = values;
                session.is_new = false;
                debug!(name = %name, session_id = %id, "Loaded session");
                (session, None)
            }
            Err(e) => {
                warn!(name = %name, error = %e, "Session could not be restored, starting a new one");
                (session, Some(e))
            }
        }
    }

    /// Cookie value -> identifier -> stored document -> values.
    fn resolve(&self, name: &str, cookie: &str) -> Result<(SessionId, SessionValues), SessionError> {
        let hex_id: String =
            decode_multi(name, cookie, &self.codecs).map_err(SessionError::CookieDecode)?;
        let id = SessionId::from_hex(&hex_id)?;

        let doc = self
            .repository
            .fetch_by_id(id)
            .map_err(SessionError::Repository)?
            .ok_or(SessionError::DocumentNotFound(id))?;

        match decode_multi(name, &doc.data, &self.codecs) {
            Ok(values) => Ok((id, values)),
            Err(e) => {
                // Unreadable under every key generation; nothing can restore it.
                if let Err(delete_err) = self.repository.delete_by_id(id) {
                    warn!(session_id = %id, error = %delete_err, "Failed to delete undecodable session document");
                }
                Err(SessionError::PayloadDecode(e))
            }
        }
    }

    /// Persist-or-delete: save `session` and set the response cookie.
    ///
    /// A negative `options.max_age` deletes the stored document and expires
    /// the cookie. Otherwise the values are sealed and upserted, and only
    /// after the write succeeds is the sealed identifier set as the cookie.
    pub fn save<B>(&self, res: &mut Response<B>, session: &mut Session) -> Result<(), SessionError> {
        if session.options.max_age < 0 {
            self.erase(session)?;
            append_cookie(res, &build_cookie(session.name(), "", &session.options))?;
            return Ok(());
        }

        let id = *session.id.get_or_insert_with(SessionId::new);

        let data = encode_multi(session.name(), &session.values, &self.codecs)
            .map_err(SessionError::Encode)?;
        let modified_at = self
            .repository
            .upsert(&StoredDocument::new(id, data))
            .map_err(SessionError::Repository)?;

        let encoded =
            encode_multi(session.name(), &id.to_hex(), &self.codecs).map_err(SessionError::Encode)?;
        append_cookie(res, &build_cookie(session.name(), &encoded, &session.options))?;

        debug!(
            name = session.name(),
            session_id = %id,
            modified_at = %modified_at,
            "Saved session"
        );
        Ok(())
    }

    /// Save every session registered in the request.
    pub fn save_all<B, R>(&self, req: &mut Request<B>, res: &mut Response<R>) -> Result<(), SessionError> {
        let Some(registry) = req.extensions_mut().get_mut::<SessionRegistry>() else {
            return Ok(());
        };
        for session in registry.sessions_mut() {
            self.save(res, session)?;
        }
        Ok(())
    }

    fn erase(&self, session: &Session) -> Result<(), SessionError> {
        let Some(id) = session.id else {
            debug!(name = session.name(), "Deleting session that was never stored");
            return Ok(());
        };

        let removed = self
            .repository
            .delete_by_id(id)
            .map_err(SessionError::Repository)?;
        debug!(name = session.name(), session_id = %id, removed = removed, "Deleted session");
        Ok(())
    }
}

impl std::fmt::Debug for SessionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionStore")
            .field("codecs", &self.codecs.len())
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

fn append_cookie<B>(res: &mut Response<B>, cookie: &str) -> Result<(), SessionError> {
    let value = HeaderValue::from_str(cookie)?;
    res.headers_mut().append(SET_COOKIE, value);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::ExpiringCodec;
    use crate::repository::MemoryRepository;
    use anyhow::anyhow;
    use chrono::{DateTime, Utc};
    use http::header::COOKIE;
    use std::sync::atomic::{AtomicI64, Ordering};

    fn keys() -> Vec<KeyPair> {
        vec![KeyPair::new(
            b"test-hash-key-at-least-32-chars!".to_vec(),
            Some(b"0123456789abcdef0123456789abcdef".to_vec()),
        )]
    }

    fn test_store() -> (SessionStore, Arc<MemoryRepository>) {
        let repo = Arc::new(MemoryRepository::new());
        let store = SessionStore::new(repo.clone(), None, &keys()).unwrap();
        (store, repo)
    }

    fn request_with(cookie: Option<&str>) -> Request<()> {
        let mut builder = Request::builder().uri("/");
        if let Some(cookie) = cookie {
            builder = builder.header(COOKIE, cookie);
        }
        builder.body(()).unwrap()
    }

    /// `name=value` pair from the last Set-Cookie header.
    fn issued_cookie(res: &Response<()>) -> String {
        let header = res
            .headers()
            .get_all(SET_COOKIE)
            .iter()
            .last()
            .unwrap()
            .to_str()
            .unwrap()
            .to_string();
        header.split(';').next().unwrap().to_string()
    }

    /// Repository whose storage calls all fail.
    struct UnavailableRepository;

    impl DocumentRepository for UnavailableRepository {
        fn fetch_by_id(&self, _id: SessionId) -> anyhow::Result<Option<StoredDocument>> {
            Err(anyhow!("db down"))
        }

        fn upsert(&self, _doc: &StoredDocument) -> anyhow::Result<DateTime<Utc>> {
            Err(anyhow!("db down"))
        }

        fn delete_by_id(&self, _id: SessionId) -> anyhow::Result<bool> {
            Err(anyhow!("db down"))
        }

        fn evict_stale(&self, _cutoff: DateTime<Utc>) -> anyhow::Result<usize> {
            Err(anyhow!("db down"))
        }

        fn document_count(&self) -> anyhow::Result<usize> {
            Err(anyhow!("db down"))
        }
    }

    /// Codec without an embedded expiry.
    struct PlainCodec;

    impl Codec for PlainCodec {
        fn encode(&self, _name: &str, value: &[u8]) -> Result<String, CodecError> {
            Ok(hex::encode(value))
        }

        fn decode(&self, _name: &str, value: &str) -> Result<Vec<u8>, CodecError> {
            hex::decode(value).map_err(|_| CodecError::InvalidFormat)
        }
    }

    /// Records the max age it was last given.
    struct RecordingCodec(Arc<AtomicI64>);

    impl Codec for RecordingCodec {
        fn encode(&self, _name: &str, value: &[u8]) -> Result<String, CodecError> {
            Ok(hex::encode(value))
        }

        fn decode(&self, _name: &str, value: &str) -> Result<Vec<u8>, CodecError> {
            hex::decode(value).map_err(|_| CodecError::InvalidFormat)
        }

        fn as_expiring_mut(&mut self) -> Option<&mut dyn ExpiringCodec> {
            Some(self)
        }
    }

    impl ExpiringCodec for RecordingCodec {
        fn max_age(&self) -> i64 {
            self.0.load(Ordering::SeqCst)
        }

        fn set_max_age(&mut self, secs: i64) {
            self.0.store(secs, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_no_cookie_is_new_session() {
        let (store, _repo) = test_store();
        let (session, error) = store.new_session(&request_with(None), "sid");

        assert!(session.is_new);
        assert!(session.values.is_empty());
        assert!(session.id().is_none());
        assert!(error.is_none());
    }

    #[test]
    fn test_save_then_load_roundtrip() {
        let (store, repo) = test_store();

        let (mut session, _) = store.new_session(&request_with(None), "sid");
        session.insert("uid", "7").unwrap();
        session.insert("roles", vec!["admin", "dev"]).unwrap();

        let mut res = Response::new(());
        store.save(&mut res, &mut session).unwrap();
        assert_eq!(repo.document_count().unwrap(), 1);

        let cookie = issued_cookie(&res);
        let (loaded, error) = store.new_session(&request_with(Some(&cookie)), "sid");

        assert!(error.is_none());
        assert!(!loaded.is_new);
        assert_eq!(loaded.id(), session.id());
        assert_eq!(loaded.values, session.values);
    }

    #[test]
    fn test_stored_payload_is_sealed() {
        let (store, repo) = test_store();
        let (mut session, _) = store.new_session(&request_with(None), "sid");
        session.insert("secret", "plaintext-marker").unwrap();

        let mut res = Response::new(());
        store.save(&mut res, &mut session).unwrap();

        let doc = repo.fetch_by_id(session.id().unwrap()).unwrap().unwrap();
        assert!(!doc.data.contains("plaintext-marker"));
        assert!(!issued_cookie(&res).contains(&session.id().unwrap().to_hex()));
    }

    #[test]
    fn test_resave_keeps_identifier() {
        let (store, repo) = test_store();
        let (mut session, _) = store.new_session(&request_with(None), "sid");

        let mut res = Response::new(());
        store.save(&mut res, &mut session).unwrap();
        let id = session.id().unwrap();

        session.insert("step", 2).unwrap();
        let mut res = Response::new(());
        store.save(&mut res, &mut session).unwrap();

        assert_eq!(session.id(), Some(id));
        assert_eq!(repo.document_count().unwrap(), 1);
    }

    #[test]
    fn test_forged_cookie_yields_new_session_with_error() {
        let (store, _repo) = test_store();
        let (session, error) = store.new_session(&request_with(Some("sid=forged-value")), "sid");

        assert!(session.is_new);
        assert!(session.values.is_empty());
        assert!(matches!(error, Some(SessionError::CookieDecode(_))));
        assert!(error.unwrap().is_decode_error());
    }

    #[test]
    fn test_cookie_from_other_keys_rejected() {
        let (store, _repo) = test_store();
        let other = SessionStore::new(
            Arc::new(MemoryRepository::new()),
            None,
            &[KeyPair::new(b"some-other-hash-key".to_vec(), None)],
        )
        .unwrap();

        let (mut session, _) = other.new_session(&request_with(None), "sid");
        let mut res = Response::new(());
        other.save(&mut res, &mut session).unwrap();

        let (loaded, error) = store.new_session(&request_with(Some(&issued_cookie(&res))), "sid");
        assert!(loaded.is_new);
        assert!(matches!(error, Some(SessionError::CookieDecode(_))));
    }

    #[test]
    fn test_missing_document_is_reported() {
        let (store, repo) = test_store();
        let (mut session, _) = store.new_session(&request_with(None), "sid");
        session.insert("uid", "7").unwrap();

        let mut res = Response::new(());
        store.save(&mut res, &mut session).unwrap();
        repo.delete_by_id(session.id().unwrap()).unwrap();

        let (loaded, error) = store.new_session(&request_with(Some(&issued_cookie(&res))), "sid");
        assert!(loaded.is_new);
        assert!(loaded.values.is_empty());
        assert!(matches!(error, Some(SessionError::DocumentNotFound(id)) if Some(id) == session.id()));
    }

    #[test]
    fn test_corrupted_payload_is_not_empty_session() {
        let (store, repo) = test_store();
        let (mut session, _) = store.new_session(&request_with(None), "sid");
        session.insert("uid", "7").unwrap();

        let mut res = Response::new(());
        store.save(&mut res, &mut session).unwrap();

        let id = session.id().unwrap();
        repo.upsert(&StoredDocument::new(id, "tampered".to_string())).unwrap();

        let (loaded, error) = store.new_session(&request_with(Some(&issued_cookie(&res))), "sid");
        assert!(loaded.is_new);
        assert!(loaded.values.is_empty());
        assert!(matches!(error, Some(SessionError::PayloadDecode(_))));
        assert!(repo.fetch_by_id(id).unwrap().is_none());
    }

    #[test]
    fn test_malformed_identifier_is_reported() {
        let (store, _repo) = test_store();
        let sealed = encode_multi("sid", "not-a-session-id", &store.codecs).unwrap();

        let (session, error) = store.new_session(&request_with(Some(&format!("sid={sealed}"))), "sid");
        assert!(session.is_new);
        assert!(matches!(error, Some(SessionError::IdentityFormat(_))));
    }

    #[test]
    fn test_delete_removes_document_and_expires_cookie() {
        let (store, repo) = test_store();
        let (mut session, _) = store.new_session(&request_with(None), "sid");
        session.insert("uid", "7").unwrap();

        let mut res = Response::new(());
        store.save(&mut res, &mut session).unwrap();
        let cookie = issued_cookie(&res);

        let (mut loaded, _) = store.new_session(&request_with(Some(&cookie)), "sid");
        loaded.options.max_age = -1;
        let mut res = Response::new(());
        store.save(&mut res, &mut loaded).unwrap();

        let header = res.headers().get(SET_COOKIE).unwrap().to_str().unwrap();
        assert!(header.starts_with("sid=;"));
        assert!(header.contains("Max-Age=0"));
        assert_eq!(repo.document_count().unwrap(), 0);

        let (again, error) = store.new_session(&request_with(Some(&cookie)), "sid");
        assert!(again.is_new);
        assert!(matches!(error, Some(SessionError::DocumentNotFound(_))));
    }

    #[test]
    fn test_delete_never_stored_session_succeeds() {
        let (store, _repo) = test_store();
        let (mut session, _) = store.new_session(&request_with(None), "sid");
        session.invalidate();

        let mut res = Response::new(());
        assert!(store.save(&mut res, &mut session).is_ok());
        assert!(res.headers().get(SET_COOKIE).is_some());
    }

    #[test]
    fn test_get_returns_same_instance() {
        let (store, _repo) = test_store();
        let mut req = request_with(None);

        let first: *const Session = {
            let (session, error) = store.get(&mut req, "sid");
            assert!(error.is_none());
            session.insert("uid", "7").unwrap();
            session
        };
        let (second, _) = store.get(&mut req, "sid");

        assert!(std::ptr::eq(first, second));
        assert_eq!(second.get::<String>("uid").as_deref(), Some("7"));
    }

    #[test]
    fn test_get_caches_decode_error() {
        let (store, _repo) = test_store();
        let mut req = request_with(Some("sid=bogus"));

        let (_, first) = store.get(&mut req, "sid");
        let (_, second) = store.get(&mut req, "sid");
        assert!(first.is_some());
        assert!(Arc::ptr_eq(&first.unwrap(), &second.unwrap()));
    }

    #[test]
    fn test_new_session_decodes_on_every_call() {
        let (store, repo) = test_store();
        let (mut session, _) = store.new_session(&request_with(None), "sid");
        session.insert("uid", "7").unwrap();
        let mut res = Response::new(());
        store.save(&mut res, &mut session).unwrap();

        let mut req = request_with(Some(&issued_cookie(&res)));
        let registered: Option<String> = store.get(&mut req, "sid").0.get("uid");
        assert_eq!(registered.as_deref(), Some("7"));

        let (first, error) = store.new_session(&req, "sid");
        assert!(error.is_none());
        assert_eq!(first.get::<String>("uid").as_deref(), Some("7"));

        // Rewrite the stored document behind the request's back.
        session.insert("uid", "8").unwrap();
        store.save(&mut Response::new(()), &mut session).unwrap();

        let (second, error) = store.new_session(&req, "sid");
        assert!(error.is_none());
        assert_eq!(second.get::<String>("uid").as_deref(), Some("8"));

        repo.delete_by_id(session.id().unwrap()).unwrap();
        let (third, error) = store.new_session(&req, "sid");
        assert!(third.is_new);
        assert!(matches!(error, Some(SessionError::DocumentNotFound(_))));

        // The registered instance keeps its first decode.
        let registered: Option<String> = store.get(&mut req, "sid").0.get("uid");
        assert_eq!(registered.as_deref(), Some("7"));
        assert_eq!(req.extensions().get::<SessionRegistry>().unwrap().len(), 1);
    }

    #[test]
    fn test_failed_upsert_sets_no_cookie() {
        let store = SessionStore::new(Arc::new(UnavailableRepository), None, &keys()).unwrap();
        let (mut session, _) = store.new_session(&request_with(None), "sid");
        session.insert("uid", "7").unwrap();

        let mut res = Response::new(());
        let result = store.save(&mut res, &mut session);

        assert!(matches!(result, Err(SessionError::Repository(_))));
        assert!(res.headers().get(SET_COOKIE).is_none());
    }

    #[test]
    fn test_failed_delete_sets_no_cookie() {
        let (store, _repo) = test_store();
        let (mut session, _) = store.new_session(&request_with(None), "sid");
        store.save(&mut Response::new(()), &mut session).unwrap();

        let unavailable = SessionStore::new(Arc::new(UnavailableRepository), None, &keys()).unwrap();
        session.invalidate();
        let mut res = Response::new(());
        let result = unavailable.save(&mut res, &mut session);

        assert!(matches!(result, Err(SessionError::Repository(_))));
        assert!(res.headers().get(SET_COOKIE).is_none());
    }

    #[test]
    fn test_failed_fetch_yields_new_session_with_error() {
        let (store, _repo) = test_store();
        let (mut session, _) = store.new_session(&request_with(None), "sid");
        let mut res = Response::new(());
        store.save(&mut res, &mut session).unwrap();

        let unavailable = SessionStore::new(Arc::new(UnavailableRepository), None, &keys()).unwrap();
        let (loaded, error) = unavailable.new_session(&request_with(Some(&issued_cookie(&res))), "sid");

        assert!(loaded.is_new);
        assert!(loaded.values.is_empty());
        match error {
            Some(SessionError::Repository(e)) => assert_eq!(e.to_string(), "db down"),
            other => panic!("expected repository error, got {:?}", other),
        }
    }

    #[test]
    fn test_save_all_persists_registered_sessions() {
        let (store, repo) = test_store();
        let mut req = request_with(None);

        store.get(&mut req, "a").0.insert("k", 1).unwrap();
        store.get(&mut req, "b").0.insert("k", 2).unwrap();

        let mut res = Response::new(());
        store.save_all(&mut req, &mut res).unwrap();

        assert_eq!(repo.document_count().unwrap(), 2);
        assert_eq!(res.headers().get_all(SET_COOKIE).iter().count(), 2);

        let registry = req.extensions().get::<SessionRegistry>().unwrap();
        assert_eq!(registry.len(), 2);
        assert!(registry.contains("a") && registry.contains("b"));
        let mut names: Vec<&str> = registry.names().collect();
        names.sort_unstable();
        assert_eq!(names, ["a", "b"]);
    }

    #[test]
    fn test_session_options_are_copies() {
        let (store, _repo) = test_store();
        let req = request_with(None);

        let (mut a, _) = store.new_session(&req, "sid");
        a.options.max_age = -1;
        a.options.path = "/admin".to_string();
        let (b, _) = store.new_session(&req, "sid");

        assert_eq!(b.options, *store.options());
        assert_eq!(store.options().max_age, crate::session::DEFAULT_MAX_AGE_SECS);
    }

    #[test]
    fn test_set_max_age_propagates_to_capable_codecs() {
        let recorded = Arc::new(AtomicI64::new(0));
        let codecs: Vec<Box<dyn Codec>> = vec![Box::new(PlainCodec), Box::new(RecordingCodec(recorded.clone()))];

        let options = CookieOptions {
            max_age: 3600,
            ..CookieOptions::default()
        };
        let mut store = SessionStore::with_codecs(Arc::new(MemoryRepository::new()), Some(options), codecs);
        assert_eq!(recorded.load(Ordering::SeqCst), 3600);

        store.set_max_age(86400);
        assert_eq!(recorded.load(Ordering::SeqCst), 86400);
        assert_eq!(store.options().max_age, 86400);
    }

    #[test]
    fn test_constructor_applies_max_age_to_secure_cookies() {
        let options = CookieOptions {
            max_age: 120,
            ..CookieOptions::default()
        };
        let mut store = SessionStore::new(Arc::new(MemoryRepository::new()), Some(options), &keys()).unwrap();

        for codec in &mut store.codecs {
            assert_eq!(codec.as_expiring_mut().unwrap().max_age(), 120);
        }
    }
}
