//! Posting identities: a throwaway key per session, or the user's own.
//!
//! Anonymous posts are signed with an ephemeral secp256k1 key that lives in
//! session storage. A logged-in identity is supplied from outside and only
//! read here. A mode flag picks which one signs, and an ephemeral key always
//! exists as the fallback, so asking for the active identity cannot fail.

use std::fmt;
use std::sync::{Arc, LazyLock, Mutex, MutexGuard, PoisonError};

use rand::RngCore;
use secp256k1::{All, Keypair, Message, Secp256k1, SecretKey};
use tracing::{debug, info, warn};

use crate::error::{ChanError, Result};
use crate::event::{Draft, Event};
use crate::session::SessionStore;

/// Session key holding the ephemeral secret (hex).
pub const EPHEMERAL_KEY_STORAGE: &str = "chan:ephemeral-nsec";
/// Session key holding the selected [`IdentityMode`].
pub const IDENTITY_MODE_STORAGE: &str = "chan:identity-mode";

static SECP: LazyLock<Secp256k1<All>> = LazyLock::new(Secp256k1::new);

/// Anything that can turn a draft into a signed event.
pub trait Signer: Send + Sync {
    /// Hex x-only public key.
    fn public_key(&self) -> String;
    fn sign(&self, draft: &Draft) -> Result<Event>;
}

/// A locally held BIP-340 key pair.
pub struct LocalKeys {
    keypair: Keypair,
    public_key: String,
}

impl LocalKeys {
    /// Fresh random key pair.
    pub fn generate() -> Self {
        let mut rng = rand::thread_rng();
        loop {
            let mut bytes = [0u8; 32];
            rng.fill_bytes(&mut bytes);
            // Out-of-range scalars are astronomically rare; just draw again.
            if let Ok(secret) = SecretKey::from_slice(&bytes) {
                return Self::from_secret(secret);
            }
        }
    }

    /// Restore a key pair from its hex secret.
    pub fn from_secret_hex(secret_hex: &str) -> Result<Self> {
        let bytes = hex::decode(secret_hex.trim())
            .map_err(|e| ChanError::signing(format!("secret key is not hex: {e}")))?;
        Ok(Self::from_secret(SecretKey::from_slice(&bytes)?))
    }

    fn from_secret(secret: SecretKey) -> Self {
        let keypair = Keypair::from_secret_key(&SECP, &secret);
        let public_key = hex::encode(keypair.x_only_public_key().0.serialize());
        Self {
            keypair,
            public_key,
        }
    }

    fn secret_hex(&self) -> String {
        hex::encode(self.keypair.secret_bytes())
    }
}

impl fmt::Debug for LocalKeys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalKeys")
            .field("public_key", &self.public_key)
            .finish_non_exhaustive()
    }
}

impl Signer for LocalKeys {
    fn public_key(&self) -> String {
        self.public_key.clone()
    }

    fn sign(&self, draft: &Draft) -> Result<Event> {
        let hash = draft.hash(&self.public_key)?;
        let msg = Message::from_digest(hash);
        let mut aux = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut aux);
        let sig = SECP.sign_schnorr_with_aux_rand(&msg, &self.keypair, &aux);
        Ok(Event {
            id: hex::encode(hash),
            pubkey: self.public_key.clone(),
            kind: draft.kind,
            created_at: draft.created_at,
            tags: draft.tags.clone(),
            content: draft.content.clone(),
            sig: hex::encode(sig.as_ref()),
        })
    }
}

/// Which identity signs new posts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum IdentityMode {
    #[default]
    Anon,
    LoggedIn,
}

impl IdentityMode {
    pub fn as_str(self) -> &'static str {
        match self {
            IdentityMode::Anon => "anon",
            IdentityMode::LoggedIn => "logged-in",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "anon" => Some(IdentityMode::Anon),
            "logged-in" => Some(IdentityMode::LoggedIn),
            _ => None,
        }
    }
}

/// Where the resolver is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentityPhase {
    /// No ephemeral key loaded yet.
    Uninitialized,
    /// Ephemeral key loaded, no mode chosen in this session.
    EphemeralReady,
    EphemeralActive,
    AuthenticatedActive,
}

/// The identity an authoring action signs with.
#[derive(Clone)]
pub enum Identity {
    Ephemeral(Arc<LocalKeys>),
    Authenticated(Arc<dyn Signer>),
}

impl Identity {
    pub fn public_key(&self) -> String {
        match self {
            Identity::Ephemeral(keys) => keys.public_key(),
            Identity::Authenticated(signer) => signer.public_key(),
        }
    }

    pub fn is_anonymous(&self) -> bool {
        matches!(self, Identity::Ephemeral(_))
    }

    pub fn sign(&self, draft: &Draft) -> Result<Event> {
        match self {
            Identity::Ephemeral(keys) => keys.sign(draft),
            Identity::Authenticated(signer) => signer.sign(draft),
        }
    }
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let variant = if self.is_anonymous() {
            "Ephemeral"
        } else {
            "Authenticated"
        };
        f.debug_tuple(variant).field(&self.public_key()).finish()
    }
}

#[derive(Default)]
struct State {
    ephemeral: Option<Arc<LocalKeys>>,
    authenticated: Option<Arc<dyn Signer>>,
    mode: IdentityMode,
    mode_selected: bool,
}

/// Owns the session's identity state.
///
/// Every accessor takes the state lock once, so concurrent callers always see
/// a consistent ephemeral key, login and mode.
pub struct IdentityResolver<S> {
    store: S,
    state: Mutex<State>,
}

impl<S: SessionStore> IdentityResolver<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            state: Mutex::new(State::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Load the ephemeral identity from the session, creating it on first use.
    pub fn activate(&self) -> Identity {
        let mut state = self.lock();
        self.resolve(&mut state)
    }

    /// Identity that signs the next post. Never fails.
    pub fn active_identity(&self) -> Identity {
        self.activate()
    }

    /// Public key of the active identity, used for the poster's own ID badge.
    pub fn active_public_key(&self) -> String {
        self.active_identity().public_key()
    }

    pub fn is_anonymous(&self) -> bool {
        self.active_identity().is_anonymous()
    }

    /// Public key of the ephemeral identity, whatever the mode.
    pub fn ephemeral_public_key(&self) -> String {
        let mut state = self.lock();
        self.ensure_ephemeral(&mut state).public_key()
    }

    pub fn mode(&self) -> IdentityMode {
        let mut state = self.lock();
        self.restore_mode(&mut state);
        state.mode
    }

    pub fn has_authenticated(&self) -> bool {
        self.lock().authenticated.is_some()
    }

    pub fn phase(&self) -> IdentityPhase {
        let state = self.lock();
        match (&state.ephemeral, state.mode_selected) {
            (None, _) => IdentityPhase::Uninitialized,
            (Some(_), false) => IdentityPhase::EphemeralReady,
            (Some(_), true) => match (state.mode, &state.authenticated) {
                (IdentityMode::LoggedIn, Some(_)) => IdentityPhase::AuthenticatedActive,
                _ => IdentityPhase::EphemeralActive,
            },
        }
    }

    /// Pick the signing identity. Logged-in mode without a login keeps
    /// signing with the ephemeral key.
    pub fn set_mode(&self, mode: IdentityMode) {
        let mut state = self.lock();
        self.select_mode(&mut state, mode);
    }

    /// Install the externally authenticated identity.
    pub fn login(&self, signer: Arc<dyn Signer>) {
        info!(pubkey = %signer.public_key(), "authenticated identity available");
        self.lock().authenticated = Some(signer);
    }

    /// Forget the login and fall back to posting anonymously. The ephemeral
    /// key is kept.
    pub fn logout(&self) {
        let mut state = self.lock();
        state.authenticated = None;
        self.select_mode(&mut state, IdentityMode::Anon);
    }

    /// Replace the ephemeral key with a new one and return its public key.
    pub fn rotate(&self) -> String {
        let mut state = self.lock();
        let keys = Arc::new(self.generate_and_store());
        info!(pubkey = %keys.public_key, "rotated ephemeral identity");
        state.ephemeral = Some(Arc::clone(&keys));
        keys.public_key()
    }

    fn resolve(&self, state: &mut State) -> Identity {
        let ephemeral = self.ensure_ephemeral(state);
        self.restore_mode(state);
        match (state.mode, &state.authenticated) {
            (IdentityMode::LoggedIn, Some(signer)) => Identity::Authenticated(Arc::clone(signer)),
            _ => Identity::Ephemeral(ephemeral),
        }
    }

    fn ensure_ephemeral(&self, state: &mut State) -> Arc<LocalKeys> {
        if let Some(keys) = &state.ephemeral {
            return Arc::clone(keys);
        }
        let keys = match self.store.get(EPHEMERAL_KEY_STORAGE) {
            Some(stored) => match LocalKeys::from_secret_hex(&stored) {
                Ok(keys) => {
                    debug!(pubkey = %keys.public_key, "restored ephemeral identity");
                    keys
                }
                Err(e) => {
                    warn!(error = %e, "stored ephemeral key unreadable, generating a new one");
                    self.generate_and_store()
                }
            },
            None => self.generate_and_store(),
        };
        let keys = Arc::new(keys);
        state.ephemeral = Some(Arc::clone(&keys));
        keys
    }

    fn restore_mode(&self, state: &mut State) {
        if state.mode_selected {
            return;
        }
        if let Some(mode) = self
            .store
            .get(IDENTITY_MODE_STORAGE)
            .as_deref()
            .and_then(IdentityMode::parse)
        {
            state.mode = mode;
            state.mode_selected = true;
        }
    }

    fn select_mode(&self, state: &mut State, mode: IdentityMode) {
        state.mode = mode;
        state.mode_selected = true;
        if let Err(e) = self.store.set(IDENTITY_MODE_STORAGE, mode.as_str()) {
            warn!(error = %e, "could not persist identity mode");
        }
    }

    fn generate_and_store(&self) -> LocalKeys {
        let keys = LocalKeys::generate();
        if let Err(e) = self.store.set(EPHEMERAL_KEY_STORAGE, &keys.secret_hex()) {
            warn!(error = %e, "could not persist ephemeral key, it will not survive this process");
        }
        debug!(pubkey = %keys.public_key, "generated ephemeral identity");
        keys
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Tag;
    use crate::session::MemorySession;
    use secp256k1::{schnorr::Signature, XOnlyPublicKey};

    fn draft() -> Draft {
        Draft {
            kind: 1,
            content: "hello".into(),
            tags: vec![Tag::new(["t", "21chan-b"])],
            created_at: 1_700_000_000,
        }
    }

    fn verify(ev: &Event) {
        let hash = draft_of(ev).hash(&ev.pubkey).unwrap();
        assert_eq!(hex::encode(hash), ev.id);
        let sig = Signature::from_slice(&hex::decode(&ev.sig).unwrap()).unwrap();
        let pk = XOnlyPublicKey::from_slice(&hex::decode(&ev.pubkey).unwrap()).unwrap();
        SECP.verify_schnorr(&sig, &Message::from_digest(hash), &pk)
            .unwrap();
    }

    fn draft_of(ev: &Event) -> Draft {
        Draft {
            kind: ev.kind,
            content: ev.content.clone(),
            tags: ev.tags.clone(),
            created_at: ev.created_at,
        }
    }

    struct FailingStore;

    impl SessionStore for FailingStore {
        fn get(&self, _key: &str) -> Option<String> {
            None
        }

        fn set(&self, _key: &str, _value: &str) -> Result<()> {
            Err(ChanError::storage("read-only"))
        }
    }

    #[test]
    fn local_keys_sign_verifiable_events() {
        let keys = LocalKeys::generate();
        let ev = keys.sign(&draft()).unwrap();
        assert_eq!(ev.pubkey, keys.public_key());
        assert_eq!(ev.pubkey.len(), 64);
        assert_eq!(ev.content, "hello");
        verify(&ev);
    }

    #[test]
    fn secret_hex_round_trip_and_rejects_garbage() {
        let keys = LocalKeys::generate();
        let restored = LocalKeys::from_secret_hex(&keys.secret_hex()).unwrap();
        assert_eq!(restored.public_key(), keys.public_key());
        assert!(LocalKeys::from_secret_hex("zz").is_err());
        assert!(LocalKeys::from_secret_hex(&"00".repeat(32)).is_err());
        assert!(!format!("{keys:?}").contains(&keys.secret_hex()));
    }

    #[test]
    fn first_activation_persists_and_second_restores() {
        let store = Arc::new(MemorySession::new());
        let first = IdentityResolver::new(Arc::clone(&store));
        assert_eq!(first.phase(), IdentityPhase::Uninitialized);
        let pk = first.activate().public_key();
        assert_eq!(first.phase(), IdentityPhase::EphemeralReady);
        assert!(store.get(EPHEMERAL_KEY_STORAGE).is_some());

        let second = IdentityResolver::new(Arc::clone(&store));
        assert_eq!(second.activate().public_key(), pk);
    }

    #[test]
    fn corrupt_material_regenerates() {
        let store = Arc::new(MemorySession::new());
        store.set(EPHEMERAL_KEY_STORAGE, "not-a-key").unwrap();
        let resolver = IdentityResolver::new(Arc::clone(&store));
        let pk = resolver.active_public_key();
        assert_eq!(pk.len(), 64);
        let stored = store.get(EPHEMERAL_KEY_STORAGE).unwrap();
        assert_eq!(LocalKeys::from_secret_hex(&stored).unwrap().public_key(), pk);
    }

    #[test]
    fn logged_in_mode_needs_a_login() {
        let resolver = IdentityResolver::new(MemorySession::new());
        let anon = resolver.active_public_key();
        resolver.set_mode(IdentityMode::LoggedIn);
        assert!(resolver.is_anonymous());
        assert_eq!(resolver.active_public_key(), anon);
        assert_eq!(resolver.phase(), IdentityPhase::EphemeralActive);

        let user = Arc::new(LocalKeys::generate());
        resolver.login(user.clone());
        assert!(!resolver.is_anonymous());
        assert_eq!(resolver.active_public_key(), user.public_key());
        assert_eq!(resolver.phase(), IdentityPhase::AuthenticatedActive);

        resolver.set_mode(IdentityMode::Anon);
        assert_eq!(resolver.active_public_key(), anon);
    }

    #[test]
    fn logout_forces_anon_and_keeps_ephemeral() {
        let resolver = IdentityResolver::new(MemorySession::new());
        let anon = resolver.ephemeral_public_key();
        resolver.login(Arc::new(LocalKeys::generate()));
        resolver.set_mode(IdentityMode::LoggedIn);
        resolver.logout();
        assert_eq!(resolver.mode(), IdentityMode::Anon);
        assert!(!resolver.has_authenticated());
        assert_eq!(resolver.active_public_key(), anon);
    }

    #[test]
    fn rotate_replaces_and_persists() {
        let store = Arc::new(MemorySession::new());
        let resolver = IdentityResolver::new(Arc::clone(&store));
        let before = resolver.active_public_key();
        let after = resolver.rotate();
        assert_ne!(before, after);
        assert_eq!(resolver.active_public_key(), after);
        let again = IdentityResolver::new(Arc::clone(&store));
        assert_eq!(again.active_public_key(), after);
    }

    #[test]
    fn rotate_while_logged_in_keeps_login_active() {
        let resolver = IdentityResolver::new(MemorySession::new());
        let user = Arc::new(LocalKeys::generate());
        resolver.login(user.clone());
        resolver.set_mode(IdentityMode::LoggedIn);
        let fresh = resolver.rotate();
        assert_eq!(resolver.active_public_key(), user.public_key());
        assert_eq!(resolver.ephemeral_public_key(), fresh);
    }

    #[test]
    fn mode_is_restored_from_session() {
        let store = Arc::new(MemorySession::new());
        IdentityResolver::new(Arc::clone(&store)).set_mode(IdentityMode::LoggedIn);
        let restored = IdentityResolver::new(Arc::clone(&store));
        assert_eq!(restored.mode(), IdentityMode::LoggedIn);
    }

    #[test]
    fn storage_failures_are_not_fatal() {
        let resolver = IdentityResolver::new(FailingStore);
        let pk = resolver.active_public_key();
        assert_eq!(resolver.active_public_key(), pk);
        resolver.set_mode(IdentityMode::Anon);
        verify(&resolver.active_identity().sign(&draft()).unwrap());
    }

    #[test]
    fn concurrent_callers_share_one_key() {
        let resolver = Arc::new(IdentityResolver::new(MemorySession::new()));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let r = Arc::clone(&resolver);
                std::thread::spawn(move || r.active_public_key())
            })
            .collect();
        let keys: Vec<String> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(keys.windows(2).all(|w| w[0] == w[1]));
    }
}
