//! Client-side handshake state machine
//!
//! Drives the transport DH with the relay and one end-to-end DH per peer.
//! The machine is sans-IO: every input returns the messages to send and the
//! events to surface, and the caller owns the socket.
//!
//! ```text
//! Disconnected -> Connected -> Negotiating -> Keyed
//!                          \________________/  (cached transport key reused)
//!
//! per peer: Idle -> PendingOut | PendingIn -> Keyed
//! ```

use crate::crypto::{dh, KeyPair, SessionKey};
use crate::envelope;
use crate::ports::KeyCache;
use crate::{CoreError, Result};
use num_bigint::BigUint;
use shushh_types::{ClientMessage, ServerMessage, UserId};
use std::collections::HashMap;
use tracing::{debug, info, warn};

/// Transport (client <-> relay) phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    Disconnected,
    /// Socket open, identity not yet assigned
    Connected,
    /// `auth-dh-request` sent, waiting for the relay's public value
    Negotiating,
    Keyed,
}

/// End-to-end phase for one peer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerState {
    Idle,
    PendingOut,
    PendingIn,
    Keyed,
}

#[derive(Debug)]
enum Transport {
    Disconnected,
    Connected,
    Negotiating { id: UserId, pair: KeyPair },
    Keyed { id: UserId, key: SessionKey },
}

#[derive(Debug)]
enum PeerLink {
    PendingOut(KeyPair),
    PendingIn(BigUint),
    Keyed(SessionKey),
}

/// One line of locally buffered chat history
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatLine {
    pub from: UserId,
    pub text: String,
}

/// Things the user-facing side should know about
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    Welcomed { id: UserId },
    TransportKeyed { reused: bool },
    /// A peer asked for a secret chat; answer with `accept` or `decline`
    PeerRequested { from: UserId },
    PeerKeyed { peer: UserId, reused: bool },
    PeerDeclined { peer: UserId },
    PeerLoggedOut { peer: UserId },
    Message { from: UserId, text: String },
    RelayError { code: String, message: String },
}

/// Result of feeding one input into the machine
#[derive(Debug, Default)]
pub struct Output {
    pub outgoing: Vec<ClientMessage>,
    pub events: Vec<SessionEvent>,
}

impl Output {
    fn send(msg: ClientMessage) -> Self {
        Self {
            outgoing: vec![msg],
            events: Vec::new(),
        }
    }

    fn event(event: SessionEvent) -> Self {
        Self {
            outgoing: Vec::new(),
            events: vec![event],
        }
    }
}

/// Client protocol state for one user
pub struct ClientSession<C: KeyCache> {
    cache: C,
    transport: Transport,
    peers: HashMap<UserId, PeerLink>,
    history: HashMap<UserId, Vec<ChatLine>>,
}

impl<C: KeyCache> ClientSession<C> {
    pub fn new(cache: C) -> Self {
        Self {
            cache,
            transport: Transport::Disconnected,
            peers: HashMap::new(),
            history: HashMap::new(),
        }
    }

    pub fn cache(&self) -> &C {
        &self.cache
    }

    /// Identity assigned by the relay, once welcomed
    pub fn identity(&self) -> Option<&str> {
        match &self.transport {
            Transport::Negotiating { id, .. } | Transport::Keyed { id, .. } => Some(id),
            Transport::Disconnected | Transport::Connected => None,
        }
    }

    pub fn transport_state(&self) -> TransportState {
        match self.transport {
            Transport::Disconnected => TransportState::Disconnected,
            Transport::Connected => TransportState::Connected,
            Transport::Negotiating { .. } => TransportState::Negotiating,
            Transport::Keyed { .. } => TransportState::Keyed,
        }
    }

    pub fn peer_state(&self, peer: &str) -> PeerState {
        match self.peers.get(peer) {
            None => PeerState::Idle,
            Some(PeerLink::PendingOut(_)) => PeerState::PendingOut,
            Some(PeerLink::PendingIn(_)) => PeerState::PendingIn,
            Some(PeerLink::Keyed(_)) => PeerState::Keyed,
        }
    }

    /// Peers waiting for an accept/decline decision, sorted
    pub fn pending_requests(&self) -> Vec<&str> {
        let mut pending: Vec<&str> = self
            .peers
            .iter()
            .filter(|(_, link)| matches!(link, PeerLink::PendingIn(_)))
            .map(|(peer, _)| peer.as_str())
            .collect();
        pending.sort_unstable();
        pending
    }

    pub fn history(&self, peer: &str) -> &[ChatLine] {
        self.history.get(peer).map(Vec::as_slice).unwrap_or(&[])
    }

    /// The transport socket opened
    pub fn connected(&mut self) {
        self.transport = Transport::Connected;
    }

    /// The transport socket closed. Established keys survive in the cache and
    /// in memory; half-finished handshakes are dropped.
    pub fn disconnected(&mut self) {
        self.transport = Transport::Disconnected;
        self.peers
            .retain(|_, link| matches!(link, PeerLink::Keyed(_)));
    }

    /// Feed one message from the relay
    pub fn handle(&mut self, msg: ServerMessage) -> Result<Output> {
        match msg {
            ServerMessage::Welcome { id, keyed } => Ok(self.on_welcome(id, keyed)),
            ServerMessage::AuthDhResponse { public } => self.on_auth_response(&public),
            ServerMessage::DhRequest { from, public } => self.on_peer_request(from, &public),
            ServerMessage::DhResponse { from, public } => self.on_peer_response(from, &public),
            ServerMessage::DhDeclined { from } => self.on_declined(from),
            ServerMessage::PeerLogout { from } => {
                info!("Peer {} logged out of the secret chat", from);
                self.reset_peer(&from);
                Ok(Output::event(SessionEvent::PeerLoggedOut { peer: from }))
            }
            ServerMessage::Message { from, data } => self.on_message(from, &data),
            ServerMessage::Error { code, message } => {
                Ok(Output::event(SessionEvent::RelayError { code, message }))
            }
            ServerMessage::Unknown => {
                debug!("Ignoring message of unknown type");
                Ok(Output::default())
            }
        }
    }

    /// Start a secret chat with `peer`, reusing a cached key when one exists
    pub fn request_peer(&mut self, peer: &str) -> Result<Output> {
        let me = self.require_keyed()?;
        if me == peer {
            return Err(CoreError::InvalidState(
                "cannot open a secret chat with yourself".to_string(),
            ));
        }

        match self.peers.get(peer) {
            Some(PeerLink::Keyed(_)) => {
                return Ok(Output::event(SessionEvent::PeerKeyed {
                    peer: peer.to_string(),
                    reused: true,
                }))
            }
            Some(PeerLink::PendingIn(_)) => return self.accept(peer),
            Some(PeerLink::PendingOut(pair)) => {
                // The peer may already have answered this public value
                debug!("Re-sending dh-request to {}", peer);
                return Ok(Output::send(ClientMessage::DhRequest {
                    to: peer.to_string(),
                    public: pair.public_hex(),
                }));
            }
            None => {
                if let Some(key) = self.cache.peer_key(peer) {
                    info!("Reusing cached peer key for {}", peer);
                    self.peers.insert(peer.to_string(), PeerLink::Keyed(key));
                    return Ok(Output::event(SessionEvent::PeerKeyed {
                        peer: peer.to_string(),
                        reused: true,
                    }));
                }
            }
        }

        let pair = KeyPair::generate();
        let request = ClientMessage::DhRequest {
            to: peer.to_string(),
            public: pair.public_hex(),
        };
        self.peers
            .insert(peer.to_string(), PeerLink::PendingOut(pair));
        Ok(Output::send(request))
    }

    /// Accept a pending request from `peer`
    pub fn accept(&mut self, peer: &str) -> Result<Output> {
        self.require_keyed()?;
        let peer_public = match self.peers.remove(peer) {
            Some(PeerLink::PendingIn(public)) => public,
            other => {
                if let Some(link) = other {
                    self.peers.insert(peer.to_string(), link);
                }
                return Err(CoreError::InvalidState(format!(
                    "no pending request from {}",
                    peer
                )));
            }
        };

        let pair = KeyPair::generate();
        let response = ClientMessage::DhResponse {
            to: peer.to_string(),
            public: pair.public_hex(),
        };
        self.remember_peer_key(peer, pair.agree(&peer_public));

        Ok(Output {
            outgoing: vec![response],
            events: vec![SessionEvent::PeerKeyed {
                peer: peer.to_string(),
                reused: false,
            }],
        })
    }

    /// Decline a pending request from `peer`
    pub fn decline(&mut self, peer: &str) -> Result<Output> {
        if self.peer_state(peer) != PeerState::PendingIn {
            return Err(CoreError::InvalidState(format!(
                "no pending request from {}",
                peer
            )));
        }
        self.peers.remove(peer);
        Ok(Output::send(ClientMessage::DhDeclined {
            to: peer.to_string(),
        }))
    }

    /// Leave the secret chat with `peer`, discarding its key and history
    pub fn logout_peer(&mut self, peer: &str) -> Output {
        self.reset_peer(peer);
        Output::send(ClientMessage::PeerLogout {
            to: peer.to_string(),
        })
    }

    /// Encrypt `text` for `peer` under both layers
    pub fn send_text(&mut self, peer: &str, text: &str) -> Result<ClientMessage> {
        let (me, transport) = match &self.transport {
            Transport::Keyed { id, key } => (id.clone(), key),
            _ => return Err(CoreError::MissingTransportKey),
        };
        let peer_key = match self.peers.get(peer) {
            Some(PeerLink::Keyed(key)) => key,
            _ => return Err(CoreError::MissingPeerKey(peer.to_string())),
        };

        let data = envelope::seal(text, peer_key, transport)?;
        self.history
            .entry(peer.to_string())
            .or_default()
            .push(ChatLine {
                from: me,
                text: text.to_string(),
            });

        Ok(ClientMessage::Message {
            to: peer.to_string(),
            data,
        })
    }

    fn on_welcome(&mut self, id: UserId, keyed: bool) -> Output {
        info!("Relay assigned identity {}", id);
        let mut out = Output::event(SessionEvent::Welcomed { id: id.clone() });

        if keyed {
            if let Some(key) = self.cache.transport_key(&id) {
                info!("Reusing cached transport key");
                self.transport = Transport::Keyed { id, key };
                out.events.push(SessionEvent::TransportKeyed { reused: true });
                return out;
            }
        }

        let pair = KeyPair::generate();
        out.outgoing.push(ClientMessage::AuthDhRequest {
            public: pair.public_hex(),
        });
        self.transport = Transport::Negotiating { id, pair };
        out
    }

    fn on_auth_response(&mut self, public: &str) -> Result<Output> {
        let relay_public = dh::parse_public(public)?;

        let (id, pair) = match std::mem::replace(&mut self.transport, Transport::Connected) {
            Transport::Negotiating { id, pair } => (id, pair),
            other => {
                self.transport = other;
                return Err(CoreError::InvalidState(
                    "auth-dh-response without a pending transport handshake".to_string(),
                ));
            }
        };

        let key = pair.agree(&relay_public);
        if let Err(e) = self.cache.store_transport_key(&id, &key) {
            warn!("Failed to cache transport key: {}", e);
        }
        info!("Transport key established");
        self.transport = Transport::Keyed { id, key };
        Ok(Output::event(SessionEvent::TransportKeyed { reused: false }))
    }

    fn on_peer_request(&mut self, from: UserId, public: &str) -> Result<Output> {
        let peer_public = dh::parse_public(public)?;

        match self.peers.get(&from) {
            Some(PeerLink::PendingOut(_)) => {
                // Both sides asked at once: the smaller identity keeps its request
                if self.identity().map_or(false, |me| me < from.as_str()) {
                    debug!("Crossed dh-request from {}, keeping ours", from);
                    return Ok(Output::default());
                }
                debug!("Crossed dh-request from {}, yielding", from);
            }
            Some(PeerLink::Keyed(_)) => {
                info!("{} asked for a new key, dropping the old one", from);
                self.forget_cached_peer(&from);
            }
            Some(PeerLink::PendingIn(_)) | None => {}
        }

        info!("Secret chat requested by {}", from);
        self.peers
            .insert(from.clone(), PeerLink::PendingIn(peer_public));
        Ok(Output::event(SessionEvent::PeerRequested { from }))
    }

    fn on_peer_response(&mut self, from: UserId, public: &str) -> Result<Output> {
        let peer_public = dh::parse_public(public)?;

        match self.peers.remove(&from) {
            Some(PeerLink::PendingOut(pair)) => {
                self.remember_peer_key(&from, pair.agree(&peer_public));
                info!("Peer key established with {}", from);
                Ok(Output::event(SessionEvent::PeerKeyed {
                    peer: from,
                    reused: false,
                }))
            }
            other => {
                if let Some(link) = other {
                    self.peers.insert(from.clone(), link);
                }
                Err(CoreError::InvalidState(format!(
                    "unsolicited dh-response from {}",
                    from
                )))
            }
        }
    }

    fn on_declined(&mut self, from: UserId) -> Result<Output> {
        if self.peer_state(&from) != PeerState::PendingOut {
            return Err(CoreError::InvalidState(format!(
                "dh-declined from {} without an outstanding request",
                from
            )));
        }
        info!("{} declined the secret chat", from);
        self.peers.remove(&from);
        self.forget_cached_peer(&from);
        Ok(Output::event(SessionEvent::PeerDeclined { peer: from }))
    }

    fn on_message(&mut self, from: UserId, data: &[u8]) -> Result<Output> {
        let transport = match &self.transport {
            Transport::Keyed { key, .. } => key.clone(),
            _ => return Err(CoreError::MissingTransportKey),
        };
        let peer_key = self.incoming_peer_key(&from)?;

        let text = envelope::open(data, &transport, &peer_key)?;
        self.history.entry(from.clone()).or_default().push(ChatLine {
            from: from.clone(),
            text: text.clone(),
        });
        Ok(Output::event(SessionEvent::Message { from, text }))
    }

    /// Key for decrypting traffic from `from`. A peer that reused its cached
    /// key may write before we opened the chat locally, so fall back to ours.
    fn incoming_peer_key(&mut self, from: &str) -> Result<SessionKey> {
        match self.peers.get(from) {
            Some(PeerLink::Keyed(key)) => return Ok(key.clone()),
            Some(_) => return Err(CoreError::MissingPeerKey(from.to_string())),
            None => {}
        }
        let key = self
            .cache
            .peer_key(from)
            .ok_or_else(|| CoreError::MissingPeerKey(from.to_string()))?;
        self.peers
            .insert(from.to_string(), PeerLink::Keyed(key.clone()));
        Ok(key)
    }

    fn require_keyed(&self) -> Result<UserId> {
        match &self.transport {
            Transport::Keyed { id, .. } => Ok(id.clone()),
            _ => Err(CoreError::MissingTransportKey),
        }
    }

    fn remember_peer_key(&mut self, peer: &str, key: SessionKey) {
        if let Err(e) = self.cache.store_peer_key(peer, &key) {
            warn!("Failed to cache peer key for {}: {}", peer, e);
        }
        self.peers.insert(peer.to_string(), PeerLink::Keyed(key));
    }

    fn forget_cached_peer(&mut self, peer: &str) {
        if let Err(e) = self.cache.remove_peer_key(peer) {
            warn!("Failed to remove cached peer key for {}: {}", peer, e);
        }
    }

    fn reset_peer(&mut self, peer: &str) {
        self.peers.remove(peer);
        self.forget_cached_peer(peer);
        self.history.remove(peer);
    }
}
