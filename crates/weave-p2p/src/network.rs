use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::time::Duration;

use futures::StreamExt;
use libp2p::{
    gossipsub, identify, kad, noise,
    request_response::{self, cbor, ProtocolSupport, ResponseChannel},
    swarm::SwarmEvent,
    ping, tcp, yamux, Multiaddr, PeerId, StreamProtocol, Swarm,
};
use libp2p_swarm::NetworkBehaviour;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::P2pConfig;
use crate::message::{GossipMessage, WireRequest, WireResponse};

/// Combined libp2p network behaviour for a Weave node. `gossipsub` carries
/// justsaying joint broadcast; `request_response` carries the tagged
/// `get_joint`/`catchup`/`hash_tree`/`get_witnesses` channel added for
/// bootstrap and dependency resolution (see DESIGN.md). `kademlia`/
/// `identify`/`ping` form the peer-discovery/liveness stack, unchanged.
#[derive(NetworkBehaviour)]
pub struct WeaveBehaviour {
    pub gossipsub: gossipsub::Behaviour,
    pub request_response: cbor::Behaviour<WireRequest, WireResponse>,
    pub kademlia: kad::Behaviour<kad::store::MemoryStore>,
    pub identify: identify::Behaviour,
    pub ping: ping::Behaviour,
}

/// Inbound event surfaced to the node's own ingress pipeline.
pub enum Inbound {
    /// A new joint arrived over gossipsub.
    Joint(GossipMessage),
    /// A peer asked us something over the request/response channel; the
    /// caller must eventually answer with `Outbound::Respond(channel, ..)`.
    Request { peer: PeerId, channel: ResponseChannel<WireResponse>, request: WireRequest },
    /// A peer answered a request we sent.
    Response { peer: PeerId, response: WireResponse },
    /// We sent a request and got no response before libp2p itself gave up
    /// (distinct from the application-level `RESPONSE_TIMEOUT` sweep, which
    /// fires first in the normal case).
    OutboundFailure { peer: PeerId, request: WireRequest },
    /// A peer connection came up; the caller can now target `peer` with
    /// `Outbound::Request`.
    PeerConnected(PeerId),
    /// A peer connection went down; the caller should stop targeting `peer`
    /// and reroute anything pending on it.
    PeerDisconnected(PeerId),
}

pub enum Outbound {
    Broadcast(GossipMessage),
    Request { peer: PeerId, request: WireRequest },
    Respond { channel: ResponseChannel<WireResponse>, response: WireResponse },
}

/// Application-facing handle returned from `P2pNetwork::new()`.
pub struct P2pHandle {
    pub outbound_tx: mpsc::Sender<Outbound>,
    pub inbound_rx: mpsc::Receiver<Inbound>,
    pub local_peer_id: PeerId,
}

/// Owns the libp2p Swarm. Pass to `tokio::spawn(network.run())`.
pub struct P2pNetwork {
    swarm: Swarm<WeaveBehaviour>,
    topic: gossipsub::IdentTopic,
    outbound_rx: mpsc::Receiver<Outbound>,
    inbound_tx: mpsc::Sender<Inbound>,
    /// Requests we initiated, so an inbound response frame can be matched
    /// back to the `WireRequest` the application sent (libp2p itself only
    /// gives us the response, not the original request).
    outstanding: std::collections::HashMap<request_response::OutboundRequestId, WireRequest>,
}

impl P2pNetwork {
    /// Build the network and return `(P2pNetwork, P2pHandle)`.
    pub fn new(
        config: &P2pConfig,
    ) -> Result<(Self, P2pHandle), Box<dyn std::error::Error + Send + Sync>> {
        let topic = gossipsub::IdentTopic::new(&config.joint_topic);

        let mut swarm = libp2p::SwarmBuilder::with_new_identity()
            .with_tokio()
            .with_tcp(
                tcp::Config::default(),
                noise::Config::new,
                yamux::Config::default,
            )?
            .with_behaviour(|key: &libp2p::identity::Keypair| {
                let message_id_fn = |msg: &gossipsub::Message| {
                    let mut s = DefaultHasher::new();
                    msg.data.hash(&mut s);
                    gossipsub::MessageId::from(s.finish().to_string())
                };

                let gossipsub_config = gossipsub::ConfigBuilder::default()
                    .heartbeat_interval(Duration::from_secs(1))
                    .validation_mode(gossipsub::ValidationMode::Strict)
                    .message_id_fn(message_id_fn)
                    .build()
                    .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;

                let gossipsub = gossipsub::Behaviour::new(
                    gossipsub::MessageAuthenticity::Signed(key.clone()),
                    gossipsub_config,
                )
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;

                let request_response = cbor::Behaviour::new(
                    [(StreamProtocol::new("/weave/joints/1.0.0"), ProtocolSupport::Full)],
                    request_response::Config::default(),
                );

                let store = kad::store::MemoryStore::new(key.public().to_peer_id());
                let kademlia = kad::Behaviour::new(key.public().to_peer_id(), store);

                let identify = identify::Behaviour::new(identify::Config::new(
                    config.protocol_version.clone(),
                    key.public(),
                ));

                let ping = ping::Behaviour::default();

                Ok(WeaveBehaviour { gossipsub, request_response, kademlia, identify, ping })
            })?
            .build();

        swarm.behaviour_mut().gossipsub.subscribe(&topic)?;

        let listen_addr: Multiaddr = config.listen_addr.parse()?;
        swarm.listen_on(listen_addr)?;

        for addr_str in &config.bootstrap_peers {
            if let Ok(addr) = addr_str.parse::<Multiaddr>() {
                if let Some(libp2p::multiaddr::Protocol::P2p(peer_id)) = addr.iter().last() {
                    swarm.behaviour_mut().kademlia.add_address(&peer_id, addr.clone());
                    debug!(peer = %peer_id, "added bootstrap peer");
                }
            }
        }

        let local_peer_id = *swarm.local_peer_id();
        let (outbound_tx, outbound_rx) = mpsc::channel(256);
        let (inbound_tx, inbound_rx) = mpsc::channel(256);

        let network = P2pNetwork { swarm, topic, outbound_rx, inbound_tx, outstanding: Default::default() };
        let handle = P2pHandle { outbound_tx, inbound_rx, local_peer_id };

        Ok((network, handle))
    }

    /// Drive the P2P event loop. Run in a dedicated tokio task.
    pub async fn run(mut self) {
        loop {
            tokio::select! {
                Some(msg) = self.outbound_rx.recv() => self.handle_outbound(msg),
                event = self.swarm.select_next_some() => self.handle_swarm_event(event).await,
            }
        }
    }

    fn handle_outbound(&mut self, msg: Outbound) {
        match msg {
            Outbound::Broadcast(joint) => {
                let data = joint.to_bytes();
                if let Err(e) = self.swarm.behaviour_mut().gossipsub.publish(self.topic.clone(), data) {
                    warn!(error = %e, "gossipsub publish failed");
                }
            }
            Outbound::Request { peer, request } => {
                let id = self.swarm.behaviour_mut().request_response.send_request(&peer, request.clone());
                self.outstanding.insert(id, request);
            }
            Outbound::Respond { channel, response } => {
                if self.swarm.behaviour_mut().request_response.send_response(channel, response).is_err() {
                    warn!("failed to send response: peer disconnected or channel already used");
                }
            }
        }
    }

    async fn handle_swarm_event(&mut self, event: SwarmEvent<WeaveBehaviourEvent>) {
        match event {
            SwarmEvent::NewListenAddr { address, .. } => {
                info!(addr = %address, "P2P listening on");
            }
            SwarmEvent::Behaviour(WeaveBehaviourEvent::Gossipsub(gossipsub::Event::Message { message, .. })) => {
                match GossipMessage::from_bytes(&message.data) {
                    Ok(msg) => {
                        let _ = self.inbound_tx.send(Inbound::Joint(msg)).await;
                    }
                    Err(e) => debug!(error = %e, "failed to decode gossip message"),
                }
            }
            SwarmEvent::Behaviour(WeaveBehaviourEvent::RequestResponse(event)) => {
                self.handle_request_response_event(event).await;
            }
            SwarmEvent::Behaviour(WeaveBehaviourEvent::Identify(identify::Event::Received { peer_id, info, .. })) => {
                for addr in info.listen_addrs {
                    self.swarm.behaviour_mut().kademlia.add_address(&peer_id, addr);
                }
            }
            SwarmEvent::ConnectionEstablished { peer_id, .. } => {
                debug!(peer = %peer_id, "connection established");
                let _ = self.inbound_tx.send(Inbound::PeerConnected(peer_id)).await;
            }
            SwarmEvent::ConnectionClosed { peer_id, .. } => {
                debug!(peer = %peer_id, "connection closed");
                let _ = self.inbound_tx.send(Inbound::PeerDisconnected(peer_id)).await;
            }
            _ => {}
        }
    }

    async fn handle_request_response_event(
        &mut self,
        event: request_response::Event<WireRequest, WireResponse>,
    ) {
        match event {
            request_response::Event::Message { peer, message } => match message {
                request_response::Message::Request { request, channel, .. } => {
                    let _ = self.inbound_tx.send(Inbound::Request { peer, channel, request }).await;
                }
                request_response::Message::Response { request_id, response } => {
                    self.outstanding.remove(&request_id);
                    let _ = self.inbound_tx.send(Inbound::Response { peer, response }).await;
                }
            },
            request_response::Event::OutboundFailure { peer, request_id, error, .. } => {
                warn!(%peer, %error, "request_response outbound failure");
                if let Some(request) = self.outstanding.remove(&request_id) {
                    let _ = self.inbound_tx.send(Inbound::OutboundFailure { peer, request }).await;
                }
            }
            request_response::Event::InboundFailure { peer, error, .. } => {
                warn!(%peer, %error, "request_response inbound failure");
            }
            request_response::Event::ResponseSent { .. } => {}
        }
    }
}
