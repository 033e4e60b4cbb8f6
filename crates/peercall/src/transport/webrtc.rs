//! webrtc-rs backed media transport
//!
//! Local tracks become `TrackLocalStaticSample`s (Opus, VP8). Samples pushed
//! into a [`MediaTrack`] are written to its track until every handle to the
//! `MediaTrack` is dropped.

use super::{
    DataChannelHandle, MediaTransport, TransportEvent, TransportEventSender, TransportFactory,
    TransportState,
};
use crate::config::{CallConfig, DataChannelMode};
use crate::media::{MediaStream, MediaTrack, TrackKind};
use crate::signaling::{IceCandidate, SdpType, SessionDescription};
use crate::{Error, Result};
use ::webrtc::api::interceptor_registry::register_default_interceptors;
use ::webrtc::api::media_engine::{MediaEngine, MIME_TYPE_OPUS, MIME_TYPE_VP8};
use ::webrtc::api::APIBuilder;
use ::webrtc::data_channel::data_channel_init::RTCDataChannelInit;
use ::webrtc::data_channel::data_channel_message::DataChannelMessage;
use ::webrtc::data_channel::data_channel_state::RTCDataChannelState;
use ::webrtc::data_channel::RTCDataChannel;
use ::webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use ::webrtc::ice_transport::ice_server::RTCIceServer;
use ::webrtc::media::Sample;
use ::webrtc::peer_connection::configuration::RTCConfiguration;
use ::webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use ::webrtc::peer_connection::sdp::sdp_type::RTCSdpType;
use ::webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use ::webrtc::peer_connection::RTCPeerConnection;
use ::webrtc::rtp_transceiver::rtp_codec::{RTCRtpCodecCapability, RTPCodecType};
use ::webrtc::rtp_transceiver::rtp_receiver::RTCRtpReceiver;
use ::webrtc::rtp_transceiver::rtp_sender::RTCRtpSender;
use ::webrtc::rtp_transceiver::RTCRtpTransceiver;
use ::webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use ::webrtc::track::track_local::TrackLocal;
use ::webrtc::track::track_remote::TrackRemote;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, error, info, instrument, warn};

fn to_rtc(description: SessionDescription) -> Result<RTCSessionDescription> {
    let parsed = match description.sdp_type {
        SdpType::Offer => RTCSessionDescription::offer(description.sdp),
        SdpType::Answer => RTCSessionDescription::answer(description.sdp),
    };
    parsed.map_err(|e| Error::Negotiation(format!("Failed to parse description: {}", e)))
}

fn from_rtc(description: RTCSessionDescription) -> Result<SessionDescription> {
    match description.sdp_type {
        RTCSdpType::Offer => Ok(SessionDescription::offer(description.sdp)),
        RTCSdpType::Answer => Ok(SessionDescription::answer(description.sdp)),
        other => Err(Error::Negotiation(format!(
            "Unsupported description type: {:?}",
            other
        ))),
    }
}

fn candidate_from_rtc(candidate: &RTCIceCandidate) -> Result<IceCandidate> {
    let init = candidate
        .to_json()
        .map_err(|e| Error::Negotiation(format!("Failed to serialize candidate: {}", e)))?;
    Ok(IceCandidate {
        candidate: init.candidate,
        sdp_mid: init.sdp_mid,
        sdp_m_line_index: init.sdp_mline_index,
    })
}

fn transport_state(state: RTCPeerConnectionState) -> Option<TransportState> {
    match state {
        RTCPeerConnectionState::New => Some(TransportState::New),
        RTCPeerConnectionState::Connecting => Some(TransportState::Connecting),
        RTCPeerConnectionState::Connected => Some(TransportState::Connected),
        RTCPeerConnectionState::Disconnected => Some(TransportState::Disconnected),
        RTCPeerConnectionState::Failed => Some(TransportState::Failed),
        RTCPeerConnectionState::Closed => Some(TransportState::Closed),
        _ => None,
    }
}

/// Data channel backed by an `RTCDataChannel`
pub struct WebRtcDataChannel {
    label: String,
    rtc_channel: Arc<RTCDataChannel>,
}

impl WebRtcDataChannel {
    /// Wrap a channel and forward its open/message/close events
    pub fn attach(rtc_channel: Arc<RTCDataChannel>, events: TransportEventSender) -> Self {
        let label = rtc_channel.label().to_string();

        let open_tx = events.clone();
        let open_label = label.clone();
        rtc_channel.on_open(Box::new(move || {
            let tx = open_tx.clone();
            let label = open_label.clone();
            Box::pin(async move {
                debug!("Data channel '{}' opened", label);
                let _ = tx.send(TransportEvent::DataChannelOpen(label));
            })
        }));

        let message_tx = events.clone();
        let message_label = label.clone();
        rtc_channel.on_message(Box::new(move |msg: DataChannelMessage| {
            let tx = message_tx.clone();
            let label = message_label.clone();
            Box::pin(async move {
                match String::from_utf8(msg.data.to_vec()) {
                    Ok(text) => {
                        let _ = tx.send(TransportEvent::DataChannelMessage { label, text });
                    }
                    Err(_) => warn!("Dropping non-UTF-8 message on data channel '{}'", label),
                }
            })
        }));

        let close_tx = events;
        let close_label = label.clone();
        rtc_channel.on_close(Box::new(move || {
            let tx = close_tx.clone();
            let label = close_label.clone();
            Box::pin(async move {
                debug!("Data channel '{}' closed", label);
                let _ = tx.send(TransportEvent::DataChannelClosed(label));
            })
        }));

        let error_label = label.clone();
        rtc_channel.on_error(Box::new(move |err: ::webrtc::Error| {
            let label = error_label.clone();
            Box::pin(async move {
                error!("Data channel '{}' error: {}", label, err);
            })
        }));

        Self { label, rtc_channel }
    }
}

#[async_trait]
impl DataChannelHandle for WebRtcDataChannel {
    fn label(&self) -> String {
        self.label.clone()
    }

    fn is_open(&self) -> bool {
        self.rtc_channel.ready_state() == RTCDataChannelState::Open
    }

    async fn send_text(&self, text: &str) -> Result<()> {
        if !self.is_open() {
            return Err(Error::DataChannel(format!(
                "Data channel '{}' is not open (state: {:?})",
                self.label,
                self.rtc_channel.ready_state()
            )));
        }
        self.rtc_channel
            .send_text(text.to_string())
            .await
            .map_err(|e| Error::DataChannel(format!("Failed to send text: {}", e)))?;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.rtc_channel
            .close()
            .await
            .map_err(|e| Error::ResourceRelease(format!("Failed to close data channel: {}", e)))
    }
}

/// Media transport over an `RTCPeerConnection`
pub struct WebRtcMediaTransport {
    connection_id: String,
    peer_connection: Arc<RTCPeerConnection>,
    data_channel_mode: DataChannelMode,
    senders: Mutex<Vec<Arc<RTCRtpSender>>>,
    events: TransportEventSender,
}

impl WebRtcMediaTransport {
    /// Create a peer connection and wire its callbacks to `events`
    #[instrument(skip(config, events), fields(stun = ?config.stun_server))]
    pub async fn new(config: &CallConfig, events: TransportEventSender) -> Result<Self> {
        let connection_id = uuid::Uuid::new_v4().to_string();
        info!("Creating peer connection: connection_id={}", connection_id);

        let mut media_engine = MediaEngine::default();
        media_engine
            .register_default_codecs()
            .map_err(|e| Error::Negotiation(format!("Failed to register codecs: {}", e)))?;

        let interceptor_registry =
            register_default_interceptors(Default::default(), &mut media_engine).map_err(|e| {
                Error::Negotiation(format!("Failed to register interceptors: {}", e))
            })?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(interceptor_registry)
            .build();

        let ice_servers: Vec<RTCIceServer> = config
            .stun_server
            .iter()
            .map(|url| RTCIceServer {
                urls: vec![url.clone()],
                ..Default::default()
            })
            .collect();

        let rtc_config = RTCConfiguration {
            ice_servers,
            ..Default::default()
        };

        let peer_connection =
            Arc::new(api.new_peer_connection(rtc_config).await.map_err(|e| {
                Error::Negotiation(format!("Failed to create peer connection: {}", e))
            })?);

        let transport = Self {
            connection_id,
            peer_connection,
            data_channel_mode: config.data_channel_mode,
            senders: Mutex::new(Vec::new()),
            events,
        };
        transport.register_handlers();
        Ok(transport)
    }

    /// Connection id used in track and stream ids
    pub fn connection_id(&self) -> &str {
        &self.connection_id
    }

    fn register_handlers(&self) {
        let candidate_tx = self.events.clone();
        self.peer_connection
            .on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
                let tx = candidate_tx.clone();
                Box::pin(async move {
                    let event = match candidate {
                        Some(c) => match candidate_from_rtc(&c) {
                            Ok(c) => TransportEvent::IceCandidate(Some(c)),
                            Err(e) => {
                                warn!("Skipping local candidate: {}", e);
                                return;
                            }
                        },
                        None => {
                            debug!("ICE gathering complete");
                            TransportEvent::IceCandidate(None)
                        }
                    };
                    let _ = tx.send(event);
                })
            }));

        let state_tx = self.events.clone();
        let connection_id = self.connection_id.clone();
        self.peer_connection.on_peer_connection_state_change(Box::new(
            move |s: RTCPeerConnectionState| {
                let tx = state_tx.clone();
                let connection_id = connection_id.clone();
                Box::pin(async move {
                    if let Some(state) = transport_state(s) {
                        debug!("Connection {} state: {:?}", connection_id, state);
                        let _ = tx.send(TransportEvent::StateChanged(state));
                    }
                })
            },
        ));

        let track_tx = self.events.clone();
        self.peer_connection
            .on_track(Box::new(
                move |track: Arc<TrackRemote>,
                      _receiver: Arc<RTCRtpReceiver>,
                      _transceiver: Arc<RTCRtpTransceiver>| {
                    let tx = track_tx.clone();
                    Box::pin(async move {
                        let kind = match track.kind() {
                            RTPCodecType::Audio => TrackKind::Audio,
                            RTPCodecType::Video => TrackKind::Video,
                            other => {
                                warn!("Ignoring remote track of kind {:?}", other);
                                return;
                            }
                        };
                        info!("Remote {} track added: {}", kind, track.id());
                        let media_track =
                            MediaTrack::with_id(track.id().to_string(), kind, track.stream_id().to_string());
                        let _ = tx.send(TransportEvent::RemoteTrack(media_track));
                    })
                },
            ));

        let channel_tx = self.events.clone();
        self.peer_connection
            .on_data_channel(Box::new(move |rtc_channel: Arc<RTCDataChannel>| {
                let tx = channel_tx.clone();
                Box::pin(async move {
                    info!(
                        "Remote data channel: label={}, id={:?}",
                        rtc_channel.label(),
                        rtc_channel.id()
                    );
                    let announce = tx.clone();
                    let channel = WebRtcDataChannel::attach(rtc_channel, tx);
                    let _ = announce.send(TransportEvent::RemoteDataChannel(Arc::new(channel)));
                })
            }));
    }

    fn track_for(&self, track: &MediaTrack) -> Arc<TrackLocalStaticSample> {
        let capability = match track.kind() {
            TrackKind::Audio => RTCRtpCodecCapability {
                mime_type: MIME_TYPE_OPUS.to_string(),
                clock_rate: 48000,
                channels: 2,
                sdp_fmtp_line: String::new(),
                rtcp_feedback: vec![],
            },
            TrackKind::Video => RTCRtpCodecCapability {
                mime_type: MIME_TYPE_VP8.to_string(),
                clock_rate: 90000,
                channels: 0,
                sdp_fmtp_line: String::new(),
                rtcp_feedback: vec![],
            },
        };
        Arc::new(TrackLocalStaticSample::new(
            capability,
            track.id().to_string(),
            format!("stream-{}", self.connection_id),
        ))
    }
}

#[async_trait]
impl MediaTransport for WebRtcMediaTransport {
    async fn create_offer(&self) -> Result<SessionDescription> {
        let offer = self
            .peer_connection
            .create_offer(None)
            .await
            .map_err(|e| Error::Negotiation(format!("Failed to create offer: {}", e)))?;
        from_rtc(offer)
    }

    async fn create_answer(&self) -> Result<SessionDescription> {
        let answer = self
            .peer_connection
            .create_answer(None)
            .await
            .map_err(|e| Error::Negotiation(format!("Failed to create answer: {}", e)))?;
        from_rtc(answer)
    }

    async fn set_local_description(&self, description: SessionDescription) -> Result<()> {
        self.peer_connection
            .set_local_description(to_rtc(description)?)
            .await
            .map_err(|e| Error::Negotiation(format!("Failed to set local description: {}", e)))
    }

    async fn set_remote_description(&self, description: SessionDescription) -> Result<()> {
        self.peer_connection
            .set_remote_description(to_rtc(description)?)
            .await
            .map_err(|e| Error::Negotiation(format!("Failed to set remote description: {}", e)))
    }

    async fn local_description(&self) -> Option<SessionDescription> {
        let description = self.peer_connection.local_description().await?;
        from_rtc(description).ok()
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()> {
        debug!("Adding remote ICE candidate: {}", candidate.candidate);
        let init = RTCIceCandidateInit {
            candidate: candidate.candidate,
            sdp_mid: candidate.sdp_mid,
            sdp_mline_index: candidate.sdp_m_line_index,
            username_fragment: None,
        };
        self.peer_connection
            .add_ice_candidate(init)
            .await
            .map_err(|e| Error::Negotiation(format!("Failed to add ICE candidate: {}", e)))
    }

    async fn create_data_channel(&self, label: &str) -> Result<Arc<dyn DataChannelHandle>> {
        let init = RTCDataChannelInit {
            ordered: Some(self.data_channel_mode.ordered()),
            max_retransmits: self.data_channel_mode.max_retransmits(),
            ..Default::default()
        };

        let rtc_channel = self
            .peer_connection
            .create_data_channel(label, Some(init))
            .await
            .map_err(|e| Error::DataChannel(format!("Failed to create data channel: {}", e)))?;

        debug!(
            "Created data channel '{}' with mode {:?}",
            label, self.data_channel_mode
        );
        Ok(Arc::new(WebRtcDataChannel::attach(rtc_channel, self.events.clone())))
    }

    async fn add_local_stream(&self, stream: &MediaStream) -> Result<()> {
        let mut senders = self.senders.lock().await;
        for track in stream.tracks() {
            let local = self.track_for(track);
            let sender = self
                .peer_connection
                .add_track(Arc::clone(&local) as Arc<dyn TrackLocal + Send + Sync>)
                .await
                .map_err(|e| Error::Negotiation(format!("Failed to add {} track: {}", track.kind(), e)))?;

            // Drain RTCP so interceptors keep running
            let rtcp_sender = Arc::clone(&sender);
            tokio::spawn(async move {
                let mut buf = vec![0u8; 1500];
                while rtcp_sender.read(&mut buf).await.is_ok() {}
            });

            // Forward captured samples until the track's last handle is gone
            let mut samples = track.subscribe_samples();
            let track_id = track.id().to_string();
            tokio::spawn(async move {
                loop {
                    match samples.recv().await {
                        Ok(sample) => {
                            let sample = Sample {
                                data: sample.data.into(),
                                duration: sample.duration,
                                timestamp: std::time::SystemTime::now(),
                                ..Default::default()
                            };
                            if let Err(e) = local.write_sample(&sample).await {
                                debug!("Dropping sample for track {}: {}", track_id, e);
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!("Track {} fell behind, skipped {} samples", track_id, skipped);
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
            });

            senders.push(sender);
            debug!("Added local {} track {}", track.kind(), track.id());
        }
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        info!("Closing peer connection {}", self.connection_id);
        self.senders.lock().await.clear();
        self.peer_connection
            .close()
            .await
            .map_err(|e| Error::ResourceRelease(format!("Failed to close connection: {}", e)))
    }
}

/// Factory producing [`WebRtcMediaTransport`]s
#[derive(Debug, Clone, Default)]
pub struct WebRtcTransportFactory;

#[async_trait]
impl TransportFactory for WebRtcTransportFactory {
    async fn create(
        &self,
        config: &CallConfig,
        events: TransportEventSender,
    ) -> Result<Box<dyn MediaTransport>> {
        Ok(Box::new(WebRtcMediaTransport::new(config, events).await?))
    }
}
